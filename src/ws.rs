use crate::engine::FeedStream;
use crate::error::StreamError;
use fastwebsockets::OpCode;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::{TlsConnector, rustls::ClientConfig};
use tracing::{debug, warn};
use url::Url;

/// Frames buffered between the socket reader and the engine.
const FRAME_BUFFER: usize = 1024;

/// Opens a TLS websocket and spawns a reader forwarding text/binary frames.
///
/// The returned stream ends when the server closes, and yields an error item on
/// transport failure. Dropping it stops the reader and closes the socket.
pub async fn connect(url: &str) -> Result<FeedStream, WsError> {
    let url_parsed = Url::parse(url)?;
    let host = url_parsed.host_str().ok_or(WsError::MissingHost)?;

    let port = url_parsed.port_or_known_default().unwrap_or(443);
    let addr = format!("{}:{}", host, port);

    let tcp_stream = TcpStream::connect(&addr).await?;

    let root_store = tokio_rustls::rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let domain = tokio_rustls::rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| WsError::InvalidDns(e.to_string()))?;

    let tls_stream = connector.connect(domain, tcp_stream).await?;

    let req = hyper::Request::builder()
        .uri(url)
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header(
            "Sec-WebSocket-Key",
            fastwebsockets::handshake::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .body(Empty::<Bytes>::new())?;

    let executor = TokioExecutor::new();
    let (ws, _) = fastwebsockets::handshake::client(&executor, req, tls_stream)
        .await
        .map_err(|e| WsError::Handshake(format!("{:?}", e)))?;

    let mut ws = fastwebsockets::FragmentCollector::new(ws);

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);

    let reader = tokio::spawn(async move {
        loop {
            match ws.read_frame().await {
                Ok(frame) => match frame.opcode {
                    OpCode::Text | OpCode::Binary => {
                        let payload = match frame.payload {
                            fastwebsockets::Payload::Owned(data) => data,
                            fastwebsockets::Payload::Borrowed(data) => data.to_vec(),
                            fastwebsockets::Payload::BorrowedMut(data) => data.to_vec(),
                            fastwebsockets::Payload::Bytes(data) => data.into(),
                        };
                        if tx.send(Ok(payload)).await.is_err() {
                            break;
                        }
                    }
                    OpCode::Close => {
                        debug!("websocket closed by server");
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    let _ = tx.send(Err(StreamError::Transport(e.to_string()))).await;
                    break;
                }
            }
        }
    });

    Ok(FeedStream::new(rx, Some(reader)))
}

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS Error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
    #[error("Invalid DNS name: {0}")]
    InvalidDns(String),
    #[error("HTTP Error: {0}")]
    Http(#[from] http::Error),
    #[error("WebSocket Error: {0}")]
    WebSocket(#[from] fastwebsockets::WebSocketError),
    #[error("No host in URL")]
    MissingHost,
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl From<WsError> for StreamError {
    fn from(e: WsError) -> Self {
        StreamError::Connect(e.to_string())
    }
}
