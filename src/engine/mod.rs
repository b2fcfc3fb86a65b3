//! Per-symbol order book engine.
//!
//! [`OrderBookEngine::start`] validates the symbol, fetches a snapshot and then hands the
//! book to a spawned task that owns the depth stream. Readers only ever see immutable
//! [`BookView`] copies published through a `watch` channel, the task is the single writer.

mod task;

use crate::config::EngineConfig;
use crate::error::{EngineError, MessageParseError, SnapshotError, StreamError};
use crate::l2_book::{BookFsm, BookSequencer, BookView, Order, Symbol};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use task::EngineTask;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub trait SnapshotFetcher<O> {
    fn fetch_snapshot(
        &self,
        symbol: &Symbol,
        limit: usize,
    ) -> impl Future<Output = Result<Order<O>, SnapshotError>> + Send;
}

pub trait DepthFeed<O> {
    /// Opens the incremental depth stream for `symbol`.
    fn connect(
        &self,
        symbol: &Symbol,
    ) -> impl Future<Output = Result<FeedStream, StreamError>> + Send;

    /// Decodes one frame. `Ok(None)` for frames that are not depth updates.
    fn decode(&self, payload: &[u8]) -> Result<Option<Order<O>>, MessageParseError>;
}

/// Inbound frames of one live connection. Dropping it closes the connection.
pub struct FeedStream {
    rx: mpsc::Receiver<Result<Vec<u8>, StreamError>>,
    reader: Option<JoinHandle<()>>,
}

impl FeedStream {
    pub fn new(
        rx: mpsc::Receiver<Result<Vec<u8>, StreamError>>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, reader }
    }

    /// A stream fed by some other producer, ends when all senders are gone.
    pub fn from_channel(rx: mpsc::Receiver<Result<Vec<u8>, StreamError>>) -> Self {
        Self::new(rx, None)
    }

    /// `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, StreamError>> {
        self.rx.recv().await
    }
}

impl Drop for FeedStream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted. Terminal.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineStatus {
    pub state: ConnectionState,
    /// Most recent error, cleared once connected again.
    pub error: Option<EngineError>,
}

/// Handle to a running book for one symbol.
pub struct OrderBookEngine {
    symbol: Symbol,
    view_tx: Arc<watch::Sender<BookView>>,
    status_tx: Arc<watch::Sender<EngineStatus>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl OrderBookEngine {
    /// Validates `symbol`, fetches the initial snapshot and starts streaming.
    ///
    /// Nothing is fetched for an invalid symbol, and no stream is opened when the
    /// snapshot fails.
    pub async fn start<O, S, F, D>(
        symbol: &str,
        config: EngineConfig,
        sequencer: S,
        fetcher: F,
        feed: D,
    ) -> Result<Self, EngineError>
    where
        O: Send + 'static,
        S: BookSequencer<O> + Send + 'static,
        F: SnapshotFetcher<O> + Send + Sync + 'static,
        D: DepthFeed<O> + Send + Sync + 'static,
    {
        let symbol = Symbol::parse(symbol)?;

        let snapshot = match fetcher.fetch_snapshot(&symbol, config.depth_limit).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "initial snapshot failed");
                return Err(e.into());
            }
        };

        let mut fsm = BookFsm::new(sequencer, config.depth_limit);
        fsm.update(snapshot);
        info!(
            symbol = %symbol,
            update_id = fsm.last_sequence().val(),
            depth = config.depth_limit,
            "book initialized from snapshot"
        );

        let view_tx = Arc::new(watch::Sender::new(fsm.snapshot()));
        let status_tx = Arc::new(watch::Sender::new(EngineStatus::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = EngineTask {
            symbol: symbol.clone(),
            backoff: config.backoff(),
            config,
            fsm,
            fetcher,
            feed,
            view_tx: view_tx.clone(),
            status_tx: status_tx.clone(),
            shutdown_rx,
        };

        Ok(Self {
            symbol,
            view_tx,
            status_tx,
            shutdown_tx,
            task: Some(tokio::spawn(task.run())),
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Latest view, reflects the last applied update.
    pub fn view(&self) -> BookView {
        self.view_tx.borrow().clone()
    }

    /// Notified after every change to the book.
    pub fn subscribe(&self) -> watch::Receiver<BookView> {
        self.view_tx.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        self.status_tx.borrow().clone()
    }

    /// Notified on connection state changes and errors.
    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Closes the connection, cancels any pending reconnect and drops the book.
    ///
    /// Safe to call repeatedly, and after the engine has failed.
    pub async fn dispose(&mut self) {
        self.shutdown_tx.send_replace(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(symbol = %self.symbol, "engine task panicked");
                }
            }
            info!(symbol = %self.symbol, "engine disposed");
        }

        self.view_tx.send_replace(BookView::default());
        self.status_tx.send_replace(EngineStatus::default());
    }
}

impl Drop for OrderBookEngine {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
