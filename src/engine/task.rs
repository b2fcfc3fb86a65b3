use super::{ConnectionState, DepthFeed, EngineStatus, FeedStream, SnapshotFetcher};
use crate::backoff::ExponentialBackoff;
use crate::config::EngineConfig;
use crate::error::{EngineError, StreamError};
use crate::l2_book::{BookAction, BookFsm, BookSequencer, BookView, Symbol};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Snapshots fetched in a row while trying to line up with the stream.
const MAX_RESYNC_SNAPSHOTS: usize = 3;

enum SessionEnd {
    Shutdown,
    Lost(StreamError),
}

/// Single writer of the book. Runs until shutdown or until reconnecting is given up.
pub(super) struct EngineTask<O, S, F, D>
where
    S: BookSequencer<O>,
{
    pub symbol: Symbol,
    pub config: EngineConfig,
    pub fsm: BookFsm<O, S>,
    pub fetcher: F,
    pub feed: D,
    pub backoff: ExponentialBackoff,
    pub view_tx: Arc<watch::Sender<BookView>>,
    pub status_tx: Arc<watch::Sender<EngineStatus>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl<O, S, F, D> EngineTask<O, S, F, D>
where
    O: Send + 'static,
    S: BookSequencer<O> + Send + 'static,
    F: SnapshotFetcher<O> + Send + Sync + 'static,
    D: DepthFeed<O> + Send + Sync + 'static,
{
    pub async fn run(mut self) {
        // the first connection reuses the snapshot fetched on start
        let mut have_snapshot = true;

        loop {
            self.set_status(ConnectionState::Connecting, None);

            let Some(opened) = self.open(have_snapshot).await else {
                break;
            };
            have_snapshot = false;

            let lost = match opened {
                Ok(stream) => {
                    self.backoff.reset();
                    self.set_status(ConnectionState::Connected, None);
                    info!(symbol = %self.symbol, "depth stream connected");

                    match self.run_session(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => e.into(),
                    }
                }
                Err(e) => e,
            };

            let Some(delay) = self.backoff.next_delay() else {
                error!(
                    symbol = %self.symbol,
                    attempts = self.backoff.max_attempts(),
                    error = %lost,
                    "giving up reconnecting"
                );
                self.set_status(
                    ConnectionState::Failed,
                    Some(EngineError::ReconnectExhausted {
                        attempts: self.backoff.max_attempts(),
                    }),
                );
                return;
            };

            let attempt = self.backoff.attempt();
            warn!(
                symbol = %self.symbol,
                error = %lost,
                attempt,
                delay_secs = delay.as_secs_f64(),
                "depth stream lost, reconnecting"
            );
            self.set_status(ConnectionState::Reconnecting { attempt, delay }, Some(lost));

            if or_shutdown(&mut self.shutdown_rx, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                break;
            }
        }

        debug!(symbol = %self.symbol, "engine task stopped");
    }

    /// Snapshot (unless one was just applied), then connect. `None` on shutdown.
    async fn open(&mut self, have_snapshot: bool) -> Option<Result<FeedStream, EngineError>> {
        if !have_snapshot {
            let fetched = or_shutdown(
                &mut self.shutdown_rx,
                self.fetcher.fetch_snapshot(&self.symbol, self.config.depth_limit),
            )
            .await?;

            match fetched {
                Ok(snapshot) => {
                    // deltas buffered on the previous connection are useless now
                    self.fsm.clear();
                    self.fsm.update(snapshot);
                    self.publish();
                }
                Err(e) => return Some(Err(e.into())),
            }
        }

        let connect =
            tokio::time::timeout(self.config.connect_timeout, self.feed.connect(&self.symbol));
        match or_shutdown(&mut self.shutdown_rx, connect).await? {
            Ok(Ok(stream)) => Some(Ok(stream)),
            Ok(Err(e)) => Some(Err(e.into())),
            Err(_) => Some(Err(StreamError::Connect("connect timed out".to_string()).into())),
        }
    }

    async fn run_session(&mut self, mut stream: FeedStream) -> SessionEnd {
        loop {
            let payload = match or_shutdown(&mut self.shutdown_rx, stream.recv()).await {
                None => return SessionEnd::Shutdown,
                Some(None) => return SessionEnd::Lost(StreamError::Closed),
                Some(Some(Err(e))) => return SessionEnd::Lost(e),
                Some(Some(Ok(payload))) => payload,
            };

            let order = match self.feed.decode(&payload) {
                Ok(Some(order)) => order,
                Ok(None) => continue,
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "dropping depth message");
                    continue;
                }
            };

            match self.fsm.update(order) {
                BookAction::Applied => self.publish(),
                BookAction::Ignored => {}
                BookAction::RetrieveSnapshot => {
                    if let Err(end) = self.resync().await {
                        return end;
                    }
                }
            }
        }
    }

    /// Fetches snapshots on the live connection until the buffered deltas line up.
    async fn resync(&mut self) -> Result<(), SessionEnd> {
        for _ in 0..MAX_RESYNC_SNAPSHOTS {
            info!(
                symbol = %self.symbol,
                last_id = self.fsm.last_sequence().val(),
                buffered = self.fsm.buffered(),
                "resyncing book from snapshot"
            );

            let fetched = or_shutdown(
                &mut self.shutdown_rx,
                self.fetcher.fetch_snapshot(&self.symbol, self.config.depth_limit),
            )
            .await
            .ok_or(SessionEnd::Shutdown)?;
            let snapshot = fetched.map_err(|e| SessionEnd::Lost(StreamError::Resync(e)))?;

            let action = self.fsm.update(snapshot);
            self.publish();
            if action != BookAction::RetrieveSnapshot {
                return Ok(());
            }
        }

        Err(SessionEnd::Lost(StreamError::OutOfSync))
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.fsm.snapshot());
    }

    fn set_status(&self, state: ConnectionState, error: Option<EngineError>) {
        self.status_tx.send_replace(EngineStatus { state, error });
    }
}

/// Runs `fut` unless shutdown is requested first. A dropped handle counts as shutdown.
async fn or_shutdown<T>(
    shutdown_rx: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => None,
        out = fut => Some(out),
    }
}

async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown_rx.borrow_and_update();
        if stop || shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
