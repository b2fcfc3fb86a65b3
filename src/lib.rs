//! Local L2 order book kept in sync with a venue's snapshot + diff depth feed.

pub mod backoff;
pub mod binance;
pub mod config;
pub mod engine;
pub mod error;
pub mod l2_book;
pub mod logging;
pub mod ws;

pub use config::EngineConfig;
pub use engine::{
    ConnectionState, DepthFeed, EngineStatus, FeedStream, OrderBookEngine, SnapshotFetcher,
};
pub use error::{EngineError, MessageParseError, SnapshotError, StreamError, ValidationError};
pub use l2_book::{BookView, PriceLevel, Side};
