pub mod api;
pub mod book;
pub mod types;

pub use api::{BinanceEnvironment, Spot};
pub use book::{BinanceSequencer, Book};
pub use types::{DepthSnapshot, DepthUpdate, DepthUpdateSeq};
