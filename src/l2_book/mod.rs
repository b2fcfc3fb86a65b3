pub mod fsm;
pub mod types;
pub mod view;

pub use fsm::{BookAction, BookFsm, BookSequencer};
pub use types::{Order, Price, PriceLevel, PriceSize, Sequence, Side, Size, Symbol};
pub use view::{BookView, DepthRow};
