use super::api::{BinanceEnvironment, Spot};
use super::types::DepthUpdateSeq;
use crate::config::EngineConfig;
use crate::engine::OrderBookEngine;
use crate::error::EngineError;
use crate::l2_book::{BookSequencer, Order, Sequence};

/// Spot diff-depth rules: an event covers ids `U..=u`, the next one starts at `u + 1`.
///
/// With `strict` off every update is applied in arrival order.
pub struct BinanceSequencer {
    strict: bool,
}

impl BinanceSequencer {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl BookSequencer<DepthUpdateSeq> for BinanceSequencer {
    fn is_first_event(&self, cur_seq: Sequence, update: &Order<DepthUpdateSeq>) -> bool {
        let next = cur_seq.val().saturating_add(1);
        !self.strict || (update.o.first_update_id <= next && next <= update.o.last_update_id)
    }

    fn is_stale(&self, cur_seq: Sequence, update: &Order<DepthUpdateSeq>) -> bool {
        self.strict && update.o.last_update_id <= cur_seq.val()
    }

    fn is_next(&self, cur_seq: Sequence, update: &Order<DepthUpdateSeq>) -> bool {
        !self.strict || update.o.first_update_id == cur_seq.val().saturating_add(1)
    }
}

pub struct Book;

impl Book {
    /// Spot book for `symbol` in the environment named by `BINANCE_ENVIRONMENT`.
    pub async fn new_spot(
        symbol: &str,
        config: EngineConfig,
    ) -> Result<OrderBookEngine, EngineError> {
        Self::spot_in(symbol, config, BinanceEnvironment::from_env()).await
    }

    pub async fn spot_in(
        symbol: &str,
        config: EngineConfig,
        environment: BinanceEnvironment,
    ) -> Result<OrderBookEngine, EngineError> {
        let api = Spot::new(environment);
        let sequencer = BinanceSequencer::new(config.sequence_check);
        OrderBookEngine::start(symbol, config, sequencer, api.clone(), api).await
    }
}
