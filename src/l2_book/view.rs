use super::types::{PriceLevel, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Point in time copy of the book handed to readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookView {
    /// Best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Best (lowest) first.
    pub asks: Vec<PriceLevel>,
    /// `None` unless both sides have a level, or when the sum does not fit a decimal.
    pub mid_price: Option<Decimal>,
    /// Local time the last update was applied.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Venue event time of the last applied delta. Snapshots carry none.
    pub event_time: Option<DateTime<Utc>>,
    pub last_update_id: u64,
}

/// A level with the running quantity total from the best price up to and including it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthRow {
    pub price: Decimal,
    pub quantity: Decimal,
    pub total: Decimal,
}

impl BookView {
    pub fn new(
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        last_update_time: Option<DateTime<Utc>>,
        last_update_id: u64,
    ) -> Self {
        let mid_price = mid(&bids, &asks);
        Self {
            bids,
            asks,
            mid_price,
            last_update_time,
            event_time: None,
            last_update_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn levels(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn cumulative_volume(&self, side: Side) -> Vec<DepthRow> {
        self.levels(side)
            .iter()
            .scan(Decimal::ZERO, |total, level| {
                *total = total.saturating_add(level.quantity);
                Some(DepthRow {
                    price: level.price,
                    quantity: level.quantity,
                    total: *total,
                })
            })
            .collect()
    }

    /// Largest running total over both sides, used to scale depth bars.
    /// Saturates at `Decimal::MAX`.
    pub fn max_cumulative_volume(&self) -> Decimal {
        side_total(&self.bids).max(side_total(&self.asks))
    }
}

fn side_total(levels: &[PriceLevel]) -> Decimal {
    levels
        .iter()
        .fold(Decimal::ZERO, |total, l| total.saturating_add(l.quantity))
}

fn mid(bids: &[PriceLevel], asks: &[PriceLevel]) -> Option<Decimal> {
    let best_bid = bids.first()?.price;
    let best_ask = asks.first()?.price;
    best_bid.checked_add(best_ask)?.checked_div(Decimal::TWO)
}
