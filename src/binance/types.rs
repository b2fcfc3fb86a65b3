use crate::error::MessageParseError;
use crate::l2_book::{Order, PriceSize, Sequence};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Event tag of incremental depth messages.
pub const DEPTH_UPDATE_EVENT: &str = "depthUpdate";

/// Response of `GET /api/v3/depth`.
#[derive(Serialize, Deserialize, Debug)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    pub bids: Vec<PriceSize>,

    pub asks: Vec<PriceSize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DepthUpdate {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E", default)]
    pub event_time: u64,

    #[serde(rename = "s", default)]
    pub symbol: String,

    #[serde(rename = "U")]
    pub first_update_id: u64,

    #[serde(rename = "u")]
    pub last_update_id: u64,

    #[serde(rename = "b", default)]
    pub bids: Vec<PriceSize>,

    #[serde(rename = "a", default)]
    pub asks: Vec<PriceSize>,
}

/// Update id range carried by every order, used by [`super::BinanceSequencer`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthUpdateSeq {
    #[serde(rename = "U")]
    pub first_update_id: u64,

    #[serde(rename = "u")]
    pub last_update_id: u64,
}

impl From<DepthUpdate> for Order<DepthUpdateSeq> {
    fn from(val: DepthUpdate) -> Self {
        Order {
            id: Sequence(val.last_update_id),
            bids: val.bids,
            asks: val.asks,
            is_snapshot: false,
            ts_ms: val.event_time,
            o: DepthUpdateSeq {
                first_update_id: val.first_update_id,
                last_update_id: val.last_update_id,
            },
        }
    }
}

impl From<DepthSnapshot> for Order<DepthUpdateSeq> {
    fn from(val: DepthSnapshot) -> Self {
        Order {
            id: Sequence(val.last_update_id),
            bids: val.bids,
            asks: val.asks,
            is_snapshot: true,
            ts_ms: 0,
            o: DepthUpdateSeq {
                first_update_id: val.last_update_id,
                last_update_id: val.last_update_id,
            },
        }
    }
}

#[derive(Deserialize)]
struct EventTag<'a> {
    #[serde(rename = "e", borrow, default)]
    event_type: Option<Cow<'a, str>>,
}

/// Decodes a raw stream frame. Frames with another event type (or none, like
/// subscription acks) are `Ok(None)`.
pub fn decode(payload: &[u8]) -> Result<Option<Order<DepthUpdateSeq>>, MessageParseError> {
    let tag: EventTag = serde_json::from_slice(payload)?;
    if tag.event_type.as_deref() != Some(DEPTH_UPDATE_EVENT) {
        return Ok(None);
    }

    let update: DepthUpdate = serde_json::from_slice(payload)?;
    Ok(Some(update.into()))
}
