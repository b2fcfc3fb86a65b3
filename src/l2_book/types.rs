use crate::error::ValidationError;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(pub Decimal);

impl From<Decimal> for Price {
    fn from(val: Decimal) -> Self {
        Self(val)
    }
}

impl From<Price> for Decimal {
    fn from(val: Price) -> Self {
        val.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Size(pub Decimal);

impl Size {
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Decimal> for Size {
    fn from(val: Decimal) -> Self {
        Self(val)
    }
}

impl From<Size> for Decimal {
    fn from(val: Size) -> Self {
        val.0
    }
}

/// Wire form of a level change, `[price, quantity]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceSize(
    #[serde(with = "decimal_str")] pub Decimal, // price
    #[serde(with = "decimal_str")] pub Decimal, // size
);

impl PriceSize {
    pub fn price(&self) -> Price {
        Price(self.0)
    }

    pub fn size(&self) -> Size {
        Size(self.1)
    }
}

/// A resting quantity at one price, as handed out to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sequence(pub u64);
impl Sequence {
    pub fn val(&self) -> u64 {
        self.0
    }
}

/// A snapshot or an incremental update, with venue specific sequencing metadata in `o`.
#[derive(Debug, Clone)]
pub struct Order<O> {
    pub id: Sequence,
    pub bids: Vec<PriceSize>,
    pub asks: Vec<PriceSize>,
    pub is_snapshot: bool,
    pub ts_ms: u64,
    pub o: O,
}

static SYMBOL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]+USDT$").expect("symbol pattern is a valid regex"));

/// Venue symbol, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if SYMBOL_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidSymbol(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stream names are lowercase on the venue side.
    pub fn stream_name(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializer and Deserializer for decimals sent as strings (or bare numbers).
/// Negative values are rejected, a book never holds them.
pub mod decimal_str {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::str::FromStr;

    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumOrStr<'a> {
            Str(&'a str),
            Owned(String),
            Float(f64),
        }

        let value = match NumOrStr::deserialize(deserializer)? {
            NumOrStr::Str(s) => Decimal::from_str(s).map_err(de::Error::custom)?,
            NumOrStr::Owned(s) => Decimal::from_str(&s).map_err(de::Error::custom)?,
            NumOrStr::Float(f) => Decimal::try_from(f).map_err(de::Error::custom)?,
        };

        if value.is_sign_negative() && !value.is_zero() {
            return Err(de::Error::custom("negative decimal"));
        }
        Ok(value)
    }
}
