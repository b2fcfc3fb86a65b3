use super::types::{self, DepthSnapshot, DepthUpdateSeq};
use crate::engine::{DepthFeed, FeedStream, SnapshotFetcher};
use crate::error::{MessageParseError, SnapshotError, StreamError};
use crate::l2_book::{Order, Symbol};
use crate::ws;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Depth limits accepted by `GET /api/v3/depth`.
const SNAPSHOT_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinanceEnvironment {
    #[default]
    Production,
    Testnet,
}

impl BinanceEnvironment {
    pub fn rest_url(&self) -> &'static str {
        match self {
            Self::Production => "https://api.binance.com",
            Self::Testnet => "https://testnet.binance.vision",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://stream.binance.com:9443",
            Self::Testnet => "wss://testnet.binance.vision",
        }
    }

    /// Reads `BINANCE_ENVIRONMENT`, production when unset or invalid.
    pub fn from_env() -> Self {
        std::env::var("BINANCE_ENVIRONMENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for BinanceEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for BinanceEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" | "mainnet" => Ok(Self::Production),
            "testnet" | "test" => Ok(Self::Testnet),
            _ => Err(format!("invalid environment '{s}', expected 'production' or 'testnet'")),
        }
    }
}

/// Binance spot market: REST depth snapshots and the `@depth` diff stream.
#[derive(Debug, Clone)]
pub struct Spot {
    environment: BinanceEnvironment,
    update_speed_ms: u32,
    client: reqwest::Client,
}

impl Spot {
    pub fn new(environment: BinanceEnvironment) -> Self {
        Self {
            environment,
            update_speed_ms: 100,
            client: reqwest::Client::new(),
        }
    }

    /// Stream push interval, 100 or 1000.
    pub fn with_update_speed(mut self, update_speed_ms: u32) -> Self {
        self.update_speed_ms = update_speed_ms;
        self
    }

    pub fn environment(&self) -> BinanceEnvironment {
        self.environment
    }

    pub fn stream_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}/ws/{}@depth@{}ms",
            self.environment.ws_url(),
            symbol.stream_name(),
            self.update_speed_ms
        )
    }
}

/// Smallest accepted snapshot limit covering `depth` levels.
pub fn snapshot_limit(depth: usize) -> usize {
    SNAPSHOT_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(SNAPSHOT_LIMITS[SNAPSHOT_LIMITS.len() - 1])
}

impl SnapshotFetcher<DepthUpdateSeq> for Spot {
    async fn fetch_snapshot(
        &self,
        symbol: &Symbol,
        limit: usize,
    ) -> Result<Order<DepthUpdateSeq>, SnapshotError> {
        let url = format!("{}/api/v3/depth", self.environment.rest_url());
        let limit = snapshot_limit(limit).to_string();
        debug!(symbol = %symbol, limit = %limit, "fetching depth snapshot");

        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("limit", limit.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SnapshotError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SnapshotError::Status(resp.status().as_u16()));
        }

        let data = resp.json::<DepthSnapshot>().await.map_err(|e| match e.is_decode() {
            true => SnapshotError::Malformed(e.to_string()),
            false => SnapshotError::Network(e.to_string()),
        })?;
        Ok(data.into())
    }
}

impl DepthFeed<DepthUpdateSeq> for Spot {
    async fn connect(&self, symbol: &Symbol) -> Result<FeedStream, StreamError> {
        let url = self.stream_url(symbol);
        debug!(url = %url, "connecting depth stream");
        Ok(ws::connect(&url).await?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Option<Order<DepthUpdateSeq>>, MessageParseError> {
        types::decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let symbol = Symbol::parse("BTCUSDT").unwrap();
        let spot = Spot::new(BinanceEnvironment::Production);
        assert_eq!(
            spot.stream_url(&symbol),
            "wss://stream.binance.com:9443/ws/btcusdt@depth@100ms"
        );

        let spot = Spot::new(BinanceEnvironment::Testnet).with_update_speed(1000);
        assert_eq!(
            spot.stream_url(&symbol),
            "wss://testnet.binance.vision/ws/btcusdt@depth@1000ms"
        );
        assert_eq!(spot.environment().rest_url(), "https://testnet.binance.vision");
    }

    #[test]
    fn test_parse_environment() {
        assert_eq!("PROD".parse::<BinanceEnvironment>().unwrap(), BinanceEnvironment::Production);
        assert_eq!("testnet".parse::<BinanceEnvironment>().unwrap(), BinanceEnvironment::Testnet);
        assert!("staging".parse::<BinanceEnvironment>().is_err());
        assert_eq!(BinanceEnvironment::Testnet.to_string(), "testnet");
    }

    #[test]
    fn test_snapshot_limit() {
        assert_eq!(snapshot_limit(1), 5);
        assert_eq!(snapshot_limit(20), 20);
        assert_eq!(snapshot_limit(25), 50);
        assert_eq!(snapshot_limit(10_000), 5000);
    }
}
