/// Exchange gateway port
///
/// Uniform façade over the external venue. The engine only ever talks to
/// this trait; the venue-specific REST client lives behind it. Market
/// orders are the only order type the engine places.
pub mod binance;
mod rate_limit;

pub use binance::BinanceGateway;
pub use rate_limit::RateLimiter;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::TradeSide;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Transport-level failure (connect, timeout, DNS).
    Network { message: String },
    /// Non-success HTTP status from the venue (5xx and friends).
    Http { status: u16, body: String },
    /// The venue understood and refused the request (bad order, bad params).
    Rejected { message: String },
    /// Response arrived but could not be interpreted.
    InvalidResponse { message: String },
    /// Operation needs credentials and none are configured.
    MissingCredentials,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Network { message } => write!(f, "network error: {message}"),
            GatewayError::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            GatewayError::Rejected { message } => write!(f, "rejected: {message}"),
            GatewayError::InvalidResponse { message } => {
                write!(f, "invalid response: {message}")
            }
            GatewayError::MissingCredentials => write!(f, "API credentials not configured"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// PORT TYPES
// =============================================================================

/// 24h ticker row. Only pairs with `last > 0` are surfaced.
#[derive(Debug, Clone)]
pub struct Ticker {
    /// Canonical `BASE/QUOTE` symbol.
    pub symbol: String,
    pub last: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    /// 24h price change, percent.
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Kline {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Account balances as currency -> amount maps.
#[derive(Debug, Clone, Default)]
pub struct AccountBalance {
    pub free: HashMap<String, f64>,
    pub used: HashMap<String, f64>,
    pub total: HashMap<String, f64>,
}

/// Execution report for a filled market order. Fields are optional because
/// venues report them inconsistently; the engine derives effective values
/// with its own fallback chain.
#[derive(Debug, Clone)]
pub struct FilledOrder {
    pub id: String,
    pub price: Option<f64>,
    pub average: Option<f64>,
    pub filled: Option<f64>,
    pub amount: Option<f64>,
    pub cost: Option<f64>,
    pub fee_amount: Option<f64>,
    pub fee_currency: Option<String>,
}

// =============================================================================
// PORT
// =============================================================================

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Load markets and prepare the venue connection (sandbox endpoints
    /// when configured).
    async fn initialize(&self) -> Result<(), GatewayError>;

    /// Security gate: must return false when the credentials are able to
    /// withdraw funds from the venue. The engine refuses to run on false.
    async fn validate_api_key_permissions(&self) -> Result<bool, GatewayError>;

    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, GatewayError>;

    /// Fetch up to `limit` klines. Per-symbol failures return an empty vec
    /// rather than an error; a scan must not abort on one bad symbol.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, GatewayError>;

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError>;

    /// Place a market order for `amount` base units. Errors abort only the
    /// current trade action.
    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        amount: f64,
    ) -> Result<FilledOrder, GatewayError>;
}
