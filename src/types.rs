use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Engine lifecycle status as exposed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Initializing,
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Market snapshot for a single pair. Recomputed on every scan, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price: f64,
    pub price_change_24h_pct: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma_short: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma_long: Option<f64>,
}

/// One row of the account view, derived from the exchange balance each loop.
/// `avg_purchase_price`/`purchase_timestamp` are joined from the active trade
/// for the same symbol when the position was opened by the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioItem {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub free: f64,
    pub locked: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_purchase_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_timestamp: Option<DateTime<Utc>>,
}

/// A bot-opened long position with live management state, keyed by symbol.
///
/// `highest_price_since_buy` is the trailing-stop high-water mark. It is
/// updated monotonically while trailing is enabled and persisted on every
/// update so a restart does not reset an armed stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrade {
    pub purchase_price: f64,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_price_since_buy: Option<f64>,
}

/// Immutable ledger row for an executed order. Append-only, ids unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTrade {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub pair: String,
    pub price: f64,
    pub amount: f64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_price_for_sell: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
    Buy,
    Sell,
    ApiKey,
    StrategyInfo,
    Debug,
}

/// Broadcast-only operational log line. The UI keeps its own capped ring;
/// the engine never stores these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_percent: Option<f64>,
}

impl BotLog {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            pair: None,
            price: None,
            amount: None,
            profit_amount: None,
            profit_percent: None,
        }
    }

    /// Log line carrying the transactional fields of an executed trade.
    pub fn for_trade(kind: LogKind, message: impl Into<String>, trade: &CompletedTrade) -> Self {
        let mut log = Self::new(kind, message);
        log.pair = Some(trade.pair.clone());
        log.price = Some(trade.price);
        log.amount = Some(trade.amount);
        log.profit_amount = trade.profit_amount;
        log.profit_percent = trade.profit_percent;
        log
    }
}

/// Composite state pushed to a subscriber on connect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub bot_status: BotStatus,
    pub settings: Settings,
    pub logs: Vec<BotLog>,
    pub portfolio: Vec<PortfolioItem>,
    pub usdt_balance: f64,
    pub trade_ledger: Vec<CompletedTrade>,
    pub market_data: Vec<Coin>,
}
