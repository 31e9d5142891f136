use serde::{Deserialize, Serialize};

/// Strategy settings. One immutable snapshot lives in the engine and is
/// replaced atomically by `update_settings`; the persisted copy is a
/// whole-object overwrite of the single `bot_settings` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Upper bound on the unit price of a buy candidate, in quote units.
    pub max_coin_price: f64,
    /// Quote-currency budget of every buy order.
    pub trade_amount_quote: f64,
    pub scan_interval_ms: u64,
    pub target_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub max_open_trades: usize,
    pub rsi_period: usize,
    pub rsi_buy_threshold: f64,
    pub sma_short_period: usize,
    pub sma_long_period: usize,
    pub use_trailing_stop: bool,
    /// Profit (percent over entry) at which the trailing stop arms.
    pub trailing_stop_arm_pct: f64,
    /// Distance (percent below the high-water mark) of the armed stop.
    pub trailing_stop_offset_pct: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_coin_price: 1.0,
            trade_amount_quote: 50.0,
            scan_interval_ms: 30_000,
            target_profit_pct: 2.5,
            stop_loss_pct: 1.5,
            max_open_trades: 3,
            rsi_period: 14,
            rsi_buy_threshold: 30.0,
            sma_short_period: 9,
            sma_long_period: 21,
            use_trailing_stop: true,
            trailing_stop_arm_pct: 1.0,
            trailing_stop_offset_pct: 0.5,
        }
    }
}

impl Settings {
    /// Validate invariants before a snapshot is accepted. Returns the first
    /// offending field by name.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_coin_price > 0.0) {
            return Err("maxCoinPrice must be greater than 0".to_string());
        }
        if !(self.trade_amount_quote > 0.0) {
            return Err("tradeAmountQuote must be greater than 0".to_string());
        }
        if self.scan_interval_ms < 2000 {
            return Err("scanIntervalMs must be at least 2000".to_string());
        }
        if !(self.target_profit_pct > 0.0) {
            return Err("targetProfitPct must be greater than 0".to_string());
        }
        if !(self.stop_loss_pct > 0.0) {
            return Err("stopLossPct must be greater than 0".to_string());
        }
        if self.max_open_trades == 0 {
            return Err("maxOpenTrades must be greater than 0".to_string());
        }
        if self.rsi_period < 2 {
            return Err("rsiPeriod must be at least 2".to_string());
        }
        if !(self.rsi_buy_threshold > 0.0) {
            return Err("rsiBuyThreshold must be greater than 0".to_string());
        }
        if self.sma_short_period < 2 {
            return Err("smaShortPeriod must be at least 2".to_string());
        }
        if self.sma_long_period < 2 {
            return Err("smaLongPeriod must be at least 2".to_string());
        }
        if self.sma_short_period >= self.sma_long_period {
            return Err("smaShortPeriod must be less than smaLongPeriod".to_string());
        }
        if !(self.trailing_stop_arm_pct > 0.0) {
            return Err("trailingStopArmPct must be greater than 0".to_string());
        }
        if !(self.trailing_stop_offset_pct > 0.0) {
            return Err("trailingStopOffsetPct must be greater than 0".to_string());
        }
        Ok(())
    }
}
