/// Trading engine
///
/// Owns all mutable domain state and is its only mutator. One tokio mutex
/// serializes the scan loop against `start`/`stop`/`update_settings` and
/// against itself; gateway awaits deliberately suspend inside the critical
/// section so every domain action is ordered. Two atomics live outside the
/// lock: `is_scanning` keeps a long iteration from stacking on the next
/// tick, `is_stopping` lets a stop request shorten an iteration between
/// sub-steps without waiting for the mutex.
mod scan;
mod strategy;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::AppConfig;
use crate::database::Store;
use crate::events::{EngineEvent, EventBus};
use crate::gateway::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::settings::Settings;
use crate::types::{
    ActiveTrade, BotLog, BotStatus, Coin, CompletedTrade, EngineSnapshot, LogKind, PortfolioItem,
};

/// Pricing currency for the whole strategy.
pub const QUOTE_ASSET: &str = "USDT";
/// Majors are never traded by this strategy.
pub const EXCLUDED_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "BNBUSDT"];
/// Top-volume pairs examined per scan.
pub const CANDIDATE_POOL_SIZE: usize = 30;
pub const OHLCV_TIMEFRAME: &str = "15m";
pub const OHLCV_WINDOW: usize = 50;
/// Exchange minimum notional; anything under this is dust.
pub const MIN_TRADE_VALUE_QUOTE: f64 = 10.0;
/// In-memory ledger cap and the slice loaded back at startup.
pub const LEDGER_CAP: usize = 500;
pub const LEDGER_LOAD_LIMIT: usize = 100;

pub(crate) struct EngineState {
    pub(crate) status: BotStatus,
    pub(crate) settings: Settings,
    pub(crate) store: Option<Store>,
    pub(crate) active_trades: HashMap<String, ActiveTrade>,
    pub(crate) market_data: Vec<Coin>,
    pub(crate) portfolio: Vec<PortfolioItem>,
    pub(crate) usdt_balance: f64,
    /// Newest first, capped at `LEDGER_CAP`.
    pub(crate) trade_ledger: VecDeque<CompletedTrade>,
    pub(crate) timer: Option<JoinHandle<()>>,
}

pub struct TradingEngine {
    pub(crate) config: AppConfig,
    pub(crate) gateway: Arc<dyn ExchangeGateway>,
    pub(crate) bus: Arc<EventBus>,
    db_path: PathBuf,
    pub(crate) state: Mutex<EngineState>,
    is_scanning: AtomicBool,
    pub(crate) is_stopping: AtomicBool,
}

/// Clears `is_scanning` on every exit path, including task abort.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TradingEngine {
    pub fn new(
        config: AppConfig,
        gateway: Arc<dyn ExchangeGateway>,
        bus: Arc<EventBus>,
        db_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            bus,
            db_path,
            state: Mutex::new(EngineState {
                status: BotStatus::Initializing,
                settings: Settings::default(),
                store: None,
                active_trades: HashMap::new(),
                market_data: Vec::new(),
                portfolio: Vec::new(),
                usdt_balance: 0.0,
                trade_ledger: VecDeque::new(),
                timer: None,
            }),
            is_scanning: AtomicBool::new(false),
            is_stopping: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// One-shot startup: gateway init, credential gate, persisted state
    /// restore, first account refresh. Ends in STOPPED, or ERROR on any
    /// failure.
    pub async fn initialize(&self) -> Result<(), String> {
        let result = self.try_initialize().await;
        if let Err(reason) = &result {
            let mut state = self.state.lock().await;
            self.set_status(&mut state, BotStatus::Error).await;
            self.publish_log(BotLog::new(
                LogKind::Error,
                format!("initialization failed: {reason}"),
            ))
            .await;
        }
        result
    }

    async fn try_initialize(&self) -> Result<(), String> {
        if self.config.api_key.is_none() {
            return Err("exchange API credentials are not configured".to_string());
        }

        self.gateway
            .initialize()
            .await
            .map_err(|e| format!("gateway init: {e}"))?;

        let permitted = self
            .gateway
            .validate_api_key_permissions()
            .await
            .map_err(|e| format!("permission check: {e}"))?;
        if !permitted {
            self.publish_log(BotLog::new(
                LogKind::ApiKey,
                "API key grants withdrawal permission, refusing to trade with it",
            ))
            .await;
            return Err("API key must not have withdrawal permission".to_string());
        }

        let store = Store::open(&self.db_path)?;

        let mut state = self.state.lock().await;

        match store.load_settings()? {
            Some(stored) => match stored.validate() {
                Ok(()) => state.settings = stored,
                Err(reason) => {
                    logger::warning(
                        LogTag::Engine,
                        &format!("stored settings invalid ({reason}), using defaults"),
                    );
                }
            },
            None => {
                store.save_settings(&state.settings)?;
            }
        }

        state.active_trades = store.load_active_trades()?;
        state.trade_ledger = store.load_ledger(LEDGER_LOAD_LIMIT)?.into();
        state.store = Some(store);

        if !state.active_trades.is_empty() {
            self.publish_log(BotLog::new(
                LogKind::Info,
                format!("restored {} open position(s)", state.active_trades.len()),
            ))
            .await;
        }

        self.refresh_account(&mut state)
            .await
            .map_err(|e| format!("account refresh: {e}"))?;

        self.set_status(&mut state, BotStatus::Stopped).await;
        self.publish_log(BotLog::new(LogKind::Success, "engine initialized"))
            .await;
        Ok(())
    }

    /// Arm the scan timer. Idempotent: a second start logs a warning.
    pub async fn start(self: Arc<Self>) {
        let mut state = self.state.lock().await;
        match state.status {
            BotStatus::Running => {
                self.publish_log(BotLog::new(LogKind::Warning, "bot is already running"))
                    .await;
                return;
            }
            BotStatus::Stopped => {}
            BotStatus::Initializing | BotStatus::Error => {
                self.publish_log(BotLog::new(
                    LogKind::Error,
                    format!("cannot start while {:?}", state.status),
                ))
                .await;
                return;
            }
        }

        self.is_stopping.store(false, Ordering::SeqCst);
        self.set_status(&mut state, BotStatus::Running).await;
        let interval = state.settings.scan_interval_ms;
        state.timer = Some(self.clone().spawn_timer(interval));
        self.publish_log(BotLog::new(
            LogKind::Success,
            format!("bot started, scanning every {}s", interval / 1000),
        ))
        .await;
        // The timer's first tick fires as soon as this lock is released,
        // giving the immediate initial scan.
    }

    /// Stop the loop. Waits for an in-flight iteration (an order placement
    /// is never aborted mid-await), then cancels the timer. A stop from
    /// ERROR also lands on STOPPED with the timer dead. Double-stop is a
    /// no-op.
    pub async fn stop(&self, hard: bool) {
        self.is_stopping.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        match state.status {
            BotStatus::Running | BotStatus::Error => {
                self.set_status(&mut state, BotStatus::Stopped).await;
                let message = if hard {
                    "kill switch engaged, bot stopped"
                } else {
                    "bot stopped"
                };
                let kind = if hard { LogKind::Warning } else { LogKind::Info };
                self.publish_log(BotLog::new(kind, message)).await;
            }
            _ => {}
        }
    }

    /// Swap in a validated settings snapshot; persists it and, while
    /// running, re-arms the timer with the new interval.
    pub async fn update_settings(self: Arc<Self>, new_settings: Settings) -> Result<(), String> {
        if let Err(reason) = new_settings.validate() {
            self.publish_log(BotLog::new(
                LogKind::Error,
                format!("rejected settings update: {reason}"),
            ))
            .await;
            return Err(reason);
        }

        let mut state = self.state.lock().await;
        if let Some(store) = &state.store {
            if let Err(e) = store.save_settings(&new_settings) {
                logger::warning(LogTag::Database, &format!("settings not persisted: {e}"));
            }
        }
        state.settings = new_settings;

        if state.status == BotStatus::Running {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let interval = state.settings.scan_interval_ms;
            state.timer = Some(self.clone().spawn_timer(interval));
        }

        self.publish_log(BotLog::new(LogKind::Success, "settings updated"))
            .await;
        Ok(())
    }

    fn spawn_timer(self: Arc<Self>, interval_ms: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.execute_loop().await;
            }
        })
    }

    // =========================================================================
    // SCAN LOOP
    // =========================================================================

    /// One scheduled iteration: account refresh, market scan, strategy.
    /// Re-entrant calls bail on the `is_scanning` fast path without touching
    /// the mutex; errors never escape.
    pub async fn execute_loop(&self) {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = ScanGuard(&self.is_scanning);

        if self.is_stopping.load(Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock().await;
        if self.is_stopping.load(Ordering::SeqCst) || state.status != BotStatus::Running {
            return;
        }

        if let Err(reason) = self.refresh_account(&mut state).await {
            self.publish_log(BotLog::new(
                LogKind::Error,
                format!("account refresh failed: {reason}"),
            ))
            .await;
            return;
        }
        if self.is_stopping.load(Ordering::SeqCst) {
            return;
        }

        if let Err(reason) = self.scan_market(&mut state).await {
            self.publish_log(BotLog::new(
                LogKind::Error,
                format!("market scan failed: {reason}"),
            ))
            .await;
            return;
        }
        if self.is_stopping.load(Ordering::SeqCst) {
            return;
        }

        self.execute_strategy(&mut state).await;
    }

    // =========================================================================
    // SNAPSHOT / HELPERS
    // =========================================================================

    pub async fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock().await;
        EngineSnapshot {
            bot_status: state.status,
            settings: state.settings.clone(),
            logs: Vec::new(),
            portfolio: state.portfolio.clone(),
            usdt_balance: state.usdt_balance,
            trade_ledger: state.trade_ledger.iter().cloned().collect(),
            market_data: state.market_data.clone(),
        }
    }

    pub async fn status(&self) -> BotStatus {
        self.state.lock().await.status
    }

    pub(crate) async fn set_status(&self, state: &mut EngineState, status: BotStatus) {
        if state.status == status {
            return;
        }
        state.status = status;
        self.bus.publish(EngineEvent::Status(status)).await;
    }

    /// Mirror a domain log line to the operator log and broadcast it.
    pub(crate) async fn publish_log(&self, log: BotLog) {
        match log.kind {
            LogKind::Error => logger::error(LogTag::Engine, &log.message),
            LogKind::Warning => logger::warning(LogTag::Engine, &log.message),
            LogKind::Debug => logger::debug(LogTag::Engine, &log.message),
            _ => logger::info(LogTag::Engine, &log.message),
        }
        self.bus.publish(EngineEvent::Log(log)).await;
    }

    /// Append a ledger row (newest first, capped), persist it, broadcast
    /// the refreshed ledger.
    pub(crate) async fn append_ledger(&self, state: &mut EngineState, trade: CompletedTrade) {
        if let Some(store) = &state.store {
            if let Err(e) = store.save_ledger_item(&trade) {
                logger::warning(LogTag::Database, &format!("ledger row not persisted: {e}"));
            }
        }
        state.trade_ledger.push_front(trade);
        state.trade_ledger.truncate(LEDGER_CAP);
        self.bus
            .publish(EngineEvent::Ledger(state.trade_ledger.iter().cloned().collect()))
            .await;
    }

    pub(crate) fn persist_active_trade(
        &self,
        state: &EngineState,
        symbol: &str,
        trade: &ActiveTrade,
    ) {
        if let Some(store) = &state.store {
            if let Err(e) = store.save_active_trade(symbol, trade) {
                logger::warning(
                    LogTag::Database,
                    &format!("active trade {symbol} not persisted: {e}"),
                );
            }
        }
    }

    pub(crate) fn persist_trade_deletion(&self, state: &EngineState, symbol: &str) {
        if let Some(store) = &state.store {
            if let Err(e) = store.delete_active_trade(symbol) {
                logger::warning(
                    LogTag::Database,
                    &format!("active trade {symbol} deletion not persisted: {e}"),
                );
            }
        }
    }

    pub(crate) fn is_excluded(symbol: &str) -> bool {
        let normalized = symbol.replace('/', "");
        EXCLUDED_SYMBOLS.contains(&normalized.as_str())
    }
}
