//! Engine integration scenarios against a scripted gateway.
//!
//! Each test builds a real engine (SQLite store in a temp file, live event
//! bus) around a `MockGateway` whose tickers, klines, balances and fills
//! the test mutates between iterations. The first iteration runs off the
//! timer armed by `start()`; later iterations are driven directly through
//! `execute_loop` for determinism.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use spotbot::config::AppConfig;
use spotbot::database::Store;
use spotbot::engine::TradingEngine;
use spotbot::events::{EngineEvent, EventBus};
use spotbot::gateway::{
    AccountBalance, ExchangeGateway, FilledOrder, GatewayError, Kline, Ticker,
};
use spotbot::indicators;
use spotbot::settings::Settings;
use spotbot::types::{ActiveTrade, BotLog, BotStatus, LogKind, TradeSide};

// =============================================================================
// MOCK GATEWAY
// =============================================================================

#[derive(Debug, Clone)]
struct RecordedOrder {
    symbol: String,
    side: TradeSide,
    amount: f64,
}

struct MockGateway {
    permissions_ok: bool,
    fail_orders: AtomicBool,
    tickers: Mutex<Vec<Ticker>>,
    klines: Mutex<HashMap<String, Vec<Kline>>>,
    balance: Mutex<AccountBalance>,
    orders: Mutex<Vec<RecordedOrder>>,
    next_order_id: AtomicU64,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            permissions_ok: true,
            fail_orders: AtomicBool::new(false),
            tickers: Mutex::new(Vec::new()),
            klines: Mutex::new(HashMap::new()),
            balance: Mutex::new(AccountBalance::default()),
            orders: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
        })
    }

    fn with_permissions(permissions_ok: bool) -> Arc<Self> {
        let mut mock = Self::new();
        Arc::get_mut(&mut mock).unwrap().permissions_ok = permissions_ok;
        mock
    }

    fn set_ticker(&self, symbol: &str, last: f64, quote_volume: f64) {
        let mut tickers = self.tickers.lock().unwrap();
        tickers.retain(|t| t.symbol != symbol);
        tickers.push(Ticker {
            symbol: symbol.to_string(),
            last,
            base_volume: quote_volume / last,
            quote_volume,
            percentage: 0.0,
        });
    }

    fn set_klines(&self, symbol: &str, closes: &[f64]) {
        let klines: Vec<Kline> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Kline {
                timestamp: i as i64,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
            })
            .collect();
        self.klines.lock().unwrap().insert(symbol.to_string(), klines);
    }

    fn clear_klines(&self, symbol: &str) {
        self.klines.lock().unwrap().remove(symbol);
    }

    fn set_balance(&self, asset: &str, free: f64, locked: f64) {
        let mut balance = self.balance.lock().unwrap();
        if free + locked <= 0.0 {
            balance.free.remove(asset);
            balance.used.remove(asset);
            balance.total.remove(asset);
            return;
        }
        balance.free.insert(asset.to_string(), free);
        balance.used.insert(asset.to_string(), locked);
        balance.total.insert(asset.to_string(), free + locked);
    }

    fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().unwrap().clone()
    }

    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.tickers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.last)
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn validate_api_key_permissions(&self) -> Result<bool, GatewayError> {
        Ok(self.permissions_ok)
    }

    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, GatewayError> {
        Ok(self.tickers.lock().unwrap().clone())
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> Result<Vec<Kline>, GatewayError> {
        Ok(self
            .klines
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
        Ok(self.balance.lock().unwrap().clone())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        amount: f64,
    ) -> Result<FilledOrder, GatewayError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                message: "orders disabled by test".to_string(),
            });
        }
        let price = self.last_price(symbol).ok_or(GatewayError::Rejected {
            message: format!("no market for {symbol}"),
        })?;
        self.orders.lock().unwrap().push(RecordedOrder {
            symbol: symbol.to_string(),
            side,
            amount,
        });
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(FilledOrder {
            id: id.to_string(),
            price: Some(price),
            average: Some(price),
            filled: Some(amount),
            amount: Some(amount),
            cost: Some(amount * price),
            fee_amount: None,
            fee_currency: None,
        })
    }
}

// =============================================================================
// HARNESS
// =============================================================================

fn temp_db_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spotbot-it-{name}-{}.db", uuid::Uuid::new_v4()))
}

fn test_config() -> AppConfig {
    let vars = HashMap::from([("API_KEY", "test-key"), ("SECRET_KEY", "test-secret")]);
    AppConfig::load_from(|key| vars.get(key).map(|v| v.to_string()))
}

/// Interval long enough that only the immediate first tick fires; later
/// iterations are driven manually.
fn test_settings() -> Settings {
    Settings {
        max_coin_price: 1.0,
        trade_amount_quote: 10.0,
        scan_interval_ms: 3_600_000,
        target_profit_pct: 10.0,
        stop_loss_pct: 5.0,
        max_open_trades: 1,
        rsi_period: 2,
        rsi_buy_threshold: 75.0,
        sma_short_period: 2,
        sma_long_period: 3,
        use_trailing_stop: false,
        trailing_stop_arm_pct: 1.0,
        trailing_stop_offset_pct: 0.5,
    }
}

/// Mixed-but-rising closes: RSI(2) stays under the 75 threshold while
/// SMA(2) sits above SMA(3). Asserted below so the scenario can't rot.
const BULLISH_CLOSES: [f64; 8] = [0.48, 0.485, 0.48, 0.486, 0.49, 0.495, 0.50, 0.497];
const BEARISH_CLOSES: [f64; 8] = [0.60, 0.59, 0.58, 0.57, 0.56, 0.55, 0.54, 0.53];

struct Harness {
    engine: Arc<TradingEngine>,
    mock: Arc<MockGateway>,
    events: mpsc::Receiver<EngineEvent>,
    db_path: PathBuf,
}

impl Harness {
    async fn build(
        name: &str,
        mock: Arc<MockGateway>,
        settings: Settings,
        seed: impl FnOnce(&Store),
    ) -> Self {
        let db_path = temp_db_path(name);
        {
            let store = Store::open(&db_path).unwrap();
            store.save_settings(&settings).unwrap();
            seed(&store);
        }

        let bus = Arc::new(EventBus::new());
        let gateway: Arc<dyn ExchangeGateway> = mock.clone();
        let engine = TradingEngine::new(test_config(), gateway, bus.clone(), db_path.clone());
        let (_, events) = bus.subscribe().await;

        Self {
            engine,
            mock,
            events,
            db_path,
        }
    }

    /// Start the engine and wait for the immediate first iteration to
    /// finish (the market event marks it in flight; the snapshot call
    /// cannot return until the iteration releases the engine mutex).
    async fn start_and_settle(&mut self) {
        self.engine.clone().start().await;
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = self.events.recv().await {
                if matches!(event, EngineEvent::Market(_)) {
                    break;
                }
            }
        })
        .await;
        assert!(waited.is_ok(), "first scan did not run");
        let _ = self.engine.snapshot().await;
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn stored_trades(&self) -> HashMap<String, ActiveTrade> {
        Store::open(&self.db_path).unwrap().load_active_trades().unwrap()
    }
}

fn logs_of(events: &[EngineEvent]) -> Vec<BotLog> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Log(log) => Some(log.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn bullish_closes_actually_signal_entry() {
    let rsi = indicators::rsi(&BULLISH_CLOSES, 2).last().copied().unwrap();
    let sma_short = indicators::sma(&BULLISH_CLOSES, 2).last().copied().unwrap();
    let sma_long = indicators::sma(&BULLISH_CLOSES, 3).last().copied().unwrap();
    assert!(rsi < 75.0, "rsi {rsi} not under threshold");
    assert!(sma_short > sma_long);

    let bear_short = indicators::sma(&BEARISH_CLOSES, 2).last().copied().unwrap();
    let bear_long = indicators::sma(&BEARISH_CLOSES, 3).last().copied().unwrap();
    assert!(bear_short < bear_long);
}

#[tokio::test]
async fn take_profit_full_cycle() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 1000.0, 0.0);
    mock.set_ticker("LTC/USDT", 0.50, 5000.0);
    mock.set_klines("LTC/USDT", &BULLISH_CLOSES);

    let mut harness = Harness::build("take-profit", mock, test_settings(), |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    // First iteration buys 10 USDT worth at 0.50.
    let orders = harness.mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, TradeSide::Buy);
    assert_eq!(orders[0].symbol, "LTC/USDT");
    assert!((orders[0].amount - 20.0).abs() < 1e-9);

    let trades = harness.stored_trades();
    assert_eq!(trades.len(), 1);
    assert!((trades["LTC/USDT"].purchase_price - 0.50).abs() < 1e-9);
    assert!((trades["LTC/USDT"].amount - 20.0).abs() < 1e-9);

    // Price runs past the 10% target; the signal itself turns off.
    harness.mock.set_balance("LTC", 20.0, 0.0);
    harness.mock.set_ticker("LTC/USDT", 0.60, 5000.0);
    harness.mock.set_klines("LTC/USDT", &BEARISH_CLOSES);
    harness.drain_events();
    harness.engine.execute_loop().await;

    let orders = harness.mock.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].side, TradeSide::Sell);
    assert!((orders[1].amount - 20.0).abs() < 1e-9);

    let snapshot = harness.engine.snapshot().await;
    let sell = &snapshot.trade_ledger[0];
    assert_eq!(sell.side, TradeSide::Sell);
    assert!((sell.profit_amount.unwrap() - 2.0).abs() < 1e-6);
    assert!((sell.profit_percent.unwrap() - 20.0).abs() < 1e-6);
    assert!((sell.purchase_price_for_sell.unwrap() - 0.50).abs() < 1e-9);
    assert!(harness.stored_trades().is_empty());

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Sell && log.message.contains("Take Profit")));
}

#[tokio::test]
async fn stop_loss_path() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 100.0, 0.0);
    mock.set_balance("LTC", 40.0, 0.0);
    mock.set_ticker("LTC/USDT", 0.47, 5000.0);

    let mut harness = Harness::build("stop-loss", mock, test_settings(), |store| {
        store
            .save_active_trade(
                "LTC/USDT",
                &ActiveTrade {
                    purchase_price: 0.50,
                    amount: 40.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    let orders = harness.mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, TradeSide::Sell);

    let snapshot = harness.engine.snapshot().await;
    let sell = &snapshot.trade_ledger[0];
    // cost 40 * 0.47 = 18.8 against 20 invested
    assert!((sell.profit_amount.unwrap() + 1.2).abs() < 1e-6);
    assert!((sell.profit_percent.unwrap() + 6.0).abs() < 1e-6);
    assert!(harness.stored_trades().is_empty());

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Sell && log.message.contains("Stop Loss")));
}

#[tokio::test]
async fn trailing_stop_arms_on_high_water_and_fires() {
    let mut settings = test_settings();
    settings.max_coin_price = 0.01; // keep the buy path quiet at these prices
    settings.use_trailing_stop = true;
    settings.trailing_stop_arm_pct = 1.0;
    settings.trailing_stop_offset_pct = 0.5;

    let mock = MockGateway::new();
    mock.set_balance("FOO", 1.0, 0.0);
    mock.set_ticker("FOO/USDT", 100.0, 5000.0);

    let mut harness = Harness::build("trailing", mock, settings, |store| {
        store
            .save_active_trade(
                "FOO/USDT",
                &ActiveTrade {
                    purchase_price: 100.0,
                    amount: 1.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());

    // Tick 1 at entry price: nothing armed, nothing sold.
    harness.start_and_settle().await;
    assert!(harness.mock.orders().is_empty());

    // 100.5: new high recorded, still below the 1% arm level.
    harness.mock.set_ticker("FOO/USDT", 100.5, 5000.0);
    harness.engine.execute_loop().await;
    assert!(harness.mock.orders().is_empty());
    assert_eq!(
        harness.stored_trades()["FOO/USDT"].highest_price_since_buy,
        Some(100.5)
    );

    // 101.2: armed; the stop rides at 101.2 * 0.995 = 100.694.
    harness.mock.set_ticker("FOO/USDT", 101.2, 5000.0);
    harness.engine.execute_loop().await;
    assert!(harness.mock.orders().is_empty());
    assert_eq!(
        harness.stored_trades()["FOO/USDT"].highest_price_since_buy,
        Some(101.2)
    );

    // 100.6 <= 100.694: trailing stop fires as a Stop Loss exit.
    harness.mock.set_ticker("FOO/USDT", 100.6, 5000.0);
    harness.drain_events();
    harness.engine.execute_loop().await;

    let orders = harness.mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, TradeSide::Sell);
    assert!(harness.stored_trades().is_empty());

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Sell && log.message.contains("Stop Loss")));
}

#[tokio::test]
async fn take_profit_wins_when_both_sides_trigger() {
    let mut settings = test_settings();
    settings.max_coin_price = 0.01;
    settings.target_profit_pct = 1.0;
    settings.use_trailing_stop = true;

    let mock = MockGateway::new();
    mock.set_balance("FOO", 1.0, 0.0);
    // Persisted high-water of 1000 puts the trailing stop at 995, far above
    // the current price, while 500 is also far past the 1% target.
    mock.set_ticker("FOO/USDT", 500.0, 5000.0);

    let mut harness = Harness::build("sell-priority", mock, settings, |store| {
        store
            .save_active_trade(
                "FOO/USDT",
                &ActiveTrade {
                    purchase_price: 100.0,
                    amount: 1.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: Some(1000.0),
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    assert_eq!(harness.mock.orders().len(), 1);
    let logs = logs_of(&harness.drain_events());
    let sell_log = logs
        .iter()
        .find(|log| log.kind == LogKind::Sell)
        .expect("sell log missing");
    assert!(sell_log.message.contains("Take Profit"));
}

#[tokio::test]
async fn reconciliation_drops_position_without_balance() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 100.0, 0.0);
    // FOO is tracked but the exchange reports no holdings at all.
    mock.set_ticker("FOO/USDT", 1.0, 5000.0);

    let mut harness = Harness::build("reconcile", mock, test_settings(), |store| {
        store
            .save_active_trade(
                "FOO/USDT",
                &ActiveTrade {
                    purchase_price: 2.0,
                    amount: 10.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    // Dropped without any order and without a fabricated ledger row.
    assert!(harness.mock.orders().is_empty());
    assert!(harness.stored_trades().is_empty());
    let snapshot = harness.engine.snapshot().await;
    assert!(snapshot.trade_ledger.is_empty());

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Warning && log.message.contains("no balance")));
}

#[tokio::test]
async fn withdrawal_capable_key_refuses_to_run() {
    let mock = MockGateway::with_permissions(false);
    let mut harness = Harness::build("bad-key", mock, test_settings(), |_| {}).await;

    assert!(harness.engine.initialize().await.is_err());
    assert_eq!(harness.engine.status().await, BotStatus::Error);

    // Start must not bring the loop up from ERROR.
    harness.engine.clone().start().await;
    assert_eq!(harness.engine.status().await, BotStatus::Error);
    assert!(harness.mock.orders().is_empty());

    let logs = logs_of(&harness.drain_events());
    assert!(logs.iter().any(|log| log.kind == LogKind::ApiKey));
    assert!(logs.iter().any(|log| log.kind == LogKind::Error));
}

#[tokio::test]
async fn missing_credentials_fail_initialization() {
    let mock = MockGateway::new();
    let db_path = temp_db_path("no-creds");
    let bus = Arc::new(EventBus::new());
    let gateway: Arc<dyn ExchangeGateway> = mock;
    let config = AppConfig::load_from(|_| None);
    let engine = TradingEngine::new(config, gateway, bus, db_path);

    assert!(engine.initialize().await.is_err());
    assert_eq!(engine.status().await, BotStatus::Error);
}

#[tokio::test]
async fn admission_control_ignores_candidate_at_cap() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 1000.0, 0.0);
    mock.set_balance("BAR", 50.0, 0.0);
    // Held position idles between its stops; LTC is a perfect candidate.
    mock.set_ticker("BAR/USDT", 1.0, 9000.0);
    mock.set_ticker("LTC/USDT", 0.50, 5000.0);
    mock.set_klines("LTC/USDT", &BULLISH_CLOSES);

    let mut harness = Harness::build("admission", mock, test_settings(), |store| {
        store
            .save_active_trade(
                "BAR/USDT",
                &ActiveTrade {
                    purchase_price: 1.0,
                    amount: 50.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    // max_open_trades = 1 and BAR is still open: no buy happens.
    assert!(harness.mock.orders().is_empty());
    assert_eq!(harness.stored_trades().len(), 1);
}

#[tokio::test]
async fn at_most_one_buy_per_iteration() {
    let mut settings = test_settings();
    settings.max_open_trades = 5;

    let mock = MockGateway::new();
    mock.set_balance("USDT", 1000.0, 0.0);
    mock.set_ticker("AAA/USDT", 0.50, 4000.0);
    mock.set_ticker("BBB/USDT", 0.40, 9000.0);
    mock.set_klines("AAA/USDT", &BULLISH_CLOSES);
    mock.set_klines("BBB/USDT", &BULLISH_CLOSES);

    let mut harness = Harness::build("one-buy", mock, settings, |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    // Both signal, only the higher quote-volume pair is bought.
    let orders = harness.mock.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "BBB/USDT");
}

#[tokio::test]
async fn dust_position_is_not_sold() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 100.0, 0.0);
    mock.set_balance("LTC", 10.0, 0.0);
    // Take-profit level reached, but 10 * 0.60 = 6 is under the minimum
    // notional of 10.
    mock.set_ticker("LTC/USDT", 0.60, 5000.0);

    let mut harness = Harness::build("dust", mock, test_settings(), |store| {
        store
            .save_active_trade(
                "LTC/USDT",
                &ActiveTrade {
                    purchase_price: 0.50,
                    amount: 10.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    assert!(harness.mock.orders().is_empty());
    assert_eq!(harness.stored_trades().len(), 1);

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Warning && log.message.contains("below the")));
}

#[tokio::test]
async fn failed_sell_keeps_position_for_retry() {
    let mock = MockGateway::new();
    mock.set_balance("LTC", 40.0, 0.0);
    mock.set_ticker("LTC/USDT", 0.60, 5000.0);
    mock.fail_orders.store(true, Ordering::SeqCst);

    let mut harness = Harness::build("sell-retry", mock, test_settings(), |store| {
        store
            .save_active_trade(
                "LTC/USDT",
                &ActiveTrade {
                    purchase_price: 0.50,
                    amount: 40.0,
                    timestamp: chrono::Utc::now(),
                    highest_price_since_buy: None,
                },
            )
            .unwrap();
    })
    .await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    // The rejected order leaves the position and the ledger untouched.
    assert_eq!(harness.stored_trades().len(), 1);
    assert!(harness.engine.snapshot().await.trade_ledger.is_empty());

    // Next iteration with orders allowed completes the exit.
    harness.mock.fail_orders.store(false, Ordering::SeqCst);
    harness.engine.execute_loop().await;
    assert_eq!(harness.mock.orders().len(), 1);
    assert!(harness.stored_trades().is_empty());
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 100.0, 0.0);

    let mut harness = Harness::build("idempotent", mock, test_settings(), |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;
    assert_eq!(harness.engine.status().await, BotStatus::Running);

    harness.drain_events();
    harness.engine.clone().start().await;
    assert_eq!(harness.engine.status().await, BotStatus::Running);
    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Warning && log.message.contains("already running")));

    harness.engine.stop(false).await;
    assert_eq!(harness.engine.status().await, BotStatus::Stopped);
    harness.engine.stop(false).await;
    assert_eq!(harness.engine.status().await, BotStatus::Stopped);

    // Restartable after a stop.
    harness.engine.clone().start().await;
    assert_eq!(harness.engine.status().await, BotStatus::Running);
    harness.engine.stop(true).await;
    assert_eq!(harness.engine.status().await, BotStatus::Stopped);
}

#[tokio::test]
async fn settings_update_persists_and_rejects_invalid() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 100.0, 0.0);

    let mut harness = Harness::build("settings", mock, test_settings(), |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());

    let mut updated = test_settings();
    updated.trade_amount_quote = 25.0;
    assert!(harness
        .engine
        .clone()
        .update_settings(updated.clone())
        .await
        .is_ok());
    assert_eq!(
        Store::open(&harness.db_path).unwrap().load_settings().unwrap(),
        Some(updated.clone())
    );

    let mut invalid = updated;
    invalid.scan_interval_ms = 100;
    assert!(harness.engine.clone().update_settings(invalid).await.is_err());

    let logs = logs_of(&harness.drain_events());
    assert!(logs
        .iter()
        .any(|log| log.kind == LogKind::Error && log.message.contains("scanIntervalMs")));
}

#[tokio::test]
async fn restart_restores_positions_and_ledger() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 1000.0, 0.0);
    mock.set_ticker("LTC/USDT", 0.50, 5000.0);
    mock.set_klines("LTC/USDT", &BULLISH_CLOSES);

    let mut harness = Harness::build("restart", mock.clone(), test_settings(), |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;
    assert_eq!(harness.stored_trades().len(), 1);
    harness.engine.stop(true).await;

    // Second engine over the same store: the open position and ledger
    // survive the restart.
    mock.clear_klines("LTC/USDT");
    let bus = Arc::new(EventBus::new());
    let gateway: Arc<dyn ExchangeGateway> = mock.clone();
    let engine = TradingEngine::new(test_config(), gateway, bus, harness.db_path.clone());
    assert!(engine.initialize().await.is_ok());

    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.bot_status, BotStatus::Stopped);
    assert_eq!(snapshot.trade_ledger.len(), 1);
    assert_eq!(snapshot.trade_ledger[0].side, TradeSide::Buy);

    let trades = Store::open(&harness.db_path).unwrap().load_active_trades().unwrap();
    assert_eq!(trades.len(), 1);
    assert!(trades.contains_key("LTC/USDT"));
}

#[tokio::test]
async fn excluded_majors_never_appear_in_market_data() {
    let mock = MockGateway::new();
    mock.set_balance("USDT", 1000.0, 0.0);
    mock.set_ticker("BTC/USDT", 40000.0, 90000.0);
    mock.set_ticker("ETH/USDT", 2500.0, 80000.0);
    mock.set_ticker("BNB/USDT", 300.0, 70000.0);
    mock.set_ticker("LTC/USDT", 0.50, 5000.0);

    let mut harness = Harness::build("excluded", mock, test_settings(), |_| {}).await;
    assert!(harness.engine.initialize().await.is_ok());
    harness.start_and_settle().await;

    let snapshot = harness.engine.snapshot().await;
    let symbols: Vec<&str> = snapshot
        .market_data
        .iter()
        .map(|c| c.symbol.as_str())
        .collect();
    assert_eq!(symbols, vec!["LTC/USDT"]);
}
