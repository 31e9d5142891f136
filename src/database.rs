/// Persistence store
///
/// Single-file SQLite database with WAL journaling and a small connection
/// pool. Three logical tables, all holding domain JSON in a `data` column:
/// - `bot_settings`   exactly one row, whole-object overwrite
/// - `active_trades`  keyed by symbol, per-row insert/replace/delete
/// - `trade_ledger`   keyed by id, append-only, read newest-first
///
/// Every operation is synchronous and atomic; an acknowledged write
/// survives a process crash. The engine is the only caller and runs under
/// its own mutex, so one pool without read/write splitting is enough.
use std::collections::HashMap;
use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::logger::{self, LogTag};
use crate::settings::Settings;
use crate::types::{ActiveTrade, CompletedTrade};

const POOL_MAX_SIZE: u32 = 4;
const POOL_MIN_IDLE: u32 = 1;
const CONNECTION_TIMEOUT_MS: u64 = 30_000;
const BUSY_TIMEOUT_MS: u64 = 30_000;

const SCHEMA_BOT_SETTINGS: &str = "CREATE TABLE IF NOT EXISTS bot_settings (
    id   INTEGER PRIMARY KEY CHECK (id = 1),
    data TEXT NOT NULL
)";

const SCHEMA_ACTIVE_TRADES: &str = "CREATE TABLE IF NOT EXISTS active_trades (
    symbol TEXT PRIMARY KEY,
    data   TEXT NOT NULL
)";

const SCHEMA_TRADE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS trade_ledger (
    id        TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    data      TEXT NOT NULL
)";

const INDEX_LEDGER_TIMESTAMP: &str = "CREATE INDEX IF NOT EXISTS idx_trade_ledger_timestamp
    ON trade_ledger (timestamp DESC)";

pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the database file and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create data directory: {e}"))?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(POOL_MAX_SIZE)
            .min_idle(Some(POOL_MIN_IDLE))
            .connection_timeout(std::time::Duration::from_millis(CONNECTION_TIMEOUT_MS))
            .build(manager)
            .map_err(|e| format!("Failed to create connection pool: {e}"))?;

        let store = Self { pool };
        store.initialize_schema()?;

        logger::info(
            LogTag::Database,
            &format!("store ready at {}", path.display()),
        );
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), String> {
        let conn = self.conn()?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| format!("Failed to set journal mode: {e}"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| format!("Failed to set synchronous mode: {e}"))?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(|e| format!("Failed to set busy timeout: {e}"))?;

        conn.execute(SCHEMA_BOT_SETTINGS, [])
            .map_err(|e| format!("Failed to create bot_settings table: {e}"))?;
        conn.execute(SCHEMA_ACTIVE_TRADES, [])
            .map_err(|e| format!("Failed to create active_trades table: {e}"))?;
        conn.execute(SCHEMA_TRADE_LEDGER, [])
            .map_err(|e| format!("Failed to create trade_ledger table: {e}"))?;
        conn.execute(INDEX_LEDGER_TIMESTAMP, [])
            .map_err(|e| format!("Failed to create ledger timestamp index: {e}"))?;

        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, String> {
        self.pool
            .get()
            .map_err(|e| format!("Failed to get database connection: {e}"))
    }

    /// Overwrite the single settings row.
    pub fn save_settings(&self, settings: &Settings) -> Result<(), String> {
        let data = serde_json::to_string(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bot_settings (id, data) VALUES (1, ?1)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![data],
        )
        .map_err(|e| format!("Failed to save settings: {e}"))?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Option<Settings>, String> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM bot_settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| format!("Failed to load settings: {e}"))?;
        match data {
            Some(data) => {
                let settings = serde_json::from_str(&data)
                    .map_err(|e| format!("Failed to parse stored settings: {e}"))?;
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    pub fn save_active_trade(&self, symbol: &str, trade: &ActiveTrade) -> Result<(), String> {
        let data = serde_json::to_string(trade)
            .map_err(|e| format!("Failed to serialize active trade: {e}"))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO active_trades (symbol, data) VALUES (?1, ?2)",
            params![symbol, data],
        )
        .map_err(|e| format!("Failed to save active trade {symbol}: {e}"))?;
        Ok(())
    }

    pub fn delete_active_trade(&self, symbol: &str) -> Result<(), String> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM active_trades WHERE symbol = ?1", params![symbol])
            .map_err(|e| format!("Failed to delete active trade {symbol}: {e}"))?;
        Ok(())
    }

    pub fn load_active_trades(&self) -> Result<HashMap<String, ActiveTrade>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol, data FROM active_trades")
            .map_err(|e| format!("Failed to prepare active trades query: {e}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| format!("Failed to query active trades: {e}"))?;

        let mut trades = HashMap::new();
        for row in rows {
            let (symbol, data) = row.map_err(|e| format!("Failed to read active trade row: {e}"))?;
            match serde_json::from_str::<ActiveTrade>(&data) {
                Ok(trade) => {
                    trades.insert(symbol, trade);
                }
                Err(e) => {
                    // A corrupt row must not take down startup.
                    logger::warning(
                        LogTag::Database,
                        &format!("skipping unparseable active trade {symbol}: {e}"),
                    );
                }
            }
        }
        Ok(trades)
    }

    /// Append one ledger row. Ids are unique; re-inserting an id is an error.
    pub fn save_ledger_item(&self, trade: &CompletedTrade) -> Result<(), String> {
        let data = serde_json::to_string(trade)
            .map_err(|e| format!("Failed to serialize ledger item: {e}"))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trade_ledger (id, timestamp, data) VALUES (?1, ?2, ?3)",
            params![trade.id, trade.timestamp.to_rfc3339(), data],
        )
        .map_err(|e| format!("Failed to append ledger item {}: {e}", trade.id))?;
        Ok(())
    }

    /// Checkpoint the WAL and release the pool. Dropping the store has the
    /// same effect; this just makes shutdown explicit.
    pub fn close(self) -> Result<(), String> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| format!("Failed to checkpoint WAL: {e}"))?;
        Ok(())
    }

    /// Read up to `limit` ledger rows, newest first.
    pub fn load_ledger(&self, limit: usize) -> Result<Vec<CompletedTrade>, String> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT data FROM trade_ledger ORDER BY timestamp DESC LIMIT ?1")
            .map_err(|e| format!("Failed to prepare ledger query: {e}"))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(|e| format!("Failed to query ledger: {e}"))?;

        let mut trades = Vec::new();
        for row in rows {
            let data = row.map_err(|e| format!("Failed to read ledger row: {e}"))?;
            let trade = serde_json::from_str(&data)
                .map_err(|e| format!("Failed to parse ledger row: {e}"))?;
            trades.push(trade);
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;
    use chrono::{Duration, Utc};

    fn temp_store(name: &str) -> Store {
        let path = std::env::temp_dir().join(format!(
            "spotbot-test-{name}-{}.db",
            uuid::Uuid::new_v4()
        ));
        Store::open(path).unwrap()
    }

    fn sample_trade(id: &str, minutes_ago: i64) -> CompletedTrade {
        CompletedTrade {
            id: id.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            side: TradeSide::Buy,
            pair: "LTC/USDT".to_string(),
            price: 0.5,
            amount: 20.0,
            cost: 10.0,
            order_id: Some("42".to_string()),
            fee_amount: None,
            fee_currency: None,
            profit_amount: None,
            profit_percent: None,
            purchase_price_for_sell: None,
        }
    }

    #[test]
    fn settings_round_trip() {
        let store = temp_store("settings");
        assert!(store.load_settings().unwrap().is_none());

        let mut settings = Settings::default();
        settings.trade_amount_quote = 123.0;
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), Some(settings.clone()));

        // Whole-object overwrite keeps a single row.
        settings.max_open_trades = 7;
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), Some(settings));
    }

    #[test]
    fn active_trade_save_delete_round_trip() {
        let store = temp_store("trades");
        let trade = ActiveTrade {
            purchase_price: 0.5,
            amount: 20.0,
            timestamp: Utc::now(),
            highest_price_since_buy: Some(0.52),
        };

        store.save_active_trade("LTC/USDT", &trade).unwrap();
        let loaded = store.load_active_trades().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["LTC/USDT"].purchase_price, 0.5);
        assert_eq!(loaded["LTC/USDT"].highest_price_since_buy, Some(0.52));

        store.delete_active_trade("LTC/USDT").unwrap();
        assert!(store.load_active_trades().unwrap().is_empty());
    }

    #[test]
    fn ledger_reads_newest_first_with_limit() {
        let store = temp_store("ledger");
        store.save_ledger_item(&sample_trade("a", 30)).unwrap();
        store.save_ledger_item(&sample_trade("b", 20)).unwrap();
        store.save_ledger_item(&sample_trade("c", 10)).unwrap();

        let all = store.load_ledger(100).unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let limited = store.load_ledger(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, "c");
    }

    #[test]
    fn close_checkpoints_cleanly() {
        let store = temp_store("close");
        store.save_settings(&Settings::default()).unwrap();
        store.close().unwrap();
    }

    #[test]
    fn ledger_is_append_only() {
        let store = temp_store("append-only");
        store.save_ledger_item(&sample_trade("dup", 1)).unwrap();
        assert!(store.save_ledger_item(&sample_trade("dup", 0)).is_err());
    }
}
