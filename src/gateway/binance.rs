/// Binance spot REST gateway
///
/// Implements the `ExchangeGateway` port over the Binance spot API. Sandbox
/// mode targets the public testnet. All calls pass the shared rate limiter
/// and carry a 30 s timeout; account and order endpoints are signed with
/// HMAC-SHA256 over the query string.
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::config::AppConfig;
use crate::logger::{self, LogTag};
use crate::types::TradeSide;

use super::{
    AccountBalance, ExchangeGateway, FilledOrder, GatewayError, Kline, RateLimiter, Ticker,
};

const BINANCE_API_URL: &str = "https://api.binance.com";
const BINANCE_TESTNET_API_URL: &str = "https://testnet.binance.vision";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const RECV_WINDOW_MS: u64 = 5000;

/// Conservative request budget; Binance allows 1200 weight per minute.
const RATE_LIMIT_REQUESTS: usize = 600;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct MarketInfo {
    base_asset: String,
    quote_asset: String,
    step_size: Option<f64>,
}

pub struct BinanceGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    sandbox: bool,
    markets: RwLock<HashMap<String, MarketInfo>>,
    limiter: RateLimiter,
}

impl BinanceGateway {
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let base_url = if config.is_sandbox {
            BINANCE_TESTNET_API_URL
        } else {
            BINANCE_API_URL
        };

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            sandbox: config.is_sandbox,
            markets: RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(
                RATE_LIMIT_REQUESTS,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            ),
        })
    }

    fn market_for(&self, raw_symbol: &str) -> Option<MarketInfo> {
        self.markets
            .read()
            .ok()
            .and_then(|markets| markets.get(raw_symbol).cloned())
    }

    /// `LTC/USDT` -> `LTCUSDT`
    fn raw_symbol(symbol: &str) -> String {
        symbol.replace('/', "")
    }

    fn sign(&self, query: &str) -> Result<String, GatewayError> {
        let secret = self
            .api_secret
            .as_ref()
            .ok_or(GatewayError::MissingCredentials)?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| {
            GatewayError::InvalidResponse {
                message: format!("failed to build request signer: {e}"),
            }
        })?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, GatewayError> {
        self.limiter.acquire().await;
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut url = format!("{}{}", self.base_url, path);
        if !query.is_empty() {
            url = format!("{url}?{}", query.join("&"));
        }
        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(GatewayError::MissingCredentials)?
            .clone();

        self.limiter.acquire().await;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        query.push(format!("recvWindow={RECV_WINDOW_MS}"));
        let query = query.join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let request = if method == Method::POST {
            self.client.post(&url)
        } else if method == Method::DELETE {
            self.client.delete(&url)
        } else {
            self.client.get(&url)
        };
        let response = request.header("X-MBX-APIKEY", api_key).send().await?;
        Self::parse_response(response).await
    }

    async fn parse_response(response: Response) -> Result<Value, GatewayError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // 4xx means the venue understood and refused; 5xx is transient.
            if status.is_client_error() {
                return Err(GatewayError::Rejected {
                    message: format!("HTTP {}: {}", status.as_u16(), body),
                });
            }
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse {
            message: format!("bad JSON from venue: {e}"),
        })
    }

    /// Round a base amount down to the market's lot-size step.
    fn quantize_amount(&self, raw_symbol: &str, amount: f64) -> f64 {
        match self.market_for(raw_symbol).and_then(|m| m.step_size) {
            Some(step) if step > 0.0 => (amount / step).floor() * step,
            _ => amount,
        }
    }

    fn format_quantity(amount: f64) -> String {
        // Eight decimals covers every Binance lot size; trim the tail.
        let formatted = format!("{amount:.8}");
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    volume: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

fn parse_f64(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn initialize(&self) -> Result<(), GatewayError> {
        let info = self.public_get("/api/v3/exchangeInfo", &[]).await?;
        let symbols = info
            .get("symbols")
            .and_then(|s| s.as_array())
            .ok_or_else(|| GatewayError::InvalidResponse {
                message: "exchangeInfo without symbols array".to_string(),
            })?;

        let mut markets = HashMap::new();
        for entry in symbols {
            let status = entry.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if status != "TRADING" {
                continue;
            }
            let (Some(symbol), Some(base), Some(quote)) = (
                entry.get("symbol").and_then(|v| v.as_str()),
                entry.get("baseAsset").and_then(|v| v.as_str()),
                entry.get("quoteAsset").and_then(|v| v.as_str()),
            ) else {
                continue;
            };

            let step_size = entry
                .get("filters")
                .and_then(|f| f.as_array())
                .and_then(|filters| {
                    filters.iter().find(|f| {
                        f.get("filterType").and_then(|v| v.as_str()) == Some("LOT_SIZE")
                    })
                })
                .and_then(|f| f.get("stepSize"))
                .and_then(json_f64)
                .filter(|step| *step > 0.0);

            markets.insert(
                symbol.to_string(),
                MarketInfo {
                    base_asset: base.to_string(),
                    quote_asset: quote.to_string(),
                    step_size,
                },
            );
        }

        let count = markets.len();
        if let Ok(mut current) = self.markets.write() {
            *current = markets;
        }

        logger::info(
            LogTag::Gateway,
            &format!(
                "loaded {count} markets from {} ({})",
                self.base_url,
                if self.sandbox { "sandbox" } else { "live" }
            ),
        );
        Ok(())
    }

    async fn validate_api_key_permissions(&self) -> Result<bool, GatewayError> {
        if self.api_key.is_none() {
            return Err(GatewayError::MissingCredentials);
        }

        // Testnet keys have no withdrawal surface and no restrictions
        // endpoint; the gate passes by construction.
        if self.sandbox {
            logger::debug(
                LogTag::Gateway,
                "sandbox mode, skipping withdrawal-permission lookup",
            );
            return Ok(true);
        }

        let restrictions = self
            .signed_request(Method::GET, "/sapi/v1/account/apiRestrictions", &[])
            .await?;
        let can_withdraw = restrictions
            .get("enableWithdrawals")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| GatewayError::InvalidResponse {
                message: "apiRestrictions without enableWithdrawals".to_string(),
            })?;

        Ok(!can_withdraw)
    }

    async fn fetch_tickers(&self) -> Result<Vec<Ticker>, GatewayError> {
        let raw = self.public_get("/api/v3/ticker/24hr", &[]).await?;
        let rows: Vec<Ticker24h> =
            serde_json::from_value(raw).map_err(|e| GatewayError::InvalidResponse {
                message: format!("bad ticker payload: {e}"),
            })?;

        let mut tickers = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(market) = self.market_for(&row.symbol) else {
                continue;
            };
            let last = parse_f64(&row.last_price);
            if last <= 0.0 {
                continue;
            }
            tickers.push(Ticker {
                symbol: format!("{}/{}", market.base_asset, market.quote_asset),
                last,
                base_volume: parse_f64(&row.volume),
                quote_volume: parse_f64(&row.quote_volume),
                percentage: parse_f64(&row.price_change_percent),
            });
        }
        Ok(tickers)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, GatewayError> {
        let params = [
            ("symbol", Self::raw_symbol(symbol)),
            ("interval", timeframe.to_string()),
            ("limit", limit.to_string()),
        ];

        let raw = match self.public_get("/api/v3/klines", &params).await {
            Ok(raw) => raw,
            Err(e) => {
                logger::debug(
                    LogTag::Gateway,
                    &format!("klines unavailable for {symbol}: {e}"),
                );
                return Ok(Vec::new());
            }
        };

        let rows = match raw.as_array() {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let mut klines = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(cells) = row.as_array() else { continue };
            if cells.len() < 6 {
                continue;
            }
            let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
                json_f64(&cells[1]),
                json_f64(&cells[2]),
                json_f64(&cells[3]),
                json_f64(&cells[4]),
                json_f64(&cells[5]),
            ) else {
                continue;
            };
            klines.push(Kline {
                timestamp: cells[0].as_i64().unwrap_or(0),
                open,
                high,
                low,
                close,
                volume,
            });
        }
        Ok(klines)
    }

    async fn get_balance(&self) -> Result<AccountBalance, GatewayError> {
        let account = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;
        let rows = account
            .get("balances")
            .and_then(|b| b.as_array())
            .ok_or_else(|| GatewayError::InvalidResponse {
                message: "account without balances array".to_string(),
            })?;

        let mut balance = AccountBalance::default();
        for row in rows {
            let Some(asset) = row.get("asset").and_then(|v| v.as_str()) else {
                continue;
            };
            let free = row.get("free").map(json_f64).flatten().unwrap_or(0.0);
            let locked = row.get("locked").map(json_f64).flatten().unwrap_or(0.0);
            let total = free + locked;
            if total <= 0.0 {
                continue;
            }
            balance.free.insert(asset.to_string(), free);
            balance.used.insert(asset.to_string(), locked);
            balance.total.insert(asset.to_string(), total);
        }
        Ok(balance)
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: TradeSide,
        amount: f64,
    ) -> Result<FilledOrder, GatewayError> {
        let raw_symbol = Self::raw_symbol(symbol);
        let quantity = self.quantize_amount(&raw_symbol, amount);
        if quantity <= 0.0 {
            return Err(GatewayError::Rejected {
                message: format!("order amount {amount} rounds to zero for {symbol}"),
            });
        }

        let side_str = match side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        };
        let params = [
            ("symbol", raw_symbol),
            ("side", side_str.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", Self::format_quantity(quantity)),
        ];

        let order = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await?;

        let id = order
            .get("orderId")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let filled = order.get("executedQty").map(json_f64).flatten();
        let cost = order.get("cummulativeQuoteQty").map(json_f64).flatten();
        let average = match (cost, filled) {
            (Some(cost), Some(filled)) if filled > 0.0 => Some(cost / filled),
            _ => None,
        };

        // Fees are per-fill; aggregate only when one currency is involved.
        let mut fee_amount = 0.0;
        let mut fee_currency: Option<String> = None;
        let mut fee_uniform = true;
        if let Some(fills) = order.get("fills").and_then(|f| f.as_array()) {
            for fill in fills {
                let commission = fill.get("commission").map(json_f64).flatten().unwrap_or(0.0);
                let asset = fill
                    .get("commissionAsset")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                match &fee_currency {
                    None => fee_currency = Some(asset.to_string()),
                    Some(current) if current != asset => fee_uniform = false,
                    _ => {}
                }
                fee_amount += commission;
            }
        }
        let (fee_amount, fee_currency) = if fee_uniform && fee_currency.is_some() && fee_amount > 0.0
        {
            (Some(fee_amount), fee_currency)
        } else {
            (None, None)
        };

        Ok(FilledOrder {
            id,
            price: average,
            average,
            filled,
            amount: filled,
            cost,
            fee_amount,
            fee_currency,
        })
    }
}
