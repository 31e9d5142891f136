/// Account refresh and market scan steps of the loop.
use super::{
    EngineState, TradingEngine, CANDIDATE_POOL_SIZE, OHLCV_TIMEFRAME, OHLCV_WINDOW, QUOTE_ASSET,
};
use crate::events::EngineEvent;
use crate::indicators;
use crate::logger::{self, LogTag};
use crate::types::{Coin, PortfolioItem};

impl TradingEngine {
    /// Pull balances and rebuild the portfolio view. The quote-asset free
    /// balance is the buy budget; every other non-zero currency becomes a
    /// portfolio row, joined with its active trade when the bot opened it.
    pub(crate) async fn refresh_account(&self, state: &mut EngineState) -> Result<(), String> {
        let balance = self
            .gateway
            .get_balance()
            .await
            .map_err(|e| e.to_string())?;

        let mut portfolio = Vec::new();
        state.usdt_balance = 0.0;
        for (currency, total) in &balance.total {
            if *total <= 0.0 {
                continue;
            }
            let free = balance.free.get(currency).copied().unwrap_or(0.0);
            let locked = balance.used.get(currency).copied().unwrap_or(0.0);

            if currency.as_str() == QUOTE_ASSET {
                state.usdt_balance = free;
                continue;
            }

            let symbol = format!("{currency}/{QUOTE_ASSET}");
            let trade = state.active_trades.get(&symbol);
            portfolio.push(PortfolioItem {
                symbol,
                base_asset: currency.clone(),
                quote_asset: QUOTE_ASSET.to_string(),
                free,
                locked,
                avg_purchase_price: trade.map(|t| t.purchase_price),
                purchase_timestamp: trade.map(|t| t.timestamp),
            });
        }
        portfolio.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        state.portfolio = portfolio;

        self.bus
            .publish(EngineEvent::Portfolio {
                portfolio: state.portfolio.clone(),
                usdt_balance: state.usdt_balance,
            })
            .await;
        Ok(())
    }

    /// Rebuild the market snapshot: filter tickers down to the quoted,
    /// liquid, non-excluded universe, keep the top volume pool, attach
    /// indicators from fresh klines, and publish.
    pub(crate) async fn scan_market(&self, state: &mut EngineState) -> Result<(), String> {
        let tickers = self
            .gateway
            .fetch_tickers()
            .await
            .map_err(|e| e.to_string())?;

        let quote_suffix = format!("/{QUOTE_ASSET}");
        let mut pool: Vec<_> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with(&quote_suffix))
            .filter(|t| t.last > 0.0 && t.quote_volume > 0.0)
            .filter(|t| !Self::is_excluded(&t.symbol))
            .collect();
        pool.sort_by(|a, b| {
            b.quote_volume
                .partial_cmp(&a.quote_volume)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pool.truncate(CANDIDATE_POOL_SIZE);

        let rsi_period = state.settings.rsi_period;
        let sma_short_period = state.settings.sma_short_period;
        let sma_long_period = state.settings.sma_long_period;

        let mut coins = Vec::with_capacity(pool.len());
        for ticker in pool {
            if self.is_stopping.load(std::sync::atomic::Ordering::SeqCst) {
                return Ok(());
            }

            // A failed kline fetch just leaves the indicators unset; the
            // pair stays priced for position management.
            let klines = match self
                .gateway
                .fetch_ohlcv(&ticker.symbol, OHLCV_TIMEFRAME, OHLCV_WINDOW)
                .await
            {
                Ok(klines) => klines,
                Err(e) => {
                    logger::debug(
                        LogTag::Strategy,
                        &format!("no klines for {}: {e}", ticker.symbol),
                    );
                    Vec::new()
                }
            };
            let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();

            let (base_asset, quote_asset) = match ticker.symbol.split_once('/') {
                Some((base, quote)) => (base.to_string(), quote.to_string()),
                None => continue,
            };

            coins.push(Coin {
                symbol: ticker.symbol,
                base_asset,
                quote_asset,
                price: ticker.last,
                price_change_24h_pct: ticker.percentage,
                base_volume: ticker.base_volume,
                quote_volume: ticker.quote_volume,
                rsi: indicators::rsi(&closes, rsi_period).last().copied(),
                sma_short: indicators::sma(&closes, sma_short_period).last().copied(),
                sma_long: indicators::sma(&closes, sma_long_period).last().copied(),
            });
        }

        coins.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        state.market_data = coins;

        logger::debug(
            LogTag::Strategy,
            &format!("scan complete, {} pairs in view", state.market_data.len()),
        );
        self.bus
            .publish(EngineEvent::Market(state.market_data.clone()))
            .await;
        Ok(())
    }
}
