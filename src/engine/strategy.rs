/// Strategy step: manage open positions first, then consider one entry.
use chrono::Utc;
use std::sync::atomic::Ordering;

use super::{EngineState, TradingEngine, MIN_TRADE_VALUE_QUOTE};
use crate::types::{ActiveTrade, BotLog, CompletedTrade, LogKind, TradeSide};

impl TradingEngine {
    /// Sells are evaluated before buys so freed budget and the open-trade
    /// count reflect this iteration's exits. At most one buy per loop.
    pub(crate) async fn execute_strategy(&self, state: &mut EngineState) {
        let open_symbols: Vec<String> = state.active_trades.keys().cloned().collect();
        for symbol in open_symbols {
            if self.is_stopping.load(Ordering::SeqCst) {
                return;
            }
            self.manage_position(state, &symbol).await;
        }

        if self.is_stopping.load(Ordering::SeqCst) {
            return;
        }
        self.consider_entry(state).await;
    }

    // =========================================================================
    // SELL PATH
    // =========================================================================

    async fn manage_position(&self, state: &mut EngineState, symbol: &str) {
        let Some(trade) = state.active_trades.get(symbol).cloned() else {
            return;
        };

        // No price this cycle -> nothing to decide on.
        let Some(price) = state
            .market_data
            .iter()
            .find(|c| c.symbol == symbol)
            .map(|c| c.price)
        else {
            return;
        };
        if !price.is_finite() || price <= 0.0 {
            return;
        }

        // Reconciliation: the balance is the source of truth. A tracked
        // position without holdings was closed outside the bot; drop it
        // without fabricating a ledger row.
        let holding = state
            .portfolio
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned()
            .filter(|p| p.free > 0.0);
        let Some(holding) = holding else {
            self.publish_log(BotLog::new(
                LogKind::Warning,
                format!("{symbol}: tracked position has no balance, dropping it"),
            ))
            .await;
            state.active_trades.remove(symbol);
            self.persist_trade_deletion(state, symbol);
            return;
        };

        let settings = &state.settings;
        let initial_stop = trade.purchase_price * (1.0 - settings.stop_loss_pct / 100.0);
        let target_price = trade.purchase_price * (1.0 + settings.target_profit_pct / 100.0);

        let mut effective_stop = initial_stop;
        if settings.use_trailing_stop {
            let previous_high = trade.highest_price_since_buy.unwrap_or(trade.purchase_price);
            let high = previous_high.max(price);
            if high > previous_high {
                if let Some(stored) = state.active_trades.get_mut(symbol) {
                    stored.highest_price_since_buy = Some(high);
                    let updated = stored.clone();
                    self.persist_active_trade(state, symbol, &updated);
                }
            }
            let arm_level =
                trade.purchase_price * (1.0 + settings.trailing_stop_arm_pct / 100.0);
            if high > arm_level {
                let trailing_stop = high * (1.0 - settings.trailing_stop_offset_pct / 100.0);
                effective_stop = initial_stop.max(trailing_stop);
            }
        }

        // Take profit wins when both trigger.
        let reason = if price >= target_price {
            "Take Profit"
        } else if price <= effective_stop {
            "Stop Loss"
        } else {
            return;
        };

        let amount_to_sell = holding.free;
        if amount_to_sell * price < MIN_TRADE_VALUE_QUOTE {
            self.publish_log(BotLog::new(
                LogKind::Warning,
                format!(
                    "{symbol}: {reason} hit but position value {:.2} is below the {MIN_TRADE_VALUE_QUOTE} minimum, skipping",
                    amount_to_sell * price
                ),
            ))
            .await;
            return;
        }

        match self
            .gateway
            .place_order(symbol, TradeSide::Sell, amount_to_sell)
            .await
        {
            Ok(order) => {
                let exec_price = order.average.or(order.price).unwrap_or(price);
                let filled = order.filled.or(order.amount).unwrap_or(amount_to_sell);
                let cost = order.cost.unwrap_or(filled * exec_price);
                let invested = trade.purchase_price * filled;
                let profit = cost - invested;
                let profit_pct = if invested > 0.0 {
                    profit / invested * 100.0
                } else {
                    0.0
                };

                let row = CompletedTrade {
                    id: uuid::Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    side: TradeSide::Sell,
                    pair: symbol.to_string(),
                    price: exec_price,
                    amount: filled,
                    cost,
                    order_id: Some(order.id),
                    fee_amount: order.fee_amount,
                    fee_currency: order.fee_currency,
                    profit_amount: Some(profit),
                    profit_percent: Some(profit_pct),
                    purchase_price_for_sell: Some(trade.purchase_price),
                };

                state.active_trades.remove(symbol);
                self.persist_trade_deletion(state, symbol);

                self.publish_log(BotLog::for_trade(
                    LogKind::Sell,
                    format!(
                        "{reason}: sold {filled:.8} {symbol} at {exec_price:.8} ({profit_pct:+.2}%)"
                    ),
                    &row,
                ))
                .await;
                self.append_ledger(state, row).await;
            }
            Err(e) => {
                // Position stays; next scan retries the exit.
                self.publish_log(BotLog::new(
                    LogKind::Error,
                    format!("{symbol}: sell order failed, will retry next scan: {e}"),
                ))
                .await;
            }
        }
    }

    // =========================================================================
    // BUY PATH
    // =========================================================================

    async fn consider_entry(&self, state: &mut EngineState) {
        let settings = &state.settings;

        let candidate = state
            .market_data
            .iter()
            .filter(|c| !state.active_trades.contains_key(&c.symbol))
            .filter(|c| c.price > 0.0 && c.price <= settings.max_coin_price)
            .filter(|c| !Self::is_excluded(&c.symbol))
            .filter_map(|c| match (c.rsi, c.sma_short, c.sma_long) {
                (Some(rsi), Some(sma_short), Some(sma_long)) => {
                    Some((c, rsi, sma_short, sma_long))
                }
                _ => None,
            })
            .filter(|(_, rsi, sma_short, sma_long)| {
                rsi.is_finite()
                    && *rsi < settings.rsi_buy_threshold
                    && sma_short > sma_long
            })
            .max_by(|(a, ..), (b, ..)| {
                a.quote_volume
                    .partial_cmp(&b.quote_volume)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(c, rsi, ..)| (c.clone(), rsi));

        let Some((coin, rsi)) = candidate else {
            return;
        };

        // Admission control is a silent skip: the signal is not an error.
        if state.active_trades.len() >= settings.max_open_trades {
            return;
        }
        if state.usdt_balance < settings.trade_amount_quote {
            return;
        }

        let amount = settings.trade_amount_quote / coin.price;
        self.publish_log(BotLog::new(
            LogKind::StrategyInfo,
            format!(
                "entry signal on {}: rsi {:.1} below threshold, short SMA above long",
                coin.symbol, rsi
            ),
        ))
        .await;

        match self
            .gateway
            .place_order(&coin.symbol, TradeSide::Buy, amount)
            .await
        {
            Ok(order) => {
                let exec_price = order.average.or(order.price).unwrap_or(coin.price);
                let filled = order.filled.or(order.amount).unwrap_or(amount);
                let cost = order.cost.unwrap_or(filled * exec_price);

                let trade = ActiveTrade {
                    purchase_price: exec_price,
                    amount: filled,
                    timestamp: Utc::now(),
                    highest_price_since_buy: Some(exec_price),
                };
                state.active_trades.insert(coin.symbol.clone(), trade.clone());
                self.persist_active_trade(state, &coin.symbol, &trade);

                let row = CompletedTrade {
                    id: uuid::Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    side: TradeSide::Buy,
                    pair: coin.symbol.clone(),
                    price: exec_price,
                    amount: filled,
                    cost,
                    order_id: Some(order.id),
                    fee_amount: order.fee_amount,
                    fee_currency: order.fee_currency,
                    profit_amount: None,
                    profit_percent: None,
                    purchase_price_for_sell: None,
                };

                self.publish_log(BotLog::for_trade(
                    LogKind::Buy,
                    format!(
                        "bought {filled:.8} {} at {exec_price:.8} for {cost:.2} {}",
                        coin.symbol,
                        coin.quote_asset
                    ),
                    &row,
                ))
                .await;
                self.append_ledger(state, row).await;
            }
            Err(e) => {
                self.publish_log(BotLog::new(
                    LogKind::Error,
                    format!("{}: buy order failed: {e}", coin.symbol),
                ))
                .await;
            }
        }
    }
}
