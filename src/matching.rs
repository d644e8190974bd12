//! Order matching against a pluggable price source.
//!
//! The scheduler is identical in live and backtest mode; only the
//! `PriceSource` differs. Fills are complete and immediate: market
//! orders at the source's last price, limit orders at their own limit
//! price, stop-markets at last once triggered. Partial fills and queue
//! position are not modeled. Calls that mutate the account must be
//! serialized with any other ledger writer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::bars::BarStore;
use crate::errors::LedgerError;
use crate::ledger::{Account, Order, Trade};
use crate::ops::Metrics;
use crate::sync::TableSynchronizer;
use crate::types::{OrderKind, TimestampMs};

const QTY_EPS: f64 = 1e-9;

pub trait PriceSource {
    fn last_price(&self, symbol: &str) -> Option<f64>;
}

/// Live price source: the synchronizer's mirrored last trade price.
pub struct MirrorPriceSource {
    sync: Arc<Mutex<TableSynchronizer>>,
}

impl MirrorPriceSource {
    pub fn new(sync: Arc<Mutex<TableSynchronizer>>) -> Self {
        Self { sync }
    }
}

impl PriceSource for MirrorPriceSource {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.sync
            .lock()
            .expect("synchronizer lock poisoned")
            .last_price(symbol)
    }
}

/// Backtest price source: the bar store indexed by the simulated clock.
pub struct BarPriceSource<'a> {
    store: &'a BarStore,
    now_ms: TimestampMs,
}

impl<'a> BarPriceSource<'a> {
    pub fn new(store: &'a BarStore, now_ms: TimestampMs) -> Self {
        Self { store, now_ms }
    }
}

impl PriceSource for BarPriceSource<'_> {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.store.close_at(symbol, self.now_ms)
    }
}

pub struct MatchingScheduler {
    open_orders: BTreeMap<String, Order>,
    trade_seq: u64,
    metrics: Option<Metrics>,
}

impl MatchingScheduler {
    pub fn new() -> Self {
        Self {
            open_orders: BTreeMap::new(),
            trade_seq: 0,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }

    pub fn open_order(&self, order_id: &str) -> Option<&Order> {
        self.open_orders.get(order_id)
    }

    /// Accept an order into the open set. Priced orders are
    /// margin-checked here; market orders carry no price until they
    /// fill, so they are charged at fill time.
    pub fn submit(&mut self, account: &Account, order: Order) -> Result<(), LedgerError> {
        if let Some(price) = order.price.or(order.stop_price) {
            account.ensure_margin(&order.instrument, order.remaining_quantity(), price)?;
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_order_submitted();
        }
        self.open_orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    pub fn cancel(&mut self, order_id: &str) -> Result<Order, LedgerError> {
        let order = self
            .open_orders
            .remove(order_id)
            .ok_or_else(|| LedgerError::UnknownOrder(order_id.to_string()))?;
        if let Some(metrics) = &self.metrics {
            metrics.inc_order_canceled();
        }
        Ok(order)
    }

    /// One scheduling tick: fill every open order that has a price, in
    /// deterministic (id) order, and drop completed orders from the open
    /// set.
    pub fn match_open_orders(
        &mut self,
        account: &mut Account,
        source: &dyn PriceSource,
        now_ms: TimestampMs,
    ) -> Vec<Trade> {
        let ids: Vec<String> = self.open_orders.keys().cloned().collect();
        let mut fills = Vec::new();
        for id in ids {
            let Some(order) = self.open_orders.get(&id) else {
                continue;
            };
            let Some(price) = fill_price(order, source) else {
                continue;
            };
            let remaining = order.remaining_quantity();
            if remaining.abs() < QTY_EPS {
                self.open_orders.remove(&id);
                continue;
            }
            let trade_id = self.next_trade_id();
            let Some(order) = self.open_orders.get_mut(&id) else {
                continue;
            };
            let trade = Trade::new(order, price, remaining, trade_id, now_ms);
            account.apply_trade(order, &trade);
            if order.is_fully_traded() {
                self.open_orders.remove(&id);
            }
            if let Some(metrics) = &self.metrics {
                metrics.inc_fill();
            }
            fills.push(trade);
        }
        fills
    }

    fn next_trade_id(&mut self) -> String {
        let seq = self.trade_seq;
        self.trade_seq = self.trade_seq.wrapping_add(1);
        format!("t_{seq:016x}")
    }
}

impl Default for MatchingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_price(order: &Order, source: &dyn PriceSource) -> Option<f64> {
    match order.kind {
        OrderKind::Market => source.last_price(&order.instrument.symbol),
        OrderKind::Limit => order.price,
        OrderKind::StopMarket => {
            let last = source.last_price(&order.instrument.symbol)?;
            let stop = order.stop_price?;
            let triggered = if order.quantity > 0.0 {
                last >= stop
            } else {
                last <= stop
            };
            triggered.then_some(last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::instrument::Instrument;

    struct FixedPrice(Option<f64>);

    impl PriceSource for FixedPrice {
        fn last_price(&self, _symbol: &str) -> Option<f64> {
            self.0
        }
    }

    fn setup() -> (Account, MatchingScheduler) {
        let account = Account::new(&Settings {
            initial_balance: 1_000_000.0,
            ..Settings::default()
        });
        (account, MatchingScheduler::new())
    }

    #[test]
    fn market_order_waits_for_a_price() {
        let (mut account, mut sched) = setup();
        let order = Order::market("o-1", Instrument::perpetual("XBTUSD"), 100.0, 0);
        sched.submit(&account, order).unwrap();
        let fills = sched.match_open_orders(&mut account, &FixedPrice(None), 1);
        assert!(fills.is_empty());
        assert_eq!(sched.open_order_count(), 1);
    }

    #[test]
    fn limit_fills_at_its_own_price() {
        let (mut account, mut sched) = setup();
        let order = Order::limit("o-1", Instrument::perpetual("XBTUSD"), -50.0, 21.5, 0);
        sched.submit(&account, order).unwrap();
        let fills = sched.match_open_orders(&mut account, &FixedPrice(Some(20.0)), 1);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 21.5);
        assert_eq!(fills[0].quantity, -50.0);
        assert_eq!(sched.open_order_count(), 0);
    }

    #[test]
    fn stop_market_rests_until_triggered() {
        let (mut account, mut sched) = setup();
        let order = Order::stop_market("o-1", Instrument::perpetual("XBTUSD"), 10.0, 25.0, 0);
        sched.submit(&account, order).unwrap();
        assert!(sched
            .match_open_orders(&mut account, &FixedPrice(Some(24.0)), 1)
            .is_empty());
        let fills = sched.match_open_orders(&mut account, &FixedPrice(Some(26.0)), 2);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 26.0);
    }

    #[test]
    fn cancel_unknown_order_errors() {
        let (_, mut sched) = setup();
        assert!(matches!(
            sched.cancel("nope"),
            Err(LedgerError::UnknownOrder(_))
        ));
    }

    #[test]
    fn submit_rejects_undermargined_limit() {
        let (account, mut sched) = setup();
        let order = Order::limit(
            "o-1",
            Instrument::perpetual("XBTUSD"),
            10_000_000.0,
            100.0,
            0,
        );
        assert!(matches!(
            sched.submit(&account, order),
            Err(LedgerError::MarginNotEnough { .. })
        ));
        assert_eq!(sched.open_order_count(), 0);
    }
}
