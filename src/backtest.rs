//! Deterministic backtest loop.
//!
//! No concurrency: each simulated minute fully resolves (strategy
//! callback, then order matching, then periodic statistics) before the
//! clock advances.

use crate::bars::{BarStore, MINUTE_MS};
use crate::config::Settings;
use crate::event_log::{EventLogWriter, LedgerEvent};
use crate::ledger::{Account, Order, Trade};
use crate::matching::{BarPriceSource, MatchingScheduler};
use crate::types::TimestampMs;

/// Strategy callback invoked once per simulated minute. Orders pushed
/// into `orders` are submitted before matching runs for the tick.
pub trait Strategy {
    fn on_bar(
        &mut self,
        now_ms: TimestampMs,
        store: &BarStore,
        account: &Account,
        orders: &mut Vec<Order>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub timestamp_ms: TimestampMs,
    pub wallet_balance: f64,
    /// Wallet plus unrealized PnL at the tick's closes.
    pub equity: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestReport {
    pub equity: Vec<EquityPoint>,
    pub fills: Vec<Trade>,
    pub ending_balance: f64,
}

pub struct BacktestEngine<'a> {
    settings: &'a Settings,
    store: &'a BarStore,
    pub account: Account,
    pub scheduler: MatchingScheduler,
    event_log: Option<EventLogWriter>,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(settings: &'a Settings, store: &'a BarStore) -> Self {
        Self {
            settings,
            store,
            account: Account::new(settings),
            scheduler: MatchingScheduler::new(),
            event_log: None,
        }
    }

    pub fn with_event_log(mut self, writer: EventLogWriter) -> Self {
        self.event_log = Some(writer);
        self
    }

    pub fn run(&mut self, strategy: &mut dyn Strategy) -> BacktestReport {
        let mut report = BacktestReport::default();
        let mut next_stats_ms = self.settings.sim_start_ms;
        let mut now_ms = self.settings.sim_start_ms;
        let mut orders: Vec<Order> = Vec::new();

        while now_ms <= self.settings.sim_end_ms {
            orders.clear();
            strategy.on_bar(now_ms, self.store, &self.account, &mut orders);
            for order in orders.drain(..) {
                let submitted = LedgerEvent::OrderSubmitted {
                    order_id: order.order_id.clone(),
                    symbol: order.instrument.symbol.clone(),
                    quantity: order.quantity,
                    price: order.price,
                    timestamp_ms: now_ms,
                };
                match self.scheduler.submit(&self.account, order) {
                    Ok(()) => self.log_event(&submitted),
                    Err(err) => eprintln!("WARN: order rejected at t={now_ms}: {err}"),
                }
            }

            let source = BarPriceSource::new(self.store, now_ms);
            let fills = self
                .scheduler
                .match_open_orders(&mut self.account, &source, now_ms);
            for fill in &fills {
                self.log_event(&LedgerEvent::Fill {
                    trade_id: fill.trade_id.clone(),
                    order_id: fill.order_id.clone(),
                    symbol: fill.symbol.clone(),
                    price: fill.price,
                    quantity: fill.quantity,
                    commission: fill.commission,
                    timestamp_ms: fill.timestamp_ms,
                });
            }
            report.fills.extend(fills);

            if now_ms >= next_stats_ms {
                report.equity.push(self.equity_point(now_ms));
                next_stats_ms += self.settings.stats_interval_ms.max(MINUTE_MS);
            }

            now_ms += MINUTE_MS;
        }

        if let Some(writer) = &mut self.event_log {
            let _ = writer.flush();
        }
        report.ending_balance = self.account.wallet_balance;
        report
    }

    fn equity_point(&self, now_ms: TimestampMs) -> EquityPoint {
        let unrealized: f64 = self
            .account
            .positions()
            .filter(|pos| !pos.is_flat())
            .filter_map(|pos| {
                let close = self.store.close_at(&pos.instrument.symbol, now_ms)?;
                Some(pos.unrealized_pnl(close))
            })
            .sum();
        EquityPoint {
            timestamp_ms: now_ms,
            wallet_balance: self.account.wallet_balance,
            equity: self.account.wallet_balance + unrealized,
        }
    }

    fn log_event(&mut self, event: &LedgerEvent) {
        if let Some(writer) = &mut self.event_log {
            if let Err(err) = writer.append(event) {
                eprintln!("WARN: event log append failed: {err}");
            }
        }
    }
}
