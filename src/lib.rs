//! Perpetua: leveraged-derivatives exchange connector and trading ledger.
//!
//! The crate has four load-bearing pieces and a deliberately thin rim
//! around them:
//!
//! - **TableSynchronizer** (`sync`): reconstructs exchange-side state
//!   (ladder, quotes, positions, margin, open orders) from the streaming
//!   partial/insert/update/delete protocol.
//!
//! - **ExchangeGateway** (`gateway`): signs, classifies and retries REST
//!   calls, and hands out the authenticated handshake for the single
//!   streaming connection owned by `stream`.
//!
//! - **Ledger** (`ledger`): pure account/position/order/trade arithmetic,
//!   including leveraged margin and liquidation pricing. No I/O.
//!
//! - **MatchingScheduler** (`matching`): fills resting orders against a
//!   price source; identical in live and backtest mode except for where
//!   the price comes from (`sync` mirror vs. `bars` store).
//!
//! Backtests drive the scheduler from the deterministic loop in
//! `backtest`; live mode wires the stream reader, gateway and scheduler
//! together, sharing one `Settings` constructed at startup.

pub mod backtest;
pub mod bars;
pub mod config;
pub mod errors;
pub mod event_log;
pub mod gateway;
pub mod instrument;
pub mod ledger;
pub mod matching;
pub mod ops;
pub mod stream;
pub mod sync;
pub mod types;

pub use backtest::{BacktestEngine, BacktestReport, EquityPoint, Strategy};
pub use bars::{Bar, BarSeries, BarStore, MINUTE_MS};
pub use config::{Credentials, Settings};
pub use errors::{ExchangeError, LedgerError};
pub use event_log::{read_event_log, EventLogWriter, LedgerEvent};
pub use gateway::ExchangeGateway;
pub use instrument::Instrument;
pub use ledger::{Account, Order, Position, Trade};
pub use matching::{BarPriceSource, MatchingScheduler, MirrorPriceSource, PriceSource};
pub use ops::{HealthState, Metrics};
pub use stream::StreamClient;
pub use sync::{
    Ladder, MirrorTable, PriceLevel, SyncError, TableAction, TableMessage, TableSynchronizer,
};
pub use types::{OrderKind, OrderStatus, Side, TimestampMs};
