//! Orders and the trades applied to them.

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;
use crate::types::{OrderKind, OrderStatus, TimestampMs};

const QTY_EPS: f64 = 1e-9;

/// An execution against an order. Created only by the matching scheduler
/// and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: String,
    pub price: f64,
    /// Signed execution quantity, same sign as the order quantity.
    pub quantity: f64,
    pub commission: f64,
    pub timestamp_ms: TimestampMs,
}

impl Trade {
    pub fn new(
        order: &Order,
        price: f64,
        quantity: f64,
        trade_id: String,
        timestamp_ms: TimestampMs,
    ) -> Self {
        Self {
            trade_id,
            order_id: order.order_id.clone(),
            symbol: order.instrument.symbol.clone(),
            price,
            quantity,
            commission: (price * quantity).abs() * order.instrument.taker_fee,
            timestamp_ms,
        }
    }

    pub fn value(&self) -> f64 {
        (self.price * self.quantity).abs()
    }
}

/// A single flat order struct carrying a kind tag plus the optional
/// prices the kind needs. Behavior switches on the tag; there is no
/// order-type hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub instrument: Instrument,
    pub kind: OrderKind,
    /// Signed quantity; the sign is the direction.
    pub quantity: f64,
    /// Signed cumulative filled quantity. Invariant:
    /// `|traded_quantity| <= |quantity|` at all times.
    pub traded_quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trades: Vec<Trade>,
    pub created_ms: TimestampMs,
}

impl Order {
    pub fn market(
        order_id: impl Into<String>,
        instrument: Instrument,
        quantity: f64,
        created_ms: TimestampMs,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            instrument,
            kind: OrderKind::Market,
            quantity,
            traded_quantity: 0.0,
            price: None,
            stop_price: None,
            trades: Vec::new(),
            created_ms,
        }
    }

    pub fn limit(
        order_id: impl Into<String>,
        instrument: Instrument,
        quantity: f64,
        price: f64,
        created_ms: TimestampMs,
    ) -> Self {
        Self {
            kind: OrderKind::Limit,
            price: Some(price),
            ..Self::market(order_id, instrument, quantity, created_ms)
        }
    }

    pub fn stop_market(
        order_id: impl Into<String>,
        instrument: Instrument,
        quantity: f64,
        stop_price: f64,
        created_ms: TimestampMs,
    ) -> Self {
        Self {
            kind: OrderKind::StopMarket,
            stop_price: Some(stop_price),
            ..Self::market(order_id, instrument, quantity, created_ms)
        }
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.quantity - self.traded_quantity
    }

    pub fn is_fully_traded(&self) -> bool {
        self.remaining_quantity().abs() < QTY_EPS
    }

    /// Pure function of quantity vs traded quantity.
    pub fn status(&self) -> OrderStatus {
        if self.traded_quantity.abs() < QTY_EPS {
            OrderStatus::NotTraded
        } else if self.is_fully_traded() {
            OrderStatus::FullyTraded
        } else {
            OrderStatus::PartlyTraded
        }
    }

    /// Record a trade against this order.
    ///
    /// Panics when the trade was already applied or would push
    /// `|traded_quantity|` past `|quantity|`: both mean the scheduler is
    /// defective and trading must stop rather than continue on corrupted
    /// state. The owning account applies the same trade to the position.
    pub fn deal(&mut self, trade: &Trade) {
        assert!(
            self.trades.iter().all(|t| t.trade_id != trade.trade_id),
            "trade {} applied twice to order {}",
            trade.trade_id,
            self.order_id,
        );
        let traded = self.traded_quantity + trade.quantity;
        assert!(
            traded * self.quantity >= 0.0,
            "trade {} fills order {} against its direction",
            trade.trade_id,
            self.order_id,
        );
        assert!(
            traded.abs() <= self.quantity.abs() + QTY_EPS,
            "order {} overfilled: traded {} of {}",
            self.order_id,
            traded,
            self.quantity,
        );
        self.traded_quantity = traded;
        self.trades.push(trade.clone());
    }
}
