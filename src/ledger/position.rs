//! Signed position state and the five-case fill transition.

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;

const QTY_EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    /// Signed quantity; the sign is the direction.
    pub quantity: f64,
    pub avg_open_price: f64,
    pub leverage: f64,
    pub isolated: bool,
}

impl Position {
    pub fn new(instrument: Instrument, leverage: f64, isolated: bool) -> Self {
        Self {
            instrument,
            quantity: 0.0,
            avg_open_price: 0.0,
            leverage: leverage.max(1.0),
            isolated,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < QTY_EPS
    }

    pub fn is_long(&self) -> bool {
        self.quantity > QTY_EPS
    }

    /// Apply a fill and return the realized PnL of any reduced portion.
    ///
    /// Five transitions, selected by sign/magnitude against the current
    /// quantity:
    /// 1. open: average price set to the fill price;
    /// 2. add same direction: weighted blend of the average price;
    /// 3. reduce without flip: quantity moves toward zero, average kept;
    /// 4. exact close: quantity and average both zeroed;
    /// 5. reduce-and-flip: quantity crosses zero, average reset to the
    ///    fill price (not blended).
    pub fn deal(&mut self, price: f64, quantity: f64) -> f64 {
        let current = self.quantity;

        // Case 1: open.
        if current.abs() < QTY_EPS {
            self.avg_open_price = price;
            self.quantity = quantity;
            return 0.0;
        }

        // Case 2: add in the same direction.
        if current * quantity > 0.0 {
            let total = current + quantity;
            self.avg_open_price =
                (self.avg_open_price * current + price * quantity) / total;
            self.quantity = total;
            return 0.0;
        }

        // Opposite-direction fill: reduce, close, or flip.
        if current.abs() > quantity.abs() + QTY_EPS {
            // Case 3: reduce without flip. Average price unchanged.
            self.quantity = current + quantity;
            return (price - self.avg_open_price) * -quantity;
        }

        let realized = (price - self.avg_open_price) * current;
        if (current + quantity).abs() < QTY_EPS {
            // Case 4: exact close.
            self.quantity = 0.0;
            self.avg_open_price = 0.0;
        } else {
            // Case 5: reduce-and-flip.
            self.quantity = current + quantity;
            self.avg_open_price = price;
        }
        realized
    }

    /// Initial margin currently tied up by this position.
    pub fn margin(&self) -> f64 {
        (self.avg_open_price * self.quantity).abs() / self.leverage
            * (1.0 + self.instrument.init_margin_rate + self.instrument.taker_fee)
    }

    /// Unrealized PnL marked at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_open_price) * self.quantity
    }

    /// Mark price at which the position is force-closed, or `None` when
    /// flat.
    ///
    /// Four formulas over {isolated, cross} x {long, short}. The funding
    /// rate only counts when adverse to the direction (positive funding
    /// hurts longs, negative hurts shorts); the opposite sign is floored
    /// to zero. Cross positions are backed by the whole balance, so the
    /// `1/leverage` term saturates at one.
    pub fn liquidation_price(&self, funding_rate: f64) -> Option<f64> {
        if self.is_flat() {
            return None;
        }
        let maint = self.instrument.maint_margin_rate;
        let term = if self.is_long() {
            let funding = funding_rate.max(0.0);
            if self.isolated {
                1.0 - 1.0 / self.leverage + maint + funding
            } else {
                maint + funding
            }
        } else {
            let funding = funding_rate.min(0.0);
            if self.isolated {
                1.0 + 1.0 / self.leverage - maint + funding
            } else {
                2.0 - maint + funding
            }
        };
        Some((self.avg_open_price * term).max(0.0))
    }
}
