//! Account state: wallet balance plus per-instrument positions.

use std::collections::HashMap;

use crate::config::Settings;
use crate::errors::LedgerError;
use crate::instrument::Instrument;
use crate::ledger::order::{Order, Trade};
use crate::ledger::position::Position;

#[derive(Debug, Clone)]
pub struct Account {
    pub wallet_balance: f64,
    positions: HashMap<String, Position>,
    default_leverage: f64,
    isolated_margin: bool,
}

impl Account {
    pub fn new(settings: &Settings) -> Self {
        Self {
            wallet_balance: settings.initial_balance,
            positions: HashMap::new(),
            default_leverage: settings.default_leverage,
            isolated_margin: settings.isolated_margin,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Position for `instrument`, created with zeroed quantity on first
    /// access. Positions are zeroed on full close, never removed.
    pub fn position_mut(&mut self, instrument: &Instrument) -> &mut Position {
        self.positions
            .entry(instrument.symbol.clone())
            .or_insert_with(|| {
                Position::new(
                    instrument.clone(),
                    self.default_leverage,
                    self.isolated_margin,
                )
            })
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Initial margin tied up across all open positions.
    pub fn used_margin(&self) -> f64 {
        self.positions.values().map(Position::margin).sum()
    }

    pub fn available_balance(&self) -> f64 {
        self.wallet_balance - self.used_margin()
    }

    /// Margin a candidate fill of `quantity` at `price` would require,
    /// given the current position in the instrument.
    ///
    /// Opening or adding exposure costs
    /// `|price*qty| / leverage * (1 + init_margin_rate + taker_fee)`;
    /// pure reduction and closing cost nothing; a reduce-and-flip is
    /// charged only on the excess that opens the new direction.
    pub fn order_margin(&self, instrument: &Instrument, quantity: f64, price: f64) -> f64 {
        let (current, leverage) = match self.positions.get(&instrument.symbol) {
            Some(pos) => (pos.quantity, pos.leverage),
            None => (0.0, self.default_leverage),
        };
        let opening = if current == 0.0 || current * quantity > 0.0 {
            quantity.abs()
        } else if current.abs() >= quantity.abs() {
            0.0
        } else {
            quantity.abs() - current.abs()
        };
        (price * opening).abs() / leverage
            * (1.0 + instrument.init_margin_rate + instrument.taker_fee)
    }

    pub fn ensure_margin(
        &self,
        instrument: &Instrument,
        quantity: f64,
        price: f64,
    ) -> Result<(), LedgerError> {
        let required = self.order_margin(instrument, quantity, price);
        let available = self.available_balance();
        if required > available {
            return Err(LedgerError::MarginNotEnough {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Apply a trade to its order, then to the position it belongs to.
    /// Realized PnL and commission settle into the wallet.
    pub fn apply_trade(&mut self, order: &mut Order, trade: &Trade) {
        order.deal(trade);
        let realized = self
            .position_mut(&order.instrument)
            .deal(trade.price, trade.quantity);
        self.wallet_balance += realized - trade.commission;
    }
}
