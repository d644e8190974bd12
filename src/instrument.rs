//! Instrument contract specs, immutable once loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: f64,
    pub lot_size: f64,
    /// Maker fee; negative values are rebates.
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub init_margin_rate: f64,
    pub maint_margin_rate: f64,
    pub listing: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Instrument {
    /// A perpetual contract with typical exchange defaults. Mostly a test
    /// and demo convenience; real specs come from the instrument feed.
    pub fn perpetual(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size: 0.5,
            lot_size: 1.0,
            maker_fee: -0.00025,
            taker_fee: 0.00075,
            init_margin_rate: 0.01,
            maint_margin_rate: 0.005,
            listing: None,
            expiry: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("instrument symbol is empty".to_string());
        }
        if self.tick_size <= 0.0 || !self.tick_size.is_finite() {
            return Err(format!("invalid tick_size for {}", self.symbol));
        }
        if self.lot_size <= 0.0 || !self.lot_size.is_finite() {
            return Err(format!("invalid lot_size for {}", self.symbol));
        }
        if !self.taker_fee.is_finite() || !self.maker_fee.is_finite() {
            return Err(format!("invalid fees for {}", self.symbol));
        }
        if self.init_margin_rate < 0.0 || self.maint_margin_rate < 0.0 {
            return Err(format!("invalid margin rates for {}", self.symbol));
        }
        if let (Some(listing), Some(expiry)) = (self.listing, self.expiry) {
            if expiry <= listing {
                return Err(format!("expiry precedes listing for {}", self.symbol));
            }
        }
        Ok(())
    }

    pub fn round_price(&self, price: f64) -> f64 {
        let ticks = (price / self.tick_size).round();
        ticks * self.tick_size
    }

    pub fn round_quantity(&self, quantity: f64) -> f64 {
        let lots = (quantity.abs() / self.lot_size).floor();
        lots * self.lot_size * quantity.signum()
    }
}
