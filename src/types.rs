//! Shared primitive types for the connector and ledger.

use serde::{Deserialize, Serialize};

/// Milliseconds since the unix epoch.
pub type TimestampMs = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side implied by a signed quantity; `None` when flat.
    pub fn of_quantity(quantity: f64) -> Option<Side> {
        if quantity > 0.0 {
            Some(Side::Buy)
        } else if quantity < 0.0 {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn parse(raw: &str) -> Option<Side> {
        match raw {
            "Buy" => Some(Side::Buy),
            "Sell" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

/// Order kind tag. Kind-specific fields (limit price, stop price) live as
/// optional fields on the order itself rather than in a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    StopMarket,
}

/// Derived fill status of an order. Never stored; always computed from
/// quantity vs traded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    NotTraded,
    PartlyTraded,
    FullyTraded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_of_quantity_sign() {
        assert_eq!(Side::of_quantity(1.5), Some(Side::Buy));
        assert_eq!(Side::of_quantity(-3.0), Some(Side::Sell));
        assert_eq!(Side::of_quantity(0.0), None);
    }

    #[test]
    fn side_parse_roundtrip() {
        assert_eq!(Side::parse("Buy"), Some(Side::Buy));
        assert_eq!(Side::parse("Sell"), Some(Side::Sell));
        assert_eq!(Side::parse("buy"), None);
        assert_eq!(Side::Buy.as_str(), "Buy");
    }
}
