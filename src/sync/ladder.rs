//! Sorted bid/ask price-level ladder with checksum support.

use serde::{Deserialize, Serialize};

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Exchange-assigned price-level id; the identity key for deltas.
    pub id: u64,
    pub price: f64,
    pub size: f64,
}

/// Per-instrument two-sided book: bids descending, asks ascending by
/// price. Ties are broken by price only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ladder {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl Ladder {
    pub fn new() -> Self {
        Self::default()
    }

    fn levels(&self, side: Side) -> &Vec<PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn sort_side(levels: &mut [PriceLevel], side: Side) {
        match side {
            Side::Buy => levels.sort_by(|a, b| b.price.total_cmp(&a.price)),
            Side::Sell => levels.sort_by(|a, b| a.price.total_cmp(&b.price)),
        }
    }

    pub fn insert(&mut self, side: Side, level: PriceLevel) {
        let levels = self.levels_mut(side);
        levels.push(level);
        Self::sort_side(levels, side);
    }

    /// Merge a delta into the level identified by `id`. Returns false
    /// when no such level exists on that side.
    pub fn update(&mut self, side: Side, id: u64, price: Option<f64>, size: Option<f64>) -> bool {
        let levels = self.levels_mut(side);
        let Some(level) = levels.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        if let Some(size) = size {
            level.size = size;
        }
        let repriced = match price {
            Some(price) if price != level.price => {
                level.price = price;
                true
            }
            _ => false,
        };
        if repriced {
            Self::sort_side(levels, side);
        }
        true
    }

    pub fn delete(&mut self, side: Side, id: u64) -> bool {
        let levels = self.levels_mut(side);
        match levels.iter().position(|l| l.id == id) {
            Some(idx) => {
                levels.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn best_bid_n(&self, n: usize) -> &[PriceLevel] {
        &self.bids[..self.bids.len().min(n)]
    }

    pub fn best_ask_n(&self, n: usize) -> &[PriceLevel] {
        &self.asks[..self.asks.len().min(n)]
    }

    pub fn depth(&self, side: Side) -> usize {
        self.levels(side).len()
    }

    /// Canonical checksum input: `price:size` for the top `depth` bids,
    /// then the top `depth` asks, joined with `:` in ladder order.
    pub fn checksum_payload(&self, depth: usize) -> String {
        let mut parts = Vec::with_capacity(depth * 2);
        for level in self.best_bid_n(depth) {
            parts.push(format!("{}:{}", level.price, level.size));
        }
        for level in self.best_ask_n(depth) {
            parts.push(format!("{}:{}", level.price, level.size));
        }
        parts.join(":")
    }

    /// Fast non-cryptographic hash of the canonical payload, comparable
    /// against the exchange-published value.
    pub fn checksum(&self, depth: usize) -> u32 {
        crc32fast::hash(self.checksum_payload(depth).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Ladder {
        let mut ladder = Ladder::new();
        ladder.insert(Side::Buy, PriceLevel { id: 1, price: 100.0, size: 2.0 });
        ladder.insert(Side::Buy, PriceLevel { id: 2, price: 99.5, size: 1.0 });
        ladder.insert(Side::Sell, PriceLevel { id: 3, price: 100.5, size: 3.0 });
        ladder.insert(Side::Sell, PriceLevel { id: 4, price: 101.0, size: 1.0 });
        ladder
    }

    #[test]
    fn sides_stay_sorted() {
        let mut ladder = ladder();
        ladder.insert(Side::Buy, PriceLevel { id: 5, price: 99.75, size: 4.0 });
        assert_eq!(ladder.best_bid().unwrap().price, 100.0);
        let bids: Vec<f64> = ladder.best_bid_n(3).iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![100.0, 99.75, 99.5]);
        assert_eq!(ladder.best_ask().unwrap().price, 100.5);
    }

    #[test]
    fn update_resorts_on_reprice() {
        let mut ladder = ladder();
        assert!(ladder.update(Side::Sell, 3, Some(101.5), None));
        assert_eq!(ladder.best_ask().unwrap().id, 4);
        assert!(!ladder.update(Side::Sell, 99, None, Some(1.0)));
    }

    #[test]
    fn delete_removes_level() {
        let mut ladder = ladder();
        assert!(ladder.delete(Side::Buy, 1));
        assert_eq!(ladder.best_bid().unwrap().id, 2);
        assert!(!ladder.delete(Side::Buy, 1));
    }

    #[test]
    fn checksum_payload_is_bids_then_asks() {
        let ladder = ladder();
        assert_eq!(ladder.checksum_payload(2), "100:2:99.5:1:100.5:3:101:1");
    }

    #[test]
    fn checksum_known_answer_and_tick_sensitivity() {
        let mut ladder = ladder();
        assert_eq!(ladder.checksum(2), 1460079683);
        // One level moved one tick must change the checksum.
        assert!(ladder.update(Side::Sell, 4, Some(101.5), None));
        assert_eq!(ladder.checksum(2), 1061069634);
    }
}
