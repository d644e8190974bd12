//! Protocol-level table synchronization.
//!
//! Reconstructs exchange-side state from an ordered stream of
//! partial/insert/update/delete events. Flat tables are mirrored as raw
//! rows matched on the key fields announced by their snapshot; the
//! order-book ladder is a specialization bucketed by side and keyed by a
//! price-level id. Mutation is expected to happen on a single reader
//! task; readers elsewhere take the surrounding lock briefly.

pub mod ladder;
pub mod table;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Settings;
use crate::ops::Metrics;
use crate::types::Side;

pub use ladder::{Ladder, PriceLevel};
pub use table::{MirrorTable, Row};

pub const TABLE_QUOTE: &str = "quote";
pub const TABLE_TRADE: &str = "trade";
pub const TABLE_ORDER_BOOK: &str = "orderBookL2";
pub const TABLE_POSITION: &str = "position";
pub const TABLE_MARGIN: &str = "margin";
pub const TABLE_ORDER: &str = "order";

const QTY_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableAction {
    Partial,
    Insert,
    Update,
    Delete,
}

/// One frame of the streaming table protocol. `keys` is present only on
/// `partial`; `checksum` only where the upstream protocol publishes one
/// for the ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMessage {
    pub table: String,
    pub action: TableAction,
    #[serde(default)]
    pub data: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A delete that matched no mirrored row. Unlike update misses this
    /// is a protocol fault to surface, not to swallow.
    #[error("delete for missing row in table {table}")]
    DeleteMiss { table: String },

    #[error("row in table {table} missing field {field}")]
    BadRow { table: String, field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginMirror {
    #[serde(rename = "walletBalance")]
    pub wallet_balance: f64,
    #[serde(rename = "marginBalance", default)]
    pub margin_balance: Option<f64>,
    #[serde(rename = "availableMargin", default)]
    pub available_margin: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMirror {
    pub symbol: String,
    #[serde(rename = "currentQty")]
    pub current_qty: f64,
    #[serde(rename = "avgEntryPrice", default)]
    pub avg_entry_price: Option<f64>,
    #[serde(rename = "liquidationPrice", default)]
    pub liquidation_price: Option<f64>,
    #[serde(default)]
    pub leverage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderMirror {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(rename = "orderQty")]
    pub order_qty: f64,
    #[serde(rename = "cumQty", default)]
    pub cum_qty: f64,
    #[serde(rename = "leavesQty", default)]
    pub leaves_qty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMirror {
    #[serde(rename = "bidPrice", default)]
    pub bid_price: Option<f64>,
    #[serde(rename = "askPrice", default)]
    pub ask_price: Option<f64>,
}

pub struct TableSynchronizer {
    tables: HashMap<String, MirrorTable>,
    ladders: HashMap<String, Ladder>,
    desynced: HashSet<String>,
    quote_cap: usize,
    trade_cap: usize,
    checksum_depth: usize,
    metrics: Option<Metrics>,
}

impl TableSynchronizer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tables: HashMap::new(),
            ladders: HashMap::new(),
            desynced: HashSet::new(),
            quote_cap: settings.quote_cap,
            trade_cap: settings.trade_cap,
            checksum_depth: settings.checksum_depth,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn apply(&mut self, msg: &TableMessage) -> Result<(), SyncError> {
        if msg.table == TABLE_ORDER_BOOK {
            return self.apply_ladder(msg);
        }
        self.apply_flat(msg)
    }

    fn apply_flat(&mut self, msg: &TableMessage) -> Result<(), SyncError> {
        match msg.action {
            TableAction::Partial => {
                let cap = self.cap_for(&msg.table);
                let table = self
                    .tables
                    .entry(msg.table.clone())
                    .or_insert_with(|| MirrorTable::new(msg.table.clone(), cap));
                table.snapshot(msg.keys.clone().unwrap_or_default(), msg.data.clone());
                Ok(())
            }
            TableAction::Insert => {
                // A mirror only exists once its partial arrived.
                let Some(table) = self.tables.get_mut(&msg.table) else {
                    eprintln!("WARN: insert before partial for table {} ignored", msg.table);
                    return Ok(());
                };
                table.insert(msg.data.clone());
                Ok(())
            }
            TableAction::Update => {
                let is_orders = msg.table == TABLE_ORDER;
                let Some(table) = self.tables.get_mut(&msg.table) else {
                    eprintln!("WARN: update before partial for table {} ignored", msg.table);
                    return Ok(());
                };
                for incoming in &msg.data {
                    let Some(idx) = table.find(incoming) else {
                        // Legitimate: the update can race its insert.
                        eprintln!(
                            "WARN: update for unknown row in table {} ignored",
                            msg.table
                        );
                        continue;
                    };
                    if is_orders {
                        let prev_cum = row_f64(&table.rows()[idx], "cumQty").unwrap_or(0.0);
                        let canceled = row_str(incoming, "ordStatus")
                            .map(|s| s.eq_ignore_ascii_case("Canceled"))
                            .unwrap_or(false);
                        table.merge_at(idx, incoming.clone());
                        let merged = &table.rows()[idx];
                        let new_cum = row_f64(merged, "cumQty").unwrap_or(prev_cum);
                        if !canceled && (new_cum - prev_cum).abs() > QTY_EPS {
                            if let Some(metrics) = &self.metrics {
                                metrics.inc_fill();
                            }
                        }
                        let leaves = row_f64(merged, "leavesQty").or_else(|| {
                            Some(row_f64(merged, "orderQty")? - row_f64(merged, "cumQty")?)
                        });
                        let done = matches!(leaves, Some(left) if left < QTY_EPS);
                        if canceled || done {
                            table.remove_at(idx);
                        }
                    } else {
                        table.merge_at(idx, incoming.clone());
                    }
                }
                Ok(())
            }
            TableAction::Delete => {
                let Some(table) = self.tables.get_mut(&msg.table) else {
                    return Err(SyncError::DeleteMiss {
                        table: msg.table.clone(),
                    });
                };
                let mut missed = false;
                for incoming in &msg.data {
                    match table.find(incoming) {
                        Some(idx) => {
                            table.remove_at(idx);
                        }
                        None => missed = true,
                    }
                }
                if missed {
                    return Err(SyncError::DeleteMiss {
                        table: msg.table.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    fn apply_ladder(&mut self, msg: &TableMessage) -> Result<(), SyncError> {
        match msg.action {
            TableAction::Partial => {
                self.ladders.clear();
                self.desynced.clear();
                for row in &msg.data {
                    self.insert_ladder_row(row)?;
                }
            }
            TableAction::Insert => {
                for row in &msg.data {
                    self.insert_ladder_row(row)?;
                }
            }
            TableAction::Update => {
                for row in &msg.data {
                    let (symbol, id, side) = ladder_identity(row)?;
                    let found = self
                        .ladders
                        .get_mut(symbol)
                        .map(|ladder| {
                            ladder.update(side, id, row_f64(row, "price"), row_f64(row, "size"))
                        })
                        .unwrap_or(false);
                    if !found {
                        eprintln!(
                            "WARN: ladder update for unknown level {}/{} ignored",
                            symbol, id
                        );
                    }
                }
            }
            TableAction::Delete => {
                let mut missed = false;
                for row in &msg.data {
                    let (symbol, id, side) = ladder_identity(row)?;
                    let found = self
                        .ladders
                        .get_mut(symbol)
                        .map(|ladder| ladder.delete(side, id))
                        .unwrap_or(false);
                    if !found {
                        missed = true;
                    }
                }
                if missed {
                    return Err(SyncError::DeleteMiss {
                        table: msg.table.clone(),
                    });
                }
            }
        }
        if let Some(expected) = msg.checksum {
            let mut symbols: Vec<String> = msg
                .data
                .iter()
                .filter_map(|row| row_str(row, "symbol").map(str::to_string))
                .collect();
            symbols.sort();
            symbols.dedup();
            for symbol in symbols {
                self.validate_checksum(&symbol, expected);
            }
        }
        Ok(())
    }

    fn insert_ladder_row(&mut self, row: &Row) -> Result<(), SyncError> {
        let (symbol, id, side) = ladder_identity(row)?;
        let price = row_f64(row, "price").ok_or(SyncError::BadRow {
            table: TABLE_ORDER_BOOK.to_string(),
            field: "price",
        })?;
        let size = row_f64(row, "size").ok_or(SyncError::BadRow {
            table: TABLE_ORDER_BOOK.to_string(),
            field: "size",
        })?;
        self.ladders
            .entry(symbol.to_string())
            .or_default()
            .insert(side, PriceLevel { id, price, size });
        Ok(())
    }

    fn cap_for(&self, table: &str) -> Option<usize> {
        // Quote ticks and the trade feed are high-churn and
        // non-authoritative; everything else must keep full state.
        match table {
            TABLE_QUOTE => Some(self.quote_cap),
            TABLE_TRADE => Some(self.trade_cap),
            _ => None,
        }
    }

    pub fn table(&self, name: &str) -> Option<&MirrorTable> {
        self.tables.get(name)
    }

    pub fn ladder(&self, symbol: &str) -> Option<&Ladder> {
        self.ladders.get(symbol)
    }

    pub fn best_bid(&self, symbol: &str) -> Option<PriceLevel> {
        self.ladders.get(symbol).and_then(Ladder::best_bid)
    }

    pub fn best_ask(&self, symbol: &str) -> Option<PriceLevel> {
        self.ladders.get(symbol).and_then(Ladder::best_ask)
    }

    pub fn best_bid_n(&self, symbol: &str, n: usize) -> Vec<PriceLevel> {
        self.ladders
            .get(symbol)
            .map(|ladder| ladder.best_bid_n(n).to_vec())
            .unwrap_or_default()
    }

    pub fn best_ask_n(&self, symbol: &str, n: usize) -> Vec<PriceLevel> {
        self.ladders
            .get(symbol)
            .map(|ladder| ladder.best_ask_n(n).to_vec())
            .unwrap_or_default()
    }

    /// Price of the most recent trade seen for `symbol`.
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        let table = self.tables.get(TABLE_TRADE)?;
        table
            .rows()
            .iter()
            .rev()
            .find(|row| row_str(row, "symbol") == Some(symbol))
            .and_then(|row| row_f64(row, "price"))
    }

    pub fn quote(&self, symbol: &str) -> Option<QuoteMirror> {
        let table = self.tables.get(TABLE_QUOTE)?;
        let row = table
            .rows()
            .iter()
            .rev()
            .find(|row| row_str(row, "symbol") == Some(symbol))?;
        serde_json::from_value(Value::Object(row.clone())).ok()
    }

    pub fn margin(&self) -> Option<MarginMirror> {
        let table = self.tables.get(TABLE_MARGIN)?;
        let row = table.rows().last()?;
        serde_json::from_value(Value::Object(row.clone())).ok()
    }

    pub fn positions(&self) -> Vec<PositionMirror> {
        self.tables
            .get(TABLE_POSITION)
            .map(|table| {
                table
                    .rows()
                    .iter()
                    .filter_map(|row| serde_json::from_value(Value::Object(row.clone())).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn open_orders(&self) -> Vec<OrderMirror> {
        self.tables
            .get(TABLE_ORDER)
            .map(|table| {
                table
                    .rows()
                    .iter()
                    .filter_map(|row| serde_json::from_value(Value::Object(row.clone())).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recompute the ladder checksum for `symbol` and compare it with the
    /// published value. A mismatch marks the symbol desynchronized; it
    /// never raises. A later successful validation (or a fresh partial)
    /// clears the flag.
    pub fn validate_checksum(&mut self, symbol: &str, expected: u32) -> bool {
        let computed = self
            .ladders
            .get(symbol)
            .map(|ladder| ladder.checksum(self.checksum_depth));
        if computed == Some(expected) {
            self.desynced.remove(symbol);
            return true;
        }
        if self.desynced.insert(symbol.to_string()) {
            if let Some(metrics) = &self.metrics {
                metrics.inc_desync();
            }
            eprintln!("WARN: ladder checksum mismatch for {symbol}; mirror flagged desynced");
        }
        false
    }

    pub fn is_desynced(&self, symbol: &str) -> bool {
        self.desynced.contains(symbol)
    }

    /// Drop all mirrored state, e.g. before resubscribing after a
    /// desync or reconnect.
    pub fn reset(&mut self) {
        self.tables.clear();
        self.ladders.clear();
        self.desynced.clear();
    }
}

fn ladder_identity<'a>(row: &'a Row) -> Result<(&'a str, u64, Side), SyncError> {
    let symbol = row_str(row, "symbol").ok_or(SyncError::BadRow {
        table: TABLE_ORDER_BOOK.to_string(),
        field: "symbol",
    })?;
    let id = row.get("id").and_then(Value::as_u64).ok_or(SyncError::BadRow {
        table: TABLE_ORDER_BOOK.to_string(),
        field: "id",
    })?;
    let side = row_str(row, "side")
        .and_then(Side::parse)
        .ok_or(SyncError::BadRow {
            table: TABLE_ORDER_BOOK.to_string(),
            field: "side",
        })?;
    Ok((symbol, id, side))
}

fn row_str<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(Value::as_str)
}

fn row_f64(row: &Row, field: &str) -> Option<f64> {
    row.get(field).and_then(Value::as_f64)
}
