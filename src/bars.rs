//! Minute-bar store consumed by the backtest price source.
//!
//! The store is an external collaborator boundary: it is handed fully
//! populated rows and performs no I/O of its own. Series are gap-filled
//! so every minute of an instrument's listed life has a row, with the
//! close carried forward and zero volume/turnover on gaps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

pub const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: TimestampMs,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

impl Bar {
    /// Synthetic bar for a gap minute: flat at the previous close.
    fn carried(timestamp_ms: TimestampMs, close: f64) -> Self {
        Self {
            timestamp_ms,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
            turnover: 0.0,
        }
    }
}

/// One instrument's bars, indexed by minute offset from the first row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    symbol: String,
    start_ms: TimestampMs,
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series from raw rows. Rows are sorted, aligned to minute
    /// boundaries, and gaps are filled with carried-forward closes.
    pub fn from_rows(symbol: impl Into<String>, mut rows: Vec<Bar>) -> Self {
        let symbol = symbol.into();
        rows.sort_by_key(|bar| bar.timestamp_ms);
        let Some(first) = rows.first() else {
            return Self {
                symbol,
                start_ms: 0,
                bars: Vec::new(),
            };
        };
        let start_ms = floor_minute(first.timestamp_ms);
        let mut bars: Vec<Bar> = Vec::with_capacity(rows.len());
        for mut bar in rows {
            bar.timestamp_ms = floor_minute(bar.timestamp_ms);
            let expected = start_ms + bars.len() as i64 * MINUTE_MS;
            if bar.timestamp_ms < expected {
                // Duplicate minute: the later row wins.
                let last = bars.len() - 1;
                bars[last] = bar;
                continue;
            }
            let mut next = expected;
            while next < bar.timestamp_ms {
                let close = bars.last().map(|b| b.close).unwrap_or(bar.open);
                bars.push(Bar::carried(next, close));
                next += MINUTE_MS;
            }
            bars.push(bar);
        }
        Self {
            symbol,
            start_ms,
            bars,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn start_ms(&self) -> TimestampMs {
        self.start_ms
    }

    pub fn end_ms(&self) -> TimestampMs {
        self.start_ms + (self.bars.len() as i64 - 1).max(0) * MINUTE_MS
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bar covering `timestamp_ms`, or `None` outside the series.
    pub fn at(&self, timestamp_ms: TimestampMs) -> Option<&Bar> {
        if timestamp_ms < self.start_ms {
            return None;
        }
        let idx = (timestamp_ms - self.start_ms) / MINUTE_MS;
        self.bars.get(idx as usize)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BarStore {
    series: HashMap<String, BarSeries>,
}

impl BarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: BarSeries) {
        self.series.insert(series.symbol().to_string(), series);
    }

    pub fn series(&self, symbol: &str) -> Option<&BarSeries> {
        self.series.get(symbol)
    }

    pub fn close_at(&self, symbol: &str, timestamp_ms: TimestampMs) -> Option<f64> {
        self.series
            .get(symbol)?
            .at(timestamp_ms)
            .map(|bar| bar.close)
    }
}

fn floor_minute(timestamp_ms: TimestampMs) -> TimestampMs {
    timestamp_ms - timestamp_ms.rem_euclid(MINUTE_MS)
}
