// src/event_log.rs
//
// JSONL event log writer/reader for audit and replay.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    OrderSubmitted {
        order_id: String,
        symbol: String,
        quantity: f64,
        price: Option<f64>,
        timestamp_ms: TimestampMs,
    },
    OrderCanceled {
        order_id: String,
        timestamp_ms: TimestampMs,
    },
    Fill {
        trade_id: String,
        order_id: String,
        symbol: String,
        price: f64,
        quantity: f64,
        commission: f64,
        timestamp_ms: TimestampMs,
    },
    Desync {
        symbol: String,
        timestamp_ms: TimestampMs,
    },
}

/// Appends one JSON object per line.
pub struct EventLogWriter {
    writer: BufWriter<File>,
}

impl EventLogWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, event: &LedgerEvent) -> io::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

pub fn read_event_log(path: &Path) -> io::Result<Vec<LedgerEvent>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        events.push(event);
    }
    Ok(events)
}
