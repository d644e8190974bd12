//! Flat mirrored table: rows plus the key set announced by its snapshot.

use serde_json::{Map, Value};

/// One streamed row, kept in wire form.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct MirrorTable {
    name: String,
    /// Identity fields announced by the initializing partial; used to
    /// match rows on update/delete.
    keys: Vec<String>,
    rows: Vec<Row>,
    /// High-churn tables are bounded; authoritative tables are not.
    cap: Option<usize>,
}

impl MirrorTable {
    pub fn new(name: impl Into<String>, cap: Option<usize>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            rows: Vec::new(),
            cap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Replace the row set and record the announced key fields.
    pub fn snapshot(&mut self, keys: Vec<String>, rows: Vec<Row>) {
        self.keys = keys;
        self.rows = rows;
    }

    /// Append rows. Once the cap is exceeded the oldest half is dropped;
    /// uncapped tables grow without bound.
    pub fn insert(&mut self, rows: Vec<Row>) {
        self.rows.extend(rows);
        if let Some(cap) = self.cap {
            if self.rows.len() > cap {
                let keep_from = self.rows.len() / 2;
                self.rows.drain(..keep_from);
            }
        }
    }

    /// Index of the row matching `probe` on every announced key field.
    pub fn find(&self, probe: &Row) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        self.rows.iter().position(|row| {
            self.keys
                .iter()
                .all(|key| row.get(key) == probe.get(key))
        })
    }

    /// Merge the incoming fields into the row at `idx`.
    pub fn merge_at(&mut self, idx: usize, incoming: Row) {
        let row = &mut self.rows[idx];
        for (field, value) in incoming {
            row.insert(field, value);
        }
    }

    pub fn remove_at(&mut self, idx: usize) -> Row {
        self.rows.remove(idx)
    }
}
