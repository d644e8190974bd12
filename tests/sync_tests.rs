//! Model-equivalence and protocol-behavior tests for the table
//! synchronization engine.

use serde_json::{json, Map, Value};

use perpetua::sync::{
    Row, SyncError, TableAction, TableMessage, TableSynchronizer, TABLE_ORDER, TABLE_ORDER_BOOK,
    TABLE_POSITION, TABLE_TRADE,
};
use perpetua::Settings;

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object row")
}

fn msg(table: &str, action: TableAction, data: Vec<Value>) -> TableMessage {
    TableMessage {
        table: table.to_string(),
        action,
        data: data.into_iter().map(row).collect(),
        keys: None,
        checksum: None,
    }
}

fn msg_with_keys(table: &str, keys: &[&str], data: Vec<Value>) -> TableMessage {
    TableMessage {
        keys: Some(keys.iter().map(|k| k.to_string()).collect()),
        ..msg(table, TableAction::Partial, data)
    }
}

/// Straight-line reference model: a vector of rows mutated the way the
/// protocol describes, with no caps and no specialization.
struct ReferenceTable {
    keys: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl ReferenceTable {
    fn apply(&mut self, action: TableAction, data: &[Row]) {
        match action {
            TableAction::Partial => self.rows = data.to_vec(),
            TableAction::Insert => self.rows.extend(data.iter().cloned()),
            TableAction::Update => {
                for incoming in data {
                    if let Some(target) = self.rows.iter_mut().find(|r| {
                        self.keys.iter().all(|k| r.get(k) == incoming.get(k))
                    }) {
                        for (k, v) in incoming {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            TableAction::Delete => {
                for incoming in data {
                    if let Some(idx) = self.rows.iter().position(|r| {
                        self.keys.iter().all(|k| r.get(k) == incoming.get(k))
                    }) {
                        self.rows.remove(idx);
                    }
                }
            }
        }
    }
}

fn canonical(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = rows
        .iter()
        .map(|r| serde_json::to_string(&Value::Object(r.clone())).unwrap())
        .collect();
    out.sort();
    out
}

#[test]
fn replay_matches_reference_model() {
    // Position table keyed on two fields so key matching is exercised
    // beyond a single id.
    let events: Vec<(TableAction, Vec<Value>)> = vec![
        (
            TableAction::Partial,
            vec![
                json!({"account": 1, "symbol": "XBTUSD", "currentQty": 10.0, "avgEntryPrice": 100.0}),
                json!({"account": 1, "symbol": "ETHUSD", "currentQty": -5.0, "avgEntryPrice": 20.0}),
            ],
        ),
        (
            TableAction::Insert,
            vec![json!({"account": 2, "symbol": "XBTUSD", "currentQty": 1.0, "avgEntryPrice": 101.0})],
        ),
        (
            TableAction::Update,
            vec![json!({"account": 1, "symbol": "XBTUSD", "currentQty": 25.0})],
        ),
        (
            TableAction::Update,
            vec![json!({"account": 9, "symbol": "XBTUSD", "currentQty": 3.0})],
        ),
        (
            TableAction::Delete,
            vec![json!({"account": 1, "symbol": "ETHUSD"})],
        ),
        (
            TableAction::Insert,
            vec![json!({"account": 3, "symbol": "SOLUSD", "currentQty": 7.0, "avgEntryPrice": 5.5})],
        ),
        (
            TableAction::Update,
            vec![json!({"account": 3, "symbol": "SOLUSD", "avgEntryPrice": 5.75})],
        ),
    ];

    let mut sync = TableSynchronizer::new(&Settings::default());
    let keys = vec!["account".to_string(), "symbol".to_string()];
    let mut reference = ReferenceTable {
        keys: keys.clone(),
        rows: Vec::new(),
    };

    for (i, (action, data)) in events.iter().enumerate() {
        let message = if i == 0 {
            msg_with_keys(TABLE_POSITION, &["account", "symbol"], data.clone())
        } else {
            msg(TABLE_POSITION, *action, data.clone())
        };
        let rows: Vec<Row> = data.iter().map(|v| row(v.clone())).collect();
        // Both sides see the same stream; the mirror must end up with the
        // same row set as the reference model.
        let _ = sync.apply(&message);
        reference.apply(*action, &rows);
    }

    let mirrored = sync.table(TABLE_POSITION).expect("table exists");
    assert_eq!(canonical(mirrored.rows()), canonical(&reference.rows));
    assert_eq!(mirrored.keys(), keys.as_slice());
}

#[test]
fn capped_trade_mirror_drops_oldest_half() {
    let settings = Settings {
        trade_cap: 10,
        ..Settings::default()
    };
    let mut sync = TableSynchronizer::new(&settings);
    sync.apply(&msg(TABLE_TRADE, TableAction::Partial, vec![]))
        .unwrap();
    for i in 0..11 {
        sync.apply(&msg(
            TABLE_TRADE,
            TableAction::Insert,
            vec![json!({"symbol": "XBTUSD", "price": 100.0 + i as f64, "size": 1.0})],
        ))
        .unwrap();
    }
    let table = sync.table(TABLE_TRADE).unwrap();
    assert_eq!(table.len(), 6);
    // The newest trade survives truncation and still drives last price.
    assert_eq!(sync.last_price("XBTUSD"), Some(110.0));
}

#[test]
fn order_mirror_is_never_truncated() {
    let mut sync = TableSynchronizer::new(&Settings {
        trade_cap: 10,
        quote_cap: 10,
        ..Settings::default()
    });
    sync.apply(&msg_with_keys(TABLE_ORDER, &["orderID"], vec![]))
        .unwrap();
    for i in 0..500 {
        sync.apply(&msg(
            TABLE_ORDER,
            TableAction::Insert,
            vec![json!({
                "orderID": format!("o-{i}"),
                "symbol": "XBTUSD",
                "orderQty": 1.0,
                "cumQty": 0.0,
                "leavesQty": 1.0,
            })],
        ))
        .unwrap();
    }
    assert_eq!(sync.open_orders().len(), 500);
}

#[test]
fn fill_update_without_cancel_marker_removes_done_orders() {
    let mut sync = TableSynchronizer::new(&Settings::default());
    sync.apply(&msg_with_keys(
        TABLE_ORDER,
        &["orderID"],
        vec![json!({
            "orderID": "o-1",
            "symbol": "XBTUSD",
            "orderQty": 100.0,
            "cumQty": 0.0,
            "leavesQty": 100.0,
        })],
    ))
    .unwrap();

    sync.apply(&msg(
        TABLE_ORDER,
        TableAction::Update,
        vec![json!({"orderID": "o-1", "cumQty": 30.0, "leavesQty": 70.0})],
    ))
    .unwrap();
    assert_eq!(sync.open_orders()[0].cum_qty, 30.0);

    sync.apply(&msg(
        TABLE_ORDER,
        TableAction::Update,
        vec![json!({"orderID": "o-1", "cumQty": 100.0, "leavesQty": 0.0})],
    ))
    .unwrap();
    assert!(sync.open_orders().is_empty());
}

#[test]
fn update_before_insert_is_tolerated_delete_miss_is_not() {
    let mut sync = TableSynchronizer::new(&Settings::default());
    sync.apply(&msg_with_keys(TABLE_ORDER, &["orderID"], vec![]))
        .unwrap();

    let early_update = msg(
        TABLE_ORDER,
        TableAction::Update,
        vec![json!({"orderID": "o-raced", "cumQty": 5.0})],
    );
    assert!(sync.apply(&early_update).is_ok());

    let bad_delete = msg(
        TABLE_ORDER,
        TableAction::Delete,
        vec![json!({"orderID": "o-raced"})],
    );
    assert_eq!(
        sync.apply(&bad_delete),
        Err(SyncError::DeleteMiss {
            table: TABLE_ORDER.to_string()
        })
    );
}

#[test]
fn ladder_best_queries_and_checksum_roundtrip() {
    let mut sync = TableSynchronizer::new(&Settings::default());
    sync.apply(&msg(
        TABLE_ORDER_BOOK,
        TableAction::Partial,
        vec![
            json!({"symbol": "XBTUSD", "id": 1, "side": "Buy", "price": 100.0, "size": 2.0}),
            json!({"symbol": "XBTUSD", "id": 2, "side": "Buy", "price": 99.5, "size": 1.0}),
            json!({"symbol": "XBTUSD", "id": 3, "side": "Sell", "price": 100.5, "size": 3.0}),
            json!({"symbol": "XBTUSD", "id": 4, "side": "Sell", "price": 101.0, "size": 1.0}),
        ],
    ))
    .unwrap();

    assert_eq!(sync.best_bid("XBTUSD").unwrap().price, 100.0);
    assert_eq!(sync.best_ask("XBTUSD").unwrap().price, 100.5);
    let bids: Vec<f64> = sync
        .best_bid_n("XBTUSD", 2)
        .iter()
        .map(|l| l.price)
        .collect();
    assert_eq!(bids, vec![100.0, 99.5]);

    // Known checksum over the top two levels per side.
    let ladder = sync.ladder("XBTUSD").unwrap();
    assert_eq!(ladder.checksum(2), 1460079683);

    // Checksums arriving with delta frames validate in place.
    let mut delta = msg(
        TABLE_ORDER_BOOK,
        TableAction::Update,
        vec![json!({"symbol": "XBTUSD", "id": 4, "side": "Sell", "size": 1.0})],
    );
    delta.checksum = Some(1460079683);
    sync.apply(&delta).unwrap();
    assert!(!sync.is_desynced("XBTUSD"));

    // A one-tick move must break the published checksum and flag the
    // symbol without raising.
    let mut delta = msg(
        TABLE_ORDER_BOOK,
        TableAction::Update,
        vec![json!({"symbol": "XBTUSD", "id": 4, "side": "Sell", "price": 101.5})],
    );
    delta.checksum = Some(1460079683);
    sync.apply(&delta).unwrap();
    assert!(sync.is_desynced("XBTUSD"));
    assert_eq!(sync.ladder("XBTUSD").unwrap().checksum(2), 1061069634);
}

#[test]
fn quote_mirror_tracks_the_latest_tick() {
    use perpetua::sync::TABLE_QUOTE;

    let mut sync = TableSynchronizer::new(&Settings::default());
    sync.apply(&msg(TABLE_QUOTE, TableAction::Partial, vec![]))
        .unwrap();
    sync.apply(&msg(
        TABLE_QUOTE,
        TableAction::Insert,
        vec![
            json!({"symbol": "XBTUSD", "bidPrice": 99.5, "askPrice": 100.0}),
            json!({"symbol": "XBTUSD", "bidPrice": 99.0, "askPrice": 99.5}),
        ],
    ))
    .unwrap();
    let quote = sync.quote("XBTUSD").unwrap();
    assert_eq!(quote.bid_price, Some(99.0));
    assert_eq!(quote.ask_price, Some(99.5));
    assert!(sync.quote("ETHUSD").is_none());
}

#[test]
fn reset_clears_everything_for_resubscribe() {
    let mut sync = TableSynchronizer::new(&Settings::default());
    sync.apply(&msg(
        TABLE_ORDER_BOOK,
        TableAction::Partial,
        vec![json!({"symbol": "XBTUSD", "id": 1, "side": "Buy", "price": 100.0, "size": 2.0})],
    ))
    .unwrap();
    sync.validate_checksum("XBTUSD", 1);
    assert!(sync.is_desynced("XBTUSD"));
    sync.reset();
    assert!(!sync.is_desynced("XBTUSD"));
    assert!(sync.best_bid("XBTUSD").is_none());
}
