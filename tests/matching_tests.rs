//! End-to-end matching: submitted orders fill against a price source and
//! settle through the five-case position transitions.

use perpetua::matching::PriceSource;
use perpetua::{
    Account, BarPriceSource, BarSeries, BarStore, Instrument, MatchingScheduler, Order, Settings,
};

struct FixedPrice(f64);

impl PriceSource for FixedPrice {
    fn last_price(&self, _symbol: &str) -> Option<f64> {
        Some(self.0)
    }
}

fn setup() -> (Account, MatchingScheduler) {
    let account = Account::new(&Settings {
        initial_balance: 1_000_000.0,
        default_leverage: 1.0,
        ..Settings::default()
    });
    (account, MatchingScheduler::new())
}

#[test]
fn market_order_fills_fully_at_source_price() {
    let (mut account, mut sched) = setup();
    let spec = Instrument::perpetual("XBTUSD");
    sched
        .submit(&account, Order::market("o-1", spec.clone(), 100.0, 0))
        .unwrap();
    assert_eq!(sched.open_order_count(), 1);

    let fills = sched.match_open_orders(&mut account, &FixedPrice(20.0), 1);

    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, 20.0);
    assert_eq!(fills[0].quantity, 100.0);
    assert_eq!(sched.open_order_count(), 0);

    let pos = account.position("XBTUSD").unwrap();
    assert_eq!(pos.quantity, 100.0);
    assert_eq!(pos.avg_open_price, 20.0);
}

#[test]
fn opposite_fill_walks_the_transition_table() {
    let (mut account, mut sched) = setup();
    let spec = Instrument::perpetual("XBTUSD");

    sched
        .submit(&account, Order::market("o-1", spec.clone(), 100.0, 0))
        .unwrap();
    sched.match_open_orders(&mut account, &FixedPrice(10.0), 1);

    // Flip through zero: +100 @ 10, then -300 @ 11.
    sched
        .submit(&account, Order::market("o-2", spec.clone(), -300.0, 2))
        .unwrap();
    sched.match_open_orders(&mut account, &FixedPrice(11.0), 3);

    let pos = account.position("XBTUSD").unwrap();
    assert_eq!(pos.quantity, -200.0);
    assert_eq!(pos.avg_open_price, 11.0);

    // Exact close of the short.
    sched
        .submit(&account, Order::market("o-3", spec, 200.0, 4))
        .unwrap();
    sched.match_open_orders(&mut account, &FixedPrice(11.0), 5);
    let pos = account.position("XBTUSD").unwrap();
    assert_eq!(pos.quantity, 0.0);
    assert_eq!(pos.avg_open_price, 0.0);
}

#[test]
fn each_fill_gets_a_unique_trade_id() {
    let (mut account, mut sched) = setup();
    let spec = Instrument::perpetual("XBTUSD");
    sched
        .submit(&account, Order::market("a", spec.clone(), 10.0, 0))
        .unwrap();
    sched
        .submit(&account, Order::market("b", spec, -10.0, 0))
        .unwrap();
    let fills = sched.match_open_orders(&mut account, &FixedPrice(10.0), 1);
    assert_eq!(fills.len(), 2);
    assert_ne!(fills[0].trade_id, fills[1].trade_id);
}

#[test]
fn cancel_removes_resting_order_before_it_fills() {
    let (mut account, mut sched) = setup();
    let spec = Instrument::perpetual("XBTUSD");
    sched
        .submit(&account, Order::stop_market("o-1", spec, 10.0, 50.0, 0))
        .unwrap();
    let canceled = sched.cancel("o-1").unwrap();
    assert_eq!(canceled.order_id, "o-1");
    let fills = sched.match_open_orders(&mut account, &FixedPrice(60.0), 1);
    assert!(fills.is_empty());
}

#[test]
fn bar_price_source_reads_the_simulated_clock() {
    let mut store = BarStore::new();
    store.insert(BarSeries::from_rows(
        "XBTUSD",
        vec![
            perpetua::Bar {
                timestamp_ms: 0,
                open: 20.0,
                high: 21.0,
                low: 19.0,
                close: 20.5,
                volume: 10.0,
                turnover: 205.0,
            },
            perpetua::Bar {
                timestamp_ms: perpetua::MINUTE_MS,
                open: 20.5,
                high: 22.0,
                low: 20.0,
                close: 21.5,
                volume: 5.0,
                turnover: 107.5,
            },
        ],
    ));

    let (mut account, mut sched) = setup();
    let spec = Instrument::perpetual("XBTUSD");
    sched
        .submit(&account, Order::market("o-1", spec, 10.0, 0))
        .unwrap();

    let source = BarPriceSource::new(&store, perpetua::MINUTE_MS);
    let fills = sched.match_open_orders(&mut account, &source, perpetua::MINUTE_MS);
    assert_eq!(fills[0].price, 21.5);
}
