/*
    Keeps producing new attribute sets. Memory must stay bounded by the
    cardinality limit and the overflow warning must show up once per
    collection, not once per measurement.

    Run with:
    cargo run --release --bin metrics_overflow
*/

use lazy_static::lazy_static;
use opentelemetry::{Context, KeyValue};
use opentelemetry_aggregate::metrics::{AggregateBuilder, AggregateFns, Temporality};
use rand::{
    rngs::{self},
    Rng, SeedableRng,
};
use std::cell::RefCell;
use std::thread;
use std::time::Duration;

mod throughput;

lazy_static! {
    static ref SUM: AggregateFns<u64> = AggregateBuilder::new(Temporality::Delta).sum(true);
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    thread::spawn(|| loop {
        thread::sleep(Duration::from_secs(10));
        let (points, _) = SUM.collect.call(None);
        println!("Collected {points} data points");
    });

    throughput::test_throughput(test_counter);
}

fn test_counter() {
    let rand = CURRENT_RNG.with(|rng| rng.borrow_mut().random_range(0..100_000_000i64));
    SUM.measure
        .call(&Context::new(), 1, &[KeyValue::new("A", rand)]);
}
