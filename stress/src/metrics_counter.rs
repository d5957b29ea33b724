/*
    Measures the hot path of a delta Sum: attribute set lookup under the read
    lock plus one atomic add.

    Run with:
    cargo run --release --bin metrics
*/

use lazy_static::lazy_static;
use opentelemetry::{Context, KeyValue};
use opentelemetry_aggregate::metrics::{AggregateBuilder, AggregateFns, Temporality};
use rand::{
    rngs::{self},
    Rng, SeedableRng,
};
use std::cell::RefCell;

mod throughput;

lazy_static! {
    static ref ATTRIBUTE_VALUES: [&'static str; 10] = [
        "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
        "value10"
    ];
    static ref SUM: AggregateFns<u64> = AggregateBuilder::new(Temporality::Delta).sum(true);
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn main() {
    throughput::test_throughput(test_counter);
}

fn test_counter() {
    let len = ATTRIBUTE_VALUES.len();
    let rands = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        [
            rng.random_range(0..len),
            rng.random_range(0..len),
            rng.random_range(0..len),
        ]
    });

    // each attribute has 10 possible values, so there are 1000 possible combinations (time-series)
    SUM.measure.call(
        &Context::new(),
        1,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
            KeyValue::new("attribute3", ATTRIBUTE_VALUES[rands[2]]),
        ],
    );
}
