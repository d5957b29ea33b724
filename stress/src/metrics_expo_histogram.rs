/*
    Measures recording into a base2 exponential histogram. Values span several
    orders of magnitude so buckets keep being downscaled early on.

    Run with:
    cargo run --release --bin metrics_expo_histogram
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
    static ref HISTOGRAM: AggregateFns<f64> = AggregateBuilder::new(Temporality::Cumulative)
        .exponential_bucket_histogram(160, 20, true, true);
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn main() {
    throughput::test_throughput(test_expo_histogram);
}

fn test_expo_histogram() {
    let len = ATTRIBUTE_VALUES.len();
    let (rands, value) = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        (
            [rng.random_range(0..len), rng.random_range(0..len)],
            rng.random_range(-3.0..6.0f64).exp2() * 1.5,
        )
    });

    HISTOGRAM.measure.call(
        &Context::new(),
        value,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
        ],
    );
}
