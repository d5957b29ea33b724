/*
    Runs the Sum hot path while a dedicated thread collects as fast as it can,
    so measurements keep racing the hot/cold swap.

    Run with:
    cargo run --release --bin metrics_collect [delta|cumulative]
*/

use lazy_static::lazy_static;
use num_format::{Locale, ToFormattedString};
use opentelemetry::{Context, KeyValue};
use opentelemetry_aggregate::metrics::data::MetricData;
use opentelemetry_aggregate::metrics::{AggregateBuilder, AggregateFns, Temporality};
use rand::{
    rngs::{self},
    Rng, SeedableRng,
};
use std::cell::RefCell;
use std::env;
use std::thread;
use std::time::{Duration, Instant};

mod throughput;

lazy_static! {
    static ref ATTRIBUTE_VALUES: [&'static str; 10] = [
        "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
        "value10"
    ];
    static ref TEMPORALITY: Temporality = match env::args().nth(1).as_deref() {
        Some("cumulative") => Temporality::Cumulative,
        _ => Temporality::Delta,
    };
    static ref SUM: AggregateFns<u64> = AggregateBuilder::new(*TEMPORALITY).sum(true);
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn main() {
    println!("Temporality: {:?}", *TEMPORALITY);

    thread::spawn(|| {
        let mut dest: Option<MetricData<u64>> = None;
        let mut collections: u64 = 0;
        let mut window = Instant::now();
        while !throughput::stopped() {
            let (_, fresh) = SUM.collect.call(dest.as_mut());
            if fresh.is_some() {
                dest = fresh;
            }
            collections += 1;

            if window.elapsed() >= Duration::from_secs(5) {
                println!(
                    "Collections: {} in the last 5s",
                    collections.to_formatted_string(&Locale::en)
                );
                collections = 0;
                window = Instant::now();
            }
        }
    });

    throughput::test_throughput(test_counter);
}

fn test_counter() {
    let len = ATTRIBUTE_VALUES.len();
    let rands = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        [rng.random_range(0..len), rng.random_range(0..len)]
    });

    SUM.measure.call(
        &Context::new(),
        1,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
        ],
    );
}
