use std::sync::{Arc, Mutex};
use std::thread;

use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::{Context, KeyValue};
use opentelemetry_aggregate::metrics::data::{
    ExponentialHistogram, Histogram, HistogramDataPoint, MetricData, Sum,
};
use opentelemetry_aggregate::metrics::exemplar::{ExemplarFilter, OTEL_METRICS_EXEMPLAR_FILTER};
use opentelemetry_aggregate::metrics::{
    AggregateBuilder, AggregateFns, Aggregation, InstrumentKind, Temporality,
};
use opentelemetry_aggregate::{AggregationError, ErrorHandler};
use rstest::rstest;

fn sum_of(fns: &AggregateFns<u64>) -> Sum<u64> {
    match fns.collect.call(None) {
        (_, Some(MetricData::Sum(sum))) => sum,
        other => panic!("expected a sum, got {other:?}"),
    }
}

fn histogram_of(fns: &AggregateFns<f64>) -> Histogram<f64> {
    match fns.collect.call(None) {
        (_, Some(MetricData::Histogram(hist))) => hist,
        other => panic!("expected a histogram, got {other:?}"),
    }
}

fn expo_histogram_of(fns: &AggregateFns<f64>) -> ExponentialHistogram<f64> {
    match fns.collect.call(None) {
        (_, Some(MetricData::ExponentialHistogram(hist))) => hist,
        other => panic!("expected an exponential histogram, got {other:?}"),
    }
}

fn point_for<'a>(
    points: &'a [HistogramDataPoint<f64>],
    attr: &KeyValue,
) -> &'a HistogramDataPoint<f64> {
    points
        .iter()
        .find(|dp| dp.attributes.contains(attr))
        .unwrap_or_else(|| panic!("no data point with {attr:?}"))
}

fn sampled_context() -> Context {
    Context::new().with_remote_span_context(SpanContext::new(
        TraceId::from_bytes([7; 16]),
        SpanId::from_bytes([9; 8]),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    ))
}

#[derive(Debug, Default)]
struct RecordingHandler {
    errors: Mutex<Vec<String>>,
}

impl ErrorHandler for RecordingHandler {
    fn handle(&self, err: AggregationError) {
        self.errors.lock().unwrap().push(err.to_string());
    }
}

#[test]
fn concurrent_counter_adds_are_not_lost() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Cumulative).sum(true);
    let attrs = [KeyValue::new("service", "checkout")];

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let cx = Context::new();
                for _ in 0..10_000 {
                    fns.measure.call(&cx, 1, &attrs);
                }
            });
        }
    });

    let sum = sum_of(&fns);
    assert_eq!(sum.data_points.len(), 1);
    assert_eq!(sum.data_points[0].value, 80_000);
    assert!(sum.is_monotonic);
}

#[test]
fn concurrent_measure_and_delta_collect_lose_nothing() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta).sum(true);
    let collected = Mutex::new(0u64);

    thread::scope(|s| {
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let fns = &fns;
                s.spawn(move || {
                    let cx = Context::new();
                    let attrs = [KeyValue::new("worker", i as i64)];
                    for _ in 0..20_000 {
                        fns.measure.call(&cx, 1, &attrs);
                    }
                })
            })
            .collect();

        let collected = &collected;
        let fns = &fns;
        s.spawn(move || {
            while writers.iter().any(|w| !w.is_finished()) {
                let total: u64 = sum_of(fns).data_points.iter().map(|dp| dp.value).sum();
                *collected.lock().unwrap() += total;
                thread::yield_now();
            }
        });
    });

    let rest: u64 = sum_of(&fns).data_points.iter().map(|dp| dp.value).sum();
    assert_eq!(*collected.lock().unwrap() + rest, 80_000);
}

#[test]
fn second_delta_collection_is_empty() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta).sum(true);
    fns.measure
        .call(&Context::new(), 5, &[KeyValue::new("a", "b")]);

    let (count, _) = fns.collect.call(None);
    assert_eq!(count, 1);

    let (count, data) = fns.collect.call(None);
    assert_eq!(count, 0);
    assert!(data.is_some_and(|d| d.is_empty()));
}

#[test]
fn cumulative_sum_never_decreases() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Cumulative).sum(true);
    let attrs = [KeyValue::new("a", "b")];
    let cx = Context::new();

    let mut previous = 0;
    for step in 1..=5 {
        fns.measure.call(&cx, step, &attrs);
        let value = sum_of(&fns).data_points[0].value;
        assert!(value >= previous);
        previous = value;
    }
    assert_eq!(previous, 15);
}

#[test]
fn collect_reuses_previous_snapshot() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta).sum(false);
    let cx = Context::new();
    fns.measure.call(&cx, 1, &[KeyValue::new("a", 1)]);
    fns.measure.call(&cx, 1, &[KeyValue::new("a", 2)]);

    let (_, data) = fns.collect.call(None);
    let mut data = data.expect("first collection creates a snapshot");
    assert_eq!(data.len(), 2);

    fns.measure.call(&cx, 4, &[KeyValue::new("a", 3)]);
    let (count, fresh) = fns.collect.call(Some(&mut data));
    assert_eq!(count, 1);
    assert!(fresh.is_none());
    let MetricData::Sum(sum) = data else {
        panic!("snapshot changed kind");
    };
    assert_eq!(sum.data_points.len(), 1);
    assert_eq!(sum.data_points[0].value, 4);
    assert!(!sum.is_monotonic);
}

#[test]
fn delta_histogram_per_attribute_set() {
    let fns = AggregateBuilder::<f64>::new(Temporality::Delta)
        .explicit_bucket_histogram(vec![1.0, 5.0], true, true);
    let cx = Context::new();
    let alice = KeyValue::new("user", "alice");
    let bob = KeyValue::new("user", "bob");

    for _ in 0..3 {
        fns.measure.call(&cx, 2.0, &[alice.clone()]);
    }
    for _ in 0..2 {
        fns.measure.call(&cx, 10.0, &[bob.clone()]);
    }

    let hist = histogram_of(&fns);
    assert_eq!(hist.temporality, Temporality::Delta);
    assert_eq!(hist.data_points.len(), 2);

    let a = point_for(&hist.data_points, &alice);
    assert_eq!(a.count, 3);
    assert_eq!(a.bucket_counts, vec![0, 3, 0]);
    assert_eq!(a.sum, 6.0);
    assert_eq!((a.min, a.max), (Some(2.0), Some(2.0)));

    let b = point_for(&hist.data_points, &bob);
    assert_eq!(b.count, 2);
    assert_eq!(b.bucket_counts, vec![0, 0, 2]);
    assert_eq!(b.sum, 20.0);

    let (count, _) = fns.collect.call(None);
    assert_eq!(count, 0);
}

#[test]
fn histogram_count_matches_buckets_under_contention() {
    let fns = AggregateBuilder::<f64>::new(Temporality::Cumulative)
        .explicit_bucket_histogram(vec![0.0, 10.0, 100.0], true, true);

    thread::scope(|s| {
        for t in 0..4 {
            let fns = &fns;
            s.spawn(move || {
                let cx = Context::new();
                for i in 0..5_000 {
                    fns.measure.call(&cx, ((i * (t + 1)) % 250) as f64, &[]);
                }
            });
        }
        let fns = &fns;
        s.spawn(move || {
            for _ in 0..50 {
                for dp in histogram_of(fns).data_points {
                    assert_eq!(dp.count, dp.bucket_counts.iter().sum::<u64>());
                }
            }
        });
    });

    let hist = histogram_of(&fns);
    assert_eq!(hist.data_points[0].count, 20_000);
}

#[rstest]
#[case::limit_three(3, 10)]
#[case::limit_ten(10, 25)]
fn cardinality_limit_caps_data_points(#[case] limit: usize, #[case] series: i64) {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta)
        .with_cardinality_limit(limit)
        .sum(true);
    let cx = Context::new();
    for i in 0..series {
        fns.measure.call(&cx, 1, &[KeyValue::new("id", i)]);
    }

    let sum = sum_of(&fns);
    assert_eq!(sum.data_points.len(), limit);
    let overflow = KeyValue::new("otel.metric.overflow", true);
    let overflowed: Vec<_> = sum
        .data_points
        .iter()
        .filter(|dp| dp.attributes == vec![overflow.clone()])
        .collect();
    assert_eq!(overflowed.len(), 1);
    assert_eq!(overflowed[0].value, (series as u64) - (limit as u64 - 1));
    assert_eq!(
        sum.data_points.iter().map(|dp| dp.value).sum::<u64>(),
        series as u64
    );

    // Delta collection frees the slots again.
    fns.measure.call(&cx, 1, &[KeyValue::new("id", series)]);
    let sum = sum_of(&fns);
    assert_eq!(sum.data_points.len(), 1);
    assert_eq!(sum.data_points[0].attributes, vec![KeyValue::new("id", series)]);
}

#[test]
fn exponential_histogram_ignores_non_finite_values() {
    let fns = AggregateBuilder::<f64>::new(Temporality::Cumulative)
        .exponential_bucket_histogram(160, 20, true, true);
    let cx = Context::new();
    for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 4.0, -2.0, 0.0] {
        fns.measure.call(&cx, v, &[]);
    }

    let hist = expo_histogram_of(&fns);
    let dp = &hist.data_points[0];
    assert_eq!(dp.count, 3);
    assert_eq!(dp.zero_count, 1);
    assert_eq!(dp.sum, 2.0);
    assert_eq!(dp.min, Some(-2.0));
    assert_eq!(dp.max, Some(4.0));
    assert_eq!(dp.positive_bucket.counts.iter().sum::<u64>(), 1);
    assert_eq!(dp.negative_bucket.counts.iter().sum::<u64>(), 1);
}

#[test]
fn integer_exponential_histogram_sum_wraps() {
    let fns = AggregateBuilder::<i64>::new(Temporality::Delta)
        .exponential_bucket_histogram(160, 20, true, true);
    let cx = Context::new();
    fns.measure.call(&cx, i64::MAX, &[]);
    fns.measure.call(&cx, i64::MAX, &[]);

    let dp = match fns.collect.call(None) {
        (1, Some(MetricData::ExponentialHistogram(mut hist))) => hist.data_points.remove(0),
        other => panic!("expected one exponential histogram point, got {other:?}"),
    };
    assert_eq!(dp.count, 2);
    assert_eq!(dp.sum, i64::MAX.wrapping_add(i64::MAX));
    assert_eq!(dp.max, Some(i64::MAX));
}

#[test]
fn observed_counter_reset_reports_new_total() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta).precomputed_sum(true);
    let cx = Context::new();
    let attrs = [KeyValue::new("process", "worker")];

    fns.measure.call(&cx, 10, &attrs);
    assert_eq!(sum_of(&fns).data_points[0].value, 10);

    fns.measure.call(&cx, 4, &attrs);
    assert_eq!(sum_of(&fns).data_points[0].value, 4);
}

#[test]
fn exponential_histogram_underflow_reaches_error_handler() {
    let handler = Arc::new(RecordingHandler::default());
    let fns = AggregateBuilder::<f64>::new(Temporality::Cumulative)
        .with_error_handler(handler.clone())
        .exponential_bucket_histogram(1, 20, true, true);
    let cx = Context::new();
    fns.measure.call(&cx, 1.0, &[]);
    fns.measure.call(&cx, f64::MAX, &[]);

    let hist = expo_histogram_of(&fns);
    assert_eq!(hist.data_points[0].count, 1);
    assert_eq!(hist.data_points[0].max, Some(1.0));

    let errors = handler.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("exponential histogram scale underflow"));
}

#[test]
fn exemplars_keep_filtered_attributes_and_span() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta)
        .with_exemplar_filter(ExemplarFilter::TraceBased)
        .with_filter(Arc::new(|kv: &KeyValue| kv.key.as_str() == "user"))
        .sum(true);

    fns.measure.call(
        &sampled_context(),
        3,
        &[KeyValue::new("user", "alice"), KeyValue::new("request_id", 7)],
    );
    fns.measure
        .call(&Context::new(), 4, &[KeyValue::new("user", "alice")]);

    let sum = sum_of(&fns);
    assert_eq!(sum.data_points.len(), 1);
    let dp = &sum.data_points[0];
    assert_eq!(dp.attributes, vec![KeyValue::new("user", "alice")]);
    assert_eq!(dp.value, 7);
    assert_eq!(dp.exemplars.len(), 1);

    let exemplar = &dp.exemplars[0];
    assert_eq!(exemplar.value, 3);
    assert_eq!(
        exemplar.filtered_attributes,
        vec![KeyValue::new("request_id", 7)]
    );
    assert_eq!(exemplar.trace_id, [7; 16]);
    assert_eq!(exemplar.span_id, [9; 8]);
}

#[rstest]
#[case::always_on(Some("always_on"), 1)]
#[case::always_off(Some("always_off"), 0)]
#[case::unset(None, 0)]
fn exemplar_filter_follows_environment(#[case] value: Option<&str>, #[case] expected: usize) {
    temp_env::with_var(OTEL_METRICS_EXEMPLAR_FILTER, value, || {
        let fns = AggregateBuilder::<u64>::new(Temporality::Delta).sum(true);
        fns.measure.call(&Context::new(), 1, &[]);

        let sum = sum_of(&fns);
        assert_eq!(sum.data_points[0].exemplars.len(), expected);
    });
}

#[test]
fn observable_counter_sums_filtered_observations() {
    let fns = AggregateBuilder::<u64>::new(Temporality::Delta)
        .with_filter(Arc::new(|kv: &KeyValue| kv.key.as_str() == "host"))
        .build(&Aggregation::Sum, InstrumentKind::ObservableCounter)
        .expect("sum is valid for observable counters")
        .expect("not dropped");
    let cx = Context::new();
    let observe = |cpu0: u64, cpu1: u64| {
        fns.measure.call(
            &cx,
            cpu0,
            &[KeyValue::new("host", "a"), KeyValue::new("cpu", 0)],
        );
        fns.measure.call(
            &cx,
            cpu1,
            &[KeyValue::new("host", "a"), KeyValue::new("cpu", 1)],
        );
    };

    observe(10, 20);
    assert_eq!(sum_of(&fns).data_points[0].value, 30);

    observe(15, 25);
    assert_eq!(sum_of(&fns).data_points[0].value, 10);
}

#[rstest]
#[case::counter_last_value(Aggregation::LastValue, InstrumentKind::Counter)]
#[case::gauge_sum(Aggregation::Sum, InstrumentKind::Gauge)]
#[case::bad_boundaries(
    Aggregation::ExplicitBucketHistogram { boundaries: vec![1.0, f64::INFINITY], record_min_max: true },
    InstrumentKind::Histogram
)]
#[case::bad_scale(
    Aggregation::Base2ExponentialHistogram { max_size: 160, max_scale: 21, record_min_max: true },
    InstrumentKind::Histogram
)]
fn invalid_aggregations_are_rejected(
    #[case] aggregation: Aggregation,
    #[case] kind: InstrumentKind,
) {
    let result = AggregateBuilder::<f64>::new(Temporality::Cumulative).build(&aggregation, kind);
    assert!(matches!(result, Err(AggregationError::Config(_))));
}

#[test]
fn drop_aggregation_builds_nothing() {
    let result = AggregateBuilder::<f64>::new(Temporality::Delta)
        .build(&Aggregation::Drop, InstrumentKind::Counter)
        .expect("drop is always valid");
    assert!(result.is_none());
}
