use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{Context, KeyValue};

use crate::metrics::data::{self, HistogramDataPoint, MetricData};
use crate::metrics::exemplar::ReservoirFactory;
use crate::metrics::Temporality;

use super::aggregate::{collect_into, AggregateTimeInitiator, ComputeAggregation, Measure};
use super::filter::AttributeSetFilter;
use super::value_map::{Aggregator, Measurement, ValueMap};
use super::{AtomicTracker, Number};

/// Lock free bucket counts of one histogram cell.
///
/// There is no separate total count: it is derived from the bucket counts at
/// collection so the two always agree, even while measurements race with a
/// cumulative collection.
pub(crate) struct Buckets<T>
where
    T: Number,
{
    counts: Box<[AtomicU64]>,
    total: T::AtomicTracker,
    min: T::AtomicTracker,
    max: T::AtomicTracker,
}

/// Which optional statistics a histogram tracks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HistogramConfig {
    pub(crate) buckets_count: usize,
    pub(crate) record_min_max: bool,
    pub(crate) record_sum: bool,
}

impl<T> Aggregator for Buckets<T>
where
    T: Number,
{
    type Config = HistogramConfig;
    /// Value and bucket index
    type PreComputedValue = (T, usize);

    fn create(config: &HistogramConfig) -> Self {
        Buckets {
            counts: (0..config.buckets_count).map(|_| AtomicU64::new(0)).collect(),
            total: T::new_atomic_tracker(T::default()),
            min: T::new_atomic_tracker(T::max()),
            max: T::new_atomic_tracker(T::min()),
        }
    }

    fn update(&self, config: &HistogramConfig, (value, index): (T, usize)) {
        if let Some(count) = self.counts.get(index) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        if config.record_sum {
            self.total.add(value);
        }
        if config.record_min_max {
            self.min.update_min(value);
            self.max.update_max(value);
        }
    }
}

impl<T> Buckets<T>
where
    T: Number,
{
    fn data_point(
        &self,
        config: &HistogramConfig,
        attributes: Vec<KeyValue>,
        bounds: &[f64],
        exemplars: Vec<data::Exemplar<T>>,
    ) -> HistogramDataPoint<T> {
        let bucket_counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let count = bucket_counts.iter().sum();
        let (min, max) = if config.record_min_max && count > 0 {
            (Some(self.min.get_value()), Some(self.max.get_value()))
        } else {
            (None, None)
        };

        HistogramDataPoint {
            attributes,
            count,
            bounds: bounds.to_vec(),
            bucket_counts,
            min,
            max,
            sum: if config.record_sum {
                self.total.get_value()
            } else {
                T::default()
            },
            exemplars,
        }
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
pub(crate) struct Histogram<T: Number> {
    value_map: ValueMap<Buckets<T>, T>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    bounds: Vec<f64>,
}

impl<T: Number> Histogram<T> {
    /// `bounds` are copied, NaN bounds are dropped and the rest sorted
    /// ascending.
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        mut bounds: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        bounds.retain(|v| !v.is_nan());
        bounds.sort_by(|a, b| a.total_cmp(b));
        let config = HistogramConfig {
            buckets_count: bounds.len() + 1,
            record_min_max,
            record_sum,
        };

        Histogram {
            value_map: ValueMap::new(temporality, config, reservoir, cardinality_limit),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
            bounds,
        }
    }

    pub(crate) fn delta(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.delta();
        collect_into(
            dest,
            || data::Histogram {
                data_points: vec![],
                start_time: time.start,
                time: time.current,
                temporality: Temporality::Delta,
            },
            |h| {
                h.start_time = time.start;
                h.time = time.current;
                h.temporality = Temporality::Delta;

                let config = self.value_map.config();
                self.value_map
                    .collect_and_reset(&mut h.data_points, |attributes, cell| {
                        cell.aggregator.data_point(
                            config,
                            attributes.to_vec(),
                            &self.bounds,
                            cell.exemplars(),
                        )
                    });
                h.data_points.len()
            },
        )
    }

    pub(crate) fn cumulative(
        &self,
        dest: Option<&mut MetricData<T>>,
    ) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.cumulative();
        collect_into(
            dest,
            || data::Histogram {
                data_points: vec![],
                start_time: time.start,
                time: time.current,
                temporality: Temporality::Cumulative,
            },
            |h| {
                h.start_time = time.start;
                h.time = time.current;
                h.temporality = Temporality::Cumulative;

                let config = self.value_map.config();
                self.value_map
                    .collect_readonly(&mut h.data_points, |attributes, cell| {
                        cell.aggregator.data_point(
                            config,
                            attributes.to_vec(),
                            &self.bounds,
                            cell.exemplars(),
                        )
                    });
                h.data_points.len()
            },
        )
    }
}

impl<T> Measure<T> for Histogram<T>
where
    T: Number,
{
    fn call(&self, cx: &Context, measurement: T, attrs: &[KeyValue]) {
        let f = measurement.into_float();
        // Ignore NaN and infinity.
        if !f.is_finite() {
            return;
        }

        // This search will return an index in the range `[0, bounds.len()]`, where
        // it will return `bounds.len()` if value is greater than the last element
        // of `bounds`. This aligns with the buckets in that the length of buckets
        // is `bounds.len()+1`, with the last bucket representing:
        // `(bounds[bounds.len()-1], +∞)`.
        let index = self.bounds.partition_point(|&x| x < f);

        let (attrs, dropped) = self.filter.apply(attrs);
        let m = Measurement {
            cx,
            value: measurement,
            dropped: &dropped,
        };
        self.value_map.measure(&m, attrs, (measurement, index))
    }
}

impl<T> ComputeAggregation<T> for Histogram<T>
where
    T: Number,
{
    fn call(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        match self.temporality {
            Temporality::Delta => self.delta(dest),
            _ => self.cumulative(dest),
        }
    }
}
