use opentelemetry::{Context, KeyValue};

use crate::metrics::data::{self, MetricData, SumDataPoint};
use crate::metrics::exemplar::ReservoirFactory;
use crate::metrics::Temporality;

use super::aggregate::{collect_into, AggregateTimeInitiator, ComputeAggregation, Measure};
use super::filter::AttributeSetFilter;
use super::value_map::{Aggregator, Measurement, ValueMap};
use super::{AtomicTracker, Number};

/// Adds each measurement to the running total of its cell.
pub(crate) struct Increment<T>
where
    T: Number,
{
    pub(crate) value: T::AtomicTracker,
}

impl<T> Aggregator for Increment<T>
where
    T: Number,
{
    type Config = ();
    type PreComputedValue = T;

    fn create(_init: &()) -> Self {
        Self {
            value: T::new_atomic_tracker(T::default()),
        }
    }

    fn update(&self, _config: &(), value: T) {
        self.value.add(value)
    }
}

/// Summarizes a set of measurements made as their arithmetic sum.
pub(crate) struct Sum<T: Number> {
    value_map: ValueMap<Increment<T>, T>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    monotonic: bool,
}

impl<T: Number> Sum<T> {
    /// Returns an aggregator that summarizes a set of measurements as their
    /// arithmetic sum.
    ///
    /// Each sum is scoped by attributes and the aggregation cycle the measurements
    /// were made in.
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        monotonic: bool,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        Sum {
            value_map: ValueMap::new(temporality, (), reservoir, cardinality_limit),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
            monotonic,
        }
    }

    pub(crate) fn delta(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.delta();
        collect_into(
            dest,
            || data::Sum {
                data_points: vec![],
                start_time: time.start,
                time: time.current,
                temporality: Temporality::Delta,
                is_monotonic: self.monotonic,
            },
            |s_data| {
                s_data.start_time = time.start;
                s_data.time = time.current;
                s_data.temporality = Temporality::Delta;
                s_data.is_monotonic = self.monotonic;

                self.value_map
                    .collect_and_reset(&mut s_data.data_points, |attributes, cell| {
                        SumDataPoint {
                            attributes: attributes.to_vec(),
                            value: cell.aggregator.value.get_value(),
                            exemplars: cell.exemplars(),
                        }
                    });
                s_data.data_points.len()
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
            || data::Sum {
                data_points: vec![],
                start_time: time.start,
                time: time.current,
                temporality: Temporality::Cumulative,
                is_monotonic: self.monotonic,
            },
            |s_data| {
                s_data.start_time = time.start;
                s_data.time = time.current;
                s_data.temporality = Temporality::Cumulative;
                s_data.is_monotonic = self.monotonic;

                self.value_map
                    .collect_readonly(&mut s_data.data_points, |attributes, cell| {
                        SumDataPoint {
                            attributes: attributes.to_vec(),
                            value: cell.aggregator.value.get_value(),
                            exemplars: cell.exemplars(),
                        }
                    });
                s_data.data_points.len()
            },
        )
    }
}

impl<T> Measure<T> for Sum<T>
where
    T: Number,
{
    fn call(&self, cx: &Context, measurement: T, attrs: &[KeyValue]) {
        let (attrs, dropped) = self.filter.apply(attrs);
        let m = Measurement {
            cx,
            value: measurement,
            dropped: &dropped,
        };
        self.value_map.measure(&m, attrs, measurement)
    }
}

impl<T> ComputeAggregation<T> for Sum<T>
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
