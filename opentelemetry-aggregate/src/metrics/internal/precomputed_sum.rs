use std::collections::HashMap;
use std::sync::Mutex;

use opentelemetry::{Context, KeyValue};

use crate::attributes::{AttributeSet, AttributeSetHasherBuilder};
use crate::metrics::data::{self, MetricData, SumDataPoint};
use crate::metrics::exemplar::ReservoirFactory;
use crate::metrics::Temporality;

use super::aggregate::{collect_into, AggregateTimeInitiator, ComputeAggregation, Measure};
use super::filter::AttributeSetFilter;
use super::value_map::{Aggregator, Measurement, ValueMap};
use super::{AtomicTracker, Number};

/// Holds the last observed total of a cell.
///
/// Observations whose attributes were reduced by the filter share a cell with
/// other observations, so they are summed into `filtered` instead of
/// overwriting each other. `filtered` only covers the current collection
/// cycle.
pub(crate) struct Assign<T>
where
    T: Number,
{
    assigned: T::AtomicTracker,
    filtered: T::AtomicTracker,
}

impl<T> Assign<T>
where
    T: Number,
{
    fn value(&self) -> T {
        self.assigned
            .get_value()
            .wrapping_add(self.filtered.get_and_reset_value())
    }
}

impl<T> Aggregator for Assign<T>
where
    T: Number,
{
    type Config = ();
    /// The observed value and whether the filter dropped any attribute.
    type PreComputedValue = (T, bool);

    fn create(_init: &()) -> Self {
        Self {
            assigned: T::new_atomic_tracker(T::default()),
            filtered: T::new_atomic_tracker(T::default()),
        }
    }

    fn update(&self, _config: &(), (value, filtered): (T, bool)) {
        if filtered {
            self.filtered.add(value)
        } else {
            self.assigned.store(value)
        }
    }
}

/// Summarizes a set of pre-computed sums as their arithmetic sum.
pub(crate) struct PrecomputedSum<T: Number> {
    value_map: ValueMap<Assign<T>, T>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    monotonic: bool,
    reported: Mutex<HashMap<AttributeSet, T, AttributeSetHasherBuilder>>,
}

impl<T: Number> PrecomputedSum<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        monotonic: bool,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        PrecomputedSum {
            value_map: ValueMap::new(temporality, (), reservoir, cardinality_limit),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
            monotonic,
            reported: Mutex::new(HashMap::with_hasher(AttributeSetHasherBuilder)),
        }
    }

    /// The delta between two reported totals.
    ///
    /// A monotonic total that went down was reset by its source, so the new
    /// total is the whole change.
    fn change(&self, prev: T, curr: T) -> T {
        if self.monotonic && curr < prev {
            curr
        } else {
            curr.wrapping_sub(prev)
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

                let mut reported = self.reported.lock().unwrap_or_else(|err| err.into_inner());
                let mut new_reported = HashMap::with_hasher(AttributeSetHasherBuilder);

                self.value_map
                    .collect_and_reset(&mut s_data.data_points, |attributes, cell| {
                        let prev_value = reported.get(&attributes).copied().unwrap_or_default();
                        let curr_value = cell.aggregator.value();
                        let point = SumDataPoint {
                            attributes: attributes.to_vec(),
                            value: self.change(prev_value, curr_value),
                            exemplars: cell.exemplars(),
                        };
                        new_reported.insert(attributes, curr_value);
                        point
                    });

                *reported = new_reported;
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
                            value: cell.aggregator.value(),
                            exemplars: cell.exemplars(),
                        }
                    });
                s_data.data_points.len()
            },
        )
    }
}

impl<T> Measure<T> for PrecomputedSum<T>
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
        self.value_map
            .measure(&m, attrs, (measurement, !dropped.is_empty()))
    }
}

impl<T> ComputeAggregation<T> for PrecomputedSum<T>
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
