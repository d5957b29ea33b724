use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::time::now;
use opentelemetry::{Context, KeyValue};

use crate::metrics::data::{self, GaugeDataPoint, MetricData};
use crate::metrics::exemplar::ReservoirFactory;
use crate::metrics::Temporality;

use super::aggregate::{collect_into, AggregateTimeInitiator, ComputeAggregation, Measure};
use super::filter::AttributeSetFilter;
use super::value_map::{Aggregator, Measurement, ValueMap};
use super::{AtomicTracker, Number};

/// The most recent measurement of a cell and when it was made.
pub(crate) struct Assign<T>
where
    T: Number,
{
    value: T::AtomicTracker,
    /// Nanoseconds since the unix epoch.
    recorded_at: AtomicU64,
}

impl<T> Assign<T>
where
    T: Number,
{
    fn recorded_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.recorded_at.load(Ordering::Relaxed))
    }
}

impl<T> Aggregator for Assign<T>
where
    T: Number,
{
    type Config = ();
    type PreComputedValue = T;

    fn create(_init: &()) -> Self {
        Self {
            value: T::new_atomic_tracker(T::default()),
            recorded_at: AtomicU64::new(0),
        }
    }

    fn update(&self, _config: &(), value: T) {
        let nanos = now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        self.value.store(value);
        self.recorded_at.store(nanos, Ordering::Relaxed);
    }
}

/// Summarizes a set of measurements as the last one made.
pub(crate) struct LastValue<T: Number> {
    value_map: ValueMap<Assign<T>, T>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
}

impl<T: Number> LastValue<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        LastValue {
            value_map: ValueMap::new(temporality, (), reservoir, cardinality_limit),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
        }
    }

    pub(crate) fn delta(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.delta();
        collect_into(
            dest,
            || data::Gauge {
                data_points: vec![],
                start_time: Some(time.start),
                time: time.current,
            },
            |gauge| {
                gauge.start_time = Some(time.start);
                gauge.time = time.current;

                self.value_map
                    .collect_and_reset(&mut gauge.data_points, |attributes, cell| {
                        GaugeDataPoint {
                            attributes: attributes.to_vec(),
                            value: cell.aggregator.value.get_value(),
                            time: cell.aggregator.recorded_at(),
                            exemplars: cell.exemplars(),
                        }
                    });
                gauge.data_points.len()
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
            || data::Gauge {
                data_points: vec![],
                start_time: Some(time.start),
                time: time.current,
            },
            |gauge| {
                gauge.start_time = Some(time.start);
                gauge.time = time.current;

                self.value_map
                    .collect_readonly(&mut gauge.data_points, |attributes, cell| {
                        GaugeDataPoint {
                            attributes: attributes.to_vec(),
                            value: cell.aggregator.value.get_value(),
                            time: cell.aggregator.recorded_at(),
                            exemplars: cell.exemplars(),
                        }
                    });
                gauge.data_points.len()
            },
        )
    }
}

impl<T> Measure<T> for LastValue<T>
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

impl<T> ComputeAggregation<T> for LastValue<T>
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opentelemetry::time::now;
    use opentelemetry::{Context, KeyValue};

    use super::LastValue;
    use crate::metrics::data::MetricData;
    use crate::metrics::exemplar::{DropReservoir, ExemplarReservoir};
    use crate::metrics::internal::aggregate::{ComputeAggregation, Measure};
    use crate::metrics::internal::filter::AttributeSetFilter;
    use crate::metrics::Temporality;

    fn last_value(temporality: Temporality) -> LastValue<f64> {
        LastValue::new(
            temporality,
            AttributeSetFilter::default(),
            Arc::new(|| Box::new(DropReservoir) as Box<dyn ExemplarReservoir<f64>>),
            0,
        )
    }

    #[test]
    fn keeps_latest_value_and_its_time() {
        let agg = last_value(Temporality::Cumulative);
        let attrs = [KeyValue::new("room", "kitchen")];
        let before = now();
        Measure::call(&agg, &Context::new(), 21.5, &attrs);
        Measure::call(&agg, &Context::new(), 19.0, &attrs);

        let Some(MetricData::Gauge(gauge)) = ComputeAggregation::call(&agg, None).1 else {
            panic!("expected a gauge");
        };
        assert_eq!(gauge.data_points.len(), 1);
        assert_eq!(gauge.data_points[0].value, 19.0);
        assert!(gauge.data_points[0].time >= before);
        assert!(gauge.data_points[0].time <= gauge.time);
    }

    #[test]
    fn delta_forgets_unobserved_series() {
        let agg = last_value(Temporality::Delta);
        Measure::call(&agg, &Context::new(), 1.0, &[KeyValue::new("a", 1)]);

        let (count, _) = ComputeAggregation::call(&agg, None);
        assert_eq!(count, 1);

        let (count, _) = ComputeAggregation::call(&agg, None);
        assert_eq!(count, 0);
    }
}
