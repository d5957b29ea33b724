use std::fmt;
use std::mem::replace;
use std::ops::DerefMut;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use opentelemetry::time::now;
use opentelemetry::{otel_debug, Context, KeyValue};

use crate::error::{AggregationError, AggregationResult, ErrorHandler, LogErrorHandler};
use crate::metrics::data::{self, MetricData};
use crate::metrics::exemplar::{
    DropReservoir, ExemplarFilter, ExemplarReservoir, FilteredReservoir, FixedSizeReservoir,
    HistogramReservoir, ReservoirFactory,
};
use crate::metrics::{Aggregation, InstrumentKind, Temporality};

use super::{
    exponential_histogram::ExpoHistogram, filter::AttributeSetFilter, histogram::Histogram,
    last_value::LastValue, precomputed_sum::PrecomputedSum, sum::Sum, Filter, Number,
};

/// The cardinality limit used when none is configured.
pub const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

/// Upper bound of the default reservoir size for exponential histograms.
const EXPO_RESERVOIR_SIZE: u32 = 20;

/// Receives measurements to be aggregated.
pub trait Measure<T>: Send + Sync + 'static {
    /// Records `measurement` with `attrs`. `cx` is consulted for exemplar
    /// sampling only.
    fn call(&self, cx: &Context, measurement: T, attrs: &[KeyValue]);
}

/// Stores the aggregate of measurements into the aggregation and returns the number
/// of aggregate data-points output.
pub trait ComputeAggregation<T>: Send + Sync + 'static {
    /// Compute the new aggregation and store in `dest`.
    ///
    /// If no initial aggregation exists, `dest` will be `None`, in which case the
    /// returned option is expected to contain a new aggregation with the data from
    /// the current collection cycle.
    fn call(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>);
}

/// Separate `measure` and `collect` functions for an aggregate.
pub struct AggregateFns<T> {
    /// Records measurements. May be called from any number of threads.
    pub measure: Arc<dyn Measure<T>>,
    /// Produces a snapshot of the aggregated state.
    pub collect: Arc<dyn ComputeAggregation<T>>,
}

impl<T> fmt::Debug for AggregateFns<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateFns").finish_non_exhaustive()
    }
}

impl<T> AggregateFns<T> {
    /// Shares one aggregator between the `measure` and `collect` halves.
    pub(crate) fn new<A>(aggregator: A) -> Self
    where
        A: Measure<T> + ComputeAggregation<T>,
    {
        let inst = Arc::new(aggregator);
        Self {
            measure: inst.clone(),
            collect: inst,
        }
    }
}

pub(crate) struct AggregateTime {
    pub start: SystemTime,
    pub current: SystemTime,
}

/// Initialized [`AggregateTime`] for specific [`Temporality`]
pub(crate) struct AggregateTimeInitiator(Mutex<SystemTime>);

impl AggregateTimeInitiator {
    pub(crate) fn delta(&self) -> AggregateTime {
        let current_time = now();
        let start_time = self
            .0
            .lock()
            .map(|mut start| replace(start.deref_mut(), current_time))
            .unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }

    pub(crate) fn cumulative(&self) -> AggregateTime {
        let current_time = now();
        let start_time = self.0.lock().map(|start| *start).unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }
}

impl Default for AggregateTimeInitiator {
    fn default() -> Self {
        Self(Mutex::new(now()))
    }
}

/// A snapshot type that can be reused from a previous collection.
pub(crate) trait AggregationData<T>: Into<MetricData<T>> {
    fn from_metric_data(data: &mut MetricData<T>) -> Option<&mut Self>;
}

impl<T> AggregationData<T> for data::Gauge<T> {
    fn from_metric_data(data: &mut MetricData<T>) -> Option<&mut Self> {
        match data {
            MetricData::Gauge(gauge) => Some(gauge),
            _ => None,
        }
    }
}

impl<T> AggregationData<T> for data::Sum<T> {
    fn from_metric_data(data: &mut MetricData<T>) -> Option<&mut Self> {
        match data {
            MetricData::Sum(sum) => Some(sum),
            _ => None,
        }
    }
}

impl<T> AggregationData<T> for data::Histogram<T> {
    fn from_metric_data(data: &mut MetricData<T>) -> Option<&mut Self> {
        match data {
            MetricData::Histogram(hist) => Some(hist),
            _ => None,
        }
    }
}

impl<T> AggregationData<T> for data::ExponentialHistogram<T> {
    fn from_metric_data(data: &mut MetricData<T>) -> Option<&mut Self> {
        match data {
            MetricData::ExponentialHistogram(hist) => Some(hist),
            _ => None,
        }
    }
}

/// Fills `dest` in place when it holds the right kind of snapshot, otherwise
/// fills and returns a new one.
///
/// `fill` returns the number of data points written.
pub(crate) fn collect_into<T, D>(
    dest: Option<&mut MetricData<T>>,
    new: impl FnOnce() -> D,
    fill: impl FnOnce(&mut D) -> usize,
) -> (usize, Option<MetricData<T>>)
where
    D: AggregationData<T>,
{
    match dest.and_then(D::from_metric_data) {
        Some(existing) => (fill(existing), None),
        None => {
            let mut data = new();
            let count = fill(&mut data);
            (count, Some(data.into()))
        }
    }
}

/// Builds aggregate functions
pub struct AggregateBuilder<T> {
    /// The temporality used for the returned aggregate functions.
    temporality: Temporality,

    /// The attribute filter the aggregate function will use on the input of
    /// measurements.
    filter: AttributeSetFilter,

    /// Maximum number of data points per collection cycle, overflow cell
    /// included. `0` disables the limit.
    cardinality_limit: usize,

    exemplar_filter: ExemplarFilter,

    /// Overrides the per-aggregation default reservoir.
    reservoir: Option<ReservoirFactory<T>>,

    errors: Arc<dyn ErrorHandler>,
}

impl<T> fmt::Debug for AggregateBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateBuilder")
            .field("temporality", &self.temporality)
            .field("filter", &self.filter)
            .field("cardinality_limit", &self.cardinality_limit)
            .field("exemplar_filter", &self.exemplar_filter)
            .field("reservoir", &self.reservoir.as_ref().map(|_| "<fn>"))
            .field("errors", &self.errors)
            .finish()
    }
}

impl<T: Number> AggregateBuilder<T> {
    /// A builder for aggregations reported with `temporality`.
    ///
    /// The exemplar filter defaults to the value of
    /// `OTEL_METRICS_EXEMPLAR_FILTER`.
    pub fn new(temporality: Temporality) -> Self {
        AggregateBuilder {
            temporality,
            filter: AttributeSetFilter::default(),
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
            exemplar_filter: ExemplarFilter::from_env(),
            reservoir: None,
            errors: Arc::new(LogErrorHandler),
        }
    }

    /// Keys cells by the measurement attributes `filter` accepts.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = AttributeSetFilter::new(Some(filter));
        self
    }

    /// Caps the number of data points per collection, overflow included.
    /// `0` disables the cap.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = limit;
        self
    }

    /// Selects which measurements are offered to exemplar reservoirs.
    pub fn with_exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.exemplar_filter = filter;
        self
    }

    /// Creates every cell's exemplar reservoir with `factory`.
    pub fn with_reservoir(mut self, factory: ReservoirFactory<T>) -> Self {
        self.reservoir = Some(factory);
        self
    }

    /// Sends errors raised while measuring to `handler`.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.errors = handler;
        self
    }

    fn reservoir_factory<F>(&self, default: F) -> ReservoirFactory<T>
    where
        F: Fn() -> Box<dyn ExemplarReservoir<T>> + Send + Sync + 'static,
    {
        let filter = self.exemplar_filter;
        if filter == ExemplarFilter::AlwaysOff {
            return Arc::new(|| Box::new(DropReservoir) as Box<dyn ExemplarReservoir<T>>);
        }
        let inner: ReservoirFactory<T> = match &self.reservoir {
            Some(factory) => factory.clone(),
            None => Arc::new(default),
        };
        Arc::new(move || {
            Box::new(FilteredReservoir::new(filter, inner())) as Box<dyn ExemplarReservoir<T>>
        })
    }

    fn fixed_size_reservoir(&self, size: usize) -> ReservoirFactory<T> {
        self.reservoir_factory(move || {
            Box::new(FixedSizeReservoir::new(size)) as Box<dyn ExemplarReservoir<T>>
        })
    }

    /// Builds a last-value aggregate function input and output.
    pub fn last_value(&self, overwrite_temporality: Option<Temporality>) -> AggregateFns<T> {
        let temporality = overwrite_temporality.unwrap_or(self.temporality);
        otel_debug!(
            name: "AggregateBuilder.LastValue",
            temporality = format!("{:?}", temporality)
        );
        AggregateFns::new(LastValue::new(
            temporality,
            self.filter.clone(),
            self.fixed_size_reservoir(num_cpus::get()),
            self.cardinality_limit,
        ))
    }

    /// Builds a precomputed sum aggregate function input and output.
    pub fn precomputed_sum(&self, monotonic: bool) -> AggregateFns<T> {
        otel_debug!(
            name: "AggregateBuilder.PrecomputedSum",
            temporality = format!("{:?}", self.temporality),
            monotonic = monotonic
        );
        AggregateFns::new(PrecomputedSum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.fixed_size_reservoir(num_cpus::get()),
            self.cardinality_limit,
        ))
    }

    /// Builds a sum aggregate function input and output.
    pub fn sum(&self, monotonic: bool) -> AggregateFns<T> {
        otel_debug!(
            name: "AggregateBuilder.Sum",
            temporality = format!("{:?}", self.temporality),
            monotonic = monotonic
        );
        AggregateFns::new(Sum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.fixed_size_reservoir(num_cpus::get()),
            self.cardinality_limit,
        ))
    }

    /// Builds a histogram aggregate function input and output.
    pub fn explicit_bucket_histogram(
        &self,
        boundaries: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
    ) -> AggregateFns<T> {
        otel_debug!(
            name: "AggregateBuilder.ExplicitBucketHistogram",
            temporality = format!("{:?}", self.temporality),
            buckets = boundaries.len() + 1
        );
        let mut sorted = boundaries.clone();
        sorted.retain(|v| !v.is_nan());
        sorted.sort_by(|a, b| a.total_cmp(b));
        let reservoir = self.reservoir_factory(move || {
            Box::new(HistogramReservoir::new(sorted.clone())) as Box<dyn ExemplarReservoir<T>>
        });

        AggregateFns::new(Histogram::new(
            self.temporality,
            self.filter.clone(),
            boundaries,
            record_min_max,
            record_sum,
            reservoir,
            self.cardinality_limit,
        ))
    }

    /// Builds an exponential histogram aggregate function input and output.
    pub fn exponential_bucket_histogram(
        &self,
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
        record_sum: bool,
    ) -> AggregateFns<T> {
        otel_debug!(
            name: "AggregateBuilder.ExponentialHistogram",
            temporality = format!("{:?}", self.temporality),
            max_size = max_size,
            max_scale = max_scale
        );
        let reservoir_size = max_size.min(EXPO_RESERVOIR_SIZE) as usize;

        AggregateFns::new(ExpoHistogram::new(
            self.temporality,
            self.filter.clone(),
            max_size,
            max_scale,
            record_min_max,
            record_sum,
            self.errors.clone(),
            self.fixed_size_reservoir(reservoir_size),
            self.cardinality_limit,
        ))
    }

    /// Builds the aggregate functions `aggregation` describes for an
    /// instrument of `kind`.
    ///
    /// Returns `Ok(None)` for [`Aggregation::Drop`].
    ///
    /// Current compatibility:
    ///
    /// | Instrument Kind          | Drop | LastValue | Sum | Histogram | Exponential Histogram |
    /// |--------------------------|------|-----------|-----|-----------|-----------------------|
    /// | Counter                  | ✓    |           | ✓   | ✓         | ✓                     |
    /// | UpDownCounter            | ✓    |           | ✓   | ✓         | ✓                     |
    /// | Histogram                | ✓    |           | ✓   | ✓         | ✓                     |
    /// | Observable Counter       | ✓    |           | ✓   | ✓         | ✓                     |
    /// | Observable UpDownCounter | ✓    |           | ✓   | ✓         | ✓                     |
    /// | Gauge                    | ✓    | ✓         |     | ✓         | ✓                     |
    /// | Observable Gauge         | ✓    | ✓         |     | ✓         | ✓                     |
    pub fn build(
        &self,
        aggregation: &Aggregation,
        kind: InstrumentKind,
    ) -> AggregationResult<Option<AggregateFns<T>>> {
        aggregation.validate()?;

        match aggregation {
            Aggregation::Default => self.build(&kind.default_aggregation(), kind),
            Aggregation::Drop => Ok(None),
            Aggregation::LastValue => match kind {
                InstrumentKind::Gauge => Ok(Some(self.last_value(None))),
                // Observable gauges report what was observed in the last
                // callback, whatever the requested temporality.
                InstrumentKind::ObservableGauge => {
                    Ok(Some(self.last_value(Some(Temporality::Delta))))
                }
                _ => Err(AggregationError::Config(format!(
                    "LastValue aggregation is only available for Gauge or ObservableGauge, but not for {kind:?}"
                ))),
            },
            Aggregation::Sum => {
                let fns = match kind {
                    InstrumentKind::ObservableCounter => self.precomputed_sum(true),
                    InstrumentKind::ObservableUpDownCounter => self.precomputed_sum(false),
                    InstrumentKind::Counter | InstrumentKind::Histogram => self.sum(true),
                    InstrumentKind::UpDownCounter => self.sum(false),
                    InstrumentKind::Gauge | InstrumentKind::ObservableGauge => {
                        return Err(AggregationError::Config(format!(
                            "Sum aggregation is not available for {kind:?}"
                        )))
                    }
                };
                Ok(Some(fns))
            }
            Aggregation::ExplicitBucketHistogram {
                boundaries,
                record_min_max,
            } => Ok(Some(self.explicit_bucket_histogram(
                boundaries.to_vec(),
                *record_min_max,
                kind.records_sum(),
            ))),
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                record_min_max,
            } => Ok(Some(self.exponential_bucket_histogram(
                *max_size,
                *max_scale,
                *record_min_max,
                kind.records_sum(),
            ))),
        }
    }
}
