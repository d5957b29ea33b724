//! Snapshots produced by a collection.
//!
//! Every value here is created by a `collect` call and handed over to the
//! caller. The engine keeps no reference to it afterwards, so a caller may
//! pass the same value back into the next `collect` to reuse its buffers.

use std::time::SystemTime;

use opentelemetry::KeyValue;

use super::Temporality;

/// The output of one aggregation, by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricData<T> {
    /// Output of a last-value aggregation.
    Gauge(Gauge<T>),
    /// Output of a sum or precomputed sum aggregation.
    Sum(Sum<T>),
    /// Output of an explicit bucket histogram aggregation.
    Histogram(Histogram<T>),
    /// Output of a base2 exponential histogram aggregation.
    ExponentialHistogram(ExponentialHistogram<T>),
}

impl<T> MetricData<T> {
    /// The number of data points held by this aggregation.
    pub fn len(&self) -> usize {
        match self {
            MetricData::Gauge(g) => g.data_points.len(),
            MetricData::Sum(s) => s.data_points.len(),
            MetricData::Histogram(h) => h.data_points.len(),
            MetricData::ExponentialHistogram(e) => e.data_points.len(),
        }
    }

    /// Returns `true` if there are no data points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<Gauge<T>> for MetricData<T> {
    fn from(value: Gauge<T>) -> Self {
        MetricData::Gauge(value)
    }
}

impl<T> From<Sum<T>> for MetricData<T> {
    fn from(value: Sum<T>) -> Self {
        MetricData::Sum(value)
    }
}

impl<T> From<Histogram<T>> for MetricData<T> {
    fn from(value: Histogram<T>) -> Self {
        MetricData::Histogram(value)
    }
}

impl<T> From<ExponentialHistogram<T>> for MetricData<T> {
    fn from(value: ExponentialHistogram<T>) -> Self {
        MetricData::ExponentialHistogram(value)
    }
}

/// The last value recorded for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint<T> {
    /// Attributes identifying the series.
    pub attributes: Vec<KeyValue>,
    /// The most recent measurement.
    pub value: T,
    /// When `value` was recorded.
    pub time: SystemTime,
    /// Measurements sampled from this series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// Last-value snapshot of every series of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge<T> {
    /// One point per attribute set.
    pub data_points: Vec<GaugeDataPoint<T>>,
    /// Start of the collection window.
    pub start_time: Option<SystemTime>,
    /// When the snapshot was taken.
    pub time: SystemTime,
}

/// The running total of one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint<T> {
    /// Attributes identifying the series.
    pub attributes: Vec<KeyValue>,
    /// The total for the window.
    pub value: T,
    /// Measurements sampled from this series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// Sum snapshot of every series of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sum<T> {
    /// One point per attribute set.
    pub data_points: Vec<SumDataPoint<T>>,
    /// Start of the collection window.
    pub start_time: SystemTime,
    /// When the snapshot was taken.
    pub time: SystemTime,
    /// Whether values cover the last window only or everything since
    /// `start_time`.
    pub temporality: Temporality,
    /// Whether the underlying instrument only ever increases.
    pub is_monotonic: bool,
}

/// Explicit bucket histogram snapshot of every series of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<HistogramDataPoint<T>>,
    /// Start of the collection window.
    pub start_time: SystemTime,
    /// When the snapshot was taken.
    pub time: SystemTime,
    /// Whether points cover the last window only or everything since
    /// `start_time`.
    pub temporality: Temporality,
}

/// The distribution of one attribute set over explicit buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// Attributes identifying the series.
    pub attributes: Vec<KeyValue>,
    /// Number of recorded values, always the sum of `bucket_counts`.
    pub count: u64,
    /// Inclusive upper bounds of every bucket but the last, ascending.
    ///
    /// The last bucket has no upper bound.
    pub bounds: Vec<f64>,
    /// One count per bucket, `bounds.len() + 1` entries.
    pub bucket_counts: Vec<u64>,

    /// Smallest recorded value, when tracked and anything was recorded.
    pub min: Option<T>,
    /// Largest recorded value, when tracked and anything was recorded.
    pub max: Option<T>,
    /// Sum of the recorded values, zero when not tracked.
    pub sum: T,

    /// Measurements sampled from this series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// Exponential histogram snapshot of every series of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<ExponentialHistogramDataPoint<T>>,
    /// Start of the collection window.
    pub start_time: SystemTime,
    /// When the snapshot was taken.
    pub time: SystemTime,
    /// Whether points cover the last window only or everything since
    /// `start_time`.
    pub temporality: Temporality,
}

/// The distribution of one attribute set over base2 exponential buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramDataPoint<T> {
    /// Attributes identifying the series.
    pub attributes: Vec<KeyValue>,

    /// Number of recorded values, zeros included.
    pub count: usize,
    /// Smallest recorded value, when tracked and anything was recorded.
    pub min: Option<T>,
    /// Largest recorded value, when tracked and anything was recorded.
    pub max: Option<T>,
    /// Sum of the recorded values, zero when not tracked.
    pub sum: T,

    /// Resolution of the buckets.
    ///
    /// Bucket `i` covers `(base^i, base^(i+1)]` with `base = 2^(2^-scale)`.
    pub scale: i8,

    /// Number of values recorded as exactly zero.
    pub zero_count: u64,

    /// Buckets of positive values.
    pub positive_bucket: ExponentialBucket,
    /// Buckets of negative values, indexed by absolute value.
    pub negative_bucket: ExponentialBucket,

    /// Half width of the zero bucket. Always `0.0`.
    pub zero_threshold: f64,

    /// Measurements sampled from this series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// A contiguous run of exponential bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBucket {
    /// Bucket index of `counts[0]`.
    pub offset: i32,

    /// `counts[i]` is the count of bucket `offset + i`.
    pub counts: Vec<u64>,
}

/// A raw measurement kept alongside an aggregated series.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar<T> {
    /// Measurement attributes the attribute filter removed from the series
    /// key.
    pub filtered_attributes: Vec<KeyValue>,
    /// When the measurement was made.
    pub time: SystemTime,
    /// The measured value.
    pub value: T,
    /// Span active during the measurement, zeros if there was none.
    pub span_id: [u8; 8],
    /// Trace of the active span, zeros if there was none.
    pub trace_id: [u8; 16],
}
