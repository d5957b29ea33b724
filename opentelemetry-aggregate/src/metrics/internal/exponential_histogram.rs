use std::f64::consts::LOG2_E;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use opentelemetry::{Context, KeyValue};

use crate::error::{AggregationError, AggregationResult, ErrorHandler};
use crate::metrics::data::{self, ExponentialBucket, MetricData};
use crate::metrics::exemplar::ReservoirFactory;
use crate::metrics::Temporality;

use super::aggregate::{collect_into, AggregateTimeInitiator, ComputeAggregation, Measure};
use super::filter::AttributeSetFilter;
use super::value_map::{Aggregator, Measurement, ValueMap};
use super::Number;

pub(crate) const EXPO_MAX_SCALE: i8 = 20;
pub(crate) const EXPO_MIN_SCALE: i8 = -10;

/// Settings shared by all cells of one exponential histogram.
#[derive(Debug)]
pub(crate) struct ExpoConfig {
    max_size: i32,
    max_scale: i8,
    record_min_max: bool,
    record_sum: bool,
    errors: Arc<dyn ErrorHandler>,
}

/// A single data point in an exponential histogram.
#[derive(Debug, PartialEq)]
struct ExpoHistogramDataPoint<T> {
    count: usize,
    min: T,
    max: T,
    sum: T,

    scale: i8,

    pos_buckets: ExpoBuckets,
    neg_buckets: ExpoBuckets,
    zero_count: u64,
}

impl<T: Number> ExpoHistogramDataPoint<T> {
    fn new(config: &ExpoConfig) -> Self {
        ExpoHistogramDataPoint {
            count: 0,
            min: T::max(),
            max: T::min(),
            sum: T::default(),
            scale: config.max_scale,
            pos_buckets: ExpoBuckets::new(config.max_size),
            neg_buckets: ExpoBuckets::new(config.max_size),
            zero_count: 0,
        }
    }

    /// Adds a new measurement to the histogram.
    ///
    /// It will rescale the buckets if needed. A measurement that would need a
    /// scale below [`EXPO_MIN_SCALE`] is rejected and leaves the data point
    /// untouched.
    fn record(&mut self, v: T, config: &ExpoConfig) -> AggregationResult<()> {
        let abs_v = v.into_float().abs();

        if abs_v == 0.0 {
            self.zero_count += 1;
        } else {
            // Subnormals share the bucket of the smallest normal value.
            let abs_v = abs_v.max(f64::MIN_POSITIVE);
            let v_is_negative = v < T::default();
            let mut bin = self.get_bin(abs_v);

            // If the new bin would make the counts larger than `max_size`, we
            // need to downscale current measurements.
            let scale_delta = {
                let bucket = if v_is_negative {
                    &self.neg_buckets
                } else {
                    &self.pos_buckets
                };

                scale_change(config.max_size, bin, bucket.start_bin, bucket.len())
            };
            if scale_delta > 0 {
                let required_scale = i32::from(self.scale) - scale_delta as i32;
                if required_scale < i32::from(EXPO_MIN_SCALE) {
                    // With a scale of -10 there are only two buckets for the
                    // whole range of f64 values. This can only happen if there
                    // is a max size of 1.
                    return Err(AggregationError::ScaleUnderflow {
                        value: v.into_float(),
                        required_scale,
                        min_scale: EXPO_MIN_SCALE,
                    });
                }
                self.scale = required_scale as i8;
                self.pos_buckets.downscale(scale_delta);
                self.neg_buckets.downscale(scale_delta);

                bin = self.get_bin(abs_v);
            }

            if v_is_negative {
                self.neg_buckets.record(bin)
            } else {
                self.pos_buckets.record(bin)
            }
        }

        self.count += 1;
        if config.record_min_max {
            if v < self.min {
                self.min = v;
            }
            if v > self.max {
                self.max = v;
            }
        }
        if config.record_sum {
            self.sum = self.sum.wrapping_add(v);
        }
        Ok(())
    }

    /// the bin `v` should be recorded into.
    fn get_bin(&self, v: f64) -> i32 {
        let (frac, exp) = frexp(v);
        if self.scale <= 0 {
            // With negative scale `frac` is always 1 power of two higher than we want.
            let mut correction = 1;
            if frac == 0.5 {
                // If `v` is an exact power of two, `frac` will be `0.5` and the exp
                // will be then be two higher than we want.
                correction = 2;
            }
            return (exp - correction) >> -self.scale;
        }
        (exp << self.scale) + (frac.ln() * SCALE_FACTORS[self.scale as usize]) as i32 - 1
    }

    fn to_data_point(
        &self,
        config: &ExpoConfig,
        attributes: Vec<KeyValue>,
        exemplars: Vec<data::Exemplar<T>>,
    ) -> data::ExponentialHistogramDataPoint<T> {
        let (min, max) = if config.record_min_max && self.count > 0 {
            (Some(self.min), Some(self.max))
        } else {
            (None, None)
        };
        let (pos_offset, pos_counts) = self.pos_buckets.load_counts_and_offset();
        let (neg_offset, neg_counts) = self.neg_buckets.load_counts_and_offset();

        data::ExponentialHistogramDataPoint {
            attributes,
            count: self.count,
            min,
            max,
            sum: if config.record_sum {
                self.sum
            } else {
                T::default()
            },
            scale: self.scale,
            zero_count: self.zero_count,
            positive_bucket: ExponentialBucket {
                offset: pos_offset,
                counts: pos_counts,
            },
            negative_bucket: ExponentialBucket {
                offset: neg_offset,
                counts: neg_counts,
            },
            zero_threshold: 0.0,
            exemplars,
        }
    }
}

/// The magnitude of the scale change needed to fit bin in the bucket.
///
/// If no scale change is needed 0 is returned.
fn scale_change(max_size: i32, bin: i32, start_bin: i32, length: i32) -> u32 {
    if length == 0 {
        // No need to rescale if there are no buckets.
        return 0;
    }

    let mut low = start_bin;
    let mut high = bin;
    if start_bin >= bin {
        low = bin;
        high = start_bin + length - 1;
    }

    let mut count = 0u32;
    while high - low >= max_size {
        low >>= 1;
        high >>= 1;
        count += 1;

        if count > (EXPO_MAX_SCALE - EXPO_MIN_SCALE) as u32 {
            return count;
        }
    }

    count
}

/// Constants used in calculating the logarithm index.
static SCALE_FACTORS: Lazy<[f64; 21]> = Lazy::new(|| {
    let mut factors = [0.0; 21];
    for (scale, factor) in factors.iter_mut().enumerate() {
        *factor = LOG2_E * 2f64.powi(scale as i32);
    }
    factors
});

/// Breaks the number into a normalized fraction and a base-2 exponent.
///
/// This impl is necessary as rust removed this functionality from std in
/// <https://github.com/rust-lang/rust/pull/41437>
#[inline(always)]
fn frexp(x: f64) -> (f64, i32) {
    let mut y = x.to_bits();
    let ee = ((y >> 52) & 0x7ff) as i32;

    if ee == 0 {
        if x != 0.0 {
            let x1p64 = f64::from_bits(0x43f0000000000000);
            let (x, e) = frexp(x * x1p64);
            return (x, e - 64);
        }
        return (x, 0);
    } else if ee == 0x7ff {
        return (x, 0);
    }

    let e = ee - 0x3fe;
    y &= 0x800fffffffffffff;
    y |= 0x3fe0000000000000;

    (f64::from_bits(y), e)
}

/// A set of buckets in an exponential histogram.
///
/// Counts live in a ring of `max_size` slots: bin `b` is stored at slot
/// `b mod max_size`. The live range is `[start_bin, end_bin)` and never spans
/// more than `max_size` bins. Slots outside the live range are always zero.
#[derive(Debug, Clone, PartialEq)]
struct ExpoBuckets {
    start_bin: i32,
    end_bin: i32,
    max_size: i32,
    /// Allocated on the first recorded value.
    counts: Vec<u64>,
}

impl ExpoBuckets {
    fn new(max_size: i32) -> Self {
        ExpoBuckets {
            start_bin: 0,
            end_bin: 0,
            max_size,
            counts: Vec::new(),
        }
    }

    fn len(&self) -> i32 {
        self.end_bin - self.start_bin
    }

    fn is_empty(&self) -> bool {
        self.end_bin == self.start_bin
    }

    fn slot(&self, bin: i32) -> usize {
        bin.rem_euclid(self.max_size) as usize
    }

    /// Increments the count for the given bin, and widens the live range if
    /// needed.
    ///
    /// Size changes must be done before calling this function.
    fn record(&mut self, bin: i32) {
        if self.counts.is_empty() {
            self.counts = vec![0; self.max_size as usize];
        }

        if self.is_empty() {
            self.start_bin = bin;
            self.end_bin = bin + 1;
        } else if bin < self.start_bin {
            self.start_bin = bin;
        } else if bin >= self.end_bin {
            self.end_bin = bin + 1;
        }

        let slot = self.slot(bin);
        self.counts[slot] += 1;
    }

    /// Shrinks a bucket by a factor of 2*s.
    ///
    /// It will sum counts into the correct lower resolution bucket.
    fn downscale(&mut self, delta: u32) {
        // Example
        // delta = 2
        // original offset: -6
        // counts: [ 3,  1,  2,  3,  4,  5, 6, 7, 8, 9, 10]
        // bins:    -6  -5, -4, -3, -2, -1, 0, 1, 2, 3, 4
        // new bins:-2, -2, -1, -1, -1, -1, 0, 0, 0, 0, 1
        // new offset: -2
        // new counts: [4, 14, 30, 10]

        if delta == 0 {
            return;
        }
        if self.is_empty() {
            self.start_bin >>= delta;
            self.end_bin = self.start_bin;
            return;
        }

        let (offset, linear) = self.load_counts_and_offset();
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.start_bin = offset >> delta;
        self.end_bin = ((offset + linear.len() as i32 - 1) >> delta) + 1;
        for (i, count) in linear.into_iter().enumerate() {
            let slot = self.slot((offset + i as i32) >> delta);
            self.counts[slot] += count;
        }
    }

    /// The first live bin and the live counts in bin order.
    fn load_counts_and_offset(&self) -> (i32, Vec<u64>) {
        let counts = (self.start_bin..self.end_bin)
            .map(|bin| self.counts[self.slot(bin)])
            .collect();
        (self.start_bin, counts)
    }
}

/// Exponential histogram state of one cell.
pub(crate) struct ExpoCell<T> {
    point: Mutex<ExpoHistogramDataPoint<T>>,
}

impl<T> Aggregator for ExpoCell<T>
where
    T: Number,
{
    type Config = ExpoConfig;
    type PreComputedValue = T;

    fn create(config: &ExpoConfig) -> Self {
        ExpoCell {
            point: Mutex::new(ExpoHistogramDataPoint::new(config)),
        }
    }

    fn update(&self, config: &ExpoConfig, value: T) {
        let mut point = self.point.lock().unwrap_or_else(|err| err.into_inner());
        if let Err(err) = point.record(value, config) {
            drop(point);
            config.errors.handle(err);
        }
    }
}

impl<T: Number> ExpoCell<T> {
    fn to_data_point(
        &self,
        config: &ExpoConfig,
        attributes: Vec<KeyValue>,
        exemplars: Vec<data::Exemplar<T>>,
    ) -> data::ExponentialHistogramDataPoint<T> {
        self.point
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .to_data_point(config, attributes, exemplars)
    }
}

/// An aggregator that summarizes a set of measurements as an exponential
/// histogram.
///
/// Each histogram is scoped by attributes and the aggregation cycle the
/// measurements were made in.
pub(crate) struct ExpoHistogram<T: Number> {
    value_map: ValueMap<ExpoCell<T>, T>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
}

impl<T: Number> ExpoHistogram<T> {
    /// Create a new exponential histogram.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
        record_sum: bool,
        errors: Arc<dyn ErrorHandler>,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        let config = ExpoConfig {
            max_size: max_size.clamp(1, i32::MAX as u32) as i32,
            max_scale: max_scale.clamp(EXPO_MIN_SCALE, EXPO_MAX_SCALE),
            record_min_max,
            record_sum,
            errors,
        };
        ExpoHistogram {
            value_map: ValueMap::new(temporality, config, reservoir, cardinality_limit),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
        }
    }

    fn delta(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.delta();
        collect_into(
            dest,
            || data::ExponentialHistogram {
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
                        cell.aggregator
                            .to_data_point(config, attributes.to_vec(), cell.exemplars())
                    });
                h.data_points.len()
            },
        )
    }

    fn cumulative(&self, dest: Option<&mut MetricData<T>>) -> (usize, Option<MetricData<T>>) {
        let time = self.init_time.cumulative();
        collect_into(
            dest,
            || data::ExponentialHistogram {
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
                        cell.aggregator
                            .to_data_point(config, attributes.to_vec(), cell.exemplars())
                    });
                h.data_points.len()
            },
        )
    }
}

impl<T> Measure<T> for ExpoHistogram<T>
where
    T: Number,
{
    fn call(&self, cx: &Context, measurement: T, attrs: &[KeyValue]) {
        let f_value = measurement.into_float();
        // Ignore NaN and infinity.
        if !f_value.is_finite() {
            return;
        }

        let (attrs, dropped) = self.filter.apply(attrs);
        let m = Measurement {
            cx,
            value: measurement,
            dropped: &dropped,
        };
        self.value_map.measure(&m, attrs, measurement)
    }
}

impl<T> ComputeAggregation<T> for ExpoHistogram<T>
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
