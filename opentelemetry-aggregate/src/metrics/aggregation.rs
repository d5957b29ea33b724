use std::fmt;

use crate::error::{AggregationError, AggregationResult};
use crate::metrics::internal::{EXPO_MAX_SCALE, EXPO_MIN_SCALE};

/// How the measurements of one instrument are summarized.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// Discards every measurement.
    Drop,

    /// Resolves to the aggregation of
    /// [`InstrumentKind::default_aggregation`].
    ///
    /// [`InstrumentKind::default_aggregation`]: crate::metrics::InstrumentKind::default_aggregation
    Default,

    /// Adds measurements up. Observable instruments report totals, which are
    /// kept as is.
    Sum,

    /// Keeps the most recent measurement.
    LastValue,

    /// Counts measurements into buckets with fixed upper bounds.
    ExplicitBucketHistogram {
        /// Bucket upper bounds.
        ///
        /// Each bucket is `(previous bound, bound]`, the first one starts at
        /// negative infinity and one more bucket above the last bound
        /// reaches positive infinity. `[0.0, 10.0]` therefore yields
        /// `(-∞, 0]`, `(0, 10]` and `(10, +∞)`.
        ///
        /// Unsorted boundaries are sorted when the aggregator is built and `NaN`
        /// boundaries are discarded. Infinite boundaries are rejected.
        boundaries: Vec<f64>,

        /// Whether the smallest and largest measurement are tracked.
        ///
        /// For cumulative streams they span the whole life of the instrument,
        /// which is rarely useful.
        record_min_max: bool,
    },

    /// Counts measurements into base2 exponential buckets whose resolution
    /// adapts to the range of recorded values.
    Base2ExponentialHistogram {
        /// Maximum number of buckets per sign. Must be at least `1`.
        max_size: u32,

        /// The finest resolution to start from, between `-10` and `20`.
        ///
        /// The scale drops below this as soon as the recorded range no longer
        /// fits in `max_size` buckets.
        max_scale: i8,

        /// Whether the smallest and largest measurement are tracked.
        record_min_max: bool,
    },
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
            Aggregation::Base2ExponentialHistogram { .. } => "Base2ExponentialHistogram",
        };

        f.write_str(name)
    }
}

impl Aggregation {
    /// Validate that this aggregation has correct configuration
    pub fn validate(&self) -> AggregationResult<()> {
        match self {
            Aggregation::Drop => Ok(()),
            Aggregation::Default => Ok(()),
            Aggregation::Sum => Ok(()),
            Aggregation::LastValue => Ok(()),
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                if boundaries.iter().any(|b| b.is_infinite()) {
                    return Err(AggregationError::Config(format!(
                        "aggregation: explicit bucket histogram: infinite boundary in {:?}",
                        boundaries,
                    )));
                }

                Ok(())
            }
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                ..
            } => {
                if *max_scale > EXPO_MAX_SCALE {
                    return Err(AggregationError::Config(format!(
                        "aggregation: exponential histogram: max scale ({max_scale}) is greater than {EXPO_MAX_SCALE}",
                    )));
                }
                if *max_scale < EXPO_MIN_SCALE {
                    return Err(AggregationError::Config(format!(
                        "aggregation: exponential histogram: max scale ({max_scale}) is less than {EXPO_MIN_SCALE}",
                    )));
                }
                if *max_size == 0 {
                    return Err(AggregationError::Config(
                        "aggregation: exponential histogram: max size must be at least 1".into(),
                    ));
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Aggregation;
    use crate::AggregationError;

    #[rstest]
    #[case(Aggregation::Drop)]
    #[case(Aggregation::Default)]
    #[case(Aggregation::Sum)]
    #[case(Aggregation::LastValue)]
    #[case(Aggregation::ExplicitBucketHistogram { boundaries: vec![], record_min_max: true })]
    #[case(Aggregation::ExplicitBucketHistogram { boundaries: vec![5.0, 1.0], record_min_max: false })]
    #[case(Aggregation::Base2ExponentialHistogram { max_size: 160, max_scale: 20, record_min_max: true })]
    #[case(Aggregation::Base2ExponentialHistogram { max_size: 1, max_scale: -10, record_min_max: true })]
    fn valid_aggregations(#[case] aggregation: Aggregation) {
        assert!(aggregation.validate().is_ok(), "{aggregation} should be valid");
    }

    #[rstest]
    #[case(Aggregation::ExplicitBucketHistogram { boundaries: vec![1.0, f64::INFINITY], record_min_max: true })]
    #[case(Aggregation::Base2ExponentialHistogram { max_size: 160, max_scale: 21, record_min_max: true })]
    #[case(Aggregation::Base2ExponentialHistogram { max_size: 160, max_scale: -11, record_min_max: true })]
    #[case(Aggregation::Base2ExponentialHistogram { max_size: 0, max_scale: 20, record_min_max: true })]
    fn invalid_aggregations(#[case] aggregation: Aggregation) {
        assert!(matches!(
            aggregation.validate(),
            Err(AggregationError::Config(_))
        ));
    }

    #[test]
    fn display_names_the_kind() {
        let agg = Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale: 20,
            record_min_max: true,
        };
        assert_eq!(agg.to_string(), "Base2ExponentialHistogram");
    }
}
