use crate::metrics::Aggregation;

/// The kind of instrument an aggregation is built for.
///
/// The engine never creates instruments itself. The kind picks the default
/// aggregation and adjusts the requested one to what the instrument reports.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Synchronous, only ever adds non-negative increments.
    Counter,
    /// Synchronous, adds increments of either sign.
    UpDownCounter,
    /// Synchronous, records a distribution of values.
    Histogram,
    /// Callback based, observes a monotonically increasing total.
    ObservableCounter,
    /// Callback based, observes a total that may go up or down.
    ObservableUpDownCounter,
    /// Synchronous, records the current value of something.
    Gauge,
    /// Callback based, observes the current value of something.
    ObservableGauge,
}

/// Upper bucket bounds used for histograms when none are configured.
const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

impl InstrumentKind {
    /// The aggregation used when [`Aggregation::Default`] is requested.
    ///
    /// Counters of any kind sum, gauges keep their last value and histograms
    /// use explicit buckets with the standard boundaries.
    pub fn default_aggregation(&self) -> Aggregation {
        match self {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
            InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
            InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
                boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
                record_min_max: true,
            },
        }
    }

    /// Whether histograms built for this kind track the sum of values.
    ///
    /// Adding up values that can go down, or snapshots of a current value,
    /// yields nothing meaningful.
    pub(crate) fn records_sum(&self) -> bool {
        !matches!(
            self,
            InstrumentKind::UpDownCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::Gauge
                | InstrumentKind::ObservableGauge
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::InstrumentKind;
    use crate::metrics::Aggregation;

    #[rstest]
    #[case::counter(InstrumentKind::Counter, true)]
    #[case::histogram(InstrumentKind::Histogram, true)]
    #[case::observable_counter(InstrumentKind::ObservableCounter, true)]
    #[case::up_down_counter(InstrumentKind::UpDownCounter, false)]
    #[case::observable_up_down_counter(InstrumentKind::ObservableUpDownCounter, false)]
    #[case::gauge(InstrumentKind::Gauge, false)]
    #[case::observable_gauge(InstrumentKind::ObservableGauge, false)]
    fn histogram_sum_depends_on_kind(#[case] kind: InstrumentKind, #[case] expected: bool) {
        assert_eq!(kind.records_sum(), expected);
    }

    #[test]
    fn histogram_default_has_fifteen_bounds() {
        match InstrumentKind::Histogram.default_aggregation() {
            Aggregation::ExplicitBucketHistogram {
                boundaries,
                record_min_max,
            } => {
                assert_eq!(boundaries.len(), 15);
                assert!(record_min_max);
            }
            other => panic!("unexpected default {other}"),
        }
    }
}
