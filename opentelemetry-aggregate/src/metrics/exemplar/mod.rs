//! Exemplar sampling.
//!
//! Every aggregation cell owns an [`ExemplarReservoir`] that is offered each
//! measurement recorded into the cell. The reservoir decides which raw
//! measurements to keep and hands them over when the cell is collected.
//!
//! Which measurements reach a reservoir at all is decided by an
//! [`ExemplarFilter`]. The default filter is read from the
//! `OTEL_METRICS_EXEMPLAR_FILTER` environment variable.
use std::env;
use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::TraceContextExt;
use opentelemetry::{otel_warn, Context, KeyValue};

use crate::metrics::data::Exemplar;

mod fixed_size;
mod histogram;

pub use fixed_size::FixedSizeReservoir;
pub use histogram::HistogramReservoir;

/// Environment variable selecting the default [`ExemplarFilter`].
pub const OTEL_METRICS_EXEMPLAR_FILTER: &str = "OTEL_METRICS_EXEMPLAR_FILTER";

/// Samples raw measurements of a single aggregation cell.
///
/// Implementations are shared between all threads measuring into the cell
/// and synchronize internally.
pub trait ExemplarReservoir<T>: Send + Sync + fmt::Debug {
    /// Considers a measurement for sampling.
    ///
    /// `dropped` holds the measurement attributes that are not part of the
    /// cell's attribute set.
    fn offer(&self, cx: &Context, value: T, dropped: &[KeyValue]);

    /// Appends the retained exemplars to `dest` and starts a new sampling
    /// period.
    fn collect(&self, dest: &mut Vec<Exemplar<T>>);
}

/// Creates a reservoir for every new aggregation cell.
pub type ReservoirFactory<T> = Arc<dyn Fn() -> Box<dyn ExemplarReservoir<T>> + Send + Sync>;

/// Decides which measurements are offered to exemplar reservoirs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExemplarFilter {
    /// Every measurement is offered.
    AlwaysOn,
    /// No measurement is offered.
    AlwaysOff,
    /// Measurements recorded inside a sampled span are offered.
    #[default]
    TraceBased,
}

impl ExemplarFilter {
    /// Reads the filter from `OTEL_METRICS_EXEMPLAR_FILTER`, falling back to
    /// [`ExemplarFilter::TraceBased`].
    pub fn from_env() -> Self {
        match env::var(OTEL_METRICS_EXEMPLAR_FILTER) {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "always_on" => ExemplarFilter::AlwaysOn,
                "always_off" => ExemplarFilter::AlwaysOff,
                "trace_based" => ExemplarFilter::TraceBased,
                other => {
                    otel_warn!(
                        name: "ExemplarFilter.InvalidEnvValue",
                        message = format!(
                            "Unrecognized exemplar filter '{}' in OTEL_METRICS_EXEMPLAR_FILTER. Valid values are: always_on, always_off, trace_based. Using trace_based",
                            other
                        )
                    );
                    ExemplarFilter::TraceBased
                }
            },
            Err(_) => ExemplarFilter::TraceBased,
        }
    }

    /// Whether a measurement made in `cx` should be offered.
    pub fn should_sample(&self, cx: &Context) -> bool {
        match self {
            ExemplarFilter::AlwaysOn => true,
            ExemplarFilter::AlwaysOff => false,
            ExemplarFilter::TraceBased => cx.span().span_context().is_sampled(),
        }
    }
}

/// A reservoir that never keeps anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropReservoir;

impl<T> ExemplarReservoir<T> for DropReservoir {
    fn offer(&self, _cx: &Context, _value: T, _dropped: &[KeyValue]) {}

    fn collect(&self, _dest: &mut Vec<Exemplar<T>>) {}
}

/// Gates a reservoir behind an [`ExemplarFilter`].
#[derive(Debug)]
pub struct FilteredReservoir<T> {
    filter: ExemplarFilter,
    inner: Box<dyn ExemplarReservoir<T>>,
}

impl<T> FilteredReservoir<T> {
    /// Wraps `inner` so only measurements passing `filter` reach it.
    pub fn new(filter: ExemplarFilter, inner: Box<dyn ExemplarReservoir<T>>) -> Self {
        FilteredReservoir { filter, inner }
    }
}

impl<T: fmt::Debug> ExemplarReservoir<T> for FilteredReservoir<T> {
    fn offer(&self, cx: &Context, value: T, dropped: &[KeyValue]) {
        if self.filter.should_sample(cx) {
            self.inner.offer(cx, value, dropped);
        }
    }

    fn collect(&self, dest: &mut Vec<Exemplar<T>>) {
        self.inner.collect(dest);
    }
}

/// Captures a measurement as an exemplar, stamping it with the current time
/// and the ids of the span active in `cx`.
pub(crate) fn new_exemplar<T>(cx: &Context, value: T, dropped: &[KeyValue]) -> Exemplar<T> {
    let span = cx.span();
    let span_context = span.span_context();
    let (trace_id, span_id) = if span_context.is_valid() {
        (
            span_context.trace_id().to_bytes(),
            span_context.span_id().to_bytes(),
        )
    } else {
        ([0; 16], [0; 8])
    };

    Exemplar {
        filtered_attributes: dropped.to_vec(),
        time: opentelemetry::time::now(),
        value,
        span_id,
        trace_id,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use opentelemetry::{Context, KeyValue};
    use rstest::rstest;

    use super::*;

    pub(crate) fn sampled_context() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([2; 8]),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    fn unsampled_context() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([2; 8]),
            TraceFlags::default(),
            true,
            TraceState::default(),
        ))
    }

    #[rstest]
    #[case::unset(None, ExemplarFilter::TraceBased)]
    #[case::always_on(Some("always_on"), ExemplarFilter::AlwaysOn)]
    #[case::always_off(Some("always_off"), ExemplarFilter::AlwaysOff)]
    #[case::trace_based(Some("trace_based"), ExemplarFilter::TraceBased)]
    #[case::mixed_case(Some(" Always_On "), ExemplarFilter::AlwaysOn)]
    #[case::unknown(Some("sometimes"), ExemplarFilter::TraceBased)]
    fn filter_from_env(#[case] value: Option<&str>, #[case] expected: ExemplarFilter) {
        temp_env::with_var(OTEL_METRICS_EXEMPLAR_FILTER, value, || {
            assert_eq!(ExemplarFilter::from_env(), expected);
        });
    }

    #[test]
    fn trace_based_filter_follows_sampled_flag() {
        let filter = ExemplarFilter::TraceBased;

        assert!(filter.should_sample(&sampled_context()));
        assert!(!filter.should_sample(&unsampled_context()));
        assert!(!filter.should_sample(&Context::new()));
    }

    #[test]
    fn filtered_reservoir_gates_offers() {
        let reservoir = FilteredReservoir::new(
            ExemplarFilter::TraceBased,
            Box::new(FixedSizeReservoir::<u64>::new(4)),
        );
        reservoir.offer(&unsampled_context(), 1, &[]);
        reservoir.offer(&sampled_context(), 2, &[]);

        let mut dest = Vec::new();
        reservoir.collect(&mut dest);

        assert_eq!(dest.len(), 1);
        assert_eq!(dest[0].value, 2);
    }

    #[test]
    fn exemplar_carries_span_ids_and_dropped_attributes() {
        let exemplar = new_exemplar(&sampled_context(), 7i64, &[KeyValue::new("pid", 3)]);

        assert_eq!(exemplar.trace_id, [1; 16]);
        assert_eq!(exemplar.span_id, [2; 8]);
        assert_eq!(exemplar.filtered_attributes, vec![KeyValue::new("pid", 3)]);
    }

    #[test]
    fn exemplar_without_span_has_empty_ids() {
        let exemplar = new_exemplar(&Context::new(), 7i64, &[]);

        assert_eq!(exemplar.trace_id, [0; 16]);
        assert_eq!(exemplar.span_id, [0; 8]);
    }

    #[test]
    fn drop_reservoir_keeps_nothing() {
        let reservoir = DropReservoir;
        ExemplarReservoir::<f64>::offer(&reservoir, &sampled_context(), 1.0, &[]);

        let mut dest: Vec<Exemplar<f64>> = Vec::new();
        reservoir.collect(&mut dest);
        assert!(dest.is_empty());
    }
}
