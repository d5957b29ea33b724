//! Aggregation of metric measurements.
//!
//! An [`AggregateBuilder`] turns an [`Aggregation`] kind plus a
//! [`Temporality`] into a pair of functions. The `measure` half is handed to
//! instruments and may be called concurrently from any thread. The `collect`
//! half is called once per collection cycle by a single reader and writes
//! the current state into a [`data::MetricData`] snapshot.
//!
//! ## Example
//!
//! ```
//! use opentelemetry::{Context, KeyValue};
//! use opentelemetry_aggregate::metrics::data::MetricData;
//! use opentelemetry_aggregate::metrics::{
//!     AggregateBuilder, Aggregation, InstrumentKind, Temporality,
//! };
//!
//! let fns = AggregateBuilder::<f64>::new(Temporality::Cumulative)
//!     .build(
//!         &Aggregation::ExplicitBucketHistogram {
//!             boundaries: vec![1.0, 5.0],
//!             record_min_max: true,
//!         },
//!         InstrumentKind::Histogram,
//!     )
//!     .expect("valid aggregation")
//!     .expect("not dropped");
//!
//! fns.measure.call(&Context::new(), 2.5, &[KeyValue::new("route", "/")]);
//!
//! let (count, data) = fns.collect.call(None);
//! assert_eq!(count, 1);
//! assert!(matches!(data, Some(MetricData::Histogram(_))));
//! ```
pub(crate) mod aggregation;
pub mod data;
pub mod exemplar;
pub(crate) mod instrument;
pub(crate) mod internal;

pub use aggregation::Aggregation;
pub use instrument::InstrumentKind;
pub use internal::{
    AggregateBuilder, AggregateFns, AtomicTracker, AtomicallyUpdate, ComputeAggregation, Filter,
    Measure, Number, DEFAULT_CARDINALITY_LIMIT,
};

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    ///
    /// New measurements are added to all previous measurements since a start time.
    #[default]
    Cumulative,

    /// A measurement interval that resets each cycle.
    ///
    /// Measurements from one cycle are recorded independently, measurements from
    /// other cycles do not affect them.
    Delta,
}
