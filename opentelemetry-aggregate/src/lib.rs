//! # OpenTelemetry Aggregation Engine
//!
//! The part of a metrics SDK that turns a concurrent stream of measurements
//! into periodic, exportable summaries. Each aggregation is exposed as a pair
//! of functions produced by an [`AggregateBuilder`]: a `measure` entry point
//! that may be called from any number of threads, and a `collect` entry point
//! called by a single reader once per collection cycle.
//!
//! Recording never blocks on collection. Delta aggregations swap between two
//! cell tables so the collector drains one table while measurements keep
//! landing in the other.
//!
//! ## Example
//!
//! ```
//! use opentelemetry::{Context, KeyValue};
//! use opentelemetry_aggregate::metrics::data::MetricData;
//! use opentelemetry_aggregate::metrics::{AggregateBuilder, AggregateFns, Temporality};
//!
//! let AggregateFns { measure, collect } =
//!     AggregateBuilder::<u64>::new(Temporality::Delta).sum(true);
//!
//! let cx = Context::new();
//! measure.call(&cx, 3, &[KeyValue::new("user", "alice")]);
//! measure.call(&cx, 4, &[KeyValue::new("user", "alice")]);
//!
//! let (count, data) = collect.call(None);
//! assert_eq!(count, 1);
//! if let Some(MetricData::Sum(sum)) = data {
//!     assert_eq!(sum.data_points[0].value, 7);
//! }
//! ```
//!
//! [`AggregateBuilder`]: crate::metrics::AggregateBuilder
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]

pub mod attributes;
mod error;
pub mod metrics;

pub use attributes::AttributeSet;
pub use error::{AggregationError, AggregationResult, ErrorHandler, LogErrorHandler};
