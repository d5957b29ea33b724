use std::fmt;
use std::result;

use opentelemetry::otel_warn;
use thiserror::Error;

/// A specialized `Result` type for aggregation operations.
pub type AggregationResult<T> = result::Result<T, AggregationError>;

/// Errors surfaced by the aggregation engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AggregationError {
    /// Invalid configuration
    #[error("Config error {0}")]
    Config(String),
    /// A value could not be recorded into an exponential histogram because
    /// the range of values recorded so far does not fit in the configured
    /// maximum size even at the minimum scale.
    #[error("exponential histogram scale underflow: recording {value} needs scale {required_scale}, minimum is {min_scale}")]
    ScaleUnderflow {
        /// The measurement that was dropped.
        value: f64,
        /// The scale the histogram would have needed.
        required_scale: i32,
        /// The lowest scale the histogram supports.
        min_scale: i8,
    },
}

/// Receives the non-fatal errors an aggregator runs into while measuring.
///
/// Measurement never returns an error to its caller, so the handler is the
/// only place these are observable. It is called on the measuring thread and
/// should return quickly.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    /// Handle an error raised while recording a measurement.
    fn handle(&self, err: AggregationError);
}

/// Default [`ErrorHandler`] that reports errors through internal logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, err: AggregationError) {
        otel_warn!(
            name: "Aggregation.MeasurementDropped",
            error = format!("{}", err)
        );
    }
}
