//! Attribute sets used to key aggregation cells.
mod set;

pub use set::AttributeSet;
pub(crate) use set::{AttributeSetHasherBuilder, STREAM_OVERFLOW_ATTRIBUTES};
