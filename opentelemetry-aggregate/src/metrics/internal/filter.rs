use std::fmt;
use std::sync::Arc;

use opentelemetry::KeyValue;

use crate::attributes::AttributeSet;

/// Predicate selecting which measurement attributes key an aggregation cell.
///
/// Attributes for which the filter returns `false` are not part of the data
/// point attributes. They are kept on exemplars sampled from the measurement.
pub type Filter = Arc<dyn Fn(&KeyValue) -> bool + Send + Sync>;

/// Applies filter on provided attribute set
/// No-op, if filter is not set
#[derive(Clone, Default)]
pub(crate) struct AttributeSetFilter {
    filter: Option<Filter>,
}

impl fmt::Debug for AttributeSetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSetFilter")
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl AttributeSetFilter {
    pub(crate) fn new(filter: Option<Filter>) -> Self {
        Self { filter }
    }

    /// Projects `attrs` to the cell key, returning the key and the
    /// attributes the filter dropped.
    pub(crate) fn apply(&self, attrs: &[KeyValue]) -> (AttributeSet, Vec<KeyValue>) {
        let set = AttributeSet::from(attrs);
        match &self.filter {
            Some(filter) => set.split(|kv| filter(kv)),
            None => (set, Vec::new()),
        }
    }
}
