use std::sync::Mutex;

use opentelemetry::{Context, KeyValue};

use super::{new_exemplar, ExemplarReservoir};
use crate::metrics::data::Exemplar;
use crate::metrics::Number;

/// Keeps the most recent measurement for every bucket of an explicit bucket
/// histogram.
#[derive(Debug)]
pub struct HistogramReservoir<T> {
    bounds: Vec<f64>,
    store: Mutex<Vec<Option<Exemplar<T>>>>,
}

impl<T> HistogramReservoir<T> {
    /// A reservoir over buckets with the upper bounds `bounds`.
    ///
    /// `bounds` must be sorted. `N` bounds make `N + 1` buckets.
    pub fn new(bounds: Vec<f64>) -> Self {
        let store = (0..=bounds.len()).map(|_| None).collect();
        HistogramReservoir {
            bounds,
            store: Mutex::new(store),
        }
    }
}

impl<T: Number> ExemplarReservoir<T> for HistogramReservoir<T> {
    fn offer(&self, cx: &Context, value: T, dropped: &[KeyValue]) {
        let f = value.into_float();
        let idx = self.bounds.partition_point(|&b| b < f);
        let exemplar = new_exemplar(cx, value, dropped);

        let mut store = self.store.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(slot) = store.get_mut(idx) {
            *slot = Some(exemplar);
        }
    }

    fn collect(&self, dest: &mut Vec<Exemplar<T>>) {
        let store = self.store.lock().unwrap_or_else(|err| err.into_inner());
        dest.extend(store.iter().flatten().cloned());
    }
}
