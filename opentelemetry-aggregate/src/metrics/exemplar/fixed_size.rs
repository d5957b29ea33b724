use std::sync::Mutex;

use opentelemetry::{Context, KeyValue};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{new_exemplar, ExemplarReservoir};
use crate::metrics::data::Exemplar;

/// Keeps a uniformly random sample of at most `k` measurements per
/// collection period.
///
/// Sampling follows Algorithm L: once the reservoir is full, the number of
/// measurements to skip before the next replacement is drawn from a
/// geometric distribution, so the cost per offered measurement stays
/// constant.
#[derive(Debug)]
pub struct FixedSizeReservoir<T> {
    inner: Mutex<Sampler<T>>,
}

#[derive(Debug)]
struct Sampler<T> {
    store: Vec<Option<Exemplar<T>>>,
    /// Measurements offered in the current period.
    count: u64,
    /// Value of `count` at which the next replacement happens.
    next: u64,
    w: f64,
    rng: SmallRng,
}

impl<T> FixedSizeReservoir<T> {
    /// A reservoir retaining up to `k` exemplars.
    pub fn new(k: usize) -> Self {
        let mut sampler = Sampler {
            store: (0..k).map(|_| None).collect(),
            count: 0,
            next: 0,
            w: 0.0,
            rng: SmallRng::from_rng(&mut rand::rng()),
        };
        sampler.reset();

        FixedSizeReservoir {
            inner: Mutex::new(sampler),
        }
    }
}

impl<T> Sampler<T> {
    fn capacity(&self) -> u64 {
        self.store.len() as u64
    }

    /// A random number in the open interval (0, 1).
    fn random_f64(&mut self) -> f64 {
        loop {
            let f: f64 = self.rng.random();
            if f > 0.0 {
                return f;
            }
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.next = self.capacity();
        if self.store.is_empty() {
            return;
        }
        let k = self.capacity() as f64;
        self.w = (self.random_f64().ln() / k).exp();
        self.advance();
    }

    fn advance(&mut self) {
        let k = self.capacity() as f64;
        self.w *= (self.random_f64().ln() / k).exp();
        let skip = (self.random_f64().ln() / (1.0 - self.w).ln()).floor() as u64;
        self.next = self.next.saturating_add(skip).saturating_add(1);
    }

    fn offer(&mut self, exemplar: impl FnOnce() -> Exemplar<T>) {
        if self.store.is_empty() {
            return;
        }
        if self.count < self.capacity() {
            self.store[self.count as usize] = Some(exemplar());
        } else if self.count == self.next {
            let idx = self.rng.random_range(0..self.store.len());
            self.store[idx] = Some(exemplar());
            self.advance();
        }
        self.count = self.count.saturating_add(1);
    }
}

impl<T> ExemplarReservoir<T> for FixedSizeReservoir<T>
where
    T: Copy + Send + Sync + std::fmt::Debug,
{
    fn offer(&self, cx: &Context, value: T, dropped: &[KeyValue]) {
        let mut sampler = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        sampler.offer(|| new_exemplar(cx, value, dropped));
    }

    fn collect(&self, dest: &mut Vec<Exemplar<T>>) {
        let mut sampler = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        dest.extend(sampler.store.iter().flatten().cloned());
        sampler.reset();
    }
}
