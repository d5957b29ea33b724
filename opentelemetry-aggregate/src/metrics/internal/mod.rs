mod aggregate;
mod exponential_histogram;
mod filter;
mod histogram;
mod hot_cold;
mod last_value;
mod limiter;
mod precomputed_sum;
mod sum;
mod value_map;

use core::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub use aggregate::{
    AggregateBuilder, AggregateFns, ComputeAggregation, Measure, DEFAULT_CARDINALITY_LIMIT,
};
pub(crate) use exponential_histogram::{EXPO_MAX_SCALE, EXPO_MIN_SCALE};
pub use filter::Filter;

/// Marks a type that can have a value added and retrieved atomically. Required since
/// different types have different backing atomic mechanisms
pub trait AtomicTracker<T>: Sync + Send + 'static {
    /// Overwrites the current value.
    fn store(&self, value: T);
    /// Adds `value` to the current value.
    fn add(&self, value: T);
    /// Reads the current value.
    fn get_value(&self) -> T;
    /// Reads the current value and resets it to the default.
    fn get_and_reset_value(&self) -> T;
    /// Stores `value` if it is smaller than the current value.
    fn update_min(&self, value: T);
    /// Stores `value` if it is larger than the current value.
    fn update_max(&self, value: T);
}

/// Marks a type that can have an atomic tracker generated for it
pub trait AtomicallyUpdate<T> {
    /// The atomic cell backing values of this type.
    type AtomicTracker: AtomicTracker<T>;

    /// Creates a tracker holding `init`.
    fn new_atomic_tracker(init: T) -> Self::AtomicTracker;
}

/// A measurement value type the engine can aggregate.
///
/// Implemented for `i64`, `u64` and `f64`. Every aggregator is generic over
/// this trait, so integer and floating-point measurements share one
/// algorithm and only differ in their atomic backing.
pub trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
    + AtomicallyUpdate<Self>
{
    /// The smallest representable value.
    fn min() -> Self;
    /// The largest representable value.
    fn max() -> Self;

    /// Converts to `f64`, possibly losing precision.
    fn into_float(self) -> f64;

    /// Adds `rhs`, wrapping around at the bounds of integer types.
    fn wrapping_add(self, rhs: Self) -> Self;

    /// Subtracts `rhs`, wrapping around at the bounds of integer types.
    fn wrapping_sub(self, rhs: Self) -> Self;
}

impl Number for i64 {
    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn wrapping_add(self, rhs: Self) -> Self {
        i64::wrapping_add(self, rhs)
    }

    fn wrapping_sub(self, rhs: Self) -> Self {
        i64::wrapping_sub(self, rhs)
    }
}
impl Number for u64 {
    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn wrapping_add(self, rhs: Self) -> Self {
        u64::wrapping_add(self, rhs)
    }

    fn wrapping_sub(self, rhs: Self) -> Self {
        u64::wrapping_sub(self, rhs)
    }
}
impl Number for f64 {
    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }

    fn wrapping_add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn wrapping_sub(self, rhs: Self) -> Self {
        self - rhs
    }
}

impl AtomicTracker<u64> for AtomicU64 {
    fn store(&self, value: u64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: u64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> u64 {
        self.swap(0, Ordering::Relaxed)
    }

    fn update_min(&self, value: u64) {
        self.fetch_min(value, Ordering::Relaxed);
    }

    fn update_max(&self, value: u64) {
        self.fetch_max(value, Ordering::Relaxed);
    }
}

impl AtomicallyUpdate<u64> for u64 {
    type AtomicTracker = AtomicU64;

    fn new_atomic_tracker(init: u64) -> Self::AtomicTracker {
        AtomicU64::new(init)
    }
}

impl AtomicTracker<i64> for AtomicI64 {
    fn store(&self, value: i64) {
        self.store(value, Ordering::Relaxed);
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn get_value(&self) -> i64 {
        self.load(Ordering::Relaxed)
    }

    fn get_and_reset_value(&self) -> i64 {
        self.swap(0, Ordering::Relaxed)
    }

    fn update_min(&self, value: i64) {
        self.fetch_min(value, Ordering::Relaxed);
    }

    fn update_max(&self, value: i64) {
        self.fetch_max(value, Ordering::Relaxed);
    }
}

impl AtomicallyUpdate<i64> for i64 {
    type AtomicTracker = AtomicI64;

    fn new_atomic_tracker(init: i64) -> Self::AtomicTracker {
        AtomicI64::new(init)
    }
}

/// Floating points have no native atomics, so the bit pattern is kept in an
/// `AtomicU64` and updated with compare-and-swap.
#[derive(Debug)]
pub struct F64AtomicTracker {
    inner: AtomicU64,
}

impl F64AtomicTracker {
    fn new(init: f64) -> Self {
        let value_as_u64 = init.to_bits();
        F64AtomicTracker {
            inner: AtomicU64::new(value_as_u64),
        }
    }

    fn update(&self, f: impl Fn(f64) -> Option<f64>) {
        let mut current_value_as_u64 = self.inner.load(Ordering::Relaxed);

        loop {
            let current_value = f64::from_bits(current_value_as_u64);
            let Some(new_value) = f(current_value) else {
                return;
            };
            let new_value_as_u64 = new_value.to_bits();
            match self.inner.compare_exchange_weak(
                current_value_as_u64,
                new_value_as_u64,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(v) => current_value_as_u64 = v,
            }
        }
    }
}

impl AtomicTracker<f64> for F64AtomicTracker {
    fn store(&self, value: f64) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, value: f64) {
        self.update(|current| Some(current + value));
    }

    fn get_value(&self) -> f64 {
        f64::from_bits(self.inner.load(Ordering::Relaxed))
    }

    fn get_and_reset_value(&self) -> f64 {
        let zero_as_u64 = 0.0_f64.to_bits();
        f64::from_bits(self.inner.swap(zero_as_u64, Ordering::Relaxed))
    }

    fn update_min(&self, value: f64) {
        self.update(|current| (value < current).then_some(value));
    }

    fn update_max(&self, value: f64) {
        self.update(|current| (value > current).then_some(value));
    }
}

impl AtomicallyUpdate<f64> for f64 {
    type AtomicTracker = F64AtomicTracker;

    fn new_atomic_tracker(init: f64) -> Self::AtomicTracker {
        F64AtomicTracker::new(init)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn can_store_u64_atomic_value() {
        let atomic = u64::new_atomic_tracker(0);
        let atomic_tracker = &atomic as &dyn AtomicTracker<u64>;

        let value = atomic.get_value();
        assert_eq!(value, 0);

        atomic_tracker.store(25);
        let value = atomic.get_value();
        assert_eq!(value, 25);
    }

    #[test]
    fn can_add_and_get_u64_atomic_value() {
        let atomic = u64::new_atomic_tracker(0);
        atomic.add(15);
        atomic.add(10);

        let value = atomic.get_value();
        assert_eq!(value, 25);
    }

    #[test]
    fn can_reset_u64_atomic_value() {
        let atomic = u64::new_atomic_tracker(0);
        atomic.add(15);

        let value = atomic.get_and_reset_value();
        let value2 = atomic.get_value();

        assert_eq!(value, 15, "Incorrect first value");
        assert_eq!(value2, 0, "Incorrect second value");
    }

    #[test]
    fn can_store_i64_atomic_value() {
        let atomic = i64::new_atomic_tracker(0);
        let atomic_tracker = &atomic as &dyn AtomicTracker<i64>;

        atomic_tracker.store(-25);
        let value = atomic.get_value();
        assert_eq!(value, -25);

        atomic_tracker.store(25);
        let value = atomic.get_value();
        assert_eq!(value, 25);
    }

    #[test]
    fn can_add_and_get_i64_atomic_value() {
        let atomic = i64::new_atomic_tracker(0);
        atomic.add(15);
        atomic.add(-10);

        let value = atomic.get_value();
        assert_eq!(value, 5);
    }

    #[test]
    fn can_reset_i64_atomic_value() {
        let atomic = i64::new_atomic_tracker(0);
        atomic.add(15);

        let value = atomic.get_and_reset_value();
        let value2 = atomic.get_value();

        assert_eq!(value, 15, "Incorrect first value");
        assert_eq!(value2, 0, "Incorrect second value");
    }

    #[test]
    fn can_store_f64_atomic_value() {
        let atomic = f64::new_atomic_tracker(0.0);
        let atomic_tracker = &atomic as &dyn AtomicTracker<f64>;

        atomic_tracker.store(-15.5);
        let value = atomic.get_value();
        assert!(f64::abs(-15.5 - value) < 0.0001);

        atomic_tracker.store(25.7);
        let value = atomic.get_value();
        assert!(f64::abs(25.7 - value) < 0.0001);
    }

    #[test]
    fn can_add_and_get_f64_atomic_value() {
        let atomic = f64::new_atomic_tracker(0.0);
        atomic.add(15.3);
        atomic.add(10.4);

        let value = atomic.get_value();

        assert!(f64::abs(25.7 - value) < 0.0001);
    }

    #[test]
    fn can_reset_f64_atomic_value() {
        let atomic = f64::new_atomic_tracker(0.0);
        atomic.add(15.5);

        let value = atomic.get_and_reset_value();
        let value2 = atomic.get_value();

        assert!(f64::abs(15.5 - value) < 0.0001, "Incorrect first value");
        assert!(f64::abs(0.0 - value2) < 0.0001, "Incorrect second value");
    }

    #[test]
    fn min_max_track_extremes() {
        let min = i64::new_atomic_tracker(<i64 as Number>::max());
        let max = i64::new_atomic_tracker(<i64 as Number>::min());
        for v in [3, -7, 12, 0] {
            min.update_min(v);
            max.update_max(v);
        }
        assert_eq!(min.get_value(), -7);
        assert_eq!(max.get_value(), 12);

        let fmin = f64::new_atomic_tracker(<f64 as Number>::max());
        let fmax = f64::new_atomic_tracker(<f64 as Number>::min());
        for v in [0.5, -2.25, 8.0] {
            fmin.update_min(v);
            fmax.update_max(v);
        }
        assert_eq!(fmin.get_value(), -2.25);
        assert_eq!(fmax.get_value(), 8.0);
    }

    #[test]
    fn concurrent_f64_adds_are_not_lost() {
        let atomic = Arc::new(f64::new_atomic_tracker(0.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let atomic = Arc::clone(&atomic);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        atomic.add(0.5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(atomic.get_value(), 2000.0);
    }
}
