use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use opentelemetry::{otel_warn, Context, KeyValue};

use crate::attributes::{AttributeSet, AttributeSetHasherBuilder, STREAM_OVERFLOW_ATTRIBUTES};
use crate::metrics::data::Exemplar;
use crate::metrics::exemplar::{ExemplarReservoir, ReservoirFactory};
use crate::metrics::Temporality;

use super::hot_cold::HotCold;
use super::limiter;

/// Aggregator interface
pub(crate) trait Aggregator: Send + Sync + 'static {
    /// A static configuration that is needed to create and update aggregators.
    /// E.g. bucket count at creation time and bucket index at update.
    type Config: Send + Sync + 'static;

    /// Some aggregators can do some computations before updating aggregator.
    /// This helps to reduce contention for aggregators because it makes
    /// [`Aggregator::update`] as short as possible.
    type PreComputedValue;

    /// Called everytime a new attribute-set is stored.
    fn create(config: &Self::Config) -> Self;

    /// Called for each measurement.
    fn update(&self, config: &Self::Config, value: Self::PreComputedValue);
}

/// The raw side of a measurement, offered to the exemplar reservoir.
#[derive(Debug)]
pub(crate) struct Measurement<'a, T> {
    pub(crate) cx: &'a Context,
    pub(crate) value: T,
    pub(crate) dropped: &'a [KeyValue],
}

/// Aggregation state for one attribute set.
#[derive(Debug)]
pub(crate) struct Cell<A, T> {
    pub(crate) aggregator: A,
    exemplars: Box<dyn ExemplarReservoir<T>>,
}

impl<A, T> Cell<A, T>
where
    A: Aggregator,
    T: Copy,
{
    fn record(&self, config: &A::Config, m: &Measurement<'_, T>, value: A::PreComputedValue) {
        self.aggregator.update(config, value);
        self.exemplars.offer(m.cx, m.value, m.dropped);
    }

    /// Drains the sampled exemplars of this cell.
    pub(crate) fn exemplars(&self) -> Vec<Exemplar<T>> {
        let mut dest = Vec::new();
        self.exemplars.collect(&mut dest);
        dest
    }
}

type Cells<A, T> = HashMap<AttributeSet, Cell<A, T>, AttributeSetHasherBuilder>;

/// This class is responsible for two things:
/// * send measurement information for specific aggregator (per attribute-set)
/// * collect all attribute-sets + aggregators (either readonly OR reset)
///
/// Delta maps keep two cell tables behind a [`HotCold`] switch. Measurements
/// land in the hot table while `collect_and_reset` drains the cold one, so
/// collection never waits on a table lock held by writers. Cumulative maps
/// only ever use the first table.
pub(crate) struct ValueMap<A, T>
where
    A: Aggregator,
{
    temporality: Temporality,
    hot_cold: HotCold,
    tables: [RwLock<Cells<A, T>>; 2],
    /// Configuration required to create and update the [`Aggregator`]
    config: A::Config,
    reservoir: ReservoirFactory<T>,
    cardinality_limit: usize,
    overflow_logged: AtomicBool,
}

impl<A, T> ValueMap<A, T>
where
    A: Aggregator,
    T: Copy + 'static,
{
    pub(crate) fn new(
        temporality: Temporality,
        config: A::Config,
        reservoir: ReservoirFactory<T>,
        cardinality_limit: usize,
    ) -> Self {
        ValueMap {
            temporality,
            hot_cold: HotCold::default(),
            tables: [
                RwLock::new(HashMap::with_hasher(AttributeSetHasherBuilder)),
                RwLock::new(HashMap::with_hasher(AttributeSetHasherBuilder)),
            ],
            config,
            reservoir,
            cardinality_limit,
            overflow_logged: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &A::Config {
        &self.config
    }

    pub(crate) fn measure(
        &self,
        m: &Measurement<'_, T>,
        attrs: AttributeSet,
        value: A::PreComputedValue,
    ) {
        match self.temporality {
            Temporality::Delta => {
                let guard = self.hot_cold.start();
                self.measure_into(&self.tables[guard.idx()], m, attrs, value);
            }
            Temporality::Cumulative => self.measure_into(&self.tables[0], m, attrs, value),
        }
    }

    fn measure_into(
        &self,
        table: &RwLock<Cells<A, T>>,
        m: &Measurement<'_, T>,
        attrs: AttributeSet,
        value: A::PreComputedValue,
    ) {
        {
            let cells = table.read().unwrap_or_else(|err| err.into_inner());
            if let Some(cell) = cells.get(&attrs) {
                cell.record(&self.config, m, value);
                return;
            }
        }

        let mut cells = table.write().unwrap_or_else(|err| err.into_inner());
        let key = limiter::resolve(attrs, &cells, self.cardinality_limit);
        if key == *STREAM_OVERFLOW_ATTRIBUTES
            && !cells.contains_key(&key)
            && !self.overflow_logged.swap(true, Ordering::Relaxed)
        {
            otel_warn!(
                name: "ValueMap.measure",
                message = "Maximum data points for metric stream exceeded. Entry added to overflow. Subsequent overflows to same metric until next collect will not be logged."
            );
        }

        let cell = cells.entry(key).or_insert_with(|| Cell {
            aggregator: A::create(&self.config),
            exemplars: (self.reservoir)(),
        });
        cell.record(&self.config, m, value);
    }

    /// Iterate through all attribute sets and populate `DataPoints` in readonly mode.
    pub(crate) fn collect_readonly<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(&AttributeSet, &Cell<A, T>) -> Res,
    {
        let cells = self.tables[0]
            .read()
            .unwrap_or_else(|err| err.into_inner());
        prepare_data(dest, cells.len());
        dest.extend(cells.iter().map(|(attrs, cell)| map_fn(attrs, cell)));
    }

    /// Iterate through all attribute sets and populate `DataPoints`, while
    /// also consuming the cells.
    ///
    /// Every measurement completed before this call is part of exactly one
    /// `collect_and_reset` result.
    pub(crate) fn collect_and_reset<Res, MapFn>(&self, dest: &mut Vec<Res>, mut map_fn: MapFn)
    where
        MapFn: FnMut(AttributeSet, Cell<A, T>) -> Res,
    {
        let cold = self.hot_cold.swap_hot_and_wait();
        let mut cells = self.tables[cold]
            .write()
            .unwrap_or_else(|err| err.into_inner());
        prepare_data(dest, cells.len());
        dest.extend(cells.drain().map(|(attrs, cell)| map_fn(attrs, cell)));
        self.overflow_logged.store(false, Ordering::Relaxed);
    }
}

/// Clear and allocate exactly required amount of space for all attribute-sets
fn prepare_data<T>(data: &mut Vec<T>, list_len: usize) {
    data.clear();
    if list_len > data.capacity() {
        data.reserve_exact(list_len - data.capacity());
    }
}
