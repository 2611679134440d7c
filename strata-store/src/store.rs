use ahash::RandomState;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use strata_data::{DatabaseConfig, SeriesName, Value, ValueKind};

use crate::{Series, ShardSet, StoreError};

type Registry = IndexMap<SeriesName, Series, RandomState>;

/// Owns the series registry and shard set of one database.
#[derive(Debug)]
pub struct SeriesStore {
    config: DatabaseConfig,
    registry: Mutex<Registry>,
    shards: Mutex<ShardSet>,
}

/// Index of a series within the locked registry. Only meaningful for the
/// [`StoreGuard`] it was obtained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesSlot(usize);

/// A series name that was looked up and found absent; pass it to
/// [`StoreGuard::fill`] to create the series. Consuming it guarantees a
/// reservation is filled at most once.
#[derive(Debug)]
pub struct VacantSlot(SeriesName);

/// Result of [`StoreGuard::get_or_reserve`].
#[derive(Debug)]
pub enum Reservation {
    Existing(SeriesSlot),
    Vacant(VacantSlot),
}

impl SeriesStore {
    pub fn new(config: DatabaseConfig) -> Self {
        SeriesStore {
            config,
            registry: Mutex::new(IndexMap::default()),
            shards: Mutex::new(ShardSet::default()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Whether `ts` is inside the database's configured timestamp range.
    pub fn valid_ts(&self, ts: i64) -> bool {
        self.config.valid_ts(ts)
    }

    /// Acquire the registry lock, then the shards lock. Both are held until
    /// the guard drops; this fixed order is the deadlock-freedom argument
    /// for the whole insert path.
    pub fn lock(&self) -> StoreGuard<'_> {
        let registry = self.registry.lock();
        let shards = self.shards.lock();
        StoreGuard {
            config: &self.config,
            registry,
            shards,
        }
    }

    /// Whether a series named `name` exists. Takes only the registry lock.
    pub fn contains(&self, name: &[u8]) -> bool {
        self.registry.lock().contains_key(name)
    }

    /// Number of series in the registry. Takes only the registry lock.
    pub fn series_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Both store locks, held together.
pub struct StoreGuard<'a> {
    config: &'a DatabaseConfig,
    registry: MutexGuard<'a, Registry>,
    shards: MutexGuard<'a, ShardSet>,
}

impl StoreGuard<'_> {
    /// Look up an existing series.
    pub fn get(&self, name: &[u8]) -> Option<SeriesSlot> {
        self.registry.get_index_of(name).map(SeriesSlot)
    }

    /// Look up a series, reserving its name for creation when absent.
    pub fn get_or_reserve(&mut self, name: &[u8]) -> Result<Reservation, StoreError> {
        match self.registry.get_index_of(name) {
            Some(i) => Ok(Reservation::Existing(SeriesSlot(i))),
            None => {
                let name = SeriesName::new(name).ok_or(StoreError::InvalidName)?;
                Ok(Reservation::Vacant(VacantSlot(name)))
            }
        }
    }

    /// Create the reserved series with the kind inferred from its first
    /// value.
    pub fn fill(&mut self, vacant: VacantSlot, kind: ValueKind) -> SeriesSlot {
        let VacantSlot(name) = vacant;
        debug!(series = %name, ?kind, "creating series");
        let (i, _) = self
            .registry
            .insert_full(name.clone(), Series::new(name, kind));
        SeriesSlot(i)
    }

    /// Create a series outright; fails if the name is taken or invalid.
    pub fn create(&mut self, name: &[u8], kind: ValueKind) -> Result<SeriesSlot, StoreError> {
        match self.get_or_reserve(name)? {
            Reservation::Existing(slot) => {
                Err(StoreError::SeriesExists(self.series(slot).name().to_string()))
            }
            Reservation::Vacant(vacant) => Ok(self.fill(vacant, kind)),
        }
    }

    pub fn series(&self, slot: SeriesSlot) -> &Series {
        self.registry
            .get_index(slot.0)
            .map(|(_, s)| s)
            .expect("slot from this guard")
    }

    /// Append one point and record its shard.
    ///
    /// The timestamp is assumed to be range-checked already; routing
    /// validates every timestamp before any buffer is applied.
    pub fn add_point(&mut self, slot: SeriesSlot, ts: u64, value: Value) -> Result<(), StoreError> {
        let duration = match value.kind() {
            ValueKind::Int | ValueKind::Double => self.config.duration_num,
            ValueKind::Raw => self.config.duration_log,
        };
        let series = self
            .registry
            .get_index_mut(slot.0)
            .map(|(_, s)| s)
            .expect("slot from this guard");
        let kind = value.kind();
        series.append(ts, value)?;
        self.shards.record(kind, ts - ts % duration);
        Ok(())
    }
}
