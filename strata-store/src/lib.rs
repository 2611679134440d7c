//! The series store of a StrataDB node: an in-memory registry of series and
//! the shard bookkeeping behind them, guarded by two coarse locks.
//!
//! Lock discipline: the registry lock is always taken before the shards
//! lock, and both are held for the whole application of one insert buffer.
//! [`SeriesStore::lock`] is the only way to acquire them, which makes the
//! ordering impossible to get wrong at call sites.

mod error;
mod series;
mod store;

pub use error::StoreError;
pub use series::{Series, ShardSet};
pub use store::{Reservation, SeriesSlot, SeriesStore, StoreGuard, VacantSlot};
