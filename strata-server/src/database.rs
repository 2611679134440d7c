use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;
use tracing::error;

use strata_cluster::PoolTable;
use strata_data::DatabaseConfig;
use strata_store::SeriesStore;

use crate::Replicator;

bitflags! {
    /// Database-level state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DbFlags: u8 {
        /// The cluster is mid-resharding; both pool mappings are valid.
        const REINDEXING = 0b0000_0001;
    }
}

/// Latch for process-wide critical errors.
///
/// Once set, appliers stop before calling `add_point` again so a failed
/// buffer is never half-applied twice. Reset belongs to a recovery layer,
/// not to the insert path.
#[derive(Debug, Default)]
pub struct FatalLatch(AtomicBool);

impl FatalLatch {
    pub fn set(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            error!("fatal error latched; refusing further point writes");
        }
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One database hosted on this node.
#[derive(Debug)]
pub struct Database {
    server_name: Arc<str>,
    store: SeriesStore,
    pools: RwLock<Arc<PoolTable>>,
    flags: AtomicU8,
    latch: FatalLatch,
    received_points: AtomicU64,
    replicator: Option<Replicator>,
}

impl Database {
    pub fn new(
        server_name: &str,
        config: DatabaseConfig,
        pools: PoolTable,
        replicator: Option<Replicator>,
    ) -> Self {
        Database {
            server_name: Arc::from(server_name),
            store: SeriesStore::new(config),
            pools: RwLock::new(Arc::new(pools)),
            flags: AtomicU8::new(DbFlags::empty().bits()),
            latch: FatalLatch::default(),
            received_points: AtomicU64::new(0),
            replicator,
        }
    }

    /// Name of the server hosting this database, as used in client-visible
    /// error messages.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Snapshot of the pool table. Jobs capture this once at admission and
    /// keep routing against the same snapshot until their reply is sent.
    pub fn pool_table(&self) -> Arc<PoolTable> {
        Arc::clone(&self.pools.read())
    }

    /// Swap in new cluster membership. Takes effect for jobs admitted after
    /// the swap; in-flight jobs keep their snapshot.
    pub fn set_pool_table(&self, pools: PoolTable) {
        *self.pools.write() = Arc::new(pools);
    }

    pub fn flags(&self) -> DbFlags {
        DbFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    pub fn set_reindexing(&self, on: bool) {
        let mut flags = self.flags();
        flags.set(DbFlags::REINDEXING, on);
        self.flags.store(flags.bits(), Ordering::SeqCst);
    }

    pub fn latch(&self) -> &FatalLatch {
        &self.latch
    }

    pub fn replicator(&self) -> Option<&Replicator> {
        self.replicator.as_ref()
    }

    /// Points accepted on this node over its lifetime.
    pub fn received_points(&self) -> u64 {
        self.received_points.load(Ordering::Relaxed)
    }

    pub(crate) fn add_received_points(&self, n: u64) {
        self.received_points.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cluster::{Pool, ServerHandle};
    use strata_data::TimePrecision;

    fn database() -> Database {
        let (handle, _rx) = ServerHandle::new(0, "server-0");
        let pools = PoolTable::new(vec![Pool::new(vec![handle])], 0, 0);
        let config =
            DatabaseConfig::new("testdb", Some(TimePrecision::Second), None, None, None).unwrap();
        Database::new("server-0", config, pools, None)
    }

    #[test]
    fn reindexing_flag_toggles() {
        let db = database();
        assert!(!db.flags().contains(DbFlags::REINDEXING));
        db.set_reindexing(true);
        assert!(db.flags().contains(DbFlags::REINDEXING));
        db.set_reindexing(false);
        assert!(!db.flags().contains(DbFlags::REINDEXING));
    }

    #[test]
    fn latch_is_sticky() {
        let db = database();
        assert!(!db.latch().is_set());
        db.latch().set();
        db.latch().set();
        assert!(db.latch().is_set());
    }

    #[test]
    fn pool_table_swap_leaves_snapshots_alone() {
        let db = database();
        let snapshot = db.pool_table();
        let (h0, _r0) = ServerHandle::new(0, "server-0");
        let (h1, _r1) = ServerHandle::new(1, "server-1");
        db.set_pool_table(PoolTable::new(
            vec![Pool::new(vec![h0]), Pool::new(vec![h1])],
            0,
            0,
        ));
        assert_eq!(snapshot.num_pools(), 1);
        assert_eq!(db.pool_table().num_pools(), 2);
    }
}
