use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use strata_errors::{StrataError, StrataResult};

use crate::{Packet, PoolLookup, Promise};

/// Identifies one server within the cluster.
pub type ServerId = u32;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A packet on its way to a peer, paired with the slot its reply lands in.
#[derive(Debug)]
pub struct Outbound {
    pub packet: Packet,
    /// Reply slot; send `None` to fail the promise early, or drop the sender
    /// for the same effect.
    pub reply: oneshot::Sender<Option<Packet>>,
}

/// Handle to one peer server's outbound queue.
///
/// The connection itself (framing, reconnects) is owned by whoever holds the
/// receiving end; from this side a server is a name and a queue.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    id: ServerId,
    name: Arc<str>,
    queue: mpsc::UnboundedSender<Outbound>,
}

impl ServerHandle {
    /// Create a handle and the receiver its deliveries arrive on.
    pub fn new(id: ServerId, name: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ServerHandle {
                id,
                name: Arc::from(name),
                queue: tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, packet: Packet, timeout: Duration) -> Result<Promise, Packet> {
        let (tx, rx) = oneshot::channel();
        match self.queue.send(Outbound { packet, reply: tx }) {
            Ok(()) => Ok(Promise::new(Arc::clone(&self.name), rx, timeout)),
            Err(mpsc::error::SendError(outbound)) => Err(outbound.packet),
        }
    }
}

/// The servers replicating one pool.
#[derive(Debug, Clone)]
pub struct Pool {
    servers: Vec<ServerHandle>,
}

impl Pool {
    pub fn new(servers: Vec<ServerHandle>) -> Self {
        Pool { servers }
    }

    pub fn servers(&self) -> &[ServerHandle] {
        &self.servers
    }
}

/// Snapshot of cluster membership used to route one insert job.
///
/// A job captures the table as an `Arc` at admission and keeps it until the
/// reply is sent, so both lookups stay immutable for the job's whole life;
/// membership changes swap in a new table between jobs.
#[derive(Debug)]
pub struct PoolTable {
    pools: Vec<Pool>,
    lookup: PoolLookup,
    /// Pre-resharding mapping; present only while re-indexing.
    prev_lookup: Option<PoolLookup>,
    own_pool: u16,
    own_server: ServerId,
    request_timeout: Duration,
}

impl PoolTable {
    pub fn new(pools: Vec<Pool>, own_pool: u16, own_server: ServerId) -> Self {
        assert!((own_pool as usize) < pools.len());
        let lookup = PoolLookup::new(pools.len() as u16);
        PoolTable {
            pools,
            lookup,
            prev_lookup: None,
            own_pool,
            own_server,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// A table for a cluster mid-resharding: `prev_pools` is the pool count
    /// before the new pools joined.
    pub fn reindexing(
        pools: Vec<Pool>,
        own_pool: u16,
        own_server: ServerId,
        prev_pools: u16,
    ) -> Self {
        let mut table = Self::new(pools, own_pool, own_server);
        table.prev_lookup = Some(PoolLookup::new(prev_pools));
        table
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn num_pools(&self) -> u16 {
        self.pools.len() as u16
    }

    pub fn own_pool(&self) -> u16 {
        self.own_pool
    }

    pub fn own_server(&self) -> ServerId {
        self.own_server
    }

    /// The pool owning `name` under the current mapping.
    pub fn lookup(&self, name: &[u8]) -> u16 {
        self.lookup.pool_for(name)
    }

    /// The pool owning `name` under the pre-resharding mapping, if the
    /// cluster is re-indexing.
    pub fn prev_lookup(&self, name: &[u8]) -> Option<u16> {
        self.prev_lookup.as_ref().map(|l| l.pool_for(name))
    }

    /// Which server of the own pool is primary for `name`. Used while
    /// re-indexing to decide whether this node or its replica forwards a
    /// mis-routed series.
    pub fn server_for_series(&self, name: &[u8]) -> ServerId {
        let servers = self.pools[self.own_pool as usize].servers();
        let i = (xxh3_64(name) % servers.len() as u64) as usize;
        servers[i].id()
    }

    /// Submit `packet` to any member of `pool`, returning the promise of its
    /// acknowledgement. Fails immediately when no server of the pool accepts
    /// the submission; timeouts surface later as a failed promise.
    pub fn send(&self, pool: u16, packet: Packet) -> StrataResult<Promise> {
        let Some(target) = self.pools.get(pool as usize) else {
            return Err(StrataError::PoolGone { pool });
        };
        let mut packet = packet;
        for server in target.servers() {
            match server.submit(packet, self.request_timeout) {
                Ok(promise) => return Ok(promise),
                Err(returned) => {
                    warn!(server = server.name(), pool, "server queue is gone");
                    packet = returned;
                }
            }
        }
        Err(StrataError::PoolGone { pool })
    }
}
