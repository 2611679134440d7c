//! Hand-off of the own pool's buffers to the replica server.
//!
//! Replication is a FIFO: packets are enqueued here in apply order and a
//! worker elsewhere drains the queue over the replica connection. During the
//! replica's initial sync, [`Replicator::filter`] rewrites each packet down
//! to the series whose snapshot has already shipped; whatever the filter
//! returns is, byte for byte, also what gets applied locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use strata_cluster::Packet;
use strata_codec::{Decoder, Encoder, Token};
use strata_store::SeriesStore;

use crate::InsertFlags;

/// This node's link to the replica of its pool.
#[derive(Debug)]
pub struct Replicator {
    name: Arc<str>,
    fifo: mpsc::UnboundedSender<Packet>,
    initsync: AtomicBool,
}

impl Replicator {
    /// Create the replicator and the FIFO receiver its packets arrive on.
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Replicator {
                name: Arc::from(name),
                fifo: tx,
                initsync: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Name of the replica server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the replica's initial sync as running or finished.
    pub fn set_initsync(&self, active: bool) {
        self.initsync.store(active, Ordering::SeqCst);
    }

    pub fn initsync_active(&self) -> bool {
        self.initsync.load(Ordering::SeqCst)
    }

    /// Enqueue a packet for the replica.
    pub fn replicate(&self, packet: Packet) {
        if self.fifo.send(packet).is_err() {
            warn!(replica = %self.name, "replica fifo is gone; dropping packet");
        }
    }

    /// Rewrite an insert buffer down to the series the replica already knows
    /// about, i.e. those present in the local registry when the initial sync
    /// snapshotted them. Returns `None` when nothing survives.
    pub fn filter(
        &self,
        store: &SeriesStore,
        body: &[u8],
        flags: InsertFlags,
    ) -> Option<Packet> {
        let mut dec = Decoder::new(body);
        let mut out = Encoder::with_capacity(body.len());
        out.add_map_open();
        let mut kept = 0usize;

        if !matches!(dec.next(), Ok(Token::MapOpen)) {
            error!("replication filter got a buffer that does not open a map");
            return None;
        }
        loop {
            match dec.next() {
                Ok(Token::Raw(name)) => {
                    if store.contains(name) {
                        out.add_raw_term(name);
                        if dec.extend(&mut out).is_err() {
                            error!("replication filter got a corrupt series block");
                            return None;
                        }
                        kept += 1;
                    } else if dec.skip().is_err() {
                        error!("replication filter got a corrupt series block");
                        return None;
                    }
                }
                Ok(Token::MapClose) | Ok(Token::End) => break,
                _ => {
                    error!("replication filter got a corrupt buffer");
                    return None;
                }
            }
        }

        (kept > 0).then(|| Packet::new(0, flags.server_tag(), out.into_bytes()))
    }
}
