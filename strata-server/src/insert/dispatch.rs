//! Fan-out of a routed job: local application (with the replica hand-off),
//! remote pool dispatch, acknowledgement aggregation and the client reply.

use std::sync::Arc;

use tracing::{error, info};

use strata_cluster::{Packet, PacketTag, PromiseOutcome, PromiseSet};
use strata_codec::Encoder;

use super::{apply, error_reply, success_reply, InsertJob, EMPTY_POOL_BUFFER};
use crate::Database;

/// Dispatch every buffer of `job` and reply to the client once all remote
/// acknowledgements are in.
pub(crate) async fn points_to_pools(db: &Arc<Database>, mut job: InsertJob) {
    let pools = Arc::clone(&job.pools);
    let own = pools.own_pool() as usize;
    let mut promises = PromiseSet::new();

    for n in 0..job.buffers.len() {
        let Some(buf) = job.buffers[n].take() else {
            continue;
        };
        if buf.len() <= EMPTY_POOL_BUFFER {
            // nothing was routed here
            continue;
        }
        if n == own {
            apply_own_pool(db, &job, buf);
        } else {
            let packet = Packet::new(0, job.flags.pool_tag(), buf.into_bytes());
            match pools.send(n as u16, packet) {
                Ok(promise) => promises.push(promise),
                Err(_) => error!(
                    "Although we have checked and validated each pool had at \
                     least one server available, it seems that the situation \
                     has changed and we cannot send points to pool {n}"
                ),
            }
        }
    }

    let outcomes = promises.join().await;
    respond(db, &job, outcomes);
}

/// Apply the own pool's buffer, handing it to the replica first when one
/// exists. During the replica's initial sync the buffer is filtered, and the
/// filtered bytes are what both the replica and the local store see.
fn apply_own_pool(db: &Arc<Database>, job: &InsertJob, buf: Encoder) {
    let outcome = match db.replicator() {
        Some(replicator) => {
            let packet = if replicator.initsync_active() {
                replicator.filter(db.store(), buf.as_slice(), job.flags)
            } else {
                Some(Packet::new(0, job.flags.server_tag(), buf.into_bytes()))
            };
            match packet {
                Some(packet) => {
                    replicator.replicate(packet.clone());
                    apply::apply_local(db, &packet.body, job.flags)
                }
                // the filter kept nothing for this buffer
                None => return,
            }
        }
        None => apply::apply_local(db, buf.as_slice(), job.flags),
    };

    if let Some(forward) = outcome.forward {
        tokio::spawn(crate::forward::dispatch(forward));
    }
}

/// Inspect every promise outcome and send the single client reply.
fn respond(db: &Arc<Database>, job: &InsertJob, outcomes: Vec<PromiseOutcome>) {
    let mut tag = PacketTag::InsertOk;
    let mut msg = String::new();

    if db.latch().is_set() {
        tag = PacketTag::InsertErr;
        msg = format!("Critical error occurred on '{}'", db.server_name());
    }
    for outcome in &outcomes {
        if db.latch().is_set() {
            tag = PacketTag::InsertErr;
            msg = format!("Critical error occurred on '{}'", db.server_name());
            continue;
        }
        match &outcome.packet {
            Some(packet) if packet.tag == PacketTag::AckInsert => {}
            _ => {
                tag = PacketTag::InsertErr;
                msg = format!(
                    "Error occurred while sending points to at least '{}'",
                    outcome.server
                );
            }
        }
    }

    if tag == PacketTag::InsertOk {
        info!("Inserted {} point(s) successfully.", job.npoints);
        db.add_received_points(job.npoints as u64);
        job.client.send(success_reply(job.correlation_id, job.npoints));
    } else {
        job.client.send(error_reply(job.correlation_id, &msg));
    }
}
