//! Re-routing of series found mis-placed while re-indexing.
//!
//! The test-path applier collects every series that belongs to another pool
//! into a [`ForwardJob`]; the job is then dispatched asynchronously, after
//! the applier has released the store locks. Forwarded packets carry the
//! `Forward` tag, which the receiver applies without re-checking routing.

use std::sync::Arc;

use tracing::error;

use strata_cluster::{Packet, PacketTag, PoolTable, PromiseSet};
use strata_codec::{DecodeError, Decoder, Encoder, SUGGESTED_SIZE};

use crate::insert::EMPTY_POOL_BUFFER;

/// Per-pool buffers of series to re-route, in the same encoded shape as an
/// insert buffer.
pub struct ForwardJob {
    pools: Arc<PoolTable>,
    buffers: Vec<Option<Encoder>>,
}

impl ForwardJob {
    pub(crate) fn new(pools: Arc<PoolTable>) -> Self {
        let npools = pools.num_pools() as usize;
        let psize = SUGGESTED_SIZE / (npools / 4 + 1);
        let buffers = (0..npools)
            .map(|_| {
                let mut buf = Encoder::with_capacity(psize);
                buf.add_map_open();
                Some(buf)
            })
            .collect();
        ForwardJob { pools, buffers }
    }

    /// Copy one series (name plus its whole points subtree, verbatim) into
    /// the buffer of `pool`, consuming the subtree from `dec`.
    pub(crate) fn add_series(
        &mut self,
        pool: u16,
        name: &[u8],
        dec: &mut Decoder<'_>,
    ) -> Result<(), DecodeError> {
        let buf = self.buffers[pool as usize]
            .as_mut()
            .expect("buffers live until dispatch");
        buf.add_raw_term(name);
        dec.extend(buf)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffers
            .iter()
            .flatten()
            .all(|buf| buf.len() <= EMPTY_POOL_BUFFER)
    }

    #[cfg(test)]
    pub(crate) fn series_for_pool(&self, pool: u16) -> Vec<String> {
        use strata_codec::Token;

        let buf = self.buffers[pool as usize].as_ref().expect("buffer");
        let mut dec = Decoder::new(buf.as_slice());
        let mut out = vec![];
        assert_eq!(dec.next().unwrap(), Token::MapOpen);
        loop {
            match dec.next().unwrap() {
                Token::Raw(name) => {
                    out.push(String::from_utf8_lossy(name).into_owned());
                    dec.skip().unwrap();
                }
                Token::MapClose | Token::End => return out,
                other => panic!("unexpected token {other:?}"),
            }
        }
    }
}

/// Send every non-empty forward buffer to its pool and log any peer that
/// does not acknowledge. Forwards are fire-and-forget: nobody upstream is
/// waiting on a reply.
pub(crate) async fn dispatch(mut job: ForwardJob) {
    let pools = Arc::clone(&job.pools);
    let mut promises = PromiseSet::new();

    for n in 0..job.buffers.len() {
        let Some(buf) = job.buffers[n].take() else {
            continue;
        };
        if buf.len() <= EMPTY_POOL_BUFFER || n as u16 == pools.own_pool() {
            continue;
        }
        let packet = Packet::new(0, PacketTag::Forward, buf.into_bytes());
        match pools.send(n as u16, packet) {
            Ok(promise) => promises.push(promise),
            Err(err) => error!(%err, pool = n, "cannot forward points"),
        }
    }

    for outcome in promises.join().await {
        match &outcome.packet {
            Some(packet) if packet.tag == PacketTag::AckInsert => {}
            _ => error!(
                server = %outcome.server,
                "forwarding points was not acknowledged"
            ),
        }
    }
}
