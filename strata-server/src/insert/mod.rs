//! The insert pipeline: request parsing, per-pool routing, and the job entry
//! points for client and peer packets.

mod apply;
mod dispatch;

use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;
use tracing::warn;

use strata_cluster::{Packet, PacketTag, PoolTable};
use strata_codec::{Decoder, Encoder, Token, SUGGESTED_SIZE};
use strata_data::SeriesName;
use strata_errors::InsertError;

use crate::{ClientHandle, Database, DbFlags};

bitflags! {
    /// Per-insert routing flags, carried along with a job and on the wire in
    /// the packet tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InsertFlags: u8 {
        /// Routing must be re-checked per series by the local applier. Set
        /// on jobs admitted while the database is re-indexing.
        const TEST = 0b0000_0001;
        /// The routing re-check already happened upstream; never recurse.
        const TESTED = 0b0000_0010;
    }
}

impl InsertFlags {
    /// Tag for an insert packet targeted at a whole pool.
    pub(crate) fn pool_tag(self) -> PacketTag {
        if self.contains(InsertFlags::TEST) {
            PacketTag::InsertTestPool
        } else {
            PacketTag::InsertPool
        }
    }

    /// Tag for an insert packet targeted at the replica server.
    pub(crate) fn server_tag(self) -> PacketTag {
        if self.contains(InsertFlags::TEST) {
            PacketTag::InsertTestServer
        } else if self.contains(InsertFlags::TESTED) {
            PacketTag::InsertTestedServer
        } else {
            PacketTag::InsertServer
        }
    }
}

/// Length of a pool buffer that only ever received its opening map tag.
pub(crate) const EMPTY_POOL_BUFFER: usize = 1;

/// One client insert on its way through the pipeline.
pub(crate) struct InsertJob {
    pub(crate) client: ClientHandle,
    pub(crate) correlation_id: u32,
    pub(crate) flags: InsertFlags,
    pub(crate) npoints: usize,
    /// One encoded `{series -> [[ts, val], ...]}` map per pool; each buffer
    /// is taken out exactly once when it is dispatched.
    pub(crate) buffers: Vec<Option<Encoder>>,
    /// Membership snapshot the whole job routes against.
    pub(crate) pools: Arc<PoolTable>,
}

/// Handle one client insert from decoded packet to reply.
///
/// Parse errors are replied before anything is applied; otherwise the job
/// takes the client's write lock and runs to completion, replying
/// `InsertOk`/`InsertErr` with the original correlation id.
pub async fn handle_insert(db: Arc<Database>, client: ClientHandle, packet: Packet) {
    let pools = db.pool_table();
    let (npoints, buffers) = match assign_pools(&db, &pools, &packet.body) {
        Ok(routed) => routed,
        Err(err) => {
            client.send(error_reply(packet.correlation_id, &err.to_string()));
            return;
        }
    };

    let flags = if db.flags().contains(DbFlags::REINDEXING) {
        InsertFlags::TEST
    } else {
        InsertFlags::empty()
    };
    let job = InsertJob {
        client: client.clone(),
        correlation_id: packet.correlation_id,
        flags,
        npoints,
        buffers: buffers.into_iter().map(Some).collect(),
        pools,
    };

    let _write_lock = client.lock().await;
    dispatch::points_to_pools(&db, job).await;
}

/// Handle an insert-family packet from a peer node, returning the packet to
/// answer with (`AckInsert` on success).
pub async fn handle_peer_insert(db: &Arc<Database>, packet: Packet) -> Packet {
    let flags = match packet.tag {
        PacketTag::InsertPool | PacketTag::InsertServer => InsertFlags::empty(),
        PacketTag::InsertTestPool | PacketTag::InsertTestServer => InsertFlags::TEST,
        PacketTag::InsertTestedServer | PacketTag::Forward => InsertFlags::TESTED,
        other => {
            warn!(?other, "unexpected packet tag on the insert path");
            return Packet::new(packet.correlation_id, PacketTag::InsertErr, Bytes::new());
        }
    };

    let outcome = apply::apply_local(db, &packet.body, flags);
    if let Some(job) = outcome.forward {
        tokio::spawn(crate::forward::dispatch(job));
    }
    let tag = if outcome.errored {
        PacketTag::InsertErr
    } else {
        PacketTag::AckInsert
    };
    Packet::new(packet.correlation_id, tag, Bytes::new())
}

/// Split a request body into per-pool buffers.
///
/// Returns the number of points routed, or the parse error to report back to
/// the client. Whatever went into the buffers before an error is discarded
/// together with them.
pub fn assign_pools(
    db: &Database,
    pools: &PoolTable,
    body: &[u8],
) -> Result<(usize, Vec<Encoder>), InsertError> {
    let npools = pools.num_pools() as usize;
    // smaller per-pool buffers as the cluster grows, to bound total memory
    let psize = SUGGESTED_SIZE / (npools / 4 + 1);
    let mut buffers: Vec<Encoder> = (0..npools)
        .map(|_| {
            let mut buf = Encoder::with_capacity(psize);
            buf.add_map_open();
            buf
        })
        .collect();

    let mut dec = Decoder::new(body);
    let count = match dec.next() {
        Ok(Token::MapOpen) => assign_by_map(db, pools, &mut dec, &mut buffers)?,
        Ok(Token::ArrayOpen) => assign_by_array(db, pools, &mut dec, &mut buffers)?,
        _ => return Err(InsertError::ExpectingMapOrArray),
    };
    Ok((count, buffers))
}

/// Route the map shape: `{series_name: [[ts, val], ...], ...}`.
fn assign_by_map(
    db: &Database,
    pools: &PoolTable,
    dec: &mut Decoder<'_>,
    buffers: &mut [Encoder],
) -> Result<usize, InsertError> {
    let mut count = 0;
    loop {
        match dec
            .next()
            .map_err(|_| InsertError::ExpectingSeriesName)?
        {
            Token::Raw(name) if SeriesName::is_valid(name) => {
                let pool = get_pool(db, pools, name) as usize;
                buffers[pool].add_raw_term(name);
                count += read_points(
                    db,
                    &mut buffers[pool],
                    dec,
                    InsertError::ExpectingSeriesName,
                )?;
            }
            Token::MapClose | Token::End => return Ok(count),
            _ => return Err(InsertError::ExpectingSeriesName),
        }
    }
}

/// Route the array shape: `[{name: ..., points: ...}, ...]`, keys in either
/// order within each entry.
fn assign_by_array(
    db: &Database,
    pools: &PoolTable,
    dec: &mut Decoder<'_>,
    buffers: &mut [Encoder],
) -> Result<usize, InsertError> {
    // holds an entry's points until its name (and thus pool) is known
    let mut scratch = Encoder::with_capacity(SUGGESTED_SIZE);
    let mut count = 0;
    loop {
        match dec
            .next()
            .map_err(|_| InsertError::ExpectingNameAndPoints)?
        {
            Token::MapOpen => {
                count += assign_array_entry(db, pools, dec, buffers, &mut scratch)?;
            }
            Token::ArrayClose | Token::End => return Ok(count),
            _ => return Err(InsertError::ExpectingNameAndPoints),
        }
    }
}

fn assign_array_entry(
    db: &Database,
    pools: &PoolTable,
    dec: &mut Decoder<'_>,
    buffers: &mut [Encoder],
    scratch: &mut Encoder,
) -> Result<usize, InsertError> {
    let mut pool: Option<usize> = None;
    let mut have_points = false;
    let mut count = 0;
    scratch.clear();

    loop {
        match dec
            .next()
            .map_err(|_| InsertError::ExpectingNameAndPoints)?
        {
            Token::Raw(key) if key == b"points" && !have_points => {
                count += match pool {
                    Some(p) => {
                        read_points(db, &mut buffers[p], dec, InsertError::ExpectingNameAndPoints)?
                    }
                    None => read_points(db, scratch, dec, InsertError::ExpectingNameAndPoints)?,
                };
                have_points = true;
            }
            Token::Raw(key) if key == b"name" && pool.is_none() => {
                let name = match dec
                    .next()
                    .map_err(|_| InsertError::ExpectingNameAndPoints)?
                {
                    Token::Raw(name) if SeriesName::is_valid(name) => name,
                    _ => return Err(InsertError::ExpectingNameAndPoints),
                };
                let p = get_pool(db, pools, name) as usize;
                buffers[p].add_raw_term(name);
                if have_points {
                    buffers[p].add_encoded(scratch.as_slice());
                    scratch.clear();
                }
                pool = Some(p);
            }
            Token::MapClose => break,
            _ => return Err(InsertError::ExpectingNameAndPoints),
        }
    }

    if pool.is_none() || !have_points {
        return Err(InsertError::ExpectingNameAndPoints);
    }
    Ok(count)
}

/// Copy one validated points array from `dec` into `buf`, counting points.
///
/// `shape_err` is reported for trailing garbage after the first point; the
/// two request shapes blame it differently.
fn read_points(
    db: &Database,
    buf: &mut Encoder,
    dec: &mut Decoder<'_>,
    shape_err: InsertError,
) -> Result<usize, InsertError> {
    match dec.next().map_err(|_| InsertError::ExpectingArray)? {
        Token::ArrayOpen => {}
        _ => return Err(InsertError::ExpectingArray),
    }
    buf.add_array_open();

    let mut count = 0usize;
    loop {
        match dec.next().map_err(|_| {
            if count == 0 {
                InsertError::ExpectingAtLeastOnePoint
            } else {
                shape_err
            }
        })? {
            Token::Array2 => {
                buf.add_array2();
                let ts = match dec.next().map_err(|_| InsertError::ExpectingIntegerTs)? {
                    Token::Int64(ts) => ts,
                    _ => return Err(InsertError::ExpectingIntegerTs),
                };
                if !db.store().valid_ts(ts) {
                    return Err(InsertError::TimestampOutOfRange);
                }
                buf.add_int64(ts);

                match dec.next().map_err(|_| InsertError::UnsupportedValue)? {
                    Token::Raw(raw) => buf.add_raw(raw),
                    Token::Int64(v) => buf.add_int64(v),
                    Token::Double(d) => buf.add_double(d),
                    _ => return Err(InsertError::UnsupportedValue),
                }
                count += 1;
            }
            Token::ArrayClose if count > 0 => break,
            _ if count == 0 => return Err(InsertError::ExpectingAtLeastOnePoint),
            _ => return Err(shape_err),
        }
    }

    buf.add_array_close();
    Ok(count)
}

/// The pool a series belongs to, honoring the re-indexing rules.
///
/// While re-indexing: a series we still hold stays ours; one we don't hold
/// routes by the pre-resharding mapping, except that when that mapping names
/// our own pool the current mapping decides (we know we don't own it, so the
/// new mapping applies).
fn get_pool(db: &Database, pools: &PoolTable, name: &[u8]) -> u16 {
    if !db.flags().contains(DbFlags::REINDEXING) {
        return pools.lookup(name);
    }
    if db.store().contains(name) {
        return pools.own_pool();
    }
    let pool = pools.prev_lookup(name).unwrap_or_else(|| pools.lookup(name));
    if pool == pools.own_pool() {
        pools.lookup(name)
    } else {
        pool
    }
}

pub(crate) fn success_reply(correlation_id: u32, npoints: usize) -> Packet {
    let msg = format!("Inserted {npoints} point(s) successfully.");
    reply(correlation_id, PacketTag::InsertOk, b"success_msg", &msg)
}

pub(crate) fn error_reply(correlation_id: u32, msg: &str) -> Packet {
    reply(correlation_id, PacketTag::InsertErr, b"error_msg", msg)
}

fn reply(correlation_id: u32, tag: PacketTag, key: &[u8], msg: &str) -> Packet {
    let mut enc = Encoder::with_capacity(256);
    enc.add_map_open();
    enc.add_raw_term(key);
    enc.add_string(msg);
    enc.add_map_close();
    Packet::new(correlation_id, tag, enc.into_bytes())
}
