//! Application of one routed buffer to the local series store, under both
//! store locks.
//!
//! Two modes: the fast path trusts the routing that produced the buffer; the
//! test path re-checks ownership per series, because the buffer was routed
//! before (or while) the cluster began re-indexing and may hold series this
//! pool no longer owns.

use tracing::error;

use strata_codec::{Decoder, Token};
use strata_data::{Value, ValueKind};
use strata_store::{Reservation, SeriesSlot, StoreGuard};

use crate::forward::ForwardJob;
use crate::{Database, DbFlags, InsertFlags};

/// What applying a buffer produced.
pub(crate) struct ApplyOutcome {
    /// The buffer could not be fully applied; the fatal latch is set.
    pub(crate) errored: bool,
    /// Series that belong to other pools, found during the test path.
    pub(crate) forward: Option<ForwardJob>,
}

/// Apply an encoded `{series -> [[ts, val], ...]}` buffer locally.
///
/// Takes the registry lock, then the shards lock, and holds both until every
/// series in the buffer is done. Never suspends while holding them.
pub(crate) fn apply_local(db: &Database, body: &[u8], flags: InsertFlags) -> ApplyOutcome {
    // The test path is also correct when this server has not observed the
    // REINDEXING flag yet: it never consults the previous mapping.
    if flags.contains(InsertFlags::TEST)
        || (db.flags().contains(DbFlags::REINDEXING) && !flags.contains(InsertFlags::TESTED))
    {
        apply_test(db, body)
    } else {
        ApplyOutcome {
            errored: apply_fast(db, body),
            forward: None,
        }
    }
}

fn apply_fast(db: &Database, body: &[u8]) -> bool {
    let mut dec = Decoder::new(body);
    let mut guard = db.store().lock();

    if !matches!(dec.next(), Ok(Token::MapOpen)) {
        corrupt(db, "insert buffer does not open a map");
        return true;
    }

    // Stop before touching another series once the latch is set; a failed
    // buffer must never be half-applied twice.
    while !db.latch().is_set() {
        let name = match dec.next() {
            Ok(Token::Raw(name)) => name,
            Ok(Token::MapClose) | Ok(Token::End) => break,
            _ => {
                corrupt(db, "insert buffer holds a stray token");
                break;
            }
        };

        let slot = match guard.get_or_reserve(name) {
            Ok(Reservation::Existing(slot)) => slot,
            Ok(Reservation::Vacant(vacant)) => match peek_first_kind(&mut dec) {
                Some(kind) => guard.fill(vacant, kind),
                None => {
                    corrupt(db, "series block holds no readable first value");
                    break;
                }
            },
            Err(err) => {
                error!(
                    series = %String::from_utf8_lossy(name),
                    %err,
                    "error getting or creating series"
                );
                db.latch().set();
                break;
            }
        };

        if apply_points(db, &mut guard, slot, &mut dec).is_err() {
            break;
        }
    }

    db.latch().is_set()
}

fn apply_test(db: &Database, body: &[u8]) -> ApplyOutcome {
    let pools = db.pool_table();
    let mut forward = ForwardJob::new(pools.clone());
    let mut dec = Decoder::new(body);
    let mut guard = db.store().lock();

    if !matches!(dec.next(), Ok(Token::MapOpen)) {
        corrupt(db, "insert buffer does not open a map");
        return ApplyOutcome {
            errored: true,
            forward: None,
        };
    }

    while !db.latch().is_set() {
        let name = match dec.next() {
            Ok(Token::Raw(name)) => name,
            Ok(Token::MapClose) | Ok(Token::End) => break,
            _ => {
                corrupt(db, "insert buffer holds a stray token");
                break;
            }
        };

        let slot = match guard.get(name) {
            // still ours, wherever the new mapping puts it
            Some(slot) => slot,
            None => {
                let pool = pools.lookup(name);
                if pool == pools.own_pool() {
                    // the new mapping assigns it here: create and apply
                    let Some(kind) = peek_first_kind(&mut dec) else {
                        corrupt(db, "series block holds no readable first value");
                        break;
                    };
                    match guard.get_or_reserve(name) {
                        Ok(Reservation::Vacant(vacant)) => guard.fill(vacant, kind),
                        Ok(Reservation::Existing(slot)) => slot,
                        Err(err) => {
                            error!(
                                series = %String::from_utf8_lossy(name),
                                %err,
                                "error creating series"
                            );
                            db.latch().set();
                            break;
                        }
                    }
                } else if db.replicator().is_none()
                    || pools.server_for_series(name) == pools.own_server()
                {
                    // this server is responsible for the series: re-route it
                    if forward.add_series(pool, name, &mut dec).is_err() {
                        corrupt(db, "series block cannot be copied for forwarding");
                        break;
                    }
                    continue;
                } else {
                    // the replica will forward it; drop it here
                    if dec.skip().is_err() {
                        corrupt(db, "series block cannot be skipped");
                        break;
                    }
                    continue;
                }
            }
        };

        if apply_points(db, &mut guard, slot, &mut dec).is_err() {
            break;
        }
    }
    drop(guard);

    let errored = db.latch().is_set();
    ApplyOutcome {
        errored,
        forward: (!errored && !forward.is_empty()).then_some(forward),
    }
}

/// Apply one series' points array through the locked store.
fn apply_points(
    db: &Database,
    guard: &mut StoreGuard<'_>,
    slot: SeriesSlot,
    dec: &mut Decoder<'_>,
) -> Result<(), ()> {
    if !matches!(dec.next(), Ok(Token::ArrayOpen)) {
        corrupt(db, "series block does not open an array");
        return Err(());
    }
    loop {
        match dec.next() {
            Ok(Token::Array2) => {
                let ts = match dec.next() {
                    Ok(Token::Int64(ts)) => ts as u64,
                    _ => {
                        corrupt(db, "point holds no integer timestamp");
                        return Err(());
                    }
                };
                let value = match dec.next() {
                    Ok(Token::Int64(n)) => Value::Int(n),
                    Ok(Token::Double(d)) => Value::Double(d),
                    Ok(Token::Raw(b)) => Value::Raw(b.to_vec()),
                    _ => {
                        corrupt(db, "point holds no readable value");
                        return Err(());
                    }
                };
                if db.latch().is_set() {
                    return Err(());
                }
                if let Err(err) = guard.add_point(slot, ts, value) {
                    error!(%err, "failed to add point");
                    db.latch().set();
                    return Err(());
                }
            }
            Ok(Token::ArrayClose) => return Ok(()),
            _ => {
                corrupt(db, "series block holds a stray token");
                return Err(());
            }
        }
    }
}

/// Read the kind of a series' first value without consuming anything.
fn peek_first_kind(dec: &mut Decoder<'_>) -> Option<ValueKind> {
    let cp = dec.checkpoint();
    let kind = (|| {
        if !matches!(dec.next().ok()?, Token::ArrayOpen) {
            return None;
        }
        if !matches!(dec.next().ok()?, Token::Array2) {
            return None;
        }
        dec.next().ok()?; // timestamp
        match dec.next().ok()? {
            Token::Int64(_) => Some(ValueKind::Int),
            Token::Double(_) => Some(ValueKind::Double),
            Token::Raw(_) => Some(ValueKind::Raw),
            _ => None,
        }
    })();
    dec.restore(cp);
    kind
}

fn corrupt(db: &Database, what: &str) {
    error!("{what}; latching");
    db.latch().set();
}
