//! A StrataDB node's write side: the point-insertion pipeline, replication
//! hooks, and the admin operation that creates databases on disk.
//!
//! The pipeline for one client insert:
//!
//! 1. decode the request body and split it into one encoded buffer per pool
//!    ([`insert::assign_pools`]);
//! 2. apply the own pool's buffer to the local [`strata_store::SeriesStore`]
//!    (and hand it to the replica when one exists);
//! 3. fan the remaining buffers out to their pools and await every
//!    acknowledgement;
//! 4. aggregate the outcomes into a single `InsertOk`/`InsertErr` reply.
//!
//! During live resharding both the previous and current pool mappings are
//! valid; the applier then re-checks routing per series and re-routes
//! mis-placed series through a [`forward::ForwardJob`].

pub mod admin;
mod client;
mod database;
pub mod forward;
pub mod insert;
mod replicate;

pub use client::ClientHandle;
pub use database::{Database, DbFlags, FatalLatch};
pub use insert::{handle_insert, handle_peer_insert, InsertFlags};
pub use replicate::Replicator;
