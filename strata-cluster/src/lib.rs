//! Cluster-facing types for a StrataDB node: the pool membership table with
//! its series-name lookup, typed peer packets, and the promise machinery used
//! to await acknowledgements from remote pools.

mod lookup;
mod packet;
mod pool;
mod promise;

pub use lookup::{PoolLookup, LOOKUP_SLOTS};
pub use packet::{Packet, PacketTag};
pub use pool::{Outbound, Pool, PoolTable, ServerHandle, ServerId};
pub use promise::{Promise, PromiseOutcome, PromiseSet};
