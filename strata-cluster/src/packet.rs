use bytes::Bytes;

/// Tags of the packets the insert path sends and receives.
///
/// `*Pool` packets may be handled by any member of the target pool; `*Server`
/// packets are addressed to one specific replica. The `Test` variants tell
/// the receiver to re-check routing for every series, and `Tested` marks a
/// packet that already went through that check upstream and must not recurse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketTag {
    /// Client request: insert a batch of points.
    Insert,
    /// Successful insert reply to a client.
    InsertOk,
    /// Failed insert reply to a client.
    InsertErr,
    /// Points for another pool.
    InsertPool,
    /// Points for another pool, routing to be re-checked on arrival.
    InsertTestPool,
    /// Points for the replica of this pool.
    InsertServer,
    /// Replica packet with the routing re-check still pending.
    InsertTestServer,
    /// Replica packet whose routing re-check already happened upstream.
    InsertTestedServer,
    /// Acknowledgement of any insert packet.
    AckInsert,
    /// Series re-routed away from this node during re-indexing.
    Forward,
}

/// One framed message between a client and a node, or between two nodes.
///
/// The framing layer (length prefixes, checksums) lives outside this crate;
/// here a packet is just its tag, the correlation id the reply must echo, and
/// the encoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub correlation_id: u32,
    pub tag: PacketTag,
    pub body: Bytes,
}

impl Packet {
    pub fn new(correlation_id: u32, tag: PacketTag, body: Bytes) -> Self {
        Packet {
            correlation_id,
            tag,
            body,
        }
    }
}
