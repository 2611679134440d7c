use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use strata_cluster::Packet;

/// Handle to one connected client.
///
/// The write lock is held for the whole life of an insert job, so two jobs
/// from the same client can never interleave their replies on the socket.
/// The socket itself lives with whoever drains the outbox.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    name: Arc<str>,
    outbox: mpsc::UnboundedSender<Packet>,
    write_lock: Arc<Mutex<()>>,
}

impl ClientHandle {
    /// Create a handle and the receiver its replies arrive on.
    pub fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ClientHandle {
                name: Arc::from(name),
                outbox: tx,
                write_lock: Arc::new(Mutex::new(())),
            },
            rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the client's write lock for the duration of a job.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_lock).lock_owned().await
    }

    /// Queue a reply packet. A disconnected client is logged and ignored;
    /// the job still runs to completion.
    pub fn send(&self, packet: Packet) {
        if self.outbox.send(packet).is_err() {
            warn!(client = %self.name, "client went away before its reply");
        }
    }
}
