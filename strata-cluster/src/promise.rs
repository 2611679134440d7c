use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;

use crate::Packet;

/// The pending acknowledgement of one remote dispatch.
///
/// Resolves to the peer's reply packet, or to nothing if the peer went away
/// or the timeout elapsed first. Failure is expressed in the outcome, never
/// as an error: the caller always gets one outcome per promise.
#[derive(Debug)]
pub struct Promise {
    server: Arc<str>,
    rx: oneshot::Receiver<Option<Packet>>,
    timeout: Duration,
}

impl Promise {
    pub(crate) fn new(
        server: Arc<str>,
        rx: oneshot::Receiver<Option<Packet>>,
        timeout: Duration,
    ) -> Self {
        Promise {
            server,
            rx,
            timeout,
        }
    }

    /// Name of the server this promise is waiting on.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Wait for the reply, the peer's disappearance, or the timeout,
    /// whichever comes first.
    pub async fn resolve(self) -> PromiseOutcome {
        let packet = match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(packet)) => packet,
            // sender dropped or timeout: a failed promise
            Ok(Err(_)) | Err(_) => None,
        };
        PromiseOutcome {
            server: self.server,
            packet,
        }
    }
}

/// What a [`Promise`] resolved to.
#[derive(Debug)]
pub struct PromiseOutcome {
    /// The server that was dispatched to.
    pub server: Arc<str>,
    /// The reply packet; `None` for a failed or timed-out dispatch.
    pub packet: Option<Packet>,
}

/// Barrier over all of a job's outstanding promises.
///
/// Fires once, when every promise has resolved (or timed out); per-promise
/// completion order is not observable.
#[derive(Default)]
pub struct PromiseSet {
    pending: FuturesUnordered<Pin<Box<dyn Future<Output = PromiseOutcome> + Send>>>,
}

impl PromiseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, promise: Promise) {
        self.pending.push(Box::pin(promise.resolve()));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every promise and return their outcomes.
    pub async fn join(mut self) -> Vec<PromiseOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        while let Some(outcome) = self.pending.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}
