//! Deferred teardown handoff.
//!
//! Object destruction must not run inside the control-plane call stack (the
//! caller may hold the very exclusive sections teardown needs). The core's
//! contract is only "request async teardown"; a collaborator drains the queue
//! and performs destruction.

use std::sync::mpsc::Sender;

use tracing::debug;

use crate::port::PortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownRequest {
    /// Unbind and destroy the region with this id.
    Region(u32),
    /// Destroy a port whose last descendant endpoint disappeared.
    Port(PortHandle),
}

/// Producer side of the teardown queue.
#[derive(Debug, Clone)]
pub struct TeardownQueue {
    tx: Sender<TeardownRequest>,
}

impl TeardownQueue {
    pub fn new(tx: Sender<TeardownRequest>) -> Self {
        Self { tx }
    }

    /// Enqueue a teardown request. Returns false when the consumer is gone,
    /// in which case the caller must tear down synchronously.
    pub fn schedule(&self, req: TeardownRequest) -> bool {
        let ok = self.tx.send(req).is_ok();
        debug!(?req, ok, "scheduled deferred teardown");
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn requests_reach_the_consumer() {
        let (tx, rx) = mpsc::channel();
        let queue = TeardownQueue::new(tx);
        assert!(queue.schedule(TeardownRequest::Region(3)));
        assert_eq!(rx.recv().unwrap(), TeardownRequest::Region(3));
    }

    #[test]
    fn schedule_fails_without_a_consumer() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let queue = TeardownQueue::new(tx);
        assert!(!queue.schedule(TeardownRequest::Region(0)));
    }
}
