//! Invoke queue between the real-time thread and the main thread.
//!
//! The real-time side posts small copyable work tokens with a
//! non-blocking `try_send`; the main thread drains them at its leisure
//! and posts completions back on a second bounded channel, which the
//! real-time side polls at the top of the next run. Both directions are
//! preallocated, so neither endpoint ever allocates or blocks.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};

/// One queued request or completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Node index in the graph.
    pub node: usize,
    /// Handle index within the node.
    pub handle: usize,
}

/// Bounded two-way queue; see the module docs.
#[derive(Debug)]
pub struct WorkQueue {
    req_tx: SyncSender<WorkItem>,
    req_rx: Receiver<WorkItem>,
    done_tx: SyncSender<WorkItem>,
    done_rx: Receiver<WorkItem>,
}

impl WorkQueue {
    /// Create a queue holding at most `depth` in-flight items per
    /// direction.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let (req_tx, req_rx) = sync_channel(depth);
        let (done_tx, done_rx) = sync_channel(depth);
        Self {
            req_tx,
            req_rx,
            done_tx,
            done_rx,
        }
    }

    /// RT side: request main-thread work. Returns `false` when the queue
    /// is full (the request is dropped; the caller retries next quantum).
    pub fn schedule(&self, item: WorkItem) -> bool {
        match self.req_tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Main side: drain requests, invoking `f` for each, and queue the
    /// completions. Returns the number of items processed.
    pub fn process(&self, mut f: impl FnMut(WorkItem)) -> usize {
        let mut n = 0;
        loop {
            match self.req_rx.try_recv() {
                Ok(item) => {
                    f(item);
                    let _ = self.done_tx.try_send(item);
                    n += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return n,
            }
        }
    }

    /// RT side: poll one completed item.
    pub fn poll_done(&self) -> Option<WorkItem> {
        self.done_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let q = WorkQueue::new(4);
        assert!(q.schedule(WorkItem { node: 1, handle: 0 }));
        assert!(q.schedule(WorkItem { node: 2, handle: 1 }));

        let mut seen = Vec::new();
        assert_eq!(q.process(|item| seen.push(item)), 2);
        assert_eq!(seen.len(), 2);

        assert_eq!(q.poll_done(), Some(WorkItem { node: 1, handle: 0 }));
        assert_eq!(q.poll_done(), Some(WorkItem { node: 2, handle: 1 }));
        assert_eq!(q.poll_done(), None);
    }

    #[test]
    fn full_queue_drops_requests() {
        let q = WorkQueue::new(1);
        assert!(q.schedule(WorkItem { node: 0, handle: 0 }));
        assert!(!q.schedule(WorkItem { node: 0, handle: 0 }));
    }
}
