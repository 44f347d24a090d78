//! One-shot deferred tasks, run at the end of the current tick.
//!
//! The only suspension point in the protocol: restore-on-load defers
//! peer resolution to the end of the loading tick when the peer host
//! may not exist yet. Tasks are cancelled when their anchor's host is
//! destroyed before the tick ends.

use crate::link::AnchorId;
use crate::world::HostId;

/// Work deferred to the end of the current tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeferredTask {
    /// Resolve the persisted peer of a restored `Linked` anchor.
    ResolvePeer { anchor: AnchorId, peer_host: HostId },
}

impl DeferredTask {
    /// The anchor this task belongs to, for cancellation.
    pub(crate) fn anchor(&self) -> AnchorId {
        match self {
            Self::ResolvePeer { anchor, .. } => *anchor,
        }
    }
}

/// FIFO queue of one-shot deferred tasks.
#[derive(Default)]
pub(crate) struct TickScheduler {
    queue: Vec<DeferredTask>,
}

impl TickScheduler {
    /// Queue a task for the end of the current tick.
    pub(crate) fn schedule(&mut self, task: DeferredTask) {
        self.queue.push(task);
    }

    /// Take all queued tasks, leaving the queue empty.
    pub(crate) fn drain(&mut self) -> Vec<DeferredTask> {
        std::mem::take(&mut self.queue)
    }

    /// Cancel every task belonging to one of `anchors`.
    pub(crate) fn cancel_anchors(&mut self, anchors: &[AnchorId]) {
        self.queue.retain(|task| !anchors.contains(&task.anchor()));
    }
}
