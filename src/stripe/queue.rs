//! Tile cohorts started and joined together in multi-threaded mode.

use log::trace;

use crate::codestream::{ThreadEnv, ThreadQueue};
use crate::error::{Result, StripeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueState {
    /// Accepting members.
    Created,
    /// Membership frozen, member jobs not yet released.
    QueuedPendingStart,
    Running,
    Joined,
}

pub(crate) struct TileQueue {
    pub state: QueueState,
    pub tile_row: u32,
    /// Arena slots of the member tiles.
    pub members: Vec<usize>,
    pub jobs: ThreadQueue,
}

impl TileQueue {
    pub fn new(env: &ThreadEnv, tile_row: u32) -> Self {
        Self {
            state: QueueState::Created,
            tile_row,
            members: Vec::new(),
            jobs: env.create_queue(),
        }
    }

    pub fn add_member(&mut self, slot: usize) -> Result<()> {
        if self.state != QueueState::Created {
            return Err(StripeError::InvalidState);
        }
        self.members.push(slot);
        Ok(())
    }

    pub fn seal(&mut self) -> Result<()> {
        if self.state != QueueState::Created {
            return Err(StripeError::InvalidState);
        }
        self.state = QueueState::QueuedPendingStart;
        Ok(())
    }

    /// Moves to `Running`. Callers start the member tiles right after.
    pub fn begin_start(&mut self) -> Result<()> {
        if self.state != QueueState::QueuedPendingStart {
            return Err(StripeError::InvalidState);
        }
        trace!("queue for tile row {} running with {} tiles", self.tile_row, self.members.len());
        self.state = QueueState::Running;
        Ok(())
    }

    pub fn join(&mut self, env: &ThreadEnv) {
        if self.state != QueueState::Joined {
            env.join(&self.jobs);
            self.state = QueueState::Joined;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == QueueState::Running
    }
}

/// Index arena of queues with a free stack.
#[derive(Default)]
pub(crate) struct QueueArena {
    slots: Vec<Option<TileQueue>>,
    free: Vec<usize>,
}

impl QueueArena {
    pub fn insert(&mut self, queue: TileQueue) -> QueueId {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(queue);
                QueueId(i)
            }
            None => {
                self.slots.push(Some(queue));
                QueueId(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, id: QueueId) -> Result<&TileQueue> {
        self.slots.get(id.0).and_then(Option::as_ref).ok_or(StripeError::InvalidState)
    }

    pub fn get_mut(&mut self, id: QueueId) -> Result<&mut TileQueue> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(StripeError::InvalidState)
    }

    pub fn remove(&mut self, id: QueueId) -> Option<TileQueue> {
        let queue = self.slots.get_mut(id.0)?.take();
        if queue.is_some() {
            self.free.push(id.0);
        }
        queue
    }

    pub fn ids(&self) -> Vec<QueueId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, q)| q.is_some())
            .map(|(i, _)| QueueId(i))
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
