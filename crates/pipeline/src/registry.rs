//! Cancellation registry: task id to the cancellation handle of its poll.
//!
//! Owned by the orchestrator and passed to the consumer explicitly. Every
//! operation takes the same mutex, so a handle is never fired after its
//! owner has unregistered it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use storyreel_core::types::EntityId;
use tokio_util::sync::CancellationToken;

struct Entry {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Handles {
    entries: HashMap<EntityId, Entry>,
    next_generation: u64,
}

#[derive(Default)]
pub struct CancellationRegistry {
    handles: Mutex<Handles>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token` for `task_id`. A handle already registered for the id
    /// is removed and cancelled, so at most one poll per task stays live.
    ///
    /// The returned guard unregisters the handle when dropped, unless a
    /// later registration has replaced it.
    pub fn register(self: &Arc<Self>, task_id: EntityId, token: CancellationToken) -> Registration {
        let generation = {
            let mut handles = self.lock();
            handles.next_generation += 1;
            let generation = handles.next_generation;
            if let Some(prior) = handles.entries.insert(task_id, Entry { token, generation }) {
                tracing::warn!(task_id = %task_id, "Evicting previous poll registration");
                prior.token.cancel();
            }
            generation
        };
        Registration {
            registry: Arc::clone(self),
            task_id,
            generation,
        }
    }

    /// Remove and invalidate the handle for `task_id`. Returns whether one
    /// was registered.
    pub fn unregister(&self, task_id: EntityId) -> bool {
        match self.lock().entries.remove(&task_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the handle for `task_id` and fire it. Returns whether one was
    /// found; a second call without a new registration returns `false`.
    pub fn cancel(&self, task_id: EntityId) -> bool {
        let mut handles = self.lock();
        match handles.entries.remove(&task_id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(task_id = %task_id, "Poll cancellation signalled");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: EntityId) -> bool {
        self.lock().entries.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, task_id: EntityId, generation: u64) {
        let mut handles = self.lock();
        if handles
            .entries
            .get(&task_id)
            .is_some_and(|e| e.generation == generation)
        {
            if let Some(entry) = handles.entries.remove(&task_id) {
                entry.token.cancel();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Live registration of one poll. Dropping it unregisters the handle.
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    task_id: EntityId,
    generation: u64,
}

impl Registration {
    pub fn task_id(&self) -> EntityId {
        self.task_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.task_id, self.generation);
    }
}
