use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::router::ReplicaView;

#[derive(Debug, Default, Clone, Copy)]
struct ReplicaSlot {
    down_until: Option<Instant>,
    last_used: Option<Instant>,
}

/// Shared health and usage bookkeeping for the replica set.
#[derive(Debug)]
pub(crate) struct ReplicaHealth {
    slots: Mutex<Vec<ReplicaSlot>>,
    cursor: AtomicUsize,
    cooldown: Duration,
}

impl ReplicaHealth {
    pub(crate) fn new(count: usize, cooldown: Duration) -> Self {
        Self {
            slots: Mutex::new(vec![ReplicaSlot::default(); count]),
            cursor: AtomicUsize::new(0),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReplicaSlot>> {
        // Clear the poison and continue with the recovered data
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Health as of `now`; a replica past its cooldown is routable again.
    pub(crate) fn snapshot(&self, now: Instant) -> Vec<ReplicaView> {
        self.lock()
            .iter()
            .map(|slot| ReplicaView {
                healthy: slot.down_until.is_none_or(|until| now >= until),
                last_used: slot.last_used,
            })
            .collect()
    }

    /// Advance and return the round-robin cursor.
    pub(crate) fn next_cursor(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn mark_used(&self, idx: usize, now: Instant) {
        if let Some(slot) = self.lock().get_mut(idx) {
            slot.last_used = Some(now);
        }
    }

    pub(crate) fn mark_unhealthy(&self, idx: usize, now: Instant) {
        if let Some(slot) = self.lock().get_mut(idx) {
            if slot.down_until.is_none_or(|until| now >= until) {
                warn!(
                    replica = idx,
                    cooldown_ms = self.cooldown.as_millis(),
                    "replica marked unhealthy"
                );
            }
            slot.down_until = Some(now + self.cooldown);
        }
    }

    pub(crate) fn mark_healthy(&self, idx: usize) {
        if let Some(slot) = self.lock().get_mut(idx)
            && slot.down_until.take().is_some()
        {
            info!(replica = idx, "replica healthy again");
        }
    }
}
