//! One debounce timer per chat. Scheduling while a timer is pending only
//! pushes its deadline out; no extra tasks are spawned, so a burst of
//! batches for one chat coalesces into a single extraction run.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::extract::Extractor;

#[derive(Clone)]
pub struct ChatDebouncer {
    inner: Arc<Inner>,
}

struct Inner {
    delay: Duration,
    deadlines: DashMap<Uuid, Instant>,
    extractor: Extractor,
}

impl ChatDebouncer {
    pub fn new(delay: Duration, extractor: Extractor) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay,
                deadlines: DashMap::new(),
                extractor,
            }),
        }
    }

    /// Arms (or re-arms) the chat's timer. The single waiter task fires once
    /// the deadline stops moving.
    pub fn schedule(&self, chat_id: Uuid) {
        let deadline = Instant::now() + self.inner.delay;
        let already_armed = self.inner.deadlines.insert(chat_id, deadline).is_some();
        if already_armed {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let Some(deadline) = inner.deadlines.get(&chat_id).map(|d| *d) else {
                    return;
                };
                if Instant::now() >= deadline {
                    inner.deadlines.remove(&chat_id);
                    inner.extractor.run(chat_id).await;
                    return;
                }
                tokio::time::sleep_until(deadline).await;
            }
        });
    }

    pub fn pending(&self) -> usize {
        self.inner.deadlines.len()
    }
}
