//! Cancellable delayed actions, polled by the orchestrator loop.

use super::TimerKey;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};

pub struct Timers {
    queue: DelayQueue<TimerKey>,
    keys: HashMap<TimerKey, delay_queue::Key>,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Schedules `key` after `delay`, replacing a pending one.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        if let Some(old) = self.keys.remove(&key) {
            self.queue.remove(&old);
        }
        let slot = self.queue.insert(key.clone(), delay);
        self.keys.insert(key, slot);
    }

    /// Returns true if `key` was pending.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.keys.remove(key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &TimerKey) -> bool {
        self.keys.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Waits for the next due key. Returns None when nothing is pending.
    ///
    /// Cancel safe: a key is only consumed when it is returned.
    pub async fn next_expired(&mut self) -> Option<TimerKey> {
        let expired = std::future::poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let key = expired.into_inner();
        self.keys.remove(&key);
        Some(key)
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_in_order() {
        let mut timers = Timers::new();
        timers.schedule(TimerKey::DelayedBroadcast(2), Duration::from_millis(300));
        timers.schedule(TimerKey::RestoreDefault(1), Duration::from_millis(100));
        assert_eq!(timers.len(), 2);

        assert_eq!(timers.next_expired().await, Some(TimerKey::RestoreDefault(1)));
        assert_eq!(timers.next_expired().await, Some(TimerKey::DelayedBroadcast(2)));
        assert!(timers.is_empty());
        assert_eq!(timers.next_expired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_reschedule() {
        let mut timers = Timers::new();
        let key = TimerKey::RestoreDefault(7);
        timers.schedule(key.clone(), Duration::from_secs(60));
        assert!(timers.is_scheduled(&key));
        assert!(timers.cancel(&key));
        assert!(!timers.cancel(&key));
        assert!(timers.is_empty());

        timers.schedule(key.clone(), Duration::from_secs(60));
        timers.schedule(key.clone(), Duration::from_secs(1));
        assert_eq!(timers.len(), 1);
        let start = tokio::time::Instant::now();
        assert_eq!(timers.next_expired().await, Some(key));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
