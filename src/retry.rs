//! Per-resource remediation attempt accounting.
//!
//! Counters are sticky beyond exhaustion: without resolution verification the
//! pipeline cannot know a prior attempt worked, so a resource that hit the
//! limit stays ineligible until an explicit reset or a process restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a resource is (in)eligible for a new remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryGate {
    Ready,
    /// Inside the backoff interval since the last attempt.
    Backoff { remaining: Duration },
    /// Attempt limit reached; stays this way until reset.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    attempts: u32,
    last_attempt: Instant,
}

pub struct RetryManager {
    max_retries: u32,
    backoff: Duration,
    entries: Mutex<HashMap<String, RetryEntry>>,
}

impl RetryManager {
    #[must_use]
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Gate decision for a resource: eligible iff attempts are below the
    /// limit and the backoff interval has elapsed. Exhaustion takes
    /// precedence over backoff so the orchestrator escalates rather than
    /// waits forever.
    #[must_use]
    pub fn evaluate(&self, resource_id: &str) -> RetryGate {
        self.evaluate_at(resource_id, Instant::now())
    }

    /// Record an attempt: bump the counter and stamp the backoff clock.
    pub fn increment(&self, resource_id: &str) -> u32 {
        let mut entries = self.entries.lock().expect("retry lock poisoned");
        let entry = entries.entry(resource_id.to_string()).or_insert(RetryEntry {
            attempts: 0,
            last_attempt: Instant::now(),
        });
        entry.attempts += 1;
        entry.last_attempt = Instant::now();
        debug!(
            resource = resource_id,
            attempts = entry.attempts,
            max = self.max_retries,
            "incremented retry count"
        );
        entry.attempts
    }

    /// Drop all accounting for a resource. Only called on explicit external
    /// signal; the pipeline never auto-resets.
    pub fn reset(&self, resource_id: &str) {
        let mut entries = self.entries.lock().expect("retry lock poisoned");
        if entries.remove(resource_id).is_some() {
            debug!(resource = resource_id, "reset retry count");
        }
    }

    #[must_use]
    pub fn attempt_count(&self, resource_id: &str) -> u32 {
        let entries = self.entries.lock().expect("retry lock poisoned");
        entries.get(resource_id).map_or(0, |e| e.attempts)
    }

    fn evaluate_at(&self, resource_id: &str, now: Instant) -> RetryGate {
        let entries = self.entries.lock().expect("retry lock poisoned");
        let Some(entry) = entries.get(resource_id) else {
            return if self.max_retries == 0 {
                RetryGate::Exhausted { attempts: 0 }
            } else {
                RetryGate::Ready
            };
        };

        if entry.attempts >= self.max_retries {
            return RetryGate::Exhausted {
                attempts: entry.attempts,
            };
        }

        let elapsed = now.duration_since(entry.last_attempt);
        if elapsed < self.backoff {
            return RetryGate::Backoff {
                remaining: self.backoff - elapsed,
            };
        }

        RetryGate::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "Deployment/prod/web";

    #[test]
    fn fresh_resource_is_ready() {
        let manager = RetryManager::new(2, Duration::from_secs(30));
        assert_eq!(manager.evaluate(RID), RetryGate::Ready);
        assert_eq!(manager.attempt_count(RID), 0);
    }

    #[test]
    fn zero_max_retries_is_exhausted_immediately() {
        let manager = RetryManager::new(0, Duration::from_secs(30));
        assert_eq!(manager.evaluate(RID), RetryGate::Exhausted { attempts: 0 });
    }

    #[test]
    fn backoff_blocks_until_elapsed() {
        let manager = RetryManager::new(2, Duration::from_millis(50));
        manager.increment(RID);

        assert!(matches!(manager.evaluate(RID), RetryGate::Backoff { .. }));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(manager.evaluate(RID), RetryGate::Ready);
    }

    #[test]
    fn exhaustion_is_sticky() {
        let manager = RetryManager::new(2, Duration::from_millis(0));
        manager.increment(RID);
        manager.increment(RID);

        assert_eq!(manager.evaluate(RID), RetryGate::Exhausted { attempts: 2 });
        // Backoff elapsing does not change exhaustion.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(manager.evaluate(RID), RetryGate::Exhausted { attempts: 2 });
    }

    #[test]
    fn attempts_never_decrease_without_reset() {
        let manager = RetryManager::new(5, Duration::from_millis(0));
        let mut previous = 0;
        for _ in 0..4 {
            let now = manager.increment(RID);
            assert!(now > previous);
            previous = now;
        }
    }

    #[test]
    fn reset_clears_the_entry() {
        let manager = RetryManager::new(1, Duration::from_secs(30));
        manager.increment(RID);
        assert_eq!(manager.evaluate(RID), RetryGate::Exhausted { attempts: 1 });

        manager.reset(RID);
        assert_eq!(manager.evaluate(RID), RetryGate::Ready);
        assert_eq!(manager.attempt_count(RID), 0);
    }

    #[test]
    fn resources_are_accounted_independently() {
        let manager = RetryManager::new(1, Duration::from_millis(0));
        manager.increment(RID);
        assert_eq!(manager.evaluate("Pod/default/api-7"), RetryGate::Ready);
    }

    #[test]
    fn exhaustion_takes_precedence_over_backoff() {
        let manager = RetryManager::new(1, Duration::from_secs(3600));
        manager.increment(RID);
        // Both limits are tripped; exhaustion must win so escalation runs.
        assert_eq!(manager.evaluate(RID), RetryGate::Exhausted { attempts: 1 });
    }
}
