//! Fault detector: normalization, dedup window, and forwarding.
//!
//! Single reader over the three kind-specific watcher channels. Faults for
//! one resource survive at most once per dedup window; a background sweeper
//! evicts stale entries so the map stays bounded by the set of recently
//! faulting resources.

use crate::fault::{Fault, RawFault};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

pub struct FaultDetector {
    window: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl FaultDetector {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Consume the watcher channels until shutdown, forwarding deduplicated
    /// faults to the orchestrator channel.
    pub async fn run(
        self: Arc<Self>,
        mut pods: mpsc::Receiver<RawFault>,
        mut deployments: mpsc::Receiver<RawFault>,
        mut jobs: mpsc::Receiver<RawFault>,
        out: mpsc::Sender<Fault>,
        shutdown: CancellationToken,
    ) {
        info!("fault detector started");
        loop {
            let raw = tokio::select! {
                () = shutdown.cancelled() => break,
                raw = pods.recv() => raw,
                raw = deployments.recv() => raw,
                raw = jobs.recv() => raw,
            };
            let Some(raw) = raw else { break };
            if !self.forward(raw, &out) {
                break;
            }
        }
        info!("fault detector stopped");
    }

    /// Periodically evict dedup entries older than twice the window.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = tick.tick() => self.sweep_at(Instant::now()),
            }
        }
    }

    /// Returns false only when the downstream channel is closed.
    fn forward(&self, raw: RawFault, out: &mpsc::Sender<Fault>) -> bool {
        let fault = Fault::from_raw(raw);
        let resource_id = fault.resource_id();

        if !self.admit_at(&resource_id, Instant::now()) {
            debug!(resource = %resource_id, "duplicate fault within dedup window, dropping");
            return true;
        }

        info!(
            resource = %resource_id,
            reason = %fault.reason,
            "fault confirmed"
        );

        match out.try_send(fault) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Shed rather than block the watchers; a persistent fault
                // re-surfaces on a later observation.
                warn!(resource = %resource_id, "orchestrator channel full, dropping fault");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Dedup check-and-update: admit iff the resource was last forwarded at
    /// least one window ago.
    fn admit_at(&self, resource_id: &str, now: Instant) -> bool {
        let mut last_seen = self.last_seen.lock().expect("dedup lock poisoned");
        if let Some(seen) = last_seen.get(resource_id) {
            if now.duration_since(*seen) < self.window {
                return false;
            }
        }
        last_seen.insert(resource_id.to_string(), now);
        true
    }

    fn sweep_at(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock().expect("dedup lock poisoned");
        let before = last_seen.len();
        last_seen.retain(|_, seen| now.duration_since(*seen) <= self.window * 2);
        let evicted = before - last_seen.len();
        if evicted > 0 {
            debug!(evicted, "swept stale dedup entries");
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_seen.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultKind, FaultReason};

    fn detector() -> FaultDetector {
        FaultDetector::new(Duration::from_secs(300))
    }

    #[test]
    fn first_observation_is_admitted() {
        let detector = detector();
        assert!(detector.admit_at("Pod/default/api-7", Instant::now()));
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let detector = detector();
        let t0 = Instant::now();
        assert!(detector.admit_at("Pod/default/api-7", t0));
        assert!(!detector.admit_at("Pod/default/api-7", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn observation_after_window_is_admitted_again() {
        let detector = detector();
        let t0 = Instant::now();
        assert!(detector.admit_at("Pod/default/api-7", t0));
        assert!(detector.admit_at("Pod/default/api-7", t0 + Duration::from_secs(301)));
    }

    #[test]
    fn distinct_resources_do_not_interfere() {
        let detector = detector();
        let t0 = Instant::now();
        assert!(detector.admit_at("Pod/default/api-7", t0));
        assert!(detector.admit_at("Deployment/default/api", t0));
    }

    #[test]
    fn sweep_evicts_entries_older_than_twice_the_window() {
        let detector = detector();
        let t0 = Instant::now();
        detector.admit_at("Pod/default/old", t0);
        detector.admit_at("Pod/default/fresh", t0 + Duration::from_secs(550));

        detector.sweep_at(t0 + Duration::from_secs(601));
        assert_eq!(detector.tracked(), 1);
        // The fresh entry still dedups.
        assert!(!detector.admit_at("Pod/default/fresh", t0 + Duration::from_secs(700)));
    }

    #[tokio::test]
    async fn duplicate_faults_forward_exactly_once() {
        let detector = Arc::new(detector());
        let (out_tx, mut out_rx) = mpsc::channel(100);

        let raw = RawFault::new(
            FaultKind::Pod,
            "default",
            "api-7",
            FaultReason::CrashLoopBackOff,
            "back-off 5m",
        );
        assert!(detector.forward(raw.clone(), &out_tx));
        assert!(detector.forward(raw, &out_tx));

        let forwarded = out_rx.recv().await.expect("one fault");
        assert_eq!(forwarded.resource_id(), "Pod/default/api-7");
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_sheds_instead_of_blocking() {
        let detector = Arc::new(FaultDetector::new(Duration::from_secs(0)));
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let raw = RawFault::new(
            FaultKind::Job,
            "batch",
            "etl-42",
            FaultReason::JobFailed,
            "failed",
        );
        assert!(detector.forward(raw.clone(), &out_tx));
        // Channel now full; the second forward must not block or error out.
        assert!(detector.forward(raw, &out_tx));

        assert!(out_rx.recv().await.is_some());
        assert!(out_rx.try_recv().is_err());
    }
}
