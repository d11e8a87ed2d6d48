//! Shared list+watch machinery.
//!
//! Each watcher keeps a reflector-backed local cache and pushes canonical
//! object keys through a bounded queue; a single worker drains the queue with
//! a minimum spacing so a flapping resource cannot starve the loop, re-reads
//! the live object from the cache, and runs the kind's classification rules.

use super::CHANNEL_CAPACITY;
use crate::fault::RawFault;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::reflector::{self, Lookup, ObjectRef};
use kube::runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Minimum spacing between processed queue items.
const PROCESS_SPACING: Duration = Duration::from_millis(200);

/// Drive one list+watch stream until shutdown.
///
/// Delete events never reach the queue: the reflector drops deleted objects
/// from the cache and `applied_objects` only yields add/update events.
pub(crate) async fn run_watch<K>(
    api: Api<K>,
    resync: Duration,
    classify: fn(&K) -> Option<RawFault>,
    faults: mpsc::Sender<RawFault>,
    shutdown: CancellationToken,
) where
    K: kube::Resource<DynamicType = ()>
        + Lookup<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let kind = <K as kube::Resource>::kind(&()).to_string();
    let (store, writer) = reflector::store::<K>();
    let (key_tx, mut key_rx) = mpsc::channel::<ObjectRef<K>>(CHANNEL_CAPACITY);

    debug!(kind = %kind, "starting watcher");

    let stream_task = {
        let shutdown = shutdown.clone();
        let enqueue = key_tx.clone();
        let kind = kind.clone();
        tokio::spawn(async move {
            let stream = watcher(api, watcher::Config::default())
                .default_backoff()
                .reflect(writer)
                .applied_objects();
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(obj)) => {
                            if enqueue.try_send(ObjectRef::from_obj(&obj)).is_err() {
                                warn!(kind = %kind, "watch queue full, shedding event");
                            }
                        }
                        Some(Err(err)) => {
                            warn!(kind = %kind, error = %err, "watch stream error");
                        }
                        None => break,
                    }
                }
            }
        })
    };

    let mut resync_tick = tokio::time::interval(resync);
    resync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    resync_tick.tick().await; // interval fires immediately; the initial list covers it
    let mut spacing = tokio::time::interval(PROCESS_SPACING);
    spacing.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = resync_tick.tick() => {
                for obj in store.state() {
                    if key_tx.try_send(ObjectRef::from_obj(obj.as_ref())).is_err() {
                        warn!(kind = %kind, "watch queue full during resync, shedding");
                        break;
                    }
                }
            }
            maybe_key = key_rx.recv() => {
                let Some(key) = maybe_key else { break };
                spacing.tick().await;
                // Re-read from the cache: queues hold keys, never objects.
                let Some(obj) = store.get(&key) else { continue };
                if let Some(fault) = classify(obj.as_ref()) {
                    if faults.try_send(fault).is_err() {
                        warn!(kind = %kind, resource = %key, "fault channel full, dropping observation");
                    }
                }
            }
        }
    }

    stream_task.abort();
    debug!(kind = %kind, "watcher stopped");
}
