//! Fan-out of snapshots to live subscribers.
//!
//! The hub is a registry of opaque subscriber handles. `broadcast` hands
//! every registered handle the same `Arc<MetricsSnapshot>` through a
//! non-blocking `deliver`; a full or closed subscriber never holds up the
//! rest. Nothing is buffered for subscribers that register later, apart
//! from the single `latest` snapshot kept for on-demand backfill.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::MetricsSnapshot;

pub type SubscriberId = u64;

/// Per-subscriber channel depth. A subscriber that falls this far behind
/// starts missing snapshots instead of slowing the collection loop.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    // subscriber is alive but its buffer is full; this snapshot is skipped for it
    Dropped,
    // subscriber is gone and will be unregistered
    Closed,
}

/// A live consumer of snapshots. `deliver` must return without waiting on I/O.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, snapshot: Arc<MetricsSnapshot>) -> Delivery;
}

/// Subscriber backed by a bounded tokio channel; the receiving side does the slow I/O.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<MetricsSnapshot>>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<MetricsSnapshot>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, snapshot: Arc<MetricsSnapshot>) -> Delivery {
        match self.tx.try_send(snapshot) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
    latest: RwLock<Option<Arc<MetricsSnapshot>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscriber);
        id
    }

    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Register a channel subscriber; dropping the returned guard unregisters it.
    pub fn subscribe(
        self: &Arc<Self>,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Arc<MetricsSnapshot>>) {
        let (sub, rx) = ChannelSubscriber::new(capacity);
        let id = self.register(Arc::new(sub));
        (
            Subscription {
                hub: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Most recent broadcast snapshot, for backfilling a new consumer.
    pub fn latest(&self) -> Option<Arc<MetricsSnapshot>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn broadcast(&self, snapshot: impl Into<Arc<MetricsSnapshot>>) -> BroadcastReport {
        let snapshot: Arc<MetricsSnapshot> = snapshot.into();
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));

        // Deliver outside the lock so (un)registration never waits on a broadcast.
        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();
        for (id, sub) in targets {
            match sub.deliver(Arc::clone(&snapshot)) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    debug!(subscriber = id, "subscriber lagging, snapshot skipped");
                    report.dropped += 1;
                }
                Delivery::Closed => {
                    report.closed += 1;
                    gone.push(id);
                }
            }
        }
        if !gone.is_empty() {
            let mut subs = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for id in gone {
                subs.remove(&id);
                debug!(subscriber = id, "subscriber closed, unregistered");
            }
        }
        report
    }
}

/// Registration guard returned by [`BroadcastHub::subscribe`].
pub struct Subscription {
    hub: Arc<BroadcastHub>,
    id: SubscriberId,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;
    use chrono::Utc;

    fn snap(cpu: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            cpu_load_percent: cpu,
            cpu_temp_c: Reading::Unavailable,
            memory_used_percent: 0.0,
            disk_used_percent: 0.0,
            gpu_model: None,
            gpu_temp_c: Reading::Unavailable,
            top_processes_by_memory: vec![],
            containers: vec![],
        }
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_block_others() {
        let hub = Arc::new(BroadcastHub::new());
        let (_a, mut rx_a) = hub.subscribe(4);
        let (_b, rx_b) = hub.subscribe(4);
        let (_c, mut rx_c) = hub.subscribe(4);
        drop(rx_b);

        let report = hub.broadcast(snap(1.0));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.closed, 1);
        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(rx_a.recv().await.unwrap().cpu_load_percent, 1.0);
        assert_eq!(rx_c.recv().await.unwrap().cpu_load_percent, 1.0);
    }

    #[tokio::test]
    async fn full_subscriber_skips_snapshot_but_stays_registered() {
        let hub = Arc::new(BroadcastHub::new());
        let (_slow, mut slow_rx) = hub.subscribe(1);
        let (_fast, mut fast_rx) = hub.subscribe(4);

        hub.broadcast(snap(1.0));
        let report = hub.broadcast(snap(2.0));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(slow_rx.recv().await.unwrap().cpu_load_percent, 1.0);
        assert_eq!(fast_rx.recv().await.unwrap().cpu_load_percent, 1.0);
        assert_eq!(fast_rx.recv().await.unwrap().cpu_load_percent, 2.0);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let hub = Arc::new(BroadcastHub::new());
        hub.broadcast(snap(1.0));
        let (_sub, mut rx) = hub.subscribe(4);
        assert!(rx.try_recv().is_err());
        // backfill is pull-only
        assert_eq!(hub.latest().unwrap().cpu_load_percent, 1.0);
        hub.broadcast(snap(2.0));
        assert_eq!(rx.recv().await.unwrap().cpu_load_percent, 2.0);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let hub = Arc::new(BroadcastHub::new());
        let (sub, _rx) = hub.subscribe(1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.broadcast(snap(0.0)), BroadcastReport::default());
    }

    #[test]
    fn broadcast_with_no_subscribers_still_updates_latest() {
        let hub = BroadcastHub::new();
        assert!(hub.latest().is_none());
        hub.broadcast(snap(3.5));
        assert_eq!(hub.latest().unwrap().cpu_load_percent, 3.5);
    }
}
