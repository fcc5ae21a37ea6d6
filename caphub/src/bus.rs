//! In-process event bus: bounded per-subscriber buffers, non-blocking publish.
//!
//! A slow subscriber never stalls the executor: on overflow the oldest
//! buffered event is discarded (and counted) or the subscriber is
//! disconnected, per the bus policy. Per-run ordering is preserved because
//! events are stamped with a per-run sequence before they reach the bus.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use run_event::RunEvent;
use serde_json::Value;
use tokio::sync::Notify;

/// What a subscriber does when its buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest buffered event and count it.
    DropOldest,
    /// Close the subscription; `recv` drains the buffer then returns `None`.
    Disconnect,
}

/// Which events a subscription receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Run(String),
}

impl EventFilter {
    fn matches(&self, event: &RunEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Run(id) => event.run_id() == Some(id.as_str()),
        }
    }
}

/// One delivered event: the typed event plus its enveloped JSON form.
#[derive(Clone, Debug)]
pub struct BusEvent {
    pub event: RunEvent,
    pub value: Value,
}

struct SubEntry {
    filter: EventFilter,
    queue: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

fn lock_queue(entry: &SubEntry) -> MutexGuard<'_, VecDeque<BusEvent>> {
    entry.queue.lock().unwrap_or_else(|p| p.into_inner())
}

struct BusInner {
    subs: DashMap<u64, Arc<SubEntry>>,
    next_id: AtomicU64,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Bounded publish/subscribe bus for lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subs: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                policy,
            }),
        }
    }

    /// Registers a subscriber with its own bounded buffer.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(SubEntry {
            filter,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        self.inner.subs.insert(id, entry.clone());
        Subscription {
            id,
            entry,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers the event to every matching subscriber without blocking.
    /// `value` is the enveloped JSON form (run_id + seq already stamped).
    pub fn publish(&self, event: RunEvent, value: Value) {
        let mut stale: Vec<u64> = Vec::new();
        for sub in self.inner.subs.iter() {
            let entry = sub.value();
            if entry.closed.load(Ordering::Acquire) {
                stale.push(*sub.key());
                continue;
            }
            if !entry.filter.matches(&event) {
                continue;
            }
            let mut queue = lock_queue(entry);
            if queue.len() >= self.inner.capacity {
                match self.inner.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        entry.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    OverflowPolicy::Disconnect => {
                        entry.closed.store(true, Ordering::Release);
                        drop(queue);
                        entry.notify.notify_one();
                        stale.push(*sub.key());
                        continue;
                    }
                }
            }
            queue.push_back(BusEvent {
                event: event.clone(),
                value: value.clone(),
            });
            drop(queue);
            entry.notify.notify_one();
        }
        for id in stale {
            self.inner.subs.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.len()
    }
}

/// Receiving side of one subscription. Dropping it detaches from the bus.
pub struct Subscription {
    id: u64,
    entry: Arc<SubEntry>,
    bus: std::sync::Weak<BusInner>,
}

impl Subscription {
    /// Next buffered event; `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            let notified = self.entry.notify.notified();
            {
                let mut queue = lock_queue(&self.entry);
                if let Some(ev) = queue.pop_front() {
                    return Some(ev);
                }
                if self.entry.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        lock_queue(&self.entry).pop_front()
    }

    /// Events discarded from this buffer under `DropOldest`.
    pub fn dropped(&self) -> u64 {
        self.entry.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.entry.closed.store(true, Ordering::Release);
        if let Some(bus) = self.bus.upgrade() {
            bus.subs.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(run_id: &str, content: &str) -> (RunEvent, Value) {
        let ev = RunEvent::Token {
            run_id: run_id.into(),
            content: content.into(),
        };
        let v = ev.to_value().unwrap();
        (ev, v)
    }

    #[tokio::test]
    async fn delivers_to_matching_filter_only() {
        let bus = EventBus::new(8, OverflowPolicy::DropOldest);
        let mut all = bus.subscribe(EventFilter::All);
        let mut one = bus.subscribe(EventFilter::Run("run-a".into()));

        let (ev_a, v_a) = token("run-a", "x");
        let (ev_b, v_b) = token("run-b", "y");
        bus.publish(ev_a, v_a);
        bus.publish(ev_b, v_b);

        assert_eq!(all.recv().await.unwrap().event.run_id(), Some("run-a"));
        assert_eq!(all.recv().await.unwrap().event.run_id(), Some("run-b"));
        assert_eq!(one.recv().await.unwrap().event.run_id(), Some("run-a"));
        assert!(one.try_recv().is_none());
    }

    #[tokio::test]
    async fn drop_oldest_on_overflow_keeps_newest() {
        let bus = EventBus::new(2, OverflowPolicy::DropOldest);
        let mut sub = bus.subscribe(EventFilter::All);
        for i in 0..4 {
            let (ev, v) = token("run-a", &i.to_string());
            bus.publish(ev, v);
        }
        assert_eq!(sub.dropped(), 2);
        let first = sub.recv().await.unwrap();
        match first.event {
            RunEvent::Token { content, .. } => assert_eq!(content, "2"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_on_overflow_closes_subscription() {
        let bus = EventBus::new(1, OverflowPolicy::Disconnect);
        let mut sub = bus.subscribe(EventFilter::All);
        let (ev, v) = token("run-a", "0");
        bus.publish(ev, v);
        let (ev, v) = token("run-a", "1");
        bus.publish(ev, v); // overflow: disconnect
        assert_eq!(bus.subscriber_count(), 0);
        // drains the buffered event, then closes
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_detaches() {
        let bus = EventBus::new(8, OverflowPolicy::DropOldest);
        let sub = bus.subscribe(EventFilter::All);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn per_run_order_preserved() {
        let bus = EventBus::new(64, OverflowPolicy::DropOldest);
        let mut sub = bus.subscribe(EventFilter::Run("run-a".into()));
        for i in 0..10 {
            let (ev, v) = token("run-a", &i.to_string());
            bus.publish(ev, v);
        }
        for i in 0..10 {
            match sub.recv().await.unwrap().event {
                RunEvent::Token { content, .. } => assert_eq!(content, i.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
