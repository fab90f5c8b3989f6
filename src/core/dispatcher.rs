// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Per-user fan-out of enriched records
//!
//! Every observer owns a bounded queue. Publishing never waits: a full queue
//! loses that one record for that one observer, and a queue whose receiver
//! is gone is deregistered from every group it joined.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::EnrichedRecord;
use crate::error::{TelemetryError, TelemetryResult};

/// Dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Records queued per observer before new ones are dropped for it
    pub observer_buffer: usize,
    /// Capacity of the group-change broadcast channel
    pub group_event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            observer_buffer: 256,
            group_event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupChangeKind {
    Joined,
    Left,
}

/// Membership change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChange {
    pub user_id: String,
    pub observer: ObserverId,
    pub kind: GroupChangeKind,
    pub timestamp: DateTime<Utc>,
}

/// Receiving end handed to a newly registered observer
pub struct ObserverHandle {
    pub id: ObserverId,
    pub records: mpsc::Receiver<Arc<EnrichedRecord>>,
}

/// Result of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

struct ObserverEntry {
    sender: mpsc::Sender<Arc<EnrichedRecord>>,
    groups: HashSet<String>,
}

type Group = HashMap<ObserverId, mpsc::Sender<Arc<EnrichedRecord>>>;

pub struct Dispatcher {
    config: DispatchConfig,
    groups: DashMap<String, Group>,
    observers: DashMap<ObserverId, ObserverEntry>,
    group_tx: broadcast::Sender<GroupChange>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        let (group_tx, _) = broadcast::channel(config.group_event_capacity.max(1));
        Self {
            config,
            groups: DashMap::new(),
            observers: DashMap::new(),
            group_tx,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create an observer with its own bounded queue. It starts in no group.
    pub fn register_observer(&self) -> ObserverHandle {
        let (sender, records) = mpsc::channel(self.config.observer_buffer.max(1));
        let id = ObserverId::new();
        self.observers.insert(
            id,
            ObserverEntry {
                sender,
                groups: HashSet::new(),
            },
        );
        debug!(observer = %id, "Observer registered");
        ObserverHandle { id, records }
    }

    /// Add `observer` to the group of `user_id`. Returns false if it was already a member.
    pub fn subscribe(&self, observer: ObserverId, user_id: &str) -> TelemetryResult<bool> {
        let joined = {
            let mut entry = self
                .observers
                .get_mut(&observer)
                .ok_or_else(|| TelemetryError::UnknownObserver(observer.to_string()))?;
            if !entry.groups.insert(user_id.to_string()) {
                false
            } else {
                self.groups
                    .entry(user_id.to_string())
                    .or_default()
                    .insert(observer, entry.sender.clone());
                true
            }
        };

        if joined {
            info!(user = %user_id, observer = %observer, "Observer joined group");
            self.emit(user_id, observer, GroupChangeKind::Joined);
        }
        Ok(joined)
    }

    /// Remove `observer` from the group of `user_id`. Returns false if it was not a member.
    pub fn unsubscribe(&self, observer: ObserverId, user_id: &str) -> TelemetryResult<bool> {
        let left = {
            let mut entry = self
                .observers
                .get_mut(&observer)
                .ok_or_else(|| TelemetryError::UnknownObserver(observer.to_string()))?;
            // Leave the group before the observer entry is released
            let left = entry.groups.remove(user_id);
            if left {
                self.leave_group(user_id, observer);
            }
            left
        };

        if left {
            info!(user = %user_id, observer = %observer, "Observer left group");
            self.emit(user_id, observer, GroupChangeKind::Left);
        }
        Ok(left)
    }

    /// Deregister `observer` from every group and forget it
    pub fn remove_observer(&self, observer: ObserverId) -> usize {
        let Some((_, entry)) = self.observers.remove(&observer) else {
            return 0;
        };

        for user_id in &entry.groups {
            self.leave_group(user_id, observer);
            self.emit(user_id, observer, GroupChangeKind::Left);
        }
        debug!(observer = %observer, groups = entry.groups.len(), "Observer removed");
        entry.groups.len()
    }

    /// Drop every membership of the group for `user_id`
    pub fn clear_group(&self, user_id: &str) -> usize {
        let Some((_, members)) = self.groups.remove(user_id) else {
            return 0;
        };

        for observer in members.keys() {
            if let Some(mut entry) = self.observers.get_mut(observer) {
                entry.groups.remove(user_id);
            }
            self.emit(user_id, *observer, GroupChangeKind::Left);
        }
        info!(user = %user_id, members = members.len(), "Group cleared");
        members.len()
    }

    fn leave_group(&self, user_id: &str, observer: ObserverId) {
        if let Some(mut members) = self.groups.get_mut(user_id) {
            members.remove(&observer);
        }
        self.groups.remove_if(user_id, |_, members| members.is_empty());
    }

    /// Deliver `record` to the current members of its user's group, and nobody else
    pub fn publish(&self, record: Arc<EnrichedRecord>) -> DispatchOutcome {
        let targets: Vec<(ObserverId, mpsc::Sender<Arc<EnrichedRecord>>)> =
            match self.groups.get(&record.user_id) {
                Some(members) => members.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return DispatchOutcome::default(),
            };

        let mut outcome = DispatchOutcome::default();
        let mut closed = Vec::new();

        for (id, tx) in targets {
            match tx.try_send(record.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    debug!(observer = %id, user = %record.user_id, "Observer queue full, record dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    outcome.dropped += 1;
                    closed.push(id);
                }
            }
        }

        for id in closed {
            warn!(observer = %id, "Observer went away, deregistering");
            self.remove_observer(id);
        }

        self.delivered.fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        outcome
    }

    pub fn subscribe_group_changes(&self) -> broadcast::Receiver<GroupChange> {
        self.group_tx.subscribe()
    }

    fn emit(&self, user_id: &str, observer: ObserverId, kind: GroupChangeKind) {
        let _ = self.group_tx.send(GroupChange {
            user_id: user_id.to_string(),
            observer,
            kind,
            timestamp: Utc::now(),
        });
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.groups.get(user_id).map(|g| g.len()).unwrap_or(0)
    }

    pub fn groups_of(&self, observer: ObserverId) -> Vec<String> {
        self.observers
            .get(&observer)
            .map(|e| e.groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Lifetime (delivered, dropped) totals
    pub fn totals(&self) -> (u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::tests::record_for;

    #[tokio::test]
    async fn test_record_reaches_only_own_group() {
        let dispatcher = Dispatcher::default();
        let mut a = dispatcher.register_observer();
        let mut b = dispatcher.register_observer();
        dispatcher.subscribe(a.id, "alice").unwrap();
        dispatcher.subscribe(b.id, "bob").unwrap();

        let outcome = dispatcher.publish(record_for("alice"));
        assert_eq!(outcome.delivered, 1);

        let got = a.records.recv().await.unwrap();
        assert_eq!(got.user_id, "alice");
        assert!(b.records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_delivers_nothing() {
        let dispatcher = Dispatcher::default();
        let mut b = dispatcher.register_observer();
        dispatcher.subscribe(b.id, "bob").unwrap();

        let outcome = dispatcher.publish(record_for("alice"));
        assert_eq!(outcome, DispatchOutcome::default());
        assert!(b.records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_all_members_receive() {
        let dispatcher = Dispatcher::default();
        let mut handles: Vec<_> = (0..3).map(|_| dispatcher.register_observer()).collect();
        for h in &handles {
            dispatcher.subscribe(h.id, "carol").unwrap();
        }

        assert_eq!(dispatcher.publish(record_for("carol")).delivered, 3);
        for h in handles.iter_mut() {
            assert_eq!(h.records.recv().await.unwrap().user_id, "carol");
        }
    }

    #[tokio::test]
    async fn test_late_joiner_gets_no_backlog() {
        let dispatcher = Dispatcher::default();
        dispatcher.publish(record_for("dave"));

        let mut late = dispatcher.register_observer();
        dispatcher.subscribe(late.id, "dave").unwrap();
        assert!(late.records.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_twice_is_single_membership() {
        let dispatcher = Dispatcher::default();
        let h = dispatcher.register_observer();
        assert!(dispatcher.subscribe(h.id, "erin").unwrap());
        assert!(!dispatcher.subscribe(h.id, "erin").unwrap());
        assert_eq!(dispatcher.subscriber_count("erin"), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let dispatcher = Dispatcher::default();
        let mut h = dispatcher.register_observer();
        dispatcher.subscribe(h.id, "frank").unwrap();
        assert!(dispatcher.unsubscribe(h.id, "frank").unwrap());
        assert!(!dispatcher.unsubscribe(h.id, "frank").unwrap());

        assert_eq!(dispatcher.publish(record_for("frank")).delivered, 0);
        assert!(h.records.try_recv().is_err());
        assert_eq!(dispatcher.group_count(), 0);
    }

    #[test]
    fn test_concurrent_toggle_keeps_membership_consistent() {
        let dispatcher = Arc::new(Dispatcher::default());
        let h = dispatcher.register_observer();
        let id = h.id;

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        dispatcher.subscribe(id, "hank").unwrap();
                        dispatcher.unsubscribe(id, "hank").unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let listed = dispatcher.groups_of(id).contains(&"hank".to_string());
        let member = dispatcher.subscriber_count("hank") == 1;
        assert_eq!(listed, member);

        dispatcher.subscribe(id, "hank").unwrap();
        assert_eq!(dispatcher.subscriber_count("hank"), 1);
        assert_eq!(dispatcher.groups_of(id), vec!["hank".to_string()]);
    }

    #[test]
    fn test_unknown_observer_rejected() {
        let dispatcher = Dispatcher::default();
        let h = dispatcher.register_observer();
        dispatcher.remove_observer(h.id);
        assert!(matches!(
            dispatcher.subscribe(h.id, "x"),
            Err(TelemetryError::UnknownObserver(_))
        ));
    }

    #[test]
    fn test_remove_observer_leaves_every_group() {
        let dispatcher = Dispatcher::default();
        let h = dispatcher.register_observer();
        dispatcher.subscribe(h.id, "g1").unwrap();
        dispatcher.subscribe(h.id, "g2").unwrap();

        assert_eq!(dispatcher.remove_observer(h.id), 2);
        assert_eq!(dispatcher.subscriber_count("g1"), 0);
        assert_eq!(dispatcher.subscriber_count("g2"), 0);
        assert_eq!(dispatcher.observer_count(), 0);
        assert_eq!(dispatcher.group_count(), 0);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            observer_buffer: 2,
            ..DispatchConfig::default()
        });
        let mut slow = dispatcher.register_observer();
        let mut fast = dispatcher.register_observer();
        dispatcher.subscribe(slow.id, "gina").unwrap();
        dispatcher.subscribe(fast.id, "gina").unwrap();

        let mut dropped = 0;
        for _ in 0..5 {
            let outcome = dispatcher.publish(record_for("gina"));
            dropped += outcome.dropped;
            // Fast observer keeps draining
            while fast.records.try_recv().is_ok() {}
        }

        assert_eq!(dropped, 3);
        let mut queued = 0;
        while slow.records.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 2);
    }

    #[test]
    fn test_closed_observer_is_deregistered() {
        let dispatcher = Dispatcher::default();
        let h = dispatcher.register_observer();
        dispatcher.subscribe(h.id, "hank").unwrap();
        drop(h.records);

        let outcome = dispatcher.publish(record_for("hank"));
        assert_eq!(outcome.delivered, 0);
        assert_eq!(dispatcher.observer_count(), 0);
        assert_eq!(dispatcher.subscriber_count("hank"), 0);
    }

    #[test]
    fn test_group_change_events() {
        let dispatcher = Dispatcher::default();
        let mut events = dispatcher.subscribe_group_changes();
        let h = dispatcher.register_observer();

        dispatcher.subscribe(h.id, "ivy").unwrap();
        dispatcher.remove_observer(h.id);

        let joined = events.try_recv().unwrap();
        assert_eq!(joined.kind, GroupChangeKind::Joined);
        assert_eq!(joined.user_id, "ivy");
        let left = events.try_recv().unwrap();
        assert_eq!(left.kind, GroupChangeKind::Left);
        assert_eq!(left.observer, h.id);
    }

    #[test]
    fn test_clear_group() {
        let dispatcher = Dispatcher::default();
        let a = dispatcher.register_observer();
        let b = dispatcher.register_observer();
        dispatcher.subscribe(a.id, "jack").unwrap();
        dispatcher.subscribe(b.id, "jack").unwrap();
        dispatcher.subscribe(b.id, "kate").unwrap();

        assert_eq!(dispatcher.clear_group("jack"), 2);
        assert!(dispatcher.groups_of(a.id).is_empty());
        assert_eq!(dispatcher.groups_of(b.id), vec!["kate".to_string()]);
    }
}
