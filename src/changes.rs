//! Change events and per-tick batching.
//!
//! Writes raise raw per-component events on the world's event bus.
//! The [`ChangeAggregator`] subscribes to those events,
//! ORs them into one mask per `(entity, type)` pair
//! and publishes a single de-duplicated batch per non-empty phase.
//! Batch consumers read current component values through the normal read path;
//! records carry no value.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::entity::Entity;
use crate::util::DbgTypeId;

/// A single raw change kind, as raised by one write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A component was added to an entity.
    Added,
    /// An existing component value was replaced.
    Changed,
    /// A component was removed from an entity.
    Removed,
}

impl ChangeKind {
    /// The mask bit for this kind.
    pub fn mask(self) -> ChangeMask {
        match self {
            Self::Added => ChangeMask::ADDED,
            Self::Changed => ChangeMask::CHANGED,
            Self::Removed => ChangeMask::REMOVED,
        }
    }
}

/// A bitwise OR of change kinds accumulated for one `(entity, type)` pair
/// during one aggregation window.
///
/// A remove following an add within the same window keeps the terminal
/// [`REMOVED`](Self::REMOVED) bit rather than cancelling to no record,
/// so consumers must test for removal before reading a value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeMask(u8);

impl ChangeMask {
    /// The component was absent at the start of the window and added during it.
    pub const ADDED: Self = Self(1);
    /// The component value was replaced during the window.
    pub const CHANGED: Self = Self(1 << 1);
    /// The component was removed during the window.
    pub const REMOVED: Self = Self(1 << 2);

    /// Whether all bits of `other` are set in `self`.
    pub fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    /// Whether no bits are set.
    pub fn is_empty(self) -> bool { self.0 == 0 }
}

impl BitOr for ChangeMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl BitOrAssign for ChangeMask {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

impl fmt::Debug for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::ADDED) {
            names.push("Added");
        }
        if self.contains(Self::CHANGED) {
            names.push("Changed");
        }
        if self.contains(Self::REMOVED) {
            names.push("Removed");
        }
        if names.is_empty() {
            names.push("None");
        }
        f.write_str(&names.join("|"))
    }
}

/// One coalesced change for an `(entity, component type)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    /// The affected entity.
    pub entity: Entity,
    /// The affected component type.
    pub comp:   DbgTypeId,
    /// The accumulated change mask for this window.
    pub mask:   ChangeMask,
}

/// An entity lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An entity was created and marked alive.
    Created(Entity),
    /// An entity destruction was requested; pools are still intact.
    DestroyRequested(Entity),
    /// An entity was destroyed and its id queued for recycling.
    Destroyed(Entity),
}

/// A handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) token: u64,
    pub(crate) kind:  SubscriptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    Batch,
    Lifecycle,
}

type ComponentCallback = Box<dyn Fn(Entity, DbgTypeId, ChangeKind) + Send + Sync>;
type LifecycleCallback = Box<dyn Fn(&LifecycleEvent) + Send + Sync>;
type BatchCallback = Box<dyn FnMut(&[ChangeRecord]) + Send>;

/// The event bus owned by a world instance.
///
/// Raw publication tolerates being invoked from whichever thread performs
/// the write; batch aggregation and publication happen on the owning thread
/// at a phase boundary.
#[derive(Default)]
pub(crate) struct EventBus {
    next_token: Mutex<u64>,
    component:  RwLock<Vec<(u64, ComponentCallback)>>,
    lifecycle:  RwLock<Vec<(u64, LifecycleCallback)>>,
}

impl EventBus {
    pub(crate) fn publish_component(&self, entity: Entity, comp: DbgTypeId, kind: ChangeKind) {
        for (_, callback) in self.component.read().iter() {
            callback(entity, comp, kind);
        }
    }

    pub(crate) fn publish_lifecycle(&self, event: LifecycleEvent) {
        for (_, callback) in self.lifecycle.read().iter() {
            callback(&event);
        }
    }

    pub(crate) fn subscribe_component(&self, callback: ComponentCallback) -> u64 {
        let token = self.take_token();
        self.component.write().push((token, callback));
        token
    }

    pub(crate) fn subscribe_lifecycle(&self, callback: LifecycleCallback) -> Subscription {
        let token = self.take_token();
        self.lifecycle.write().push((token, callback));
        Subscription { token, kind: SubscriptionKind::Lifecycle }
    }

    pub(crate) fn unsubscribe_lifecycle(&self, token: u64) {
        self.lifecycle.write().retain(|(existing, _)| *existing != token);
    }

    fn take_token(&self) -> u64 {
        let mut next = self.next_token.lock();
        let token = *next;
        *next += 1;
        token
    }
}

/// Accumulates raw change events into one mask per `(entity, type)` pair
/// and publishes a single ordered batch per non-empty window.
///
/// The pending map is an [`IndexMap`] so that batch order is the
/// deterministic first-touch order of the window.
#[derive(Default)]
pub(crate) struct ChangeAggregator {
    pending:     Mutex<IndexMap<(Entity, DbgTypeId), ChangeMask>>,
    subscribers: Mutex<Vec<(u64, BatchCallback)>>,
    next_token:  Mutex<u64>,
}

impl ChangeAggregator {
    /// ORs a raw event into the pending mask for its `(entity, type)` pair.
    pub(crate) fn record(&self, entity: Entity, comp: DbgTypeId, kind: ChangeKind) {
        let mut pending = self.pending.lock();
        *pending.entry((entity, comp)).or_default() |= kind.mask();
    }

    /// Snapshots the pending map into an ordered batch, publishes it to all
    /// batch subscribers and clears the map.
    ///
    /// Publishes nothing when the window saw no events.
    /// Returns the number of records published.
    pub(crate) fn flush(&self) -> usize {
        let batch: Vec<ChangeRecord> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return 0;
            }
            pending
                .drain(..)
                .map(|((entity, comp), mask)| ChangeRecord { entity, comp, mask })
                .collect()
        };

        let mut subscribers = self.subscribers.lock();
        for (_, callback) in subscribers.iter_mut() {
            callback(&batch);
        }
        batch.len()
    }

    /// Subscribes a batch consumer. One invocation per non-empty window.
    pub(crate) fn subscribe(&self, callback: BatchCallback) -> Subscription {
        let mut next = self.next_token.lock();
        let token = *next;
        *next += 1;
        self.subscribers.lock().push((token, callback));
        Subscription { token, kind: SubscriptionKind::Batch }
    }

    pub(crate) fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().retain(|(existing, _)| *existing != token);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{ChangeAggregator, ChangeKind, ChangeMask, ChangeRecord};
    use crate::entity::Entity;
    use crate::test_util::{Health, Position};
    use crate::util::DbgTypeId;

    fn entity(id: u32) -> Entity { Entity::new(id, 0) }

    #[test]
    fn mask_accumulates_by_or() {
        let mut mask = ChangeMask::default();
        assert!(mask.is_empty());
        mask |= ChangeKind::Added.mask();
        mask |= ChangeKind::Changed.mask();
        assert!(mask.contains(ChangeMask::ADDED));
        assert!(mask.contains(ChangeMask::CHANGED));
        assert!(!mask.contains(ChangeMask::REMOVED));
        assert_eq!(format!("{mask:?}"), "Added|Changed");
    }

    #[test]
    fn same_pair_collapses_into_one_record() {
        let aggregator = ChangeAggregator::default();
        let seen: Arc<Mutex<Vec<Vec<ChangeRecord>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        aggregator.subscribe(Box::new(move |batch| sink.lock().unwrap().push(batch.to_vec())));

        let pos = DbgTypeId::of::<Position>();
        aggregator.record(entity(1), pos, ChangeKind::Added);
        aggregator.record(entity(1), pos, ChangeKind::Changed);
        aggregator.record(entity(2), pos, ChangeKind::Removed);
        assert_eq!(aggregator.flush(), 2);

        let batches = seen.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch[0].entity, entity(1));
        assert_eq!(batch[0].mask, ChangeMask::ADDED | ChangeMask::CHANGED);
        assert_eq!(batch[1].mask, ChangeMask::REMOVED);
    }

    #[test]
    fn remove_after_add_keeps_terminal_removed() {
        let aggregator = ChangeAggregator::default();
        let pos = DbgTypeId::of::<Position>();
        let seen: Arc<Mutex<Vec<ChangeRecord>>> = Arc::default();
        let sink = Arc::clone(&seen);
        aggregator.subscribe(Box::new(move |batch| sink.lock().unwrap().extend_from_slice(batch)));

        aggregator.record(entity(3), pos, ChangeKind::Added);
        aggregator.record(entity(3), pos, ChangeKind::Removed);
        aggregator.flush();

        let records = seen.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].mask.contains(ChangeMask::REMOVED));
    }

    #[test]
    fn empty_window_publishes_nothing() {
        let aggregator = ChangeAggregator::default();
        let calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&calls);
        aggregator.subscribe(Box::new(move |_| *sink.lock().unwrap() += 1));

        assert_eq!(aggregator.flush(), 0);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn flush_clears_the_window() {
        let aggregator = ChangeAggregator::default();
        aggregator.record(entity(1), DbgTypeId::of::<Health>(), ChangeKind::Added);
        assert_eq!(aggregator.flush(), 1);
        assert_eq!(aggregator.flush(), 0, "second flush must see an empty window");
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let aggregator = ChangeAggregator::default();
        let calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&calls);
        let subscription = aggregator.subscribe(Box::new(move |_| *sink.lock().unwrap() += 1));

        aggregator.record(entity(1), DbgTypeId::of::<Health>(), ChangeKind::Added);
        aggregator.flush();
        aggregator.unsubscribe(subscription.token);
        aggregator.record(entity(1), DbgTypeId::of::<Health>(), ChangeKind::Changed);
        aggregator.flush();

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn batch_order_is_first_touch_order() {
        let aggregator = ChangeAggregator::default();
        let pos = DbgTypeId::of::<Position>();
        let health = DbgTypeId::of::<Health>();
        let seen: Arc<Mutex<Vec<ChangeRecord>>> = Arc::default();
        let sink = Arc::clone(&seen);
        aggregator.subscribe(Box::new(move |batch| sink.lock().unwrap().extend_from_slice(batch)));

        aggregator.record(entity(9), health, ChangeKind::Added);
        aggregator.record(entity(1), pos, ChangeKind::Added);
        aggregator.record(entity(9), health, ChangeKind::Changed);
        aggregator.flush();

        let records = seen.lock().unwrap();
        assert_eq!(records[0].entity, entity(9));
        assert_eq!(records[1].entity, entity(1));
    }
}
