//! Dense per-type component pools.

use std::any::Any;
use std::mem::MaybeUninit;

use super::presence::PresenceSet;
use super::Component;
use crate::error::Error;
use crate::util::DbgTypeId;

/// A dense array of one component type, indexed by entity id,
/// paired with a presence bitmap.
///
/// The presence bit is the sole authority on whether a slot is initialized:
/// `data[id]` holds a live value if and only if the bit for `id` is set.
pub struct ComponentPool<T> {
    presence: PresenceSet,
    data:     Vec<MaybeUninit<T>>,
}

impl<T> Default for ComponentPool<T> {
    fn default() -> Self { Self { presence: PresenceSet::new(), data: Vec::new() } }
}

impl<T> ComponentPool<T> {
    /// Creates an empty pool.
    pub fn new() -> Self { Self::default() }

    /// Grows the data array and presence bitmap to cover `id`,
    /// preserving existing content. Capacity never shrinks.
    pub fn ensure_capacity(&mut self, id: usize) {
        self.presence.grow_to(id);
        if self.data.len() < self.presence.capacity() {
            self.data.resize_with(self.presence.capacity(), MaybeUninit::uninit);
        }
    }

    /// Whether the entity has a component in this pool.
    pub fn has(&self, id: usize) -> bool { self.presence.contains(id) }

    /// Gets the component for an entity if present.
    pub fn get(&self, id: usize) -> Option<&T> {
        if self.presence.contains(id) {
            let value = self.data.get(id).expect("presence bit set beyond data length");
            Some(unsafe { value.assume_init_ref() })
        } else {
            None
        }
    }

    /// Gets the component for an entity mutably if present.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        if self.presence.contains(id) {
            let value = self.data.get_mut(id).expect("presence bit set beyond data length");
            Some(unsafe { value.assume_init_mut() })
        } else {
            None
        }
    }

    /// Inserts a value for an entity, returning the previous value if any.
    pub fn insert(&mut self, id: usize, value: T) -> Option<T> {
        self.ensure_capacity(id);
        let slot = self.data.get_mut(id).expect("just grown to cover id");
        if self.presence.contains(id) {
            let old = unsafe { slot.assume_init_read() };
            *slot = MaybeUninit::new(value);
            Some(old)
        } else {
            *slot = MaybeUninit::new(value);
            self.presence.set(id);
            None
        }
    }

    /// Removes the value for an entity, returning it if it was present.
    pub fn remove(&mut self, id: usize) -> Option<T> {
        if self.presence.clear(id) {
            let slot = self.data.get_mut(id).expect("presence bit set beyond data length");
            Some(unsafe { slot.assume_init_read() })
        } else {
            None
        }
    }

    /// The number of entities currently present in this pool.
    pub fn len(&self) -> usize { self.presence.len() }

    /// Whether no entities are present in this pool.
    pub fn is_empty(&self) -> bool { self.presence.is_empty() }

    /// Iterates over `(id, value)` pairs in increasing id order
    /// by scanning the presence bits linearly.
    ///
    /// The iterator is lazy, finite and restartable per call.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.presence.iter_ones().map(move |id| {
            let value = self.data.get(id).expect("presence bit set beyond data length");
            (id, unsafe { value.assume_init_ref() })
        })
    }
}

impl<T> Drop for ComponentPool<T> {
    fn drop(&mut self) {
        for id in 0..self.data.len() {
            if self.presence.contains(id) {
                let slot = self.data.get_mut(id).expect("presence bit set beyond data length");
                unsafe { slot.assume_init_drop() };
            }
        }
    }
}

/// Type-erased view of a [`ComponentPool`], used by the pool registry,
/// entity destruction and the serialization handshake.
///
/// The boxed accessors exist only for tooling and snapshot code;
/// the typed pool methods are the primary API.
pub(crate) trait AnyPool: Send + Sync {
    /// Whether the entity has a component in this pool.
    fn has(&self, id: usize) -> bool;

    /// The number of entities present in this pool.
    fn len(&self) -> usize;

    /// Removes and drops the value for an entity.
    /// Returns whether a value was present.
    fn remove_any(&mut self, id: usize) -> bool;

    /// Gets a boxed view of the component for an entity if present.
    fn get_any(&self, id: usize) -> Option<&dyn Any>;

    /// Injects a boxed value for an entity, returning whether a value was
    /// already present. Fails with [`Error::TypeMismatch`] if the payload is
    /// not of the stored component type.
    fn set_any(&mut self, id: usize, value: Box<dyn Any>) -> Result<bool, Error>;

    /// Iterates over the ids present in this pool in increasing order.
    fn iter_ids(&self) -> Box<dyn Iterator<Item = usize> + '_>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> AnyPool for ComponentPool<T> {
    fn has(&self, id: usize) -> bool { ComponentPool::has(self, id) }

    fn len(&self) -> usize { ComponentPool::len(self) }

    fn remove_any(&mut self, id: usize) -> bool { self.remove(id).is_some() }

    fn get_any(&self, id: usize) -> Option<&dyn Any> {
        self.get(id).map(|value| value as &dyn Any)
    }

    fn set_any(&mut self, id: usize, value: Box<dyn Any>) -> Result<bool, Error> {
        match value.downcast::<T>() {
            Ok(value) => Ok(self.insert(id, *value).is_some()),
            Err(_) => Err(Error::TypeMismatch { expected: DbgTypeId::of::<T>() }),
        }
    }

    fn iter_ids(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new(self.presence.iter_ones())
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{AnyPool, ComponentPool};
    use crate::error::Error;
    use crate::util::DbgTypeId;

    #[test]
    fn insert_remove_roundtrip() {
        let mut pool = ComponentPool::<i64>::new();
        assert_eq!(pool.insert(3, 30), None);
        assert_eq!(pool.insert(3, 31), Some(30));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(3), Some(&31));
        assert_eq!(pool.remove(3), Some(31));
        assert_eq!(pool.remove(3), None);
        assert!(pool.is_empty());
        assert_eq!(pool.get(3), None);
    }

    #[test]
    fn has_reflects_latest_operation() {
        let mut pool = ComponentPool::<&str>::new();
        for _ in 0..3 {
            pool.insert(7, "value");
            assert!(pool.has(7));
            pool.remove(7);
            assert!(!pool.has(7));
        }
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn iter_scans_presence_in_order() {
        let mut pool = ComponentPool::<u32>::new();
        for id in [9, 2, 400] {
            pool.insert(id, id as u32 * 10);
        }
        let pairs: Vec<_> = pool.iter().map(|(id, &value)| (id, value)).collect();
        assert_eq!(pairs, vec![(2, 20), (9, 90), (400, 4000)]);
    }

    #[test]
    fn growth_preserves_existing_values() {
        let mut pool = ComponentPool::<u8>::new();
        pool.insert(0, 1);
        pool.insert(10_000, 2);
        assert_eq!(pool.get(0), Some(&1));
        assert_eq!(pool.get(10_000), Some(&2));
    }

    #[test]
    fn boxed_set_type_checks_payload() {
        let mut pool = ComponentPool::<i64>::new();
        let err = pool.set_any(0, Box::new("wrong")).unwrap_err();
        assert_eq!(err, Error::TypeMismatch { expected: DbgTypeId::of::<i64>() });

        assert_eq!(pool.set_any(0, Box::new(5_i64)).unwrap(), false);
        assert_eq!(pool.set_any(0, Box::new(6_i64)).unwrap(), true);
        assert_eq!(pool.get(0), Some(&6));
    }

    #[test]
    fn boxed_get_exposes_live_value() {
        let mut pool = ComponentPool::<i64>::new();
        pool.insert(2, 42);
        let boxed = pool.get_any(2).expect("value present");
        assert_eq!(boxed.downcast_ref::<i64>(), Some(&42));
        assert!(pool.get_any(3).is_none());
    }

    #[test]
    fn drop_releases_live_values_only() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) { self.0.fetch_add(1, Ordering::SeqCst); }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let mut pool = ComponentPool::<Counted>::new();
            pool.insert(1, Counted(Arc::clone(&drops)));
            pool.insert(5, Counted(Arc::clone(&drops)));
            pool.insert(5, Counted(Arc::clone(&drops))); // replaces, drops the old value
            pool.remove(1);
            assert_eq!(drops.load(Ordering::SeqCst), 2);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3, "pool drop must release the remaining value");
    }
}
