//! Component storage: one dense pool per component type,
//! plus entity id allocation and recycling.

use std::any::Any;

use indexmap::IndexMap;

use crate::entity::{Allocator, Entity};
use crate::error::Error;
use crate::util::DbgTypeId;

pub mod pool;
pub mod presence;

pub use pool::ComponentPool;
pub(crate) use pool::AnyPool;

/// A plain value type that can be stored in a component pool.
///
/// Components have no identity of their own;
/// each value is owned by exactly one `(entity, pool)` slot at a time.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Owns one [`ComponentPool`] per registered component type
/// and the entity id allocator.
///
/// The pool registry is an [`IndexMap`] so that registration order
/// gives a deterministic iteration order for snapshots and destruction.
#[derive(Default)]
pub struct Storage {
    pools:            IndexMap<DbgTypeId, Box<dyn AnyPool>>,
    pub(crate) alloc: Allocator,
    epoch:            u64,
}

impl Storage {
    /// Creates an empty storage with no registered pools.
    pub fn new() -> Self { Self::default() }

    /// Registers a pool for `T` if one does not exist yet.
    /// Returns whether a new pool was created.
    ///
    /// Creating a pool bumps the registry epoch,
    /// which invalidates cached filter resolutions.
    pub fn register<T: Component>(&mut self) -> bool {
        let ty = DbgTypeId::of::<T>();
        if self.pools.contains_key(&ty) {
            return false;
        }
        self.pools.insert(ty, Box::new(ComponentPool::<T>::new()));
        self.epoch += 1;
        log::debug!("registered component pool for {ty}");
        true
    }

    /// A counter bumped whenever a new pool is registered.
    /// Filter resolutions cached under an older epoch are stale.
    pub(crate) fn epoch(&self) -> u64 { self.epoch }

    /// The typed pool for `T`, if registered.
    pub fn pool<T: Component>(&self) -> Option<&ComponentPool<T>> {
        let pool = self.pools.get(&DbgTypeId::of::<T>())?;
        Some(pool.as_any().downcast_ref::<ComponentPool<T>>().expect("pool registered under key"))
    }

    /// The typed pool for `T` mutably, if registered.
    pub fn pool_mut<T: Component>(&mut self) -> Option<&mut ComponentPool<T>> {
        let pool = self.pools.get_mut(&DbgTypeId::of::<T>())?;
        Some(
            pool.as_any_mut()
                .downcast_mut::<ComponentPool<T>>()
                .expect("pool registered under key"),
        )
    }

    /// The typed pool for `T`, registering it first if missing.
    pub fn pool_mut_or_register<T: Component>(&mut self) -> &mut ComponentPool<T> {
        self.register::<T>();
        self.pool_mut::<T>().expect("just registered")
    }

    pub(crate) fn any_pool(&self, ty: DbgTypeId) -> Option<&dyn AnyPool> {
        self.pools.get(&ty).map(Box::as_ref)
    }

    pub(crate) fn any_pool_mut(&mut self, ty: DbgTypeId) -> Option<&mut (dyn AnyPool + 'static)> {
        self.pools.get_mut(&ty).map(Box::as_mut)
    }

    /// The registry index of the pool for `ty`, used by resolved filters.
    pub(crate) fn pool_index(&self, ty: DbgTypeId) -> Option<usize> {
        self.pools.get_index_of(&ty)
    }

    /// The pool at a registry index obtained from [`pool_index`](Self::pool_index).
    pub(crate) fn pool_at(&self, index: usize) -> &dyn AnyPool {
        self.pools.get_index(index).expect("resolved pool index out of range").1.as_ref()
    }

    /// Removes the entity's component from every registered pool,
    /// returning the types that were actually removed, in registry order.
    pub(crate) fn remove_from_all_pools(&mut self, id: usize) -> Vec<DbgTypeId> {
        self.pools
            .iter_mut()
            .filter_map(|(&ty, pool)| pool.remove_any(id).then(|| ty))
            .collect()
    }

    /// Enumerates `(type, boxed value)` pairs for every live component on a slot,
    /// in registry order. This is the read half of the serialization handshake;
    /// the runtime itself defines no wire format.
    pub fn snapshot_slot(&self, id: usize) -> impl Iterator<Item = (DbgTypeId, &dyn Any)> + '_ {
        self.pools.iter().filter_map(move |(&ty, pool)| {
            pool.get_any(id).map(|value| (ty, value))
        })
    }

    /// Injects a boxed value into the pool for `ty`,
    /// returning whether a value was already present.
    ///
    /// This is the write half of the serialization handshake.
    /// Fails with [`Error::UnknownComponentType`] if no pool is registered for
    /// `ty` and [`Error::TypeMismatch`] if the payload is of the wrong type.
    pub(crate) fn inject_boxed(
        &mut self,
        id: usize,
        ty: DbgTypeId,
        value: Box<dyn Any>,
    ) -> Result<bool, Error> {
        let pool = self.any_pool_mut(ty).ok_or(Error::UnknownComponentType { comp: ty })?;
        pool.set_any(id, value)
    }

    /// Iterates over registered component types in registration order.
    pub fn component_types(&self) -> impl Iterator<Item = DbgTypeId> + '_ {
        self.pools.keys().copied()
    }

    /// Whether the handle refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool { self.alloc.is_alive(entity) }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::error::Error;
    use crate::test_util::{Health, Position};
    use crate::util::DbgTypeId;

    #[test]
    fn register_is_idempotent_and_bumps_epoch_once() {
        let mut storage = Storage::new();
        let before = storage.epoch();
        assert!(storage.register::<Position>());
        assert!(!storage.register::<Position>());
        assert_eq!(storage.epoch(), before + 1);
    }

    #[test]
    fn remove_from_all_pools_reports_removed_types() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(4, Position { x: 1, y: 2 });
        storage.pool_mut_or_register::<Health>().insert(4, Health(10));
        storage.register::<u8>();

        let removed = storage.remove_from_all_pools(4);
        assert_eq!(removed, vec![DbgTypeId::of::<Position>(), DbgTypeId::of::<Health>()]);
        assert!(!storage.pool::<Position>().expect("registered").has(4));
        assert!(storage.remove_from_all_pools(4).is_empty());
    }

    #[test]
    fn snapshot_and_inject_roundtrip() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(1, Position { x: 3, y: 4 });
        storage.pool_mut_or_register::<Health>().insert(1, Health(7));

        let snapshot: Vec<_> = storage.snapshot_slot(1).collect();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, DbgTypeId::of::<Position>());

        let replaced = storage
            .inject_boxed(1, DbgTypeId::of::<Health>(), Box::new(Health(9)))
            .expect("known type, correct payload");
        assert!(replaced);
        assert_eq!(storage.pool::<Health>().expect("registered").get(1), Some(&Health(9)));
    }

    #[test]
    fn inject_rejects_unknown_type_and_bad_payload() {
        let mut storage = Storage::new();
        let ty = DbgTypeId::of::<Position>();
        assert_eq!(
            storage.inject_boxed(0, ty, Box::new(Position { x: 0, y: 0 })).unwrap_err(),
            Error::UnknownComponentType { comp: ty },
        );

        storage.register::<Position>();
        assert_eq!(
            storage.inject_boxed(0, ty, Box::new(Health(1))).unwrap_err(),
            Error::TypeMismatch { expected: ty },
        );
    }
}
