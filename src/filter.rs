//! Declarative include/exclude/OR filters over component types,
//! resolved against live pools and cached by an order-independent hash.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;

use crate::storage::{Component, Storage};
use crate::util::DbgTypeId;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// Distinct mixing constants per predicate section so that semantically
// different filters cannot collide by construction symmetry.
const WITH_ALL_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const WITHOUT_ALL_SALT: u64 = 0xc2b2_ae3d_27d4_eb4f;
const WITH_ANY_SALT: u64 = 0x1656_67b1_9e37_79f9;
const WITHOUT_ANY_SALT: u64 = 0x27d4_eb2f_1656_67c5;

/// An immutable predicate over component types.
///
/// Built once via [`FilterBuilder`], hashed order-independently,
/// resolved against live pools on first use and cached by that hash.
#[derive(Debug, Clone)]
pub struct Filter {
    with_all:    Box<[DbgTypeId]>,
    without_all: Box<[DbgTypeId]>,
    with_any:    Box<[Box<[DbgTypeId]>]>,
    without_any: Box<[Box<[DbgTypeId]>]>,
    hash:        u64,
}

impl Filter {
    /// Starts building a filter.
    pub fn builder() -> FilterBuilder { FilterBuilder::default() }

    /// The order-independent hash keying the resolution cache.
    pub fn hash(&self) -> u64 { self.hash }
}

/// Fluent builder for [`Filter`].
///
/// Each type set is sorted and deduplicated at build time,
/// so the order of builder calls never affects the resulting hash.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    with_all:    Vec<DbgTypeId>,
    without_all: Vec<DbgTypeId>,
    with_any:    Vec<Vec<DbgTypeId>>,
    without_any: Vec<Vec<DbgTypeId>>,
}

impl FilterBuilder {
    /// Requires entities to have a `T` component.
    pub fn with<T: Component>(mut self) -> Self {
        self.with_all.push(DbgTypeId::of::<T>());
        self
    }

    /// Excludes entities having a `T` component.
    pub fn without<T: Component>(mut self) -> Self {
        self.without_all.push(DbgTypeId::of::<T>());
        self
    }

    /// Requires entities to have at least one of the given component types.
    pub fn with_any(mut self, types: impl IntoIterator<Item = DbgTypeId>) -> Self {
        self.with_any.push(types.into_iter().collect());
        self
    }

    /// Excludes entities having any of the given component types.
    pub fn without_any(mut self, types: impl IntoIterator<Item = DbgTypeId>) -> Self {
        self.without_any.push(types.into_iter().collect());
        self
    }

    /// Freezes the accumulated sets into an immutable filter.
    pub fn build(self) -> Filter {
        fn freeze(set: Vec<DbgTypeId>) -> Box<[DbgTypeId]> {
            set.into_iter().sorted().dedup().collect()
        }

        let with_all = freeze(self.with_all);
        let without_all = freeze(self.without_all);
        let with_any: Box<[_]> = self.with_any.into_iter().map(freeze).collect();
        let without_any: Box<[_]> = self.without_any.into_iter().map(freeze).collect();

        let mut hash = FNV_OFFSET;
        hash = fold_set(hash, WITH_ALL_SALT, &with_all);
        hash = fold_set(hash, WITHOUT_ALL_SALT, &without_all);
        for bucket in &with_any {
            hash = fold_set(hash, WITH_ANY_SALT, bucket);
        }
        for bucket in &without_any {
            hash = fold_set(hash, WITHOUT_ANY_SALT, bucket);
        }

        Filter { with_all, without_all, with_any, without_any, hash }
    }
}

/// FNV-1a fold over a sorted type set, salted per predicate section.
fn fold_set(hash: u64, salt: u64, set: &[DbgTypeId]) -> u64 {
    let mut hash = hash ^ salt;
    for ty in set {
        for &byte in ty.name().as_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= u64::from(b';');
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A filter with its type sets mapped to live pool registry indices.
///
/// Stale once a new pool is registered after resolution;
/// staleness is detected by comparing [`epoch`](Self::epoch)
/// against the storage registry epoch.
#[derive(Debug)]
pub(crate) struct ResolvedFilter {
    epoch:         u64,
    /// A `with_all` type or a whole `with_any` bucket had no pool;
    /// an entity cannot satisfy "must have a type with no pool".
    unsatisfiable: bool,
    with_all:      Vec<usize>,
    without_all:   Vec<usize>,
    with_any:      Vec<Vec<usize>>,
    without_any:   Vec<Vec<usize>>,
}

impl ResolvedFilter {
    pub(crate) fn resolve(filter: &Filter, storage: &Storage) -> Self {
        let mut unsatisfiable = false;

        let mut with_all = Vec::with_capacity(filter.with_all.len());
        for &ty in filter.with_all.iter() {
            match storage.pool_index(ty) {
                Some(index) => with_all.push(index),
                None => unsatisfiable = true,
            }
        }

        // absent pools are trivially satisfied exclusions
        let without_all: Vec<usize> =
            filter.without_all.iter().filter_map(|&ty| storage.pool_index(ty)).collect();

        // a bucket member with no pool empties the whole bucket,
        // which makes the bucket never satisfiable
        let with_any: Vec<Vec<usize>> = filter
            .with_any
            .iter()
            .map(|bucket| {
                let resolved: Option<Vec<usize>> =
                    bucket.iter().map(|&ty| storage.pool_index(ty)).collect();
                match resolved {
                    Some(indices) => indices,
                    None => {
                        unsatisfiable = true;
                        Vec::new()
                    }
                }
            })
            .collect();

        let without_any: Vec<Vec<usize>> = filter
            .without_any
            .iter()
            .map(|bucket| bucket.iter().filter_map(|&ty| storage.pool_index(ty)).collect())
            .collect();

        Self { epoch: storage.epoch(), unsatisfiable, with_all, without_all, with_any, without_any }
    }

    pub(crate) fn epoch(&self) -> u64 { self.epoch }

    pub(crate) fn is_unsatisfiable(&self) -> bool { self.unsatisfiable }

    /// The membership test, short-circuiting in the order
    /// with-all, without-all, with-any, without-any.
    pub(crate) fn meets(&self, storage: &Storage, id: usize) -> bool {
        if self.unsatisfiable {
            return false;
        }
        if !self.with_all.iter().all(|&pool| storage.pool_at(pool).has(id)) {
            return false;
        }
        if self.without_all.iter().any(|&pool| storage.pool_at(pool).has(id)) {
            return false;
        }
        if !self
            .with_any
            .iter()
            .all(|bucket| bucket.iter().any(|&pool| storage.pool_at(pool).has(id)))
        {
            return false;
        }
        if self
            .without_any
            .iter()
            .any(|bucket| bucket.iter().any(|&pool| storage.pool_at(pool).has(id)))
        {
            return false;
        }
        true
    }

    /// The registry index of the smallest required pool,
    /// used as the scan driver for queries.
    /// `None` when the filter has no `with_all` requirement.
    pub(crate) fn driver(&self, storage: &Storage) -> Option<usize> {
        self.with_all.iter().copied().min_by_key(|&pool| storage.pool_at(pool).len())
    }
}

/// Caches filter resolutions keyed by the order-independent filter hash.
///
/// Entries resolved under an older registry epoch are re-resolved on access,
/// so registering a new component type transparently invalidates the cache.
#[derive(Default)]
pub(crate) struct FilterCache {
    entries: Mutex<HashMap<u64, Arc<ResolvedFilter>>>,
}

impl FilterCache {
    pub(crate) fn resolve(&self, filter: &Filter, storage: &Storage) -> Arc<ResolvedFilter> {
        let mut entries = self.entries.lock();
        if let Some(resolved) = entries.get(&filter.hash()) {
            if resolved.epoch() == storage.epoch() {
                return Arc::clone(resolved);
            }
        }
        let resolved = Arc::new(ResolvedFilter::resolve(filter, storage));
        entries.insert(filter.hash(), Arc::clone(&resolved));
        resolved
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize { self.entries.lock().len() }
}

#[cfg(test)]
mod tests {
    use super::{Filter, FilterCache, ResolvedFilter};
    use crate::storage::Storage;
    use crate::test_util::{Health, Position, Velocity};
    use crate::util::DbgTypeId;

    #[test]
    fn hash_is_order_independent() {
        let ab = Filter::builder().with::<Position>().with::<Velocity>().build();
        let ba = Filter::builder().with::<Velocity>().with::<Position>().build();
        assert_eq!(ab.hash(), ba.hash());

        let any = Filter::builder()
            .with_any([DbgTypeId::of::<Position>(), DbgTypeId::of::<Velocity>()])
            .build();
        let any_rev = Filter::builder()
            .with_any([DbgTypeId::of::<Velocity>(), DbgTypeId::of::<Position>()])
            .build();
        assert_eq!(any.hash(), any_rev.hash());
    }

    #[test]
    fn hash_distinguishes_sections() {
        let with = Filter::builder().with::<Position>().build();
        let without = Filter::builder().without::<Position>().build();
        let with_any = Filter::builder().with_any([DbgTypeId::of::<Position>()]).build();
        let without_any = Filter::builder().without_any([DbgTypeId::of::<Position>()]).build();

        let hashes = [with.hash(), without.hash(), with_any.hash(), without_any.hash()];
        for (i, a) in hashes.iter().enumerate() {
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b, "sections must use distinct mixing constants");
            }
        }
    }

    #[test]
    fn missing_required_pool_is_unsatisfiable() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(0, Position { x: 0, y: 0 });

        let filter = Filter::builder().with::<Position>().with::<Velocity>().build();
        let resolved = ResolvedFilter::resolve(&filter, &storage);
        assert!(resolved.is_unsatisfiable());
        assert!(!resolved.meets(&storage, 0));
    }

    #[test]
    fn with_any_bucket_with_missing_member_is_unsatisfiable() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(0, Position { x: 0, y: 0 });

        // Velocity has no pool, which empties the whole bucket
        let filter = Filter::builder()
            .with_any([DbgTypeId::of::<Position>(), DbgTypeId::of::<Velocity>()])
            .build();
        let resolved = ResolvedFilter::resolve(&filter, &storage);
        assert!(resolved.is_unsatisfiable());
        assert!(
            !resolved.meets(&storage, 0),
            "a present member must not satisfy a bucket with an unregistered member",
        );
    }

    #[test]
    fn missing_excluded_pool_is_trivially_satisfied() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(0, Position { x: 0, y: 0 });

        let filter = Filter::builder()
            .with::<Position>()
            .without::<Velocity>()
            .without_any([DbgTypeId::of::<Health>()])
            .build();
        let resolved = ResolvedFilter::resolve(&filter, &storage);
        assert!(resolved.meets(&storage, 0));
    }

    #[test]
    fn meets_evaluates_or_buckets() {
        let mut storage = Storage::new();
        storage.pool_mut_or_register::<Position>().insert(0, Position { x: 0, y: 0 });
        storage.pool_mut_or_register::<Velocity>().insert(1, Velocity { dx: 0, dy: 0 });
        storage.pool_mut_or_register::<Health>().insert(0, Health(5));

        let either = Filter::builder()
            .with_any([DbgTypeId::of::<Position>(), DbgTypeId::of::<Velocity>()])
            .build();
        let resolved = ResolvedFilter::resolve(&either, &storage);
        assert!(resolved.meets(&storage, 0));
        assert!(resolved.meets(&storage, 1));
        assert!(!resolved.meets(&storage, 2));

        let neither = Filter::builder().without_any([DbgTypeId::of::<Health>()]).build();
        let resolved = ResolvedFilter::resolve(&neither, &storage);
        assert!(!resolved.meets(&storage, 0));
        assert!(resolved.meets(&storage, 1));
    }

    #[test]
    fn cache_reuses_resolution_until_epoch_changes() {
        let mut storage = Storage::new();
        storage.register::<Position>();

        let cache = FilterCache::default();
        let ab = Filter::builder().with::<Position>().build();
        let first = cache.resolve(&ab, &storage);
        let second = cache.resolve(&ab, &storage);
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        // registering a new pool bumps the epoch and forces re-resolution
        storage.register::<Velocity>();
        let third = cache.resolve(&ab, &storage);
        assert!(!std::sync::Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn driver_picks_smallest_required_pool() {
        let mut storage = Storage::new();
        for id in 0..4 {
            storage.pool_mut_or_register::<Position>().insert(id, Position { x: 0, y: 0 });
        }
        storage.pool_mut_or_register::<Health>().insert(0, Health(1));

        let filter = Filter::builder().with::<Position>().with::<Health>().build();
        let resolved = ResolvedFilter::resolve(&filter, &storage);
        let driver = resolved.driver(&storage).expect("with_all is non-empty");
        assert_eq!(storage.pool_at(driver).len(), 1, "must scan the Health pool");
    }
}
