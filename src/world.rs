//! The world: entity lifecycle, queries and the tick loop.
//!
//! A [`World`] owns the storage, the write gateway configuration,
//! the filter cache, the event bus and the change aggregator.
//! A [`Runtime`] wraps a world together with a registered system set
//! and its execution plan, and drives the cooperative tick loop:
//! drain scheduled buffers, run Setup, Simulate and Present in plan order,
//! flushing one change batch at the end of each non-empty phase.

use std::any::Any;
use std::sync::Arc;

use crate::buffer::CommandBuffer;
use crate::changes::{
    ChangeAggregator, ChangeKind, ChangeRecord, EventBus, LifecycleEvent, Subscription,
    SubscriptionKind,
};
use crate::entity::Entity;
use crate::error::{Error, PlanError};
use crate::filter::{Filter, FilterCache};
use crate::gateway::{FailurePolicy, Gateway};
use crate::scheduler::{self, Phase, Plan};
use crate::storage::{Component, Storage};
use crate::system::{Descriptor, Executable, Present, Setup, Simulate};
use crate::util::DbgTypeId;


/// The single-threaded heart of the runtime.
///
/// All mutation happens on the owning thread; the only surfaces tolerant of
/// other threads are [`CommandBuffer`] enqueueing and event subscription.
pub struct World {
    pub(crate) storage:    Storage,
    pub(crate) gateway:    Gateway,
    filters:               FilterCache,
    pub(crate) bus:        EventBus,
    pub(crate) aggregator: Arc<ChangeAggregator>,
    scheduled:             Vec<CommandBuffer>,
    pub(crate) deferred:   CommandBuffer,
}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates an empty world with the aggregator wired to the event bus.
    pub fn new() -> Self {
        let bus = EventBus::default();
        let aggregator = Arc::new(ChangeAggregator::default());
        let sink = Arc::clone(&aggregator);
        bus.subscribe_component(Box::new(move |entity, comp, kind| {
            sink.record(entity, comp, kind)
        }));
        Self {
            storage: Storage::new(),
            gateway: Gateway::default(),
            filters: FilterCache::default(),
            bus,
            aggregator,
            scheduled: Vec::new(),
            deferred: CommandBuffer::new(),
        }
    }

    /// Registers the component type `T`,
    /// returning whether a new pool was created.
    pub fn register_component<T: Component>(&mut self) -> bool { self.storage.register::<T>() }

    /// Creates an entity with a fresh or recycled id and raises `Created`.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.storage.alloc.create();
        self.bus.publish_lifecycle(LifecycleEvent::Created(entity));
        entity
    }

    /// Creates an entity at an explicitly requested slot id.
    ///
    /// Intended for deterministic replay and tests.
    /// The generation of the slot is not bumped, so a handle created this way
    /// may equal a previously destroyed handle for the same id.
    pub fn create_entity_at(&mut self, id: u32) -> Entity {
        let entity = self.storage.alloc.create_at(id);
        self.bus.publish_lifecycle(LifecycleEvent::Created(entity));
        entity
    }

    /// Destroys an entity: raises `DestroyRequested`, removes its components
    /// from every pool (raising `Removed` per type), then frees the id and
    /// raises `Destroyed`. Returns `false` if the handle was already dead.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.storage.alloc.is_alive(entity) {
            return false;
        }
        self.bus.publish_lifecycle(LifecycleEvent::DestroyRequested(entity));
        for ty in self.storage.remove_from_all_pools(entity.index()) {
            self.bus.publish_component(entity, ty, ChangeKind::Removed);
        }
        self.storage.alloc.destroy(entity);
        self.bus.publish_lifecycle(LifecycleEvent::Destroyed(entity));
        true
    }

    /// Whether the handle refers to a live entity.
    /// Stale handles to a reused id compare as dead by generation.
    pub fn is_alive(&self, entity: Entity) -> bool { self.storage.alloc.is_alive(entity) }

    /// The number of currently alive entities.
    pub fn entity_count(&self) -> usize { self.storage.alloc.count() }

    /// Whether the entity currently has a `T` component.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.is_alive(entity)
            && self.storage.pool::<T>().map_or(false, |pool| pool.has(entity.index()))
    }

    /// Reads the `T` component of an entity.
    pub fn read<T: Component>(&self, entity: Entity) -> Result<&T, Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        self.try_read(entity)
            .ok_or(Error::MissingComponent { entity, comp: DbgTypeId::of::<T>() })
    }

    /// Reads the `T` component of an entity, `None` if absent or dead.
    pub fn try_read<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage.pool::<T>()?.get(entity.index())
    }

    /// Iterates over the live entities matching a filter, in slot id order.
    ///
    /// The filter resolution is cached by its hash and scanned from the
    /// smallest required pool when the filter has one.
    pub fn query<'a>(&'a self, filter: &Filter) -> impl Iterator<Item = Entity> + 'a {
        let resolved = self.filters.resolve(filter, &self.storage);
        let ids: Box<dyn Iterator<Item = usize> + 'a> = match resolved.driver(&self.storage) {
            Some(pool) if !resolved.is_unsatisfiable() => self.storage.pool_at(pool).iter_ids(),
            _ => Box::new(self.storage.alloc.iter_alive().map(|entity| entity.index())),
        };
        ids.filter_map(move |id| {
            if !self.storage.alloc.is_index_alive(id) {
                return None;
            }
            if !resolved.meets(&self.storage, id) {
                return None;
            }
            self.storage.alloc.handle_of(id)
        })
    }

    /// Creates a fresh command buffer for explicit batched writes.
    pub fn begin_write(&self) -> CommandBuffer { CommandBuffer::new() }

    /// Drains a command buffer into this world immediately,
    /// returning the number of operations that took effect.
    pub fn end_write(&mut self, buffer: CommandBuffer) -> usize { buffer.apply(self) }

    /// Parks a command buffer for the next tick boundary.
    pub fn schedule(&mut self, buffer: CommandBuffer) { self.scheduled.push(buffer); }

    /// Drains all scheduled buffers in schedule order,
    /// then the internal deferred-structural queue.
    /// Returns the total number of operations that took effect.
    pub fn run_scheduled_jobs(&mut self) -> usize {
        let mut applied = 0;
        for buffer in std::mem::take(&mut self.scheduled) {
            applied += buffer.apply(self);
        }
        let deferred = std::mem::take(&mut self.deferred);
        applied + deferred.apply(self)
    }

    /// Publishes the pending change batch, if any,
    /// returning the number of records published.
    ///
    /// [`Runtime::tick`] calls this at every phase boundary;
    /// worlds driven without a runtime call it manually.
    pub fn flush_changes(&mut self) -> usize { self.aggregator.flush() }

    /// Subscribes a consumer to coalesced change batches.
    /// One invocation per non-empty aggregation window.
    pub fn subscribe_changes(
        &self,
        callback: impl FnMut(&[ChangeRecord]) + Send + 'static,
    ) -> Subscription {
        self.aggregator.subscribe(Box::new(callback))
    }

    /// Subscribes a consumer to entity lifecycle events,
    /// delivered synchronously as they are raised.
    pub fn subscribe_lifecycle(
        &self,
        callback: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe_lifecycle(Box::new(callback))
    }

    /// Cancels a subscription. A no-op if already cancelled.
    pub fn unsubscribe(&self, subscription: Subscription) {
        match subscription.kind {
            SubscriptionKind::Batch => self.aggregator.unsubscribe(subscription.token),
            SubscriptionKind::Lifecycle => self.bus.unsubscribe_lifecycle(subscription.token),
        }
    }

    /// Enumerates `(type, value)` pairs for every component of an entity,
    /// in pool registration order. The read half of the serialization
    /// handshake; no wire format is defined here.
    pub fn snapshot_entity(&self, entity: Entity) -> Result<Vec<(DbgTypeId, &dyn Any)>, Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        Ok(self.storage.snapshot_slot(entity.index()).collect())
    }

    /// Injects a type-erased component value, the write half of the
    /// serialization handshake. Raises `Added` or `Changed` depending on
    /// whether the slot was previously occupied.
    ///
    /// Injection bypasses permission and validation:
    /// the payload is assumed to have been validated when it was written out.
    pub fn inject_boxed(
        &mut self,
        entity: Entity,
        ty: DbgTypeId,
        value: Box<dyn Any>,
    ) -> Result<(), Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        let replaced = self.storage.inject_boxed(entity.index(), ty, value)?;
        let kind = if replaced { ChangeKind::Changed } else { ChangeKind::Added };
        self.bus.publish_component(entity, ty, kind);
        Ok(())
    }
}

/// A world bound to a registered system set and its execution plan.
pub struct Runtime {
    world:   World,
    systems: Vec<Executable>,
    plan:    Plan,
}

impl Runtime {
    /// Starts building a runtime over a fresh world.
    pub fn builder() -> RuntimeBuilder { RuntimeBuilder::default() }

    /// The owned world.
    pub fn world(&self) -> &World { &self.world }

    /// The owned world mutably, for setup outside the tick loop.
    pub fn world_mut(&mut self) -> &mut World { &mut self.world }

    /// Initializes every system once, in forward plan order.
    pub fn initialize(&mut self) {
        for index in self.plan.init_order() {
            self.systems[index].initialize(&mut self.world);
        }
    }

    /// Executes one tick: drains scheduled buffers, then runs each phase
    /// in plan order, flushing one change batch at the end of each phase.
    pub fn tick(&mut self) {
        self.world.run_scheduled_jobs();
        for phase in Phase::ALL {
            for &index in self.plan.phase_order(phase) {
                self.systems[index].run(&mut self.world);
            }
            self.world.flush_changes();
        }
    }

    /// Shuts every system down once, in reverse plan order.
    pub fn shutdown(&mut self) {
        for index in self.plan.shutdown_order() {
            self.systems[index].shutdown(&mut self.world);
        }
    }
}

/// Collects systems and world configuration,
/// then builds the execution plan in one shot.
#[derive(Default)]
pub struct RuntimeBuilder {
    world:   World,
    entries: Vec<(Descriptor, Executable)>,
}

impl RuntimeBuilder {
    /// Sets the failure policy for denied and invalid writes.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.world.set_failure_policy(policy);
        self
    }

    /// Installs the write-permission predicate.
    pub fn permission(
        mut self,
        permission: impl Fn(&Storage, Entity, DbgTypeId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.world.set_permission(permission);
        self
    }

    /// Registers a value validator for `T`.
    pub fn validator<T: Component>(
        mut self,
        validator: impl Fn(Entity, &T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.world.add_validator(validator);
        self
    }

    /// Sets the global deferred-structural preference.
    pub fn defer_structural(mut self, defer: bool) -> Self {
        self.world.set_defer_structural(defer);
        self
    }

    /// Pre-registers a component type.
    pub fn register_component<T: Component>(mut self) -> Self {
        self.world.register_component::<T>();
        self
    }

    /// Registers a setup-phase system.
    pub fn add_setup(mut self, descriptor: Descriptor, system: impl Setup) -> Self {
        self.entries.push((descriptor, Executable::Setup(Box::new(system))));
        self
    }

    /// Registers a simulation-phase system.
    pub fn add_simulate(mut self, descriptor: Descriptor, system: impl Simulate) -> Self {
        self.entries.push((descriptor, Executable::Simulate(Box::new(system))));
        self
    }

    /// Registers a presentation-phase system.
    pub fn add_present(mut self, descriptor: Descriptor, system: impl Present) -> Self {
        self.entries.push((descriptor, Executable::Present(Box::new(system))));
        self
    }

    /// Classifies and orders the registered systems.
    ///
    /// Fails fast on duplicate names, explicit/inferred phase conflicts
    /// and ordering cycles, before any system executes.
    pub fn build(self) -> Result<Runtime, PlanError> {
        let nodes: Vec<(Descriptor, Phase)> = self
            .entries
            .iter()
            .map(|(descriptor, executable)| (descriptor.clone(), executable.inferred_phase()))
            .collect();
        let plan = scheduler::build_plan(&nodes)?;
        let systems = self.entries.into_iter().map(|(_, executable)| executable).collect();
        Ok(Runtime { world: self.world, systems, plan })
    }
}
