//! The write gateway: the single funnel for component mutation.
//!
//! Every `insert`/`replace`/`remove` call evaluates the write-permission
//! predicate and the registered validators before anything is mutated.
//! A denied or invalid write never mutates storage and never raises change
//! events, regardless of the failure policy — only the signaling of the
//! denial differs.
//!
//! Structural mutation is offered through two self-documenting entry points:
//! the immediate path on [`World`] applies in place, while the buffered
//! variants enqueue a pre-authorized application into a [`CommandBuffer`]
//! for a later synchronous drain.

use std::any::Any;
use std::collections::HashMap;

use crate::buffer::CommandBuffer;
use crate::changes::ChangeKind;
use crate::entity::Entity;
use crate::error::Error;
use crate::storage::{Component, Storage};
use crate::util::DbgTypeId;
use crate::world::World;

/// How [`Error::WriteDenied`] and [`Error::ValidationFailed`] are surfaced.
///
/// The policy is a per-world setting, not per-call.
/// [`Error::MissingComponent`] and [`Error::TypeMismatch`] are unaffected:
/// they indicate programming errors and are always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Return the error to the caller.
    #[default]
    Throw,
    /// Log the rejection and treat the call as a no-op.
    Log,
    /// Treat the call as a no-op without a trace.
    Silent,
}

/// Predicate deciding whether a write of `comp` on `entity` is permitted.
pub type PermissionFn = Box<dyn Fn(&Storage, Entity, DbgTypeId) -> bool + Send + Sync>;

/// Validator over the component type being written, regardless of value.
pub type TypeValidatorFn = Box<dyn Fn(Entity, DbgTypeId) -> Result<(), String> + Send + Sync>;

/// Validator over the concrete value being written.
pub type ValueValidatorFn = Box<dyn Fn(Entity, &dyn Any) -> Result<(), String> + Send + Sync>;

/// Gateway configuration owned by a [`World`].
#[derive(Default)]
pub(crate) struct Gateway {
    pub(crate) policy:           FailurePolicy,
    pub(crate) permission:       Option<PermissionFn>,
    pub(crate) type_validators:  Vec<TypeValidatorFn>,
    pub(crate) value_validators: HashMap<DbgTypeId, Vec<ValueValidatorFn>>,
    /// When set, inserts and removes without an explicit buffer are enqueued
    /// for the next tick boundary instead of mutating in place.
    /// Structural changes are unsafe while another system iterates the pool.
    pub(crate) defer_structural: bool,
}

/// Outcome of the permission/validation checks when the policy suppresses
/// the error instead of returning it.
enum Verdict {
    Proceed,
    Suppressed,
}

impl World {
    /// Adds a component to an entity.
    ///
    /// A silent no-op if the entity already has a `T` component.
    /// With the deferred-structural preference set, the mutation is enqueued
    /// for the next tick boundary instead of applying in place.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write(entity, ty, Some(&value))? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        if self.gateway.defer_structural {
            self.deferred.push(Box::new(move |world| world.apply_insert(entity, value)));
            return Ok(());
        }
        self.apply_insert(entity, value)
    }

    /// Adds a component through a command buffer.
    ///
    /// Permission and validation run now; the pre-authorized mutation applies
    /// when the buffer is drained. Liveness is re-checked at drain time.
    pub fn insert_buffered<T: Component>(
        &self,
        entity: Entity,
        value: T,
        buffer: &CommandBuffer,
    ) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write(entity, ty, Some(&value))? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        buffer.push(Box::new(move |world| world.apply_insert(entity, value)));
        Ok(())
    }

    /// Replaces the existing `T` component of an entity, raising `Changed`.
    ///
    /// Fails with [`Error::MissingComponent`] if the component is absent;
    /// callers wanting add-or-replace semantics must check
    /// [`has`](Self::has) explicitly.
    pub fn replace<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write(entity, ty, Some(&value))? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        // a replace is a value update, not a structural change,
        // so it is never rerouted by the deferred-structural preference
        self.apply_replace(entity, value)
    }

    /// Replaces a component through a command buffer.
    /// Checks run now; the mutation applies at drain time.
    pub fn replace_buffered<T: Component>(
        &self,
        entity: Entity,
        value: T,
        buffer: &CommandBuffer,
    ) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write(entity, ty, Some(&value))? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        buffer.push(Box::new(move |world| world.apply_replace(entity, value)));
        Ok(())
    }

    /// Removes the `T` component from an entity.
    /// A no-op if the component is absent.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write::<T>(entity, ty, None)? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        if self.gateway.defer_structural {
            self.deferred.push(Box::new(move |world| world.apply_remove::<T>(entity)));
            return Ok(());
        }
        self.apply_remove::<T>(entity)
    }

    /// Removes a component through a command buffer.
    /// Checks run now; the mutation applies at drain time.
    pub fn remove_buffered<T: Component>(
        &self,
        entity: Entity,
        buffer: &CommandBuffer,
    ) -> Result<(), Error> {
        let ty = DbgTypeId::of::<T>();
        match self.check_write::<T>(entity, ty, None)? {
            Verdict::Suppressed => return Ok(()),
            Verdict::Proceed => {}
        }
        buffer.push(Box::new(move |world| world.apply_remove::<T>(entity)));
        Ok(())
    }

    /// Sets the failure policy for denied and invalid writes.
    pub fn set_failure_policy(&mut self, policy: FailurePolicy) { self.gateway.policy = policy; }

    /// Installs the write-permission predicate, replacing any existing one.
    pub fn set_permission(
        &mut self,
        permission: impl Fn(&Storage, Entity, DbgTypeId) -> bool + Send + Sync + 'static,
    ) {
        self.gateway.permission = Some(Box::new(permission));
    }

    /// Registers a type-level validator, consulted for every add and replace.
    pub fn add_type_validator(
        &mut self,
        validator: impl Fn(Entity, DbgTypeId) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.gateway.type_validators.push(Box::new(validator));
    }

    /// Registers a value validator for `T`, consulted on add and replace of `T`.
    pub fn add_validator<T: Component>(
        &mut self,
        validator: impl Fn(Entity, &T) -> Result<(), String> + Send + Sync + 'static,
    ) {
        let adapted = move |entity: Entity, value: &dyn Any| {
            let value = value.downcast_ref::<T>().expect("validator registered under T");
            validator(entity, value)
        };
        self.gateway
            .value_validators
            .entry(DbgTypeId::of::<T>())
            .or_default()
            .push(Box::new(adapted));
    }

    /// Sets the global deferred-structural preference:
    /// inserts and removes without an explicit buffer are enqueued
    /// and applied by [`run_scheduled_jobs`](Self::run_scheduled_jobs).
    pub fn set_defer_structural(&mut self, defer: bool) {
        self.gateway.defer_structural = defer;
    }

    /// Runs the liveness, permission and validation checks for one write.
    fn check_write<T: Component>(
        &self,
        entity: Entity,
        ty: DbgTypeId,
        value: Option<&T>,
    ) -> Result<Verdict, Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }

        if let Some(permission) = &self.gateway.permission {
            if !permission(&self.storage, entity, ty) {
                return self.signal_failure(Error::WriteDenied { entity, comp: ty });
            }
        }

        if let Some(value) = value {
            for validator in &self.gateway.type_validators {
                if let Err(reason) = validator(entity, ty) {
                    return self
                        .signal_failure(Error::ValidationFailed { entity, comp: ty, reason });
                }
            }
            if let Some(validators) = self.gateway.value_validators.get(&ty) {
                for validator in validators {
                    if let Err(reason) = validator(entity, value) {
                        return self
                            .signal_failure(Error::ValidationFailed { entity, comp: ty, reason });
                    }
                }
            }
        }

        Ok(Verdict::Proceed)
    }

    fn signal_failure(&self, err: Error) -> Result<Verdict, Error> {
        match self.gateway.policy {
            FailurePolicy::Throw => Err(err),
            FailurePolicy::Log => {
                log::warn!("{err}");
                Ok(Verdict::Suppressed)
            }
            FailurePolicy::Silent => Ok(Verdict::Suppressed),
        }
    }

    /// Pre-authorized insert: mutates storage and raises `Added`.
    pub(crate) fn apply_insert<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        let pool = self.storage.pool_mut_or_register::<T>();
        if pool.has(entity.index()) {
            // idempotent: adding an existing component is a silent no-op
            return Ok(());
        }
        pool.insert(entity.index(), value);
        self.bus.publish_component(entity, DbgTypeId::of::<T>(), ChangeKind::Added);
        Ok(())
    }

    /// Pre-authorized replace: mutates storage and raises `Changed`.
    pub(crate) fn apply_replace<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        let ty = DbgTypeId::of::<T>();
        let slot = self
            .storage
            .pool_mut::<T>()
            .and_then(|pool| pool.get_mut(entity.index()))
            .ok_or(Error::MissingComponent { entity, comp: ty })?;
        *slot = value;
        self.bus.publish_component(entity, ty, ChangeKind::Changed);
        Ok(())
    }

    /// Pre-authorized remove: mutates storage and raises `Removed`.
    pub(crate) fn apply_remove<T: Component>(&mut self, entity: Entity) -> Result<(), Error> {
        if !self.is_alive(entity) {
            return Err(Error::DeadEntity { entity });
        }
        let removed = self
            .storage
            .pool_mut::<T>()
            .map_or(false, |pool| pool.remove(entity.index()).is_some());
        if removed {
            self.bus.publish_component(entity, DbgTypeId::of::<T>(), ChangeKind::Removed);
        }
        Ok(())
    }
}
