//! Error types raised by the runtime.
//!
//! Per-operation failures are represented by [`Error`].
//! [`Error::WriteDenied`] and [`Error::ValidationFailed`] are subject to the
//! configured [`FailurePolicy`](crate::gateway::FailurePolicy);
//! the remaining variants indicate programming errors and are always returned.
//!
//! Plan construction failures are represented by [`PlanError`]
//! and always abort initialization — there is no safe partial plan.

use thiserror::Error;

use crate::entity::Entity;
use crate::scheduler::Phase;
use crate::util::DbgTypeId;

/// An error raised by a single runtime operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A read or replace targeted a component that is not present on the entity.
    #[error("entity {entity} has no {comp} component")]
    MissingComponent {
        /// The entity that was accessed.
        entity: Entity,
        /// The component type that was absent.
        comp:   DbgTypeId,
    },

    /// A boxed operation carried a payload of the wrong runtime type.
    #[error("boxed value is not of type {expected}")]
    TypeMismatch {
        /// The component type the pool stores.
        expected: DbgTypeId,
    },

    /// The write-permission predicate rejected the operation.
    #[error("write of {comp} on entity {entity} denied by permission policy")]
    WriteDenied {
        /// The entity that was written.
        entity: Entity,
        /// The component type that was written.
        comp:   DbgTypeId,
    },

    /// A registered validator rejected the operation.
    #[error("validation of {comp} on entity {entity} failed: {reason}")]
    ValidationFailed {
        /// The entity that was written.
        entity: Entity,
        /// The component type that was written.
        comp:   DbgTypeId,
        /// The reason reported by the validator.
        reason: String,
    },

    /// The operation targeted an entity whose handle is stale or was never alive.
    #[error("entity {entity} is not alive")]
    DeadEntity {
        /// The stale handle.
        entity: Entity,
    },

    /// A boxed operation named a component type with no registered pool.
    #[error("component type {comp} has no registered pool")]
    UnknownComponentType {
        /// The unregistered component type.
        comp: DbgTypeId,
    },
}

/// A fatal error detected while building the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The dependency constraints within one phase form a cycle.
    #[error("systems in phase {phase} have a cyclic dependency: {}", members.join(" -> "))]
    CycleDetected {
        /// The phase containing the cycle.
        phase:   Phase,
        /// The names of the systems involved, in stable name order.
        members: Vec<String>,
    },

    /// A system declared an explicit phase that disagrees with the phase
    /// inferred from its execution kind.
    #[error("system {system} declares phase {declared} but its execution kind implies {inferred}")]
    ConflictingPhase {
        /// The offending system name.
        system:   String,
        /// The explicitly declared phase.
        declared: Phase,
        /// The phase inferred from the execution-kind trait.
        inferred: Phase,
    },

    /// Two systems were registered under the same name.
    #[error("system {system} is registered more than once")]
    DuplicateSystem {
        /// The duplicated system name.
        system: String,
    },
}
