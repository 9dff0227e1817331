//! A small entity-component runtime with gated writes and batched change
//! notification.
//!
//! Entities are generational handles into dense per-type component pools.
//! All component mutation funnels through a write gateway that evaluates a
//! permission predicate and registered validators before touching storage,
//! so a host application can impose domain rules on every write.
//! Writes raise change events that a per-tick aggregator coalesces into one
//! de-duplicated batch per phase, giving bindings a single cheap
//! notification stream instead of one callback per mutation.
//!
//! Systems register under one of three fixed phases (Setup, Simulate,
//! Present) with optional before/after constraints; the [`Runtime`] resolves
//! them into a deterministic execution plan and drives the cooperative
//! single-threaded tick loop. Structural mutations from within a running
//! system go through [`CommandBuffer`]s, drained at tick boundaries.

pub mod buffer;
pub mod changes;
pub mod entity;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod scheduler;
pub mod storage;
pub mod system;
pub mod util;
pub mod world;

#[cfg(test)]
mod test_util;

pub use buffer::CommandBuffer;
pub use changes::{ChangeKind, ChangeMask, ChangeRecord, LifecycleEvent, Subscription};
pub use entity::Entity;
pub use error::{Error, PlanError};
pub use filter::{Filter, FilterBuilder};
pub use gateway::FailurePolicy;
pub use scheduler::Phase;
pub use storage::{Component, ComponentPool, Storage};
pub use system::{Descriptor, Present, Setup, Simulate, System};
pub use util::DbgTypeId;
pub use world::{Runtime, RuntimeBuilder, World};
