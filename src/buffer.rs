//! Command buffers: thread-safe queues of pending structural mutations.
//!
//! Structural changes (add/remove/destroy) are unsafe to perform while a
//! system is iterating the pools they affect, so they can be enqueued here
//! and drained at a chosen boundary instead. Enqueueing is the only
//! concurrency-safe surface of the runtime; draining must happen on a single
//! consumer, never concurrently with query iteration.

use parking_lot::Mutex;

use crate::error::Error;
use crate::storage::Component;
use crate::world::World;
use crate::Entity;

/// A pending structural operation, consumed exactly once when the buffer
/// holding it is applied.
pub(crate) type PendingOp = Box<dyn FnOnce(&mut World) -> Result<(), Error> + Send>;

/// A FIFO of pending operations, applied in enqueue order.
///
/// Multiple producer threads may enqueue concurrently.
/// An operation applies unless the buffer is discarded without being drained;
/// never draining is the only cancellation mechanism.
#[derive(Default)]
pub struct CommandBuffer {
    queue: Mutex<Vec<PendingOp>>,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self { Self::default() }

    /// Enqueues an insert, dispatched through the write gateway at drain time.
    pub fn insert<T: Component>(&self, entity: Entity, value: T) {
        self.push(Box::new(move |world| world.insert(entity, value)));
    }

    /// Enqueues a replace, dispatched through the write gateway at drain time.
    pub fn replace<T: Component>(&self, entity: Entity, value: T) {
        self.push(Box::new(move |world| world.replace(entity, value)));
    }

    /// Enqueues a remove, dispatched through the write gateway at drain time.
    pub fn remove<T: Component>(&self, entity: Entity) {
        self.push(Box::new(move |world| world.remove::<T>(entity)));
    }

    /// Enqueues an entity destruction.
    pub fn destroy(&self, entity: Entity) {
        self.push(Box::new(move |world| {
            world.destroy_entity(entity);
            Ok(())
        }));
    }

    /// Drains the queue in enqueue order, applying each operation to `world`.
    /// Returns the number of operations that took effect.
    ///
    /// Draining is idempotent: a second drain sees an empty queue.
    /// Failures of individual operations (e.g. the target entity died before
    /// the drain) are logged, excluded from the count and do not stop the
    /// drain.
    pub fn apply(&self, world: &mut World) -> usize {
        let ops: Vec<PendingOp> = std::mem::take(&mut *self.queue.lock());
        let mut applied = 0;
        for op in ops {
            match op(world) {
                Ok(()) => applied += 1,
                Err(err) => log::warn!("deferred operation failed: {err}"),
            }
        }
        applied
    }

    /// The number of pending operations.
    pub fn len(&self) -> usize { self.queue.lock().len() }

    /// Whether no operations are pending.
    pub fn is_empty(&self) -> bool { self.queue.lock().is_empty() }

    pub(crate) fn push(&self, op: PendingOp) { self.queue.lock().push(op); }
}
