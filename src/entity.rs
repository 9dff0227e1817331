//! Entity handles and the id allocator.
//!
//! Ids are recycled through a free list on destruction.
//! The generation for an id is bumped when the id is next reused,
//! not at destroy time, so that destroying an entity stays O(1)
//! and stale handles compare as dead.

use std::fmt;

use crate::storage::presence::PresenceSet;

/// An opaque handle to an entity: a slot id plus the generation
/// at which the slot was occupied.
///
/// A handle is valid only while the allocator's current generation
/// for the id matches; handles to destroyed entities compare as dead
/// even after the id is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    id:         u32,
    generation: u32,
}

impl Entity {
    pub(crate) fn new(id: u32, generation: u32) -> Self { Self { id, generation } }

    /// The slot id. Only unique among currently-alive entities.
    pub fn id(&self) -> u32 { self.id }

    /// The generation stamp disambiguating reuses of the same id.
    pub fn generation(&self) -> u32 { self.generation }

    pub(crate) fn index(&self) -> usize { self.id as usize }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}v{}", self.id, self.generation)
    }
}

/// Allocates and recycles entity ids with generation stamping.
#[derive(Debug, Default)]
pub(crate) struct Allocator {
    alive:       PresenceSet,
    generations: Vec<u32>,
    free:        Vec<u32>,
    gauge:       u32,
}

impl Allocator {
    /// Allocates a fresh or recycled id and marks it alive.
    pub(crate) fn create(&mut self) -> Entity {
        let id = match self.free.pop() {
            Some(id) => {
                // generation bump happens here, on reuse
                let generation =
                    self.generations.get_mut(id as usize).expect("recycled id was allocated");
                *generation = generation.wrapping_add(1);
                id
            }
            None => {
                let id = self.gauge;
                self.gauge += 1;
                id
            }
        };
        self.grow_generations(id);
        self.alive.set(id as usize);
        Entity::new(id, self.generation_of(id))
    }

    /// Marks an explicitly requested id alive without bumping its generation.
    ///
    /// This is a facility for deterministic replay and testing, not general use.
    /// If the id was sitting in the free list it is withdrawn from it
    /// so that the allocator never hands it out twice.
    pub(crate) fn create_at(&mut self, id: u32) -> Entity {
        self.free.retain(|&recycled| recycled != id);
        if id >= self.gauge {
            self.gauge = id + 1;
        }
        self.grow_generations(id);
        self.alive.set(id as usize);
        Entity::new(id, self.generation_of(id))
    }

    /// Clears the alive bit and queues the id for recycling.
    /// Returns `false` if the handle was already dead.
    pub(crate) fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.alive.clear(entity.index());
        self.free.push(entity.id());
        true
    }

    /// The sole authority for liveness:
    /// the alive bit must be set and the generation must match.
    pub(crate) fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(entity.index()) && self.generation_of(entity.id()) == entity.generation
    }

    /// Whether the slot id is occupied, regardless of generation.
    pub(crate) fn is_index_alive(&self, id: usize) -> bool { self.alive.contains(id) }

    /// Returns the current live handle for a slot id, if the slot is occupied.
    pub(crate) fn handle_of(&self, id: usize) -> Option<Entity> {
        if self.alive.contains(id) {
            Some(Entity::new(id as u32, self.generation_of(id as u32)))
        } else {
            None
        }
    }

    /// The number of currently alive entities.
    pub(crate) fn count(&self) -> usize { self.alive.len() }

    /// Iterates over all currently alive entities in id order.
    pub(crate) fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter_ones()
            .map(move |id| Entity::new(id as u32, self.generation_of(id as u32)))
    }

    fn generation_of(&self, id: u32) -> u32 {
        self.generations.get(id as usize).copied().unwrap_or(0)
    }

    fn grow_generations(&mut self, id: u32) {
        if self.generations.len() <= id as usize {
            self.generations.resize(id as usize + 1, 0);
        }
    }
}
