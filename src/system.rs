//! System traits and registration descriptors.
//!
//! A system implements exactly one of the three execution-kind traits
//! ([`Setup`], [`Simulate`], [`Present`]), which determines the phase it
//! runs in. A [`Descriptor`] may additionally pin an explicit phase;
//! a disagreement between the two is a fatal configuration error
//! detected at plan-build time.

use crate::scheduler::Phase;
use crate::world::World;

/// Lifecycle hooks shared by all execution kinds.
///
/// `initialize` is invoked once in plan order before the first tick;
/// `shutdown` once in reverse plan order.
pub trait System: 'static {
    /// Called once before the first tick, in forward plan order.
    fn initialize(&mut self, _world: &mut World) {}

    /// Called once after the last tick, in reverse plan order.
    fn shutdown(&mut self, _world: &mut World) {}
}

/// A system running in the pre-tick setup phase.
pub trait Setup: System {
    /// Runs once per tick during [`Phase::Setup`].
    fn setup(&mut self, world: &mut World);
}

/// A system running in the main simulation phase.
pub trait Simulate: System {
    /// Runs once per tick during [`Phase::Simulate`].
    fn simulate(&mut self, world: &mut World);
}

/// A system running in the post-tick presentation phase.
pub trait Present: System {
    /// Runs once per tick during [`Phase::Present`].
    fn present(&mut self, world: &mut World);
}

/// A registered system, tagged by its execution kind.
pub(crate) enum Executable {
    Setup(Box<dyn Setup>),
    Simulate(Box<dyn Simulate>),
    Present(Box<dyn Present>),
}

impl Executable {
    /// The phase inferred from the execution-kind trait the system implements.
    pub(crate) fn inferred_phase(&self) -> Phase {
        match self {
            Self::Setup(_) => Phase::Setup,
            Self::Simulate(_) => Phase::Simulate,
            Self::Present(_) => Phase::Present,
        }
    }

    pub(crate) fn run(&mut self, world: &mut World) {
        match self {
            Self::Setup(system) => system.setup(world),
            Self::Simulate(system) => system.simulate(world),
            Self::Present(system) => system.present(world),
        }
    }

    pub(crate) fn initialize(&mut self, world: &mut World) {
        match self {
            Self::Setup(system) => system.initialize(world),
            Self::Simulate(system) => system.initialize(world),
            Self::Present(system) => system.initialize(world),
        }
    }

    pub(crate) fn shutdown(&mut self, world: &mut World) {
        match self {
            Self::Setup(system) => system.shutdown(world),
            Self::Simulate(system) => system.shutdown(world),
            Self::Present(system) => system.shutdown(world),
        }
    }
}

/// Static declarations for one system: its unique name,
/// an optional explicit phase and its ordering constraints.
///
/// Created once at registration; never mutated after the plan is built.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub(crate) name:   String,
    pub(crate) phase:  Option<Phase>,
    pub(crate) before: Vec<String>,
    pub(crate) after:  Vec<String>,
}

impl Descriptor {
    /// Creates a descriptor with no explicit phase and no constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), phase: None, before: Vec::new(), after: Vec::new() }
    }

    /// Pins an explicit phase. Must agree with the execution kind.
    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Declares that this system runs before the named system.
    /// Only effective within the same phase.
    pub fn before(mut self, other: impl Into<String>) -> Self {
        self.before.push(other.into());
        self
    }

    /// Declares that this system runs after the named system.
    /// Only effective within the same phase.
    pub fn after(mut self, other: impl Into<String>) -> Self {
        self.after.push(other.into());
        self
    }

    /// The unique system name.
    pub fn name(&self) -> &str { &self.name }
}
