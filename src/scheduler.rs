//! Classifies systems into phases and orders each phase
//! by its dependency constraints.
//!
//! Plan construction is a one-shot build: classification and ordering errors
//! are reported before any system executes, and the resulting [`Plan`] is
//! never mutated afterwards. Ties among simultaneously-ready systems break
//! by lexicographic name, never by insertion order, so plan output is
//! reproducible across runs and platforms.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use itertools::Itertools;

use crate::error::PlanError;
use crate::system::Descriptor;

#[cfg(test)]
mod tests;

/// One of the three fixed scheduling buckets.
///
/// Phases impose the only cross-phase ordering;
/// Before/After constraints apply within a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Pre-tick setup, e.g. input sampling and spawning.
    Setup,
    /// The main simulation step.
    Simulate,
    /// Post-tick presentation, e.g. pushing state to bindings.
    Present,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 3] = [Phase::Setup, Phase::Simulate, Phase::Present];

    fn index(self) -> usize {
        match self {
            Self::Setup => 0,
            Self::Simulate => 1,
            Self::Present => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "Setup",
            Self::Simulate => "Simulate",
            Self::Present => "Present",
        })
    }
}

/// The ordered execution plan: one system order per phase,
/// plus initialize/shutdown orderings derived from it.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    order: [Vec<usize>; 3],
}

impl Plan {
    /// The system indices to execute for one phase, in order.
    pub(crate) fn phase_order(&self, phase: Phase) -> &[usize] { &self.order[phase.index()] }

    /// The initialization order: forward over all phases.
    pub(crate) fn init_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().flatten().copied()
    }

    /// The shutdown order: the reverse of the initialization order.
    pub(crate) fn shutdown_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().rev().flat_map(|phase| phase.iter().rev()).copied()
    }
}

/// Builds the execution plan from `(descriptor, inferred phase)` pairs.
///
/// The index of each pair is the system index used in the returned plan.
pub(crate) fn build_plan(nodes: &[(Descriptor, Phase)]) -> Result<Plan, PlanError> {
    let phases = classify(nodes)?;

    let mut plan = Plan::default();
    for phase in Phase::ALL {
        let members: Vec<usize> =
            (0..nodes.len()).filter(|&index| phases[index] == phase).collect();
        plan.order[phase.index()] = sort_phase(nodes, phase, &members)?;
    }
    Ok(plan)
}

/// Resolves each system to exactly one phase,
/// rejecting duplicate names and explicit/inferred phase conflicts.
fn classify(nodes: &[(Descriptor, Phase)]) -> Result<Vec<Phase>, PlanError> {
    let mut seen: HashMap<&str, ()> = HashMap::new();
    let mut phases = Vec::with_capacity(nodes.len());

    for (descriptor, inferred) in nodes {
        if seen.insert(descriptor.name(), ()).is_some() {
            return Err(PlanError::DuplicateSystem { system: descriptor.name().to_string() });
        }
        match descriptor.phase {
            Some(declared) if declared != *inferred => {
                return Err(PlanError::ConflictingPhase {
                    system:   descriptor.name().to_string(),
                    declared,
                    inferred: *inferred,
                });
            }
            _ => phases.push(*inferred),
        }
    }
    Ok(phases)
}

/// Kahn's algorithm over the Before/After constraints of one phase.
fn sort_phase(
    nodes: &[(Descriptor, Phase)],
    phase: Phase,
    members: &[usize],
) -> Result<Vec<usize>, PlanError> {
    let locals: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(local, &index)| (nodes[index].0.name(), local))
        .collect();
    let known: std::collections::HashSet<&str> =
        nodes.iter().map(|(descriptor, _)| descriptor.name()).collect();

    // dependents[a] contains b iff a must run before b
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    let mut blockers: Vec<usize> = vec![0; members.len()];

    for &index in members {
        let descriptor = &nodes[index].0;
        let me = *locals.get(descriptor.name()).expect("member of this phase");
        let constraints = descriptor
            .before
            .iter()
            .map(|target| (target, false))
            .chain(descriptor.after.iter().map(|target| (target, true)));
        for (target, target_runs_first) in constraints {
            match locals.get(target.as_str()) {
                Some(&other) => {
                    let (from, to) = if target_runs_first { (other, me) } else { (me, other) };
                    dependents[from].push(to);
                    blockers[to] += 1;
                }
                // cross-phase ordering is not supported;
                // the phases themselves impose the only cross-phase order
                None if known.contains(target.as_str()) => log::warn!(
                    "dropping ordering constraint between {} and {target}: \
                     {target} is not in phase {phase}",
                    descriptor.name(),
                ),
                None => log::warn!(
                    "dropping ordering constraint of {} on {target}: \
                     no system named {target} is registered",
                    descriptor.name(),
                ),
            }
        }
    }

    // ready set keyed by name for the deterministic tie-break
    let mut ready: BTreeSet<(&str, usize)> = members
        .iter()
        .enumerate()
        .filter(|&(local, _)| blockers[local] == 0)
        .map(|(local, &index)| (nodes[index].0.name(), local))
        .collect();

    let mut order = Vec::with_capacity(members.len());
    while let Some(&(name, local)) = ready.iter().next() {
        ready.remove(&(name, local));
        order.push(members[local]);
        for &dependent in &dependents[local] {
            blockers[dependent] -= 1;
            if blockers[dependent] == 0 {
                ready.insert((nodes[members[dependent]].0.name(), dependent));
            }
        }
    }

    if order.len() < members.len() {
        // a non-empty remainder means the constraints form a cycle
        let members = members
            .iter()
            .enumerate()
            .filter(|&(local, _)| blockers[local] > 0)
            .map(|(_, &index)| nodes[index].0.name().to_string())
            .sorted()
            .collect();
        return Err(PlanError::CycleDetected { phase, members });
    }
    Ok(order)
}
