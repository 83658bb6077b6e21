//! Stage notifications emitted once per frame, in a fixed order.
//!
//! Re-architected from the source's observer-pattern pointer lists: handles
//! are owned by the tracker and notified synchronously; every notification
//! carries an owned snapshot copy of the relevant state, never a reference
//! into the live pool, so an observer can never alias tracker-internal data
//! (§9 design note).

use serde::{Deserialize, Serialize};

use crate::patch::PatchKind;

/// The fixed per-frame stage sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Begin,
    OptimizationGlobal,
    OptimizationLocal,
    UpdateWeights,
    RemovePatches,
    UpdateModalities,
    AddPatches,
    End,
}

/// A read-only snapshot of one patch, as handed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSnapshot {
    pub id: u64,
    pub kind: PatchKind,
    pub position: (f32, f32),
    pub weight: f32,
    pub age: u32,
    pub active: bool,
}

/// A read-only snapshot of the whole pool at a stage boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSetSnapshot {
    pub patches: Vec<PatchSnapshot>,
}

impl PatchSetSnapshot {
    pub fn from_positions(patches: &crate::patchset::Patches) -> Self {
        Self {
            patches: patches
                .iter()
                .map(|p| PatchSnapshot {
                    id: p.id(),
                    kind: p.kind(),
                    position: (p.position().x, p.position().y),
                    weight: p.weight(),
                    age: p.age(),
                    active: p.is_active(),
                })
                .collect(),
        }
    }
}

/// One reweight event: a patch's similarity and proximity scores for the
/// frame just processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReweightEvent {
    pub patch_id: u64,
    pub similarity: f32,
    pub proximity: f32,
}

/// Per-patch convergence record produced by both CE optimisation phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub iterations_run: usize,
    pub final_determinant: f32,
    pub converged: bool,
}

/// Registered by callers wanting to observe tracking progress. Methods
/// return `()`: an observer must be total and must not mutate tracker state
/// (enforced by only ever receiving owned snapshots).
pub trait Observer {
    fn on_stage(&mut self, _stage: Stage, _snapshot: &PatchSetSnapshot) {}

    fn on_reweight(&mut self, _events: &[ReweightEvent]) {}

    fn on_optimization(&mut self, _stage: Stage, _status: &[OptimizationStatus]) {}
}

/// The tracker's internal multiplexer over zero or more registered
/// observers, keyed by an opaque handle for `remove_observer`.
#[derive(Default)]
pub struct ObserverRegistry {
    next_handle: u64,
    observers: Vec<(u64, Box<dyn Observer>)>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Box<dyn Observer>) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.observers.push((handle, observer));
        handle
    }

    pub fn remove(&mut self, handle: u64) {
        self.observers.retain(|(h, _)| *h != handle);
    }

    pub fn notify_stage(&mut self, stage: Stage, snapshot: &PatchSetSnapshot) {
        for (_, obs) in &mut self.observers {
            obs.on_stage(stage, snapshot);
        }
        match stage {
            Stage::Begin => tracing::debug!(?stage, "stage begin"),
            Stage::End => tracing::debug!(?stage, "stage end"),
            _ => tracing::trace!(?stage, "stage"),
        }
    }

    pub fn notify_reweight(&mut self, events: &[ReweightEvent]) {
        for (_, obs) in &mut self.observers {
            obs.on_reweight(events);
        }
    }

    pub fn notify_optimization(&mut self, stage: Stage, status: &[OptimizationStatus]) {
        for (_, obs) in &mut self.observers {
            obs.on_optimization(stage, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Counter(Arc<Mutex<u32>>);
    impl Observer for Counter {
        fn on_stage(&mut self, _stage: Stage, _snapshot: &PatchSetSnapshot) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn registered_observer_receives_every_stage() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = ObserverRegistry::new();
        registry.add(Box::new(Counter(count.clone())));
        let snapshot = PatchSetSnapshot { patches: vec![] };
        for stage in [Stage::Begin, Stage::OptimizationGlobal, Stage::End] {
            registry.notify_stage(stage, &snapshot);
        }
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = ObserverRegistry::new();
        let handle = registry.add(Box::new(Counter(count.clone())));
        registry.remove(handle);
        let snapshot = PatchSetSnapshot { patches: vec![] };
        registry.notify_stage(Stage::Begin, &snapshot);
        assert_eq!(*count.lock().unwrap(), 0);
    }
}
