use std::sync::{Arc, RwLock};

use super::Gate;

/// Atomically swappable list of gates (spec.md §4.5 "Dynamic Strategy Set",
/// C5). A policy reload calls `set()` with a freshly built chain; every
/// concurrent `acquire`/`release` sees either the old list or the new one in
/// full, never a partial mix.
///
/// Coarse `std::sync::RwLock` rather than a lock-free structure: reloads are
/// rare (driven by policy-object watches) and reads are just a `Vec` clone,
/// so there is no contention this needs to be clever about.
pub struct GateSnapshot {
    gates: RwLock<Arc<Vec<Arc<dyn Gate>>>>,
}

impl GateSnapshot {
    pub fn new() -> Self {
        Self {
            gates: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the active gate list. Existing waiters inside a gate's
    /// `acquire` are unaffected — they hold a reference to the gate they're
    /// suspended in, not to this snapshot.
    pub fn set(&self, gates: Vec<Arc<dyn Gate>>) {
        let mut guard = self.gates.write().expect("gate snapshot lock poisoned");
        *guard = Arc::new(gates);
    }

    /// Current gate list, in acquire order.
    pub fn get(&self) -> Arc<Vec<Arc<dyn Gate>>> {
        self.gates.read().expect("gate snapshot lock poisoned").clone()
    }
}

impl Default for GateSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::rate::RateGate;
    use std::time::Duration;

    #[test]
    fn starts_empty() {
        let snapshot = GateSnapshot::new();
        assert!(snapshot.get().is_empty());
    }

    #[test]
    fn set_then_get_round_trips() {
        let snapshot = GateSnapshot::new();
        let gate: Arc<dyn Gate> = Arc::new(RateGate::new(Duration::from_millis(10), 1));
        snapshot.set(vec![gate]);
        assert_eq!(snapshot.get().len(), 1);
    }

    #[test]
    fn set_replaces_wholesale() {
        let snapshot = GateSnapshot::new();
        let gate: Arc<dyn Gate> = Arc::new(RateGate::new(Duration::from_millis(10), 1));
        snapshot.set(vec![gate.clone(), gate.clone()]);
        assert_eq!(snapshot.get().len(), 2);
        snapshot.set(vec![]);
        assert_eq!(snapshot.get().len(), 0);
    }
}
