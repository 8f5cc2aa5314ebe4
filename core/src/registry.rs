//! Process-wide circuit table keyed by the 4-byte circuit id, backed by a
//! `parking_lot::RwLock<HashMap>` — a single flat map is enough here since
//! circuit churn, unlike the transport pool, is driven by lookups and
//! point removals rather than random sampling.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::circuit::Circuit;
use crate::frame::CircuitId;

#[derive(Default)]
pub struct CircuitRegistry {
    circuits: RwLock<HashMap<CircuitId, Arc<Circuit>>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, circuit: Arc<Circuit>) {
        self.circuits.write().insert(circuit.id, circuit);
    }

    pub fn get(&self, id: &CircuitId) -> Option<Arc<Circuit>> {
        self.circuits.read().get(id).cloned()
    }

    /// Remove `id` and, if it was present, run `on_removed` with the
    /// removed circuit while no other remover can observe a half-removed
    /// entry.
    pub fn remove_with(&self, id: &CircuitId, on_removed: impl FnOnce(&Arc<Circuit>)) {
        let removed = self.circuits.write().remove(id);
        if let Some(circuit) = removed {
            on_removed(&circuit);
        }
    }

    pub fn len(&self) -> usize {
        self.circuits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Outbound;
    use crate::pipe;

    fn dummy_circuit(id: CircuitId) -> Arc<Circuit> {
        let (reader, writer) = pipe::pipe();
        reader.close();
        Arc::new(Circuit::new(id, writer, Outbound::None))
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let registry = CircuitRegistry::new();
        let id = [1, 2, 3, 4];
        registry.insert(dummy_circuit(id));
        assert!(registry.get(&id).is_some());

        let mut called = false;
        registry.remove_with(&id, |_| called = true);
        assert!(called);
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn remove_missing_id_is_a_no_op() {
        let registry = CircuitRegistry::new();
        let mut called = false;
        registry.remove_with(&[9, 9, 9, 9], |_| called = true);
        assert!(!called);
    }
}
