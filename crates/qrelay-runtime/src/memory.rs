//! Quantum memory - indexed slots holding at most one qubit each

use qrelay_core::{NodeId, QrelayError, QrelayResult, QubitId, SimTime, SlotIndex};
use qrelay_quantum::DepolarNoise;

use crate::MemorySlotRegistry;

/// One memory position
#[derive(Clone, Debug)]
pub struct MemorySlot {
    pub index: SlotIndex,
    /// Qubit currently held
    pub qubit: Option<QubitId>,
    /// Last time storage noise was settled for the held qubit
    pub last_touch: SimTime,
}

impl MemorySlot {
    fn new(index: usize) -> Self {
        MemorySlot {
            index: SlotIndex::new(index),
            qubit: None,
            last_touch: SimTime::ZERO,
        }
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.qubit.is_some()
    }
}

/// Quantum memory of one node
#[derive(Clone, Debug)]
pub struct QuantumMemory {
    node: NodeId,
    slots: Vec<MemorySlot>,
    registry: MemorySlotRegistry,
    /// Storage noise while a qubit sits idle
    noise: DepolarNoise,
}

impl QuantumMemory {
    pub fn new(node: NodeId, capacity: usize, noise: DepolarNoise) -> Self {
        QuantumMemory {
            node,
            slots: (0..capacity).map(MemorySlot::new).collect(),
            registry: MemorySlotRegistry::new(node, capacity),
            noise,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn noise(&self) -> DepolarNoise {
        self.noise
    }

    pub fn registry(&self) -> &MemorySlotRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MemorySlotRegistry {
        &mut self.registry
    }

    pub fn slot(&self, index: SlotIndex) -> QrelayResult<&MemorySlot> {
        let capacity = self.capacity();
        self.slots
            .get(index.get())
            .ok_or(QrelayError::SlotOutOfRange {
                node: self.node,
                slot: index,
                capacity,
            })
    }

    pub fn slot_mut(&mut self, index: SlotIndex) -> QrelayResult<&mut MemorySlot> {
        let capacity = self.capacity();
        let node = self.node;
        self.slots
            .get_mut(index.get())
            .ok_or(QrelayError::SlotOutOfRange {
                node,
                slot: index,
                capacity,
            })
    }

    /// Qubit held by a slot, if any
    pub fn peek(&self, index: SlotIndex) -> QrelayResult<Option<QubitId>> {
        Ok(self.slot(index)?.qubit)
    }

    /// Qubit held by a slot; empty slots are an error
    pub fn expect_qubit(&self, index: SlotIndex) -> QrelayResult<QubitId> {
        self.peek(index)?.ok_or(QrelayError::EmptySlot {
            node: self.node,
            slot: index,
        })
    }

    /// Store a qubit; returns any qubit it displaced
    pub fn put(&mut self, index: SlotIndex, qubit: QubitId, now: SimTime) -> QrelayResult<Option<QubitId>> {
        let slot = self.slot_mut(index)?;
        let displaced = slot.qubit.replace(qubit);
        slot.last_touch = now;
        Ok(displaced)
    }

    /// Remove and return the qubit held by a slot
    pub fn take(&mut self, index: SlotIndex) -> QrelayResult<Option<QubitId>> {
        Ok(self.slot_mut(index)?.qubit.take())
    }

    /// Exchange the contents of two slots
    pub fn swap(&mut self, a: SlotIndex, b: SlotIndex) -> QrelayResult<()> {
        self.slot(a)?;
        self.slot(b)?;
        if a == b {
            return Ok(());
        }
        let qa = self.slots[a.get()].qubit.take();
        let qb = self.slots[b.get()].qubit.take();
        let ta = self.slots[a.get()].last_touch;
        let tb = self.slots[b.get()].last_touch;
        self.slots[a.get()].qubit = qb;
        self.slots[a.get()].last_touch = tb;
        self.slots[b.get()].qubit = qa;
        self.slots[b.get()].last_touch = ta;
        Ok(())
    }

    /// Occupied slots in index order
    pub fn occupied(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|s| s.is_occupied())
            .map(|s| s.index)
            .collect()
    }
}
