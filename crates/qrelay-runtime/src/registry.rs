//! Memory slot reservations
//!
//! A slot is exclusively owned by the protocol that reserved it until that
//! protocol is torn down. The check is synchronous and happens when the
//! protocol is built, never while the simulation runs.

use std::collections::BTreeMap;

use qrelay_core::{NodeId, QrelayError, QrelayResult, SlotIndex};

/// Handle returned by a successful reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReservationId(pub u64);

#[derive(Clone, Debug)]
struct Reservation {
    id: ReservationId,
    owner: String,
}

/// Tracks which slots of one node's memory are reserved, and by whom
#[derive(Clone, Debug)]
pub struct MemorySlotRegistry {
    node: NodeId,
    capacity: usize,
    reserved: BTreeMap<SlotIndex, Reservation>,
    next_id: u64,
}

impl MemorySlotRegistry {
    pub fn new(node: NodeId, capacity: usize) -> Self {
        MemorySlotRegistry {
            node,
            capacity,
            reserved: BTreeMap::new(),
            next_id: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    fn check_range(&self, slot: SlotIndex) -> QrelayResult<()> {
        if slot.get() >= self.capacity {
            return Err(QrelayError::SlotOutOfRange {
                node: self.node,
                slot,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Reserve every slot in `slots` for `owner`, or none of them.
    pub fn reserve(&mut self, slots: &[SlotIndex], owner: &str) -> QrelayResult<ReservationId> {
        for (i, slot) in slots.iter().enumerate() {
            self.check_range(*slot)?;
            if let Some(existing) = self.reserved.get(slot) {
                return Err(QrelayError::SlotConflict {
                    node: self.node,
                    slot: *slot,
                    owner: existing.owner.clone(),
                });
            }
            if slots[..i].contains(slot) {
                return Err(QrelayError::SlotConflict {
                    node: self.node,
                    slot: *slot,
                    owner: owner.to_string(),
                });
            }
        }

        let id = ReservationId(self.next_id);
        self.next_id += 1;
        for slot in slots {
            self.reserved.insert(
                *slot,
                Reservation {
                    id,
                    owner: owner.to_string(),
                },
            );
        }
        tracing::debug!(node = %self.node, owner, ?slots, "slots reserved");
        Ok(id)
    }

    /// Release every slot held by a reservation; returns the freed slots
    pub fn release(&mut self, id: ReservationId) -> Vec<SlotIndex> {
        let freed: Vec<SlotIndex> = self
            .reserved
            .iter()
            .filter(|(_, r)| r.id == id)
            .map(|(slot, _)| *slot)
            .collect();
        for slot in &freed {
            self.reserved.remove(slot);
        }
        freed
    }

    #[inline]
    pub fn is_reserved(&self, slot: SlotIndex) -> bool {
        self.reserved.contains_key(&slot)
    }

    pub fn owner_of(&self, slot: SlotIndex) -> Option<&str> {
        self.reserved.get(&slot).map(|r| r.owner.as_str())
    }

    /// Reserved slots in ascending order
    pub fn reserved_slots(&self) -> Vec<SlotIndex> {
        self.reserved.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slots(indices: &[usize]) -> Vec<SlotIndex> {
        indices.iter().map(|i| SlotIndex::new(*i)).collect()
    }

    #[test]
    fn test_reserve_and_conflict() {
        let mut registry = MemorySlotRegistry::new(NodeId::new(1), 4);
        registry.reserve(&slots(&[0, 1]), "relay").unwrap();

        let err = registry.reserve(&slots(&[1]), "other").unwrap_err();
        assert_eq!(
            err,
            QrelayError::SlotConflict {
                node: NodeId::new(1),
                slot: SlotIndex::new(1),
                owner: "relay".into(),
            }
        );
        assert!(registry.reserve(&slots(&[2]), "other").is_ok());
    }

    #[test]
    fn test_conflict_reserves_nothing() {
        let mut registry = MemorySlotRegistry::new(NodeId::new(1), 4);
        registry.reserve(&slots(&[3]), "first").unwrap();
        assert!(registry.reserve(&slots(&[2, 3]), "second").is_err());
        assert!(!registry.is_reserved(SlotIndex::new(2)));
    }

    #[test]
    fn test_duplicate_in_request() {
        let mut registry = MemorySlotRegistry::new(NodeId::new(0), 2);
        assert!(matches!(
            registry.reserve(&slots(&[0, 0]), "dup"),
            Err(QrelayError::SlotConflict { .. })
        ));
    }

    #[test]
    fn test_out_of_range() {
        let mut registry = MemorySlotRegistry::new(NodeId::new(0), 2);
        assert!(matches!(
            registry.reserve(&slots(&[2]), "far"),
            Err(QrelayError::SlotOutOfRange { capacity: 2, .. })
        ));
    }

    #[test]
    fn test_release() {
        let mut registry = MemorySlotRegistry::new(NodeId::new(0), 4);
        let id = registry.reserve(&slots(&[0, 2]), "a").unwrap();
        let other = registry.reserve(&slots(&[1]), "b").unwrap();
        assert_eq!(registry.release(id), slots(&[0, 2]));
        assert_eq!(registry.reserved_slots(), slots(&[1]));
        assert_eq!(registry.owner_of(SlotIndex::new(1)), Some("b"));
        assert_eq!(registry.release(other).len(), 1);
        assert!(registry.reserved_slots().is_empty());
    }

    proptest! {
        #[test]
        fn second_reservation_of_same_slot_conflicts(capacity in 1usize..16, pick in 0usize..16, other in 0usize..16) {
            let slot = SlotIndex::new(pick % capacity);
            let distinct = SlotIndex::new(other % capacity);
            let mut registry = MemorySlotRegistry::new(NodeId::new(9), capacity);
            registry.reserve(&[slot], "first").unwrap();

            let again = registry.reserve(&[slot], "second");
            prop_assert!(
                matches!(again, Err(QrelayError::SlotConflict { .. })),
                "expected a slot conflict"
            );
            if distinct != slot {
                prop_assert!(registry.reserve(&[distinct], "second").is_ok());
            }
        }
    }
}
