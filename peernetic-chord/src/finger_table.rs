//! The Chord finger table.
//!
//! Beyond the textbook structure, this implementation keeps two extra
//! guarantees after every mutation:
//!
//! 1. Entries pointing at the base (self) form a contiguous tail. A fresh
//!    table for base 0 is `[0, 0, 0, 0, 0, 0]`; inserting id 8 yields
//!    `[8, 8, 8, 8, 0, 0]`.
//! 2. An inserted finger propagates backwards over neighbours that still
//!    point at base or at something farther around the ring, stopping at
//!    the first closer neighbour. Inserting 16, 2, 8, 4 into the base-0
//!    table steps through `[16,16,16,16,16,0]`, `[2,2,16,16,16,0]`,
//!    `[2,2,8,8,16,0]`, `[2,2,4,8,16,0]`.
//!
//! Removal propagates the slot after the removed finger backwards over the
//! removed id, so the same invariants hold on the way down.

use std::cmp::Ordering;

use tracing::debug;

use crate::id::{ChordError, NodeId};
use crate::pointer::{ExternalPointer, Pointer};

struct Entry {
    expected_id: NodeId,
    pointer: Pointer,
}

/// Routing table of `bit_count` fingers for one ring participant.
pub struct FingerTable {
    base: NodeId,
    entries: Vec<Entry>,
}

impl FingerTable {
    /// A table for the node `base`, with every finger initialized to base.
    pub fn new(base: NodeId) -> Self {
        let bit_count = base.bit_count();
        let entries = (0..bit_count)
            .map(|i| {
                let offset = NodeId::new(1u64 << i, bit_count)
                    .expect("2^i fits in the ring for i < bit_count");
                let expected_id = base.add(&offset).expect("offset shares the base ring");
                Entry {
                    expected_id,
                    pointer: Pointer::Internal(base),
                }
            })
            .collect();
        FingerTable { base, entries }
    }

    /// The base (self) id.
    pub fn base_id(&self) -> &NodeId {
        &self.base
    }

    /// Number of fingers (the ring's bit count).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; a table has one finger per ring bit.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_external(&self, id: &NodeId) -> Result<(), ChordError> {
        if id.bit_count() != self.base.bit_count() {
            return Err(ChordError::BitCountMismatch(
                self.base.bit_count(),
                id.bit_count(),
            ));
        }
        if id == &self.base {
            return Err(ChordError::BaseIdNotAllowed);
        }
        Ok(())
    }

    /// Index of the finger whose expected id is the nearest at or before
    /// `id` in ring order, scanning from the bottom. `None` when `id`
    /// precedes every expected id.
    fn replace_position(&self, id: &NodeId) -> Result<Option<usize>, ChordError> {
        let mut position = None;
        for (i, entry) in self.entries.iter().enumerate() {
            match NodeId::compare_position(&self.base, &entry.expected_id, id)? {
                Ordering::Less => position = Some(i),
                Ordering::Equal => {
                    position = Some(i);
                    break;
                }
                Ordering::Greater => break,
            }
        }
        Ok(position)
    }

    /// Put `ptr` into its slot, overwriting whatever is there and
    /// propagating backwards over base entries and entries that point
    /// farther around the ring.
    pub fn put(&mut self, ptr: ExternalPointer) -> Result<(), ChordError> {
        let id = *ptr.id();
        self.check_external(&id)?;

        let Some(position) = self.replace_position(&id)? else {
            return Ok(());
        };
        self.entries[position].pointer = Pointer::External(ptr.clone());

        for i in (0..position).rev() {
            let prior_id = *self.entries[i].pointer.id();
            let farther =
                NodeId::compare_position(&self.base, &prior_id, &id)? == Ordering::Greater;
            if farther || prior_id == self.base {
                self.entries[i].pointer = Pointer::External(ptr.clone());
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Like [`put`](Self::put), but only writes if `ptr` is at or before
    /// the slot's current finger in ring order (or the slot still points at
    /// base). Propagates backwards over entries equal to the replaced id.
    /// Returns whether anything was written.
    pub fn replace(&mut self, ptr: ExternalPointer) -> Result<bool, ChordError> {
        let id = *ptr.id();
        self.check_external(&id)?;

        let Some(position) = self.replace_position(&id)? else {
            return Ok(false);
        };
        let current_id = *self.entries[position].pointer.id();
        let closer = NodeId::compare_position(&self.base, &id, &current_id)? == Ordering::Less;
        if !closer && current_id != self.base {
            return Ok(false);
        }

        self.entries[position].pointer = Pointer::External(ptr.clone());
        for i in (0..position).rev() {
            if self.entries[i].pointer.id() == &current_id {
                self.entries[i].pointer = Pointer::External(ptr.clone());
            } else {
                break;
            }
        }
        Ok(true)
    }

    /// Remove `ptr` (matched by id and link) from the table, if present.
    pub fn remove(&mut self, ptr: &ExternalPointer) -> Result<(), ChordError> {
        self.check_external(ptr.id())?;

        for i in (0..self.entries.len()).rev() {
            let Some(external) = self.entries[i].pointer.as_external() else {
                continue;
            };
            if external == ptr {
                self.remove_at(i);
                return Ok(());
            }
        }
        debug!(pointer = %ptr, "pointer not present in finger table");
        Ok(())
    }

    fn remove_at(&mut self, index: usize) {
        let old_id = *self.entries[index].pointer.id();
        if old_id == self.base {
            return;
        }
        let next_pointer = if index < self.entries.len() - 1 {
            self.entries[index + 1].pointer.clone()
        } else {
            Pointer::Internal(self.base)
        };
        for i in (0..=index).rev() {
            if self.entries[i].pointer.id() == &old_id {
                self.entries[i].pointer = next_pointer.clone();
            } else {
                break;
            }
        }
    }

    /// Remove every finger strictly before `id` in ring order, replacing
    /// the cleared slots with the first surviving finger (or base). Returns
    /// the number of fingers cleared.
    pub fn clear_before(&mut self, id: &NodeId) -> Result<usize, ChordError> {
        self.check_external(id)?;

        for i in (0..self.entries.len()).rev() {
            // Trailing base entries have ring distance zero and are not
            // real fingers; clearing them would wipe the whole table.
            if self.entries[i].pointer.is_internal() {
                continue;
            }
            let test_id = self.entries[i].pointer.id();
            if NodeId::compare_position(&self.base, id, test_id)? == Ordering::Greater {
                self.clear_through(i);
                return Ok(i + 1);
            }
        }
        Ok(0)
    }

    fn clear_through(&mut self, index: usize) {
        let next_pointer = if index < self.entries.len() - 1 {
            self.entries[index + 1].pointer.clone()
        } else {
            Pointer::Internal(self.base)
        };
        for i in (0..=index).rev() {
            self.entries[i].pointer = next_pointer.clone();
        }
    }

    /// Reset every finger to base.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.pointer = Pointer::Internal(self.base);
        }
    }

    /// The finger closest to `id` while strictly preceding it on the ring
    /// rooted at base, ignoring fingers whose ids appear in `ignore`.
    /// Falls back to base when nothing qualifies; for `id == base`, returns
    /// the maximum non-base finger (or base for an empty table).
    pub fn find_closest_preceding(
        &self,
        id: &NodeId,
        ignore: &[NodeId],
    ) -> Result<Pointer, ChordError> {
        if id.bit_count() != self.base.bit_count() {
            return Err(ChordError::BitCountMismatch(
                self.base.bit_count(),
                id.bit_count(),
            ));
        }

        if id == &self.base {
            return Ok(self
                .maximum_non_base()
                .cloned()
                .map(Pointer::External)
                .unwrap_or(Pointer::Internal(self.base)));
        }

        for entry in self.entries.iter().rev() {
            let finger_id = entry.pointer.id();
            if ignore.contains(finger_id) {
                continue;
            }
            if finger_id.is_within(&self.base, false, id, false)? {
                return Ok(entry.pointer.clone());
            }
        }
        Ok(Pointer::Internal(self.base))
    }

    /// The highest finger not pointing at base, if any.
    pub fn maximum_non_base(&self) -> Option<&ExternalPointer> {
        self.entries
            .iter()
            .rev()
            .find_map(|entry| entry.pointer.as_external())
    }

    /// Finger at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> &Pointer {
        &self.entries[index].pointer
    }

    /// Expected id for the finger at `index` (`base + 2^index`).
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn expected_id(&self, index: usize) -> &NodeId {
        &self.entries[index].expected_id
    }

    /// Id of the node that should carry us at its finger `index`
    /// (`base - 2^index`).
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn router_id(&self, index: usize) -> NodeId {
        assert!(index < self.entries.len(), "finger index out of range");
        let offset = NodeId::new(1u64 << index, self.base.bit_count())
            .expect("2^index fits in the ring for index < bit_count");
        self.base
            .subtract(&offset)
            .expect("offset shares the base ring")
    }

    /// Index of the left-most finger equal to `ptr`, if present.
    pub fn min_index_of(&self, ptr: &Pointer) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.pointer == ptr)
    }

    /// Snapshot of all fingers, low index first.
    pub fn dump(&self) -> Vec<Pointer> {
        self.entries
            .iter()
            .map(|entry| entry.pointer.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> NodeId {
        NodeId::new(value, 6).unwrap()
    }

    fn ptr(value: u64) -> ExternalPointer {
        ExternalPointer::new(id(value), format!("node{value}"))
    }

    fn ids(table: &FingerTable) -> Vec<u64> {
        table.dump().iter().map(|p| p.id().value()).collect()
    }

    #[test]
    fn fresh_table_points_everywhere_at_base() {
        let table = FingerTable::new(id(0));
        assert_eq!(ids(&table), [0, 0, 0, 0, 0, 0]);
        assert_eq!(table.len(), 6);
        for (i, expected) in [1u64, 2, 4, 8, 16, 32].iter().enumerate() {
            assert_eq!(table.expected_id(i).value(), *expected);
        }
    }

    #[test]
    fn put_sequence_matches_the_reference_construction() {
        let mut table = FingerTable::new(id(0));

        table.put(ptr(16)).unwrap();
        assert_eq!(ids(&table), [16, 16, 16, 16, 16, 0]);

        table.put(ptr(2)).unwrap();
        assert_eq!(ids(&table), [2, 2, 16, 16, 16, 0]);

        table.put(ptr(8)).unwrap();
        assert_eq!(ids(&table), [2, 2, 8, 8, 16, 0]);

        table.put(ptr(4)).unwrap();
        assert_eq!(ids(&table), [2, 2, 4, 8, 16, 0]);
    }

    #[test]
    fn remove_propagates_the_next_finger_backwards() {
        let mut table = FingerTable::new(id(0));
        for value in [16, 2, 8] {
            table.put(ptr(value)).unwrap();
        }
        assert_eq!(ids(&table), [2, 2, 8, 8, 16, 0]);

        table.remove(&ptr(8)).unwrap();
        assert_eq!(ids(&table), [2, 2, 16, 16, 16, 0]);

        table.remove(&ptr(16)).unwrap();
        assert_eq!(ids(&table), [2, 2, 0, 0, 0, 0]);

        table.remove(&ptr(2)).unwrap();
        assert_eq!(ids(&table), [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn remove_matches_link_as_well_as_id() {
        let mut table = FingerTable::new(id(0));
        table.put(ptr(8)).unwrap();

        // Same id, different link: not the finger we hold.
        table
            .remove(&ExternalPointer::new(id(8), "imposter"))
            .unwrap();
        assert_eq!(ids(&table), [8, 8, 8, 8, 0, 0]);

        table.remove(&ptr(8)).unwrap();
        assert_eq!(ids(&table), [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn base_id_operations_are_rejected() {
        let mut table = FingerTable::new(id(0));
        assert!(matches!(
            table.put(ExternalPointer::new(id(0), "self")),
            Err(ChordError::BaseIdNotAllowed)
        ));
        assert!(matches!(
            table.clear_before(&id(0)),
            Err(ChordError::BaseIdNotAllowed)
        ));
        let other_ring = NodeId::new(1, 7).unwrap();
        assert!(matches!(
            table.put(ExternalPointer::new(other_ring, "x")),
            Err(ChordError::BitCountMismatch(6, 7))
        ));
    }

    #[test]
    fn replace_only_moves_fingers_closer() {
        let mut table = FingerTable::new(NodeId::new(0, 3).unwrap());
        let p = |v: u64| ExternalPointer::new(NodeId::new(v, 3).unwrap(), format!("node{v}"));

        table.put(p(6)).unwrap();
        table.put(p(1)).unwrap();
        let values: Vec<u64> = table.dump().iter().map(|x| x.id().value()).collect();
        assert_eq!(values, [1, 6, 6]);

        // 7 is farther than 6: no change.
        assert!(!table.replace(p(7)).unwrap());
        let values: Vec<u64> = table.dump().iter().map(|x| x.id().value()).collect();
        assert_eq!(values, [1, 6, 6]);

        // 5 is closer than 6: takes over 6's slots.
        assert!(table.replace(p(5)).unwrap());
        let values: Vec<u64> = table.dump().iter().map(|x| x.id().value()).collect();
        assert_eq!(values, [1, 5, 5]);
    }

    #[test]
    fn find_closest_preceding_scans_ring_order() {
        let mut table = FingerTable::new(id(0));
        for value in [16, 2, 8, 4] {
            table.put(ptr(value)).unwrap();
        }
        // [2, 2, 4, 8, 16, 0]
        assert_eq!(table.find_closest_preceding(&id(10), &[]).unwrap().id().value(), 8);
        assert_eq!(table.find_closest_preceding(&id(17), &[]).unwrap().id().value(), 16);
        assert_eq!(table.find_closest_preceding(&id(3), &[]).unwrap().id().value(), 2);

        // Ignored fingers are skipped.
        assert_eq!(
            table
                .find_closest_preceding(&id(10), &[id(8)])
                .unwrap()
                .id()
                .value(),
            4
        );

        // Nothing precedes 1: fall back to base.
        assert!(table.find_closest_preceding(&id(1), &[]).unwrap().is_internal());

        // Searching for base itself yields the maximum non-base finger.
        assert_eq!(table.find_closest_preceding(&id(0), &[]).unwrap().id().value(), 16);
    }

    #[test]
    fn monotonicity_after_put() {
        let mut table = FingerTable::new(id(0));
        table.put(ptr(16)).unwrap();
        assert_eq!(table.find_closest_preceding(&id(17), &[]).unwrap().id().value(), 16);

        table.put(ptr(8)).unwrap();
        assert_eq!(table.find_closest_preceding(&id(9), &[]).unwrap().id().value(), 8);
        // 16 still reachable past its own position.
        assert_eq!(table.find_closest_preceding(&id(20), &[]).unwrap().id().value(), 16);
    }

    #[test]
    fn clear_before_drops_the_leading_fingers() {
        let mut table = FingerTable::new(id(0));
        for value in [16, 2, 8, 4] {
            table.put(ptr(value)).unwrap();
        }
        // [2, 2, 4, 8, 16, 0]: fingers before 8 occupy indices 0..=2.
        let cleared = table.clear_before(&id(8)).unwrap();
        assert_eq!(cleared, 3);
        assert_eq!(ids(&table), [8, 8, 8, 8, 16, 0]);

        // Nothing precedes 1.
        assert_eq!(table.clear_before(&id(1)).unwrap(), 0);
    }

    #[test]
    fn maximum_non_base_and_min_index() {
        let mut table = FingerTable::new(id(0));
        assert!(table.maximum_non_base().is_none());

        table.put(ptr(8)).unwrap();
        table.put(ptr(2)).unwrap();
        assert_eq!(table.maximum_non_base().unwrap().id().value(), 8);
        assert_eq!(table.min_index_of(&Pointer::External(ptr(2))), Some(0));
        assert_eq!(table.min_index_of(&Pointer::External(ptr(8))), Some(2));
        assert_eq!(table.min_index_of(&Pointer::External(ptr(5))), None);

        table.clear();
        assert!(table.maximum_non_base().is_none());
        assert_eq!(ids(&table), [0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn router_ids_mirror_expected_ids() {
        // 16-node ring, base 8: positions 0..=3 expect 7, 6, 4, 0.
        let base = NodeId::new(8, 4).unwrap();
        let table = FingerTable::new(base);
        let routers: Vec<u64> = (0..4).map(|i| table.router_id(i).value()).collect();
        assert_eq!(routers, [7, 6, 4, 0]);
    }

    /// Internal (base) fingers always form a contiguous tail, whatever
    /// sequence of puts and removes the table sees.
    #[test]
    fn base_tail_stays_contiguous_under_random_churn() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(1234);
        let mut table = FingerTable::new(id(0));
        let mut live: Vec<u64> = Vec::new();

        for _ in 0..500 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let value = rng.gen_range(1..64);
                table.put(ptr(value)).unwrap();
                if !live.contains(&value) {
                    live.push(value);
                }
            } else {
                let index = rng.gen_range(0..live.len());
                let value = live.swap_remove(index);
                table.remove(&ptr(value)).unwrap();
            }

            let snapshot = table.dump();
            let first_internal = snapshot
                .iter()
                .position(Pointer::is_internal)
                .unwrap_or(snapshot.len());
            assert!(
                snapshot[first_internal..].iter().all(Pointer::is_internal),
                "non-contiguous base tail: {:?}",
                ids(&table)
            );
        }
    }
}
