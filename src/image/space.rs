use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::AddressError;
use crate::types::AddressRange;

/// Sparse, thread-safe map from 16-bit addresses to objects of one kind.
///
/// Structural mutations (add, insert, remove, update) become no-ops while
/// the owning image is locked. Reads are never gated.
pub struct AddressSpace<T: Clone + PartialEq> {
    items: Mutex<BTreeMap<u16, T>>,
    locked: Arc<AtomicBool>,
}

impl<T: Clone + PartialEq> AddressSpace<T> {
    pub(crate) fn new(locked: Arc<AtomicBool>) -> Self {
        AddressSpace {
            items: Mutex::new(BTreeMap::new()),
            locked,
        }
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, BTreeMap<u16, T>> {
        match self.items.lock() {
            Ok(guard) => guard,
            // a panic while holding the mutex cannot leave the map
            // half-mutated, every operation is a single BTreeMap call
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Place an object at the next address past the current highest one.
    /// Does nothing when the image is locked or the address space is full.
    pub fn append(&self, item: T) {
        if self.is_locked() {
            return;
        }
        let mut items = self.guard();
        let next = match items.keys().next_back() {
            Some(&highest) => {
                if highest == u16::MAX {
                    tracing::warn!("address space is full, dropping appended object");
                    return;
                }
                highest + 1
            }
            None => 0,
        };
        items.insert(next, item);
    }

    /// Place an object at a specific address, replacing any previous occupant.
    /// Does nothing when the image is locked.
    pub fn insert(&self, address: u16, item: T) {
        if self.is_locked() {
            return;
        }
        self.guard().insert(address, item);
    }

    /// Remove the first object equal to `item`, returning whether one was removed
    pub fn remove(&self, item: &T) -> bool {
        if self.is_locked() {
            return false;
        }
        let mut items = self.guard();
        let address = items
            .iter()
            .find(|(_, value)| *value == item)
            .map(|(address, _)| *address);
        match address {
            Some(address) => items.remove(&address).is_some(),
            None => false,
        }
    }

    /// Replace the object at an occupied address. The address must already
    /// be occupied even when the image is locked, but the write itself is
    /// skipped while locked.
    pub fn update(&self, address: u16, item: T) -> Result<(), AddressError> {
        let mut items = self.guard();
        if !items.contains_key(&address) {
            return Err(AddressError::Unoccupied(address));
        }
        if self.is_locked() {
            return Ok(());
        }
        items.insert(address, item);
        Ok(())
    }

    /// Replace the objects across a contiguous range under one lock
    /// acquisition. Every address must be occupied, otherwise nothing is
    /// written. Like [`update`](Self::update), the occupancy check runs
    /// even while the image is locked but the writes are skipped.
    pub fn update_range(&self, range: AddressRange, values: &[T]) -> Result<(), AddressError> {
        let mut items = self.guard();
        for address in range.iter() {
            if !items.contains_key(&address) {
                return Err(AddressError::Unoccupied(address));
            }
        }
        if self.is_locked() {
            return Ok(());
        }
        for (address, value) in range.iter().zip(values.iter()) {
            items.insert(address, value.clone());
        }
        Ok(())
    }

    pub fn get(&self, address: u16) -> Result<T, AddressError> {
        self.guard()
            .get(&address)
            .cloned()
            .ok_or(AddressError::Unoccupied(address))
    }

    /// Snapshot of a contiguous range. The range must lie below the
    /// current bound and every address in it must be occupied.
    pub fn get_range(&self, range: AddressRange) -> Result<Vec<T>, AddressError> {
        let items = self.guard();
        let bound = Self::bound(&items);
        let end = range.start as usize + range.count as usize;
        if end > bound {
            return Err(AddressError::RangeOutOfBounds(
                range.start,
                range.count,
                bound,
            ));
        }
        range
            .iter()
            .map(|address| {
                items
                    .get(&address)
                    .cloned()
                    .ok_or(AddressError::Unoccupied(address))
            })
            .collect()
    }

    /// One past the highest occupied address, or zero when empty
    pub fn count(&self) -> usize {
        Self::bound(&self.guard())
    }

    fn bound(items: &BTreeMap<u16, T>) -> usize {
        match items.keys().next_back() {
            Some(&highest) => highest as usize + 1,
            None => 0,
        }
    }

    /// Snapshot of all occupied entries in ascending address order
    pub fn entries(&self) -> Vec<(u16, T)> {
        self.guard()
            .iter()
            .map(|(address, item)| (*address, item.clone()))
            .collect()
    }

    /// First object matching the predicate, scanning in address order
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.guard()
            .values()
            .find(|item| predicate(item))
            .cloned()
    }

    /// Mutate the first object matching the predicate in place. This
    /// changes object state rather than the shape of the space, so it is
    /// not gated by the image lock.
    pub(crate) fn modify_first<R>(
        &self,
        predicate: impl Fn(&T) -> bool,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut items = self.guard();
        items.values_mut().find(|item| predicate(item)).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> AddressSpace<u16> {
        AddressSpace::new(Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn append_assigns_consecutive_addresses() {
        let space = space();
        space.append(10);
        space.append(20);
        assert_eq!(space.get(0), Ok(10));
        assert_eq!(space.get(1), Ok(20));
        assert_eq!(space.count(), 2);
    }

    #[test]
    fn append_continues_past_highest_inserted_address() {
        let space = space();
        space.insert(100, 7);
        space.append(8);
        assert_eq!(space.get(101), Ok(8));
        assert_eq!(space.count(), 102);
    }

    #[test]
    fn append_at_top_of_address_space_is_a_no_op() {
        let space = space();
        space.insert(u16::MAX, 1);
        space.append(2);
        assert_eq!(space.count(), 65536);
        assert_eq!(space.entries().len(), 1);
    }

    #[test]
    fn get_range_rejects_holes_and_out_of_bounds() {
        let space = space();
        space.insert(0, 1);
        space.insert(2, 3);

        let range = AddressRange::try_from(0, 3).unwrap();
        assert_eq!(space.get_range(range), Err(AddressError::Unoccupied(1)));

        let range = AddressRange::try_from(2, 2).unwrap();
        assert_eq!(
            space.get_range(range),
            Err(AddressError::RangeOutOfBounds(2, 2, 3))
        );
    }

    #[test]
    fn update_requires_an_occupied_address() {
        let space = space();
        assert_eq!(space.update(4, 1), Err(AddressError::Unoccupied(4)));
        space.insert(4, 1);
        assert_eq!(space.update(4, 2), Ok(()));
        assert_eq!(space.get(4), Ok(2));
    }

    #[test]
    fn update_range_is_all_or_nothing() {
        let space = space();
        space.insert(0, 1);
        space.insert(1, 2);

        let range = AddressRange::try_from(0, 3).unwrap();
        assert_eq!(
            space.update_range(range, &[9, 9, 9]),
            Err(AddressError::Unoccupied(2))
        );
        assert_eq!(space.get(0), Ok(1));
        assert_eq!(space.get(1), Ok(2));

        let range = AddressRange::try_from(0, 2).unwrap();
        assert_eq!(space.update_range(range, &[9, 8]), Ok(()));
        assert_eq!(space.get(0), Ok(9));
        assert_eq!(space.get(1), Ok(8));
    }

    #[test]
    fn remove_drops_first_equal_object() {
        let space = space();
        space.append(5);
        space.append(5);
        assert!(space.remove(&5));
        assert_eq!(space.get(0), Err(AddressError::Unoccupied(0)));
        assert_eq!(space.get(1), Ok(5));
        assert!(!space.remove(&42));
    }

    #[test]
    fn locked_space_ignores_structural_mutations() {
        let locked = Arc::new(AtomicBool::new(false));
        let space: AddressSpace<u16> = AddressSpace::new(locked.clone());
        space.append(1);

        locked.store(true, Ordering::SeqCst);
        space.append(2);
        space.insert(10, 3);
        assert!(!space.remove(&1));
        assert_eq!(space.update(0, 9), Ok(()));

        assert_eq!(space.count(), 1);
        assert_eq!(space.get(0), Ok(1));

        locked.store(false, Ordering::SeqCst);
        space.append(2);
        assert_eq!(space.count(), 2);
    }
}
