use std::sync::atomic::{AtomicU8, Ordering};

use common::{BasicType, ObjectRef, Value};

use crate::failure::Failure;
use crate::heap::Heap;

/// Location of a reference slot: the containing object and the slot offset
#[derive(Debug, Clone, Copy)]
pub struct FieldAddress {
    pub base: ObjectRef,
    pub offset: u32,
}

impl FieldAddress {
    pub fn address(&self) -> u32 {
        self.base.address() + self.offset
    }
}

/// Collector hooks around reference stores.
///
/// The interpreter never writes a reference into the heap directly, every
/// reference store in a field or array element goes through
/// [`BarrierSet::store_reference`]. `precise` asks the barrier to record the
/// exact slot rather than just the containing object.
pub trait BarrierSet: Send + Sync {
    fn store_reference(
        &self,
        heap: &Heap,
        address: FieldAddress,
        value: ObjectRef,
        precise: bool,
    ) -> Result<(), Failure>;
}

#[derive(Debug, Default)]
pub struct NoBarrier;

impl BarrierSet for NoBarrier {
    fn store_reference(
        &self,
        heap: &Heap,
        address: FieldAddress,
        value: ObjectRef,
        _precise: bool,
    ) -> Result<(), Failure> {
        heap.store(address.address(), BasicType::Object, Value::Reference(value))
    }
}

pub const CARD_SHIFT: u32 = 9;
pub const DIRTY_CARD: u8 = 0;
pub const CLEAN_CARD: u8 = 0xff;

/// Post-write barrier of a generational collector: one byte per 512 heap
/// bytes, dirtied whenever a non-null reference is stored into the card.
#[derive(Debug)]
pub struct CardTableBarrier {
    cards: Box<[AtomicU8]>,
}

impl CardTableBarrier {
    pub fn new(heap_size: u32) -> Self {
        let count = (heap_size >> CARD_SHIFT) as usize + 1;
        Self {
            cards: (0..count).map(|_| AtomicU8::new(CLEAN_CARD)).collect(),
        }
    }

    pub fn is_dirty(&self, address: u32) -> bool {
        self.cards
            .get((address >> CARD_SHIFT) as usize)
            .is_some_and(|card| card.load(Ordering::Relaxed) == DIRTY_CARD)
    }

    pub fn dirty_cards(&self) -> usize {
        self.cards
            .iter()
            .filter(|card| card.load(Ordering::Relaxed) == DIRTY_CARD)
            .count()
    }

    pub fn clear(&self) {
        for card in self.cards.iter() {
            card.store(CLEAN_CARD, Ordering::Relaxed);
        }
    }
}

impl BarrierSet for CardTableBarrier {
    fn store_reference(
        &self,
        heap: &Heap,
        address: FieldAddress,
        value: ObjectRef,
        precise: bool,
    ) -> Result<(), Failure> {
        heap.store(address.address(), BasicType::Object, Value::Reference(value))?;
        if value.is_null() {
            return Ok(());
        }

        let marked = if precise {
            address.address()
        } else {
            address.base.address()
        };
        let card = self
            .cards
            .get((marked >> CARD_SHIFT) as usize)
            .ok_or_else(|| Failure::Fatal(format!("no card for {marked:#x}")))?;
        card.store(DIRTY_CARD, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_stores_leave_cards_clean() {
        let heap = Heap::new(4096);
        let barrier = CardTableBarrier::new(heap.capacity());
        let slot = FieldAddress {
            base: ObjectRef::from(1024),
            offset: 16,
        };
        barrier
            .store_reference(&heap, slot, ObjectRef::NULL, true)
            .unwrap();
        assert_eq!(barrier.dirty_cards(), 0);
    }

    #[test]
    fn precise_marks_the_slot() {
        let heap = Heap::new(4096);
        let barrier = CardTableBarrier::new(heap.capacity());
        // the object starts in card 1, the element lives in card 2
        let slot = FieldAddress {
            base: ObjectRef::from(1016),
            offset: 24,
        };
        barrier
            .store_reference(&heap, slot, ObjectRef::from(8), true)
            .unwrap();
        assert!(barrier.is_dirty(1040));
        assert!(!barrier.is_dirty(1016));
        assert_eq!(heap.load_u32(1040).unwrap(), 8);

        barrier.clear();
        barrier
            .store_reference(&heap, slot, ObjectRef::from(8), false)
            .unwrap();
        assert!(barrier.is_dirty(1016));
        assert_eq!(barrier.dirty_cards(), 1);
    }

    #[test]
    fn no_barrier_only_stores() {
        let heap = Heap::new(64);
        let slot = FieldAddress {
            base: ObjectRef::from(8),
            offset: 16,
        };
        NoBarrier
            .store_reference(&heap, slot, ObjectRef::from(40), false)
            .unwrap();
        assert_eq!(heap.load_u32(24).unwrap(), 40);
    }
}
