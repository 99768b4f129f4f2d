use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use common::{BasicType, ObjectRef, TypeId, Value};
use tracing::trace;

use crate::failure::Failure;

/// Object and array layout inside the heap.
///
/// ```text
///  0  mark word (8 bytes): lock state, prototype pattern 0b001 when unlocked
///  8  type id (4 bytes)
/// 12  array length (4 bytes, arrays only)
/// 16  fields or array elements
/// ```
pub mod layout {
    use common::BasicType;

    pub const MARK_OFFSET: u32 = 0;
    pub const KLASS_OFFSET: u32 = 8;
    pub const ARRAY_LENGTH_OFFSET: u32 = 12;
    pub const HEADER_SIZE: u32 = 16;
    pub const ARRAY_BASE_OFFSET: u32 = 16;
    pub const OBJECT_ALIGNMENT: u32 = 8;

    pub const LOCK_MASK: u64 = 0b011;
    pub const UNLOCKED_VALUE: u64 = 0b001;
    pub const LOCKED_VALUE: u64 = 0b000;

    pub fn align_object_size(size: u32) -> Option<u32> {
        Some(size.checked_add(OBJECT_ALIGNMENT - 1)? & !(OBJECT_ALIGNMENT - 1))
    }

    /// Bytes taken by an array of `length` elements, `None` when it can not be addressed
    pub fn array_size(element: BasicType, length: u32) -> Option<u32> {
        let body = element.size().checked_mul(length)?;
        align_object_size(ARRAY_BASE_OFFSET.checked_add(body)?)
    }

    pub fn element_offset(element: BasicType, index: u32) -> u32 {
        ARRAY_BASE_OFFSET + element.size() * index
    }
}

/// A contiguous, byte addressed heap shared by every interpreter thread.
///
/// Memory is kept in 64-bit atomic words so that racing field accesses are
/// well defined; sub-word stores update their word with a compare-and-swap.
/// Address `0` is never handed out and stands for null. Nothing is ever freed.
#[derive(Debug)]
pub struct Heap {
    memory: Box<[AtomicU64]>,
    top: AtomicU32,
    end: u32,
}

impl Heap {
    /// Sizes above [`MAX_HEAP_SIZE`](crate::config::MAX_HEAP_SIZE) are
    /// rejected by the configuration, the end is clamped for anything else.
    pub fn new(size: u32) -> Self {
        let words = size.div_ceil(8) as usize;
        Self {
            memory: (0..words).map(|_| AtomicU64::new(0)).collect(),
            top: AtomicU32::new(layout::OBJECT_ALIGNMENT),
            end: u32::try_from(words * 8).unwrap_or(u32::MAX),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.end
    }

    pub fn used(&self) -> u32 {
        self.top.load(Ordering::Relaxed)
    }

    /// Bump allocation in the shared space; contended bumps are retried.
    pub fn allocate(&self, size: u32) -> Option<u32> {
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let new_top = top.checked_add(size)?;
            if new_top > self.end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(top, new_top, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    trace!("allocated {size} bytes at {top:#x}");
                    return Some(top);
                }
                Err(current) => top = current,
            }
        }
    }

    fn word(&self, address: u32, size: u32) -> Result<(&AtomicU64, u32), Failure> {
        if address % size != 0 {
            return Err(Failure::Fatal(format!(
                "misaligned {size} byte access at {address:#x}"
            )));
        }
        let word = self
            .memory
            .get((address / 8) as usize)
            .ok_or_else(|| Failure::Fatal(format!("heap access outside of heap at {address:#x}")))?;
        Ok((word, (address % 8) * 8))
    }

    fn load_bits(&self, address: u32, size: u32) -> Result<u64, Failure> {
        let (word, shift) = self.word(address, size)?;
        let value = word.load(Ordering::Relaxed) >> shift;
        Ok(if size == 8 {
            value
        } else {
            value & ((1u64 << (size * 8)) - 1)
        })
    }

    fn store_bits(&self, address: u32, size: u32, bits: u64) -> Result<(), Failure> {
        let (word, shift) = self.word(address, size)?;
        if size == 8 {
            word.store(bits, Ordering::Relaxed);
            return Ok(());
        }

        let mask = ((1u64 << (size * 8)) - 1) << shift;
        let bits = (bits << shift) & mask;
        let _ = word.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some((current & !mask) | bits)
        });
        Ok(())
    }

    pub fn load_u8(&self, address: u32) -> Result<u8, Failure> {
        Ok(self.load_bits(address, 1)? as u8)
    }

    pub fn load_u16(&self, address: u32) -> Result<u16, Failure> {
        Ok(self.load_bits(address, 2)? as u16)
    }

    pub fn load_u32(&self, address: u32) -> Result<u32, Failure> {
        Ok(self.load_bits(address, 4)? as u32)
    }

    pub fn load_u64(&self, address: u32) -> Result<u64, Failure> {
        self.load_bits(address, 8)
    }

    pub fn store_u8(&self, address: u32, value: u8) -> Result<(), Failure> {
        self.store_bits(address, 1, value as u64)
    }

    pub fn store_u16(&self, address: u32, value: u16) -> Result<(), Failure> {
        self.store_bits(address, 2, value as u64)
    }

    pub fn store_u32(&self, address: u32, value: u32) -> Result<(), Failure> {
        self.store_bits(address, 4, value as u64)
    }

    pub fn store_u64(&self, address: u32, value: u64) -> Result<(), Failure> {
        self.store_bits(address, 8, value)
    }

    /// Loads a field or element, sub-int kinds are widened the way the bytecodes expect
    pub fn load(&self, address: u32, kind: BasicType) -> Result<Value, Failure> {
        Ok(match kind {
            BasicType::Boolean => Value::Int(self.load_u8(address)? as i32),
            BasicType::Byte => Value::Int(self.load_u8(address)? as i8 as i32),
            BasicType::Char => Value::Int(self.load_u16(address)? as i32),
            BasicType::Short => Value::Int(self.load_u16(address)? as i16 as i32),
            BasicType::Int => Value::Int(self.load_u32(address)? as i32),
            BasicType::Float => Value::Float(f32::from_bits(self.load_u32(address)?)),
            BasicType::Long => Value::Long(self.load_u64(address)? as i64),
            BasicType::Double => Value::Double(f64::from_bits(self.load_u64(address)?)),
            BasicType::Object | BasicType::Array => {
                Value::Reference(ObjectRef::from(self.load_u32(address)?))
            }
            BasicType::Void => return Err(Failure::Fatal("load of a void value".to_string())),
        })
    }

    /// Stores a field or element, sub-int kinds are truncated
    pub fn store(&self, address: u32, kind: BasicType, value: Value) -> Result<(), Failure> {
        match (kind, value) {
            (BasicType::Boolean | BasicType::Byte, Value::Int(v)) => self.store_u8(address, v as u8),
            (BasicType::Char | BasicType::Short, Value::Int(v)) => {
                self.store_u16(address, v as u16)
            }
            (BasicType::Int, Value::Int(v)) => self.store_u32(address, v as u32),
            (BasicType::Float, Value::Float(v)) => self.store_u32(address, v.to_bits()),
            (BasicType::Long, Value::Long(v)) => self.store_u64(address, v as u64),
            (BasicType::Double, Value::Double(v)) => self.store_u64(address, v.to_bits()),
            (BasicType::Object | BasicType::Array, Value::Reference(v)) => {
                self.store_u32(address, v.address())
            }
            (kind, value) => Err(Failure::Fatal(format!(
                "can not store {value:?} into a {kind:?} slot"
            ))),
        }
    }

    /// Clears `[from, to)`, both ends 8-byte aligned
    pub fn zero(&self, from: u32, to: u32) -> Result<(), Failure> {
        let mut address = from;
        while address < to {
            self.store_u64(address, 0)?;
            address += 8;
        }
        Ok(())
    }

    pub fn mark(&self, obj: ObjectRef) -> Result<u64, Failure> {
        self.load_u64(obj.address() + layout::MARK_OFFSET)
    }

    pub fn set_mark(&self, obj: ObjectRef, mark: u64) -> Result<(), Failure> {
        self.store_u64(obj.address() + layout::MARK_OFFSET, mark)
    }

    pub fn klass(&self, obj: ObjectRef) -> Result<TypeId, Failure> {
        if obj.is_null() {
            return Err(Failure::NullReference);
        }
        Ok(TypeId::from(self.load_u32(obj.address() + layout::KLASS_OFFSET)?))
    }

    pub fn set_klass(&self, obj: ObjectRef, klass: TypeId) -> Result<(), Failure> {
        self.store_u32(obj.address() + layout::KLASS_OFFSET, klass.index() as u32)
    }

    pub fn array_length(&self, array: ObjectRef) -> Result<i32, Failure> {
        if array.is_null() {
            return Err(Failure::NullReference);
        }
        Ok(self.load_u32(array.address() + layout::ARRAY_LENGTH_OFFSET)? as i32)
    }

    pub fn set_array_length(&self, array: ObjectRef, length: i32) -> Result<(), Failure> {
        self.store_u32(array.address() + layout::ARRAY_LENGTH_OFFSET, length as u32)
    }
}

/// A thread-local allocation buffer carved out of the shared heap
#[derive(Debug, Default, Clone, Copy)]
pub struct Tlab {
    top: u32,
    end: u32,
}

impl Tlab {
    pub fn allocate(&mut self, size: u32) -> Option<u32> {
        if self.end - self.top < size {
            return None;
        }
        let address = self.top;
        self.top += size;
        Some(address)
    }

    pub fn refill(&mut self, start: u32, end: u32) {
        trace!("new tlab [{start:#x}, {end:#x})");
        self.top = start;
        self.end = end;
    }

    pub fn free(&self) -> u32 {
        self.end - self.top
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn allocation_never_returns_null() {
        let heap = Heap::new(64);
        assert_eq!(heap.allocate(16), Some(8));
        assert_eq!(heap.allocate(32), Some(24));
        assert_eq!(heap.allocate(16), None);
        assert_eq!(heap.allocate(8), Some(56));
        assert_eq!(heap.used(), 64);
    }

    #[test]
    fn concurrent_allocation() {
        let heap = Arc::new(Heap::new(64 * 1024));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let heap = heap.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| heap.allocate(16).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut addresses: Vec<u32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 400);
    }

    #[test]
    fn sub_word_stores_keep_neighbours() {
        let heap = Heap::new(64);
        heap.store_u32(16, 0xdead_beef).unwrap();
        heap.store_u8(20, 0x7f).unwrap();
        heap.store_u16(22, 0xffff).unwrap();
        assert_eq!(heap.load_u32(16).unwrap(), 0xdead_beef);
        assert_eq!(heap.load_u64(16).unwrap(), 0xffff_007f_dead_beef);
    }

    #[test]
    fn sub_int_loads_extend() {
        let heap = Heap::new(64);
        heap.store(16, BasicType::Byte, Value::Int(-2)).unwrap();
        heap.store(18, BasicType::Char, Value::Int(0xffff)).unwrap();
        heap.store(20, BasicType::Short, Value::Int(-3)).unwrap();
        assert_eq!(heap.load(16, BasicType::Byte).unwrap(), Value::Int(-2));
        assert_eq!(heap.load(16, BasicType::Boolean).unwrap(), Value::Int(0xfe));
        assert_eq!(heap.load(18, BasicType::Char).unwrap(), Value::Int(0xffff));
        assert_eq!(heap.load(20, BasicType::Short).unwrap(), Value::Int(-3));
    }

    #[test]
    fn misaligned_and_mismatched_access() {
        let heap = Heap::new(64);
        assert!(matches!(heap.load_u32(18), Err(Failure::Fatal(_))));
        assert!(matches!(heap.load_u64(64), Err(Failure::Fatal(_))));
        assert!(matches!(
            heap.store(16, BasicType::Int, Value::Long(1)),
            Err(Failure::Fatal(_))
        ));
    }

    #[test]
    fn wide_values() {
        let heap = Heap::new(64);
        heap.store(16, BasicType::Double, Value::Double(2.5)).unwrap();
        heap.store(24, BasicType::Long, Value::Long(i64::MIN)).unwrap();
        assert_eq!(heap.load(16, BasicType::Double).unwrap(), Value::Double(2.5));
        assert_eq!(heap.load(24, BasicType::Long).unwrap(), Value::Long(i64::MIN));
        heap.zero(16, 32).unwrap();
        assert_eq!(heap.load(24, BasicType::Long).unwrap(), Value::Long(0));
    }

    #[test]
    fn header() {
        let heap = Heap::new(64);
        let obj = ObjectRef::from(heap.allocate(24).unwrap());
        heap.set_mark(obj, layout::UNLOCKED_VALUE).unwrap();
        heap.set_klass(obj, TypeId::from(3)).unwrap();
        heap.set_array_length(obj, 2).unwrap();
        assert_eq!(heap.mark(obj).unwrap(), layout::UNLOCKED_VALUE);
        assert_eq!(heap.klass(obj).unwrap(), TypeId::from(3));
        assert_eq!(heap.array_length(obj).unwrap(), 2);
        assert_eq!(heap.klass(ObjectRef::NULL), Err(Failure::NullReference));
    }

    #[test]
    fn array_sizes() {
        assert_eq!(layout::array_size(BasicType::Byte, 0), Some(16));
        assert_eq!(layout::array_size(BasicType::Byte, 3), Some(24));
        assert_eq!(layout::array_size(BasicType::Long, 2), Some(32));
        assert_eq!(layout::array_size(BasicType::Long, u32::MAX), None);
    }

    #[test]
    fn tlab_bump() {
        let mut tlab = Tlab::default();
        assert_eq!(tlab.allocate(8), None);
        tlab.refill(64, 96);
        assert_eq!(tlab.allocate(16), Some(64));
        assert_eq!(tlab.allocate(24), None);
        assert_eq!(tlab.free(), 16);
    }
}
