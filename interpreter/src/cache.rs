//! Constant pools and their resolution caches.
//!
//! Every constant pool index that names a field, method or call site owns a
//! [`CacheEntry`]. An entry is filled in exactly once by the runtime and then
//! published through its bytecode tags: a non-zero tag in slot 1 or 2 tells
//! the interpreter that the payload for that bytecode is complete.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use bytecode::Bytecode;
use common::{BasicType, ObjectRef, TosState, TypeId};

use crate::failure::Failure;
use crate::universe::Method;

#[derive(Debug, Clone, PartialEq)]
pub struct MemberRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Unused,
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    Field(MemberRef),
    Method(MemberRef),
    InterfaceMethod(MemberRef),
    /// A dynamic call site linked to the given static adapter method
    InvokeDynamic(MemberRef),
}

/// Which of the two bytecode tags of an entry a bytecode consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteNo {
    F1,
    F2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub holder: TypeId,
    pub offset: u32,
    /// Raw tos state tag of the field kind
    pub tos_bits: u8,
    pub is_static: bool,
    pub is_volatile: bool,
    pub is_final: bool,
}

impl ResolvedField {
    pub fn new(holder: TypeId, offset: u32, kind: BasicType) -> Self {
        Self {
            holder,
            offset,
            tos_bits: kind.tos_state() as u8,
            is_static: false,
            is_volatile: false,
            is_final: false,
        }
    }

    pub fn tos_state(&self) -> Result<TosState, Failure> {
        Ok(TosState::from_bits(self.tos_bits)?)
    }

    /// Storage kind of the field
    pub fn kind(&self) -> Result<BasicType, Failure> {
        Ok(match self.tos_state()? {
            TosState::Btos => BasicType::Byte,
            TosState::Ztos => BasicType::Boolean,
            TosState::Ctos => BasicType::Char,
            TosState::Stos => BasicType::Short,
            TosState::Itos => BasicType::Int,
            TosState::Ltos => BasicType::Long,
            TosState::Ftos => BasicType::Float,
            TosState::Dtos => BasicType::Double,
            TosState::Atos => BasicType::Object,
            TosState::Vtos => return Err(Failure::Fatal("void field".to_string())),
        })
    }
}

/// How a resolved invoke finds the method it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Static,
    Special,
    /// Virtual call with a single possible target
    Final,
    Virtual(usize),
    Interface { interface: TypeId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub method: Arc<Method>,
    pub dispatch: Dispatch,
    /// Stack words taken by the arguments, receiver and appendix included
    pub parameter_size: usize,
    pub result: TosState,
    /// Extra trailing argument pushed by `invokehandle` and `invokedynamic`
    pub appendix: Option<ObjectRef>,
}

#[derive(Debug, Default)]
pub struct CacheEntry {
    bytecode_1: AtomicU8,
    bytecode_2: AtomicU8,
    field: OnceLock<ResolvedField>,
    method_1: OnceLock<ResolvedMethod>,
    method_2: OnceLock<ResolvedMethod>,
    error: OnceLock<Failure>,
}

impl CacheEntry {
    /// Tag for `byte_no`, `0` while unresolved
    pub fn bytecode(&self, byte_no: ByteNo) -> u8 {
        match byte_no {
            ByteNo::F1 => self.bytecode_1.load(Ordering::Acquire),
            ByteNo::F2 => self.bytecode_2.load(Ordering::Acquire),
        }
    }

    pub fn is_resolved(&self, byte_no: ByteNo, code: Bytecode) -> bool {
        self.bytecode(byte_no) == code as u8
    }

    fn publish(&self, byte_no: ByteNo, code: Bytecode) {
        match byte_no {
            ByteNo::F1 => self.bytecode_1.store(code as u8, Ordering::Release),
            ByteNo::F2 => self.bytecode_2.store(code as u8, Ordering::Release),
        }
    }

    /// Installs the field payload, then the tags that are given. A racing
    /// resolution of the same entry keeps the payload that got there first.
    pub fn set_field(
        &self,
        field: ResolvedField,
        get_code: Option<Bytecode>,
        put_code: Option<Bytecode>,
    ) {
        let _ = self.field.set(field);
        if let Some(code) = get_code {
            self.publish(ByteNo::F1, code);
        }
        if let Some(code) = put_code {
            self.publish(ByteNo::F2, code);
        }
    }

    pub fn set_method(&self, byte_no: ByteNo, method: ResolvedMethod, code: Option<Bytecode>) {
        let _ = match byte_no {
            ByteNo::F1 => self.method_1.set(method),
            ByteNo::F2 => self.method_2.set(method),
        };
        if let Some(code) = code {
            self.publish(byte_no, code);
        }
    }

    pub fn field(&self) -> Result<&ResolvedField, Failure> {
        self.field
            .get()
            .ok_or_else(|| Failure::Fatal("cache entry holds no field".to_string()))
    }

    pub fn method(&self, byte_no: ByteNo) -> Result<&ResolvedMethod, Failure> {
        let method = match byte_no {
            ByteNo::F1 => self.method_1.get(),
            ByteNo::F2 => self.method_2.get(),
        };
        method.ok_or_else(|| Failure::Fatal(format!("cache entry holds no {byte_no:?} method")))
    }

    /// Remembers a resolution failure; every later resolution reports the first one
    pub fn record_error(&self, failure: Failure) -> Failure {
        self.error.get_or_init(|| failure).clone()
    }

    pub fn error(&self) -> Option<&Failure> {
        self.error.get()
    }
}

#[derive(Debug)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    entries: Vec<CacheEntry>,
    resolved_classes: Vec<OnceLock<TypeId>>,
    resolved_references: Vec<OnceLock<ObjectRef>>,
}

impl ConstantPool {
    /// `constants` start at index 1, index 0 is never valid
    pub fn new(constants: Vec<Constant>) -> Self {
        let constants: Vec<Constant> = std::iter::once(Constant::Unused).chain(constants).collect();
        let len = constants.len();
        Self {
            constants,
            entries: (0..len).map(|_| CacheEntry::default()).collect(),
            resolved_classes: (0..len).map(|_| OnceLock::new()).collect(),
            resolved_references: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.len() <= 1
    }

    pub fn constant(&self, index: u16) -> Result<&Constant, Failure> {
        match self.constants.get(index as usize) {
            Some(Constant::Unused) | None => Err(Failure::Fatal(format!(
                "invalid constant pool index {index}"
            ))),
            Some(constant) => Ok(constant),
        }
    }

    pub fn entry(&self, index: u16) -> Result<&CacheEntry, Failure> {
        self.constant(index)?;
        self.entries
            .get(index as usize)
            .ok_or_else(|| Failure::Fatal(format!("no cache entry at {index}")))
    }

    pub fn member_ref(&self, index: u16) -> Result<&MemberRef, Failure> {
        match self.constant(index)? {
            Constant::Field(member)
            | Constant::Method(member)
            | Constant::InterfaceMethod(member)
            | Constant::InvokeDynamic(member) => Ok(member),
            other => Err(Failure::Fatal(format!(
                "constant {index} is not a member reference: {other:?}"
            ))),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, Failure> {
        match self.constant(index)? {
            Constant::Class(name) => Ok(name),
            other => Err(Failure::Fatal(format!(
                "constant {index} is not a class: {other:?}"
            ))),
        }
    }

    pub fn resolved_class(&self, index: u16) -> Option<TypeId> {
        self.resolved_classes.get(index as usize)?.get().copied()
    }

    pub fn set_resolved_class(&self, index: u16, ty: TypeId) -> Result<TypeId, Failure> {
        let slot = self
            .resolved_classes
            .get(index as usize)
            .ok_or_else(|| Failure::Fatal(format!("invalid constant pool index {index}")))?;
        Ok(*slot.get_or_init(|| ty))
    }

    pub fn resolved_reference(&self, index: u16) -> Option<ObjectRef> {
        self.resolved_references.get(index as usize)?.get().copied()
    }

    pub fn set_resolved_reference(&self, index: u16, obj: ObjectRef) -> Result<ObjectRef, Failure> {
        let slot = self
            .resolved_references
            .get(index as usize)
            .ok_or_else(|| Failure::Fatal(format!("invalid constant pool index {index}")))?;
        Ok(*slot.get_or_init(|| obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_payload() {
        let entry = CacheEntry::default();
        assert_eq!(entry.bytecode(ByteNo::F1), 0);
        assert!(entry.field().is_err());

        let field = ResolvedField::new(TypeId::from(4), 16, BasicType::Int);
        entry.set_field(field.clone(), Some(Bytecode::Getfield), None);
        assert!(entry.is_resolved(ByteNo::F1, Bytecode::Getfield));
        assert_eq!(entry.bytecode(ByteNo::F2), 0);
        assert_eq!(entry.field().unwrap(), &field);

        // a later resolution for the put side keeps the first payload
        let other = ResolvedField::new(TypeId::from(4), 24, BasicType::Int);
        entry.set_field(other, None, Some(Bytecode::Putfield));
        assert!(entry.is_resolved(ByteNo::F2, Bytecode::Putfield));
        assert_eq!(entry.field().unwrap().offset, 16);
    }

    #[test]
    fn first_error_sticks() {
        let entry = CacheEntry::default();
        let first = entry.record_error(Failure::Linkage("NoSuchFieldError: x".to_string()));
        let second = entry.record_error(Failure::Linkage("NoSuchFieldError: y".to_string()));
        assert_eq!(first, second);
        assert_eq!(entry.error(), Some(&first));
    }

    #[test]
    fn unknown_tos_tag() {
        let mut field = ResolvedField::new(TypeId::from(0), 16, BasicType::Char);
        assert_eq!(field.tos_state().unwrap(), TosState::Ctos);
        assert_eq!(field.kind().unwrap(), BasicType::Char);
        field.tos_bits = 42;
        assert!(matches!(field.tos_state(), Err(Failure::Fatal(_))));
    }

    #[test]
    fn pool_indices() {
        let pool = ConstantPool::new(vec![
            Constant::Int(3),
            Constant::Class("Point".to_string()),
        ]);
        assert_eq!(pool.len(), 3);
        assert!(pool.constant(0).is_err());
        assert_eq!(pool.constant(1).unwrap(), &Constant::Int(3));
        assert_eq!(pool.class_name(2).unwrap(), "Point");
        assert!(pool.class_name(1).is_err());
        assert!(pool.entry(3).is_err());

        assert_eq!(pool.resolved_class(2), None);
        assert_eq!(pool.set_resolved_class(2, TypeId::from(7)).unwrap(), TypeId::from(7));
        assert_eq!(pool.set_resolved_class(2, TypeId::from(8)).unwrap(), TypeId::from(7));
    }
}
