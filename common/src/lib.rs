use std::fmt::Debug;
use std::fmt::Display;

use anyhow::Result;
use anyhow::bail;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ThreadId(i64);

impl From<i64> for ThreadId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte address of an object in the heap, `0` is null
#[derive(Eq, Hash, PartialEq, Clone, Copy, Default, PartialOrd, Ord)]
pub struct ObjectRef(u32);

impl ObjectRef {
    pub const NULL: ObjectRef = ObjectRef(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn address(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ObjectRef {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "@{:#x}", self.0)
        }
    }
}

/// Index of a type descriptor in the universe
#[derive(Eq, Hash, PartialEq, Debug, Clone, Copy, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Index of a method in the universe
#[derive(Eq, Hash, PartialEq, Debug, Clone, Copy)]
pub struct MethodId(u32);

impl MethodId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for MethodId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Element and field kinds, numbered like the `newarray` atype operand where one exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
    Object,
    Array,
    Void,
}

impl BasicType {
    pub fn from_atype(atype: u8) -> Result<Self> {
        Ok(match atype {
            4 => BasicType::Boolean,
            5 => BasicType::Char,
            6 => BasicType::Float,
            7 => BasicType::Double,
            8 => BasicType::Byte,
            9 => BasicType::Short,
            10 => BasicType::Int,
            11 => BasicType::Long,
            _ => bail!("invalid array type: {atype}"),
        })
    }

    /// Size in bytes when stored in a field or array element
    pub fn size(&self) -> u32 {
        match self {
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Int | BasicType::Float => 4,
            BasicType::Object | BasicType::Array => 4,
            BasicType::Long | BasicType::Double => 8,
            BasicType::Void => 0,
        }
    }

    /// Number of stack/local words a value of this kind occupies
    pub fn slots(&self) -> usize {
        match self {
            BasicType::Long | BasicType::Double => 2,
            BasicType::Void => 0,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    pub fn tos_state(&self) -> TosState {
        match self {
            BasicType::Boolean => TosState::Ztos,
            BasicType::Byte => TosState::Btos,
            BasicType::Char => TosState::Ctos,
            BasicType::Short => TosState::Stos,
            BasicType::Int => TosState::Itos,
            BasicType::Long => TosState::Ltos,
            BasicType::Float => TosState::Ftos,
            BasicType::Double => TosState::Dtos,
            BasicType::Object | BasicType::Array => TosState::Atos,
            BasicType::Void => TosState::Vtos,
        }
    }
}

/// Describes where and how the top-of-stack value is cached between instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TosState {
    Btos = 0,
    Ztos = 1,
    Ctos = 2,
    Stos = 3,
    Itos = 4,
    Ltos = 5,
    Ftos = 6,
    Dtos = 7,
    Atos = 8,
    Vtos = 9,
}

impl TosState {
    pub const COUNT: usize = 10;

    pub fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits {
            0 => TosState::Btos,
            1 => TosState::Ztos,
            2 => TosState::Ctos,
            3 => TosState::Stos,
            4 => TosState::Itos,
            5 => TosState::Ltos,
            6 => TosState::Ftos,
            7 => TosState::Dtos,
            8 => TosState::Atos,
            9 => TosState::Vtos,
            _ => bail!("unrecognized tos state tag: {bits}"),
        })
    }

    /// Sub-int states are held in the int register
    pub fn normalized(&self) -> TosState {
        match self {
            TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos => TosState::Itos,
            other => *other,
        }
    }

    pub fn slots(&self) -> usize {
        match self {
            TosState::Ltos | TosState::Dtos => 2,
            TosState::Vtos => 0,
            _ => 1,
        }
    }
}

impl Display for TosState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TosState::Btos => "btos",
            TosState::Ztos => "ztos",
            TosState::Ctos => "ctos",
            TosState::Stos => "stos",
            TosState::Itos => "itos",
            TosState::Ltos => "ltos",
            TosState::Ftos => "ftos",
            TosState::Dtos => "dtos",
            TosState::Atos => "atos",
            TosState::Vtos => "vtos",
        };
        write!(f, "{name}")
    }
}

/// A typed value crossing the interpreter boundary (arguments, results, field contents)
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(ObjectRef),
}

impl Value {
    pub fn zero(kind: BasicType) -> Result<Self> {
        Ok(match kind {
            BasicType::Boolean
            | BasicType::Byte
            | BasicType::Char
            | BasicType::Short
            | BasicType::Int => Value::Int(0),
            BasicType::Long => Value::Long(0),
            BasicType::Float => Value::Float(0.0),
            BasicType::Double => Value::Double(0.0),
            BasicType::Object | BasicType::Array => Value::Reference(ObjectRef::NULL),
            BasicType::Void => bail!("void has no value"),
        })
    }

    pub fn int(&self) -> Result<i32> {
        match self {
            Self::Int(val) => Ok(*val),
            _ => bail!("no int found, is {self:?}"),
        }
    }

    pub fn long(&self) -> Result<i64> {
        match self {
            Self::Long(val) => Ok(*val),
            _ => bail!("no long found, is {self:?}"),
        }
    }

    pub fn float(&self) -> Result<f32> {
        match self {
            Self::Float(val) => Ok(*val),
            _ => bail!("no float found, is {self:?}"),
        }
    }

    pub fn double(&self) -> Result<f64> {
        match self {
            Self::Double(val) => Ok(*val),
            _ => bail!("no double found, is {self:?}"),
        }
    }

    pub fn reference(&self) -> Result<ObjectRef> {
        match self {
            Self::Reference(val) => Ok(*val),
            _ => bail!("no reference found, is {self:?}"),
        }
    }

    pub fn slots(&self) -> usize {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Six-way comparator used by conditional branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Condition {
    pub fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            Condition::Equal => lhs == rhs,
            Condition::NotEqual => lhs != rhs,
            Condition::Less => lhs < rhs,
            Condition::LessEqual => lhs <= rhs,
            Condition::Greater => lhs > rhs,
            Condition::GreaterEqual => lhs >= rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atype_codes() {
        assert_eq!(BasicType::from_atype(4).unwrap(), BasicType::Boolean);
        assert_eq!(BasicType::from_atype(10).unwrap(), BasicType::Int);
        assert_eq!(BasicType::from_atype(11).unwrap(), BasicType::Long);
        assert!(BasicType::from_atype(3).is_err());
        assert!(BasicType::from_atype(12).is_err());
    }

    #[test]
    fn test_tos_state_from_bits() {
        for bits in 0..TosState::COUNT as u8 {
            assert_eq!(TosState::from_bits(bits).unwrap() as u8, bits);
        }
    }

    #[test]
    fn test_tos_state_unknown_tag() {
        let err = TosState::from_bits(42).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized tos state tag: 42");
    }

    #[test]
    fn test_sub_int_states_normalize() {
        assert_eq!(TosState::Btos.normalized(), TosState::Itos);
        assert_eq!(TosState::Ztos.normalized(), TosState::Itos);
        assert_eq!(TosState::Ctos.normalized(), TosState::Itos);
        assert_eq!(TosState::Stos.normalized(), TosState::Itos);
        assert_eq!(TosState::Ltos.normalized(), TosState::Ltos);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).int().unwrap(), 7);
        assert!(Value::Int(7).long().is_err());
        assert_eq!(Value::Long(-1).long().unwrap(), -1);
        assert_eq!(
            Value::Reference(ObjectRef::NULL).reference().unwrap(),
            ObjectRef::NULL
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::zero(BasicType::Char).unwrap(), Value::Int(0));
        assert_eq!(Value::zero(BasicType::Double).unwrap(), Value::Double(0.0));
        assert_eq!(
            Value::zero(BasicType::Object).unwrap(),
            Value::Reference(ObjectRef::NULL)
        );
        assert!(Value::zero(BasicType::Void).is_err());
    }

    #[test]
    fn test_conditions() {
        assert!(Condition::Less.holds(-1, 0));
        assert!(!Condition::Less.holds(0, 0));
        assert!(Condition::LessEqual.holds(0, 0));
        assert!(Condition::NotEqual.holds(1, 2));
        assert!(Condition::GreaterEqual.holds(3, 2));
        assert!(!Condition::Greater.holds(2, 2));
    }

    #[test]
    fn test_null_reference() {
        assert!(ObjectRef::NULL.is_null());
        assert!(!ObjectRef::from(16).is_null());
        assert_eq!(format!("{:?}", ObjectRef::NULL), "null");
        assert_eq!(format!("{:?}", ObjectRef::from(16)), "@0x10");
    }
}
