use std::sync::Arc;

use bytecode::Bytecode;
use common::{BasicType, ObjectRef, ThreadId, TosState, Value};

use crate::Vm;
use crate::failure::Failure;
use crate::frame::{Frame, ThreadStack};
use crate::heap::Tlab;
use crate::runtime::Runtime;
use crate::universe::Method;

/// The cached top-of-stack value between two bytecodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tos {
    Vtos,
    Itos(i32),
    Ltos(i64),
    Ftos(f32),
    Dtos(f64),
    Atos(ObjectRef),
}

impl Tos {
    pub fn state(&self) -> TosState {
        match self {
            Tos::Vtos => TosState::Vtos,
            Tos::Itos(_) => TosState::Itos,
            Tos::Ltos(_) => TosState::Ltos,
            Tos::Ftos(_) => TosState::Ftos,
            Tos::Dtos(_) => TosState::Dtos,
            Tos::Atos(_) => TosState::Atos,
        }
    }

    pub fn value(&self) -> Option<Value> {
        match *self {
            Tos::Vtos => None,
            Tos::Itos(v) => Some(Value::Int(v)),
            Tos::Ltos(v) => Some(Value::Long(v)),
            Tos::Ftos(v) => Some(Value::Float(v)),
            Tos::Dtos(v) => Some(Value::Double(v)),
            Tos::Atos(v) => Some(Value::Reference(v)),
        }
    }

    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            None => Tos::Vtos,
            Some(Value::Int(v)) => Tos::Itos(v),
            Some(Value::Long(v)) => Tos::Ltos(v),
            Some(Value::Float(v)) => Tos::Ftos(v),
            Some(Value::Double(v)) => Tos::Dtos(v),
            Some(Value::Reference(v)) => Tos::Atos(v),
        }
    }
}

/// Per-thread interpreter state: the stack, the current frame chain, the
/// cached tos value and the bytecode being executed.
#[derive(Debug)]
pub struct InterpreterContext {
    pub vm: Arc<Vm>,
    pub thread_id: ThreadId,
    pub stack: ThreadStack,
    pub frames: Vec<Frame>,
    pub tlab: Tlab,
    pub tos: Tos,
    /// Bytecode being executed, as fetched
    pub bytecode: Bytecode,
    pub bci: usize,
}

fn tos_mismatch(expected: TosState, tos: Tos) -> Failure {
    Failure::Fatal(format!("expected {expected} in tos, found {tos:?}"))
}

impl InterpreterContext {
    pub fn new(vm: Arc<Vm>, thread_id: ThreadId) -> Self {
        let stack = ThreadStack::new(vm.config.stack_words, vm.config.stack_guard_words);
        Self {
            vm,
            thread_id,
            stack,
            frames: Vec::new(),
            tlab: Tlab::default(),
            tos: Tos::Vtos,
            bytecode: Bytecode::Nop,
            bci: 0,
        }
    }

    pub fn frame(&self) -> Result<&Frame, Failure> {
        self.frames
            .last()
            .ok_or_else(|| Failure::Fatal("no frame found".to_string()))
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame, Failure> {
        self.frames
            .last_mut()
            .ok_or_else(|| Failure::Fatal("no frame found".to_string()))
    }

    pub fn method(&self) -> Result<Arc<Method>, Failure> {
        Ok(self.frame()?.method.clone())
    }

    pub fn runtime(&self) -> Arc<dyn Runtime> {
        self.vm.runtime.clone()
    }

    // ── bytecode stream, relative to the current bci ───────────────

    pub fn u1(&self, offset: usize) -> Result<u8, Failure> {
        Ok(self.frame()?.method.code.u1(self.bci + offset)?)
    }

    pub fn s1(&self, offset: usize) -> Result<i8, Failure> {
        Ok(self.frame()?.method.code.s1(self.bci + offset)?)
    }

    pub fn u2(&self, offset: usize) -> Result<u16, Failure> {
        Ok(self.frame()?.method.code.u2(self.bci + offset)?)
    }

    pub fn s2(&self, offset: usize) -> Result<i16, Failure> {
        Ok(self.frame()?.method.code.s2(self.bci + offset)?)
    }

    pub fn s4(&self, offset: usize) -> Result<i32, Failure> {
        Ok(self.frame()?.method.code.s4(self.bci + offset)?)
    }

    pub fn bytecode_at(&self, offset: usize) -> Result<Bytecode, Failure> {
        Ok(self.frame()?.method.code.bytecode_at(self.bci + offset)?)
    }

    // ── tos ────────────────────────────────────────────────────────

    pub fn take_i(&mut self) -> Result<i32, Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Itos(v) => Ok(v),
            other => Err(tos_mismatch(TosState::Itos, other)),
        }
    }

    pub fn take_l(&mut self) -> Result<i64, Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Ltos(v) => Ok(v),
            other => Err(tos_mismatch(TosState::Ltos, other)),
        }
    }

    pub fn take_f(&mut self) -> Result<f32, Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Ftos(v) => Ok(v),
            other => Err(tos_mismatch(TosState::Ftos, other)),
        }
    }

    pub fn take_d(&mut self) -> Result<f64, Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Dtos(v) => Ok(v),
            other => Err(tos_mismatch(TosState::Dtos, other)),
        }
    }

    pub fn take_a(&mut self) -> Result<ObjectRef, Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Atos(v) => Ok(v),
            other => Err(tos_mismatch(TosState::Atos, other)),
        }
    }

    pub fn set_i(&mut self, value: i32) {
        self.tos = Tos::Itos(value);
    }

    pub fn set_l(&mut self, value: i64) {
        self.tos = Tos::Ltos(value);
    }

    pub fn set_f(&mut self, value: f32) {
        self.tos = Tos::Ftos(value);
    }

    pub fn set_d(&mut self, value: f64) {
        self.tos = Tos::Dtos(value);
    }

    pub fn set_a(&mut self, value: ObjectRef) {
        self.tos = Tos::Atos(value);
    }

    /// Takes the tos value of a field or element of `kind`
    pub fn take_value(&mut self, kind: BasicType) -> Result<Value, Failure> {
        Ok(match kind.tos_state().normalized() {
            TosState::Itos => Value::Int(self.take_i()?),
            TosState::Ltos => Value::Long(self.take_l()?),
            TosState::Ftos => Value::Float(self.take_f()?),
            TosState::Dtos => Value::Double(self.take_d()?),
            TosState::Atos => Value::Reference(self.take_a()?),
            other => return Err(Failure::Fatal(format!("no value in {other}"))),
        })
    }

    pub fn set_value(&mut self, value: Value) {
        self.tos = Tos::from_value(Some(value));
    }

    /// Spills the tos value onto the expression stack
    pub fn push_tos(&mut self) -> Result<(), Failure> {
        match std::mem::replace(&mut self.tos, Tos::Vtos) {
            Tos::Vtos => Ok(()),
            Tos::Itos(v) => self.push_i(v),
            Tos::Ltos(v) => self.push_l(v),
            Tos::Ftos(v) => self.push_f(v),
            Tos::Dtos(v) => self.push_d(v),
            Tos::Atos(v) => self.push_a(v),
        }
    }

    /// Fills tos from the expression stack, `tos` must be empty
    pub fn pop_tos(&mut self, state: TosState) -> Result<(), Failure> {
        self.tos = match state.normalized() {
            TosState::Vtos => Tos::Vtos,
            TosState::Itos => Tos::Itos(self.pop_i()?),
            TosState::Ltos => Tos::Ltos(self.pop_l()?),
            TosState::Ftos => Tos::Ftos(self.pop_f()?),
            TosState::Dtos => Tos::Dtos(self.pop_d()?),
            TosState::Atos => Tos::Atos(self.pop_a()?),
            other => return Err(Failure::Fatal(format!("no tos for {other}"))),
        };
        Ok(())
    }

    /// Moves the cached value so that tos is in `state`
    pub fn transition(&mut self, state: TosState) -> Result<(), Failure> {
        let state = state.normalized();
        if self.tos.state() == state {
            return Ok(());
        }
        self.push_tos()?;
        self.pop_tos(state)
    }

    // ── expression stack ───────────────────────────────────────────

    pub fn push_i(&mut self, value: i32) -> Result<(), Failure> {
        self.stack.push(value as u32)
    }

    pub fn push_f(&mut self, value: f32) -> Result<(), Failure> {
        self.stack.push(value.to_bits())
    }

    pub fn push_a(&mut self, value: ObjectRef) -> Result<(), Failure> {
        self.stack.push(value.address())
    }

    pub fn push_l(&mut self, value: i64) -> Result<(), Failure> {
        self.stack.push((value >> 32) as u32)?;
        self.stack.push(value as u32)
    }

    pub fn push_d(&mut self, value: f64) -> Result<(), Failure> {
        self.push_l(value.to_bits() as i64)
    }

    pub fn push_value(&mut self, value: Value) -> Result<(), Failure> {
        match value {
            Value::Int(v) => self.push_i(v),
            Value::Long(v) => self.push_l(v),
            Value::Float(v) => self.push_f(v),
            Value::Double(v) => self.push_d(v),
            Value::Reference(v) => self.push_a(v),
        }
    }

    pub fn pop_i(&mut self) -> Result<i32, Failure> {
        Ok(self.stack.pop()? as i32)
    }

    pub fn pop_f(&mut self) -> Result<f32, Failure> {
        Ok(f32::from_bits(self.stack.pop()?))
    }

    pub fn pop_a(&mut self) -> Result<ObjectRef, Failure> {
        Ok(ObjectRef::from(self.stack.pop()?))
    }

    pub fn pop_l(&mut self) -> Result<i64, Failure> {
        let low = self.stack.pop()? as u64;
        let high = self.stack.pop()? as u64;
        Ok(((high << 32) | low) as i64)
    }

    pub fn pop_d(&mut self) -> Result<f64, Failure> {
        Ok(f64::from_bits(self.pop_l()? as u64))
    }

    pub fn pop_value(&mut self, kind: BasicType) -> Result<Value, Failure> {
        Ok(match kind.tos_state().normalized() {
            TosState::Itos => Value::Int(self.pop_i()?),
            TosState::Ltos => Value::Long(self.pop_l()?),
            TosState::Ftos => Value::Float(self.pop_f()?),
            TosState::Dtos => Value::Double(self.pop_d()?),
            TosState::Atos => Value::Reference(self.pop_a()?),
            other => return Err(Failure::Fatal(format!("no value in {other}"))),
        })
    }

    // ── locals ─────────────────────────────────────────────────────

    /// Raw word of local `n`
    pub fn local(&self, n: usize) -> Result<u32, Failure> {
        self.stack.get(self.frame()?.iaddress(n)?)
    }

    pub fn local_i(&self, n: usize) -> Result<i32, Failure> {
        Ok(self.stack.get(self.frame()?.iaddress(n)?)? as i32)
    }

    pub fn local_f(&self, n: usize) -> Result<f32, Failure> {
        Ok(f32::from_bits(self.stack.get(self.frame()?.faddress(n)?)?))
    }

    pub fn local_a(&self, n: usize) -> Result<ObjectRef, Failure> {
        Ok(ObjectRef::from(self.stack.get(self.frame()?.aaddress(n)?)?))
    }

    fn two_words(&self, low: usize) -> Result<u64, Failure> {
        let high = self.stack.get(low + 1)? as u64;
        Ok((high << 32) | self.stack.get(low)? as u64)
    }

    fn set_two_words(&mut self, low: usize, value: u64) -> Result<(), Failure> {
        self.stack.set(low, value as u32)?;
        self.stack.set(low + 1, (value >> 32) as u32)
    }

    pub fn local_l(&self, n: usize) -> Result<i64, Failure> {
        Ok(self.two_words(self.frame()?.laddress(n)?)? as i64)
    }

    pub fn local_d(&self, n: usize) -> Result<f64, Failure> {
        Ok(f64::from_bits(self.two_words(self.frame()?.daddress(n)?)?))
    }

    pub fn set_local_i(&mut self, n: usize, value: i32) -> Result<(), Failure> {
        let address = self.frame()?.iaddress(n)?;
        self.stack.set(address, value as u32)
    }

    pub fn set_local_f(&mut self, n: usize, value: f32) -> Result<(), Failure> {
        let address = self.frame()?.faddress(n)?;
        self.stack.set(address, value.to_bits())
    }

    /// Takes a raw word, `astore` also stores `jsr` return addresses
    pub fn set_local_a(&mut self, n: usize, word: u32) -> Result<(), Failure> {
        let address = self.frame()?.aaddress(n)?;
        self.stack.set(address, word)
    }

    pub fn set_local_l(&mut self, n: usize, value: i64) -> Result<(), Failure> {
        let address = self.frame()?.laddress(n)?;
        self.set_two_words(address, value as u64)
    }

    pub fn set_local_d(&mut self, n: usize, value: f64) -> Result<(), Failure> {
        let address = self.frame()?.daddress(n)?;
        self.set_two_words(address, value.to_bits())
    }
}
