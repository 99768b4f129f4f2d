use std::sync::Arc;

use common::TosState;

use crate::failure::Failure;
use crate::universe::Method;

/// Words in one lock record: object, displaced mark low, displaced mark high
pub const MONITOR_WORDS: usize = 3;

/// Where an invoke continues once the callee returns: the length of the
/// invoke instruction and the kind of value the callee leaves in tos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnEntry {
    pub length: usize,
    pub state: TosState,
}

impl ReturnEntry {
    pub fn new(length: usize, state: TosState) -> Result<Self, Failure> {
        if length != 3 && length != 5 {
            return Err(Failure::Fatal(format!(
                "no return entry for invokes of length {length}"
            )));
        }
        Ok(Self {
            length,
            state: state.normalized(),
        })
    }
}

/// Word addressed stack of one interpreter thread, growing towards index 0.
///
/// Everything below `limit` is the guard zone; a push into it is a stack
/// overflow. Two-word values keep their low word at the lower index, both in
/// locals and on the expression stack.
#[derive(Debug)]
pub struct ThreadStack {
    words: Box<[u32]>,
    sp: usize,
    limit: usize,
}

impl ThreadStack {
    pub fn new(words: usize, guard: usize) -> Self {
        Self {
            words: vec![0; words].into_boxed_slice(),
            sp: words,
            limit: guard,
        }
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn set_sp(&mut self, sp: usize) {
        self.sp = sp;
    }

    pub fn base(&self) -> usize {
        self.words.len()
    }

    pub fn depth(&self) -> usize {
        self.words.len() - self.sp
    }

    /// Fails unless `words` more words fit above the guard zone
    pub fn ensure(&self, words: usize) -> Result<(), Failure> {
        if self.sp < self.limit + words {
            return Err(Failure::StackOverflow);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<u32, Failure> {
        self.words
            .get(index)
            .copied()
            .ok_or_else(|| Failure::Fatal(format!("stack access outside of stack at {index}")))
    }

    pub fn set(&mut self, index: usize, word: u32) -> Result<(), Failure> {
        let slot = self
            .words
            .get_mut(index)
            .ok_or_else(|| Failure::Fatal(format!("stack access outside of stack at {index}")))?;
        *slot = word;
        Ok(())
    }

    pub fn push(&mut self, word: u32) -> Result<(), Failure> {
        self.ensure(1)?;
        self.sp -= 1;
        self.words[self.sp] = word;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, Failure> {
        if self.sp >= self.words.len() {
            return Err(Failure::Fatal("expression stack underflow".to_string()));
        }
        let word = self.words[self.sp];
        self.sp += 1;
        Ok(word)
    }

    /// Address of the word `depth` slots below the top of the expression stack
    pub fn at_tos(&self, depth: usize) -> usize {
        self.sp + depth
    }

    pub fn peek(&self, depth: usize) -> Result<u32, Failure> {
        self.get(self.at_tos(depth))
    }

    /// Moves `[from, to)` down by `distance` words
    pub fn shift_down(&mut self, from: usize, to: usize, distance: usize) -> Result<(), Failure> {
        if from < distance || to > self.words.len() {
            return Err(Failure::Fatal(format!(
                "can not shift [{from}, {to}) by {distance}"
            )));
        }
        self.words.copy_within(from..to, from - distance);
        Ok(())
    }
}

/// Activation record of one interpreted method.
///
/// ```text
///  sender_sp  ─▶ caller expression stack
///  locals     ─▶ local 0 (parameters first, local n at locals - n)
///                ...
///  monitor_bot ─▶ end of the lock records
///                lock records, MONITOR_WORDS each
///  monitor_top ─▶ first lock record
///                expression stack, down to sp
/// ```
#[derive(Debug, Clone)]
pub struct Frame {
    pub method: Arc<Method>,
    pub bci: usize,
    pub locals: usize,
    pub monitor_bot: usize,
    pub monitor_top: usize,
    pub sender_sp: usize,
    /// `None` for the entry frame of a call from outside the interpreter
    pub return_entry: Option<ReturnEntry>,
}

impl Frame {
    fn address(&self, n: usize) -> Result<usize, Failure> {
        if n >= self.method.max_locals {
            return Err(Failure::Fatal(format!(
                "local {n} out of range in {}",
                self.method
            )));
        }
        Ok(self.locals - n)
    }

    pub fn iaddress(&self, n: usize) -> Result<usize, Failure> {
        self.address(n)
    }

    pub fn faddress(&self, n: usize) -> Result<usize, Failure> {
        self.address(n)
    }

    pub fn aaddress(&self, n: usize) -> Result<usize, Failure> {
        self.address(n)
    }

    /// Low word of the two-word local starting at `n`, the high word is the
    /// next address up
    pub fn laddress(&self, n: usize) -> Result<usize, Failure> {
        self.address(n + 1)
    }

    pub fn daddress(&self, n: usize) -> Result<usize, Failure> {
        self.laddress(n)
    }

    pub fn monitor_records(&self) -> impl DoubleEndedIterator<Item = usize> + use<> {
        (self.monitor_top..self.monitor_bot).step_by(MONITOR_WORDS)
    }
}

#[cfg(test)]
mod tests {
    use bytecode::Bytecode;

    use super::*;
    use crate::testing;
    use crate::universe::{ClassSpec, MethodSpec, access};

    #[test]
    fn push_and_pop() {
        let mut stack = ThreadStack::new(8, 2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.sp(), 6);
        assert_eq!(stack.peek(0).unwrap(), 2);
        assert_eq!(stack.peek(1).unwrap(), 1);
        assert_eq!(stack.pop().unwrap(), 2);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn overflow_into_guard_zone() {
        let mut stack = ThreadStack::new(4, 2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.push(3), Err(Failure::StackOverflow));
        assert_eq!(stack.ensure(1), Err(Failure::StackOverflow));
        stack.ensure(0).unwrap();
    }

    #[test]
    fn underflow_is_fatal() {
        let mut stack = ThreadStack::new(4, 0);
        assert!(matches!(stack.pop(), Err(Failure::Fatal(_))));
    }

    #[test]
    fn shift_down() {
        let mut stack = ThreadStack::new(8, 0);
        for word in [1, 2, 3] {
            stack.push(word).unwrap();
        }
        stack.shift_down(5, 8, 3).unwrap();
        assert_eq!(stack.get(2).unwrap(), 3);
        assert_eq!(stack.get(4).unwrap(), 1);
        assert!(stack.shift_down(1, 4, 3).is_err());
    }

    fn frame(max_locals: usize, locals: usize) -> Frame {
        let vm = testing::vm(vec![ClassSpec::new("C").method(
            MethodSpec::new("m", "()V", access::STATIC)
                .code(testing::code(|asm| {
                    asm.op(Bytecode::Return);
                }))
                .max_locals(max_locals),
        )]);
        Frame {
            method: vm.universe.method_named("C", "m", "()V").unwrap(),
            bci: 0,
            locals,
            monitor_bot: locals - max_locals,
            monitor_top: locals - max_locals,
            sender_sp: locals + 1,
            return_entry: None,
        }
    }

    #[test]
    fn local_addresses() {
        let frame = frame(4, 100);
        assert_eq!(frame.iaddress(0).unwrap(), 100);
        assert_eq!(frame.aaddress(3).unwrap(), 97);
        assert_eq!(frame.faddress(2).unwrap(), 98);
        assert_eq!(frame.laddress(1).unwrap(), 98);
        assert_eq!(frame.daddress(2).unwrap(), 97);
        assert!(matches!(frame.iaddress(4), Err(Failure::Fatal(_))));
        assert!(matches!(frame.laddress(3), Err(Failure::Fatal(_))));
    }

    #[test]
    fn at_tos() {
        let mut stack = ThreadStack::new(8, 0);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.at_tos(0), 6);
        assert_eq!(stack.get(stack.at_tos(1)).unwrap(), 1);
    }

    #[test]
    fn return_entries() {
        let entry = ReturnEntry::new(5, TosState::Btos).unwrap();
        assert_eq!(entry.state, TosState::Itos);
        assert!(ReturnEntry::new(4, TosState::Vtos).is_err());
    }
}
