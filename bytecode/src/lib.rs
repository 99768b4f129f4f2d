//! Instruction set definitions and the shared, patchable code stream.

pub mod builder;
pub mod code;
pub mod descriptor;
pub mod opcode;

pub use builder::{Assembler, Label};
pub use code::{CodeBuffer, LookupSwitch, TableSwitch};
pub use opcode::Bytecode;
