//! Untyped stack manipulation. Everything here moves raw words, the tos
//! cache has already been spilled.
use super::{Arg, Flow};
use crate::context::InterpreterContext;
use crate::failure::Failure;

pub fn pop(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    ctx.stack.pop()?;
    Ok(Flow::Next)
}

pub fn pop2(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    ctx.stack.pop()?;
    ctx.stack.pop()?;
    Ok(Flow::Next)
}

pub fn dup(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.peek(0)?;
    ctx.stack.push(a)?;
    Ok(Flow::Next)
}

// b a -> a b a
pub fn dup_x1(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.pop()?;
    let b = ctx.stack.pop()?;
    for word in [a, b, a] {
        ctx.stack.push(word)?;
    }
    Ok(Flow::Next)
}

// c b a -> a c b a
pub fn dup_x2(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.pop()?;
    let b = ctx.stack.pop()?;
    let c = ctx.stack.pop()?;
    for word in [a, c, b, a] {
        ctx.stack.push(word)?;
    }
    Ok(Flow::Next)
}

// b a -> b a b a
pub fn dup2(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.peek(0)?;
    let b = ctx.stack.peek(1)?;
    ctx.stack.push(b)?;
    ctx.stack.push(a)?;
    Ok(Flow::Next)
}

// c b a -> b a c b a
pub fn dup2_x1(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.pop()?;
    let b = ctx.stack.pop()?;
    let c = ctx.stack.pop()?;
    for word in [b, a, c, b, a] {
        ctx.stack.push(word)?;
    }
    Ok(Flow::Next)
}

// d c b a -> b a d c b a
pub fn dup2_x2(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.pop()?;
    let b = ctx.stack.pop()?;
    let c = ctx.stack.pop()?;
    let d = ctx.stack.pop()?;
    for word in [b, a, d, c, b, a] {
        ctx.stack.push(word)?;
    }
    Ok(Flow::Next)
}

pub fn swap(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let a = ctx.stack.pop()?;
    let b = ctx.stack.pop()?;
    ctx.stack.push(a)?;
    ctx.stack.push(b)?;
    Ok(Flow::Next)
}
