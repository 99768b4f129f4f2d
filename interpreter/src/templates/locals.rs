use bytecode::Bytecode;
use common::BasicType;

use super::arrays::index_check;
use super::{Arg, Flow, patch_bytecode};
use crate::context::InterpreterContext;
use crate::failure::Failure;

/// Local index of a load or store: fixed for the `_n` forms, 16 bits behind a
/// `wide` prefix and 8 bits otherwise
fn index(ctx: &InterpreterContext, arg: Arg) -> Result<usize, Failure> {
    match arg {
        Arg::Local(n) => Ok(n),
        Arg::Wide => Ok(ctx.u2(2)? as usize),
        _ => Ok(ctx.u1(1)? as usize),
    }
}

pub fn iload(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    if arg == Arg::None && ctx.vm.config.rewrite_frequent_pairs {
        // an iload followed by iload is left alone until the second one is quickened
        let fast = match ctx.bytecode_at(2)? {
            Bytecode::Iload => None,
            Bytecode::FastIload => Some(Bytecode::FastIload2),
            Bytecode::Caload => Some(Bytecode::FastIcaload),
            _ => Some(Bytecode::FastIload),
        };
        if let Some(fast) = fast {
            patch_bytecode(ctx, fast)?;
        }
    }
    let value = ctx.local_i(index(ctx, arg)?)?;
    ctx.set_i(value);
    Ok(Flow::Next)
}

pub fn fast_iload(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.local_i(ctx.u1(1)? as usize)?;
    ctx.set_i(value);
    Ok(Flow::Next)
}

/// Two consecutive `iload`s
pub fn fast_iload2(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let first = ctx.local_i(ctx.u1(1)? as usize)?;
    ctx.push_i(first)?;
    let second = ctx.local_i(ctx.u1(3)? as usize)?;
    ctx.set_i(second);
    Ok(Flow::Next)
}

/// `iload` followed by `caload`
pub fn fast_icaload(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let index = ctx.local_i(ctx.u1(1)? as usize)?;
    let array = ctx.pop_a()?;
    let offset = index_check(ctx, array, index, BasicType::Char)?;
    let value = ctx.vm.heap.load(array.address() + offset, BasicType::Char)?;
    ctx.set_value(value);
    Ok(Flow::Next)
}

pub fn lload(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.local_l(index(ctx, arg)?)?;
    ctx.set_l(value);
    Ok(Flow::Next)
}

pub fn fload(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.local_f(index(ctx, arg)?)?;
    ctx.set_f(value);
    Ok(Flow::Next)
}

pub fn dload(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.local_d(index(ctx, arg)?)?;
    ctx.set_d(value);
    Ok(Flow::Next)
}

pub fn aload(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.local_a(index(ctx, arg)?)?;
    ctx.set_a(value);
    Ok(Flow::Next)
}

/// `aload_0`, folded into a following quickened `getfield` when possible
pub fn aload_0(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    if ctx.vm.config.rewrite_frequent_pairs {
        // a plain getfield is not quickened yet, wait for it
        let fast = match ctx.bytecode_at(1)? {
            Bytecode::Getfield => None,
            Bytecode::FastIgetfield => Some(Bytecode::FastIaccess0),
            Bytecode::FastAgetfield => Some(Bytecode::FastAaccess0),
            Bytecode::FastFgetfield => Some(Bytecode::FastFaccess0),
            _ => Some(Bytecode::FastAload0),
        };
        if let Some(fast) = fast {
            patch_bytecode(ctx, fast)?;
        }
    }
    let value = ctx.local_a(0)?;
    ctx.set_a(value);
    Ok(Flow::Next)
}

pub fn istore(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = index(ctx, arg)?;
    let value = ctx.take_i()?;
    ctx.set_local_i(n, value)?;
    Ok(Flow::Next)
}

pub fn lstore(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = index(ctx, arg)?;
    let value = ctx.take_l()?;
    ctx.set_local_l(n, value)?;
    Ok(Flow::Next)
}

pub fn fstore(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = index(ctx, arg)?;
    let value = ctx.take_f()?;
    ctx.set_local_f(n, value)?;
    Ok(Flow::Next)
}

pub fn dstore(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = index(ctx, arg)?;
    let value = ctx.take_d()?;
    ctx.set_local_d(n, value)?;
    Ok(Flow::Next)
}

/// Also stores the return addresses pushed by `jsr`, so it moves a raw word
pub fn astore(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = index(ctx, arg)?;
    let word = ctx.stack.pop()?;
    ctx.set_local_a(n, word)?;
    Ok(Flow::Next)
}

pub fn iinc(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let (n, delta) = match arg {
        Arg::Wide => (ctx.u2(2)? as usize, ctx.s2(4)? as i32),
        _ => (ctx.u1(1)? as usize, ctx.s1(2)? as i32),
    };
    let value = ctx.local_i(n)?.wrapping_add(delta);
    ctx.set_local_i(n, value)?;
    Ok(Flow::Next)
}
