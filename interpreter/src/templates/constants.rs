use bytecode::Bytecode;
use common::ObjectRef;

use super::{Arg, Flow, patch_bytecode, unexpected};
use crate::cache::Constant;
use crate::context::InterpreterContext;
use crate::failure::Failure;

pub fn nop(_ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    Ok(Flow::Next)
}

pub fn aconst_null(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    ctx.set_a(ObjectRef::NULL);
    Ok(Flow::Next)
}

pub fn iconst(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Int(value) = arg else {
        return Err(unexpected(arg));
    };
    ctx.set_i(value);
    Ok(Flow::Next)
}

pub fn lconst(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Long(value) = arg else {
        return Err(unexpected(arg));
    };
    ctx.set_l(value);
    Ok(Flow::Next)
}

pub fn fconst(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Float(value) = arg else {
        return Err(unexpected(arg));
    };
    ctx.set_f(value);
    Ok(Flow::Next)
}

pub fn dconst(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Double(value) = arg else {
        return Err(unexpected(arg));
    };
    ctx.set_d(value);
    Ok(Flow::Next)
}

pub fn bipush(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.s1(1)?;
    ctx.set_i(value as i32);
    Ok(Flow::Next)
}

pub fn sipush(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.s2(1)?;
    ctx.set_i(value as i32);
    Ok(Flow::Next)
}

fn constant_index(ctx: &InterpreterContext, arg: Arg) -> Result<u16, Failure> {
    match arg {
        Arg::Wide => ctx.u2(1),
        _ => Ok(ctx.u1(1)? as u16),
    }
}

/// `ldc` and `ldc_w`. Leaves the constant on the expression stack since its
/// kind is only known after looking at the pool.
pub fn ldc(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let index = constant_index(ctx, arg)?;
    let method = ctx.method()?;
    let pool = &method.constants;
    match pool.constant(index)? {
        Constant::Int(value) => ctx.push_i(*value)?,
        Constant::Float(value) => ctx.push_f(*value)?,
        Constant::String(_) | Constant::Class(_) => {
            let runtime = ctx.runtime();
            let obj = runtime.resolve_ldc(ctx, pool, index)?;
            ctx.push_a(obj)?;
            let fast = match arg {
                Arg::Wide => Bytecode::FastAldcW,
                _ => Bytecode::FastAldc,
            };
            patch_bytecode(ctx, fast)?;
        }
        other => {
            return Err(Failure::Fatal(format!("ldc of unexpected constant {other:?}")));
        }
    }
    Ok(Flow::Next)
}

/// Object constant whose kind was settled when the bytecode was rewritten
pub fn fast_aldc(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let index = constant_index(ctx, arg)?;
    let method = ctx.method()?;
    let pool = &method.constants;
    let obj = match pool.resolved_reference(index) {
        Some(obj) => obj,
        None => {
            let runtime = ctx.runtime();
            runtime.resolve_ldc(ctx, pool, index)?
        }
    };
    ctx.set_a(obj);
    Ok(Flow::Next)
}

pub fn ldc2_w(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let index = ctx.u2(1)?;
    let method = ctx.method()?;
    match method.constants.constant(index)? {
        Constant::Long(value) => ctx.push_l(*value)?,
        Constant::Double(value) => ctx.push_d(*value)?,
        other => {
            return Err(Failure::Fatal(format!("ldc2_w of unexpected constant {other:?}")));
        }
    }
    Ok(Flow::Next)
}
