//! Field access. The generic forms resolve their cache entry and quicken
//! themselves into a `fast_` form that assumes a resolved entry.
use std::sync::atomic::{Ordering, fence};

use bytecode::Bytecode;
use common::{BasicType, ObjectRef, Value};

use super::{Arg, Flow, null_check, patch_bytecode, resolve_cache_and_index, unexpected};
use crate::barrier::FieldAddress;
use crate::cache::{ByteNo, ResolvedField};
use crate::context::InterpreterContext;
use crate::failure::Failure;

fn fast_get(kind: BasicType) -> Result<Bytecode, Failure> {
    Ok(match kind {
        BasicType::Boolean | BasicType::Byte => Bytecode::FastBgetfield,
        BasicType::Char => Bytecode::FastCgetfield,
        BasicType::Short => Bytecode::FastSgetfield,
        BasicType::Int => Bytecode::FastIgetfield,
        BasicType::Long => Bytecode::FastLgetfield,
        BasicType::Float => Bytecode::FastFgetfield,
        BasicType::Double => Bytecode::FastDgetfield,
        BasicType::Object | BasicType::Array => Bytecode::FastAgetfield,
        BasicType::Void => return Err(Failure::Fatal("void field".to_string())),
    })
}

fn fast_put(kind: BasicType) -> Result<Bytecode, Failure> {
    Ok(match kind {
        BasicType::Boolean => Bytecode::FastZputfield,
        BasicType::Byte => Bytecode::FastBputfield,
        BasicType::Char => Bytecode::FastCputfield,
        BasicType::Short => Bytecode::FastSputfield,
        BasicType::Int => Bytecode::FastIputfield,
        BasicType::Long => Bytecode::FastLputfield,
        BasicType::Float => Bytecode::FastFputfield,
        BasicType::Double => Bytecode::FastDputfield,
        BasicType::Object | BasicType::Array => Bytecode::FastAputfield,
        BasicType::Void => return Err(Failure::Fatal("void field".to_string())),
    })
}

/// Field of an already resolved entry, the index is at bci + `offset`
fn cached_field(ctx: &InterpreterContext, offset: usize) -> Result<ResolvedField, Failure> {
    let index = ctx.u2(offset)?;
    Ok(ctx.method()?.constants.entry(index)?.field()?.clone())
}

/// Watched sites stay generic so an agent keeps seeing the original bytecodes
fn is_watched(ctx: &InterpreterContext, is_put: bool) -> bool {
    if !ctx.vm.config.jvmti_hooks {
        return false;
    }
    let runtime = &ctx.vm.runtime;
    let count = if is_put {
        runtime.field_modification_count()
    } else {
        runtime.field_access_count()
    };
    count > 0
}

fn post_field_access(
    ctx: &mut InterpreterContext,
    obj: ObjectRef,
    field: &ResolvedField,
) -> Result<(), Failure> {
    if !ctx.vm.config.jvmti_hooks {
        return Ok(());
    }
    let runtime = ctx.runtime();
    if runtime.field_access_count() == 0 {
        return Ok(());
    }
    runtime.post_field_access(ctx, obj, field)
}

fn post_field_modification(
    ctx: &mut InterpreterContext,
    obj: ObjectRef,
    field: &ResolvedField,
    value: Value,
) -> Result<(), Failure> {
    if !ctx.vm.config.jvmti_hooks {
        return Ok(());
    }
    let runtime = ctx.runtime();
    if runtime.field_modification_count() == 0 {
        return Ok(());
    }
    runtime.post_field_modification(ctx, obj, field, value)
}

fn load_field(
    ctx: &InterpreterContext,
    obj: ObjectRef,
    field: &ResolvedField,
    kind: BasicType,
) -> Result<Value, Failure> {
    let value = ctx.vm.heap.load(obj.address() + field.offset, kind)?;
    if field.is_volatile {
        fence(Ordering::SeqCst);
    }
    Ok(value)
}

/// Stores go through the barrier for references and keep booleans at 0 or 1
fn store_field(
    ctx: &InterpreterContext,
    obj: ObjectRef,
    field: &ResolvedField,
    kind: BasicType,
    value: Value,
) -> Result<(), Failure> {
    let vm = &ctx.vm;
    if field.is_volatile {
        fence(Ordering::SeqCst);
    }
    let address = obj.address() + field.offset;
    match (kind, value) {
        (BasicType::Object | BasicType::Array, Value::Reference(reference)) => {
            let slot = FieldAddress {
                base: obj,
                offset: field.offset,
            };
            vm.barrier.store_reference(&vm.heap, slot, reference, false)?;
        }
        (BasicType::Boolean, Value::Int(v)) => {
            vm.heap.store(address, kind, Value::Int(v & 1))?;
        }
        (kind, value) => vm.heap.store(address, kind, value)?,
    }
    if field.is_volatile {
        fence(Ordering::SeqCst);
    }
    Ok(())
}

fn getfield_or_static(ctx: &mut InterpreterContext, is_static: bool) -> Result<Flow, Failure> {
    let (method, index) = resolve_cache_and_index(ctx, ByteNo::F1)?;
    let field = method.constants.entry(index)?.field()?.clone();
    let kind = field.kind()?;

    let (obj, target) = if is_static {
        (ObjectRef::NULL, ctx.vm.mirror(field.holder)?)
    } else {
        let obj = null_check(ctx.pop_a()?)?;
        (obj, obj)
    };
    post_field_access(ctx, obj, &field)?;
    let value = load_field(ctx, target, &field, kind)?;
    ctx.push_value(value)?;

    if !is_static && !is_watched(ctx, false) {
        patch_bytecode(ctx, fast_get(kind)?)?;
    }
    Ok(Flow::Next)
}

fn putfield_or_static(ctx: &mut InterpreterContext, is_static: bool) -> Result<Flow, Failure> {
    let (method, index) = resolve_cache_and_index(ctx, ByteNo::F2)?;
    let field = method.constants.entry(index)?.field()?.clone();
    let kind = field.kind()?;
    let value = ctx.pop_value(kind)?;

    let (obj, target) = if is_static {
        (ObjectRef::NULL, ctx.vm.mirror(field.holder)?)
    } else {
        let obj = null_check(ctx.pop_a()?)?;
        (obj, obj)
    };
    post_field_modification(ctx, obj, &field, value)?;
    store_field(ctx, target, &field, kind, value)?;

    if !is_static && !is_watched(ctx, true) {
        patch_bytecode(ctx, fast_put(kind)?)?;
    }
    Ok(Flow::Next)
}

pub fn getfield(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    getfield_or_static(ctx, false)
}

pub fn getstatic(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    getfield_or_static(ctx, true)
}

pub fn putfield(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    putfield_or_static(ctx, false)
}

pub fn putstatic(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    putfield_or_static(ctx, true)
}

pub fn fast_accessfield(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Kind(kind) = arg else {
        return Err(unexpected(arg));
    };
    let obj = null_check(ctx.take_a()?)?;
    let field = cached_field(ctx, 1)?;
    post_field_access(ctx, obj, &field)?;
    let value = load_field(ctx, obj, &field, kind)?;
    ctx.set_value(value);
    Ok(Flow::Next)
}

pub fn fast_storefield(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Kind(kind) = arg else {
        return Err(unexpected(arg));
    };
    let value = ctx.take_value(kind)?;
    let obj = null_check(ctx.pop_a()?)?;
    let field = cached_field(ctx, 1)?;
    post_field_modification(ctx, obj, &field, value)?;
    store_field(ctx, obj, &field, kind, value)?;
    Ok(Flow::Next)
}

/// `aload_0` and a quickened `getfield` in one
pub fn fast_xaccess(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Kind(kind) = arg else {
        return Err(unexpected(arg));
    };
    let obj = null_check(ctx.local_a(0)?)?;
    let field = cached_field(ctx, 2)?;
    post_field_access(ctx, obj, &field)?;
    let value = load_field(ctx, obj, &field, kind)?;
    ctx.set_value(value);
    Ok(Flow::Next)
}
