//! Object creation, `athrow` and the type checks.
use common::{BasicType, ObjectRef, TypeId};
use tracing::trace;

use super::{Arg, Flow, profile};
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::heap::layout;
use crate::runtime::initialize_header;
use crate::universe::{TypeDescriptor, TypeKind};

/// Inline allocation of a plain instance: the thread-local buffer first, then
/// a bump of the shared heap. `None` sends the caller to the runtime.
fn fast_new(ctx: &mut InterpreterContext, ty: &TypeDescriptor) -> Result<Option<ObjectRef>, Failure> {
    let vm = ctx.vm.clone();
    let config = &vm.config;
    let size = ty.instance_size;

    let (address, zeroed) = match config.use_tlab.then(|| ctx.tlab.allocate(size)).flatten() {
        Some(address) => (address, config.zero_tlab),
        None if config.allow_shared_alloc => match vm.heap.allocate(size) {
            Some(address) => (address, false),
            None => return Ok(None),
        },
        None => return Ok(None),
    };

    if !zeroed && size > layout::HEADER_SIZE {
        vm.heap.zero(address + layout::HEADER_SIZE, address + size)?;
    }
    let obj = ObjectRef::from(address);
    initialize_header(&vm.heap, obj, ty.prototype_header, ty.id)?;
    trace!("allocated {} at {obj:?}", ty.name);
    Ok(Some(obj))
}

pub fn new(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let index = ctx.u2(1)?;
    let method = ctx.method()?;
    let pool = &method.constants;

    if let Some(ty) = pool.resolved_class(index) {
        let descriptor = ctx.vm.universe.type_of(ty)?;
        let allocatable = descriptor.kind == TypeKind::Instance
            && !descriptor.is_abstract()
            && descriptor.is_initialized()
            && !descriptor.slow_path
            && !descriptor.has_finalizer;
        if allocatable && let Some(obj) = fast_new(ctx, &descriptor)? {
            ctx.set_a(obj);
            return Ok(Flow::Next);
        }
    }

    let runtime = ctx.runtime();
    let obj = runtime.new_instance(ctx, pool, index)?;
    ctx.set_a(obj);
    Ok(Flow::Next)
}

pub fn newarray(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let element = BasicType::from_atype(ctx.u1(1)?)?;
    let length = ctx.take_i()?;
    let runtime = ctx.runtime();
    let array = runtime.new_array(ctx, element, length)?;
    ctx.set_a(array);
    Ok(Flow::Next)
}

pub fn anewarray(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let index = ctx.u2(1)?;
    let length = ctx.take_i()?;
    let method = ctx.method()?;
    let runtime = ctx.runtime();
    let array = runtime.anewarray(ctx, &method.constants, index, length)?;
    ctx.set_a(array);
    Ok(Flow::Next)
}

/// The counts are on the stack, outermost dimension deepest
pub fn multianewarray(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let index = ctx.u2(1)?;
    let count = ctx.u1(3)? as usize;
    let mut dimensions = vec![0; count];
    for dimension in dimensions.iter_mut().rev() {
        *dimension = ctx.pop_i()?;
    }

    let method = ctx.method()?;
    let runtime = ctx.runtime();
    let array = runtime.multianewarray(ctx, &method.constants, index, &dimensions)?;
    ctx.set_a(array);
    Ok(Flow::Next)
}

pub fn athrow(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let exception = ctx.take_a()?;
    if exception.is_null() {
        return Err(Failure::NullReference);
    }
    Err(Failure::Thrown(exception))
}

/// Class named by the operand of `checkcast` or `instanceof`
fn checked_class(ctx: &mut InterpreterContext) -> Result<TypeId, Failure> {
    let index = ctx.u2(1)?;
    let method = ctx.method()?;
    let pool = &method.constants;
    match pool.resolved_class(index) {
        Some(ty) => Ok(ty),
        None => {
            let runtime = ctx.runtime();
            runtime.quicken_io_cc(ctx, pool, index)
        }
    }
}

/// Whether `obj` is an instance of `ty`, with the outcome profiled
fn is_instance(ctx: &mut InterpreterContext, obj: ObjectRef, ty: TypeId) -> Result<bool, Failure> {
    let klass = ctx.vm.heap.klass(obj)?;
    profile(ctx, |mdo, bci| mdo.profile_typecheck(bci, klass))?;
    let is_instance = ctx.vm.universe.is_subtype_of(klass, ty)?;
    if !is_instance {
        profile(ctx, |mdo, bci| mdo.profile_typecheck_failed(bci))?;
    }
    Ok(is_instance)
}

pub fn checkcast(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let obj = ctx.take_a()?;
    if obj.is_null() {
        profile(ctx, |mdo, bci| mdo.profile_null_seen(bci))?;
        ctx.set_a(obj);
        return Ok(Flow::Next);
    }

    let ty = checked_class(ctx)?;
    if !is_instance(ctx, obj, ty)? {
        return Err(Failure::ClassCast);
    }
    ctx.set_a(obj);
    Ok(Flow::Next)
}

pub fn instanceof(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let obj = ctx.take_a()?;
    if obj.is_null() {
        profile(ctx, |mdo, bci| mdo.profile_null_seen(bci))?;
        ctx.set_i(0);
        return Ok(Flow::Next);
    }

    let ty = checked_class(ctx)?;
    let result = is_instance(ctx, obj, ty)?;
    ctx.set_i(result as i32);
    Ok(Flow::Next)
}
