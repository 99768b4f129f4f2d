use common::{BasicType, ObjectRef, Value};

use super::{Arg, Flow, profile, unexpected};
use crate::barrier::FieldAddress;
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::heap::layout;
use crate::universe::TypeKind;

/// Null and bounds check of an element access, returns the element offset.
/// The bounds check is a single unsigned compare, so negative indices fail too.
pub(super) fn index_check(
    ctx: &InterpreterContext,
    array: ObjectRef,
    index: i32,
    kind: BasicType,
) -> Result<u32, Failure> {
    let length = ctx.vm.heap.array_length(array)?;
    if index as u32 >= length as u32 {
        return Err(Failure::IndexOutOfBounds { index, length });
    }
    Ok(layout::element_offset(kind, index as u32))
}

pub fn load(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Kind(kind) = arg else {
        return Err(unexpected(arg));
    };
    let index = ctx.take_i()?;
    let array = ctx.pop_a()?;
    let offset = index_check(ctx, array, index, kind)?;
    let value = ctx.vm.heap.load(array.address() + offset, kind)?;
    ctx.set_value(value);
    Ok(Flow::Next)
}

/// Primitive element stores
pub fn store(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Kind(kind) = arg else {
        return Err(unexpected(arg));
    };
    let mut value = ctx.take_value(kind)?;
    let index = ctx.pop_i()?;
    let array = ctx.pop_a()?;
    let offset = index_check(ctx, array, index, kind)?;

    let heap = &ctx.vm.heap;
    // bastore serves byte and boolean arrays
    if kind == BasicType::Byte {
        let ty = ctx.vm.universe.type_of(heap.klass(array)?)?;
        if ty.kind == TypeKind::TypeArray(BasicType::Boolean) {
            value = Value::Int(value.int()? & 1);
        }
    }
    heap.store(array.address() + offset, kind, value)?;
    Ok(Flow::Next)
}

/// Reference element store with the element type check. The operands stay
/// on the expression stack until the store is committed.
pub fn aastore(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ObjectRef::from(ctx.stack.peek(0)?);
    let index = ctx.stack.peek(1)? as i32;
    let array = ObjectRef::from(ctx.stack.peek(2)?);
    let offset = index_check(ctx, array, index, BasicType::Object)?;
    let vm = ctx.vm.clone();
    let address = FieldAddress {
        base: array,
        offset,
    };

    if value.is_null() {
        profile(ctx, |mdo, bci| mdo.profile_null_seen(bci))?;
    } else {
        let element = vm.universe.element_type(vm.heap.klass(array)?)?;
        let value_type = vm.heap.klass(value)?;
        if !vm.universe.is_subtype_of(value_type, element)? {
            profile(ctx, |mdo, bci| mdo.profile_typecheck_failed(bci))?;
            return Err(Failure::ArrayStoreTypeMismatch);
        }
        profile(ctx, |mdo, bci| mdo.profile_typecheck(bci, value_type))?;
    }
    vm.barrier.store_reference(&vm.heap, address, value, true)?;
    for _ in 0..3 {
        ctx.stack.pop()?;
    }
    Ok(Flow::Next)
}

pub fn arraylength(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let array = ctx.take_a()?;
    let length = ctx.vm.heap.array_length(array)?;
    ctx.set_i(length);
    Ok(Flow::Next)
}
