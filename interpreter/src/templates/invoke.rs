use std::sync::Arc;

use common::ObjectRef;

use super::{Arg, Flow, Invocation, null_check, profile, resolve_cache_and_index};
use crate::cache::{ByteNo, Dispatch, ResolvedMethod};
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::frame::ReturnEntry;
use crate::universe::Method;

struct PreparedCall {
    resolved: ResolvedMethod,
    receiver: Option<ObjectRef>,
    return_entry: ReturnEntry,
}

impl PreparedCall {
    fn receiver(&self) -> Result<ObjectRef, Failure> {
        let receiver = self
            .receiver
            .ok_or_else(|| Failure::Fatal(format!("no receiver for {}", self.resolved.method)))?;
        null_check(receiver)
    }

    fn invoke(self, method: Arc<Method>) -> Flow {
        Flow::Invoke(Invocation {
            method,
            return_entry: self.return_entry,
        })
    }
}

/// Resolves the call site, pushes the appendix and finds the receiver below the arguments
fn prepare_invoke(ctx: &mut InterpreterContext, byte_no: ByteNo) -> Result<PreparedCall, Failure> {
    let (method, index) = resolve_cache_and_index(ctx, byte_no)?;
    let resolved = method.constants.entry(index)?.method(byte_no)?.clone();
    if let Some(appendix) = resolved.appendix {
        ctx.push_a(appendix)?;
    }

    let has_receiver = resolved.dispatch != Dispatch::Static
        || ctx.bytecode == bytecode::Bytecode::Invokehandle;
    let receiver = if has_receiver {
        let depth = resolved.parameter_size.checked_sub(1).ok_or_else(|| {
            Failure::Fatal(format!("{} takes no receiver", resolved.method))
        })?;
        Some(ObjectRef::from(ctx.stack.peek(depth)?))
    } else {
        None
    };

    let length = ctx
        .bytecode
        .length()
        .ok_or_else(|| Failure::Fatal(format!("{} has no fixed length", ctx.bytecode)))?;
    let return_entry = ReturnEntry::new(length, resolved.result)?;
    Ok(PreparedCall {
        resolved,
        receiver,
        return_entry,
    })
}

fn profile_call(ctx: &InterpreterContext) -> Result<(), Failure> {
    profile(ctx, |mdo, bci| mdo.profile_call(bci))
}

fn profile_virtual_call(ctx: &InterpreterContext, receiver: common::TypeId) -> Result<(), Failure> {
    profile(ctx, |mdo, bci| mdo.profile_virtual_call(bci, receiver))
}

/// Vtable dispatch on the exact type of `receiver`
fn virtual_target(
    ctx: &InterpreterContext,
    receiver: ObjectRef,
    index: usize,
) -> Result<Arc<Method>, Failure> {
    let universe = &ctx.vm.universe;
    let ty = universe.type_of(ctx.vm.heap.klass(receiver)?)?;
    profile_virtual_call(ctx, ty.id)?;
    let id = ty.vtable.get(index).ok_or_else(|| {
        Failure::Fatal(format!("vtable index {index} out of range in {}", ty.name))
    })?;
    universe.method(*id)
}

pub fn invokevirtual(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F2)?;
    let receiver = call.receiver()?;
    let target = match call.resolved.dispatch {
        Dispatch::Final => {
            profile_call(ctx)?;
            call.resolved.method.clone()
        }
        Dispatch::Virtual(index) => virtual_target(ctx, receiver, index)?,
        other => {
            return Err(Failure::Fatal(format!("invokevirtual with {other:?} dispatch")));
        }
    };
    Ok(call.invoke(target))
}

pub fn invokespecial(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F1)?;
    call.receiver()?;
    profile_call(ctx)?;
    let target = call.resolved.method.clone();
    Ok(call.invoke(target))
}

pub fn invokestatic(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F1)?;
    profile_call(ctx)?;
    let target = call.resolved.method.clone();
    Ok(call.invoke(target))
}

pub fn invokeinterface(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F1)?;
    let receiver = call.receiver()?;
    let target = match call.resolved.dispatch {
        // private and final methods
        Dispatch::Final => {
            profile_call(ctx)?;
            call.resolved.method.clone()
        }
        // a method of Object called through an interface
        Dispatch::Virtual(index) => virtual_target(ctx, receiver, index)?,
        Dispatch::Interface { interface, index } => {
            let universe = &ctx.vm.universe;
            let ty = universe.type_of(ctx.vm.heap.klass(receiver)?)?;
            profile_virtual_call(ctx, ty.id)?;

            let entry = ty.itable_entry(interface).ok_or_else(|| {
                Failure::IncompatibleClassChange(format!(
                    "{} does not implement {}",
                    ty.name, call.resolved.method.holder_name
                ))
            })?;
            let abstract_method =
                || Failure::AbstractMethod(format!("{} in {}", call.resolved.method, ty.name));
            let id = entry
                .methods
                .get(index)
                .copied()
                .flatten()
                .ok_or_else(abstract_method)?;
            let method = universe.method(id)?;
            if method.is_abstract() {
                return Err(abstract_method());
            }
            method
        }
        other => {
            return Err(Failure::Fatal(format!("invokeinterface with {other:?} dispatch")));
        }
    };
    Ok(call.invoke(target))
}

/// Signature polymorphic call through a `MethodHandle`, linked to an adapter
pub fn invokehandle(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F1)?;
    call.receiver()?;
    profile_call(ctx)?;
    let target = call.resolved.method.clone();
    Ok(call.invoke(target))
}

pub fn invokedynamic(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let call = prepare_invoke(ctx, ByteNo::F1)?;
    profile_call(ctx)?;
    let target = call.resolved.method.clone();
    Ok(call.invoke(target))
}

/// Final virtual calls are dispatched inside `invokevirtual`, nothing rewrites to this
pub fn fast_invokevfinal(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    Err(Failure::Fatal(format!(
        "fast_invokevfinal at {} is never generated",
        ctx.bci
    )))
}
