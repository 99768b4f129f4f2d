//! `monitorenter` and `monitorexit` on the lock records of the current frame.
//!
//! A record is [`MONITOR_WORDS`] words: the locked object (0 when free) and
//! the displaced mark word in two halves. Records live between `monitor_top`
//! and `monitor_bot`; growing the area moves the expression stack down.
use common::ObjectRef;
use tracing::debug;

use super::{Arg, Flow, null_check};
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::frame::MONITOR_WORDS;

/// Stores `obj` and its displaced mark into the record at `record`
pub(crate) fn lock_into(
    ctx: &mut InterpreterContext,
    record: usize,
    obj: ObjectRef,
) -> Result<(), Failure> {
    ctx.stack.set(record, obj.address())?;
    let vm = ctx.vm.clone();
    let displaced = vm.synchronizer.lock_object(&vm.heap, obj, ctx.thread_id)?;
    ctx.stack.set(record + 1, displaced as u32)?;
    ctx.stack.set(record + 2, (displaced >> 32) as u32)
}

/// Releases the object held by the record at `record` and frees the record
pub(crate) fn unlock_record(ctx: &mut InterpreterContext, record: usize) -> Result<(), Failure> {
    let obj = ObjectRef::from(ctx.stack.get(record)?);
    ctx.stack.set(record, 0)?;
    let vm = ctx.vm.clone();
    vm.synchronizer.unlock_object(&vm.heap, obj, ctx.thread_id)
}

/// Makes room for one more record just above the expression stack. The
/// record may reach into the guard zone, `monitorenter` checks for that once
/// the object is locked.
fn allocate_record(ctx: &mut InterpreterContext) -> Result<usize, Failure> {
    let sp = ctx.stack.sp();
    let monitor_top = ctx.frame()?.monitor_top;
    ctx.stack.shift_down(sp, monitor_top, MONITOR_WORDS)?;
    ctx.stack.set_sp(sp - MONITOR_WORDS);

    let frame = ctx.frame_mut()?;
    frame.monitor_top -= MONITOR_WORDS;
    let record = frame.monitor_top;
    for word in 0..MONITOR_WORDS {
        ctx.stack.set(record + word, 0)?;
    }
    debug!("new lock record at {record}");
    Ok(record)
}

pub fn monitorenter(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let obj = null_check(ctx.take_a()?)?;

    // nested enters of the same object must use a newer record than the
    // first one, so the search stops at a record holding `obj`
    let mut free = None;
    for record in ctx.frame()?.monitor_records() {
        let held = ObjectRef::from(ctx.stack.get(record)?);
        if held.is_null() {
            free = Some(record);
        } else if held == obj {
            break;
        }
    }

    let record = match free {
        Some(record) => record,
        None => allocate_record(ctx)?,
    };
    lock_into(ctx, record, obj)?;
    // the lock is released again when the overflow unwinds the frame
    ctx.stack.ensure(0)?;
    Ok(Flow::Next)
}

pub fn monitorexit(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let obj = null_check(ctx.take_a()?)?;

    let mut found = None;
    for record in ctx.frame()?.monitor_records() {
        if ObjectRef::from(ctx.stack.get(record)?) == obj {
            found = Some(record);
            break;
        }
    }

    let record = found.ok_or(Failure::IllegalMonitorState)?;
    unlock_record(ctx, record)?;
    Ok(Flow::Next)
}
