use tracing::trace;

use super::{Arg, Flow};
use crate::context::InterpreterContext;
use crate::failure::Failure;

/// Runs the wide form of the following bytecode. The bci stays on the prefix,
/// the wide templates read their operands relative to it.
pub fn wide(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let bytecode = ctx.bytecode_at(1)?;
    let vm = ctx.vm.clone();
    let template = vm.templates.wide_template(bytecode)?;
    ctx.transition(template.tos_in)?;
    template.generate(ctx)
}

/// Reports the breakpoint to the agent, then executes the bytecode it replaced
pub fn breakpoint(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let (method, bci) = (ctx.method()?, ctx.bci);
    let runtime = ctx.runtime();
    let original = runtime.get_original_bytecode_at(ctx, &method, bci)?;
    runtime.post_breakpoint(ctx, &method, bci)?;
    trace!("breakpoint in {method} at {bci} over {original}");

    ctx.bytecode = original;
    let vm = ctx.vm.clone();
    let template = vm.templates.template(original)?;
    ctx.transition(template.tos_in)?;
    template.generate(ctx)
}

pub fn shouldnotreachhere(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    Err(Failure::Fatal(format!(
        "{} at {} should not be reached",
        ctx.bytecode, ctx.bci
    )))
}
