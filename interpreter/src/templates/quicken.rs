use bytecode::Bytecode;

use crate::cache::ByteNo;
use crate::context::InterpreterContext;
use crate::failure::Failure;

/// Replaces the executing bytecode with its quickened form `fast`.
///
/// Stores are only quickened once the put half of their cache entry is
/// resolved, a final field written outside its initializer keeps the
/// generic form. A bytecode hidden behind a breakpoint is quickened in the
/// agent's copy instead.
pub fn patch_bytecode(ctx: &mut InterpreterContext, fast: Bytecode) -> Result<(), Failure> {
    if !ctx.vm.config.rewrite_bytecodes {
        return Ok(());
    }

    let method = ctx.method()?;
    let is_fast_put = matches!(
        fast,
        Bytecode::FastAputfield
            | Bytecode::FastBputfield
            | Bytecode::FastZputfield
            | Bytecode::FastCputfield
            | Bytecode::FastDputfield
            | Bytecode::FastFputfield
            | Bytecode::FastIputfield
            | Bytecode::FastLputfield
            | Bytecode::FastSputfield
    );
    if is_fast_put {
        let index = ctx.u2(1)?;
        if method.constants.entry(index)?.bytecode(ByteNo::F2) == 0 {
            return Ok(());
        }
    }

    let current = method.code.bytecode_at(ctx.bci)?;
    if current == Bytecode::Breakpoint {
        if ctx.vm.config.jvmti_hooks {
            let runtime = ctx.runtime();
            let bci = ctx.bci;
            return runtime.set_original_bytecode_at(ctx, &method, bci, fast);
        }
        return Err(Failure::Fatal(format!(
            "breakpoint in {method} at {} without agent hooks",
            ctx.bci
        )));
    }
    if current == fast {
        return Ok(());
    }
    if current.java_code() != fast.java_code() {
        return Err(Failure::Fatal(format!(
            "can not quicken {current} at {} in {method} to {fast}",
            ctx.bci
        )));
    }

    method.code.patch(ctx.bci, fast)?;
    Ok(())
}
