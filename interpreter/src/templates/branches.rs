//! Branches, switches, subroutines and returns.
//!
//! Every taken branch goes through [`branch`], which runs the backedge
//! counter protocol for backward jumps and polls for safepoints.
use std::sync::atomic::{Ordering, fence};

use bytecode::Bytecode;
use common::{BasicType, Condition, TosState};
use tracing::debug;

use super::{Arg, Flow, patch_bytecode, profile, unexpected};
use crate::context::InterpreterContext;
use crate::failure::Failure;

/// Interval at which an overflowing profile taken count asks for OSR again
const OVERFLOW_FREQUENCY: u64 = 1024;

fn condition(arg: Arg) -> Result<Condition, Failure> {
    match arg {
        Arg::Cond(cond) => Ok(cond),
        other => Err(unexpected(other)),
    }
}

fn destination(ctx: &InterpreterContext, disp: i32) -> Result<usize, Failure> {
    let target = ctx.bci as i64 + disp as i64;
    let method = ctx.method()?;
    if target < 0 || target as usize >= method.code.len() {
        return Err(Failure::Fatal(format!(
            "branch from {} to {target} leaves {method}",
            ctx.bci
        )));
    }
    Ok(target as usize)
}

/// A taken branch by `disp` bytes from the current bci
fn branch(ctx: &mut InterpreterContext, disp: i32) -> Result<Flow, Failure> {
    let target = destination(ctx, disp)?;
    let vm = ctx.vm.clone();
    let config = &vm.config;
    let method = ctx.method()?;

    let mut taken = 0;
    if config.profile_interpreter
        && let Some(mdo) = method.method_data()
    {
        taken = mdo.profile_taken_branch(ctx.bci)?;
    }

    if disp <= 0 && config.use_loop_counter {
        let backedges = method.counters.increment_backedge();
        let sum = method.counters.invocation_count() + backedges;
        let overflow = if config.profile_interpreter {
            if sum < config.profile_limit {
                false
            } else if method.method_data().is_none() {
                vm.runtime.profile_method(ctx, &method)?;
                false
            } else {
                // the profile count is never reset, only ask every so often
                config.use_on_stack_replacement
                    && taken >= config.backward_branch_limit
                    && taken % OVERFLOW_FREQUENCY == 0
            }
        } else {
            config.use_on_stack_replacement && sum >= config.backward_branch_limit
        };

        if overflow
            && let Some(osr) = vm.runtime.frequency_counter_overflow(ctx, &method, target)?
        {
            if osr.entry_bci() == target && osr.is_in_use() {
                debug!("on-stack replacement of {method} at {target}");
                ctx.bci = target;
                return Ok(Flow::Osr(osr));
            }
            debug!(
                "ignoring compiled code for {method} entered at {}",
                osr.entry_bci()
            );
        }
    }

    fence(Ordering::Acquire);
    vm.safepoint.poll()?;
    Ok(Flow::Jump(target))
}

fn not_taken(ctx: &mut InterpreterContext) -> Result<Flow, Failure> {
    profile(ctx, |mdo, bci| mdo.profile_not_taken_branch(bci))?;
    Ok(Flow::Next)
}

pub fn if_0cmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let cond = condition(arg)?;
    let value = ctx.take_i()?;
    if cond.holds(value, 0) {
        let disp = ctx.s2(1)?;
        return branch(ctx, disp as i32);
    }
    not_taken(ctx)
}

pub fn if_icmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let cond = condition(arg)?;
    let rhs = ctx.take_i()?;
    let lhs = ctx.pop_i()?;
    if cond.holds(lhs, rhs) {
        let disp = ctx.s2(1)?;
        return branch(ctx, disp as i32);
    }
    not_taken(ctx)
}

pub fn if_nullcmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let cond = condition(arg)?;
    let value = ctx.take_a()?;
    if cond.holds(value.address(), 0) {
        let disp = ctx.s2(1)?;
        return branch(ctx, disp as i32);
    }
    not_taken(ctx)
}

pub fn if_acmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let cond = condition(arg)?;
    let rhs = ctx.take_a()?;
    let lhs = ctx.pop_a()?;
    if cond.holds(lhs.address(), rhs.address()) {
        let disp = ctx.s2(1)?;
        return branch(ctx, disp as i32);
    }
    not_taken(ctx)
}

pub fn goto(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let disp = match arg {
        Arg::Wide => ctx.s4(1)?,
        _ => ctx.s2(1)? as i32,
    };
    branch(ctx, disp)
}

/// Pushes the bci after the `jsr` and enters the subroutine. Not a backedge.
pub fn jsr(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let (disp, length) = match arg {
        Arg::Wide => (ctx.s4(1)?, 5),
        _ => (ctx.s2(1)? as i32, 3),
    };
    let target = destination(ctx, disp)?;
    ctx.push_i((ctx.bci + length) as i32)?;
    Ok(Flow::Jump(target))
}

pub fn ret(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let n = match arg {
        Arg::Wide => ctx.u2(2)? as usize,
        _ => ctx.u1(1)? as usize,
    };
    let target = ctx.local_i(n)?;
    profile(ctx, |mdo, bci| mdo.profile_ret(bci, target as usize))?;
    let target = destination(ctx, target - ctx.bci as i32)?;
    Ok(Flow::Jump(target))
}

pub fn tableswitch(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let key = ctx.take_i()?;
    let method = ctx.method()?;
    let table = method.code.table_switch(ctx.bci)?;
    let disp = if key >= table.low && key <= table.high {
        let index = (key as i64 - table.low as i64) as usize;
        profile(ctx, |mdo, bci| mdo.profile_switch_case(bci, index, table.len()))?;
        table.offset(&method.code, index)?
    } else {
        profile(ctx, |mdo, bci| mdo.profile_switch_default(bci))?;
        table.default
    };
    Ok(Flow::Jump(destination(ctx, disp)?))
}

/// Quickens itself by pair count and runs the chosen form
pub fn lookupswitch(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let method = ctx.method()?;
    let pairs = method.code.lookup_switch(ctx.bci)?.npairs;
    if !ctx.vm.config.rewrite_bytecodes {
        return fast_linearswitch(ctx, arg);
    }
    if pairs < ctx.vm.config.binary_switch_threshold {
        patch_bytecode(ctx, Bytecode::FastLinearswitch)?;
        fast_linearswitch(ctx, arg)
    } else {
        patch_bytecode(ctx, Bytecode::FastBinaryswitch)?;
        fast_binaryswitch(ctx, arg)
    }
}

fn switch_to(
    ctx: &mut InterpreterContext,
    matched: Option<(usize, i32)>,
    default: i32,
    cases: usize,
) -> Result<Flow, Failure> {
    let disp = match matched {
        Some((index, disp)) => {
            profile(ctx, |mdo, bci| mdo.profile_switch_case(bci, index, cases))?;
            disp
        }
        None => {
            profile(ctx, |mdo, bci| mdo.profile_switch_default(bci))?;
            default
        }
    };
    Ok(Flow::Jump(destination(ctx, disp)?))
}

pub fn fast_linearswitch(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let key = ctx.take_i()?;
    let method = ctx.method()?;
    let lookup = method.code.lookup_switch(ctx.bci)?;
    let mut matched = None;
    for index in 0..lookup.npairs {
        let (candidate, disp) = lookup.pair(&method.code, index)?;
        if candidate == key {
            matched = Some((index, disp));
            break;
        }
    }
    switch_to(ctx, matched, lookup.default, lookup.npairs)
}

pub fn fast_binaryswitch(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let key = ctx.take_i()?;
    let method = ctx.method()?;
    let lookup = method.code.lookup_switch(ctx.bci)?;
    let found = binary_search(lookup.npairs, key, |index| Ok(lookup.key(&method.code, index)?))?;
    let matched = match found {
        Some(index) => Some((index, lookup.pair(&method.code, index)?.1)),
        None => None,
    };
    switch_to(ctx, matched, lookup.default, lookup.npairs)
}

/// Finds `key` among `len` keys sorted ascending.
///
/// Keeps `a[i] <= key < a[j]` (with `a[len]` taken as infinity) and halves
/// `[i, j)` until it holds a single candidate; only that one is compared for
/// equality.
pub fn binary_search(
    len: usize,
    key: i32,
    key_at: impl Fn(usize) -> Result<i32, Failure>,
) -> Result<Option<usize>, Failure> {
    if len == 0 {
        return Ok(None);
    }
    let (mut i, mut j) = (0, len);
    while i + 1 < j {
        let h = (i + j) / 2;
        if key < key_at(h)? {
            j = h;
        } else {
            i = h;
        }
    }
    Ok((key_at(i)? == key).then_some(i))
}

/// Method exit. The result stays in tos for the caller.
pub fn return_(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::State(state) = arg else {
        return Err(unexpected(arg));
    };
    let method = ctx.method()?;

    if ctx.bytecode == Bytecode::ReturnRegisterFinalizer {
        let receiver = ctx.local_a(0)?;
        let ty = ctx.vm.universe.type_of(ctx.vm.heap.klass(receiver)?)?;
        if ty.has_finalizer {
            let runtime = ctx.runtime();
            runtime.register_finalizer(ctx, receiver)?;
        }
    }
    if ctx.bytecode == Bytecode::Return {
        // constructor stores must be visible before the object escapes
        fence(Ordering::Release);
    }

    if state == TosState::Itos {
        let value = ctx.take_i()?;
        let narrowed = match method.result {
            BasicType::Boolean => value & 1,
            BasicType::Byte => value as i8 as i32,
            BasicType::Char => value as u16 as i32,
            BasicType::Short => value as i16 as i32,
            _ => value,
        };
        ctx.set_i(narrowed);
    }

    ctx.vm.safepoint.poll()?;
    Ok(Flow::Return)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, bound: u64) -> u64 {
            self.next() % bound
        }
    }

    fn search(keys: &[i32], key: i32) -> Option<usize> {
        binary_search(keys.len(), key, |index| Ok(keys[index])).unwrap()
    }

    #[test]
    fn binary_search_edges() {
        assert_eq!(search(&[], 3), None);
        assert_eq!(search(&[3], 3), Some(0));
        assert_eq!(search(&[3], 4), None);
        assert_eq!(search(&[1, 5, 9], 0), None);
        assert_eq!(search(&[1, 5, 9], 9), Some(2));
        assert_eq!(search(&[1, 5, 9], 10), None);
        assert_eq!(search(&[i32::MIN, 0, i32::MAX], i32::MAX), Some(2));
        assert_eq!(search(&[i32::MIN, 0, i32::MAX], i32::MIN), Some(0));
    }

    #[test]
    fn binary_search_agrees_with_linear_scan() {
        let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
        for _ in 0..500 {
            let len = rng.below(40) as usize;
            let mut keys: Vec<i32> = (0..len)
                .map(|_| rng.below(200) as i32 - 100)
                .collect();
            keys.sort_unstable();
            keys.dedup();

            for key in -110..110 {
                let linear = keys.iter().position(|candidate| *candidate == key);
                assert_eq!(search(&keys, key), linear, "{key} in {keys:?}");
            }
        }
    }
}
