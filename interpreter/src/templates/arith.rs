use bytecode::Bytecode;

use super::{Arg, Flow, unexpected};
use crate::context::InterpreterContext;
use crate::failure::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

fn operation(arg: Arg) -> Result<Operation, Failure> {
    match arg {
        Arg::Op(op) => Ok(op),
        other => Err(unexpected(other)),
    }
}

fn int_op(op: Operation, lhs: i32, rhs: i32) -> Result<i32, Failure> {
    Ok(match op {
        Operation::Add => lhs.wrapping_add(rhs),
        Operation::Sub => lhs.wrapping_sub(rhs),
        Operation::Mul => lhs.wrapping_mul(rhs),
        // MIN / -1 overflows back to MIN, MIN % -1 is 0
        Operation::Div => lhs.wrapping_div(rhs),
        Operation::Rem => lhs.wrapping_rem(rhs),
        Operation::And => lhs & rhs,
        Operation::Or => lhs | rhs,
        Operation::Xor => lhs ^ rhs,
        Operation::Shl => lhs << (rhs & 0x1f),
        Operation::Shr => lhs >> (rhs & 0x1f),
        Operation::Ushr => ((lhs as u32) >> (rhs & 0x1f)) as i32,
    })
}

fn long_op(op: Operation, lhs: i64, rhs: i64) -> Result<i64, Failure> {
    Ok(match op {
        Operation::Add => lhs.wrapping_add(rhs),
        Operation::Sub => lhs.wrapping_sub(rhs),
        Operation::Mul => lhs.wrapping_mul(rhs),
        Operation::Div => lhs.wrapping_div(rhs),
        Operation::Rem => lhs.wrapping_rem(rhs),
        Operation::And => lhs & rhs,
        Operation::Or => lhs | rhs,
        Operation::Xor => lhs ^ rhs,
        Operation::Shl => lhs << (rhs & 0x3f),
        Operation::Shr => lhs >> (rhs & 0x3f),
        Operation::Ushr => ((lhs as u64) >> (rhs & 0x3f)) as i64,
    })
}

fn float_op<T>(op: Operation, lhs: T, rhs: T) -> Result<T, Failure>
where
    T: std::ops::Add<Output = T>
        + std::ops::Sub<Output = T>
        + std::ops::Mul<Output = T>
        + std::ops::Div<Output = T>
        + std::ops::Rem<Output = T>,
{
    Ok(match op {
        Operation::Add => lhs + rhs,
        Operation::Sub => lhs - rhs,
        Operation::Mul => lhs * rhs,
        Operation::Div => lhs / rhs,
        Operation::Rem => lhs % rhs,
        other => return Err(Failure::Fatal(format!("no floating point {other:?}"))),
    })
}

fn is_division(op: Operation) -> bool {
    matches!(op, Operation::Div | Operation::Rem)
}

/// Binary int operation, the right operand is in tos. A failed division
/// leaves it there and the expression stack as it was.
pub fn iop2(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let op = operation(arg)?;
    let rhs = ctx.take_i()?;
    if is_division(op) && rhs == 0 {
        ctx.set_i(rhs);
        return Err(Failure::Arithmetic);
    }
    let lhs = ctx.pop_i()?;
    ctx.set_i(int_op(op, lhs, rhs)?);
    Ok(Flow::Next)
}

pub fn lop2(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let op = operation(arg)?;
    let rhs = ctx.take_l()?;
    if is_division(op) && rhs == 0 {
        ctx.set_l(rhs);
        return Err(Failure::Arithmetic);
    }
    let lhs = ctx.pop_l()?;
    ctx.set_l(long_op(op, lhs, rhs)?);
    Ok(Flow::Next)
}

/// Long shifts take an int shift distance
pub fn lshift(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let op = operation(arg)?;
    let distance = ctx.take_i()?;
    let lhs = ctx.pop_l()?;
    ctx.set_l(long_op(op, lhs, distance as i64)?);
    Ok(Flow::Next)
}

pub fn fop2(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let op = operation(arg)?;
    let rhs = ctx.take_f()?;
    let lhs = ctx.pop_f()?;
    ctx.set_f(float_op(op, lhs, rhs)?);
    Ok(Flow::Next)
}

pub fn dop2(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let op = operation(arg)?;
    let rhs = ctx.take_d()?;
    let lhs = ctx.pop_d()?;
    ctx.set_d(float_op(op, lhs, rhs)?);
    Ok(Flow::Next)
}

pub fn ineg(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.take_i()?;
    ctx.set_i(value.wrapping_neg());
    Ok(Flow::Next)
}

pub fn lneg(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.take_l()?;
    ctx.set_l(value.wrapping_neg());
    Ok(Flow::Next)
}

pub fn fneg(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.take_f()?;
    ctx.set_f(-value);
    Ok(Flow::Next)
}

pub fn dneg(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let value = ctx.take_d()?;
    ctx.set_d(-value);
    Ok(Flow::Next)
}

/// Primitive conversions. Float to integer casts saturate and map NaN to 0.
pub fn convert(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    match ctx.bytecode {
        Bytecode::I2l => {
            let v = ctx.take_i()?;
            ctx.set_l(v as i64);
        }
        Bytecode::I2f => {
            let v = ctx.take_i()?;
            ctx.set_f(v as f32);
        }
        Bytecode::I2d => {
            let v = ctx.take_i()?;
            ctx.set_d(v as f64);
        }
        Bytecode::L2i => {
            let v = ctx.take_l()?;
            ctx.set_i(v as i32);
        }
        Bytecode::L2f => {
            let v = ctx.take_l()?;
            ctx.set_f(v as f32);
        }
        Bytecode::L2d => {
            let v = ctx.take_l()?;
            ctx.set_d(v as f64);
        }
        Bytecode::F2i => {
            let v = ctx.take_f()?;
            ctx.set_i(v as i32);
        }
        Bytecode::F2l => {
            let v = ctx.take_f()?;
            ctx.set_l(v as i64);
        }
        Bytecode::F2d => {
            let v = ctx.take_f()?;
            ctx.set_d(v as f64);
        }
        Bytecode::D2i => {
            let v = ctx.take_d()?;
            ctx.set_i(v as i32);
        }
        Bytecode::D2l => {
            let v = ctx.take_d()?;
            ctx.set_l(v as i64);
        }
        Bytecode::D2f => {
            let v = ctx.take_d()?;
            ctx.set_f(v as f32);
        }
        Bytecode::I2b => {
            let v = ctx.take_i()?;
            ctx.set_i(v as i8 as i32);
        }
        Bytecode::I2c => {
            let v = ctx.take_i()?;
            ctx.set_i(v as u16 as i32);
        }
        Bytecode::I2s => {
            let v = ctx.take_i()?;
            ctx.set_i(v as i16 as i32);
        }
        other => return Err(Failure::Fatal(format!("{other} is not a conversion"))),
    }
    Ok(Flow::Next)
}

pub fn lcmp(ctx: &mut InterpreterContext, _arg: Arg) -> Result<Flow, Failure> {
    let rhs = ctx.take_l()?;
    let lhs = ctx.pop_l()?;
    ctx.set_i(lhs.cmp(&rhs) as i32);
    Ok(Flow::Next)
}

/// `-1`, `0` or `1`; unordered operands give `unordered`
fn compare<T: PartialOrd>(lhs: T, rhs: T, unordered: i32) -> i32 {
    match lhs.partial_cmp(&rhs) {
        Some(ordering) => ordering as i32,
        None => unordered,
    }
}

/// `fcmpl` and `fcmpg`, the argument is the result for NaN operands
pub fn float_cmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Int(unordered) = arg else {
        return Err(unexpected(arg));
    };
    let rhs = ctx.take_f()?;
    let lhs = ctx.pop_f()?;
    ctx.set_i(compare(lhs, rhs, unordered));
    Ok(Flow::Next)
}

pub fn double_cmp(ctx: &mut InterpreterContext, arg: Arg) -> Result<Flow, Failure> {
    let Arg::Int(unordered) = arg else {
        return Err(unexpected(arg));
    };
    let rhs = ctx.take_d()?;
    let lhs = ctx.pop_d()?;
    ctx.set_i(compare(lhs, rhs, unordered));
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_overflow_wraps() {
        assert_eq!(int_op(Operation::Add, i32::MAX, 1).unwrap(), i32::MIN);
        assert_eq!(int_op(Operation::Div, i32::MIN, -1).unwrap(), i32::MIN);
        assert_eq!(int_op(Operation::Rem, i32::MIN, -1).unwrap(), 0);
        assert_eq!(int_op(Operation::Rem, -7, 2).unwrap(), -1);
        assert_eq!(long_op(Operation::Div, i64::MIN, -1).unwrap(), i64::MIN);
    }

    #[test]
    fn shift_distances_are_masked() {
        assert_eq!(int_op(Operation::Shl, 1, 33).unwrap(), 2);
        assert_eq!(int_op(Operation::Shr, -8, 1).unwrap(), -4);
        assert_eq!(int_op(Operation::Ushr, -1, 28).unwrap(), 0xf);
        assert_eq!(int_op(Operation::Ushr, -1, -4).unwrap(), 0xf);
        assert_eq!(long_op(Operation::Shl, 1, 65).unwrap(), 2);
        assert_eq!(long_op(Operation::Ushr, -1, 60).unwrap(), 0xf);
    }

    #[test]
    fn float_remainder_truncates() {
        assert_eq!(float_op(Operation::Rem, 5.5f32, 2.0).unwrap(), 1.5);
        assert_eq!(float_op(Operation::Rem, -5.5f64, 2.0).unwrap(), -1.5);
        assert!(float_op(Operation::Rem, 1.0f64, 0.0).unwrap().is_nan());
        assert!(float_op(Operation::Shl, 1.0f32, 1.0).is_err());
    }

    #[test]
    fn nan_comparisons() {
        assert_eq!(compare(f32::NAN, 1.0, -1), -1);
        assert_eq!(compare(f64::NAN, 1.0, 1), 1);
        assert_eq!(compare(2.0, 1.0, -1), 1);
        assert_eq!(compare(-0.0, 0.0, -1), 0);
    }
}
