//! One handler per opcode.
//!
//! Every [`Template`] declares the tos state it expects on entry and the one
//! it leaves behind; the driver moves the cached value into `tos_in` before
//! running the generator. Handlers report what happens next through [`Flow`],
//! failures are returned as `Err` and end up on the shared exception path.
use std::sync::Arc;

use bytecode::Bytecode;
use common::{BasicType, Condition, ObjectRef, TosState};

use crate::cache::ByteNo;
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::frame::ReturnEntry;
use crate::profile::MethodData;
use crate::runtime::OsrMethod;
use crate::universe::Method;

mod alloc;
mod arith;
mod arrays;
mod branches;
mod constants;
mod fields;
mod invoke;
mod locals;
mod misc;
mod monitors;
mod quicken;
mod stack_ops;

pub use arith::Operation;
pub use branches::binary_search;
pub(crate) use monitors::{lock_into, unlock_record};
pub use quicken::patch_bytecode;

pub mod flags {
    /// Reads operands from the bytecode stream
    pub const UBCP: u8 = 1;
    /// Decides the next bci itself instead of falling through
    pub const DISP: u8 = 2;
    /// Can call into the runtime
    pub const CLVM: u8 = 4;
    /// Registered in the wide table
    pub const ISWD: u8 = 8;
}

/// Constant parameter a generator is registered with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    None,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Fixed local index of the `_n` forms
    Local(usize),
    /// The `wide` form with 16-bit operands
    Wide,
    Kind(BasicType),
    Cond(Condition),
    Op(Operation),
    State(TosState),
}

/// A call prepared by an invoke template, arguments already on the stack
#[derive(Debug, Clone)]
pub struct Invocation {
    pub method: Arc<Method>,
    pub return_entry: ReturnEntry,
}

#[derive(Debug, Clone)]
pub enum Flow {
    /// Fall through to the following instruction
    Next,
    Jump(usize),
    Invoke(Invocation),
    /// Leave the activation, the result is in tos
    Return,
    /// Continue the activation in compiled code
    Osr(Arc<dyn OsrMethod>),
}

pub type Generator = fn(&mut InterpreterContext, Arg) -> Result<Flow, Failure>;

#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub bytecode: Bytecode,
    pub flags: u8,
    pub tos_in: TosState,
    pub tos_out: TosState,
    generator: Generator,
    arg: Arg,
}

impl Template {
    pub fn uses_bcp(&self) -> bool {
        self.flags & flags::UBCP != 0
    }

    pub fn does_dispatch(&self) -> bool {
        self.flags & flags::DISP != 0
    }

    pub fn calls_vm(&self) -> bool {
        self.flags & flags::CLVM != 0
    }

    pub fn is_wide(&self) -> bool {
        self.flags & flags::ISWD != 0
    }

    pub fn generate(&self, ctx: &mut InterpreterContext) -> Result<Flow, Failure> {
        (self.generator)(ctx, self.arg)
    }
}

/// Templates indexed by opcode, plus the forms that follow a `wide` prefix
#[derive(Debug)]
pub struct TemplateTable {
    normal: [Option<Template>; 256],
    wide: [Option<Template>; 256],
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateTable {
    pub fn template(&self, bytecode: Bytecode) -> Result<&Template, Failure> {
        self.normal[bytecode as usize]
            .as_ref()
            .ok_or_else(|| Failure::Fatal(format!("no template for {bytecode}")))
    }

    pub fn wide_template(&self, bytecode: Bytecode) -> Result<&Template, Failure> {
        self.wide[bytecode as usize]
            .as_ref()
            .ok_or_else(|| Failure::Fatal(format!("no wide template for {bytecode}")))
    }

    fn def(
        &mut self,
        bytecode: Bytecode,
        flags: u8,
        tos_in: TosState,
        tos_out: TosState,
        generator: Generator,
        arg: Arg,
    ) {
        let template = Template {
            bytecode,
            flags,
            tos_in,
            tos_out,
            generator,
            arg,
        };
        let table = if flags & flags::ISWD != 0 {
            &mut self.wide
        } else {
            &mut self.normal
        };
        table[bytecode as usize] = Some(template);
    }

    pub fn new() -> Self {
        use Bytecode as B;
        use TosState::{Atos as A, Dtos as D, Ftos as F, Itos as I, Ltos as L, Vtos as V};
        use flags::{CLVM, DISP, ISWD, UBCP};

        let mut t = Self {
            normal: [None; 256],
            wide: [None; 256],
        };
        let ____ = 0;

        // constants
        t.def(B::Nop, ____, V, V, constants::nop, Arg::None);
        t.def(B::AconstNull, ____, V, A, constants::aconst_null, Arg::None);
        t.def(B::IconstM1, ____, V, I, constants::iconst, Arg::Int(-1));
        t.def(B::Iconst0, ____, V, I, constants::iconst, Arg::Int(0));
        t.def(B::Iconst1, ____, V, I, constants::iconst, Arg::Int(1));
        t.def(B::Iconst2, ____, V, I, constants::iconst, Arg::Int(2));
        t.def(B::Iconst3, ____, V, I, constants::iconst, Arg::Int(3));
        t.def(B::Iconst4, ____, V, I, constants::iconst, Arg::Int(4));
        t.def(B::Iconst5, ____, V, I, constants::iconst, Arg::Int(5));
        t.def(B::Lconst0, ____, V, L, constants::lconst, Arg::Long(0));
        t.def(B::Lconst1, ____, V, L, constants::lconst, Arg::Long(1));
        t.def(B::Fconst0, ____, V, F, constants::fconst, Arg::Float(0.0));
        t.def(B::Fconst1, ____, V, F, constants::fconst, Arg::Float(1.0));
        t.def(B::Fconst2, ____, V, F, constants::fconst, Arg::Float(2.0));
        t.def(B::Dconst0, ____, V, D, constants::dconst, Arg::Double(0.0));
        t.def(B::Dconst1, ____, V, D, constants::dconst, Arg::Double(1.0));
        t.def(B::Bipush, UBCP, V, I, constants::bipush, Arg::None);
        t.def(B::Sipush, UBCP, V, I, constants::sipush, Arg::None);
        t.def(B::Ldc, UBCP | CLVM, V, V, constants::ldc, Arg::None);
        t.def(B::LdcW, UBCP | CLVM, V, V, constants::ldc, Arg::Wide);
        t.def(B::Ldc2W, UBCP, V, V, constants::ldc2_w, Arg::None);
        t.def(B::FastAldc, UBCP | CLVM, V, A, constants::fast_aldc, Arg::None);
        t.def(B::FastAldcW, UBCP | CLVM, V, A, constants::fast_aldc, Arg::Wide);

        // loads
        t.def(B::Iload, UBCP | CLVM, V, I, locals::iload, Arg::None);
        t.def(B::Lload, UBCP, V, L, locals::lload, Arg::None);
        t.def(B::Fload, UBCP, V, F, locals::fload, Arg::None);
        t.def(B::Dload, UBCP, V, D, locals::dload, Arg::None);
        t.def(B::Aload, UBCP, V, A, locals::aload, Arg::None);
        let numbered = [
            (B::Iload0, B::Lload0, B::Fload0, B::Dload0, B::Aload0),
            (B::Iload1, B::Lload1, B::Fload1, B::Dload1, B::Aload1),
            (B::Iload2, B::Lload2, B::Fload2, B::Dload2, B::Aload2),
            (B::Iload3, B::Lload3, B::Fload3, B::Dload3, B::Aload3),
        ];
        for (n, (iload, lload, fload, dload, aload)) in numbered.into_iter().enumerate() {
            t.def(iload, ____, V, I, locals::iload, Arg::Local(n));
            t.def(lload, ____, V, L, locals::lload, Arg::Local(n));
            t.def(fload, ____, V, F, locals::fload, Arg::Local(n));
            t.def(dload, ____, V, D, locals::dload, Arg::Local(n));
            if n > 0 {
                t.def(aload, ____, V, A, locals::aload, Arg::Local(n));
            }
        }
        t.def(B::Aload0, UBCP | CLVM, V, A, locals::aload_0, Arg::None);
        t.def(B::FastAload0, ____, V, A, locals::aload, Arg::Local(0));
        t.def(B::FastIload, UBCP, V, I, locals::fast_iload, Arg::None);
        t.def(B::FastIload2, UBCP, V, I, locals::fast_iload2, Arg::None);
        t.def(B::FastIcaload, UBCP, V, I, locals::fast_icaload, Arg::None);

        t.def(B::Iaload, ____, I, I, arrays::load, Arg::Kind(BasicType::Int));
        t.def(B::Laload, ____, I, L, arrays::load, Arg::Kind(BasicType::Long));
        t.def(B::Faload, ____, I, F, arrays::load, Arg::Kind(BasicType::Float));
        t.def(B::Daload, ____, I, D, arrays::load, Arg::Kind(BasicType::Double));
        t.def(B::Aaload, ____, I, A, arrays::load, Arg::Kind(BasicType::Object));
        t.def(B::Baload, ____, I, I, arrays::load, Arg::Kind(BasicType::Byte));
        t.def(B::Caload, ____, I, I, arrays::load, Arg::Kind(BasicType::Char));
        t.def(B::Saload, ____, I, I, arrays::load, Arg::Kind(BasicType::Short));

        // stores
        t.def(B::Istore, UBCP, I, V, locals::istore, Arg::None);
        t.def(B::Lstore, UBCP, L, V, locals::lstore, Arg::None);
        t.def(B::Fstore, UBCP, F, V, locals::fstore, Arg::None);
        t.def(B::Dstore, UBCP, D, V, locals::dstore, Arg::None);
        t.def(B::Astore, UBCP, V, V, locals::astore, Arg::None);
        let numbered = [
            (B::Istore0, B::Lstore0, B::Fstore0, B::Dstore0, B::Astore0),
            (B::Istore1, B::Lstore1, B::Fstore1, B::Dstore1, B::Astore1),
            (B::Istore2, B::Lstore2, B::Fstore2, B::Dstore2, B::Astore2),
            (B::Istore3, B::Lstore3, B::Fstore3, B::Dstore3, B::Astore3),
        ];
        for (n, (istore, lstore, fstore, dstore, astore)) in numbered.into_iter().enumerate() {
            t.def(istore, ____, I, V, locals::istore, Arg::Local(n));
            t.def(lstore, ____, L, V, locals::lstore, Arg::Local(n));
            t.def(fstore, ____, F, V, locals::fstore, Arg::Local(n));
            t.def(dstore, ____, D, V, locals::dstore, Arg::Local(n));
            t.def(astore, ____, V, V, locals::astore, Arg::Local(n));
        }

        t.def(B::Iastore, ____, I, V, arrays::store, Arg::Kind(BasicType::Int));
        t.def(B::Lastore, ____, L, V, arrays::store, Arg::Kind(BasicType::Long));
        t.def(B::Fastore, ____, F, V, arrays::store, Arg::Kind(BasicType::Float));
        t.def(B::Dastore, ____, D, V, arrays::store, Arg::Kind(BasicType::Double));
        t.def(B::Aastore, CLVM, V, V, arrays::aastore, Arg::None);
        t.def(B::Bastore, ____, I, V, arrays::store, Arg::Kind(BasicType::Byte));
        t.def(B::Castore, ____, I, V, arrays::store, Arg::Kind(BasicType::Char));
        t.def(B::Sastore, ____, I, V, arrays::store, Arg::Kind(BasicType::Short));

        // stack
        t.def(B::Pop, ____, V, V, stack_ops::pop, Arg::None);
        t.def(B::Pop2, ____, V, V, stack_ops::pop2, Arg::None);
        t.def(B::Dup, ____, V, V, stack_ops::dup, Arg::None);
        t.def(B::DupX1, ____, V, V, stack_ops::dup_x1, Arg::None);
        t.def(B::DupX2, ____, V, V, stack_ops::dup_x2, Arg::None);
        t.def(B::Dup2, ____, V, V, stack_ops::dup2, Arg::None);
        t.def(B::Dup2X1, ____, V, V, stack_ops::dup2_x1, Arg::None);
        t.def(B::Dup2X2, ____, V, V, stack_ops::dup2_x2, Arg::None);
        t.def(B::Swap, ____, V, V, stack_ops::swap, Arg::None);

        // arithmetic
        let int_ops = [
            (B::Iadd, Operation::Add),
            (B::Isub, Operation::Sub),
            (B::Imul, Operation::Mul),
            (B::Idiv, Operation::Div),
            (B::Irem, Operation::Rem),
            (B::Iand, Operation::And),
            (B::Ior, Operation::Or),
            (B::Ixor, Operation::Xor),
            (B::Ishl, Operation::Shl),
            (B::Ishr, Operation::Shr),
            (B::Iushr, Operation::Ushr),
        ];
        for (bytecode, op) in int_ops {
            t.def(bytecode, ____, I, I, arith::iop2, Arg::Op(op));
        }
        let long_ops = [
            (B::Ladd, Operation::Add),
            (B::Lsub, Operation::Sub),
            (B::Lmul, Operation::Mul),
            (B::Ldiv, Operation::Div),
            (B::Lrem, Operation::Rem),
            (B::Land, Operation::And),
            (B::Lor, Operation::Or),
            (B::Lxor, Operation::Xor),
        ];
        for (bytecode, op) in long_ops {
            t.def(bytecode, ____, L, L, arith::lop2, Arg::Op(op));
        }
        t.def(B::Lshl, ____, I, L, arith::lshift, Arg::Op(Operation::Shl));
        t.def(B::Lshr, ____, I, L, arith::lshift, Arg::Op(Operation::Shr));
        t.def(B::Lushr, ____, I, L, arith::lshift, Arg::Op(Operation::Ushr));
        let float_ops = [
            (B::Fadd, B::Dadd, Operation::Add),
            (B::Fsub, B::Dsub, Operation::Sub),
            (B::Fmul, B::Dmul, Operation::Mul),
            (B::Fdiv, B::Ddiv, Operation::Div),
            (B::Frem, B::Drem, Operation::Rem),
        ];
        for (float, double, op) in float_ops {
            t.def(float, ____, F, F, arith::fop2, Arg::Op(op));
            t.def(double, ____, D, D, arith::dop2, Arg::Op(op));
        }
        t.def(B::Ineg, ____, I, I, arith::ineg, Arg::None);
        t.def(B::Lneg, ____, L, L, arith::lneg, Arg::None);
        t.def(B::Fneg, ____, F, F, arith::fneg, Arg::None);
        t.def(B::Dneg, ____, D, D, arith::dneg, Arg::None);
        t.def(B::Iinc, UBCP, V, V, locals::iinc, Arg::None);

        // conversions
        t.def(B::I2l, ____, I, L, arith::convert, Arg::None);
        t.def(B::I2f, ____, I, F, arith::convert, Arg::None);
        t.def(B::I2d, ____, I, D, arith::convert, Arg::None);
        t.def(B::L2i, ____, L, I, arith::convert, Arg::None);
        t.def(B::L2f, ____, L, F, arith::convert, Arg::None);
        t.def(B::L2d, ____, L, D, arith::convert, Arg::None);
        t.def(B::F2i, ____, F, I, arith::convert, Arg::None);
        t.def(B::F2l, ____, F, L, arith::convert, Arg::None);
        t.def(B::F2d, ____, F, D, arith::convert, Arg::None);
        t.def(B::D2i, ____, D, I, arith::convert, Arg::None);
        t.def(B::D2l, ____, D, L, arith::convert, Arg::None);
        t.def(B::D2f, ____, D, F, arith::convert, Arg::None);
        t.def(B::I2b, ____, I, I, arith::convert, Arg::None);
        t.def(B::I2c, ____, I, I, arith::convert, Arg::None);
        t.def(B::I2s, ____, I, I, arith::convert, Arg::None);

        // comparisons
        t.def(B::Lcmp, ____, L, I, arith::lcmp, Arg::None);
        t.def(B::Fcmpl, ____, F, I, arith::float_cmp, Arg::Int(-1));
        t.def(B::Fcmpg, ____, F, I, arith::float_cmp, Arg::Int(1));
        t.def(B::Dcmpl, ____, D, I, arith::double_cmp, Arg::Int(-1));
        t.def(B::Dcmpg, ____, D, I, arith::double_cmp, Arg::Int(1));

        // branches
        let conditions = [
            (B::Ifeq, B::IfIcmpeq, Condition::Equal),
            (B::Ifne, B::IfIcmpne, Condition::NotEqual),
            (B::Iflt, B::IfIcmplt, Condition::Less),
            (B::Ifge, B::IfIcmpge, Condition::GreaterEqual),
            (B::Ifgt, B::IfIcmpgt, Condition::Greater),
            (B::Ifle, B::IfIcmple, Condition::LessEqual),
        ];
        for (zero, icmp, cond) in conditions {
            t.def(zero, UBCP | CLVM, I, V, branches::if_0cmp, Arg::Cond(cond));
            t.def(icmp, UBCP | CLVM, I, V, branches::if_icmp, Arg::Cond(cond));
        }
        t.def(B::IfAcmpeq, UBCP | CLVM, A, V, branches::if_acmp, Arg::Cond(Condition::Equal));
        t.def(B::IfAcmpne, UBCP | CLVM, A, V, branches::if_acmp, Arg::Cond(Condition::NotEqual));
        t.def(B::Ifnull, UBCP | CLVM, A, V, branches::if_nullcmp, Arg::Cond(Condition::Equal));
        t.def(B::Ifnonnull, UBCP | CLVM, A, V, branches::if_nullcmp, Arg::Cond(Condition::NotEqual));
        t.def(B::Goto, UBCP | DISP | CLVM, V, V, branches::goto, Arg::None);
        t.def(B::GotoW, UBCP | DISP | CLVM, V, V, branches::goto, Arg::Wide);
        t.def(B::Jsr, UBCP | DISP, V, V, branches::jsr, Arg::None);
        t.def(B::JsrW, UBCP | DISP, V, V, branches::jsr, Arg::Wide);
        t.def(B::Ret, UBCP | DISP, V, V, branches::ret, Arg::None);
        t.def(B::Tableswitch, UBCP | DISP, I, V, branches::tableswitch, Arg::None);
        t.def(B::Lookupswitch, UBCP | DISP, I, V, branches::lookupswitch, Arg::None);
        t.def(B::FastLinearswitch, UBCP | DISP, I, V, branches::fast_linearswitch, Arg::None);
        t.def(B::FastBinaryswitch, UBCP | DISP, I, V, branches::fast_binaryswitch, Arg::None);

        // returns
        t.def(B::Ireturn, DISP, I, I, branches::return_, Arg::State(I));
        t.def(B::Lreturn, DISP, L, L, branches::return_, Arg::State(L));
        t.def(B::Freturn, DISP, F, F, branches::return_, Arg::State(F));
        t.def(B::Dreturn, DISP, D, D, branches::return_, Arg::State(D));
        t.def(B::Areturn, DISP, A, A, branches::return_, Arg::State(A));
        t.def(B::Return, DISP, V, V, branches::return_, Arg::State(V));
        t.def(B::ReturnRegisterFinalizer, CLVM | DISP, V, V, branches::return_, Arg::State(V));

        // fields
        t.def(B::Getstatic, UBCP | CLVM, V, V, fields::getstatic, Arg::None);
        t.def(B::Putstatic, UBCP | CLVM, V, V, fields::putstatic, Arg::None);
        t.def(B::Getfield, UBCP | CLVM, V, V, fields::getfield, Arg::None);
        t.def(B::Putfield, UBCP | CLVM, V, V, fields::putfield, Arg::None);
        let fast_fields = [
            (Some(B::FastAgetfield), B::FastAputfield, BasicType::Object, A),
            (Some(B::FastBgetfield), B::FastBputfield, BasicType::Byte, I),
            (None, B::FastZputfield, BasicType::Boolean, I),
            (Some(B::FastCgetfield), B::FastCputfield, BasicType::Char, I),
            (Some(B::FastDgetfield), B::FastDputfield, BasicType::Double, D),
            (Some(B::FastFgetfield), B::FastFputfield, BasicType::Float, F),
            (Some(B::FastIgetfield), B::FastIputfield, BasicType::Int, I),
            (Some(B::FastLgetfield), B::FastLputfield, BasicType::Long, L),
            (Some(B::FastSgetfield), B::FastSputfield, BasicType::Short, I),
        ];
        for (get, put, kind, state) in fast_fields {
            if let Some(get) = get {
                t.def(get, UBCP | CLVM, A, state, fields::fast_accessfield, Arg::Kind(kind));
            }
            t.def(put, UBCP | CLVM, state, V, fields::fast_storefield, Arg::Kind(kind));
        }
        t.def(B::FastIaccess0, UBCP | CLVM, V, I, fields::fast_xaccess, Arg::Kind(BasicType::Int));
        t.def(B::FastAaccess0, UBCP | CLVM, V, A, fields::fast_xaccess, Arg::Kind(BasicType::Object));
        t.def(B::FastFaccess0, UBCP | CLVM, V, F, fields::fast_xaccess, Arg::Kind(BasicType::Float));

        // invokes
        t.def(B::Invokevirtual, UBCP | DISP | CLVM, V, V, invoke::invokevirtual, Arg::None);
        t.def(B::Invokespecial, UBCP | DISP | CLVM, V, V, invoke::invokespecial, Arg::None);
        t.def(B::Invokestatic, UBCP | DISP | CLVM, V, V, invoke::invokestatic, Arg::None);
        t.def(B::Invokeinterface, UBCP | DISP | CLVM, V, V, invoke::invokeinterface, Arg::None);
        t.def(B::Invokedynamic, UBCP | DISP | CLVM, V, V, invoke::invokedynamic, Arg::None);
        t.def(B::Invokehandle, UBCP | DISP | CLVM, V, V, invoke::invokehandle, Arg::None);
        t.def(B::FastInvokevfinal, UBCP | DISP | CLVM, V, V, invoke::fast_invokevfinal, Arg::None);

        // objects
        t.def(B::New, UBCP | CLVM, V, A, alloc::new, Arg::None);
        t.def(B::Newarray, UBCP | CLVM, I, A, alloc::newarray, Arg::None);
        t.def(B::Anewarray, UBCP | CLVM, I, A, alloc::anewarray, Arg::None);
        t.def(B::Multianewarray, UBCP | CLVM, V, A, alloc::multianewarray, Arg::None);
        t.def(B::Arraylength, ____, A, I, arrays::arraylength, Arg::None);
        t.def(B::Athrow, DISP, A, V, alloc::athrow, Arg::None);
        t.def(B::Checkcast, UBCP | CLVM, A, A, alloc::checkcast, Arg::None);
        t.def(B::Instanceof, UBCP | CLVM, A, I, alloc::instanceof, Arg::None);
        t.def(B::Monitorenter, CLVM, A, V, monitors::monitorenter, Arg::None);
        t.def(B::Monitorexit, CLVM, A, V, monitors::monitorexit, Arg::None);

        t.def(B::Wide, UBCP | DISP, V, V, misc::wide, Arg::None);
        t.def(B::Breakpoint, UBCP | DISP | CLVM, V, V, misc::breakpoint, Arg::None);
        t.def(B::Shouldnotreachhere, ____, V, V, misc::shouldnotreachhere, Arg::None);

        // wide forms
        t.def(B::Iload, UBCP | ISWD, V, I, locals::iload, Arg::Wide);
        t.def(B::Lload, UBCP | ISWD, V, L, locals::lload, Arg::Wide);
        t.def(B::Fload, UBCP | ISWD, V, F, locals::fload, Arg::Wide);
        t.def(B::Dload, UBCP | ISWD, V, D, locals::dload, Arg::Wide);
        t.def(B::Aload, UBCP | ISWD, V, A, locals::aload, Arg::Wide);
        t.def(B::Istore, UBCP | ISWD, I, V, locals::istore, Arg::Wide);
        t.def(B::Lstore, UBCP | ISWD, L, V, locals::lstore, Arg::Wide);
        t.def(B::Fstore, UBCP | ISWD, F, V, locals::fstore, Arg::Wide);
        t.def(B::Dstore, UBCP | ISWD, D, V, locals::dstore, Arg::Wide);
        t.def(B::Astore, UBCP | ISWD, V, V, locals::astore, Arg::Wide);
        t.def(B::Iinc, UBCP | ISWD, V, V, locals::iinc, Arg::Wide);
        t.def(B::Ret, UBCP | ISWD | DISP, V, V, branches::ret, Arg::Wide);

        t
    }
}

/// Makes sure the cache entry named by the operand at bci + 1 is resolved for
/// the executing bytecode and returns the method whose pool holds it, with the index
pub fn resolve_cache_and_index(
    ctx: &mut InterpreterContext,
    byte_no: ByteNo,
) -> Result<(Arc<Method>, u16), Failure> {
    let method = ctx.method()?;
    let index = ctx.u2(1)?;
    let bytecode = ctx.bytecode;
    let pool = &method.constants;
    let entry = pool.entry(index)?;
    if entry.bytecode(byte_no) == bytecode as u8 {
        return Ok((method.clone(), index));
    }
    if let Some(failure) = entry.error() {
        return Err(failure.clone());
    }

    let runtime = ctx.runtime();
    match bytecode {
        Bytecode::Getstatic | Bytecode::Putstatic | Bytecode::Getfield | Bytecode::Putfield => {
            runtime.resolve_get_put(ctx, bytecode, pool, index)?
        }
        Bytecode::Invokevirtual
        | Bytecode::Invokespecial
        | Bytecode::Invokestatic
        | Bytecode::Invokeinterface => runtime.resolve_invoke(ctx, bytecode, pool, index)?,
        Bytecode::Invokehandle => runtime.resolve_invokehandle(ctx, pool, index)?,
        Bytecode::Invokedynamic => runtime.resolve_invokedynamic(ctx, pool, index)?,
        other => {
            return Err(Failure::Fatal(format!("unexpected bytecode {other} in cache resolution")));
        }
    }
    Ok((method.clone(), index))
}

pub(crate) fn null_check(obj: ObjectRef) -> Result<ObjectRef, Failure> {
    if obj.is_null() {
        return Err(Failure::NullReference);
    }
    Ok(obj)
}

pub(crate) fn unexpected(arg: Arg) -> Failure {
    Failure::Fatal(format!("unexpected template argument {arg:?}"))
}

/// Runs `update` against the profile of the executing method at the current
/// bci, if interpreter profiling is on and the method is being profiled
pub(crate) fn profile(
    ctx: &InterpreterContext,
    update: impl FnOnce(&MethodData, usize) -> Result<(), Failure>,
) -> Result<(), Failure> {
    if !ctx.vm.config.profile_interpreter {
        return Ok(());
    }
    let method = ctx.method()?;
    match method.method_data() {
        Some(mdo) => update(mdo, ctx.bci),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_has_a_template() {
        let table = TemplateTable::new();
        for bytecode in Bytecode::ALL {
            let template = table.template(*bytecode).unwrap();
            assert_eq!(template.bytecode, *bytecode);
            assert!(!template.is_wide());
        }
    }

    #[test]
    fn wide_forms() {
        let table = TemplateTable::new();
        for bytecode in Bytecode::ALL {
            assert_eq!(
                table.wide_template(*bytecode).is_ok(),
                bytecode.wide_length().is_some(),
                "{bytecode}"
            );
        }
        assert!(table.wide_template(Bytecode::Iinc).unwrap().is_wide());
    }

    #[test]
    fn tos_states() {
        let table = TemplateTable::new();
        let check = |bytecode, tos_in, tos_out| {
            let template = table.template(bytecode).unwrap();
            assert_eq!((template.tos_in, template.tos_out), (tos_in, tos_out), "{bytecode}");
        };
        check(Bytecode::Iload, TosState::Vtos, TosState::Itos);
        check(Bytecode::Astore, TosState::Vtos, TosState::Vtos);
        check(Bytecode::Lshl, TosState::Itos, TosState::Ltos);
        check(Bytecode::Aastore, TosState::Vtos, TosState::Vtos);
        check(Bytecode::FastLgetfield, TosState::Atos, TosState::Ltos);
        check(Bytecode::FastZputfield, TosState::Itos, TosState::Vtos);
        check(Bytecode::Getfield, TosState::Vtos, TosState::Vtos);
        check(Bytecode::Checkcast, TosState::Atos, TosState::Atos);
        check(Bytecode::Instanceof, TosState::Atos, TosState::Itos);
        check(Bytecode::Newarray, TosState::Itos, TosState::Atos);
    }

    #[test]
    fn flags() {
        let table = TemplateTable::new();
        let invoke = table.template(Bytecode::Invokeinterface).unwrap();
        assert!(invoke.uses_bcp() && invoke.does_dispatch() && invoke.calls_vm());
        let iadd = table.template(Bytecode::Iadd).unwrap();
        assert!(!iadd.uses_bcp() && !iadd.does_dispatch() && !iadd.calls_vm());
        assert!(table.template(Bytecode::Tableswitch).unwrap().does_dispatch());
        for bytecode in [Bytecode::Monitorenter, Bytecode::Monitorexit] {
            let monitor = table.template(bytecode).unwrap();
            assert!(monitor.calls_vm() && !monitor.does_dispatch(), "{bytecode}");
        }
    }
}
