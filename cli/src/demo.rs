//! Small programs assembled in memory for the command line to run.
use anyhow::Result;
use bytecode::{Assembler, Bytecode};
use clap::ValueEnum;
use interpreter::cache::{Constant, MemberRef};
use interpreter::universe::{ClassSpec, MethodSpec, Universe, UniverseBuilder, access};

pub const DEMO: &str = "Demo";

const STATIC: u16 = access::PUBLIC | access::STATIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// sum of 0..input in a loop
    Sum,
    /// recursive fibonacci
    Fib,
    /// interface calls on alternating receiver types
    Shapes,
    /// 100 / input, a division by zero is caught
    Divide,
    /// synchronized increments of a static counter
    Counter,
}

impl Demo {
    /// Class, name and descriptor of the method to run
    pub fn entry(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Demo::Sum => (DEMO, "sum", "(I)I"),
            Demo::Fib => (DEMO, "fib", "(I)I"),
            Demo::Shapes => (DEMO, "shapes", "(I)I"),
            Demo::Divide => (DEMO, "divide", "(I)I"),
            Demo::Counter => (DEMO, "count", "(I)V"),
        }
    }
}

fn assemble(emit: impl FnOnce(&mut Assembler) -> Result<()>) -> Result<Vec<u8>> {
    let mut asm = Assembler::new();
    emit(&mut asm)?;
    asm.finish()
}

fn constant(value: i32) -> Result<Vec<u8>> {
    assemble(|asm| {
        asm.iconst(value).op(Bytecode::Ireturn);
        Ok(())
    })
}

fn sum() -> Result<Vec<u8>> {
    assemble(|asm| {
        let (head, done) = (asm.label(), asm.label());
        asm.iconst(0).op(Bytecode::Istore1);
        asm.iconst(0).op(Bytecode::Istore2);
        asm.bind(head)?;
        asm.op(Bytecode::Iload2)
            .op(Bytecode::Iload0)
            .branch(Bytecode::IfIcmpge, done)
            .op(Bytecode::Iload1)
            .op(Bytecode::Iload2)
            .op(Bytecode::Iadd)
            .op(Bytecode::Istore1)
            .iinc(2, 1)
            .branch(Bytecode::Goto, head);
        asm.bind(done)?;
        asm.op(Bytecode::Iload1).op(Bytecode::Ireturn);
        Ok(())
    })
}

fn fib() -> Result<Vec<u8>> {
    assemble(|asm| {
        let recurse = asm.label();
        asm.op(Bytecode::Iload0)
            .iconst(2)
            .branch(Bytecode::IfIcmpge, recurse)
            .op(Bytecode::Iload0)
            .op(Bytecode::Ireturn);
        asm.bind(recurse)?;
        asm.op(Bytecode::Iload0)
            .iconst(1)
            .op(Bytecode::Isub)
            .op_u2(Bytecode::Invokestatic, 1)
            .op(Bytecode::Iload0)
            .iconst(2)
            .op(Bytecode::Isub)
            .op_u2(Bytecode::Invokestatic, 1)
            .op(Bytecode::Iadd)
            .op(Bytecode::Ireturn);
        Ok(())
    })
}

/// Odd iterations call through a `Square`, even ones through a `Rect`
fn shapes() -> Result<Vec<u8>> {
    assemble(|asm| {
        let (head, even, call, done) = (asm.label(), asm.label(), asm.label(), asm.label());
        asm.iconst(0).op(Bytecode::Istore1);
        asm.iconst(0).op(Bytecode::Istore2);
        asm.bind(head)?;
        asm.op(Bytecode::Iload2)
            .op(Bytecode::Iload0)
            .branch(Bytecode::IfIcmpge, done)
            .op(Bytecode::Iload2)
            .iconst(1)
            .op(Bytecode::Iand)
            .branch(Bytecode::Ifeq, even)
            .op_u2(Bytecode::New, 2)
            .branch(Bytecode::Goto, call);
        asm.bind(even)?;
        asm.op_u2(Bytecode::New, 3);
        asm.bind(call)?;
        asm.invokeinterface(4, 1)
            .op(Bytecode::Iload1)
            .op(Bytecode::Iadd)
            .op(Bytecode::Istore1)
            .iinc(2, 1)
            .branch(Bytecode::Goto, head);
        asm.bind(done)?;
        asm.op(Bytecode::Iload1).op(Bytecode::Ireturn);
        Ok(())
    })
}

fn divide() -> Result<Vec<u8>> {
    assemble(|asm| {
        asm.iconst(100)
            .op(Bytecode::Iload0)
            .op(Bytecode::Idiv)
            .op(Bytecode::Ireturn)
            .op(Bytecode::Pop)
            .iconst(0)
            .op(Bytecode::Ireturn);
        Ok(())
    })
}

fn bump() -> Result<Vec<u8>> {
    assemble(|asm| {
        asm.op_u2(Bytecode::Getstatic, 6)
            .iconst(1)
            .op(Bytecode::Iadd)
            .op_u2(Bytecode::Putstatic, 6)
            .op(Bytecode::Return);
        Ok(())
    })
}

fn count() -> Result<Vec<u8>> {
    assemble(|asm| {
        let (head, done) = (asm.label(), asm.label());
        asm.bind(head)?;
        asm.op(Bytecode::Iload0)
            .branch(Bytecode::Ifle, done)
            .op_u2(Bytecode::Invokestatic, 7)
            .iinc(0, -1)
            .branch(Bytecode::Goto, head);
        asm.bind(done)?;
        asm.op(Bytecode::Return);
        Ok(())
    })
}

pub fn universe() -> Result<Universe> {
    let mut builder = UniverseBuilder::new();
    builder
        .class(
            ClassSpec::interface("Shape")
                .method(MethodSpec::new("area", "()I", access::PUBLIC | access::ABSTRACT)),
        )
        .class(
            ClassSpec::new("Rect")
                .implements("Shape")
                .method(MethodSpec::new("area", "()I", access::PUBLIC).code(constant(6)?)),
        )
        .class(
            ClassSpec::new("Square")
                .extends("Rect")
                .method(MethodSpec::new("area", "()I", access::PUBLIC).code(constant(9)?)),
        )
        .class(
            ClassSpec::new(DEMO)
                .field("count", "I", access::STATIC)
                .constants(vec![
                    Constant::Method(MemberRef::new(DEMO, "fib", "(I)I")),
                    Constant::Class("Square".to_string()),
                    Constant::Class("Rect".to_string()),
                    Constant::InterfaceMethod(MemberRef::new("Shape", "area", "()I")),
                    Constant::Class("java/lang/ArithmeticException".to_string()),
                    Constant::Field(MemberRef::new(DEMO, "count", "I")),
                    Constant::Method(MemberRef::new(DEMO, "bump", "()V")),
                ])
                .method(MethodSpec::new("sum", "(I)I", STATIC).code(sum()?).max_locals(3))
                .method(MethodSpec::new("fib", "(I)I", STATIC).code(fib()?))
                .method(MethodSpec::new("shapes", "(I)I", STATIC).code(shapes()?).max_locals(3))
                .method(
                    MethodSpec::new("divide", "(I)I", STATIC)
                        .code(divide()?)
                        .handler(0, 5, 5, 5),
                )
                .method(
                    MethodSpec::new("bump", "()V", STATIC | access::SYNCHRONIZED).code(bump()?),
                )
                .method(MethodSpec::new("count", "(I)V", STATIC).code(count()?)),
        );
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demos_link() {
        let universe = universe().unwrap();
        for demo in Demo::value_variants() {
            let (class, name, descriptor) = demo.entry();
            universe.method_named(class, name, descriptor).unwrap();
        }
    }
}
