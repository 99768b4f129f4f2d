//! Shared setup for the unit tests: tracing, universes and method calls.
use std::sync::Arc;

use bytecode::Assembler;
use common::Value;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::Vm;
use crate::barrier::{BarrierSet, CardTableBarrier};
use crate::config::InterpreterConfig;
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::runtime::DefaultRuntime;
use crate::universe::{ClassSpec, UniverseBuilder};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

pub fn vm(classes: Vec<ClassSpec>) -> Arc<Vm> {
    vm_with(InterpreterConfig::default(), classes)
}

pub fn vm_with(config: InterpreterConfig, classes: Vec<ClassSpec>) -> Arc<Vm> {
    vm_with_runtime(config, Arc::new(DefaultRuntime::new()), classes)
}

/// A vm whose runtime the test keeps a handle to, for breakpoints and events
pub fn vm_with_runtime(
    config: InterpreterConfig,
    runtime: Arc<DefaultRuntime>,
    classes: Vec<ClassSpec>,
) -> Arc<Vm> {
    let barrier = Arc::new(CardTableBarrier::new(config.heap_size));
    vm_with_parts(config, runtime, barrier, classes)
}

pub fn vm_with_parts(
    config: InterpreterConfig,
    runtime: Arc<DefaultRuntime>,
    barrier: Arc<dyn BarrierSet>,
    classes: Vec<ClassSpec>,
) -> Arc<Vm> {
    init_tracing();
    let mut builder = UniverseBuilder::new();
    for class in classes {
        builder.class(class);
    }
    Vm::with_parts(config, builder.build().unwrap(), runtime, barrier).unwrap()
}

pub fn context(vm: &Arc<Vm>) -> InterpreterContext {
    InterpreterContext::new(vm.clone(), vm.next_thread_id())
}

pub fn call(
    vm: &Arc<Vm>,
    class: &str,
    name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Option<Value>, Failure> {
    let method = vm.universe.method_named(class, name, descriptor).unwrap();
    context(vm).call(&method, args)
}

pub fn code(emit: impl FnOnce(&mut Assembler)) -> Vec<u8> {
    let mut asm = Assembler::new();
    emit(&mut asm);
    asm.finish().unwrap()
}
