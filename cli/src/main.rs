use anyhow::{Result, anyhow};
use clap::Parser;
use common::Value;
use interpreter::Vm;
use interpreter::config::InterpreterConfig;
use interpreter::interpreter::InterpreterThread;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::demo::Demo;

mod demo;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// program to run
    #[arg(long, value_enum, default_value_t = Demo::Sum)]
    demo: Demo,
    /// integer argument passed to the program
    #[arg(long, default_value_t = 10)]
    input: i32,
    /// threads running the program at the same time
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[arg(long)]
    no_rewrite: bool,
    #[arg(long)]
    no_pair_rewrite: bool,
    #[arg(long)]
    no_profile: bool,
    /// enable the debugging agent hooks
    #[arg(long)]
    jvmti: bool,
    #[arg(long)]
    no_loop_counter: bool,
    #[arg(long)]
    no_osr: bool,
    #[arg(long)]
    no_tlab: bool,
    #[arg(long)]
    zero_tlab: bool,
    #[arg(long)]
    no_shared_alloc: bool,
    #[arg(long)]
    tlab_size: Option<u32>,
    #[arg(long)]
    heap_size: Option<u32>,
    #[arg(long)]
    stack_words: Option<usize>,
    #[arg(long)]
    profile_limit: Option<u64>,
    #[arg(long)]
    backward_branch_limit: Option<u64>,
}

impl Args {
    fn config(&self) -> InterpreterConfig {
        let default = InterpreterConfig::default();
        InterpreterConfig {
            rewrite_bytecodes: !self.no_rewrite,
            rewrite_frequent_pairs: !self.no_pair_rewrite,
            profile_interpreter: !self.no_profile,
            jvmti_hooks: self.jvmti,
            use_loop_counter: !self.no_loop_counter,
            use_on_stack_replacement: !self.no_osr,
            use_tlab: !self.no_tlab,
            zero_tlab: self.zero_tlab,
            allow_shared_alloc: !self.no_shared_alloc,
            tlab_size: self.tlab_size.unwrap_or(default.tlab_size),
            heap_size: self.heap_size.unwrap_or(default.heap_size),
            stack_words: self.stack_words.unwrap_or(default.stack_words),
            profile_limit: self.profile_limit.unwrap_or(default.profile_limit),
            backward_branch_limit: self
                .backward_branch_limit
                .unwrap_or(default.backward_branch_limit),
            ..default
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let vm = Vm::new(args.config(), demo::universe()?)?;
    let (class, name, descriptor) = args.demo.entry();
    let method = vm.universe.method_named(class, name, descriptor)?;

    let handles: Vec<_> = (0..args.threads.max(1))
        .map(|n| {
            let thread = vm.new_thread(&format!("demo-{n}"));
            InterpreterThread::run_with_method(thread, method.clone(), vec![Value::Int(args.input)])
        })
        .collect();
    for handle in handles {
        let result = handle
            .join()
            .map_err(|err| anyhow!("thread error: {err:?}"))??;
        println!("{method} returned {result:?}");
    }

    if args.demo == Demo::Counter {
        let count = vm.static_value(demo::DEMO, "count", "I")?;
        println!("count is {count:?}");
    }
    info!("{} bytes of heap used", vm.heap.used());
    Ok(())
}
