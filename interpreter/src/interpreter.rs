//! The dispatch loop: fetch, move tos into the template's input state, run
//! the template and act on the [`Flow`] it reports.
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use bytecode::Bytecode;
use common::{ObjectRef, Value};
use tracing::{debug, error, info, instrument, trace};

use crate::Vm;
use crate::context::{InterpreterContext, Tos};
use crate::failure::Failure;
use crate::frame::{Frame, MONITOR_WORDS, ReturnEntry};
use crate::runtime::OsrMethod;
use crate::templates::{Flow, Invocation, lock_into, unlock_record};
use crate::universe::Method;

enum Step {
    Continue,
    /// The entry frame of the current call returned
    Exit(Option<Value>),
}

impl InterpreterContext {
    /// Runs `method` with `args` until it returns. Calls nest: the runtime
    /// uses this to run class initializers in the middle of a bytecode.
    pub fn call(&mut self, method: &Arc<Method>, args: &[Value]) -> Result<Option<Value>, Failure> {
        let saved = (self.tos, self.bytecode, self.bci);
        let sp = self.stack.sp();
        let depth = self.frames.len();
        self.tos = Tos::Vtos;

        let result = self.enter(method, args, depth);
        if result.is_err() {
            self.stack.set_sp(sp);
            self.frames.truncate(depth);
        }
        (self.tos, self.bytecode, self.bci) = saved;
        result
    }

    fn enter(
        &mut self,
        method: &Arc<Method>,
        args: &[Value],
        depth: usize,
    ) -> Result<Option<Value>, Failure> {
        let words: usize = args.iter().map(Value::slots).sum();
        if words != method.size_of_parameters {
            return Err(Failure::Fatal(format!(
                "{method} takes {} argument words, got {words}",
                method.size_of_parameters
            )));
        }
        self.stack.ensure(words)?;
        for arg in args {
            self.push_value(*arg)?;
        }
        self.push_activation(method.clone(), None)?;
        self.run(depth)
    }

    fn run(&mut self, depth: usize) -> Result<Option<Value>, Failure> {
        loop {
            let step = match self.step() {
                Ok(flow) => self.proceed(flow),
                Err(failure) => Err(failure),
            };
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Exit(value)) => return Ok(value),
                Err(failure) if self.frames.len() <= depth => return Err(failure),
                Err(failure) => self.dispatch_failure(failure)?,
            }
        }
    }

    /// Executes the instruction at the current bci
    fn step(&mut self) -> Result<Flow, Failure> {
        let vm = self.vm.clone();
        let bytecode = self.frame()?.method.code.bytecode_at(self.bci)?;
        self.bytecode = bytecode;
        let template = vm.templates.template(bytecode)?;
        trace!("{:>4} {bytecode} {:?}", self.bci, self.tos);

        self.transition(template.tos_in)?;
        let flow = template.generate(self)?;
        debug_assert!(
            template.does_dispatch()
                || !matches!(flow, Flow::Next)
                || self.tos.state() == template.tos_out.normalized(),
            "{bytecode} left {:?}, expected {}",
            self.tos,
            template.tos_out
        );
        Ok(flow)
    }

    /// Length of the instruction that just ran. Taken from the fetched
    /// bytecode since the template may have quickened the code in place.
    fn instruction_length(&self) -> Result<usize, Failure> {
        if self.bytecode == Bytecode::Wide {
            let modified = self.bytecode_at(1)?;
            return modified
                .wide_length()
                .ok_or_else(|| Failure::Fatal(format!("{modified} can not be wide")));
        }
        match self.bytecode.length() {
            Some(length) => Ok(length),
            None => Ok(self.frame()?.method.code.instruction_length_at(self.bci)?),
        }
    }

    fn proceed(&mut self, flow: Flow) -> Result<Step, Failure> {
        match flow {
            Flow::Next => {
                self.bci += self.instruction_length()?;
            }
            Flow::Jump(target) => self.bci = target,
            Flow::Invoke(Invocation {
                method,
                return_entry,
            }) => {
                self.frame_mut()?.bci = self.bci;
                self.push_activation(method, Some(return_entry))?;
            }
            Flow::Return => return self.remove_activation(),
            Flow::Osr(osr) => return self.migrate(osr),
        }
        Ok(Step::Continue)
    }

    /// Builds the frame of `method` on top of its arguments
    fn push_activation(
        &mut self,
        method: Arc<Method>,
        return_entry: Option<ReturnEntry>,
    ) -> Result<(), Failure> {
        if method.is_abstract() {
            return Err(Failure::AbstractMethod(method.to_string()));
        }
        if method.is_native() {
            return Err(Failure::Linkage(format!("UnsatisfiedLinkError: {method}")));
        }

        let params = method.size_of_parameters;
        let extra = method.max_locals.checked_sub(params).ok_or_else(|| {
            Failure::Fatal(format!("{method} has fewer locals than parameters"))
        })?;
        let monitors = if method.is_synchronized() { MONITOR_WORDS } else { 0 };
        self.stack.ensure(extra + monitors + method.max_stack)?;

        let sender_sp = self.stack.sp() + params;
        for _ in 0..extra {
            self.stack.push(0)?;
        }
        let monitor_bot = self.stack.sp();
        for _ in 0..monitors {
            self.stack.push(0)?;
        }

        let invocations = method.counters.increment_invocation();
        let vm = self.vm.clone();
        if vm.config.profile_interpreter
            && method.method_data().is_none()
            && invocations + method.counters.backedge_count() >= vm.config.profile_limit
        {
            vm.runtime.profile_method(self, &method)?;
        }

        trace!("entering {method}");
        self.frames.push(Frame {
            method: method.clone(),
            bci: 0,
            locals: sender_sp - 1,
            monitor_bot,
            monitor_top: self.stack.sp(),
            sender_sp,
            return_entry,
        });
        self.bci = 0;
        self.tos = Tos::Vtos;

        if method.is_synchronized() {
            let lock = if method.is_static() {
                vm.mirror(method.holder)
            } else {
                self.local_a(0)
            };
            let locked = lock.and_then(|obj| lock_into(self, monitor_bot - MONITOR_WORDS, obj));
            if let Err(failure) = locked {
                // the caller sees the failure at its invoke
                self.frames.pop();
                self.stack.set_sp(sender_sp - params);
                if let Some(caller) = self.frames.last() {
                    self.bci = caller.bci;
                }
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Record of the lock taken on entry to a synchronized method
    fn method_lock_record(frame: &Frame) -> Option<usize> {
        frame
            .method
            .is_synchronized()
            .then(|| frame.monitor_bot - MONITOR_WORDS)
    }

    /// Releases the monitors of a normally returning frame. Monitors still
    /// held from `monitorenter` are released and reported.
    fn unlock_on_return(&mut self) -> Result<(), Failure> {
        let frame = self.frame()?.clone();
        let method_record = Self::method_lock_record(&frame);
        if let Some(record) = method_record {
            if ObjectRef::from(self.stack.get(record)?).is_null() {
                return Err(Failure::IllegalMonitorState);
            }
            unlock_record(self, record)?;
        }

        let mut unbalanced = false;
        for record in frame.monitor_records() {
            if Some(record) == method_record || ObjectRef::from(self.stack.get(record)?).is_null() {
                continue;
            }
            unlock_record(self, record)?;
            unbalanced = true;
        }
        if unbalanced {
            return Err(Failure::IllegalMonitorState);
        }
        Ok(())
    }

    /// Releases every monitor of a frame that is unwound by an exception
    fn unlock_on_unwind(&mut self) -> Result<(), Failure> {
        let frame = self.frame()?.clone();
        for record in frame.monitor_records() {
            if ObjectRef::from(self.stack.get(record)?).is_null() {
                continue;
            }
            match unlock_record(self, record) {
                Ok(()) | Err(Failure::IllegalMonitorState) => {}
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    fn remove_activation(&mut self) -> Result<Step, Failure> {
        self.unlock_on_return()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Failure::Fatal("return without a frame".to_string()))?;
        self.stack.set_sp(frame.sender_sp);
        trace!("returning {:?} from {}", self.tos, frame.method);

        let Some(entry) = frame.return_entry else {
            let value = std::mem::replace(&mut self.tos, Tos::Vtos).value();
            return Ok(Step::Exit(value));
        };
        debug_assert_eq!(self.tos.state(), entry.state);
        self.bci = self.frame()?.bci + entry.length;
        Ok(Step::Continue)
    }

    /// Hands the current activation over to compiled code and continues with
    /// its result in the caller
    fn migrate(&mut self, osr: Arc<dyn OsrMethod>) -> Result<Step, Failure> {
        let runtime = self.runtime();
        let buffer = runtime.osr_migration_begin(self)?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Failure::Fatal("migration without a frame".to_string()))?;
        self.stack.set_sp(frame.sender_sp);
        self.tos = Tos::Vtos;
        debug!(
            "continuing {} in compiled code at {}",
            frame.method,
            osr.entry_bci()
        );

        if let Some(caller) = self.frames.last() {
            self.bci = caller.bci;
        }
        let value = osr.run(self, buffer)?;
        let Some(entry) = frame.return_entry else {
            return Ok(Step::Exit(value));
        };
        self.tos = Tos::from_value(value);
        self.bci += entry.length;
        Ok(Step::Continue)
    }

    /// Looks for a handler of `failure` at the current bci
    fn find_handler(&mut self, failure: &Failure) -> Result<Option<usize>, Failure> {
        let method = self.method()?;
        let runtime = self.runtime();
        let mut exception_type = None;
        for entry in &method.exception_table {
            if self.bci < entry.start || self.bci >= entry.end {
                continue;
            }
            if entry.catch_type == 0 {
                return Ok(Some(entry.handler));
            }

            let thrown = match exception_type {
                Some(ty) => ty,
                None => {
                    let ty = runtime.exception_type(self, failure)?;
                    exception_type = Some(ty);
                    ty
                }
            };
            let catch = match method.constants.resolved_class(entry.catch_type) {
                Some(ty) => ty,
                None => runtime.quicken_io_cc(self, &method.constants, entry.catch_type)?,
            };
            if self.vm.universe.is_subtype_of(thrown, catch)? {
                return Ok(Some(entry.handler));
            }
        }
        Ok(None)
    }

    /// Continues at the innermost handler of `failure`, unwinding frames that
    /// have none. Fails once the entry frame is unwound.
    fn dispatch_failure(&mut self, failure: Failure) -> Result<(), Failure> {
        if failure.is_fatal() {
            return Err(failure);
        }

        loop {
            if let Some(handler) = self.find_handler(&failure)? {
                let runtime = self.runtime();
                let exception = runtime.create_exception(self, &failure)?;
                let monitor_top = self.frame()?.monitor_top;
                self.stack.set_sp(monitor_top);
                self.tos = Tos::Vtos;
                self.push_a(exception)?;
                debug!(
                    "{failure} caught in {} at {}, handler {handler}",
                    self.frame()?.method,
                    self.bci
                );
                self.bci = handler;
                return Ok(());
            }

            self.unlock_on_unwind()?;
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| Failure::Fatal("unwinding without a frame".to_string()))?;
            self.stack.set_sp(frame.sender_sp);
            self.tos = Tos::Vtos;
            debug!("unwinding {} at {} for {failure}", frame.method, self.bci);
            if frame.return_entry.is_none() {
                return Err(failure);
            }
            self.bci = self.frame()?.bci;
        }
    }
}

/// A named interpreter thread with its own stack
#[derive(Debug)]
pub struct InterpreterThread {
    name: String,
    context: InterpreterContext,
}

impl InterpreterThread {
    pub fn new(name: String, vm: Arc<Vm>) -> Self {
        let thread_id = vm.next_thread_id();
        Self {
            name,
            context: InterpreterContext::new(vm, thread_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&mut self) -> &mut InterpreterContext {
        &mut self.context
    }

    pub fn run_with_method(
        mut thread: Self,
        method: Arc<Method>,
        args: Vec<Value>,
    ) -> JoinHandle<Result<Option<Value>>> {
        std::thread::spawn(move || match thread.run_method(&method, &args) {
            Ok(value) => {
                info!("thread '{}' has exited normally", thread.name);
                Ok(value)
            }
            Err(err) => {
                error!("thread '{}' has crashed: {err:?}", thread.name);
                Err(err)
            }
        })
    }

    #[instrument(name = "", skip_all, fields(t = self.name))]
    pub fn run_method(&mut self, method: &Arc<Method>, args: &[Value]) -> Result<Option<Value>> {
        info!("running {method} with {args:?}");
        let result = self
            .context
            .call(method, args)
            .with_context(|| format!("{method} did not complete"))?;
        info!("{method} returned {result:?}");
        Ok(result)
    }
}
