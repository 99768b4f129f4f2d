//! Out-of-line support for the templates: symbolic resolution, slow path
//! allocation, class initialization, exception objects, profiling, on-stack
//! replacement and the debugging agent hooks.
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering, fence};
use std::sync::{Arc, Mutex};

use bytecode::Bytecode;
use bytecode::descriptor::MethodDescriptor;
use common::{BasicType, MethodId, ObjectRef, TypeId, Value};
use tracing::debug;

use crate::barrier::FieldAddress;
use crate::cache::{ByteNo, Constant, ConstantPool, Dispatch, ResolvedField, ResolvedMethod};
use crate::context::InterpreterContext;
use crate::failure::Failure;
use crate::heap::{Heap, layout};
use crate::universe::{InitClaim, METHOD_HANDLE, Method, OBJECT, TypeDescriptor, TypeKind};

fn poisoned<T>(err: std::sync::PoisonError<T>) -> Failure {
    Failure::Fatal(format!("Lock poisoned: {err}"))
}

/// Locals and lock records of an interpreted activation, handed to compiled code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsrBuffer {
    /// Local words in index order
    pub locals: Vec<u32>,
    /// Locked objects with their displaced mark words, innermost first
    pub monitors: Vec<(ObjectRef, u64)>,
}

impl OsrBuffer {
    pub fn local_i(&self, n: usize) -> Option<i32> {
        self.locals.get(n).map(|word| *word as i32)
    }

    pub fn local_a(&self, n: usize) -> Option<ObjectRef> {
        self.locals.get(n).map(|word| ObjectRef::from(*word))
    }
}

/// Compiled code entered in the middle of a loop.
///
/// The compiled activation takes over the locals and the held monitors of the
/// interpreted one and finishes the method; its result is returned to the
/// interpreted caller.
pub trait OsrMethod: Send + Sync + Debug {
    fn entry_bci(&self) -> usize;

    fn is_in_use(&self) -> bool {
        true
    }

    fn run(
        &self,
        ctx: &mut InterpreterContext,
        buffer: OsrBuffer,
    ) -> Result<Option<Value>, Failure>;
}

/// Recompilation policy consulted when a loop gets hot
pub trait Compiler: Send + Sync + Debug {
    fn compile_osr(&self, method: &Arc<Method>, bci: usize) -> Option<Arc<dyn OsrMethod>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    FieldAccess {
        object: ObjectRef,
        holder: TypeId,
        offset: u32,
    },
    FieldModification {
        object: ObjectRef,
        holder: TypeId,
        offset: u32,
        value: Value,
    },
    Breakpoint {
        method: MethodId,
        bci: usize,
    },
}

/// Hooks of an attached debugging agent. Only consulted when
/// `jvmti_hooks` is enabled.
pub trait DebugAgent: Send + Sync {
    fn field_access_count(&self) -> u32;

    fn field_modification_count(&self) -> u32;

    fn post_field_access(
        &self,
        ctx: &mut InterpreterContext,
        obj: ObjectRef,
        field: &ResolvedField,
    ) -> Result<(), Failure>;

    fn post_field_modification(
        &self,
        ctx: &mut InterpreterContext,
        obj: ObjectRef,
        field: &ResolvedField,
        value: Value,
    ) -> Result<(), Failure>;

    /// The bytecode a breakpoint replaced
    fn get_original_bytecode_at(
        &self,
        ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
    ) -> Result<Bytecode, Failure>;

    /// Quickening of a bytecode hidden behind a breakpoint
    fn set_original_bytecode_at(
        &self,
        ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
        bytecode: Bytecode,
    ) -> Result<(), Failure>;

    fn post_breakpoint(
        &self,
        ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
    ) -> Result<(), Failure>;
}

/// Everything the templates can not do inline.
pub trait Runtime: DebugAgent {
    /// Links a field reference for `bytecode` and publishes it in the cache entry
    fn resolve_get_put(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure>;

    fn resolve_invoke(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure>;

    fn resolve_invokehandle(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure>;

    fn resolve_invokedynamic(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure>;

    /// Object for a string or class constant
    fn resolve_ldc(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<ObjectRef, Failure>;

    /// Resolves the class constant of `checkcast`, `instanceof` or a handler catch type
    fn quicken_io_cc(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<TypeId, Failure>;

    fn new_instance(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<ObjectRef, Failure>;

    fn new_array(
        &self,
        ctx: &mut InterpreterContext,
        element: BasicType,
        length: i32,
    ) -> Result<ObjectRef, Failure>;

    fn anewarray(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
        length: i32,
    ) -> Result<ObjectRef, Failure>;

    fn multianewarray(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
        dimensions: &[i32],
    ) -> Result<ObjectRef, Failure>;

    fn register_finalizer(&self, ctx: &mut InterpreterContext, obj: ObjectRef)
    -> Result<(), Failure>;

    /// Type of the exception object `failure` stands for
    fn exception_type(
        &self,
        ctx: &mut InterpreterContext,
        failure: &Failure,
    ) -> Result<TypeId, Failure>;

    fn create_exception(
        &self,
        ctx: &mut InterpreterContext,
        failure: &Failure,
    ) -> Result<ObjectRef, Failure>;

    /// Allocates the profile of `method`
    fn profile_method(
        &self,
        ctx: &mut InterpreterContext,
        method: &Arc<Method>,
    ) -> Result<(), Failure>;

    /// Called when the backedge counter of `method` overflows at a branch to `target_bci`
    fn frequency_counter_overflow(
        &self,
        ctx: &mut InterpreterContext,
        method: &Arc<Method>,
        target_bci: usize,
    ) -> Result<Option<Arc<dyn OsrMethod>>, Failure>;

    /// Copies the current activation into a buffer compiled code can consume
    fn osr_migration_begin(&self, ctx: &mut InterpreterContext) -> Result<OsrBuffer, Failure>;
}

/// Runtime that links against the [`Universe`](crate::universe::Universe) of the vm.
#[derive(Debug, Default)]
pub struct DefaultRuntime {
    compiler: Option<Arc<dyn Compiler>>,
    breakpoints: Mutex<HashMap<(MethodId, usize), Bytecode>>,
    access_watches: AtomicU32,
    modification_watches: AtomicU32,
    events: Mutex<Vec<AgentEvent>>,
    finalizable: Mutex<Vec<ObjectRef>>,
}

impl DefaultRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiler(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler: Some(compiler),
            ..Self::default()
        }
    }

    pub fn watch_field_access(&self) {
        self.access_watches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watch_field_modification(&self) {
        self.modification_watches.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the bytecode at `bci` with `breakpoint`
    pub fn set_breakpoint(&self, method: &Method, bci: usize) -> anyhow::Result<()> {
        let original = method.code.bytecode_at(bci)?;
        if original == Bytecode::Breakpoint {
            anyhow::bail!("{method} already has a breakpoint at {bci}");
        }
        self.breakpoints
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?
            .insert((method.id, bci), original);
        method.code.patch(bci, Bytecode::Breakpoint)
    }

    /// Puts the possibly quickened original bytecode back
    pub fn clear_breakpoint(&self, method: &Method, bci: usize) -> anyhow::Result<()> {
        let original = self
            .breakpoints
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?
            .remove(&(method.id, bci));
        if let Some(original) = original {
            method.code.patch(bci, original)?;
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn finalizable(&self) -> Vec<ObjectRef> {
        self.finalizable
            .lock()
            .map(|objects| objects.clone())
            .unwrap_or_default()
    }

    fn post(&self, event: AgentEvent) -> Result<(), Failure> {
        debug!("agent event {event:?}");
        self.events.lock().map_err(poisoned)?.push(event);
        Ok(())
    }

    /// Runs the static initializer of `ty` and its superclasses unless that already happened
    pub fn initialize_class(&self, ctx: &mut InterpreterContext, ty: TypeId) -> Result<(), Failure> {
        let descriptor = ctx.vm.universe.type_of(ty)?;
        if descriptor.is_initialized() {
            return Ok(());
        }

        match descriptor.begin_initialization(ctx.thread_id)? {
            InitClaim::Done | InitClaim::Recursive => return Ok(()),
            InitClaim::Failed => {
                return Err(Failure::Linkage(format!(
                    "NoClassDefFoundError: could not initialize class {}",
                    descriptor.name
                )));
            }
            InitClaim::Claimed => {}
        }

        debug!("initializing {}", descriptor.name);
        let result = self.run_initializers(ctx, &descriptor);
        descriptor.finish_initialization(result.is_ok())?;
        result
    }

    fn run_initializers(
        &self,
        ctx: &mut InterpreterContext,
        descriptor: &TypeDescriptor,
    ) -> Result<(), Failure> {
        if let Some(super_type) = descriptor.super_type {
            self.initialize_class(ctx, super_type)?;
        }

        let initializer = ctx
            .vm
            .universe
            .declared_method(descriptor, "<clinit>", "()V")?;
        if let Some(initializer) = initializer {
            ctx.call(&initializer, &[])?;
        }
        Ok(())
    }

    fn resolve_class(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<TypeId, Failure> {
        if let Some(ty) = pool.resolved_class(index) {
            return Ok(ty);
        }
        let ty = ctx.vm.universe.lookup(pool.class_name(index)?)?;
        pool.set_resolved_class(index, ty)
    }

    fn link_field(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        let member = pool.member_ref(index)?.clone();
        let vm = ctx.vm.clone();
        let class = vm.universe.lookup(&member.class)?;
        let (holder, info) = vm
            .universe
            .find_field(class, &member.name, &member.descriptor)?
            .ok_or_else(|| {
                Failure::Linkage(format!(
                    "NoSuchFieldError: {}.{}",
                    member.class, member.name
                ))
            })?;

        let is_static = matches!(bytecode, Bytecode::Getstatic | Bytecode::Putstatic);
        let is_put = matches!(bytecode, Bytecode::Putstatic | Bytecode::Putfield);
        if info.is_static() != is_static {
            return Err(Failure::IncompatibleClassChange(format!(
                "expected {} field {}.{}",
                if is_static { "static" } else { "non-static" },
                member.class,
                member.name
            )));
        }

        let method = ctx.method()?;
        if is_put && info.is_final() && method.holder != holder {
            return Err(Failure::Linkage(format!(
                "IllegalAccessError: update to final field {}.{} from {method}",
                member.class, member.name
            )));
        }
        let initializer_update = info.is_final()
            && method.holder == holder
            && if is_static {
                method.is_class_initializer()
            } else {
                method.is_initializer()
            };

        if is_static {
            self.initialize_class(ctx, holder)?;
        }
        let uninitialized_static = is_static && !vm.universe.type_of(holder)?.is_initialized();

        let (get, put) = if is_static {
            (Bytecode::Getstatic, Bytecode::Putstatic)
        } else {
            (Bytecode::Getfield, Bytecode::Putfield)
        };
        let get_code = (!uninitialized_static).then_some(get);
        // final fields are only quickened for stores from their initializer
        let put_code = (!uninitialized_static && (!info.is_final() || (is_put && initializer_update)))
            .then_some(put);

        let mut field = ResolvedField::new(holder, info.offset, info.kind);
        field.is_static = is_static;
        field.is_volatile = info.is_volatile();
        field.is_final = info.is_final();
        debug!(
            "resolved {bytecode} {}.{} at offset {} ({get_code:?}, {put_code:?})",
            member.class, member.name, info.offset
        );
        pool.entry(index)?.set_field(field, get_code, put_code);
        Ok(())
    }

    fn link_invoke(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        let vm = ctx.vm.clone();
        let universe = &vm.universe;
        let member = pool.member_ref(index)?.clone();
        let is_interface_ref = matches!(pool.constant(index)?, Constant::InterfaceMethod(_));
        let class = universe.lookup(&member.class)?;
        let class_type = universe.type_of(class)?;

        if bytecode == Bytecode::Invokeinterface && !class_type.is_interface() {
            return Err(Failure::IncompatibleClassChange(format!(
                "{} is not an interface",
                member.class
            )));
        }
        if bytecode == Bytecode::Invokevirtual && class_type.is_interface() {
            return Err(Failure::IncompatibleClassChange(format!(
                "found interface {}, but class was expected",
                member.class
            )));
        }

        let found = if is_interface_ref || class_type.is_interface() {
            universe.find_interface_method(class, &member.name, &member.descriptor)?
        } else {
            universe.find_method(class, &member.name, &member.descriptor)?
        };
        let method = found.ok_or_else(|| {
            Failure::Linkage(format!(
                "NoSuchMethodError: {}.{}{}",
                member.class, member.name, member.descriptor
            ))
        })?;

        if method.is_static() != (bytecode == Bytecode::Invokestatic) {
            return Err(Failure::IncompatibleClassChange(format!(
                "expected {} method {method}",
                if bytecode == Bytecode::Invokestatic {
                    "static"
                } else {
                    "non-static"
                }
            )));
        }

        let virtual_dispatch = |method: &Method| match method.vtable_index {
            Some(index) if !method.is_final() && !method.is_private() => Dispatch::Virtual(index),
            _ => Dispatch::Final,
        };
        let (byte_no, dispatch, code) = match bytecode {
            Bytecode::Invokestatic => {
                self.initialize_class(ctx, method.holder)?;
                // stays unresolved until the holder is fully initialized
                let initialized = universe.type_of(method.holder)?.is_initialized();
                (
                    ByteNo::F1,
                    Dispatch::Static,
                    initialized.then_some(Bytecode::Invokestatic),
                )
            }
            Bytecode::Invokespecial => (ByteNo::F1, Dispatch::Special, Some(bytecode)),
            Bytecode::Invokevirtual => (ByteNo::F2, virtual_dispatch(method.as_ref()), Some(bytecode)),
            Bytecode::Invokeinterface => {
                let holder = universe.type_of(method.holder)?;
                let dispatch = match (holder.is_interface(), method.itable_index) {
                    (true, Some(index)) => Dispatch::Interface {
                        interface: method.holder,
                        index,
                    },
                    (true, None) => Dispatch::Final,
                    // a method of Object called through an interface
                    (false, _) => virtual_dispatch(method.as_ref()),
                };
                (ByteNo::F1, dispatch, Some(bytecode))
            }
            other => {
                return Err(Failure::Fatal(format!("{other} is not an invoke")));
            }
        };

        debug!("resolved {bytecode} {method} as {dispatch:?}");
        let resolved = ResolvedMethod {
            parameter_size: method.size_of_parameters,
            result: method.result_state(),
            method,
            dispatch,
            appendix: None,
        };
        pool.entry(index)?.set_method(byte_no, resolved, code);
        Ok(())
    }

    /// Links a call site to a static adapter taking the call site arguments
    /// followed by an appendix object
    fn link_adapter(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
        adapter_class: &str,
        leading: &str,
        code: Bytecode,
    ) -> Result<(), Failure> {
        let member = pool.member_ref(index)?.clone();
        let vm = ctx.vm.clone();
        let descriptor = adapter_descriptor(&member.descriptor, leading)?;
        let holder = vm.universe.lookup(adapter_class)?;
        let adapter = vm
            .universe
            .find_method(holder, &member.name, &descriptor)?
            .filter(|method| method.is_static())
            .ok_or_else(|| {
                Failure::Linkage(format!(
                    "no adapter {adapter_class}.{}{descriptor}",
                    member.name
                ))
            })?;
        self.initialize_class(ctx, holder)?;

        let appendix = match pool.resolved_reference(index) {
            Some(appendix) => appendix,
            None => {
                let object = vm.universe.object;
                let appendix = allocate_instance(ctx, &*vm.universe.type_of(object)?)?;
                pool.set_resolved_reference(index, appendix)?
            }
        };

        debug!("linked {code} at #{index} to {adapter} with appendix {appendix:?}");
        let resolved = ResolvedMethod {
            parameter_size: adapter.size_of_parameters,
            result: adapter.result_state(),
            method: adapter,
            dispatch: Dispatch::Static,
            appendix: Some(appendix),
        };
        pool.entry(index)?.set_method(ByteNo::F1, resolved, Some(code));
        Ok(())
    }

    fn new_string(&self, ctx: &mut InterpreterContext, value: &str) -> Result<ObjectRef, Failure> {
        let vm = ctx.vm.clone();
        let chars: Vec<u16> = value.encode_utf16().collect();
        let array = self.new_array(ctx, BasicType::Char, chars.len() as i32)?;
        for (index, char) in chars.iter().enumerate() {
            vm.heap.store_u16(
                array.address() + layout::element_offset(BasicType::Char, index as u32),
                *char,
            )?;
        }

        let string_type = vm.universe.type_of(vm.universe.string)?;
        let string = allocate_instance(ctx, &string_type)?;
        let field = string_type
            .field("value", "[C")
            .ok_or_else(|| Failure::Fatal("String has no value field".to_string()))?;
        vm.barrier.store_reference(
            &vm.heap,
            FieldAddress {
                base: string,
                offset: field.offset,
            },
            array,
            false,
        )?;
        Ok(string)
    }

    fn build_array(
        &self,
        ctx: &mut InterpreterContext,
        ty: TypeId,
        dimensions: &[i32],
    ) -> Result<ObjectRef, Failure> {
        let vm = ctx.vm.clone();
        let length = dimensions[0];
        match vm.universe.type_of(ty)?.kind {
            TypeKind::TypeArray(element) if dimensions.len() == 1 => {
                allocate_array(ctx, ty, element, length)
            }
            TypeKind::ObjArray { element } => {
                let array = allocate_array(ctx, ty, BasicType::Object, length)?;
                if dimensions.len() > 1 {
                    for index in 0..length as u32 {
                        let inner = self.build_array(ctx, element, &dimensions[1..])?;
                        vm.barrier.store_reference(
                            &vm.heap,
                            FieldAddress {
                                base: array,
                                offset: layout::element_offset(BasicType::Object, index),
                            },
                            inner,
                            true,
                        )?;
                    }
                }
                Ok(array)
            }
            kind => Err(Failure::Fatal(format!(
                "can not build {} dimensions of {kind:?}",
                dimensions.len()
            ))),
        }
    }
}

/// Descriptor of an adapter: `leading`, the call site parameters, the appendix
fn adapter_descriptor(call_site: &str, leading: &str) -> Result<String, Failure> {
    MethodDescriptor::new(call_site)?;
    let close = call_site
        .find(')')
        .ok_or_else(|| Failure::Fatal(format!("invalid descriptor {call_site}")))?;
    Ok(format!(
        "({leading}{}L{OBJECT};){}",
        &call_site[1..close],
        &call_site[close + 1..]
    ))
}

/// Slow path allocation of `size` bytes: a fresh TLAB for small requests, the
/// shared heap otherwise. The returned memory is cleared.
pub fn allocate(ctx: &mut InterpreterContext, size: u32) -> Result<u32, Failure> {
    let vm = ctx.vm.clone();
    let config = &vm.config;
    if config.use_tlab {
        if let Some(address) = ctx.tlab.allocate(size) {
            if !config.zero_tlab {
                vm.heap.zero(address, address + size)?;
            }
            return Ok(address);
        }
        if size <= config.tlab_size / 2
            && let Some(start) = vm.heap.allocate(config.tlab_size)
        {
            if config.zero_tlab {
                vm.heap.zero(start, start + config.tlab_size)?;
            }
            ctx.tlab.refill(start, start + config.tlab_size);
            if let Some(address) = ctx.tlab.allocate(size) {
                if !config.zero_tlab {
                    vm.heap.zero(address, address + size)?;
                }
                return Ok(address);
            }
        }
    }

    let address = vm.heap.allocate(size).ok_or(Failure::OutOfMemory)?;
    debug!("allocated {size} bytes at {address:#x} outside of a tlab");
    vm.heap.zero(address, address + size)?;
    Ok(address)
}

/// Writes the header, mark word first, and publishes the object
pub fn initialize_header(
    heap: &Heap,
    obj: ObjectRef,
    mark: u64,
    klass: TypeId,
) -> Result<(), Failure> {
    heap.set_mark(obj, mark)?;
    heap.set_klass(obj, klass)?;
    fence(Ordering::Release);
    Ok(())
}

pub fn allocate_instance(
    ctx: &mut InterpreterContext,
    ty: &TypeDescriptor,
) -> Result<ObjectRef, Failure> {
    let obj = ObjectRef::from(allocate(ctx, ty.instance_size)?);
    initialize_header(&ctx.vm.heap, obj, ty.prototype_header, ty.id)?;
    Ok(obj)
}

pub fn allocate_array(
    ctx: &mut InterpreterContext,
    ty: TypeId,
    element: BasicType,
    length: i32,
) -> Result<ObjectRef, Failure> {
    if length < 0 {
        return Err(Failure::NegativeArraySize(length));
    }
    let size = layout::array_size(element, length as u32).ok_or(Failure::OutOfMemory)?;
    let obj = ObjectRef::from(allocate(ctx, size)?);
    let heap = &ctx.vm.heap;
    heap.set_array_length(obj, length)?;
    initialize_header(heap, obj, layout::UNLOCKED_VALUE, ty)?;
    Ok(obj)
}

fn record_linkage_error(pool: &ConstantPool, index: u16, result: Result<(), Failure>) -> Result<(), Failure> {
    match result {
        Err(failure @ (Failure::Linkage(_) | Failure::IncompatibleClassChange(_))) => {
            Err(pool.entry(index)?.record_error(failure))
        }
        other => other,
    }
}

fn previous_error(pool: &ConstantPool, index: u16) -> Result<(), Failure> {
    match pool.entry(index)?.error() {
        Some(failure) => Err(failure.clone()),
        None => Ok(()),
    }
}

impl Runtime for DefaultRuntime {
    fn resolve_get_put(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        previous_error(pool, index)?;
        let result = self.link_field(ctx, bytecode, pool, index);
        record_linkage_error(pool, index, result)
    }

    fn resolve_invoke(
        &self,
        ctx: &mut InterpreterContext,
        bytecode: Bytecode,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        previous_error(pool, index)?;
        let result = self.link_invoke(ctx, bytecode, pool, index);
        record_linkage_error(pool, index, result)
    }

    fn resolve_invokehandle(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        previous_error(pool, index)?;
        let leading = format!("L{METHOD_HANDLE};");
        let result = self.link_adapter(
            ctx,
            pool,
            index,
            METHOD_HANDLE,
            &leading,
            Bytecode::Invokehandle,
        );
        record_linkage_error(pool, index, result)
    }

    fn resolve_invokedynamic(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<(), Failure> {
        previous_error(pool, index)?;
        let Constant::InvokeDynamic(member) = pool.constant(index)? else {
            return Err(Failure::Fatal(format!("constant {index} is not a call site")));
        };
        let class = member.class.clone();
        let result = self.link_adapter(ctx, pool, index, &class, "", Bytecode::Invokedynamic);
        record_linkage_error(pool, index, result)
    }

    fn resolve_ldc(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<ObjectRef, Failure> {
        if let Some(obj) = pool.resolved_reference(index) {
            return Ok(obj);
        }
        let obj = match pool.constant(index)? {
            Constant::String(value) => self.new_string(ctx, value)?,
            Constant::Class(_) => {
                let ty = self.resolve_class(ctx, pool, index)?;
                ctx.vm.mirror(ty)?
            }
            other => {
                return Err(Failure::Fatal(format!(
                    "ldc of {other:?} does not produce an object"
                )));
            }
        };
        pool.set_resolved_reference(index, obj)
    }

    fn quicken_io_cc(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<TypeId, Failure> {
        self.resolve_class(ctx, pool, index)
    }

    fn new_instance(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
    ) -> Result<ObjectRef, Failure> {
        let ty = self.resolve_class(ctx, pool, index)?;
        let descriptor = ctx.vm.universe.type_of(ty)?;
        if descriptor.kind != TypeKind::Instance || descriptor.is_abstract() {
            return Err(Failure::Linkage(format!(
                "InstantiationError: {}",
                descriptor.name
            )));
        }
        self.initialize_class(ctx, ty)?;
        let obj = allocate_instance(ctx, &descriptor)?;
        debug!("slow path allocation of {} at {obj:?}", descriptor.name);
        Ok(obj)
    }

    fn new_array(
        &self,
        ctx: &mut InterpreterContext,
        element: BasicType,
        length: i32,
    ) -> Result<ObjectRef, Failure> {
        let ty = ctx.vm.universe.type_array(element)?;
        allocate_array(ctx, ty, element, length)
    }

    fn anewarray(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
        length: i32,
    ) -> Result<ObjectRef, Failure> {
        let element = self.resolve_class(ctx, pool, index)?;
        let ty = ctx.vm.universe.array_of(element)?;
        allocate_array(ctx, ty, BasicType::Object, length)
    }

    fn multianewarray(
        &self,
        ctx: &mut InterpreterContext,
        pool: &ConstantPool,
        index: u16,
        dimensions: &[i32],
    ) -> Result<ObjectRef, Failure> {
        let ty = self.resolve_class(ctx, pool, index)?;
        if dimensions.is_empty() {
            return Err(Failure::Fatal("multianewarray without dimensions".to_string()));
        }
        if let Some(negative) = dimensions.iter().find(|length| **length < 0) {
            return Err(Failure::NegativeArraySize(*negative));
        }
        let array = self.build_array(ctx, ty, dimensions)?;
        fence(Ordering::Release);
        Ok(array)
    }

    fn register_finalizer(
        &self,
        _ctx: &mut InterpreterContext,
        obj: ObjectRef,
    ) -> Result<(), Failure> {
        debug!("registered {obj:?} for finalization");
        self.finalizable.lock().map_err(poisoned)?.push(obj);
        Ok(())
    }

    fn exception_type(
        &self,
        ctx: &mut InterpreterContext,
        failure: &Failure,
    ) -> Result<TypeId, Failure> {
        match failure {
            Failure::Thrown(obj) => ctx.vm.heap.klass(*obj),
            other => match other.exception_class() {
                Some(name) => ctx.vm.universe.lookup(name),
                None => Err(other.clone()),
            },
        }
    }

    fn create_exception(
        &self,
        ctx: &mut InterpreterContext,
        failure: &Failure,
    ) -> Result<ObjectRef, Failure> {
        if let Failure::Thrown(obj) = failure {
            return Ok(*obj);
        }
        let ty = self.exception_type(ctx, failure)?;
        self.initialize_class(ctx, ty)?;
        let descriptor = ctx.vm.universe.type_of(ty)?;
        let exception = allocate_instance(ctx, &descriptor)?;
        debug!("created {} for {failure}", descriptor.name);
        Ok(exception)
    }

    fn profile_method(
        &self,
        _ctx: &mut InterpreterContext,
        method: &Arc<Method>,
    ) -> Result<(), Failure> {
        method.build_method_data();
        debug!("started profiling {method}");
        Ok(())
    }

    fn frequency_counter_overflow(
        &self,
        _ctx: &mut InterpreterContext,
        method: &Arc<Method>,
        target_bci: usize,
    ) -> Result<Option<Arc<dyn OsrMethod>>, Failure> {
        debug!(
            "backedge counter overflow in {method} at {target_bci}, {} backedges",
            method.counters.backedge_count()
        );
        Ok(self
            .compiler
            .as_ref()
            .and_then(|compiler| compiler.compile_osr(method, target_bci)))
    }

    fn osr_migration_begin(&self, ctx: &mut InterpreterContext) -> Result<OsrBuffer, Failure> {
        let frame = ctx.frame()?.clone();
        let locals = (0..frame.method.max_locals)
            .map(|n| ctx.local(n))
            .collect::<Result<Vec<_>, _>>()?;

        let mut monitors = Vec::new();
        for record in frame.monitor_records() {
            let obj = ObjectRef::from(ctx.stack.get(record)?);
            if obj.is_null() {
                continue;
            }
            let low = ctx.stack.get(record + 1)? as u64;
            let high = ctx.stack.get(record + 2)? as u64;
            monitors.push((obj, (high << 32) | low));
        }

        debug!(
            "migrating {} at {} with {} monitors",
            frame.method,
            ctx.bci,
            monitors.len()
        );
        Ok(OsrBuffer { locals, monitors })
    }
}

impl DebugAgent for DefaultRuntime {
    fn field_access_count(&self) -> u32 {
        self.access_watches.load(Ordering::Relaxed)
    }

    fn field_modification_count(&self) -> u32 {
        self.modification_watches.load(Ordering::Relaxed)
    }

    fn post_field_access(
        &self,
        _ctx: &mut InterpreterContext,
        obj: ObjectRef,
        field: &ResolvedField,
    ) -> Result<(), Failure> {
        self.post(AgentEvent::FieldAccess {
            object: obj,
            holder: field.holder,
            offset: field.offset,
        })
    }

    fn post_field_modification(
        &self,
        _ctx: &mut InterpreterContext,
        obj: ObjectRef,
        field: &ResolvedField,
        value: Value,
    ) -> Result<(), Failure> {
        self.post(AgentEvent::FieldModification {
            object: obj,
            holder: field.holder,
            offset: field.offset,
            value,
        })
    }

    fn get_original_bytecode_at(
        &self,
        _ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
    ) -> Result<Bytecode, Failure> {
        self.breakpoints
            .lock()
            .map_err(poisoned)?
            .get(&(method.id, bci))
            .copied()
            .ok_or_else(|| Failure::Fatal(format!("no breakpoint in {method} at {bci}")))
    }

    fn set_original_bytecode_at(
        &self,
        _ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
        bytecode: Bytecode,
    ) -> Result<(), Failure> {
        let mut breakpoints = self.breakpoints.lock().map_err(poisoned)?;
        match breakpoints.get_mut(&(method.id, bci)) {
            Some(original) => {
                *original = bytecode;
                Ok(())
            }
            None => Err(Failure::Fatal(format!("no breakpoint in {method} at {bci}"))),
        }
    }

    fn post_breakpoint(
        &self,
        _ctx: &mut InterpreterContext,
        method: &Method,
        bci: usize,
    ) -> Result<(), Failure> {
        self.post(AgentEvent::Breakpoint {
            method: method.id,
            bci,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_descriptors() {
        assert_eq!(
            adapter_descriptor("(IJ)Ljava/lang/String;", "Ljava/lang/invoke/MethodHandle;")
                .unwrap(),
            "(Ljava/lang/invoke/MethodHandle;IJLjava/lang/Object;)Ljava/lang/String;"
        );
        assert_eq!(
            adapter_descriptor("()V", "").unwrap(),
            "(Ljava/lang/Object;)V"
        );
        assert!(adapter_descriptor("(Q)V", "").is_err());
    }

    #[test]
    fn osr_buffer_locals() {
        let buffer = OsrBuffer {
            locals: vec![7, u32::MAX, 24],
            monitors: Vec::new(),
        };
        assert_eq!(buffer.local_i(0), Some(7));
        assert_eq!(buffer.local_i(1), Some(-1));
        assert_eq!(buffer.local_a(2), Some(ObjectRef::from(24)));
        assert_eq!(buffer.local_i(3), None);
    }
}
