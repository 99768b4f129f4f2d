use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock};

use anyhow::{Context, Result, bail};
use bytecode::descriptor::{FieldDescriptor, FieldType, MethodDescriptor};
use bytecode::{Bytecode, CodeBuffer};
use common::{BasicType, MethodId, ObjectRef, ThreadId, TosState, TypeId};
use tracing::debug;

use crate::cache::{Constant, ConstantPool, MemberRef};
use crate::failure::Failure;
use crate::heap::layout;
use crate::profile::{MethodCounters, MethodData};

pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
}

pub const OBJECT: &str = "java/lang/Object";
pub const CLASS: &str = "java/lang/Class";
pub const STRING: &str = "java/lang/String";
pub const METHOD_HANDLE: &str = "java/lang/invoke/MethodHandle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Instance,
    Interface,
    ObjArray { element: TypeId },
    TypeArray(BasicType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub kind: BasicType,
    /// Offset in instances, or in the mirror for static fields
    pub offset: u32,
    pub flags: u16,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.flags & access::STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.flags & access::FINAL != 0
    }

    pub fn is_volatile(&self) -> bool {
        self.flags & access::VOLATILE != 0
    }
}

/// `[start, end)` range of bcis covered by `handler`; `catch_type` 0 catches everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: u16,
}

/// Implementations of one interface's methods, in interface declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct ItableEntry {
    pub interface: TypeId,
    pub methods: Vec<Option<MethodId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitState {
    Linked = 0,
    BeingInitialized = 1,
    FullyInitialized = 2,
    Erroneous = 3,
}

/// Outcome of trying to start the initialization of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitClaim {
    Done,
    /// The calling thread is already running the initializer
    Recursive,
    /// The calling thread has to run the initializer now
    Claimed,
    Failed,
}

#[derive(Debug)]
struct InitProgress {
    state: InitState,
    owner: Option<ThreadId>,
}

#[derive(Debug)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    pub flags: u16,
    pub super_type: Option<TypeId>,
    /// Every interface implemented, directly or inherited
    pub interfaces: Vec<TypeId>,
    pub instance_size: u32,
    /// Size of the mirror object that holds the static fields
    pub static_size: u32,
    pub has_finalizer: bool,
    /// Instances can not be allocated inline
    pub slow_path: bool,
    pub prototype_header: u64,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodId>,
    pub vtable: Vec<MethodId>,
    pub itable: Vec<ItableEntry>,
    pub constants: Arc<ConstantPool>,
    init_state: AtomicU8,
    progress: Mutex<InitProgress>,
    initialized: Condvar,
    mirror: OnceLock<ObjectRef>,
    array_type: OnceLock<TypeId>,
}

impl TypeDescriptor {
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_abstract(&self) -> bool {
        self.flags & access::ABSTRACT != 0
    }

    pub fn is_final(&self) -> bool {
        self.flags & access::FINAL != 0
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::ObjArray { .. } | TypeKind::TypeArray(_))
    }

    pub fn init_state(&self) -> InitState {
        match self.init_state.load(Ordering::Acquire) {
            0 => InitState::Linked,
            1 => InitState::BeingInitialized,
            2 => InitState::FullyInitialized,
            _ => InitState::Erroneous,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state() == InitState::FullyInitialized
    }

    /// Waits while another thread initializes this type
    pub fn begin_initialization(&self, thread: ThreadId) -> Result<InitClaim, Failure> {
        let mut progress = self
            .progress
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        loop {
            match progress.state {
                InitState::FullyInitialized => return Ok(InitClaim::Done),
                InitState::Erroneous => return Ok(InitClaim::Failed),
                InitState::BeingInitialized if progress.owner == Some(thread) => {
                    return Ok(InitClaim::Recursive);
                }
                InitState::BeingInitialized => {
                    progress = self
                        .initialized
                        .wait(progress)
                        .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
                }
                InitState::Linked => {
                    progress.state = InitState::BeingInitialized;
                    progress.owner = Some(thread);
                    self.init_state
                        .store(InitState::BeingInitialized as u8, Ordering::Release);
                    return Ok(InitClaim::Claimed);
                }
            }
        }
    }

    pub fn finish_initialization(&self, success: bool) -> Result<(), Failure> {
        let mut progress = self
            .progress
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        progress.state = if success {
            InitState::FullyInitialized
        } else {
            InitState::Erroneous
        };
        progress.owner = None;
        self.init_state.store(progress.state as u8, Ordering::Release);
        self.initialized.notify_all();
        debug!("{} is {:?}", self.name, progress.state);
        Ok(())
    }

    /// The thread running the initializer, if any
    pub fn initializing_thread(&self) -> Option<ThreadId> {
        self.progress.lock().ok()?.owner
    }

    pub fn mirror(&self) -> Option<ObjectRef> {
        self.mirror.get().copied()
    }

    pub fn set_mirror(&self, mirror: ObjectRef) -> ObjectRef {
        *self.mirror.get_or_init(|| mirror)
    }

    pub fn field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }

    pub fn itable_entry(&self, interface: TypeId) -> Option<&ItableEntry> {
        self.itable.iter().find(|entry| entry.interface == interface)
    }

    /// Descriptor naming this type inside an array type name
    fn element_descriptor(&self) -> String {
        if self.is_array() {
            self.name.clone()
        } else {
            format!("L{};", self.name)
        }
    }
}

pub struct Method {
    pub id: MethodId,
    pub holder: TypeId,
    pub holder_name: String,
    pub name: String,
    pub descriptor: String,
    pub flags: u16,
    pub max_locals: usize,
    pub max_stack: usize,
    /// Words of arguments, receiver included
    pub size_of_parameters: usize,
    pub result: BasicType,
    pub code: CodeBuffer,
    pub constants: Arc<ConstantPool>,
    pub exception_table: Vec<ExceptionHandler>,
    pub vtable_index: Option<usize>,
    pub itable_index: Option<usize>,
    pub counters: MethodCounters,
    method_data: OnceLock<MethodData>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.flags & access::STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.flags & access::FINAL != 0
    }

    pub fn is_private(&self) -> bool {
        self.flags & access::PRIVATE != 0
    }

    pub fn is_synchronized(&self) -> bool {
        self.flags & access::SYNCHRONIZED != 0
    }

    pub fn is_native(&self) -> bool {
        self.flags & access::NATIVE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.flags & access::ABSTRACT != 0
    }

    pub fn is_initializer(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Tos state of the returned value, sub-int results travel as ints
    pub fn result_state(&self) -> TosState {
        self.result.tos_state().normalized()
    }

    pub fn method_data(&self) -> Option<&MethodData> {
        self.method_data.get()
    }

    pub fn build_method_data(&self) -> &MethodData {
        self.method_data.get_or_init(MethodData::default)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("holder", &self.holder_name)
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.holder_name.replace('/', "."),
            self.name,
            self.descriptor
        )
    }
}

/// All types and methods known to the interpreter.
///
/// Types are fixed when the universe is built, except array types which are
/// created the first time they are named.
#[derive(Debug)]
pub struct Universe {
    types: RwLock<Vec<Arc<TypeDescriptor>>>,
    names: RwLock<HashMap<String, TypeId>>,
    methods: Vec<Arc<Method>>,
    type_arrays: HashMap<BasicType, TypeId>,
    empty_pool: Arc<ConstantPool>,
    pub object: TypeId,
    pub class: TypeId,
    pub string: TypeId,
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> Failure {
    Failure::Fatal(format!("Lock poisoned: {err}"))
}

impl Universe {
    pub fn type_of(&self, id: TypeId) -> Result<Arc<TypeDescriptor>, Failure> {
        self.types
            .read()
            .map_err(poisoned)?
            .get(id.index())
            .cloned()
            .ok_or_else(|| Failure::Fatal(format!("no type with id {id:?}")))
    }

    pub fn method(&self, id: MethodId) -> Result<Arc<Method>, Failure> {
        self.methods
            .get(id.index())
            .cloned()
            .ok_or_else(|| Failure::Fatal(format!("no method with id {id:?}")))
    }

    pub fn type_count(&self) -> usize {
        self.types.read().map_or(0, |types| types.len())
    }

    /// Finds a type by internal name, array types are created on demand
    pub fn lookup(&self, name: &str) -> Result<TypeId, Failure> {
        if let Some(id) = self.names.read().map_err(poisoned)?.get(name) {
            return Ok(*id);
        }

        let Some(component) = name.strip_prefix('[') else {
            return Err(Failure::Linkage(format!("NoClassDefFoundError: {name}")));
        };
        let field_type = FieldType::new(component)
            .map_err(|err| Failure::Linkage(format!("NoClassDefFoundError: {name}: {err}")))?;
        if field_type.length() != component.len() {
            return Err(Failure::Linkage(format!("NoClassDefFoundError: {name}")));
        }

        let element = match &field_type {
            FieldType::BaseType(_) => return self.type_array(field_type.basic_type()),
            FieldType::ObjectType { class_name } => self.lookup(class_name)?,
            FieldType::ComponentType(_) => self.lookup(component)?,
        };
        self.array_of(element)
    }

    pub fn type_array(&self, element: BasicType) -> Result<TypeId, Failure> {
        self.type_arrays
            .get(&element)
            .copied()
            .ok_or_else(|| Failure::Fatal(format!("no array type for {element:?}")))
    }

    /// The array type with elements of type `element`
    pub fn array_of(&self, element: TypeId) -> Result<TypeId, Failure> {
        let element_type = self.type_of(element)?;
        if let Some(id) = element_type.array_type.get() {
            return Ok(*id);
        }

        let mut types = self.types.write().map_err(poisoned)?;
        if let Some(id) = element_type.array_type.get() {
            return Ok(*id);
        }
        let id = TypeId::from(types.len() as u32);
        let name = format!("[{}", element_type.element_descriptor());
        let array = array_type(
            id,
            name.clone(),
            TypeKind::ObjArray { element },
            self.object,
            self.empty_pool.clone(),
        );
        types.push(Arc::new(array));
        self.names.write().map_err(poisoned)?.insert(name.clone(), id);
        let _ = element_type.array_type.set(id);
        debug!("created array type {name}");
        Ok(id)
    }

    /// The element type of an object array
    pub fn element_type(&self, array: TypeId) -> Result<TypeId, Failure> {
        match self.type_of(array)?.kind {
            TypeKind::ObjArray { element } => Ok(element),
            kind => Err(Failure::Fatal(format!("{kind:?} is not an object array"))),
        }
    }

    pub fn is_subtype_of(&self, sub: TypeId, sup: TypeId) -> Result<bool, Failure> {
        if sub == sup {
            return Ok(true);
        }

        let sub_type = self.type_of(sub)?;
        let sup_type = self.type_of(sup)?;
        match sup_type.kind {
            TypeKind::Interface => Ok(sub_type.interfaces.contains(&sup)),
            TypeKind::ObjArray { element: sup_element } => match sub_type.kind {
                TypeKind::ObjArray { element } => self.is_subtype_of(element, sup_element),
                _ => Ok(false),
            },
            TypeKind::TypeArray(_) => Ok(false),
            TypeKind::Instance => {
                let mut current = sub_type.super_type;
                while let Some(id) = current {
                    if id == sup {
                        return Ok(true);
                    }
                    current = self.type_of(id)?.super_type;
                }
                Ok(false)
            }
        }
    }

    /// Method lookup through the superclass chain
    pub fn find_method(
        &self,
        holder: TypeId,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<Arc<Method>>, Failure> {
        let mut current = Some(holder);
        while let Some(id) = current {
            let ty = self.type_of(id)?;
            if let Some(method) = self.declared_method(&ty, name, descriptor)? {
                return Ok(Some(method));
            }
            current = ty.super_type;
        }
        Ok(None)
    }

    /// Method lookup through an interface, its superinterfaces and `Object`
    pub fn find_interface_method(
        &self,
        holder: TypeId,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<Arc<Method>>, Failure> {
        let ty = self.type_of(holder)?;
        for id in std::iter::once(holder).chain(ty.interfaces.iter().copied()) {
            if let Some(method) = self.declared_method(&*self.type_of(id)?, name, descriptor)? {
                return Ok(Some(method));
            }
        }
        self.declared_method(&*self.type_of(self.object)?, name, descriptor)
    }

    pub fn declared_method(
        &self,
        ty: &TypeDescriptor,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<Arc<Method>>, Failure> {
        for id in &ty.methods {
            let method = self.method(*id)?;
            if method.name == name && method.descriptor == descriptor {
                return Ok(Some(method));
            }
        }
        Ok(None)
    }

    /// Field lookup through the type, its interfaces and its superclasses
    pub fn find_field(
        &self,
        holder: TypeId,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(TypeId, FieldInfo)>, Failure> {
        let mut current = Some(holder);
        while let Some(id) = current {
            let ty = self.type_of(id)?;
            if let Some(field) = ty.field(name, descriptor) {
                return Ok(Some((id, field.clone())));
            }
            for interface in &ty.interfaces {
                if let Some(field) = self.type_of(*interface)?.field(name, descriptor) {
                    return Ok(Some((*interface, field.clone())));
                }
            }
            current = ty.super_type;
        }
        Ok(None)
    }

    /// Finds a static method by holder name, convenience for callers outside the interpreter
    pub fn static_method(&self, class: &str, name: &str, descriptor: &str) -> Result<Arc<Method>> {
        let holder = self.lookup(class)?;
        let method = self
            .find_method(holder, name, descriptor)?
            .context(format!("no method {class}.{name}{descriptor}"))?;
        if !method.is_static() {
            bail!("{method} is not static");
        }
        Ok(method)
    }

    pub fn method_named(&self, class: &str, name: &str, descriptor: &str) -> Result<Arc<Method>> {
        let holder = self.lookup(class)?;
        self.find_method(holder, name, descriptor)?
            .context(format!("no method {class}.{name}{descriptor}"))
    }
}

fn array_type(
    id: TypeId,
    name: String,
    kind: TypeKind,
    object: TypeId,
    constants: Arc<ConstantPool>,
) -> TypeDescriptor {
    TypeDescriptor {
        id,
        name,
        kind,
        flags: access::PUBLIC | access::FINAL | access::ABSTRACT,
        super_type: Some(object),
        interfaces: Vec::new(),
        instance_size: 0,
        static_size: layout::HEADER_SIZE,
        has_finalizer: false,
        slow_path: false,
        prototype_header: layout::UNLOCKED_VALUE,
        fields: Vec::new(),
        methods: Vec::new(),
        vtable: Vec::new(),
        itable: Vec::new(),
        constants,
        init_state: AtomicU8::new(InitState::FullyInitialized as u8),
        progress: Mutex::new(InitProgress {
            state: InitState::FullyInitialized,
            owner: None,
        }),
        initialized: Condvar::new(),
        mirror: OnceLock::new(),
        array_type: OnceLock::new(),
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub descriptor: String,
    pub flags: u16,
}

#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub name: String,
    pub descriptor: String,
    pub flags: u16,
    pub max_locals: usize,
    pub max_stack: usize,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
}

impl MethodSpec {
    pub fn new(name: &str, descriptor: &str, flags: u16) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags,
            max_locals: 0,
            max_stack: 8,
            code: Vec::new(),
            exception_table: Vec::new(),
        }
    }

    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    pub fn max_locals(mut self, max_locals: usize) -> Self {
        self.max_locals = max_locals;
        self
    }

    pub fn max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn handler(mut self, start: usize, end: usize, handler: usize, catch_type: u16) -> Self {
        self.exception_table.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type,
        });
        self
    }
}

/// Source of one class or interface for the [`UniverseBuilder`]
#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub flags: u16,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<MethodSpec>,
    /// Constant pool contents starting at index 1
    pub constants: Vec<Constant>,
}

impl ClassSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some(OBJECT.to_string()),
            interfaces: Vec::new(),
            flags: access::PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> Self {
        Self {
            flags: access::PUBLIC | access::INTERFACE | access::ABSTRACT,
            ..Self::new(name)
        }
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str, flags: u16) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags,
        });
        self
    }

    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn constants(mut self, constants: Vec<Constant>) -> Self {
        self.constants = constants;
        self
    }

    fn is_interface(&self) -> bool {
        self.flags & access::INTERFACE != 0
    }
}

fn throwable(name: &str, super_name: &str) -> ClassSpec {
    ClassSpec::new(name).extends(super_name)
}

/// Classes every universe starts with
fn bootstrap_classes() -> Vec<ClassSpec> {
    let mut object = ClassSpec::new(OBJECT)
        .method(MethodSpec::new("<init>", "()V", access::PUBLIC).code(vec![Bytecode::Return as u8]))
        .method(
            MethodSpec::new("finalize", "()V", access::PROTECTED)
                .code(vec![Bytecode::Return as u8]),
        );
    object.super_name = None;

    let throwable_init = vec![
        Bytecode::Aload0 as u8,
        Bytecode::Invokespecial as u8,
        0,
        1,
        Bytecode::Return as u8,
    ];

    vec![
        object,
        ClassSpec::new(CLASS).flags(access::PUBLIC | access::FINAL),
        ClassSpec::new(STRING)
            .flags(access::PUBLIC | access::FINAL)
            .field("value", "[C", access::PRIVATE | access::FINAL),
        ClassSpec::new("java/lang/Throwable")
            .constants(vec![Constant::Method(MemberRef::new(OBJECT, "<init>", "()V"))])
            .method(
                MethodSpec::new("<init>", "()V", access::PUBLIC)
                    .code(throwable_init)
                    .max_stack(1),
            ),
        throwable("java/lang/Exception", "java/lang/Throwable"),
        throwable("java/lang/RuntimeException", "java/lang/Exception"),
        throwable("java/lang/ArithmeticException", "java/lang/RuntimeException"),
        throwable("java/lang/NullPointerException", "java/lang/RuntimeException"),
        throwable("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
        throwable(
            "java/lang/ArrayIndexOutOfBoundsException",
            "java/lang/IndexOutOfBoundsException",
        ),
        throwable("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
        throwable("java/lang/ClassCastException", "java/lang/RuntimeException"),
        throwable("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
        throwable("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
        throwable("java/lang/Error", "java/lang/Throwable"),
        throwable("java/lang/LinkageError", "java/lang/Error"),
        throwable("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
        throwable("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
        throwable("java/lang/VirtualMachineError", "java/lang/Error"),
        throwable("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
        throwable("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ]
}

const TYPE_ARRAYS: [BasicType; 8] = [
    BasicType::Boolean,
    BasicType::Char,
    BasicType::Float,
    BasicType::Double,
    BasicType::Byte,
    BasicType::Short,
    BasicType::Int,
    BasicType::Long,
];

fn type_array_name(element: BasicType) -> &'static str {
    match element {
        BasicType::Boolean => "[Z",
        BasicType::Char => "[C",
        BasicType::Float => "[F",
        BasicType::Double => "[D",
        BasicType::Byte => "[B",
        BasicType::Short => "[S",
        BasicType::Int => "[I",
        BasicType::Long => "[J",
        _ => "[V",
    }
}

/// Layout and dispatch tables computed for one class before it becomes a [`TypeDescriptor`]
#[derive(Debug, Default, Clone)]
struct Linked {
    instance_size: u32,
    static_size: u32,
    fields: Vec<FieldInfo>,
    interfaces: Vec<TypeId>,
    vtable: Vec<MethodId>,
    vtable_indices: Vec<Option<usize>>,
    itable_indices: Vec<Option<usize>>,
    itable: Vec<ItableEntry>,
    has_finalizer: bool,
}

/// Collects class sources, then lays out, links and rewrites them into a [`Universe`].
#[derive(Debug)]
pub struct UniverseBuilder {
    classes: Vec<ClassSpec>,
}

impl Default for UniverseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UniverseBuilder {
    pub fn new() -> Self {
        Self {
            classes: bootstrap_classes(),
        }
    }

    pub fn class(&mut self, spec: ClassSpec) -> &mut Self {
        self.classes.push(spec);
        self
    }

    pub fn build(self) -> Result<Universe> {
        let classes = self.classes;
        let mut ids = HashMap::new();
        for (index, class) in classes.iter().enumerate() {
            if ids.insert(class.name.clone(), index).is_some() {
                bail!("duplicate class {}", class.name);
            }
        }

        let mut supers = Vec::with_capacity(classes.len());
        for class in &classes {
            let super_index = match &class.super_name {
                Some(name) => Some(
                    *ids.get(name)
                        .context(format!("superclass {name} of {} not found", class.name))?,
                ),
                None => None,
            };
            let mut interfaces = Vec::new();
            for name in &class.interfaces {
                let index = *ids
                    .get(name)
                    .context(format!("interface {name} of {} not found", class.name))?;
                if !classes[index].is_interface() {
                    bail!("{} implements {name}, which is not an interface", class.name);
                }
                interfaces.push(index);
            }
            supers.push((super_index, interfaces));
        }

        let order = link_order(&classes, &supers)?;

        // method ids follow declaration order
        let mut method_owner = Vec::new();
        let mut first_method = Vec::with_capacity(classes.len());
        for (class_index, class) in classes.iter().enumerate() {
            first_method.push(method_owner.len());
            for method_index in 0..class.methods.len() {
                method_owner.push((class_index, method_index));
            }
        }
        let method_spec = |id: MethodId| {
            let (class_index, method_index) = method_owner[id.index()];
            &classes[class_index].methods[method_index]
        };
        let method_id = |class_index: usize, method_index: usize| {
            MethodId::from((first_method[class_index] + method_index) as u32)
        };

        let mut linked: Vec<Option<Linked>> = vec![None; classes.len()];
        for &index in &order {
            let class = &classes[index];
            let (super_index, direct_interfaces) = &supers[index];
            let parent = match super_index {
                Some(super_index) => linked[*super_index].clone(),
                None => None,
            };
            let parent = parent.unwrap_or_default();

            let mut interfaces = if class.is_interface() {
                Vec::new()
            } else {
                parent.interfaces.clone()
            };
            for interface in direct_interfaces {
                let interface_linked = linked[*interface]
                    .as_ref()
                    .context("interface linked after its implementor")?;
                for id in std::iter::once(TypeId::from(*interface as u32))
                    .chain(interface_linked.interfaces.iter().copied())
                {
                    if !interfaces.contains(&id) {
                        interfaces.push(id);
                    }
                }
            }

            let base = if super_index.is_some() && !class.is_interface() {
                parent.instance_size
            } else {
                layout::HEADER_SIZE
            };
            let (fields, instance_size, static_size) = lay_out_fields(class, base)?;

            let mut vtable = if class.is_interface() {
                Vec::new()
            } else {
                parent.vtable.clone()
            };
            let mut vtable_indices = Vec::new();
            let mut itable_indices = Vec::new();
            let mut next_itable_index = 0;
            for (method_index, method) in class.methods.iter().enumerate() {
                let id = method_id(index, method_index);
                let is_static = method.flags & access::STATIC != 0;
                if class.is_interface() {
                    vtable_indices.push(None);
                    if is_static || method.name.starts_with('<') {
                        itable_indices.push(None);
                    } else {
                        itable_indices.push(Some(next_itable_index));
                        next_itable_index += 1;
                    }
                    continue;
                }

                itable_indices.push(None);
                if is_static || method.flags & access::PRIVATE != 0 || method.name.starts_with('<')
                {
                    vtable_indices.push(None);
                    continue;
                }
                let overridden = vtable.iter().position(|existing| {
                    let existing = method_spec(*existing);
                    existing.name == method.name && existing.descriptor == method.descriptor
                });
                if let Some(position) = overridden {
                    vtable[position] = id;
                    vtable_indices.push(Some(position));
                } else if method.flags & access::FINAL != 0 || class.flags & access::FINAL != 0 {
                    vtable_indices.push(None);
                } else {
                    vtable.push(id);
                    vtable_indices.push(Some(vtable.len() - 1));
                }
            }

            let declares_finalizer = super_index.is_some()
                && class.methods.iter().any(|method| {
                    method.name == "finalize"
                        && method.descriptor == "()V"
                        && method.flags & access::STATIC == 0
                        && method.code != [Bytecode::Return as u8]
                });

            linked[index] = Some(Linked {
                instance_size,
                static_size,
                fields,
                interfaces,
                vtable,
                vtable_indices,
                itable_indices,
                itable: Vec::new(),
                has_finalizer: parent.has_finalizer || declares_finalizer,
            });
        }

        // itables need the vtables of the whole hierarchy
        for &index in &order {
            if classes[index].is_interface() {
                continue;
            }
            let mut itable = Vec::new();
            let interfaces = linked[index]
                .as_ref()
                .map(|linked| linked.interfaces.clone())
                .unwrap_or_default();
            for interface in interfaces {
                let interface_index = interface.index();
                let interface_class = &classes[interface_index];
                let interface_linked = linked[interface_index]
                    .as_ref()
                    .context("interface not linked")?;
                let mut methods = Vec::new();
                for (method_index, method) in interface_class.methods.iter().enumerate() {
                    if interface_linked.itable_indices[method_index].is_none() {
                        continue;
                    }
                    let implementation = find_implementation(
                        &classes,
                        &supers,
                        &linked,
                        index,
                        &method.name,
                        &method.descriptor,
                        &method_id,
                    );
                    methods.push(implementation.or_else(|| {
                        (method.flags & access::ABSTRACT == 0)
                            .then(|| method_id(interface_index, method_index))
                    }));
                }
                itable.push(ItableEntry { interface, methods });
            }
            if let Some(linked) = linked[index].as_mut() {
                linked.itable = itable;
            }
        }

        let empty_pool = Arc::new(ConstantPool::new(Vec::new()));
        let mut types = Vec::with_capacity(classes.len() + TYPE_ARRAYS.len());
        let mut methods = Vec::with_capacity(method_owner.len());
        let mut names = HashMap::new();
        let object = TypeId::from(*ids.get(OBJECT).context("no java/lang/Object")? as u32);

        for (index, class) in classes.iter().enumerate() {
            let linked = linked[index].take().context("class was never linked")?;
            let id = TypeId::from(index as u32);
            let constants = Arc::new(ConstantPool::new(class.constants.clone()));

            let mut method_ids = Vec::new();
            for (method_index, spec) in class.methods.iter().enumerate() {
                let method = build_method(
                    class,
                    id,
                    spec,
                    method_id(index, method_index),
                    constants.clone(),
                    linked.vtable_indices[method_index],
                    linked.itable_indices[method_index],
                )?;
                method_ids.push(method.id);
                methods.push(Arc::new(method));
            }

            let kind = if class.is_interface() {
                TypeKind::Interface
            } else {
                TypeKind::Instance
            };
            let slow_path = class.flags & (access::ABSTRACT | access::INTERFACE) != 0;
            types.push(Arc::new(TypeDescriptor {
                id,
                name: class.name.clone(),
                kind,
                flags: class.flags,
                super_type: supers[index].0.map(|index| TypeId::from(index as u32)),
                interfaces: linked.interfaces,
                instance_size: linked.instance_size,
                static_size: linked.static_size,
                has_finalizer: linked.has_finalizer,
                slow_path,
                prototype_header: layout::UNLOCKED_VALUE,
                fields: linked.fields,
                methods: method_ids,
                vtable: linked.vtable,
                itable: linked.itable,
                constants,
                init_state: AtomicU8::new(InitState::Linked as u8),
                progress: Mutex::new(InitProgress {
                    state: InitState::Linked,
                    owner: None,
                }),
                initialized: Condvar::new(),
                mirror: OnceLock::new(),
                array_type: OnceLock::new(),
            }));
            names.insert(class.name.clone(), id);
        }

        let mut type_arrays = HashMap::new();
        for element in TYPE_ARRAYS {
            let id = TypeId::from(types.len() as u32);
            let name = type_array_name(element).to_string();
            types.push(Arc::new(array_type(
                id,
                name.clone(),
                TypeKind::TypeArray(element),
                object,
                empty_pool.clone(),
            )));
            names.insert(name, id);
            type_arrays.insert(element, id);
        }

        let lookup = |name: &str| -> Result<TypeId> {
            names.get(name).copied().context(format!("no {name}"))
        };
        let class = lookup(CLASS)?;
        let string = lookup(STRING)?;

        debug!(
            "built universe with {} types and {} methods",
            types.len(),
            methods.len()
        );

        Ok(Universe {
            types: RwLock::new(types),
            names: RwLock::new(names),
            methods,
            type_arrays,
            empty_pool,
            object,
            class,
            string,
        })
    }
}

/// Superclasses and interfaces come before the classes that extend them
fn link_order(classes: &[ClassSpec], supers: &[(Option<usize>, Vec<usize>)]) -> Result<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        index: usize,
        classes: &[ClassSpec],
        supers: &[(Option<usize>, Vec<usize>)],
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => bail!("circular class hierarchy at {}", classes[index].name),
            Mark::Unvisited => {}
        }
        marks[index] = Mark::Visiting;
        let (super_index, interfaces) = &supers[index];
        for parent in super_index.iter().chain(interfaces.iter()) {
            visit(*parent, classes, supers, marks, order)?;
        }
        marks[index] = Mark::Done;
        order.push(index);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; classes.len()];
    let mut order = Vec::with_capacity(classes.len());
    for index in 0..classes.len() {
        visit(index, classes, supers, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// Instance fields continue after the superclass fields, static fields live in
/// the mirror after its header. Larger fields are placed first.
fn lay_out_fields(class: &ClassSpec, base: u32) -> Result<(Vec<FieldInfo>, u32, u32)> {
    let mut fields = Vec::with_capacity(class.fields.len());
    for spec in &class.fields {
        let kind = FieldDescriptor::new(&spec.descriptor)
            .context(format!("field {}.{}", class.name, spec.name))?
            .field_type
            .basic_type();
        fields.push(FieldInfo {
            name: spec.name.clone(),
            descriptor: spec.descriptor.clone(),
            kind,
            offset: 0,
            flags: spec.flags,
        });
    }

    let mut order: Vec<usize> = (0..fields.len()).collect();
    order.sort_by_key(|index| std::cmp::Reverse(fields[*index].kind.size()));

    let mut instance_end = base;
    let mut static_end = layout::HEADER_SIZE;
    for index in order {
        let field = &mut fields[index];
        let size = field.kind.size();
        let cursor = if field.is_static() {
            &mut static_end
        } else {
            &mut instance_end
        };
        let offset = cursor.div_ceil(size) * size;
        field.offset = offset;
        *cursor = offset + size;
    }

    let align = |size: u32| layout::align_object_size(size).context("class too large");
    Ok((fields, align(instance_end)?, align(static_end)?))
}

/// Non-static implementation of `name` visible from class `index`
fn find_implementation(
    classes: &[ClassSpec],
    supers: &[(Option<usize>, Vec<usize>)],
    linked: &[Option<Linked>],
    index: usize,
    name: &str,
    descriptor: &str,
    method_id: &impl Fn(usize, usize) -> MethodId,
) -> Option<MethodId> {
    let mut current = Some(index);
    while let Some(class_index) = current {
        let class = &classes[class_index];
        let found = class.methods.iter().position(|method| {
            method.name == name
                && method.descriptor == descriptor
                && method.flags & access::STATIC == 0
        });
        if let Some(method_index) = found {
            return Some(method_id(class_index, method_index));
        }
        current = supers[class_index].0;
        if current.is_some_and(|parent| linked[parent].is_none()) {
            return None;
        }
    }
    None
}

fn build_method(
    class: &ClassSpec,
    holder: TypeId,
    spec: &MethodSpec,
    id: MethodId,
    constants: Arc<ConstantPool>,
    vtable_index: Option<usize>,
    itable_index: Option<usize>,
) -> Result<Method> {
    let descriptor = MethodDescriptor::new(&spec.descriptor)
        .context(format!("method {}.{}", class.name, spec.name))?;
    let is_static = spec.flags & access::STATIC != 0;
    let size_of_parameters = descriptor.parameter_slots() + usize::from(!is_static);
    let is_body_less = spec.flags & (access::ABSTRACT | access::NATIVE) != 0;
    if spec.code.is_empty() && !is_body_less {
        bail!("{}.{}{} has no code", class.name, spec.name, spec.descriptor);
    }

    let code = CodeBuffer::new(&spec.code);
    rewrite(&code, &constants, class.name == OBJECT && spec.name == "<init>")
        .context(format!("linking {}.{}{}", class.name, spec.name, spec.descriptor))?;

    Ok(Method {
        id,
        holder,
        holder_name: class.name.clone(),
        name: spec.name.clone(),
        descriptor: spec.descriptor.clone(),
        flags: spec.flags,
        max_locals: spec.max_locals.max(size_of_parameters),
        max_stack: spec.max_stack,
        size_of_parameters,
        result: descriptor.return_type(),
        code,
        constants,
        exception_table: spec.exception_table.clone(),
        vtable_index,
        itable_index,
        counters: MethodCounters::default(),
        method_data: OnceLock::new(),
    })
}

/// Link time rewriting: reference constants get their own `ldc`,
/// signature polymorphic calls become `invokehandle` and the constructor of
/// `Object` registers finalizers on return.
fn rewrite(code: &CodeBuffer, constants: &ConstantPool, registers_finalizer: bool) -> Result<()> {
    let mut bci = 0;
    while bci < code.len() {
        let bytecode = code.bytecode_at(bci)?;
        match bytecode {
            Bytecode::Ldc | Bytecode::LdcW => {
                let index = if bytecode == Bytecode::Ldc {
                    code.u1(bci + 1)? as u16
                } else {
                    code.u2(bci + 1)?
                };
                if matches!(
                    constants.constant(index)?,
                    Constant::String(_) | Constant::Class(_)
                ) {
                    let fast = if bytecode == Bytecode::Ldc {
                        Bytecode::FastAldc
                    } else {
                        Bytecode::FastAldcW
                    };
                    code.patch(bci, fast)?;
                }
            }
            Bytecode::Invokevirtual => {
                let member = constants.member_ref(code.u2(bci + 1)?)?;
                if member.class == METHOD_HANDLE
                    && (member.name == "invoke" || member.name == "invokeExact")
                {
                    code.patch(bci, Bytecode::Invokehandle)?;
                }
            }
            Bytecode::Return if registers_finalizer => {
                code.patch(bci, Bytecode::ReturnRegisterFinalizer)?;
            }
            _ => {}
        }
        bci += code.instruction_length_at(bci)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytecode::Assembler;

    use super::*;

    fn ret() -> Vec<u8> {
        vec![Bytecode::Return as u8]
    }

    fn build(classes: Vec<ClassSpec>) -> Universe {
        let mut builder = UniverseBuilder::new();
        for class in classes {
            builder.class(class);
        }
        builder.build().unwrap()
    }

    #[test]
    fn field_layout() {
        let universe = build(vec![
            ClassSpec::new("Base").field("flag", "Z", 0).field("count", "J", 0),
            ClassSpec::new("Derived")
                .extends("Base")
                .field("c", "C", 0)
                .field("ref", "Ljava/lang/Object;", 0)
                .field("total", "I", access::STATIC),
        ]);

        let base = universe.type_of(universe.lookup("Base").unwrap()).unwrap();
        assert_eq!(base.field("count", "J").unwrap().offset, 16);
        assert_eq!(base.field("flag", "Z").unwrap().offset, 24);
        assert_eq!(base.instance_size, 32);

        let derived = universe.type_of(universe.lookup("Derived").unwrap()).unwrap();
        assert_eq!(derived.field("ref", "Ljava/lang/Object;").unwrap().offset, 32);
        assert_eq!(derived.field("c", "C").unwrap().offset, 36);
        assert_eq!(derived.instance_size, 40);
        assert_eq!(derived.field("total", "I").unwrap().offset, 16);
        assert_eq!(derived.static_size, 24);

        let (holder, field) = universe
            .find_field(derived.id, "count", "J")
            .unwrap()
            .unwrap();
        assert_eq!(holder, base.id);
        assert_eq!(field.offset, 16);
    }

    #[test]
    fn vtable_overrides_keep_their_slot() {
        let universe = build(vec![
            ClassSpec::new("Shape")
                .method(MethodSpec::new("area", "()I", access::PUBLIC).code(ret()))
                .method(MethodSpec::new("name", "()V", access::PUBLIC).code(ret()))
                .method(MethodSpec::new("id", "()V", access::PUBLIC | access::FINAL).code(ret())),
            ClassSpec::new("Square")
                .extends("Shape")
                .method(MethodSpec::new("area", "()I", access::PUBLIC).code(ret()))
                .method(MethodSpec::new("helper", "()V", access::PRIVATE).code(ret())),
        ]);

        let shape = universe.method_named("Shape", "area", "()I").unwrap();
        let square = universe.method_named("Square", "area", "()I").unwrap();
        assert_eq!(shape.vtable_index, square.vtable_index);
        let square_type = universe.type_of(square.holder).unwrap();
        assert_eq!(square_type.vtable[square.vtable_index.unwrap()], square.id);

        assert_eq!(universe.method_named("Shape", "id", "()V").unwrap().vtable_index, None);
        assert_eq!(universe.method_named("Square", "helper", "()V").unwrap().vtable_index, None);
        // inherited methods are found through the superclass
        let name = universe.method_named("Square", "name", "()V").unwrap();
        assert_eq!(name.holder_name, "Shape");
    }

    #[test]
    fn itables() {
        let universe = build(vec![
            ClassSpec::interface("Sized")
                .method(MethodSpec::new("size", "()I", access::PUBLIC | access::ABSTRACT))
                .method(MethodSpec::new("empty", "()Z", access::PUBLIC).code(vec![
                    Bytecode::Iconst0 as u8,
                    Bytecode::Ireturn as u8,
                ])),
            ClassSpec::interface("Bag").implements("Sized"),
            ClassSpec::new("ListBag")
                .implements("Bag")
                .method(MethodSpec::new("size", "()I", access::PUBLIC).code(vec![
                    Bytecode::Iconst1 as u8,
                    Bytecode::Ireturn as u8,
                ])),
        ]);

        let sized = universe.lookup("Sized").unwrap();
        let bag = universe.lookup("Bag").unwrap();
        let list = universe.type_of(universe.lookup("ListBag").unwrap()).unwrap();
        assert_eq!(list.interfaces, vec![bag, sized]);

        let entry = list.itable_entry(sized).unwrap();
        let size = universe.method_named("ListBag", "size", "()I").unwrap();
        let empty = universe
            .find_interface_method(sized, "empty", "()Z")
            .unwrap()
            .unwrap();
        assert_eq!(entry.methods, vec![Some(size.id), Some(empty.id)]);
        assert_eq!(empty.itable_index, Some(1));
        assert!(list.itable_entry(bag).unwrap().methods.is_empty());
    }

    #[test]
    fn subtypes() {
        let universe = build(vec![
            ClassSpec::interface("Marker"),
            ClassSpec::new("A").implements("Marker"),
            ClassSpec::new("B").extends("A"),
        ]);
        let a = universe.lookup("A").unwrap();
        let b = universe.lookup("B").unwrap();
        let marker = universe.lookup("Marker").unwrap();

        assert!(universe.is_subtype_of(b, a).unwrap());
        assert!(universe.is_subtype_of(b, marker).unwrap());
        assert!(universe.is_subtype_of(b, universe.object).unwrap());
        assert!(!universe.is_subtype_of(a, b).unwrap());

        let b_array = universe.lookup("[LB;").unwrap();
        let a_array = universe.lookup("[LA;").unwrap();
        assert!(universe.is_subtype_of(b_array, a_array).unwrap());
        assert!(!universe.is_subtype_of(a_array, b_array).unwrap());
        assert!(universe.is_subtype_of(a_array, universe.object).unwrap());
        let ints = universe.lookup("[I").unwrap();
        assert!(!universe.is_subtype_of(ints, a_array).unwrap());
    }

    #[test]
    fn array_types_are_created_once() {
        let universe = build(vec![]);
        let count = universe.type_count();
        let matrix = universe.lookup("[[I").unwrap();
        assert_eq!(universe.lookup("[[I").unwrap(), matrix);
        assert_eq!(universe.type_count(), count + 1);
        let ints = universe.element_type(matrix).unwrap();
        assert_eq!(ints, universe.type_array(BasicType::Int).unwrap());
        assert_eq!(universe.type_of(matrix).unwrap().name, "[[I");

        assert!(matches!(universe.lookup("Missing"), Err(Failure::Linkage(_))));
        assert!(matches!(universe.lookup("[Q"), Err(Failure::Linkage(_))));
    }

    #[test]
    fn link_time_rewrites() {
        let mut asm = Assembler::new();
        asm.op_u1(Bytecode::Ldc, 1)
            .op_u1(Bytecode::Ldc, 2)
            .op_u2(Bytecode::Invokevirtual, 3)
            .op(Bytecode::Return);
        let universe = build(vec![
            ClassSpec::new("Main")
                .constants(vec![
                    Constant::Int(5),
                    Constant::String("hi".to_string()),
                    Constant::Method(MemberRef::new(
                        METHOD_HANDLE,
                        "invokeExact",
                        "()V",
                    )),
                ])
                .method(
                    MethodSpec::new("run", "()V", access::STATIC).code(asm.finish().unwrap()),
                ),
            ClassSpec::new(METHOD_HANDLE),
        ]);

        let run = universe.static_method("Main", "run", "()V").unwrap();
        assert_eq!(run.code.bytecode_at(0).unwrap(), Bytecode::Ldc);
        assert_eq!(run.code.bytecode_at(2).unwrap(), Bytecode::FastAldc);
        assert_eq!(run.code.bytecode_at(4).unwrap(), Bytecode::Invokehandle);

        let init = universe.method_named(OBJECT, "<init>", "()V").unwrap();
        assert_eq!(init.code.bytecode_at(0).unwrap(), Bytecode::ReturnRegisterFinalizer);
    }

    #[test]
    fn finalizers_and_parameters() {
        let universe = build(vec![
            ClassSpec::new("Resource").method(
                MethodSpec::new("finalize", "()V", access::PROTECTED).code(vec![
                    Bytecode::Nop as u8,
                    Bytecode::Return as u8,
                ]),
            ),
            ClassSpec::new("File")
                .extends("Resource")
                .method(MethodSpec::new("seek", "(JI)V", access::PUBLIC).code(ret())),
        ]);
        let file = universe.type_of(universe.lookup("File").unwrap()).unwrap();
        assert!(file.has_finalizer);
        assert!(!universe.type_of(universe.object).unwrap().has_finalizer);

        let seek = universe.method_named("File", "seek", "(JI)V").unwrap();
        assert_eq!(seek.size_of_parameters, 4);
        assert_eq!(seek.max_locals, 4);
        assert_eq!(seek.to_string(), "File.seek(JI)V");
    }

    #[test]
    fn broken_hierarchies() {
        let mut builder = UniverseBuilder::new();
        builder.class(ClassSpec::new("A").extends("B"));
        builder.class(ClassSpec::new("B").extends("A"));
        assert!(builder.build().is_err());

        let mut builder = UniverseBuilder::new();
        builder.class(ClassSpec::new("A"));
        builder.class(ClassSpec::new("A"));
        assert!(builder.build().is_err());

        let mut builder = UniverseBuilder::new();
        builder.class(ClassSpec::new("A").extends("Nowhere"));
        assert!(builder.build().is_err());
    }

    #[test]
    fn initialization_claims() {
        let universe = build(vec![ClassSpec::new("Lazy")]);
        let lazy = universe.type_of(universe.lookup("Lazy").unwrap()).unwrap();
        let main = ThreadId::from(1);

        assert_eq!(lazy.begin_initialization(main).unwrap(), InitClaim::Claimed);
        assert_eq!(lazy.begin_initialization(main).unwrap(), InitClaim::Recursive);
        assert_eq!(lazy.initializing_thread(), Some(main));
        lazy.finish_initialization(true).unwrap();
        assert!(lazy.is_initialized());
        assert_eq!(lazy.begin_initialization(main).unwrap(), InitClaim::Done);
    }
}
