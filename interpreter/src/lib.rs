use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering, fence};

use anyhow::{Context, Result};
use common::{ObjectRef, ThreadId, TypeId, Value};

use crate::barrier::{BarrierSet, CardTableBarrier};
use crate::config::InterpreterConfig;
use crate::failure::Failure;
use crate::heap::{Heap, layout};
use crate::interpreter::InterpreterThread;
use crate::runtime::{DefaultRuntime, Runtime};
use crate::safepoint::Safepoint;
use crate::synchronizer::Synchronizer;
use crate::templates::TemplateTable;
use crate::universe::Universe;

pub mod barrier;
pub mod cache;
pub mod config;
pub mod context;
pub mod failure;
pub mod frame;
pub mod heap;
pub mod interpreter;
pub mod profile;
pub mod runtime;
pub mod safepoint;
pub mod synchronizer;
pub mod templates;
pub mod universe;

#[cfg(test)]
mod testing;

/// State shared by every interpreter thread
pub struct Vm {
    pub config: InterpreterConfig,
    pub universe: Universe,
    pub heap: Heap,
    pub barrier: Arc<dyn BarrierSet>,
    pub synchronizer: Synchronizer,
    pub safepoint: Safepoint,
    pub runtime: Arc<dyn Runtime>,
    pub templates: TemplateTable,
    next_thread_id: AtomicI64,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("heap_used", &self.heap.used())
            .finish_non_exhaustive()
    }
}

impl Vm {
    pub fn new(config: InterpreterConfig, universe: Universe) -> Result<Arc<Self>> {
        let barrier = Arc::new(CardTableBarrier::new(config.heap_size));
        Self::with_parts(config, universe, Arc::new(DefaultRuntime::new()), barrier)
    }

    pub fn with_parts(
        config: InterpreterConfig,
        universe: Universe,
        runtime: Arc<dyn Runtime>,
        barrier: Arc<dyn BarrierSet>,
    ) -> Result<Arc<Self>> {
        config.validate().context("invalid interpreter configuration")?;
        Ok(Arc::new(Self {
            heap: Heap::new(config.heap_size),
            config,
            universe,
            barrier,
            synchronizer: Synchronizer::default(),
            safepoint: Safepoint::default(),
            runtime,
            templates: TemplateTable::new(),
            next_thread_id: AtomicI64::new(1),
        }))
    }

    pub fn next_thread_id(&self) -> ThreadId {
        ThreadId::from(self.next_thread_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new_thread(self: &Arc<Self>, name: &str) -> InterpreterThread {
        InterpreterThread::new(name.to_string(), self.clone())
    }

    /// The object holding the static fields of `ty`, created on first use
    pub fn mirror(&self, ty: TypeId) -> Result<ObjectRef, Failure> {
        let descriptor = self.universe.type_of(ty)?;
        if let Some(mirror) = descriptor.mirror() {
            return Ok(mirror);
        }

        let address = self
            .heap
            .allocate(descriptor.static_size)
            .ok_or(Failure::OutOfMemory)?;
        self.heap.zero(address, address + descriptor.static_size)?;
        let mirror = ObjectRef::from(address);
        self.heap.set_mark(mirror, layout::UNLOCKED_VALUE)?;
        self.heap.set_klass(mirror, self.universe.class)?;
        fence(Ordering::Release);
        Ok(descriptor.set_mirror(mirror))
    }

    /// Reads a field of `obj` by name, looking through its superclasses
    pub fn field_value(&self, obj: ObjectRef, name: &str, descriptor: &str) -> Result<Value> {
        let ty = self.heap.klass(obj)?;
        let (_, field) = self
            .universe
            .find_field(ty, name, descriptor)?
            .context(format!("no field {name} {descriptor} in {ty:?}"))?;
        Ok(self.heap.load(obj.address() + field.offset, field.kind)?)
    }

    pub fn static_value(&self, class: &str, name: &str, descriptor: &str) -> Result<Value> {
        let ty = self.universe.lookup(class)?;
        let (holder, field) = self
            .universe
            .find_field(ty, name, descriptor)?
            .context(format!("no field {class}.{name} {descriptor}"))?;
        let mirror = self.mirror(holder)?;
        Ok(self.heap.load(mirror.address() + field.offset, field.kind)?)
    }

    /// Contents of a `java/lang/String`
    pub fn string_value(&self, string: ObjectRef) -> Result<String> {
        let chars = self.field_value(string, "value", "[C")?.reference()?;
        let length = self.heap.array_length(chars)?;
        let mut units = Vec::with_capacity(length as usize);
        for index in 0..length as u32 {
            let address = chars.address() + layout::element_offset(common::BasicType::Char, index);
            units.push(self.heap.load_u16(address)?);
        }
        Ok(String::from_utf16(&units)?)
    }
}
