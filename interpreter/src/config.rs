use anyhow::{Result, bail};

use crate::heap::layout;

/// Switches and thresholds the interpreter consults while executing.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Replace bytecodes with quickened forms after their first execution
    pub rewrite_bytecodes: bool,
    /// Fuse `iload` and `aload_0` with the instruction that follows them
    pub rewrite_frequent_pairs: bool,
    /// Collect branch, call and type profiles into per-method data
    pub profile_interpreter: bool,
    /// Post breakpoint and field watch events to the debugging agent
    pub jvmti_hooks: bool,
    pub use_loop_counter: bool,
    pub use_on_stack_replacement: bool,
    /// Allocate from a thread-local buffer before falling back to the shared heap
    pub use_tlab: bool,
    /// Thread-local buffers are zeroed when handed out, objects are not zeroed again
    pub zero_tlab: bool,
    /// Bump-allocate in the shared heap without calling into the runtime
    pub allow_shared_alloc: bool,
    pub tlab_size: u32,
    pub heap_size: u32,
    /// Words in each interpreter thread stack
    pub stack_words: usize,
    /// Words kept free at the end of the stack, touching them is an overflow
    pub stack_guard_words: usize,
    /// Invocations plus backedges before per-method profile data is created
    pub profile_limit: u64,
    /// Backedges before a loop asks for an on-stack replacement
    pub backward_branch_limit: u64,
    /// Lookup switches with fewer pairs are searched linearly
    pub binary_switch_threshold: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            rewrite_bytecodes: true,
            rewrite_frequent_pairs: true,
            profile_interpreter: true,
            jvmti_hooks: false,
            use_loop_counter: true,
            use_on_stack_replacement: true,
            use_tlab: true,
            zero_tlab: false,
            allow_shared_alloc: true,
            tlab_size: 4 * 1024,
            heap_size: 8 * 1024 * 1024,
            stack_words: 64 * 1024,
            stack_guard_words: 64,
            profile_limit: 3300,
            backward_branch_limit: 10700,
            binary_switch_threshold: 5,
        }
    }
}

/// Heap addresses are 32 bits wide and the top of the heap must stay addressable
pub const MAX_HEAP_SIZE: u32 = u32::MAX & !(layout::OBJECT_ALIGNMENT - 1);

impl InterpreterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.use_on_stack_replacement && !self.use_loop_counter {
            bail!("on-stack replacement needs loop counters");
        }
        if self.tlab_size % 8 != 0 || self.tlab_size == 0 {
            bail!("tlab size {} is not a positive multiple of 8", self.tlab_size);
        }
        if self.heap_size > MAX_HEAP_SIZE {
            bail!(
                "heap size {} exceeds the addressable {MAX_HEAP_SIZE} bytes",
                self.heap_size
            );
        }
        if self.tlab_size > self.heap_size {
            bail!("tlab size {} exceeds the heap", self.tlab_size);
        }
        if self.stack_guard_words >= self.stack_words {
            bail!("stack guard takes the whole stack");
        }
        if self.binary_switch_threshold == 0 {
            bail!("binary switch threshold must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        InterpreterConfig::default().validate().unwrap();
    }

    #[test]
    fn osr_without_loop_counter() {
        let config = InterpreterConfig {
            use_loop_counter: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = InterpreterConfig {
            use_loop_counter: false,
            use_on_stack_replacement: false,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn heap_must_be_addressable() {
        let config = InterpreterConfig {
            heap_size: u32::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = InterpreterConfig {
            heap_size: MAX_HEAP_SIZE,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn odd_tlab_size() {
        let config = InterpreterConfig {
            tlab_size: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
