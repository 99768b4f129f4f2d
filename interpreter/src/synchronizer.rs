use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use common::{ObjectRef, ThreadId};
use tracing::debug;

use crate::failure::Failure;
use crate::heap::{Heap, layout};

#[derive(Debug)]
struct Monitor {
    entry_count: u64,
    owner: ThreadId,
    /// Mark word the object had before it was locked, restored on the final exit
    displaced: u64,
}

/// Object monitors shared by all interpreter threads.
///
/// A locked object has [`layout::LOCKED_VALUE`] in its mark word, the
/// previous mark is kept here and handed back to the interpreter so that it
/// can be recorded in the frame's lock record.
#[derive(Debug, Default)]
pub struct Synchronizer {
    monitors: Mutex<HashMap<ObjectRef, Monitor>>,
    released: Condvar,
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> Failure {
    Failure::Fatal(format!("Lock poisoned: {err}"))
}

impl Synchronizer {
    /// Blocks until `thread` owns the monitor of `obj`. Returns the displaced
    /// mark word, `0` for a recursive enter.
    pub fn lock_object(
        &self,
        heap: &Heap,
        obj: ObjectRef,
        thread: ThreadId,
    ) -> Result<u64, Failure> {
        if obj.is_null() {
            return Err(Failure::NullReference);
        }

        let mut monitors = self.monitors.lock().map_err(poisoned)?;
        loop {
            match monitors.get_mut(&obj) {
                Some(monitor) if monitor.owner == thread => {
                    monitor.entry_count += 1;
                    debug!(
                        "re-entered monitor for {obj:?} with thread {thread}, count {}",
                        monitor.entry_count
                    );
                    return Ok(0);
                }
                Some(_) => {
                    monitors = self.released.wait(monitors).map_err(poisoned)?;
                }
                None => {
                    let displaced = heap.mark(obj)?;
                    heap.set_mark(obj, (displaced & !layout::LOCK_MASK) | layout::LOCKED_VALUE)?;
                    monitors.insert(
                        obj,
                        Monitor {
                            entry_count: 1,
                            owner: thread,
                            displaced,
                        },
                    );
                    debug!("entered monitor for {obj:?} with thread {thread}");
                    return Ok(displaced);
                }
            }
        }
    }

    pub fn unlock_object(
        &self,
        heap: &Heap,
        obj: ObjectRef,
        thread: ThreadId,
    ) -> Result<(), Failure> {
        let mut monitors = self.monitors.lock().map_err(poisoned)?;
        let Some(monitor) = monitors.get_mut(&obj) else {
            return Err(Failure::IllegalMonitorState);
        };
        if monitor.owner != thread {
            return Err(Failure::IllegalMonitorState);
        }

        monitor.entry_count -= 1;
        if monitor.entry_count == 0 {
            heap.set_mark(obj, monitor.displaced)?;
            monitors.remove(&obj);
            debug!("thread {thread} is no longer the owner of {obj:?}");
            self.released.notify_all();
        } else {
            debug!("exited monitor for {obj:?} with thread {thread}");
        }

        Ok(())
    }

    pub fn owner(&self, obj: ObjectRef) -> Result<Option<ThreadId>, Failure> {
        let monitors = self.monitors.lock().map_err(poisoned)?;
        Ok(monitors.get(&obj).map(|monitor| monitor.owner))
    }

    pub fn entry_count(&self, obj: ObjectRef) -> Result<u64, Failure> {
        let monitors = self.monitors.lock().map_err(poisoned)?;
        Ok(monitors.get(&obj).map_or(0, |monitor| monitor.entry_count))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn object(heap: &Heap) -> ObjectRef {
        let obj = ObjectRef::from(heap.allocate(16).unwrap());
        heap.set_mark(obj, layout::UNLOCKED_VALUE).unwrap();
        obj
    }

    #[test]
    fn recursive_enter() {
        let heap = Heap::new(256);
        let sync = Synchronizer::default();
        let obj = object(&heap);
        let main = ThreadId::from(1);

        assert_eq!(sync.lock_object(&heap, obj, main).unwrap(), layout::UNLOCKED_VALUE);
        assert_eq!(heap.mark(obj).unwrap() & layout::LOCK_MASK, layout::LOCKED_VALUE);
        assert_eq!(sync.lock_object(&heap, obj, main).unwrap(), 0);
        assert_eq!(sync.entry_count(obj).unwrap(), 2);

        sync.unlock_object(&heap, obj, main).unwrap();
        assert_eq!(sync.owner(obj).unwrap(), Some(main));
        sync.unlock_object(&heap, obj, main).unwrap();
        assert_eq!(sync.owner(obj).unwrap(), None);
        assert_eq!(heap.mark(obj).unwrap(), layout::UNLOCKED_VALUE);
    }

    #[test]
    fn exit_by_other_thread() {
        let heap = Heap::new(256);
        let sync = Synchronizer::default();
        let obj = object(&heap);

        assert_eq!(
            sync.unlock_object(&heap, obj, ThreadId::from(1)),
            Err(Failure::IllegalMonitorState)
        );
        sync.lock_object(&heap, obj, ThreadId::from(1)).unwrap();
        assert_eq!(
            sync.unlock_object(&heap, obj, ThreadId::from(2)),
            Err(Failure::IllegalMonitorState)
        );
    }

    #[test]
    fn contended_enter_waits_for_release() {
        let heap = Arc::new(Heap::new(256));
        let sync = Arc::new(Synchronizer::default());
        let obj = object(&heap);
        let acquired = Arc::new(AtomicBool::new(false));

        sync.lock_object(&heap, obj, ThreadId::from(1)).unwrap();
        let waiter = {
            let (heap, sync, acquired) = (heap.clone(), sync.clone(), acquired.clone());
            thread::spawn(move || {
                sync.lock_object(&heap, obj, ThreadId::from(2)).unwrap();
                acquired.store(true, Ordering::SeqCst);
                sync.unlock_object(&heap, obj, ThreadId::from(2)).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        sync.unlock_object(&heap, obj, ThreadId::from(1)).unwrap();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
