use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::failure::Failure;

/// Global stop request polled by interpreter threads at backward branches
/// and method returns.
#[derive(Debug, Default)]
pub struct Safepoint {
    requested: AtomicBool,
    active: Mutex<bool>,
    resumed: Condvar,
}

impl Safepoint {
    pub fn begin(&self) -> Result<(), Failure> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        *active = true;
        self.requested.store(true, Ordering::Release);
        debug!("safepoint requested");
        Ok(())
    }

    pub fn end(&self) -> Result<(), Failure> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        *active = false;
        self.requested.store(false, Ordering::Release);
        self.resumed.notify_all();
        debug!("safepoint released");
        Ok(())
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Parks the calling thread while a safepoint is in progress
    pub fn poll(&self) -> Result<(), Failure> {
        if !self.is_requested() {
            return Ok(());
        }

        let mut active = self
            .active
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        while *active {
            active = self
                .resumed
                .wait(active)
                .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn poll_without_request() {
        let safepoint = Safepoint::default();
        safepoint.poll().unwrap();
        assert!(!safepoint.is_requested());
    }

    #[test]
    fn poll_parks_until_end() {
        let safepoint = Arc::new(Safepoint::default());
        let passed = Arc::new(AtomicBool::new(false));
        safepoint.begin().unwrap();

        let poller = {
            let (safepoint, passed) = (safepoint.clone(), passed.clone());
            thread::spawn(move || {
                safepoint.poll().unwrap();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));
        safepoint.end().unwrap();
        poller.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }
}
