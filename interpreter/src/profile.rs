//! Invocation and backedge counters plus the per-bytecode profile that is
//! created once a method gets warm.
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use common::TypeId;

use crate::failure::Failure;

/// Receiver rows kept per call site or type check before it counts as polymorphic
pub const TYPE_PROFILE_WIDTH: usize = 2;

#[derive(Debug, Default)]
pub struct MethodCounters {
    invocations: AtomicU64,
    backedges: AtomicU64,
}

impl MethodCounters {
    pub fn increment_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn increment_backedge(&self) -> u64 {
        self.backedges.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn backedge_count(&self) -> u64 {
        self.backedges.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProfileCell {
    pub taken: u64,
    pub not_taken: u64,
    /// Executions of a call site or type check
    pub count: u64,
    pub null_seen: bool,
    pub receivers: Vec<(TypeId, u64)>,
    /// Receivers that did not fit into a row
    pub polymorphic: u64,
    pub type_check_failures: u64,
    pub default_count: u64,
    pub case_counts: Vec<u64>,
    pub ret_targets: Vec<(usize, u64)>,
}

impl ProfileCell {
    fn record_receiver(&mut self, receiver: TypeId) {
        if let Some(row) = self.receivers.iter_mut().find(|(ty, _)| *ty == receiver) {
            row.1 += 1;
        } else if self.receivers.len() < TYPE_PROFILE_WIDTH {
            self.receivers.push((receiver, 1));
        } else {
            self.polymorphic += 1;
        }
    }
}

/// Profile of one method keyed by bci
#[derive(Debug, Default)]
pub struct MethodData {
    cells: Mutex<HashMap<usize, ProfileCell>>,
}

impl MethodData {
    pub fn with_cell<R>(
        &self,
        bci: usize,
        update: impl FnOnce(&mut ProfileCell) -> R,
    ) -> Result<R, Failure> {
        let mut cells = self
            .cells
            .lock()
            .map_err(|e| Failure::Fatal(format!("Lock poisoned: {e}")))?;
        Ok(update(cells.entry(bci).or_default()))
    }

    pub fn cell(&self, bci: usize) -> Option<ProfileCell> {
        self.cells.lock().ok()?.get(&bci).cloned()
    }

    /// Returns the updated taken count
    pub fn profile_taken_branch(&self, bci: usize) -> Result<u64, Failure> {
        self.with_cell(bci, |cell| {
            cell.taken += 1;
            cell.taken
        })
    }

    pub fn profile_not_taken_branch(&self, bci: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| cell.not_taken += 1)
    }

    pub fn profile_call(&self, bci: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| cell.count += 1)
    }

    pub fn profile_virtual_call(&self, bci: usize, receiver: TypeId) -> Result<(), Failure> {
        self.with_cell(bci, |cell| {
            cell.count += 1;
            cell.record_receiver(receiver);
        })
    }

    pub fn profile_null_seen(&self, bci: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| cell.null_seen = true)
    }

    pub fn profile_typecheck(&self, bci: usize, receiver: TypeId) -> Result<(), Failure> {
        self.with_cell(bci, |cell| {
            cell.count += 1;
            cell.record_receiver(receiver);
        })
    }

    pub fn profile_typecheck_failed(&self, bci: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| cell.type_check_failures += 1)
    }

    pub fn profile_switch_default(&self, bci: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| cell.default_count += 1)
    }

    pub fn profile_switch_case(&self, bci: usize, index: usize, cases: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| {
            if cell.case_counts.len() < cases {
                cell.case_counts.resize(cases, 0);
            }
            cell.case_counts[index] += 1;
        })
    }

    pub fn profile_ret(&self, bci: usize, target: usize) -> Result<(), Failure> {
        self.with_cell(bci, |cell| {
            if let Some(row) = cell.ret_targets.iter_mut().find(|(bci, _)| *bci == target) {
                row.1 += 1;
            } else {
                cell.ret_targets.push((target, 1));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let counters = MethodCounters::default();
        assert_eq!(counters.increment_invocation(), 1);
        assert_eq!(counters.increment_backedge(), 1);
        assert_eq!(counters.increment_backedge(), 2);
        assert_eq!(counters.invocation_count(), 1);
        assert_eq!(counters.backedge_count(), 2);
    }

    #[test]
    fn receiver_rows_overflow() {
        let data = MethodData::default();
        for receiver in [1, 2, 1, 3, 4] {
            data.profile_virtual_call(7, TypeId::from(receiver)).unwrap();
        }
        let cell = data.cell(7).unwrap();
        assert_eq!(cell.count, 5);
        assert_eq!(cell.receivers, vec![(TypeId::from(1), 2), (TypeId::from(2), 1)]);
        assert_eq!(cell.polymorphic, 2);
    }

    #[test]
    fn branches_and_switches() {
        let data = MethodData::default();
        assert_eq!(data.profile_taken_branch(3).unwrap(), 1);
        assert_eq!(data.profile_taken_branch(3).unwrap(), 2);
        data.profile_not_taken_branch(3).unwrap();
        data.profile_switch_case(9, 2, 4).unwrap();
        data.profile_switch_default(9).unwrap();

        let branch = data.cell(3).unwrap();
        assert_eq!((branch.taken, branch.not_taken), (2, 1));
        let switch = data.cell(9).unwrap();
        assert_eq!(switch.case_counts, vec![0, 0, 1, 0]);
        assert_eq!(switch.default_count, 1);
        assert!(data.cell(4).is_none());
    }
}
