//! Process-wide committed/reserved memory accounting.
//!
//! Every heap allocation and grow charges these counters before touching
//! memory, and every release uncharges them. The critical section is the
//! counter update only; the page-fault cost of an allocation never happens
//! under the accountant, so worker threads do not serialize on each other's
//! allocations.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BasaltError, Result};

/// Shared committed/reserved byte counters checked against fixed ceilings.
///
/// Ceilings are read once at construction (process start) and enforced for
/// the accountant's lifetime. A charge that would exceed either ceiling
/// fails without any partial commitment.
#[derive(Debug)]
pub struct MemoryAccountant {
    mem_ceiling_bytes: usize,
    vm_ceiling_bytes: usize,
    committed: AtomicUsize,
    reserved: AtomicUsize,
}

impl MemoryAccountant {
    /// Create an accountant with the given committed/reserved ceilings.
    #[must_use]
    pub fn new(mem_ceiling_bytes: usize, vm_ceiling_bytes: usize) -> Self {
        Self {
            mem_ceiling_bytes,
            vm_ceiling_bytes,
            committed: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
        }
    }

    /// An accountant with both ceilings disabled, for tests and tools.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    /// Currently committed bytes across all live heaps.
    #[must_use]
    pub fn committed_bytes(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Currently reserved address-space bytes across all live heaps.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Charge bytes against both counters, all-or-nothing.
    ///
    /// On failure neither counter moves; the caller sees exactly the state
    /// from before the attempt.
    pub fn charge(&self, committed_delta: usize, reserved_delta: usize) -> Result<()> {
        try_add(
            &self.committed,
            committed_delta,
            self.mem_ceiling_bytes,
            "committed",
        )?;
        if let Err(e) = try_add(
            &self.reserved,
            reserved_delta,
            self.vm_ceiling_bytes,
            "reserved",
        ) {
            self.committed.fetch_sub(committed_delta, Ordering::AcqRel);
            return Err(e);
        }
        Ok(())
    }

    /// Return previously charged bytes. Saturates at zero.
    pub fn uncharge(&self, committed_delta: usize, reserved_delta: usize) {
        saturating_sub(&self.committed, committed_delta);
        saturating_sub(&self.reserved, reserved_delta);
    }
}

fn try_add(counter: &AtomicUsize, delta: usize, ceiling: usize, label: &str) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    loop {
        let current = counter.load(Ordering::Acquire);
        let next = current.checked_add(delta).unwrap_or(usize::MAX);
        if next > ceiling {
            tracing::warn!(
                current,
                requested = delta,
                limit = ceiling,
                "{label} memory ceiling exceeded"
            );
            return Err(BasaltError::OutOfMemory(format!(
                "{label}: current {current}, requested {delta}, limit {ceiling}"
            )));
        }
        if counter
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(());
        }
    }
}

fn saturating_sub(counter: &AtomicUsize, delta: usize) {
    if delta == 0 {
        return;
    }
    let mut current = counter.load(Ordering::Acquire);
    loop {
        let next = current.saturating_sub(delta);
        match counter.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn ceiling_rejects_third_megabyte() {
        let acct = MemoryAccountant::new(2 * MB, usize::MAX);
        acct.charge(MB, MB).unwrap();
        acct.charge(MB, MB).unwrap();
        let err = acct.charge(MB, MB).unwrap_err();
        assert!(matches!(err, BasaltError::OutOfMemory(_)));
        assert_eq!(acct.committed_bytes(), 2 * MB);
    }

    #[test]
    fn reserved_failure_rolls_back_committed() {
        let acct = MemoryAccountant::new(usize::MAX, MB);
        acct.charge(MB, MB).unwrap();
        assert!(acct.charge(MB, MB).is_err());
        assert_eq!(acct.committed_bytes(), MB);
        assert_eq!(acct.reserved_bytes(), MB);
    }

    #[test]
    fn uncharge_saturates() {
        let acct = MemoryAccountant::unbounded();
        acct.charge(10, 10).unwrap();
        acct.uncharge(100, 100);
        assert_eq!(acct.committed_bytes(), 0);
        assert_eq!(acct.reserved_bytes(), 0);
    }
}
