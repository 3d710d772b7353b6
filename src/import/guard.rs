//! Single-flight guard keeping long-running operations from overlapping.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::err::Error;

/// Kinds of operations that must not run concurrently with themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    GenotypeImport,
    ClinvarSync,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::GenotypeImport => "genotype import",
            OperationKind::ClinvarSync => "clinvar sync",
        }
    }
}

/// Shared registry of in-flight operations; clone freely across threads.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    slots: Arc<Mutex<HashSet<OperationKind>>>,
}

impl OperationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `kind`, failing with [`Error::Busy`] when an
    /// operation of the same kind is still running.
    pub fn try_acquire(&self, kind: OperationKind) -> Result<OperationSlot, Error> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !slots.insert(kind) {
            return Err(Error::Busy(kind.name()));
        }
        Ok(OperationSlot {
            slots: Arc::clone(&self.slots),
            kind,
        })
    }
}

/// Held slot; dropping it releases the operation kind again.
#[derive(Debug)]
pub struct OperationSlot {
    slots: Arc<Mutex<HashSet<OperationKind>>>,
    kind: OperationKind,
}

impl Drop for OperationSlot {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.kind);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn second_acquire_of_same_kind_is_busy() {
        let guard = OperationGuard::new();
        let slot = guard.try_acquire(OperationKind::GenotypeImport).unwrap();

        let err = guard
            .try_acquire(OperationKind::GenotypeImport)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "another genotype import is already running"
        );

        drop(slot);
        assert!(guard.try_acquire(OperationKind::GenotypeImport).is_ok());
    }

    #[test]
    fn kinds_are_independent() {
        let guard = OperationGuard::new();
        let _import = guard.try_acquire(OperationKind::GenotypeImport).unwrap();
        assert!(guard.try_acquire(OperationKind::ClinvarSync).is_ok());
    }
}
