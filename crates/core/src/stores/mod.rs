//! Persistence interfaces for patient records and the registration ledger.
//!
//! The handler only talks to storage through [`PatientStore`] and
//! [`RegistrationLedgerStore`]. Two implementations of each are provided:
//! - [`memory`]: process-local maps, for tests and embedding
//! - [`files`]: sharded YAML files under the patient data directory

pub mod files;
pub mod memory;

use crate::error::StoreResult;
use regq_record::{PatientRecord, RecordUuid, StoredPatient, TemporaryId};

pub use files::{FileLedgerStore, FilePatientStore};
pub use memory::{InMemoryLedgerStore, InMemoryPatientStore};

/// Stored patient records.
pub trait PatientStore: Send + Sync {
    /// Records holding an identifier with exactly this value.
    fn find_by_identifier_value(&self, value: &str) -> StoreResult<Vec<StoredPatient>>;

    /// Records whose primary full name equals `full_name`, ignoring case.
    fn find_by_full_name(&self, full_name: &str) -> StoreResult<Vec<StoredPatient>>;

    /// Persists `record` under a newly assigned id.
    fn save(&self, record: &PatientRecord) -> StoreResult<RecordUuid>;

    /// Every stored record.
    fn list(&self) -> StoreResult<Vec<StoredPatient>>;
}

/// Result of a conditional ledger insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    /// An entry already existed; it was left untouched.
    AlreadyPresent(RecordUuid),
}

/// Result of claiming the right to commit a temporary id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerClaim {
    /// This caller may persist a record and must call `release` afterwards.
    Claimed,
    /// Another writer finished first; nothing is held.
    Assigned(RecordUuid),
}

/// Temporary id → assigned id entries. Entries are never overwritten.
pub trait RegistrationLedgerStore: Send + Sync {
    fn get(&self, temporary_id: &TemporaryId) -> StoreResult<Option<RecordUuid>>;

    /// Inserts the entry only if `temporary_id` has none yet.
    fn put(&self, temporary_id: &TemporaryId, assigned_id: &RecordUuid)
        -> StoreResult<LedgerInsert>;

    /// Reserves `temporary_id` against writers in other processes. Stores only reachable
    /// from one process can rely on the caller's in-process lock and keep the default.
    fn claim(&self, temporary_id: &TemporaryId) -> StoreResult<LedgerClaim> {
        Ok(match self.get(temporary_id)? {
            Some(existing) => LedgerClaim::Assigned(existing),
            None => LedgerClaim::Claimed,
        })
    }

    /// Drops a claim taken by [`RegistrationLedgerStore::claim`].
    fn release(&self, _temporary_id: &TemporaryId) -> StoreResult<()> {
        Ok(())
    }
}

pub(crate) fn full_name_matches(patient: &StoredPatient, full_name: &str) -> bool {
    patient.record.full_name().to_lowercase() == full_name.trim().to_lowercase()
}

pub(crate) fn has_identifier_value(patient: &StoredPatient, value: &str) -> bool {
    patient.record.identifiers.iter().any(|i| i.value == value)
}
