//! Idempotent commit of registrations keyed by their temporary id.
//!
//! The check-persist-record sequence runs under a lock held per temporary id, so concurrent
//! submissions of the same registration produce a single stored record while different
//! registrations commit in parallel. Writers in other processes are kept out by the store's
//! claim, and the store's conditional insert keeps the first entry if a claim was broken.

use crate::error::{RegistrationResult, StoreError, StoreResult};
use crate::stores::{LedgerClaim, LedgerInsert, RegistrationLedgerStore};
use regq_record::{RecordUuid, TemporaryId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a commit finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The record was persisted now under this id.
    Committed(RecordUuid),
    /// An earlier commit already assigned this id; nothing was persisted.
    Reused(RecordUuid),
}

impl CommitOutcome {
    pub fn assigned_id(&self) -> &RecordUuid {
        match self {
            CommitOutcome::Committed(id) | CommitOutcome::Reused(id) => id,
        }
    }
}

pub struct RegistrationLedger {
    store: Arc<dyn RegistrationLedgerStore>,
    locks: Mutex<HashMap<TemporaryId, Arc<Mutex<()>>>>,
}

impl RegistrationLedger {
    pub fn new(store: Arc<dyn RegistrationLedgerStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The id already assigned to `temporary_id`, if any.
    pub fn assigned_id(&self, temporary_id: &TemporaryId) -> StoreResult<Option<RecordUuid>> {
        self.store.get(temporary_id)
    }

    /// Runs `persist` unless `temporary_id` already has an assigned id, then records the new id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RegistrationError::Storage`] if the ledger or `persist` fails. A failed
    /// `persist` leaves no ledger entry, so the registration can be retried.
    pub fn commit_or_reuse<F>(
        &self,
        temporary_id: &TemporaryId,
        persist: F,
    ) -> RegistrationResult<CommitOutcome>
    where
        F: FnOnce() -> StoreResult<RecordUuid>,
    {
        let key_lock = self.key_lock(temporary_id)?;
        let outcome = {
            let _guard = key_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
            self.commit_locked(temporary_id, persist)
        };
        self.release_key_lock(temporary_id, key_lock);
        outcome
    }

    fn commit_locked<F>(
        &self,
        temporary_id: &TemporaryId,
        persist: F,
    ) -> RegistrationResult<CommitOutcome>
    where
        F: FnOnce() -> StoreResult<RecordUuid>,
    {
        if let Some(existing) = self.store.get(temporary_id)? {
            return Ok(CommitOutcome::Reused(existing));
        }
        if let LedgerClaim::Assigned(existing) = self.store.claim(temporary_id)? {
            return Ok(CommitOutcome::Reused(existing));
        }

        let outcome = self.persist_and_record(temporary_id, persist);
        if let Err(e) = self.store.release(temporary_id) {
            tracing::warn!(temporary_id = %temporary_id, "failed to release ledger claim: {e}");
        }
        outcome
    }

    fn persist_and_record<F>(
        &self,
        temporary_id: &TemporaryId,
        persist: F,
    ) -> RegistrationResult<CommitOutcome>
    where
        F: FnOnce() -> StoreResult<RecordUuid>,
    {
        let saved = persist()?;
        match self.store.put(temporary_id, &saved)? {
            LedgerInsert::Inserted => Ok(CommitOutcome::Committed(saved)),
            LedgerInsert::AlreadyPresent(existing) => {
                tracing::error!(
                    temporary_id = %temporary_id,
                    orphaned_id = %saved,
                    assigned_id = %existing,
                    "ledger entry appeared while committing; saved record is orphaned"
                );
                Ok(CommitOutcome::Reused(existing))
            }
        }
    }

    fn key_lock(&self, temporary_id: &TemporaryId) -> StoreResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(locks.entry(temporary_id.clone()).or_default().clone())
    }

    /// Drops the map entry once no other caller holds it.
    fn release_key_lock(&self, temporary_id: &TemporaryId, key_lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(temporary_id);
        }
    }
}
