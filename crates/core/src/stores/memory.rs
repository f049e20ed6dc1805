//! In-memory stores.

use super::{
    full_name_matches, has_identifier_value, LedgerInsert, PatientStore, RegistrationLedgerStore,
};
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use regq_record::{LedgerEntry, PatientRecord, RecordUuid, StoredPatient, TemporaryId};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryPatientStore {
    patients: Mutex<Vec<StoredPatient>>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patients.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&StoredPatient) -> bool) -> StoreResult<Vec<StoredPatient>> {
        let patients = self.patients.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(patients.iter().filter(|p| keep(p)).cloned().collect())
    }
}

impl PatientStore for InMemoryPatientStore {
    fn find_by_identifier_value(&self, value: &str) -> StoreResult<Vec<StoredPatient>> {
        self.filtered(|p| has_identifier_value(p, value))
    }

    fn find_by_full_name(&self, full_name: &str) -> StoreResult<Vec<StoredPatient>> {
        self.filtered(|p| full_name_matches(p, full_name))
    }

    fn save(&self, record: &PatientRecord) -> StoreResult<RecordUuid> {
        let id = RecordUuid::new();
        let mut patients = self.patients.lock().map_err(|_| StoreError::LockPoisoned)?;
        patients.push(StoredPatient {
            id: id.clone(),
            created_at: Utc::now(),
            record: record.clone(),
        });
        Ok(id)
    }

    fn list(&self) -> StoreResult<Vec<StoredPatient>> {
        self.filtered(|_| true)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: Mutex<HashMap<TemporaryId, LedgerEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistrationLedgerStore for InMemoryLedgerStore {
    fn get(&self, temporary_id: &TemporaryId) -> StoreResult<Option<RecordUuid>> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(temporary_id).map(|e| e.assigned_id.clone()))
    }

    fn put(
        &self,
        temporary_id: &TemporaryId,
        assigned_id: &RecordUuid,
    ) -> StoreResult<LedgerInsert> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(existing) = entries.get(temporary_id) {
            return Ok(LedgerInsert::AlreadyPresent(existing.assigned_id.clone()));
        }
        entries.insert(
            temporary_id.clone(),
            LedgerEntry {
                temporary_id: temporary_id.clone(),
                assigned_id: assigned_id.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(LedgerInsert::Inserted)
    }
}
