//! File-backed stores.
//!
//! # Directory Structure
//!
//! ```text
//! <patient_data_dir>/patients/<s1>/<s2>/<uuid>/patient.yaml
//! <patient_data_dir>/ledger/<s1>/<s2>/<uuid>/entry.yaml
//! ```
//!
//! Ledger directories are keyed by a name-based UUID derived from the temporary id, so the
//! client-supplied id never becomes a path component. While a writer commits a temporary id it
//! holds a `claim` directory next to the entry file; `create_dir` is atomic, so only one process
//! holds it at a time.

use super::{
    full_name_matches, has_identifier_value, LedgerClaim, LedgerInsert, PatientStore,
    RegistrationLedgerStore,
};
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use regq_record::{
    LedgerEntry, LedgerFile, PatientFile, PatientRecord, RecordUuid, StoredPatient, TemporaryId,
};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_ALLOCATION_ATTEMPTS: usize = 5;

const CLAIM_DIR_NAME: &str = "claim";
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(25);
const MAX_CLAIM_POLLS: usize = 400;
/// A claim older than this is assumed to belong to a writer that died.
const STALE_CLAIM_AGE: Duration = Duration::from_secs(60);

/// Patient records stored as one YAML file per record.
#[derive(Clone, Debug)]
pub struct FilePatientStore {
    patients_dir: PathBuf,
}

impl FilePatientStore {
    pub fn new(patients_dir: impl Into<PathBuf>) -> Self {
        Self {
            patients_dir: patients_dir.into(),
        }
    }

    pub fn patients_dir(&self) -> &Path {
        &self.patients_dir
    }

    /// Path of the record file for `id`.
    pub fn patient_path(&self, id: &RecordUuid) -> PathBuf {
        id.sharded_dir(&self.patients_dir).join(PatientFile::NAME)
    }

    /// Allocates a fresh sharded directory, retrying on the rare collision.
    fn allocate_dir(&self) -> StoreResult<(RecordUuid, PathBuf)> {
        for _attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = RecordUuid::new();
            let candidate = id.sharded_dir(&self.patients_dir);

            if let Some(parent) = candidate.parent() {
                fs::create_dir_all(parent).map_err(StoreError::DirCreation)?;
            }

            match fs::create_dir(&candidate) {
                Ok(()) => return Ok((id, candidate)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::DirCreation(e)),
            }
        }

        Err(StoreError::DirCreation(io::Error::new(
            ErrorKind::AlreadyExists,
            "failed to allocate a unique patient directory",
        )))
    }

    /// Reads every parseable record. Files that fail to parse are logged and skipped.
    fn scan(&self) -> Vec<StoredPatient> {
        let mut patients = Vec::new();

        for record_dir in sharded_leaf_dirs(&self.patients_dir) {
            let patient_path = record_dir.join(PatientFile::NAME);
            if !patient_path.is_file() {
                continue;
            }

            let contents = match fs::read_to_string(&patient_path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("failed to read {}: {}", patient_path.display(), e);
                    continue;
                }
            };

            match PatientFile::parse(&contents) {
                Ok(patient) => patients.push(patient),
                Err(e) => {
                    tracing::warn!(
                        "failed to parse patient.yaml: {} - {}",
                        patient_path.display(),
                        e
                    );
                }
            }
        }

        patients
    }
}

impl PatientStore for FilePatientStore {
    fn find_by_identifier_value(&self, value: &str) -> StoreResult<Vec<StoredPatient>> {
        Ok(self
            .scan()
            .into_iter()
            .filter(|p| has_identifier_value(p, value))
            .collect())
    }

    fn find_by_full_name(&self, full_name: &str) -> StoreResult<Vec<StoredPatient>> {
        Ok(self
            .scan()
            .into_iter()
            .filter(|p| full_name_matches(p, full_name))
            .collect())
    }

    fn save(&self, record: &PatientRecord) -> StoreResult<RecordUuid> {
        let (id, dir) = self.allocate_dir()?;
        let stored = StoredPatient {
            id: id.clone(),
            created_at: Utc::now(),
            record: record.clone(),
        };
        let yaml = PatientFile::render(&stored)?;

        if let Err(e) = fs::write(dir.join(PatientFile::NAME), yaml) {
            let _ = fs::remove_dir_all(&dir);
            return Err(StoreError::FileWrite(e));
        }

        tracing::debug!(patient_id = %id, "patient record written");
        Ok(id)
    }

    fn list(&self) -> StoreResult<Vec<StoredPatient>> {
        let mut patients = self.scan();
        patients.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(patients)
    }
}

/// Ledger entries stored as one YAML file per temporary id.
#[derive(Clone, Debug)]
pub struct FileLedgerStore {
    ledger_dir: PathBuf,
}

impl FileLedgerStore {
    pub fn new(ledger_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger_dir: ledger_dir.into(),
        }
    }

    fn entry_dir(&self, temporary_id: &TemporaryId) -> PathBuf {
        RecordUuid::from_name(temporary_id.as_str()).sharded_dir(&self.ledger_dir)
    }

    /// Path of the entry file for `temporary_id`.
    pub fn entry_path(&self, temporary_id: &TemporaryId) -> PathBuf {
        self.entry_dir(temporary_id).join(LedgerFile::NAME)
    }

    fn claim_path(&self, temporary_id: &TemporaryId) -> PathBuf {
        self.entry_dir(temporary_id).join(CLAIM_DIR_NAME)
    }

    fn read_entry(path: &Path) -> StoreResult<Option<LedgerEntry>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(LedgerFile::parse(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::FileRead(e)),
        }
    }
}

impl RegistrationLedgerStore for FileLedgerStore {
    fn get(&self, temporary_id: &TemporaryId) -> StoreResult<Option<RecordUuid>> {
        let path = self.entry_path(temporary_id);
        let Some(entry) = Self::read_entry(&path)? else {
            return Ok(None);
        };

        if &entry.temporary_id != temporary_id {
            tracing::error!(
                "ledger entry {} belongs to '{}', not '{}'",
                path.display(),
                entry.temporary_id,
                temporary_id
            );
            return Ok(None);
        }
        Ok(Some(entry.assigned_id))
    }

    /// Writes the entry to a scratch file, then hard-links it into place. The link fails if the
    /// entry already exists, which makes the insert conditional across processes.
    fn put(
        &self,
        temporary_id: &TemporaryId,
        assigned_id: &RecordUuid,
    ) -> StoreResult<LedgerInsert> {
        let entry_path = self.entry_path(temporary_id);
        let dir = entry_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.ledger_dir.clone());
        fs::create_dir_all(&dir).map_err(StoreError::DirCreation)?;

        let yaml = LedgerFile::render(&LedgerEntry {
            temporary_id: temporary_id.clone(),
            assigned_id: assigned_id.clone(),
            created_at: Utc::now(),
        })?;

        let scratch = dir.join(format!(".{}.{}", LedgerFile::NAME, RecordUuid::new()));
        fs::write(&scratch, yaml).map_err(StoreError::FileWrite)?;
        let linked = fs::hard_link(&scratch, &entry_path);
        let _ = fs::remove_file(&scratch);

        match linked {
            Ok(()) => Ok(LedgerInsert::Inserted),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match Self::read_entry(&entry_path)? {
                    Some(existing) => Ok(LedgerInsert::AlreadyPresent(existing.assigned_id)),
                    None => Err(StoreError::FileRead(e)),
                }
            }
            Err(e) => Err(StoreError::FileWrite(e)),
        }
    }

    /// Creates the claim directory, waiting while another writer holds it. Returns the
    /// other writer's id as soon as its entry appears.
    fn claim(&self, temporary_id: &TemporaryId) -> StoreResult<LedgerClaim> {
        let claim_path = self.claim_path(temporary_id);
        fs::create_dir_all(self.entry_dir(temporary_id)).map_err(StoreError::DirCreation)?;

        for _poll in 0..MAX_CLAIM_POLLS {
            match fs::create_dir(&claim_path) {
                Ok(()) => {
                    // The previous holder may have finished between our checks.
                    if let Some(existing) = self.get(temporary_id)? {
                        self.release(temporary_id)?;
                        return Ok(LedgerClaim::Assigned(existing));
                    }
                    return Ok(LedgerClaim::Claimed);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(existing) = self.get(temporary_id)? {
                        return Ok(LedgerClaim::Assigned(existing));
                    }
                    if is_stale(&claim_path) {
                        tracing::warn!(
                            temporary_id = %temporary_id,
                            "removing stale ledger claim {}",
                            claim_path.display()
                        );
                        let _ = fs::remove_dir(&claim_path);
                        continue;
                    }
                    std::thread::sleep(CLAIM_POLL_INTERVAL);
                }
                Err(e) => return Err(StoreError::DirCreation(e)),
            }
        }

        Err(StoreError::ClaimHeld(temporary_id.to_string()))
    }

    fn release(&self, temporary_id: &TemporaryId) -> StoreResult<()> {
        match fs::remove_dir(self.claim_path(temporary_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::FileWrite(e)),
        }
    }
}

fn is_stale(claim_path: &Path) -> bool {
    fs::metadata(claim_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_CLAIM_AGE)
}

/// Every `<s1>/<s2>/<uuid>` directory under `root`. A missing root yields nothing.
fn sharded_leaf_dirs(root: &Path) -> Vec<PathBuf> {
    let mut leaves = Vec::new();

    let Ok(s1_iter) = fs::read_dir(root) else {
        return leaves;
    };
    for s1 in s1_iter.flatten() {
        let s1_path = s1.path();
        if !s1_path.is_dir() {
            continue;
        }
        let Ok(s2_iter) = fs::read_dir(&s1_path) else {
            continue;
        };
        for s2 in s2_iter.flatten() {
            let s2_path = s2.path();
            if !s2_path.is_dir() {
                continue;
            }
            let Ok(id_iter) = fs::read_dir(&s2_path) else {
                continue;
            };
            leaves.extend(
                id_iter
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.is_dir()),
            );
        }
    }

    leaves
}

#[cfg(test)]
mod tests {
    use super::*;
    use regq_record::{PatientIdentifier, PersonName};
    use tempfile::TempDir;

    fn record(given: &str, family: &str, mrn: &str) -> PatientRecord {
        let mut identifier = PatientIdentifier::new("AMRS Universal ID", mrn);
        identifier.preferred = true;
        PatientRecord {
            identifiers: [identifier].into_iter().collect(),
            gender: Some("F".into()),
            names: vec![PersonName {
                given: given.into(),
                middle: None,
                family: family.into(),
            }],
            ..PatientRecord::default()
        }
    }

    #[test]
    fn saved_record_is_written_to_sharded_path_and_found_again() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = FilePatientStore::new(temp_dir.path().join("patients"));

        let id = store.save(&record("Jane", "Doe", "MRN-1")).expect("save");
        let path = store.patient_path(&id);
        assert!(path.is_file(), "expected {}", path.display());

        let by_value = store.find_by_identifier_value("MRN-1").unwrap();
        assert_eq!(by_value.len(), 1);
        assert_eq!(by_value[0].id, id);
        assert_eq!(by_value[0].record, record("Jane", "Doe", "MRN-1"));

        assert_eq!(store.find_by_full_name("JANE doe").unwrap().len(), 1);
        assert!(store.find_by_identifier_value("MRN-2").unwrap().is_empty());
    }

    #[test]
    fn list_skips_unparseable_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilePatientStore::new(temp_dir.path().join("patients"));
        store.save(&record("Jane", "Doe", "MRN-1")).unwrap();

        let broken = RecordUuid::new().sharded_dir(store.patients_dir());
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(PatientFile::NAME), "resourceType: [").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn list_of_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilePatientStore::new(temp_dir.path().join("nowhere"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn ledger_put_is_conditional() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedgerStore::new(temp_dir.path().join("ledger"));
        let temporary_id = TemporaryId::new("../../etc/passwd").unwrap();
        let first = RecordUuid::new();

        assert_eq!(ledger.get(&temporary_id).unwrap(), None);
        assert_eq!(ledger.put(&temporary_id, &first).unwrap(), LedgerInsert::Inserted);
        assert_eq!(
            ledger.put(&temporary_id, &RecordUuid::new()).unwrap(),
            LedgerInsert::AlreadyPresent(first.clone())
        );
        assert_eq!(ledger.get(&temporary_id).unwrap(), Some(first));

        let entry_path = ledger.entry_path(&temporary_id);
        assert!(entry_path.starts_with(temp_dir.path().join("ledger")));
        let leftovers = fs::read_dir(entry_path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1, "scratch files are cleaned up");
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedgerStore::new(temp_dir.path().join("ledger"));
        let temporary_id = TemporaryId::new("tmp-claim").unwrap();

        assert_eq!(ledger.claim(&temporary_id).unwrap(), LedgerClaim::Claimed);
        assert!(ledger.claim_path(&temporary_id).is_dir());

        let assigned = RecordUuid::new();
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| ledger.claim(&temporary_id).unwrap());
            std::thread::sleep(Duration::from_millis(100));
            ledger.put(&temporary_id, &assigned).unwrap();
            ledger.release(&temporary_id).unwrap();
            assert_eq!(waiter.join().unwrap(), LedgerClaim::Assigned(assigned.clone()));
        });

        assert!(!ledger.claim_path(&temporary_id).exists());
        assert_eq!(
            ledger.claim(&temporary_id).unwrap(),
            LedgerClaim::Assigned(assigned)
        );
    }

    #[test]
    fn release_without_claim_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedgerStore::new(temp_dir.path().join("ledger"));
        let temporary_id = TemporaryId::new("tmp-none").unwrap();
        assert!(ledger.release(&temporary_id).is_ok());
    }
}
