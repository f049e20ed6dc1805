//! Queue-entry handling for JSON registrations.
//!
//! A registration moves through these states:
//!
//! ```text
//! Received → Validating → Rejected
//!                       → Mapped → DuplicateFound (rejected)
//!                                → Unique → Committed | Reused
//! ```
//!
//! `Rejected`, `Committed` and `Reused` are terminal. Validation never persists anything;
//! commit goes through the [`RegistrationLedger`] so a resubmitted registration resolves to
//! the record created the first time.

use crate::config::CoreConfig;
use crate::constants::REGISTRATION_DISCRIMINATOR;
use crate::error::{RegistrationError, RegistrationResult};
use crate::ledger::{CommitOutcome, RegistrationLedger};
use crate::lookups::Lookups;
use crate::mapper::FieldMapper;
use crate::matcher::find_similar;
use crate::reader::PathReader;
use crate::report::ValidationReport;
use crate::stores::{FileLedgerStore, FilePatientStore, PatientStore, RegistrationLedgerStore};
use regq_record::{PatientRecord, RecordUuid, TemporaryId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One unit of queued work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Id of the queue entry itself, used for log correlation.
    pub uuid: String,
    pub discriminator: String,
    /// Registration payload as JSON text.
    pub payload: String,
}

impl QueueEntry {
    /// A `json-registration` entry.
    pub fn registration(uuid: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            discriminator: REGISTRATION_DISCRIMINATOR.to_string(),
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Received,
    Validating,
    Rejected,
    Mapped,
    DuplicateFound,
    Unique,
    Committed,
    Reused,
}

impl RegistrationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RegistrationState::Rejected | RegistrationState::Committed | RegistrationState::Reused
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Received => "received",
            RegistrationState::Validating => "validating",
            RegistrationState::Rejected => "rejected",
            RegistrationState::Mapped => "mapped",
            RegistrationState::DuplicateFound => "duplicate-found",
            RegistrationState::Unique => "unique",
            RegistrationState::Committed => "committed",
            RegistrationState::Reused => "reused",
        };
        f.write_str(name)
    }
}

/// A payload that passed validation and may be committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRegistration {
    pub record: PatientRecord,
    /// Correlation id supplied by the client, if the payload carried one.
    pub temporary_id: Option<TemporaryId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Committed {
        temporary_id: TemporaryId,
        assigned_id: RecordUuid,
    },
    Reused {
        temporary_id: TemporaryId,
        assigned_id: RecordUuid,
    },
}

impl RegistrationOutcome {
    pub fn temporary_id(&self) -> &TemporaryId {
        match self {
            RegistrationOutcome::Committed { temporary_id, .. }
            | RegistrationOutcome::Reused { temporary_id, .. } => temporary_id,
        }
    }

    pub fn assigned_id(&self) -> &RecordUuid {
        match self {
            RegistrationOutcome::Committed { assigned_id, .. }
            | RegistrationOutcome::Reused { assigned_id, .. } => assigned_id,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, RegistrationOutcome::Reused { .. })
    }

    pub fn state(&self) -> RegistrationState {
        match self {
            RegistrationOutcome::Committed { .. } => RegistrationState::Committed,
            RegistrationOutcome::Reused { .. } => RegistrationState::Reused,
        }
    }
}

/// Validates and commits `json-registration` queue entries.
///
/// Shared between threads as `Arc<RegistrationHandler>`; every collaborator is `Send + Sync`.
pub struct RegistrationHandler {
    cfg: Arc<CoreConfig>,
    lookups: Lookups,
    patients: Arc<dyn PatientStore>,
    ledger: RegistrationLedger,
}

impl RegistrationHandler {
    pub fn new(
        cfg: Arc<CoreConfig>,
        lookups: Lookups,
        patients: Arc<dyn PatientStore>,
        ledger_store: Arc<dyn RegistrationLedgerStore>,
    ) -> Self {
        Self {
            cfg,
            lookups,
            patients,
            ledger: RegistrationLedger::new(ledger_store),
        }
    }

    /// A handler over the file stores under the configured patient data directory.
    pub fn with_file_stores(cfg: Arc<CoreConfig>, lookups: Lookups) -> Self {
        let patients = Arc::new(FilePatientStore::new(cfg.patients_dir()));
        let ledger_store = Arc::new(FileLedgerStore::new(cfg.ledger_dir()));
        Self::new(cfg, lookups, patients, ledger_store)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn patients(&self) -> &dyn PatientStore {
        self.patients.as_ref()
    }

    pub fn ledger(&self) -> &RegistrationLedger {
        &self.ledger
    }

    /// Whether this handler processes `entry`.
    pub fn accept(&self, entry: &QueueEntry) -> bool {
        entry.discriminator == REGISTRATION_DISCRIMINATOR
    }

    /// Maps the payload and checks it against stored patients without persisting anything.
    ///
    /// The duplicate check only runs once mapping recorded no errors, so a payload with mapping
    /// errors is never also reported as a suspected duplicate.
    ///
    /// # Errors
    ///
    /// Returns every mapping problem found with the entry, or a suspected duplicate.
    pub fn validate(&self, entry: &QueueEntry) -> Result<ValidatedRegistration, ValidationReport> {
        let span = tracing::info_span!("registration", entry = %entry.uuid);
        let _entered = span.enter();

        self.validate_entry(entry).inspect_err(|report| {
            transition(RegistrationState::Rejected);
            tracing::warn!(errors = report.len(), "registration rejected: {report}");
        })
    }

    /// Validates `entry` and commits it.
    ///
    /// # Errors
    ///
    /// Returns the validation report on rejection, or a single-error report when the commit
    /// itself fails.
    pub fn process(&self, entry: &QueueEntry) -> Result<RegistrationOutcome, ValidationReport> {
        let span = tracing::info_span!("registration", entry = %entry.uuid);
        let _entered = span.enter();

        let outcome = self
            .validate_entry(entry)
            .and_then(|validated| self.commit_validated(validated).map_err(ValidationReport::single));

        match &outcome {
            Ok(outcome) => {
                transition(outcome.state());
                tracing::info!(
                    temporary_id = %outcome.temporary_id(),
                    assigned_id = %outcome.assigned_id(),
                    "registration {}",
                    outcome.state()
                );
            }
            Err(report) => {
                transition(RegistrationState::Rejected);
                tracing::warn!(errors = report.len(), "registration rejected: {report}");
            }
        }
        outcome
    }

    /// Commits a registration that already passed [`Self::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::MissingTemporaryId`] when the payload carried no
    /// correlation id, or [`RegistrationError::Storage`] on store failure.
    pub fn commit(&self, validated: ValidatedRegistration) -> RegistrationResult<RegistrationOutcome> {
        let outcome = self.commit_validated(validated)?;
        transition(outcome.state());
        Ok(outcome)
    }

    fn validate_entry(&self, entry: &QueueEntry) -> Result<ValidatedRegistration, ValidationReport> {
        transition(RegistrationState::Received);
        if !self.accept(entry) {
            return Err(ValidationReport::single(RegistrationError::UnsupportedEntry(
                entry.discriminator.clone(),
            )));
        }

        transition(RegistrationState::Validating);
        let document: serde_json::Value = serde_json::from_str(&entry.payload)
            .map_err(|e| ValidationReport::single(RegistrationError::MalformedPayload(e)))?;
        let reader = PathReader::new(&document);

        let mut report = ValidationReport::new();
        let record = FieldMapper::new(&self.cfg, &self.lookups).map(&reader, &mut report);
        let temporary_id = self.temporary_id(&reader, &mut report);
        if !report.is_empty() {
            return Err(report);
        }

        transition(RegistrationState::Mapped);
        match find_similar(&record, self.patients.as_ref()) {
            Ok(Some(existing)) => {
                transition(RegistrationState::DuplicateFound);
                report.record(RegistrationError::DuplicatePatientSuspected {
                    identifier: existing
                        .record
                        .preferred_identifier()
                        .map(|i| i.value.clone()),
                    patient_id: existing.id,
                });
            }
            Ok(None) => transition(RegistrationState::Unique),
            Err(e) => report.record(e),
        }

        report.into_result(ValidatedRegistration {
            record,
            temporary_id,
        })
    }

    fn temporary_id(
        &self,
        reader: &PathReader<'_>,
        report: &mut ValidationReport,
    ) -> Option<TemporaryId> {
        match reader.read_string(&self.cfg.field_paths().temporary_id) {
            Ok(text) => text.and_then(|t| TemporaryId::new(t).ok()),
            Err(e) => {
                report.record(e);
                None
            }
        }
    }

    fn commit_validated(
        &self,
        validated: ValidatedRegistration,
    ) -> RegistrationResult<RegistrationOutcome> {
        let ValidatedRegistration {
            record,
            temporary_id,
        } = validated;
        let temporary_id = temporary_id.ok_or(RegistrationError::MissingTemporaryId)?;

        let outcome = self
            .ledger
            .commit_or_reuse(&temporary_id, || self.patients.save(&record))?;

        Ok(match outcome {
            CommitOutcome::Committed(assigned_id) => RegistrationOutcome::Committed {
                temporary_id,
                assigned_id,
            },
            CommitOutcome::Reused(assigned_id) => RegistrationOutcome::Reused {
                temporary_id,
                assigned_id,
            },
        })
    }
}

fn transition(state: RegistrationState) {
    tracing::debug!(state = %state, "registration state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PayloadKeys;
    use crate::lookups::ReferenceData;
    use crate::stores::{InMemoryLedgerStore, InMemoryPatientStore};
    use chrono::NaiveDate;
    use regq_record::PersonName;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const REFERENCE: &str = r#"
identifier_types:
  - name: AMRS Universal ID
locations:
  - id: 1
    name: Unknown Location
"#;

    fn lookups() -> Lookups {
        Lookups::from_reference_data(Arc::new(ReferenceData::parse(REFERENCE).unwrap()))
    }

    fn cfg(dir: PathBuf) -> Arc<CoreConfig> {
        Arc::new(CoreConfig::new(dir, PayloadKeys::Short, "AMRS Universal ID").unwrap())
    }

    fn in_memory() -> (RegistrationHandler, Arc<InMemoryPatientStore>, Arc<InMemoryLedgerStore>) {
        let patients = Arc::new(InMemoryPatientStore::new());
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let handler = RegistrationHandler::new(
            cfg(PathBuf::from("/unused")),
            lookups(),
            patients.clone(),
            ledger.clone(),
        );
        (handler, patients, ledger)
    }

    fn jane_doe() -> QueueEntry {
        QueueEntry::registration(
            "entry-1",
            json!({
                "patient": {
                    "given_name": "Jane",
                    "family_name": "Doe",
                    "sex": "F",
                    "birth_date": "1990-01-01",
                    "uuid": "tmp-123"
                }
            })
            .to_string(),
        )
    }

    #[test]
    fn new_registration_is_committed_and_recorded_in_the_ledger() {
        let (handler, patients, ledger) = in_memory();
        let entry = jane_doe();

        let validated = handler.validate(&entry).expect("valid registration");
        assert_eq!(validated.record.full_name(), "Jane Doe");
        assert_eq!(validated.temporary_id.as_ref().map(|t| t.as_str()), Some("tmp-123"));
        assert!(patients.is_empty(), "validation never persists");

        let outcome = handler.process(&entry).expect("committed");
        assert!(!outcome.is_reused());
        assert_eq!(outcome.temporary_id().as_str(), "tmp-123");
        assert_eq!(patients.len(), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            handler
                .ledger()
                .assigned_id(outcome.temporary_id())
                .unwrap()
                .as_ref(),
            Some(outcome.assigned_id())
        );

        let stored = handler.patients().list().unwrap();
        assert_eq!(stored[0].id, *outcome.assigned_id());
        assert_eq!(
            stored[0].record.birth_date,
            Some(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
        );
    }

    #[test]
    fn resubmission_is_flagged_as_duplicate_by_validation() {
        let (handler, patients, _) = in_memory();
        let entry = jane_doe();

        let first = handler.process(&entry).expect("committed");
        let report = handler.process(&entry).expect_err("duplicate");

        assert_eq!(patients.len(), 1);
        assert_eq!(report.len(), 1);
        assert!(matches!(
            &report.errors()[0],
            RegistrationError::DuplicatePatientSuspected { patient_id, .. }
                if patient_id == first.assigned_id()
        ));
    }

    #[test]
    fn commit_after_validation_reuses_ledger_entry() {
        let (handler, patients, _) = in_memory();
        let validated = handler.validate(&jane_doe()).unwrap();

        let first = handler.commit(validated.clone()).unwrap();
        let second = handler.commit(validated).unwrap();

        assert!(matches!(first, RegistrationOutcome::Committed { .. }));
        assert!(second.is_reused());
        assert_eq!(first.assigned_id(), second.assigned_id());
        assert_eq!(patients.len(), 1);
    }

    #[test]
    fn duplicate_report_carries_matched_identifier() {
        let mut existing = PatientRecord {
            gender: Some("f".into()),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            names: vec![PersonName {
                given: "Jane".into(),
                middle: None,
                family: "Doe".into(),
            }],
            ..PatientRecord::default()
        };
        let mut identifier = regq_record::PatientIdentifier::new("AMRS Universal ID", "MRN-7");
        identifier.preferred = true;
        existing.identifiers.insert(identifier);

        let (handler, patients, ledger) = in_memory();
        patients.save(&existing).unwrap();

        let report = handler.process(&jane_doe()).unwrap_err();
        assert!(matches!(
            &report.errors()[0],
            RegistrationError::DuplicatePatientSuspected { identifier: Some(v), .. } if v == "MRN-7"
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn mapping_errors_are_reported_together_and_nothing_is_saved() {
        let (handler, patients, _) = in_memory();
        let entry = QueueEntry::registration(
            "entry-2",
            json!({
                "patient": {
                    "given_name": "Jane",
                    "birth_date": "1990/01/01",
                    "medical_record_number": "MRN-1",
                    "uuid": "tmp-9"
                },
                "encounter": { "location_id": "404" }
            })
            .to_string(),
        );

        let report = handler.process(&entry).unwrap_err();
        assert_eq!(report.len(), 2, "{report}");
        assert!(patients.is_empty());
    }

    #[test]
    fn mapping_errors_skip_the_duplicate_check() {
        let (handler, _, _) = in_memory();
        handler.process(&jane_doe()).expect("committed");

        let entry = QueueEntry::registration(
            "entry-4",
            json!({
                "patient": {
                    "given_name": "Jane",
                    "family_name": "Doe",
                    "sex": "F",
                    "birth_date": "1990-01-01",
                    "uuid": "tmp-124"
                },
                "encounter": { "location_id": "404" },
                "observation": { "other_identifier_type": "AMRS Universal ID", "other_identifier_value": "X" }
            })
            .to_string(),
        );

        let report = handler.validate(&entry).unwrap_err();
        assert_eq!(report.len(), 1, "{report}");
        assert!(matches!(
            report.errors()[0],
            RegistrationError::UnresolvedLocation(_)
        ));
    }

    #[test]
    fn missing_temporary_id_blocks_commit_only() {
        let (handler, patients, _) = in_memory();
        let entry = QueueEntry::registration(
            "entry-3",
            json!({ "patient": { "given_name": "Jane", "family_name": "Doe", "uuid": "  " } })
                .to_string(),
        );

        let validated = handler.validate(&entry).expect("valid without correlation id");
        assert_eq!(validated.temporary_id, None);
        assert!(matches!(
            handler.commit(validated),
            Err(RegistrationError::MissingTemporaryId)
        ));
        assert!(patients.is_empty());
    }

    #[test]
    fn rejects_foreign_discriminator_and_malformed_payload() {
        let (handler, _, _) = in_memory();

        let mut foreign = jane_doe();
        foreign.discriminator = "json-encounter".into();
        assert!(!handler.accept(&foreign));
        assert!(matches!(
            &handler.validate(&foreign).unwrap_err().errors()[0],
            RegistrationError::UnsupportedEntry(d) if d == "json-encounter"
        ));

        let malformed = QueueEntry::registration("entry-4", "{ not json");
        assert!(matches!(
            handler.validate(&malformed).unwrap_err().errors()[0],
            RegistrationError::MalformedPayload(_)
        ));
    }

    #[test]
    fn file_backed_registration_survives_a_new_handler() {
        let temp_dir = TempDir::new().unwrap();
        let cfg = cfg(temp_dir.path().to_path_buf());
        let build = || RegistrationHandler::with_file_stores(cfg.clone(), lookups());

        let validated = build().validate(&jane_doe()).unwrap();
        let first = build().commit(validated.clone()).unwrap();
        let second = build().commit(validated).unwrap();

        assert!(second.is_reused());
        assert_eq!(first.assigned_id(), second.assigned_id());
        assert_eq!(build().patients().list().unwrap().len(), 1);
    }

    #[test]
    fn terminal_states() {
        assert!(RegistrationState::Rejected.is_terminal());
        assert!(RegistrationState::Reused.is_terminal());
        assert!(!RegistrationState::Unique.is_terminal());
        assert_eq!(RegistrationState::DuplicateFound.to_string(), "duplicate-found");
    }
}
