//! Patient record model and on-disk wire format.
//!
//! This crate provides the **domain-level record types** produced by payload mapping and the
//! **strict YAML wire models** used to persist them:
//! - `patient.yaml` files holding one stored patient record
//! - `entry.yaml` files holding one registration ledger entry
//!
//! Wire structs are private; callers only see domain types and the `parse`/`render` facades.

pub mod ledger;
pub mod patient;

// Re-export facades
pub use ledger::{LedgerEntry, LedgerFile};
pub use patient::PatientFile;

// Re-export public domain-level types
pub use patient::{
    IdentifierSet, PatientIdentifier, PatientRecord, PersonAddress, PersonAttribute, PersonName,
    StoredPatient,
};

pub use regq_types::TemporaryId;
pub use regq_uuid::RecordUuid;

/// Errors returned by the record crate.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`RecordError`].
pub type RecordResult<T> = Result<T, RecordError>;

/// Deserialize YAML into `T`, reporting the path of the first field that does not match.
pub(crate) fn parse_yaml<T>(yaml_text: &str, what: &str) -> RecordResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    serde_path_to_error::deserialize::<_, T>(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() {
            "<root>"
        } else {
            path.as_str()
        };
        RecordError::Translation(format!("{what} schema mismatch at {path}: {source}"))
    })
}
