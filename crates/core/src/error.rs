use crate::reader::ReadError;
use regq_record::RecordError;
use regq_uuid::RecordUuid;

/// One independent problem found while registering a payload.
///
/// Mapping collects many of these into a [`crate::ValidationReport`] rather than stopping at
/// the first one.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPathExpression { path: String, reason: String },
    #[error("malformed date at {path}: '{value}' does not match {format}")]
    MalformedDate {
        path: String,
        value: String,
        format: String,
    },
    #[error("unexpected value at {path}: expected {expected}, found {found}")]
    UnexpectedValueType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unable to find identifier type with name: {0}")]
    UnresolvedIdentifierType(String),
    #[error("identifier value can't be null for type: {0}")]
    NullIdentifierValue(String),
    #[error("identifier type and value arrays differ in length ({types} types, {values} values)")]
    ArrayLengthMismatch { types: usize, values: usize },
    #[error(
        "unable to find encounter location using the id: {}",
        .0.as_deref().unwrap_or("<none>")
    )]
    UnresolvedLocation(Option<String>),
    #[error("unable to find person attribute type '{0}'")]
    UnresolvedAttributeType(String),
    #[error("person attribute value can't be null for type: {0}")]
    NullAttributeValue(String),

    #[error(
        "found a patient with similar characteristics: patient id = {patient_id}, identifier = {}",
        .identifier.as_deref().unwrap_or("<none>")
    )]
    DuplicatePatientSuspected {
        patient_id: RecordUuid,
        identifier: Option<String>,
    },

    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("payload has no temporary id")]
    MissingTemporaryId,
    #[error("queue entry discriminator '{0}' is not handled here")]
    UnsupportedEntry(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl From<ReadError> for RegistrationError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::InvalidPathExpression { path, reason } => {
                RegistrationError::InvalidPathExpression { path, reason }
            }
            ReadError::MalformedDate {
                path,
                value,
                format,
            } => RegistrationError::MalformedDate {
                path,
                value,
                format,
            },
            ReadError::UnexpectedValueType {
                path,
                expected,
                found,
            } => RegistrationError::UnexpectedValueType {
                path,
                expected,
                found,
            },
        }
    }
}

pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;

/// Failures of the patient and ledger stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create storage directory: {0}")]
    DirCreation(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("ledger entry for '{0}' is still claimed by another writer")]
    ClaimHeld(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
