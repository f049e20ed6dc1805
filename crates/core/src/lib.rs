//! # regq Core
//!
//! Core logic for handling queued JSON patient registrations.
//!
//! This crate turns a queued registration payload into a stored patient record:
//! - Path-based reads over the raw JSON payload
//! - Field mapping into an unsaved patient record, collecting every problem in one report
//! - Duplicate-patient detection against stored records
//! - Idempotent commit through a ledger of temporary id → assigned id
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `regq-run` and
//! `regq-cli`.

pub mod config;
pub mod constants;
pub mod error;
pub mod fields;
pub mod handler;
pub mod ledger;
pub mod lookups;
pub mod mapper;
pub mod matcher;
pub mod reader;
pub mod report;
pub mod stores;

pub use config::{preferred_identifier_type_from_env_value, CoreConfig};
pub use error::{RegistrationError, RegistrationResult, StoreError, StoreResult};
pub use fields::{payload_keys_from_env_value, FieldPaths, PayloadKeys};
pub use handler::{
    QueueEntry, RegistrationHandler, RegistrationOutcome, RegistrationState, ValidatedRegistration,
};
pub use ledger::{CommitOutcome, RegistrationLedger};
pub use lookups::{
    AttributeType, AttributeTypeLookup, IdentifierType, IdentifierTypeLookup, Location,
    LocationLookup, Lookups, ReferenceData,
};
pub use mapper::FieldMapper;
pub use matcher::{find_similar, is_similar};
pub use reader::{PathReader, PayloadPath, RawValue, ReadError};
pub use report::ValidationReport;
pub use stores::{
    FileLedgerStore, FilePatientStore, InMemoryLedgerStore, InMemoryPatientStore, LedgerClaim,
    LedgerInsert, PatientStore, RegistrationLedgerStore,
};

pub use regq_record::{
    IdentifierSet, PatientIdentifier, PatientRecord, PersonAddress, PersonAttribute, PersonName,
    StoredPatient,
};
pub use regq_types::TemporaryId;

/// Id given to a patient record when it is first persisted.
pub type AssignedId = regq_uuid::RecordUuid;
