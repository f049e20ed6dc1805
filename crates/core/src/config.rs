//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the handler as
//! `Arc<CoreConfig>`. Environment variables are read by the binaries, never during payload
//! handling.

use crate::constants::{
    BIRTH_DATE_FORMAT, DEFAULT_MAX_NUMBERED_NODES, LEDGER_DIR_NAME, PATIENTS_DIR_NAME,
};
use crate::error::{RegistrationError, RegistrationResult};
use crate::fields::{FieldPaths, PayloadKeys};
use std::path::PathBuf;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    patient_data_dir: PathBuf,
    field_paths: FieldPaths,
    preferred_identifier_type: String,
    birth_date_format: String,
    max_numbered_nodes: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidInput`] if `preferred_identifier_type` is blank.
    pub fn new(
        patient_data_dir: PathBuf,
        payload_keys: PayloadKeys,
        preferred_identifier_type: impl Into<String>,
    ) -> RegistrationResult<Self> {
        let preferred_identifier_type = preferred_identifier_type.into();
        if preferred_identifier_type.trim().is_empty() {
            return Err(RegistrationError::InvalidInput(
                "preferred identifier type cannot be empty".into(),
            ));
        }

        Ok(Self {
            patient_data_dir,
            field_paths: FieldPaths::for_keys(payload_keys),
            preferred_identifier_type,
            birth_date_format: BIRTH_DATE_FORMAT.to_string(),
            max_numbered_nodes: DEFAULT_MAX_NUMBERED_NODES,
        })
    }

    /// Overrides how many `…^n` nodes are probed for a missing collection path.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidInput`] if `limit` is zero.
    pub fn with_max_numbered_nodes(mut self, limit: usize) -> RegistrationResult<Self> {
        if limit == 0 {
            return Err(RegistrationError::InvalidInput(
                "max_numbered_nodes must be at least 1".into(),
            ));
        }
        self.max_numbered_nodes = limit;
        Ok(self)
    }

    pub fn patients_dir(&self) -> PathBuf {
        self.patient_data_dir.join(PATIENTS_DIR_NAME)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.patient_data_dir.join(LEDGER_DIR_NAME)
    }

    pub fn field_paths(&self) -> &FieldPaths {
        &self.field_paths
    }

    pub fn preferred_identifier_type(&self) -> &str {
        &self.preferred_identifier_type
    }

    pub fn birth_date_format(&self) -> &str {
        &self.birth_date_format
    }

    pub fn max_numbered_nodes(&self) -> usize {
        self.max_numbered_nodes
    }
}

/// Resolve the preferred identifier type from an optional environment value.
pub fn preferred_identifier_type_from_env_value(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| crate::constants::DEFAULT_PREFERRED_IDENTIFIER_TYPE.to_string())
}
