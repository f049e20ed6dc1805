//! Aggregated registration errors.

use crate::error::RegistrationError;
use std::fmt;

/// Ordered collection of every error found while handling one payload.
///
/// Each mapping step records into the same report and carries on, so the caller sees all
/// problems with a payload at once rather than fixing them one resubmission at a time.
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<RegistrationError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A report holding a single error.
    pub fn single(error: impl Into<RegistrationError>) -> Self {
        let mut report = Self::new();
        report.record(error);
        report
    }

    pub fn record(&mut self, error: impl Into<RegistrationError>) {
        self.errors.push(error.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[RegistrationError] {
        &self.errors
    }

    /// Error messages in recorded order.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// `Ok(value)` when nothing was recorded, otherwise the report itself.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationReport> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} registration error(s)", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}
