//! Record UUID and sharded-path utilities.
//!
//! Stored patient records and ledger entries live under sharded directories derived from a
//! UUID. To keep path derivation deterministic, identifiers use a *canonical* representation:
//! **32 lowercase hexadecimal characters** (no hyphens).
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, data is stored under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `patient_data/patients/55/0e/550e8400e29b41d4a716446655440000/`

use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Namespace for name-derived UUIDs (see [`RecordUuid::from_name`]).
const NAME_NAMESPACE: Uuid = Uuid::from_u128(0x5c1b_7a0e_93d4_4f6a_8e21_0b9d_c4a7_e312);

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;

/// Canonical UUID (32 lowercase hex characters, no hyphens).
///
/// Once constructed the contained UUID is guaranteed to display in canonical form, so it can
/// be used directly as a directory name and as the assigned id of a committed registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordUuid(Uuid);

impl Default for RecordUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordUuid {
    /// Generates a new random (v4) UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable (v5) UUID from arbitrary text.
    ///
    /// The same name always yields the same UUID, which lets callers locate a file for an
    /// externally supplied key without trusting that key as a path component.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&NAME_NAMESPACE, name.as_bytes()))
    }

    /// Validates and parses a UUID string that must already be in canonical form.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not canonical.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| UuidError::InvalidInput(format!("{input}: {e}")))
    }

    /// Returns true if `input` is exactly 32 lowercase hex characters.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<uuid>/` where `s1`/`s2` are the first four hex
    /// characters of this UUID.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        let s1 = &canonical[0..2];
        let s2 = &canonical[2..4];
        parent_dir.join(s1).join(s2).join(&canonical)
    }
}

impl fmt::Display for RecordUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for RecordUuid {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordUuid::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for RecordUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for RecordUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RecordUuid::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_uuid() {
        let id = RecordUuid::new();
        assert!(RecordUuid::is_canonical(&id.to_string()));
    }

    #[test]
    fn test_parse_valid_canonical_uuid() {
        let input = "550e8400e29b41d4a716446655440000";
        let id = RecordUuid::parse(input).expect("should parse");
        assert_eq!(id.to_string(), input);
    }

    #[test]
    fn test_parse_rejects_non_canonical_forms() {
        for input in [
            "550e8400-e29b-41d4-a716-446655440000",
            "550E8400E29B41D4A716446655440000",
            "550e8400e29b41d4a71644665544000",
            "550e8400e29b41d4a7164466554400000",
            "550e8400e29b41d4a71644665544000g",
        ] {
            assert!(RecordUuid::parse(input).is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn test_from_name_is_stable_and_distinct() {
        let a = RecordUuid::from_name("tmp-123");
        let b = RecordUuid::from_name("tmp-123");
        let c = RecordUuid::from_name("tmp-124");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(RecordUuid::is_canonical(&a.to_string()));
    }

    #[test]
    fn test_sharded_dir_structure() {
        let id = RecordUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        let dir = id.sharded_dir(Path::new("/data/patients"));
        assert_eq!(
            dir,
            PathBuf::from("/data/patients/55/0e/550e8400e29b41d4a716446655440000")
        );
    }

    #[test]
    fn test_serde_round_trip_uses_canonical_form() {
        let id = RecordUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400e29b41d4a716446655440000\"");
        let back: RecordUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RecordUuid>("\"not-a-uuid\"").is_err());
    }
}
