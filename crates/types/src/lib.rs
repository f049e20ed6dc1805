//! Validated text types shared across the registration crates.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// Caller-supplied correlation id used as the idempotency key for a registration.
///
/// Queue clients generate this value before the patient exists on the server, so it is
/// treated as opaque text. The only guarantee is that it holds at least one non-whitespace
/// character; surrounding whitespace is trimmed during construction so that `" tmp-1 "`
/// and `"tmp-1"` address the same ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemporaryId(String);

impl TemporaryId {
    /// Creates a new `TemporaryId` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemporaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TemporaryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for TemporaryId {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for TemporaryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for TemporaryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TemporaryId::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let id = TemporaryId::new("  tmp-123\n").expect("valid id");
        assert_eq!(id.as_str(), "tmp-123");
        assert_eq!(id, TemporaryId::new("tmp-123").unwrap());
    }

    #[test]
    fn rejects_blank_input() {
        assert!(matches!(TemporaryId::new(""), Err(TextError::Empty)));
        assert!(matches!(TemporaryId::new(" \t "), Err(TextError::Empty)));
    }

    #[test]
    fn deserialize_rejects_blank_string() {
        let err = serde_json::from_str::<TemporaryId>("\"   \"");
        assert!(err.is_err());

        let ok: TemporaryId = serde_json::from_str("\"abc\"").expect("deserialize");
        assert_eq!(ok.to_string(), "abc");
    }
}
