//! Payload locations of every field the mapper reads.

use crate::error::{RegistrationError, RegistrationResult};
use crate::reader::PayloadPath;
use std::str::FromStr;

/// Key naming used by the payload producer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadKeys {
    /// Bare keys inside each section: `$['patient']['given_name']`.
    #[default]
    Short,
    /// Keys prefixed with their section: `$['patient']['patient.given_name']`.
    Qualified,
}

impl FromStr for PayloadKeys {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(PayloadKeys::Short),
            "qualified" => Ok(PayloadKeys::Qualified),
            other => Err(RegistrationError::InvalidInput(format!(
                "unknown payload key style '{other}' (expected 'short' or 'qualified')"
            ))),
        }
    }
}

/// Parse the payload key style from an optional environment value; blank means the default.
pub fn payload_keys_from_env_value(value: Option<String>) -> RegistrationResult<PayloadKeys> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<PayloadKeys>())
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Resolved payload paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPaths {
    pub preferred_identifier: PayloadPath,
    pub other_identifier_type: PayloadPath,
    pub other_identifier_value: PayloadPath,
    pub location_id: PayloadPath,
    pub birth_date: PayloadPath,
    pub birth_date_estimated: PayloadPath,
    pub gender: PayloadPath,
    pub given_name: PayloadPath,
    pub middle_name: PayloadPath,
    pub family_name: PayloadPath,
    pub addresses: PayloadPath,
    pub attributes: PayloadPath,
    pub temporary_id: PayloadPath,
}

impl FieldPaths {
    pub fn for_keys(keys: PayloadKeys) -> Self {
        let field = |section: &str, key: &str| match keys {
            PayloadKeys::Short => PayloadPath::from_keys([section, key]),
            PayloadKeys::Qualified => {
                PayloadPath::from_keys([section.to_string(), format!("{section}.{key}")])
            }
        };

        Self {
            preferred_identifier: field("patient", "medical_record_number"),
            other_identifier_type: field("observation", "other_identifier_type"),
            other_identifier_value: field("observation", "other_identifier_value"),
            location_id: field("encounter", "location_id"),
            birth_date: field("patient", "birth_date"),
            birth_date_estimated: field("patient", "birthdate_estimated"),
            gender: field("patient", "sex"),
            given_name: field("patient", "given_name"),
            middle_name: field("patient", "middle_name"),
            family_name: field("patient", "family_name"),
            addresses: field("patient", "personaddress"),
            attributes: field("patient", "personattribute"),
            temporary_id: field("patient", "uuid"),
        }
    }
}

impl Default for FieldPaths {
    fn default() -> Self {
        Self::for_keys(PayloadKeys::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_use_bare_names() {
        let paths = FieldPaths::for_keys(PayloadKeys::Short);
        assert_eq!(paths.given_name.to_string(), "$['patient']['given_name']");
        assert_eq!(
            paths.other_identifier_type.to_string(),
            "$['observation']['other_identifier_type']"
        );
    }

    #[test]
    fn qualified_keys_are_prefixed_with_section() {
        let paths = FieldPaths::for_keys(PayloadKeys::Qualified);
        assert_eq!(
            paths.addresses.to_string(),
            "$['patient']['patient.personaddress']"
        );
        assert_eq!(
            paths.location_id.to_string(),
            "$['encounter']['encounter.location_id']"
        );
    }

    #[test]
    fn env_value_defaults_when_blank_and_rejects_unknown() {
        assert_eq!(payload_keys_from_env_value(None).unwrap(), PayloadKeys::Short);
        assert_eq!(
            payload_keys_from_env_value(Some("  ".into())).unwrap(),
            PayloadKeys::Short
        );
        assert_eq!(
            payload_keys_from_env_value(Some("Qualified".into())).unwrap(),
            PayloadKeys::Qualified
        );
        assert!(matches!(
            payload_keys_from_env_value(Some("camel".into())),
            Err(RegistrationError::InvalidInput(_))
        ));
    }
}
