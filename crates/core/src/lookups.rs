//! Reference-data lookups used while mapping a payload.
//!
//! Identifier types, person attribute types and locations are owned by the wider system. The
//! mapper only needs to resolve them by name or id, so each is a narrow trait. [`ReferenceData`]
//! implements all three from a YAML document:
//!
//! ```yaml
//! identifier_types:
//!   - name: AMRS Universal ID
//! attribute_types:
//!   - id: 8
//!     name: Telephone Number
//! locations:
//!   - id: 1
//!     name: Unknown Location
//! ```

use crate::error::{RegistrationError, RegistrationResult};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentifierType {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeType {
    #[serde(deserialize_with = "id_from_scalar")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    #[serde(deserialize_with = "id_from_scalar")]
    pub id: String,
    pub name: String,
}

pub trait IdentifierTypeLookup: Send + Sync {
    fn by_name(&self, name: &str) -> Option<IdentifierType>;
}

pub trait AttributeTypeLookup: Send + Sync {
    fn by_id(&self, id: &str) -> Option<AttributeType>;
    fn by_name(&self, name: &str) -> Option<AttributeType>;
}

pub trait LocationLookup: Send + Sync {
    fn by_id(&self, id: &str) -> Option<Location>;
}

/// The three lookups the mapper consults.
#[derive(Clone)]
pub struct Lookups {
    pub identifier_types: Arc<dyn IdentifierTypeLookup>,
    pub attribute_types: Arc<dyn AttributeTypeLookup>,
    pub locations: Arc<dyn LocationLookup>,
}

impl Lookups {
    /// Serves every lookup from one reference-data document.
    pub fn from_reference_data(data: Arc<ReferenceData>) -> Self {
        Self {
            identifier_types: data.clone(),
            attribute_types: data.clone(),
            locations: data,
        }
    }
}

/// Reference data loaded from YAML.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceData {
    #[serde(default)]
    pub identifier_types: Vec<IdentifierType>,
    #[serde(default)]
    pub attribute_types: Vec<AttributeType>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl ReferenceData {
    /// Parse reference data from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidInput`] naming the offending field when the YAML
    /// does not match the schema.
    pub fn parse(yaml_text: &str) -> RegistrationResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            let source = err.into_inner();
            RegistrationError::InvalidInput(format!("reference data invalid at {path}: {source}"))
        })
    }

    /// Read and parse a reference-data file.
    pub fn load(path: &Path) -> RegistrationResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistrationError::InvalidInput(format!(
                "cannot read reference data {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }
}

impl IdentifierTypeLookup for ReferenceData {
    fn by_name(&self, name: &str) -> Option<IdentifierType> {
        self.identifier_types.iter().find(|t| t.name == name).cloned()
    }
}

impl AttributeTypeLookup for ReferenceData {
    fn by_id(&self, id: &str) -> Option<AttributeType> {
        self.attribute_types.iter().find(|t| t.id == id).cloned()
    }

    fn by_name(&self, name: &str) -> Option<AttributeType> {
        self.attribute_types.iter().find(|t| t.name == name).cloned()
    }
}

impl LocationLookup for ReferenceData {
    fn by_id(&self, id: &str) -> Option<Location> {
        self.locations.iter().find(|l| l.id == id).cloned()
    }
}

/// Accepts ids written either as YAML strings or integers.
fn id_from_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(i64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
identifier_types:
  - name: AMRS Universal ID
  - name: National ID
    description: Government issued
attribute_types:
  - id: 8
    name: Telephone Number
  - id: "a1b2"
    name: Mother's Name
    format: java.lang.String
locations:
  - id: 1
    name: Unknown Location
"#;

    #[test]
    fn parses_numeric_and_text_ids() {
        let data = ReferenceData::parse(SAMPLE).expect("parse");
        assert_eq!(data.identifier_types.len(), 2);
        assert_eq!(
            AttributeTypeLookup::by_id(&data, "8").map(|t| t.name),
            Some("Telephone Number".to_string())
        );
        assert!(AttributeTypeLookup::by_id(&data, "a1b2").is_some());
        assert_eq!(
            LocationLookup::by_id(&data, "1").map(|l| l.name),
            Some("Unknown Location".to_string())
        );
    }

    #[test]
    fn name_lookups_are_exact() {
        let data = ReferenceData::parse(SAMPLE).unwrap();
        assert!(IdentifierTypeLookup::by_name(&data, "National ID").is_some());
        assert!(IdentifierTypeLookup::by_name(&data, "national id").is_none());
        assert!(AttributeTypeLookup::by_name(&data, "Telephone Number").is_some());
    }

    #[test]
    fn rejects_unknown_fields_with_path() {
        let err = ReferenceData::parse("locations:\n  - id: 1\n    name: A\n    zone: B\n")
            .expect_err("unknown field");
        match err {
            RegistrationError::InvalidInput(msg) => assert!(msg.contains("locations"), "{msg}"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn lookups_share_one_document() {
        let data = Arc::new(ReferenceData::parse(SAMPLE).unwrap());
        let lookups = Lookups::from_reference_data(data);
        assert!(lookups.identifier_types.by_name("AMRS Universal ID").is_some());
        assert!(lookups.attribute_types.by_id("8").is_some());
        assert!(lookups.locations.by_id("2").is_none());
    }
}
