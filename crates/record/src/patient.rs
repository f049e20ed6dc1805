//! Patient record types and the `patient.yaml` wire model.
//!
//! Responsibilities:
//! - Define the domain-level record assembled from a registration payload
//! - Enforce the identifier-set invariants (unique by type and value, at most one preferred)
//! - Define a strict wire model for persisted records
//! - Translate between the two

use crate::{parse_yaml, RecordError, RecordResult};
use chrono::{DateTime, NaiveDate, Utc};
use regq_uuid::RecordUuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Date format used for birth dates on disk.
const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Public domain-level types
// ============================================================================

/// A patient identifier of a named type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatientIdentifier {
    /// Name of the identifier type (for example "AMRS Universal ID").
    pub identifier_type: String,
    /// The identifier value.
    pub value: String,
    /// Id of the location that issued the identifier, if resolved.
    pub location: Option<String>,
    /// Whether this is the record's preferred identifier.
    pub preferred: bool,
}

impl PatientIdentifier {
    pub fn new(identifier_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            identifier_type: identifier_type.into(),
            value: value.into(),
            location: None,
            preferred: false,
        }
    }

    fn same_key(&self, other: &PatientIdentifier) -> bool {
        self.identifier_type == other.identifier_type && self.value == other.value
    }
}

/// Identifiers of one record, unique by `(type, value)` with at most one preferred entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentifierSet(Vec<PatientIdentifier>);

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identifier, returning `false` if one with the same type and value exists.
    ///
    /// A preferred identifier arriving after another preferred one is demoted. A duplicate of
    /// an existing entry is dropped, but promotes that entry when it carries the preferred flag
    /// and nothing else is preferred yet.
    pub fn insert(&mut self, mut identifier: PatientIdentifier) -> bool {
        let has_preferred = self.preferred().is_some();

        if let Some(existing) = self.0.iter_mut().find(|i| i.same_key(&identifier)) {
            if identifier.preferred && !has_preferred {
                existing.preferred = true;
            }
            return false;
        }

        if has_preferred {
            identifier.preferred = false;
        }
        self.0.push(identifier);
        true
    }

    /// Returns the preferred identifier, if any.
    pub fn preferred(&self) -> Option<&PatientIdentifier> {
        self.0.iter().find(|i| i.preferred)
    }

    /// Assigns the same issuing location to every identifier.
    pub fn set_location(&mut self, location_id: &str) {
        for identifier in &mut self.0 {
            identifier.location = Some(location_id.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientIdentifier> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PatientIdentifier> for IdentifierSet {
    fn from_iter<T: IntoIterator<Item = PatientIdentifier>>(iter: T) -> Self {
        let mut set = IdentifierSet::new();
        for identifier in iter {
            set.insert(identifier);
        }
        set
    }
}

/// A person name. Given and family are always present, possibly empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersonName {
    pub given: String,
    pub middle: Option<String>,
    pub family: String,
}

impl PersonName {
    /// Given, middle and family names joined by single spaces, skipping blank parts.
    pub fn full_name(&self) -> String {
        [
            Some(self.given.as_str()),
            self.middle.as_deref(),
            Some(self.family.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// A postal address. Ordering and equality cover every field.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PersonAddress {
    /// County, district or region.
    pub region: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city_village: Option<String>,
}

/// A typed person attribute, keyed by attribute type name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PersonAttribute {
    pub attribute_type: String,
    pub value: String,
}

/// Patient record as assembled from a registration payload, before it has an id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientRecord {
    pub identifiers: IdentifierSet,
    pub birth_date: Option<NaiveDate>,
    pub birth_date_estimated: bool,
    pub gender: Option<String>,
    pub names: Vec<PersonName>,
    pub addresses: BTreeSet<PersonAddress>,
    pub attributes: BTreeSet<PersonAttribute>,
}

impl PatientRecord {
    /// The primary person name (the first one recorded).
    pub fn person_name(&self) -> Option<&PersonName> {
        self.names.first()
    }

    /// Full name of the primary person name, or an empty string when there is none.
    pub fn full_name(&self) -> String {
        self.person_name()
            .map(PersonName::full_name)
            .unwrap_or_default()
    }

    pub fn preferred_identifier(&self) -> Option<&PatientIdentifier> {
        self.identifiers.preferred()
    }
}

/// A record that has been committed to storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredPatient {
    pub id: RecordUuid,
    pub created_at: DateTime<Utc>,
    pub record: PatientRecord,
}

// ============================================================================
// Public facade
// ============================================================================

/// `patient.yaml` operations.
pub struct PatientFile;

impl PatientFile {
    /// File name of a stored patient record inside its sharded directory.
    pub const NAME: &'static str = "patient.yaml";

    /// Parse a stored patient record from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if:
    /// - the YAML does not match the wire schema (unknown keys, wrong types),
    /// - resourceType is not "Patient",
    /// - the id or birth date is malformed.
    pub fn parse(yaml_text: &str) -> RecordResult<StoredPatient> {
        let wire: PatientWire = parse_yaml(yaml_text, "Patient")?;

        if wire.resource_type != "Patient" {
            return Err(RecordError::InvalidInput(format!(
                "Expected resourceType 'Patient', got '{}'",
                wire.resource_type
            )));
        }

        wire_to_domain(wire)
    }

    /// Render a stored patient record as YAML text.
    pub fn render(patient: &StoredPatient) -> RecordResult<String> {
        let wire = domain_to_wire(patient);
        serde_yaml::to_string(&wire)
            .map_err(|e| RecordError::Translation(format!("Failed to serialise patient: {e}")))
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct PatientWire {
    #[serde(rename = "resourceType")]
    resource_type: String,

    id: String,

    #[serde(rename = "createdAt")]
    created_at: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    identifiers: Vec<IdentifierWire>,

    #[serde(rename = "birthDate", default, skip_serializing_if = "Option::is_none")]
    birth_date: Option<String>,

    #[serde(
        rename = "birthDateEstimated",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    birth_date_estimated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    gender: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    names: Vec<NameWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    addresses: Vec<AddressWire>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributeWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct IdentifierWire {
    #[serde(rename = "type")]
    identifier_type: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    preferred: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct NameWire {
    #[serde(default)]
    given: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    middle: Option<String>,
    #[serde(default)]
    family: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct AddressWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line2: Option<String>,
    #[serde(rename = "cityVillage", default, skip_serializing_if = "Option::is_none")]
    city_village: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct AttributeWire {
    #[serde(rename = "type")]
    attribute_type: String,
    value: String,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: PatientWire) -> RecordResult<StoredPatient> {
    let id = RecordUuid::parse(&wire.id)
        .map_err(|e| RecordError::Translation(format!("Invalid patient ID: {e}")))?;

    let created_at = wire
        .created_at
        .parse::<DateTime<Utc>>()
        .map_err(|e| RecordError::Translation(format!("Invalid createdAt: {e}")))?;

    let birth_date = wire
        .birth_date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, BIRTH_DATE_FORMAT))
        .transpose()
        .map_err(|e| RecordError::Translation(format!("Invalid birthDate: {e}")))?;

    let identifiers = wire
        .identifiers
        .into_iter()
        .map(|i| PatientIdentifier {
            identifier_type: i.identifier_type,
            value: i.value,
            location: i.location,
            preferred: i.preferred,
        })
        .collect();

    let names = wire
        .names
        .into_iter()
        .map(|n| PersonName {
            given: n.given,
            middle: n.middle,
            family: n.family,
        })
        .collect();

    let addresses = wire
        .addresses
        .into_iter()
        .map(|a| PersonAddress {
            region: a.region,
            line1: a.line1,
            line2: a.line2,
            city_village: a.city_village,
        })
        .collect();

    let attributes = wire
        .attributes
        .into_iter()
        .map(|a| PersonAttribute {
            attribute_type: a.attribute_type,
            value: a.value,
        })
        .collect();

    Ok(StoredPatient {
        id,
        created_at,
        record: PatientRecord {
            identifiers,
            birth_date,
            birth_date_estimated: wire.birth_date_estimated,
            gender: wire.gender,
            names,
            addresses,
            attributes,
        },
    })
}

fn domain_to_wire(patient: &StoredPatient) -> PatientWire {
    let record = &patient.record;
    PatientWire {
        resource_type: "Patient".to_string(),
        id: patient.id.to_string(),
        created_at: patient.created_at.to_rfc3339(),
        identifiers: record
            .identifiers
            .iter()
            .map(|i| IdentifierWire {
                identifier_type: i.identifier_type.clone(),
                value: i.value.clone(),
                location: i.location.clone(),
                preferred: i.preferred,
            })
            .collect(),
        birth_date: record
            .birth_date
            .map(|d| d.format(BIRTH_DATE_FORMAT).to_string()),
        birth_date_estimated: record.birth_date_estimated,
        gender: record.gender.clone(),
        names: record
            .names
            .iter()
            .map(|n| NameWire {
                given: n.given.clone(),
                middle: n.middle.clone(),
                family: n.family.clone(),
            })
            .collect(),
        addresses: record
            .addresses
            .iter()
            .map(|a| AddressWire {
                region: a.region.clone(),
                line1: a.line1.clone(),
                line2: a.line2.clone(),
                city_village: a.city_village.clone(),
            })
            .collect(),
        attributes: record
            .attributes
            .iter()
            .map(|a| AttributeWire {
                attribute_type: a.attribute_type.clone(),
                value: a.value.clone(),
            })
            .collect(),
    }
}
