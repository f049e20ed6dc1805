//! Builds an unsaved [`PatientRecord`] from a registration payload.
//!
//! Every step runs regardless of earlier failures; problems are recorded in the shared
//! [`ValidationReport`] and the step moves on with whatever it could read.

use crate::config::CoreConfig;
use crate::constants::{
    ADDRESS_CITY_VILLAGE_KEY, ADDRESS_LINE1_KEY, ADDRESS_LINE2_KEY, ADDRESS_REGION_KEY,
    ATTRIBUTE_TYPE_KEY, ATTRIBUTE_VALUE_KEY,
};
use crate::error::RegistrationError;
use crate::lookups::Lookups;
use crate::reader::{PathReader, PayloadPath, RawValue};
use crate::report::ValidationReport;
use regq_record::{
    IdentifierSet, PatientIdentifier, PatientRecord, PersonAddress, PersonAttribute, PersonName,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Maps payload fields onto a patient record.
pub struct FieldMapper<'c> {
    config: &'c CoreConfig,
    lookups: &'c Lookups,
}

impl<'c> FieldMapper<'c> {
    pub fn new(config: &'c CoreConfig, lookups: &'c Lookups) -> Self {
        Self { config, lookups }
    }

    /// Runs every mapping step against `reader`.
    pub fn map(&self, reader: &PathReader<'_>, report: &mut ValidationReport) -> PatientRecord {
        let paths = self.config.field_paths();

        let identifiers = self.identifiers(reader, report);

        let birth_date = reader
            .read_date(&paths.birth_date, self.config.birth_date_format())
            .unwrap_or_else(|e| {
                report.record(e);
                None
            });
        let birth_date_estimated = reader
            .read_bool(&paths.birth_date_estimated)
            .unwrap_or_else(|e| {
                report.record(e);
                None
            })
            .unwrap_or(false);
        let gender = non_blank(read_text(reader, &paths.gender, report));

        PatientRecord {
            identifiers,
            birth_date,
            birth_date_estimated,
            gender,
            names: vec![self.name(reader, report)],
            addresses: self.addresses(reader, report),
            attributes: self.attributes(reader, report),
        }
    }

    fn identifiers(&self, reader: &PathReader<'_>, report: &mut ValidationReport) -> IdentifierSet {
        let paths = self.config.field_paths();
        let mut identifiers = IdentifierSet::new();

        if let Some(value) = non_blank(read_text(reader, &paths.preferred_identifier, report)) {
            let type_name = self.config.preferred_identifier_type();
            match self.lookups.identifier_types.by_name(type_name) {
                Some(identifier_type) => {
                    let mut identifier = PatientIdentifier::new(identifier_type.name, value);
                    identifier.preferred = true;
                    identifiers.insert(identifier);
                }
                None => report.record(RegistrationError::UnresolvedIdentifierType(
                    type_name.to_string(),
                )),
            }
        }

        self.other_identifiers(reader, &mut identifiers, report);

        if !identifiers.is_empty() {
            self.assign_location(reader, &mut identifiers, report);
        }

        identifiers
    }

    /// Identifiers from the parallel type/value fields: two scalars, or two arrays of equal
    /// length paired by index.
    fn other_identifiers(
        &self,
        reader: &PathReader<'_>,
        identifiers: &mut IdentifierSet,
        report: &mut ValidationReport,
    ) {
        let paths = self.config.field_paths();
        let types = reader.read_raw(&paths.other_identifier_type);
        let values = reader.read_raw(&paths.other_identifier_value);

        match (types, values) {
            (RawValue::Absent | RawValue::Null, RawValue::Absent | RawValue::Null) => {}
            (RawValue::Array(type_items), RawValue::Array(value_items)) => {
                if type_items.len() != value_items.len() {
                    report.record(RegistrationError::ArrayLengthMismatch {
                        types: type_items.len(),
                        values: value_items.len(),
                    });
                    return;
                }
                for (i, (t, v)) in type_items.iter().zip(value_items).enumerate() {
                    self.add_other_identifier(
                        RawValue::from_value(Some(t)),
                        &paths.other_identifier_type.index(i),
                        RawValue::from_value(Some(v)),
                        &paths.other_identifier_value.index(i),
                        identifiers,
                        report,
                    );
                }
            }
            (RawValue::Object(_), _) => {
                report.record(types.unexpected(&paths.other_identifier_type, "text or array"));
            }
            (_, RawValue::Object(_)) => {
                report.record(values.unexpected(&paths.other_identifier_value, "text or array"));
            }
            (RawValue::Scalar(_), RawValue::Scalar(_) | RawValue::Absent | RawValue::Null) => {
                self.add_other_identifier(
                    types,
                    &paths.other_identifier_type,
                    values,
                    &paths.other_identifier_value,
                    identifiers,
                    report,
                );
            }
            // One side is an array and the other is not, or the types are missing.
            _ => {
                if types.count() > 0 || values.count() > 0 {
                    report.record(RegistrationError::ArrayLengthMismatch {
                        types: types.count(),
                        values: values.count(),
                    });
                }
            }
        }
    }

    fn add_other_identifier(
        &self,
        type_value: RawValue<'_>,
        type_path: &PayloadPath,
        value: RawValue<'_>,
        value_path: &PayloadPath,
        identifiers: &mut IdentifierSet,
        report: &mut ValidationReport,
    ) {
        let type_name = match type_value.text(type_path) {
            Ok(name) => name.unwrap_or_default(),
            Err(e) => return report.record(e),
        };
        let Some(identifier_type) = self.lookups.identifier_types.by_name(type_name.trim()) else {
            return report.record(RegistrationError::UnresolvedIdentifierType(type_name));
        };

        match value.text(value_path) {
            Ok(Some(text)) => {
                identifiers.insert(PatientIdentifier::new(identifier_type.name, text));
            }
            Ok(None) => report.record(RegistrationError::NullIdentifierValue(identifier_type.name)),
            Err(e) => report.record(e),
        }
    }

    /// Stamps every identifier with the encounter location. On failure the identifiers are
    /// kept without a location.
    fn assign_location(
        &self,
        reader: &PathReader<'_>,
        identifiers: &mut IdentifierSet,
        report: &mut ValidationReport,
    ) {
        let paths = self.config.field_paths();
        let location_id = match reader.read_string(&paths.location_id) {
            Ok(id) => non_blank(id),
            Err(e) => return report.record(e),
        };

        let location = location_id
            .as_deref()
            .and_then(|id| self.lookups.locations.by_id(id.trim()));
        match location {
            Some(location) => identifiers.set_location(&location.id),
            None => report.record(RegistrationError::UnresolvedLocation(location_id)),
        }
    }

    fn name(&self, reader: &PathReader<'_>, report: &mut ValidationReport) -> PersonName {
        let paths = self.config.field_paths();

        let middle = match reader.read_string(&paths.middle_name) {
            Ok(middle) => non_blank(middle),
            Err(e) => {
                tracing::warn!("ignoring unreadable middle name: {e}");
                None
            }
        };

        PersonName {
            given: read_text(reader, &paths.given_name, report).unwrap_or_default(),
            middle,
            family: read_text(reader, &paths.family_name, report).unwrap_or_default(),
        }
    }

    /// Addresses from the primary path, or from `…^1`, `…^2`, … when the primary path is
    /// absent.
    fn addresses(
        &self,
        reader: &PathReader<'_>,
        report: &mut ValidationReport,
    ) -> BTreeSet<PersonAddress> {
        let base = &self.config.field_paths().addresses;
        let mut addresses = BTreeSet::new();

        let primary = reader.read_raw(base);
        if primary.is_absent() {
            for (path, node) in reader.numbered_nodes(base, self.config.max_numbered_nodes()) {
                for (path, map) in objects(node, &path, report) {
                    addresses.insert(address_from(map, &path, report));
                }
            }
        } else {
            for (path, map) in objects(primary, base, report) {
                addresses.insert(address_from(map, &path, report));
            }
        }

        addresses
    }

    fn attributes(
        &self,
        reader: &PathReader<'_>,
        report: &mut ValidationReport,
    ) -> BTreeSet<PersonAttribute> {
        let base = &self.config.field_paths().attributes;
        objects(reader.read_raw(base), base, report)
            .into_iter()
            .filter_map(|(path, map)| self.attribute_from(map, &path, report))
            .collect()
    }

    fn attribute_from(
        &self,
        map: &Map<String, Value>,
        path: &PayloadPath,
        report: &mut ValidationReport,
    ) -> Option<PersonAttribute> {
        let type_id = field_text(map, path, ATTRIBUTE_TYPE_KEY, report).unwrap_or_default();
        let Some(attribute_type) = self
            .lookups
            .attribute_types
            .by_id(type_id.trim())
            .and_then(|t| self.lookups.attribute_types.by_name(&t.name))
        else {
            report.record(RegistrationError::UnresolvedAttributeType(type_id));
            return None;
        };

        match field_text(map, path, ATTRIBUTE_VALUE_KEY, report) {
            Some(value) => Some(PersonAttribute {
                attribute_type: attribute_type.name,
                value,
            }),
            None => {
                report.record(RegistrationError::NullAttributeValue(attribute_type.name));
                None
            }
        }
    }
}

/// Objects held at `path`: one object, or every element of an array. Nulls yield nothing;
/// anything else is recorded as an unexpected value.
fn objects<'v>(
    value: RawValue<'v>,
    path: &PayloadPath,
    report: &mut ValidationReport,
) -> Vec<(PayloadPath, &'v Map<String, Value>)> {
    match value {
        RawValue::Absent | RawValue::Null => Vec::new(),
        RawValue::Object(map) => vec![(path.clone(), map)],
        RawValue::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::Object(map) => Some((path.index(i), map)),
                other => {
                    let element = path.index(i);
                    report.record(RawValue::from_value(Some(other)).unexpected(&element, "object"));
                    None
                }
            })
            .collect(),
        RawValue::Scalar(_) => {
            report.record(value.unexpected(path, "object or array"));
            Vec::new()
        }
    }
}

fn address_from(
    map: &Map<String, Value>,
    path: &PayloadPath,
    report: &mut ValidationReport,
) -> PersonAddress {
    let mut field = |key: &str| non_blank(field_text(map, path, key, report));
    PersonAddress {
        region: field(ADDRESS_REGION_KEY),
        line1: field(ADDRESS_LINE1_KEY),
        line2: field(ADDRESS_LINE2_KEY),
        city_village: field(ADDRESS_CITY_VILLAGE_KEY),
    }
}

fn field_text(
    map: &Map<String, Value>,
    path: &PayloadPath,
    key: &str,
    report: &mut ValidationReport,
) -> Option<String> {
    RawValue::from_value(map.get(key))
        .text(&path.child(key))
        .unwrap_or_else(|e| {
            report.record(e);
            None
        })
}

fn read_text(
    reader: &PathReader<'_>,
    path: &PayloadPath,
    report: &mut ValidationReport,
) -> Option<String> {
    reader.read_string(path).unwrap_or_else(|e| {
        report.record(e);
        None
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
