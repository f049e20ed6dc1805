//! Registration ledger entries and the `entry.yaml` wire model.
//!
//! A ledger entry maps the correlation id a client generated for a registration to the id the
//! patient record was given when it was committed. Entries are written once and never updated.

use crate::{parse_yaml, RecordError, RecordResult};
use chrono::{DateTime, Utc};
use regq_types::TemporaryId;
use regq_uuid::RecordUuid;
use serde::{Deserialize, Serialize};

/// Domain-level ledger entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub temporary_id: TemporaryId,
    pub assigned_id: RecordUuid,
    pub created_at: DateTime<Utc>,
}

/// `entry.yaml` operations.
pub struct LedgerFile;

impl LedgerFile {
    /// File name of a ledger entry inside its sharded directory.
    pub const NAME: &'static str = "entry.yaml";

    /// Parse a ledger entry from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Translation`] if the YAML does not match the wire schema or any
    /// field fails validation.
    pub fn parse(yaml_text: &str) -> RecordResult<LedgerEntry> {
        let wire: LedgerEntryWire = parse_yaml(yaml_text, "Ledger entry")?;

        let created_at = wire
            .created_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| RecordError::Translation(format!("Invalid createdAt: {e}")))?;

        Ok(LedgerEntry {
            temporary_id: wire.temporary_id,
            assigned_id: wire.assigned_id,
            created_at,
        })
    }

    /// Render a ledger entry as YAML text.
    pub fn render(entry: &LedgerEntry) -> RecordResult<String> {
        let wire = LedgerEntryWire {
            temporary_id: entry.temporary_id.clone(),
            assigned_id: entry.assigned_id.clone(),
            created_at: entry.created_at.to_rfc3339(),
        };
        serde_yaml::to_string(&wire)
            .map_err(|e| RecordError::Translation(format!("Failed to serialise ledger entry: {e}")))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct LedgerEntryWire {
    #[serde(rename = "temporaryId")]
    temporary_id: TemporaryId,
    #[serde(rename = "assignedId")]
    assigned_id: RecordUuid,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_and_parses_entry() {
        let entry = LedgerEntry {
            temporary_id: TemporaryId::new("tmp-123").unwrap(),
            assigned_id: RecordUuid::parse("550e8400e29b41d4a716446655440000").unwrap(),
            created_at: "2026-03-01T08:00:00Z".parse().unwrap(),
        };

        let yaml = LedgerFile::render(&entry).expect("render");
        assert!(yaml.contains("temporaryId: tmp-123"));

        let parsed = LedgerFile::parse(&yaml).expect("parse");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn rejects_blank_temporary_id() {
        let input = r#"temporaryId: "  "
assignedId: 550e8400e29b41d4a716446655440000
createdAt: 2026-03-01T08:00:00Z
"#;
        let err = LedgerFile::parse(input).expect_err("blank id should fail");
        assert!(matches!(err, RecordError::Translation(msg) if msg.contains("temporaryId")));
    }
}
