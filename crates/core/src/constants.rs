//! Constants used throughout the registration core.

/// Default directory for stored patients and ledger entries.
pub const DEFAULT_PATIENT_DATA_DIR: &str = "patient_data";

/// Directory name for stored patient records.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Directory name for registration ledger entries.
pub const LEDGER_DIR_NAME: &str = "ledger";

/// Queue entry discriminator handled by [`crate::RegistrationHandler`].
pub const REGISTRATION_DISCRIMINATOR: &str = "json-registration";

/// Identifier type given to the payload's medical record number.
pub const DEFAULT_PREFERRED_IDENTIFIER_TYPE: &str = "AMRS Universal ID";

/// `chrono` format of payload birth dates (`yyyy-MM-dd`).
pub const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

/// Upper bound on `…^n` nodes probed when a collection path is absent.
pub const DEFAULT_MAX_NUMBERED_NODES: usize = 64;

/// Names closer than this (Levenshtein, case-insensitive) count as the same name.
pub const MAX_NAME_EDIT_DISTANCE: usize = 3;

/// Keys inside an address object.
pub const ADDRESS_REGION_KEY: &str = "countyDistrict";
pub const ADDRESS_LINE1_KEY: &str = "address5";
pub const ADDRESS_LINE2_KEY: &str = "address6";
pub const ADDRESS_CITY_VILLAGE_KEY: &str = "cityVillage";

/// Keys inside a person attribute object.
pub const ATTRIBUTE_TYPE_KEY: &str = "attribute_type_uuid";
pub const ATTRIBUTE_VALUE_KEY: &str = "attribute_value";
