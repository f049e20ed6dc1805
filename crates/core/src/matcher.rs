//! Duplicate-patient detection.
//!
//! A candidate is compared against stored records found either by its full name or, when it
//! has no name, by its preferred identifier value. The first stored record that passes every
//! check is reported.

use crate::constants::MAX_NAME_EDIT_DISTANCE;
use crate::error::StoreResult;
use crate::stores::PatientStore;
use regq_record::{PatientRecord, PersonName, StoredPatient};

/// Returns the first stored record similar to `candidate`, if any.
///
/// # Errors
///
/// Propagates the store's lookup failure.
pub fn find_similar(
    candidate: &PatientRecord,
    store: &dyn PatientStore,
) -> StoreResult<Option<StoredPatient>> {
    let existing = if candidate.person_name().is_none() {
        let Some(identifier) = candidate.preferred_identifier() else {
            return Ok(None);
        };
        store.find_by_identifier_value(&identifier.value)?
    } else {
        store.find_by_full_name(&candidate.full_name())?
    };

    Ok(existing
        .into_iter()
        .find(|patient| is_similar(candidate, &patient.record)))
}

/// Whether two records plausibly describe the same person.
pub fn is_similar(candidate: &PatientRecord, existing: &PatientRecord) -> bool {
    if candidate.full_name().trim().is_empty() || existing.full_name().trim().is_empty() {
        return false;
    }

    // Two missing genders are equal.
    let same_gender = candidate.gender.as_deref().map(str::to_lowercase)
        == existing.gender.as_deref().map(str::to_lowercase);
    if !same_gender {
        return false;
    }

    let same_birth_date = matches!(
        (candidate.birth_date, existing.birth_date),
        (Some(a), Some(b)) if a == b
    );
    if !same_birth_date {
        return false;
    }

    let (Some(a), Some(b)) = (candidate.person_name(), existing.person_name()) else {
        return false;
    };
    names_close(a, b)
}

fn names_close(a: &PersonName, b: &PersonName) -> bool {
    close(&a.given, &b.given) && close(&a.family, &b.family)
}

fn close(a: &str, b: &str) -> bool {
    strsim::levenshtein(&a.to_lowercase(), &b.to_lowercase()) < MAX_NAME_EDIT_DISTANCE
}
