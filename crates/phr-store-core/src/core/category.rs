// crates/phr-store-core/src/core/category.rs
// ============================================================================
// Module: Medical Categories
// Description: Coarse domain categories and FHIR type classification.
// Purpose: Map fine-grained FHIR resource types onto permission categories.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every stored resource carries exactly one [`MedicalCategory`] in its index
//! row so that category-filtered reads and permission checks never parse the
//! payload. Several FHIR resource types collapse into one category, and
//! anything unrecognized falls into [`MedicalCategory::Unknown`].
//!
//! Observations are the only type classified from payload content: LOINC
//! codes and observation-category codings decide between pregnancy, social
//! history, vital signs, and laboratory results.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Coding system for LOINC codes.
const LOINC_SYSTEM: &str = "http://loinc.org";
/// Coding system for FHIR observation categories.
const OBSERVATION_CATEGORY_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";
/// LOINC codes identifying pregnancy status observations.
const PREGNANCY_LOINC_CODES: [&str; 13] = [
    "82810-3", "11636-8", "11637-6", "11638-4", "11639-2", "11640-0", "11612-9", "11613-7",
    "11614-5", "33065-4", "11778-8", "11779-6", "11780-4",
];
/// LOINC codes identifying alcohol and tobacco use observations.
const SOCIAL_HISTORY_LOINC_CODES: [&str; 2] = ["74013-4", "72166-2"];
/// LOINC codes identifying vital sign observations.
const VITAL_SIGNS_LOINC_CODES: [&str; 12] = [
    "85353-1", "9279-1", "8867-4", "2708-6", "8310-5", "8302-2", "9843-4", "29463-7", "39156-5",
    "85354-9", "8480-6", "8462-4",
];
/// Observation category code for social history.
const CATEGORY_SOCIAL_HISTORY: &str = "social-history";
/// Observation category code for vital signs.
const CATEGORY_VITAL_SIGNS: &str = "vital-signs";
/// Observation category code for laboratory results.
const CATEGORY_LABORATORY: &str = "laboratory";

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Coarse domain category used for index filtering and permission grants.
///
/// # Invariants
/// - [`MedicalCategory::code`] values are persisted and must never be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalCategory {
    /// Catch-all for unrecognized resource types.
    Unknown,
    /// Immunizations.
    Vaccines,
    /// Allergies and intolerances.
    AllergiesIntolerances,
    /// Pregnancy status observations.
    Pregnancy,
    /// Social history observations.
    SocialHistory,
    /// Vital sign observations.
    VitalSigns,
    /// Laboratory result observations.
    LaboratoryResults,
    /// Conditions and problems.
    Conditions,
    /// Procedures.
    Procedures,
    /// Medications and prescriptions.
    Medications,
    /// Patient demographics.
    PersonalDetails,
    /// Practitioners and their roles.
    PractitionerDetails,
    /// Encounters, locations, and organizations.
    Visits,
}

impl MedicalCategory {
    /// All categories in stable code order.
    pub const ALL: [Self; 13] = [
        Self::Unknown,
        Self::Vaccines,
        Self::AllergiesIntolerances,
        Self::Pregnancy,
        Self::SocialHistory,
        Self::VitalSigns,
        Self::LaboratoryResults,
        Self::Conditions,
        Self::Procedures,
        Self::Medications,
        Self::PersonalDetails,
        Self::PractitionerDetails,
        Self::Visits,
    ];

    /// Returns the persisted integer code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Vaccines => 1,
            Self::AllergiesIntolerances => 2,
            Self::Pregnancy => 3,
            Self::SocialHistory => 4,
            Self::VitalSigns => 5,
            Self::LaboratoryResults => 6,
            Self::Conditions => 7,
            Self::Procedures => 8,
            Self::Medications => 9,
            Self::PersonalDetails => 10,
            Self::PractitionerDetails => 11,
            Self::Visits => 12,
        }
    }

    /// Resolves a persisted integer code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.code() == code)
    }

    /// Returns the stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Vaccines => "vaccines",
            Self::AllergiesIntolerances => "allergies_intolerances",
            Self::Pregnancy => "pregnancy",
            Self::SocialHistory => "social_history",
            Self::VitalSigns => "vital_signs",
            Self::LaboratoryResults => "laboratory_results",
            Self::Conditions => "conditions",
            Self::Procedures => "procedures",
            Self::Medications => "medications",
            Self::PersonalDetails => "personal_details",
            Self::PractitionerDetails => "practitioner_details",
            Self::Visits => "visits",
        }
    }

    /// Classifies a FHIR resource into its domain category.
    ///
    /// `payload` is consulted only for `Observation` resources.
    #[must_use]
    pub fn classify(fhir_type: &str, payload: &Value) -> Self {
        match fhir_type {
            "AllergyIntolerance" => Self::AllergiesIntolerances,
            "Condition" => Self::Conditions,
            "Encounter" | "Location" | "Organization" => Self::Visits,
            "Immunization" => Self::Vaccines,
            "Observation" => classify_observation(payload).unwrap_or(Self::Unknown),
            "Patient" => Self::PersonalDetails,
            "Practitioner" | "PractitionerRole" => Self::PractitionerDetails,
            "Procedure" => Self::Procedures,
            "Medication" | "MedicationRequest" | "MedicationStatement" => Self::Medications,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MedicalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Classifies an observation by LOINC code first, then by category coding.
fn classify_observation(payload: &Value) -> Option<MedicalCategory> {
    let loinc_codes = payload.get("code").map(|code| codes_of_system(code, LOINC_SYSTEM));
    let loinc_codes = loinc_codes.unwrap_or_default();
    let categories: Vec<&str> = payload
        .get("category")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .flat_map(|entry| codes_of_system(entry, OBSERVATION_CATEGORY_SYSTEM))
                .collect()
        })
        .unwrap_or_default();
    let has_code = |codes: &[&str]| loinc_codes.iter().any(|code| codes.contains(code));

    if has_code(&PREGNANCY_LOINC_CODES) {
        return Some(MedicalCategory::Pregnancy);
    }
    if has_code(&SOCIAL_HISTORY_LOINC_CODES) || categories.contains(&CATEGORY_SOCIAL_HISTORY) {
        return Some(MedicalCategory::SocialHistory);
    }
    if has_code(&VITAL_SIGNS_LOINC_CODES) || categories.contains(&CATEGORY_VITAL_SIGNS) {
        return Some(MedicalCategory::VitalSigns);
    }
    if categories.contains(&CATEGORY_LABORATORY) {
        return Some(MedicalCategory::LaboratoryResults);
    }
    None
}

/// Collects `coding[].code` values of a codeable concept for one coding system.
///
/// Malformed codings are skipped.
fn codes_of_system<'a>(concept: &'a Value, system: &str) -> Vec<&'a str> {
    concept
        .get("coding")
        .and_then(Value::as_array)
        .map(|codings| {
            codings
                .iter()
                .filter(|coding| coding.get("system").and_then(Value::as_str) == Some(system))
                .filter_map(|coding| coding.get("code").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Builds an observation payload with one LOINC code and optional category.
    fn observation(loinc: &str, category: Option<&str>) -> Value {
        let mut value = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "code": { "coding": [{ "system": LOINC_SYSTEM, "code": loinc }] },
        });
        if let Some(category) = category {
            value["category"] = json!([
                { "coding": [{ "system": OBSERVATION_CATEGORY_SYSTEM, "code": category }] }
            ]);
        }
        value
    }

    #[test]
    fn codes_round_trip_for_every_category() {
        for category in MedicalCategory::ALL {
            assert_eq!(MedicalCategory::from_code(category.code()), Some(category));
        }
        assert_eq!(MedicalCategory::from_code(99), None);
    }

    #[test]
    fn several_fhir_types_share_a_category() {
        let empty = json!({});
        for fhir_type in ["Encounter", "Location", "Organization"] {
            assert_eq!(MedicalCategory::classify(fhir_type, &empty), MedicalCategory::Visits);
        }
        assert_eq!(MedicalCategory::classify("Immunization", &empty), MedicalCategory::Vaccines);
        assert_eq!(MedicalCategory::classify("Questionnaire", &empty), MedicalCategory::Unknown);
    }

    #[test]
    fn pregnancy_code_wins_over_vital_signs_category() {
        let payload = observation("82810-3", Some(CATEGORY_VITAL_SIGNS));
        assert_eq!(MedicalCategory::classify("Observation", &payload), MedicalCategory::Pregnancy);
    }

    #[test]
    fn observation_falls_back_to_category_coding() {
        let payload = observation("0000-0", Some(CATEGORY_LABORATORY));
        assert_eq!(
            MedicalCategory::classify("Observation", &payload),
            MedicalCategory::LaboratoryResults
        );
        let payload = observation("8867-4", None);
        assert_eq!(MedicalCategory::classify("Observation", &payload), MedicalCategory::VitalSigns);
    }

    #[test]
    fn unclassifiable_observation_is_unknown() {
        let payload = observation("0000-0", Some("exam"));
        assert_eq!(MedicalCategory::classify("Observation", &payload), MedicalCategory::Unknown);
    }
}
