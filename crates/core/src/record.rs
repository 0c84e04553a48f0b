use serde::{Deserialize, Serialize};

use crate::error::{Result, RxError};

pub const RAW_ANTIBIOTIC_NAME: &str = "raw_antibiotic_name";
pub const RAW_DOSE_QUANTITY: &str = "raw_dose_quantity";
pub const PATIENT_INSTRUCTIONS: &str = "patient_instructions";
pub const CLEAN_ANTIBIOTIC_NAME: &str = "clean_antibiotic_name";
pub const CLEAN_DOSE: &str = "clean_dose";
pub const CLEAN_UNIT_OF_MEASURE: &str = "clean_unit_of_measure";
pub const CLEAN_FREQUENCY: &str = "clean_frequency";
pub const CLEAN_DURATION: &str = "clean_duration";

pub const REFERENCE_COLUMNS: [&str; 8] = [
    RAW_ANTIBIOTIC_NAME,
    RAW_DOSE_QUANTITY,
    PATIENT_INSTRUCTIONS,
    CLEAN_ANTIBIOTIC_NAME,
    CLEAN_DOSE,
    CLEAN_UNIT_OF_MEASURE,
    CLEAN_FREQUENCY,
    CLEAN_DURATION,
];

/// One labeled example of the reference set. `text` is what gets embedded;
/// the remaining fields are the metadata rendered back into prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub row_id: usize,
    pub text: String,
    pub raw_antibiotic_name: String,
    pub raw_dose_quantity: String,
    pub patient_instructions: String,
    pub clean_antibiotic_name: String,
    pub clean_dose: f64,
    pub clean_unit_of_measure: String,
    pub clean_frequency: f64,
    pub clean_duration: f64,
}

impl ReferenceRecord {
    /// Builds a record from one table row addressed by column name. Absent
    /// columns read as empty text; numeric labels coerce to 0. A row whose
    /// field count disagrees with the header is rejected.
    pub fn from_row(row_id: usize, headers: &[String], values: &[String]) -> Result<Self> {
        if values.len() != headers.len() {
            return Err(RxError::MalformedRow {
                row: row_id,
                reason: format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    values.len()
                ),
            });
        }
        let field = |name: &str| column_value(headers, values, name);
        let text = format!(
            "Raw Antibiotic: {} | Raw Dose: {} | Patient Instructions: {} | Clean Antibiotic: {} | Clean Dose: {} | Unit: {} | Frequency: {} | Duration: {}",
            field(RAW_ANTIBIOTIC_NAME),
            field(RAW_DOSE_QUANTITY),
            field(PATIENT_INSTRUCTIONS),
            field(CLEAN_ANTIBIOTIC_NAME),
            field(CLEAN_DOSE),
            field(CLEAN_UNIT_OF_MEASURE),
            field(CLEAN_FREQUENCY),
            field(CLEAN_DURATION),
        );
        Ok(Self {
            row_id,
            text,
            raw_antibiotic_name: field(RAW_ANTIBIOTIC_NAME).to_string(),
            raw_dose_quantity: field(RAW_DOSE_QUANTITY).to_string(),
            patient_instructions: field(PATIENT_INSTRUCTIONS).to_string(),
            clean_antibiotic_name: field(CLEAN_ANTIBIOTIC_NAME).to_string(),
            clean_dose: coerce_number(field(CLEAN_DOSE)),
            clean_unit_of_measure: field(CLEAN_UNIT_OF_MEASURE).to_string(),
            clean_frequency: coerce_number(field(CLEAN_FREQUENCY)),
            clean_duration: coerce_number(field(CLEAN_DURATION)),
        })
    }
}

fn column_value<'a>(headers: &[String], values: &'a [String], name: &str) -> &'a str {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .and_then(|idx| values.get(idx))
        .map(|value| value.as_str())
        .unwrap_or("")
}

/// Coerce-or-0: anything that is not a finite number becomes 0.
pub fn coerce_number(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}
