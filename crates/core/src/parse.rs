use serde::{Deserialize, Serialize};

use crate::record::coerce_number;

/// One parsed response line. Fields stay textual until a caller asks for
/// [`NumericExtraction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub daily_frequency: String,
    pub dose_mg: String,
    pub duration_days: String,
}

impl ExtractionResult {
    pub fn new(
        daily_frequency: impl Into<String>,
        dose_mg: impl Into<String>,
        duration_days: impl Into<String>,
    ) -> Self {
        Self {
            daily_frequency: daily_frequency.into(),
            dose_mg: dose_mg.into(),
            duration_days: duration_days.into(),
        }
    }

    pub fn to_numeric(&self) -> NumericExtraction {
        NumericExtraction {
            daily_frequency: coerce_number(&self.daily_frequency),
            dose_mg: coerce_number(&self.dose_mg),
            duration_days: coerce_number(&self.duration_days),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericExtraction {
    pub daily_frequency: f64,
    pub dose_mg: f64,
    pub duration_days: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub results: Vec<ExtractionResult>,
    /// Non-blank lines that did not split into exactly three fields.
    pub dropped_lines: usize,
}

pub fn parse_response(raw: &str) -> Vec<ExtractionResult> {
    parse_response_counted(raw).results
}

/// Keeps every line that splits into exactly three comma-separated fields and
/// drops the rest without error. Surviving lines are not realigned with the
/// input rows they came from.
pub fn parse_response_counted(raw: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    for line in raw.trim().lines() {
        if line.trim().is_empty() {
            continue;
        }
        let values = line.split(',').map(str::trim).collect::<Vec<_>>();
        match values.as_slice() {
            [frequency, dose, duration] => parsed
                .results
                .push(ExtractionResult::new(*frequency, *dose, *duration)),
            _ => parsed.dropped_lines += 1,
        }
    }
    parsed
}
