use rxdose_core::ReferenceRecord;
use rxdose_llm::{LlmRequest, DATA_BLOCK_END, DATA_BLOCK_START};

use crate::retriever::{ReferenceExamples, NO_REFERENCE_DATA};

pub const SYSTEM_PROMPT: &str = "You are an expert pharmaceutical data analyst specializing in extracting dosage information from patient instructions.";

pub const TASK_INSTRUCTION: &str = "For every row in the data extract exactly three numeric values: the daily frequency (times per day), the dose amount in mg and the duration in days. If a reference example matches a row exactly, use its values. Otherwise determine the values from the most similar reference examples. If you cannot determine a value with confidence, put a 0. /no think";

pub const FORMAT_INSTRUCTION: &str = "Comma separated list with daily frequency, dose amount in mg, and duration values. One line per input row, in input order. No units, no headers, no extra commentary.";

/// Builds the extraction request for one batch. Pure templating: the same
/// inputs always give the same request.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    task: String,
    format: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(TASK_INSTRUCTION, FORMAT_INSTRUCTION)
    }
}

impl PromptComposer {
    pub fn new(task: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            format: format.into(),
        }
    }

    pub fn compose(&self, data: &str, examples: &ReferenceExamples) -> LlmRequest {
        let mut user = String::new();
        user.push_str("Here is the raw data to process, one row per line:\n");
        user.push_str(DATA_BLOCK_START);
        user.push('\n');
        user.push_str(data.trim_end());
        user.push('\n');
        user.push_str(DATA_BLOCK_END);
        user.push_str("\n\nHere are relevant reference examples from similar cases:\n");
        user.push_str(&render_examples(examples));
        user.push_str("\n\n");
        user.push_str(&format!("Task: {}\n", self.task));
        user.push_str(&format!("Output format: {}\n\n", self.format));
        user.push_str(
            "Important instructions:\n\
             - Use the reference examples to understand how similar raw data was processed.\n\
             - Look for patterns in the reference examples that match your input data.\n\
             - If there is an exact match in the reference examples use it, otherwise work out the values from the other examples.\n\
             - If uncertain about any value, use 0.\n\
             - Focus on numerical extraction only.\n",
        );
        LlmRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user,
        }
    }
}

/// Input/output demonstration pairs; the output line has exactly the shape
/// the model is asked to produce.
pub fn render_examples(examples: &ReferenceExamples) -> String {
    match examples {
        ReferenceExamples::Unavailable => NO_REFERENCE_DATA.to_string(),
        ReferenceExamples::Found(records) if records.is_empty() => NO_REFERENCE_DATA.to_string(),
        ReferenceExamples::Found(records) => records
            .iter()
            .map(render_example)
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn render_example(record: &ReferenceRecord) -> String {
    format!(
        "Example Input: Raw Antibiotic: '{}' | Raw Dose: '{}' | Instructions: '{}'\nExample Output: {},{},{}",
        record.raw_antibiotic_name,
        record.raw_dose_quantity,
        record.patient_instructions.replace('\n', " "),
        record.clean_frequency,
        record.clean_dose,
        record.clean_duration,
    )
}
