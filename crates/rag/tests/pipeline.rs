use std::io::Write;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rxdose_core::{Dataset, ExtractionResult, InputRow, ReferenceRecord, OUTPUT_COLUMNS};
use rxdose_llm::{DATA_BLOCK_END, DATA_BLOCK_START};
use rxdose_rag::{
    run_extraction, ExtractionSettings, Generator, LlmRequest, Pipeline, ProgressUpdate,
    ReferenceExamples, Retriever, RunStage, NO_REFERENCE_DATA,
};
use tempfile::Builder;

/// Answers "<batch>,<row>,1" for every data row of the prompt and fails on
/// the call numbers listed in `fail_on`.
struct ScriptedGenerator {
    fail_on: Vec<usize>,
    calls: Mutex<usize>,
    prompts: std::sync::Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    fn new(fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            calls: Mutex::new(0),
            prompts: Default::default(),
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        self.prompts.lock().push(request.user.clone());
        if self.fail_on.contains(&call) {
            return Err(anyhow!("model backend unavailable"));
        }
        let rows = data_rows(&request.user);
        Ok(rows
            .iter()
            .enumerate()
            .map(|(row, _)| format!("{call},{row},1"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn data_rows(prompt: &str) -> Vec<String> {
    let start = prompt.find(DATA_BLOCK_START).unwrap() + DATA_BLOCK_START.len();
    let end = prompt.find(DATA_BLOCK_END).unwrap();
    prompt[start..end]
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.to_string())
        .collect()
}

struct FixedRetriever(ReferenceExamples);

impl Retriever for FixedRetriever {
    fn retrieve(&self, _query: &str, _k: usize) -> ReferenceExamples {
        self.0.clone()
    }
}

fn example() -> ReferenceRecord {
    ReferenceRecord {
        row_id: 0,
        text: String::new(),
        raw_antibiotic_name: "AMOXIL".into(),
        raw_dose_quantity: "500MG".into(),
        patient_instructions: "tds for 7 days".into(),
        clean_antibiotic_name: "amoxicillin".into(),
        clean_dose: 500.0,
        clean_unit_of_measure: "mg".into(),
        clean_frequency: 3.0,
        clean_duration: 7.0,
    }
}

fn dataset(rows: usize) -> Dataset {
    Dataset::new(
        vec!["drug".into(), "instructions".into()],
        (0..rows)
            .map(|i| InputRow::new(vec![format!("drug{i}"), "one twice daily".into()]))
            .collect(),
    )
}

fn pipeline(generator: ScriptedGenerator, examples: ReferenceExamples) -> Pipeline {
    Pipeline::new(
        Box::new(FixedRetriever(examples)),
        Box::new(generator),
        ExtractionSettings::new(10, 3).unwrap(),
    )
}

#[test]
fn twenty_five_rows_run_as_three_batches() {
    let generator = ScriptedGenerator::new(Vec::new());
    let prompts = generator.prompts.clone();
    let pipeline = pipeline(generator, ReferenceExamples::Found(vec![example()]));
    let report = pipeline.process(&dataset(25), &|_| {}).unwrap();

    let batch_sizes = prompts
        .lock()
        .iter()
        .map(|prompt| data_rows(prompt).len())
        .collect::<Vec<_>>();
    assert_eq!(batch_sizes, vec![10, 10, 5]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.input_rows, 25);
    assert!(report.table.len() <= 25);
    assert_eq!(report.table.len(), 25);
    assert_eq!(report.table.columns(), OUTPUT_COLUMNS);
    assert_eq!(OUTPUT_COLUMNS, ["Daily Frequency", "Dose", "Duration"]);
    assert_eq!(report.table.rows()[0], ExtractionResult::new("1", "0", "1"));
    assert_eq!(report.table.rows()[24], ExtractionResult::new("3", "4", "1"));
    assert!(report.failed_batches.is_empty());
}

#[test]
fn failed_batch_is_skipped_and_run_completes() {
    let pipeline = pipeline(
        ScriptedGenerator::new(vec![2]),
        ReferenceExamples::Found(vec![example()]),
    );
    let report = pipeline.process(&dataset(25), &|_| {}).unwrap();
    assert_eq!(report.table.len(), 15);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].index, 1);
    assert!(report.failed_batches[0].message.contains("model backend unavailable"));
    assert_eq!(report.succeeded_batches(), 2);
    let from_batches = report
        .table
        .rows()
        .iter()
        .map(|row| row.daily_frequency.as_str())
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(from_batches.into_iter().collect::<Vec<_>>(), vec!["1", "3"]);
}

struct PanickingGenerator {
    calls: Mutex<usize>,
}

impl Generator for PanickingGenerator {
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if call == 2 {
            panic!("backend crashed mid-request");
        }
        Ok(data_rows(&request.user)
            .iter()
            .map(|_| "2,250,5")
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[test]
fn panicking_batch_is_recorded_and_run_continues() {
    let pipeline = Pipeline::new(
        Box::new(FixedRetriever(ReferenceExamples::Found(vec![example()]))),
        Box::new(PanickingGenerator {
            calls: Mutex::new(0),
        }),
        ExtractionSettings::new(10, 3).unwrap(),
    );
    let report = pipeline.process(&dataset(25), &|_| {}).unwrap();
    assert_eq!(report.table.len(), 15);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].index, 1);
    assert!(report.failed_batches[0]
        .message
        .contains("backend crashed mid-request"));
}

#[test]
fn every_batch_failing_still_returns_an_empty_table() {
    let pipeline = pipeline(
        ScriptedGenerator::new(vec![1, 2, 3]),
        ReferenceExamples::Unavailable,
    );
    let report = pipeline.process(&dataset(21), &|_| {}).unwrap();
    assert!(report.table.is_empty());
    assert_eq!(report.failed_batches.len(), 3);
    assert_eq!(report.mean_dose(), None);
}

#[test]
fn unavailable_references_still_prompt_the_model() {
    let generator = ScriptedGenerator::new(Vec::new());
    let prompts = generator.prompts.clone();
    let pipeline = pipeline(generator, ReferenceExamples::Unavailable);
    let report = pipeline.process(&dataset(4), &|_| {}).unwrap();
    assert_eq!(report.table.len(), 4);
    assert_eq!(report.degraded_retrievals, 1);
    assert!(prompts.lock()[0].contains(NO_REFERENCE_DATA));
}

struct NoisyGenerator;

impl Generator for NoisyGenerator {
    fn generate(&self, _request: &LlmRequest) -> Result<String> {
        Ok("Here you go:\n2,500,7\n1, 250\n3,100,5".to_string())
    }
}

#[test]
fn malformed_lines_are_counted_not_fatal() {
    let pipeline = Pipeline::new(
        Box::new(FixedRetriever(ReferenceExamples::Unavailable)),
        Box::new(NoisyGenerator),
        ExtractionSettings::new(3, 3).unwrap(),
    );
    let report = pipeline.process(&dataset(3), &|_| {}).unwrap();
    assert_eq!(report.table.len(), 2);
    assert_eq!(report.dropped_lines, 2);
    assert_eq!(report.mean_dose(), Some(300.0));
    assert_eq!(report.mean_frequency(), Some(2.5));
}

#[test]
fn progress_is_reported_at_each_stage() {
    let mut input = Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(input, "drug,instructions").unwrap();
    for i in 0..12 {
        writeln!(input, "drug{i},one daily").unwrap();
    }
    let updates = Mutex::new(Vec::<ProgressUpdate>::new());
    let report = run_extraction(
        input.path(),
        || {
            Ok(pipeline(
                ScriptedGenerator::new(Vec::new()),
                ReferenceExamples::Found(vec![example()]),
            ))
        },
        &|update| updates.lock().push(update.clone()),
    )
    .unwrap();
    assert_eq!(report.table.len(), 12);

    let updates = updates.into_inner();
    let stages = updates.iter().map(|u| u.stage).collect::<Vec<_>>();
    assert_eq!(
        stages,
        vec![
            RunStage::Initializing,
            RunStage::Loading,
            RunStage::Batching,
            RunStage::ProcessingBatch { index: 0, total: 2 },
            RunStage::ProcessingBatch { index: 1, total: 2 },
            RunStage::Finalizing,
            RunStage::Complete,
        ]
    );
    assert_eq!(updates[3].fraction, Some(0.0));
    assert_eq!(updates[4].fraction, Some(0.5));
    assert_eq!(updates[4].message, "Processing chunk 2 of 2...");
    assert_eq!(updates[6].fraction, Some(1.0));
}

#[test]
fn initialization_failure_is_terminal() {
    let updates = Mutex::new(Vec::<RunStage>::new());
    let err = run_extraction(
        std::path::Path::new("unused.csv"),
        || Err(anyhow!("embedding service unreachable")),
        &|update| updates.lock().push(update.stage),
    )
    .unwrap_err();
    assert!(err.to_string().contains("embedding service unreachable"));
    assert_eq!(
        updates.into_inner(),
        vec![RunStage::Initializing, RunStage::Failed]
    );
}

#[test]
fn missing_input_is_terminal() {
    let err = run_extraction(
        std::path::Path::new("/nonexistent/input.csv"),
        || {
            Ok(pipeline(
                ScriptedGenerator::new(Vec::new()),
                ReferenceExamples::Unavailable,
            ))
        },
        &|_| {},
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("failed to load input data"));
}
