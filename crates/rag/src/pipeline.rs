use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rxdose_core::{parse_response_counted, split, Batch, Dataset, OutputTable, ParsedResponse};
use rxdose_llm::{Generator, LlmClient};
use tracing::{debug, error, info, warn};

use crate::config::{ExtractionConfig, ExtractionSettings};
use crate::embedding::EmbeddingClient;
use crate::prompt::PromptComposer;
use crate::retriever::{IndexRetriever, Retriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Initializing,
    Loading,
    Batching,
    ProcessingBatch { index: usize, total: usize },
    Finalizing,
    Complete,
    Failed,
}

/// Advisory telemetry handed to the caller's progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: RunStage,
    pub message: String,
    pub fraction: Option<f32>,
}

impl ProgressUpdate {
    fn new(stage: RunStage, message: impl Into<String>, fraction: Option<f32>) -> Self {
        Self {
            stage,
            message: message.into(),
            fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub index: usize,
    pub parsed: ParsedResponse,
    pub retrieval_degraded: bool,
}

#[derive(Default)]
struct BatchOutcomes {
    succeeded: Vec<BatchOutput>,
    failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub table: OutputTable,
    pub input_rows: usize,
    pub batches: usize,
    pub failed_batches: Vec<BatchFailure>,
    /// Response lines discarded by the parser across all batches.
    pub dropped_lines: usize,
    /// Batches that were prompted with the no-reference sentinel.
    pub degraded_retrievals: usize,
}

impl RunReport {
    pub fn succeeded_batches(&self) -> usize {
        self.batches - self.failed_batches.len()
    }

    pub fn mean_dose(&self) -> Option<f64> {
        mean(self.table.numeric_rows().iter().map(|row| row.dose_mg))
    }

    pub fn mean_frequency(&self) -> Option<f64> {
        mean(self.table.numeric_rows().iter().map(|row| row.daily_frequency))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Batcher -> (Retriever + PromptComposer) -> Generator -> parser, one batch
/// at a time in input order. Backends are injected; the pipeline holds no
/// mutable state.
pub struct Pipeline {
    retriever: Box<dyn Retriever>,
    generator: Box<dyn Generator>,
    composer: PromptComposer,
    settings: ExtractionSettings,
}

impl Pipeline {
    pub fn new(
        retriever: Box<dyn Retriever>,
        generator: Box<dyn Generator>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            composer: PromptComposer::default(),
            settings,
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    /// Opens the persisted index and builds the model client named by
    /// `config`.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let embeddings = EmbeddingClient::new(&config.embedding)?;
        let retriever = IndexRetriever::open(&config.index_dir, embeddings)
            .with_context(|| format!("failed to open index at {}", config.index_dir.display()))?;
        let generator = LlmClient::new(config.provider, config.model, &config.gateway)?;
        info!(
            index = %config.index_dir.display(),
            provider = config.provider.as_str(),
            model = config.model.as_str(),
            "pipeline initialized"
        );
        Ok(Self::new(
            Box::new(retriever),
            Box::new(generator),
            config.settings,
        ))
    }

    pub fn settings(&self) -> ExtractionSettings {
        self.settings
    }

    pub fn process_batch(&self, batch: &Batch<'_>) -> Result<BatchOutput> {
        let data = batch.render();
        let examples = self.retriever.retrieve(&data, self.settings.retrieval_k());
        let request = self.composer.compose(&data, &examples);
        let raw = self
            .generator
            .generate(&request)
            .with_context(|| format!("model call failed for batch {}", batch.index + 1))?;
        let parsed = parse_response_counted(&raw);
        if parsed.dropped_lines > 0 {
            debug!(
                batch = batch.index + 1,
                dropped = parsed.dropped_lines,
                "dropped malformed response lines"
            );
        }
        if parsed.results.len() != batch.len() {
            debug!(
                batch = batch.index + 1,
                rows = batch.len(),
                results = parsed.results.len(),
                "result count differs from batch size"
            );
        }
        Ok(BatchOutput {
            index: batch.index,
            parsed,
            retrieval_degraded: examples.is_unavailable(),
        })
    }

    // A panicking backend fails its batch like an `Err` would. Nothing is
    // reused from the panicked call.
    fn process_batch_isolated(&self, batch: &Batch<'_>) -> Result<BatchOutput> {
        catch_unwind(AssertUnwindSafe(|| self.process_batch(batch))).unwrap_or_else(|payload| {
            Err(anyhow!(
                "batch {} panicked: {}",
                batch.index + 1,
                panic_message(payload.as_ref())
            ))
        })
    }

    /// Runs every batch of `dataset`. A failing batch contributes no rows and
    /// the run carries on; only a bad configuration aborts.
    pub fn process(
        &self,
        dataset: &Dataset,
        progress: &dyn Fn(&ProgressUpdate),
    ) -> Result<RunReport> {
        progress(&ProgressUpdate::new(
            RunStage::Batching,
            "Splitting data into chunks...",
            None,
        ));
        let batches = split(dataset, self.settings.chunk_size())?;
        debug!(rows = dataset.len(), batches = batches.len(), "dataset split");
        let total = batches.len();

        let outcomes = batches
            .iter()
            .fold(BatchOutcomes::default(), |mut outcomes, batch| {
                let stage = RunStage::ProcessingBatch {
                    index: batch.index,
                    total,
                };
                progress(&ProgressUpdate::new(
                    stage,
                    format!("Processing chunk {} of {}...", batch.index + 1, total),
                    Some(batch.index as f32 / total as f32),
                ));
                match self.process_batch_isolated(batch) {
                    Ok(output) => outcomes.succeeded.push(output),
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(batch = batch.index + 1, error = %message, "batch failed; skipping");
                        outcomes.failed.push(BatchFailure {
                            index: batch.index,
                            message,
                        });
                    }
                }
                outcomes
            });

        progress(&ProgressUpdate::new(
            RunStage::Finalizing,
            "Finalizing results...",
            None,
        ));
        let BatchOutcomes { succeeded, failed } = outcomes;
        let dropped_lines = succeeded.iter().map(|b| b.parsed.dropped_lines).sum();
        let degraded_retrievals = succeeded.iter().filter(|b| b.retrieval_degraded).count();
        let table = OutputTable::from_batches(succeeded.into_iter().map(|b| b.parsed.results));
        if !failed.is_empty() {
            warn!(failed = failed.len(), total, "some batches produced no results");
        }
        let report = RunReport {
            table,
            input_rows: dataset.len(),
            batches: total,
            failed_batches: failed,
            dropped_lines,
            degraded_retrievals,
        };
        info!(
            input_rows = report.input_rows,
            output_rows = report.table.len(),
            batches = report.batches,
            failed_batches = report.failed_batches.len(),
            dropped_lines = report.dropped_lines,
            "extraction finished"
        );
        progress(&ProgressUpdate::new(
            RunStage::Complete,
            format!("Processing complete! Processed {} rows.", report.table.len()),
            Some(1.0),
        ));
        Ok(report)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Full run: initialize backends, load the input table, process it. Failing
/// to initialize or load is terminal; batch failures are not.
pub fn run_extraction<F>(
    input: &Path,
    init: F,
    progress: &dyn Fn(&ProgressUpdate),
) -> Result<RunReport>
where
    F: FnOnce() -> Result<Pipeline>,
{
    let fail = |err: anyhow::Error| {
        error!(error = %format!("{err:#}"), "extraction run failed");
        progress(&ProgressUpdate::new(
            RunStage::Failed,
            format!("Error during processing: {err:#}"),
            None,
        ));
        err
    };

    progress(&ProgressUpdate::new(
        RunStage::Initializing,
        "Initializing RAG system...",
        None,
    ));
    let pipeline = init().map_err(fail)?;

    progress(&ProgressUpdate::new(RunStage::Loading, "Loading data...", None));
    let dataset = Dataset::load(input)
        .with_context(|| format!("failed to load input data from {}", input.display()))
        .map_err(fail)?;

    pipeline.process(&dataset, progress).map_err(fail)
}
