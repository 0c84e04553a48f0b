pub mod builder;
pub mod config;
pub mod embedding;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod store;

pub use builder::{build_index, build_index_from_table, collect_records, BuildReport, SkippedRow};
pub use config::{
    ExtractionConfig, ExtractionSettings, DEFAULT_CHUNK_SIZE, DEFAULT_INDEX_DIR,
    DEFAULT_RETRIEVAL_K,
};
pub use embedding::{
    EmbeddingClient, EmbeddingIdentity, EmbeddingProvider, EmbeddingSettings,
    DEFAULT_EMBEDDING_MODEL,
};
pub use pipeline::{
    run_extraction, BatchFailure, BatchOutput, Pipeline, ProgressUpdate, RunReport, RunStage,
};
pub use prompt::{PromptComposer, FORMAT_INSTRUCTION, SYSTEM_PROMPT, TASK_INSTRUCTION};
pub use retriever::{IndexRetriever, ReferenceExamples, Retriever, NO_REFERENCE_DATA};
pub use store::{IndexManifest, ScoredRecord, SimilarityIndex};
pub use rxdose_llm::{
    GatewaySettings, Generator, LlmClient, LlmProvider, LlmRequest, SupportedModel,
};
