mod batch;
mod embedding;
mod error;
mod parse;
mod record;
mod table;

pub use batch::{batch_count, split, Batch};
pub use embedding::{cosine_similarity, HashEmbedder, HashEmbedderConfig, HASH_ALGORITHM};
pub use error::{Result, RxError};
pub use parse::{
    parse_response, parse_response_counted, ExtractionResult, NumericExtraction, ParsedResponse,
};
pub use record::{
    coerce_number, ReferenceRecord, CLEAN_ANTIBIOTIC_NAME, CLEAN_DOSE, CLEAN_DURATION,
    CLEAN_FREQUENCY, CLEAN_UNIT_OF_MEASURE, PATIENT_INSTRUCTIONS, RAW_ANTIBIOTIC_NAME,
    RAW_DOSE_QUANTITY, REFERENCE_COLUMNS,
};
pub use table::{Dataset, InputRow, OutputTable, TableFormat, TableRows, OUTPUT_COLUMNS};
