use crate::error::{Result, RxError};
use crate::table::{Dataset, InputRow};

/// A contiguous view over the dataset rows `start..start + len()`.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub index: usize,
    pub start: usize,
    rows: &'a [InputRow],
}

impl<'a> Batch<'a> {
    pub fn rows(&self) -> &'a [InputRow] {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One rendered row per line; this is both the retrieval query and the
    /// data block of the prompt.
    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(InputRow::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn batch_count(rows: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    rows.div_ceil(chunk_size)
}

/// Partitions the dataset into `ceil(len / chunk_size)` batches of
/// `chunk_size` rows; only the last may be shorter.
pub fn split(dataset: &Dataset, chunk_size: usize) -> Result<Vec<Batch<'_>>> {
    if chunk_size == 0 {
        return Err(RxError::InvalidChunkSize(chunk_size));
    }
    Ok(dataset
        .rows()
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, rows)| Batch {
            index,
            start: index * chunk_size,
            rows,
        })
        .collect())
}
