use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{Result, RxError};
use crate::parse::{ExtractionResult, NumericExtraction};

pub const OUTPUT_COLUMNS: [&str; 3] = ["Daily Frequency", "Dose", "Duration"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("tsv") | Some("tab") => Ok(TableFormat::Tsv),
            _ => Err(RxError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            TableFormat::Csv => b',',
            TableFormat::Tsv => b'\t',
        }
    }
}

/// Header plus rows exactly as read; a row that failed to decode is kept as
/// its error so callers decide whether one bad row is fatal.
#[derive(Debug)]
pub struct TableRows {
    pub headers: Vec<String>,
    pub rows: Vec<Result<Vec<String>>>,
}

impl TableRows {
    pub fn read_path(path: &Path) -> Result<Self> {
        let format = TableFormat::from_path(path)?;
        let file = File::open(path)?;
        Self::from_reader(file, format.delimiter())
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()?
            .iter()
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<_>>();
        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(|cell| cell.to_string()).collect())
                    .map_err(RxError::from)
            })
            .collect();
        Ok(Self { headers, rows })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    cells: Vec<String>,
}

impl InputRow {
    pub fn new(cells: Vec<String>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Cells in column order, pipe-delimited, with embedded newlines flattened.
    pub fn render(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.replace("\r\n", " ").replace('\n', " "))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// The dataset being extracted. Columns are arbitrary; only row order matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<InputRow>,
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<InputRow>) -> Self {
        Self { headers, rows }
    }

    /// Loads an input table. Unlike the reference set, a single undecodable
    /// or ragged row fails the whole load.
    pub fn load(path: &Path) -> Result<Self> {
        let table = TableRows::read_path(path)?;
        Self::from_table(table)
    }

    pub fn from_table(table: TableRows) -> Result<Self> {
        let width = table.headers.len();
        let mut rows = Vec::with_capacity(table.rows.len());
        for (idx, row) in table.rows.into_iter().enumerate() {
            let cells = row?;
            if cells.len() != width {
                return Err(RxError::MalformedRow {
                    row: idx + 1,
                    reason: format!("expected {width} fields, found {}", cells.len()),
                });
            }
            rows.push(InputRow::new(cells));
        }
        Ok(Self {
            headers: table.headers,
            rows,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[InputRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fixed three-column result of a run, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTable {
    rows: Vec<ExtractionResult>,
}

impl OutputTable {
    pub fn new(rows: Vec<ExtractionResult>) -> Self {
        Self { rows }
    }

    pub fn from_batches<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Vec<ExtractionResult>>,
    {
        Self {
            rows: batches.into_iter().flatten().collect(),
        }
    }

    pub fn columns(&self) -> [&'static str; 3] {
        OUTPUT_COLUMNS
    }

    pub fn rows(&self) -> &[ExtractionResult] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn numeric_rows(&self) -> Vec<NumericExtraction> {
        self.rows.iter().map(ExtractionResult::to_numeric).collect()
    }

    pub fn write_path(&self, path: &Path) -> Result<()> {
        let format = TableFormat::from_path(path)?;
        let file = File::create(path)?;
        self.write_to(file, format.delimiter())
    }

    pub fn write_to<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);
        writer.write_record(OUTPUT_COLUMNS)?;
        for row in &self.rows {
            writer.write_record([
                row.daily_frequency.as_str(),
                row.dose_mg.as_str(),
                row.duration_days.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}
