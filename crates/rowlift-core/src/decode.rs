//! Record decoder
//!
//! Turns a byte stream into a lazy, finite, forward-only sequence of typed
//! candidate records with 1-indexed row numbers. A row that cannot be
//! converted yields a [`RowError`] and the sequence resumes at the next row;
//! the decoder never stops early on a bad row. Byte decoding uses an
//! explicit, overridable text encoding (default Shift_JIS, suitable for the
//! legacy exports this pipeline was built for).

use encoding_rs::{Encoding, SHIFT_JIS};
use serde::Serialize;
use thiserror::Error;

use crate::errors::ValidationError;
use crate::record::CandidateRecord;

/// Default CSV field delimiter.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Errors that abort decoding of a whole file (as opposed to per-row
/// conversion failures, which are reported through [`RowError`]).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input is not valid {encoding} text")]
    Encoding { encoding: &'static str },

    #[error("missing header row")]
    MissingHeader,

    #[error("failed to read header row: {0}")]
    Header(String),
}

/// Stable category for a row conversion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowErrorCategory {
    BadFormat,
    MissingRequired,
    Unknown,
}

impl RowErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowErrorCategory::BadFormat => "bad-format",
            RowErrorCategory::MissingRequired => "missing-required",
            RowErrorCategory::Unknown => "unknown",
        }
    }
}

/// One row that could not be converted into a [`CandidateRecord`].
///
/// Carries the 1-indexed row number, a best-effort source field name looked
/// up in the header row, and a stable failure category.
#[derive(Debug, Clone)]
pub struct RowError {
    pub row_number: u64,
    pub field: Option<String>,
    pub category: RowErrorCategory,
    pub message: String,
}

impl RowError {
    pub fn into_validation_error(self) -> ValidationError {
        let mut error = ValidationError::new(
            self.row_number,
            format!("{}: {}", self.category.as_str(), self.message),
        );
        if let Some(field) = self.field {
            error = error.with_field(field);
        }
        error
    }
}

/// Decoder configuration: text encoding plus CSV dialect.
#[derive(Debug, Clone, Copy)]
pub struct CsvDecoder {
    encoding: &'static Encoding,
    delimiter: u8,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self {
            encoding: SHIFT_JIS,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl CsvDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the text encoding. Encoding is always explicit; it is never
    /// inferred from the input bytes.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Transcode the input and consume the header row, producing a file
    /// handle whose [`DecodedFile::rows`] iterator yields candidate records.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedFile, DecodeError> {
        let (text, _, had_errors) = self.encoding.decode(bytes);
        if had_errors {
            return Err(DecodeError::Encoding {
                encoding: self.encoding.name(),
            });
        }
        let text = text.into_owned();

        let mut reader = self.reader(text.as_bytes());
        let header_record = reader
            .headers()
            .map_err(|e| DecodeError::Header(e.to_string()))?
            .clone();
        if header_record.is_empty() {
            return Err(DecodeError::MissingHeader);
        }
        let headers: Vec<String> = header_record.iter().map(str::to_string).collect();

        // Counted up front so progress percentages during staging are based
        // on a measured total rather than a guess.
        let data_rows = reader.into_records().count();

        Ok(DecodedFile {
            text,
            headers,
            header_record,
            delimiter: self.delimiter,
            data_rows,
        })
    }

    fn reader<'a>(&self, input: &'a [u8]) -> csv::Reader<&'a [u8]> {
        csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(input)
    }
}

/// A transcoded file with its header table consumed.
#[derive(Debug)]
pub struct DecodedFile {
    text: String,
    headers: Vec<String>,
    header_record: csv::StringRecord,
    delimiter: u8,
    data_rows: usize,
}

impl DecodedFile {
    /// Field names in file order, used for error attribution.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Measured number of data rows (header excluded).
    pub fn row_count(&self) -> usize {
        self.data_rows
    }

    /// Lazy, forward-only iterator over `(row_number, conversion result)`
    /// pairs in file order, 1-indexed.
    pub fn rows(&self) -> RowIter<'_> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(self.text.as_bytes());
        RowIter {
            records: reader.into_records(),
            headers: &self.headers,
            header_record: &self.header_record,
            row_number: 0,
        }
    }
}

/// Iterator over decoded rows; see [`DecodedFile::rows`].
pub struct RowIter<'a> {
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    headers: &'a [String],
    header_record: &'a csv::StringRecord,
    row_number: u64,
}

impl Iterator for RowIter<'_> {
    type Item = (u64, Result<CandidateRecord, RowError>);

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.row_number += 1;
        let row_number = self.row_number;

        let result = match record {
            Ok(fields) => fields
                .deserialize::<CandidateRecord>(Some(self.header_record))
                .map_err(|e| self.classify(row_number, e)),
            Err(e) => Err(self.classify(row_number, e)),
        };
        Some((row_number, result))
    }
}

impl RowIter<'_> {
    /// Map a csv error onto a [`RowError`] with best-effort field
    /// attribution via the header table.
    fn classify(&self, row_number: u64, err: csv::Error) -> RowError {
        use csv::DeserializeErrorKind as De;

        match err.kind() {
            csv::ErrorKind::Deserialize { err: de, .. } => {
                let field = de
                    .field()
                    .and_then(|i| self.headers.get(i as usize))
                    .cloned();
                let category = match de.kind() {
                    De::ParseInt(_) | De::ParseFloat(_) | De::ParseBool(_) => {
                        RowErrorCategory::BadFormat
                    },
                    De::UnexpectedEndOfRow => RowErrorCategory::MissingRequired,
                    De::Message(m) if m.contains("missing field") => {
                        RowErrorCategory::MissingRequired
                    },
                    De::Message(_) => RowErrorCategory::BadFormat,
                    _ => RowErrorCategory::Unknown,
                };
                RowError {
                    row_number,
                    field,
                    category,
                    message: de.kind().to_string(),
                }
            },
            csv::ErrorKind::UnequalLengths { expected_len, len, .. } => RowError {
                row_number,
                field: None,
                category: if len < expected_len {
                    RowErrorCategory::MissingRequired
                } else {
                    RowErrorCategory::BadFormat
                },
                message: format!("expected {} fields, found {}", expected_len, len),
            },
            _ => RowError {
                row_number,
                field: None,
                category: RowErrorCategory::Unknown,
                message: err.to_string(),
            },
        }
    }
}
