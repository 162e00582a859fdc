//! Header extraction for TOA5 logger data files.
//!
//! A TOA5 file starts with four quoted, comma-delimited header rows:
//!
//! ```text
//! "TOA5","LTAR_FIELD1","CR3000","6503","CR3000.Std.31","CPU:LTAR_EC.CR3","12345","LTAR_TABLE2"
//! "TIMESTAMP","RECORD","CO2","H2O"
//! "TS","RN","mg/m^3","g/m^3"
//! "","","Smp","Smp"
//! ```
//!
//! The first row describes the logger environment, the next three describe the
//! columns (name, units, processing). Data records follow and are never read here.

use chrono::FixedOffset;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Number of rows making up the header
pub const HEADER_ROWS: usize = 4;

/// Width of the environment row
const ENVIRONMENT_FIELDS: usize = 8;

const FILE_FORMAT: &str = "TOA5";

/// Reasons a header cannot be read as TOA5
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("expected {expected} header rows, found {found}")]
    MissingRows { expected: usize, found: usize },

    #[error("environment row has {found} fields, expected {expected}")]
    EnvironmentWidth { expected: usize, found: usize },

    #[error("unsupported file format {0:?}")]
    UnsupportedFormat(String),

    #[error("required field {0} is blank")]
    MissingField(&'static str),

    #[error("program signature {0:?} is not numeric")]
    InvalidSignature(String),

    #[error("header row {row} has {found} columns, expected {expected}")]
    ColumnMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("utc offset of {0} hours is out of range")]
    InvalidOffset(i32),

    #[error("header could not be read: {0}")]
    Csv(#[from] csv::Error),
}

/// One data column described by the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub units: String,
    pub processing: String,
}

/// Metadata read from a logger file header
#[derive(Debug, Clone, Serialize)]
pub struct LoggerMetadata {
    pub source_file: String,
    pub file_format: String,
    pub station_name: String,
    pub logger_model: String,
    pub serial_number: String,
    pub os_version: String,
    pub program_name: String,
    pub program_signature: u32,
    pub table_name: String,
    pub variables: Vec<Variable>,
    /// Offset of the logger clock from UTC
    #[serde(serialize_with = "serialize_offset")]
    pub utc_offset: FixedOffset,
}

fn serialize_offset<S>(offset: &FixedOffset, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&offset.to_string())
}

/// Reads the header of a single TOA5 file held in memory
pub struct Toa5Extractor<'a> {
    filename: &'a str,
    content: &'a [u8],
    utc_offset_hours: i32,
}

impl<'a> Toa5Extractor<'a> {
    pub fn new(filename: &'a str, content: &'a [u8], utc_offset_hours: i32) -> Self {
        Self {
            filename,
            content,
            utc_offset_hours,
        }
    }

    /// Parse the header rows into [`LoggerMetadata`]
    pub fn extract(&self) -> Result<LoggerMetadata, HeaderError> {
        let utc_offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or(HeaderError::InvalidOffset(self.utc_offset_hours))?;

        let rows = self.header_rows()?;
        let environment = &rows[0];

        if environment.len() != ENVIRONMENT_FIELDS {
            return Err(HeaderError::EnvironmentWidth {
                expected: ENVIRONMENT_FIELDS,
                found: environment.len(),
            });
        }

        let file_format = field(environment, 0);
        if file_format != FILE_FORMAT {
            return Err(HeaderError::UnsupportedFormat(file_format));
        }

        let station_name = required(environment, 1, "station name")?;
        let table_name = required(environment, 7, "table name")?;

        let signature = field(environment, 6);
        let program_signature = signature
            .parse::<u32>()
            .map_err(|_| HeaderError::InvalidSignature(signature.clone()))?;

        let variables = variables(&rows[1], &rows[2], &rows[3])?;

        debug!(
            file = %self.filename,
            station = %station_name,
            table = %table_name,
            signature = program_signature,
            columns = variables.len(),
            "Parsed TOA5 header"
        );

        Ok(LoggerMetadata {
            source_file: self.filename.to_string(),
            file_format,
            station_name,
            logger_model: field(environment, 2),
            serial_number: field(environment, 3),
            os_version: field(environment, 4),
            program_name: field(environment, 5),
            program_signature,
            table_name,
            variables,
            utc_offset,
        })
    }

    /// Read exactly the header rows, leaving the data records untouched
    fn header_rows(&self) -> Result<Vec<StringRecord>, HeaderError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(self.content);

        let mut rows = Vec::with_capacity(HEADER_ROWS);
        for record in reader.records().take(HEADER_ROWS) {
            rows.push(record?);
        }

        if rows.len() < HEADER_ROWS {
            return Err(HeaderError::MissingRows {
                expected: HEADER_ROWS,
                found: rows.len(),
            });
        }

        Ok(rows)
    }
}

fn field(record: &StringRecord, index: usize) -> String {
    record.get(index).unwrap_or_default().to_string()
}

fn required(
    record: &StringRecord,
    index: usize,
    name: &'static str,
) -> Result<String, HeaderError> {
    let value = field(record, index);
    if value.is_empty() {
        return Err(HeaderError::MissingField(name));
    }
    Ok(value)
}

fn variables(
    names: &StringRecord,
    units: &StringRecord,
    processing: &StringRecord,
) -> Result<Vec<Variable>, HeaderError> {
    if names.is_empty() || names.iter().all(str::is_empty) {
        return Err(HeaderError::MissingField("field names"));
    }

    for (row, record) in [(3, units), (4, processing)] {
        if record.len() != names.len() {
            return Err(HeaderError::ColumnMismatch {
                row,
                expected: names.len(),
                found: record.len(),
            });
        }
    }

    Ok(names
        .iter()
        .zip(units.iter())
        .zip(processing.iter())
        .map(|((name, units), processing)| Variable {
            name: name.to_string(),
            units: units.to_string(),
            processing: processing.to_string(),
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = concat!(
        "\"TOA5\",\"LTAR_FIELD1\",\"CR3000\",\"6503\",\"CR3000.Std.31\",\"CPU:LTAR_EC.CR3\",\"12345\",\"LTAR_TABLE2\"\n",
        "\"TIMESTAMP\",\"RECORD\",\"CO2\",\"H2O\"\n",
        "\"TS\",\"RN\",\"mg/m^3\",\"g/m^3\"\n",
        "\"\",\"\",\"Smp\",\"Smp\"\n",
        "\"2023-07-15 12:00:00.1\",0,612.3,9.12\n",
        "\"2023-07-15 12:00:00.2\",1,612.5,9.10\n",
    );

    fn extract(content: &str) -> Result<LoggerMetadata, HeaderError> {
        Toa5Extractor::new("FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat", content.as_bytes(), -8)
            .extract()
    }

    #[test]
    fn test_extract_well_formed_header() {
        let meta = extract(SAMPLE).unwrap();

        assert_eq!(meta.file_format, "TOA5");
        assert_eq!(meta.station_name, "LTAR_FIELD1");
        assert_eq!(meta.logger_model, "CR3000");
        assert_eq!(meta.serial_number, "6503");
        assert_eq!(meta.program_name, "CPU:LTAR_EC.CR3");
        assert_eq!(meta.program_signature, 12345);
        assert_eq!(meta.table_name, "LTAR_TABLE2");
        assert_eq!(meta.variables.len(), 4);
        assert_eq!(
            meta.variables[2],
            Variable {
                name: "CO2".to_string(),
                units: "mg/m^3".to_string(),
                processing: "Smp".to_string(),
            }
        );
        assert_eq!(meta.utc_offset.local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn test_tolerates_whitespace_and_quoted_delimiters() {
        let content = concat!(
            "\"TOA5\",\"LTAR_FIELD1\", CR3000 ,6503,\"CR3000.Std.31\",\"CPU:a,b.CR3\", 12345 ,\" LTAR_TABLE2\"\r\n",
            "\"TIMESTAMP\",\"RECORD\",\"Ux, raw\"\r\n",
            "\"TS\",\"RN\",\"m/s\"\r\n",
            "\"\",\"\",\"Smp\"\r\n",
        );
        let meta = extract(content).unwrap();

        assert_eq!(meta.station_name, "LTAR_FIELD1");
        assert_eq!(meta.logger_model, "CR3000");
        assert_eq!(meta.table_name, "LTAR_TABLE2");
        assert_eq!(meta.program_name, "CPU:a,b.CR3");
        assert_eq!(meta.program_signature, 12345);
        assert_eq!(meta.variables[2].name, "Ux, raw");
    }

    #[test]
    fn test_data_rows_are_not_validated() {
        let content = format!("{}not,\"a valid\nrow at all", SAMPLE);
        assert!(extract(&content).is_ok());
    }

    #[test]
    fn test_too_few_rows() {
        let content = "\"TOA5\",\"LTAR_FIELD1\",\"CR3000\",\"6503\",\"OS\",\"prog\",\"1\",\"T\"\n\"A\"\n";
        match extract(content) {
            Err(HeaderError::MissingRows { expected, found }) => {
                assert_eq!(expected, 4);
                assert_eq!(found, 2);
            }
            other => panic!("Expected MissingRows, got {:?}", other),
        }
    }

    #[test]
    fn test_environment_width_mismatch() {
        let content = SAMPLE.replacen(",\"LTAR_TABLE2\"", "", 1);
        assert!(matches!(
            extract(&content),
            Err(HeaderError::EnvironmentWidth { found: 7, .. })
        ));
    }

    #[test]
    fn test_missing_station() {
        let content = SAMPLE.replacen("\"LTAR_FIELD1\"", "\"\"", 1);
        assert!(matches!(
            extract(&content),
            Err(HeaderError::MissingField("station name"))
        ));
    }

    #[test]
    fn test_non_numeric_signature() {
        let content = SAMPLE.replacen("\"12345\"", "\"12a45\"", 1);
        match extract(&content) {
            Err(HeaderError::InvalidSignature(sig)) => assert_eq!(sig, "12a45"),
            other => panic!("Expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn test_other_formats_rejected() {
        let content = SAMPLE.replacen("\"TOA5\"", "\"TOB1\"", 1);
        assert!(matches!(
            extract(&content),
            Err(HeaderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_column_rows_must_align() {
        let content = SAMPLE.replacen("\"TS\",\"RN\",", "\"TS\",", 1);
        assert!(matches!(
            extract(&content),
            Err(HeaderError::ColumnMismatch { row: 3, expected: 4, found: 3 })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut content = SAMPLE.as_bytes().to_vec();
        content[3] = 0xff;
        let result = Toa5Extractor::new("x.dat", &content, 0).extract();
        assert!(matches!(result, Err(HeaderError::Csv(_))));
    }
}
