use anyhow::Context;
use serde::Deserialize;
use smap_core::{parse_options, ConfigError, Decoder, MapError, Record, RecordIter, SourceFormat, Value};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Options accepted by the `csv` format
///
/// ```yaml
/// options:
///   delimiter: ";"
///   has_headers: false
///   columns: [id, name, lat, lon]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvOptions {
    pub delimiter: char,
    pub quote: char,
    /// Whether the first row holds column names
    #[serde(alias = "headers")]
    pub has_headers: bool,
    /// Trim whitespace around headers and fields
    pub trim: bool,
    /// Allow rows with a varying number of fields
    pub flexible: bool,
    /// Lines starting with this character are skipped
    pub comment: Option<char>,
    /// Explicit column names, used instead of the header row
    pub columns: Option<Vec<String>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            has_headers: true,
            trim: false,
            flexible: false,
            comment: None,
            columns: None,
        }
    }
}

pub struct CsvFormat;

impl SourceFormat for CsvFormat {
    fn name(&self) -> &str {
        "csv"
    }

    fn configure(&self, options: &Value) -> Result<Box<dyn Decoder>, ConfigError> {
        let options: CsvOptions = parse_options(self.name(), options)?;
        Ok(Box::new(CsvDecoder::try_new(options)?))
    }
}

#[derive(Debug, Clone)]
pub struct CsvDecoder {
    options: CsvOptions,
    delimiter: u8,
    quote: u8,
    comment: Option<u8>,
}

fn ascii_byte(name: &str, c: char) -> Result<u8, ConfigError> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::InvalidOptions {
            format: "csv".into(),
            reason: format!("`{name}` must be a single ASCII character, got `{c}`"),
        })
    }
}

impl CsvDecoder {
    pub fn try_new(options: CsvOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            delimiter: ascii_byte("delimiter", options.delimiter)?,
            quote: ascii_byte("quote", options.quote)?,
            comment: options
                .comment
                .map(|c| ascii_byte("comment", c))
                .transpose()?,
            options,
        })
    }
}

impl Decoder for CsvDecoder {
    fn open(&self, path: &Path) -> Result<RecordIter, MapError> {
        let trim = if self.options.trim {
            csv::Trim::All
        } else {
            csv::Trim::None
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(self.options.has_headers)
            .flexible(self.options.flexible)
            .comment(self.comment)
            .trim(trim)
            .from_path(path)
            .with_context(|| format!("open {}", path.display()))
            .map_err(|e| MapError::source_io(path, e))?;

        let headers = match &self.options.columns {
            Some(columns) => columns.clone(),
            None if self.options.has_headers => reader
                .headers()
                .context("read header row")
                .map_err(|e| MapError::source_io(path, e))?
                .iter()
                .map(String::from)
                .collect(),
            None => Vec::new(),
        };

        Ok(Box::new(CsvRecords {
            path: path.to_path_buf(),
            headers,
            rows: reader.into_records(),
        }))
    }
}

/// Rows of one CSV file as records keyed by column name
struct CsvRecords {
    path: PathBuf,
    headers: Vec<String>,
    rows: csv::StringRecordsIntoIter<File>,
}

impl CsvRecords {
    fn to_record(&self, row: &csv::StringRecord) -> Record {
        row.iter()
            .enumerate()
            .map(|(i, field)| {
                let name = self
                    .headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("col_{i}"));
                (name, Value::String(field.to_string()))
            })
            .collect()
    }
}

impl Iterator for CsvRecords {
    type Item = Result<Record, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.rows.next()? {
            Ok(row) => Ok(self.to_record(&row)),
            Err(e) => Err(MapError::source_io(&self.path, e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn read(options: Value, contents: &str) -> Vec<Value> {
        let file = write_csv(contents);
        let decoder = CsvFormat.configure(&options).unwrap();
        decoder
            .open(file.path())
            .unwrap()
            .map(|r| Value::Object(r.unwrap()))
            .collect()
    }

    #[test]
    fn header_row_names_fields() {
        let rows = read(Value::Null, "a,b\n1,2\n3,4\n");
        assert_eq!(
            rows,
            vec![json!({ "a": "1", "b": "2" }), json!({ "a": "3", "b": "4" })]
        );
    }

    #[test]
    fn custom_delimiter_and_trim() {
        let rows = read(json!({ "delimiter": ";", "trim": true }), "a ; b\n 1 ; x y \n");
        assert_eq!(rows, vec![json!({ "a": "1", "b": "x y" })]);
    }

    #[test]
    fn headerless_files_get_positional_names() {
        let rows = read(json!({ "headers": false }), "1,2\n3,4\n");
        assert_eq!(
            rows,
            vec![json!({ "col_0": "1", "col_1": "2" }), json!({ "col_0": "3", "col_1": "4" })]
        );
    }

    #[test]
    fn explicit_columns_override_headers() {
        let rows = read(
            json!({ "has_headers": false, "columns": ["id", "name"] }),
            "7,Elm\n",
        );
        assert_eq!(rows, vec![json!({ "id": "7", "name": "Elm" })]);
    }

    #[test]
    fn flexible_rows_omit_missing_fields() {
        let rows = read(json!({ "flexible": true }), "a,b,c\n1\n1,2,3,4\n");
        assert_eq!(
            rows,
            vec![
                json!({ "a": "1" }),
                json!({ "a": "1", "b": "2", "c": "3", "col_3": "4" })
            ]
        );
    }

    #[test]
    fn ragged_rows_are_errors_unless_flexible() {
        let file = write_csv("a,b\n1,2\n3\n5,6\n");
        let decoder = CsvFormat.configure(&Value::Null).unwrap();
        let results: Vec<_> = decoder.open(file.path()).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_source_io());
    }

    #[test]
    fn missing_file_is_a_source_error() {
        let decoder = CsvFormat.configure(&Value::Null).unwrap();
        let err = decoder.open(Path::new("/definitely/not/here.csv")).err().unwrap();
        assert!(err.is_source_io());
    }

    #[test]
    fn bad_options_are_config_errors() {
        for options in [
            json!({ "delimiter": "ab" }),
            json!({ "delimiter": "é" }),
            json!({ "unknown": 1 }),
        ] {
            assert!(matches!(
                CsvFormat.configure(&options),
                Err(ConfigError::InvalidOptions { .. })
            ));
        }
    }
}
