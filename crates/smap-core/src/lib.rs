//! # SMAP Core - Schema Mapper Core Library
//!
//! This crate provides the foundational types shared by every SMAP crate:
//! the record model, the rules-file configuration structs, the error types
//! and the traits that dataset decoders implement.
//!
//! ## Key Components
//!
//! - **Records**: ordered JSON objects flowing through the pipeline
//! - **Property Paths**: the `a.b[0].c` grammar used by field rules
//! - **Specs**: serde structs for reader/mapper configuration loaded from rules files
//! - **Source Traits**: [`SourceFormat`] and [`Decoder`], implemented per dataset format
//! - **Errors**: build-time [`ConfigError`] and run-time [`MapError`]
//!
//! ## Example Rules File
//!
//! ```yaml
//! reader:
//!   format: csv
//!   path: parks.csv
//!   options: { delimiter: ";" }
//! mapper:
//!   keep: { exists: NAME }
//!   fields:
//!     name: NAME
//!     kind: { constant: "park" }
//!     label: { coalesce: [LABEL, NAME] }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub mod path;

pub use path::{PathError, PropertyPath, Segment};

/// A single JSON value inside a record
pub type Value = serde_json::Value;

/// One structured record: an ordered mapping from field name to value
pub type Record = serde_json::Map<String, Value>;

/// Lazy, pull-based sequence of records produced by a decoder or converter
pub type RecordIter = Box<dyn Iterator<Item = Result<Record, MapError>> + Send>;

/// Build-time configuration errors.
///
/// These are raised while a conversion job is being assembled, before any
/// record is read, so a job either starts completely or not at all.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The reader names a format with no registered adapter
    #[error("unsupported format `{0}`")]
    UnsupportedFormat(String),

    /// Format options could not be understood by the adapter
    #[error("invalid options for format `{format}`: {reason}")]
    InvalidOptions { format: String, reason: String },

    /// The reader lists no input paths
    #[error("reader for format `{0}` has no input paths")]
    NoPaths(String),

    /// A field rule has an unknown kind or a malformed body
    #[error("invalid rule for field `{field}`: {reason}")]
    InvalidRule { field: String, reason: String },

    /// A path expression inside a rule or predicate does not parse
    #[error("invalid path expression `{expr}`: {source}")]
    InvalidPath {
        expr: String,
        #[source]
        source: PathError,
    },

    /// A `computed` rule names a function that was never registered
    #[error("unknown computed function `{0}`")]
    UnknownFunction(String),

    /// A `named` keep predicate was never registered
    #[error("unknown keep predicate `{0}`")]
    UnknownPredicate(String),

    /// A rules file could not be read or parsed
    #[error("cannot load rules file {}: {reason}", path.display())]
    RulesFile { path: PathBuf, reason: String },

    /// Wraps the error of one dataset of a conversion job
    #[error("dataset #{index}: {source}")]
    Dataset {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    /// Strip any [`ConfigError::Dataset`] wrappers and return the cause.
    pub fn root(&self) -> &ConfigError {
        match self {
            ConfigError::Dataset { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn in_dataset(self, index: usize) -> Self {
        ConfigError::Dataset {
            index,
            source: Box::new(self),
        }
    }
}

/// Errors surfaced by SMAP operations.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// Build-time configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failure reading an input file
    ///
    /// Raised while pulling records; the consumer decides whether to abort
    /// or move on to the next dataset.
    #[error("failed reading {}", path.display())]
    SourceIo {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl MapError {
    pub fn source_io(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        MapError::SourceIo {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn is_source_io(&self) -> bool {
        matches!(self, MapError::SourceIo { .. })
    }
}

/// A registered dataset format.
///
/// Formats validate their options up front through [`SourceFormat::configure`]
/// without touching any file; the returned [`Decoder`] opens files later,
/// when the pipeline first pulls from them.
pub trait SourceFormat: Send + Sync {
    /// Format tag used in rules files (`csv`, `shp`, ...)
    fn name(&self) -> &str;

    /// Parse the opaque `options` value into a ready-to-use decoder.
    fn configure(&self, options: &Value) -> Result<Box<dyn Decoder>, ConfigError>;
}

/// Decodes one file of a given format into a lazy record sequence.
pub trait Decoder: Send + Sync {
    /// Open `path` and return its records in file order.
    fn open(&self, path: &Path) -> Result<RecordIter, MapError>;
}

/// Deserialize format options into a typed struct. A missing (`null`)
/// options value yields the struct's defaults.
pub fn parse_options<T>(format: &str, options: &Value) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| ConfigError::InvalidOptions {
        format: format.to_string(),
        reason: e.to_string(),
    })
}

/// One input path or an ordered list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
}

impl PathSpec {
    pub fn entries(&self) -> Vec<&str> {
        match self {
            PathSpec::One(p) => vec![p.as_str()],
            PathSpec::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }

    /// Resolve relative entries against `base`.
    pub fn rebase(&mut self, base: &Path) {
        let join = |p: &mut String| {
            if Path::new(p.as_str()).is_relative() {
                *p = base.join(p.as_str()).display().to_string();
            }
        };
        match self {
            PathSpec::One(p) => join(p),
            PathSpec::Many(ps) => ps.iter_mut().for_each(join),
        }
    }
}

/// Source descriptor: which files to read and how to decode them
///
/// # Example YAML Configuration
///
/// ```yaml
/// format: osm
/// path: [north.osm.pbf, south.osm.pbf]
/// options:
///   types: { node: true, way: true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Registered format tag
    pub format: String,

    /// Path, glob pattern, or ordered list of them
    ///
    /// Multiple entries are read back to back as one continuous sequence.
    pub path: PathSpec,

    /// Format specific options, passed through to the adapter untouched
    #[serde(default)]
    pub options: Value,
}

impl SourceSpec {
    pub fn new(format: impl Into<String>, path: PathSpec) -> Self {
        Self {
            format: format.into(),
            path,
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Declarative keep predicate as written in rules files
///
/// ```yaml
/// keep:
///   all:
///     - exists: name
///     - not: { one_of: { path: kind, values: [private, unknown] } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepSpec {
    /// A predicate registered by the host program
    Named(String),
    /// The path resolves to a non-null value
    Exists(String),
    /// The resolved value equals `value`
    Equals { path: String, value: Value },
    /// The resolved value equals one of `values`
    OneOf { path: String, values: Vec<Value> },
    All(Vec<KeepSpec>),
    Any(Vec<KeepSpec>),
    Not(Box<KeepSpec>),
}

/// Field rule as written in rules files.
///
/// Rules files express these as:
/// - a string: a property path (`"a.b[0]"`)
/// - `null`: the constant `null`
/// - `{ constant: <value> }`, `{ path: "<expr>" }`,
///   `{ coalesce: ["<expr>", ...] }` or `{ computed: "<function>" }`
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSpec {
    Constant(Value),
    Path(String),
    Coalesce(Vec<String>),
    Computed(String),
}

impl RuleSpec {
    /// Interpret the raw rules-file value declared for `field`.
    pub fn from_value(field: &str, value: &Value) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            field: field.to_string(),
            reason,
        };

        let body = match value {
            Value::Null => return Ok(RuleSpec::Constant(Value::Null)),
            Value::String(expr) => return Ok(RuleSpec::Path(expr.clone())),
            Value::Object(body) => body,
            other => {
                return Err(invalid(format!(
                    "expected a path string or a rule object, found `{other}`"
                )))
            }
        };

        let mut entries = body.iter();
        let (kind, arg) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(invalid("a rule object must have exactly one key".into())),
        };

        match kind.as_str() {
            "constant" => Ok(RuleSpec::Constant(arg.clone())),
            "path" => match arg {
                Value::String(expr) => Ok(RuleSpec::Path(expr.clone())),
                _ => Err(invalid("`path` expects a string".into())),
            },
            "coalesce" => {
                let paths = arg
                    .as_array()
                    .and_then(|items| {
                        items
                            .iter()
                            .map(|item| item.as_str().map(str::to_string))
                            .collect::<Option<Vec<_>>>()
                    })
                    .ok_or_else(|| invalid("`coalesce` expects a list of path strings".into()))?;
                Ok(RuleSpec::Coalesce(paths))
            }
            "computed" => match arg {
                Value::String(name) => Ok(RuleSpec::Computed(name.clone())),
                _ => Err(invalid("`computed` expects a function name".into())),
            },
            other => Err(invalid(format!("unknown rule kind `{other}`"))),
        }
    }
}

/// Mapper configuration for one dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapperSpec {
    /// Optional filter applied before any field is mapped
    #[serde(default)]
    pub keep: Option<KeepSpec>,

    /// Output field name -> raw rule, in declaration order
    ///
    /// Kept as raw values so each rule can be validated with its field name
    /// attached; see [`MapperSpec::rules`].
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

impl MapperSpec {
    /// Parse every declared field rule, in declaration order.
    pub fn rules(&self) -> Result<Vec<(String, RuleSpec)>, ConfigError> {
        self.fields
            .iter()
            .map(|(field, raw)| Ok((field.clone(), RuleSpec::from_value(field, raw)?)))
            .collect()
    }
}

/// One unit of work: a reader and the mapper applied to its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    #[serde(alias = "source")]
    pub reader: SourceSpec,
    pub mapper: MapperSpec,
}

/// Ordered datasets of a whole conversion, as loaded from rules files
pub type JobSpec = Vec<DatasetSpec>;

/// Contents of one rules file: a single dataset or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulesDocument {
    One(DatasetSpec),
    Many(Vec<DatasetSpec>),
}

impl RulesDocument {
    pub fn into_datasets(self) -> JobSpec {
        match self {
            RulesDocument::One(dataset) => vec![dataset],
            RulesDocument::Many(datasets) => datasets,
        }
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries().join(", "))
    }
}
