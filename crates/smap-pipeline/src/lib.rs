//! # SMAP Pipeline - Conversion Jobs
//!
//! Ties sources and mappers together:
//!
//! - [`load_rules_files`]: read YAML/JSON rules files into dataset specs
//! - [`ConversionJob`]: validated, ordered list of (source, mapper) pairs
//! - [`Converter`]: lazy, order-preserving stream of mapped records
//! - [`examine`]: first raw record of a source, for writing new rules
//!
//! ```rust,no_run
//! use smap_io::{JsonArraySink, SourceRegistry};
//! use smap_pipeline::{build_converter, load_rules_files};
//! use smap_tx::FunctionRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let specs = load_rules_files(&["parks.yaml", "roads.yaml"])?;
//! let converter = build_converter(&specs, &SourceRegistry::with_defaults(), &FunctionRegistry::new())?;
//! let mut sink = JsonArraySink::new(std::io::stdout().lock());
//! for record in converter {
//!     sink.write(&record?)?;
//! }
//! sink.finish()?;
//! # Ok(())
//! # }
//! ```

use smap_core::{MapError, Record, SourceSpec};
use smap_io::SourceRegistry;

pub mod converter;
pub mod rules;

pub use converter::{build_converter, ConversionJob, Converter, DatasetStats};
pub use rules::{load_rules_file, load_rules_files};

/// Open a source and return its first raw record, without any mapping.
/// `None` means the source is empty.
pub fn examine(spec: &SourceSpec, sources: &SourceRegistry) -> Result<Option<Record>, MapError> {
    let mut records = sources.open(spec)?;
    records.next().transpose()
}
