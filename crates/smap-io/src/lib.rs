//! # SMAP I/O - Dataset Sources and Sinks
//!
//! Concrete readers for the dataset formats SMAP understands, the registry
//! that selects them by format tag, and the JSON sink that frames mapped
//! output.
//!
//! ### Data Sources
//! - **csv**: delimited text via the `csv` crate, one record per row
//! - **shp**: ESRI shapefiles, one GeoJSON-like feature per shape
//! - **osm**: OpenStreetMap PBF extracts, one record per node, way or relation
//!
//! ### Data Sinks
//! - **JSON array**: `{"objects":[...]}` framing written one record at a time
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use smap_core::{PathSpec, SourceSpec};
//! use smap_io::SourceRegistry;
//!
//! let registry = SourceRegistry::with_defaults();
//! let spec = SourceSpec::new("csv", PathSpec::Many(vec!["a.csv".into(), "b.csv".into()]));
//! for record in registry.open(&spec)? {
//!     println!("{:?}", record?);
//! }
//! # Ok::<(), smap_core::MapError>(())
//! ```

use smap_core::{ConfigError, Decoder, MapError, Record, RecordIter, SourceFormat, SourceSpec};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// JSON array sink for mapped records
pub mod sink_json;

/// CSV file source implementation
pub mod source_csv;

/// OpenStreetMap PBF source implementation
pub mod source_osm;

/// ESRI shapefile source implementation
pub mod source_shp;

pub use sink_json::JsonArraySink;

/// Dataset formats known to the pipeline, keyed by format tag.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    formats: HashMap<String, Arc<dyn SourceFormat>>,
}

impl SourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `csv`, `shp` and `osm` formats.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(source_csv::CsvFormat)
            .register(source_shp::ShpFormat)
            .register(source_osm::OsmFormat);
        registry
    }

    /// Register a format under its own name, replacing any previous one.
    pub fn register(&mut self, format: impl SourceFormat + 'static) -> &mut Self {
        self.formats
            .insert(format.name().to_string(), Arc::new(format));
        self
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate a source descriptor without touching the filesystem.
    pub fn prepare(&self, spec: &SourceSpec) -> Result<SourcePlan, ConfigError> {
        let format = self
            .formats
            .get(&spec.format)
            .ok_or_else(|| ConfigError::UnsupportedFormat(spec.format.clone()))?;
        let decoder = format.configure(&spec.options)?;

        let paths: Vec<String> = spec.path.entries().into_iter().map(String::from).collect();
        if paths.is_empty() || paths.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::NoPaths(spec.format.clone()));
        }
        for pattern in paths.iter().filter(|p| is_glob(p)) {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidOptions {
                format: spec.format.clone(),
                reason: format!("invalid glob pattern `{pattern}`: {e}"),
            })?;
        }

        Ok(SourcePlan {
            format: spec.format.clone(),
            decoder: Arc::from(decoder),
            paths,
        })
    }

    /// Validate a source descriptor and return its lazy record sequence.
    pub fn open(&self, spec: &SourceSpec) -> Result<DatasetSource, ConfigError> {
        Ok(self.prepare(spec)?.open())
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

/// A validated source descriptor. Opening it performs no I/O; files are
/// opened as the resulting [`DatasetSource`] is pulled.
#[derive(Clone)]
pub struct SourcePlan {
    format: String,
    decoder: Arc<dyn Decoder>,
    paths: Vec<String>,
}

impl SourcePlan {
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn open(&self) -> DatasetSource {
        DatasetSource {
            format: self.format.clone(),
            decoder: self.decoder.clone(),
            pending: self.paths.iter().cloned().collect(),
            expanded: VecDeque::new(),
            current: None,
        }
    }
}

struct ActiveFile {
    path: PathBuf,
    records: RecordIter,
    count: u64,
}

/// Records of every path of one source, read back to back in list order.
///
/// At most one file is open at any time: the next path is opened only when
/// the current file is exhausted. A path that fails to open yields one
/// error; pulling again continues with the following path.
pub struct DatasetSource {
    format: String,
    decoder: Arc<dyn Decoder>,
    pending: VecDeque<String>,
    expanded: VecDeque<PathBuf>,
    current: Option<ActiveFile>,
}

impl DatasetSource {
    pub fn format(&self) -> &str {
        &self.format
    }

    /// File currently being read, if any.
    pub fn current_path(&self) -> Option<&std::path::Path> {
        self.current.as_ref().map(|active| active.path.as_path())
    }

    fn next_path(&mut self) -> Option<Result<PathBuf, MapError>> {
        if let Some(path) = self.expanded.pop_front() {
            return Some(Ok(path));
        }

        let entry = self.pending.pop_front()?;
        if !is_glob(&entry) {
            return Some(Ok(PathBuf::from(entry)));
        }

        match expand_glob(&entry) {
            Ok(paths) if paths.is_empty() => Some(Err(MapError::source_io(
                &entry,
                anyhow::anyhow!("no files matched: {entry}"),
            ))),
            Ok(paths) => {
                debug!(pattern = %entry, files = paths.len(), "expanded glob");
                self.expanded = paths.into();
                self.expanded.pop_front().map(Ok)
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl Iterator for DatasetSource {
    type Item = Result<Record, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(active) = self.current.as_mut() {
                match active.records.next() {
                    Some(Ok(record)) => {
                        active.count += 1;
                        return Some(Ok(record));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => info!(
                        path = %active.path.display(),
                        records = active.count,
                        "finished reading file"
                    ),
                }
            }
            // drop the exhausted file before the next one is opened
            self.current = None;

            let path = match self.next_path()? {
                Ok(path) => path,
                Err(e) => return Some(Err(e)),
            };
            info!(format = %self.format, path = %path.display(), "opening file");
            match self.decoder.open(&path) {
                Ok(records) => {
                    self.current = Some(ActiveFile {
                        path,
                        records,
                        count: 0,
                    })
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, MapError> {
    let mut paths = glob::glob(pattern)
        .map_err(|e| MapError::source_io(pattern, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MapError::source_io(pattern, e))?;
    paths.sort();
    Ok(paths)
}
