use smap_core::{ConfigError, DatasetSpec, MapError, Record};
use smap_io::{DatasetSource, SourcePlan, SourceRegistry};
use smap_tx::{FunctionRegistry, MapStats, MappedRecords, RecordMapper};
use std::collections::VecDeque;
use tracing::{info, warn};

/// A validated dataset waiting to be read
struct PreparedDataset {
    index: usize,
    plan: SourcePlan,
    mapper: RecordMapper,
}

/// An ordered list of validated (source, mapper) pairs.
///
/// Building a job checks every dataset up front: formats, options, paths,
/// field rules and keep predicates. No file is opened until the converter
/// is pulled.
#[derive(Default)]
pub struct ConversionJob {
    datasets: Vec<PreparedDataset>,
}

impl ConversionJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `specs` and assemble a job; the first invalid dataset aborts
    /// the build.
    pub fn build(
        specs: &[DatasetSpec],
        sources: &SourceRegistry,
        functions: &FunctionRegistry,
    ) -> Result<Self, ConfigError> {
        let mut job = Self::new();
        for (index, spec) in specs.iter().enumerate() {
            let plan = sources
                .prepare(&spec.reader)
                .map_err(|e| e.in_dataset(index))?;
            let mapper =
                RecordMapper::compile(&spec.mapper, functions).map_err(|e| e.in_dataset(index))?;
            job = job.dataset(plan, mapper);
        }
        info!(datasets = job.len(), "conversion job ready");
        Ok(job)
    }

    /// Append a dataset built in code.
    pub fn dataset(mut self, plan: SourcePlan, mapper: RecordMapper) -> Self {
        let index = self.datasets.len();
        self.datasets.push(PreparedDataset {
            index,
            plan,
            mapper,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn into_converter(self) -> Converter {
        Converter {
            pending: self.datasets.into(),
            active: None,
            finished: Vec::new(),
        }
    }
}

/// Validate `specs` and return the lazy output sequence of the whole job.
pub fn build_converter(
    specs: &[DatasetSpec],
    sources: &SourceRegistry,
    functions: &FunctionRegistry,
) -> Result<Converter, MapError> {
    Ok(ConversionJob::build(specs, sources, functions)?.into_converter())
}

/// Counters for one dataset of a converter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    pub index: usize,
    pub format: String,
    pub stats: MapStats,
    /// `false` when the dataset was skipped before it was exhausted
    pub completed: bool,
}

struct ActiveDataset {
    index: usize,
    format: String,
    records: MappedRecords<DatasetSource>,
}

/// Mapped records of every dataset of a job, one dataset after another.
///
/// Dataset *i + 1* is opened only once dataset *i* is exhausted and dropped,
/// so output order follows declaration order and at most one source is open.
/// Errors are yielded in place; pulling again resumes the same dataset, and
/// [`Converter::skip_dataset`] moves on to the next one. Dropping the
/// converter closes whatever is open.
pub struct Converter {
    pending: VecDeque<PreparedDataset>,
    active: Option<ActiveDataset>,
    finished: Vec<DatasetStats>,
}

impl Converter {
    /// Abandon the dataset being read, releasing its files. Returns its index.
    pub fn skip_dataset(&mut self) -> Option<usize> {
        let index = self.active.as_ref()?.index;
        warn!(dataset = index, "skipping rest of dataset");
        self.retire(false);
        Some(index)
    }

    /// Index of the dataset currently being read
    pub fn active_dataset(&self) -> Option<usize> {
        self.active.as_ref().map(|active| active.index)
    }

    /// Datasets not yet started
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Counters of finished datasets, followed by the active one.
    pub fn stats(&self) -> Vec<DatasetStats> {
        let mut stats = self.finished.clone();
        if let Some(active) = &self.active {
            stats.push(DatasetStats {
                index: active.index,
                format: active.format.clone(),
                stats: active.records.stats(),
                completed: false,
            });
        }
        stats
    }

    fn retire(&mut self, completed: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        let stats = active.records.stats();
        info!(
            dataset = active.index,
            format = %active.format,
            read = stats.read,
            kept = stats.kept,
            discarded = stats.discarded,
            "dataset finished"
        );
        self.finished.push(DatasetStats {
            index: active.index,
            format: active.format,
            stats,
            completed,
        });
    }
}

impl Iterator for Converter {
    type Item = Result<Record, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(active) = self.active.as_mut() {
                if let Some(item) = active.records.next() {
                    return Some(item);
                }
                self.retire(true);
            }

            let next = self.pending.pop_front()?;
            info!(dataset = next.index, format = next.plan.format(), "starting dataset");
            self.active = Some(ActiveDataset {
                index: next.index,
                format: next.plan.format().to_string(),
                records: next.mapper.map_records(next.plan.open()),
            });
        }
    }
}
