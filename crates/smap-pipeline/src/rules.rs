use smap_core::{ConfigError, JobSpec, RulesDocument};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Read one rules file. `.json` files are parsed as JSON, anything else as
/// YAML. Relative input paths are resolved against the file's directory.
pub fn load_rules_file(path: &Path) -> Result<JobSpec, ConfigError> {
    let fail = |reason: String| ConfigError::RulesFile {
        path: path.to_path_buf(),
        reason,
    };

    let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let document: RulesDocument = if is_json {
        serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?
    } else {
        serde_yaml::from_str(&text).map_err(|e| fail(e.to_string()))?
    };

    let mut datasets = document.into_datasets();
    if let Some(base) = path.parent() {
        for dataset in &mut datasets {
            dataset.reader.path.rebase(base);
        }
    }
    debug!(path = %path.display(), datasets = datasets.len(), "loaded rules file");
    Ok(datasets)
}

/// Read several rules files and concatenate their datasets in argument order.
pub fn load_rules_files<P: AsRef<Path>>(paths: &[P]) -> Result<JobSpec, ConfigError> {
    let mut datasets = JobSpec::new();
    for path in paths {
        datasets.extend(load_rules_file(path.as_ref())?);
    }
    Ok(datasets)
}
