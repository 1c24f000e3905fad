//! # SMAP TX - Record Transforms
//!
//! Turns mapper configuration into runnable record transforms:
//!
//! - [`Rule`]: constant, path, coalesce and computed field rules
//! - [`KeepPredicate`]: the optional filter run before any field is mapped
//! - [`RecordMapper`]: keep predicate plus field rules for one dataset
//! - [`FunctionRegistry`]: named host functions that `computed` rules and
//!   `named` keep predicates refer to
//!
//! ```rust
//! use serde_json::json;
//! use smap_tx::{RecordMapper, Rule};
//!
//! let mapper = RecordMapper::new()
//!     .field("name", Rule::path("properties.NAME").unwrap())
//!     .field("source", Rule::constant("parks"));
//! let record = json!({ "properties": { "NAME": "Elm Park" } });
//! let mapped = mapper.map(record.as_object().unwrap()).unwrap();
//! assert_eq!(mapped["name"], json!("Elm Park"));
//! ```

use smap_core::{Record, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod keep;
pub mod mapper;
pub mod rule;

pub use keep::{KeepPredicate, PredicateFn};
pub use mapper::{MapStats, MappedRecords, RecordMapper};
pub use rule::{ComputedFn, Rule};

/// Named host functions available to rules files.
///
/// This is the only way callable logic enters a conversion: rules files
/// refer to functions by name and the host program registers them.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    computed: HashMap<String, ComputedFn>,
    predicates: HashMap<String, PredicateFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_computed<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.computed.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_predicate<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(f));
        self
    }

    pub fn computed(&self, name: &str) -> Option<ComputedFn> {
        self.computed.get(name).cloned()
    }

    pub fn predicate(&self, name: &str) -> Option<PredicateFn> {
        self.predicates.get(name).cloned()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut computed: Vec<_> = self.computed.keys().collect();
        let mut predicates: Vec<_> = self.predicates.keys().collect();
        computed.sort();
        predicates.sort();
        f.debug_struct("FunctionRegistry")
            .field("computed", &computed)
            .field("predicates", &predicates)
            .finish()
    }
}
