use crate::rule::compile_path;
use crate::FunctionRegistry;
use smap_core::{ConfigError, KeepSpec, PropertyPath, Record, Value};
use std::fmt;
use std::sync::Arc;

/// Host-supplied filter over source records
pub type PredicateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Compiled keep predicate: decides whether a source record is mapped or
/// discarded.
#[derive(Clone)]
pub enum KeepPredicate {
    Func(PredicateFn),
    Exists(PropertyPath),
    Equals(PropertyPath, Value),
    OneOf(PropertyPath, Vec<Value>),
    All(Vec<KeepPredicate>),
    Any(Vec<KeepPredicate>),
    Not(Box<KeepPredicate>),
}

impl KeepPredicate {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        KeepPredicate::Func(Arc::new(f))
    }

    pub fn compile(spec: &KeepSpec, functions: &FunctionRegistry) -> Result<Self, ConfigError> {
        let compile_all = |specs: &[KeepSpec]| {
            specs
                .iter()
                .map(|spec| KeepPredicate::compile(spec, functions))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(match spec {
            KeepSpec::Named(name) => KeepPredicate::Func(
                functions
                    .predicate(name)
                    .ok_or_else(|| ConfigError::UnknownPredicate(name.clone()))?,
            ),
            KeepSpec::Exists(path) => KeepPredicate::Exists(compile_path(path)?),
            KeepSpec::Equals { path, value } => {
                KeepPredicate::Equals(compile_path(path)?, value.clone())
            }
            KeepSpec::OneOf { path, values } => {
                KeepPredicate::OneOf(compile_path(path)?, values.clone())
            }
            KeepSpec::All(specs) => KeepPredicate::All(compile_all(specs.as_slice())?),
            KeepSpec::Any(specs) => KeepPredicate::Any(compile_all(specs.as_slice())?),
            KeepSpec::Not(inner) => {
                KeepPredicate::Not(Box::new(KeepPredicate::compile(inner, functions)?))
            }
        })
    }

    /// `true` when `record` should be mapped.
    pub fn keep(&self, record: &Record) -> bool {
        match self {
            KeepPredicate::Func(f) => f(record),
            KeepPredicate::Exists(path) => path.resolve(record).is_some_and(|v| !v.is_null()),
            KeepPredicate::Equals(path, expected) => path.resolve(record) == Some(expected),
            KeepPredicate::OneOf(path, candidates) => path
                .resolve(record)
                .is_some_and(|value| candidates.contains(value)),
            KeepPredicate::All(preds) => preds.iter().all(|p| p.keep(record)),
            KeepPredicate::Any(preds) => preds.iter().any(|p| p.keep(record)),
            KeepPredicate::Not(pred) => !pred.keep(record),
        }
    }
}

impl fmt::Debug for KeepPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepPredicate::Func(_) => f.write_str("Func(<fn>)"),
            KeepPredicate::Exists(path) => write!(f, "Exists({path})"),
            KeepPredicate::Equals(path, value) => write!(f, "Equals({path}, {value})"),
            KeepPredicate::OneOf(path, values) => write!(f, "OneOf({path}, {values:?})"),
            KeepPredicate::All(preds) => f.debug_tuple("All").field(preds).finish(),
            KeepPredicate::Any(preds) => f.debug_tuple("Any").field(preds).finish(),
            KeepPredicate::Not(pred) => f.debug_tuple("Not").field(pred).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn compile(spec: Value) -> KeepPredicate {
        let spec: KeepSpec = serde_json::from_value(spec).unwrap();
        KeepPredicate::compile(&spec, &FunctionRegistry::new()).unwrap()
    }

    #[test]
    fn exists_requires_non_null() {
        let pred = compile(json!({ "exists": "a.b" }));
        assert!(pred.keep(&record(json!({ "a": { "b": 0 } }))));
        assert!(!pred.keep(&record(json!({ "a": { "b": null } }))));
        assert!(!pred.keep(&record(json!({ "a": 1 }))));
    }

    #[test]
    fn equals_and_one_of() {
        let equals = compile(json!({ "equals": { "path": "tags.leisure", "value": "park" } }));
        let one_of = compile(json!({ "one_of": { "path": "kind", "values": [1, "two"] } }));

        assert!(equals.keep(&record(json!({ "tags": { "leisure": "park" } }))));
        assert!(!equals.keep(&record(json!({ "tags": { "leisure": "pitch" } }))));
        assert!(!equals.keep(&record(json!({}))));

        assert!(one_of.keep(&record(json!({ "kind": 1 }))));
        assert!(one_of.keep(&record(json!({ "kind": "two" }))));
        assert!(!one_of.keep(&record(json!({ "kind": 2 }))));
    }

    #[test]
    fn combinators() {
        let pred = compile(json!({
            "all": [
                { "exists": "name" },
                { "not": { "equals": { "path": "access", "value": "private" } } },
                { "any": [ { "exists": "a" }, { "exists": "b" } ] }
            ]
        }));
        assert!(pred.keep(&record(json!({ "name": "x", "b": 1 }))));
        assert!(!pred.keep(&record(json!({ "name": "x", "access": "private", "a": 1 }))));
        assert!(!pred.keep(&record(json!({ "name": "x" }))));

        assert!(compile(json!({ "all": [] })).keep(&Record::new()));
        assert!(!compile(json!({ "any": [] })).keep(&Record::new()));
    }

    #[test]
    fn named_predicates_come_from_the_registry() {
        let mut functions = FunctionRegistry::new();
        functions.register_predicate("small", |r| r.len() < 2);

        let pred = KeepPredicate::compile(&KeepSpec::Named("small".into()), &functions).unwrap();
        assert!(pred.keep(&record(json!({ "a": 1 }))));
        assert!(!pred.keep(&record(json!({ "a": 1, "b": 2 }))));

        let err = KeepPredicate::compile(&KeepSpec::Named("big".into()), &functions).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPredicate(name) if name == "big"));
    }

    #[test]
    fn invalid_paths_fail_compilation() {
        let err = KeepPredicate::compile(&KeepSpec::Exists("a[".into()), &FunctionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }
}
