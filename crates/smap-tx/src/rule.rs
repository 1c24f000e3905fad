use crate::FunctionRegistry;
use smap_core::{ConfigError, PropertyPath, Record, RuleSpec, Value};
use std::fmt;
use std::sync::Arc;

/// Host-supplied function deriving a field value from the whole source record
pub type ComputedFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// A compiled field rule.
///
/// Paths are parsed when the rule is built, so evaluation never fails: a path
/// that does not exist in a record simply produces `null`.
#[derive(Clone)]
pub enum Rule {
    /// Fixed value, independent of the record
    Constant(Value),
    /// Value found at a property path
    Path(PropertyPath),
    /// First non-null value among several paths, left to right
    Coalesce(Vec<PropertyPath>),
    /// Value returned by a pure host function
    Computed(ComputedFn),
}

pub(crate) fn compile_path(expr: &str) -> Result<PropertyPath, ConfigError> {
    PropertyPath::parse(expr).map_err(|source| ConfigError::InvalidPath {
        expr: expr.to_string(),
        source,
    })
}

impl Rule {
    pub fn constant(value: impl Into<Value>) -> Self {
        Rule::Constant(value.into())
    }

    pub fn path(expr: &str) -> Result<Self, ConfigError> {
        Ok(Rule::Path(compile_path(expr)?))
    }

    pub fn coalesce<I, S>(exprs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = exprs
            .into_iter()
            .map(|expr| compile_path(expr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Rule::Coalesce(paths))
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Rule::Computed(Arc::new(f))
    }

    /// Build a rule from its rules-file form, looking computed functions up
    /// in `functions`.
    pub fn compile(spec: &RuleSpec, functions: &FunctionRegistry) -> Result<Self, ConfigError> {
        match spec {
            RuleSpec::Constant(value) => Ok(Rule::Constant(value.clone())),
            RuleSpec::Path(expr) => Rule::path(expr),
            RuleSpec::Coalesce(exprs) => Rule::coalesce(exprs),
            RuleSpec::Computed(name) => functions
                .computed(name)
                .map(Rule::Computed)
                .ok_or_else(|| ConfigError::UnknownFunction(name.clone())),
        }
    }

    /// Derive this rule's value from `record`.
    pub fn evaluate(&self, record: &Record) -> Value {
        match self {
            Rule::Constant(value) => value.clone(),
            Rule::Path(path) => path.resolve(record).cloned().unwrap_or(Value::Null),
            Rule::Coalesce(paths) => paths
                .iter()
                .filter_map(|path| path.resolve(record))
                .find(|value| !value.is_null())
                .cloned()
                .unwrap_or(Value::Null),
            Rule::Computed(f) => f(record),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Rule::Path(path) => write!(f, "Path({path})"),
            Rule::Coalesce(paths) => f
                .debug_tuple("Coalesce")
                .field(&paths.iter().map(ToString::to_string).collect::<Vec<_>>())
                .finish(),
            Rule::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}
