use crate::keep::KeepPredicate;
use crate::rule::Rule;
use crate::FunctionRegistry;
use smap_core::{ConfigError, MapperSpec, Record};
use tracing::trace;

/// Applies a keep predicate and a set of field rules to source records.
///
/// A mapped record contains exactly the declared fields, in declaration
/// order, and nothing from the source record that was not asked for.
#[derive(Debug, Clone, Default)]
pub struct RecordMapper {
    keep: Option<KeepPredicate>,
    fields: Vec<(String, Rule)>,
}

impl RecordMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an output field. Declaring the same name again replaces its
    /// rule and keeps its original position.
    pub fn field(mut self, name: impl Into<String>, rule: Rule) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = rule,
            None => self.fields.push((name, rule)),
        }
        self
    }

    pub fn keep(mut self, predicate: KeepPredicate) -> Self {
        self.keep = Some(predicate);
        self
    }

    /// Build a mapper from its rules-file form.
    pub fn compile(spec: &MapperSpec, functions: &FunctionRegistry) -> Result<Self, ConfigError> {
        let keep = spec
            .keep
            .as_ref()
            .map(|keep| KeepPredicate::compile(keep, functions))
            .transpose()?;

        let fields = spec
            .rules()?
            .into_iter()
            .map(|(field, rule)| match Rule::compile(&rule, functions) {
                Ok(rule) => Ok((field, rule)),
                Err(ConfigError::InvalidPath { expr, source }) => Err(ConfigError::InvalidRule {
                    field,
                    reason: format!("invalid path expression `{expr}`: {source}"),
                }),
                Err(e) => Err(e),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { keep, fields })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Map one source record, or return `None` when the keep predicate
    /// rejects it. Rejected records are never passed to any field rule.
    pub fn map(&self, record: &Record) -> Option<Record> {
        if let Some(keep) = &self.keep {
            if !keep.keep(record) {
                return None;
            }
        }

        Some(
            self.fields
                .iter()
                .map(|(name, rule)| (name.clone(), rule.evaluate(record)))
                .collect(),
        )
    }

    /// Wrap a record stream so that it yields mapped records.
    pub fn map_records<I, E>(self, records: I) -> MappedRecords<I>
    where
        I: Iterator<Item = Result<Record, E>>,
    {
        MappedRecords {
            inner: records,
            mapper: self,
            stats: MapStats::default(),
        }
    }
}

/// Counters kept while mapping one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub read: u64,
    pub kept: u64,
    pub discarded: u64,
}

/// Lazy mapped view over a record stream. Errors from the underlying stream
/// are passed through untouched and in place.
pub struct MappedRecords<I> {
    inner: I,
    mapper: RecordMapper,
    stats: MapStats,
}

impl<I> MappedRecords<I> {
    pub fn stats(&self) -> MapStats {
        self.stats
    }
}

impl<I, E> Iterator for MappedRecords<I>
where
    I: Iterator<Item = Result<Record, E>>,
{
    type Item = Result<Record, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            self.stats.read += 1;
            match self.mapper.map(&record) {
                Some(mapped) => {
                    self.stats.kept += 1;
                    return Some(Ok(mapped));
                }
                None => {
                    self.stats.discarded += 1;
                    trace!(record = self.stats.read, "record discarded by keep predicate");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap_or_default())
            .collect()
    }

    fn run(mapper: RecordMapper, inputs: Vec<Value>) -> Vec<Value> {
        let stream = records(inputs).into_iter().map(Ok::<_, Infallible>);
        mapper
            .map_records(stream)
            .map(|r| Value::Object(r.unwrap()))
            .collect()
    }

    #[test]
    fn maps_fields_in_order() {
        let mapper = RecordMapper::new()
            .field("col1", Rule::path("a").unwrap())
            .field("col2", Rule::path("b").unwrap());
        let out = run(
            mapper,
            vec![
                json!({ "a": 1, "b": 2 }),
                json!({ "a": 3, "b": 4 }),
                json!({ "a": 5, "b": 6 }),
            ],
        );
        assert_eq!(
            out,
            vec![
                json!({ "col1": 1, "col2": 2 }),
                json!({ "col1": 3, "col2": 4 }),
                json!({ "col1": 5, "col2": 6 }),
            ]
        );
    }

    #[test]
    fn coalesced_field() {
        let mapper = RecordMapper::new().field("coalesced", Rule::coalesce(["a", ".b"]).unwrap());
        let out = run(
            mapper,
            vec![
                json!({ "a": 1, "b": null }),
                json!({ "a": null, "b": 4 }),
                json!({ "a": null, "b": null }),
            ],
        );
        assert_eq!(
            out,
            vec![
                json!({ "coalesced": 1 }),
                json!({ "coalesced": 4 }),
                json!({ "coalesced": null }),
            ]
        );
    }

    #[test]
    fn keep_filters_before_mapping_and_preserves_order() {
        let mapper = RecordMapper::new()
            .keep(KeepPredicate::custom(|r| {
                let a = r.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = r.get("b").and_then(Value::as_i64).unwrap_or(0);
                a + b == 3
            }))
            .field("a", Rule::path("a").unwrap())
            .field("b", Rule::path("b").unwrap());
        let out = run(
            mapper,
            vec![
                json!({ "a": 1, "b": 2 }),
                json!({ "a": 2, "b": 1 }),
                json!({ "a": 5, "b": 6 }),
            ],
        );
        assert_eq!(out, vec![json!({ "a": 1, "b": 2 }), json!({ "a": 2, "b": 1 })]);
    }

    #[test]
    fn discarded_records_never_reach_field_rules() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mapper = RecordMapper::new()
            .keep(KeepPredicate::custom(|r| r.contains_key("keep")))
            .field(
                "n",
                Rule::computed(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Value::Null
                }),
            );

        assert!(mapper.map(&records(vec![json!({ "x": 1 })])[0]).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(mapper.map(&records(vec![json!({ "keep": 1 })])[0]).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_has_exactly_the_declared_fields() {
        let mapper = RecordMapper::new()
            .field("missing", Rule::path("nope").unwrap())
            .field("fixed", Rule::constant("x"));
        let out = run(mapper, vec![json!({ "a": 1, "b": 2 })]);
        assert_eq!(out, vec![json!({ "missing": null, "fixed": "x" })]);
    }

    #[test]
    fn mapping_is_idempotent() {
        let mapper = RecordMapper::new()
            .field("x", Rule::path("a.b").unwrap())
            .field("y", Rule::constant(json!({ "nested": [1] })));
        let input = &records(vec![json!({ "a": { "b": [1, 2] } })])[0];
        let first = mapper.map(input).unwrap();
        let second = mapper.map(input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn redeclared_field_keeps_position() {
        let mapper = RecordMapper::new()
            .field("a", Rule::constant(1))
            .field("b", Rule::constant(2))
            .field("a", Rule::constant(3));
        assert_eq!(mapper.field_names().collect::<Vec<_>>(), ["a", "b"]);
        let out = mapper.map(&Record::new()).unwrap();
        assert_eq!(Value::Object(out), json!({ "a": 3, "b": 2 }));
    }

    #[test]
    fn compile_from_spec() {
        let spec: MapperSpec = serde_json::from_value(json!({
            "keep": { "exists": "name" },
            "fields": {
                "title": "name",
                "kind": { "constant": "park" },
                "label": { "coalesce": ["label", "name"] },
                "nothing": null
            }
        }))
        .unwrap();
        let mapper = RecordMapper::compile(&spec, &FunctionRegistry::new()).unwrap();

        assert!(mapper.map(&Record::new()).is_none());
        let out = mapper.map(&records(vec![json!({ "name": "Elm" })])[0]).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({ "title": "Elm", "kind": "park", "label": "Elm", "nothing": null })
        );
    }

    #[test]
    fn compile_reports_field_of_bad_path() {
        let spec: MapperSpec = serde_json::from_value(json!({
            "fields": { "good": "a", "bad": "a[x]" }
        }))
        .unwrap();
        let err = RecordMapper::compile(&spec, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { field, .. } if field == "bad"));
    }

    #[test]
    fn errors_pass_through_in_place() {
        let mapper = RecordMapper::new().field("a", Rule::path("a").unwrap());
        let stream = vec![
            Ok(records(vec![json!({ "a": 1 })]).remove(0)),
            Err("boom"),
            Ok(records(vec![json!({ "a": 2 })]).remove(0)),
        ];
        let mut mapped = mapper.map_records(stream.into_iter());
        assert!(mapped.next().unwrap().is_ok());
        assert_eq!(mapped.next().unwrap().unwrap_err(), "boom");
        assert!(mapped.next().unwrap().is_ok());
        assert!(mapped.next().is_none());
        assert_eq!(mapped.stats(), MapStats { read: 2, kept: 2, discarded: 0 });
    }
}
