//! Property paths: a small, closed grammar for addressing values inside a
//! nested record.
//!
//! A path is parsed once into a list of [`Segment`]s and then interpreted
//! against records. It is pure data and is never evaluated as code.
//!
//! ```text
//! a            top-level key
//! .a           same as `a`
//! a.b[0].c     nested keys and array indices
//! d["Road Name"]  bracketed key for names containing `.`, `[` or `]`
//! ```

use crate::{Record, Value};
use std::fmt;
use std::str::FromStr;

/// One traversal step of a [`PropertyPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key lookup (`.name` or `["name"]`)
    Key(String),
    /// Array index lookup (`[3]`)
    Index(usize),
}

impl Segment {
    /// Apply this segment to `value`. A segment whose kind does not match the
    /// shape of `value` resolves to nothing.
    fn step<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match (self, value) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        }
    }
}

/// Errors raised while parsing a path expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path expression is empty")]
    Empty,

    #[error("empty key at offset {0}")]
    EmptyKey(usize),

    #[error("unexpected `{ch}` at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    #[error("unterminated `[` opened at offset {0}")]
    Unterminated(usize),

    #[error("`{0}` is not a valid array index")]
    InvalidIndex(String),
}

/// A parsed property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parse a path expression such as `a.b[0].c` or `.j`.
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let chars: Vec<char> = expr.chars().collect();
        if chars.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '.' => {
                    let (key, next) = read_key(&chars, i + 1);
                    if key.is_empty() {
                        return Err(PathError::EmptyKey(i + 1));
                    }
                    segments.push(Segment::Key(key));
                    i = next;
                }
                '[' => {
                    let (segment, next) = read_bracket(&chars, i)?;
                    segments.push(segment);
                    i = next;
                }
                ch if i == 0 && ch != ']' => {
                    let (key, next) = read_key(&chars, 0);
                    segments.push(Segment::Key(key));
                    i = next;
                }
                ch => return Err(PathError::Unexpected { ch, offset: i }),
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve this path against a record. `None` means the path does not
    /// exist in the record; it is not an error.
    pub fn resolve<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        let (head, tail) = self.segments.split_first()?;
        let first = match head {
            Segment::Key(key) => record.get(key)?,
            Segment::Index(_) => return None,
        };
        tail.iter().try_fold(first, |value, segment| segment.step(value))
    }

    /// Resolve this path against an arbitrary value.
    pub fn resolve_value<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |value, segment| segment.step(value))
    }
}

/// Read a bare key up to the next `.`, `[` or `]`.
fn read_key(chars: &[char], start: usize) -> (String, usize) {
    let end = chars[start..]
        .iter()
        .position(|c| matches!(c, '.' | '[' | ']'))
        .map_or(chars.len(), |offset| start + offset);
    (chars[start..end].iter().collect(), end)
}

/// Read a `[...]` segment starting at the opening bracket.
fn read_bracket(chars: &[char], open: usize) -> Result<(Segment, usize), PathError> {
    let start = open + 1;
    match chars.get(start) {
        Some(&quote) if quote == '"' || quote == '\'' => {
            let close_quote = chars[start + 1..]
                .iter()
                .position(|&c| c == quote)
                .map(|offset| start + 1 + offset)
                .ok_or(PathError::Unterminated(open))?;
            if chars.get(close_quote + 1) != Some(&']') {
                return Err(PathError::Unterminated(open));
            }
            let key: String = chars[start + 1..close_quote].iter().collect();
            if key.is_empty() {
                return Err(PathError::EmptyKey(start));
            }
            Ok((Segment::Key(key), close_quote + 2))
        }
        Some(_) => {
            let close = chars[start..]
                .iter()
                .position(|&c| c == ']')
                .map(|offset| start + offset)
                .ok_or(PathError::Unterminated(open))?;
            let text: String = chars[start..close].iter().collect();
            if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
                return Err(PathError::InvalidIndex(text));
            }
            let index = text
                .parse::<usize>()
                .map_err(|_| PathError::InvalidIndex(text.clone()))?;
            Ok((Segment::Index(index), close + 1))
        }
        None => Err(PathError::Unterminated(open)),
    }
}

impl FromStr for PropertyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                // keys are written raw; the parser reads no escapes
                Segment::Key(key) if key.contains(['.', '[', ']']) && key.contains('"') => {
                    write!(f, "['{key}']")?
                }
                Segment::Key(key) if key.contains(['.', '[', ']']) => write!(f, "[\"{key}\"]")?,
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        let value = json!({
            "a": { "b": ["c"] },
            "d": ["e", "f", { "h": "i" }],
            "j": "k",
            "n": null,
            "Road Name": "Main St"
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn resolve(record: &Record, expr: &str) -> Option<Value> {
        PropertyPath::parse(expr)
            .unwrap()
            .resolve(record)
            .cloned()
    }

    #[test]
    fn resolves_nested_keys_and_indices() {
        let record = sample();
        assert_eq!(resolve(&record, "a"), Some(json!({ "b": ["c"] })));
        assert_eq!(resolve(&record, "a.b"), Some(json!(["c"])));
        assert_eq!(resolve(&record, "d[0]"), Some(json!("e")));
        assert_eq!(resolve(&record, "d[2].h"), Some(json!("i")));
        assert_eq!(resolve(&record, "a.b[0]"), Some(json!("c")));
    }

    #[test]
    fn leading_dot_is_optional() {
        let record = sample();
        assert_eq!(resolve(&record, "j"), Some(json!("k")));
        assert_eq!(resolve(&record, ".j"), Some(json!("k")));
        assert_eq!(PropertyPath::parse("j"), PropertyPath::parse(".j"));
    }

    #[test]
    fn misses_resolve_to_none() {
        let record = sample();
        assert_eq!(resolve(&record, "missing"), None);
        assert_eq!(resolve(&record, "a.missing.deeper"), None);
        assert_eq!(resolve(&record, "d[3]"), None);
        assert_eq!(resolve(&record, "d[99].h"), None);
        // shape mismatches
        assert_eq!(resolve(&record, "j[0]"), None);
        assert_eq!(resolve(&record, "d.h"), None);
        assert_eq!(resolve(&record, "a[0]"), None);
        assert_eq!(resolve(&record, "[0]"), None);
        assert_eq!(resolve(&record, "n.x"), None);
    }

    #[test]
    fn null_values_are_found() {
        let record = sample();
        assert_eq!(resolve(&record, "n"), Some(Value::Null));
    }

    #[test]
    fn bracketed_keys() {
        let record = sample();
        assert_eq!(resolve(&record, "[\"Road Name\"]"), Some(json!("Main St")));
        assert_eq!(resolve(&record, "['Road Name']"), Some(json!("Main St")));
        assert_eq!(resolve(&record, "d[2][\"h\"]"), Some(json!("i")));
    }

    #[test]
    fn resolve_value_walks_from_any_value() {
        let value = json!([{ "x": 1 }]);
        let path = PropertyPath::parse("[0].x").unwrap();
        assert_eq!(path.resolve_value(&value), Some(&json!(1)));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(PropertyPath::parse(""), Err(PathError::Empty));
        assert_eq!(PropertyPath::parse("a..b"), Err(PathError::EmptyKey(2)));
        assert_eq!(PropertyPath::parse("a."), Err(PathError::EmptyKey(2)));
        assert_eq!(PropertyPath::parse("a["), Err(PathError::Unterminated(1)));
        assert_eq!(PropertyPath::parse("a[1"), Err(PathError::Unterminated(1)));
        assert_eq!(
            PropertyPath::parse("a[x]"),
            Err(PathError::InvalidIndex("x".into()))
        );
        assert_eq!(
            PropertyPath::parse("a[-1]"),
            Err(PathError::InvalidIndex("-1".into()))
        );
        assert_eq!(
            PropertyPath::parse("a]"),
            Err(PathError::Unexpected { ch: ']', offset: 1 })
        );
        assert!(PropertyPath::parse("a[\"x]").is_err());
    }

    #[test]
    fn displays_canonical_form() {
        let path = PropertyPath::parse(".a.b[0]['x.y']").unwrap();
        assert_eq!(path.to_string(), "a.b[0][\"x.y\"]");
        let reparsed: PropertyPath = path.to_string().parse().unwrap();
        assert_eq!(reparsed, path);
    }

    #[test]
    fn bracketed_keys_with_quotes_display_reparseably() {
        let path = PropertyPath::parse("['a.\"b']").unwrap();
        assert_eq!(path.to_string(), "['a.\"b']");
        assert_eq!(path.to_string().parse::<PropertyPath>().unwrap(), path);

        let path = PropertyPath::parse("x[\"it's.here\"]").unwrap();
        assert_eq!(path.to_string(), "x[\"it's.here\"]");
        assert_eq!(path.to_string().parse::<PropertyPath>().unwrap(), path);
    }
}
