//! Tolerant path access over a registration payload.
//!
//! Payloads are JSON documents produced by data-collection clients. The same field can arrive
//! as a scalar, a single object or an array of objects depending on how many values the user
//! entered, so every read goes through [`RawValue`], which tags what was found at a path and
//! keeps "the path does not exist" ([`RawValue::Absent`]) apart from "the path exists and holds
//! null" ([`RawValue::Null`]).
//!
//! ## Path syntax
//!
//! ```text
//! $['patient']['patient.given_name']     bracketed keys (may contain dots)
//! $.patient.given_name                   dotted keys
//! patient.addresses[0]                   leading `$` optional, numeric indexes in brackets
//! ```

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Errors raised while reading a payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPathExpression { path: String, reason: String },

    #[error("malformed date at {path}: '{value}' does not match {format}")]
    MalformedDate {
        path: String,
        value: String,
        format: String,
    },

    #[error("unexpected value at {path}: expected {expected}, found {found}")]
    UnexpectedValueType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// One step of a [`PayloadPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadPath {
    segments: Vec<Segment>,
}

impl PayloadPath {
    /// Parses a path expression.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::InvalidPathExpression`] for empty input, empty keys, unterminated
    /// brackets or quotes, non-numeric unquoted indexes and stray characters.
    pub fn parse(expr: &str) -> Result<Self, ReadError> {
        parse_segments(expr.trim())
            .map(|segments| Self { segments })
            .map_err(|reason| ReadError::InvalidPathExpression {
                path: expr.to_string(),
                reason,
            })
    }

    /// Builds a path from object keys without parsing.
    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            segments: keys.into_iter().map(|k| Segment::Key(k.into())).collect(),
        }
    }

    /// Returns a path one object key deeper.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        Self { segments }
    }

    /// Returns a path one array element deeper.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    /// Returns the numbered sibling of this path: `…['patient.personaddress^3']`.
    ///
    /// The suffix is appended to the last key. A path ending in an index (or the root path)
    /// gains a new key segment `^n` instead.
    pub fn numbered(&self, n: usize) -> Self {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(Segment::Key(key)) => key.push_str(&format!("^{n}")),
            _ => segments.push(Segment::Key(format!("^{n}"))),
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for PayloadPath {
    /// Renders the canonical bracketed form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    let escaped = key.replace('\\', "\\\\").replace('\'', "\\'");
                    write!(f, "['{escaped}']")?;
                }
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PayloadPath {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_segments(expr: &str) -> Result<Vec<Segment>, String> {
    if expr.is_empty() {
        return Err("path is empty".into());
    }

    let chars: Vec<char> = expr.chars().collect();
    let mut pos = 0;
    let mut segments = Vec::new();

    if chars[0] == '$' {
        pos = 1;
    } else if chars[0] != '[' {
        let key = read_bare_key(&chars, &mut pos);
        if key.is_empty() {
            return Err(format!("expected a key at position {pos}"));
        }
        segments.push(Segment::Key(key));
    }

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let key = read_bare_key(&chars, &mut pos);
                if key.is_empty() {
                    return Err(format!("empty key at position {pos}"));
                }
                segments.push(Segment::Key(key));
            }
            '[' => {
                pos += 1;
                segments.push(read_bracket(&chars, &mut pos)?);
            }
            c => return Err(format!("unexpected character '{c}' at position {pos}")),
        }
    }

    Ok(segments)
}

fn read_bare_key(chars: &[char], pos: &mut usize) -> String {
    let mut key = String::new();
    while let Some(&c) = chars.get(*pos) {
        if matches!(c, '.' | '[' | ']' | '\'' | '"') {
            break;
        }
        key.push(c);
        *pos += 1;
    }
    key
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

fn read_bracket(chars: &[char], pos: &mut usize) -> Result<Segment, String> {
    skip_spaces(chars, pos);
    let Some(&first) = chars.get(*pos) else {
        return Err("unterminated '['".into());
    };

    if first == '\'' || first == '"' {
        *pos += 1;
        let mut key = String::new();
        loop {
            match chars.get(*pos) {
                None => return Err("unterminated quoted key".into()),
                Some('\\') => {
                    let Some(&escaped) = chars.get(*pos + 1) else {
                        return Err("unterminated escape in quoted key".into());
                    };
                    key.push(escaped);
                    *pos += 2;
                }
                Some(&c) if c == first => {
                    *pos += 1;
                    break;
                }
                Some(&c) => {
                    key.push(c);
                    *pos += 1;
                }
            }
        }
        skip_spaces(chars, pos);
        if chars.get(*pos) != Some(&']') {
            return Err(format!("expected ']' at position {}", *pos));
        }
        *pos += 1;
        return Ok(Segment::Key(key));
    }

    let start = *pos;
    while chars.get(*pos).is_some_and(|&c| c != ']') {
        *pos += 1;
    }
    if *pos >= chars.len() {
        return Err("unterminated '['".into());
    }
    let raw: String = chars[start..*pos].iter().collect();
    *pos += 1;
    raw.trim()
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index '{}'", raw.trim()))
}

/// What a path resolved to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawValue<'a> {
    /// The path does not exist in the document.
    Absent,
    /// The path exists and holds `null`.
    Null,
    /// A string, number or boolean.
    Scalar(&'a Value),
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
}

impl<'a> RawValue<'a> {
    /// Tags a JSON value (`None` means absent).
    pub fn from_value(value: Option<&'a Value>) -> Self {
        match value {
            None => RawValue::Absent,
            Some(Value::Null) => RawValue::Null,
            Some(Value::Object(map)) => RawValue::Object(map),
            Some(Value::Array(items)) => RawValue::Array(items),
            Some(scalar) => RawValue::Scalar(scalar),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawValue::Absent)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Absent => "nothing",
            RawValue::Null => "null",
            RawValue::Scalar(Value::String(_)) => "string",
            RawValue::Scalar(Value::Number(_)) => "number",
            RawValue::Scalar(Value::Bool(_)) => "boolean",
            RawValue::Scalar(_) => "scalar",
            RawValue::Object(_) => "object",
            RawValue::Array(_) => "array",
        }
    }

    /// Number of values this holds when read as a collection.
    pub fn count(&self) -> usize {
        match self {
            RawValue::Absent | RawValue::Null => 0,
            RawValue::Scalar(_) | RawValue::Object(_) => 1,
            RawValue::Array(items) => items.len(),
        }
    }

    /// Reads the value as text. Numbers and booleans are rendered; absent and null are `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::UnexpectedValueType`] for objects and arrays.
    pub fn text(&self, path: &PayloadPath) -> Result<Option<String>, ReadError> {
        match self {
            RawValue::Absent | RawValue::Null => Ok(None),
            RawValue::Scalar(Value::String(s)) => Ok(Some(s.clone())),
            RawValue::Scalar(other) => Ok(Some(other.to_string())),
            RawValue::Object(_) | RawValue::Array(_) => Err(self.unexpected(path, "text")),
        }
    }

    pub(crate) fn unexpected(&self, path: &PayloadPath, expected: &'static str) -> ReadError {
        ReadError::UnexpectedValueType {
            path: path.to_string(),
            expected,
            found: self.kind(),
        }
    }
}

/// Read-only accessor over one payload document.
#[derive(Clone, Copy, Debug)]
pub struct PathReader<'a> {
    document: &'a Value,
}

impl<'a> PathReader<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    /// Resolves `path`. Missing keys, out-of-range indexes and descending into a scalar or null
    /// all yield [`RawValue::Absent`].
    pub fn read_raw(&self, path: &PayloadPath) -> RawValue<'a> {
        let mut current = self.document;
        for segment in path.segments() {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return RawValue::Absent,
            }
        }
        RawValue::from_value(Some(current))
    }

    /// Reads text at `path`; `None` when absent or null.
    pub fn read_string(&self, path: &PayloadPath) -> Result<Option<String>, ReadError> {
        self.read_raw(path).text(path)
    }

    /// Reads a date at `path` using a `chrono` format string; `None` when absent or null.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::MalformedDate`] when the text does not match `format`.
    pub fn read_date(
        &self,
        path: &PayloadPath,
        format: &str,
    ) -> Result<Option<NaiveDate>, ReadError> {
        let Some(text) = self.read_string(path)? else {
            return Ok(None);
        };
        NaiveDate::parse_from_str(text.trim(), format)
            .map(Some)
            .map_err(|_| ReadError::MalformedDate {
                path: path.to_string(),
                value: text,
                format: format.to_string(),
            })
    }

    /// Reads a boolean at `path`. Accepts JSON booleans and the strings `true`/`false`.
    pub fn read_bool(&self, path: &PayloadPath) -> Result<Option<bool>, ReadError> {
        let raw = self.read_raw(path);
        match raw {
            RawValue::Absent | RawValue::Null => Ok(None),
            RawValue::Scalar(Value::Bool(b)) => Ok(Some(*b)),
            RawValue::Scalar(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => {
                Ok(Some(true))
            }
            RawValue::Scalar(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => {
                Ok(Some(false))
            }
            _ => Err(raw.unexpected(path, "boolean")),
        }
    }

    /// Probes `base^1`, `base^2`, … lazily, stopping at the first index that does not exist
    /// or after `limit` nodes.
    pub fn numbered_nodes<'p>(
        &'p self,
        base: &'p PayloadPath,
        limit: usize,
    ) -> impl Iterator<Item = (PayloadPath, RawValue<'a>)> + 'p {
        (1..=limit)
            .map(move |n| {
                let path = base.numbered(n);
                let value = self.read_raw(&path);
                (path, value)
            })
            .take_while(|(_, value)| !value.is_absent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(expr: &str) -> PayloadPath {
        PayloadPath::parse(expr).expect("valid path")
    }

    #[test]
    fn parses_bracketed_keys_containing_dots() {
        let p = path("$['patient']['patient.given_name']");
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("patient".into()),
                Segment::Key("patient.given_name".into())
            ]
        );
        assert_eq!(p.to_string(), "$['patient']['patient.given_name']");
    }

    #[test]
    fn parses_dotted_and_mixed_forms() {
        assert_eq!(path("patient.given_name"), path("$['patient']['given_name']"));
        assert_eq!(path("$.patient.given_name"), path("patient.given_name"));
        assert_eq!(
            path("$.patient[\"patient.sex\"]"),
            path("$['patient']['patient.sex']")
        );
        assert_eq!(
            path("a.b[2]").segments(),
            &[
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2)
            ]
        );
        assert!(path("$").segments().is_empty());
    }

    #[test]
    fn parses_escaped_quotes() {
        let p = path(r"$['it\'s']");
        assert_eq!(p.segments(), &[Segment::Key("it's".into())]);
        assert_eq!(PayloadPath::parse(&p.to_string()).unwrap(), p);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in [
            "",
            "   ",
            "$['patient'",
            "$['patient",
            "$[abc]",
            "patient..sex",
            "$patient",
            "patient.",
            "$['a']x",
        ] {
            let err = PayloadPath::parse(expr).expect_err(expr);
            assert!(
                matches!(err, ReadError::InvalidPathExpression { .. }),
                "{expr}: {err:?}"
            );
        }
    }

    #[test]
    fn distinguishes_absent_from_null() {
        let doc = json!({"patient": {"middle_name": null}});
        let reader = PathReader::new(&doc);

        assert_eq!(reader.read_raw(&path("patient.middle_name")), RawValue::Null);
        assert_eq!(reader.read_raw(&path("patient.nickname")), RawValue::Absent);
        assert_eq!(reader.read_raw(&path("encounter.location_id")), RawValue::Absent);
        assert_eq!(
            reader.read_raw(&path("patient.middle_name.first")),
            RawValue::Absent
        );
    }

    #[test]
    fn tags_objects_arrays_and_scalars() {
        let doc = json!({"a": {"b": [1, {"c": "x"}]}});
        let reader = PathReader::new(&doc);

        assert!(matches!(reader.read_raw(&path("a")), RawValue::Object(_)));
        assert!(matches!(reader.read_raw(&path("a.b")), RawValue::Array(items) if items.len() == 2));
        assert_eq!(reader.read_raw(&path("a.b[0]")), RawValue::Scalar(&json!(1)));
        assert_eq!(
            reader.read_string(&path("a.b[1].c")).unwrap(),
            Some("x".to_string())
        );
        assert_eq!(reader.read_raw(&path("a.b[5]")), RawValue::Absent);
    }

    #[test]
    fn read_string_renders_numbers_and_rejects_objects() {
        let doc = json!({"encounter": {"location_id": 7, "provider": {"id": 1}}});
        let reader = PathReader::new(&doc);

        assert_eq!(
            reader.read_string(&path("encounter.location_id")).unwrap(),
            Some("7".to_string())
        );
        let err = reader
            .read_string(&path("encounter.provider"))
            .expect_err("object is not text");
        assert!(matches!(
            err,
            ReadError::UnexpectedValueType { found: "object", .. }
        ));
    }

    #[test]
    fn read_date_parses_and_reports_malformed_values() {
        let doc = json!({"p": {"ok": "1990-01-01", "bad": "01/01/1990", "none": null}});
        let reader = PathReader::new(&doc);

        assert_eq!(
            reader.read_date(&path("p.ok"), "%Y-%m-%d").unwrap(),
            NaiveDate::from_ymd_opt(1990, 1, 1)
        );
        assert_eq!(reader.read_date(&path("p.none"), "%Y-%m-%d").unwrap(), None);
        assert_eq!(reader.read_date(&path("p.missing"), "%Y-%m-%d").unwrap(), None);
        let err = reader
            .read_date(&path("p.bad"), "%Y-%m-%d")
            .expect_err("malformed");
        assert!(matches!(err, ReadError::MalformedDate { value, .. } if value == "01/01/1990"));
    }

    #[test]
    fn read_bool_accepts_booleans_and_boolean_strings() {
        let doc = json!({"p": {"a": true, "b": "False", "c": "maybe", "d": 1}});
        let reader = PathReader::new(&doc);

        assert_eq!(reader.read_bool(&path("p.a")).unwrap(), Some(true));
        assert_eq!(reader.read_bool(&path("p.b")).unwrap(), Some(false));
        assert_eq!(reader.read_bool(&path("p.missing")).unwrap(), None);
        assert!(reader.read_bool(&path("p.c")).is_err());
        assert!(reader.read_bool(&path("p.d")).is_err());
    }

    #[test]
    fn numbered_path_suffixes_last_key() {
        let base = path("$['patient']['patient.personaddress']");
        assert_eq!(
            base.numbered(2).to_string(),
            "$['patient']['patient.personaddress^2']"
        );
    }

    #[test]
    fn numbered_nodes_stop_at_first_gap() {
        let doc = json!({"patient": {
            "address^1": {"cityVillage": "A"},
            "address^2": {"cityVillage": "B"},
            "address^4": {"cityVillage": "D"}
        }});
        let reader = PathReader::new(&doc);
        let base = path("patient.address");

        let nodes: Vec<_> = reader.numbered_nodes(&base, 64).collect();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].0, path("$['patient']['address^2']"));

        assert_eq!(reader.numbered_nodes(&base, 1).count(), 1);
    }
}
