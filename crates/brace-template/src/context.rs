/*
 * context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template value and data context types.
//!
//! [`Value`] models the dynamically typed values the host script operates on,
//! with PHP-flavoured truthiness, comparison and string conversion.
//! [`DataContext`] is the set of name→value bindings a render starts from.

use crate::error::{TemplateError, TemplateResult};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt::Write;

/// A value that can be bound into a data context or produced by the script.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A null/missing value.
    #[default]
    Null,

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating point value.
    Float(f64),

    /// A string value.
    String(String),

    /// A list of values, indexed from zero.
    List(Vec<Value>),

    /// An insertion-ordered map of string keys to values.
    Map(IndexMap<String, Value>),
}

/// A numeric view of a value, used for arithmetic and comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl Value {
    /// Check if this value is "truthy" for conditional evaluation.
    ///
    /// `null`, `false`, `0`, `0.0`, `""`, `"0"` and empty collections are
    /// falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty() && s != "0",
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Name of this value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) | Value::Map(_) => "array",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    /// Render this value as a string for output.
    ///
    /// - Null and `false`: ""
    /// - `true`: "1"
    /// - Float: integral values lose their fraction ("2", not "2.0")
    /// - List and Map: "Array"
    pub fn render(&self) -> String {
        match self {
            Value::Null | Value::Bool(false) => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => "Array".to_string(),
        }
    }

    /// Numeric view of this value, if it has one.
    ///
    /// Strings qualify only when the whole (trimmed) string is numeric.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Null => Some(Number::Int(0)),
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::String(s) => parse_numeric(s),
            Value::List(_) | Value::Map(_) => None,
        }
    }

    /// Numeric view for arithmetic, failing on non-numeric operands.
    pub fn to_number(&self, op: &str) -> TemplateResult<Number> {
        self.as_number().ok_or_else(|| {
            TemplateError::type_mismatch(format!(
                "Unsupported operand type {} for {}",
                self.type_name(),
                op
            ))
        })
    }

    /// Loose (`==`) equality.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(_), _) | (_, Value::Bool(_)) => self.is_truthy() == other.is_truthy(),
            (Value::Null, Value::Null) => true,
            (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
            (Value::Null, v) | (v, Value::Null) => !v.is_truthy(),
            (Value::String(a), Value::String(b)) => match (parse_numeric(a), parse_numeric(b)) {
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => a == b,
            },
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.loose_eq(other)))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            },
        }
    }

    /// Strict (`===`) equality: same type and same value.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.strict_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Loose ordering used by `<`, `<=`, `>` and `>=`.
    ///
    /// Numeric when both sides are numeric, lexical for two non-numeric
    /// strings. Collections are ordered by length.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => match (parse_numeric(a), parse_numeric(b)) {
                (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
                _ => Some(a.cmp(b)),
            },
            (Value::List(a), Value::List(b)) => Some(a.len().cmp(&b.len())),
            (Value::Map(a), Value::Map(b)) => Some(a.len().cmp(&b.len())),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                Some(self.is_truthy().cmp(&other.is_truthy()))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => Some(x.cmp(&y)),
                (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
                _ => None,
            },
        }
    }

    /// Index this value by a key (`$v['key']`, `$v[0]`, `$v->key`).
    ///
    /// Missing keys are errors, never an empty value.
    pub fn index(&self, key: &Value) -> TemplateResult<&Value> {
        match self {
            Value::Map(m) => {
                let key = key.render();
                m.get(&key)
                    .ok_or(TemplateError::UndefinedKey { key: quote_key(&key) })
            }
            Value::List(items) => list_index(key)
                .and_then(|i| items.get(i))
                .ok_or_else(|| TemplateError::UndefinedKey {
                    key: quote_key(&key.render()),
                }),
            other => Err(TemplateError::type_mismatch(format!(
                "Cannot use a value of type {} as an array",
                other.type_name()
            ))),
        }
    }

    /// Quiet lookup used by `isset`, `empty` and `??`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(&key.render()),
            Value::List(items) => list_index(key).and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Get a nested field by path.
    ///
    /// For example, `get_path(&["employee", "salary"])` on a Map containing
    /// `{"employee": {"salary": 50000}}` returns the salary value.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self
                .get(&Value::String((*first).to_string()))
                .and_then(|v| v.get_path(rest)),
        }
    }

    /// Iterate `(key, value)` pairs of a collection in order.
    pub fn entries(&self) -> Option<Vec<(Value, &Value)>> {
        match self {
            Value::List(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Int(i as i64), v))
                    .collect(),
            ),
            Value::Map(m) => Some(
                m.iter()
                    .map(|(k, v)| (map_key_value(k), v))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Number of elements in a collection.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// Human-readable structured print (the `print` tag).
    pub fn print_r(&self) -> String {
        let mut out = String::new();
        print_r_into(self, 0, &mut out);
        out
    }

    /// Typed structured dump (the `dump` tag).
    pub fn var_dump(&self) -> String {
        let mut out = String::new();
        var_dump_into(self, 0, &mut out);
        out
    }

    /// Convert to JSON, for `json_encode`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Map keys that look like integers come back out of iteration as integers.
pub(crate) fn map_key_value(key: &str) -> Value {
    match key.parse::<i64>() {
        Ok(i) if i.to_string() == key => Value::Int(i),
        _ => Value::String(key.to_string()),
    }
}

pub(crate) fn list_index(key: &Value) -> Option<usize> {
    match key.as_number()? {
        Number::Int(i) => usize::try_from(i).ok(),
        Number::Float(f) if f >= 0.0 => Some(f as usize),
        Number::Float(_) => None,
    }
}

fn quote_key(key: &str) -> String {
    match key.parse::<i64>() {
        Ok(_) => key.to_string(),
        Err(_) => format!("\"{}\"", key),
    }
}

fn parse_numeric(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::Int(i));
    }
    // Rust accepts "inf"/"nan" spellings which are not numeric strings here
    if trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return trimmed.parse::<f64>().ok().map(Number::Float);
    }
    None
}

pub(crate) fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else if f.is_nan() {
        "NAN".to_string()
    } else if f.is_infinite() {
        let inf = if f > 0.0 { "INF" } else { "-INF" };
        inf.to_string()
    } else {
        format!("{}", f)
    }
}

fn print_r_into(value: &Value, indent: usize, out: &mut String) {
    let Some(entries) = value.entries() else {
        out.push_str(&value.render());
        return;
    };
    out.push_str("Array\n");
    let pad = " ".repeat(indent);
    let _ = writeln!(out, "{}(", pad);
    for (key, item) in entries {
        let _ = write!(out, "{}    [{}] => ", pad, key.render());
        if item.is_collection() {
            print_r_into(item, indent + 8, out);
        } else {
            out.push_str(&item.render());
        }
        out.push('\n');
    }
    let _ = writeln!(out, "{})", pad);
}

fn var_dump_into(value: &Value, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    match value {
        Value::Null => {
            let _ = writeln!(out, "{}NULL", pad);
        }
        Value::Bool(b) => {
            let _ = writeln!(out, "{}bool({})", pad, b);
        }
        Value::Int(i) => {
            let _ = writeln!(out, "{}int({})", pad, i);
        }
        Value::Float(f) => {
            let _ = writeln!(out, "{}float({})", pad, format_float(*f));
        }
        Value::String(s) => {
            let _ = writeln!(out, "{}string({}) \"{}\"", pad, s.len(), s);
        }
        Value::List(_) | Value::Map(_) => {
            let entries = value.entries().unwrap_or_default();
            let _ = writeln!(out, "{}array({}) {{", pad, entries.len());
            for (key, item) in entries {
                match key {
                    Value::Int(i) => {
                        let _ = writeln!(out, "{}  [{}]=>", pad, i);
                    }
                    other => {
                        let _ = writeln!(out, "{}  [\"{}\"]=>", pad, other.render());
                    }
                }
                var_dump_into(item, indent + 2, out);
            }
            let _ = writeln!(out, "{}}}", pad);
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// The name→value bindings visible to a render.
///
/// Assignment merges: binding a name that is already present overwrites it,
/// and bulk assignment is a shallow merge (last assignment wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    variables: IndexMap<String, Value>,
}

impl DataContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single variable.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Shallow-merge a set of bindings into this context.
    pub fn assign_all<K, V>(&mut self, bindings: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in bindings {
            self.variables.insert(name.into(), value.into());
        }
        self
    }

    /// Shallow-merge another context into this one.
    pub fn merge(&mut self, other: &DataContext) -> &mut Self {
        for (name, value) in &other.variables {
            self.variables.insert(name.clone(), value.clone());
        }
        self
    }

    /// Build a context from a JSON object.
    pub fn from_json(json: serde_json::Value) -> TemplateResult<Self> {
        match Value::from(json) {
            Value::Map(variables) => Ok(Self { variables }),
            other => Err(TemplateError::type_mismatch(format!(
                "data context must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    /// Get a variable from the context.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Get a variable by path (e.g., `["user", "name"]`).
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.get(first).and_then(|v| v.get_path(rest))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::String("false".to_string()).is_truthy());
        assert!(!Value::String("0".to_string()).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::Bool(true).render(), "1");
        assert_eq!(Value::Bool(false).render(), "");
        assert_eq!(Value::Float(2.0).render(), "2");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::from(vec![1, 2]).render(), "Array");
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(1).loose_eq(&Value::String("1".to_string())));
        assert!(Value::String("1.0".to_string()).loose_eq(&Value::String("1".to_string())));
        assert!(Value::Null.loose_eq(&Value::Bool(false)));
        assert!(Value::Null.loose_eq(&Value::String(String::new())));
        assert!(!Value::String("abc".to_string()).loose_eq(&Value::Int(0)));
        assert!(!Value::Int(1).strict_eq(&Value::String("1".to_string())));
        assert!(Value::Int(1).strict_eq(&Value::Int(1)));
    }

    #[test]
    fn test_loose_ordering() {
        assert_eq!(Value::Int(1).loose_cmp(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(
            Value::String("10".to_string()).loose_cmp(&Value::String("9".to_string())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("b".to_string()).loose_cmp(&Value::String("a".to_string())),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_index_missing_key_is_error() {
        let user = map(&[("name", Value::from("Ann"))]);
        assert_eq!(user.index(&Value::from("name")).unwrap(), &Value::from("Ann"));
        let err = user.index(&Value::from("email")).unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedKey { ref key } if key == "\"email\""));

        let list = Value::from(vec!["a", "b"]);
        assert_eq!(list.index(&Value::Int(1)).unwrap(), &Value::from("b"));
        assert!(list.index(&Value::Int(5)).is_err());
        assert!(Value::Int(3).index(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_get_path() {
        let value = map(&[("employee", map(&[("salary", Value::Int(50000))]))]);
        assert_eq!(value.get_path(&["employee", "salary"]), Some(&Value::Int(50000)));
        assert_eq!(value.get_path(&["employee", "name"]), None);
    }

    #[test]
    fn test_print_r_nested() {
        let value = map(&[("a", Value::Int(1)), ("b", Value::from(vec!["x"]))]);
        let expected = "Array\n(\n    [a] => 1\n    [b] => Array\n        (\n            [0] => x\n        )\n\n)\n";
        assert_eq!(value.print_r(), expected);
    }

    #[test]
    fn test_var_dump() {
        let value = map(&[("n", Value::Int(1)), ("s", Value::from("hi"))]);
        let expected = "array(2) {\n  [\"n\"]=>\n  int(1)\n  [\"s\"]=>\n  string(2) \"hi\"\n}\n";
        assert_eq!(value.var_dump(), expected);
        assert_eq!(Value::Null.var_dump(), "NULL\n");
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({"user": {"name": "Ann", "age": 30}, "tags": ["a"]});
        let ctx = DataContext::from_json(json).unwrap();
        assert_eq!(ctx.get_path(&["user", "name"]), Some(&Value::from("Ann")));
        assert_eq!(ctx.get_path(&["user", "age"]), Some(&Value::Int(30)));
        assert!(DataContext::from_json(serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_assign_merges() {
        let mut ctx = DataContext::new();
        ctx.assign("a", 1).assign("b", 2);
        ctx.assign_all([("b", 3), ("c", 4)]);
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));
        assert_eq!(ctx.get("b"), Some(&Value::Int(3)));
        assert_eq!(ctx.len(), 3);
    }
}
