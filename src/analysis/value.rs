//! Runtime values of the analysis language.

use super::ast::Arrow;
use super::interp::Scope;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Arrays nested deeper than this are not converted to strings.
const MAX_DISPLAY_DEPTH: usize = 64;

/// Host-provided namespaces reachable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Math,
    Date,
    Json,
    Object,
    Table,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Math => "Math",
            Namespace::Date => "Date",
            Namespace::Json => "JSON",
            Namespace::Object => "Object",
            Namespace::Table => "table",
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<Object>),
    Closure(Rc<Closure>),
    /// A host function, by qualified name (`Math.max`, `Number`).
    Builtin(Rc<str>),
    Namespace(Namespace),
    Frame(Rc<Frame>),
    Grouped(Rc<Grouped>),
}

pub struct Closure {
    pub arrow: Rc<Arrow>,
    pub captured: Scope,
}

/// Insertion-ordered string-keyed map.
#[derive(Clone, Default)]
pub struct Object {
    index: HashMap<String, usize>,
    entries: Vec<(String, Value)>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Returns the slot for `key`, inserting `default` first if absent.
    pub fn entry_or(&mut self, key: String, default: Value) -> &mut Value {
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.index.insert(key.clone(), i);
                self.entries.push((key, default));
                i
            }
        };
        &mut self.entries[i].1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(String, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut object = Object::new();
        for (key, value) in iter {
            object.insert(key, value);
        }
        object
    }
}

/// Tabular view over a list of records.
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Rc<Vec<Value>>,
}

impl Frame {
    /// Builds a frame from row objects; columns are the union of keys in
    /// first-seen order.
    pub fn from_rows(rows: Rc<Vec<Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in rows.iter() {
            if let Value::Object(object) = row {
                for (key, _) in object.iter() {
                    if seen.insert(key.clone()) {
                        columns.push(key.clone());
                    }
                }
            }
        }
        Self { columns, rows }
    }

    pub fn cell(&self, row: &Value, column: &str) -> Value {
        match row {
            Value::Object(object) => object.get(column).cloned().unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }
}

/// Rows partitioned by one column, groups in first-seen key order.
pub struct Grouped {
    pub by: String,
    pub groups: Vec<(Value, Vec<Value>)>,
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(object))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Closure(_) | Value::Builtin(_) => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Null => 0.0,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) if items.is_empty() => 0.0,
            Value::Array(items) if items.len() == 1 => items[0].to_number(),
            _ => f64::NAN,
        }
    }

    /// String conversion with JavaScript's `String(x)` rules.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Closure(_) | Value::Builtin(_) => "[function]".to_string(),
            Value::Namespace(ns) => format!("[object {}]", ns.as_str()),
            Value::Frame(_) => "[object Frame]".to_string(),
            Value::Grouped(_) => "[object GroupedFrame]".to_string(),
        }
    }

    /// Byte length of [`to_display`](Self::to_display), or `None` once it
    /// would pass `limit`. Never builds the string itself.
    pub fn display_len(&self, limit: usize) -> Option<usize> {
        self.display_len_at(limit, 0)
    }

    fn display_len_at(&self, limit: usize, depth: usize) -> Option<usize> {
        let len = match self {
            Value::Str(s) => s.len(),
            Value::Array(items) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return None;
                }
                let mut total = items.len().saturating_sub(1);
                for item in items.iter().filter(|item| !item.is_nullish()) {
                    if total > limit {
                        return None;
                    }
                    total += item.display_len_at(limit - total, depth + 1)?;
                }
                total
            }
            other => other.to_display().len(),
        };
        (len <= limit).then_some(len)
    }

    /// `===`; composite values compare structurally.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.strict_equals(y)))
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.strict_equals(w))))
            }
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::Frame(a), Value::Frame(b)) => Rc::ptr_eq(a, b),
            (Value::Grouped(a), Value::Grouped(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: null and undefined are equal to each other; mixed
    /// number/string/boolean comparisons go through numbers.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// Total order used by sorting: numbers, then strings, then booleans,
    /// then everything else; nullish values sort last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Number(_) => 0,
                Value::Str(_) => 1,
                Value::Bool(_) => 2,
                Value::Undefined | Value::Null => 4,
                _ => 3,
            }
        }
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Key used when grouping or de-duplicating by value.
    pub fn group_key(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.to_display(),
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::str(s),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain JSON conversion following `JSON.stringify` rules: functions and
    /// undefined become null, non-finite numbers become null, frames become
    /// their row list.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.to_string()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(object) => Json::Object(
                object
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Closure(_) | Value::Builtin(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Frame(frame) => Json::Array(frame.rows.iter().map(Value::to_json).collect()),
            Value::Grouped(grouped) => Json::Object(
                grouped
                    .groups
                    .iter()
                    .map(|(key, rows)| {
                        (key.group_key(), Json::Array(rows.iter().map(Value::to_json).collect()))
                    })
                    .collect(),
            ),
            Value::Closure(_) | Value::Builtin(_) | Value::Namespace(_) => Json::Null,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
            other => write!(f, "{}", other.to_display()),
        }
    }
}

/// Integral finite numbers become JSON integers; non-finite numbers have no
/// JSON form.
pub fn number_to_json(n: f64) -> Option<Json> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Some(Json::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Json::Number)
}

/// Formats a number the way JavaScript prints it for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}
