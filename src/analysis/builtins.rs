//! Host functions: methods on arrays, strings, numbers and frames, and the
//! `Math`, `Date`, `JSON`, `Object` and `table` namespaces.
//!
//! Nothing here reaches outside the process: no I/O, no environment, no
//! clock other than `Date.now`.

use super::interp::{Interpreter, STRING_BYTES_PER_STEP};
use super::value::{format_number, Frame, Grouped, Namespace, Object, Value};
use super::EvalError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "floor", "ceil", "round", "sqrt", "pow", "min", "max", "log", "log10", "exp", "sign",
    "trunc",
];
const DATE_FUNCTIONS: &[&str] = &["now", "parse", "year", "month", "day", "iso"];
const JSON_FUNCTIONS: &[&str] = &["stringify", "parse"];
const OBJECT_FUNCTIONS: &[&str] = &["keys", "values", "entries", "fromEntries"];
const TABLE_FUNCTIONS: &[&str] = &["from"];

/// Rows shown by `head()`/`tail()` when no count is given.
const DEFAULT_HEAD: usize = 5;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn callback(args: &[Value], method: &str) -> Result<Value, EvalError> {
    match args.first() {
        Some(f) if f.is_callable() => Ok(f.clone()),
        Some(other) => Err(EvalError::type_error(format!(
            "{} is not a function (in {method})",
            other.to_display()
        ))),
        None => Err(EvalError::type_error(format!("{method} requires a callback"))),
    }
}

fn string_arg(args: &[Value], i: usize, method: &str) -> Result<String, EvalError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        _ => Err(EvalError::type_error(format!("{method} expects a column name"))),
    }
}

fn not_a_function(kind: &str, name: &str) -> EvalError {
    EvalError::type_error(format!("{kind}.{name} is not a function"))
}

fn descending(flag: &Value) -> bool {
    match flag {
        Value::Str(s) => s.eq_ignore_ascii_case("desc"),
        other => other.truthy(),
    }
}

fn frame_value(columns: Vec<String>, rows: Vec<Value>) -> Value {
    Value::Frame(Rc::new(Frame {
        columns,
        rows: Rc::new(rows),
    }))
}

/// Resolves a JavaScript-style relative index against `len`.
fn relative(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn slice_bounds(args: &[Value], len: usize) -> (usize, usize) {
    let start = relative(&arg(args, 0), len, 0);
    let end = relative(&arg(args, 1), len, len);
    (start, end.max(start))
}

fn aggregate(name: &str, nums: &[f64]) -> Value {
    match name {
        "sum" => Value::Number(nums.iter().sum()),
        "avg" | "mean" if nums.is_empty() => Value::Null,
        "avg" | "mean" => Value::Number(nums.iter().sum::<f64>() / nums.len() as f64),
        "min" => nums
            .iter()
            .copied()
            .reduce(f64::min)
            .map_or(Value::Null, Value::Number),
        _ => nums
            .iter()
            .copied()
            .reduce(f64::max)
            .map_or(Value::Null, Value::Number),
    }
}

/// Summary statistics over the numeric values of one column.
fn describe(nums: &[f64]) -> Value {
    let count = nums.len();
    let mut stats = Object::new();
    stats.insert("count".into(), Value::Number(count as f64));
    stats.insert("mean".into(), aggregate("mean", nums));
    let std = if count > 1 {
        let mean = nums.iter().sum::<f64>() / count as f64;
        let variance = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        Value::Number(variance.sqrt())
    } else if count == 1 {
        Value::Number(0.0)
    } else {
        Value::Null
    };
    stats.insert("std".into(), std);
    stats.insert("min".into(), aggregate("min", nums));
    stats.insert("max".into(), aggregate("max", nums));
    Value::object(stats)
}

/// Numeric values of `column`; nullish and non-numeric cells are skipped.
fn column_numbers(frame: &Frame, column: &str) -> Vec<f64> {
    numbers_of(frame.rows.iter().map(|row| frame.cell(row, column)))
}

fn numbers_of(values: impl Iterator<Item = Value>) -> Vec<f64> {
    values
        .filter(|v| !v.is_nullish())
        .map(|v| v.to_number())
        .filter(|n| !n.is_nan())
        .collect()
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Accepts epoch milliseconds or a date string.
fn date_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(ms) if ms.is_finite() => Utc.timestamp_millis_opt(*ms as i64).single(),
        Value::Str(s) => parse_date(s),
        _ => None,
    }
}

fn numeric_prefix(text: &str, allow_fraction: bool) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    if text[end..].starts_with("Infinity") && allow_fraction {
        return text[..end + "Infinity".len()].parse().unwrap_or(f64::NAN);
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if allow_fraction {
        if end < bytes.len() && bytes[end] == b'.' {
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        if end > digits_start && end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp_end = end + 1;
            if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
                exp_end += 1;
            }
            let exp_digits = exp_end;
            while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            if exp_end > exp_digits {
                end = exp_end;
            }
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

impl Interpreter {
    /// Members of a namespace: constants and host functions.
    pub(super) fn namespace_member(&self, ns: Namespace, name: &str) -> Value {
        match (ns, name) {
            (Namespace::Math, "PI") => Value::Number(std::f64::consts::PI),
            (Namespace::Math, "E") => Value::Number(std::f64::consts::E),
            _ => {
                let known = match ns {
                    Namespace::Math => MATH_FUNCTIONS,
                    Namespace::Date => DATE_FUNCTIONS,
                    Namespace::Json => JSON_FUNCTIONS,
                    Namespace::Object => OBJECT_FUNCTIONS,
                    Namespace::Table => TABLE_FUNCTIONS,
                };
                if known.contains(&name) {
                    Value::Builtin(Rc::from(format!("{}.{name}", ns.as_str())))
                } else {
                    Value::Undefined
                }
            }
        }
    }

    /// `target.name(args)`.
    pub(super) fn call_method(
        &mut self,
        target: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        match target {
            Value::Array(items) => self.array_method(items, name, args),
            Value::Str(s) => self.string_method(s, name, args),
            Value::Number(n) => number_method(*n, name, &args),
            Value::Frame(frame) => self.frame_method(frame, name, args),
            Value::Grouped(grouped) => self.grouped_method(grouped, name, args),
            Value::Namespace(ns) => match self.namespace_member(*ns, name) {
                Value::Builtin(function) => self.call_builtin(&function, args),
                _ => Err(not_a_function(ns.as_str(), name)),
            },
            _ => {
                let function = self.property(target, name)?;
                if function.is_callable() {
                    self.call_value(&function, args)
                } else {
                    Err(not_a_function(target.type_of(), name))
                }
            }
        }
    }

    fn select_key(&mut self, selector: &Value, item: &Value) -> Result<Value, EvalError> {
        match selector {
            Value::Undefined => Ok(item.clone()),
            Value::Str(key) => self.property(item, key),
            f if f.is_callable() => self.call_value(f, vec![item.clone()]),
            other => Err(EvalError::type_error(format!(
                "{} is not a valid key selector",
                other.to_display()
            ))),
        }
    }

    fn keyed(&mut self, items: &[Value], selector: &Value) -> Result<Vec<(Value, Value)>, EvalError> {
        items
            .iter()
            .map(|item| Ok((self.select_key(selector, item)?, item.clone())))
            .collect()
    }

    /// Stable merge sort driven by a fallible comparator; never panics on
    /// inconsistent user comparators.
    fn merge_sort<T, F>(&mut self, mut items: Vec<T>, cmp: &mut F) -> Result<Vec<T>, EvalError>
    where
        T: Clone,
        F: FnMut(&mut Self, &T, &T) -> Result<Ordering, EvalError>,
    {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, cmp)?;
        let right = self.merge_sort(right, cmp)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let (mut i, mut j) = (0, 0);
        while i < left.len() && j < right.len() {
            self.charge(1)?;
            if cmp(self, &right[j], &left[i])? == Ordering::Less {
                merged.push(right[j].clone());
                j += 1;
            } else {
                merged.push(left[i].clone());
                i += 1;
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&right[j..]);
        Ok(merged)
    }

    fn sort_keyed(&mut self, keyed: Vec<(Value, Value)>, desc: bool) -> Result<Vec<Value>, EvalError> {
        // Nullish keys stay last in both directions.
        let sorted = self.merge_sort(
            keyed,
            &mut |_: &mut Interpreter, a: &(Value, Value), b: &(Value, Value)| {
                Ok(match (a.0.is_nullish(), b.0.is_nullish()) {
                    (false, false) if desc => a.0.sort_cmp(&b.0).reverse(),
                    _ => a.0.sort_cmp(&b.0),
                })
            },
        )?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn array_method(
        &mut self,
        items: &Rc<Vec<Value>>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        self.charge(items.len() as u64)?;
        match name {
            "map" => {
                let f = callback(&args, name)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.call_value(&f, vec![item.clone(), Value::Number(i as f64)])?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let f = callback(&args, name)?;
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if self.call_value(&f, vec![item.clone(), Value::Number(i as f64)])?.truthy() {
                        out.push(item.clone());
                    }
                }
                Ok(Value::array(out))
            }
            "find" | "findIndex" | "some" | "every" => {
                let f = callback(&args, name)?;
                for (i, item) in items.iter().enumerate() {
                    let hit = self.call_value(&f, vec![item.clone(), Value::Number(i as f64)])?.truthy();
                    match (name, hit) {
                        ("find", true) => return Ok(item.clone()),
                        ("findIndex", true) => return Ok(Value::Number(i as f64)),
                        ("some", true) => return Ok(Value::Bool(true)),
                        ("every", false) => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match name {
                    "find" => Value::Undefined,
                    "findIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    _ => Value::Bool(true),
                })
            }
            "reduce" => {
                let f = callback(&args, name)?;
                let mut rest = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match rest.next() {
                        Some((_, first)) => first.clone(),
                        None => {
                            return Err(EvalError::type_error(
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    },
                };
                for (i, item) in rest {
                    acc = self.call_value(&f, vec![acc, item.clone(), Value::Number(i as f64)])?;
                }
                Ok(acc)
            }
            "slice" => {
                let (start, end) = slice_bounds(&args, items.len());
                Ok(Value::array(items[start..end].to_vec()))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Ok(Value::Bool(items.iter().any(|v| v.strict_equals(&needle))))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                Ok(Value::Number(
                    items
                        .iter()
                        .position(|v| v.strict_equals(&needle))
                        .map_or(-1.0, |i| i as f64),
                ))
            }
            "join" => {
                let sep: Rc<str> = match args.first() {
                    None | Some(Value::Undefined) => Rc::from(","),
                    Some(v) => self.display(v)?,
                };
                let mut len = sep.len().saturating_mul(items.len().saturating_sub(1));
                self.check_string_len(len)?;
                let mut parts = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let part = if item.is_nullish() { Rc::from("") } else { self.display(item)? };
                    len = len.saturating_add(part.len());
                    self.check_string_len(len)?;
                    parts.push(part);
                }
                self.reserve_string(len)?;
                Ok(Value::str(&parts.join(&*sep)))
            }
            "concat" => {
                let mut out = items.to_vec();
                for extra in args {
                    match extra {
                        Value::Array(more) => {
                            self.charge(more.len() as u64)?;
                            out.extend(more.iter().cloned());
                        }
                        other => out.push(other),
                    }
                }
                Ok(Value::array(out))
            }
            "reverse" => Ok(Value::array(items.iter().rev().cloned().collect())),
            "sort" => {
                let sorted = match args.first() {
                    Some(f) if f.is_callable() => {
                        let f = f.clone();
                        self.merge_sort(items.to_vec(), &mut |interp: &mut Interpreter, a: &Value, b: &Value| {
                            let r = interp.call_value(&f, vec![a.clone(), b.clone()])?.to_number();
                            Ok(if r < 0.0 {
                                Ordering::Less
                            } else if r > 0.0 {
                                Ordering::Greater
                            } else {
                                Ordering::Equal
                            })
                        })?
                    }
                    _ => self.merge_sort(
                        items.to_vec(),
                        &mut |_: &mut Interpreter, a: &Value, b: &Value| Ok(a.sort_cmp(b)),
                    )?,
                };
                Ok(Value::array(sorted))
            }
            "sortBy" => {
                let keyed = self.keyed(items, &arg(&args, 0))?;
                let sorted = self.sort_keyed(keyed, descending(&arg(&args, 1)))?;
                Ok(Value::array(sorted))
            }
            "sum" | "avg" | "mean" | "min" | "max" => {
                let keys = self.keyed(items, &arg(&args, 0))?;
                let nums = numbers_of(keys.into_iter().map(|(key, _)| key));
                Ok(aggregate(name, &nums))
            }
            "count" => match args.first() {
                Some(f) if f.is_callable() => {
                    let f = f.clone();
                    let mut count = 0usize;
                    for item in items.iter() {
                        if self.call_value(&f, vec![item.clone()])?.truthy() {
                            count += 1;
                        }
                    }
                    Ok(Value::Number(count as f64))
                }
                _ => Ok(Value::Number(items.len() as f64)),
            },
            "first" => Ok(items.first().cloned().unwrap_or(Value::Undefined)),
            "last" => Ok(items.last().cloned().unwrap_or(Value::Undefined)),
            "flatMap" | "flat" => {
                let f = if name == "flatMap" {
                    Some(callback(&args, name)?)
                } else {
                    None
                };
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let mapped = match &f {
                        Some(f) => self.call_value(f, vec![item.clone(), Value::Number(i as f64)])?,
                        None => item.clone(),
                    };
                    match mapped {
                        Value::Array(inner) => {
                            self.charge(inner.len() as u64)?;
                            out.extend(inner.iter().cloned());
                        }
                        other => out.push(other),
                    }
                }
                Ok(Value::array(out))
            }
            "distinct" => {
                let keyed = self.keyed(items, &arg(&args, 0))?;
                let mut seen = std::collections::HashSet::new();
                Ok(Value::array(
                    keyed
                        .into_iter()
                        .filter(|(key, _)| seen.insert(format!("{}:{}", key.type_of(), key.group_key())))
                        .map(|(key, item)| if args.is_empty() { item } else { key })
                        .collect(),
                ))
            }
            "groupBy" | "countBy" => {
                let keyed = self.keyed(items, &arg(&args, 0))?;
                let mut groups = Object::new();
                for (key, item) in keyed {
                    if name == "groupBy" {
                        let slot = groups.entry_or(key.group_key(), Value::array(Vec::new()));
                        if let Value::Array(list) = slot {
                            Rc::make_mut(list).push(item);
                        }
                    } else {
                        let slot = groups.entry_or(key.group_key(), Value::Number(0.0));
                        *slot = Value::Number(slot.to_number() + 1.0);
                    }
                }
                Ok(Value::object(groups))
            }
            _ => Err(not_a_function("array", name)),
        }
    }

    fn string_method(&mut self, s: &Rc<str>, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.charge(1 + s.len() as u64 / STRING_BYTES_PER_STEP)?;
        let text = self.display(&arg(&args, 0))?;
        match name {
            "toUpperCase" => Ok(Value::str(&s.to_uppercase())),
            "toLowerCase" => Ok(Value::str(&s.to_lowercase())),
            "trim" => Ok(Value::str(s.trim())),
            "includes" => Ok(Value::Bool(s.contains(&*text))),
            "startsWith" => Ok(Value::Bool(s.starts_with(&*text))),
            "endsWith" => Ok(Value::Bool(s.ends_with(&*text))),
            "indexOf" => Ok(Value::Number(
                s.find(&*text)
                    .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
            )),
            "split" => {
                let parts: Vec<Value> = match args.first() {
                    None | Some(Value::Undefined) => vec![Value::Str(s.clone())],
                    Some(_) if text.is_empty() => {
                        s.chars().map(|c| Value::str(&c.to_string())).collect()
                    }
                    Some(_) => s.split(&*text).map(Value::str).collect(),
                };
                self.charge(parts.len() as u64)?;
                Ok(Value::array(parts))
            }
            "slice" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(&args, chars.len());
                Ok(Value::str(&chars[start..end].iter().collect::<String>()))
            }
            "replace" | "replaceAll" => {
                let replacement = self.display(&arg(&args, 1))?;
                let hits = if text.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(&*text).count()
                };
                let hits = if name == "replace" { hits.min(1) } else { hits };
                let len = (s.len() - hits * text.len()).saturating_add(hits.saturating_mul(replacement.len()));
                self.reserve_string(len)?;
                Ok(Value::str(&if name == "replace" {
                    s.replacen(&*text, &replacement, 1)
                } else {
                    s.replace(&*text, &replacement)
                }))
            }
            "toString" => Ok(Value::Str(s.clone())),
            _ => Err(not_a_function("string", name)),
        }
    }

    fn frame_method(&mut self, frame: &Rc<Frame>, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.charge(frame.rows.len() as u64)?;
        let len = frame.rows.len();
        match name {
            "head" | "tail" => {
                let n = match args.first() {
                    None | Some(Value::Undefined) => DEFAULT_HEAD,
                    Some(v) => relative(v, len, DEFAULT_HEAD),
                };
                let n = n.min(len);
                let rows = if name == "head" {
                    frame.rows[..n].to_vec()
                } else {
                    frame.rows[len - n..].to_vec()
                };
                Ok(frame_value(frame.columns.clone(), rows))
            }
            "select" => {
                let columns: Vec<String> = match args.first() {
                    Some(Value::Array(names)) => names.iter().map(Value::to_display).collect(),
                    _ => args.iter().map(Value::to_display).collect(),
                };
                let rows = frame
                    .rows
                    .iter()
                    .map(|row| {
                        Value::object(
                            columns
                                .iter()
                                .map(|c| (c.clone(), frame.cell(row, c)))
                                .filter(|(_, v)| !matches!(v, Value::Undefined))
                                .collect(),
                        )
                    })
                    .collect();
                Ok(frame_value(columns, rows))
            }
            "filter" => {
                let f = callback(&args, name)?;
                let mut rows = Vec::new();
                for (i, row) in frame.rows.iter().enumerate() {
                    if self.call_value(&f, vec![row.clone(), Value::Number(i as f64)])?.truthy() {
                        rows.push(row.clone());
                    }
                }
                Ok(frame_value(frame.columns.clone(), rows))
            }
            "sortBy" => {
                let keyed = self.keyed(&frame.rows, &arg(&args, 0))?;
                let rows = self.sort_keyed(keyed, descending(&arg(&args, 1)))?;
                Ok(frame_value(frame.columns.clone(), rows))
            }
            "column" => {
                let column = string_arg(&args, 0, "column")?;
                Ok(Value::array(
                    frame.rows.iter().map(|row| frame.cell(row, &column)).collect(),
                ))
            }
            "distinct" => {
                let column = string_arg(&args, 0, "distinct")?;
                let mut seen = std::collections::HashSet::new();
                Ok(Value::array(
                    frame
                        .rows
                        .iter()
                        .map(|row| frame.cell(row, &column))
                        .filter(|v| seen.insert(format!("{}:{}", v.type_of(), v.group_key())))
                        .collect(),
                ))
            }
            "groupBy" => {
                let by = string_arg(&args, 0, "groupBy")?;
                let mut index: HashMap<String, usize> = HashMap::new();
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for row in frame.rows.iter() {
                    let key = frame.cell(row, &by);
                    let slot = *index.entry(key.group_key()).or_insert_with(|| {
                        groups.push((key.clone(), Vec::new()));
                        groups.len() - 1
                    });
                    groups[slot].1.push(row.clone());
                }
                Ok(Value::Grouped(Rc::new(Grouped { by, groups })))
            }
            "describe" => match args.first() {
                Some(Value::Str(column)) => Ok(describe(&column_numbers(frame, column))),
                _ => {
                    let mut summary = Object::new();
                    for column in &frame.columns {
                        let nums = column_numbers(frame, column);
                        if !nums.is_empty() {
                            summary.insert(column.clone(), describe(&nums));
                        }
                    }
                    Ok(Value::object(summary))
                }
            },
            "sum" | "mean" | "avg" | "min" | "max" => {
                let column = string_arg(&args, 0, name)?;
                Ok(aggregate(name, &column_numbers(frame, &column)))
            }
            "count" => Ok(Value::Number(len as f64)),
            "toRows" => Ok(Value::Array(frame.rows.clone())),
            _ => Err(not_a_function("frame", name)),
        }
    }

    fn grouped_method(
        &mut self,
        grouped: &Rc<Grouped>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        self.charge(grouped.groups.len() as u64)?;
        let row = |key: &Value, column: &str, value: Value| {
            let mut object = Object::new();
            object.insert(grouped.by.clone(), key.clone());
            object.insert(column.to_string(), value);
            Value::object(object)
        };
        match name {
            "count" => {
                let rows = grouped
                    .groups
                    .iter()
                    .map(|(key, members)| row(key, "count", Value::Number(members.len() as f64)))
                    .collect();
                Ok(frame_value(vec![grouped.by.clone(), "count".to_string()], rows))
            }
            "sum" | "mean" | "avg" | "min" | "max" => {
                let column = string_arg(&args, 0, name)?;
                let mut rows = Vec::with_capacity(grouped.groups.len());
                for (key, members) in &grouped.groups {
                    self.charge(members.len() as u64)?;
                    let nums = numbers_of(members.iter().map(|m| match m {
                        Value::Object(object) => object.get(&column).cloned().unwrap_or(Value::Undefined),
                        _ => Value::Undefined,
                    }));
                    rows.push(row(key, &column, aggregate(name, &nums)));
                }
                Ok(frame_value(vec![grouped.by.clone(), column], rows))
            }
            "keys" => Ok(Value::array(
                grouped.groups.iter().map(|(key, _)| key.clone()).collect(),
            )),
            _ => Err(not_a_function("groupedFrame", name)),
        }
    }

    /// Calls a host function by qualified name.
    pub(super) fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let first = arg(&args, 0);
        let math = |f: fn(f64) -> f64| Ok(Value::Number(f(first.to_number())));
        match name {
            "Number" => Ok(Value::Number(if args.is_empty() { 0.0 } else { first.to_number() })),
            "String" => Ok(if args.is_empty() {
                Value::str("")
            } else {
                Value::Str(self.display(&first)?)
            }),
            "Boolean" => Ok(Value::Bool(first.truthy())),
            "isNaN" => Ok(Value::Bool(first.to_number().is_nan())),
            "parseFloat" => Ok(Value::Number(numeric_prefix(&first.to_display(), true))),
            "parseInt" => Ok(Value::Number(numeric_prefix(&first.to_display(), false))),

            "Math.abs" => math(f64::abs),
            "Math.floor" => math(f64::floor),
            "Math.ceil" => math(f64::ceil),
            "Math.round" => math(|x| (x + 0.5).floor()),
            "Math.sqrt" => math(f64::sqrt),
            "Math.log" => math(f64::ln),
            "Math.log10" => math(f64::log10),
            "Math.exp" => math(f64::exp),
            "Math.trunc" => math(f64::trunc),
            "Math.sign" => math(|x| if x.is_nan() || x == 0.0 { x } else { x.signum() }),
            "Math.pow" => Ok(Value::Number(first.to_number().powf(arg(&args, 1).to_number()))),
            "Math.min" | "Math.max" => {
                // A single array argument is spread.
                let values: Vec<Value> = match args.as_slice() {
                    [Value::Array(items)] => items.to_vec(),
                    _ => args,
                };
                self.charge(values.len() as u64)?;
                let nums = values.iter().map(Value::to_number);
                Ok(Value::Number(if name == "Math.min" {
                    nums.fold(f64::INFINITY, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) })
                } else {
                    nums.fold(f64::NEG_INFINITY, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) })
                }))
            }

            "Date.now" => Ok(Value::Number(Utc::now().timestamp_millis() as f64)),
            "Date.parse" => Ok(Value::Number(
                parse_date(&first.to_display()).map_or(f64::NAN, |dt| dt.timestamp_millis() as f64),
            )),
            "Date.year" => Ok(Value::Number(date_of(&first).map_or(f64::NAN, |dt| f64::from(dt.year())))),
            "Date.month" => Ok(Value::Number(date_of(&first).map_or(f64::NAN, |dt| f64::from(dt.month())))),
            "Date.day" => Ok(Value::Number(date_of(&first).map_or(f64::NAN, |dt| f64::from(dt.day())))),
            "Date.iso" => Ok(date_of(&first).map_or(Value::Null, |dt| {
                Value::str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            })),

            "JSON.stringify" => {
                if matches!(first, Value::Undefined | Value::Closure(_) | Value::Builtin(_)) {
                    return Ok(Value::Undefined);
                }
                let json = first.to_json();
                let text = if arg(&args, 2).to_number() > 0.0 {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                text.map(|t| Value::str(&t))
                    .map_err(|e| EvalError::runtime(format!("TypeError: {e}")))
            }
            "JSON.parse" => serde_json::from_str::<serde_json::Value>(&first.to_display())
                .map(|json| Value::from_json(&json))
                .map_err(|e| EvalError::runtime(format!("SyntaxError: {e}"))),

            "Object.keys" | "Object.values" | "Object.entries" => {
                let entries: Vec<(String, Value)> = match &first {
                    Value::Object(object) => object.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v.clone()))
                        .collect(),
                    Value::Undefined | Value::Null => {
                        return Err(EvalError::type_error("Cannot convert undefined or null to object"))
                    }
                    _ => Vec::new(),
                };
                self.charge(entries.len() as u64)?;
                Ok(Value::array(
                    entries
                        .into_iter()
                        .map(|(k, v)| match name {
                            "Object.keys" => Value::str(&k),
                            "Object.values" => v,
                            _ => Value::array(vec![Value::str(&k), v]),
                        })
                        .collect(),
                ))
            }
            "Object.fromEntries" => {
                let Value::Array(pairs) = &first else {
                    return Err(EvalError::type_error("Object.fromEntries expects an array of pairs"));
                };
                self.charge(pairs.len() as u64)?;
                let mut object = Object::new();
                for pair in pairs.iter() {
                    match pair {
                        Value::Array(kv) => object.insert(
                            kv.first().map(Value::to_display).unwrap_or_default(),
                            kv.get(1).cloned().unwrap_or(Value::Undefined),
                        ),
                        _ => return Err(EvalError::type_error("Object.fromEntries expects [key, value] pairs")),
                    }
                }
                Ok(Value::object(object))
            }

            "table.from" => match &first {
                Value::Array(rows) if rows.iter().all(|r| matches!(r, Value::Object(_))) => {
                    self.charge(rows.len() as u64)?;
                    Ok(Value::Frame(Rc::new(Frame::from_rows(rows.clone()))))
                }
                Value::Frame(frame) => Ok(Value::Frame(frame.clone())),
                _ => Err(EvalError::type_error("table.from expects an array of row objects")),
            },

            _ => Err(EvalError::type_error(format!("{name} is not a function"))),
        }
    }
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 20.0) as usize };
            if n.is_finite() {
                Ok(Value::str(&format!("{n:.digits$}")))
            } else {
                Ok(Value::str(&format_number(n)))
            }
        }
        "toString" => Ok(Value::str(&format_number(n))),
        _ => Err(not_a_function("number", name)),
    }
}
