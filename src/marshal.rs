//! Conversions between host data and script tables.
//!
//! Host value sets (URL query strings, form bodies, header sets) map each
//! key to one or more strings. They become tables where a single value is a
//! plain string entry and several values become a sequence, in receipt order.
//! Converting such a table back yields the original set.

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use url::form_urlencoded;

use crate::error::{BridgeError, BridgeErrorKind};
use crate::value::{Table, TableKey, TableShape, Value};

/// An ordered multi-valued string map, as used by query strings and forms.
///
/// Keys are unique and keep first-insertion order; each key holds at least
/// one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    entries: Vec<(String, Vec<String>)>,
}

impl ValueSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` string.
    pub fn parse(encoded: &str) -> Self {
        let mut set = Self::new();
        for (k, v) in form_urlencoded::parse(encoded.as_bytes()) {
            set.add(k.into_owned(), v.into_owned());
        }
        set
    }

    /// Appends a value to `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replaces all values of `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// All values of `key`, empty if absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates keys with their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Encodes as `application/x-www-form-urlencoded`.
    pub fn encode(&self) -> String {
        let mut out = form_urlencoded::Serializer::new(String::new());
        for (k, values) in &self.entries {
            for v in values {
                out.append_pair(k, v);
            }
        }
        out.finish()
    }
}

/// Canonical MIME header key: `content-type` becomes `Content-Type`.
pub fn canonical_header_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// A multi-valued header map with canonicalised keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    inner: ValueSet,
}

impl HeaderSet {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header occurrence.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.inner.add(canonical_header_key(key), value);
    }

    /// Replaces every occurrence of a header.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.set(canonical_header_key(key), value);
    }

    /// First occurrence of a header, or the empty string.
    pub fn get(&self, key: &str) -> &str {
        self.inner.get(&canonical_header_key(key)).unwrap_or("")
    }

    /// All occurrences of a header.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.inner.get_all(&canonical_header_key(key))
    }

    /// Removes a header.
    pub fn remove(&mut self, key: &str) {
        self.inner.remove(&canonical_header_key(key));
    }

    /// Returns `true` when the header is present.
    pub fn contains(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    /// Iterates header names with their occurrences.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner.iter()
    }

    /// Borrows the underlying value set.
    pub fn as_values(&self) -> &ValueSet {
        &self.inner
    }
}

/// Converts a value set into a script table.
///
/// Single-valued keys become string entries; multi-valued keys become
/// sequences preserving order.
pub fn values_to_table(values: &ValueSet) -> Table {
    let mut table = Table::new();
    for (key, vals) in values.iter() {
        if vals.len() == 1 {
            table.set(key, vals[0].as_str());
        } else {
            table.set(key, Table::from_sequence(vals.iter().map(String::as_str)));
        }
    }
    table
}

/// Converts a header set into a script table, same rules as [`values_to_table`].
pub fn headers_to_table(headers: &HeaderSet) -> Table {
    values_to_table(headers.as_values())
}

/// Converts a script table back into a value set.
///
/// Keys must be strings. Scalar entries (strings, numbers, booleans) become
/// one value; sequence entries become several.
///
/// # Errors
///
/// Returns `AmbiguousTable` for non-string keys, nested maps, or mixed tables.
pub fn table_to_values(table: &Table) -> Result<ValueSet, BridgeError> {
    let mut set = ValueSet::new();
    for (key, value) in table.iter() {
        let TableKey::Name(name) = key else {
            return Err(BridgeError::new(
                BridgeErrorKind::AmbiguousTable,
                format!("value set keys must be strings, found index {}", key),
            ));
        };
        match value {
            Value::Table(inner) => {
                let seq = inner.sequence().ok_or_else(|| {
                    BridgeError::new(
                        BridgeErrorKind::AmbiguousTable,
                        format!("entry '{}' must be a sequence of scalars", name),
                    )
                })?;
                for item in seq {
                    set.add(name.as_str(), scalar_string(name, item)?);
                }
            }
            other => set.add(name.as_str(), scalar_string(name, other)?),
        }
    }
    Ok(set)
}

fn scalar_string(key: &str, value: &Value) -> Result<String, BridgeError> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
        other => Err(BridgeError::new(
            BridgeErrorKind::AmbiguousTable,
            format!("entry '{}' has non-scalar value of type {}", key, other.type_name()),
        )),
    }
}

/// Converts a script value into JSON for host collaborators.
///
/// Map tables become objects, sequence tables become arrays, the empty
/// table becomes an empty object. Handles are not representable.
///
/// # Errors
///
/// Returns `AmbiguousTable` for mixed or sparse tables, non-finite numbers,
/// and handles.
pub fn value_to_json(value: &Value) -> Result<JsonValue, BridgeError> {
    match value {
        Value::Nil => Ok(JsonValue::Null),
        Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        Value::Number(n) => number_to_json(*n).map(JsonValue::Number),
        Value::String(s) => Ok(JsonValue::String(s.clone())),
        Value::Table(t) => match t.shape() {
            TableShape::Empty | TableShape::Map => table_to_json_map(t).map(JsonValue::Object),
            TableShape::Sequence => t
                .sequence()
                .unwrap_or_default()
                .into_iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            TableShape::Ambiguous => Err(BridgeError::new(
                BridgeErrorKind::AmbiguousTable,
                "table mixes sequence and map keys",
            )),
        },
        Value::Handle(h) => Err(BridgeError::new(
            BridgeErrorKind::AmbiguousTable,
            format!("{} handle cannot be converted to data", h.kind()),
        )),
    }
}

/// Converts a map-shaped table into a JSON object.
///
/// # Errors
///
/// Returns `AmbiguousTable` when the table is not map-shaped or holds
/// unconvertible values.
pub fn table_to_json_map(table: &Table) -> Result<JsonMap<String, JsonValue>, BridgeError> {
    let mut map = JsonMap::new();
    for (key, value) in table.iter() {
        let TableKey::Name(name) = key else {
            return Err(BridgeError::new(
                BridgeErrorKind::AmbiguousTable,
                "table used as a map has integer keys",
            ));
        };
        map.insert(name.clone(), value_to_json(value)?);
    }
    Ok(map)
}

fn number_to_json(n: f64) -> Result<JsonNumber, BridgeError> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(JsonNumber::from(n as i64));
    }
    JsonNumber::from_f64(n).ok_or_else(|| {
        BridgeError::new(BridgeErrorKind::AmbiguousTable, "non-finite number")
    })
}
