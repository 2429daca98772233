//! Script-visible values.
//!
//! [`Value`] is the tagged union every bridged call receives and returns.
//! [`Table`] is the script's ordered associative container; it can act as a
//! map (string keys) or as a sequence (integer keys `1..=n`), never both.

use std::fmt;

use crate::collab::SessionHandle;
use crate::multipart::UploadedFile;

/// A dynamically typed script value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Number (scripts have a single numeric type)
    Number(f64),
    /// String
    String(String),
    /// Ordered table
    Table(Table),
    /// Host object the script can hold but not inspect
    Handle(Handle),
}

impl Value {
    /// Name of the value's type as scripts see it.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Handle(_) => "userdata",
        }
    }

    /// Returns `true` for `Value::Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Borrows the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number payload, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrows the table payload, if this is a table.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Script truthiness: only `nil` and `false` are false.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Integer view of a number, truncating toward zero.
    ///
    /// Non-numbers convert to zero, matching the loose integer coercion
    /// scripts get for optional numeric arguments.
    pub fn to_integer(&self) -> i64 {
        match self {
            Value::Number(n) if n.is_finite() => n.trunc() as i64,
            Value::String(s) => s.trim().parse::<f64>().map(|n| n.trunc() as i64).unwrap_or(0),
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Table(_) => write!(f, "table"),
            Value::Handle(h) => write!(f, "userdata: {}", h.kind()),
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

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

/// Opaque host objects handed to scripts.
#[derive(Debug, Clone, PartialEq)]
pub enum Handle {
    /// The live request of the bound context
    Request,
    /// The response writer of the bound context
    ResponseWriter,
    /// The request's session
    Session(SessionHandle),
    /// A file retrieved from a multipart form
    File(UploadedFile),
}

impl Handle {
    /// Short name of the handle kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Handle::Request => "request",
            Handle::ResponseWriter => "responseWriter",
            Handle::Session(_) => "session",
            Handle::File(_) => "file",
        }
    }
}

/// Key of a table entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKey {
    /// Integer key, sequences use `1..=n`
    Index(i64),
    /// String key
    Name(String),
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        TableKey::Name(s.to_string())
    }
}

impl From<String> for TableKey {
    fn from(s: String) -> Self {
        TableKey::Name(s)
    }
}

impl From<i64> for TableKey {
    fn from(i: i64) -> Self {
        TableKey::Index(i)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Index(i) => write!(f, "{}", i),
            TableKey::Name(s) => f.write_str(s),
        }
    }
}

/// The structural shape of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableShape {
    /// No entries
    Empty,
    /// Integer keys exactly `1..=n`
    Sequence,
    /// String keys only
    Map,
    /// Mixed keys, or integer keys with gaps
    Ambiguous,
}

/// An insertion-ordered script table.
///
/// Setting an existing key replaces its value in place; setting a key to
/// `Value::Nil` removes it, as assignment of nil does in scripts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: Vec<(TableKey, Value)>,
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence table from the given values, keyed `1..=n`.
    pub fn from_sequence<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut table = Self::new();
        for value in values {
            table.push(value);
        }
        table
    }

    /// Sets `key` to `value`.
    pub fn set(&mut self, key: impl Into<TableKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let existing = self.entries.iter().position(|(k, _)| *k == key);

        match (existing, value.is_nil()) {
            (Some(idx), true) => {
                self.entries.remove(idx);
            }
            (Some(idx), false) => self.entries[idx].1 = value,
            (None, true) => {}
            (None, false) => self.entries.push((key, value)),
        }
    }

    /// Appends `value` at index `len + 1`.
    pub fn push(&mut self, value: impl Into<Value>) {
        let next = self.sequence_len() as i64 + 1;
        self.set(TableKey::Index(next), value);
    }

    /// Looks up a key; absent keys read as nil.
    pub fn get(&self, key: &TableKey) -> &Value {
        static NIL: Value = Value::Nil;
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or(&NIL)
    }

    /// Looks up a string key.
    pub fn get_str(&self, name: &str) -> &Value {
        self.get(&TableKey::Name(name.to_string()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Length of the contiguous `1..=n` prefix.
    fn sequence_len(&self) -> usize {
        let mut n = 0;
        while self
            .entries
            .iter()
            .any(|(k, _)| *k == TableKey::Index(n as i64 + 1))
        {
            n += 1;
        }
        n
    }

    /// Classifies the table's keys.
    pub fn shape(&self) -> TableShape {
        if self.entries.is_empty() {
            return TableShape::Empty;
        }
        let names = self
            .entries
            .iter()
            .filter(|(k, _)| matches!(k, TableKey::Name(_)))
            .count();
        if names == self.entries.len() {
            return TableShape::Map;
        }
        if names == 0 && self.sequence_len() == self.entries.len() {
            return TableShape::Sequence;
        }
        TableShape::Ambiguous
    }

    /// Values of a sequence table in index order, or `None` for other shapes.
    pub fn sequence(&self) -> Option<Vec<&Value>> {
        match self.shape() {
            TableShape::Empty => Some(Vec::new()),
            TableShape::Sequence => Some(
                (1..=self.entries.len() as i64)
                    .map(|i| self.get(&TableKey::Index(i)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place_and_nil_removes() {
        let mut t = Table::new();
        t.set("a", "1");
        t.set("b", "2");
        t.set("a", "3");

        let keys: Vec<_> = t.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(t.get_str("a"), &Value::from("3"));

        t.set("a", Value::Nil);
        assert_eq!(t.len(), 1);
        assert!(t.get_str("a").is_nil());
    }

    #[test]
    fn shapes_are_classified() {
        assert_eq!(Table::new().shape(), TableShape::Empty);
        assert_eq!(Table::from_sequence(["x", "y"]).shape(), TableShape::Sequence);

        let mut map = Table::new();
        map.set("k", true);
        assert_eq!(map.shape(), TableShape::Map);

        let mut mixed = Table::from_sequence(["x"]);
        mixed.set("k", true);
        assert_eq!(mixed.shape(), TableShape::Ambiguous);

        let mut sparse = Table::new();
        sparse.set(1_i64, "a");
        sparse.set(3_i64, "c");
        assert_eq!(sparse.shape(), TableShape::Ambiguous);
        assert!(sparse.sequence().is_none());
    }

    #[test]
    fn sequence_reads_in_index_order() {
        let mut t = Table::new();
        t.set(2_i64, "second");
        t.set(1_i64, "first");

        let seq = t.sequence().unwrap();
        assert_eq!(seq, vec![&Value::from("first"), &Value::from("second")]);
    }

    #[test]
    fn value_helpers() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Number(0.0).truthy());
        assert_eq!(Value::Number(3.9).to_integer(), 3);
        assert_eq!(Value::from("42").to_integer(), 42);
        assert_eq!(Value::Table(Table::new()).to_integer(), 0);
        assert_eq!(Value::Number(302.0).to_string(), "302");
        assert_eq!(Value::from(Some("x")), Value::from("x"));
        assert_eq!(Value::from(None::<String>), Value::Nil);
    }
}
