use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// An ordered string-keyed map of property values.
///
/// Insertion order is preserved for iteration (matching the "ordered mapping"
/// language of the data model) while still supporting O(log n) lookup by
/// keeping a parallel sorted index; for the property counts graphs actually
/// carry this is simpler than pulling in an external ordered-map crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or overwrites `key`. An explicit `Value::Null` sets the key to
    /// null rather than removing it, matching `update_node_properties`'s
    /// merge semantics.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.set(k, v);
        }
        map
    }

    /// Converts to a sorted `BTreeMap`, the shape `apoc.convert.toMap`
    /// produces for comparison against a plain JSON map.
    pub fn to_btree_map(&self) -> BTreeMap<String, Value> {
        self.entries.iter().cloned().collect()
    }
}

impl FromIterator<(String, Value)> for PropertyMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self::from_pairs(iter.into_iter().collect())
    }
}

/// A Cypher-style calendar duration: months/days are kept nominal (not
/// normalized to a fixed number of seconds) because month length varies;
/// only the seconds/nanos component is an exact physical quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

impl Duration {
    pub const ZERO: Duration = Duration { months: 0, days: 0, seconds: 0, nanos: 0 };
}

/// A spatial point. `z` distinguishes 2D from 3D; `geographic` selects
/// Cartesian vs. WGS-84 longitude/latitude semantics for `distance()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub geographic: bool,
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        OrderedFloat(self.x) == OrderedFloat(other.x)
            && OrderedFloat(self.y) == OrderedFloat(other.y)
            && self.z.map(OrderedFloat) == other.z.map(OrderedFloat)
            && self.geographic == other.geographic
    }
}
impl Eq for Point {}

/// A dynamically-typed property / expression value.
///
/// Covers every logical type named in the data model: the JSON-native set
/// (`Null`..`Map`) plus temporal and spatial logical types, which round-trip
/// to tagged strings at rest (see `grafito_storage::codec`) but stay typed
/// here so the evaluator can do date/time/point arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(PropertyMap),
    Date(NaiveDate),
    Time(NaiveTime),
    LocalTime(NaiveTime),
    DateTime(NaiveDateTime),
    LocalDateTime(NaiveDateTime),
    Duration(Duration),
    Point(Point),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::LocalTime(_) => "LOCAL TIME",
            Value::DateTime(_) => "DATE TIME",
            Value::LocalDateTime(_) => "LOCAL DATE TIME",
            Value::Duration(_) => "DURATION",
            Value::Point(_) => "POINT",
        }
    }

    /// Truthiness used for `IS NULL`/control-flow short circuits; does not
    /// implement three-valued logic itself (see `grafito_query::evaluator`).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) | Value::LocalTime(t) => write!(f, "{t}"),
            Value::DateTime(dt) | Value::LocalDateTime(dt) => write!(f, "{dt}"),
            Value::Duration(d) => write!(f, "P{}M{}DT{}.{:09}S", d.months, d.days, d.seconds, d.nanos),
            Value::Point(p) => write!(f, "point({{x: {}, y: {}}})", p.x, p.y),
        }
    }
}

/// Value equality: used by `DISTINCT`, `ORDER BY` grouping, and the `=`
/// operator's non-null-propagating base case. `null == null` is handled by
/// the evaluator's three-valued logic, not here — this is plain data equality
/// used for deduplication and hashing, where null must equal null.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Int(a), Float(b)) | (Float(b), Int(a)) => OrderedFloat(*a as f64) == OrderedFloat(*b),
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) | (LocalTime(a), LocalTime(b)) => a == b,
            (DateTime(a), DateTime(b)) | (LocalDateTime(a), LocalDateTime(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Point(a), Point(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

/// Total order used by `ORDER BY`. Cross-type comparisons follow Cypher's
/// documented type ranking: numbers < strings < booleans < lists < maps <
/// nodes/paths, with `null` sorted last regardless of direction (callers
/// negate the comparator for DESC, not the null placement).
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 9,
                Value::Int(_) | Value::Float(_) => 0,
                Value::String(_) => 1,
                Value::Bool(_) => 2,
                Value::List(_) => 3,
                Value::Map(_) => 4,
                Value::Date(_) => 5,
                Value::Time(_) | Value::LocalTime(_) => 5,
                Value::DateTime(_) | Value::LocalDateTime(_) => 5,
                Value::Duration(_) => 6,
                Value::Point(_) => 7,
            }
        }
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (Int(a), Float(b)) => OrderedFloat(*a as f64).cmp(&OrderedFloat(*b)),
            (Float(a), Int(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b as f64)),
            (String(a), String(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) | (LocalTime(a), LocalTime(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) | (LocalDateTime(a), LocalDateTime(b)) => a.cmp(b),
            (Duration(a), Duration(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            _ => rank(self).cmp(&rank(other)),
        }
    }
}
