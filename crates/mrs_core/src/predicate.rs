//! Request predicates.
//!
//! A [`RequestPredicate`] merges a filter with ordering, the `$asof`
//! consistency token and cursor pagination into the single `q` object a
//! read or delete request carries.

use crate::compile::{stringify, FilterVisitor, JsonEmitter};
use crate::filter::DataFilter;
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Sort direction for `$orderby`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
    AscNumeric,
    DescNumeric,
}

impl SortOrder {
    /// Returns the wire value.
    pub fn to_value(self) -> Value {
        match self {
            Self::Asc => Value::from("ASC"),
            Self::Desc => Value::from("DESC"),
            Self::AscNumeric => Value::from(1),
            Self::DescNumeric => Value::from(-1),
        }
    }

    /// Parses `ASC`, `DESC`, `1` or `-1`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s.eq_ignore_ascii_case("asc") => Some(Self::Asc),
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Some(Self::Desc),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(Self::AscNumeric),
                Some(-1) => Some(Self::DescNumeric),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Serialize for SortOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SortOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid sort order {}", value)))
    }
}

/// Column to direction, in priority order.
pub type OrderBy = IndexMap<String, SortOrder>;

/// Column to last seen value, for cursor pagination.
pub type Cursor = IndexMap<String, Value>;

/// The `q` object of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPredicate {
    object: Option<Map<String, Value>>,
    has_cursor: bool,
}

impl RequestPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a filter. A high-order filter keeps its `$and`/`$or` key
    /// at the top level and ordering is appended beside it.
    pub fn from_filter(filter: Option<&DataFilter>) -> Self {
        let object = filter.and_then(|f| match JsonEmitter.visit(f) {
            Value::Object(map) => Some(map),
            _ => None,
        });
        Self {
            object,
            has_cursor: false,
        }
    }

    /// Starts from raw predicate JSON, for callers that already hold one.
    pub fn from_json(object: Map<String, Value>) -> Self {
        Self {
            object: Some(object),
            has_cursor: false,
        }
    }

    fn object_mut(&mut self) -> &mut Map<String, Value> {
        self.object.get_or_insert_with(Map::new)
    }

    /// Adds `$orderby`. An empty map adds nothing.
    pub fn with_order_by(mut self, order_by: Option<&OrderBy>) -> Self {
        if let Some(order_by) = order_by.filter(|o| !o.is_empty()) {
            let order: Map<String, Value> = order_by
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect();
            self.object_mut()
                .insert("$orderby".to_string(), Value::Object(order));
        }
        self
    }

    /// Adds `$asof` when a GTID is given.
    pub fn with_as_of(mut self, gtid: Option<&str>) -> Self {
        if let Some(gtid) = gtid {
            self.object_mut()
                .insert("$asof".to_string(), Value::from(gtid));
        }
        self
    }

    /// Adds `{field: {"$gt": value}}` per cursor field and forces the field
    /// into `$orderby` ascending.
    pub fn with_cursor(mut self, cursor: Option<&Cursor>) -> Self {
        let Some(cursor) = cursor.filter(|c| !c.is_empty()) else {
            return self;
        };
        self.has_cursor = true;

        let object = self.object_mut();
        for (field, last) in cursor {
            let mut gt = Map::new();
            gt.insert("$gt".to_string(), last.clone());
            object.insert(field.clone(), Value::Object(gt));

            let order = object
                .entry("$orderby")
                .or_insert_with(|| Value::Object(Map::new()));
            if !order.is_object() {
                *order = Value::Object(Map::new());
            }
            if let Value::Object(order) = order {
                order.insert(field.clone(), SortOrder::Asc.to_value());
            }
        }
        self
    }

    /// Whether cursor pagination is in effect. Offsets are not sent then.
    pub fn has_cursor(&self) -> bool {
        self.has_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.object.is_none()
    }

    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        self.object.as_ref()
    }

    /// Serializes the predicate, or `None` when there is nothing to send.
    pub fn compile(&self) -> Option<String> {
        self.object
            .as_ref()
            .map(|object| stringify(&Value::Object(object.clone())))
    }
}
