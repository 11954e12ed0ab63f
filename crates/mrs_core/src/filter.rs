//! Structured filter expressions.
//!
//! A filter is a closed set of shapes:
//!
//! - [`DelegationFilter`]: `{ field: value }` or `{ field: { $op: value } }`
//! - [`ComparisonExpr`]: one or more operators applied to a single field
//! - [`HighOrderFilter`]: `{ $and: [...] }` / `{ $or: [...] }`
//!
//! Filters are usually authored with the builder methods, but can also be
//! parsed from the JSON shape the service understands.
//!
//! # Example
//!
//! ```
//! use mrs_core::filter::{Comparison, DataFilter, DelegationFilter};
//!
//! let filter: DataFilter = DelegationFilter::new()
//!     .field("str", Comparison::Like("%foo%".into()))
//!     .into();
//!
//! assert_eq!(mrs_core::compile(&filter), r#"{"str":{"$like":"%foo%"}}"#);
//! ```

use crate::error::{json_type_name, CoreError, CoreResult};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Logical operators that combine several filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    And,
    Or,
}

impl BinaryOperator {
    /// Returns the wire name of the operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$and" => Some(Self::And),
            "$or" => Some(Self::Or),
            _ => None,
        }
    }
}

/// A top-level filter.
#[derive(Debug, Clone, PartialEq)]
pub enum DataFilter {
    Delegation(DelegationFilter),
    HighOrder(HighOrderFilter),
}

impl DataFilter {
    /// Combines filters so that all of them must match.
    pub fn and(filters: impl IntoIterator<Item = DataFilter>) -> Self {
        Self::HighOrder(HighOrderFilter::new(BinaryOperator::And, filters))
    }

    /// Combines filters so that any of them may match.
    pub fn or(filters: impl IntoIterator<Item = DataFilter>) -> Self {
        Self::HighOrder(HighOrderFilter::new(BinaryOperator::Or, filters))
    }

    /// Parses a filter from its JSON representation.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        Self::try_from(value)
    }
}

impl From<DelegationFilter> for DataFilter {
    fn from(filter: DelegationFilter) -> Self {
        Self::Delegation(filter)
    }
}

impl From<HighOrderFilter> for DataFilter {
    fn from(filter: HighOrderFilter) -> Self {
        Self::HighOrder(filter)
    }
}

/// Conditions keyed by field name. Field order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationFilter {
    fields: IndexMap<String, FieldFilter>,
}

impl DelegationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition for a field. A later condition on the same field
    /// replaces the earlier one but keeps its position.
    pub fn field(mut self, name: impl Into<String>, condition: impl Into<FieldFilter>) -> Self {
        self.fields.insert(name.into(), condition.into());
        self
    }

    /// Implicit equality: `{ name: value }`.
    pub fn eq(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(name, FieldFilter::Value(value.into()))
    }

    /// `{ name: null }`, sent as `$null`.
    pub fn is_null(self, name: impl Into<String>) -> Self {
        self.field(name, FieldFilter::Value(Value::Null))
    }

    /// `{ name: { not: null } }`, sent as `$notnull`.
    pub fn is_not_null(self, name: impl Into<String>) -> Self {
        self.field(name, Comparison::NotNullShorthand)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldFilter)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&FieldFilter> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The condition attached to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// Implicit equality against a literal. `null` means "is null".
    Value(Value),
    /// Explicit operators.
    Comparison(ComparisonExpr),
    /// `{ field: { $and | $or: [...] } }`.
    HighOrder(BinaryOperator, Vec<FieldOperand>),
}

impl From<Value> for FieldFilter {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<ComparisonExpr> for FieldFilter {
    fn from(expr: ComparisonExpr) -> Self {
        Self::Comparison(expr)
    }
}

impl From<Comparison> for FieldFilter {
    fn from(op: Comparison) -> Self {
        Self::Comparison(op.into())
    }
}

/// Operands of a field-level `$and`/`$or`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperand {
    Comparison(ComparisonExpr),
    Delegation(DelegationFilter),
}

impl From<Comparison> for FieldOperand {
    fn from(op: Comparison) -> Self {
        Self::Comparison(op.into())
    }
}

impl From<ComparisonExpr> for FieldOperand {
    fn from(expr: ComparisonExpr) -> Self {
        Self::Comparison(expr)
    }
}

impl From<DelegationFilter> for FieldOperand {
    fn from(filter: DelegationFilter) -> Self {
        Self::Delegation(filter)
    }
}

/// A single comparison operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Like(String),
    Instr(String),
    NotInstr(String),
    Null,
    NotNull,
    Between(Between),
    /// `{ not: null }`, expanded to `$notnull` on serialization.
    NotNullShorthand,
}

impl Comparison {
    /// Returns the key this operator is written under.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
            Self::Like(_) => "$like",
            Self::Instr(_) => "$instr",
            Self::NotInstr(_) => "$ninstr",
            Self::Null => "$null",
            Self::NotNull => "$notnull",
            Self::Between(_) => "$between",
            Self::NotNullShorthand => "not",
        }
    }

    /// Builds a `$between` operator. See [`Between::new`].
    pub fn between(lower: Option<Value>, upper: Option<Value>) -> CoreResult<Self> {
        Between::new(lower, upper).map(Self::Between)
    }

    /// Returns the operand as it is written on the wire.
    pub fn operand(&self) -> Value {
        match self {
            Self::Eq(v) | Self::Ne(v) | Self::Gt(v) | Self::Gte(v) | Self::Lt(v) | Self::Lte(v) => {
                v.clone()
            }
            Self::Like(s) | Self::Instr(s) | Self::NotInstr(s) => Value::String(s.clone()),
            Self::Null | Self::NotNull | Self::NotNullShorthand => Value::Null,
            Self::Between(range) => range.to_value(),
        }
    }

    fn parse(key: &str, value: Value) -> CoreResult<Self> {
        let op = match key {
            "$eq" => Self::Eq(value),
            "$ne" => Self::Ne(value),
            "$gt" => Self::Gt(value),
            "$gte" => Self::Gte(value),
            "$lt" => Self::Lt(value),
            "$lte" => Self::Lte(value),
            "$like" => Self::Like(expect_string(key, value)?),
            "$instr" => Self::Instr(expect_string(key, value)?),
            "$ninstr" => Self::NotInstr(expect_string(key, value)?),
            "$null" => Self::Null,
            "$notnull" => Self::NotNull,
            "$between" => Self::Between(Between::from_json(value)?),
            _ => {
                return Err(CoreError::UnknownOperator {
                    operator: key.to_string(),
                })
            }
        };
        Ok(op)
    }
}

fn expect_string(key: &str, value: Value) -> CoreResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(CoreError::InvalidFilter(format!(
            "{} expects a string, found {}",
            key,
            json_type_name(&other)
        ))),
    }
}

/// An ordered pair for `$between`.
///
/// A missing lower bound reads as "less or equal", a missing upper bound as
/// "greater or equal". At least one bound is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct Between {
    lower: Option<Value>,
    upper: Option<Value>,
}

impl Between {
    pub fn new(lower: Option<Value>, upper: Option<Value>) -> CoreResult<Self> {
        let lower = lower.filter(|v| !v.is_null());
        let upper = upper.filter(|v| !v.is_null());
        if lower.is_none() && upper.is_none() {
            return Err(CoreError::EmptyBetween);
        }
        Ok(Self { lower, upper })
    }

    pub fn lower(&self) -> Option<&Value> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Value> {
        self.upper.as_ref()
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            self.lower.clone().unwrap_or(Value::Null),
            self.upper.clone().unwrap_or(Value::Null),
        ])
    }

    fn from_json(value: Value) -> CoreResult<Self> {
        match value {
            Value::Array(mut pair) if pair.len() == 2 => {
                let upper = pair.pop();
                let lower = pair.pop();
                Self::new(lower, upper)
            }
            _ => Err(CoreError::MalformedBetween),
        }
    }
}

/// One or more operators applied to the same field, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonExpr {
    ops: Vec<Comparison>,
}

impl ComparisonExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds another operator. An operator of the same kind is replaced.
    pub fn with(mut self, op: Comparison) -> Self {
        if let Some(existing) = self.ops.iter_mut().find(|o| o.key() == op.key()) {
            *existing = op;
        } else {
            self.ops.push(op);
        }
        self
    }

    pub fn ops(&self) -> &[Comparison] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn from_object(map: Map<String, Value>) -> CoreResult<Self> {
        if map.get("not").is_some_and(Value::is_null) {
            return Ok(Comparison::NotNullShorthand.into());
        }
        map.into_iter()
            .try_fold(Self::new(), |expr, (key, value)| {
                Ok(expr.with(Comparison::parse(&key, value)?))
            })
    }
}

impl From<Comparison> for ComparisonExpr {
    fn from(op: Comparison) -> Self {
        Self { ops: vec![op] }
    }
}

/// `$and`/`$or` over nested filters.
#[derive(Debug, Clone, PartialEq)]
pub struct HighOrderFilter {
    operator: BinaryOperator,
    operands: Vec<DataFilter>,
}

impl HighOrderFilter {
    pub fn new(operator: BinaryOperator, operands: impl IntoIterator<Item = DataFilter>) -> Self {
        Self {
            operator,
            operands: operands.into_iter().collect(),
        }
    }

    pub fn operator(&self) -> BinaryOperator {
        self.operator
    }

    pub fn operands(&self) -> &[DataFilter] {
        &self.operands
    }
}

// ============================================================================
// JSON parsing
// ============================================================================

impl TryFrom<Value> for DataFilter {
    type Error = CoreError;

    fn try_from(value: Value) -> CoreResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(CoreError::NotAnObject(json_type_name(&other))),
        };

        if map.len() == 1 {
            if let Some(operator) = map.keys().next().and_then(|k| BinaryOperator::from_key(k)) {
                let operands = map
                    .into_iter()
                    .next()
                    .map(|(_, v)| v)
                    .unwrap_or(Value::Null);
                return parse_operands(operator, operands, DataFilter::try_from)
                    .map(|operands| DataFilter::HighOrder(HighOrderFilter::new(operator, operands)));
            }
        }

        DelegationFilter::try_from(map).map(DataFilter::Delegation)
    }
}

impl TryFrom<Map<String, Value>> for DelegationFilter {
    type Error = CoreError;

    fn try_from(map: Map<String, Value>) -> CoreResult<Self> {
        let mut filter = DelegationFilter::new();
        for (name, value) in map {
            if name.starts_with('$') {
                return Err(match BinaryOperator::from_key(&name) {
                    Some(_) => CoreError::InvalidFilter(format!(
                        "{} cannot be combined with field conditions",
                        name
                    )),
                    None => CoreError::UnknownOperator { operator: name },
                });
            }
            let condition = parse_field(value)?;
            filter.fields.insert(name, condition);
        }
        Ok(filter)
    }
}

fn parse_field(value: Value) -> CoreResult<FieldFilter> {
    let map = match value {
        Value::Object(map) => map,
        literal => return Ok(FieldFilter::Value(literal)),
    };

    if map.get("not").is_some_and(Value::is_null) {
        return Ok(Comparison::NotNullShorthand.into());
    }

    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        // A JSON column compared as a whole.
        return Ok(FieldFilter::Value(Value::Object(map)));
    }
    if operators != map.len() {
        return Err(CoreError::InvalidFilter(
            "operators and plain keys cannot be mixed in a field condition".into(),
        ));
    }

    if map.len() == 1 {
        if let Some(operator) = map.keys().next().and_then(|k| BinaryOperator::from_key(k)) {
            let operands = map
                .into_iter()
                .next()
                .map(|(_, v)| v)
                .unwrap_or(Value::Null);
            return parse_operands(operator, operands, parse_operand)
                .map(|operands| FieldFilter::HighOrder(operator, operands));
        }
    }

    ComparisonExpr::from_object(map).map(FieldFilter::Comparison)
}

fn parse_operand(value: Value) -> CoreResult<FieldOperand> {
    match value {
        Value::Object(map) if map.keys().all(|k| k.starts_with('$') || k == "not") => {
            ComparisonExpr::from_object(map).map(FieldOperand::Comparison)
        }
        Value::Object(map) => DelegationFilter::try_from(map).map(FieldOperand::Delegation),
        other => Err(CoreError::NotAnObject(json_type_name(&other))),
    }
}

fn parse_operands<T>(
    operator: BinaryOperator,
    value: Value,
    parse: impl Fn(Value) -> CoreResult<T>,
) -> CoreResult<Vec<T>> {
    match value {
        Value::Array(items) => items.into_iter().map(parse).collect(),
        other => Err(CoreError::InvalidFilter(format!(
            "{} expects an array, found {}",
            operator.as_str(),
            json_type_name(&other)
        ))),
    }
}
