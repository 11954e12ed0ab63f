//! Filter compilation.
//!
//! Filters are lowered to a plain JSON tree by a [`FilterVisitor`] and then
//! serialized with two null expansions applied:
//!
//! 1. Any object below the root whose `not` key is exactly `null` becomes
//!    `{"$notnull":null}`.
//! 2. Any `null` that is not the operand of `$null`/`$notnull` becomes
//!    `{"$null":null}`.
//!
//! At the root `not` is an ordinary field name, so `{"not":null}` compiles
//! to `{"not":{"$null":null}}`. Key order is kept as inserted.

use crate::filter::{
    ComparisonExpr, DataFilter, DelegationFilter, FieldFilter, FieldOperand, HighOrderFilter,
};
use serde_json::{Map, Value};

/// Walks a filter tree.
pub trait FilterVisitor {
    type Output;

    fn visit_delegation(&mut self, filter: &DelegationFilter) -> Self::Output;
    fn visit_comparison(&mut self, expr: &ComparisonExpr) -> Self::Output;
    fn visit_high_order(&mut self, filter: &HighOrderFilter) -> Self::Output;

    fn visit(&mut self, filter: &DataFilter) -> Self::Output {
        match filter {
            DataFilter::Delegation(f) => self.visit_delegation(f),
            DataFilter::HighOrder(f) => self.visit_high_order(f),
        }
    }
}

/// Lowers a filter to the JSON the service reads, before null expansion.
#[derive(Debug, Default)]
pub struct JsonEmitter;

impl JsonEmitter {
    fn field(&mut self, condition: &FieldFilter) -> Value {
        match condition {
            FieldFilter::Value(value) => value.clone(),
            FieldFilter::Comparison(expr) => self.visit_comparison(expr),
            FieldFilter::HighOrder(op, operands) => {
                let items = operands
                    .iter()
                    .map(|operand| match operand {
                        FieldOperand::Comparison(expr) => self.visit_comparison(expr),
                        FieldOperand::Delegation(f) => self.visit_delegation(f),
                    })
                    .collect();
                let mut map = Map::new();
                map.insert(op.as_str().to_string(), Value::Array(items));
                Value::Object(map)
            }
        }
    }
}

impl FilterVisitor for JsonEmitter {
    type Output = Value;

    fn visit_delegation(&mut self, filter: &DelegationFilter) -> Value {
        let map = filter
            .fields()
            .map(|(name, condition)| (name.to_string(), self.field(condition)))
            .collect();
        Value::Object(map)
    }

    fn visit_comparison(&mut self, expr: &ComparisonExpr) -> Value {
        let map = expr
            .ops()
            .iter()
            .map(|op| (op.key().to_string(), op.operand()))
            .collect();
        Value::Object(map)
    }

    fn visit_high_order(&mut self, filter: &HighOrderFilter) -> Value {
        let items = filter.operands().iter().map(|f| self.visit(f)).collect();
        let mut map = Map::new();
        map.insert(filter.operator().as_str().to_string(), Value::Array(items));
        Value::Object(map)
    }
}

/// Where a value sits relative to its parent.
#[derive(Clone, Copy)]
enum Position<'a> {
    Root,
    Key(&'a str),
    Index,
}

/// Applies the `$null`/`$notnull` expansions to a JSON tree.
pub fn expand_null_operators(value: &Value) -> Value {
    expand(value, Position::Root)
}

fn expand(value: &Value, position: Position<'_>) -> Value {
    let replaced = match (position, value) {
        (Position::Root, _) => None,
        (_, Value::Object(map)) if map.get("not").is_some_and(Value::is_null) => {
            Some(operator("$notnull"))
        }
        _ => None,
    };
    let replaced = replaced.or_else(|| match (position, value) {
        (Position::Key("$null" | "$notnull"), Value::Null) => None,
        (_, Value::Null) => Some(operator("$null")),
        _ => None,
    });

    // Replacements are walked like any other value.
    let value = replaced.as_ref().unwrap_or(value);
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, Position::Key(k))))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| expand(v, Position::Index)).collect())
        }
        other => other.clone(),
    }
}

fn operator(name: &str) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), Value::Null);
    Value::Object(map)
}

/// Serializes an arbitrary JSON predicate with the null expansions applied.
pub fn stringify(value: &Value) -> String {
    expand_null_operators(value).to_string()
}

/// Compiles a filter into the `q` query parameter value.
pub fn compile(filter: &DataFilter) -> String {
    stringify(&JsonEmitter.visit(filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{BinaryOperator, Comparison};
    use serde_json::json;

    fn compile_json(value: Value) -> String {
        compile(&DataFilter::from_json(value).unwrap())
    }

    #[test]
    fn test_field_null_becomes_null_operator() {
        assert_eq!(
            compile_json(json!({ "maybe": null })),
            r#"{"maybe":{"$null":null}}"#
        );
    }

    #[test]
    fn test_not_null_shorthand() {
        assert_eq!(
            compile_json(json!({ "maybe": { "not": null } })),
            r#"{"maybe":{"$notnull":null}}"#
        );
    }

    #[test]
    fn test_field_named_not() {
        assert_eq!(
            compile_json(json!({ "not": null })),
            r#"{"not":{"$null":null}}"#
        );
        assert_eq!(
            compile_json(json!({ "not": { "not": null } })),
            r#"{"not":{"$notnull":null}}"#
        );
    }

    #[test]
    fn test_explicit_operators_are_untouched() {
        assert_eq!(
            compile_json(json!({ "a": { "$null": null }, "b": { "$notnull": null } })),
            r#"{"a":{"$null":null},"b":{"$notnull":null}}"#
        );
    }

    #[test]
    fn test_between_open_bound() {
        let filter: DataFilter = DelegationFilter::new()
            .field("n", Comparison::between(None, Some(json!(5))).unwrap())
            .into();
        assert_eq!(compile(&filter), r#"{"n":{"$between":[{"$null":null},5]}}"#);
    }

    #[test]
    fn test_high_order_nesting() {
        let filter = DataFilter::or([
            DelegationFilter::new().eq("a", 1).into(),
            DataFilter::and([
                DelegationFilter::new().is_null("b").into(),
                DelegationFilter::new().is_not_null("c").into(),
            ]),
        ]);
        assert_eq!(
            compile(&filter),
            r#"{"$or":[{"a":1},{"$and":[{"b":{"$null":null}},{"c":{"$notnull":null}}]}]}"#
        );
    }

    #[test]
    fn test_field_level_high_order() {
        let filter: DataFilter = DelegationFilter::new()
            .field(
                "age",
                FieldFilter::HighOrder(
                    BinaryOperator::And,
                    vec![
                        Comparison::Gte(json!(18)).into(),
                        Comparison::Lt(json!(65)).into(),
                    ],
                ),
            )
            .into();
        assert_eq!(
            compile(&filter),
            r#"{"age":{"$and":[{"$gte":18},{"$lt":65}]}}"#
        );
    }

    #[test]
    fn test_root_null_is_expanded() {
        assert_eq!(stringify(&Value::Null), r#"{"$null":null}"#);
    }

    #[test]
    fn test_key_order_is_preserved() {
        assert_eq!(
            compile_json(json!({ "z": 1, "a": { "$lt": 3, "$gt": 1 }, "m": "x" })),
            r#"{"z":1,"a":{"$lt":3,"$gt":1},"m":"x"}"#
        );
    }
}
