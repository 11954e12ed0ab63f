//! Field projection for the `f` query parameter.

use crate::error::{json_type_name, CoreError, CoreResult};
use indexmap::IndexMap;
use serde_json::Value;

/// A leaf toggle or a nested level of a boolean field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldToggle {
    Bool(bool),
    Nested(IndexMap<String, FieldToggle>),
}

impl From<bool> for FieldToggle {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// The `select` option of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// Dot-notation paths to include.
    Paths(Vec<String>),
    /// Nested boolean map.
    Map(IndexMap<String, FieldToggle>),
}

impl FieldSelection {
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Paths(paths.into_iter().map(Into::into).collect())
    }

    /// Parses a path array or a nested boolean map.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(CoreError::InvalidSelection(format!(
                        "field paths must be strings, found {}",
                        json_type_name(other)
                    ))),
                })
                .collect::<CoreResult<Vec<_>>>()
                .map(Self::Paths),
            Value::Object(_) => parse_toggles(value).map(Self::Map),
            other => Err(CoreError::InvalidSelection(format!(
                "expected an array or an object, found {}",
                json_type_name(other)
            ))),
        }
    }

    /// Splits the selection into include and exclude paths.
    pub fn project(&self) -> Projection {
        match self {
            Self::Paths(paths) => Projection {
                include: paths.clone(),
                exclude: Vec::new(),
            },
            Self::Map(map) => {
                let mut projection = Projection::default();
                walk(map, "", &mut projection);
                projection
            }
        }
    }
}

fn parse_toggles(value: &Value) -> CoreResult<IndexMap<String, FieldToggle>> {
    let Value::Object(map) = value else {
        return Err(CoreError::InvalidSelection(format!(
            "expected an object, found {}",
            json_type_name(value)
        )));
    };
    map.iter()
        .map(|(key, value)| {
            let toggle = match value {
                Value::Bool(b) => FieldToggle::Bool(*b),
                Value::Object(_) => FieldToggle::Nested(parse_toggles(value)?),
                other => {
                    return Err(CoreError::InvalidSelection(format!(
                        "\"{}\" must be a boolean or an object, found {}",
                        key,
                        json_type_name(other)
                    )))
                }
            };
            Ok((key.clone(), toggle))
        })
        .collect()
}

fn walk(map: &IndexMap<String, FieldToggle>, prefix: &str, out: &mut Projection) {
    for (key, toggle) in map {
        let path = format!("{}{}", prefix, key);
        match toggle {
            FieldToggle::Bool(true) => out.include.push(path),
            FieldToggle::Bool(false) => out.exclude.push(path),
            FieldToggle::Nested(nested) => walk(nested, &format!("{}.", path), out),
        }
    }
}

/// Include and exclude path lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Projection {
    /// Renders the `f` parameter. Includes win over excludes.
    pub fn to_query_value(&self) -> Option<String> {
        if !self.include.is_empty() {
            Some(self.include.join(","))
        } else if !self.exclude.is_empty() {
            Some(format!("!{}", self.exclude.join(",!")))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_map_matches_paths() {
        let map = FieldSelection::from_json(&json!({
            "id": true,
            "address": { "city": true, "geo": { "lat": true } }
        }))
        .unwrap();
        let paths = FieldSelection::paths(["id", "address.city", "address.geo.lat"]);

        assert_eq!(map.project(), paths.project());
        assert_eq!(
            map.project().to_query_value().as_deref(),
            Some("id,address.city,address.geo.lat")
        );
    }

    #[test]
    fn test_excludes() {
        let selection = FieldSelection::from_json(&json!({
            "secret": false,
            "nested": { "hidden": false }
        }))
        .unwrap();
        let projection = selection.project();
        assert!(projection.include.is_empty());
        assert_eq!(
            projection.to_query_value().as_deref(),
            Some("!secret,!nested.hidden")
        );
    }

    #[test]
    fn test_includes_take_priority() {
        let selection = FieldSelection::from_json(&json!({ "a": true, "b": false })).unwrap();
        let projection = selection.project();
        assert_eq!(projection.exclude, vec!["b".to_string()]);
        assert_eq!(projection.to_query_value().as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_selection() {
        assert_eq!(FieldSelection::paths(Vec::<String>::new()).project().to_query_value(), None);
    }

    #[test]
    fn test_invalid_selection() {
        assert!(FieldSelection::from_json(&json!("id")).is_err());
        assert!(FieldSelection::from_json(&json!([1])).is_err());
        assert!(FieldSelection::from_json(&json!({ "a": 1 })).is_err());
    }
}
