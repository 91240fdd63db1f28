//! Field selection for structured responses.
//!
//! A route may declare which response fields a client can ask for with
//! `?fields=id,name`. The router resolves the request against that declaration and
//! stores the outcome as a [`FieldSelector`] in the request extensions, where
//! handlers can receive it as a parameter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Route-level declaration of selectable fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldSelection {
    /// Query parameter carrying the comma separated list.
    pub param: String,
    /// Fields used when the request names none (empty = everything).
    pub default: Vec<String>,
    /// Fields a client may request (empty = anything).
    pub allowed: Vec<String>,
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self {
            param: "fields".to_string(),
            default: Vec::new(),
            allowed: Vec::new(),
        }
    }
}

impl FieldSelection {
    /// Resolves the selector for a raw query string.
    pub fn select(&self, query: Option<&str>) -> FieldSelector {
        let requested: Vec<String> = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .filter(|(k, _)| k == &self.param)
                    .flat_map(|(_, v)| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|f| !f.is_empty())
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .filter(|f| self.allowed.is_empty() || self.allowed.contains(f))
                    .collect()
            })
            .unwrap_or_default();

        if requested.is_empty() {
            FieldSelector::new(self.default.clone())
        } else {
            FieldSelector::new(requested)
        }
    }
}

/// Request-scoped set of selected fields. An empty selector keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    fields: Vec<String>,
}

impl FieldSelector {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|f| f == field)
    }

    /// Drops unselected keys from an object, or from every object of an array.
    pub fn apply(&self, value: Value) -> Value {
        if self.fields.is_empty() {
            return value;
        }
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(k, _)| self.contains(k))
                    .collect::<Map<_, _>>(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.apply(v)).collect()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selection() -> FieldSelection {
        FieldSelection {
            default: vec!["id".into()],
            allowed: vec!["id".into(), "name".into(), "email".into()],
            ..Default::default()
        }
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(selection().select(None).fields(), ["id"]);
        assert_eq!(selection().select(Some("page=2")).fields(), ["id"]);
    }

    #[test]
    fn filters_disallowed_fields() {
        let sel = selection().select(Some("fields=name,%20password,email"));
        assert_eq!(sel.fields(), ["name", "email"]);
    }

    #[test]
    fn applies_to_arrays_of_objects() {
        let sel = FieldSelector::new(vec!["id".into()]);
        let out = sel.apply(json!([{ "id": 1, "name": "a" }, { "id": 2, "name": "b" }]));
        assert_eq!(out, json!([{ "id": 1 }, { "id": 2 }]));
    }
}
