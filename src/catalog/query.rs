//! Search query model
//!
//! Serializes to the JSON body the catalog's search endpoint accepts:
//! `{"properties": [...], "types": [...], "where": {...}, "pageSize": n}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a leaf condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "isNull")]
    IsNull,
}

/// How the conditions of a group combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Join {
    #[default]
    And,
    Or,
}

/// A single property comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub property: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negated: bool,
}

/// A leaf comparison or a nested group of conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Group { conditions: Vec<Condition>, operator: Join },
    Leaf(Predicate),
}

impl Condition {
    fn leaf(property: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        Condition::Leaf(Predicate {
            property: property.into(),
            operator,
            value,
            min: None,
            max: None,
            negated: false,
        })
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(property, Operator::Eq, Some(value.into()))
    }

    pub fn is_in<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        Self::leaf(property, Operator::In, Some(Value::Array(values)))
    }

    pub fn between(property: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Condition::Leaf(Predicate {
            property: property.into(),
            operator: Operator::Between,
            value: None,
            min: Some(min.into()),
            max: Some(max.into()),
            negated: false,
        })
    }

    pub fn is_null(property: impl Into<String>) -> Self {
        Self::leaf(property, Operator::IsNull, None)
    }

    pub fn not_null(property: impl Into<String>) -> Self {
        Self::is_null(property).negate()
    }

    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            conditions,
            operator: Join::Or,
        }
    }

    pub fn all_of(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            conditions,
            operator: Join::And,
        }
    }

    /// Flip a leaf's `negated` flag; groups are returned unchanged
    pub fn negate(mut self) -> Self {
        if let Condition::Leaf(ref mut p) = self {
            p.negated = !p.negated;
        }
        self
    }
}

/// Top-level `where` clause
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Where {
    pub conditions: Vec<Condition>,
    pub operator: Join,
}

/// A search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub properties: Vec<String>,
    pub types: Vec<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Where>,
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: usize,
    #[serde(rename = "workflowMode", default, skip_serializing_if = "Option::is_none")]
    pub workflow_mode: Option<String>,
}

fn default_page_size() -> usize {
    100
}

impl Query {
    pub fn new<'a>(types: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            properties: Vec::new(),
            types: types.into_iter().map(str::to_string).collect(),
            where_clause: None,
            page_size: default_page_size(),
            workflow_mode: None,
        }
    }

    pub fn properties<'a>(mut self, properties: impl IntoIterator<Item = &'a str>) -> Self {
        for property in properties {
            if !self.properties.iter().any(|p| p == property) {
                self.properties.push(property.to_string());
            }
        }
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Query the workflow (draft) copies instead of published assets
    pub fn draft(mut self) -> Self {
        self.workflow_mode = Some("draft".to_string());
        self
    }

    pub fn is_draft(&self) -> bool {
        self.workflow_mode.as_deref() == Some("draft")
    }

    /// Add one condition to the top-level clause, creating an AND clause if absent
    pub fn condition(mut self, condition: Condition) -> Self {
        self.where_clause
            .get_or_insert_with(Where::default)
            .conditions
            .push(condition);
        self
    }

    pub fn all_of(self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        conditions.into_iter().fold(self, Query::condition)
    }

    /// Nest caller-supplied conditions as a single group joined by `join`
    pub fn nested(self, conditions: Vec<Condition>, join: Join) -> Self {
        if conditions.is_empty() {
            return self;
        }
        self.condition(Condition::Group {
            conditions,
            operator: join,
        })
    }

    pub fn has_conditions(&self) -> bool {
        self.where_clause
            .as_ref()
            .is_some_and(|w| !w.conditions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_wire_shape() {
        let q = Query::new(["term"])
            .properties(["name", "workflow_current_state", "name"])
            .page_size(50)
            .draft()
            .condition(Condition::not_null("workflow_current_state"));

        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({
                "properties": ["name", "workflow_current_state"],
                "types": ["term"],
                "where": {
                    "conditions": [
                        {"property": "workflow_current_state", "operator": "isNull", "negated": true}
                    ],
                    "operator": "and"
                },
                "pageSize": 50,
                "workflowMode": "draft"
            })
        );
    }

    #[test]
    fn test_nested_groups_parse() {
        let parsed: Condition = serde_json::from_value(json!({
            "conditions": [
                {"property": "modified_on", "operator": "between", "min": 1, "max": 2},
                {"property": "name", "operator": "=", "value": "x"}
            ],
            "operator": "or"
        }))
        .unwrap();
        match parsed {
            Condition::Group { conditions, operator } => {
                assert_eq!(operator, Join::Or);
                assert_eq!(conditions.len(), 2);
            }
            Condition::Leaf(_) => panic!("expected a group"),
        }
    }

    #[test]
    fn test_empty_nested_is_ignored() {
        let q = Query::new(["term"]).nested(Vec::new(), Join::Or);
        assert!(!q.has_conditions());
        assert!(serde_json::to_value(&q).unwrap().get("where").is_none());
    }
}
