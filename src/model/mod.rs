//! Asset data model
//!
//! Assets as the catalog returns them: a reserved set of underscore-prefixed
//! keys (`_id`, `_type`, `_name`, `_context`, `_url`) plus arbitrary
//! properties. Relationship properties arrive either as a plain array of
//! asset references (transfer files) or as a paged `{items, paging}` object
//! (live search results).

pub mod types;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{PagedResults, Paging};
use crate::error::{CatalogError, Result};

/// One ancestor in an asset's containment chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(rename = "_type")]
    pub asset_type: String,

    #[serde(rename = "_name")]
    pub name: String,

    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    #[serde(rename = "_url", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContextEntry {
    pub fn new(asset_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            asset_type: asset_type.into(),
            name: name.into(),
            rid: None,
            url: None,
        }
    }

    /// Drop the environment-specific keys
    pub fn minified(&self) -> Self {
        Self::new(self.asset_type.clone(), self.name.clone())
    }
}

/// Anything that has a type, a name and an ordered ancestor chain
pub trait Identifiable {
    fn asset_type(&self) -> &str;
    fn name(&self) -> &str;
    /// Ancestors, outermost first
    fn context(&self) -> &[ContextEntry];
}

/// Lightweight reference to an asset, as found inside relationship lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    #[serde(rename = "_type")]
    pub asset_type: String,

    #[serde(rename = "_name")]
    pub name: String,

    #[serde(rename = "_context", default)]
    pub context: Vec<ContextEntry>,
}

impl AssetRef {
    pub fn new(asset_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rid: None,
            asset_type: asset_type.into(),
            name: name.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<ContextEntry>) -> Self {
        self.context = context;
        self
    }

    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    /// Parse a reference out of a relationship list element
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl Identifiable for AssetRef {
    fn asset_type(&self) -> &str {
        &self.asset_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn context(&self) -> &[ContextEntry] {
        &self.context
    }
}

/// A full asset: identity keys plus every other property it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    #[serde(rename = "_type")]
    pub asset_type: String,

    #[serde(rename = "_name")]
    pub name: String,

    #[serde(rename = "_context", default)]
    pub context: Vec<ContextEntry>,

    #[serde(rename = "_url", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Asset {
    pub fn new(asset_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rid: None,
            asset_type: asset_type.into(),
            name: name.into(),
            context: Vec::new(),
            url: None,
            properties: Map::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// RID, or a lookup error naming the asset
    pub fn require_rid(&self) -> Result<&str> {
        self.rid.as_deref().ok_or_else(|| {
            CatalogError::NotFound(format!("no _id on {} '{}'", self.asset_type, self.name))
        })
    }

    pub fn reference(&self) -> AssetRef {
        AssetRef {
            rid: self.rid.clone(),
            asset_type: self.asset_type.clone(),
            name: self.name.clone(),
            context: self.context.clone(),
        }
    }

    /// Names of non-reserved properties, in document order
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .keys()
            .map(String::as_str)
            .filter(|k| !k.starts_with('_'))
    }

    /// First page of a relationship property, whichever shape it arrived in
    pub fn relationship_page(&self, property: &str) -> Result<PagedResults> {
        match self.properties.get(property) {
            None | Some(Value::Null) => Ok(PagedResults::default()),
            Some(Value::Array(items)) => Ok(PagedResults {
                paging: Paging {
                    num_total: items.len(),
                    ..Paging::default()
                },
                items: items.clone(),
            }),
            Some(value @ Value::Object(_)) => Ok(serde_json::from_value(value.clone())?),
            Some(other) => Err(CatalogError::Structural(format!(
                "property '{}' of {} '{}' is not a relationship: {}",
                property, self.asset_type, self.name, other
            ))),
        }
    }

    /// Relationship members from a plain array (transfer file shape)
    pub fn relationships(&self, property: &str) -> Result<Vec<AssetRef>> {
        self.relationship_page(property)?
            .items
            .iter()
            .map(AssetRef::from_value)
            .collect()
    }

    /// First element of `workflow_current_state`, which the catalog returns as a list
    pub fn workflow_state(&self) -> Option<&str> {
        match self.properties.get("workflow_current_state")? {
            Value::Array(states) => states.first().and_then(Value::as_str),
            Value::String(state) => Some(state.as_str()),
            _ => None,
        }
    }
}

impl Identifiable for Asset {
    fn asset_type(&self) -> &str {
        &self.asset_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn context(&self) -> &[ContextEntry] {
        &self.context
    }
}

impl From<AssetRef> for Asset {
    fn from(reference: AssetRef) -> Self {
        Self {
            rid: reference.rid,
            asset_type: reference.asset_type,
            name: reference.name,
            context: reference.context,
            url: None,
            properties: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_search_result() {
        let asset = Asset::from_value(json!({
            "_id": "6662c0f2.e1b1ec6c.001mts4qn.7n14hmm.vcqq7g.vt4tjqrdpk3j9u3b6e3lp",
            "_type": "term",
            "_name": "Customer",
            "_url": "https://host/ibm/iis/igc-rest/v1/assets/x",
            "_context": [{"_type": "category", "_name": "Party", "_id": "c1"}],
            "short_description": "A party we sell to",
            "workflow_current_state": ["DRAFT"]
        }))
        .unwrap();

        assert_eq!(asset.asset_type, "term");
        assert_eq!(asset.context[0].name, "Party");
        assert_eq!(asset.workflow_state(), Some("DRAFT"));
        assert_eq!(
            asset.property_names().collect::<Vec<_>>(),
            vec!["short_description", "workflow_current_state"]
        );
    }

    #[test]
    fn test_relationship_shapes() {
        let paged = Asset::from_value(json!({
            "_type": "term", "_name": "A",
            "assigned_assets": {
                "items": [{"_type": "database_column", "_name": "ID", "_id": "r1"}],
                "paging": {"numTotal": 3, "next": "https://host/next"}
            }
        }))
        .unwrap();
        let page = paged.relationship_page("assigned_assets").unwrap();
        assert_eq!(page.paging.num_total, 3);
        assert_eq!(page.paging.next.as_deref(), Some("https://host/next"));

        let plain = Asset::from_value(json!({
            "_type": "term", "_name": "A",
            "assigned_assets": [{"_type": "database_column", "_name": "ID", "_context": []}]
        }))
        .unwrap();
        let refs = plain.relationships("assigned_assets").unwrap();
        assert_eq!(refs[0].name, "ID");
        assert!(plain.relationships("missing").unwrap().is_empty());
    }

    #[test]
    fn test_scalar_is_not_a_relationship() {
        let asset = Asset::from_value(json!({"_type": "term", "_name": "A", "short_description": "x"}))
            .unwrap();
        assert!(asset.relationships("short_description").is_err());
    }
}
