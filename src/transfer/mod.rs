//! Relationship transfer files
//!
//! A transfer file is a JSON array of assets stripped of their
//! environment-specific keys. Relationship properties are plain arrays of
//! asset references, each carrying its own context so it can be resolved
//! again in another environment.

pub mod extract;
pub mod load;
pub mod merge;
pub mod values;

pub use extract::{extract_relationships, ExtractRequest, ExtractSummary};
pub use load::{load_relationships, LoadRequest, LoadSummary};
pub use merge::merge_relationship_files;
pub use values::{export_asset_values_csv, ValuesExport};

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CatalogError, Result};
use crate::model::Asset;
use crate::output::write_if_changed;

const CUSTOM_PREFIX: &str = "custom_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipFile {
    pub assets: Vec<Asset>,
}

impl RelationshipFile {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self { assets }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Err(CatalogError::Config(format!("{} is a directory", path.display())));
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Write the file, returning whether its content changed
    pub fn save(&self, path: &Path) -> Result<bool> {
        write_if_changed(path, self.to_json()?.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn of_type<'a>(&'a self, asset_type: &'a str) -> impl Iterator<Item = &'a Asset> + 'a {
        self.assets.iter().filter(move |a| a.asset_type == asset_type)
    }
}

/// How the properties of a transfer file break down
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelationshipCheck {
    pub asset_types: Vec<String>,
    /// Native relationships never holding more than one member
    pub native_simple_relations: Vec<String>,
    pub native_multi_relations: Vec<String>,
    pub native_attributes: Vec<String>,
    pub custom_relations: Vec<String>,
    pub custom_attributes: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Classify every property in `file`, in order of first appearance
pub fn check_relationships(file: &RelationshipFile) -> RelationshipCheck {
    let mut check = RelationshipCheck::default();
    let mut native_relations: Vec<String> = Vec::new();
    let mut widest: HashMap<String, usize> = HashMap::new();

    for asset in &file.assets {
        push_unique(&mut check.asset_types, &asset.asset_type);
        for (property, value) in asset.properties.iter().filter(|(k, _)| !k.starts_with('_')) {
            let relation = value.as_array();
            match (property.starts_with(CUSTOM_PREFIX), relation) {
                (true, Some(_)) => push_unique(&mut check.custom_relations, property),
                (true, None) => push_unique(&mut check.custom_attributes, property),
                (false, Some(members)) => {
                    push_unique(&mut native_relations, property);
                    let width = widest.entry(property.clone()).or_insert(0);
                    *width = (*width).max(members.len());
                }
                (false, None) => push_unique(&mut check.native_attributes, property),
            }
        }
    }

    for property in native_relations {
        if widest.get(&property).copied().unwrap_or(0) <= 1 {
            check.native_simple_relations.push(property);
        } else {
            check.native_multi_relations.push(property);
        }
    }
    check
}

/// Relationship members of a property as stored in a transfer file
pub(crate) fn members(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}
