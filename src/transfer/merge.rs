use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::{members, RelationshipFile};
use crate::error::Result;
use crate::mapping::{IdentityResolver, MappingSet};
use crate::model::{Asset, AssetRef};

fn key(asset_type: &str, identity: &str) -> String {
    format!("{}|{}", asset_type, identity)
}

/// Union several transfer files into one.
///
/// Assets are matched by mapped identity and written in their mapped form.
/// Relationship lists are unioned without duplicates; scalar properties
/// take the value from the last file that sets them.
pub fn merge_relationship_files(files: &[RelationshipFile], mappings: &MappingSet) -> Result<RelationshipFile> {
    let resolver = IdentityResolver::new(mappings);
    let mut merged: Vec<Asset> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut seen: HashMap<(usize, String), HashSet<String>> = HashMap::new();

    for asset in files.iter().flat_map(|f| f.assets.iter()) {
        let mapped = resolver.resolve(asset);
        let slot = *positions
            .entry(key(&mapped.asset_type, &mapped.identity))
            .or_insert_with(|| {
                merged.push(Asset::from(mapped.to_ref()));
                merged.len() - 1
            });

        for (property, value) in asset.properties.iter().filter(|(k, _)| !k.starts_with('_')) {
            if !value.is_array() {
                merged[slot].properties.insert(property.clone(), value.clone());
                continue;
            }
            let known = seen.entry((slot, property.clone())).or_default();
            let target = merged[slot]
                .properties
                .entry(property.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            for member in members(value) {
                let related = resolver.resolve(&AssetRef::from_value(member)?);
                if known.insert(key(&related.asset_type, &related.identity)) {
                    if let Value::Array(list) = target {
                        list.push(serde_json::to_value(related.to_ref())?);
                    }
                }
            }
        }
    }

    tracing::info!(files = files.len(), assets = merged.len(), "merged relationship files");
    Ok(RelationshipFile::new(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingProperty, MappingRule};
    use serde_json::json;

    fn file(value: Value) -> RelationshipFile {
        RelationshipFile::parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_union_by_mapped_identity() {
        let mappings = MappingSet::compile(&[MappingRule {
            asset_type: "host".into(),
            property: MappingProperty::Name,
            from: "DEV".into(),
            to: "PROD".into(),
        }])
        .unwrap();

        let first = file(json!([{
            "_type": "term", "_name": "Customer", "_context": [{"_type": "category", "_name": "Party"}],
            "short_description": "old",
            "assigned_assets": [
                {"_type": "database_table", "_name": "CUST",
                 "_context": [{"_type": "host", "_name": "DEVHOST"}, {"_type": "database", "_name": "CRM"}, {"_type": "database_schema", "_name": "S"}]}
            ]
        }]));
        let second = file(json!([{
            "_type": "term", "_name": "Customer", "_context": [{"_type": "category", "_name": "Party"}],
            "short_description": "new",
            "assigned_assets": [
                {"_type": "database_table", "_name": "CUST",
                 "_context": [{"_type": "host", "_name": "PRODHOST"}, {"_type": "database", "_name": "CRM"}, {"_type": "database_schema", "_name": "S"}]},
                {"_type": "database_table", "_name": "ORDERS",
                 "_context": [{"_type": "host", "_name": "PRODHOST"}, {"_type": "database", "_name": "CRM"}, {"_type": "database_schema", "_name": "S"}]}
            ]
        }, {
            "_type": "term", "_name": "Client", "_context": [{"_type": "category", "_name": "Party"}]
        }]));

        let merged = merge_relationship_files(&[first, second], &mappings).unwrap();
        assert_eq!(merged.len(), 2);
        let customer = &merged.assets[0];
        assert_eq!(customer.properties["short_description"], json!("new"));
        let related = customer.relationships("assigned_assets").unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].context[0].name, "PRODHOST");
    }
}
