//! Asset values CSV
//!
//! Renders a transfer file as the sectioned CSV accepted by the catalog's
//! asset value import: one section per asset type, headed by display names,
//! with every context name mapped into the target environment.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use super::{members, RelationshipFile};
use crate::catalog::CatalogSession;
use crate::error::{CatalogError, Result};
use crate::mapping::{MappingProperty, MappingSet};
use crate::model::{AssetRef, ContextEntry};

const HOST_ENGINE: &str = "Host (Engine)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValuesExport {
    pub asset_count: usize,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

fn mapped_name(mappings: &MappingSet, entry: &ContextEntry) -> String {
    mappings.map_value(&entry.asset_type, MappingProperty::Name, &entry.name)
}

fn relation_cell(mappings: &MappingSet, related: &[Value]) -> Result<String> {
    if related.is_empty() {
        return Ok(String::new());
    }
    let mut rendered = Vec::with_capacity(related.len());
    for member in related {
        let reference = AssetRef::from_value(member)?;
        let mut path: Vec<String> = reference.context.iter().map(|c| mapped_name(mappings, c)).collect();
        path.push(reference.name);
        rendered.push(format!("\"{}\"", path.join(">>")));
    }
    Ok(format!("[{}]", rendered.join(";")))
}

fn header_index(header: &mut Vec<String>, column: &str) -> usize {
    match header.iter().position(|h| h == column) {
        Some(i) => i,
        None => {
            header.push(column.to_string());
            header.len() - 1
        }
    }
}

/// Render `file` as asset values CSV; an empty file renders nothing
pub async fn export_asset_values_csv(
    session: &mut CatalogSession,
    file: &RelationshipFile,
    mappings: &MappingSet,
) -> Result<ValuesExport> {
    let mut export = ValuesExport::default();
    let Some(first) = file.assets.first() else {
        return Ok(export);
    };
    let definition = session.property_map(&first.asset_type).await?;

    let mut header = vec!["Name".to_string()];
    let mut rows: Vec<HashMap<usize, String>> = Vec::new();
    for asset in &file.assets {
        let mut row = HashMap::new();
        row.insert(0, asset.name.clone());
        for entry in &asset.context {
            let mut column = session.property_map(&entry.asset_type).await?.display_name;
            if column == HOST_ENGINE {
                column = "Host".to_string();
            }
            row.insert(header_index(&mut header, &column), mapped_name(mappings, entry));
        }
        for (property, value) in asset.properties.iter().filter(|(k, _)| !k.starts_with('_')) {
            let column = definition.display_property(property).to_string();
            let cell = match value {
                Value::Array(_) => relation_cell(mappings, members(value))?,
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            row.insert(header_index(&mut header, &column), cell);
        }
        rows.push(row);
        export.asset_count += 1;
    }

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&header)?;
    for row in &rows {
        writer.write_record((0..header.len()).map(|i| row.get(&i).map(String::as_str).unwrap_or("")))?;
    }
    let table = writer.into_inner().map_err(|e| CatalogError::Io(e.into_error()))?;

    let mut contents = format!("+++ {} - begin +++\n", definition.display_name).into_bytes();
    contents.extend(table);
    contents.extend(format!("+++ {} - end +++\n\n", definition.display_name).into_bytes());
    export.contents = contents;
    tracing::info!(assets = export.asset_count, "rendered asset values");
    Ok(export)
}
