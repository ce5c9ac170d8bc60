use serde::Serialize;
use serde_json::Value;

use super::RelationshipFile;
use crate::cache::ContextCache;
use crate::catalog::{CatalogSession, Condition, Query};
use crate::error::{CatalogError, Result};
use crate::model::{AssetRef, ContextEntry};

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub asset_type: String,
    pub relationships: Vec<String>,
    pub conditions: Vec<Condition>,
    /// `modified_on` window in epoch milliseconds
    pub window: Option<(i64, i64)>,
    /// Only keep related assets of these types; empty keeps all
    pub limit: Vec<String>,
    pub batch: usize,
}

impl ExtractRequest {
    pub fn new(asset_type: impl Into<String>, relationships: Vec<String>) -> Self {
        Self {
            asset_type: asset_type.into(),
            relationships,
            conditions: Vec::new(),
            window: None,
            limit: Vec::new(),
            batch: 100,
        }
    }

    pub fn query(&self) -> Query {
        let mut query = Query::new([self.asset_type.as_str()])
            .properties(self.relationships.iter().map(String::as_str))
            .page_size(self.batch)
            .all_of(self.conditions.iter().cloned());
        if let Some((from, to)) = self.window {
            query = query.condition(Condition::between("modified_on", from, to));
        }
        query
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub asset_count: usize,
    pub relationship_count: usize,
}

fn minified(context: &[ContextEntry]) -> Vec<ContextEntry> {
    context.iter().map(ContextEntry::minified).collect()
}

/// Pull the requested relationships of every matching asset, with each
/// related asset's context attached so it can be resolved elsewhere
pub async fn extract_relationships(
    session: &mut CatalogSession,
    cache: &mut ContextCache,
    request: &ExtractRequest,
) -> Result<(RelationshipFile, ExtractSummary)> {
    let mut summary = ExtractSummary::default();
    let mut assets = session.search_all(&request.query()).await?;
    summary.asset_count = assets.len();

    for asset in &mut assets {
        asset.rid = None;
        asset.url = None;
        asset.context = minified(&asset.context);

        for property in &request.relationships {
            let first = asset.relationship_page(property)?;
            let mut related = Vec::new();
            for member in session.remaining_pages(first).await? {
                let reference = AssetRef::from_value(&member)?;
                if !request.limit.is_empty() && !request.limit.contains(&reference.asset_type) {
                    continue;
                }
                let rid = reference.rid.as_deref().ok_or_else(|| {
                    CatalogError::NotFound(format!("related {} '{}' has no _id", reference.asset_type, reference.name))
                })?;
                let context = cache
                    .context_for_rid(session, &reference.asset_type, rid)
                    .await?
                    .ok_or_else(|| {
                        CatalogError::NotFound(format!(
                            "context of {} '{}' ({})",
                            reference.asset_type, reference.name, rid
                        ))
                    })?;
                let portable = AssetRef::new(reference.asset_type.clone(), reference.name.clone())
                    .with_context(minified(&context));
                related.push(serde_json::to_value(&portable)?);
                summary.relationship_count += 1;
            }
            asset.properties.insert(property.clone(), Value::Array(related));
        }
    }

    tracing::info!(
        asset_type = %request.asset_type,
        assets = summary.asset_count,
        relationships = summary.relationship_count,
        "extracted relationships"
    );
    Ok((RelationshipFile::new(assets), summary))
}
