use serde::Serialize;

use super::RelationshipFile;
use crate::cache::ContextCache;
use crate::catalog::{CatalogSession, Condition};
use crate::error::{CatalogError, Result};
use crate::mapping::{identity_of, MappingSet};
use crate::model::Identifiable;
use crate::reconcile::{ReconcileMode, ReconcileRequest, RelationshipReconciler};

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub asset_type: String,
    pub relationship: String,
    pub mode: ReconcileMode,
    pub replace_type: Option<String>,
    pub conditions: Vec<Condition>,
    pub batch: usize,
    /// Return workflow assets to DRAFT before updating them
    pub gate_workflow: bool,
}

impl LoadRequest {
    pub fn new(asset_type: impl Into<String>, relationship: impl Into<String>, mode: ReconcileMode) -> Self {
        Self {
            asset_type: asset_type.into(),
            relationship: relationship.into(),
            mode,
            replace_type: None,
            conditions: Vec::new(),
            batch: 100,
            gate_workflow: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub changed: bool,
    pub asset_update_count: usize,
    pub relationship_update_count: usize,
}

fn unresolved<T: Identifiable + ?Sized>(what: &str, asset: &T) -> CatalogError {
    CatalogError::NotFound(format!(
        "{} {} '{}' has no counterpart",
        what,
        asset.asset_type(),
        identity_of(asset)
    ))
}

/// Apply one relationship property from a transfer file to the target
/// environment, asset by asset
pub async fn load_relationships(
    session: &mut CatalogSession,
    cache: &mut ContextCache,
    mappings: &MappingSet,
    file: &RelationshipFile,
    request: &LoadRequest,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();

    for asset in file.of_type(&request.asset_type) {
        let target = cache
            .mapped_asset(session, mappings, asset, request.gate_workflow)
            .await?
            .ok_or_else(|| unresolved("asset", asset))?;

        let mut to_rids = Vec::new();
        for related in asset.relationships(&request.relationship)? {
            let counterpart = cache
                .mapped_asset(session, mappings, &related, false)
                .await?
                .ok_or_else(|| unresolved("related asset", &related))?;
            to_rids.push(counterpart.require_rid()?.to_string());
        }

        let outcome = RelationshipReconciler::new(session)
            .page_size(request.batch)
            .gate_workflow(request.gate_workflow)
            .reconcile(&ReconcileRequest {
                asset: &target,
                property: &request.relationship,
                to_rids: &to_rids,
                mode: request.mode,
                replace_type: request.replace_type.as_deref(),
                conditions: &request.conditions,
            })
            .await?;
        if !outcome.is_success() {
            return Err(CatalogError::backend(outcome.status, outcome.message));
        }
        summary.changed |= outcome.updated;
        summary.asset_update_count += 1;
        summary.relationship_update_count += to_rids.len();
    }

    tracing::info!(
        asset_type = %request.asset_type,
        relationship = %request.relationship,
        assets = summary.asset_update_count,
        "loaded relationships"
    );
    Ok(summary)
}
