//! Relationship Reconciler
//!
//! Splices a list of target RIDs into one relationship property of one
//! asset, issuing at most one update per call.
//!
//! - `APPEND` adds to whatever is already there; nothing to add is a no-op.
//! - `REPLACE_ALL` overwrites the property, even with an empty list.
//! - `REPLACE_SOME` removes only the current members of `replace_type` that
//!   satisfy the extra conditions, then adds the new RIDs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{CatalogSession, Condition, Query, UpdateDelta, UpdateMode, UpdateResponse};
use crate::error::{CatalogError, Result};
use crate::model::{Asset, AssetRef};
use crate::workflow::{WorkflowAction, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileMode {
    Append,
    ReplaceAll,
    ReplaceSome,
}

impl FromStr for ReconcileMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "APPEND" => Ok(ReconcileMode::Append),
            "REPLACE_ALL" => Ok(ReconcileMode::ReplaceAll),
            "REPLACE_SOME" => Ok(ReconcileMode::ReplaceSome),
            other => Err(CatalogError::Config(format!("unknown reconcile mode '{}'", other))),
        }
    }
}

/// What to splice where
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    pub asset: &'a Asset,
    pub property: &'a str,
    pub to_rids: &'a [String],
    pub mode: ReconcileMode,
    /// Only for `REPLACE_SOME`: the member type eligible for removal
    pub replace_type: Option<&'a str>,
    /// Only for `REPLACE_SOME`: further narrows which members are removed
    pub conditions: &'a [Condition],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub status: u16,
    pub message: Value,
    /// Whether an update call was issued
    pub updated: bool,
}

impl ReconcileOutcome {
    fn unchanged(message: &str) -> Self {
        Self {
            status: 200,
            message: Value::String(message.to_string()),
            updated: false,
        }
    }

    fn from_response(response: UpdateResponse) -> Self {
        Self {
            status: response.status,
            message: response.body,
            updated: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub struct RelationshipReconciler<'s> {
    session: &'s mut CatalogSession,
    page_size: usize,
    gate_workflow: bool,
}

impl<'s> RelationshipReconciler<'s> {
    pub fn new(session: &'s mut CatalogSession) -> Self {
        Self {
            session,
            page_size: 100,
            gate_workflow: false,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Return workflow assets to DRAFT before writing to them
    pub fn gate_workflow(mut self, gate: bool) -> Self {
        self.gate_workflow = gate;
        self
    }

    pub async fn reconcile(&mut self, request: &ReconcileRequest<'_>) -> Result<ReconcileOutcome> {
        let rid = request.asset.require_rid()?;
        let plan = match request.mode {
            ReconcileMode::Append => {
                if request.to_rids.is_empty() {
                    return Ok(ReconcileOutcome::unchanged("No relationships to add"));
                }
                (request.to_rids.to_vec(), UpdateMode::Append)
            }
            ReconcileMode::ReplaceAll => (request.to_rids.to_vec(), UpdateMode::Replace),
            ReconcileMode::ReplaceSome => match self.narrow(request, rid).await? {
                Some(plan) => plan,
                None => return Ok(ReconcileOutcome::unchanged("No relationships to change")),
            },
        };

        if self.gate_workflow {
            self.ensure_editable(request.asset).await?;
        }

        let (items, mode) = plan;
        let delta = UpdateDelta::relationship(request.property, items, mode);
        let response = self.session.update(rid, &delta).await?;
        if !response.is_success() {
            tracing::warn!(rid, status = response.status, "relationship update rejected");
        }
        Ok(ReconcileOutcome::from_response(response))
    }

    /// Decide the single update a `REPLACE_SOME` needs, if any
    async fn narrow(
        &mut self,
        request: &ReconcileRequest<'_>,
        rid: &str,
    ) -> Result<Option<(Vec<String>, UpdateMode)>> {
        let replace_type = request.replace_type.ok_or_else(|| {
            CatalogError::Config("REPLACE_SOME needs the type of relationships to replace".into())
        })?;

        let current = self.current_members(request.asset, request.property, rid).await?;
        let candidates: Vec<&str> = current
            .iter()
            .filter(|m| m.asset_type == replace_type)
            .filter_map(|m| m.rid.as_deref())
            .collect();

        let mut matched: Vec<String> = Vec::new();
        if !candidates.is_empty() {
            let query = Query::new([replace_type])
                .properties(["name"])
                .page_size(self.page_size)
                .all_of(request.conditions.iter().cloned())
                .condition(Condition::is_in("_id", candidates.iter().copied()));
            matched = self
                .session
                .search_all(&query)
                .await?
                .into_iter()
                .filter_map(|a| a.rid)
                .collect();
        }

        if matched.is_empty() {
            return Ok((!request.to_rids.is_empty())
                .then(|| (request.to_rids.to_vec(), UpdateMode::Append)));
        }

        let mut items: Vec<String> = current
            .iter()
            .filter_map(|m| m.rid.clone())
            .filter(|r| !matched.contains(r))
            .collect();
        for new_rid in request.to_rids {
            if !items.contains(new_rid) {
                items.push(new_rid.clone());
            }
        }
        Ok(Some((items, UpdateMode::Replace)))
    }

    /// Every current member of the property, following all pages
    async fn current_members(&mut self, asset: &Asset, property: &str, rid: &str) -> Result<Vec<AssetRef>> {
        let query = Query::new([asset.asset_type.as_str()])
            .properties([property])
            .page_size(self.page_size)
            .condition(Condition::eq("_id", rid));
        let found = self.session.search_all(&query).await?;
        let live = found.into_iter().next().ok_or_else(|| {
            CatalogError::NotFound(format!("{} '{}' ({})", asset.asset_type, asset.name, rid))
        })?;
        let first = live.relationship_page(property)?;
        self.session
            .remaining_pages(first)
            .await?
            .iter()
            .map(AssetRef::from_value)
            .collect()
    }

    /// Walk a workflow asset back to DRAFT, or fail with a permission error
    async fn ensure_editable(&mut self, asset: &Asset) -> Result<()> {
        if !self.session.is_workflow_type(&asset.asset_type) {
            return Ok(());
        }
        let rid = asset.require_rid()?.to_string();
        let query = Query::new([asset.asset_type.as_str()])
            .properties(["name", "workflow_current_state"])
            .page_size(2)
            .draft()
            .condition(Condition::eq("_id", rid.as_str()));

        // At most two returns separate APPROVED from DRAFT
        for _ in 0..3 {
            let drafts = self.session.search_all(&query).await?;
            let state = drafts
                .first()
                .and_then(Asset::workflow_state)
                .map(str::parse::<WorkflowState>)
                .transpose()?;
            match state {
                None | Some(WorkflowState::Draft) => return Ok(()),
                Some(state) => {
                    tracing::info!(rid = %rid, state = %state, "returning asset to draft before update");
                    let rids = vec![rid.clone()];
                    let returned = self
                        .session
                        .take_workflow_action(&rids, WorkflowAction::Return, "")
                        .await?;
                    if !returned {
                        return Err(CatalogError::Permission {
                            asset: rid,
                            message: format!("could not return from {} to DRAFT", state),
                        });
                    }
                }
            }
        }
        Err(CatalogError::Permission {
            asset: rid,
            message: "asset did not reach DRAFT".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!("replace_some".parse::<ReconcileMode>().unwrap(), ReconcileMode::ReplaceSome);
        assert_eq!("APPEND".parse::<ReconcileMode>().unwrap(), ReconcileMode::Append);
        assert_eq!("replace-all".parse::<ReconcileMode>().unwrap(), ReconcileMode::ReplaceAll);
        assert!("merge".parse::<ReconcileMode>().is_err());
    }
}
