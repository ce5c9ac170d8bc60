//! Per-run catalog session
//!
//! Wraps a backend with paging, memoized type definitions and an audit
//! log of every query, update and workflow action issued during the run.
//! Reads go through a [`RetryPolicy`]; updates and workflow actions are
//! never retried.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::{CatalogBackend, PagedResults, ProjectSubmit, Query, TypeDefinition, UpdateDelta, UpdateResponse};
use crate::error::{with_retry, Result, RetryPolicy};
use crate::model::types::{is_workflow_type, WORKFLOW_TYPES};
use crate::model::Asset;
use crate::workflow::WorkflowAction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRecord {
    pub rid: String,
    pub value: UpdateDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowRecord {
    pub items: Vec<String>,
    pub action: WorkflowAction,
}

/// A document sent to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub kind: String,
    pub name: String,
}

/// Everything the run asked the catalog to do
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditLog {
    pub queries: Vec<Query>,
    pub updates: Vec<UpdateRecord>,
    pub workflow_actions: Vec<WorkflowRecord>,
    pub workflow_failed: Vec<WorkflowRecord>,
    pub documents: Vec<DocumentRecord>,
}

pub struct CatalogSession {
    backend: Arc<dyn CatalogBackend>,
    audit: AuditLog,
    type_definitions: HashMap<String, TypeDefinition>,
    workflow_enabled: Option<bool>,
    retry: RetryPolicy,
}

impl CatalogSession {
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self {
            backend,
            audit: AuditLog::default(),
            type_definitions: HashMap::new(),
            workflow_enabled: None,
            retry: RetryPolicy::no_retry(),
        }
    }

    /// Retry failed reads according to `policy`
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// First page only
    pub async fn search_page(&mut self, query: &Query) -> Result<PagedResults> {
        tracing::debug!(types = ?query.types, draft = query.is_draft(), "search");
        self.audit.queries.push(query.clone());
        let backend = &self.backend;
        with_retry(&self.retry, move || backend.search(query)).await
    }

    /// Every page of a query, parsed into assets
    pub async fn search_all(&mut self, query: &Query) -> Result<Vec<Asset>> {
        let first = self.search_page(query).await?;
        self.remaining_pages(first)
            .await?
            .into_iter()
            .map(Asset::from_value)
            .collect()
    }

    /// Follow continuation links until none is left or a page comes back
    /// empty. A follow-up page that fails ends paging with what was gathered.
    pub async fn remaining_pages(&mut self, first: PagedResults) -> Result<Vec<Value>> {
        let mut items = first.items;
        let mut next = first.paging.next;
        while let Some(link) = next {
            let (backend, target) = (&self.backend, link.as_str());
            let page = match with_retry(&self.retry, move || backend.fetch_page(target)).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(link = %link, error = %e, gathered = items.len(), "paging stopped early");
                    break;
                }
            };
            if page.items.is_empty() {
                break;
            }
            items.extend(page.items);
            next = page.paging.next;
        }
        Ok(items)
    }

    /// Issue an update; it is logged before the call so failures stay visible
    pub async fn update(&mut self, rid: &str, delta: &UpdateDelta) -> Result<UpdateResponse> {
        tracing::debug!(rid, ?delta, "update");
        self.audit.updates.push(UpdateRecord {
            rid: rid.to_string(),
            value: delta.clone(),
        });
        self.backend.update(rid, delta).await
    }

    pub async fn take_workflow_action(
        &mut self,
        rids: &[String],
        action: WorkflowAction,
        comment: &str,
    ) -> Result<bool> {
        let record = WorkflowRecord {
            items: rids.to_vec(),
            action,
        };
        tracing::info!(action = %action, assets = rids.len(), "workflow action");
        match self.backend.take_workflow_action(rids, action, comment).await {
            Ok(true) => {
                self.audit.workflow_actions.push(record);
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!(action = %action, assets = rids.len(), "workflow action rejected");
                self.audit.workflow_failed.push(record);
                Ok(false)
            }
            Err(e) => {
                self.audit.workflow_failed.push(record);
                Err(e)
            }
        }
    }

    /// Display names for a type, fetched once per run
    pub async fn property_map(&mut self, asset_type: &str) -> Result<TypeDefinition> {
        if let Some(definition) = self.type_definitions.get(asset_type) {
            return Ok(definition.clone());
        }
        let backend = &self.backend;
        let definition = with_retry(&self.retry, move || backend.type_definition(asset_type)).await?;
        self.type_definitions
            .insert(asset_type.to_string(), definition.clone());
        Ok(definition)
    }

    pub async fn download_bundle(&mut self, bundle: &str) -> Result<Vec<u8>> {
        tracing::debug!(bundle, "download bundle");
        let backend = &self.backend;
        with_retry(&self.retry, move || backend.download_bundle(bundle)).await
    }

    pub async fn bundle_assets(&mut self, bundle: &str) -> Result<String> {
        tracing::debug!(bundle, "download bundle assets");
        let backend = &self.backend;
        with_retry(&self.retry, move || backend.bundle_assets(bundle)).await
    }

    pub async fn upload_bundle_assets(&mut self, xml: &str, asset_count: usize) -> Result<BTreeMap<String, String>> {
        tracing::info!(assets = asset_count, "upload bundle assets");
        self.audit.documents.push(DocumentRecord {
            kind: "bundle_assets".into(),
            name: format!("{} assets", asset_count),
        });
        self.backend.upload_bundle_assets(xml).await
    }

    pub async fn quality_projects(&mut self) -> Result<String> {
        let backend = &self.backend;
        with_retry(&self.retry, move || backend.quality_projects()).await
    }

    pub async fn quality_project(&mut self, name: &str) -> Result<String> {
        tracing::debug!(project = name, "download quality project");
        let backend = &self.backend;
        with_retry(&self.retry, move || backend.quality_project(name)).await
    }

    pub async fn submit_quality_project(
        &mut self,
        name: &str,
        xml: &str,
        submit: ProjectSubmit,
    ) -> Result<UpdateResponse> {
        tracing::info!(project = name, submit = submit.as_str(), "submit quality project");
        self.audit.documents.push(DocumentRecord {
            kind: format!("quality_project_{}", submit.as_str()),
            name: name.to_string(),
        });
        self.backend.submit_quality_project(xml, submit).await
    }

    pub fn is_workflow_type(&self, asset_type: &str) -> bool {
        is_workflow_type(asset_type)
    }

    /// Whether the environment has any workflow copies at all
    pub async fn is_workflow_enabled(&mut self) -> Result<bool> {
        if let Some(enabled) = self.workflow_enabled {
            return Ok(enabled);
        }
        let draft_query = Query::new(WORKFLOW_TYPES.iter().copied())
            .properties(["name"])
            .page_size(1)
            .draft();
        let page = self.search_page(&draft_query).await?;
        let enabled = page.paging.num_total > 0 || !page.items.is_empty();
        self.workflow_enabled = Some(enabled);
        Ok(enabled)
    }

    /// End the remote session; the audit log is handed back to the caller
    pub async fn close(self) -> Result<AuditLog> {
        self.backend.logout().await?;
        Ok(self.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::error::CatalogError;
    use serde_json::json;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new().with_asset(json!({
            "_id": "t1", "_type": "term", "_name": "Customer",
            "_context": [{"_type": "category", "_name": "Party"}],
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_retry_through_unavailable_catalog() {
        let backend = Arc::new(catalog().unavailable_searches(2));
        let mut session = CatalogSession::new(backend.clone()).with_retry_policy(RetryPolicy::default());

        let assets = session.search_all(&Query::new(["term"])).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(backend.calls().searches, 3);
        assert_eq!(session.audit().queries.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_fail_fast_without_policy() {
        let backend = Arc::new(catalog().unavailable_searches(1));
        let mut session = CatalogSession::new(backend.clone());

        let err = session.search_all(&Query::new(["term"])).await.unwrap_err();
        assert!(matches!(err, CatalogError::Backend { status: 503, .. }));
        assert_eq!(backend.calls().searches, 1);
    }
}
