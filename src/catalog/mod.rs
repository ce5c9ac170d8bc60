//! Catalog backend abstraction
//!
//! [`CatalogBackend`] is the seam between the promotion logic and a live
//! catalog. [`RestCatalog`] talks to the REST API; [`InMemoryCatalog`]
//! evaluates the same queries over local JSON and counts every call, which
//! is what the tests drive.

pub mod memory;
pub mod query;
pub mod rest;
pub mod session;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::workflow::WorkflowAction;

pub use memory::InMemoryCatalog;
pub use query::{Condition, Join, Operator, Predicate, Query, Where};
pub use rest::RestCatalog;
pub use session::{AuditLog, CatalogSession, DocumentRecord, UpdateRecord, WorkflowRecord};

/// Paging block attached to every result list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(rename = "numTotal", default)]
    pub num_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(rename = "pageSize", default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagedResults {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Append,
    Replace,
}

/// New value for one relationship property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDelta {
    pub items: Vec<String>,
    pub mode: UpdateMode,
}

/// Body of an asset update: property name to relationship delta
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateDelta(pub BTreeMap<String, RelationshipDelta>);

impl UpdateDelta {
    pub fn relationship(property: impl Into<String>, items: Vec<String>, mode: UpdateMode) -> Self {
        let mut delta = BTreeMap::new();
        delta.insert(property.into(), RelationshipDelta { items, mode });
        Self(delta)
    }
}

/// Status and body returned by an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub status: u16,
    pub body: Value,
}

impl UpdateResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Display names of a type and its editable properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub display_name: String,
    /// Property name to display name
    pub properties: BTreeMap<String, String>,
}

impl TypeDefinition {
    /// Display name for a property, falling back to the raw name
    pub fn display_property<'a>(&'a self, property: &'a str) -> &'a str {
        self.properties
            .get(property)
            .map(String::as_str)
            .unwrap_or(property)
    }
}

/// Whether a quality project document creates a new project or updates one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectSubmit {
    Create,
    Update,
}

impl ProjectSubmit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectSubmit::Create => "create",
            ProjectSubmit::Update => "update",
        }
    }
}

/// Blocking-in-spirit calls against one catalog environment.
///
/// Callers await each call before issuing the next; nothing in the crate
/// runs two calls against the same backend concurrently.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// First page of results for a query
    async fn search(&self, query: &Query) -> Result<PagedResults>;

    /// Follow a continuation link from a previous page
    async fn fetch_page(&self, next: &str) -> Result<PagedResults>;

    /// Apply a relationship delta to an asset.
    ///
    /// Rejections come back as a non-200 [`UpdateResponse`]; only transport
    /// failures are errors.
    async fn update(&self, rid: &str, delta: &UpdateDelta) -> Result<UpdateResponse>;

    /// Run a workflow action over a batch of RIDs, returning whether it succeeded
    async fn take_workflow_action(
        &self,
        rids: &[String],
        action: WorkflowAction,
        comment: &str,
    ) -> Result<bool>;

    async fn type_definition(&self, asset_type: &str) -> Result<TypeDefinition>;

    /// Definition archive of an asset bundle
    async fn download_bundle(&self, bundle: &str) -> Result<Vec<u8>>;

    /// Every instance of a bundle's classes as one flow document
    async fn bundle_assets(&self, bundle: &str) -> Result<String>;

    /// Create or update bundle instances from a flow document, returning
    /// each uploaded bundle ID with the RID it was stored under
    async fn upload_bundle_assets(&self, xml: &str) -> Result<BTreeMap<String, String>>;

    /// Document listing every data quality project
    async fn quality_projects(&self) -> Result<String>;

    /// Full export of one data quality project
    async fn quality_project(&self, name: &str) -> Result<String>;

    /// Send a project document to the create or update endpoint
    async fn submit_quality_project(&self, xml: &str, submit: ProjectSubmit) -> Result<UpdateResponse>;

    async fn logout(&self) -> Result<()>;
}
