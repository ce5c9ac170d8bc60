//! # Catalog Promote
//!
//! Moves governed metadata between catalog environments (development,
//! test, production) without relying on internal identifiers, which differ
//! per environment.
//!
//! ## Features
//!
//! - **Identity mapping**: assets are matched across environments by type,
//!   name and ancestor chain, rewritten through regex mapping rules
//! - **Context cache**: targeted lookups that switch to one bulk load per type
//! - **Relationship reconciliation**: append, replace-all and selective replace
//! - **Workflow progression**: minimal action chains toward a final action
//! - **Export pruning**: glossary, custom attribute, quality, bundle and
//!   lineage documents filtered down to a kept set
//! - **Document exchange**: bundle and quality project download and upload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_promote::{CatalogSession, ConnectionConfig, RestCatalog};
//! use catalog_promote::workflow::{progress, ProgressionRequest, StartState, WorkflowAction, WorkflowTable};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = RestCatalog::new(ConnectionConfig::from_env()?)?;
//!     let mut session = CatalogSession::new(Arc::new(backend));
//!     let request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Publish);
//!     let run = progress(&mut session, &WorkflowTable::default(), &request).await?;
//!     println!("{} actions taken", run.report.actions.len());
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod changes;
pub mod compare;
pub mod config;
pub mod error;
pub mod exchange;
pub mod mapping;
pub mod model;
pub mod output;
pub mod reconcile;
pub mod transfer;
pub mod tree;
pub mod workflow;

// Re-export main types for library consumers
pub use cache::{CacheSettings, ContextCache};
pub use catalog::{AuditLog, CatalogBackend, CatalogSession, Condition, InMemoryCatalog, Query, RestCatalog};
pub use config::{ConnectionConfig, PromoteConfig};
pub use error::{with_retry, CatalogError, ErrorCategory, Result, RetryPolicy};
pub use mapping::{IdentityResolver, MappedIdentity, MappingRule, MappingSet};
pub use model::{Asset, AssetRef, ContextEntry};
pub use reconcile::{ReconcileMode, ReconcileRequest, RelationshipReconciler};
pub use transfer::RelationshipFile;
pub use tree::XmlTree;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
