//! Context Cache
//!
//! Per-run lookups of asset context (by RID) and of target-environment
//! counterparts (by mapped identity). Each asset type starts out answering
//! lookups with one targeted query each; once a type has been asked for
//! more than `threshold` times, every asset of that type is loaded in one
//! paged bulk query and all later lookups are answered from memory.
//! Nothing is invalidated during a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSession, Condition, Query};
use crate::error::Result;
use crate::mapping::{identity_of, IdentityResolver, MappingSet};
use crate::model::types::is_workflow_type;
use crate::model::{Asset, ContextEntry, Identifiable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Targeted lookups allowed per type before switching to a bulk load
    pub threshold: usize,
    /// Page size of bulk loads
    pub page_size: usize,
    /// With caching off every lookup is targeted
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            page_size: 100,
            enabled: true,
        }
    }
}

#[derive(Debug, Default)]
struct IdentityIndex {
    published: HashMap<String, Asset>,
    /// Loaded on the first bulk-mode lookup that asks for drafts
    draft: Option<HashMap<String, Asset>>,
}

#[derive(Debug, Default)]
pub struct ContextCache {
    settings: CacheSettings,
    rid_lookups: HashMap<String, usize>,
    identity_lookups: HashMap<String, usize>,
    by_rid: HashMap<String, HashMap<String, Vec<ContextEntry>>>,
    by_identity: HashMap<String, IdentityIndex>,
}

/// Count a lookup and report whether the type has crossed into bulk mode
fn crossed(counters: &mut HashMap<String, usize>, settings: &CacheSettings, asset_type: &str) -> bool {
    let count = counters.entry(asset_type.to_string()).or_insert(0);
    *count += 1;
    settings.enabled && *count > settings.threshold
}

impl ContextCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Whether `asset_type` has been bulk-loaded for RID lookups
    pub fn is_rid_cached(&self, asset_type: &str) -> bool {
        self.by_rid.contains_key(asset_type)
    }

    pub fn is_identity_cached(&self, asset_type: &str) -> bool {
        self.by_identity.contains_key(asset_type)
    }

    /// Context chain of the asset with `rid`, or `None` if it does not exist
    pub async fn context_for_rid(
        &mut self,
        session: &mut CatalogSession,
        asset_type: &str,
        rid: &str,
    ) -> Result<Option<Vec<ContextEntry>>> {
        if let Some(index) = self.by_rid.get(asset_type) {
            return Ok(index.get(rid).cloned());
        }

        if crossed(&mut self.rid_lookups, &self.settings, asset_type) {
            tracing::debug!(asset_type, "bulk loading contexts");
            let query = Query::new([asset_type])
                .properties(["name"])
                .page_size(self.settings.page_size);
            let mut index = HashMap::new();
            for asset in session.search_all(&query).await? {
                if let Some(id) = asset.rid {
                    index.insert(id, asset.context);
                }
            }
            let found = index.get(rid).cloned();
            self.by_rid.insert(asset_type.to_string(), index);
            return Ok(found);
        }

        let query = Query::new([asset_type])
            .properties(["name"])
            .page_size(2)
            .condition(Condition::eq("_id", rid));
        let page = session.search_page(&query).await?;
        if page.items.len() > 1 {
            tracing::warn!(asset_type, rid, "multiple assets share one RID, using the first");
        }
        match page.items.into_iter().next() {
            Some(item) => Ok(Some(Asset::from_value(item)?.context)),
            None => Ok(None),
        }
    }

    /// Counterparts of `asset` in the target environment.
    ///
    /// At most one draft copy (listed first) and one published asset are
    /// returned. An empty result means the identity did not resolve.
    pub async fn mapped_assets<T: Identifiable + ?Sized>(
        &mut self,
        session: &mut CatalogSession,
        mappings: &MappingSet,
        asset: &T,
        include_workflow: bool,
    ) -> Result<Vec<Asset>> {
        let mapped = IdentityResolver::new(mappings).resolve(asset);
        let asset_type = mapped.asset_type.as_str();
        let with_drafts = include_workflow && is_workflow_type(asset_type);

        if !self.by_identity.contains_key(asset_type)
            && crossed(&mut self.identity_lookups, &self.settings, asset_type)
        {
            let index = IdentityIndex {
                published: self.bulk_identities(session, asset_type, false).await?,
                draft: None,
            };
            self.by_identity.insert(asset_type.to_string(), index);
        }

        let drafts_missing = self
            .by_identity
            .get(asset_type)
            .is_some_and(|index| index.draft.is_none());
        if with_drafts && drafts_missing {
            let drafts = self.bulk_identities(session, asset_type, true).await?;
            if let Some(index) = self.by_identity.get_mut(asset_type) {
                index.draft = Some(drafts);
            }
        }

        if let Some(index) = self.by_identity.get(asset_type) {
            let mut found = Vec::new();
            if with_drafts {
                found.extend(index.draft.as_ref().and_then(|d| d.get(&mapped.identity)).cloned());
            }
            found.extend(index.published.get(&mapped.identity).cloned());
            return Ok(found);
        }

        let mut found = Vec::new();
        if with_drafts {
            let query = mapped
                .query(&["name", "workflow_current_state"], 2)
                .draft()
                .condition(Condition::not_null("workflow_current_state"));
            found.extend(first_of(session, &query, &mapped.identity).await?);
        }
        let query = mapped.query(&["name"], 2);
        found.extend(first_of(session, &query, &mapped.identity).await?);
        Ok(found)
    }

    /// Convenience for callers that need exactly one counterpart
    pub async fn mapped_asset<T: Identifiable + ?Sized>(
        &mut self,
        session: &mut CatalogSession,
        mappings: &MappingSet,
        asset: &T,
        include_workflow: bool,
    ) -> Result<Option<Asset>> {
        Ok(self
            .mapped_assets(session, mappings, asset, include_workflow)
            .await?
            .into_iter()
            .next())
    }

    async fn bulk_identities(
        &self,
        session: &mut CatalogSession,
        asset_type: &str,
        drafts: bool,
    ) -> Result<HashMap<String, Asset>> {
        if drafts {
            tracing::debug!(asset_type, "bulk loading draft identities");
            let query = Query::new([asset_type])
                .properties(["name", "workflow_current_state"])
                .page_size(self.settings.page_size)
                .draft()
                .condition(Condition::not_null("workflow_current_state"));
            return Ok(index_by_identity(session.search_all(&query).await?, "draft"));
        }
        tracing::debug!(asset_type, "bulk loading identities");
        let query = Query::new([asset_type])
            .properties(["name"])
            .page_size(self.settings.page_size);
        Ok(index_by_identity(session.search_all(&query).await?, "published"))
    }
}

/// Key assets by identity; the first asset seen for an identity wins
fn index_by_identity(assets: Vec<Asset>, kind: &str) -> HashMap<String, Asset> {
    let mut index = HashMap::with_capacity(assets.len());
    for asset in assets {
        let identity = identity_of(&asset);
        if index.contains_key(&identity) {
            tracing::warn!(identity = %identity, kind, "multiple assets share one identity, keeping the first");
            continue;
        }
        index.insert(identity, asset);
    }
    index
}

async fn first_of(session: &mut CatalogSession, query: &Query, identity: &str) -> Result<Option<Asset>> {
    let page = session.search_page(query).await?;
    if page.items.len() > 1 {
        tracing::warn!(identity, "identity query matched more than one asset, using the first");
    }
    page.items.into_iter().next().map(Asset::from_value).transpose()
}
