//! Identity strings and identity queries
//!
//! An asset's identity is the `::`-joined names of its ancestors followed by
//! its own name. Resolving an asset from one environment against another
//! rewrites every component through the [`MappingSet`] and produces the
//! search conditions that locate the counterpart.

use crate::catalog::query::{Condition, Query};
use crate::mapping::{MappingProperty, MappingSet};
use crate::model::types::{expects_context, search_property, SearchProperty, FOLDER_TYPE};
use crate::model::{AssetRef, ContextEntry, Identifiable};

pub const IDENTITY_DELIMITER: &str = "::";

const UNSEARCHABLE_PATH: &str = "design_table_or_view.physical_data_model";

/// An asset's identity after mapping, with the query that finds it
#[derive(Debug, Clone, PartialEq)]
pub struct MappedIdentity {
    pub asset_type: String,
    pub name: String,
    /// Mapped ancestors, outermost first; folder chains re-expanded from the mapped path
    pub context: Vec<ContextEntry>,
    pub identity: String,
    pub conditions: Vec<Condition>,
}

impl MappedIdentity {
    /// Search for this identity in the target environment
    pub fn query(&self, properties: &[&str], page_size: usize) -> Query {
        Query::new([self.asset_type.as_str()])
            .properties(properties.iter().copied())
            .page_size(page_size)
            .all_of(self.conditions.clone())
    }

    pub fn to_ref(&self) -> AssetRef {
        AssetRef::new(self.asset_type.clone(), self.name.clone()).with_context(self.context.clone())
    }
}

/// Identity of an asset as it already exists (no mapping applied)
pub fn identity_of<T: Identifiable + ?Sized>(asset: &T) -> String {
    identity_string(&canonical_context(asset.context()), asset.name())
}

fn identity_string(context: &[ContextEntry], name: &str) -> String {
    let mut parts: Vec<&str> = context.iter().map(|c| c.name.as_str()).collect();
    parts.push(name);
    parts.join(IDENTITY_DELIMITER)
}

/// Join folder names outermost first; a root folder named `/` is not doubled
fn folder_path<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::new();
    for name in names {
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name);
    }
    path
}

fn folder_entries(path: &str) -> impl Iterator<Item = ContextEntry> + '_ {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| ContextEntry::new(FOLDER_TYPE, c))
}

/// Position of the folder run among the non-folder entries
fn folder_slot(context: &[ContextEntry]) -> Option<usize> {
    let first = context.iter().position(|c| c.asset_type == FOLDER_TYPE)?;
    Some(
        context[..first]
            .iter()
            .filter(|c| c.asset_type != FOLDER_TYPE)
            .count(),
    )
}

/// Collapse any folder run into a path and expand it again, so identities
/// computed from live contexts and from mapped paths line up.
fn canonical_context(context: &[ContextEntry]) -> Vec<ContextEntry> {
    let Some(slot) = folder_slot(context) else {
        return context.iter().map(ContextEntry::minified).collect();
    };
    let path = folder_path(
        context
            .iter()
            .filter(|c| c.asset_type == FOLDER_TYPE)
            .map(|c| c.name.as_str()),
    );
    let mut canonical: Vec<ContextEntry> = context
        .iter()
        .filter(|c| c.asset_type != FOLDER_TYPE)
        .map(ContextEntry::minified)
        .collect();
    let tail = canonical.split_off(slot);
    canonical.extend(folder_entries(&path));
    canonical.extend(tail);
    canonical
}

/// Maps source-environment assets onto their target-environment identity
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver<'m> {
    mappings: &'m MappingSet,
}

impl<'m> IdentityResolver<'m> {
    pub fn new(mappings: &'m MappingSet) -> Self {
        Self { mappings }
    }

    pub fn resolve<T: Identifiable + ?Sized>(&self, asset: &T) -> MappedIdentity {
        let asset_type = asset.asset_type();
        let context = asset.context();
        let name = self
            .mappings
            .map_value(asset_type, MappingProperty::Name, asset.name());

        if context.is_empty() && expects_context(asset_type) {
            tracing::error!(
                asset_type,
                name = asset.name(),
                "asset arrived without any context; its identity will not be qualified"
            );
        }

        let mut conditions = vec![Condition::eq("name", name.clone())];
        let mut mapped_context: Vec<ContextEntry> = Vec::with_capacity(context.len());
        let mut folders: Vec<&str> = Vec::new();
        let mut ctx_path = String::new();
        let mut pre_host_path: Option<String> = None;

        // Innermost ancestor first, so property paths grow outwards
        for entry in context.iter().rev() {
            if entry.asset_type == FOLDER_TYPE {
                folders.insert(0, entry.name.as_str());
                continue;
            }

            let mapped = self
                .mappings
                .map_value(&entry.asset_type, MappingProperty::Name, &entry.name);
            mapped_context.insert(0, ContextEntry::new(entry.asset_type.clone(), mapped.clone()));

            if entry.asset_type == "host_(engine)" && asset_type.starts_with("data_file") {
                pre_host_path = Some(ctx_path.clone());
            }

            let SearchProperty::Property(property) = search_property(asset_type, &entry.asset_type)
            else {
                continue;
            };
            ctx_path = if ctx_path.is_empty() {
                property
            } else {
                format!("{}.{}", ctx_path, property)
            };
            if !ctx_path.contains(UNSEARCHABLE_PATH) {
                conditions.push(Condition::eq(format!("{}.name", ctx_path), mapped));
            }
        }

        if !folders.is_empty() {
            let path = folder_path(folders.iter().copied());
            let mapped_path = self
                .mappings
                .map_value("data_file", MappingProperty::Path, &path);
            let path_property = match pre_host_path.as_deref() {
                None | Some("") => "path".to_string(),
                Some(prefix) => format!("{}.path", prefix),
            };
            conditions.push(Condition::eq(path_property, mapped_path.clone()));

            let slot = folder_slot(context).unwrap_or(0).min(mapped_context.len());
            let tail = mapped_context.split_off(slot);
            mapped_context.extend(folder_entries(&mapped_path));
            mapped_context.extend(tail);
        }

        let identity = identity_string(&mapped_context, &name);
        MappedIdentity {
            asset_type: asset_type.to_string(),
            name,
            context: mapped_context,
            identity,
            conditions,
        }
    }
}
