//! Generic asset bundle filtering
//!
//! Bundle assets carry `ID="ID_<rid>"` and point at their parent through
//! `reference@assetIDs`. Keeping an asset keeps its whole ancestry and its
//! direct children so the bundle still imports as a consistent tree.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::{NodeId, XmlTree};
use crate::error::{CatalogError, Result};

const ID_PREFIX: &str = "ID_";
const ASSET_IDS: &str = "assetIDs";

/// RID carried by a bundle `ID` value
pub fn rid_from_id(id: &str) -> Result<&str> {
    id.strip_prefix(ID_PREFIX)
        .filter(|rid| !rid.is_empty())
        .ok_or_else(|| CatalogError::Structural(format!("bundle asset ID {} lacks the {} prefix", id, ID_PREFIX)))
}

pub fn id_from_rid(rid: &str) -> String {
    format!("{}{}", ID_PREFIX, rid)
}

struct BundleIndex {
    /// asset ID -> element
    assets: HashMap<String, NodeId>,
    /// asset ID -> IDs it references
    parents: HashMap<String, Vec<String>>,
    /// asset ID -> IDs referencing it
    children: HashMap<String, Vec<String>>,
}

fn index(tree: &XmlTree) -> Result<BundleIndex> {
    let mut assets = HashMap::new();
    let mut parents: HashMap<String, Vec<String>> = HashMap::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for asset in tree.select(tree.root(), &["assets", "asset"]) {
        let id = tree
            .attr(asset, "ID")
            .ok_or_else(|| CatalogError::Structural("bundle asset without an ID".into()))?
            .to_string();
        rid_from_id(&id)?;
        for reference in tree.children_named(asset, "reference") {
            for target in tree.id_list(reference, ASSET_IDS) {
                children.entry(target.clone()).or_default().push(id.clone());
                parents.entry(id.clone()).or_default().push(target);
            }
        }
        assets.insert(id, asset);
    }
    Ok(BundleIndex {
        assets,
        parents,
        children,
    })
}

/// Asset IDs to retain for `keep` (RIDs): every kept asset, all of its
/// ancestors and its direct children
fn closure(index: &BundleIndex, keep: &HashSet<String>) -> HashSet<String> {
    let seeds: Vec<String> = keep
        .iter()
        .map(|rid| id_from_rid(rid))
        .filter(|id| index.assets.contains_key(id))
        .collect();

    let mut retained: HashSet<String> = HashSet::new();
    let mut pending = seeds.clone();
    while let Some(id) = pending.pop() {
        if !retained.insert(id.clone()) {
            continue;
        }
        if let Some(up) = index.parents.get(&id) {
            pending.extend(up.iter().filter(|p| index.assets.contains_key(*p)).cloned());
        }
    }
    for id in &seeds {
        if let Some(down) = index.children.get(id) {
            retained.extend(down.iter().cloned());
        }
    }
    retained
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleFilterReport {
    pub changed: bool,
    pub asset_count: usize,
    pub dropped: usize,
}

/// Keep the assets whose RIDs are in `keep`, closed over ancestors and
/// direct children
pub fn filter_bundle(tree: &mut XmlTree, keep: &HashSet<String>) -> Result<BundleFilterReport> {
    let index = index(tree)?;
    let retained = closure(&index, keep);
    let mut report = BundleFilterReport::default();

    for (id, node) in &index.assets {
        if retained.contains(id) {
            report.asset_count += 1;
        } else {
            tree.remove(*node);
            report.dropped += 1;
        }
    }

    for node in retained.iter().filter_map(|id| index.assets.get(id)) {
        for reference in tree.children_named(*node, "reference").collect::<Vec<_>>() {
            if tree.retain_ids(reference, ASSET_IDS, |target| retained.contains(target))
                && tree.attr(reference, ASSET_IDS).is_none()
            {
                tree.remove(reference);
            }
        }
    }

    report.changed = report.dropped > 0;
    tracing::info!(kept = report.asset_count, dropped = report.dropped, "filtered asset bundle");
    Ok(report)
}

/// Mark assets of `complete_types` (their `class`) for complete import and
/// everything else for partial import
pub fn set_import_actions(tree: &mut XmlTree, complete_types: &HashSet<String>) -> Result<(usize, usize)> {
    let root = tree.root();
    let mut complete = BTreeSet::new();
    let mut partial = BTreeSet::new();
    for asset in tree.select(root, &["assets", "asset"]) {
        let id = tree
            .attr(asset, "ID")
            .ok_or_else(|| CatalogError::Structural("bundle asset without an ID".into()))?;
        rid_from_id(id)?;
        let class = tree.attr(asset, "class").unwrap_or_default();
        if complete_types.contains(class) {
            complete.insert(id.to_string());
        } else {
            partial.insert(id.to_string());
        }
    }

    let action = match tree.child_named(root, "importAction") {
        Some(existing) => existing,
        None => tree.append_element(root, "importAction", Vec::new()),
    };
    for (key, ids) in [("completeAssetIDs", &complete), ("partialAssetIDs", &partial)] {
        if ids.is_empty() {
            tree.remove_attr(action, key);
        } else {
            tree.set_attr(action, key, ids.iter().cloned().collect::<Vec<_>>().join(" "));
        }
    }
    Ok((complete.len(), partial.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<doc xmlns="http://www.ibm.com/iis/flow-doc">
  <assets>
    <asset class="$MyBundle-Server" repr="srv" ID="ID_s1"/>
    <asset class="$MyBundle-Database" repr="db" ID="ID_d1">
      <reference name="Server" assetIDs="ID_s1"/>
    </asset>
    <asset class="$MyBundle-Table" repr="t1" ID="ID_t1">
      <reference name="Database" assetIDs="ID_d1"/>
    </asset>
    <asset class="$MyBundle-Column" repr="c1" ID="ID_c1">
      <reference name="Table" assetIDs="ID_t1"/>
    </asset>
    <asset class="$MyBundle-Table" repr="t2" ID="ID_t2">
      <reference name="Database" assetIDs="ID_d1"/>
    </asset>
    <asset class="$MyBundle-Column" repr="c2" ID="ID_c2">
      <reference name="Table" assetIDs="ID_t2"/>
    </asset>
  </assets>
</doc>"#;

    fn ids(tree: &XmlTree) -> Vec<String> {
        tree.select(tree.root(), &["assets", "asset"])
            .into_iter()
            .filter_map(|a| tree.attr(a, "ID").map(str::to_string))
            .collect()
    }

    #[test]
    fn test_prefix_validated() {
        assert_eq!(rid_from_id("ID_abc").unwrap(), "abc");
        assert!(rid_from_id("abc").is_err());
        assert!(rid_from_id("ID_").is_err());
    }

    #[test]
    fn test_keep_closes_over_ancestors_and_children() {
        let mut tree = XmlTree::parse(BUNDLE).unwrap();
        let keep: HashSet<String> = ["t1".to_string()].into();
        let report = filter_bundle(&mut tree, &keep).unwrap();

        assert_eq!(report.asset_count, 4);
        assert_eq!(report.dropped, 2);
        assert_eq!(ids(&tree), vec!["ID_s1", "ID_d1", "ID_t1", "ID_c1"]);
        assert!(tree.dangling_references("ID", &[ASSET_IDS]).is_empty());
    }

    #[test]
    fn test_bad_id_rejected() {
        let mut tree = XmlTree::parse(r#"<doc><assets><asset ID="x1"/></assets></doc>"#).unwrap();
        assert!(filter_bundle(&mut tree, &HashSet::new()).is_err());
    }

    #[test]
    fn test_import_actions() {
        let mut tree = XmlTree::parse(BUNDLE).unwrap();
        let complete: HashSet<String> = ["$MyBundle-Table".to_string()].into();
        assert_eq!(set_import_actions(&mut tree, &complete).unwrap(), (2, 4));
        let action = tree.child_named(tree.root(), "importAction").unwrap();
        assert_eq!(tree.attr(action, "completeAssetIDs"), Some("ID_t1 ID_t2"));
        assert_eq!(tree.id_list(action, "partialAssetIDs").len(), 4);
    }
}
