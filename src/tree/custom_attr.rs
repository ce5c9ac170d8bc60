//! Custom attribute definition filtering
//!
//! A custom attribute export holds the seed class descriptor (named by
//! `AssetDataDescriptor/seedObjectRids`) whose `has_CustomAttribute` children
//! are the definitions, plus the class descriptors and valid-value
//! enumerations those definitions point at through `xmi:id` lists.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{NodeId, XmlTree};
use crate::error::{CatalogError, Result};

const XMI_ID: &str = "xmi:id";
const REPOS_ID: &str = "_xmeta_repos_object_id";
const MODIFIED: &str = "_xmeta_modification_timestamp";
const SOURCE_CLASSES: &str = "hasSource_ClassDescriptor";
const TARGET_CLASSES: &str = "hasTarget_ClassDescriptor";
const VALID_VALUES: &str = "has_ValidValues";
const SOURCE_OF: &str = "isSourceOf_CustomAttribute";
const TARGET_OF: &str = "isTargetOf_CustomAttribute";

/// Names of what was kept and dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomAttributeReport {
    pub changed: bool,
    pub ca_count: usize,
    pub ca_names: Vec<String>,
    pub ca_dropped: Vec<String>,
    pub ca_dropped_classes: Vec<String>,
    pub ca_dropped_enums: Vec<String>,
}

/// Parse a definition timestamp such as `2019-01-04T10:22:31.123+0000`
/// into epoch milliseconds. The trailing offset is ignored and the time read
/// as UTC.
pub fn modification_millis(raw: &str) -> Result<i64> {
    let trimmed = match raw.char_indices().rev().nth(4) {
        Some((idx, c)) if c == '+' || c == '-' => &raw[..idx],
        _ => raw,
    };
    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| CatalogError::Structural(format!("bad modification timestamp {}: {}", raw, e)))?;
    Ok(parsed.and_utc().timestamp_millis())
}

pub struct CustomAttributeFilter {
    from: i64,
    to: i64,
    names: HashSet<String>,
}

impl CustomAttributeFilter {
    /// Keep definitions modified within `[from, to]` (epoch milliseconds)
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            names: HashSet::new(),
        }
    }

    /// Further restrict to these names; an empty list keeps every name
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    fn wanted(&self, modified: i64, name: &str) -> bool {
        modified >= self.from && modified <= self.to && (self.names.is_empty() || self.names.contains(name))
    }

    pub fn apply(&self, tree: &mut XmlTree) -> Result<CustomAttributeReport> {
        let root = tree.root();
        let seeds: HashSet<String> = tree
            .select(root, &["AssetDataDescriptor", "seedObjectRids"])
            .into_iter()
            .flat_map(|n| tree.text(n).split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .collect();
        let classes: Vec<NodeId> = tree.children_named(root, "ClassDescriptor").collect();
        let seed_class = classes
            .iter()
            .copied()
            .find(|c| tree.attr(*c, REPOS_ID).is_some_and(|r| seeds.contains(r)))
            .ok_or_else(|| CatalogError::Structural("no class descriptor matches the seed object".into()))?;

        let mut report = CustomAttributeReport::default();
        let mut kept_definitions: HashSet<String> = HashSet::new();
        let mut kept_classes: HashSet<String> = HashSet::new();
        let mut kept_enums: HashSet<String> = HashSet::new();

        for definition in tree.children_named(seed_class, "has_CustomAttribute").collect::<Vec<_>>() {
            let name = tree.attr(definition, "name").unwrap_or_default().to_string();
            let modified = match tree.attr(definition, MODIFIED) {
                Some(raw) => modification_millis(raw)?,
                None => {
                    return Err(CatalogError::Structural(format!(
                        "custom attribute {} has no modification timestamp",
                        name
                    )))
                }
            };
            if self.wanted(modified, &name) {
                if let Some(id) = tree.attr(definition, XMI_ID) {
                    kept_definitions.insert(id.to_string());
                }
                kept_classes.extend(tree.id_list(definition, SOURCE_CLASSES));
                kept_classes.extend(tree.id_list(definition, TARGET_CLASSES));
                kept_enums.extend(tree.id_list(definition, VALID_VALUES));
                report.ca_count += 1;
                report.ca_names.push(name);
            } else {
                tree.remove(definition);
                report.ca_dropped.push(name);
            }
        }

        for class in classes {
            let id = tree.attr(class, XMI_ID).unwrap_or_default().to_string();
            let is_seed = tree.attr(class, REPOS_ID).is_some_and(|r| seeds.contains(r));
            if !is_seed && !kept_classes.contains(&id) {
                report
                    .ca_dropped_classes
                    .push(tree.attr(class, "name").unwrap_or(&id).to_string());
                tree.remove(class);
                continue;
            }
            tree.retain_ids(class, SOURCE_OF, |i| kept_definitions.contains(i));
            tree.retain_ids(class, TARGET_OF, |i| kept_definitions.contains(i));
        }

        for enumeration in tree.children_named(root, "ValidEnumeration").collect::<Vec<_>>() {
            let id = tree.attr(enumeration, XMI_ID).unwrap_or_default().to_string();
            if !kept_enums.contains(&id) {
                report
                    .ca_dropped_enums
                    .push(tree.attr(enumeration, "name").unwrap_or(&id).to_string());
                tree.remove(enumeration);
            }
        }

        let dangling = tree.dangling_references(
            XMI_ID,
            &[SOURCE_CLASSES, TARGET_CLASSES, VALID_VALUES, SOURCE_OF, TARGET_OF],
        );
        if let Some((node, reference)) = dangling.first() {
            return Err(CatalogError::Structural(format!(
                "<{}> still refers to removed element {}",
                tree.name(*node),
                reference
            )));
        }

        report.changed = !report.ca_dropped.is_empty()
            || !report.ca_dropped_classes.is_empty()
            || !report.ca_dropped_enums.is_empty();
        tracing::info!(
            kept = report.ca_count,
            dropped = report.ca_dropped.len(),
            "filtered custom attribute definitions"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xmi:XMI xmi:version="2.0" xmlns:xmi="http://www.omg.org/XMI" xmlns:ASCLCustomAttribute="http:///2.3/ASCLCustomAttribute.ecore" xmlns:XMetaImportExport="http:///com/ibm/xmeta/shared/model/3/XMetaImportExport.ecore">
  <XMetaImportExport:AssetDataDescriptor>
    <seedObjectRids>seed-rid</seedObjectRids>
  </XMetaImportExport:AssetDataDescriptor>
  <ASCLCustomAttribute:ClassDescriptor xmi:id="c_term" name="Term" _xmeta_repos_object_id="seed-rid" isSourceOf_CustomAttribute="ca_old ca_new ca_rel">
    <has_CustomAttribute xmi:id="ca_old" name="Legacy Code" _xmeta_modification_timestamp="2017-03-01T08:00:00.000+0000"/>
    <has_CustomAttribute xmi:id="ca_new" name="Steward Notes" has_ValidValues="e_1" _xmeta_modification_timestamp="2019-06-10T12:30:00.250+0000"/>
    <has_CustomAttribute xmi:id="ca_rel" name="Implemented By" hasTarget_ClassDescriptor="c_table" _xmeta_modification_timestamp="2019-06-11T09:00:00.000+0000"/>
  </ASCLCustomAttribute:ClassDescriptor>
  <ASCLCustomAttribute:ClassDescriptor xmi:id="c_table" name="Database Table" isTargetOf_CustomAttribute="ca_rel ca_old"/>
  <ASCLCustomAttribute:ClassDescriptor xmi:id="c_file" name="Data File"/>
  <ASCLCustomAttribute:ValidEnumeration xmi:id="e_1" name="Levels"/>
  <ASCLCustomAttribute:ValidEnumeration xmi:id="e_2" name="Unused"/>
</xmi:XMI>"#;

    fn window() -> (i64, i64) {
        (
            modification_millis("2019-01-01T00:00:00.000+0000").unwrap(),
            modification_millis("2019-12-31T00:00:00.000+0000").unwrap(),
        )
    }

    #[test]
    fn test_timestamp_parsing() {
        assert_eq!(modification_millis("1970-01-01T00:00:01.500+0000").unwrap(), 1500);
        assert_eq!(modification_millis("1970-01-01T00:00:02").unwrap(), 2000);
        assert!(modification_millis("yesterday").is_err());
    }

    #[test]
    fn test_window_keeps_recent_definitions() {
        let (from, to) = window();
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        let report = CustomAttributeFilter::new(from, to).apply(&mut tree).unwrap();

        assert!(report.changed);
        assert_eq!(report.ca_names, vec!["Steward Notes", "Implemented By"]);
        assert_eq!(report.ca_dropped, vec!["Legacy Code"]);
        assert_eq!(report.ca_dropped_classes, vec!["Data File"]);
        assert_eq!(report.ca_dropped_enums, vec!["Unused"]);

        let out = tree.to_xml_string().unwrap();
        assert!(out.contains("isSourceOf_CustomAttribute=\"ca_new ca_rel\""));
        assert!(out.contains("isTargetOf_CustomAttribute=\"ca_rel\""));
        assert!(!out.contains("Legacy Code"));
    }

    #[test]
    fn test_name_filter_and_emptied_lists() {
        let (from, to) = window();
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        let report = CustomAttributeFilter::new(from, to)
            .names(["Steward Notes"])
            .apply(&mut tree)
            .unwrap();

        assert_eq!(report.ca_count, 1);
        assert!(report.ca_dropped_classes.contains(&"Database Table".to_string()));
        let classes: Vec<_> = tree.children_named(tree.root(), "ClassDescriptor").collect();
        assert_eq!(classes.len(), 1);
        assert_eq!(tree.attr(classes[0], SOURCE_OF), Some("ca_new"));
        assert!(tree.dangling_references(XMI_ID, &[SOURCE_OF, TARGET_OF, VALID_VALUES]).is_empty());
    }

    #[test]
    fn test_missing_seed_class_is_structural() {
        let mut tree = XmlTree::parse("<xmi:XMI xmlns:xmi=\"http://www.omg.org/XMI\"/>").unwrap();
        let err = CustomAttributeFilter::new(0, 1).apply(&mut tree).unwrap_err();
        assert!(matches!(err, CatalogError::Structural(_)));
    }
}
