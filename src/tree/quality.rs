//! Data quality project export filtering
//!
//! Also prepares an exported project for another environment: renaming it
//! and pointing its data sources at the target's hosts, databases and
//! schemas.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::XmlTree;
use crate::error::{CatalogError, Result};
use crate::model::AssetRef;

/// Names to keep, grouped by quality asset type
#[derive(Debug, Clone, Default)]
pub struct QualityKeep {
    pub rule_definitions: HashSet<String>,
    pub rule_set_definitions: HashSet<String>,
    pub rules: HashSet<String>,
    pub rule_sets: HashSet<String>,
    pub metrics: HashSet<String>,
}

impl QualityKeep {
    /// Group references by type; references of other types are ignored
    pub fn from_refs<'a>(refs: impl IntoIterator<Item = &'a AssetRef>) -> Self {
        let mut keep = Self::default();
        for r in refs {
            let bucket = match r.asset_type.as_str() {
                "data_rule_definition" => &mut keep.rule_definitions,
                "data_rule_set_definition" => &mut keep.rule_set_definitions,
                "data_rule" => &mut keep.rules,
                "data_rule_set" => &mut keep.rule_sets,
                "metric" => &mut keep.metrics,
                other => {
                    tracing::debug!(asset_type = other, "not part of a quality project");
                    continue;
                }
            };
            bucket.insert(r.name.clone());
        }
        keep
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityFilterReport {
    pub changed: bool,
    pub asset_count: usize,
}

/// Prune a quality project export down to the kept assets.
///
/// Executables go first since they nest inside definitions; a definition
/// survives when it is kept by name or still holds an executable.
pub fn filter_quality_project(tree: &mut XmlTree, keep: &QualityKeep) -> QualityFilterReport {
    let root = tree.root();
    let mut report = QualityFilterReport::default();

    for executable in tree.descendants_named(root, "ExecutableRule") {
        let name = tree.attr(executable, "name").unwrap_or_default();
        if keep.rules.contains(name) || keep.rule_sets.contains(name) {
            report.asset_count += 1;
        } else {
            tree.remove(executable);
            report.changed = true;
        }
    }

    for metric in tree.select(root, &["Metrics", "Metric"]) {
        if tree.attr(metric, "name").is_some_and(|n| keep.metrics.contains(n)) {
            report.asset_count += 1;
        } else {
            tree.remove(metric);
            report.changed = true;
        }
    }

    for (element, names) in [
        ("DataRuleDefinition", &keep.rule_definitions),
        ("RuleSetDefinition", &keep.rule_set_definitions),
    ] {
        for definition in tree.select(root, &["DataRuleDefinitions", element]) {
            let named = tree.attr(definition, "name").is_some_and(|n| names.contains(n));
            let has_executables = !tree
                .select(definition, &["ExecutableRules", "ExecutableRule"])
                .is_empty();
            if named || has_executables {
                report.asset_count += 1;
            } else {
                tree.remove(definition);
                report.changed = true;
            }
        }
    }

    tracing::info!(kept = report.asset_count, "filtered quality project");
    report
}

/// Attribute of a project element a mapping rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectAttribute {
    Name,
    /// Only `DataSource` elements carry a host
    Host,
}

impl ProjectAttribute {
    fn key(&self) -> &'static str {
        match self {
            ProjectAttribute::Name => "name",
            ProjectAttribute::Host => "host",
        }
    }
}

/// Exact-value replacement on one element type of a project document,
/// e.g. `DataSource`, `Schema` or `Table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMapping {
    #[serde(rename = "type")]
    pub element: String,
    #[serde(rename = "attr")]
    pub attribute: ProjectAttribute,
    pub from: String,
    pub to: String,
}

/// Names listed in a project list document
pub fn project_names(listing: &XmlTree) -> Vec<String> {
    listing
        .descendants_named(listing.root(), "Project")
        .into_iter()
        .filter_map(|p| listing.attr(p, "name").map(str::to_string))
        .collect()
}

/// Point the document at project `name`; returns whether it changed
pub fn rename_project(tree: &mut XmlTree, name: &str) -> bool {
    let root = tree.root();
    if tree.attr(root, "name") == Some(name) {
        return false;
    }
    tree.set_attr(root, "name", name);
    true
}

/// Apply every mapping in order, returning how many attributes changed
pub fn apply_project_mappings(tree: &mut XmlTree, mappings: &[ProjectMapping]) -> Result<usize> {
    let mut replacements = 0;
    for mapping in mappings {
        if mapping.attribute == ProjectAttribute::Host && mapping.element != "DataSource" {
            return Err(CatalogError::Config(format!(
                "only DataSource has a host, not {}",
                mapping.element
            )));
        }
        let key = mapping.attribute.key();
        for element in tree.descendants_named(tree.root(), &mapping.element) {
            if tree.attr(element, key) == Some(mapping.from.as_str()) {
                tree.set_attr(element, key, mapping.to.as_str());
                replacements += 1;
            }
        }
    }
    tracing::debug!(replacements, "mapped project data sources");
    Ok(replacements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<iaapi:Project xmlns:iaapi="http://www.ibm.com/investigate/api/iaapi" name="Customer Quality">
  <DataRuleDefinitions>
    <DataRuleDefinition name="Email valid">
      <ExecutableRules>
        <ExecutableRule name="Email valid on CRM"/>
        <ExecutableRule name="Email valid on ERP"/>
      </ExecutableRules>
    </DataRuleDefinition>
    <DataRuleDefinition name="Postcode format"/>
    <DataRuleDefinition name="Phone present">
      <ExecutableRules>
        <ExecutableRule name="Phone present on CRM"/>
      </ExecutableRules>
    </DataRuleDefinition>
    <RuleSetDefinition name="Contactability"/>
  </DataRuleDefinitions>
  <Metrics>
    <Metric name="Overall score"/>
    <Metric name="Old score"/>
  </Metrics>
</iaapi:Project>"#;

    #[test]
    fn test_definitions_survive_through_executables() {
        let refs = vec![
            AssetRef::new("data_rule", "Email valid on CRM"),
            AssetRef::new("data_rule_set_definition", "Contactability"),
            AssetRef::new("metric", "Overall score"),
        ];
        let keep = QualityKeep::from_refs(&refs);
        let mut tree = XmlTree::parse(PROJECT).unwrap();
        let report = filter_quality_project(&mut tree, &keep);

        assert!(report.changed);
        // one rule, one metric, one definition holding it, one rule set definition
        assert_eq!(report.asset_count, 4);
        let out = tree.to_xml_string().unwrap();
        assert!(out.contains("Email valid on CRM"));
        assert!(!out.contains("Email valid on ERP"));
        assert!(!out.contains("Phone present"));
        assert!(!out.contains("Postcode format"));
        assert!(out.contains("Contactability"));
        assert!(!out.contains("Old score"));
    }

    #[test]
    fn test_nothing_kept_empties_project() {
        let mut tree = XmlTree::parse(PROJECT).unwrap();
        let report = filter_quality_project(&mut tree, &QualityKeep::default());
        assert_eq!(report.asset_count, 0);
        assert!(tree
            .select(tree.root(), &["DataRuleDefinitions", "DataRuleDefinition"])
            .is_empty());
    }

    const SOURCES: &str = r#"<iaapi:Project xmlns:iaapi="http://www.ibm.com/investigate/api/iaapi" name="Customer Quality">
  <DataSources>
    <DataSource host="DEVHOST" name="CRM">
      <Schema name="SALES"><Table name="CUSTOMER"/></Schema>
      <Schema name="STAGE"/>
    </DataSource>
    <DataSource host="DEVHOST" name="ERP"/>
  </DataSources>
</iaapi:Project>"#;

    fn mapping(element: &str, attribute: ProjectAttribute, from: &str, to: &str) -> ProjectMapping {
        ProjectMapping {
            element: element.into(),
            attribute,
            from: from.into(),
            to: to.into(),
        }
    }

    #[test]
    fn test_project_mappings_rewrite_matching_sources() {
        let mut tree = XmlTree::parse(SOURCES).unwrap();
        let mappings = vec![
            mapping("DataSource", ProjectAttribute::Host, "DEVHOST", "PRODHOST"),
            mapping("Schema", ProjectAttribute::Name, "SALES", "SALES_P"),
        ];
        assert_eq!(apply_project_mappings(&mut tree, &mappings).unwrap(), 3);
        assert!(rename_project(&mut tree, "Customer Quality PROD"));
        assert!(!rename_project(&mut tree, "Customer Quality PROD"));

        let out = tree.to_xml_string().unwrap();
        assert!(!out.contains("DEVHOST"));
        assert!(out.contains(r#"<Schema name="SALES_P">"#));
        assert!(out.contains(r#"<Schema name="STAGE"/>"#));
        assert!(out.contains(r#"name="Customer Quality PROD""#));
    }

    #[test]
    fn test_host_mapping_only_applies_to_data_sources() {
        let mut tree = XmlTree::parse(SOURCES).unwrap();
        let err = apply_project_mappings(&mut tree, &[mapping("Schema", ProjectAttribute::Host, "a", "b")]);
        assert!(matches!(err, Err(CatalogError::Config(_))));
    }

    #[test]
    fn test_project_names_from_listing() {
        let listing = XmlTree::parse(
            r#"<iaapi:Projects xmlns:iaapi="urn:ia"><Project name="A"/><Project name="B &amp; C"/></iaapi:Projects>"#,
        )
        .unwrap();
        assert_eq!(project_names(&listing), vec!["A".to_string(), "B & C".to_string()]);
    }
}
