//! Glossary export filtering
//!
//! Reduces a business-glossary export to the assets of one type that are
//! to be promoted. Relationship-valued custom attributes are always dropped
//! since relationships travel separately.

use std::collections::HashSet;

use serde::Serialize;

use super::{NodeId, XmlTree};
use crate::error::{CatalogError, Result};
use crate::model::types::glossary_class;

const CATEGORIES: (&str, &str) = ("categories", "category");
const TERMS: (&str, &str) = ("terms", "term");
const SYNONYM_GROUPS: (&str, &str) = ("synonymGroups", "synonymGroup");
const POLICIES: (&str, &str) = ("policies", "policy");
const RULES: (&str, &str) = ("rules", "rule");
const LABELS: (&str, &str) = ("labelDefinitions", "labelDefinition");
const CUSTOM_ATTRIBUTE_DEFINITIONS: (&str, &str) = ("customAttributesDefinitions", "customAttributeDef");

const ASSET_SECTIONS: [(&str, &str); 6] = [CATEGORIES, TERMS, SYNONYM_GROUPS, POLICIES, RULES, LABELS];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlossaryFilterReport {
    pub changed: bool,
    pub asset_count: usize,
    pub dropped_assets: usize,
    pub dropped_relationship_values: usize,
    pub dropped_synonym_groups: usize,
    pub dropped_definitions: usize,
    pub dropped_sections: Vec<String>,
}

fn section_for(asset_type: &str) -> Option<(&'static str, &'static str)> {
    match asset_type {
        "category" => Some(CATEGORIES),
        "term" => Some(TERMS),
        "information_governance_policy" => Some(POLICIES),
        "information_governance_rule" => Some(RULES),
        "label" => Some(LABELS),
        _ => None,
    }
}

fn rid_of(tree: &XmlTree, node: NodeId) -> Result<String> {
    tree.attr(node, "rid").map(str::to_string).ok_or_else(|| {
        CatalogError::Structural(format!("glossary <{}> element without a rid", tree.name(node)))
    })
}

/// Keep only the `asset_type` assets whose RID is in `keep`
pub fn filter_glossary(tree: &mut XmlTree, asset_type: &str, keep: &HashSet<String>) -> Result<GlossaryFilterReport> {
    let (class, section) = match (glossary_class(asset_type), section_for(asset_type)) {
        (Some(class), Some(section)) => (class, section),
        _ => return Err(CatalogError::Unsupported(asset_type.to_string())),
    };
    let mut report = GlossaryFilterReport::default();
    let root = tree.root();

    for other in ASSET_SECTIONS {
        let wanted = other == section || (asset_type == "term" && other == SYNONYM_GROUPS);
        if wanted {
            continue;
        }
        for container in tree.children_named(root, other.0).collect::<Vec<_>>() {
            tree.remove(container);
            report.dropped_sections.push(other.0.to_string());
        }
    }

    // Direct pass
    let mut kept: HashSet<String> = HashSet::new();
    let mut referenced_attributes: HashSet<String> = HashSet::new();
    for asset in tree.select(root, &[section.0, section.1]) {
        let rid = rid_of(tree, asset)?;
        if !keep.contains(&rid) {
            tree.remove(asset);
            report.dropped_assets += 1;
            continue;
        }
        report.asset_count += 1;
        kept.insert(rid);
        for value in tree.select(asset, &["customAttributes", "customAttributeValue"]) {
            if tree.child_named(value, "customAttributeReferences").is_some() {
                tree.remove(value);
                report.dropped_relationship_values += 1;
            } else if let Some(name) = tree.attr(value, "customAttribute") {
                referenced_attributes.insert(name.to_string());
            }
        }
    }

    // Derived passes, only once the direct pass is complete
    if asset_type == "term" {
        for group in tree.select(root, &[SYNONYM_GROUPS.0, SYNONYM_GROUPS.1]) {
            let refs = tree.select(group, &["synonyms", "termRef"]);
            let mut surviving = 0;
            for term_ref in refs {
                if tree.attr(term_ref, "rid").is_some_and(|r| kept.contains(r)) {
                    surviving += 1;
                } else {
                    tree.remove(term_ref);
                }
            }
            if surviving == 0 {
                tree.remove(group);
                report.dropped_synonym_groups += 1;
            }
        }
    }

    for definition in tree.select(root, &[CUSTOM_ATTRIBUTE_DEFINITIONS.0, CUSTOM_ATTRIBUTE_DEFINITIONS.1]) {
        let applies = tree
            .select(definition, &["appliesTo", "classType"])
            .into_iter()
            .any(|c| tree.attr(c, "value") == Some(class));
        let used = tree
            .attr(definition, "name")
            .is_some_and(|n| referenced_attributes.contains(n));
        if !(applies && used) {
            tree.remove(definition);
            report.dropped_definitions += 1;
        }
    }

    for (container, _) in ASSET_SECTIONS.iter().chain([&CUSTOM_ATTRIBUTE_DEFINITIONS]) {
        for node in tree.children_named(root, container).collect::<Vec<_>>() {
            if tree.remove_if_empty(node) {
                report.dropped_sections.push(container.to_string());
            }
        }
    }

    report.changed = report.dropped_assets > 0
        || report.dropped_relationship_values > 0
        || report.dropped_synonym_groups > 0
        || report.dropped_definitions > 0
        || !report.dropped_sections.is_empty();
    tracing::info!(
        asset_type,
        kept = report.asset_count,
        dropped = report.dropped_assets,
        "filtered glossary export"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<glossary xmlns="http://www.ibm.com/is/bg/importexport">
  <customAttributesDefinitions>
    <customAttributeDef name="Owner">
      <appliesTo><classType value="TERM"/></appliesTo>
    </customAttributeDef>
    <customAttributeDef name="Source System">
      <appliesTo><classType value="TERM"/></appliesTo>
    </customAttributeDef>
    <customAttributeDef name="Region">
      <appliesTo><classType value="CATEGORY"/></appliesTo>
    </customAttributeDef>
  </customAttributesDefinitions>
  <categories>
    <category rid="c1" name="Party"/>
  </categories>
  <terms>
    <term rid="t1" name="Customer">
      <customAttributes>
        <customAttributeValue customAttribute="Owner" value="Sales"/>
        <customAttributeValue customAttribute="Source System">
          <customAttributeReferences><customAttributeReference rid="x1"/></customAttributeReferences>
        </customAttributeValue>
      </customAttributes>
    </term>
    <term rid="t2" name="Client"/>
    <term rid="t3" name="Supplier"/>
  </terms>
  <synonymGroups>
    <synonymGroup>
      <synonyms><termRef rid="t1"/><termRef rid="t2"/></synonyms>
    </synonymGroup>
    <synonymGroup>
      <synonyms><termRef rid="t3"/></synonyms>
    </synonymGroup>
  </synonymGroups>
</glossary>"#;

    fn keep(rids: &[&str]) -> HashSet<String> {
        rids.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_keeps_only_selected_terms() {
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        let report = filter_glossary(&mut tree, "term", &keep(&["t1"])).unwrap();

        assert!(report.changed);
        assert_eq!(report.asset_count, 1);
        assert_eq!(report.dropped_assets, 2);
        assert_eq!(report.dropped_relationship_values, 1);
        assert_eq!(report.dropped_synonym_groups, 1);
        assert_eq!(report.dropped_definitions, 2);
        assert!(report.dropped_sections.contains(&"categories".to_string()));

        let out = tree.to_xml_string().unwrap();
        assert!(out.contains("rid=\"t1\""));
        assert!(!out.contains("rid=\"t2\""));
        assert!(!out.contains("customAttributeReferences"));
        assert!(out.contains("name=\"Owner\""));
        assert!(!out.contains("Region"));
    }

    #[test]
    fn test_orphan_synonym_group_removed() {
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        filter_glossary(&mut tree, "term", &keep(&["t1", "t2"])).unwrap();
        let groups = tree.select(tree.root(), &["synonymGroups", "synonymGroup"]);
        assert_eq!(groups.len(), 1);
        assert_eq!(tree.select(groups[0], &["synonyms", "termRef"]).len(), 2);
    }

    #[test]
    fn test_empty_sections_disappear() {
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        let report = filter_glossary(&mut tree, "category", &keep(&[])).unwrap();
        assert_eq!(report.asset_count, 0);
        let root = tree.root();
        assert_eq!(tree.children(root).count(), 0);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut tree = XmlTree::parse(EXPORT).unwrap();
        assert!(filter_glossary(&mut tree, "database_table", &keep(&[])).is_err());
    }
}
