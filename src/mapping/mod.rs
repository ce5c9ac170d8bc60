//! Value mappings between environments
//!
//! A mapping rule rewrites the name, host or path of assets of one type
//! with a regular expression. Rules are applied in list order and each
//! matching rule sees the result of the previous one.

pub mod identity;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

pub use identity::{identity_of, IdentityResolver, MappedIdentity, IDENTITY_DELIMITER};

/// Which part of an asset's identity a rule rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingProperty {
    Name,
    Host,
    Path,
}

/// A single rewrite, as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    #[serde(rename = "type")]
    pub asset_type: String,
    pub property: MappingProperty,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    asset_type: String,
    property: MappingProperty,
    pattern: Regex,
    replacement: String,
}

/// Compiled, ordered list of mapping rules
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    rules: Vec<CompiledRule>,
}

impl MappingSet {
    /// An empty set maps every value to itself
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile every rule up front so a bad pattern fails before any query runs
    pub fn compile(rules: &[MappingRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern =
                    Regex::new(&rule.from).map_err(|source| CatalogError::InvalidPattern {
                        pattern: rule.from.clone(),
                        source,
                    })?;
                Ok(CompiledRule {
                    asset_type: rule.asset_type.clone(),
                    property: rule.property,
                    pattern,
                    replacement: normalize_replacement(&rule.to),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite `value` with every rule for (`asset_type`, `property`) whose pattern matches
    pub fn map_value(&self, asset_type: &str, property: MappingProperty, value: &str) -> String {
        let mut mapped = value.to_string();
        for rule in self
            .rules
            .iter()
            .filter(|r| r.asset_type == asset_type && r.property == property)
        {
            if rule.pattern.is_match(&mapped) {
                mapped = rule
                    .pattern
                    .replace_all(&mapped, rule.replacement.as_str())
                    .into_owned();
            }
        }
        mapped
    }
}

/// Accept `\1`-style group references alongside the native `$1` form.
/// A literal `$` that is not a group reference is escaped.
fn normalize_replacement(to: &str) -> String {
    let mut out = String::with_capacity(to.len());
    let mut chars = to.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        group.push(*d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push('\\'),
            },
            '$' => match chars.peek() {
                Some(n) if n.is_ascii_alphanumeric() || *n == '{' || *n == '_' || *n == '$' => {
                    out.push('$');
                    if *n == '$' {
                        out.push('$');
                        chars.next();
                    }
                }
                _ => out.push_str("$$"),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(asset_type: &str, property: MappingProperty, from: &str, to: &str) -> MappingRule {
        MappingRule {
            asset_type: asset_type.into(),
            property,
            from: from.into(),
            to: to.into(),
        }
    }

    #[test]
    fn test_no_matching_rule_is_identity() {
        let set = MappingSet::compile(&[rule("host", MappingProperty::Name, "^DEV$", "PROD")])
            .unwrap();
        assert_eq!(set.map_value("host", MappingProperty::Name, "TEST"), "TEST");
        assert_eq!(set.map_value("term", MappingProperty::Name, "DEV"), "DEV");
        assert_eq!(MappingSet::empty().map_value("term", MappingProperty::Name, "x"), "x");
    }

    #[test]
    fn test_rules_chain_in_order() {
        let set = MappingSet::compile(&[
            rule("database_schema", MappingProperty::Name, "DEV", "TEST"),
            rule("database_schema", MappingProperty::Name, "TEST", "PROD"),
        ])
        .unwrap();
        assert_eq!(
            set.map_value("database_schema", MappingProperty::Name, "SALES_DEV"),
            "SALES_PROD"
        );
    }

    #[test]
    fn test_replacement_is_global() {
        let set = MappingSet::compile(&[rule("data_file", MappingProperty::Path, "dev", "prod")])
            .unwrap();
        assert_eq!(
            set.map_value("data_file", MappingProperty::Path, "/data/dev/in/dev"),
            "/data/prod/in/prod"
        );
    }

    #[test]
    fn test_backslash_group_references() {
        let set = MappingSet::compile(&[rule(
            "host",
            MappingProperty::Name,
            r"^(\w+)\.dev\.example\.com$",
            r"\1.prod.example.com",
        )])
        .unwrap();
        assert_eq!(
            set.map_value("host", MappingProperty::Name, "etl01.dev.example.com"),
            "etl01.prod.example.com"
        );
    }

    #[test]
    fn test_literal_dollar_survives() {
        let set = MappingSet::compile(&[rule("term", MappingProperty::Name, "USD", "$ ")]).unwrap();
        assert_eq!(set.map_value("term", MappingProperty::Name, "USD"), "$ ");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = MappingSet::compile(&[rule("term", MappingProperty::Name, "(", "x")]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPattern { .. }));
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let parsed: MappingRule =
            toml::from_str("type = \"host\"\nproperty = \"name\"\nfrom = \"A\"\nto = \"B\"\n")
                .unwrap();
        assert_eq!(parsed.property, MappingProperty::Name);
        assert_eq!(parsed.asset_type, "host");
    }
}
