//! Asset type tables
//!
//! Static knowledge about catalog asset types: which participate in
//! workflow, which are business metadata, and how a context type is named
//! when it is used as a search property.

/// Types that have a workflow (draft) copy when workflow is enabled
pub const WORKFLOW_TYPES: &[&str] = &[
    "category",
    "term",
    "information_governance_policy",
    "information_governance_rule",
];

/// Business-metadata types: compared by value rather than by RID
pub const BUSINESS_METADATA_TYPES: &[&str] = &[
    "category",
    "term",
    "information_governance_policy",
    "information_governance_rule",
    "label",
];

/// Properties every change query requests
pub const COMMON_PROPERTIES: &[&str] = &["modified_on"];

/// Type that collapses into a path rather than a chain of context entries
pub const FOLDER_TYPE: &str = "data_file_folder";

pub fn is_workflow_type(asset_type: &str) -> bool {
    WORKFLOW_TYPES.contains(&asset_type)
}

pub fn is_business_metadata(asset_type: &str) -> bool {
    BUSINESS_METADATA_TYPES.contains(&asset_type)
}

/// Extra properties retrieved for change detection of a type
pub fn properties_for(asset_type: &str) -> Vec<&'static str> {
    let specific: &[&str] = match asset_type {
        "dsjob" | "shared_container" => &["type"],
        "table_definition" => &["data_store", "data_schema", "data_source_name"],
        "data_class" => &["class_code"],
        "extension_mapping_document" => &["file_name", "parent_folder"],
        "data_rule_definition" | "data_rule_set_definition" | "data_rule" | "data_rule_set"
        | "metric" => &["project"],
        _ => &[],
    };
    specific.iter().chain(COMMON_PROPERTIES).copied().collect()
}

/// Types that never exist without at least one ancestor
pub fn expects_context(asset_type: &str) -> bool {
    matches!(
        asset_type,
        "term"
            | "database"
            | "database_schema"
            | "database_table"
            | "database_column"
            | "data_file"
            | "data_file_record"
            | "data_file_field"
            | "dsjob"
            | "routine"
            | "shared_container"
            | "table_definition"
            | "parameter_set"
            | "transformation_project"
    )
}

/// Outcome of translating a context type into a search property name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchProperty {
    Property(String),
    /// The context level cannot be used in a query and is skipped
    Unsupported,
}

/// Translate the `_type` of a context entry into the property used to
/// constrain a search for an asset of `asset_type`.
pub fn search_property(asset_type: &str, context_type: &str) -> SearchProperty {
    match context_type {
        "host_(engine)" if asset_type != "transformation_project" => {
            SearchProperty::Property("host".to_string())
        }
        "category" => SearchProperty::Property("parent_category".to_string()),
        "data_class" => SearchProperty::Property("parent_data_class".to_string()),
        "design_table" => SearchProperty::Property("design_table_or_view".to_string()),
        "bi_root_folder" | "bi_server" => {
            tracing::warn!(
                asset_type,
                context_type,
                "context type cannot be searched, skipping it in the identity query"
            );
            SearchProperty::Unsupported
        }
        bundle if bundle.starts_with('$') => match bundle.split_once('-') {
            Some((_, class)) => SearchProperty::Property(format!("${}", class)),
            None => SearchProperty::Property(bundle.to_string()),
        },
        other => SearchProperty::Property(other.to_string()),
    }
}

/// Catalog REST type to glossary export class name
pub fn glossary_class(asset_type: &str) -> Option<&'static str> {
    match asset_type {
        "term" => Some("TERM"),
        "category" => Some("CATEGORY"),
        "information_governance_policy" => Some("POLICY"),
        "information_governance_rule" => Some("RULE"),
        "label" => Some("LABEL"),
        _ => None,
    }
}
