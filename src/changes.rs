//! Change detection
//!
//! Finds assets of one type modified within a time window and turns each
//! into the descriptor the export tooling for that type expects. Composite
//! types also count as changed when any of their granular children changed.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{CatalogSession, Condition, Query};
use crate::error::{CatalogError, Result};
use crate::model::types::properties_for;
use crate::model::Asset;

/// Vendor sample table definitions present on every fresh install
const TABLE_DEFINITION_BLACKLIST: &[&str] = &[
    "Examples\\\\Folder",
    "WebSphere MQ Connector\\\\MQMessage",
    "Examples\\\\SOAPbody",
    "Distributed Transaction\\\\TransactionStatus",
];

const QUALIFIER: &str = "\\\\";

/// Child properties whose modification also marks the parent as changed
fn child_modifications(asset_type: &str) -> &'static [&'static str] {
    match asset_type {
        "application" => &[
            "object_types.modified_on",
            "object_types.methods.modified_on",
            "object_types.methods.input_parameters.modified_on",
            "object_types.methods.output_values.modified_on",
        ],
        "stored_procedure_definition" => &[
            "in_parameters.modified_on",
            "out_parameters.modified_on",
            "inout_parameters.modified_on",
            "result_columns.modified_on",
        ],
        "data_rule" | "data_rule_set" | "metric" => &["execution_history.modified_on"],
        "logical_data_model" => &[
            "contains_logical_data_models.modified_on",
            "subject_areas.modified_on",
            "logical_entities.modified_on",
            "logical_domains.modified_on",
        ],
        "physical_data_model" => &[
            "contains_physical_models.modified_on",
            "contains_design_tables.modified_on",
            "contains_design_views.modified_on",
            "contains_design_stored_procedures.modified_on",
            "physical_domains.modified_on",
        ],
        "database" => &[
            "database_schemas.modified_on",
            "database_schemas.stored_procedures.modified_on",
            "database_schemas.views.modified_on",
            "database_schemas.database_tables.modified_on",
            "database_schemas.database_tables.database_columns.modified_on",
            "database_schemas.views.database_columns.modified_on",
        ],
        "database_schema" => &[
            "stored_procedures.modified_on",
            "views.modified_on",
            "database_tables.modified_on",
            "database_tables.database_columns.modified_on",
            "views.database_columns.modified_on",
        ],
        _ => &[],
    }
}

/// Query for assets of `asset_type` changed within `[from, to]`
pub fn changed_assets_query(
    asset_type: &str,
    from: i64,
    to: i64,
    conditions: &[Condition],
    batch: usize,
) -> Query {
    let query = Query::new([asset_type])
        .properties(properties_for(asset_type))
        .page_size(batch);
    let children = child_modifications(asset_type);
    let query = if asset_type == "label" {
        query
    } else if children.is_empty() {
        query.condition(Condition::between("modified_on", from, to))
    } else {
        let mut widened = vec![Condition::between("modified_on", from, to)];
        widened.extend(children.iter().map(|p| Condition::between(*p, from, to)));
        query.condition(Condition::any_of(widened))
    };
    query.all_of(conditions.iter().cloned())
}

/// Export descriptor for one changed asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExtractObject {
    /// DataStage design object addressed by host, project and file pattern
    DataStage {
        host: String,
        project: String,
        folder: String,
        jobs: String,
    },
    DataClass {
        class_code: String,
    },
    MappingDocument {
        name: String,
        folder: String,
        file: String,
    },
    /// Extended data source or quality asset, by name and export type
    Named {
        #[serde(skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        name: String,
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        export_type: Option<String>,
    },
    Rid(String),
}

/// Produces the export descriptor for assets of one type; `None` means the
/// asset is deliberately not exported
pub trait ExtractHandler: Send + Sync {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>>;
}

fn text(asset: &Asset, property: &str) -> String {
    match asset.properties.get(property) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items.first().map(name_of).unwrap_or_default(),
        Some(value @ Value::Object(_)) => name_of(value),
        _ => String::new(),
    }
}

fn name_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map.get("_name").and_then(Value::as_str).unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn host_and_project(asset: &Asset) -> Result<(String, String)> {
    match asset.context.as_slice() {
        [host, project, ..] => Ok((host.name.clone(), project.name.clone())),
        _ => Err(CatalogError::Structural(format!(
            "{} '{}' lacks its host and project context",
            asset.asset_type, asset.name
        ))),
    }
}

struct DataStageObject {
    extension: fn(&Asset) -> Option<String>,
}

impl ExtractHandler for DataStageObject {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        let (host, project) = host_and_project(asset)?;
        Ok((self.extension)(asset).map(|jobs| ExtractObject::DataStage {
            host,
            project,
            folder: "*".to_string(),
            jobs,
        }))
    }
}

fn job_file(asset: &Asset) -> Option<String> {
    let extension = match text(asset, "type").as_str() {
        "Parallel" => "pjb",
        "Sequence" => "qjb",
        "Server" => "sjb",
        _ => "*",
    };
    Some(format!("{}.{}", asset.name, extension))
}

fn routine_file(asset: &Asset) -> Option<String> {
    Some(format!("{}.*", asset.name))
}

fn shared_container_file(asset: &Asset) -> Option<String> {
    let extension = match text(asset, "type").as_str() {
        "PARALLEL" => "psc",
        "SERVER" => "ssc",
        _ => "*",
    };
    Some(format!("{}.{}", asset.name, extension))
}

fn parameter_set_file(asset: &Asset) -> Option<String> {
    Some(format!("{}.pst", asset.name))
}

fn table_definition_file(asset: &Asset) -> Option<String> {
    let mut qualified = asset.name.clone();
    for qualifier in ["data_source_name", "data_store"] {
        let prefix = text(asset, qualifier);
        if !prefix.is_empty() {
            qualified = format!("{}{}{}", prefix, QUALIFIER, qualified);
        }
    }
    if TABLE_DEFINITION_BLACKLIST.contains(&qualified.as_str()) {
        tracing::debug!(table_definition = %qualified, "skipping vendor default");
        return None;
    }
    Some(format!("{}.tbd", qualified))
}

struct RidOnly;

impl ExtractHandler for RidOnly {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        Ok(Some(ExtractObject::Rid(asset.require_rid()?.to_string())))
    }
}

struct DataClassObject;

impl ExtractHandler for DataClassObject {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        // Only top-level classes are exported; children travel with them
        if !asset.context.is_empty() {
            return Ok(None);
        }
        Ok(Some(ExtractObject::DataClass {
            class_code: text(asset, "class_code"),
        }))
    }
}

struct MappingDocumentObject;

impl ExtractHandler for MappingDocumentObject {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        Ok(Some(ExtractObject::MappingDocument {
            name: asset.name.clone(),
            folder: text(asset, "parent_folder"),
            file: text(asset, "file_name"),
        }))
    }
}

struct ExtendedSourceObject;

fn extended_source_type(asset_type: &str) -> Option<&'static str> {
    Some(match asset_type {
        "application" => "Application",
        "file" => "File",
        "stored_procedure_definition" => "StoredProcedure",
        "in_parameter" => "InParameter",
        "out_parameter" => "OutParameter",
        "inout_parameter" => "InOutParameter",
        "result_column" => "ResultColumn",
        "object_type" => "ObjectType",
        "method" => "Method",
        "input_parameter" => "InputParameter",
        "output_value" => "OutputValue",
        _ => return None,
    })
}

impl ExtractHandler for ExtendedSourceObject {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        Ok(Some(ExtractObject::Named {
            project: None,
            name: asset.name.clone(),
            export_type: extended_source_type(&asset.asset_type).map(str::to_string),
        }))
    }
}

struct QualityObject;

fn quality_path(asset_type: &str) -> Option<&'static str> {
    Some(match asset_type {
        "data_rule_definition" => "DataRuleDefinitions/DataRuleDefinition",
        "data_rule_set_definition" => "DataRuleDefinitions/RuleSetDefinition",
        "data_rule" => "DataRuleDefinitions/DataRuleDefinition/ExecutableRules/ExecutableRule",
        "data_rule_set" => "DataRuleDefinitions/RuleSetDefinition/ExecutableRules/ExecutableRule",
        "metric" => "Metrics/Metric",
        _ => return None,
    })
}

impl ExtractHandler for QualityObject {
    fn extract(&self, asset: &Asset) -> Result<Option<ExtractObject>> {
        let project = text(asset, "project");
        if project.is_empty() {
            return Err(CatalogError::Structural(format!(
                "{} '{}' has no project",
                asset.asset_type, asset.name
            )));
        }
        Ok(Some(ExtractObject::Named {
            project: Some(project),
            name: asset.name.clone(),
            export_type: quality_path(&asset.asset_type).map(str::to_string),
        }))
    }
}

static REGISTRY: Lazy<HashMap<&'static str, Box<dyn ExtractHandler>>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, Box<dyn ExtractHandler>> = HashMap::new();
    let datastage: [(&str, fn(&Asset) -> Option<String>); 5] = [
        ("dsjob", job_file),
        ("routine", routine_file),
        ("shared_container", shared_container_file),
        ("table_definition", table_definition_file),
        ("parameter_set", parameter_set_file),
    ];
    for (asset_type, extension) in datastage {
        registry.insert(asset_type, Box::new(DataStageObject { extension }));
    }
    registry.insert("data_class", Box::new(DataClassObject));
    registry.insert("extension_mapping_document", Box::new(MappingDocumentObject));
    for asset_type in ["application", "file", "stored_procedure_definition"] {
        registry.insert(asset_type, Box::new(ExtendedSourceObject));
    }
    for asset_type in [
        "category",
        "term",
        "information_governance_policy",
        "information_governance_rule",
        "label",
    ] {
        registry.insert(asset_type, Box::new(RidOnly));
    }
    for asset_type in [
        "data_rule_definition",
        "data_rule_set_definition",
        "data_rule",
        "data_rule_set",
        "metric",
    ] {
        registry.insert(asset_type, Box::new(QualityObject));
    }
    registry
});

pub fn extract_handler(asset_type: &str) -> Result<&'static dyn ExtractHandler> {
    REGISTRY
        .get(asset_type)
        .map(|handler| handler.as_ref())
        .ok_or_else(|| CatalogError::Unsupported(asset_type.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangedAssets {
    pub asset_count: usize,
    pub assets: Vec<ExtractObject>,
}

/// Export descriptors of every `asset_type` asset changed within `[from, to]`
pub async fn changed_assets(
    session: &mut CatalogSession,
    asset_type: &str,
    from: i64,
    to: i64,
    conditions: &[Condition],
    batch: usize,
) -> Result<ChangedAssets> {
    let handler = extract_handler(asset_type)?;
    let query = changed_assets_query(asset_type, from, to, conditions, batch);
    let found = session.search_all(&query).await?;

    let mut changed = ChangedAssets {
        asset_count: found.len(),
        assets: Vec::new(),
    };
    for asset in &found {
        if let Some(object) = handler.extract(asset)? {
            changed.assets.push(object);
        }
    }
    tracing::info!(asset_type, found = changed.asset_count, exported = changed.assets.len(), "changed assets");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset(value: Value) -> Asset {
        Asset::from_value(value).unwrap()
    }

    fn datastage(asset_type: &str, name: &str, extra: Value) -> Asset {
        let mut value = json!({
            "_id": "rid1",
            "_type": asset_type,
            "_name": name,
            "_context": [
                {"_type": "host_(engine)", "_name": "ENGINE"},
                {"_type": "transformation_project", "_name": "dstage1"}
            ]
        });
        if let (Value::Object(base), Value::Object(more)) = (&mut value, extra) {
            base.extend(more);
        }
        asset(value)
    }

    #[test]
    fn test_plain_window_query() {
        let q = changed_assets_query("dsjob", 1, 2, &[], 50);
        let wire = serde_json::to_value(&q).unwrap();
        assert_eq!(wire["properties"], json!(["type", "modified_on"]));
        assert_eq!(
            wire["where"]["conditions"][0],
            json!({"property": "modified_on", "operator": "between", "min": 1, "max": 2})
        );
        assert_eq!(wire["pageSize"], json!(50));
    }

    #[test]
    fn test_composite_query_is_widened() {
        let extra = [Condition::eq("name", "CRM")];
        let q = changed_assets_query("database", 1, 2, &extra, 100);
        let wire = serde_json::to_value(&q).unwrap();
        let group = &wire["where"]["conditions"][0];
        assert_eq!(group["operator"], json!("or"));
        assert_eq!(group["conditions"].as_array().unwrap().len(), 7);
        assert_eq!(wire["where"]["conditions"][1]["property"], json!("name"));
    }

    #[test]
    fn test_label_has_no_window() {
        assert!(!changed_assets_query("label", 1, 2, &[], 100).has_conditions());
    }

    #[test]
    fn test_job_extensions() {
        let handler = extract_handler("dsjob").unwrap();
        let job = datastage("dsjob", "LoadCustomers", json!({"type": "Parallel"}));
        assert_eq!(
            handler.extract(&job).unwrap(),
            Some(ExtractObject::DataStage {
                host: "ENGINE".into(),
                project: "dstage1".into(),
                folder: "*".into(),
                jobs: "LoadCustomers.pjb".into(),
            })
        );
    }

    #[test]
    fn test_table_definition_blacklist() {
        let handler = extract_handler("table_definition").unwrap();
        let sample = datastage(
            "table_definition",
            "Folder",
            json!({"data_store": "", "data_source_name": "Examples"}),
        );
        assert_eq!(handler.extract(&sample).unwrap(), None);

        let real = datastage(
            "table_definition",
            "CUSTOMER",
            json!({"data_store": "CRMDB", "data_source_name": "CRM"}),
        );
        match handler.extract(&real).unwrap() {
            Some(ExtractObject::DataStage { jobs, .. }) => assert_eq!(jobs, "CRMDB\\\\CRM\\\\CUSTOMER.tbd"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_other_handlers() {
        let term = asset(json!({"_id": "t1", "_type": "term", "_name": "Customer"}));
        assert_eq!(
            extract_handler("term").unwrap().extract(&term).unwrap(),
            Some(ExtractObject::Rid("t1".into()))
        );

        let rule = asset(json!({"_type": "data_rule", "_name": "Email valid", "project": ["Customer Quality"]}));
        let wire = serde_json::to_value(extract_handler("data_rule").unwrap().extract(&rule).unwrap()).unwrap();
        assert_eq!(wire["project"], json!("Customer Quality"));
        assert_eq!(wire["type"], json!("DataRuleDefinitions/DataRuleDefinition/ExecutableRules/ExecutableRule"));

        let child_class = asset(json!({"_type": "data_class", "_name": "Email", "class_code": "EM",
            "_context": [{"_type": "data_class", "_name": "Contact"}]}));
        assert_eq!(extract_handler("data_class").unwrap().extract(&child_class).unwrap(), None);

        assert!(matches!(extract_handler("database_column"), Err(CatalogError::Unsupported(_))));
    }
}
