//! In-memory catalog
//!
//! Evaluates queries over a local set of published and draft assets and
//! records every call, so callers can assert exactly what a run asked of
//! the catalog. Relationship properties are stored as arrays of references
//! and served back in the paged `{items, paging}` shape the REST API uses.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::query::{Condition, Join, Operator, Predicate, Query};
use super::{
    CatalogBackend, PagedResults, Paging, ProjectSubmit, TypeDefinition, UpdateDelta, UpdateMode, UpdateResponse,
};
use crate::error::{CatalogError, Result};
use crate::tree::bundle::rid_from_id;
use crate::tree::XmlTree;
use crate::workflow::{WorkflowAction, WorkflowState, WorkflowTable};

/// Number of calls of each kind received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub searches: usize,
    pub pages: usize,
    pub updates: usize,
    pub workflow_actions: usize,
    pub logouts: usize,
}

#[derive(Default)]
struct State {
    published: Vec<Value>,
    drafts: Vec<Value>,
    types: HashMap<String, TypeDefinition>,
    table: WorkflowTable,
    failing_actions: HashSet<WorkflowAction>,
    failing_updates: HashSet<String>,
    erroring_actions: HashSet<WorkflowAction>,
    unavailable_searches: usize,
    pending_pages: HashMap<String, (Vec<Value>, usize)>,
    next_token: usize,
    calls: CallCounts,
    searches: Vec<Query>,
    updates: Vec<(String, UpdateDelta)>,
    actions: Vec<(Vec<String>, WorkflowAction)>,
    bundles: HashMap<String, (Vec<u8>, String)>,
    projects: BTreeMap<String, String>,
    uploads: Vec<String>,
    submissions: Vec<(ProjectSubmit, String)>,
}

#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a published asset
    pub fn with_asset(self, asset: Value) -> Self {
        self.state.lock().published.push(asset);
        self
    }

    /// Add a workflow copy; it should carry `workflow_current_state`
    pub fn with_draft(self, asset: Value) -> Self {
        self.state.lock().drafts.push(asset);
        self
    }

    pub fn with_type(self, asset_type: &str, definition: TypeDefinition) -> Self {
        self.state
            .lock()
            .types
            .insert(asset_type.to_string(), definition);
        self
    }

    pub fn with_workflow_table(self, table: WorkflowTable) -> Self {
        self.state.lock().table = table;
        self
    }

    /// Serve `archive` and the flow document `assets` for `bundle`
    pub fn with_bundle(self, bundle: &str, archive: Vec<u8>, assets: &str) -> Self {
        self.state
            .lock()
            .bundles
            .insert(bundle.to_string(), (archive, assets.to_string()));
        self
    }

    pub fn with_quality_project(self, name: &str, xml: &str) -> Self {
        self.state.lock().projects.insert(name.to_string(), xml.to_string());
        self
    }

    /// Make every call of `action` report failure
    pub fn failing_action(self, action: WorkflowAction) -> Self {
        self.state.lock().failing_actions.insert(action);
        self
    }

    /// Make every call of `action` fail in transport
    pub fn erroring_action(self, action: WorkflowAction) -> Self {
        self.state.lock().erroring_actions.insert(action);
        self
    }

    /// Answer the next `count` searches with a 503
    pub fn unavailable_searches(self, count: usize) -> Self {
        self.state.lock().unavailable_searches = count;
        self
    }

    /// Make updates of `rid` come back with a server error
    pub fn failing_update(self, rid: &str) -> Self {
        self.state.lock().failing_updates.insert(rid.to_string());
        self
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    pub fn searches(&self) -> Vec<Query> {
        self.state.lock().searches.clone()
    }

    /// Searches that asked for `asset_type`
    pub fn searches_for(&self, asset_type: &str) -> Vec<Query> {
        self.state
            .lock()
            .searches
            .iter()
            .filter(|q| q.types.iter().any(|t| t == asset_type))
            .cloned()
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, UpdateDelta)> {
        self.state.lock().updates.clone()
    }

    pub fn workflow_actions(&self) -> Vec<(Vec<String>, WorkflowAction)> {
        self.state.lock().actions.clone()
    }

    /// Flow documents received by bundle uploads
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().uploads.clone()
    }

    /// Project documents received, with the endpoint they were sent to
    pub fn submissions(&self) -> Vec<(ProjectSubmit, String)> {
        self.state.lock().submissions.clone()
    }

    pub fn quality_project_names(&self) -> Vec<String> {
        self.state.lock().projects.keys().cloned().collect()
    }

    pub fn published(&self, rid: &str) -> Option<Value> {
        find(&self.state.lock().published, rid).cloned()
    }

    pub fn draft(&self, rid: &str) -> Option<Value> {
        find(&self.state.lock().drafts, rid).cloned()
    }
}

fn xml_attr(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

fn find<'a>(assets: &'a [Value], rid: &str) -> Option<&'a Value> {
    assets.iter().find(|a| a["_id"].as_str() == Some(rid))
}

fn find_mut<'a>(assets: &'a mut [Value], rid: &str) -> Option<&'a mut Value> {
    assets.iter_mut().find(|a| a["_id"].as_str() == Some(rid))
}

impl State {
    fn paginate(&mut self, mut items: Vec<Value>, page_size: usize) -> PagedResults {
        let page_size = page_size.max(1);
        let num_total = items.len();
        let mut next = None;
        if items.len() > page_size {
            let rest = items.split_off(page_size);
            self.next_token += 1;
            let token = format!("memory://page/{}", self.next_token);
            self.pending_pages.insert(token.clone(), (rest, page_size));
            next = Some(token);
        }
        PagedResults {
            items,
            paging: Paging {
                num_total,
                next,
                page_size: Some(page_size),
            },
        }
    }

    fn reference(&self, rid: &str) -> Value {
        match find(&self.published, rid).or_else(|| find(&self.drafts, rid)) {
            Some(asset) => json!({
                "_id": rid,
                "_type": asset["_type"],
                "_name": asset["_name"],
            }),
            None => json!({ "_id": rid }),
        }
    }
}

/// Shape an asset the way search results come back
fn project(asset: &Value, properties: &[String]) -> Value {
    let mut out = Map::new();
    for key in ["_id", "_type", "_name", "_url", "_context"] {
        if let Some(v) = asset.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if !out.contains_key("_context") {
        out.insert("_context".to_string(), Value::Array(Vec::new()));
    }
    for property in properties {
        if property == "name" {
            continue;
        }
        let Some(value) = asset.get(property) else {
            continue;
        };
        let shaped = match value {
            Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => json!({
                "items": items,
                "paging": {"numTotal": items.len()},
            }),
            other => other.clone(),
        };
        out.insert(property.clone(), shaped);
    }
    Value::Object(out)
}

/// Values of `property` on `asset`; dotted paths walk relationships or, failing
/// that, the context chain where each segment is one level further out.
fn resolve(asset: &Value, property: &str) -> Vec<Value> {
    match property {
        "name" => return vec![asset["_name"].clone()],
        "_id" | "_type" | "_name" => return vec![asset[property].clone()],
        _ => {}
    }

    let segments: Vec<&str> = property.split('.').collect();
    if segments.len() == 1 {
        return match asset.get(property) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        };
    }

    let leaf = segments[segments.len() - 1];
    if let Some(Value::Array(members)) = asset.get(segments[0]) {
        if segments.len() == 2 {
            let key = if leaf == "name" { "_name" } else { leaf };
            return members.iter().filter_map(|m| m.get(key).cloned()).collect();
        }
    }

    if leaf != "name" {
        return Vec::new();
    }
    let context = asset["_context"].as_array().cloned().unwrap_or_default();
    let hops = segments.len() - 1;
    if hops > context.len() {
        return Vec::new();
    }
    vec![context[context.len() - hops]["_name"].clone()]
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), other) | (other, Value::String(x)) => *x == other.to_string(),
        _ => a == b,
    }
}

fn compare_numbers(value: &Value, bound: &Option<Value>, accept: impl Fn(f64, f64) -> bool) -> bool {
    match (value.as_f64(), bound.as_ref().and_then(Value::as_f64)) {
        (Some(v), Some(b)) => accept(v, b),
        _ => false,
    }
}

fn like(value: &Value, pattern: &Option<Value>) -> bool {
    let (Some(value), Some(pattern)) = (value.as_str(), pattern.as_ref().and_then(Value::as_str)) else {
        return false;
    };
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%') && pattern.len() > 1;
    let core = pattern.trim_matches('%');
    match (starts, ends) {
        (true, true) => value.contains(core),
        (true, false) => value.ends_with(core),
        (false, true) => value.starts_with(core),
        (false, false) => value == core,
    }
}

fn predicate_holds(asset: &Value, predicate: &Predicate) -> bool {
    let values = resolve(asset, &predicate.property);
    let holds = match predicate.operator {
        Operator::IsNull => values.iter().all(Value::is_null),
        Operator::Eq => match &predicate.value {
            Some(expected) => values.iter().any(|v| loosely_equal(v, expected)),
            None => false,
        },
        Operator::In => match &predicate.value {
            Some(Value::Array(options)) => values
                .iter()
                .any(|v| options.iter().any(|o| loosely_equal(v, o))),
            _ => false,
        },
        Operator::Like => values.iter().any(|v| like(v, &predicate.value)),
        Operator::Between => values.iter().any(|v| {
            compare_numbers(v, &predicate.min, |v, min| v >= min)
                && compare_numbers(v, &predicate.max, |v, max| v <= max)
        }),
        Operator::Gt => values.iter().any(|v| compare_numbers(v, &predicate.value, |v, b| v > b)),
        Operator::Gte => values.iter().any(|v| compare_numbers(v, &predicate.value, |v, b| v >= b)),
        Operator::Lt => values.iter().any(|v| compare_numbers(v, &predicate.value, |v, b| v < b)),
        Operator::Lte => values.iter().any(|v| compare_numbers(v, &predicate.value, |v, b| v <= b)),
    };
    holds != predicate.negated
}

fn holds(asset: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Leaf(predicate) => predicate_holds(asset, predicate),
        Condition::Group { conditions, operator } => joined(asset, conditions, *operator),
    }
}

fn joined(asset: &Value, conditions: &[Condition], operator: Join) -> bool {
    match operator {
        Join::And => conditions.iter().all(|c| holds(asset, c)),
        Join::Or => conditions.is_empty() || conditions.iter().any(|c| holds(asset, c)),
    }
}

fn matches(asset: &Value, query: &Query) -> bool {
    let typed = asset["_type"]
        .as_str()
        .is_some_and(|t| query.types.iter().any(|q| q == t));
    typed
        && query
            .where_clause
            .as_ref()
            .map_or(true, |w| joined(asset, &w.conditions, w.operator))
}

#[async_trait]
impl CatalogBackend for InMemoryCatalog {
    async fn search(&self, query: &Query) -> Result<PagedResults> {
        let mut state = self.state.lock();
        state.calls.searches += 1;
        state.searches.push(query.clone());
        if state.unavailable_searches > 0 {
            state.unavailable_searches -= 1;
            return Err(CatalogError::backend(503, "catalog unavailable"));
        }

        let pool = if query.is_draft() { &state.drafts } else { &state.published };
        let found: Vec<Value> = pool
            .iter()
            .filter(|a| matches(a, query))
            .map(|a| project(a, &query.properties))
            .collect();
        Ok(state.paginate(found, query.page_size))
    }

    async fn fetch_page(&self, next: &str) -> Result<PagedResults> {
        let mut state = self.state.lock();
        state.calls.pages += 1;
        let (items, page_size) = state
            .pending_pages
            .remove(next)
            .ok_or_else(|| CatalogError::backend(404, format!("no such page: {}", next)))?;
        Ok(state.paginate(items, page_size))
    }

    async fn update(&self, rid: &str, delta: &UpdateDelta) -> Result<UpdateResponse> {
        let mut state = self.state.lock();
        state.calls.updates += 1;
        state.updates.push((rid.to_string(), delta.clone()));

        if state.failing_updates.contains(rid) {
            return Ok(UpdateResponse {
                status: 500,
                body: json!({"message": "update failed"}),
            });
        }

        let resolved: Vec<(String, Vec<Value>, UpdateMode)> = delta
            .0
            .iter()
            .map(|(property, change)| {
                let refs = change.items.iter().map(|id| state.reference(id)).collect();
                (property.clone(), refs, change.mode)
            })
            .collect();

        let State { drafts, published, .. } = &mut *state;
        let Some(asset) = find_mut(drafts, rid).or_else(|| find_mut(published, rid)) else {
            return Ok(UpdateResponse {
                status: 404,
                body: json!({"message": format!("no asset with id {}", rid)}),
            });
        };

        for (property, refs, mode) in resolved {
            let slot = asset
                .as_object_mut()
                .map(|o| o.entry(property).or_insert_with(|| Value::Array(Vec::new())));
            let Some(slot) = slot else { continue };
            match mode {
                UpdateMode::Replace => *slot = Value::Array(refs),
                UpdateMode::Append => {
                    if !slot.is_array() {
                        *slot = Value::Array(Vec::new());
                    }
                    if let Value::Array(existing) = slot {
                        for r in refs {
                            if !existing.iter().any(|e| e["_id"] == r["_id"]) {
                                existing.push(r);
                            }
                        }
                    }
                }
            }
        }
        Ok(UpdateResponse {
            status: 200,
            body: json!({"_id": rid}),
        })
    }

    async fn take_workflow_action(
        &self,
        rids: &[String],
        action: WorkflowAction,
        _comment: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.workflow_actions += 1;
        state.actions.push((rids.to_vec(), action));
        if state.erroring_actions.contains(&action) {
            return Err(CatalogError::backend(502, format!("{} timed out upstream", action)));
        }
        if state.failing_actions.contains(&action) {
            return Ok(false);
        }

        let table = state.table;
        let mut ok = true;
        for rid in rids {
            let Some(position) = state.drafts.iter().position(|a| a["_id"].as_str() == Some(rid.as_str())) else {
                ok = false;
                continue;
            };
            let current = state.drafts[position]["workflow_current_state"][0]
                .as_str()
                .and_then(|s| s.parse::<WorkflowState>().ok());
            let Some(current) = current else {
                ok = false;
                continue;
            };
            let allowed = matches!(
                (current, action),
                (WorkflowState::Draft, WorkflowAction::Request | WorkflowAction::Discard)
                    | (WorkflowState::WaitingApproval, WorkflowAction::Approve | WorkflowAction::Return)
                    | (WorkflowState::Approved, WorkflowAction::Publish | WorkflowAction::Return)
            );
            if !allowed {
                ok = false;
                continue;
            }
            match table.resulting_state(action, current) {
                Some(next) => {
                    state.drafts[position]["workflow_current_state"] = json!([next.as_str()]);
                }
                None => {
                    let mut removed = state.drafts.remove(position);
                    if action == WorkflowAction::Publish {
                        if let Some(o) = removed.as_object_mut() {
                            o.remove("workflow_current_state");
                        }
                        state.published.retain(|a| a["_id"].as_str() != Some(rid.as_str()));
                        state.published.push(removed);
                    }
                }
            }
        }
        Ok(ok)
    }

    async fn type_definition(&self, asset_type: &str) -> Result<TypeDefinition> {
        self.state
            .lock()
            .types
            .get(asset_type)
            .cloned()
            .ok_or_else(|| CatalogError::backend(404, format!("unknown type {}", asset_type)))
    }

    async fn download_bundle(&self, bundle: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .bundles
            .get(bundle)
            .map(|(archive, _)| archive.clone())
            .ok_or_else(|| CatalogError::backend(404, format!("unknown bundle {}", bundle)))
    }

    async fn bundle_assets(&self, bundle: &str) -> Result<String> {
        self.state
            .lock()
            .bundles
            .get(bundle)
            .map(|(_, assets)| assets.clone())
            .ok_or_else(|| CatalogError::backend(404, format!("unknown bundle {}", bundle)))
    }

    /// Every uploaded asset is stored under the RID its bundle ID carries
    async fn upload_bundle_assets(&self, xml: &str) -> Result<BTreeMap<String, String>> {
        let tree = XmlTree::parse(xml).map_err(|e| CatalogError::backend(400, e))?;
        let mut rids = BTreeMap::new();
        for asset in tree.select(tree.root(), &["assets", "asset"]) {
            let id = tree
                .attr(asset, "ID")
                .ok_or_else(|| CatalogError::backend(400, "bundle asset without an ID"))?;
            let rid = rid_from_id(id).map_err(|e| CatalogError::backend(400, e))?;
            rids.insert(id.to_string(), rid.to_string());
        }
        self.state.lock().uploads.push(xml.to_string());
        Ok(rids)
    }

    async fn quality_projects(&self) -> Result<String> {
        let state = self.state.lock();
        let mut listing = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><iaapi:Projects xmlns:iaapi="http://www.ibm.com/investigate/api/iaapi">"#,
        );
        for name in state.projects.keys() {
            listing.push_str(&format!(r#"<Project name="{}"/>"#, xml_attr(name)));
        }
        listing.push_str("</iaapi:Projects>");
        Ok(listing)
    }

    async fn quality_project(&self, name: &str) -> Result<String> {
        self.state
            .lock()
            .projects
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::backend(404, format!("unknown project {}", name)))
    }

    /// Create refuses an existing name and update a missing one
    async fn submit_quality_project(&self, xml: &str, submit: ProjectSubmit) -> Result<UpdateResponse> {
        let tree = XmlTree::parse(xml).map_err(|e| CatalogError::backend(400, e))?;
        let name = tree.attr(tree.root(), "name").unwrap_or_default().to_string();
        let mut state = self.state.lock();
        state.submissions.push((submit, xml.to_string()));
        let exists = state.projects.contains_key(&name);
        let status = match (submit, exists) {
            (ProjectSubmit::Create, true) => 409,
            (ProjectSubmit::Update, false) => 404,
            _ => {
                state.projects.insert(name.clone(), xml.to_string());
                200
            }
        };
        Ok(UpdateResponse {
            status,
            body: Value::String(format!("{} {}", submit.as_str(), name)),
        })
    }

    async fn logout(&self) -> Result<()> {
        self.state.lock().calls.logouts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_asset(json!({
                "_id": "t1", "_type": "term", "_name": "Customer",
                "_context": [
                    {"_type": "category", "_name": "Enterprise"},
                    {"_type": "category", "_name": "Party"}
                ],
                "modified_on": 1500
            }))
            .with_asset(json!({
                "_id": "t2", "_type": "term", "_name": "Supplier",
                "_context": [{"_type": "category", "_name": "Party"}],
                "modified_on": 2500
            }))
    }

    #[tokio::test]
    async fn test_context_paths_count_outwards() {
        let catalog = catalog();
        let query = Query::new(["term"])
            .condition(Condition::eq("parent_category.name", "Party"))
            .condition(Condition::eq("parent_category.parent_category.name", "Enterprise"));
        let page = catalog.search(&query).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["_id"], "t1");
    }

    #[tokio::test]
    async fn test_between_and_negation() {
        let catalog = catalog();
        let query = Query::new(["term"]).condition(Condition::between("modified_on", 2000, 3000));
        assert_eq!(catalog.search(&query).await.unwrap().items[0]["_id"], "t2");

        let query = Query::new(["term"]).condition(Condition::eq("_id", "t2").negate());
        assert_eq!(catalog.search(&query).await.unwrap().items[0]["_id"], "t1");
    }

    #[tokio::test]
    async fn test_paging_follows_tokens() {
        let catalog = catalog();
        let first = catalog.search(&Query::new(["term"]).page_size(1)).await.unwrap();
        assert_eq!(first.paging.num_total, 2);
        let next = first.paging.next.unwrap();
        let second = catalog.fetch_page(&next).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.paging.next.is_none());
        assert!(catalog.fetch_page(&next).await.is_err());
    }
}
