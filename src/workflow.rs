//! Workflow State Machine
//!
//! Business-metadata assets move `DRAFT -> WAITING_APPROVAL -> APPROVED`
//! and leave the workflow when published or discarded. A desired final
//! action is reached from any state by chaining the minimal sequence of
//! single-step actions from a fixed table.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSession, Condition, Join, Query};
use crate::compare::{same_asset, DEFAULT_IGNORED_KEYS};
use crate::error::{CatalogError, Result};
use crate::model::types::is_workflow_type;
use crate::model::Asset;

/// Workflow state of a draft copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Draft,
    WaitingApproval,
    Approved,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 3] = [
        WorkflowState::Draft,
        WorkflowState::WaitingApproval,
        WorkflowState::Approved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Draft => "DRAFT",
            WorkflowState::WaitingApproval => "WAITING_APPROVAL",
            WorkflowState::Approved => "APPROVED",
        }
    }

    /// Actions available from this state: progress first, regress second
    fn next_actions(&self) -> [WorkflowAction; 2] {
        match self {
            WorkflowState::Draft => [WorkflowAction::Request, WorkflowAction::Discard],
            WorkflowState::WaitingApproval => [WorkflowAction::Approve, WorkflowAction::Return],
            WorkflowState::Approved => [WorkflowAction::Publish, WorkflowAction::Return],
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(WorkflowState::Draft),
            "WAITING_APPROVAL" => Ok(WorkflowState::WaitingApproval),
            "APPROVED" => Ok(WorkflowState::Approved),
            other => Err(CatalogError::Config(format!("unknown workflow state '{}'", other))),
        }
    }
}

/// Where to start a progression from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    /// Every asset that has any workflow state
    All,
    State(WorkflowState),
}

impl FromStr for StartState {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("ALL") {
            Ok(StartState::All)
        } else {
            s.parse().map(StartState::State)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowAction {
    Request,
    Approve,
    Publish,
    Return,
    Discard,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Request => "request",
            WorkflowAction::Approve => "approve",
            WorkflowAction::Publish => "publish",
            WorkflowAction::Return => "return",
            WorkflowAction::Discard => "discard",
        }
    }

    /// Forward-moving actions
    pub fn is_progressive(&self) -> bool {
        matches!(
            self,
            WorkflowAction::Request | WorkflowAction::Approve | WorkflowAction::Publish
        )
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowAction {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "request" => Ok(WorkflowAction::Request),
            "approve" => Ok(WorkflowAction::Approve),
            "publish" => Ok(WorkflowAction::Publish),
            "return" => Ok(WorkflowAction::Return),
            "discard" => Ok(WorkflowAction::Discard),
            other => Err(CatalogError::Config(format!("unknown workflow action '{}'", other))),
        }
    }
}

/// Transition table; the target of `return` from APPROVED differs between environments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowTable {
    pub return_from_approved: WorkflowState,
}

impl Default for WorkflowTable {
    fn default() -> Self {
        Self {
            return_from_approved: WorkflowState::WaitingApproval,
        }
    }
}

/// Ordering of states along the forward path; leaving the workflow is last
fn rank(state: Option<WorkflowState>) -> u8 {
    match state {
        Some(WorkflowState::Draft) => 0,
        Some(WorkflowState::WaitingApproval) => 1,
        Some(WorkflowState::Approved) => 2,
        None => 3,
    }
}

impl WorkflowTable {
    /// State reached by taking `action` from `from`; `None` means the asset left the workflow
    pub fn resulting_state(&self, action: WorkflowAction, from: WorkflowState) -> Option<WorkflowState> {
        match action {
            WorkflowAction::Request => Some(WorkflowState::WaitingApproval),
            WorkflowAction::Approve => Some(WorkflowState::Approved),
            WorkflowAction::Return => match from {
                WorkflowState::Approved => Some(self.return_from_approved),
                _ => Some(WorkflowState::Draft),
            },
            WorkflowAction::Publish | WorkflowAction::Discard => None,
        }
    }

    /// Single next action toward `final_action`, or `None` when the asset is
    /// already at or past where that action would leave it.
    pub fn next_action(&self, final_action: WorkflowAction, current: WorkflowState) -> Option<WorkflowAction> {
        let [progress, regress] = current.next_actions();
        if final_action.is_progressive() {
            let target = match final_action {
                WorkflowAction::Request => Some(WorkflowState::WaitingApproval),
                WorkflowAction::Approve => Some(WorkflowState::Approved),
                _ => None,
            };
            (rank(Some(current)) < rank(target)).then_some(progress)
        } else {
            // Nothing to return from DRAFT; only a discard is still meaningful there
            if final_action == WorkflowAction::Return && current == WorkflowState::Draft {
                return None;
            }
            Some(regress)
        }
    }
}

/// One workflow call made during a progression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStep {
    pub items: Vec<String>,
    pub action: WorkflowAction,
    pub from: WorkflowState,
    pub to: Option<WorkflowState>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowReport {
    pub actions: Vec<WorkflowStep>,
    pub failed: Vec<WorkflowStep>,
}

impl WorkflowReport {
    fn absorb(&mut self, other: WorkflowReport) {
        self.actions.extend(other.actions);
        self.failed.extend(other.failed);
    }
}

/// Drive a batch of assets sharing `from` toward `final_action`.
///
/// Stops when the chain reaches the final action, leaves the workflow,
/// would transition to the same state, or a call fails.
pub async fn advance(
    session: &mut CatalogSession,
    table: &WorkflowTable,
    rids: &[String],
    from: WorkflowState,
    final_action: WorkflowAction,
    comment: &str,
) -> WorkflowReport {
    let mut report = WorkflowReport::default();
    if rids.is_empty() {
        return report;
    }

    let mut current = from;
    while let Some(action) = table.next_action(final_action, current) {
        let to = table.resulting_state(action, current);
        if to == Some(current) {
            break;
        }

        let step = WorkflowStep {
            items: rids.to_vec(),
            action,
            from: current,
            to,
        };
        let succeeded = match session.take_workflow_action(rids, action, comment).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(action = %action, error = %e, "workflow action failed");
                false
            }
        };
        if !succeeded {
            report.failed.push(step);
            break;
        }
        report.actions.push(step);

        match to {
            Some(next) if action != final_action => current = next,
            _ => break,
        }
    }
    report
}

/// Parameters of a state-driven progression over a whole asset type
#[derive(Debug, Clone)]
pub struct ProgressionRequest {
    pub asset_type: String,
    pub from: StartState,
    pub action: WorkflowAction,
    pub comment: String,
    pub conditions: Vec<Condition>,
    pub join: Join,
    pub batch: usize,
    /// Leave drafts alone when they are identical to their published copy
    pub compare_to_published: bool,
    /// Properties fetched on both sides when comparing
    pub compare_properties: Vec<String>,
}

impl ProgressionRequest {
    pub fn new(asset_type: impl Into<String>, from: StartState, action: WorkflowAction) -> Self {
        Self {
            asset_type: asset_type.into(),
            from,
            action,
            comment: String::new(),
            conditions: Vec::new(),
            join: Join::And,
            batch: 100,
            compare_to_published: false,
            compare_properties: ["short_description", "long_description", "labels", "stewards"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressionRun {
    pub workflow_enabled: bool,
    pub asset_count: usize,
    pub assets: Vec<Asset>,
    /// Drafts skipped because they match their published copy
    pub unchanged: Vec<String>,
    #[serde(flatten)]
    pub report: WorkflowReport,
}

/// Query the draft copies matching `request`, bucket them by current state
/// and advance each bucket independently.
pub async fn progress(
    session: &mut CatalogSession,
    table: &WorkflowTable,
    request: &ProgressionRequest,
) -> Result<ProgressionRun> {
    if !is_workflow_type(&request.asset_type) {
        return Err(CatalogError::Unsupported(request.asset_type.clone()));
    }

    let mut run = ProgressionRun::default();
    if !session.is_workflow_enabled().await? {
        tracing::info!("workflow is not enabled, nothing to progress");
        return Ok(run);
    }
    run.workflow_enabled = true;

    let state_condition = match request.from {
        StartState::All => Condition::not_null("workflow_current_state"),
        StartState::State(state) => Condition::eq("workflow_current_state", state.as_str()),
    };
    let mut properties: Vec<&str> = vec!["name", "workflow_current_state"];
    if request.compare_to_published {
        properties.extend(request.compare_properties.iter().map(String::as_str));
    }
    let query = Query::new([request.asset_type.as_str()])
        .properties(properties.iter().copied())
        .page_size(request.batch)
        .draft()
        .condition(state_condition)
        .nested(request.conditions.clone(), request.join);

    let drafts = session.search_all(&query).await?;
    run.asset_count = drafts.len();

    let unchanged = if request.compare_to_published {
        unchanged_drafts(session, request, &drafts, &properties).await?
    } else {
        HashSet::new()
    };

    let mut buckets: [Vec<String>; 3] = Default::default();
    for asset in &drafts {
        let rid = asset.require_rid()?.to_string();
        if unchanged.contains(&rid) {
            run.unchanged.push(rid);
            continue;
        }
        let Some(state) = asset.workflow_state() else {
            tracing::warn!(rid = %rid, "draft without a workflow state, skipping");
            continue;
        };
        match state.parse::<WorkflowState>() {
            Ok(state) => buckets[rank(Some(state)) as usize].push(rid),
            Err(_) => tracing::warn!(rid = %rid, state, "unrecognised workflow state, skipping"),
        }
    }

    for state in WorkflowState::ALL {
        if let StartState::State(only) = request.from {
            if only != state {
                continue;
            }
        }
        let rids = &buckets[rank(Some(state)) as usize];
        let bucket = advance(session, table, rids, state, request.action, &request.comment).await;
        run.report.absorb(bucket);
    }

    run.assets = drafts;
    Ok(run)
}

/// RIDs of drafts that do not differ from their published copy
async fn unchanged_drafts(
    session: &mut CatalogSession,
    request: &ProgressionRequest,
    drafts: &[Asset],
    properties: &[&str],
) -> Result<HashSet<String>> {
    let rids: Vec<&str> = drafts.iter().filter_map(|a| a.rid.as_deref()).collect();
    if rids.is_empty() {
        return Ok(HashSet::new());
    }
    let query = Query::new([request.asset_type.as_str()])
        .properties(properties.iter().copied())
        .page_size(request.batch)
        .condition(Condition::is_in("_id", rids.iter().copied()));
    let published = session.search_all(&query).await?;

    let mut unchanged = HashSet::new();
    for draft in drafts {
        let Some(rid) = draft.rid.as_deref() else { continue };
        let Some(live) = published.iter().find(|p| p.rid.as_deref() == Some(rid)) else {
            continue;
        };
        if same_asset(
            &serde_json::to_value(draft)?,
            &serde_json::to_value(live)?,
            DEFAULT_IGNORED_KEYS,
        ) {
            unchanged.insert(rid.to_string());
        }
    }
    Ok(unchanged)
}
