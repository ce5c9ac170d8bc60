use std::sync::Arc;

use serde_json::{json, Value};

use catalog_promote::workflow::{progress, ProgressionRequest, StartState, WorkflowAction, WorkflowState, WorkflowTable};
use catalog_promote::{CatalogError, CatalogSession, InMemoryCatalog};

fn draft(rid: &str, state: &str) -> Value {
    json!({
        "_id": rid, "_type": "term", "_name": format!("Term {}", rid),
        "_context": [{"_type": "category", "_name": "Party"}],
        "short_description": format!("about {}", rid),
        "workflow_current_state": [state],
    })
}

fn actions_for(catalog: &InMemoryCatalog, rid: &str) -> Vec<WorkflowAction> {
    catalog
        .workflow_actions()
        .into_iter()
        .filter(|(items, _)| items.iter().any(|i| i == rid))
        .map(|(_, action)| action)
        .collect()
}

#[tokio::test]
async fn test_publish_from_draft_takes_three_actions() {
    let catalog = Arc::new(InMemoryCatalog::new().with_draft(draft("d1", "DRAFT")));
    let mut session = CatalogSession::new(catalog.clone());
    let request = ProgressionRequest::new("term", StartState::State(WorkflowState::Draft), WorkflowAction::Publish);

    let run = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert!(run.workflow_enabled);
    assert_eq!(run.asset_count, 1);
    assert_eq!(
        actions_for(&catalog, "d1"),
        vec![WorkflowAction::Request, WorkflowAction::Approve, WorkflowAction::Publish]
    );
    assert!(run.report.failed.is_empty());
    assert!(catalog.draft("d1").is_none());
    assert!(catalog.published("d1").is_some());

    let audit = session.close().await.unwrap();
    assert_eq!(audit.workflow_actions.len(), 3);
}

#[tokio::test]
async fn test_all_states_advance_independently() {
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_draft(draft("d1", "DRAFT"))
            .with_draft(draft("w1", "WAITING_APPROVAL"))
            .with_draft(draft("a1", "APPROVED")),
    );
    let mut session = CatalogSession::new(catalog.clone());
    let request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Publish);

    let run = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert_eq!(run.report.actions.len(), 6);
    assert_eq!(actions_for(&catalog, "d1").len(), 3);
    assert_eq!(
        actions_for(&catalog, "w1"),
        vec![WorkflowAction::Approve, WorkflowAction::Publish]
    );
    assert_eq!(actions_for(&catalog, "a1"), vec![WorkflowAction::Publish]);
    for rid in ["d1", "w1", "a1"] {
        assert!(catalog.published(rid).is_some(), "{} not published", rid);
    }
}

#[tokio::test]
async fn test_failed_bucket_does_not_stop_the_others() {
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_draft(draft("d1", "DRAFT"))
            .with_draft(draft("w1", "WAITING_APPROVAL"))
            .with_draft(draft("a1", "APPROVED"))
            .failing_action(WorkflowAction::Approve),
    );
    let mut session = CatalogSession::new(catalog.clone());
    let request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Publish);

    let run = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert_eq!(run.report.failed.len(), 2);
    assert!(run.report.failed.iter().all(|step| step.action == WorkflowAction::Approve));
    assert_eq!(run.report.actions.len(), 2);
    assert!(catalog.published("a1").is_some());
    assert_eq!(
        catalog.draft("d1").unwrap()["workflow_current_state"],
        json!(["WAITING_APPROVAL"])
    );

    let audit = session.close().await.unwrap();
    assert_eq!(audit.workflow_failed.len(), 2);
}

#[tokio::test]
async fn test_discard_walks_back_before_discarding() {
    let catalog = Arc::new(InMemoryCatalog::new().with_draft(draft("w1", "WAITING_APPROVAL")));
    let mut session = CatalogSession::new(catalog.clone());
    let request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Discard);

    progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert_eq!(
        actions_for(&catalog, "w1"),
        vec![WorkflowAction::Return, WorkflowAction::Discard]
    );
    assert!(catalog.draft("w1").is_none());
    assert!(catalog.published("w1").is_none());
}

#[tokio::test]
async fn test_nothing_happens_without_workflow() {
    let catalog = Arc::new(InMemoryCatalog::new().with_asset(json!({
        "_id": "t1", "_type": "term", "_name": "Customer",
        "_context": [{"_type": "category", "_name": "Party"}],
    })));
    let mut session = CatalogSession::new(catalog.clone());
    let request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Publish);

    let run = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert!(!run.workflow_enabled);
    assert_eq!(catalog.calls().workflow_actions, 0);
}

#[tokio::test]
async fn test_unchanged_drafts_are_left_alone() {
    let mut published = draft("d1", "DRAFT");
    if let Some(asset) = published.as_object_mut() {
        asset.remove("workflow_current_state");
    }
    let catalog = Arc::new(
        InMemoryCatalog::new()
            .with_asset(published)
            .with_draft(draft("d1", "DRAFT"))
            .with_draft(draft("d2", "DRAFT")),
    );
    let mut session = CatalogSession::new(catalog.clone());
    let mut request = ProgressionRequest::new("term", StartState::All, WorkflowAction::Request);
    request.compare_to_published = true;

    let run = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap();
    assert_eq!(run.unchanged, vec!["d1".to_string()]);
    assert!(actions_for(&catalog, "d1").is_empty());
    assert_eq!(actions_for(&catalog, "d2"), vec![WorkflowAction::Request]);
}

#[tokio::test]
async fn test_non_workflow_type_is_unsupported() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut session = CatalogSession::new(catalog);
    let request = ProgressionRequest::new("database_table", StartState::All, WorkflowAction::Publish);

    let err = progress(&mut session, &WorkflowTable::default(), &request).await.unwrap_err();
    assert!(matches!(err, CatalogError::Unsupported(_)));
}
