use std::collections::HashSet;
use std::sync::Arc;

use catalog_promote::catalog::ProjectSubmit;
use catalog_promote::exchange::{
    extract_bundle, extract_bundle_assets, extract_quality_project, load_bundle_assets, load_quality_project,
};
use catalog_promote::model::AssetRef;
use catalog_promote::tree::quality::{ProjectAttribute, ProjectMapping, QualityKeep};
use catalog_promote::{CatalogError, CatalogSession, InMemoryCatalog, XmlTree};

const ASSETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<doc xmlns="http://www.ibm.com/iis/flow-doc">
  <assets>
    <asset class="$Files-Server" repr="srv" ID="ID_s1"/>
    <asset class="$Files-Folder" repr="landing" ID="ID_f1">
      <reference name="Server" assetIDs="ID_s1"/>
    </asset>
    <asset class="$Files-Folder" repr="archive" ID="ID_f2">
      <reference name="Server" assetIDs="ID_s1"/>
    </asset>
  </assets>
</doc>"#;

const PROJECT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<iaapi:Project xmlns:iaapi="http://www.ibm.com/investigate/api/iaapi" name="Customer Quality">
  <DataSources>
    <DataSource host="DEVHOST" name="CRM"/>
  </DataSources>
  <DataRuleDefinitions>
    <DataRuleDefinition name="Email valid"/>
    <DataRuleDefinition name="Postcode format"/>
  </DataRuleDefinitions>
</iaapi:Project>"#;

fn keep(rids: &[&str]) -> HashSet<String> {
    rids.iter().map(|r| r.to_string()).collect()
}

fn host_mapping() -> Vec<ProjectMapping> {
    vec![ProjectMapping {
        element: "DataSource".into(),
        attribute: ProjectAttribute::Host,
        from: "DEVHOST".into(),
        to: "PRODHOST".into(),
    }]
}

#[tokio::test]
async fn test_bundle_assets_move_between_environments() {
    let dev = Arc::new(InMemoryCatalog::new().with_bundle("Files", b"PK\x03\x04".to_vec(), ASSETS));
    let mut session = CatalogSession::new(dev);
    let (mut tree, report) = extract_bundle_assets(&mut session, "Files", &keep(&["f1"])).await.unwrap();
    assert_eq!(report.asset_count, 2);
    assert_eq!(report.dropped, 1);

    let prod = Arc::new(InMemoryCatalog::new());
    let mut session = CatalogSession::new(prod.clone());
    let complete: HashSet<String> = ["$Files-Folder".to_string()].into();
    let upload = load_bundle_assets(&mut session, &mut tree, &complete).await.unwrap();
    assert_eq!((upload.complete, upload.partial), (1, 1));
    assert_eq!(upload.rids.get("ID_f1").map(String::as_str), Some("f1"));

    let sent = prod.uploads();
    assert_eq!(sent.len(), 1);
    let sent = XmlTree::parse(&sent[0]).unwrap();
    let action = sent.child_named(sent.root(), "importAction").unwrap();
    assert_eq!(sent.attr(action, "completeAssetIDs"), Some("ID_f1"));
    assert_eq!(sent.attr(action, "partialAssetIDs"), Some("ID_s1"));

    let audit = session.close().await.unwrap();
    assert_eq!(audit.documents.len(), 1);
}

#[tokio::test]
async fn test_bundle_archive_download() {
    let catalog = Arc::new(InMemoryCatalog::new().with_bundle("Files", b"PK\x03\x04".to_vec(), ASSETS));
    let mut session = CatalogSession::new(catalog);
    assert_eq!(extract_bundle(&mut session, "Files").await.unwrap(), b"PK\x03\x04".to_vec());

    let err = extract_bundle(&mut session, "Missing").await.unwrap_err();
    assert!(matches!(err, CatalogError::Backend { status: 404, .. }));
}

#[tokio::test]
async fn test_quality_project_is_created_then_updated() {
    let dev = Arc::new(InMemoryCatalog::new().with_quality_project("Customer Quality", PROJECT));
    let mut session = CatalogSession::new(dev);
    let refs = vec![AssetRef::new("data_rule_definition", "Email valid")];
    let (mut tree, report) = extract_quality_project(&mut session, "Customer Quality", &QualityKeep::from_refs(&refs))
        .await
        .unwrap();
    assert_eq!(report.asset_count, 1);

    let prod = Arc::new(InMemoryCatalog::new());
    let mut session = CatalogSession::new(prod.clone());
    let first = load_quality_project(&mut session, &mut tree, "Customer Quality PROD", &host_mapping())
        .await
        .unwrap();
    assert_eq!(first.submit, ProjectSubmit::Create);
    assert_eq!(first.replacements, 1);

    let second = load_quality_project(&mut session, &mut tree, "Customer Quality PROD", &host_mapping())
        .await
        .unwrap();
    assert_eq!(second.submit, ProjectSubmit::Update);
    assert_eq!(second.replacements, 0);

    assert_eq!(prod.quality_project_names(), vec!["Customer Quality PROD".to_string()]);
    let submissions = prod.submissions();
    let (_, stored) = &submissions[1];
    assert!(stored.contains("PRODHOST"));
    assert!(!stored.contains("Postcode format"));
}

#[tokio::test]
async fn test_invalid_project_mapping_sends_nothing() {
    let target = Arc::new(InMemoryCatalog::new().with_quality_project("Customer Quality", PROJECT));
    let mut session = CatalogSession::new(target.clone());
    let mut tree = XmlTree::parse(PROJECT).unwrap();

    let load = load_quality_project(&mut session, &mut tree, "Customer Quality", &[]).await.unwrap();
    assert_eq!(load.submit, ProjectSubmit::Update);

    let mut broken = XmlTree::parse("<iaapi:Project xmlns:iaapi=\"urn:ia\"/>").unwrap();
    let err = load_quality_project(&mut session, &mut broken, "Customer Quality", &[
        ProjectMapping {
            element: "Schema".into(),
            attribute: ProjectAttribute::Host,
            from: "a".into(),
            to: "b".into(),
        },
    ])
    .await
    .unwrap_err();
    assert!(matches!(err, CatalogError::Config(_)));
    assert_eq!(target.submissions().len(), 1);
}
