//! Document exchange with the catalog
//!
//! Downloads asset bundles and data quality projects, prunes them to the
//! assets being promoted, and sends them to another environment. The
//! pruning itself lives in [`crate::tree`]; this module only moves the
//! documents in and out.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::catalog::{CatalogSession, ProjectSubmit};
use crate::error::{CatalogError, Result};
use crate::tree::bundle::{filter_bundle, set_import_actions, BundleFilterReport};
use crate::tree::quality::{
    apply_project_mappings, filter_quality_project, project_names, rename_project, ProjectMapping, QualityFilterReport,
    QualityKeep,
};
use crate::tree::XmlTree;

/// Definition archive of a bundle, exactly as the catalog serves it
pub async fn extract_bundle(session: &mut CatalogSession, bundle: &str) -> Result<Vec<u8>> {
    let archive = session.download_bundle(bundle).await?;
    if archive.is_empty() {
        return Err(CatalogError::NotFound(format!("bundle {} came back empty", bundle)));
    }
    Ok(archive)
}

/// Instances of a bundle, pruned to `keep` (RIDs) with their ancestry and
/// direct children
pub async fn extract_bundle_assets(
    session: &mut CatalogSession,
    bundle: &str,
    keep: &HashSet<String>,
) -> Result<(XmlTree, BundleFilterReport)> {
    let xml = session.bundle_assets(bundle).await?;
    let mut tree = XmlTree::parse(&xml)?;
    let report = filter_bundle(&mut tree, keep)?;
    Ok((tree, report))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleUpload {
    pub complete: usize,
    pub partial: usize,
    /// Bundle ID to the RID it was stored under
    pub rids: BTreeMap<String, String>,
    pub uploaded_xml: String,
}

/// Mark import actions by class and upload the document
pub async fn load_bundle_assets(
    session: &mut CatalogSession,
    tree: &mut XmlTree,
    complete_types: &HashSet<String>,
) -> Result<BundleUpload> {
    let (complete, partial) = set_import_actions(tree, complete_types)?;
    let uploaded_xml = tree.to_xml_string()?;
    let rids = session.upload_bundle_assets(&uploaded_xml, complete + partial).await?;
    if rids.len() < complete + partial {
        tracing::warn!(
            uploaded = complete + partial,
            stored = rids.len(),
            "catalog stored fewer bundle assets than were uploaded"
        );
    }
    Ok(BundleUpload {
        complete,
        partial,
        rids,
        uploaded_xml,
    })
}

/// A quality project export pruned to the kept assets
pub async fn extract_quality_project(
    session: &mut CatalogSession,
    project: &str,
    keep: &QualityKeep,
) -> Result<(XmlTree, QualityFilterReport)> {
    let xml = session.quality_project(project).await?;
    let mut tree = XmlTree::parse(&xml)?;
    let report = filter_quality_project(&mut tree, keep);
    Ok((tree, report))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectLoad {
    pub project: String,
    pub submit: ProjectSubmit,
    /// Data source attributes rewritten by the mappings
    pub replacements: usize,
}

/// Load a project document as `project`, updating it when the target
/// already has a project of that name and creating it otherwise
pub async fn load_quality_project(
    session: &mut CatalogSession,
    tree: &mut XmlTree,
    project: &str,
    mappings: &[ProjectMapping],
) -> Result<ProjectLoad> {
    let listing = XmlTree::parse(&session.quality_projects().await?)?;
    let submit = if project_names(&listing).iter().any(|name| name == project) {
        ProjectSubmit::Update
    } else {
        ProjectSubmit::Create
    };

    rename_project(tree, project);
    let replacements = apply_project_mappings(tree, mappings)?;
    let xml = tree.to_xml_string()?;

    let response = session.submit_quality_project(project, &xml, submit).await?;
    if !response.is_success() {
        return Err(CatalogError::backend(response.status, response.body));
    }
    Ok(ProjectLoad {
        project: project.to_string(),
        submit,
        replacements,
    })
}
