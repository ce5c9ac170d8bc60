//! Operational lineage flow records
//!
//! A flow document describes one job run: the design and deployment
//! locators, the actual parameters it ran with and the read and write
//! events with their data resources. Promoting a flow to another
//! environment means pointing every locator at the target engine host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{NodeId, XmlTree};
use crate::error::{CatalogError, Result};

const FINISHED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const CONNECTION_PARAMETERS: [&str; 2] = ["SourceConnectionString", "TargetConnectionString"];

/// Run outcome recorded on the flow root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub status_code: Option<String>,
    pub message: Option<String>,
    pub finished_at: Option<String>,
}

/// What a run touched, independent of the host it ran on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowIdentity {
    pub project: String,
    pub job: String,
    pub source: String,
    pub source_cols: Vec<String>,
    pub target: String,
    pub target_cols: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostReplacement {
    pub src_host: String,
    pub replacements: usize,
    pub changed: bool,
}

pub struct LineageFlow {
    tree: XmlTree,
    connections: HashMap<String, String>,
}

fn missing(what: &str) -> CatalogError {
    CatalogError::Structural(format!("flow document has no {}", what))
}

impl LineageFlow {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(Self {
            tree: XmlTree::parse(xml)?,
            connections: HashMap::new(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn to_xml_string(&self) -> Result<String> {
        self.tree.to_xml_string()
    }

    pub fn status(&self) -> RunStatus {
        let root = self.tree.root();
        let get = |key: &str| self.tree.attr(root, key).map(str::to_string);
        RunStatus {
            status_code: get("StatusCode"),
            message: get("Message"),
            finished_at: get("FinishedAt"),
        }
    }

    /// Completion time in epoch milliseconds
    pub fn finished_at(&self) -> Result<i64> {
        let raw = self
            .tree
            .attr(self.tree.root(), "FinishedAt")
            .ok_or_else(|| missing("FinishedAt"))?;
        let head = raw.get(..19).unwrap_or(raw);
        let parsed = NaiveDateTime::parse_from_str(head, FINISHED_FORMAT)
            .map_err(|e| CatalogError::Structural(format!("bad FinishedAt {}: {}", raw, e)))?;
        Ok(parsed.and_utc().timestamp_millis())
    }

    fn component(&self, parent: NodeId, key: &str, value: &str) -> Option<NodeId> {
        self.tree
            .children_named(parent, "LocatorComponent")
            .find(|c| self.tree.attr(*c, key) == Some(value))
    }

    fn component_name(&self, parent: NodeId, key: &str, value: &str) -> Result<String> {
        self.component(parent, key, value)
            .and_then(|c| self.tree.attr(c, "Name"))
            .map(str::to_string)
            .ok_or_else(|| missing(&format!("{}={} locator component", key, value)))
    }

    fn host_component(&self, locator: NodeId) -> Result<NodeId> {
        self.component(locator, "Class", "Computer")
            .ok_or_else(|| missing("Computer locator component"))
    }

    fn event(&self, kind: &str) -> Result<NodeId> {
        self.tree
            .select(self.tree.root(), &["Events", "Event"])
            .into_iter()
            .find(|e| self.tree.attr(*e, "Type") == Some(kind))
            .ok_or_else(|| missing(&format!("{} event", kind)))
    }

    fn locator(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.tree.child_named(parent, name).ok_or_else(|| missing(name))
    }

    fn design(&self) -> Result<NodeId> {
        self.tree
            .select(self.tree.root(), &["Design", "SoftwareResourceLocator"])
            .into_iter()
            .next()
            .ok_or_else(|| missing("design locator"))
    }

    pub fn project(&self) -> Result<String> {
        self.component_name(self.design()?, "SubClass", "Project")
    }

    pub fn job(&self) -> Result<String> {
        self.component_name(self.design()?, "SubClass", "Job")
    }

    fn set_host_if(&mut self, host: NodeId, original: &str, target: &str) -> bool {
        if self.tree.attr(host, "Name") == Some(original) && original != target {
            self.tree.set_attr(host, "Name", target);
            true
        } else {
            false
        }
    }

    /// Point the deployment and every locator that named the deployment
    /// host at `target`. Connection-string parameters are prefixed with the
    /// host they were run against so they stay unique once mapped.
    pub fn replace_host(&mut self, target: &str) -> Result<HostReplacement> {
        let root = self.tree.root();
        let deployment = self
            .tree
            .select(root, &["Deployment", "SoftwareResourceLocator"])
            .into_iter()
            .next()
            .ok_or_else(|| missing("deployment locator"))?;
        let deployment_host = self.host_component(deployment)?;
        let original = self
            .tree
            .attr(deployment_host, "Name")
            .ok_or_else(|| missing("deployment host name"))?
            .to_string();

        let mut result = HostReplacement {
            src_host: original.clone(),
            ..Default::default()
        };
        if self.set_host_if(deployment_host, &original, target) {
            result.replacements += 1;
        }

        for parameter in self.tree.select(root, &["ActualParameters", "ActualParameter"]) {
            let locator = self.locator(parameter, "SoftwareResourceLocator")?;
            let host = self.host_component(locator)?;
            let formal = self.component_name(locator, "Class", "FormalParameter")?;
            if CONNECTION_PARAMETERS.contains(&formal.as_str()) {
                let run_host = self.tree.attr(host, "Name").unwrap_or_default().to_string();
                let value = self.tree.attr(parameter, "Value").unwrap_or_default().to_string();
                self.tree.set_attr(parameter, "Value", format!("{}__{}", run_host, value));
                self.connections.insert(formal, value);
                result.changed = true;
            }
            if self.set_host_if(host, &original, target) {
                result.replacements += 1;
            }
        }

        for kind in ["Read", "Write"] {
            let event = self.event(kind)?;
            let resource = self.locator(event, "DataResourceLocator")?;
            let host = self.host_component(resource)?;
            if self.set_host_if(host, &original, target) {
                result.replacements += 1;
            }
        }

        result.changed |= result.replacements > 0;
        tracing::info!(from = %original, to = target, replacements = result.replacements, "replaced flow host");
        Ok(result)
    }

    /// Connection string a parameter ran with, before any host prefixing
    fn connection(&self, formal: &str) -> Option<String> {
        if let Some(original) = self.connections.get(formal) {
            return Some(original.clone());
        }
        let root = self.tree.root();
        self.tree
            .select(root, &["ActualParameters", "ActualParameter"])
            .into_iter()
            .find(|p| {
                self.tree
                    .child_named(*p, "SoftwareResourceLocator")
                    .and_then(|l| self.component(l, "Class", "FormalParameter"))
                    .and_then(|c| self.tree.attr(c, "Name"))
                    == Some(formal)
            })
            .and_then(|p| self.tree.attr(p, "Value"))
            .map(str::to_string)
    }

    fn resource_identity(&self, event: NodeId, formal: &str) -> Result<(String, Vec<String>)> {
        let resource = self.locator(event, "DataResourceLocator")?;
        let host = self.component_name(resource, "Class", "Computer")?;
        let mut store = self.component_name(resource, "Class", "DataStore")?;
        if store.trim().is_empty() {
            store = self.connection(formal).unwrap_or_default();
        }
        let schema = self.component_name(resource, "Class", "DataSchema")?;
        let table = self.component_name(resource, "SubClass", "Table")?;

        let collection_ref = self
            .tree
            .child_named(event, "SoftwareResourceLocator")
            .and_then(|l| self.tree.attr(l, "ReferenceDC"))
            .ok_or_else(|| missing("event data collection reference"))?;
        let collection = self
            .tree
            .select(self.tree.root(), &["DataSchema", "DataCollection"])
            .into_iter()
            .find(|c| self.tree.attr(*c, "Ident") == Some(collection_ref))
            .ok_or_else(|| missing(&format!("data collection {}", collection_ref)))?;
        let columns = self
            .tree
            .children_named(collection, "DataField")
            .filter_map(|f| self.tree.attr(f, "Name").map(str::to_string))
            .collect();

        Ok((format!("{}::{}::{}::{}", host, store, schema, table), columns))
    }

    pub fn runtime_identity(&self) -> Result<FlowIdentity> {
        let (source, source_cols) = self.resource_identity(self.event("Read")?, CONNECTION_PARAMETERS[0])?;
        let (target, target_cols) = self.resource_identity(self.event("Write")?, CONNECTION_PARAMETERS[1])?;
        Ok(FlowIdentity {
            project: self.project()?,
            job: self.job()?,
            source,
            source_cols,
            target,
            target_cols,
        })
    }
}

/// Flow files directly under `dir` that finished within `[from, to]`
/// (epoch milliseconds). Files that are not flow documents are skipped.
pub fn changed_flows(dir: &Path, from: i64, to: i64) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut changed = Vec::new();
    for path in files {
        let finished = match LineageFlow::from_path(&path).and_then(|f| f.finished_at()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable flow");
                continue;
            }
        };
        if finished >= from && finished <= to {
            changed.push(path);
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FLOW: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Flow StatusCode="0" Message="Finished OK" FinishedAt="2019-03-02T10:15:00">
  <Design>
    <SoftwareResourceLocator>
      <LocatorComponent Class="Computer" Name="devengine"/>
      <LocatorComponent Class="Application" SubClass="Project" Name="dstage1"/>
      <LocatorComponent Class="Application" SubClass="Job" Name="LoadCustomers"/>
    </SoftwareResourceLocator>
  </Design>
  <Deployment>
    <SoftwareResourceLocator>
      <LocatorComponent Class="Computer" Name="devengine"/>
    </SoftwareResourceLocator>
  </Deployment>
  <ActualParameters>
    <ActualParameter Value="CRMDB">
      <SoftwareResourceLocator>
        <LocatorComponent Class="Computer" Name="devengine"/>
        <LocatorComponent Class="FormalParameter" Name="SourceConnectionString"/>
      </SoftwareResourceLocator>
    </ActualParameter>
    <ActualParameter Value="10">
      <SoftwareResourceLocator>
        <LocatorComponent Class="Computer" Name="otherhost"/>
        <LocatorComponent Class="FormalParameter" Name="Batch"/>
      </SoftwareResourceLocator>
    </ActualParameter>
  </ActualParameters>
  <Events>
    <Event Type="Read" RowCount="10">
      <DataResourceLocator>
        <LocatorComponent Class="Computer" Name="devengine"/>
        <LocatorComponent Class="DataStore" Name=" "/>
        <LocatorComponent Class="DataSchema" Name="CRM"/>
        <LocatorComponent Class="DataCollection" SubClass="Table" Name="CUSTOMER"/>
      </DataResourceLocator>
      <SoftwareResourceLocator ReferenceDC="dc1"/>
    </Event>
    <Event Type="Write" RowCount="10">
      <DataResourceLocator>
        <LocatorComponent Class="Computer" Name="dwhost"/>
        <LocatorComponent Class="DataStore" Name="DWH"/>
        <LocatorComponent Class="DataSchema" Name="STAGE"/>
        <LocatorComponent Class="DataCollection" SubClass="Table" Name="CUST"/>
      </DataResourceLocator>
      <SoftwareResourceLocator ReferenceDC="dc2"/>
    </Event>
  </Events>
  <DataSchema>
    <DataCollection Ident="dc1"><DataField Name="ID"/><DataField Name="NAME"/></DataCollection>
    <DataCollection Ident="dc2"><DataField Name="CUST_ID"/></DataCollection>
  </DataSchema>
</Flow>"#;

    #[test]
    fn test_replace_host() {
        let mut flow = LineageFlow::parse(FLOW).unwrap();
        let result = flow.replace_host("prodengine").unwrap();
        assert_eq!(result.src_host, "devengine");
        // deployment, source parameter, read event
        assert_eq!(result.replacements, 3);
        assert!(result.changed);

        let out = flow.to_xml_string().unwrap();
        assert!(out.contains("Value=\"devengine__CRMDB\""));
        assert!(out.contains("Name=\"otherhost\""));
        assert!(out.contains("Name=\"dwhost\""));
    }

    #[test]
    fn test_runtime_identity_uses_original_connection() {
        let mut flow = LineageFlow::parse(FLOW).unwrap();
        flow.replace_host("prodengine").unwrap();
        let identity = flow.runtime_identity().unwrap();
        assert_eq!(identity.project, "dstage1");
        assert_eq!(identity.job, "LoadCustomers");
        assert_eq!(identity.source, "prodengine::CRMDB::CRM::CUSTOMER");
        assert_eq!(identity.source_cols, vec!["ID", "NAME"]);
        assert_eq!(identity.target, "dwhost::DWH::STAGE::CUST");
    }

    #[test]
    fn test_status_and_window() {
        let flow = LineageFlow::parse(FLOW).unwrap();
        assert_eq!(flow.status().status_code.as_deref(), Some("0"));
        let finished = flow.finished_at().unwrap();

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.flow"), FLOW).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not xml at all <").unwrap();
        let hits = changed_flows(dir.path(), finished - 1000, finished + 1000).unwrap();
        assert_eq!(hits, vec![dir.path().join("a.flow")]);
        assert!(changed_flows(dir.path(), 0, finished - 1).unwrap().is_empty());
    }
}
