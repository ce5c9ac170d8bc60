//! REST catalog backend
//!
//! Talks to the catalog's `igc-rest/v1` API with basic authentication on
//! every request. Non-success statuses become [`CatalogError::Backend`],
//! except for updates whose status is handed back to the caller. Quality
//! projects live on the same host under the `ia/api` root and travel as XML.
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{CatalogBackend, PagedResults, ProjectSubmit, Query, TypeDefinition, UpdateDelta, UpdateResponse};
use crate::config::ConnectionConfig;
use crate::error::{CatalogError, Result};
use crate::workflow::WorkflowAction;

const QUALITY_API: &str = "/ibm/iis/ia/api/";

pub struct RestCatalog {
    config: ConnectionConfig,
    client: Client,
    base: Url,
}

#[derive(Deserialize)]
struct TypeResponse {
    #[serde(rename = "_name")]
    name: String,
    #[serde(rename = "editInfo", default)]
    edit_info: Option<EditInfo>,
}

#[derive(Deserialize)]
struct EditInfo {
    #[serde(default)]
    properties: Vec<EditProperty>,
}

#[derive(Deserialize)]
struct EditProperty {
    name: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

impl RestCatalog {
    /// Create a client, trusting `config.cert` when one is given
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(300));
        if let Some(cert) = &config.cert {
            let pem = std::fs::read(cert)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        let client = builder.build()?;
        let base = config.base_url()?;
        Ok(Self { config, client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| CatalogError::Config(format!("bad endpoint {}: {}", path, e)))
    }

    fn quality_endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(QUALITY_API)
            .and_then(|root| root.join(path))
            .map_err(|e| CatalogError::Config(format!("bad endpoint {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.config.user, Some(&self.config.password))
    }

    /// Turn a non-success response into a backend error carrying its body
    async fn checked(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(CatalogError::backend(status.as_u16(), body))
    }
}

#[async_trait]
impl CatalogBackend for RestCatalog {
    async fn search(&self, query: &Query) -> Result<PagedResults> {
        let url = self.endpoint("search")?;
        let response = self.request(Method::POST, url).json(query).send().await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn fetch_page(&self, next: &str) -> Result<PagedResults> {
        let url = Url::parse(next)
            .map_err(|e| CatalogError::Structural(format!("bad paging link {}: {}", next, e)))?;
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn update(&self, rid: &str, delta: &UpdateDelta) -> Result<UpdateResponse> {
        let url = self.endpoint(&format!("assets/{}", rid))?;
        let response = self.request(Method::PUT, url).json(delta).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(UpdateResponse { status, body })
    }

    async fn take_workflow_action(
        &self,
        rids: &[String],
        action: WorkflowAction,
        comment: &str,
    ) -> Result<bool> {
        let url = self.endpoint(&format!("workflow/{}", action.as_str()))?;
        let payload = json!({ "ids": rids, "comment": comment });
        let response = self.request(Method::POST, url).json(&payload).send().await?;
        Ok(response.status().as_u16() == 200)
    }

    async fn type_definition(&self, asset_type: &str) -> Result<TypeDefinition> {
        let mut url = self.endpoint(&format!("types/{}", asset_type))?;
        url.query_pairs_mut().append_pair("showEditProperties", "true");
        let response = self.request(Method::GET, url).send().await?;
        let parsed: TypeResponse = Self::checked(response).await?.json().await?;
        Ok(TypeDefinition {
            display_name: parsed.name,
            properties: parsed
                .edit_info
                .map(|info| {
                    info.properties
                        .into_iter()
                        .map(|p| (p.name, p.display_name))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    async fn download_bundle(&self, bundle: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("bundles/{}", bundle))?;
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::checked(response).await?.bytes().await?.to_vec())
    }

    async fn bundle_assets(&self, bundle: &str) -> Result<String> {
        let url = self.endpoint(&format!("bundles/{}/assets", bundle))?;
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::checked(response).await?.text().await?)
    }

    async fn upload_bundle_assets(&self, xml: &str) -> Result<BTreeMap<String, String>> {
        let url = self.endpoint("bundles/assets")?;
        let response = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/xml")
            .body(xml.to_string())
            .send()
            .await?;
        let body: Value = Self::checked(response).await?.json().await?;
        let ids = body
            .as_object()
            .ok_or_else(|| CatalogError::Structural("bundle upload did not return an ID map".into()))?;
        Ok(ids
            .iter()
            .filter_map(|(id, rid)| rid.as_str().map(|rid| (id.clone(), rid.to_string())))
            .collect())
    }

    async fn quality_projects(&self) -> Result<String> {
        let url = self.quality_endpoint("projects")?;
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::checked(response).await?.text().await?)
    }

    async fn quality_project(&self, name: &str) -> Result<String> {
        let mut url = self.quality_endpoint("project")?;
        url.query_pairs_mut().append_pair("projectName", name);
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::checked(response).await?.text().await?)
    }

    async fn submit_quality_project(&self, xml: &str, submit: ProjectSubmit) -> Result<UpdateResponse> {
        let url = self.quality_endpoint(submit.as_str())?;
        let response = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/xml")
            .body(xml.to_string())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = Value::String(response.text().await?);
        Ok(UpdateResponse { status, body })
    }

    async fn logout(&self) -> Result<()> {
        let url = self.endpoint("logout")?;
        self.request(Method::GET, url).send().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RestCatalog {
        RestCatalog::new(ConnectionConfig {
            host: "infosvr.example.com".into(),
            port: 9446,
            user: "isadmin".into(),
            password: "secret".into(),
            cert: None,
            batch: 100,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoints_share_the_host() {
        let catalog = catalog();
        assert_eq!(
            catalog.endpoint("bundles/assets").unwrap().as_str(),
            "https://infosvr.example.com:9446/ibm/iis/igc-rest/v1/bundles/assets"
        );
        assert_eq!(
            catalog.quality_endpoint("projects").unwrap().as_str(),
            "https://infosvr.example.com:9446/ibm/iis/ia/api/projects"
        );
    }
}
