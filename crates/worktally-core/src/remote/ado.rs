//! Azure DevOps work-item client -- effort fields via the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::json;

use super::{FieldValue, PatchOp, RecordField, RemoteRecord, RemoteRecordClient};
use crate::error::{ConfigError, CoreError, RemoteError};
use crate::storage::Config;

/// Validated connection settings. Building one is the point where a missing
/// organization, project or token becomes a fatal configuration error.
#[derive(Debug, Clone)]
pub struct AdoSettings {
    pub organization: String,
    pub project: String,
    pub pat: String,
    pub base_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

impl AdoSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let ado = &cfg.azure_devops;
        for (key, value) in [
            ("azure_devops.organization (ADO_ORG)", &ado.organization),
            ("azure_devops.project (ADO_PROJECT)", &ado.project),
            ("azure_devops.pat (ADO_PAT)", &ado.pat),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingKey(key.to_string()));
            }
        }
        let base = url::Url::parse(ado.base_url.trim()).map_err(|e| ConfigError::InvalidValue {
            key: "azure_devops.base_url".into(),
            message: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "azure_devops.base_url".into(),
                message: format!("unsupported scheme '{}'", base.scheme()),
            });
        }
        Ok(Self {
            organization: ado.organization.trim().to_string(),
            project: ado.project.trim().to_string(),
            pat: ado.pat.clone(),
            base_url: ado.base_url.trim().trim_end_matches('/').to_string(),
            api_version: ado.api_version.clone(),
            request_timeout: Duration::from_secs(ado.request_timeout_secs.max(1)),
        })
    }
}

pub struct AdoClient {
    settings: AdoSettings,
    http: Client,
}

impl AdoClient {
    pub fn new(settings: AdoSettings) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { settings, http })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, CoreError> {
        Ok(Self::new(AdoSettings::from_config(cfg)?)?)
    }

    /// Work-item URL without the query string; organization and project are
    /// percent-encoded so names with spaces or accents survive.
    pub fn work_item_url(&self, id: &str) -> String {
        format!(
            "{}/{}/{}/_apis/wit/workitems/{}",
            self.settings.base_url,
            urlencoding::encode(&self.settings.organization),
            urlencoding::encode(&self.settings.project),
            urlencoding::encode(id),
        )
    }

    async fn check(url: &str, resp: Response) -> Result<Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    }
}

/// Serialize ops as a JSON-patch document.
pub fn patch_document(ops: &[PatchOp]) -> serde_json::Value {
    let ops: Vec<serde_json::Value> = ops
        .iter()
        .map(|op| {
            let value = match &op.value {
                FieldValue::Number(n) => json!(n),
                FieldValue::Text(s) => json!(s),
            };
            json!({ "op": "add", "path": op.field.patch_path(), "value": value })
        })
        .collect();
    serde_json::Value::Array(ops)
}

/// Read the tracked fields out of a work-item response.
///
/// Values of the wrong type are treated as absent.
pub fn parse_work_item(id: &str, body: &serde_json::Value) -> Result<RemoteRecord, RemoteError> {
    if !body.is_object() {
        return Err(RemoteError::Decode(format!(
            "work item {id}: expected a JSON object"
        )));
    }
    let fields = &body["fields"];
    let number = |field: RecordField| fields.get(field.reference_name()).and_then(|v| v.as_f64());
    Ok(RemoteRecord {
        id: id.to_string(),
        remaining_work: number(RecordField::RemainingWork),
        completed_work: number(RecordField::CompletedWork),
        state: fields
            .get(RecordField::State.reference_name())
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[async_trait]
impl RemoteRecordClient for AdoClient {
    async fn get(&self, id: &str) -> Result<RemoteRecord, RemoteError> {
        let url = self.work_item_url(id);
        tracing::debug!(%url, "GET work item");
        let resp = self
            .http
            .get(&url)
            .query(&[("api-version", &self.settings.api_version)])
            .basic_auth("", Some(&self.settings.pat))
            .send()
            .await?;
        let resp = Self::check(&url, resp).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        parse_work_item(id, &body)
    }

    async fn patch(&self, id: &str, ops: &[PatchOp]) -> Result<(), RemoteError> {
        let url = self.work_item_url(id);
        let body = patch_document(ops);
        tracing::debug!(%url, %body, "PATCH work item");
        let resp = self
            .http
            .patch(&url)
            .query(&[("api-version", &self.settings.api_version)])
            .basic_auth("", Some(&self.settings.pat))
            .header(CONTENT_TYPE, "application/json-patch+json")
            .body(body.to_string())
            .send()
            .await?;
        Self::check(&url, resp).await?;
        Ok(())
    }
}
