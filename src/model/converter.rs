//! Model conversion service
//!
//! The cloud service turns a packaged model into a device-bound network
//! package. The workflow is upload, import, publish, poll, download, all
//! authenticated with a client-credentials token.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use crate::config::ConversionConfig;
use crate::errors::{ProvisionError, Result};

const SERVICE: &str = "Model conversion service";
const UPLOAD_TYPE_CODE: &str = "productAiModelConverted";
const SOURCE_SERVICE: &str = "marketplace";
const PARENT_META_FIELD: &str = "aitriosPortalConverterPackager";
const CONVERTER_META_FIELD: &str = "aitriosPortalConverter";
const PACKAGER_META_FIELD: &str = "aitriosPortalPackager";
const PUBLISH_COMPLETE: &str = "Publish complete";
const SUCCESS: &str = "SUCCESS";

/// Converts a packaged model for one device
#[async_trait]
pub trait ModelConverter: Send + Sync {
    /// Convert `archive` for `device_id` and download the result into
    /// `output_dir`. Returns the downloaded file.
    async fn convert(&self, device_id: &str, archive: &Path, output_dir: &Path) -> Result<PathBuf>;
}

/// reqwest client for the conversion/packaging REST API
#[derive(Debug, Clone)]
pub struct HttpModelConverter {
    client: Client,
    config: ConversionConfig,
}

impl HttpModelConverter {
    pub fn new(config: ConversionConfig) -> Result<Self> {
        for (key, value) in [
            ("auth_domain", &config.auth_domain),
            ("system_domain", &config.system_domain),
            ("tenant_id", &config.tenant_id),
            ("client_id", &config.client_id),
            ("client_secret", &config.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::config(format!(
                    "missing configuration parameter: conversion.{}",
                    key
                )));
            }
        }
        let client = Client::builder()
            .build()
            .map_err(|e| ProvisionError::config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.config.system_domain.trim_end_matches('/'), path)
    }

    /// Common headers of the model API
    fn model_request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("tenant_id", &self.config.tenant_id)
            .header("source-service", SOURCE_SERVICE)
    }

    async fn access_token(&self) -> Result<String> {
        log::info!("Requesting conversion service access token");
        let url = format!(
            "{}/oauth2/default/v1/token",
            self.config.auth_domain.trim_end_matches('/')
        );
        let request = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("accept", "application/json")
            .header("cache-control", "no-cache")
            .form(&[("grant_type", "client_credentials"), ("scope", "system")]);
        let body = send_json(request).await?;
        string_field(&body, "access_token")
    }

    async fn upload(&self, token: &str, archive: &Path) -> Result<String> {
        log::info!("Uploading {}", archive.display());
        let bytes = tokio::fs::read(archive).await.map_err(|e| {
            ProvisionError::config(format!("cannot read model archive {}: {}", archive.display(), e))
        })?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.zip".to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("type_code", UPLOAD_TYPE_CODE);

        let request = self
            .client
            .post(self.api("/files"))
            .bearer_auth(token)
            .header("tenant_id", &self.config.tenant_id)
            .multipart(form);
        let body = send_json(request).await?;
        body.get("file_info")
            .and_then(|info| info.get("id"))
            .and_then(value_as_string)
            .ok_or_else(|| missing_field("file_info.id", &body))
    }

    async fn import(&self, token: &str, model_id: &str, file_id: &str) -> Result<()> {
        log::info!("Importing model {}", model_id);
        let payload = json!({
            "model_id": model_id,
            "file_id": file_id,
            "network_type": self.config.network_type,
            "input_format_param": [
                { "ordinal": self.config.ordinal, "format": self.config.input_format }
            ],
        });
        let request = self
            .model_request(self.client.post(self.api("/models")), token)
            .header("parent_meta_field", PARENT_META_FIELD)
            .header("child_meta_field", CONVERTER_META_FIELD)
            .json(&payload);
        let body = send_json(request).await?;
        expect_success(&body, "import")
    }

    async fn publish(&self, token: &str, device_id: &str, model_id: &str) -> Result<String> {
        log::info!("Publishing model {} for device {}", model_id, device_id);
        let payload = json!({
            "device_id": device_id,
            "key_generation": self.config.key_generation,
            "packager_version": self.config.packager_version,
        });
        let path = format!("/models/{}/model_publish", model_id);
        let request = self
            .model_request(self.client.post(self.api(&path)), token)
            .header("parent_meta_field", PARENT_META_FIELD)
            .header("child_meta_field", PACKAGER_META_FIELD)
            .json(&payload);
        let body = send_json(request).await?;
        expect_success(&body, "publish")?;
        let transaction = body
            .get("transaction_id")
            .and_then(value_as_string)
            .ok_or_else(|| missing_field("transaction_id", &body))?;
        log::info!("Publish transaction {}", transaction);
        Ok(transaction)
    }

    /// Poll the publish status on a fixed interval until it completes
    async fn wait_for_publish(&self, token: &str, transaction_id: &str) -> Result<String> {
        let path = format!("/model_publish/{}/status", transaction_id);
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;
            let request = self
                .model_request(self.client.get(self.api(&path)), token)
                .query(&[("include_publish_url", "true")]);
            let body = send_json(request).await?;
            let status = body.get("status").and_then(Value::as_str).unwrap_or("");
            if status == PUBLISH_COMPLETE {
                return string_field(&body, "publish_url");
            }
            log::info!("Publish status: {}; waiting...", if status.is_empty() { "unknown" } else { status });
        }
    }

    async fn download(&self, publish_url: &str, output_dir: &Path) -> Result<PathBuf> {
        let file_name = download_file_name(publish_url)?;
        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(&file_name);

        log::info!("Downloading {}", file_name);
        let response = self
            .client
            .get(publish_url)
            .send()
            .await
            .map_err(|e| ProvisionError::TransientLink(format!("download failed: {}", e)))?;
        let response = check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProvisionError::TransientLink(format!("download interrupted: {}", e)))?;
        tokio::fs::write(&output, &bytes).await?;
        log::info!("Downloaded {} ({} bytes)", output.display(), bytes.len());
        Ok(output)
    }
}

#[async_trait]
impl ModelConverter for HttpModelConverter {
    async fn convert(&self, device_id: &str, archive: &Path, output_dir: &Path) -> Result<PathBuf> {
        let model_id = chrono::Local::now().format("%Y%m%d_%H%M%S%6f").to_string();
        log::info!("Converting model for device {} (model_id {})", device_id, model_id);

        let token = self.access_token().await?;
        let file_id = self.upload(&token, archive).await?;
        self.import(&token, &model_id, &file_id).await?;
        let transaction = self.publish(&token, device_id, &model_id).await?;
        let publish_url = self.wait_for_publish(&token, &transaction).await?;
        self.download(&publish_url, output_dir).await
    }
}

/// Last path segment of the publish URL, ignoring the query string
pub fn download_file_name(publish_url: &str) -> Result<String> {
    let url = url::Url::parse(publish_url)
        .map_err(|e| ProvisionError::rejected(SERVICE, format!("invalid publish URL: {}", e)))?;
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            ProvisionError::rejected(SERVICE, format!("publish URL has no file name: {}", publish_url))
        })
}

async fn send_json(request: RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ProvisionError::TransientLink(format!("{} unreachable: {}", SERVICE, e)))?;
    let response = check_status(response).await?;
    let text = response
        .text()
        .await
        .map_err(|e| ProvisionError::TransientLink(format!("failed to read response: {}", e)))?;
    serde_json::from_str(&text)
        .map_err(|e| ProvisionError::rejected(SERVICE, format!("invalid JSON response: {}", e)))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProvisionError::rejected(
        SERVICE,
        format!("{} {}", status, body.trim()),
    ))
}

fn expect_success(body: &Value, step: &str) -> Result<()> {
    match body.get("result").and_then(Value::as_str) {
        Some(SUCCESS) => Ok(()),
        _ => Err(ProvisionError::rejected(SERVICE, format!("{} failed: {}", step, body))),
    }
}

fn string_field(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(value_as_string)
        .ok_or_else(|| missing_field(field, body))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn missing_field(field: &str, body: &Value) -> ProvisionError {
    ProvisionError::rejected(SERVICE, format!("'{}' missing from response: {}", field, body))
}
