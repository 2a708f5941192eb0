//! reqwest adapter for the device management REST API

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

use crate::config::RegistrationConfig;
use crate::errors::{ProvisionError, Result};

use super::api::{DEVICE_ACCOUNT_TYPE, NOT_CONNECTED_STATUS, RegistrationApi};
use super::password::derive_password;

pub const API_CAMERA: &str = "/camera/c/";
pub const API_UNIT: &str = "/camera/u/";
pub const API_ACCOUNT: &str = "/account/a/";
pub const API_TOKEN_AUTH: &str = "/api-token-auth/";

const SERVICE: &str = "Registration server";

/// REST client authenticated with the server's admin token
#[derive(Debug, Clone)]
pub struct HttpRegistrationClient {
    client: Client,
    base_url: String,
}

impl HttpRegistrationClient {
    pub fn new(server_url: &str, admin_token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = reqwest::header::HeaderValue::from_str(&format!("Token {}", admin_token))
            .map_err(|_| ProvisionError::config("admin token contains invalid characters"))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        // Factory servers use self-signed certificates
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProvisionError::config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &RegistrationConfig) -> Result<Self> {
        config.validate()?;
        let token = config.admin_token()?;
        Self::new(&config.server_url, token, config.timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        log::debug!("POST {} {}", url, body);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| connection_error(&url, e))?;
        read_json(response).await
    }
}

fn connection_error(url: &str, err: reqwest::Error) -> ProvisionError {
    if err.is_timeout() {
        ProvisionError::TransientLink(format!("{} timed out: {}", url, err))
    } else {
        ProvisionError::TransientLink(format!("cannot reach {}: {}", url, err))
    }
}

/// Decode a 2xx JSON body or turn the response into a rejection
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(json!({ "results": [] }));
    }

    let text = response.text().await.map_err(|e| {
        ProvisionError::TransientLink(format!("failed to read response body: {}", e))
    })?;

    if !status.is_success() {
        let detail = match serde_json::from_str::<Value>(&text) {
            Ok(body) => format!("Detail: {}", body),
            Err(_) => format!("Response: {}", text.trim()),
        };
        return Err(ProvisionError::rejected(
            SERVICE,
            format!(
                "{} {}. {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                detail
            ),
        ));
    }

    serde_json::from_str(&text)
        .map_err(|e| ProvisionError::rejected(SERVICE, format!("invalid JSON response: {}", e)))
}

fn require_id(body: &Value, what: &str) -> Result<u64> {
    body.get("id")
        .and_then(Value::as_u64)
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            ProvisionError::rejected(
                SERVICE,
                format!("{} created but ID not found in response: {}", what, body),
            )
        })
}

#[async_trait]
impl RegistrationApi for HttpRegistrationClient {
    async fn query_existing_camera(&self, c_sn: &str) -> Result<Option<u64>> {
        let url = self.url(API_CAMERA);
        log::info!("Querying camera {}", c_sn);
        let response = self
            .client
            .get(&url)
            .query(&[("c_sn", c_sn)])
            .send()
            .await
            .map_err(|e| connection_error(&url, e))?;
        let body = read_json(response).await?;

        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|camera| camera.get("id"))
            .and_then(Value::as_u64))
    }

    async fn create_camera(&self, c_sn: &str, sensor: Option<&str>) -> Result<u64> {
        let mut body = json!({
            "c_sn": c_sn,
            "c_order": 1,
            "c_status": NOT_CONNECTED_STATUS,
        });
        if let Some(sensor) = sensor {
            body["c_sensor"] = json!(sensor);
        }
        let response = self.post(API_CAMERA, &body).await?;
        let id = require_id(&response, "Camera")?;
        log::info!("Camera created with ID {}", id);
        Ok(id)
    }

    async fn create_unit(&self, u_sn: &str, camera_id: u64, url: Option<&str>) -> Result<u64> {
        let mut body = json!({
            "u_sn": u_sn,
            "u_camera": [camera_id],
            "u_status": NOT_CONNECTED_STATUS,
        });
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            body["u_url"] = json!(url);
        }
        let response = self.post(API_UNIT, &body).await?;
        let id = require_id(&response, "Unit")?;
        log::info!("Unit created with ID {}", id);
        Ok(id)
    }

    async fn create_account(&self, u_sn: &str) -> Result<(u64, String)> {
        let password = derive_password(u_sn);
        let body = json!({
            "a_user": {
                "username": u_sn,
                "password": password,
                "password_confirm": password,
            },
            "a_type": DEVICE_ACCOUNT_TYPE,
        });
        let response = self.post(API_ACCOUNT, &body).await?;
        let id = require_id(&response, "Account")?;
        log::info!("Account created with ID {}", id);
        Ok((id, password))
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        let body = json!({ "username": username, "password": password });
        let response = self.post(API_TOKEN_AUTH, &body).await?;
        response
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                ProvisionError::rejected(SERVICE, format!("token not found in response: {}", response))
            })
    }
}
