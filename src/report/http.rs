use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, Response};
use serde::Deserialize;

use super::auth::AccessToken;
use super::{ReportPayload, ReportingApi, UploadedPhoto};
use crate::config::ReportConfig;
use crate::error::{describe_transport_error, ReportError};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Reporting collaborator over HTTP.
pub struct HttpReportingApi {
    base_url: String,
    token_url: String,
    username: String,
    password: String,
    client: Client,
}

impl HttpReportingApi {
    pub fn new(config: &ReportConfig) -> Result<Self, ReportError> {
        let missing = |field: &str| ReportError::Auth(format!("report.{} is not configured", field));
        let base_url = config.base_url.clone().ok_or_else(|| missing("base_url"))?;
        let token_url = config.token_url().ok_or_else(|| missing("auth_url"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReportError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url,
            username: config.username.clone().ok_or_else(|| missing("username"))?,
            password: config.password.clone().ok_or_else(|| missing("password"))?,
            client,
        })
    }
}

fn check_status(response: Response) -> Result<Response, ReportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ReportError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Report identifier from the create response (`id` or `report_id`, string or number).
fn report_id(value: &serde_json::Value) -> Option<String> {
    let id = value.get("id").or_else(|| value.get("report_id"))?;
    match id {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ReportingApi for HttpReportingApi {
    fn authenticate(&self) -> Result<AccessToken, ReportError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .map_err(|e| ReportError::Auth(describe_transport_error(&e)))?;

        let response = check_status(response).map_err(|e| ReportError::Auth(e.to_string()))?;
        let parsed: TokenResponse = response
            .json()
            .map_err(|e| ReportError::Auth(format!("invalid token response: {}", e)))?;

        Ok(AccessToken {
            token: parsed.access_token,
            expires_in: parsed.expires_in.map(Duration::from_secs),
        })
    }

    fn upload_photo(&self, token: &str, path: &Path) -> Result<UploadedPhoto, ReportError> {
        let form = multipart::Form::new()
            .file("file", path)
            .map_err(|source| ReportError::Photo {
                path: path.to_path_buf(),
                source,
            })?;

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .map_err(|e| ReportError::Connection(describe_transport_error(&e)))?;

        check_status(response)?
            .json()
            .map_err(|e| ReportError::ResponseParsing(e.to_string()))
    }

    fn create_report(&self, token: &str, payload: &ReportPayload) -> Result<Option<String>, ReportError> {
        let response = self
            .client
            .post(format!("{}/reports", self.base_url))
            .bearer_auth(token)
            .json(payload)
            .send()
            .map_err(|e| ReportError::Connection(describe_transport_error(&e)))?;

        let body: serde_json::Value = check_status(response)?
            .json()
            .map_err(|e| ReportError::ResponseParsing(e.to_string()))?;
        Ok(report_id(&body))
    }
}
