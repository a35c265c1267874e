//! Files incident reports with the reporting collaborator.
//!
//! Submission is attempted once. Auth, upload and create failures are
//! captured in a failed `GeneratedReport` rather than returned as errors.

pub mod auth;
pub mod description;
pub mod http;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ReportConfig, SeverityIds};
use crate::error::ReportError;
use crate::models::{DetectionResult, GeneratedReport, GpsData, ImageMetadata, Severity};

pub use auth::{AccessToken, TokenCache};
pub use http::HttpReportingApi;

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedPhoto {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPayload {
    pub title: String,
    pub description: String,
    pub category_id: u32,
    pub latitude: String,
    pub longitude: String,
    pub severity_id: u32,
    pub photo_urls: Vec<String>,
}

/// Boundary to the reporting and auth collaborators.
pub trait ReportingApi: Send + Sync {
    fn authenticate(&self) -> Result<AccessToken, ReportError>;

    fn upload_photo(&self, token: &str, path: &Path) -> Result<UploadedPhoto, ReportError>;

    /// Returns the external report identifier when the service provides one.
    fn create_report(&self, token: &str, payload: &ReportPayload) -> Result<Option<String>, ReportError>;
}

pub struct ReportClient {
    api: Box<dyn ReportingApi>,
    tokens: TokenCache,
    category_id: u32,
    severity_ids: SeverityIds,
}

impl ReportClient {
    pub fn new(api: Box<dyn ReportingApi>, config: &ReportConfig) -> Self {
        Self {
            api,
            tokens: TokenCache::new(
                Duration::from_secs(config.token_margin_secs),
                Duration::from_secs(config.default_token_ttl_secs),
            ),
            category_id: config.category_id,
            severity_ids: config.severity_ids.clone(),
        }
    }

    /// HTTP-backed client, or `None` when the reporting service is not configured.
    pub fn from_config(config: &ReportConfig) -> Result<Option<Self>, ReportError> {
        if !config.is_configured() {
            return Ok(None);
        }
        let api = HttpReportingApi::new(config)?;
        Ok(Some(Self::new(Box::new(api), config)))
    }

    fn severity_id(&self, severity: Option<Severity>) -> u32 {
        match severity.unwrap_or(Severity::Low) {
            Severity::Low => self.severity_ids.low,
            Severity::Medium => self.severity_ids.medium,
            Severity::High => self.severity_ids.high,
        }
    }

    fn token(&self) -> Result<String, ReportError> {
        self.tokens.get_or_refresh(|| self.api.authenticate())
    }

    /// Uploads `photos` (missing files are skipped) and files a report.
    pub fn submit(&self, result: &DetectionResult, metadata: &ImageMetadata, photos: &[PathBuf]) -> GeneratedReport {
        if let Err(reason) = report_location(result, metadata) {
            return GeneratedReport::failed(reason, result, metadata);
        }

        let uploaded = self.upload_all(photos);
        match uploaded {
            Ok(urls) => self.submit_with_urls(result, metadata, urls),
            Err(e) => {
                warn!(error = %e, "photo upload failed");
                GeneratedReport::failed(e.to_string(), result, metadata)
            }
        }
    }

    /// Files a report referencing already-uploaded photos.
    pub fn submit_with_urls(&self, result: &DetectionResult, metadata: &ImageMetadata, photo_urls: Vec<String>) -> GeneratedReport {
        let gps = match report_location(result, metadata) {
            Ok(gps) => gps,
            Err(reason) => return GeneratedReport::failed(reason, result, metadata),
        };

        let payload = ReportPayload {
            title: description::report_title(result),
            description: description::report_description(result, metadata),
            category_id: self.category_id,
            latitude: format!("{:.6}", gps.latitude),
            longitude: format!("{:.6}", gps.longitude),
            severity_id: self.severity_id(result.max_severity()),
            photo_urls,
        };

        let created = self
            .token()
            .and_then(|token| self.api.create_report(&token, &payload));

        match created {
            Ok(report_id) => {
                info!(
                    report_id = report_id.as_deref().unwrap_or("-"),
                    latitude = gps.latitude,
                    longitude = gps.longitude,
                    "report created"
                );
                GeneratedReport {
                    report_id,
                    success: true,
                    error: None,
                    latitude: Some(gps.latitude),
                    longitude: Some(gps.longitude),
                    severity: result.max_severity(),
                    num_potholes: result.num_potholes(),
                }
            }
            Err(e) => {
                if matches!(e, ReportError::Status { status: 401, .. }) {
                    self.tokens.invalidate();
                }
                warn!(error = %e, "report submission failed");
                GeneratedReport::failed(e.to_string(), result, metadata)
            }
        }
    }

    fn upload_all(&self, photos: &[PathBuf]) -> Result<Vec<String>, ReportError> {
        let existing: Vec<&PathBuf> = photos.iter().filter(|p| p.exists()).collect();
        if existing.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.token()?;
        let mut urls = Vec::with_capacity(existing.len());
        for path in existing {
            let uploaded = self.api.upload_photo(&token, path).inspect_err(|e| {
                if matches!(e, ReportError::Status { status: 401, .. }) {
                    self.tokens.invalidate();
                }
            })?;
            urls.push(uploaded.url);
        }
        Ok(urls)
    }
}

/// The GPS fix to report at, or why no report can be filed.
fn report_location<'a>(result: &DetectionResult, metadata: &'a ImageMetadata) -> Result<&'a GpsData, &'static str> {
    if result.detections.is_empty() {
        return Err("No potholes detected; nothing to report");
    }
    metadata
        .gps
        .as_ref()
        .ok_or("No GPS data in image metadata; cannot locate the report")
}
