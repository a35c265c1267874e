//! Hosted inference endpoint client.
//!
//! The image is downscaled so its longest side fits `max_side`, JPEG-encoded,
//! sent base64 in the request body, and the returned center-form boxes are
//! scaled back to the original resolution.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;
use tracing::debug;

use super::Detector;
use crate::config::DetectionConfig;
use crate::error::DetectionError;
use crate::metadata::normalize::encode_jpeg;
use crate::models::{BoundingBox, Detection};
use crate::retry::{retry, Backoff};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionResponse {
    Wrapped { predictions: Vec<Prediction> },
    Bare(Vec<Prediction>),
}

/// One prediction, in pixels of the submitted image.
#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(alias = "x_center")]
    x: f32,
    #[serde(alias = "y_center")]
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    #[serde(rename = "class", default)]
    class_name: Option<String>,
}

/// Image as sent to the endpoint plus the factors that undo the downscale.
pub struct UploadImage {
    pub image: DynamicImage,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Shrinks `img` so its longest side is at most `max_side`.
pub fn downscale_for_upload(img: &DynamicImage, max_side: u32) -> UploadImage {
    let (width, height) = (img.width(), img.height());
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return UploadImage {
            image: img.clone(),
            scale_x: 1.0,
            scale_y: 1.0,
        };
    }

    let ratio = max_side as f32 / longest as f32;
    let new_width = ((width as f32 * ratio).round() as u32).max(1);
    let new_height = ((height as f32 * ratio).round() as u32).max(1);
    UploadImage {
        image: img.resize_exact(new_width, new_height, FilterType::Triangle),
        scale_x: width as f32 / new_width as f32,
        scale_y: height as f32 / new_height as f32,
    }
}

pub struct RemoteDetector {
    endpoint: String,
    api_key: Option<String>,
    confidence_threshold: f32,
    max_side: u32,
    jpeg_quality: u8,
    timeout_secs: u64,
    max_attempts: u32,
    class_name: String,
    client: reqwest::blocking::Client,
}

impl RemoteDetector {
    pub fn new(endpoint: &str, config: &DetectionConfig) -> Result<Self, DetectionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DetectionError::Connection(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            api_key: config.api_key.clone(),
            confidence_threshold: config.confidence_threshold,
            max_side: config.max_side,
            jpeg_quality: config.jpeg_quality,
            timeout_secs: config.timeout_secs,
            max_attempts: config.max_attempts,
            class_name: config.class_name.clone(),
            client,
        })
    }

    fn request(&self, payload: &str) -> Result<Vec<Prediction>, DetectionError> {
        // Threshold is sent as an integer percentage.
        let confidence = (self.confidence_threshold * 100.0).round() as u32;
        let mut query: Vec<(&str, String)> = vec![
            ("confidence", confidence.to_string()),
            ("format", "json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload.to_string())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DetectionError::Timeout(self.timeout_secs)
                } else {
                    DetectionError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DetectionError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PredictionResponse = response
            .json()
            .map_err(|e| DetectionError::ResponseParsing(e.to_string()))?;
        Ok(match parsed {
            PredictionResponse::Wrapped { predictions } => predictions,
            PredictionResponse::Bare(predictions) => predictions,
        })
    }

    fn to_detections(&self, predictions: Vec<Prediction>, upload: &UploadImage, width: u32, height: u32) -> Vec<Detection> {
        predictions
            .into_iter()
            .filter(|p| p.confidence >= self.confidence_threshold)
            .filter_map(|p| {
                let bbox = BoundingBox::from_center(p.x, p.y, p.width, p.height)?
                    .scaled(upload.scale_x, upload.scale_y)
                    .clamped(width, height);
                let class_name = p.class_name.unwrap_or_else(|| self.class_name.clone());
                Some(Detection::new(bbox, p.confidence, class_name))
            })
            .collect()
    }
}

fn is_retryable(e: &DetectionError) -> bool {
    match e {
        DetectionError::Connection(_) | DetectionError::Timeout(_) => true,
        DetectionError::Endpoint { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

impl Detector for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn detect(&self, image: &DynamicImage, source: &Path) -> Result<Vec<Detection>, DetectionError> {
        let upload = downscale_for_upload(image, self.max_side);
        let jpeg = encode_jpeg(&upload.image, self.jpeg_quality)
            .map_err(|e| DetectionError::Encoding(e.to_string()))?;
        let payload = STANDARD.encode(jpeg);
        debug!(
            source = %source.display(),
            upload_width = upload.image.width(),
            upload_height = upload.image.height(),
            bytes = payload.len(),
            "sending image to detection endpoint"
        );

        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        let predictions = retry(self.max_attempts, &mut backoff, |_| self.request(&payload), is_retryable)?;
        Ok(self.to_detections(predictions, &upload, image.width(), image.height()))
    }
}
