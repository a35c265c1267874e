use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::estimation::Calibration;

const CONFIG_ENV: &str = "ROADSCAN_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub detection: DetectionConfig,
    pub heuristic: HeuristicConfig,
    pub calibration: Calibration,
    pub report: ReportConfig,
    pub normalize: NormalizeConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub incoming: PathBuf,
    pub processed: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            incoming: PathBuf::from("data/incoming"),
            processed: PathBuf::from("data/processed"),
            output: PathBuf::from("data/output"),
        }
    }
}

impl PathsConfig {
    pub fn annotated_dir(&self) -> PathBuf {
        self.output.join("annotated")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.output.join("converted")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Remote inference endpoint; the local heuristic is used alone when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub confidence_threshold: f32,
    /// Longest side of the image sent to the endpoint.
    pub max_side: u32,
    pub jpeg_quality: u8,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Emit one low-confidence centered detection when nothing else is found.
    pub center_guess: bool,
    pub center_guess_confidence: f32,
    pub class_name: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            confidence_threshold: 0.4,
            max_side: 1280,
            jpeg_quality: 85,
            timeout_secs: 30,
            max_attempts: 1,
            center_guess: true,
            center_guess_confidence: 0.3,
            class_name: "pothole".to_string(),
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parameters of the classical dark-region detector.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub blur_sigma: f32,
    /// Pixels at or below this gray level count as dark.
    pub dark_threshold: u8,
    pub min_area_fraction: f32,
    pub max_area_fraction: f32,
    pub max_aspect_ratio: f32,
    pub max_detections: usize,
    pub confidence: f32,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 2.5,
            dark_threshold: 80,
            min_area_fraction: 0.005,
            max_area_fraction: 0.5,
            max_aspect_ratio: 4.0,
            max_detections: 5,
            confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeverityIds {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl Default for SeverityIds {
    fn default() -> Self {
        Self {
            low: 1,
            medium: 2,
            high: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub base_url: Option<String>,
    /// Token endpoint; defaults to `{base_url}/auth/token`.
    pub auth_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub category_id: u32,
    pub severity_ids: SeverityIds,
    pub timeout_secs: u64,
    /// Refresh the token when it expires within this many seconds.
    pub token_margin_secs: u64,
    /// Token lifetime assumed when the auth response carries no expiry.
    pub default_token_ttl_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_url: None,
            username: None,
            password: None,
            category_id: 1,
            severity_ids: SeverityIds::default(),
            timeout_secs: 30,
            token_margin_secs: 60,
            default_token_ttl_secs: 30 * 60,
        }
    }
}

impl ReportConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.username.is_some() && self.password.is_some()
    }

    pub fn token_url(&self) -> Option<String> {
        self.auth_url.clone().or_else(|| {
            self.base_url
                .as_ref()
                .map(|base| format!("{}/auth/token", base.trim_end_matches('/')))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub jpeg_quality: u8,
    /// External command converting `<input> <output>` for HEIC/HEIF files.
    pub heif_converter: Option<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            heif_converter: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_secs: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            backoff_initial_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (explicit path or `ROADSCAN_CONFIG`), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self) {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        if let Some(v) = env("ROADSCAN_DETECTION_URL") {
            self.detection.endpoint = Some(v);
        }
        if let Some(v) = env("ROADSCAN_DETECTION_API_KEY") {
            self.detection.api_key = Some(v);
        }
        if let Some(v) = env("ROADSCAN_REPORT_URL") {
            self.report.base_url = Some(v);
        }
        if let Some(v) = env("ROADSCAN_AUTH_URL") {
            self.report.auth_url = Some(v);
        }
        if let Some(v) = env("ROADSCAN_REPORT_USERNAME") {
            self.report.username = Some(v);
        }
        if let Some(v) = env("ROADSCAN_REPORT_PASSWORD") {
            self.report.password = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "detection.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if d.max_side == 0 {
            return Err(ConfigError::Invalid("detection.max_side must be positive".into()));
        }
        if d.jpeg_quality == 0 || d.jpeg_quality > 100 || self.normalize.jpeg_quality == 0 || self.normalize.jpeg_quality > 100 {
            return Err(ConfigError::Invalid("jpeg_quality must be within 1..=100".into()));
        }
        if d.max_attempts == 0 {
            return Err(ConfigError::Invalid("detection.max_attempts must be at least 1".into()));
        }

        let h = &self.heuristic;
        if h.min_area_fraction < 0.0 || h.min_area_fraction >= h.max_area_fraction || h.max_area_fraction > 1.0 {
            return Err(ConfigError::Invalid(
                "heuristic area fractions must satisfy 0 <= min < max <= 1".into(),
            ));
        }
        if h.max_aspect_ratio < 1.0 {
            return Err(ConfigError::Invalid("heuristic.max_aspect_ratio must be >= 1".into()));
        }
        if h.blur_sigma <= 0.0 {
            return Err(ConfigError::Invalid("heuristic.blur_sigma must be positive".into()));
        }

        self.calibration.validate().map_err(ConfigError::Invalid)?;

        if self.watch.poll_interval_secs == 0 || self.watch.backoff_initial_secs == 0 {
            return Err(ConfigError::Invalid("watch intervals must be positive".into()));
        }
        if self.watch.backoff_max_secs < self.watch.backoff_initial_secs {
            return Err(ConfigError::Invalid(
                "watch.backoff_max_secs must be >= watch.backoff_initial_secs".into(),
            ));
        }
        Ok(())
    }
}
