pub mod preprocessing;
pub mod contours;
pub mod steps;
pub mod local;
pub mod remote;

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DetectionError;
use crate::models::{BoundingBox, Detection, DetectionMethod, DetectionResult};

pub use local::LocalHeuristicDetector;
pub use remote::RemoteDetector;

/// One detection strategy.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detections in pixel coordinates of `image`. An empty vector means "nothing found".
    fn detect(&self, image: &DynamicImage, source: &Path) -> Result<Vec<Detection>, DetectionError>;
}

/// Last resort when no strategy localizes anything: one box centered in the image.
#[derive(Debug, Clone)]
pub struct CenterGuess {
    pub confidence: f32,
    pub class_name: String,
}

impl CenterGuess {
    /// Square box of a third of the shorter image side, centered.
    pub fn guess(&self, width: u32, height: u32) -> Option<Detection> {
        let side = width.min(height) as f32 / 3.0;
        let bbox = BoundingBox::from_center(width as f32 / 2.0, height as f32 / 2.0, side, side)?;
        Some(Detection::new(bbox, self.confidence, self.class_name.clone()))
    }
}

/// Remote strategy first, then the local heuristic, then the optional center guess.
pub struct DetectionEngine {
    remote: Option<Box<dyn Detector>>,
    local: Box<dyn Detector>,
    center_guess: Option<CenterGuess>,
}

impl DetectionEngine {
    pub fn new(remote: Option<Box<dyn Detector>>, local: Box<dyn Detector>) -> Self {
        Self {
            remote,
            local,
            center_guess: None,
        }
    }

    pub fn with_center_guess(mut self, guess: Option<CenterGuess>) -> Self {
        self.center_guess = guess;
        self
    }

    pub fn from_config(config: &Config, debug_dir: Option<PathBuf>) -> Result<Self, DetectionError> {
        let d = &config.detection;
        let remote: Option<Box<dyn Detector>> = match &d.endpoint {
            Some(endpoint) => Some(Box::new(RemoteDetector::new(endpoint, d)?)),
            None => None,
        };

        let mut local = LocalHeuristicDetector::new(&config.heuristic, d.class_name.clone());
        if let Some(dir) = debug_dir {
            local = local.with_debug_root(dir);
        }

        let center_guess = d.center_guess.then(|| CenterGuess {
            confidence: d.center_guess_confidence,
            class_name: d.class_name.clone(),
        });

        Ok(Self::new(remote, Box::new(local)).with_center_guess(center_guess))
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Loads `image_path` and detects. Fails only if the image cannot be read.
    pub fn detect(&self, image_path: &Path) -> Result<DetectionResult, DetectionError> {
        let img = image::open(image_path).map_err(|source| DetectionError::UnreadableImage {
            path: image_path.to_path_buf(),
            source,
        })?;
        Ok(self.detect_image(image_path, &img))
    }

    /// Runs the strategy chain on an already decoded image. Never fails.
    pub fn detect_image(&self, image_path: &Path, img: &DynamicImage) -> DetectionResult {
        let start = Instant::now();
        let (detections, method) = self.run_strategies(image_path, img);
        let result = DetectionResult {
            image_path: image_path.to_path_buf(),
            image_width: img.width(),
            image_height: img.height(),
            detections,
            processing_time: start.elapsed(),
            annotated_image_path: None,
            method,
        };
        info!(
            path = %image_path.display(),
            potholes = result.num_potholes(),
            method = method.as_str(),
            "detection finished"
        );
        result
    }

    fn run_strategies(&self, image_path: &Path, img: &DynamicImage) -> (Vec<Detection>, DetectionMethod) {
        if let Some(remote) = &self.remote {
            match remote.detect(img, image_path) {
                Ok(found) if !found.is_empty() => return (found, DetectionMethod::Remote),
                Ok(_) => debug!(path = %image_path.display(), "remote detector found nothing"),
                Err(e) => warn!(
                    path = %image_path.display(),
                    error = %e,
                    "remote detection unavailable, using local heuristic"
                ),
            }
        }

        match self.local.detect(img, image_path) {
            Ok(found) if !found.is_empty() => return (found, DetectionMethod::LocalFallback),
            Ok(_) => debug!(path = %image_path.display(), detector = self.local.name(), "local heuristic found nothing"),
            Err(e) => warn!(path = %image_path.display(), error = %e, "local heuristic failed"),
        }

        let guessed = self
            .center_guess
            .as_ref()
            .and_then(|g| g.guess(img.width(), img.height()));
        if guessed.is_some() {
            debug!(path = %image_path.display(), "using center guess");
        }
        (guessed.into_iter().collect(), DetectionMethod::LocalFallback)
    }
}
