use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

use super::Detector;
use super::steps::*;
use crate::config::HeuristicConfig;
use crate::error::DetectionError;
use crate::models::Detection;
use crate::pipeline::{Pipeline, PipelineContext};

/// Regions smaller than this many pixels are treated as noise before any ratio test.
const MIN_REGION_PIXELS: u32 = 16;

/// Build the dark-region pipeline: grayscale → blur → inverse threshold → regions → filter → cap
pub fn build_heuristic_pipeline(config: &HeuristicConfig) -> Pipeline {
    Pipeline::new()
        .add_step(Arc::new(GrayscaleStep))
        .add_step(Arc::new(BlurStep { sigma: config.blur_sigma }))
        .add_step(Arc::new(InverseThresholdStep { level: config.dark_threshold }))
        .add_step(Arc::new(ContourDetectionStep { min_area: MIN_REGION_PIXELS }))
        .add_step(Arc::new(RegionFilterStep {
            min_area_fraction: config.min_area_fraction,
            max_area_fraction: config.max_area_fraction,
            max_aspect_ratio: config.max_aspect_ratio,
        }))
        .add_step(Arc::new(LimitStep { max_items: config.max_detections }))
}

/// Classical fallback: every surviving dark region becomes a fixed-confidence detection.
pub struct LocalHeuristicDetector {
    pipeline: Pipeline,
    confidence: f32,
    class_name: String,
    debug_root: Option<PathBuf>,
}

impl LocalHeuristicDetector {
    pub fn new(config: &HeuristicConfig, class_name: impl Into<String>) -> Self {
        Self {
            pipeline: build_heuristic_pipeline(config),
            confidence: config.confidence,
            class_name: class_name.into(),
            debug_root: None,
        }
    }

    /// Save stage images under `<dir>/<image stem>/`.
    pub fn with_debug_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_root = Some(dir.into());
        self
    }

    fn context_for(&self, source: &Path) -> PipelineContext {
        match &self.debug_root {
            Some(root) => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                PipelineContext::with_debug_dir(root.join(stem))
            }
            None => PipelineContext::default(),
        }
    }
}

impl Detector for LocalHeuristicDetector {
    fn name(&self) -> &'static str {
        "local-heuristic"
    }

    fn detect(&self, image: &DynamicImage, source: &Path) -> Result<Vec<Detection>, DetectionError> {
        let context = self.context_for(source);
        let regions = self
            .pipeline
            .run_with_context(image.clone(), &context)
            .map_err(|e| DetectionError::Heuristic(e.to_string()))?;

        Ok(regions
            .into_iter()
            .filter_map(|region| region.bbox)
            .map(|bbox| Detection::new(bbox, self.confidence, self.class_name.clone()))
            .collect())
    }
}
