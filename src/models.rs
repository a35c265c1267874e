use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use time::PrimitiveDateTime;

/// Dark region found by the local heuristic, in pixel coordinates.
#[derive(Debug, Clone)]
pub struct Contour {
    pub label: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Contour {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u32 {
        self.pixel_count
    }

    /// Long side over short side, always >= 1.
    pub fn aspect_ratio(&self) -> f32 {
        let w = self.width() as f32;
        let h = self.height() as f32;
        w.max(h) / w.min(h)
    }

    /// Fraction of the image covered by this region's pixels.
    pub fn area_fraction(&self, image_width: u32, image_height: u32) -> f32 {
        let total = image_width as f32 * image_height as f32;
        if total == 0.0 {
            return 0.0;
        }
        self.area() as f32 / total
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x1: self.min_x as f32,
            y1: self.min_y as f32,
            x2: (self.max_x + 1) as f32,
            y2: (self.max_y + 1) as f32,
        }
    }
}

/// Axis-aligned box on the normalized image. Always satisfies `x2 >= x1`, `y2 >= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BoundingBox {
    /// Returns `None` for swapped corners or non-finite coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if !finite || x2 < x1 || y2 < y1 {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }

    /// Builds a box from any two opposite corners.
    pub fn from_corners(ax: f32, ay: f32, bx: f32, by: f32) -> Option<Self> {
        Self::new(ax.min(bx), ay.min(by), ax.max(bx), ay.max(by))
    }

    /// Center-form (as returned by detection models) to corner-form.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Option<Self> {
        let hw = width.abs() / 2.0;
        let hh = height.abs() / 2.0;
        Self::new(cx - hw, cy - hh, cx + hw, cy + hh)
    }

    pub fn x1(&self) -> f32 {
        self.x1
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn x2(&self) -> f32 {
        self.x2
    }

    pub fn y2(&self) -> f32 {
        self.y2
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Multiplies every coordinate by `factor` (used to undo a downscale).
    pub fn scaled(&self, factor_x: f32, factor_y: f32) -> Self {
        Self {
            x1: self.x1 * factor_x,
            y1: self.y1 * factor_y,
            x2: self.x2 * factor_x,
            y2: self.y2 * factor_y,
        }
    }

    /// Clamps the box to `[0, width] x [0, height]`.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical size estimate attached to a detection by the geometric estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhysicalEstimate {
    pub width_cm: f64,
    pub height_cm: f64,
    pub depth_cm: f64,
    pub area_cm2: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_name: String,
    estimate: Option<PhysicalEstimate>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            class_name: class_name.into(),
            estimate: None,
        }
    }

    /// Attaches the physical estimate. An estimate that is already set is kept.
    pub fn with_estimate(mut self, estimate: PhysicalEstimate) -> Self {
        if self.estimate.is_none() {
            self.estimate = Some(estimate);
        }
        self
    }

    pub fn estimate(&self) -> Option<&PhysicalEstimate> {
        self.estimate.as_ref()
    }

    pub fn severity(&self) -> Option<Severity> {
        self.estimate.map(|e| e.severity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Remote,
    LocalFallback,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Remote => "remote",
            DetectionMethod::LocalFallback => "local-fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub image_path: PathBuf,
    pub image_width: u32,
    pub image_height: u32,
    pub detections: Vec<Detection>,
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
    pub annotated_image_path: Option<PathBuf>,
    pub method: DetectionMethod,
}

impl DetectionResult {
    pub fn num_potholes(&self) -> usize {
        self.detections.len()
    }

    /// Highest severity among the estimated detections.
    pub fn max_severity(&self) -> Option<Severity> {
        self.detections.iter().filter_map(Detection::severity).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsData {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub timestamp: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    pub gps: Option<GpsData>,
    pub capture_date: Option<PrimitiveDateTime>,
    pub device_make: Option<String>,
    pub device_model: Option<String>,
    pub original_filename: String,
}

impl ImageMetadata {
    pub fn empty(original_filename: impl Into<String>) -> Self {
        Self {
            original_filename: original_filename.into(),
            ..Default::default()
        }
    }

    pub fn has_gps(&self) -> bool {
        self.gps.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub report_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: Option<Severity>,
    pub num_potholes: usize,
}

impl GeneratedReport {
    pub fn failed(reason: impl Into<String>, result: &DetectionResult, metadata: &ImageMetadata) -> Self {
        Self {
            report_id: None,
            success: false,
            error: Some(reason.into()),
            latitude: metadata.gps.as_ref().map(|g| g.latitude),
            longitude: metadata.gps.as_ref().map(|g| g.longitude),
            severity: result.max_severity(),
            num_potholes: result.num_potholes(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub image_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: ImageMetadata,
    pub detection: Option<DetectionResult>,
    pub report: Option<GeneratedReport>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl ProcessingResult {
    pub fn num_potholes(&self) -> usize {
        self.detection.as_ref().map_or(0, DetectionResult::num_potholes)
    }

    pub fn report_created(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchProcessingResult {
    pub directory: PathBuf,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_potholes: usize,
    pub reports_created: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub results: Vec<ProcessingResult>,
}

impl BatchProcessingResult {
    pub fn from_results(directory: PathBuf, results: Vec<ProcessingResult>, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            directory,
            total: results.len(),
            successful,
            failed: results.len() - successful,
            total_potholes: results.iter().map(ProcessingResult::num_potholes).sum(),
            reports_created: results.iter().filter(|r| r.report_created()).count(),
            elapsed,
            results,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
