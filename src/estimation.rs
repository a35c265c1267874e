//! Heuristic conversion of pixel boxes into physical size and severity.
//!
//! A pixels-per-centimeter constant calibrated at a reference resolution is
//! rescaled by `image_width / reference_width`. Depth is inferred from the
//! planar size and shape, never measured.

use serde::Deserialize;

use crate::models::{BoundingBox, Detection, PhysicalEstimate, Severity};

/// Three buckets per measurement: below `thresholds[0]`, below `thresholds[1]`, above.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub width_cm: [f64; 2],
    pub width_points: [u32; 3],
    pub depth_cm: [f64; 2],
    pub depth_points: [u32; 3],
    pub area_cm2: [f64; 2],
    pub area_points: [u32; 3],
    /// Highest total score still classified LOW.
    pub low_max: u32,
    /// Highest total score still classified MEDIUM.
    pub medium_max: u32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            width_cm: [30.0, 60.0],
            width_points: [1, 2, 3],
            depth_cm: [3.0, 6.0],
            depth_points: [1, 3, 4],
            area_cm2: [500.0, 2000.0],
            area_points: [1, 2, 3],
            low_max: 4,
            medium_max: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Pixels per centimeter at `reference_width`.
    pub pixels_per_cm: f64,
    pub reference_width: u32,
    /// Depth as a fraction of the mean planar size.
    pub depth_ratio: f64,
    pub elongated_aspect: f64,
    pub elongated_depth_factor: f64,
    pub round_aspect: f64,
    pub round_depth_factor: f64,
    pub severity: SeverityThresholds,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixels_per_cm: 20.0,
            reference_width: 4000,
            depth_ratio: 0.1,
            elongated_aspect: 2.0,
            elongated_depth_factor: 1.2,
            round_aspect: 1.3,
            round_depth_factor: 0.8,
            severity: SeverityThresholds::default(),
        }
    }
}

fn bucket(value: f64, thresholds: [f64; 2], points: [u32; 3]) -> u32 {
    if value < thresholds[0] {
        points[0]
    } else if value < thresholds[1] {
        points[1]
    } else {
        points[2]
    }
}

fn ascending(thresholds: [f64; 2], points: [u32; 3]) -> bool {
    thresholds[0] < thresholds[1] && points[0] <= points[1] && points[1] <= points[2]
}

impl Calibration {
    /// Pixels per centimeter for an image of the given width.
    pub fn scaled_pixels_per_cm(&self, image_width: u32) -> f64 {
        self.pixels_per_cm * (image_width as f64 / self.reference_width as f64)
    }

    pub fn estimate(&self, bbox: &BoundingBox, image_width: u32, image_height: u32) -> PhysicalEstimate {
        let bbox = bbox.clamped(image_width, image_height);
        let ppcm = self.scaled_pixels_per_cm(image_width);
        let (width_cm, height_cm) = if ppcm > 0.0 {
            (bbox.width() as f64 / ppcm, bbox.height() as f64 / ppcm)
        } else {
            (0.0, 0.0)
        };

        let mut depth_cm = (width_cm + height_cm) / 2.0 * self.depth_ratio;
        let (long, short) = (width_cm.max(height_cm), width_cm.min(height_cm));
        if short > 0.0 {
            let aspect = long / short;
            if aspect > self.elongated_aspect {
                depth_cm *= self.elongated_depth_factor;
            } else if aspect < self.round_aspect {
                depth_cm *= self.round_depth_factor;
            }
        }

        let area_cm2 = width_cm * height_cm * std::f64::consts::PI / 4.0;

        PhysicalEstimate {
            width_cm,
            height_cm,
            depth_cm,
            area_cm2,
            severity: self.classify(width_cm, depth_cm, area_cm2),
        }
    }

    /// Sum of the width, depth and area contributions.
    pub fn score(&self, width_cm: f64, depth_cm: f64, area_cm2: f64) -> u32 {
        let s = &self.severity;
        bucket(width_cm, s.width_cm, s.width_points)
            + bucket(depth_cm, s.depth_cm, s.depth_points)
            + bucket(area_cm2, s.area_cm2, s.area_points)
    }

    pub fn classify(&self, width_cm: f64, depth_cm: f64, area_cm2: f64) -> Severity {
        let score = self.score(width_cm, depth_cm, area_cm2);
        if score <= self.severity.low_max {
            Severity::Low
        } else if score <= self.severity.medium_max {
            Severity::Medium
        } else {
            Severity::High
        }
    }

    /// Runs the estimator over every detection of an image.
    pub fn estimate_all(&self, detections: Vec<Detection>, image_width: u32, image_height: u32) -> Vec<Detection> {
        detections
            .into_iter()
            .map(|d| {
                let estimate = self.estimate(&d.bbox, image_width, image_height);
                d.with_estimate(estimate)
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.pixels_per_cm > 0.0) || self.reference_width == 0 {
            return Err("calibration.pixels_per_cm and reference_width must be positive".into());
        }
        if !(self.depth_ratio >= 0.0) {
            return Err("calibration.depth_ratio must be non-negative".into());
        }
        if self.round_aspect > self.elongated_aspect {
            return Err("calibration.round_aspect must not exceed elongated_aspect".into());
        }
        let s = &self.severity;
        if !ascending(s.width_cm, s.width_points)
            || !ascending(s.depth_cm, s.depth_points)
            || !ascending(s.area_cm2, s.area_points)
        {
            return Err("severity thresholds must increase and points must not decrease".into());
        }
        if s.low_max >= s.medium_max {
            return Err("severity.low_max must be below severity.medium_max".into());
        }
        Ok(())
    }
}
