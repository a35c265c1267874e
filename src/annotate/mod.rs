//! Draws detections on a copy of the image, colored by severity.

pub mod font;

use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::metadata::normalize::write_jpeg;
use crate::models::{Detection, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<Color> for Rgb<u8> {
    fn from(color: Color) -> Self {
        Rgb([color.r, color.g, color.b])
    }
}

pub const LOW_COLOR: Color = Color { r: 0, g: 200, b: 0 };
pub const MEDIUM_COLOR: Color = Color { r: 255, g: 165, b: 0 };
pub const HIGH_COLOR: Color = Color { r: 220, g: 0, b: 0 };
/// Detections without an estimate.
pub const UNRATED_COLOR: Color = Color { r: 255, g: 255, b: 0 };

pub fn severity_color(severity: Option<Severity>) -> Color {
    match severity {
        Some(Severity::Low) => LOW_COLOR,
        Some(Severity::Medium) => MEDIUM_COLOR,
        Some(Severity::High) => HIGH_COLOR,
        None => UNRATED_COLOR,
    }
}

fn text_color(severity: Option<Severity>) -> Rgb<u8> {
    match severity {
        Some(Severity::High) => Rgb([255, 255, 255]),
        _ => Rgb([0, 0, 0]),
    }
}

/// Banner text: class, confidence, and the estimate when present.
pub fn label_for(detection: &Detection, show_size: bool) -> String {
    let mut label = format!(
        "{} {:.0}%",
        detection.class_name,
        detection.confidence * 100.0
    );
    if let Some(estimate) = detection.estimate() {
        label.push(' ');
        label.push_str(estimate.severity.as_str());
        if show_size {
            label.push_str(&format!(" {:.0}X{:.0}CM", estimate.width_cm, estimate.height_cm));
        }
    }
    label.to_uppercase()
}

#[derive(Debug, Clone)]
pub struct Annotator {
    pub line_width: u32,
    pub show_size: bool,
    pub jpeg_quality: u8,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            line_width: 3,
            show_size: true,
            jpeg_quality: 90,
        }
    }
}

impl Annotator {
    /// Renders detections onto a new RGB image; `image` is left untouched.
    pub fn render(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return canvas;
        }
        // Text scales with the image so labels stay legible on phone photos.
        let scale = (w.max(h) / 800).clamp(1, 4);

        for detection in detections {
            let bbox = detection.bbox.clamped(w, h);
            let severity = detection.severity();
            let color: Rgb<u8> = severity_color(severity).into();

            let x_min = bbox.x1().round() as i32;
            let y_min = bbox.y1().round() as i32;
            let rw = (bbox.width().round() as u32).max(1);
            let rh = (bbox.height().round() as u32).max(1);
            draw_hollow_rect_mut(&mut canvas, Rect::at(x_min, y_min).of_size(rw, rh), color);
            for t in 1..(self.line_width as i32).min(rw as i32 / 2).min(rh as i32 / 2) {
                let inner = Rect::at(x_min + t, y_min + t)
                    .of_size(rw.saturating_sub(2 * t as u32).max(1), rh.saturating_sub(2 * t as u32).max(1));
                draw_hollow_rect_mut(&mut canvas, inner, color);
            }

            let label = label_for(detection, self.show_size);
            let padding = 2 * scale;
            let banner_w = font::text_width(&label, scale) + 2 * padding;
            let banner_h = font::text_height(scale) + 2 * padding;
            // Above the box, or inside its top edge when there is no room.
            let banner_y = if y_min >= banner_h as i32 { y_min - banner_h as i32 } else { y_min };
            draw_filled_rect_mut(&mut canvas, Rect::at(x_min, banner_y).of_size(banner_w, banner_h), color);
            font::draw_text(
                &mut canvas,
                x_min + padding as i32,
                banner_y + padding as i32,
                &label,
                scale,
                text_color(severity),
            );
        }
        canvas
    }

    /// Writes the annotated copy to `output_path`; `None` if it could not be written.
    pub fn annotate(&self, image: &DynamicImage, detections: &[Detection], output_path: &Path) -> Option<PathBuf> {
        let canvas = self.render(image, detections);
        if let Some(parent) = output_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "cannot create annotation directory");
                return None;
            }
        }
        match write_jpeg(&DynamicImage::ImageRgb8(canvas), output_path, self.jpeg_quality) {
            Ok(()) => {
                debug!(path = %output_path.display(), detections = detections.len(), "wrote annotated image");
                Some(output_path.to_path_buf())
            }
            Err(e) => {
                warn!(path = %output_path.display(), error = %e, "failed to write annotated image");
                None
            }
        }
    }
}

/// `<dir>/<stem>_<ext>_annotated.jpg`; the extension keeps `a.png` and `a.bmp` apart.
pub fn annotated_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    match source.extension() {
        Some(ext) => dir.join(format!("{}_{}_annotated.jpg", stem, ext.to_string_lossy().to_ascii_lowercase())),
        None => dir.join(format!("{}_annotated.jpg", stem)),
    }
}
