//! Human-readable text for reports and the single-image analysis surface.

use std::fmt::Write as _;

use crate::models::{Detection, DetectionResult, ImageMetadata, Severity};

pub fn report_title(result: &DetectionResult) -> String {
    let severity = result.max_severity().map_or("UNRATED", |s| s.as_str());
    match result.num_potholes() {
        1 => format!("Pothole detected ({} severity)", severity),
        n => format!("{} potholes detected ({} severity)", n, severity),
    }
}

fn measurement_line_en(index: usize, detection: &Detection) -> String {
    match detection.estimate() {
        Some(e) => format!(
            "Pothole {}: approx. {:.0} x {:.0} cm, depth ~{:.1} cm, area ~{:.0} cm², severity {}, confidence {:.0}%",
            index,
            e.width_cm,
            e.height_cm,
            e.depth_cm,
            e.area_cm2,
            e.severity,
            detection.confidence * 100.0
        ),
        None => format!(
            "Pothole {}: size not estimated, confidence {:.0}%",
            index,
            detection.confidence * 100.0
        ),
    }
}

/// Free-text report body: one line per detection plus capture context.
pub fn report_description(result: &DetectionResult, metadata: &ImageMetadata) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Automatic road inspection found {} pothole(s) in {}.",
        result.num_potholes(),
        metadata.original_filename
    );
    for (i, detection) in result.detections.iter().enumerate() {
        let _ = writeln!(text, "- {}", measurement_line_en(i + 1, detection));
    }
    if let Some(date) = metadata.capture_date {
        let _ = writeln!(text, "Captured: {}", date);
    }
    if let (Some(make), Some(model)) = (&metadata.device_make, &metadata.device_model) {
        let _ = writeln!(text, "Device: {} {}", make, model);
    }
    let _ = write!(
        text,
        "Detection method: {}. Sizes are heuristic estimates.",
        result.method.as_str()
    );
    text
}

fn severity_ar(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "منخفضة",
        Severity::Medium => "متوسطة",
        Severity::High => "عالية",
    }
}

pub fn describe_en(result: &DetectionResult) -> String {
    if result.detections.is_empty() {
        return "No potholes were detected in this image.".to_string();
    }
    let mut text = format!("Detected {} pothole(s)", result.num_potholes());
    if let Some(severity) = result.max_severity() {
        let _ = write!(text, " with {} maximum severity", severity.as_str().to_lowercase());
    }
    text.push('.');
    for (i, detection) in result.detections.iter().enumerate() {
        let _ = write!(text, " {}.", measurement_line_en(i + 1, detection));
    }
    text
}

pub fn describe_ar(result: &DetectionResult) -> String {
    if result.detections.is_empty() {
        return "لم يتم اكتشاف أي حفر في هذه الصورة.".to_string();
    }
    let mut text = format!("تم اكتشاف {} حفرة", result.num_potholes());
    if let Some(severity) = result.max_severity() {
        let _ = write!(text, " بدرجة خطورة {}", severity_ar(severity));
    }
    text.push('.');
    for (i, detection) in result.detections.iter().enumerate() {
        match detection.estimate() {
            Some(e) => {
                let _ = write!(
                    text,
                    " الحفرة {}: العرض ~{:.0} سم، الطول ~{:.0} سم، العمق ~{:.1} سم، المساحة ~{:.0} سم²، الخطورة {}.",
                    i + 1,
                    e.width_cm,
                    e.height_cm,
                    e.depth_cm,
                    e.area_cm2,
                    severity_ar(e.severity)
                );
            }
            None => {
                let _ = write!(text, " الحفرة {}: لم يتم تقدير الحجم.", i + 1);
            }
        }
    }
    text
}

/// Why no report was filed, in both languages; `None` when a report is possible.
pub fn no_report_reason(result: &DetectionResult, metadata: &ImageMetadata) -> Option<(String, String)> {
    if result.detections.is_empty() {
        return Some((
            "No report was created because no pothole was detected.".to_string(),
            "لم يتم إنشاء بلاغ لعدم اكتشاف أي حفرة.".to_string(),
        ));
    }
    if metadata.gps.is_none() {
        return Some((
            "No report was created because the image has no GPS location.".to_string(),
            "لم يتم إنشاء بلاغ لأن الصورة لا تحتوي على موقع GPS.".to_string(),
        ));
    }
    None
}
