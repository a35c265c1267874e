//! Per-image and per-directory orchestration.
//!
//! Each image runs through normalize → metadata → detect → estimate →
//! annotate → report → move. Every failure inside one image, panics
//! included, becomes a failed `ProcessingResult`; only batch-wide
//! preconditions are returned as errors.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::DynamicImage;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::annotate::{annotated_path, Annotator};
use crate::config::{Config, PathsConfig};
use crate::detection::DetectionEngine;
use crate::error::{DetectionError, PipelineError};
use crate::estimation::Calibration;
use crate::metadata;
use crate::metadata::normalize::{is_supported, NormalizedImage, Normalizer};
use crate::models::{
    BatchProcessingResult, DetectionMethod, DetectionResult, GeneratedReport, ImageMetadata,
    ProcessingResult, Severity,
};
use crate::report::description;
use crate::report::ReportClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub create_report: bool,
    pub move_after: bool,
    pub annotate: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            create_report: true,
            move_after: true,
            annotate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(PathBuf),
    /// A file of the same name was already in the processed directory.
    SkippedExisting(PathBuf),
}

/// Moves `source` into `processed_dir` unless a same-named file is already there.
pub fn move_to_processed(source: &Path, processed_dir: &Path) -> std::io::Result<MoveOutcome> {
    let file_name = source.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
    })?;
    let target = processed_dir.join(file_name);
    if target.exists() {
        return Ok(MoveOutcome::SkippedExisting(target));
    }
    std::fs::create_dir_all(processed_dir)?;
    if std::fs::rename(source, &target).is_err() {
        // rename fails across filesystems
        std::fs::copy(source, &target)?;
        std::fs::remove_file(source)?;
    }
    Ok(MoveOutcome::Moved(target))
}

/// Supported image files directly inside `dir`, sorted by name.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::DirectoryNotFound(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Result of the single-image analysis surface: no report, no file moves.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub num_potholes: usize,
    pub severity: Option<Severity>,
    pub method: DetectionMethod,
    pub has_gps: bool,
    pub description_en: String,
    pub description_ar: String,
    /// Why a report would not be filed for this image, English then Arabic.
    pub note_en: Option<String>,
    pub note_ar: Option<String>,
    pub detection: DetectionResult,
    pub metadata: ImageMetadata,
}

struct Analyzed {
    detection: DetectionResult,
    image: DynamicImage,
    normalized: NormalizedImage,
}

pub struct ImageProcessor {
    paths: PathsConfig,
    normalizer: Normalizer,
    engine: DetectionEngine,
    calibration: Calibration,
    annotator: Annotator,
    reporter: Option<ReportClient>,
}

impl ImageProcessor {
    pub fn new(
        paths: PathsConfig,
        normalizer: Normalizer,
        engine: DetectionEngine,
        calibration: Calibration,
        annotator: Annotator,
        reporter: Option<ReportClient>,
    ) -> Self {
        Self {
            paths,
            normalizer,
            engine,
            calibration,
            annotator,
            reporter,
        }
    }

    pub fn from_config(config: &Config, debug_dir: Option<PathBuf>) -> Result<Self, PipelineError> {
        Ok(Self::new(
            config.paths.clone(),
            Normalizer::new(&config.normalize),
            DetectionEngine::from_config(config, debug_dir)?,
            config.calibration.clone(),
            Annotator::default(),
            ReportClient::from_config(&config.report)?,
        ))
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Runs the full pipeline on one image. Never panics or returns an error.
    pub fn process(&self, image_path: &Path, options: ProcessOptions) -> ProcessingResult {
        let start = Instant::now();
        let mut metadata = ImageMetadata::empty(
            image_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(image_path, options, &mut metadata)))
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(PipelineError::Panic(message))
            });

        match outcome {
            Ok((detection, report)) => ProcessingResult {
                image_path: image_path.to_path_buf(),
                success: true,
                error: None,
                metadata,
                detection: Some(detection),
                report,
                elapsed: start.elapsed(),
            },
            Err(e) => {
                warn!(path = %image_path.display(), error = %e, "image processing failed");
                ProcessingResult {
                    image_path: image_path.to_path_buf(),
                    success: false,
                    error: Some(e.to_string()),
                    metadata,
                    detection: None,
                    report: None,
                    elapsed: start.elapsed(),
                }
            }
        }
    }

    fn run(
        &self,
        image_path: &Path,
        options: ProcessOptions,
        metadata: &mut ImageMetadata,
    ) -> Result<(DetectionResult, Option<GeneratedReport>), PipelineError> {
        if !is_supported(image_path) {
            return Err(PipelineError::UnsupportedExtension(image_path.to_path_buf()));
        }

        // Converters may drop GPS tags, so read them from the original.
        *metadata = metadata::extract(image_path);
        let Analyzed { mut detection, image, normalized } = self.detect_and_estimate(image_path)?;

        if options.annotate && !detection.detections.is_empty() {
            let target = annotated_path(&self.paths.annotated_dir(), image_path);
            detection.annotated_image_path = self.annotator.annotate(&image, &detection.detections, &target);
        }
        drop(image);

        let report = if options.create_report {
            self.submit_report(&detection, metadata, &normalized.path)
        } else {
            None
        };
        self.normalizer.discard(&normalized);

        if options.move_after {
            match move_to_processed(image_path, &self.paths.processed) {
                Ok(MoveOutcome::Moved(target)) => debug!(target = %target.display(), "moved source image"),
                Ok(MoveOutcome::SkippedExisting(target)) => {
                    info!(target = %target.display(), "processed file already exists, leaving source in place")
                }
                Err(e) => warn!(path = %image_path.display(), error = %e, "failed to move source image"),
            }
        }

        Ok((detection, report))
    }

    /// Normalize, detect and attach physical estimates.
    fn detect_and_estimate(&self, image_path: &Path) -> Result<Analyzed, PipelineError> {
        let normalized = self.normalizer.normalize(image_path, &self.paths.converted_dir())?;
        let image = image::open(&normalized.path).map_err(|source| DetectionError::UnreadableImage {
            path: normalized.path.clone(),
            source,
        })?;

        let mut detection = self.engine.detect_image(image_path, &image);
        let detections = std::mem::take(&mut detection.detections);
        detection.detections = self
            .calibration
            .estimate_all(detections, detection.image_width, detection.image_height);
        Ok(Analyzed {
            detection,
            image,
            normalized,
        })
    }

    fn submit_report(&self, detection: &DetectionResult, metadata: &ImageMetadata, normalized_path: &Path) -> Option<GeneratedReport> {
        let Some(reporter) = &self.reporter else {
            debug!("reporting service not configured, skipping report");
            return None;
        };
        let mut photos = vec![normalized_path.to_path_buf()];
        photos.extend(detection.annotated_image_path.clone());
        Some(reporter.submit(detection, metadata, &photos))
    }

    /// Processes every supported file in `dir` one at a time.
    pub fn process_directory(&self, dir: &Path, options: ProcessOptions) -> Result<BatchProcessingResult, PipelineError> {
        let files = discover_images(dir)?;
        Ok(self.process_files(dir, &files, options))
    }

    /// Processes an explicit list of files as one batch reported against `dir`.
    pub fn process_files(&self, dir: &Path, files: &[PathBuf], options: ProcessOptions) -> BatchProcessingResult {
        let start = Instant::now();
        info!(dir = %dir.display(), files = files.len(), "starting batch");

        let mut results = Vec::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            debug!(index = i + 1, total = files.len(), path = %path.display(), "processing image");
            results.push(self.process(path, options));
        }

        let batch = BatchProcessingResult::from_results(dir.to_path_buf(), results, start.elapsed());
        info!(
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            potholes = batch.total_potholes,
            reports = batch.reports_created,
            "batch finished"
        );
        batch
    }

    /// Writes `batch_results_<timestamp>.json` into the output directory.
    pub fn write_summary(&self, batch: &BatchProcessingResult) -> Result<PathBuf, PipelineError> {
        write_batch_summary(batch, &self.paths.output)
    }

    /// Processes a directory and writes its summary; a summary write failure is only logged.
    pub fn run_batch(&self, dir: &Path, options: ProcessOptions) -> Result<(BatchProcessingResult, Option<PathBuf>), PipelineError> {
        let batch = self.process_directory(dir, options)?;
        Ok(self.summarize(batch))
    }

    /// `run_batch` over an explicit file list.
    pub fn run_files(&self, dir: &Path, files: &[PathBuf], options: ProcessOptions) -> (BatchProcessingResult, Option<PathBuf>) {
        self.summarize(self.process_files(dir, files, options))
    }

    fn summarize(&self, batch: BatchProcessingResult) -> (BatchProcessingResult, Option<PathBuf>) {
        let summary = match self.write_summary(&batch) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(error = %e, "failed to write batch summary");
                None
            }
        };
        (batch, summary)
    }

    /// Detection plus bilingual description, without reporting or moving the file.
    pub fn analyze(&self, image_path: &Path) -> Result<AnalysisSummary, PipelineError> {
        if !is_supported(image_path) {
            return Err(PipelineError::UnsupportedExtension(image_path.to_path_buf()));
        }
        let metadata = metadata::extract(image_path);
        let Analyzed { detection, normalized, .. } = self.detect_and_estimate(image_path)?;
        self.normalizer.discard(&normalized);
        let (note_en, note_ar) = description::no_report_reason(&detection, &metadata).unzip();
        Ok(AnalysisSummary {
            num_potholes: detection.num_potholes(),
            severity: detection.max_severity(),
            method: detection.method,
            has_gps: metadata.has_gps(),
            description_en: description::describe_en(&detection),
            description_ar: description::describe_ar(&detection),
            note_en,
            note_ar,
            detection,
            metadata,
        })
    }
}

pub fn write_batch_summary(batch: &BatchProcessingResult, output_dir: &Path) -> Result<PathBuf, PipelineError> {
    std::fs::create_dir_all(output_dir)?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = now
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .map_err(|e| PipelineError::Summary(e.to_string()))?;

    let mut path = output_dir.join(format!("batch_results_{}.json", stamp));
    let mut n = 0u32;
    while path.exists() {
        n += 1;
        path = output_dir.join(format!("batch_results_{}_{}.json", stamp, n));
    }

    let json = serde_json::to_string_pretty(batch).map_err(|e| PipelineError::Summary(e.to_string()))?;
    std::fs::write(&path, json)?;
    info!(path = %path.display(), "wrote batch summary");
    Ok(path)
}
