pub mod annotate;
pub mod config;
pub mod detection;
pub mod error;
pub mod estimation;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod report;
pub mod retry;
pub mod watch;

pub use config::Config;
pub use detection::{DetectionEngine, Detector};
pub use error::PipelineError;
pub use models::{
    BatchProcessingResult, BoundingBox, Detection, DetectionMethod, DetectionResult,
    GeneratedReport, GpsData, ImageMetadata, ProcessingResult, Severity,
};
pub use pipeline::{Pipeline, PipelineContext, PipelineData, PipelineStep};
pub use processor::{AnalysisSummary, ImageProcessor, ProcessOptions};
