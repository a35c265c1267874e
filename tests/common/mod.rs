mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from roadscan for tests
pub use roadscan::config::{Config, HeuristicConfig, PathsConfig, ReportConfig};
pub use roadscan::models::{
    BoundingBox, Detection, DetectionMethod, DetectionResult, GpsData, ImageMetadata, Severity,
};
