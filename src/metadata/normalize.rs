//! Converts camera-native containers into JPEG so the rest of the pipeline
//! only sees formats the `image` crate decodes.
//!
//! Metadata must be extracted from the original file: converters are not
//! guaranteed to carry GPS tags across.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use tracing::{debug, info, warn};

use crate::config::NormalizeConfig;
use crate::error::NormalizeError;

/// Extensions accepted by the pipeline, lowercase.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Already JPEG or PNG; used as-is.
    StandardRaster,
    /// Decodable in-process but re-encoded to JPEG.
    Decodable,
    /// HEIC/HEIF; needs the external converter.
    Heif,
}

/// Classifies a path by extension, case-insensitively.
pub fn source_kind(path: &Path) -> Option<SourceKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" => Some(SourceKind::StandardRaster),
        "webp" | "bmp" | "tif" | "tiff" => Some(SourceKind::Decodable),
        "heic" | "heif" => Some(SourceKind::Heif),
        _ => None,
    }
}

pub fn is_supported(path: &Path) -> bool {
    source_kind(path).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub path: PathBuf,
    /// False when the source passed through unchanged.
    pub converted: bool,
}

/// Encodes an image as a three-channel JPEG.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    Ok(buf)
}

pub fn write_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<(), NormalizeError> {
    let bytes = encode_jpeg(img, quality)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn has_extra_channels(color: ColorType) -> bool {
    !matches!(color, ColorType::Rgb8 | ColorType::L8)
}

pub struct Normalizer {
    jpeg_quality: u8,
    heif_converter: Option<String>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            heif_converter: config.heif_converter.clone(),
        }
    }

    /// Returns the path of a JPEG/PNG equivalent of `source`, converting into
    /// `output_dir/<file name>.jpg` when needed.
    pub fn normalize(&self, source: &Path, output_dir: &Path) -> Result<NormalizedImage, NormalizeError> {
        let kind = source_kind(source)
            .ok_or_else(|| NormalizeError::UnsupportedFormat(source.display().to_string()))?;

        if kind == SourceKind::StandardRaster {
            return Ok(NormalizedImage {
                path: source.to_path_buf(),
                converted: false,
            });
        }

        std::fs::create_dir_all(output_dir)?;
        // Full file name, so `a.webp` and `a.bmp` convert to different targets.
        let name = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let target = output_dir.join(format!("{}.jpg", name));

        match kind {
            SourceKind::Heif => self.convert_heif(source, &target)?,
            _ => {
                let img = image::open(source)?;
                write_jpeg(&img, &target, self.jpeg_quality)?;
            }
        }

        info!(source = %source.display(), target = %target.display(), "normalized image format");
        Ok(NormalizedImage {
            path: target,
            converted: true,
        })
    }

    /// Deletes a converted intermediate; pass-through sources are left alone.
    pub fn discard(&self, normalized: &NormalizedImage) {
        if !normalized.converted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&normalized.path) {
            warn!(path = %normalized.path.display(), error = %e, "failed to remove converted image");
        }
    }

    fn convert_heif(&self, source: &Path, target: &Path) -> Result<(), NormalizeError> {
        let converter = self
            .heif_converter
            .as_deref()
            .ok_or_else(|| NormalizeError::NoHeifConverter(source.to_path_buf()))?;
        let mut parts = converter.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| NormalizeError::NoHeifConverter(source.to_path_buf()))?;

        debug!(program, source = %source.display(), "running HEIF converter");
        let output = Command::new(program)
            .args(parts)
            .arg(source)
            .arg(target)
            .output()
            .map_err(|e| NormalizeError::ConverterFailed {
                path: source.to_path_buf(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(NormalizeError::ConverterFailed {
                path: source.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Converters may keep alpha; the pipeline expects three channels.
        let img = image::open(target)?;
        if has_extra_channels(img.color()) {
            write_jpeg(&img, target, self.jpeg_quality)?;
        }
        Ok(())
    }
}
