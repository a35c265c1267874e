//! Capture metadata (GPS fix, capture time, device) read from EXIF tags.
//!
//! Extraction never fails outward: a file without readable tags yields an
//! `ImageMetadata` with every optional field empty.

pub mod normalize;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{Exif, Field, In, Rational, Tag, Value};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};
use tracing::{debug, warn};

use crate::error::MetadataError;
use crate::models::{GpsData, ImageMetadata};

/// Date tags in order of preference.
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// Reads capture metadata from `image_path`. Errors degrade to empty fields.
pub fn extract(image_path: &Path) -> ImageMetadata {
    let filename = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let exif = match read_exif(image_path) {
        Ok(exif) => exif,
        Err(MetadataError::Exif(exif::Error::NotFound(_))) => {
            debug!(path = %image_path.display(), "no EXIF data");
            return ImageMetadata::empty(filename);
        }
        Err(e) => {
            warn!(path = %image_path.display(), error = %e, "failed to read EXIF data");
            return ImageMetadata::empty(filename);
        }
    };

    let metadata = ImageMetadata {
        gps: gps_from_exif(&exif),
        capture_date: capture_date(&exif),
        device_make: ascii_field(&exif, Tag::Make),
        device_model: ascii_field(&exif, Tag::Model),
        original_filename: filename,
    };
    debug!(
        path = %image_path.display(),
        has_gps = metadata.gps.is_some(),
        has_date = metadata.capture_date.is_some(),
        "extracted metadata"
    );
    metadata
}

fn read_exif(path: &Path) -> Result<Exif, MetadataError> {
    let file = File::open(path).map_err(|source| MetadataError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    Ok(exif::Reader::new().read_from_container(&mut reader)?)
}

fn field<'a>(exif: &'a Exif, tag: Tag) -> Option<&'a Field> {
    exif.get_field(tag, In::PRIMARY)
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => {
            let raw = parts.first()?;
            let text = String::from_utf8_lossy(raw)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    field(exif, tag).and_then(|f| ascii_value(&f.value))
}

fn rationals(value: &Value) -> Option<&[Rational]> {
    match value {
        Value::Rational(v) => Some(v.as_slice()),
        _ => None,
    }
}

/// Converts an EXIF degrees/minutes/seconds triple to signed decimal degrees.
///
/// `reference` is the hemisphere tag; `S` and `W` negate the result.
pub fn dms_to_decimal(dms: &[Rational], reference: Option<&str>) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }
    let degrees = dms[0].to_f64();
    let minutes = dms[1].to_f64();
    let seconds = dms[2].to_f64();
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if !decimal.is_finite() {
        return None;
    }
    match reference.map(|r| r.trim().to_ascii_uppercase()) {
        Some(r) if r == "S" || r == "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

/// Altitude in meters; `below_sea_level` follows GPSAltitudeRef == 1.
pub fn altitude_to_meters(altitude: &Rational, below_sea_level: bool) -> Option<f64> {
    let meters = altitude.to_f64();
    if !meters.is_finite() {
        return None;
    }
    Some(if below_sea_level { -meters } else { meters })
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, limit: f64) -> Option<f64> {
    let dms = rationals(&field(exif, value_tag)?.value)?;
    let reference = ascii_field(exif, ref_tag);
    dms_to_decimal(dms, reference.as_deref()).filter(|v| v.abs() <= limit)
}

/// Builds GPS data only when both latitude and longitude are present and valid.
fn gps_from_exif(exif: &Exif) -> Option<GpsData> {
    let latitude = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 90.0)?;
    let longitude = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 180.0)?;

    let altitude = field(exif, Tag::GPSAltitude)
        .and_then(|f| rationals(&f.value))
        .and_then(|v| v.first())
        .and_then(|alt| {
            let below = field(exif, Tag::GPSAltitudeRef)
                .and_then(|f| f.value.get_uint(0))
                .is_some_and(|r| r == 1);
            altitude_to_meters(alt, below)
        });

    Some(GpsData {
        latitude,
        longitude,
        altitude,
        timestamp: gps_timestamp(exif),
    })
}

fn gps_timestamp(exif: &Exif) -> Option<PrimitiveDateTime> {
    let date_text = ascii_field(exif, Tag::GPSDateStamp)?;
    let date = Date::parse(&date_text, format_description!("[year]:[month]:[day]")).ok()?;
    let hms = rationals(&field(exif, Tag::GPSTimeStamp)?.value)?;
    if hms.len() < 3 {
        return None;
    }
    let part = |r: &Rational| {
        let v = r.to_f64();
        (v.is_finite() && v >= 0.0).then_some(v.floor() as u8)
    };
    let time = Time::from_hms(part(&hms[0])?, part(&hms[1])?, part(&hms[2])?).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

/// Parses an EXIF `YYYY:MM:DD HH:MM:SS` timestamp.
pub fn parse_exif_datetime(text: &str) -> Option<PrimitiveDateTime> {
    let format = format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(text.trim(), format).ok()
}

fn capture_date(exif: &Exif) -> Option<PrimitiveDateTime> {
    // First populated tag wins; an unparsable value is discarded, not retried.
    let text = DATE_TAGS.iter().find_map(|tag| ascii_field(exif, *tag))?;
    let parsed = parse_exif_datetime(&text);
    if parsed.is_none() {
        debug!(value = %text, "discarding unparsable capture date");
    }
    parsed
}
