use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use roadscan::config::PathsConfig;
use roadscan::detection::Detector;
use roadscan::error::{DetectionError, ReportError};
use roadscan::models::{BoundingBox, Detection, DetectionMethod, DetectionResult, GpsData, ImageMetadata};
use roadscan::report::{AccessToken, ReportPayload, ReportingApi, UploadedPhoto};
use tempfile::TempDir;

/// Uniform light-gray road surface with nothing dark on it.
pub fn bright_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |_, _| Rgb([200u8, 200u8, 200u8]))
}

/// Light surface with one dark rectangle covering `[x1, x2) x [y1, y2)`.
pub fn dark_blob_image(width: u32, height: u32, blob: (u32, u32, u32, u32)) -> RgbImage {
    let (x1, y1, x2, y2) = blob;
    ImageBuffer::from_fn(width, height, |x, y| {
        if x >= x1 && x < x2 && y >= y1 && y < y2 {
            Rgb([20u8, 20u8, 20u8])
        } else {
            Rgb([200u8, 200u8, 200u8])
        }
    })
}

/// The 200x200 image used across detection tests: one 60x40 pothole-like blob.
pub fn pothole_image() -> RgbImage {
    dark_blob_image(200, 200, (60, 80, 120, 120))
}

/// Saves `img` under `dir/name`, format chosen from the extension.
pub fn write_image(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    DynamicImage::ImageRgb8(img.clone())
        .save(&path)
        .expect("Failed to save test image");
    path
}

/// A file with an image extension but garbage contents.
pub fn write_corrupt_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"definitely not a jpeg").expect("Failed to write corrupt image");
    path
}

/// Incoming/processed/output directories inside a fresh temp dir.
/// Returns both the paths and the temp directory (which must be kept alive).
pub fn temp_paths() -> (PathsConfig, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let paths = PathsConfig {
        incoming: dir.path().join("incoming"),
        processed: dir.path().join("processed"),
        output: dir.path().join("output"),
    };
    std::fs::create_dir_all(&paths.incoming).expect("Failed to create incoming directory");
    (paths, dir)
}

pub fn riyadh_gps() -> GpsData {
    GpsData {
        latitude: 24.714444,
        longitude: 46.675278,
        altitude: Some(612.0),
        timestamp: None,
    }
}

pub fn metadata_with_gps(name: &str) -> ImageMetadata {
    ImageMetadata {
        gps: Some(riyadh_gps()),
        ..ImageMetadata::empty(name)
    }
}

pub fn detection_at(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection::new(
        BoundingBox::new(x1, y1, x2, y2).expect("valid test box"),
        0.9,
        "pothole",
    )
}

pub fn detection_result(detections: Vec<Detection>) -> DetectionResult {
    DetectionResult {
        image_path: PathBuf::from("road.jpg"),
        image_width: 4000,
        image_height: 3000,
        detections,
        processing_time: Duration::from_millis(5),
        annotated_image_path: None,
        method: DetectionMethod::Remote,
    }
}

/// Detector that returns a fixed answer and counts its calls.
pub struct StubDetector {
    pub outcome: Result<Vec<Detection>, String>,
    pub calls: Arc<AtomicUsize>,
}

impl StubDetector {
    pub fn found(detections: Vec<Detection>) -> Self {
        Self {
            outcome: Ok(detections),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _image: &DynamicImage, _source: &Path) -> Result<Vec<Detection>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .clone()
            .map_err(DetectionError::Connection)
    }
}

/// Call counters shared between a `MockReportingApi` and the test body.
#[derive(Clone, Default)]
pub struct ApiCalls {
    pub auth: Arc<AtomicUsize>,
    pub uploads: Arc<AtomicUsize>,
    pub creates: Arc<AtomicUsize>,
}

impl ApiCalls {
    pub fn total(&self) -> usize {
        self.auth.load(Ordering::SeqCst)
            + self.uploads.load(Ordering::SeqCst)
            + self.creates.load(Ordering::SeqCst)
    }
}

/// In-memory reporting service.
pub struct MockReportingApi {
    pub calls: ApiCalls,
    pub create_status: Option<u16>,
    pub expires_in: Option<Duration>,
    pub last_payload: Arc<std::sync::Mutex<Option<ReportPayload>>>,
}

impl MockReportingApi {
    pub fn new(calls: ApiCalls) -> Self {
        Self {
            calls,
            create_status: None,
            expires_in: Some(Duration::from_secs(3600)),
            last_payload: Arc::new(std::sync::Mutex::new(None)),
        }
    }
}

impl ReportingApi for MockReportingApi {
    fn authenticate(&self) -> Result<AccessToken, ReportError> {
        let n = self.calls.auth.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken {
            token: format!("token-{}", n + 1),
            expires_in: self.expires_in,
        })
    }

    fn upload_photo(&self, _token: &str, path: &Path) -> Result<UploadedPhoto, ReportError> {
        self.calls.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadedPhoto {
            url: format!(
                "https://files.example/{}",
                path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
            ),
            filename: None,
        })
    }

    fn create_report(&self, _token: &str, payload: &ReportPayload) -> Result<Option<String>, ReportError> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.create_status {
            return Err(ReportError::Status {
                status,
                body: "rejected".to_string(),
            });
        }
        *self.last_payload.lock().expect("payload lock") = Some(payload.clone());
        Ok(Some("R-1001".to_string()))
    }
}

/// One EXIF field value as written into a TIFF IFD.
#[derive(Clone)]
pub enum ExifValue {
    Ascii(String),
    Byte(u8),
    Rationals(Vec<(u32, u32)>),
    Long(u32),
}

impl ExifValue {
    fn type_and_count(&self) -> (u16, u32) {
        match self {
            ExifValue::Ascii(s) => (2, s.len() as u32 + 1),
            ExifValue::Byte(_) => (1, 1),
            ExifValue::Rationals(v) => (5, v.len() as u32),
            ExifValue::Long(_) => (4, 1),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            ExifValue::Ascii(s) => {
                let mut b = s.as_bytes().to_vec();
                b.push(0);
                b
            }
            ExifValue::Byte(v) => vec![*v],
            ExifValue::Rationals(v) => v
                .iter()
                .flat_map(|(n, d)| n.to_le_bytes().into_iter().chain(d.to_le_bytes()))
                .collect(),
            ExifValue::Long(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Bytes stored outside the entry, padded to an even length.
    fn overflow_len(&self) -> usize {
        let len = self.bytes().len();
        if len <= 4 { 0 } else { len + len % 2 }
    }
}

type IfdEntries = Vec<(u16, ExifValue)>;

fn ifd_len(entries: &IfdEntries) -> usize {
    2 + 12 * entries.len() + 4 + entries.iter().map(|(_, v)| v.overflow_len()).sum::<usize>()
}

fn write_ifd(out: &mut Vec<u8>, entries: &IfdEntries, start: usize) {
    let mut entries = entries.clone();
    entries.sort_by_key(|(tag, _)| *tag);
    let mut data_offset = start + 2 + 12 * entries.len() + 4;
    let mut data = Vec::new();

    out.extend((entries.len() as u16).to_le_bytes());
    for (tag, value) in &entries {
        let (kind, count) = value.type_and_count();
        out.extend(tag.to_le_bytes());
        out.extend(kind.to_le_bytes());
        out.extend(count.to_le_bytes());
        let mut bytes = value.bytes();
        if bytes.len() <= 4 {
            bytes.resize(4, 0);
            out.extend(bytes);
        } else {
            out.extend((data_offset as u32).to_le_bytes());
            if bytes.len() % 2 == 1 {
                bytes.push(0);
            }
            data_offset += bytes.len();
            data.extend(bytes);
        }
    }
    out.extend(0u32.to_le_bytes());
    out.extend(data);
}

/// Little-endian TIFF/EXIF block with primary, Exif and GPS IFDs.
#[derive(Clone, Default)]
pub struct ExifBlock {
    primary: IfdEntries,
    exif: IfdEntries,
    gps: IfdEntries,
}

impl ExifBlock {
    pub fn primary(mut self, tag: exif::Tag, value: ExifValue) -> Self {
        self.primary.push((tag.number(), value));
        self
    }

    pub fn exif(mut self, tag: exif::Tag, value: ExifValue) -> Self {
        self.exif.push((tag.number(), value));
        self
    }

    pub fn gps(mut self, tag: exif::Tag, value: ExifValue) -> Self {
        self.gps.push((tag.number(), value));
        self
    }

    /// Latitude and longitude with their hemisphere references.
    pub fn position(self, lat_ref: &str, lat: [u32; 3], lon_ref: &str, lon: [u32; 3]) -> Self {
        let dms = |v: [u32; 3]| ExifValue::Rationals(v.iter().map(|n| (*n, 1)).collect());
        self.gps(exif::Tag::GPSLatitudeRef, ExifValue::Ascii(lat_ref.to_string()))
            .gps(exif::Tag::GPSLatitude, dms(lat))
            .gps(exif::Tag::GPSLongitudeRef, ExifValue::Ascii(lon_ref.to_string()))
            .gps(exif::Tag::GPSLongitude, dms(lon))
    }

    pub fn tiff(&self) -> Vec<u8> {
        let mut primary = self.primary.clone();
        // Placeholder pointers so the primary IFD length is final.
        if !self.exif.is_empty() {
            primary.push((exif::Tag::ExifIFDPointer.number(), ExifValue::Long(0)));
        }
        if !self.gps.is_empty() {
            primary.push((exif::Tag::GPSInfoIFDPointer.number(), ExifValue::Long(0)));
        }
        let exif_start = 8 + ifd_len(&primary);
        let gps_start = exif_start + if self.exif.is_empty() { 0 } else { ifd_len(&self.exif) };
        for (tag, value) in primary.iter_mut() {
            if *tag == exif::Tag::ExifIFDPointer.number() {
                *value = ExifValue::Long(exif_start as u32);
            } else if *tag == exif::Tag::GPSInfoIFDPointer.number() {
                *value = ExifValue::Long(gps_start as u32);
            }
        }

        let mut out = b"II*\0".to_vec();
        out.extend(8u32.to_le_bytes());
        write_ifd(&mut out, &primary, 8);
        if !self.exif.is_empty() {
            write_ifd(&mut out, &self.exif, exif_start);
        }
        if !self.gps.is_empty() {
            write_ifd(&mut out, &self.gps, gps_start);
        }
        out
    }
}

/// GPS fix for 24°42'52"N 46°40'31"E, 612 m.
pub fn riyadh_exif() -> ExifBlock {
    ExifBlock::default()
        .position("N", [24, 42, 52], "E", [46, 40, 31])
        .gps(exif::Tag::GPSAltitudeRef, ExifValue::Byte(0))
        .gps(exif::Tag::GPSAltitude, ExifValue::Rationals(vec![(612, 1)]))
}

/// Saves `img` as a JPEG with `exif` spliced in as an APP1 segment after SOI.
pub fn write_jpeg_with_exif(dir: &Path, name: &str, img: &RgbImage, exif: &ExifBlock) -> PathBuf {
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
        .encode_image(img)
        .expect("Failed to encode test JPEG");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let tiff = exif.tiff();
    let mut app1 = vec![0xFF, 0xE1];
    app1.extend(((2 + 6 + tiff.len()) as u16).to_be_bytes());
    app1.extend(b"Exif\0\0");
    app1.extend(tiff);

    let mut bytes = jpeg[..2].to_vec();
    bytes.extend(app1);
    bytes.extend(&jpeg[2..]);
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("Failed to write EXIF test image");
    path
}

/// HTTP server on 127.0.0.1 answering each connection with the next canned
/// `(status, body)`. The join handle yields the request lines it saw.
pub fn serve_json(responses: Vec<(u16, String)>) -> (String, std::thread::JoinHandle<Vec<String>>) {
    use std::io::{BufRead, BufReader, Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let url = format!("http://{}/detect", listener.local_addr().expect("local addr"));
    let handle = std::thread::spawn(move || {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).expect("header");
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("request body");
            requests.push(request_line.trim_end().to_string());

            let reason = if status < 400 { "OK" } else { "Error" };
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            )
            .expect("write response");
            stream.flush().expect("flush response");
        }
        requests
    });
    (url, handle)
}
