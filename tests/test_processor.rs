mod common;

use std::sync::atomic::Ordering;
use std::sync::mpsc;

use common::*;
use roadscan::annotate::Annotator;
use roadscan::config::{NormalizeConfig, WatchConfig};
use roadscan::detection::{CenterGuess, DetectionEngine, LocalHeuristicDetector};
use roadscan::error::PipelineError;
use roadscan::estimation::Calibration;
use roadscan::metadata::normalize::Normalizer;
use roadscan::processor::{move_to_processed, MoveOutcome};
use roadscan::report::ReportClient;
use roadscan::watch::Watcher;
use roadscan::{ImageProcessor, ProcessOptions};

fn processor(paths: &PathsConfig, reporter: Option<ReportClient>) -> ImageProcessor {
    let engine = DetectionEngine::new(
        None,
        Box::new(LocalHeuristicDetector::new(&HeuristicConfig::default(), "pothole")),
    )
    .with_center_guess(Some(CenterGuess {
        confidence: 0.3,
        class_name: "pothole".to_string(),
    }));
    ImageProcessor::new(
        paths.clone(),
        Normalizer::new(&NormalizeConfig::default()),
        engine,
        Calibration::default(),
        Annotator::default(),
        reporter,
    )
}

const KEEP_IN_PLACE: ProcessOptions = ProcessOptions {
    create_report: false,
    move_after: false,
    annotate: true,
};

#[test]
fn test_batch_isolates_corrupt_image() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    for name in ["a.png", "b.jpg", "c.png", "d.bmp"] {
        write_image(&paths.incoming, name, &pothole_image());
    }
    write_corrupt_image(&paths.incoming, "e.jpg");
    std::fs::write(paths.incoming.join("notes.txt"), b"ignored")?;

    let batch = processor(&paths, None).process_directory(&paths.incoming, KEEP_IN_PLACE)?;
    assert_eq!(batch.total, 5);
    assert_eq!(batch.successful, 4);
    assert_eq!(batch.failed, 1);
    assert_eq!(batch.total_potholes, 4);

    let failed: Vec<_> = batch.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].image_path.ends_with("e.jpg"));
    assert!(failed[0].error.is_some());
    assert!(failed[0].detection.is_none());
    Ok(())
}

#[test]
fn test_batch_missing_directory_is_an_error() {
    let (paths, _dir) = temp_paths();
    let missing = paths.incoming.join("does-not-exist");
    let result = processor(&paths, None).process_directory(&missing, KEEP_IN_PLACE);
    assert!(matches!(result, Err(PipelineError::DirectoryNotFound(_))));
}

#[test]
fn test_batch_of_empty_directory() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let batch = processor(&paths, None).process_directory(&paths.incoming, KEEP_IN_PLACE)?;
    assert_eq!(batch.total, 0);
    assert_eq!(batch.successful + batch.failed, 0);
    Ok(())
}

#[test]
fn test_run_batch_writes_summary() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    write_image(&paths.incoming, "road.png", &pothole_image());

    let (batch, summary) = processor(&paths, None).run_batch(&paths.incoming, KEEP_IN_PLACE)?;
    let summary = summary.expect("summary written");
    let name = summary.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("batch_results_") && name.ends_with(".json"), "{}", name);
    assert_eq!(summary.parent(), Some(paths.output.as_path()));

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary)?)?;
    assert_eq!(json["total"], 1);
    assert_eq!(json["successful"], batch.successful);
    assert_eq!(json["results"][0]["detection"]["method"], "local-fallback");
    Ok(())
}

#[test]
fn test_process_annotates_and_estimates() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let source = write_image(&paths.incoming, "road.png", &pothole_image());

    let result = processor(&paths, None).process(&source, KEEP_IN_PLACE);
    assert!(result.success, "{:?}", result.error);
    let detection = result.detection.expect("detection result");
    assert_eq!(detection.num_potholes(), 1);
    assert!(detection.detections[0].estimate().is_some());

    let annotated = detection.annotated_image_path.expect("annotated image");
    assert_eq!(annotated, paths.annotated_dir().join("road_png_annotated.jpg"));
    assert!(annotated.exists());
    assert!(source.exists());
    Ok(())
}

#[test]
fn test_process_converts_non_standard_formats() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let source = write_image(&paths.incoming, "road.bmp", &pothole_image());

    let result = processor(&paths, None).process(&source, KEEP_IN_PLACE);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.num_potholes(), 1);
    // The result refers to the original file; the intermediate JPEG is gone
    assert_eq!(result.image_path, source);
    assert!(!paths.converted_dir().join("road.bmp.jpg").exists());
    Ok(())
}

#[test]
fn test_batch_keeps_same_stem_outputs_apart() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    write_image(&paths.incoming, "a.bmp", &pothole_image());
    write_image(&paths.incoming, "a.png", &dark_blob_image(200, 200, (20, 20, 90, 70)));

    let batch = processor(&paths, None).process_directory(&paths.incoming, KEEP_IN_PLACE)?;
    assert_eq!(batch.successful, 2);
    let mut annotated: Vec<_> = batch
        .results
        .iter()
        .filter_map(|r| r.detection.as_ref()?.annotated_image_path.clone())
        .collect();
    annotated.sort();
    assert_eq!(
        annotated,
        vec![
            paths.annotated_dir().join("a_bmp_annotated.jpg"),
            paths.annotated_dir().join("a_png_annotated.jpg"),
        ]
    );
    assert!(annotated.iter().all(|p| p.exists()));
    let leftovers = std::fs::read_dir(paths.converted_dir()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    Ok(())
}

#[test]
fn test_process_rejects_unsupported_extension() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let path = paths.incoming.join("notes.txt");
    std::fs::write(&path, b"hello")?;

    let result = processor(&paths, None).process(&path, ProcessOptions::default());
    assert!(!result.success);
    assert!(result.error.is_some());
    assert!(path.exists());
    Ok(())
}

#[test]
fn test_process_without_gps_makes_no_report_calls() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let source = write_image(&paths.incoming, "road.png", &pothole_image());
    let calls = ApiCalls::default();
    let reporter = ReportClient::new(Box::new(MockReportingApi::new(calls.clone())), &ReportConfig::default());

    let options = ProcessOptions {
        create_report: true,
        ..KEEP_IN_PLACE
    };
    let result = processor(&paths, Some(reporter)).process(&source, options);

    assert!(result.success);
    assert_eq!(result.num_potholes(), 1);
    let report = result.report.expect("report outcome recorded");
    assert!(!report.success);
    assert!(!result.metadata.has_gps());
    assert_eq!(calls.total(), 0);
    Ok(())
}

#[test]
fn test_process_moves_source_once() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let options = ProcessOptions {
        create_report: false,
        move_after: true,
        annotate: false,
    };
    let proc = processor(&paths, None);

    let first = write_image(&paths.incoming, "road.png", &pothole_image());
    assert!(proc.process(&first, options).success);
    let moved = paths.processed.join("road.png");
    assert!(moved.exists());
    assert!(!first.exists());
    let moved_bytes = std::fs::read(&moved)?;

    // Same name again: the processed copy is kept and the new file stays put
    let second = write_image(&paths.incoming, "road.png", &bright_image(64, 64));
    assert!(proc.process(&second, options).success);
    assert!(second.exists());
    assert_eq!(std::fs::read(&moved)?, moved_bytes);
    Ok(())
}

#[test]
fn test_move_to_processed_outcomes() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let processed = dir.path().join("processed");
    let source = dir.path().join("road.jpg");
    std::fs::write(&source, b"one")?;

    assert_eq!(move_to_processed(&source, &processed)?, MoveOutcome::Moved(processed.join("road.jpg")));
    std::fs::write(&source, b"two")?;
    assert_eq!(
        move_to_processed(&source, &processed)?,
        MoveOutcome::SkippedExisting(processed.join("road.jpg"))
    );
    assert_eq!(std::fs::read(processed.join("road.jpg"))?, b"one");
    Ok(())
}

#[test]
fn test_analyze_describes_without_side_effects() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let source = write_image(&paths.incoming, "road.png", &pothole_image());

    let summary = processor(&paths, None).analyze(&source)?;
    assert_eq!(summary.num_potholes, 1);
    assert!(summary.severity.is_some());
    assert_eq!(summary.method, DetectionMethod::LocalFallback);
    assert!(!summary.has_gps);
    assert!(summary.description_en.starts_with("Detected 1 pothole(s)"));
    assert!(!summary.description_ar.is_empty());
    assert!(summary.note_en.as_deref().unwrap_or_default().contains("GPS"));
    assert!(summary.note_ar.is_some());

    assert!(source.exists());
    assert!(!paths.annotated_dir().exists());
    Ok(())
}

#[test]
fn test_analyze_unreadable_image_is_an_error() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let source = write_corrupt_image(&paths.incoming, "broken.png");
    assert!(processor(&paths, None).analyze(&source).is_err());
    Ok(())
}

#[test]
fn test_watch_once_processes_pending_images() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    write_image(&paths.incoming, "road.png", &pothole_image());
    write_image(&paths.incoming, "lane.jpg", &bright_image(80, 80));
    let proc = processor(&paths, None);
    let options = ProcessOptions {
        create_report: false,
        move_after: true,
        annotate: true,
    };

    let (_stop, rx) = mpsc::channel::<()>();
    let stats = Watcher::new(&proc, &WatchConfig::default(), options).run(&rx, true);
    assert_eq!(stats.polls, 1);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.images, 2);
    assert!(paths.processed.join("road.png").exists());
    assert!(paths.processed.join("lane.jpg").exists());

    // Nothing left: the next poll runs no batch
    let stats = Watcher::new(&proc, &WatchConfig::default(), options).run(&rx, true);
    assert_eq!(stats.batches, 0);
    Ok(())
}

#[test]
fn test_watch_reports_duplicate_left_in_incoming_once() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    std::fs::create_dir_all(&paths.processed)?;
    std::fs::write(paths.processed.join("road.jpg"), b"already processed")?;
    write_jpeg_with_exif(&paths.incoming, "road.jpg", &pothole_image(), &riyadh_exif());

    let calls = ApiCalls::default();
    let reporter = ReportClient::new(Box::new(MockReportingApi::new(calls.clone())), &ReportConfig::default());
    let proc = processor(&paths, Some(reporter));

    let (_stop, rx) = mpsc::channel::<()>();
    let mut watcher = Watcher::new(&proc, &WatchConfig::default(), ProcessOptions::default());
    let first = watcher.run(&rx, true);
    let second = watcher.run(&rx, true);

    assert_eq!((first.batches, first.images), (1, 1));
    assert_eq!(second.batches, 0);
    assert_eq!(calls.creates.load(Ordering::SeqCst), 1);
    assert!(paths.incoming.join("road.jpg").exists());
    assert_eq!(std::fs::read(paths.processed.join("road.jpg"))?, b"already processed");
    let summaries = std::fs::read_dir(&paths.output)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("batch_results_"))
        .count();
    assert_eq!(summaries, 1);
    Ok(())
}

#[test]
fn test_watch_retries_failed_file_only_after_it_changes() -> anyhow::Result<()> {
    let (paths, _dir) = temp_paths();
    let broken = write_corrupt_image(&paths.incoming, "road.jpg");
    let proc = processor(&paths, None);
    let options = ProcessOptions {
        create_report: false,
        ..ProcessOptions::default()
    };

    let (_stop, rx) = mpsc::channel::<()>();
    let mut watcher = Watcher::new(&proc, &WatchConfig::default(), options);
    assert_eq!(watcher.run(&rx, true).batches, 1);
    assert_eq!(watcher.run(&rx, true).batches, 0);
    assert!(broken.exists());

    // A fixed upload under the same name is a new version
    write_image(&paths.incoming, "road.jpg", &pothole_image());
    let stats = watcher.run(&rx, true);
    assert_eq!((stats.batches, stats.images), (1, 1));
    assert!(paths.processed.join("road.jpg").exists());
    assert!(!broken.exists());
    Ok(())
}

#[test]
fn test_watch_missing_directory_counts_failure() -> anyhow::Result<()> {
    let (mut paths, _dir) = temp_paths();
    paths.incoming = paths.incoming.join("missing");
    let proc = processor(&paths, None);

    let (_stop, rx) = mpsc::channel::<()>();
    let stats = Watcher::new(&proc, &WatchConfig::default(), KEEP_IN_PLACE).run(&rx, true);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.batches, 0);
    Ok(())
}

#[test]
fn test_watch_stops_on_signal() {
    let (paths, _dir) = temp_paths();
    let proc = processor(&paths, None);

    let (stop, rx) = mpsc::channel::<()>();
    stop.send(()).unwrap();
    let stats = Watcher::new(&proc, &WatchConfig::default(), KEEP_IN_PLACE).run(&rx, false);
    assert_eq!(stats.polls, 1);
}
