//! Drop-folder worker: polls the incoming directory and runs a batch
//! whenever eligible images are waiting.
//!
//! Files that stay in the incoming directory after a batch (failed images,
//! duplicates of something already in `processed/`, or everything when moves
//! are disabled) are remembered by size and modification time and are not
//! picked up again until they change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::error::PipelineError;
use crate::processor::{discover_images, ImageProcessor, ProcessOptions};
use crate::retry::Backoff;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    pub polls: u32,
    pub batches: u32,
    pub images: usize,
    pub failures: u32,
}

/// Identity of a file version as seen by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

pub struct Watcher<'a> {
    processor: &'a ImageProcessor,
    incoming: PathBuf,
    options: ProcessOptions,
    poll_interval: Duration,
    backoff: Backoff,
    handled: HashMap<PathBuf, FileStamp>,
}

impl<'a> Watcher<'a> {
    pub fn new(processor: &'a ImageProcessor, config: &WatchConfig, options: ProcessOptions) -> Self {
        Self {
            incoming: processor.paths().incoming.clone(),
            processor,
            options,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            backoff: Backoff::new(
                Duration::from_secs(config.backoff_initial_secs),
                Duration::from_secs(config.backoff_max_secs),
            ),
            handled: HashMap::new(),
        }
    }

    /// Polls until `stop` fires (or its sender is dropped). With `once`, returns after one poll.
    pub fn run(&mut self, stop: &Receiver<()>, once: bool) -> WatchStats {
        let mut stats = WatchStats::default();
        if !self.options.move_after {
            info!("watching without moving processed files; each file is handled once per version");
        }
        info!(dir = %self.incoming.display(), interval_secs = self.poll_interval.as_secs(), "watching for images");

        loop {
            let wait = self.poll(&mut stats);
            if once {
                break;
            }
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    info!("stop requested, leaving watch loop");
                    break;
                }
            }
        }
        stats
    }

    /// Files in the incoming directory not yet handled in their current version.
    fn pending(&mut self) -> Result<Vec<(PathBuf, Option<FileStamp>)>, PipelineError> {
        let files = discover_images(&self.incoming)?;
        self.handled.retain(|path, _| files.contains(path));
        Ok(files
            .into_iter()
            .map(|path| {
                let stamp = FileStamp::of(&path);
                (path, stamp)
            })
            .filter(|(path, stamp)| match (stamp, self.handled.get(path)) {
                (Some(stamp), Some(seen)) => stamp != seen,
                _ => true,
            })
            .collect())
    }

    /// One poll; returns how long to wait before the next.
    fn poll(&mut self, stats: &mut WatchStats) -> Duration {
        stats.polls += 1;
        let pending = match self.pending() {
            Ok(pending) => pending,
            Err(e) => {
                stats.failures += 1;
                let delay = self.backoff.next_delay();
                warn!(error = %e, retry_in_secs = delay.as_secs(), "cannot list incoming directory");
                return delay;
            }
        };
        self.backoff.reset();
        if pending.is_empty() {
            debug!(remembered = self.handled.len(), "no new images");
            return self.poll_interval;
        }

        let files: Vec<PathBuf> = pending.iter().map(|(path, _)| path.clone()).collect();
        let (batch, _) = self.processor.run_files(&self.incoming, &files, self.options);
        stats.batches += 1;
        stats.images += batch.total;

        for (path, stamp) in pending {
            match stamp {
                Some(stamp) if path.exists() => {
                    debug!(path = %path.display(), "image left in incoming directory, will skip until it changes");
                    self.handled.insert(path, stamp);
                }
                _ => {
                    self.handled.remove(&path);
                }
            }
        }
        self.poll_interval
    }
}
