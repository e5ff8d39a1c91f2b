//! Image sync: turns an image-size map into download jobs and runs them on a
//! bounded pool that the archive joins before finishing.

use crate::download::Downloader;
use crate::error::ArchiveError;
use crate::model::{ImageSizeMap, THUMBNAIL_SIZE};
use crate::snapshot::is_safe_component;
use log::{debug, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

/// Undeclared sizes guessed from the thumbnail URL.
pub const PROBE_SIZES: &[&str] = &["400x300"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub size: String,
    pub url: String,
    pub dest: PathBuf,
    /// Speculative; a miss is expected and not a failure.
    pub probe: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageCounts {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub probes_missed: usize,
}

#[derive(Debug, Default)]
struct ImageStats {
    downloaded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    probes_missed: AtomicUsize,
}

impl ImageStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ImageCounts {
        ImageCounts {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            probes_missed: self.probes_missed.load(Ordering::Relaxed),
        }
    }
}

/// File name an image URL is stored under: its last path segment.
pub fn image_filename(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    is_safe_component(name).then(|| name.to_string())
}

fn job(image_dir: &Path, size: &str, url: &str, probe: bool) -> Option<ImageJob> {
    if !is_safe_component(size) {
        warn!("Skipping image with unusable size label {:?}", size);
        return None;
    }
    let Some(filename) = image_filename(url) else {
        warn!("Skipping image {} ({}): no file name in URL", url, size);
        return None;
    };
    Some(ImageJob {
        size: size.to_string(),
        url: url.to_string(),
        dest: image_dir.join(size).join(filename),
        probe,
    })
}

/// Jobs for every declared size, then probes for well-known sizes missing
/// from the map when a `60x60` thumbnail is present.
pub fn plan_images(image_dir: &Path, images: &ImageSizeMap) -> Vec<ImageJob> {
    let mut jobs: Vec<ImageJob> = images
        .iter()
        .filter_map(|(size, image)| job(image_dir, size, &image.url, false))
        .collect();

    if let Some(thumb) = images.get(THUMBNAIL_SIZE) {
        debug!("Checking additional sizes...");
        for size in PROBE_SIZES.iter().filter(|s| !images.contains_key(**s)) {
            if !thumb.url.contains(THUMBNAIL_SIZE) {
                continue;
            }
            let url = thumb.url.replacen(THUMBNAIL_SIZE, size, 1);
            debug!("Trying additional size {}", size);
            jobs.extend(job(image_dir, size, &url, true));
        }
    }
    jobs
}

/// Bounded, joinable download pool. `dispatch` waits for a free slot, so a
/// producer can never have more than `concurrency` downloads in flight.
pub struct DownloadPool {
    downloader: Arc<dyn Downloader>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    stats: Arc<ImageStats>,
}

impl DownloadPool {
    pub fn new(downloader: Arc<dyn Downloader>, concurrency: usize) -> Self {
        Self {
            downloader,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            stats: Arc::new(ImageStats::default()),
        }
    }

    /// Queue one job. Files already on disk are counted as skipped without
    /// touching the network.
    pub async fn dispatch(&mut self, job: ImageJob) -> Result<(), ArchiveError> {
        if tokio::fs::try_exists(&job.dest).await.unwrap_or(false) {
            debug!("Skipping {}, already downloaded.", job.url);
            ImageStats::bump(&self.stats.skipped);
            return Ok(());
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ArchiveError::PoolClosed)?;
        self.reap();
        let downloader = self.downloader.clone();
        let stats = self.stats.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            run_job(downloader.as_ref(), &job, &stats).await;
        });
        Ok(())
    }

    /// Dispatch every job planned for `images` under `<dir>/images`.
    pub async fn sync_images(&mut self, dir: &Path, images: &ImageSizeMap) -> Result<(), ArchiveError> {
        for job in plan_images(&dir.join("images"), images) {
            self.dispatch(job).await?;
        }
        Ok(())
    }

    // Drop finished tasks so the set only holds live downloads.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record_join(joined);
        }
    }

    fn record_join(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            warn!("Image download task aborted: {}", e);
            ImageStats::bump(&self.stats.failed);
        }
    }

    /// Start counting from zero. Only meaningful once [`DownloadPool::join`] returned.
    pub fn reset_counts(&mut self) {
        self.stats = Arc::new(ImageStats::default());
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every dispatched download and return the running totals.
    pub async fn join(&mut self) -> ImageCounts {
        while let Some(joined) = self.tasks.join_next().await {
            self.record_join(joined);
        }
        self.counts()
    }

    pub fn counts(&self) -> ImageCounts {
        self.stats.snapshot()
    }
}

async fn run_job(downloader: &dyn Downloader, job: &ImageJob, stats: &ImageStats) {
    if let Some(parent) = job.dest.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("Cannot create {}: {}", parent.display(), e);
            ImageStats::bump(&stats.failed);
            return;
        }
    }
    debug!("Downloading {} -> {}", job.url, job.dest.display());
    match downloader.download(&job.url, &job.dest).await {
        Ok(()) => ImageStats::bump(&stats.downloaded),
        Err(e) if job.probe => {
            debug!("Additional size {} not available: {}", job.size, e);
            ImageStats::bump(&stats.probes_missed);
        }
        Err(e) => {
            warn!("Image download failed: {}", e);
            ImageStats::bump(&stats.failed);
        }
    }
}
