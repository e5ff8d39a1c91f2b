use futures::future::BoxFuture;
use httpmock::{Method::GET, MockServer};
use pincushion::download::{Downloader, HttpDownloader};
use pincushion::error::DownloadError;
use pincushion::images::{DownloadPool, ImageCounts, ImageJob};
use pincushion::model::{Image, ImageSizeMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn image(url: String) -> Image {
    Image {
        url,
        width: None,
        height: None,
    }
}

fn pool(concurrency: usize) -> DownloadPool {
    DownloadPool::new(Arc::new(HttpDownloader::new(reqwest::Client::new())), concurrency)
}

#[tokio::test]
async fn rerun_against_populated_directory_downloads_nothing() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let small = server
        .mock_async(|when, then| {
            when.method(GET).path("/236x/ab/cat.jpg");
            then.status(200).body("small");
        })
        .await;
    let large = server
        .mock_async(|when, then| {
            when.method(GET).path("/originals/ab/cat.jpg");
            then.status(200).body("large");
        })
        .await;
    let mut images = ImageSizeMap::new();
    images.insert("236x".into(), image(server.url("/236x/ab/cat.jpg")));
    images.insert("original".into(), image(server.url("/originals/ab/cat.jpg")));
    let dir = tempfile::tempdir()?;

    let mut first = pool(4);
    first.sync_images(dir.path(), &images).await?;
    let counts = first.join().await;
    assert_eq!(counts.downloaded, 2);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("images/original/cat.jpg"))?,
        "large"
    );

    let mut second = pool(4);
    second.sync_images(dir.path(), &images).await?;
    let counts = second.join().await;
    assert_eq!(
        counts,
        ImageCounts {
            downloaded: 0,
            skipped: 2,
            failed: 0,
            probes_missed: 0
        }
    );
    assert_eq!(small.hits_async().await, 1);
    assert_eq!(large.hits_async().await, 1);
    Ok(())
}

#[tokio::test]
async fn thumbnail_triggers_one_probe_and_a_miss_is_harmless() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let thumb = server
        .mock_async(|when, then| {
            when.method(GET).path("/60x60/ab/cat.jpg");
            then.status(200).body("thumb");
        })
        .await;
    let probe = server
        .mock_async(|when, then| {
            when.method(GET).path("/400x300/ab/cat.jpg");
            then.status(404);
        })
        .await;
    let mut images = ImageSizeMap::new();
    images.insert("60x60".into(), image(server.url("/60x60/ab/cat.jpg")));
    let dir = tempfile::tempdir()?;

    let mut p = pool(2);
    p.sync_images(dir.path(), &images).await?;
    let counts = p.join().await;
    assert_eq!(counts.downloaded, 1);
    assert_eq!(counts.probes_missed, 1);
    assert_eq!(counts.failed, 0);
    assert_eq!(thumb.hits_async().await, 1);
    assert_eq!(probe.hits_async().await, 1);
    assert!(dir.path().join("images/60x60/cat.jpg").exists());
    assert!(!dir.path().join("images/400x300/cat.jpg").exists());
    Ok(())
}

#[tokio::test]
async fn failed_download_leaves_no_file_and_is_counted() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/originals/dog.jpg");
            then.status(500);
        })
        .await;
    let mut images = ImageSizeMap::new();
    images.insert("original".into(), image(server.url("/originals/dog.jpg")));
    let dir = tempfile::tempdir()?;

    let mut p = pool(1);
    p.sync_images(dir.path(), &images).await?;
    let counts = p.join().await;
    assert_eq!(counts.failed, 1);
    let size_dir = dir.path().join("images/original");
    assert_eq!(std::fs::read_dir(&size_dir)?.count(), 0);
    Ok(())
}

/// Sleeps instead of fetching and records the peak number of overlapping calls.
#[derive(Default)]
struct SlowDownloader {
    active: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
}

impl Downloader for SlowDownloader {
    fn download<'a>(&'a self, _url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), DownloadError>> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"x").await.map_err(|source| DownloadError::Io {
                path: dest.to_path_buf(),
                source,
            })
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_bounds_concurrency_and_join_waits_for_all() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let slow = Arc::new(SlowDownloader::default());
    let mut p = DownloadPool::new(slow.clone(), 3);
    for i in 0..20 {
        p.dispatch(ImageJob {
            size: "original".into(),
            url: format!("https://i.example/{}.jpg", i),
            dest: dir.path().join(format!("original/{}.jpg", i)),
            probe: false,
        })
        .await?;
        assert!(slow.active.load(Ordering::SeqCst) <= 3);
    }
    let counts = p.join().await;
    assert_eq!(counts.downloaded, 20);
    assert_eq!(slow.done.load(Ordering::SeqCst), 20);
    assert_eq!(p.in_flight(), 0);
    assert!(slow.peak.load(Ordering::SeqCst) <= 3);
    Ok(())
}

/// Finishes immediately without touching disk.
#[derive(Default)]
struct InstantDownloader {
    calls: AtomicUsize,
}

impl Downloader for InstantDownloader {
    fn download<'a>(&'a self, _url: &'a str, _dest: &'a Path) -> BoxFuture<'a, Result<(), DownloadError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn finished_tasks_are_released_while_dispatching() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let instant = Arc::new(InstantDownloader::default());
    let mut p = DownloadPool::new(instant.clone(), 2);
    for i in 0..200 {
        p.dispatch(ImageJob {
            size: "original".into(),
            url: format!("https://i.example/{}.jpg", i),
            dest: dir.path().join(format!("original/{}.jpg", i)),
            probe: false,
        })
        .await?;
        assert!(p.in_flight() <= 3, "{} tasks held after job {}", p.in_flight(), i);
    }
    let counts = p.join().await;
    assert_eq!(counts.downloaded, 200);
    assert_eq!(counts.failed, 0);
    assert_eq!(instant.calls.load(Ordering::SeqCst), 200);
    assert_eq!(p.in_flight(), 0);
    Ok(())
}
