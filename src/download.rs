//! Single-file byte downloader used by image sync.

use crate::error::DownloadError;
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Fetch one URL into one destination file.
///
/// Implementations must not leave a file at `dest` unless the whole body
/// was written; image sync treats an existing file as complete.
pub trait Downloader: Send + Sync {
    fn download<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), DownloadError>>;
}

/// Streams the response body to a temporary sibling and renames it into place.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    http: Client,
}

impl HttpDownloader {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = res.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let tmp = temp_path(dest);
        let result = stream_to(res, url, &tmp).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return result;
        }
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|source| DownloadError::Io {
                path: dest.to_path_buf(),
                source,
            })
    }
}

async fn stream_to(res: reqwest::Response, url: &str, path: &Path) -> Result<(), DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut body = res.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Request {
            url: url.to_string(),
            source,
        })?;
        file.write_all(&chunk).await.map_err(io_err)?;
    }
    file.flush().await.map_err(io_err)
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4()))
}

impl Downloader for HttpDownloader {
    fn download<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), DownloadError>> {
        Box::pin(self.fetch(url, dest))
    }
}
