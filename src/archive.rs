use crate::client::{BoardRef, Client};
use crate::config::Config;
use crate::download::{Downloader, HttpDownloader};
use crate::error::ArchiveError;
use crate::http::{build_client, FetchGate};
use crate::images::{DownloadPool, ImageCounts};
use crate::model::{Board, Pin};
use crate::snapshot::{is_safe_component, write_json};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// What one run wrote. Absent entities are simply not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub user: bool,
    pub boards: usize,
    pub pins: usize,
    pub images: ImageCounts,
}

/// Directory name for a board: the last non-empty segment of its normalized URL path.
///
/// `https://example.com/someuser/my-board/` gives `my-board`.
pub fn board_slug(board_url: &str) -> Option<String> {
    let parsed = Url::parse(board_url).ok()?;
    let slug = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    is_safe_component(slug).then(|| slug.to_string())
}

fn board_dir_name(board: &Board) -> Option<String> {
    if let Some(slug) = board.url.as_deref().and_then(board_slug) {
        return Some(slug);
    }
    let id = board.id.as_deref().filter(|id| is_safe_component(id))?;
    warn!(
        "Board {} has no usable URL ({:?}); archiving under its id",
        id, board.url
    );
    Some(id.to_string())
}

/// Walks user → boards → pins, mirroring each level to JSON snapshots and
/// handing images to a bounded download pool.
pub struct Archive {
    client: Client,
    root: PathBuf,
    pool: DownloadPool,
}

impl Archive {
    pub fn new(
        client: Client,
        root: impl Into<PathBuf>,
        downloader: Arc<dyn Downloader>,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            root: root.into(),
            pool: DownloadPool::new(downloader, concurrency),
        }
    }

    /// Gate and downloader share one HTTP connection pool.
    pub fn from_config(cfg: &Config) -> reqwest::Result<Self> {
        let http = build_client(cfg)?;
        let gate = Arc::new(FetchGate::new(http.clone(), cfg.token.clone(), cfg.throttle));
        let client = Client::new(gate, cfg.api_url.clone());
        let downloader = Arc::new(HttpDownloader::new(http));
        Ok(Self::new(client, cfg.directory.clone(), downloader, cfg.concurrency))
    }

    /// Archive everything reachable from the authenticated user. Returns once
    /// all snapshots are written and every dispatched download has finished.
    pub async fn sync(&mut self) -> Result<SyncReport, ArchiveError> {
        info!("Synchronizing to {}...", self.root.display());
        self.pool.reset_counts();
        let mut report = SyncReport::default();
        let walked = self.walk(&mut report).await;
        // Join even on failure so no download outlives the run.
        report.images = self.pool.join().await;
        walked?;
        info!(
            "Synchronized {} boards, {} pins; images: {} downloaded, {} skipped, {} failed",
            report.boards,
            report.pins,
            report.images.downloaded,
            report.images.skipped,
            report.images.failed
        );
        Ok(report)
    }

    async fn walk(&mut self, report: &mut SyncReport) -> Result<(), ArchiveError> {
        report.user = self.sync_user().await?;
        self.sync_boards(report).await
    }

    async fn sync_user(&mut self) -> Result<bool, ArchiveError> {
        debug!("Synchronizing user...");
        let Some(user) = self.client.get_user().await else {
            warn!("No user data returned; user snapshot skipped");
            return Ok(false);
        };
        let user_dir = self.root.join("user");
        write_json(&user_dir.join("index.json"), &user).await?;
        if let Some(images) = &user.image {
            self.pool.sync_images(&user_dir, images).await?;
        }
        Ok(true)
    }

    async fn sync_boards(&mut self, report: &mut SyncReport) -> Result<(), ArchiveError> {
        let boards = self.client.get_all_boards().await;
        debug!("Fetched {} boards", boards.len());
        let boards_dir = self.root.join("boards");
        write_json(&boards_dir.join("index.json"), &boards).await?;
        for board in &boards {
            if self.sync_board(&boards_dir, board, report).await? {
                report.boards += 1;
            }
        }
        Ok(())
    }

    async fn sync_board(
        &mut self,
        boards_dir: &Path,
        board: &Board,
        report: &mut SyncReport,
    ) -> Result<bool, ArchiveError> {
        let name = board.name.as_deref().unwrap_or("<unnamed>");
        let Some(slug) = board_dir_name(board) else {
            warn!("Skipping board {}: neither URL nor id is usable", name);
            return Ok(false);
        };
        info!("Synchronizing board {}", name);
        let board_dir = boards_dir.join(&slug);
        write_json(&board_dir.join("index.json"), board).await?;
        if let Some(images) = &board.image {
            self.pool.sync_images(&board_dir, images).await?;
        }
        report.pins += self.sync_pins(&board_dir, board).await?;
        Ok(true)
    }

    async fn sync_pins(&mut self, board_dir: &Path, board: &Board) -> Result<usize, ArchiveError> {
        info!(
            "Synchronizing pins for board {}...",
            board.name.as_deref().unwrap_or("<unnamed>")
        );
        let pins = self.client.get_all_pins(BoardRef::Board(board)).await;
        info!("Fetched {} pins", pins.len());
        write_json(&board_dir.join("pins.json"), &pins).await?;
        let mut written = 0;
        for pin in &pins {
            if self.sync_pin(board_dir, pin).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn sync_pin(&mut self, board_dir: &Path, pin: &Pin) -> Result<bool, ArchiveError> {
        let Some(id) = pin.id.as_deref().filter(|id| is_safe_component(id)) else {
            warn!("Skipping pin without a usable id: {:?}", pin.id);
            return Ok(false);
        };
        let pin_dir = board_dir.join(id);
        write_json(&pin_dir.join("index.json"), pin).await?;
        if let Some(images) = &pin.image {
            self.pool.sync_images(&pin_dir, images).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_from_board_url() {
        assert_eq!(
            board_slug("https://example.com/someuser/my-board/").as_deref(),
            Some("my-board")
        );
        assert_eq!(
            board_slug("https://example.com/someuser/my-board").as_deref(),
            Some("my-board")
        );
        assert_eq!(
            board_slug("https://example.com/someuser//my-board/./").as_deref(),
            Some("my-board")
        );
        assert_eq!(
            board_slug("https://example.com/someuser/old/../my-board/").as_deref(),
            Some("my-board")
        );
        assert_eq!(board_slug("https://example.com/"), None);
        assert_eq!(board_slug("no url"), None);
    }

    #[test]
    fn board_without_url_uses_id() {
        let board = Board {
            id: Some("123".into()),
            ..Default::default()
        };
        assert_eq!(board_dir_name(&board).as_deref(), Some("123"));
        assert_eq!(board_dir_name(&Board::default()), None);
    }
}
