use std::path::PathBuf;

/// Raised when the process environment or CLI flags cannot produce a [`crate::config::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing access token: pass --token or set PINTEREST_TOKEN")]
    MissingToken,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Misuse of a [`crate::page::Page`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("advance() called on a terminal page")]
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hard failures of an archive run. Network problems never end up here.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("writing snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding snapshot {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("download pool closed")]
    PoolClosed,
}
