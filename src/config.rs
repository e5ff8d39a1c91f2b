use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.pinterest.com/v1";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 8;

/// Runtime configuration for one archive run.
/// Values are sourced from environment variables with sensible defaults,
/// then overridden by CLI flags (see [`Overrides`]).
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub directory: PathBuf,
    pub throttle: bool,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

/// Values supplied on the command line. `None` means "keep the env/default".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub token: Option<String>,
    pub directory: Option<PathBuf>,
    pub throttle: bool,
    pub concurrency: Option<usize>,
}

impl Config {
    /// Build a config around an explicit token, everything else defaulted.
    pub fn new(token: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            directory: directory.into(),
            throttle: false,
            user_agent: default_user_agent(),
            timeout_secs: 30,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - PINTEREST_TOKEN (or PINTEREST_ACCESS_TOKEN) [required unless --token]
    /// - PINTEREST_API_URL (default: https://api.pinterest.com/v1)
    /// - PINTEREST_HTTP_TIMEOUT_SECS (default: 30)
    /// - PINTEREST_USER_AGENT (default: pincushion/<version>)
    /// - PINCUSHION_DIRECTORY (default: ./archive)
    /// - PINCUSHION_THROTTLE (1/true enables throttling)
    /// - PINCUSHION_DOWNLOAD_CONCURRENCY (default: 4, clamped to 1..=8)
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        let token = overrides
            .token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| env::var("PINTEREST_TOKEN").ok())
            .or_else(|| env::var("PINTEREST_ACCESS_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let api_url = env::var("PINTEREST_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let timeout_secs = match env::var("PINTEREST_HTTP_TIMEOUT_SECS") {
            Ok(s) => s.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "PINTEREST_HTTP_TIMEOUT_SECS",
                value: s.clone(),
            })?,
            Err(_) => 30,
        };
        let user_agent = env::var("PINTEREST_USER_AGENT").unwrap_or_else(|_| default_user_agent());
        let directory = overrides
            .directory
            .or_else(|| env::var("PINCUSHION_DIRECTORY").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./archive"));
        let throttle = overrides.throttle
            || env::var("PINCUSHION_THROTTLE")
                .map(|s| parse_flag(&s))
                .unwrap_or(false);
        let concurrency = match overrides.concurrency {
            Some(n) => n,
            None => match env::var("PINCUSHION_DOWNLOAD_CONCURRENCY") {
                Ok(s) => s.parse::<usize>().map_err(|_| ConfigError::Invalid {
                    name: "PINCUSHION_DOWNLOAD_CONCURRENCY",
                    value: s.clone(),
                })?,
                Err(_) => DEFAULT_CONCURRENCY,
            },
        };

        Ok(Self {
            token,
            api_url,
            directory,
            throttle,
            user_agent,
            timeout_secs,
            concurrency: clamp_concurrency(concurrency),
        })
    }
}

fn default_user_agent() -> String {
    format!("pincushion/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub fn clamp_concurrency(n: usize) -> usize {
    n.clamp(1, MAX_CONCURRENCY)
}
