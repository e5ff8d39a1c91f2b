//! Archive a Pinterest account to local disk.
//!
//! [`archive::Archive`] walks user → boards → pins through a [`client::Client`],
//! which pages through the API behind a self-throttling [`http::FetchGate`].

pub mod archive;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod images;
pub mod model;
pub mod page;
pub mod snapshot;

pub use archive::{Archive, SyncReport};
pub use client::{BoardRef, Client};
pub use config::Config;
pub use http::{FetchGate, FetchOutcome, RateLimitInfo};
pub use page::Page;
