//! `snag` - pull the playable media out of a web page and stream it back
//!
//! # Features
//!
//! - **Platform profiles**: built-in YouTube, Vimeo, Dailymotion, Twitter/X,
//!   Instagram, TikTok, Facebook and Reddit, plus user-defined profiles
//! - **Strategy chain**: direct player API, headless Chromium interception,
//!   generic page scan; first success wins and every attempt is recorded
//! - **Validated transfers**: content-type and minimum-size checks, live
//!   progress, timeouts and top-down cancellation
//! - **Browser fingerprinting**: realistic Chrome/Firefox/Safari headers on
//!   every outbound request
//!
//! # Example
//!
//! ```rust,no_run
//! use snag::{Config, ExtractionRequest, Pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::from_config(&Config::load()?)?;
//!     let request = ExtractionRequest::parse("https://youtu.be/dQw4w9WgXcQ", true, true)?;
//!     let info = pipeline.metadata(&request, &CancellationToken::new()).await?;
//!     println!("{} ({})", info.title, info.content_type);
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod http_client;
pub mod media;
pub mod pipeline;
pub mod platform;
pub mod sanitize;
pub mod server;
pub mod transfer;

pub use chain::{StrategyChain, UnknownPlatformPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{ExtractFailure, ExtractionAttempt, ExtractionResult, Extractor, StrategyKind};
pub use fingerprint::{chrome_profile, firefox_profile, random_profile, safari_profile, BrowserProfile};
pub use http_client::MediaClient;
pub use media::ContentKind;
pub use pipeline::{Download, ExtractionRequest, MediaInfo, Pipeline};
pub use platform::{PlatformProfile, PlatformRegistry};
pub use transfer::{Transfer, TransferManager, TransferProgress, TransferState};

/// Version of snag
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
