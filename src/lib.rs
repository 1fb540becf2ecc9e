//! # inkshot
//!
//! Periodically renders Home Assistant dashboards with a headless Chromium,
//! converts every screenshot into a monochrome bitmap sized for an e-ink
//! display, and serves the latest bitmap of each page over HTTP.
//!
//! ## Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`ImageCache`] | One slot per configured page, shared by refresher and server |
//! | [`RefreshScheduler`] | Captures and converts all pages concurrently, one cycle per interval |
//! | [`CacheServer`] | `GET /` and `GET /<n>` answer with the image of slot `n` |
//! | [`PageCapture`] | Page rendering, [`ChromeCapture`] drives Chromium over CDP |
//! | [`RasterTransform`] | Resize, rotate and monochrome, through ImageMagick or in-process |
//!
//! A failed capture or conversion leaves the previous image of that slot in
//! place, so clients keep receiving the last good image.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inkshot::{BuiltinTransform, CacheServer, ImageCache, Metrics};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(ImageCache::new(1));
//!     cache.set(0, &[0x42, 0x43])?;
//!
//!     let server = CacheServer::new(cache, "image/bmp", Arc::new(Metrics::noop()))
//!         .bind("127.0.0.1:8000".parse()?)?;
//!     server.serve(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! inkshot --config /data/options.json
//! ```
//!
//! Chromium and, with the default transform backend, ImageMagick must be
//! installed.

/// Configuration file format and validation
pub mod config;

/// Error types
pub mod error;

/// Shared headless Chromium session
pub mod browser;

/// Page capture capability
pub mod capture;

/// Raster conversion capability
pub mod transform;

/// Slot-indexed image store
pub mod cache;

/// Periodic refresh of the cache
pub mod scheduler;

/// HTTP front end
pub mod server;

/// Command-line interface and logging setup
pub mod cli;

/// Metrics handles and Prometheus exporter
pub mod telemetry;


pub use browser::*;
pub use cache::*;
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use scheduler::*;
pub use server::*;
pub use telemetry::*;
pub use transform::*;
