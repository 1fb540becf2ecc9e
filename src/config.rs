//! Configuration management with serde deserialization
//!
//! The configuration file is a JSON document with the following shape:
//!
//! ```json
//! {
//!   "hass_base_url": "https://example.com",
//!   "hass_token": "ACCESS_TOKEN",
//!   "hass_pages": [
//!     { "path": "/lovelace/default_view", "scale": 1 }
//!   ],
//!   "width": 480,
//!   "height": 800,
//!   "rotation": 0,
//!   "listen_addr": ":8000",
//!   "refresh_time": 60,
//!   "min_idle_time": 5,
//!   "timeout": 60
//! }
//! ```

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Path used when no configuration file is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/data/options.json";

/// Main configuration structure
///
/// Field names follow the on-disk JSON keys. Durations are stored in seconds
/// and exposed as [`Duration`] through accessor methods.
///
/// # Examples
///
/// ```rust
/// use inkshot::{Config, Page};
///
/// let config = Config {
///     hass_base_url: "https://hass.local".to_string(),
///     hass_token: "token".to_string(),
///     hass_pages: vec![Page::new("/lovelace/0")],
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// URL of the Home Assistant server
    pub hass_base_url: String,

    /// Home Assistant long-lived access token
    pub hass_token: String,

    /// Pages to capture, one cache slot per page
    pub hass_pages: Vec<Page>,

    /// Width of the generated image (usually the display width)
    pub width: u32,

    /// Height of the generated image (usually the display height)
    pub height: u32,

    /// Rotation in degrees applied to the resulting images
    #[serde(default)]
    pub rotation: i32,

    /// HTTP service address, `":8000"` binds every interface
    pub listen_addr: String,

    /// Seconds between the end of one refresh cycle and the start of the next
    #[serde(rename = "refresh_time")]
    pub refresh_time_secs: u64,

    /// Seconds without network requests after which a page counts as loaded
    #[serde(rename = "min_idle_time")]
    pub min_idle_time_secs: u64,

    /// Hard timeout in seconds for a single capture
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates (self-signed Home Assistant setups)
    #[serde(default)]
    pub ignore_cert_errors: bool,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    #[serde(default)]
    pub chrome_path: Option<String>,

    /// Raster conversion backend
    #[serde(default)]
    pub transform: TransformSettings,

    /// Prometheus scrape listener, disabled when absent
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hass_base_url: String::new(),
            hass_token: String::new(),
            hass_pages: Vec::new(),
            width: 480,
            height: 800,
            rotation: 0,
            listen_addr: ":8000".to_string(),
            refresh_time_secs: 60,
            min_idle_time_secs: 5,
            timeout_secs: 60,
            ignore_cert_errors: false,
            chrome_path: None,
            transform: TransformSettings::default(),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hass_base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }

        if let Err(e) = url::Url::parse(&self.hass_base_url) {
            return Err(ConfigError::InvalidBaseUrl(e.to_string()));
        }

        if self.hass_token.is_empty() {
            return Err(ConfigError::MissingToken);
        }

        if self.hass_pages.is_empty() {
            return Err(ConfigError::NoPages);
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroDimensions);
        }

        if self.listen_addr.is_empty() {
            return Err(ConfigError::MissingListenAddr);
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_time_secs)
    }

    pub fn min_idle_time(&self) -> Duration {
        Duration::from_secs(self.min_idle_time_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolves `listen_addr` into a socket address.
    ///
    /// A bare `":port"` means every interface.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_addr(&self.listen_addr)
    }

    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.metrics_addr.as_deref().map(resolve_addr).transpose()
    }

    /// Full URL of a page: base URL followed by the page path.
    pub fn page_url(&self, page: &Page) -> String {
        format!("{}{}", self.hass_base_url, page.path)
    }
}

fn resolve_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let candidate = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };

    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidListenAddr(addr.to_string()))
}

/// A page to be captured
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Page {
    /// URL path of the page, appended to the base URL
    pub path: String,

    /// Scale factor used to take the screenshot
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Page {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scale: default_scale(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Scale with the unset value (0) mapped to 1.
    pub fn effective_scale(&self) -> f64 {
        if self.scale == 0.0 {
            1.0
        } else {
            self.scale
        }
    }

    /// Browser viewport for an output of `width` x `height` pixels.
    ///
    /// The page is laid out at `size / scale` CSS pixels and rendered with a
    /// device scale factor of `scale`, so the screenshot comes out at roughly
    /// the output size.
    pub fn viewport(&self, width: u32, height: u32) -> Viewport {
        let scale = self.effective_scale();
        Viewport {
            width: (width as f64 / scale) as u32,
            height: (height as f64 / scale) as u32,
            device_scale_factor: scale,
        }
    }
}

/// Browser viewport configuration for a capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Which raster conversion implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformBackend {
    /// Pipe through ImageMagick (`convert`)
    ImageMagick,
    /// Convert in-process with the `image` crate
    Builtin,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformSettings {
    #[serde(default = "default_backend")]
    pub backend: TransformBackend,

    /// ImageMagick executable, `magick` on ImageMagick 7 installs
    #[serde(default = "default_program")]
    pub program: String,
}

fn default_backend() -> TransformBackend {
    TransformBackend::ImageMagick
}

fn default_program() -> String {
    "convert".to_string()
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            program: default_program(),
        }
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// Each process gets its own user data directory so that a stale profile lock
/// from a previous run never blocks the launch.
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let unique_id = std::process::id();

    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        format!("--window-size={},{}", config.width, config.height),
        format!("--user-data-dir=/tmp/inkshot-chromium-{unique_id}"),
    ];

    if config.ignore_cert_errors {
        args.push("--ignore-certificate-errors".to_string());
    }

    args
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, crate::CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.width, config.height)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(crate::CaptureError::BrowserLaunch)
}
