//! Long-lived headless Chromium session
//!
//! One browser process is launched at startup and shared by every capture.
//! Pages are opened concurrently; the browser handle is only locked while a
//! page is being created.

use crate::{create_browser_config, CaptureError, Config};
use chromiumoxide::browser::Browser;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Token entry Home Assistant's frontend reads from `localStorage`.
#[derive(Debug, Serialize)]
struct HassTokens<'a> {
    #[serde(rename = "hassUrl")]
    hass_url: &'a str,
    access_token: &'a str,
    token_type: &'a str,
}

pub struct BrowserSession {
    browser: Mutex<Browser>,
    /// Background task handling Chrome DevTools Protocol communication
    handler: Mutex<Option<JoinHandle<Result<(), CdpError>>>>,
    is_shutting_down: AtomicBool,
}

impl BrowserSession {
    pub async fn launch(config: &Config) -> Result<Self, CaptureError> {
        let browser_config = create_browser_config(config)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptureError::BrowserLaunch(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser
        // to make any progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Browser handler error: {}", e);
                    return Err(e);
                }
            }
            info!("Browser handler stream ended");
            Ok(())
        });

        info!("Browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            handler: Mutex::new(Some(handler_task)),
            is_shutting_down: AtomicBool::new(false),
        })
    }

    /// Opens a new tab on `url`.
    pub async fn new_page(&self, url: &str) -> Result<Page, CaptureError> {
        if self.is_shutting_down.load(Ordering::Relaxed) {
            return Err(CaptureError::BrowserLaunch("browser is shutting down".to_string()));
        }

        if !self.is_alive().await {
            return Err(CaptureError::BrowserLaunch("browser handler stopped".to_string()));
        }

        let browser = self.browser.lock().await;
        browser
            .new_page(url)
            .await
            .map_err(|e| CaptureError::Navigation(e.to_string()))
    }

    pub async fn is_alive(&self) -> bool {
        matches!(&*self.handler.lock().await, Some(handle) if !handle.is_finished())
    }

    /// Logs into Home Assistant by seeding the frontend's token storage.
    ///
    /// Later pages on the same origin share `localStorage`, so every
    /// dashboard opened afterwards is authenticated.
    pub async fn login(&self, config: &Config) -> Result<(), CaptureError> {
        let limit = config.timeout();
        match timeout(limit, self.seed_tokens(config)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(limit)),
        }
    }

    async fn seed_tokens(&self, config: &Config) -> Result<(), CaptureError> {
        let page = self.new_page(&config.hass_base_url).await?;

        let script = login_script(&config.hass_base_url, &config.hass_token)
            .map_err(|e| CaptureError::Login(e.to_string()))?;
        let result = page
            .evaluate(script)
            .await
            .map(|_| ())
            .map_err(|e| CaptureError::Login(e.to_string()));

        if let Err(e) = page.close().await {
            debug!("Could not close login page: {}", e);
        }

        result
    }

    pub async fn shutdown(&self) {
        info!("Shutting down browser...");
        self.is_shutting_down.store(true, Ordering::Relaxed);

        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            error!("Could not close browser: {}", e);
        }
        match timeout(Duration::from_secs(5), browser.wait()).await {
            Ok(Err(e)) => error!("Could not wait for browser process: {}", e),
            Err(_) => error!("Browser process did not exit in time"),
            Ok(Ok(_)) => {}
        }

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        info!("Browser shutdown complete");
    }
}

/// Script storing the Home Assistant tokens in `localStorage`.
pub fn login_script(base_url: &str, token: &str) -> Result<String, serde_json::Error> {
    let tokens = serde_json::to_string(&HassTokens {
        hass_url: base_url,
        access_token: token,
        token_type: "Bearer",
    })?;
    // The stored value is itself a JSON string, quoted again as a JS literal.
    let literal = serde_json::to_string(&tokens)?;
    Ok(format!("localStorage.setItem(\"hassTokens\", {literal});"))
}
