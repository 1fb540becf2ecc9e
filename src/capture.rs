//! Page capture: URL in, PNG screenshot out

use crate::{BrowserSession, CaptureError, Viewport};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

/// Everything needed to render one page.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub url: String,
    pub viewport: Viewport,
    /// Time without in-flight requests after which the page counts as loaded
    pub idle_time: Duration,
    /// Upper bound for the whole capture, page creation included
    pub timeout: Duration,
}

/// Renders a URL into raw image bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, CaptureError>;
}

/// [`PageCapture`] backed by the shared headless Chromium.
pub struct ChromeCapture {
    session: Arc<BrowserSession>,
}

impl ChromeCapture {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    async fn render(&self, page: &Page, request: &CaptureRequest) -> Result<Vec<u8>, CaptureError> {
        let viewport = &request.viewport;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(CaptureError::Render)?;
        page.execute(metrics).await?;

        // Subscribe before navigating so the first requests are not missed.
        let events = network_events(page).await?;

        page.goto(request.url.clone())
            .await
            .map_err(|e| CaptureError::Navigation(e.to_string()))?;

        let in_flight = wait_for_idle(events, request.idle_time).await;
        debug!("Page {} settled ({} requests still open)", request.url, in_flight);

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        page.screenshot(params)
            .await
            .map_err(|e| CaptureError::Render(e.to_string()))
    }
}

#[async_trait]
impl PageCapture for ChromeCapture {
    async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, CaptureError> {
        let deadline = Instant::now() + request.timeout;

        let opening = tokio::spawn({
            let session = self.session.clone();
            async move { session.new_page("about:blank").await }
        });
        let page = open_within(request.timeout, opening, |page: Page| async move {
            debug!("Closing page that opened after its capture timed out");
            if let Err(e) = page.close().await {
                debug!("Could not close late page: {}", e);
            }
        })
        .await?;

        let result = match timeout_at(deadline, self.render(&page, &request)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(request.timeout)),
        };

        if let Err(e) = page.close().await {
            debug!("Could not close page {}: {}", request.url, e);
        }

        result
    }
}

/// Waits up to `limit` for `opening` to produce a resource.
///
/// On timeout the opening task keeps running and `release` is applied to
/// whatever it eventually produces, so nothing opened late is leaked.
pub async fn open_within<T, R, Fut>(
    limit: Duration,
    mut opening: JoinHandle<Result<T, CaptureError>>,
    release: R,
) -> Result<T, CaptureError>
where
    T: Send + 'static,
    R: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    match timeout(limit, &mut opening).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(CaptureError::Render(format!("page task failed: {e}"))),
        Err(_) => {
            tokio::spawn(async move {
                if let Ok(Ok(resource)) = opening.await {
                    release(resource).await;
                }
            });
            Err(CaptureError::Timeout(limit))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Started(String),
    Finished(String),
}

async fn network_events(page: &Page) -> Result<BoxStream<'static, NetworkEvent>, CaptureError> {
    let started = page
        .event_listener::<EventRequestWillBeSent>()
        .await?
        .map(|e| NetworkEvent::Started(e.request_id.inner().clone()));
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await?
        .map(|e| NetworkEvent::Finished(e.request_id.inner().clone()));
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await?
        .map(|e| NetworkEvent::Finished(e.request_id.inner().clone()));

    Ok(stream::select(started, stream::select(finished, failed)).boxed())
}

/// Tracks requests that have started but not yet finished.
#[derive(Debug, Default)]
pub struct IdleTracker {
    in_flight: HashSet<String>,
}

impl IdleTracker {
    pub fn record(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Started(id) => {
                self.in_flight.insert(id);
            }
            NetworkEvent::Finished(id) => {
                self.in_flight.remove(&id);
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Waits until no request has been in flight for `idle_time`.
///
/// The idle timer only runs while nothing is in flight and restarts on every
/// new request. Returns the number of requests still open, which is only
/// non-zero when the event stream ended early. Callers bound the wait with
/// their own timeout.
pub async fn wait_for_idle<S>(mut events: S, idle_time: Duration) -> usize
where
    S: Stream<Item = NetworkEvent> + Unpin,
{
    let mut tracker = IdleTracker::default();

    loop {
        let next = if tracker.is_idle() {
            match timeout(idle_time, events.next()).await {
                Ok(next) => next,
                Err(_) => return 0,
            }
        } else {
            events.next().await
        };

        match next {
            Some(event) => tracker.record(event),
            None => return tracker.in_flight(),
        }
    }
}
