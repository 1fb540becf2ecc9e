//! HTTP front end serving cached images by slot index
//!
//! `GET /` serves slot 0 and `GET /<n>` serves slot `n`. Unknown or not yet
//! captured slots answer 404, a path that is not an integer answers 500.

use crate::{ImageCache, Metrics, ServeError};
use percent_encoding::percent_decode_str;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tiny_http::{Header, Request, Response, Server};
use tokio_util::sync::CancellationToken;
use url::Url;
use tracing::{debug, error, info, warn};

/// Status and body decided for a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Reply {
    fn image(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: Vec::new(),
        }
    }

    fn internal_error() -> Self {
        Self {
            status: 500,
            body: Vec::new(),
        }
    }
}

/// Maps request paths onto [`ImageCache`] slots.
pub struct CacheServer {
    cache: Arc<ImageCache>,
    content_type: &'static str,
    metrics: Arc<Metrics>,
}

impl CacheServer {
    pub fn new(cache: Arc<ImageCache>, content_type: &'static str, metrics: Arc<Metrics>) -> Self {
        Self {
            cache,
            content_type,
            metrics,
        }
    }

    /// Resolves a request target to a reply.
    ///
    /// Origin-form (`/2?x=y`) and absolute-form (`http://host/2`) targets are
    /// both accepted. The query string is ignored and the path is
    /// percent-decoded before the index is parsed.
    pub fn lookup(&self, target: &str) -> Reply {
        let Some(path) = request_path(target) else {
            warn!("Could not parse request target ({})", target);
            return Reply::internal_error();
        };
        let remainder = path.strip_prefix('/').unwrap_or(&path);

        let idx = if remainder.is_empty() {
            0
        } else {
            match remainder.parse::<i64>() {
                Ok(idx) => idx,
                Err(_) => {
                    warn!("Could not parse index ({})", path);
                    return Reply::internal_error();
                }
            }
        };

        let Ok(slot) = usize::try_from(idx) else {
            warn!("Could not get image: index {} is out of bounds", idx);
            return Reply::not_found();
        };

        match self.cache.get(slot) {
            Ok(image) => Reply::image(image),
            Err(e) => {
                warn!("Could not get image: {}", e);
                Reply::not_found()
            }
        }
    }

    fn respond(&self, request: Request) {
        let url = request.url().to_string();
        let remote = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        let user_agent = request
            .headers()
            .iter()
            .find(|h| h.field.equiv("User-Agent"))
            .map(|h| h.value.as_str().to_string())
            .unwrap_or_default();
        info!("{} - {} - {} {}", remote, user_agent, request.method(), url);

        let reply = self.lookup(&url);
        self.metrics.record_status(reply.status);

        let response = self.build_response(reply);
        let written = request.respond(response);
        self.record_write(&remote, written);
    }

    pub(crate) fn build_response(&self, reply: Reply) -> Response<Cursor<Vec<u8>>> {
        let is_image = reply.status == 200;
        let mut response = Response::from_data(reply.body)
            .with_status_code(reply.status)
            // E-ink clients need Content-Length, never switch to chunked.
            .with_chunked_threshold(usize::MAX);
        if is_image {
            let content_type =
                Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes());
            if let Ok(header) = content_type {
                response.add_header(header);
            }
        }
        response
    }

    /// Logs and counts a failed response write. Returns whether the write
    /// succeeded.
    pub(crate) fn record_write(&self, remote: &str, written: io::Result<()>) -> bool {
        match written {
            Ok(()) => true,
            Err(e) => {
                self.metrics.response_write_failures.increment(1);
                error!("Could not write image to {} (500): {}", remote, ServeError::Write(e));
                false
            }
        }
    }

    pub fn bind(self, addr: SocketAddr) -> Result<BoundServer, ServeError> {
        let server = Server::http(addr).map_err(|e| ServeError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(BoundServer {
            server: Arc::new(server),
            handler: Arc::new(self),
        })
    }
}

/// A [`CacheServer`] with a bound listening socket.
pub struct BoundServer {
    server: Arc<Server>,
    handler: Arc<CacheServer>,
}

impl BoundServer {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serves requests until `shutdown` is cancelled.
    ///
    /// Accepting runs on a blocking thread; every request is answered on its
    /// own blocking task.
    pub async fn serve(self, shutdown: CancellationToken) {
        if let Some(addr) = self.local_addr() {
            info!("Serving HTTP requests on {}", addr);
        }

        let unblocker = tokio::spawn({
            let server = self.server.clone();
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                server.unblock();
            }
        });

        let runtime = tokio::runtime::Handle::current();
        let server = self.server.clone();
        let handler = self.handler.clone();
        let accept_shutdown = shutdown.clone();

        let accept = tokio::task::spawn_blocking(move || loop {
            match server.recv() {
                Ok(request) => {
                    let handler = handler.clone();
                    runtime.spawn_blocking(move || handler.respond(request));
                }
                Err(e) => {
                    if accept_shutdown.is_cancelled() {
                        break;
                    }
                    warn!("Could not accept request: {}", e);
                }
            }
        });

        if let Err(e) = accept.await {
            error!("HTTP accept loop failed: {}", e);
        }
        unblocker.abort();
        debug!("HTTP server stopped");
    }
}

/// Decoded path of a request target, `None` when it is not a valid URL.
fn request_path(target: &str) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(target).ok()?;
    let path = percent_decode_str(url.path()).decode_utf8().ok()?;
    Some(path.into_owned())
}
