use anyhow::{anyhow, Context};
use clap::Parser;
use inkshot::{
    create_transform, install_prometheus_exporter, setup_logging, BrowserSession, CacheServer,
    ChromeCapture, Cli, ImageCache, Metrics, RefreshScheduler,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose).map_err(|e| anyhow!("could not set up logging: {e}"))?;

    info!("Starting inkshot v{}", env!("CARGO_PKG_VERSION"));

    info!("Reading configuration from {}", args.config.display());
    let config = Arc::new(args.load_config().context("configuration error")?);
    let listen_addr = config.listen_socket_addr()?;

    if let Some(metrics_addr) = config.metrics_socket_addr()? {
        install_prometheus_exporter(metrics_addr)
            .map_err(|e| anyhow!("could not start metrics exporter: {e}"))?;
    }
    let metrics = Arc::new(Metrics::new());

    info!("Launching browser");
    let session = Arc::new(
        BrowserSession::launch(&config)
            .await
            .context("could not launch browser")?,
    );

    let result = run(config, session.clone(), metrics, listen_addr).await;

    session.shutdown().await;

    if let Err(e) = &result {
        error!("Application error: {:#}", e);
    }
    info!("inkshot stopped");
    result
}

async fn run(
    config: Arc<inkshot::Config>,
    session: Arc<BrowserSession>,
    metrics: Arc<Metrics>,
    listen_addr: std::net::SocketAddr,
) -> anyhow::Result<()> {
    info!("Logging into Home Assistant");
    session
        .login(&config)
        .await
        .context("could not log into Home Assistant")?;

    let cache = Arc::new(ImageCache::new(config.hass_pages.len()));
    let capture = Arc::new(ChromeCapture::new(session));
    let transform = create_transform(&config.transform);

    let server = CacheServer::new(cache.clone(), transform.content_type(), metrics.clone())
        .bind(listen_addr)?;

    let shutdown = CancellationToken::new();
    let _signals = setup_shutdown_handler(shutdown.clone());

    let scheduler = RefreshScheduler::new(config, cache, capture, transform, metrics)
        .spawn(shutdown.child_token());

    server.serve(shutdown.clone()).await;

    // The server only returns on shutdown; make sure the scheduler sees it too.
    shutdown.cancel();
    info!("Waiting for the current refresh cycle to finish...");
    scheduler.await.context("refresh scheduler failed")?;

    Ok(())
}

fn setup_shutdown_handler(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to create SIGTERM handler: {}", e);
                    if signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT");
                    }
                    shutdown.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT");
        }

        shutdown.cancel();
    })
}
