use crate::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "inkshot")]
#[command(about = "Home Assistant screenshot server for e-ink displays")]
#[command(version)]
pub struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, help = "Configuration file path")]
    pub config: PathBuf,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::from_file(&self.config)?;

        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }

        Ok(config)
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `--verbose` when set.
pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()?;

    Ok(())
}
