use minecraft_bedrock_proxy::{bridge::Bridge, config::Config};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let (config, path) = Config::load(Path::new("."))?;

    let default_filter = if config.debug_logging { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
    tracing::info!("configuration loaded from {}", path.display());

    Bridge::new(config)?.start().await
}
