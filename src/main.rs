#[macro_use]
extern crate log;

use anyhow::Result;
use discord_tunes_rs::{config, fetcher};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    if let Err(e) = run().await {
        error!("{e:?}");
        std::process::exit(1);
    }
}

#[cfg(feature = "discord")]
async fn run() -> Result<()> {
    use anyhow::Context;
    use discord_tunes_rs::{discord, event};

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = config::load().await?;
    let discord_config = config
        .discord
        .clone()
        .context("Missing [discord] section in config")?;

    fetcher::init(&config.fetcher).await?;

    let bus = event::EventBus::default();
    event::debug(&bus);

    let bot = discord::init(&bus, &config, &discord_config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bot.shutdown().await;

    Ok(())
}

#[cfg(not(feature = "discord"))]
async fn run() -> Result<()> {
    let config = config::load().await?;
    fetcher::init(&config.fetcher).await?;

    anyhow::bail!("Built without the discord feature, nothing to connect to")
}
