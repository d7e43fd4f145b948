use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tgb_console::ConsoleHost;
use tgb_core::{config::Config, runtime::Bridge, state::StateStore};
use tgb_telegram::TelegramBotApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgb_core::logging::init("tgb")?;

    let cfg = Arc::new(Config::load().context("failed to load configuration")?);

    let api = Arc::new(TelegramBotApi::new(cfg.bot.token.clone()));
    match api.username().await {
        Ok(name) => info!(bot = %name, "connected to telegram"),
        Err(e) => warn!(error = %e, "could not fetch bot identity"),
    }

    let host = Arc::new(ConsoleHost::spawn(&cfg.bridge).context("failed to start server process")?);
    let store = StateStore::new(cfg.bridge.state_file.clone());

    let bridge = Bridge::new(cfg.clone(), api, host.clone(), store)
        .context("failed to restore bridge state")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }

    let result = bridge.run(shutdown).await;
    host.shutdown().await?;
    result?;
    Ok(())
}
