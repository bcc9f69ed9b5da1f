use mailbeacon::api::{ApiState, router};
use mailbeacon::cache::KeyValueCache;
use mailbeacon::config::Config;
use mailbeacon::crypto::Vault;
use mailbeacon::delivery::{DeliveryPipeline, HttpRenderer, TelegramSender};
use mailbeacon::listener::ListenerSupervisor;
use mailbeacon::repository::MemoryRepository;
use mailbeacon::service::{MailboxService, UserService};
use mailbeacon::sweep;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailbeacon", about = "IMAP mailbox listener and Telegram forwarder")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "mailbeacon.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(&args.config)?;

    let repository = MemoryRepository::shared();
    let cache = KeyValueCache::new(100_000, config.cache.default_ttl());
    let vault = Arc::new(Vault::new(&config.crypto.key_base64)?);
    let supervisor = Arc::new(ListenerSupervisor::new());
    let pipeline = DeliveryPipeline::spawn(
        Arc::new(HttpRenderer::new(config.render.endpoint.clone())),
        Arc::new(TelegramSender::new(config.telegram.bot_token.clone())),
    );

    let users = UserService::new(Arc::clone(&repository), cache.clone());
    let mailboxes = MailboxService::new(
        Arc::clone(&repository),
        cache.clone(),
        vault,
        Arc::clone(&supervisor),
        pipeline,
        config.imap.clone(),
    );

    mailboxes.seed_services(&config.mail_services).await?;
    mailboxes.start_active_listeners().await?;
    sweep::spawn(Arc::clone(&repository), cache, config.sweep.interval());

    let app = router(Arc::new(ApiState { users, mailboxes }));
    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr).await?;
    tracing::info!(addr = %config.api.bind_addr, "API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
