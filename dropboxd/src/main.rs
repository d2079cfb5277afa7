use anyhow::Context;
use dropboxd::api::{self, AppState};
use dropboxd::config::ServiceConfig;
use dropboxd::orchestrator::DownloadService;
use dropboxd::provisioning::Provisioner;
use dropboxd::storage::CredentialStore;
use dropboxd::token_broker::TokenBroker;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "dropboxd=info,tower_http=info";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Revoke(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--revoke" => {
                let identity = args
                    .next()
                    .filter(|value| !value.trim().is_empty())
                    .context("--revoke needs the user's e-mail")?;
                mode = CliMode::Revoke(identity);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn open_store(config: &ServiceConfig) -> anyhow::Result<CredentialStore> {
    let store = match config.database_url.as_deref() {
        Some(url) => CredentialStore::new(url).await,
        None => CredentialStore::new_default().await,
    };
    store.context("failed to open credential store")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: dropboxd [--revoke <email>]");
        println!("  --revoke <email>   Remove the stored Dropbox credential and exit");
        return Ok(());
    }

    let config = ServiceConfig::from_env()?;
    let store = open_store(&config).await?;

    if let CliMode::Revoke(identity) = mode {
        if store.delete(&identity).await? {
            tracing::info!(identity = %identity, "stored credential removed");
        } else {
            tracing::warn!(identity = %identity, "no stored credential to remove");
        }
        return Ok(());
    }

    let broker = TokenBroker::new(&config.app, store.clone())?;
    let provisioner = Provisioner::new(&config.app, config.download.clone(), store)?;
    let downloads = DownloadService::new(broker, config.download.clone());
    let app = api::router(AppState::new(downloads, provisioner));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "dropboxd listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
