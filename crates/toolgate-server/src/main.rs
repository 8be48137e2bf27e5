use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use toolgate_server::config::Config;
use toolgate_server::tools::ToolRegistry;
use toolgate_server::App;
use tracing_subscriber::EnvFilter;

/// Startup failures: bad config, bad expression, first key fetch.
const EXIT_STARTUP: i32 = 2;
const EXIT_RUNTIME: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "JWT-gated MCP tool server")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, env = "TOOLGATE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (cfg, app) = match startup(&cli).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "startup failed");
            std::process::exit(EXIT_STARTUP);
        }
    };

    let code = match serve(&cfg, app).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "server failed");
            EXIT_RUNTIME
        }
    };
    std::process::exit(code);
}

async fn startup(cli: &Cli) -> anyhow::Result<(Config, App)> {
    let cfg = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let app = App::build(&cfg, ToolRegistry::with_builtins()).await?;
    Ok((cfg, app))
}

async fn serve(cfg: &Config, app: App) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind_addr))?;
    tracing::info!(
        addr = %cfg.server.bind_addr,
        name = %cfg.server.name,
        version = %cfg.server.version,
        "toolgate listening"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
            cancel.cancel();
        }
    });

    let router = app.router.clone();
    let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .context("serving HTTP");

    app.shutdown().await;
    result
}
