use clap::Parser;
use flux_config::{ConfigLoader, ProtocolConfig};
use flux_gb28181::{
    MemoryCache, MemoryDeviceStore, NoopNotifier, SipServer, SipServerConfig, StatusNotifier,
    WebhookNotifier,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;

use api::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// 配置目录（global.toml、protocols/gb28181.toml）
    #[arg(long, default_value = "./config")]
    config_dir: String,

    #[arg(long, default_value = "0.0.0.0:8081")]
    http_bind: String,

    /// 覆盖配置文件中的 SIP 监听地址
    #[arg(long)]
    sip_bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_loader = ConfigLoader::new(&args.config_dir);
    config_loader.validate()?;
    let global = config_loader.load_global()?;

    // RUST_LOG 优先于配置文件
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(global.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let protocol: ProtocolConfig<SipServerConfig> = config_loader.load_protocol("gb28181")?;
    let mut sip_cfg = protocol.server.clone();
    if let Some(sip_bind) = args.sip_bind {
        sip_cfg.bind_addr = sip_bind;
    }
    sip_cfg.validate()?;

    let notifier: Arc<dyn StatusNotifier> = match protocol.webhook_url() {
        Some(url) => {
            tracing::info!(target: "gb28181d", webhook = url, "status webhook enabled");
            Arc::new(WebhookNotifier::new(url)?)
        }
        None => Arc::new(NoopNotifier),
    };

    let sip = SipServer::bind(
        sip_cfg,
        Arc::new(MemoryDeviceStore::new()),
        Arc::new(MemoryCache::new()),
        notifier,
    )
    .await?;

    let sip_task = sip.clone();
    tokio::spawn(async move {
        if let Err(e) = sip_task.run().await {
            tracing::error!(target: "gb28181d", "sip server stopped: {}", e);
        }
    });

    let state = AppState {
        store: sip.store().clone(),
        controller: sip.controller().clone(),
    };
    let app = api::router(state);

    let addr: SocketAddr = args
        .http_bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http_bind {}: {}", args.http_bind, e))?;
    tracing::info!(
        target: "gb28181d",
        system = %global.system.name,
        "http listening on {}",
        addr
    );

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sip.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "gb28181d", "failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "gb28181d", "shutdown signal received");
}
