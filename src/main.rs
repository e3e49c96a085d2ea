use clap::Parser;
use sse_chat_bridge::{build_router, AppState, BridgeConfig, SessionLog};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "sse-chat-bridge",
    about = "Relay vendor LLM streams to HTTP clients as uniform SSE events",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Seconds to wait for the next upstream event before giving up (overrides config)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Session journal path
    #[arg(long, default_value = "sse-chat-bridge-sessions.jsonl")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sse_chat_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. sse-chat-bridge.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/sse-chat-bridge/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/sse-chat-bridge/config.toml");
            println!("     ~/.config/sse-chat-bridge/config.toml");
        }
        println!("  3. ~/.sse-chat-bridge.toml");
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(secs) = cli.idle_timeout {
        config.relay.idle_timeout_secs = secs;
    }
    if let Some(ref provider) = cli.provider {
        config.provider.name = provider.clone();
        if let Some(preset) = sse_chat_bridge::providers::ProviderPreset::from_name(provider) {
            if config.provider.base_url.is_none() {
                config.provider.base_url = Some(preset.base_url.to_string());
            }
            config.provider.api_key_env = preset.default_api_key_env.to_string();
            config.provider.format = Some(preset.format);
        }
    }

    // Validate config eagerly
    config.validate()?;
    let chat_url = config.chat_url()?;
    let _api_key = config.resolve_api_key()?;

    let sessions = SessionLog::new(&cli.log_file)?;
    sessions.compact()?;

    info!("sse-chat-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:     {}", config.provider.name);
    info!("  Upstream:     {}", chat_url);
    info!("  Format:       {:?}", config.vendor_format());
    info!("  Idle timeout: {}s", config.relay.idle_timeout_secs);
    info!("  Port:         {}", config.port);
    info!("  Models:       {} mapped", config.models.len());
    info!("  Session log:  {}", cli.log_file.display());

    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        sessions,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
