use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use supertrend_console::session::{
    api::BotApi,
    commands::CommandGateway,
    ingest::{run_ingest, ReconnectPolicy, SessionWs},
    SessionStore,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct RunConfig {
    api_url: String,
    ws_url: String,
    reconnect: ReconnectPolicy,
    request_timeout: Duration,
}

impl RunConfig {
    fn from_env() -> Self {
        let api_url = std::env::var("BOT_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000/".to_string());
        let ws_url =
            std::env::var("BOT_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8000/ws".to_string());
        let reconnect = ReconnectPolicy {
            initial: env_ms("BOT_RECONNECT_INITIAL_MS", 1_000),
            max: env_ms("BOT_RECONNECT_MAX_MS", 60_000),
        };
        let request_timeout = env_ms("BOT_REQUEST_TIMEOUT_MS", 5_000);
        Self {
            api_url,
            ws_url,
            reconnect,
            request_timeout,
        }
    }
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cfg = RunConfig::from_env();
    info!(api = %cfg.api_url, ws = %cfg.ws_url, "starting session console");

    let store = SessionStore::new();
    let api = BotApi::new(&cfg.api_url, cfg.request_timeout).context("invalid BOT_API_URL")?;
    let gateway = Arc::new(CommandGateway::new(Arc::clone(&store), api));

    // Seed the store before the stream attaches; the feed only sends deltas.
    if let Err(err) = gateway.resync().await {
        warn!(err = %err, "initial state fetch failed, waiting for the stream");
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let ingest = tokio::spawn(run_ingest(
        SessionWs::new(&cfg.ws_url),
        Arc::clone(&store),
        cfg.reconnect,
        cancel_rx,
    ));

    let mut status_tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = status_tick.tick() => {
                print_status_line(&store, &gateway).await;
            }
        }
    }

    let _ = cancel_tx.send(true);
    let _ = ingest.await;
    Ok(())
}

async fn print_status_line(store: &Arc<SessionStore>, gateway: &Arc<CommandGateway<BotApi>>) {
    let snap = store.snapshot().await;
    let gates = gateway.gates().await;
    let position = match snap.position.open() {
        Some(open) => format!(
            "{} {} @ {:.2} (pnl {:+.2})",
            open.strike, open.option_type, open.entry_price, open.unrealized_pnl
        ),
        None => "flat".to_string(),
    };
    println!(
        "[{}] {} {} | ltp {:.2} | pos {} | pnl {:.2} ({} trades) | stream {} | mode_change={} settings={}",
        snap.config.selected_index,
        if snap.bot_status.is_running { "running" } else { "stopped" },
        snap.bot_status.mode,
        snap.market_data.ltp,
        position,
        snap.summary.total_pnl,
        snap.summary.total_trades,
        if snap.ws_connected { "up" } else { "down" },
        gates.can_change_mode,
        gates.can_change_settings,
    );
}
