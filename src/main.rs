// =============================================================================
// Game Signal Agent: Main Entry Point
// =============================================================================
//
// Listens on the game push channel for live games, fetches recent candles for
// each game's trading pair through the rate-limited cache, and logs the
// resulting LONG/SHORT direction.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod binance;
mod error;
mod market_data;
mod runtime_config;
mod socket;
mod strategy;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::binance::BinanceClient;
use crate::market_data::{CacheSettings, CandleSource, MarketDataCache};
use crate::runtime_config::RuntimeConfig;
use crate::socket::{SocketClient, SocketSettings, WsConnector};
use crate::types::{Direction, GameData, GameMessage};

const CONFIG_PATH: &str = "agent_config.json";

type CandleCache = MarketDataCache<BinanceClient>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Game Signal Agent starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    config.validate().context("invalid configuration")?;

    info!(
        socket_url = %config.socket.url,
        interval = %config.market_data.interval,
        "configuration ready"
    );

    // ── 2. Market data cache ─────────────────────────────────────────────
    let binance = BinanceClient::from_config(&config.market_data);
    let cache: Arc<CandleCache> = Arc::new(MarketDataCache::new(
        binance,
        CacheSettings::from_config(&config.market_data),
    ));

    // ── 3. Game socket ───────────────────────────────────────────────────
    let client = SocketClient::new(
        WsConnector::new(config.socket.url.clone()),
        SocketSettings::from_config(&config.socket),
    );

    let listener_cache = cache.clone();
    let game_listener = client.on_message(move |payload| {
        let game = match serde_json::from_value::<GameMessage>(payload.clone()) {
            Ok(msg) => {
                debug!(kind = %msg.kind, game_id = %msg.data.id, "game frame received");
                msg.data
            }
            Err(e) => {
                debug!(error = %e, "ignoring frame without game data");
                return;
            }
        };
        let cache = listener_cache.clone();
        tokio::spawn(async move {
            process_game(&cache, game).await;
        });
    });

    let mut states = client.subscribe_state();
    let watched = client.clone();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(
                state = %state,
                reconnect_attempts = watched.reconnect_attempts(),
                "game socket state"
            );
        }
    });

    if let Err(e) = client.connect().await {
        warn!(error = %e, "initial connection failed, retrying in background");
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    shutdown_signal().await;
    info!(state = %client.state(), "closing game socket");
    client.remove_listener(game_listener);
    client.shutdown();

    info!("Game Signal Agent shut down complete.");
    Ok(())
}

/// Fetch candles for the game's pair and decide a direction.  A failed fetch
/// skips the game; retrying is left to the next announcement.
async fn process_game<S: CandleSource>(
    cache: &MarketDataCache<S>,
    game: GameData,
) -> Option<Direction> {
    let symbol = game.symbol();
    info!(game_id = %game.id, symbol = %symbol, "processing game");

    let series = match cache.get(&symbol).await {
        Ok(series) => series,
        Err(e) => {
            error!(
                game_id = %game.id,
                symbol = %symbol,
                error = %e,
                rate_limited = e.is_rate_limited(),
                throttled = cache.throttled_until().is_some(),
                "failed to fetch candles"
            );
            return None;
        }
    };

    let decision = strategy::decide(&series);
    match decision {
        Some(direction) => info!(
            game_id = %game.id,
            symbol = %symbol,
            direction = %direction,
            candles = series.len(),
            last_open = ?series.last().and_then(|c| c.open_datetime()),
            "decision reached"
        ),
        None => warn!(
            game_id = %game.id,
            symbol = %symbol,
            candles = series.len(),
            "no decision from candle series"
        ),
    }
    decision
}

/// Resolves on Ctrl+C or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Interrupt received: stopping gracefully"),
        _ = terminate => warn!("Terminate received: stopping gracefully"),
    }
}
