// =============================================================================
// Meridian FX — Main Entry Point
// =============================================================================
//
// The engine starts in GUIDE + SIMULATION for safety. Operators must
// explicitly switch to AUTONOMOUS or a higher-consequence execution mode
// through the API, which enforces the transition rules.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod coordination;
mod error;
mod execution;
mod journal;
mod positions;
mod risk;
mod settings;
mod signals;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::coordination::bus::KNOWN_AGENTS;
use crate::types::{ExecutionMode, Mode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian FX — Starting Up                        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // Frozen ceilings must hold before anything trades.
    risk::constants::verify_hard_caps();
    info!("hard risk caps verified");

    // ── 2. Build shared state ────────────────────────────────────────────
    let settings_path = std::env::var("MERIDIAN_SETTINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("system_settings.json"));
    let sim_seed = std::env::var("MERIDIAN_SIM_SEED")
        .ok()
        .and_then(|s| s.parse::<u64>().ok());

    let state = Arc::new(AppState::new(Some(settings_path), sim_seed));

    // SAFETY: force GUIDE + SIMULATION on startup regardless of what was
    // persisted. Switching back up requires explicit operator action.
    if state.settings.mode() != Mode::Guide {
        if let Err(e) = state
            .settings
            .set_mode(Mode::Guide, Some("system"), Some("startup safety"))
        {
            warn!(error = %e, "failed to force GUIDE mode at startup");
        }
    }
    if state.settings.execution_mode() != ExecutionMode::Simulation {
        state.settings.set_execution_mode(
            ExecutionMode::Simulation,
            Some("system"),
            Some("startup safety"),
        );
    }

    info!(
        mode = %state.settings.mode(),
        execution_mode = %state.settings.execution_mode(),
        "engine starting in SAFE mode (GUIDE + SIMULATION)"
    );

    // ── 3. Connect the default venue ─────────────────────────────────────
    use crate::broker::BrokerAdapter;
    state.simulation.connect().await;
    info!("simulated broker connected");

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 5. Agent heartbeat loop ──────────────────────────────────────────
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        let interval_secs = heartbeat_state
            .settings
            .settings()
            .health_check_interval_seconds;
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            for agent in KNOWN_AGENTS {
                heartbeat_state.health.heartbeat(agent, 0.0);
            }
        }
    });

    // ── 6. Daily risk reset at UTC midnight ──────────────────────────────
    let reset_state = state.clone();
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next_midnight = (now + ChronoDuration::days(1))
                .with_hour(0)
                .and_then(|t| t.with_minute(0))
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now + ChronoDuration::days(1));
            let sleep_secs = (next_midnight - now).num_seconds().max(60) as u64;
            tokio::time::sleep(tokio::time::Duration::from_secs(sleep_secs)).await;

            reset_state.risk_monitor.reset_daily();
            reset_state.increment_version();
            info!("daily risk metrics reset (scheduled)");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    state.simulation.disconnect().await;
    if state.risk_monitor.is_emergency_active() {
        error!("shutting down with emergency shutdown still active");
    }

    info!("Meridian FX shut down complete.");
    Ok(())
}
