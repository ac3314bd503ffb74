use std::time::Duration;

mod app;
mod auth;
mod config;
mod error;
mod mailer;
mod otp;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "recruit_auth=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    let addr = app_state.config.server.socket_addr()?;
    let sweep_every = Duration::from_secs(app_state.config.otp.sweep_interval_seconds);
    let sweeper = otp::sweeper::spawn_sweeper(app_state.otp.clone(), sweep_every);

    let result = app::serve(app::build_app(app_state), addr).await;
    sweeper.abort();
    result
}
