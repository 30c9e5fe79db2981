use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use yoyaku_api::middleware::require_auth;
use yoyaku_api::{auth, cron, customers, liff, link, reminders, reservations, stores, webhook};
use yoyaku_api::{ApiConfig, AppState, AppStateInner};
use yoyaku_line::LineClient;
use yoyaku_reminder::{dispatch, outbox};

const REMINDER_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const OUTBOX_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yoyaku=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("YOYAKU_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("YOYAKU_DB_PATH").unwrap_or_else(|_| "yoyaku.db".into());
    let host = std::env::var("YOYAKU_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("YOYAKU_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let access_token = std::env::var("LINE_CHANNEL_ACCESS_TOKEN").unwrap_or_default();
    let channel_secret = std::env::var("LINE_CHANNEL_SECRET").unwrap_or_default();
    let liff_id = std::env::var("LIFF_ID").unwrap_or_default();
    let cron_secret = std::env::var("YOYAKU_CRON_SECRET").ok();

    if access_token.is_empty() || channel_secret.is_empty() {
        warn!("LINE credentials are not configured; pushes and webhooks will fail");
    }

    // Init database
    let db = Arc::new(yoyaku_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        line: LineClient::new(access_token),
        config: ApiConfig {
            jwt_secret,
            channel_secret,
            liff_id,
            cron_secret,
        },
    });

    spawn_sweeps(state.clone());

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/link/confirm", post(link::confirm))
        .route("/liff/reservations", get(liff::reservations))
        .route("/liff/reservations/cancel", post(liff::cancel))
        .route("/liff/reservations/request-change", post(liff::request_change))
        .route("/line/webhook", post(webhook::receive))
        .route("/cron/reminders", post(cron::reminders))
        .route("/cron/outbox", post(cron::outbox_sweep))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/stores/me", get(stores::me))
        .route("/reservations", get(reservations::list))
        .route("/reservations", post(reservations::create))
        .route("/reservations/{id}", patch(reservations::update))
        .route("/reservations/{id}/cancel", post(reservations::cancel))
        .route("/reservations/{id}/link-token", post(reservations::issue_link_token))
        .route("/customers/{id}", get(customers::detail))
        .route("/reminders/overview", get(reminders::overview))
        .route("/reminders/customers", get(reminders::customers))
        .route("/reminders/stats", get(reminders::stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Yoyaku server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// In-process schedules for the reminder dispatch and outbox sweeps. The
/// cron endpoints drive the same code paths for external schedulers.
fn spawn_sweeps(state: AppState) {
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REMINDER_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                match dispatch::run_reminder_sweep(&state.db, &state.line, Utc::now()).await {
                    Ok(report) => {
                        if report.sent > 0 || report.failed > 0 {
                            info!("reminder sweep: {} sent, {} failed", report.sent, report.failed);
                        }
                    }
                    Err(e) => warn!("reminder sweep failed: {:#}", e),
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(OUTBOX_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match outbox::sweep(&state.db, &state.line, Utc::now()).await {
                Ok(report) => {
                    if report.sent > 0 || report.failed > 0 {
                        info!("outbox sweep: {} sent, {} failed", report.sent, report.failed);
                    }
                }
                Err(e) => warn!("outbox sweep failed: {:#}", e),
            }
        }
    });
}
