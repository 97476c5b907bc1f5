mod backend;
mod config;
mod dashboard;
mod db;
mod error;
mod handlers;
mod models;
mod notifications;
mod push;
mod state;
#[cfg(test)]
mod testing;
mod worker;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode, Uri},
    routing::{delete, get, get_service, post},
};
use dotenvy::dotenv;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use web_push::WebPushClient;

use crate::{
    backend::HttpBackend,
    config::Config,
    dashboard::{ControllerSettings, DashboardController},
    db::SubscriptionStore,
    handlers::{
        config as config_handler, create_trigger, delete_trigger, dismiss_notice, health,
        notification_click, push as push_handler, refresh, report_permission, status, subscribe,
        sync, test_notification, unsubscribe, view,
    },
    models::TRACKED_USERNAME,
    notifications::{BrowserHost, NotificationHost},
    push::PushRelay,
    state::AppState,
};

const WORKER_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Arc::new(Config::from_env()?);
    ensure_secure_base_url(&cfg.public_base_url)?;

    let store = Arc::new(SubscriptionStore::open(&cfg.db_path)?);
    let push_client = WebPushClient::new().map_err(|err| anyhow::anyhow!(err))?;
    let relay = Arc::new(PushRelay::new(store.clone(), cfg.clone(), push_client));
    let host: Arc<dyn NotificationHost> = Arc::new(BrowserHost::new(relay.clone()));
    let backend = Arc::new(HttpBackend::new(&cfg.backend_url, cfg.backend_timeout)?);

    let (worker, worker_task) = worker::spawn(relay, WORKER_QUEUE);
    let controller = Arc::new(
        DashboardController::new(
            backend,
            host.clone(),
            ControllerSettings {
                username: TRACKED_USERNAME.to_string(),
                refresh_interval: cfg.refresh_interval,
                test_notification_ttl: cfg.test_notification_ttl,
            },
        )
        .with_worker(worker.clone()),
    );
    controller.mount().await;
    worker.wait_active().await?;
    info!("notification worker active");

    // Background cleanup for stale browser subscriptions.
    if cfg.subscription_ttl_days > 0 {
        let store = store.clone();
        let ttl_days = cfg.subscription_ttl_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::days(ttl_days);
                match store.purge_older_than(cutoff) {
                    Ok(0) => {}
                    Ok(removed) => info!("removed {removed} expired subscriptions"),
                    Err(err) => error!("cleanup failed: {err}"),
                }
            }
        });
    }

    let cors = if cfg.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins = cfg
            .cors_origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin))
            .collect::<Result<Vec<_>, _>>()?;
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let state = AppState {
        cfg: cfg.clone(),
        controller: controller.clone(),
        host,
        worker,
        store,
    };

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/config", get(config_handler))
        .route("/api/view", get(view))
        .route("/api/refresh", post(refresh))
        .route("/api/triggers", post(create_trigger))
        .route("/api/triggers/:id", delete(delete_trigger))
        .route("/api/notifications/permission", post(report_permission))
        .route("/api/notifications/test", post(test_notification))
        .route("/api/notifications/click", post(notification_click))
        .route("/api/notices/:id", delete(dismiss_notice))
        .route("/api/sync/:tag", post(sync))
        // Keep subscription payloads small (PushSubscription JSON).
        .route(
            "/api/subscribe",
            post(subscribe).layer(DefaultBodyLimit::max(8 * 1024)),
        )
        .route("/api/subscribe/:id", delete(unsubscribe))
        .route(
            "/push",
            post(push_handler).layer(DefaultBodyLimit::max(cfg.max_push_payload_bytes)),
        )
        .layer(cors)
        .with_state(state);

    if cfg.serve_frontend {
        let static_dir = cfg.static_dir.clone();

        app = app
            // Serve service worker at root scope.
            .route(
                "/sw.js",
                get_service(ServeFile::new(format!("{static_dir}/sw.js"))).handle_error(
                    |err| async move {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("static file error: {err}"),
                        )
                    },
                ),
            )
            .route(
                "/",
                get_service(ServeFile::new(format!("{static_dir}/index.html"))).handle_error(
                    |err| async move {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("static file error: {err}"),
                        )
                    },
                ),
            )
            .nest_service(
                "/static",
                ServeDir::new(&static_dir).append_index_html_on_directories(true),
            );
    }

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.unmount();
    // Dropping the last handles lets the worker drain its queue and stop.
    drop(controller);
    if let Err(err) = worker_task.await {
        error!("notification worker panicked: {err}");
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn ensure_secure_base_url(value: &str) -> anyhow::Result<()> {
    let uri: Uri = value
        .parse()
        .map_err(|_| anyhow::anyhow!("PUBLIC_BASE_URL is not a valid URL"))?;

    let host = uri.host().unwrap_or("");
    let is_localhost = matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]");
    let scheme = uri.scheme_str().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("https") && !is_localhost {
        anyhow::bail!("PUBLIC_BASE_URL must be https for non-localhost deployments");
    }

    Ok(())
}
