//! Health, metrics and status HTTP surface.
//!
//! `/healthz` aggregates reachability of the store, the object store, the
//! broker and the worker (via its status file). `/metrics` serves the
//! Prometheus exposition; `/status` adds a configuration snapshot.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info};

use teltubby_protocol::metrics::METRICS;
use teltubby_protocol::{now_iso, StatusFile};

use crate::context::AppContext;

pub async fn serve(ctx: Arc<AppContext>) -> anyhow::Result<JoinHandle<()>> {
    let host = if ctx.config.bind_health_localhost_only {
        [127, 0, 0, 1]
    } else {
        [0, 0, 0, 0]
    };
    let addr = SocketAddr::from((host, ctx.config.health_port));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health surface listening on {addr}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("health server stopped: {e}");
        }
    }))
}

async fn healthz(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(health_snapshot(&ctx).await)
}

async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.prometheus_format(),
    )
}

async fn status(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let config = &ctx.config;
    Json(json!({
        "timestamp": now_iso(),
        "system": {
            "config": {
                "telegram_mode": config.telegram_mode,
                "album_aggregation_window_seconds": config.album_aggregation_window_seconds,
                "max_file_gb": config.max_file_gb,
                "bot_api_max_file_size_bytes": config.bot_api_max_file_size_bytes,
                "concurrency": config.effective_concurrency(),
                "dedup_enabled": config.dedup_enable,
            },
            "storage": {
                "endpoint": config.s3_endpoint,
                "bucket": config.s3_bucket,
                "region": config.s3_region,
                "force_path_style": config.s3_force_path_style,
            },
            "queue": {
                "host": config.rabbitmq_host,
                "port": config.rabbitmq_port,
                "job_queue": config.job_queue_name,
                "dead_letter_queue": config.job_dead_letter_queue,
            },
            "mtproto": {
                "api_id_configured": config.mtproto_api_id != 0,
                "api_hash_configured": config.mtproto_api_hash.is_some(),
                "phone_configured": config.mtproto_phone_number.is_some(),
                "session_path": config.mtproto_session_path,
            },
        },
        "health": health_snapshot(&ctx).await,
    }))
}

async fn health_snapshot(ctx: &AppContext) -> Value {
    let mut overall_healthy = true;

    let database = match ctx.db.ping().await {
        Ok(()) => json!({"status": "healthy", "path": ctx.config.sqlite_path}),
        Err(e) => {
            overall_healthy = false;
            json!({"status": "unhealthy", "error": e.to_string()})
        }
    };

    let storage = match ctx.bucket.ensure_bucket().await {
        Ok(()) => json!({"status": "healthy", "endpoint": ctx.config.s3_endpoint}),
        Err(e) => {
            overall_healthy = false;
            json!({"status": "unhealthy", "error": e.to_string()})
        }
    };

    let broker = match ctx.queue.depth().await {
        Ok(depth) => json!({
            "status": "healthy",
            "queue": {"name": ctx.config.job_queue_name, "messages": depth},
        }),
        Err(e) => {
            overall_healthy = false;
            json!({"status": "unhealthy", "error": e.to_string()})
        }
    };

    let worker = match StatusFile::read(Path::new(&ctx.config.worker_status_path)) {
        Some(status) => json!({
            "status": status.state.as_str(),
            "authorized": status.authorized,
            "jobs_completed": status.jobs_completed,
            "jobs_failed": status.jobs_failed,
            "updated_at": status.updated_at,
        }),
        None => json!({"status": "unknown", "error": "status file not found"}),
    };

    json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "timestamp": now_iso(),
        "database": database,
        "storage": storage,
        "rabbitmq": broker,
        "mtproto_worker": worker,
    })
}
