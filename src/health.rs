//! # Health and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/health`: liveness, record counts, engine info
//! - `GET /api/metrics`: per-route request statistics and transcription counters
//!
//! Health still answers when the database is unreachable; the `database`
//! section then reports the error and the overall status becomes `degraded`.

use crate::state::AppState;
use crate::transcription::ModelSize;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let uptime_seconds = state.get_uptime_seconds();

    let (status, database) = match state.service.status_counts().await {
        Ok(counts) => (
            "healthy",
            json!({
                "available": true,
                "total_files": counts.total(),
                "pending": counts.pending,
                "completed": counts.completed,
                "failed": counts.failed
            }),
        ),
        Err(e) => (
            "degraded",
            json!({
                "available": false,
                "error": e.to_string()
            }),
        ),
    };

    let models: Vec<_> = ModelSize::ALL
        .iter()
        .map(|size| {
            json!({
                "name": size.as_str(),
                "size_mb": size.size_mb(),
                "description": size.description()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "database": database,
        "transcription": {
            "engine": state.service.engine_name(),
            "default_model": state.service.default_model(),
            "models": models,
            "active": metrics.active_transcriptions,
            "completed": metrics.transcriptions_completed,
            "failed": metrics.transcriptions_failed
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count)
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "transcriptions": {
            "active": metrics.active_transcriptions,
            "completed": metrics.transcriptions_completed,
            "failed": metrics.transcriptions_failed
        },
        "endpoints": endpoint_stats,
        "limits": {
            "max_upload_bytes": state.config.storage.max_upload_bytes
        }
    }))
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Resident and virtual memory from `/proc/self/status` (Linux only).
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb_field = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": kb_field("VmRSS:"),
                "virtual_memory_bytes": kb_field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

/// Register `/health`, `/api/health` and `/api/metrics`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/api/health", web::get().to(health_check))
        .route("/api/metrics", web::get().to(detailed_metrics));
}
