// src/api.rs
//! HTTP surface for the external dashboard. Thin: every handler delegates to
//! the scheduler, the collector or the health registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use crate::ingest::health::HealthSnapshot;
use crate::ingest::scheduler::{FamilyStatus, Scheduler, DEFAULT_INTERVAL};
use crate::ingest::summary::CollectionRunSummary;
use crate::ingest::types::SourceFamily;
use crate::notify::BroadcastPublisher;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<BroadcastPublisher>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, events: Arc<BroadcastPublisher>) -> Self {
        Self { scheduler, events }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/collect/{family}", post(collect))
        .route("/api/auto/{family}/start", post(auto_start))
        .route("/api/auto/{family}/stop", post(auto_stop))
        .route("/api/status/{family}", get(status))
        .route("/api/status/{family}/reset", post(reset))
        .route("/api/sources", get(sources))
        .route("/api/stats", get(stats))
        .route("/api/events", get(events))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Rejection for an unknown `{family}` path segment.
pub struct BadFamily(String);

impl IntoResponse for BadFamily {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0 }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

fn family(raw: &str) -> Result<SourceFamily, BadFamily> {
    raw.parse::<SourceFamily>().map_err(|e| BadFamily(e.to_string()))
}

#[derive(Serialize)]
struct CollectResp {
    #[serde(flatten)]
    summary: CollectionRunSummary,
    new_count: usize,
    lines: Vec<String>,
}

async fn collect(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<CollectResp>, BadFamily> {
    let family = family(&raw)?;
    state
        .events
        .log(format!("Manual {} collection started", family.as_str().to_uppercase()));
    let summary = state.scheduler.collect_now(family).await;
    Ok(Json(CollectResp {
        new_count: summary.new_count(),
        lines: summary.lines(),
        summary,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct StartReq {
    #[serde(default)]
    interval_secs: Option<u64>,
}

#[derive(Serialize)]
struct StartStopResp {
    changed: bool,
    status: FamilyStatus,
}

async fn auto_start(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    req: Option<Json<StartReq>>,
) -> Result<Json<StartStopResp>, BadFamily> {
    let family = family(&raw)?;
    // no body: default interval
    let interval = req
        .and_then(|Json(r)| r.interval_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_INTERVAL);
    let changed = state.scheduler.start(family, interval);
    if changed {
        state.events.log(format!(
            "Auto {} collection started (every {}s)",
            family.as_str().to_uppercase(),
            interval.as_secs().max(1)
        ));
    }
    Ok(Json(StartStopResp {
        changed,
        status: state.scheduler.status(family),
    }))
}

async fn auto_stop(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<StartStopResp>, BadFamily> {
    let family = family(&raw)?;
    let changed = state.scheduler.stop(family);
    if changed {
        state.events.log(format!(
            "Auto {} collection stopped",
            family.as_str().to_uppercase()
        ));
    }
    Ok(Json(StartStopResp {
        changed,
        status: state.scheduler.status(family),
    }))
}

async fn status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<FamilyStatus>, BadFamily> {
    let family = family(&raw)?;
    Ok(Json(state.scheduler.status(family)))
}

async fn reset(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<FamilyStatus>, BadFamily> {
    let family = family(&raw)?;
    state.scheduler.reset_new_count(family);
    Ok(Json(state.scheduler.status(family)))
}

async fn sources(State(state): State<AppState>) -> Json<Vec<HealthSnapshot>> {
    let health = state.scheduler.collector().health();
    Json(health.snapshot(None, Utc::now()))
}

#[derive(Serialize)]
struct BackupFileStat {
    family: SourceFamily,
    file: String,
    count: usize,
}

#[derive(Serialize)]
struct StatsResp {
    backup_dir: Option<String>,
    files: Vec<BackupFileStat>,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResp> {
    let collector = state.scheduler.collector();
    let Some(backup) = collector.backup() else {
        return Json(StatsResp {
            backup_dir: None,
            files: Vec::new(),
        });
    };

    let mut files = Vec::new();
    for family in SourceFamily::ALL {
        for file in collector.backup_files(family) {
            let count = backup.count(&file).await;
            files.push(BackupFileStat {
                family,
                file,
                count,
            });
        }
    }
    Json(StatsResp {
        backup_dir: Some(backup.dir().display().to_string()),
        files,
    })
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, shuttle_axum::axum::Error>>> {
    let rx = state.events.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => return Some((Event::default().json_data(&ev), rx)),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
