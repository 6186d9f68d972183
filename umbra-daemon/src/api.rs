#![forbid(unsafe_code)]

//! Admin API: mode switching, per-path probability edits and offline
//! training stats. Runs on its own port next to the data plane.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use umbra_filters::PathProbabilityRule;

use crate::mode::DimmingMode;
use crate::server::Server;

#[derive(Debug, Deserialize)]
struct SetModeRequest {
    mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProbabilityEntry {
    path: String,
    probability: f64,
}

pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/mode", get(current_mode).post(set_mode))
        .route(
            "/probabilities",
            get(list_probabilities)
                .post(set_probabilities)
                .delete(clear_probabilities),
        )
        .route("/training/stats", get(offline_training_stats))
        .with_state(server)
}

async fn current_mode(State(server): State<Arc<Server>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "mode": server.mode().to_string(),
            "dimming_percentage": server.dimming_percentage(),
        })),
    )
}

async fn set_mode(
    State(server): State<Arc<Server>>,
    Json(body): Json<SetModeRequest>,
) -> (StatusCode, Json<Value>) {
    let mode = if body.mode == "Default" {
        server.default_mode()
    } else {
        match body.mode.parse::<DimmingMode>() {
            Ok(mode) => mode,
            Err(err) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": err.to_string() })),
                );
            }
        }
    };

    match server.set_mode(mode).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "mode set" }))),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

async fn list_probabilities(State(server): State<Arc<Server>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "probabilities": server.list_path_probabilities() })),
    )
}

async fn set_probabilities(
    State(server): State<Arc<Server>>,
    Json(entries): Json<Vec<ProbabilityEntry>>,
) -> (StatusCode, Json<Value>) {
    let rules: Vec<PathProbabilityRule> = entries
        .into_iter()
        .map(|entry| PathProbabilityRule {
            path: entry.path,
            probability: entry.probability,
        })
        .collect();

    match server.update_path_probabilities(&rules) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "probabilities set" }))),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        ),
    }
}

async fn clear_probabilities(State(server): State<Arc<Server>>) -> (StatusCode, Json<Value>) {
    server.clear_path_probabilities();
    (StatusCode::OK, Json(json!({ "status": "probabilities cleared" })))
}

async fn offline_training_stats(State(server): State<Arc<Server>>) -> (StatusCode, Json<Value>) {
    let aggregation = server.offline_training_metrics();
    (
        StatusCode::OK,
        Json(json!({
            "p50": aggregation.p50.as_secs_f64(),
            "p75": aggregation.p75.as_secs_f64(),
            "p95": aggregation.p95.as_secs_f64(),
        })),
    )
}
