//! Dashboard: a query form and a JSON prediction endpoint.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::Error;
use crate::inference::{game_df2tensor, get_game_df, make_histogram_spec, predict_start, StartPrediction};
use crate::model::Predictor;
use crate::pipeline::Preprocessors;

#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<dyn Predictor>,
    pub preprocessors: Arc<Preprocessors>,
    pub config: Arc<PipelineConfig>,
    pub db_path: Arc<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct PredictionQuery {
    pub year: i32,
    pub game_pk: i64,
    pub pitcher: i64,
}

#[derive(Serialize, Debug)]
pub struct PredictionResponse {
    pub prediction: StartPrediction,
    pub chart: Value,
}

/// Library errors as HTTP responses with a JSON `error` body.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("prediction failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/prediction", get(prediction))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

fn run_prediction(state: &AppState, q: PredictionQuery) -> crate::Result<PredictionResponse> {
    let pitches = get_game_df(state.db_path.as_path(), q.year, q.game_pk)?;
    let (inputs, pad_diff) = game_df2tensor(pitches, q.game_pk, q.pitcher, &state.preprocessors, &state.config)?;
    let prediction = predict_start(state.predictor.as_ref(), &inputs, pad_diff)?;
    let chart = make_histogram_spec(&prediction);
    Ok(PredictionResponse { prediction, chart })
}

async fn prediction(
    State(state): State<AppState>,
    query: Result<Query<PredictionQuery>, QueryRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Query(q) = query.map_err(|e| Error::InvalidInput(e.body_text()))?;
    info!("prediction request: year={} game_pk={} pitcher={}", q.year, q.game_pk, q.pitcher);
    // SQLite reads and the forward pass block
    let response = tokio::task::spawn_blocking(move || run_prediction(&state, q))
        .await
        .map_err(|e| Error::Model(format!("prediction task failed: {}", e)))??;
    Ok(Json(response))
}
