use crate::{
    error::ServiceError,
    frame::{BallPoint, PlayerPoint},
    rule::Verdict,
    server::SharedState,
    strategy::StrategyKind,
    upload::UploadError,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub players: Vec<PlayerPoint>,
    pub ball: Option<BallPoint>,
    pub offside: Verdict,
    pub execution_time: f64,
}

async fn handle_upload(
    state: SharedState,
    multipart: Result<Multipart, MultipartRejection>,
    kind: StrategyKind,
) -> Result<Json<UploadResponse>, ServiceError> {
    state.metrics.record_request(kind.as_str());

    // A body that is not a multipart form cannot carry a file part.
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Rejected upload body: {}", rejection);
        UploadError::NoFilePart
    })?;

    let image = state.uploads.receive(&mut multipart).await?;
    let strategy = state.strategies.get(kind);

    let outcome = match strategy.run(&image.path).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.record_failure(kind.as_str(), e.kind());
            return Err(e.into());
        }
    };

    let verdict = outcome.evaluation.verdict;
    state.metrics.record_detection_duration(
        (outcome.execution_time * 1_000.0) as u64,
        strategy.kind().as_str(),
    );
    state
        .metrics
        .record_verdict(strategy.kind().as_str(), verdict.as_str());

    tracing::info!(
        filename = %image.filename,
        players = outcome.evaluation.points.players.len(),
        verdict = verdict.as_str(),
        execution_time = outcome.execution_time,
        "Frame evaluated"
    );

    Ok(Json(UploadResponse {
        filename: image.filename,
        players: outcome.evaluation.points.players,
        ball: outcome.evaluation.points.ball,
        offside: verdict,
        execution_time: outcome.execution_time,
    }))
}

#[instrument(skip(state, multipart))]
pub async fn upload_direct(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServiceError> {
    handle_upload(state, multipart, StrategyKind::Direct).await
}

#[instrument(skip(state, multipart))]
pub async fn upload_isolated(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServiceError> {
    handle_upload(state, multipart, StrategyKind::Isolated).await
}

#[instrument(skip(state, multipart))]
pub async fn upload_queued(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServiceError> {
    handle_upload(state, multipart, StrategyKind::Queued).await
}
