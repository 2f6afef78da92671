use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    api::{parse_task_id, ApiError},
    stats::Stats,
    task::{State, Task, TaskEvent},
    worker::Worker,
};

pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks).post(start_task))
        .route("/tasks/{task_id}", delete(stop_task))
        .route("/stats", get(get_stats))
        .with_state(worker)
}

#[tracing::instrument(name = "worker_api::serve", skip_all, fields(
    addr = %addr
))]
pub async fn serve(
    addr: SocketAddr,
    worker: Arc<Worker>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("worker api listening");

    axum::serve(listener, router(worker))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[tracing::instrument(name = "worker_api::start_task", skip_all)]
async fn start_task(
    AxumState(worker): AxumState<Arc<Worker>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload?;

    worker
        .add_task(event.task.clone())
        .await
        .map_err(|error| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()))?;

    info!(task_id = %event.task.id, "task added");

    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
    Json(worker.get_tasks().await)
}

#[tracing::instrument(name = "worker_api::stop_task", skip_all, fields(
    task_id = %task_id
))]
async fn stop_task(
    AxumState(worker): AxumState<Arc<Worker>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = parse_task_id(&task_id)?;

    let mut task = worker
        .get_task(&task_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

    task.state = State::Completed;

    worker
        .add_task(task)
        .await
        .map_err(|error| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()))?;

    info!("added task to stop its container");

    Ok(StatusCode::NO_CONTENT)
}

async fn get_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Result<Json<Stats>, ApiError> {
    worker
        .stats()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "stats have not been collected yet"))
}
