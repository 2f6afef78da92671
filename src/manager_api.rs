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
    manager::Manager,
    task::{State, Task, TaskEvent},
};

pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks).post(start_task))
        .route("/tasks/{task_id}", delete(stop_task))
        .with_state(manager)
}

#[tracing::instrument(name = "manager_api::serve", skip_all, fields(
    addr = %addr
))]
pub async fn serve(
    addr: SocketAddr,
    manager: Arc<Manager>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("manager api listening");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[tracing::instrument(name = "manager_api::start_task", skip_all)]
async fn start_task(
    AxumState(manager): AxumState<Arc<Manager>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload?;

    manager
        .add_task(event.clone())
        .map_err(|error| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()))?;

    info!(task_id = %event.task.id, "task added");

    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_tasks(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Task>> {
    Json(manager.get_tasks().await)
}

#[tracing::instrument(name = "manager_api::stop_task", skip_all, fields(
    task_id = %task_id
))]
async fn stop_task(
    AxumState(manager): AxumState<Arc<Manager>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = parse_task_id(&task_id)?;

    let mut task = manager
        .get_task(&task_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

    task.state = State::Completed;

    let event = TaskEvent::new(State::Completed, task);

    manager
        .add_task(event)
        .map_err(|error| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()))?;

    info!("added task to stop its container");

    Ok(StatusCode::NO_CONTENT)
}
