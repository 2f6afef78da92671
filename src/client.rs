use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use crate::{
    api::ErrorResponse,
    task::{Task, TaskEvent},
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("error connecting to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url} ({status}): {message}")]
    Response {
        url: String,
        status: StatusCode,
        message: String,
    },
    #[error("error decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error building http client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    /// Whether the request never reached the worker, so it is safe to send it again.
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }
}

/// Http client the manager uses to talk to workers and task health endpoints.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self { http })
    }

    /// Sends `event` to the worker at `worker` and returns the event it accepted.
    #[tracing::instrument(name = "WorkerClient::send_task", skip_all, fields(
        worker = %worker,
        task_id = %event.task.id
    ))]
    pub async fn send_task(&self, worker: &str, event: &TaskEvent) -> Result<TaskEvent, ClientError> {
        let url = format!("http://{worker}/tasks");

        let response = self
            .http
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|source| ClientError::Connection {
                url: url.clone(),
                source,
            })?;

        let response = expect_status(&url, response, StatusCode::CREATED).await?;

        decode(&url, response).await
    }

    #[tracing::instrument(name = "WorkerClient::get_tasks", skip_all, fields(
        worker = %worker
    ))]
    pub async fn get_tasks(&self, worker: &str) -> Result<Vec<Task>, ClientError> {
        let url = format!("http://{worker}/tasks");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Connection {
                url: url.clone(),
                source,
            })?;

        let response = expect_status(&url, response, StatusCode::OK).await?;

        decode(&url, response).await
    }

    #[tracing::instrument(name = "WorkerClient::stop_task", skip_all, fields(
        worker = %worker,
        task_id = %task_id
    ))]
    pub async fn stop_task(&self, worker: &str, task_id: Uuid) -> Result<(), ClientError> {
        let url = format!("http://{worker}/tasks/{task_id}");

        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|source| ClientError::Connection {
                url: url.clone(),
                source,
            })?;

        expect_status(&url, response, StatusCode::NO_CONTENT).await?;

        info!("task has been scheduled to be stopped");

        Ok(())
    }

    /// Succeeds when `url` answers with 200.
    #[tracing::instrument(name = "WorkerClient::health_check", skip_all, fields(
        url = %url
    ))]
    pub async fn health_check(&self, url: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ClientError::Connection {
                url: url.to_owned(),
                source,
            })?;

        expect_status(url, response, StatusCode::OK).await?;

        Ok(())
    }
}

async fn expect_status(
    url: &str,
    response: Response,
    expected: StatusCode,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => error.message,
        Err(_) => body,
    };

    Err(ClientError::Response {
        url: url.to_owned(),
        status,
        message,
    })
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, ClientError> {
    response.json().await.map_err(|source| ClientError::Decode {
        url: url.to_owned(),
        source,
    })
}
