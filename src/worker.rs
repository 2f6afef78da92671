use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::{collections::HashMap, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use sysinfo::{System, SystemExt};
use tokio::{
    select,
    sync::{Mutex, RwLock},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    docker::{DockerRuntime, DEFAULT_DOCKER_URI},
    runtime::{ContainerConfig, Runtime, RuntimeError, RuntimeOutput},
    stats::Stats,
    task::{valid_state_transition, State, Task},
    work_queue::{WorkQueue, WorkQueueError},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub name: String,
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
}

#[derive(Debug, Deserialize)]
pub struct DockerConfig {
    pub uri: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_DOCKER_URI.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub run_tasks_secs: u64,
    pub update_tasks_secs: u64,
    pub collect_stats_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            run_tasks_secs: 10,
            update_tasks_secs: 15,
            collect_stats_secs: 15,
        }
    }
}

impl Config {
    #[tracing::instrument(name = "worker::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref())
            .await
            .context("reading worker config")?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunTaskError {
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition { task_id: Uuid, from: State, to: State },
    #[error("unreachable code: task {task_id} was queued with state {state}")]
    Unreachable { task_id: Uuid, state: State },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Runs as a daemon on every node. Executes the tasks sent by the manager
/// and keeps their recorded state in line with the runtime.
pub struct Worker {
    name: String,
    /// Tasks waiting to be started or stopped.
    queue: WorkQueue<Task>,
    /// Every task this worker has seen, keyed by id.
    db: RwLock<HashMap<Uuid, Task>>,
    stats: RwLock<Option<Stats>>,
    system: Mutex<System>,
    runtime: Arc<dyn Runtime>,
}

impl Worker {
    pub fn new(name: impl Into<String>, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            name: name.into(),
            queue: WorkQueue::new(),
            db: RwLock::new(HashMap::new()),
            stats: RwLock::new(None),
            system: Mutex::new(System::new()),
            runtime,
        }
    }

    /// Connects to docker and spawns the worker background loops.
    #[tracing::instrument(name = "Worker::start", skip_all, fields(
        config = ?config
    ))]
    pub fn start(config: &Config, shutdown: CancellationToken) -> Result<Arc<Self>> {
        info!("starting worker control loops");

        let runtime = DockerRuntime::new(&config.docker.uri).context("connecting to docker")?;
        let worker = Arc::new(Self::new(config.name.clone(), Arc::new(runtime)));

        let intervals = &config.intervals;

        tokio::spawn({
            let worker = Arc::clone(&worker);
            let period = Duration::from_secs(intervals.run_tasks_secs);
            let shutdown = shutdown.clone();
            async move { worker.run_tasks(period, shutdown).await }
        });

        tokio::spawn({
            let worker = Arc::clone(&worker);
            let period = Duration::from_secs(intervals.update_tasks_secs);
            let shutdown = shutdown.clone();
            async move { worker.reconcile_tasks(period, shutdown).await }
        });

        tokio::spawn({
            let worker = Arc::clone(&worker);
            let period = Duration::from_secs(intervals.collect_stats_secs);
            async move { worker.collect_stats(period, shutdown).await }
        });

        Ok(worker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `task` to be moved to its state by the task runner.
    #[tracing::instrument(name = "Worker::add_task", skip_all, fields(
        task_id = %task.id,
        state = %task.state
    ))]
    pub async fn add_task(&self, mut task: Task) -> Result<(), WorkQueueError> {
        let now = Utc::now();
        if !self.db.read().await.contains_key(&task.id) {
            task.created_at = now;
        }
        task.updated_at = now;

        self.queue.append(task)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn get_task(&self, task_id: &Uuid) -> Option<Task> {
        self.db.read().await.get(task_id).cloned()
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.db.read().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    pub async fn stats(&self) -> Option<Stats> {
        self.stats.read().await.clone()
    }

    async fn persist(&self, task: Task) {
        self.db.write().await.insert(task.id, task);
    }

    /// Takes the oldest task off the queue and moves it to its queued state.
    ///
    /// Returns `Ok(None)` when there was nothing to do.
    #[tracing::instrument(name = "Worker::run_task", skip_all, fields(worker = %self.name))]
    pub async fn run_task(&self) -> Result<Option<RuntimeOutput>, RunTaskError> {
        let queued = match self.queue.next().await {
            None => {
                info!("queue is empty");
                return Ok(None);
            }
            Some(v) => v,
        };

        let persisted = self
            .db
            .write()
            .await
            .entry(queued.id)
            .or_insert_with(|| queued.clone())
            .clone();

        // A restart from the manager carries a higher restart count and starts a
        // new incarnation of the task.
        let is_new_incarnation = queued.restart_count > persisted.restart_count;
        let current = if is_new_incarnation {
            State::Pending
        } else {
            persisted.state
        };

        if !valid_state_transition(current, queued.state) {
            return Err(RunTaskError::InvalidTransition {
                task_id: queued.id,
                from: current,
                to: queued.state,
            });
        }

        match queued.state {
            State::Scheduled => {
                if is_new_incarnation {
                    self.remove_previous_container(&persisted).await;
                }
                self.start_task(queued).await.map(Some)
            }
            State::Completed => self.stop_task(queued).await.map(Some),
            state => Err(RunTaskError::Unreachable {
                task_id: queued.id,
                state,
            }),
        }
    }

    async fn remove_previous_container(&self, previous: &Task) {
        let Some(container_id) = previous.container_id.as_deref() else {
            return;
        };

        // Stopping already removed it.
        if previous.state == State::Completed {
            return;
        }

        info!(%container_id, task_id = %previous.id, "removing container of previous incarnation");

        if let Err(error) = self.runtime.stop(container_id).await {
            warn!(?error, %container_id, "unable to remove previous container");
        }
    }

    #[tracing::instrument(name = "Worker::start_task", skip_all, fields(
        task_id = %task.id,
        image = %task.image
    ))]
    pub async fn start_task(&self, mut task: Task) -> Result<RuntimeOutput, RunTaskError> {
        let now = Utc::now();
        task.started_at = Some(now);
        task.updated_at = now;

        let config = ContainerConfig::from(&task);

        match self.runtime.run(&config).await {
            Err(error) => {
                error!(?error, "unable to run task");
                task.state = State::Failed;
                task.container_id = None;
                task.host_ports.clear();
                self.persist(task).await;
                Err(error.into())
            }
            Ok(output) => {
                info!(container_id = %output.container_id, "task is running");
                task.container_id = Some(output.container_id.clone());
                task.state = State::Running;
                self.persist(task).await;
                Ok(output)
            }
        }
    }

    /// Stops the task's container and records the task as completed even if
    /// the runtime could not stop it.
    #[tracing::instrument(name = "Worker::stop_task", skip_all, fields(
        task_id = %task.id,
        container_id = ?task.container_id
    ))]
    pub async fn stop_task(&self, mut task: Task) -> Result<RuntimeOutput, RunTaskError> {
        let result = match task.container_id.as_deref() {
            Some(container_id) => self.runtime.stop(container_id).await,
            None => Err(RuntimeError::MissingContainerId),
        };

        if let Err(error) = &result {
            error!(?error, "unable to stop container");
        }

        let now = Utc::now();
        task.finished_at = Some(now);
        task.updated_at = now;
        task.state = State::Completed;
        task.host_ports.clear();
        self.persist(task).await;

        info!("task completed");

        result.map_err(RunTaskError::from)
    }

    /// Compares every running task against what the runtime reports and
    /// marks the ones whose container is gone or has exited as failed.
    #[tracing::instrument(name = "Worker::update_tasks", skip_all, fields(worker = %self.name))]
    pub async fn update_tasks(&self) {
        let running: Vec<(Uuid, Option<String>)> = self
            .db
            .read()
            .await
            .values()
            .filter(|task| task.state == State::Running)
            .map(|task| (task.id, task.container_id.clone()))
            .collect();

        for (task_id, container_id) in running {
            let status = match container_id.as_deref() {
                Some(container_id) => self.runtime.inspect(container_id).await,
                None => Err(RuntimeError::MissingContainerId),
            };

            let mut db = self.db.write().await;
            let task = match db.get_mut(&task_id) {
                Some(task) if task.state == State::Running && task.container_id == container_id => {
                    task
                }
                // Moved on while the runtime was being inspected.
                _ => continue,
            };

            match status {
                Err(error) => {
                    warn!(?error, %task_id, "no container for running task");
                    task.state = State::Failed;
                    task.host_ports.clear();
                }
                Ok(status) if status.has_exited() => {
                    warn!(%task_id, "container has exited");
                    task.state = State::Failed;
                    task.host_ports.clear();
                }
                Ok(status) => {
                    task.host_ports = status.ports;
                }
            }

            task.touch();
        }
    }

    #[tracing::instrument(name = "Worker::refresh_stats", skip_all)]
    pub async fn refresh_stats(&self) {
        let task_count = self
            .db
            .read()
            .await
            .values()
            .filter(|task| task.state == State::Running)
            .count();

        let stats = {
            let mut system = self.system.lock().await;
            Stats::collect(&mut system, task_count)
        };

        *self.stats.write().await = Some(stats);
    }

    #[tracing::instrument(name = "Worker::run_tasks", skip_all, fields(worker = %self.name))]
    pub async fn run_tasks(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping task runner");
                    return;
                },
                _ = interval.tick() => {
                    if self.queue.is_empty().await {
                        info!("no tasks to process currently");
                        continue;
                    }

                    if let Err(error) = self.run_task().await {
                        error!(?error, "error running task");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "Worker::reconcile_tasks", skip_all, fields(worker = %self.name))]
    pub async fn reconcile_tasks(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping task reconciliation");
                    return;
                },
                _ = interval.tick() => {
                    info!("checking status of tasks");
                    self.update_tasks().await;
                }
            }
        }
    }

    #[tracing::instrument(name = "Worker::collect_stats", skip_all, fields(worker = %self.name))]
    pub async fn collect_stats(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping stats collection");
                    return;
                },
                _ = interval.tick() => {
                    info!("collecting stats");
                    self.refresh_stats().await;
                }
            }
        }
    }
}
