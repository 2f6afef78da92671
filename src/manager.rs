use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    select,
    sync::{Mutex, RwLock},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    client::{ClientError, WorkerClient},
    node::Node,
    scheduler::{self, Scheduler, SchedulerKind, SelectWorkerError},
    task::{valid_state_transition, State, Task, TaskEvent},
    work_queue::{WorkQueue, WorkQueueError},
};

/// Tasks that failed this many times are left alone.
pub const MAX_RESTARTS: u32 = 3;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Worker api addresses, `host:port`.
    pub workers: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerKind,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub send_work_secs: u64,
    pub update_tasks_initial_delay_secs: u64,
    pub update_tasks_secs: u64,
    pub health_check_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            send_work_secs: 10,
            update_tasks_initial_delay_secs: 10,
            update_tasks_secs: 15,
            health_check_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl Config {
    #[tracing::instrument(name = "manager::Config::from_file", skip_all, fields(
        file_path = ?file_path.as_ref()
    ))]
    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref())
            .await
            .context("reading manager config")?;

        let config: Config = serde_yaml::from_str(&file_contents)?;

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("task {0} is not assigned to a worker")]
    Unassigned(Uuid),
    #[error("task {0} has no host port bindings")]
    NoHostPort(Uuid),
    #[error("invalid worker address format: {0}")]
    InvalidWorkerAddress(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Which worker runs which task. Both maps are always updated together.
#[derive(Debug, Default)]
struct Assignments {
    worker_tasks: HashMap<String, Vec<Uuid>>,
    task_workers: HashMap<Uuid, String>,
}

impl Assignments {
    fn new(workers: &[String]) -> Self {
        Self {
            worker_tasks: workers
                .iter()
                .map(|worker| (worker.clone(), Vec::new()))
                .collect(),
            task_workers: HashMap::new(),
        }
    }

    fn assign(&mut self, task_id: Uuid, worker: &str) {
        if let Some(previous) = self.task_workers.insert(task_id, worker.to_owned()) {
            if previous != worker {
                if let Some(tasks) = self.worker_tasks.get_mut(&previous) {
                    tasks.retain(|id| *id != task_id);
                }
            }
        }

        let tasks = self.worker_tasks.entry(worker.to_owned()).or_default();
        if !tasks.contains(&task_id) {
            tasks.push(task_id);
        }
    }

    fn worker_for(&self, task_id: &Uuid) -> Option<&String> {
        self.task_workers.get(task_id)
    }
}

/// Control plane. Accepts tasks, places them on workers and keeps them alive.
pub struct Manager {
    /// Events waiting to be dispatched to a worker.
    pending: WorkQueue<TaskEvent>,
    /// The manager's merged view of every task.
    task_db: RwLock<HashMap<Uuid, Task>>,
    /// Every event a worker accepted.
    event_db: RwLock<HashMap<Uuid, TaskEvent>>,
    workers: Vec<String>,
    /// One node per worker, in the same order as `workers`.
    nodes: Vec<Node>,
    assignments: Mutex<Assignments>,
    scheduler: Mutex<Box<dyn Scheduler>>,
    client: WorkerClient,
}

impl Manager {
    #[tracing::instrument(name = "Manager::new", skip_all, fields(
        workers = ?workers
    ))]
    pub fn new(workers: Vec<String>, scheduler: Box<dyn Scheduler>, client: WorkerClient) -> Self {
        let nodes = workers
            .iter()
            .map(|worker| Node::from_worker_address(worker))
            .collect();

        Self {
            pending: WorkQueue::new(),
            task_db: RwLock::new(HashMap::new()),
            event_db: RwLock::new(HashMap::new()),
            assignments: Mutex::new(Assignments::new(&workers)),
            workers,
            nodes,
            scheduler: Mutex::new(scheduler),
            client,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = WorkerClient::new(Duration::from_secs(config.http.timeout_secs))?;

        Ok(Self::new(
            config.workers.clone(),
            config.scheduler.build(),
            client,
        ))
    }

    /// Builds the manager and spawns its background loops.
    #[tracing::instrument(name = "Manager::start", skip_all, fields(
        config = ?config
    ))]
    pub fn start(config: &Config, shutdown: CancellationToken) -> Result<Arc<Self>> {
        info!("starting manager control loops");

        let manager = Arc::new(Self::from_config(config)?);
        let intervals = &config.intervals;

        tokio::spawn({
            let manager = Arc::clone(&manager);
            let period = Duration::from_secs(intervals.send_work_secs);
            let shutdown = shutdown.clone();
            async move { manager.process_tasks(period, shutdown).await }
        });

        tokio::spawn({
            let manager = Arc::clone(&manager);
            let initial_delay = Duration::from_secs(intervals.update_tasks_initial_delay_secs);
            let period = Duration::from_secs(intervals.update_tasks_secs);
            let shutdown = shutdown.clone();
            async move {
                manager
                    .poll_task_updates(initial_delay, period, shutdown)
                    .await
            }
        });

        tokio::spawn({
            let manager = Arc::clone(&manager);
            let period = Duration::from_secs(intervals.health_check_secs);
            async move { manager.run_health_checks(period, shutdown).await }
        });

        Ok(manager)
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[tracing::instrument(name = "Manager::add_task", skip_all, fields(
        event_id = %event.id,
        task_id = %event.task.id,
        state = %event.state
    ))]
    pub fn add_task(&self, event: TaskEvent) -> Result<(), WorkQueueError> {
        self.pending.append(event)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.len().await
    }

    pub async fn get_task(&self, task_id: &Uuid) -> Option<Task> {
        self.task_db.read().await.get(task_id).cloned()
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.task_db.read().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    pub async fn get_event(&self, event_id: &Uuid) -> Option<TaskEvent> {
        self.event_db.read().await.get(event_id).cloned()
    }

    /// The worker `task_id` was last dispatched to.
    pub async fn worker_for(&self, task_id: &Uuid) -> Option<String> {
        self.assignments.lock().await.worker_for(task_id).cloned()
    }

    /// Ids of the tasks dispatched to `worker`, oldest first.
    pub async fn tasks_for(&self, worker: &str) -> Vec<Uuid> {
        self.assignments
            .lock()
            .await
            .worker_tasks
            .get(worker)
            .cloned()
            .unwrap_or_default()
    }

    #[tracing::instrument(name = "Manager::select_worker", skip_all, fields(
        task_id = %task.id
    ))]
    pub async fn select_worker(&self, task: &Task) -> Result<Node, SelectWorkerError> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler::select_worker(&mut **scheduler, task, &self.nodes)
    }

    fn requeue(&self, event: TaskEvent) {
        if let Err(error) = self.pending.append(event) {
            error!(?error, "unable to put event back on the pending queue");
        }
    }

    /// Dispatches the oldest pending event to a worker.
    #[tracing::instrument(name = "Manager::send_work", skip_all)]
    pub async fn send_work(&self) {
        let mut event = match self.pending.next().await {
            None => {
                info!("no work in the queue");
                return;
            }
            Some(v) => v,
        };

        let task_id = event.task.id;
        info!(%task_id, event_id = %event.id, "pulled event off pending queue");

        if event.state == State::Completed {
            self.request_stop(task_id).await;
            return;
        }

        event.task.state = State::Scheduled;

        let node = match self.select_worker(&event.task).await {
            Err(error) => {
                error!(?error, %task_id, "unable to select a worker");
                self.requeue(event);
                return;
            }
            Ok(v) => v,
        };

        self.task_db
            .write()
            .await
            .insert(task_id, event.task.clone());

        let accepted = match self.client.send_task(&node.name, &event).await {
            Err(error) if error.is_connection() => {
                warn!(?error, worker = %node.name, "worker unreachable, requeueing event");
                self.requeue(event);
                return;
            }
            Err(error) => {
                // The event is dropped here, it is not retried.
                error!(?error, worker = %node.name, "worker did not accept the task");
                return;
            }
            Ok(v) => v,
        };

        info!(event_id = %accepted.id, worker = %node.name, "worker accepted task");

        self.event_db.write().await.insert(accepted.id, accepted);
        self.assignments.lock().await.assign(task_id, &node.name);
    }

    /// Stops `task_id` on the worker it was assigned to. A stop is never
    /// turned into a start, so invalid requests are dropped.
    #[tracing::instrument(name = "Manager::request_stop", skip_all, fields(
        task_id = %task_id
    ))]
    async fn request_stop(&self, task_id: Uuid) {
        let worker = match self.worker_for(&task_id).await {
            None => {
                warn!("invalid request: task is not assigned to a worker, dropping stop");
                return;
            }
            Some(v) => v,
        };

        let persisted_state = self.task_db.read().await.get(&task_id).map(|task| task.state);

        match persisted_state {
            Some(state) if valid_state_transition(state, State::Completed) => {
                self.stop_task(&worker, task_id).await;
            }
            state => {
                warn!(
                    ?state,
                    "invalid request: existing task cannot transition to the completed state"
                );
            }
        }
    }

    #[tracing::instrument(name = "Manager::stop_task", skip_all, fields(
        worker = %worker,
        task_id = %task_id
    ))]
    pub async fn stop_task(&self, worker: &str, task_id: Uuid) {
        if let Err(error) = self.client.stop_task(worker, task_id).await {
            error!(?error, "unable to stop task");
        }
    }

    /// Pulls the task list of every worker and overwrites the stored tasks
    /// with what the workers report.
    #[tracing::instrument(name = "Manager::update_tasks", skip_all)]
    pub async fn update_tasks(&self) {
        for worker in self.workers.iter() {
            info!(%worker, "checking worker for task updates");

            let tasks = match self.client.get_tasks(worker).await {
                Err(error) => {
                    error!(?error, %worker, "unable to fetch tasks from worker");
                    continue;
                }
                Ok(v) => v,
            };

            let mut task_db = self.task_db.write().await;
            for task in tasks {
                let stored = match task_db.get_mut(&task.id) {
                    None => {
                        warn!(task_id = %task.id, %worker, "task not found, skipping");
                        continue;
                    }
                    Some(v) => v,
                };

                // Restarts are counted by the manager, a worker may not have seen the latest one yet.
                let restart_count = stored.restart_count.max(task.restart_count);
                *stored = task;
                stored.restart_count = restart_count;
            }
        }
    }

    /// Restarts failed tasks and running tasks whose health check fails.
    #[tracing::instrument(name = "Manager::do_health_checks", skip_all)]
    pub async fn do_health_checks(&self) {
        for task in self.get_tasks().await {
            if task.restart_count >= MAX_RESTARTS {
                continue;
            }

            match task.state {
                State::Running => {
                    if let Err(error) = self.check_task_health(&task).await {
                        warn!(?error, task_id = %task.id, "health check failed");
                        self.restart_task(task).await;
                    }
                }
                State::Failed => self.restart_task(task).await,
                _ => {}
            }
        }
    }

    #[tracing::instrument(name = "Manager::check_task_health", skip_all, fields(
        task_id = %task.id
    ))]
    pub async fn check_task_health(&self, task: &Task) -> Result<(), HealthCheckError> {
        let path = match task.health_check.as_deref() {
            None | Some("") => return Ok(()),
            Some(v) => v,
        };

        let worker = self
            .worker_for(&task.id)
            .await
            .ok_or(HealthCheckError::Unassigned(task.id))?;

        let host_port = task
            .first_host_port()
            .ok_or(HealthCheckError::NoHostPort(task.id))?;

        let url = health_check_url(&worker, host_port, path)?;

        info!(%url, "calling health check");

        self.client.health_check(&url).await?;

        Ok(())
    }

    #[tracing::instrument(name = "Manager::restart_task", skip_all, fields(
        task_id = %task.id,
        restart_count = task.restart_count
    ))]
    pub async fn restart_task(&self, mut task: Task) {
        task.state = State::Scheduled;
        task.restart_count += 1;
        task.container_id = None;
        task.host_ports.clear();
        task.touch();

        self.task_db.write().await.insert(task.id, task.clone());

        let event = TaskEvent::new(State::Running, task);

        let worker = match self.worker_for(&event.task.id).await {
            None => {
                warn!("task is not assigned to a worker, queueing it for dispatch");
                self.requeue(event);
                return;
            }
            Some(v) => v,
        };

        match self.client.send_task(&worker, &event).await {
            Err(error) if error.is_connection() => {
                warn!(?error, %worker, "worker unreachable, requeueing restart");
                self.requeue(event);
            }
            Err(error) => {
                error!(?error, %worker, "worker did not accept the restart");
            }
            Ok(accepted) => {
                info!(event_id = %accepted.id, %worker, "task restarted");
                self.event_db.write().await.insert(accepted.id, accepted);
            }
        }
    }

    #[tracing::instrument(name = "Manager::process_tasks", skip_all)]
    pub async fn process_tasks(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping task dispatch");
                    return;
                },
                _ = interval.tick() => {
                    info!("processing any tasks in the queue");
                    self.send_work().await;
                }
            }
        }
    }

    #[tracing::instrument(name = "Manager::poll_task_updates", skip_all)]
    pub async fn poll_task_updates(
        &self,
        initial_delay: Duration,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping task updates");
                    return;
                },
                _ = interval.tick() => {
                    self.update_tasks().await;
                    info!("task updates completed");
                }
            }
        }
    }

    #[tracing::instrument(name = "Manager::run_health_checks", skip_all)]
    pub async fn run_health_checks(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("stopping health checks");
                    return;
                },
                _ = interval.tick() => {
                    info!("performing health checks");
                    self.do_health_checks().await;
                }
            }
        }
    }
}

/// `http://{worker host}:{host_port}{path}`.
pub fn health_check_url(worker: &str, host_port: &str, path: &str) -> Result<String, HealthCheckError> {
    let host = match worker.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.is_empty() => host,
        _ => return Err(HealthCheckError::InvalidWorkerAddress(worker.to_owned())),
    };

    let separator = if path.starts_with('/') { "" } else { "/" };

    Ok(format!("http://{host}:{host_port}{separator}{path}"))
}
