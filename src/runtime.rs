use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

use crate::task::{PortMap, Task};

/// Docker reports this status for containers whose process has finished.
pub const EXITED_STATUS: &str = "exited";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("error pulling image: {0:?}")]
    PullError(String),
    #[error("invalid exposed port {0:?}")]
    InvalidPort(String),
    #[error("container {0} not found")]
    NotFound(String),
    #[error("task has no container id")]
    MissingContainerId,
    #[error(transparent)]
    Docker(#[from] docker_api::Error),
}

/// Container configuration derived from a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    /// Name of the container.
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    /// Command to run inside the container.
    pub command: Vec<String>,
    /// The image that will be run as a container.
    pub image: String,
    /// Fraction of a cpu the container may use.
    pub cpu: f64,
    /// How much memory the container will need, in bytes.
    pub memory: i64,
    /// How much disk space the container will need.
    pub disk: i64,
    /// Key value pairs to pass to the container as env variables.
    pub env_variables: Vec<String>,
    pub exposed_ports: BTreeSet<String>,
    /// When the container should be restarted.
    pub restart_policy: String,
}

impl ContainerConfig {
    /// Cpu limit in the unit the docker api expects.
    pub fn nano_cpus(&self) -> u64 {
        (self.cpu.max(0.0) * 1_000_000_000.0) as u64
    }
}

impl From<&Task> for ContainerConfig {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            disk: task.disk,
            env_variables: task.env.clone(),
            exposed_ports: task.exposed_ports.clone(),
            restart_policy: task.restart_policy.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("start"),
            Action::Stop => f.write_str("stop"),
        }
    }
}

/// Outcome of a successful run or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOutput {
    pub action: Action,
    pub container_id: String,
    pub result: String,
}

impl RuntimeOutput {
    pub fn success(action: Action, container_id: impl Into<String>) -> Self {
        Self {
            action,
            container_id: container_id.into(),
            result: "success".to_owned(),
        }
    }
}

/// Live state of a container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStatus {
    pub status: String,
    pub ports: PortMap,
}

impl ContainerStatus {
    pub fn has_exited(&self) -> bool {
        self.status == EXITED_STATUS
    }
}

/// Creates, stops and inspects the containers backing tasks.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn run(&self, config: &ContainerConfig) -> Result<RuntimeOutput, RuntimeError>;

    async fn stop(&self, container_id: &str) -> Result<RuntimeOutput, RuntimeError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError>;
}
