use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    /// States a task in `self` is allowed to move to.
    pub fn allowed_transitions(&self) -> &'static [State] {
        match self {
            State::Pending => &[State::Scheduled],
            State::Scheduled => &[State::Scheduled, State::Running, State::Failed],
            State::Running => &[State::Running, State::Completed, State::Failed],
            State::Completed => &[],
            State::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, destination: State) -> bool {
        self.allowed_transitions().contains(&destination)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Pending => "Pending",
            State::Scheduled => "Scheduled",
            State::Running => "Running",
            State::Completed => "Completed",
            State::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Gate applied before any state changing operation is executed by a worker.
#[tracing::instrument(name = "task::valid_state_transition", skip_all, fields(
    current = %current,
    destination = %destination,
    valid
))]
pub fn valid_state_transition(current: State, destination: State) -> bool {
    let valid = current.can_transition_to(destination);
    tracing::Span::current().record("valid", valid);
    valid
}

/// A host side binding of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Container port (`"80/tcp"`) to the host bindings docker created for it.
pub type PortMap = HashMap<String, Vec<PortBinding>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub state: State,
    pub image: String,
    /// Fraction of a cpu, converted to nano cpus when the container is created.
    pub cpu: f64,
    /// Memory limit in bytes.
    pub memory: i64,
    pub disk: i64,
    /// `KEY=value` pairs passed to the container.
    pub env: Vec<String>,
    /// Ports in docker notation, e.g. `"80/tcp"`.
    pub exposed_ports: BTreeSet<String>,
    /// Only populated while the task is running.
    pub host_ports: PortMap,
    pub restart_policy: String,
    /// Path requested on the task's first host port by the manager health checks.
    pub health_check: Option<String>,
    pub restart_count: u32,
    /// Empty until the container has been started.
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for Task {
    fn default() -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            env: Vec::new(),
            exposed_ports: BTreeSet::new(),
            host_ports: PortMap::new(),
            restart_policy: String::new(),
            health_check: None,
            restart_count: 0,
            container_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

impl Task {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// The first host port docker bound for this task, if any.
    pub fn first_host_port(&self) -> Option<&str> {
        self.host_ports
            .values()
            .find_map(|bindings| bindings.first())
            .map(|binding| binding.host_port.as_str())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Request to move `task` into `state`. The task inside is the desired state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub state: State,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            requested_at: Utc::now(),
            task,
        }
    }
}
