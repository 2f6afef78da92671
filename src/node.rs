use serde::Serialize;

/// Represents a machine a worker runs on, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    /// The name of the node. Equal to the worker address it was derived from.
    pub name: String,
    /// Base url of the worker api running on the node.
    pub api: String,
    pub cores: u64,
    /// The amount of memory available.
    pub memory: u64,
    /// The amount of memory allocated.
    pub memory_allocated: u64,
    /// The disk size available.
    pub disk: u64,
    /// The disk size allocated.
    pub disk_allocated: u64,
    pub role: String,
    pub task_count: usize,
}

impl Node {
    pub fn new(name: impl Into<String>, api: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api: api.into(),
            cores: 0,
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            role: role.into(),
            task_count: 0,
        }
    }

    /// Builds the node for a worker listening on `address` (`host:port`).
    pub fn from_worker_address(address: &str) -> Self {
        Self::new(address, format!("http://{address}"), "worker")
    }
}
