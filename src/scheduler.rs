use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::{node::Node, round_robin::RoundRobin, task::Task};

/// Node name to score. Lower is better.
pub type Scores = HashMap<String, f64>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectWorkerError {
    #[error("no worker nodes available for task {task_id}")]
    NoNodesAvailable { task_id: Uuid },
}

/// Placement policy used by the manager to choose a worker for a task.
pub trait Scheduler: Send {
    /// Filters `nodes` down to the ones able to run `task`.
    fn select_candidate_nodes<'a>(&self, task: &Task, nodes: &'a [Node]) -> Vec<&'a Node>;

    fn score(&mut self, task: &Task, nodes: &[&Node]) -> Scores;

    fn pick<'a>(&self, scores: &Scores, candidates: &[&'a Node]) -> Option<&'a Node>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    #[serde(alias = "round-robin")]
    RoundRobin,
}

impl SchedulerKind {
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobin::new()),
        }
    }
}

/// Runs the three scheduling phases for `task` over `nodes`.
#[tracing::instrument(name = "scheduler::select_worker", skip_all, fields(
    task_id = %task.id
))]
pub fn select_worker(
    scheduler: &mut dyn Scheduler,
    task: &Task,
    nodes: &[Node],
) -> Result<Node, SelectWorkerError> {
    let candidates = scheduler.select_candidate_nodes(task, nodes);
    if candidates.is_empty() {
        return Err(SelectWorkerError::NoNodesAvailable { task_id: task.id });
    }

    let scores = scheduler.score(task, &candidates);

    scheduler
        .pick(&scores, &candidates)
        .cloned()
        .ok_or(SelectWorkerError::NoNodesAvailable { task_id: task.id })
}
