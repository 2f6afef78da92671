use tracing::debug;

use crate::{
    node::Node,
    scheduler::{Scheduler, Scores},
    task::Task,
};

const SELECTED_SCORE: f64 = 0.1;
const DEFAULT_SCORE: f64 = 1.0;

/// Spreads tasks over the nodes one after the other.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last_worker: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_worker(&self) -> usize {
        self.last_worker
    }

    fn advance(&mut self, num_nodes: usize) -> usize {
        self.last_worker = if self.last_worker + 1 < num_nodes {
            self.last_worker + 1
        } else {
            0
        };
        self.last_worker
    }
}

impl Scheduler for RoundRobin {
    // TODO: filter by requested memory and disk once workers report their capacity.
    fn select_candidate_nodes<'a>(&self, _task: &Task, nodes: &'a [Node]) -> Vec<&'a Node> {
        nodes.iter().collect()
    }

    #[tracing::instrument(name = "RoundRobin::score", skip_all, fields(
        task_id = %task.id,
        num_nodes = nodes.len()
    ))]
    fn score(&mut self, task: &Task, nodes: &[&Node]) -> Scores {
        let selected = self.advance(nodes.len());

        debug!(selected, "advanced round robin cursor");

        nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let score = if i == selected {
                    SELECTED_SCORE
                } else {
                    DEFAULT_SCORE
                };
                (node.name.clone(), score)
            })
            .collect()
    }

    fn pick<'a>(&self, scores: &Scores, candidates: &[&'a Node]) -> Option<&'a Node> {
        let mut best: Option<(&'a Node, f64)> = None;

        for node in candidates.iter().copied() {
            let score = scores.get(&node.name).copied().unwrap_or(f64::MAX);
            match best {
                Some((_, lowest)) if score >= lowest => {}
                _ => best = Some((node, score)),
            }
        }

        best.map(|(node, _)| node)
    }
}
