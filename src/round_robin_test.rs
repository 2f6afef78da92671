#[cfg(test)]
mod round_robin_tests {
    use crate::{
        node::Node,
        round_robin::RoundRobin,
        scheduler::{select_worker, Scheduler, Scores, SelectWorkerError},
        task::Task,
    };

    fn nodes(n: usize) -> Vec<Node> {
        (0..n)
            .map(|i| Node::from_worker_address(&format!("127.0.0.1:{}", 5556 + i)))
            .collect()
    }

    #[test]
    fn cycles_through_every_node() {
        let nodes = nodes(3);
        let task = Task::new("web", "nginx");
        let mut scheduler = RoundRobin::new();

        let picked: Vec<String> = (0..6)
            .map(|_| select_worker(&mut scheduler, &task, &nodes).unwrap().name)
            .collect();

        // The cursor starts at 0 and advances before every pick.
        let expected: Vec<String> = [1, 2, 0, 1, 2, 0]
            .iter()
            .map(|&i| nodes[i].name.clone())
            .collect();
        assert_eq!(expected, picked);
    }

    #[test]
    fn single_node_is_always_picked() {
        let nodes = nodes(1);
        let task = Task::new("web", "nginx");
        let mut scheduler = RoundRobin::new();

        for _ in 0..3 {
            assert_eq!(
                nodes[0],
                select_worker(&mut scheduler, &task, &nodes).unwrap()
            );
            assert_eq!(0, scheduler.last_worker());
        }
    }

    #[test]
    fn selected_node_gets_the_lowest_score() {
        let nodes = nodes(3);
        let candidates: Vec<&Node> = nodes.iter().collect();
        let mut scheduler = RoundRobin::new();

        let scores = scheduler.score(&Task::new("web", "nginx"), &candidates);

        assert_eq!(3, scores.len());
        assert_eq!(Some(&0.1), scores.get(&nodes[1].name));
        assert_eq!(Some(&1.0), scores.get(&nodes[0].name));
        assert_eq!(Some(&1.0), scores.get(&nodes[2].name));
    }

    #[test]
    fn pick_keeps_the_first_node_on_ties() {
        let nodes = nodes(3);
        let candidates: Vec<&Node> = nodes.iter().collect();
        let scores: Scores = nodes.iter().map(|node| (node.name.clone(), 1.0)).collect();

        let picked = RoundRobin::new().pick(&scores, &candidates);

        assert_eq!(Some(&nodes[0]), picked);
    }

    #[test]
    fn pick_returns_none_without_candidates() {
        let scores = Scores::new();

        assert_eq!(None, RoundRobin::new().pick(&scores, &[]));
    }

    #[test]
    fn no_nodes_is_an_error() {
        let task = Task::new("web", "nginx");
        let mut scheduler = RoundRobin::new();

        assert_eq!(
            Err(SelectWorkerError::NoNodesAvailable { task_id: task.id }),
            select_worker(&mut scheduler, &task, &[])
        );
    }
}

#[cfg(test)]
mod scheduler_kind_tests {
    use crate::scheduler::SchedulerKind;

    #[test]
    fn parses_round_robin_names() {
        for name in ["roundrobin", "round-robin"] {
            let kind: SchedulerKind = serde_yaml::from_str(name).unwrap();
            assert_eq!(SchedulerKind::RoundRobin, kind);
        }
    }

    #[test]
    fn unknown_scheduler_is_rejected() {
        assert!(serde_yaml::from_str::<SchedulerKind>("epvm").is_err());
    }
}
