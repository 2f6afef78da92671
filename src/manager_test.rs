use anyhow::Result;
use std::io::Write;

#[cfg(test)]
mod config_from_file_tests {
    use tempfile::NamedTempFile;

    use crate::{manager::Config, scheduler::SchedulerKind};

    use super::*;

    #[tokio::test]
    async fn reads_config_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
listen_addr: "127.0.0.1:5555"
workers:
  - "127.0.0.1:5556"
  - "127.0.0.1:5557"
scheduler: roundrobin
intervals:
  send_work_secs: 2
http:
  timeout_secs: 1
"#
        )?;

        let config = Config::from_file(file.path()).await?;

        assert_eq!(5555, config.listen_addr.port());
        assert_eq!(vec!["127.0.0.1:5556", "127.0.0.1:5557"], config.workers);
        assert_eq!(SchedulerKind::RoundRobin, config.scheduler);
        assert_eq!(2, config.intervals.send_work_secs);
        assert_eq!(10, config.intervals.update_tasks_initial_delay_secs);
        assert_eq!(15, config.intervals.update_tasks_secs);
        assert_eq!(30, config.intervals.health_check_secs);
        assert_eq!(1, config.http.timeout_secs);

        Ok(())
    }

    #[tokio::test]
    async fn workers_are_required() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
listen_addr: "127.0.0.1:5555"
"#
        )?;

        let result = Config::from_file(file.path()).await.unwrap_err();

        assert!(result.to_string().contains("workers"));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_scheduler_is_rejected() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
listen_addr: "127.0.0.1:5555"
workers: []
scheduler: greedy
"#
        )?;

        assert!(Config::from_file(file.path()).await.is_err());

        Ok(())
    }
}

#[cfg(test)]
mod health_check_url_tests {
    use crate::manager::{health_check_url, HealthCheckError};

    #[test]
    fn uses_worker_host_and_task_port() {
        assert_eq!(
            "http://192.168.1.10:49153/health",
            health_check_url("192.168.1.10:5556", "49153", "/health").unwrap()
        );
    }

    #[test]
    fn adds_leading_slash_to_path() {
        assert_eq!(
            "http://localhost:49153/health",
            health_check_url("localhost:5556", "49153", "health").unwrap()
        );
    }

    #[test]
    fn worker_address_needs_a_port() {
        assert!(matches!(
            health_check_url("localhost", "49153", "/health"),
            Err(HealthCheckError::InvalidWorkerAddress(_))
        ));
    }
}

#[cfg(test)]
mod control_loop_tests {
    use std::{sync::Arc, time::Duration};

    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    use crate::{
        client::WorkerClient,
        manager::{Manager, MAX_RESTARTS},
        round_robin::RoundRobin,
        runtime::ContainerStatus,
        runtime_test::FakeRuntime,
        task::{PortBinding, State, Task, TaskEvent},
        worker::Worker,
        worker_api,
    };

    use super::*;

    struct TestWorker {
        addr: String,
        worker: Arc<Worker>,
        runtime: Arc<FakeRuntime>,
    }

    /// Serves a worker backed by a fake runtime on a random local port.
    async fn spawn_worker() -> Result<TestWorker> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();

        let runtime = Arc::new(FakeRuntime::new());
        let worker = Arc::new(Worker::new(addr.clone(), runtime.clone()));
        let router = worker_api::router(Arc::clone(&worker));

        tokio::spawn(async move { axum::serve(listener, router).await });

        Ok(TestWorker {
            addr,
            worker,
            runtime,
        })
    }

    /// Serves `GET /health` answering with `status`, returns the port.
    async fn spawn_health_endpoint(status: StatusCode) -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let router = Router::new().route("/health", get(move || async move { status }));

        tokio::spawn(async move { axum::serve(listener, router).await });

        Ok(port)
    }

    fn manager(workers: Vec<String>) -> Result<Manager> {
        Ok(Manager::new(
            workers,
            Box::new(RoundRobin::new()),
            WorkerClient::new(Duration::from_secs(5))?,
        ))
    }

    fn scheduled(task: Task) -> TaskEvent {
        TaskEvent::new(State::Scheduled, task)
    }

    /// Dispatches `task`, runs it on `worker` and pulls the result back.
    async fn run_on(manager: &Manager, worker: &TestWorker, task: Task) -> Result<Task> {
        let task_id = task.id;

        manager.add_task(scheduled(task))?;
        manager.send_work().await;
        let _ = worker.worker.run_task().await;
        manager.update_tasks().await;

        Ok(manager.get_task(&task_id).await.expect("task to be stored"))
    }

    async fn fail_container(worker: &TestWorker, task: &Task) {
        worker
            .runtime
            .forget(task.container_id.as_deref().expect("container id"));
        worker.worker.update_tasks().await;
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() -> Result<()> {
        let manager = manager(vec![])?;

        manager.send_work().await;

        assert!(manager.get_tasks().await.is_empty());
        assert_eq!(0, manager.pending_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn event_is_kept_when_there_are_no_workers() -> Result<()> {
        let manager = manager(vec![])?;
        let task = Task::new("web", "nginx");
        let task_id = task.id;

        manager.add_task(scheduled(task))?;
        manager.send_work().await;

        assert_eq!(1, manager.pending_len().await);
        assert!(manager.get_task(&task_id).await.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn event_is_requeued_when_worker_is_unreachable() -> Result<()> {
        let addr = TcpListener::bind("127.0.0.1:0")
            .await?
            .local_addr()?
            .to_string();
        let manager = manager(vec![addr.clone()])?;
        let task = Task::new("web", "nginx");
        let task_id = task.id;

        manager.add_task(scheduled(task))?;
        manager.send_work().await;

        assert_eq!(1, manager.pending_len().await);
        assert!(manager.worker_for(&task_id).await.is_none());
        assert!(manager.tasks_for(&addr).await.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn dispatched_task_ends_up_running() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let task = Task::new("web", "nginx");
        let task_id = task.id;

        manager.add_task(scheduled(task))?;
        manager.send_work().await;

        assert_eq!(0, manager.pending_len().await);
        assert_eq!(1, worker.worker.queue_len().await);
        assert_eq!(
            Some(State::Scheduled),
            manager.get_task(&task_id).await.map(|task| task.state)
        );
        assert_eq!(Some(worker.addr.clone()), manager.worker_for(&task_id).await);
        assert_eq!(vec![task_id], manager.tasks_for(&worker.addr).await);

        worker.worker.run_task().await?;
        manager.update_tasks().await;

        let task = manager.get_task(&task_id).await.expect("task to be stored");
        assert_eq!(State::Running, task.state);
        assert!(task.container_id.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn tasks_are_spread_over_workers() -> Result<()> {
        let first = spawn_worker().await?;
        let second = spawn_worker().await?;
        let manager = manager(vec![first.addr.clone(), second.addr.clone()])?;

        let tasks: Vec<Task> = (0..3).map(|i| Task::new(format!("web-{i}"), "nginx")).collect();
        for task in tasks.iter() {
            manager.add_task(scheduled(task.clone()))?;
            manager.send_work().await;
        }

        // The round robin cursor advances before the first pick.
        assert_eq!(vec![tasks[1].id], manager.tasks_for(&first.addr).await);
        assert_eq!(
            vec![tasks[0].id, tasks[2].id],
            manager.tasks_for(&second.addr).await
        );
        for task in tasks.iter() {
            let worker = manager.worker_for(&task.id).await.expect("assigned worker");
            assert!(manager.tasks_for(&worker).await.contains(&task.id));
        }

        Ok(())
    }

    #[tokio::test]
    async fn completed_event_stops_the_task() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let running = run_on(&manager, &worker, Task::new("web", "nginx")).await?;
        assert_eq!(State::Running, running.state);

        manager.add_task(stop_event(&running))?;
        manager.send_work().await;

        assert_eq!(1, worker.worker.queue_len().await);

        worker.worker.run_task().await?;
        manager.update_tasks().await;

        let task = manager.get_task(&running.id).await.expect("task");
        assert_eq!(State::Completed, task.state);
        assert_eq!(
            vec![running.container_id.expect("container id")],
            worker.runtime.stops()
        );

        Ok(())
    }

    fn stop_event(task: &Task) -> TaskEvent {
        TaskEvent::new(
            State::Completed,
            Task {
                state: State::Completed,
                ..task.clone()
            },
        )
    }

    /// Drains one event from the manager and runs whatever each worker received.
    async fn step(manager: &Manager, workers: &[&TestWorker]) {
        manager.send_work().await;
        for worker in workers {
            let _ = worker.worker.run_task().await;
        }
        manager.update_tasks().await;
    }

    #[tokio::test]
    async fn stopping_a_completed_task_does_not_start_it_again() -> Result<()> {
        let first = spawn_worker().await?;
        let second = spawn_worker().await?;
        let manager = manager(vec![first.addr.clone(), second.addr.clone()])?;

        // The first pick lands on the second worker.
        let running = run_on(&manager, &second, Task::new("web", "nginx")).await?;
        assert_eq!(State::Running, running.state);

        manager.add_task(stop_event(&running))?;
        step(&manager, &[&first, &second]).await;
        assert_eq!(
            Some(State::Completed),
            manager.get_task(&running.id).await.map(|task| task.state)
        );

        manager.add_task(stop_event(&running))?;
        step(&manager, &[&first, &second]).await;

        assert!(first.runtime.runs().is_empty());
        assert_eq!(1, second.runtime.runs().len());
        assert_eq!(0, first.worker.queue_len().await);
        assert_eq!(0, second.worker.queue_len().await);
        assert_eq!(Some(second.addr.clone()), manager.worker_for(&running.id).await);
        assert!(manager.tasks_for(&first.addr).await.is_empty());
        assert_eq!(
            Some(State::Completed),
            manager.get_task(&running.id).await.map(|task| task.state)
        );
        assert_eq!(0, manager.pending_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn stopping_a_failed_task_does_not_bypass_the_restart_limit() -> Result<()> {
        let first = spawn_worker().await?;
        let second = spawn_worker().await?;
        let manager = manager(vec![first.addr.clone(), second.addr.clone()])?;
        second.runtime.fail_runs(true);

        let failed = run_on(
            &manager,
            &second,
            Task {
                restart_count: MAX_RESTARTS,
                ..Task::new("web", "nginx")
            },
        )
        .await?;
        assert_eq!(State::Failed, failed.state);

        manager.add_task(stop_event(&failed))?;
        step(&manager, &[&first, &second]).await;
        manager.do_health_checks().await;

        assert!(first.runtime.runs().is_empty());
        assert_eq!(1, second.runtime.runs().len());
        assert_eq!(Some(second.addr.clone()), manager.worker_for(&failed.id).await);

        let task = manager.get_task(&failed.id).await.expect("task");
        assert_eq!(State::Failed, task.state);
        assert_eq!(MAX_RESTARTS, task.restart_count);

        Ok(())
    }

    #[tokio::test]
    async fn stopping_an_unassigned_task_is_dropped() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let task = Task::new("web", "nginx");

        manager.add_task(stop_event(&task))?;
        step(&manager, &[&worker]).await;

        assert!(worker.runtime.runs().is_empty());
        assert!(manager.get_task(&task.id).await.is_none());
        assert!(manager.worker_for(&task.id).await.is_none());
        assert_eq!(0, manager.pending_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn update_skips_tasks_the_manager_does_not_know() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;

        worker
            .worker
            .add_task(Task {
                state: State::Scheduled,
                ..Task::new("stray", "nginx")
            })
            .await?;
        worker.worker.run_task().await?;

        let known = run_on(&manager, &worker, Task::new("web", "nginx")).await?;

        let tasks = manager.get_tasks().await;
        assert_eq!(1, tasks.len());
        assert_eq!(known.id, tasks[0].id);
        assert_eq!(State::Running, tasks[0].state);

        Ok(())
    }

    #[tokio::test]
    async fn failed_task_is_restarted() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let running = run_on(&manager, &worker, Task::new("web", "nginx")).await?;

        fail_container(&worker, &running).await;
        manager.update_tasks().await;
        assert_eq!(
            Some(State::Failed),
            manager.get_task(&running.id).await.map(|task| task.state)
        );

        manager.do_health_checks().await;

        let restarted = manager.get_task(&running.id).await.expect("task");
        assert_eq!(State::Scheduled, restarted.state);
        assert_eq!(1, restarted.restart_count);
        assert_eq!(1, worker.worker.queue_len().await);

        worker.worker.run_task().await?;
        manager.update_tasks().await;

        let task = manager.get_task(&running.id).await.expect("task");
        assert_eq!(State::Running, task.state);
        assert_eq!(1, task.restart_count);
        assert_ne!(running.container_id, task.container_id);

        Ok(())
    }

    #[tokio::test]
    async fn task_is_not_restarted_after_max_restarts() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        worker.runtime.fail_runs(true);

        let failed = run_on(
            &manager,
            &worker,
            Task {
                restart_count: MAX_RESTARTS,
                ..Task::new("web", "nginx")
            },
        )
        .await?;
        assert_eq!(State::Failed, failed.state);

        manager.do_health_checks().await;

        let task = manager.get_task(&failed.id).await.expect("task");
        assert_eq!(State::Failed, task.state);
        assert_eq!(MAX_RESTARTS, task.restart_count);
        assert_eq!(0, worker.worker.queue_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn restart_count_grows_by_one_per_failure() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        worker.runtime.fail_runs(true);

        let failed = run_on(&manager, &worker, Task::new("web", "nginx")).await?;

        for expected in 1..=MAX_RESTARTS {
            manager.do_health_checks().await;
            assert_eq!(
                Some(expected),
                manager.get_task(&failed.id).await.map(|task| task.restart_count)
            );

            let _ = worker.worker.run_task().await;
            manager.update_tasks().await;

            let task = manager.get_task(&failed.id).await.expect("task");
            assert_eq!(State::Failed, task.state);
            assert_eq!(expected, task.restart_count);
        }

        manager.do_health_checks().await;
        assert_eq!(0, worker.worker.queue_len().await);

        Ok(())
    }

    /// Points the task's first host port at `port` and syncs the manager.
    async fn bind_host_port(manager: &Manager, worker: &TestWorker, task: &Task, port: u16) {
        worker.runtime.set_status(
            task.container_id.as_deref().expect("container id"),
            ContainerStatus {
                status: "running".to_owned(),
                ports: [(
                    "80/tcp".to_owned(),
                    vec![PortBinding {
                        host_ip: "127.0.0.1".to_owned(),
                        host_port: port.to_string(),
                    }],
                )]
                .into_iter()
                .collect(),
            },
        );
        worker.worker.update_tasks().await;
        manager.update_tasks().await;
    }

    #[tokio::test]
    async fn healthy_task_is_left_alone() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let port = spawn_health_endpoint(StatusCode::OK).await?;

        let running = run_on(
            &manager,
            &worker,
            Task {
                health_check: Some("/health".to_owned()),
                ..Task::new("web", "nginx")
            },
        )
        .await?;
        bind_host_port(&manager, &worker, &running, port).await;

        manager.do_health_checks().await;

        let task = manager.get_task(&running.id).await.expect("task");
        assert_eq!(State::Running, task.state);
        assert_eq!(0, task.restart_count);
        assert_eq!(0, worker.worker.queue_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn unhealthy_task_is_restarted() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;
        let port = spawn_health_endpoint(StatusCode::INTERNAL_SERVER_ERROR).await?;

        let running = run_on(
            &manager,
            &worker,
            Task {
                health_check: Some("/health".to_owned()),
                ..Task::new("web", "nginx")
            },
        )
        .await?;
        bind_host_port(&manager, &worker, &running, port).await;

        manager.do_health_checks().await;

        let task = manager.get_task(&running.id).await.expect("task");
        assert_eq!(State::Scheduled, task.state);
        assert_eq!(1, task.restart_count);
        assert_eq!(1, worker.worker.queue_len().await);

        Ok(())
    }

    #[tokio::test]
    async fn running_task_without_host_port_fails_its_health_check() -> Result<()> {
        let worker = spawn_worker().await?;
        let manager = manager(vec![worker.addr.clone()])?;

        let running = run_on(
            &manager,
            &worker,
            Task {
                health_check: Some("/health".to_owned()),
                ..Task::new("web", "nginx")
            },
        )
        .await?;

        assert!(manager.check_task_health(&running).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn task_without_health_check_is_healthy() -> Result<()> {
        let manager = manager(vec![])?;

        assert!(manager
            .check_task_health(&Task::new("web", "nginx"))
            .await
            .is_ok());

        Ok(())
    }
}
