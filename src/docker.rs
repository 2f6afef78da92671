use std::str::FromStr;

use async_trait::async_trait;
use docker_api::{
    opts::{ContainerCreateOpts, ContainerRemoveOpts, PublishPort, PullOpts},
    Docker,
};
use futures_util::stream::StreamExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    runtime::{Action, ContainerConfig, ContainerStatus, Runtime, RuntimeError, RuntimeOutput},
    task::{PortBinding, PortMap},
};

pub const DEFAULT_DOCKER_URI: &str = "unix:///var/run/docker.sock";

/// Runs tasks as docker containers.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    #[tracing::instrument(name = "DockerRuntime::new", skip_all, fields(
        uri = %uri
    ))]
    pub fn new(uri: &str) -> Result<Self, RuntimeError> {
        Ok(Self {
            docker: Docker::new(uri)?,
        })
    }

    #[tracing::instrument(name = "DockerRuntime::pull_image", skip_all, fields(
        image = %image
    ))]
    pub async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!("pulling image");

        let (name, tag) = split_image_reference(image);
        let pull_opts = PullOpts::builder().image(name).tag(tag).build();

        let images = self.docker.images();

        let mut stream = images.pull(&pull_opts);
        while let Some(result) = stream.next().await {
            if let Err(err) = result {
                return Err(RuntimeError::PullError(err.to_string()));
            }
        }

        Ok(())
    }

    fn create_opts(config: &ContainerConfig) -> Result<ContainerCreateOpts, RuntimeError> {
        let mut create_opts = ContainerCreateOpts::builder()
            .image(&config.image)
            .name(&config.name)
            .env(config.env_variables.clone())
            .publish_all_ports();

        if config.memory > 0 {
            create_opts = create_opts.memory(config.memory as u64);
        }

        if config.cpu > 0.0 {
            create_opts = create_opts.nano_cpus(config.nano_cpus());
        }

        if !config.restart_policy.is_empty() {
            create_opts = create_opts.restart_policy(&config.restart_policy, 0);
        }

        for port in config.exposed_ports.iter() {
            let publish_port = PublishPort::from_str(&port.to_lowercase())
                .map_err(|_| RuntimeError::InvalidPort(port.clone()))?;
            create_opts = create_opts.publish(publish_port);
        }

        Ok(create_opts.build())
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    #[tracing::instrument(name = "DockerRuntime::run", skip_all, fields(
        name = %config.name,
        image = %config.image
    ))]
    async fn run(&self, config: &ContainerConfig) -> Result<RuntimeOutput, RuntimeError> {
        self.pull_image(&config.image).await?;

        let create_opts = Self::create_opts(config)?;

        let created_container = self.docker.containers().create(&create_opts).await?;

        info!(container_id = %created_container.id(), "container created");

        created_container.start().await?;

        info!("container started");

        Ok(RuntimeOutput::success(
            Action::Start,
            created_container.id().to_string(),
        ))
    }

    #[tracing::instrument(name = "DockerRuntime::stop", skip_all, fields(
        container_id = %container_id
    ))]
    async fn stop(&self, container_id: &str) -> Result<RuntimeOutput, RuntimeError> {
        let container = docker_api::container::Container::new(self.docker.clone(), container_id);

        info!("removing container");

        container
            .remove(
                &ContainerRemoveOpts::builder()
                    .force(true)
                    .volumes(true)
                    .build(),
            )
            .await
            .map_err(|error| not_found_or(error, container_id))?;

        Ok(RuntimeOutput::success(Action::Stop, container_id))
    }

    #[tracing::instrument(name = "DockerRuntime::inspect", skip_all, fields(
        container_id = %container_id
    ))]
    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        let container = docker_api::container::Container::new(self.docker.clone(), container_id);

        let details = container
            .inspect()
            .await
            .map_err(|error| not_found_or(error, container_id))?;

        let details = match serde_json::to_value(&details) {
            Ok(v) => v,
            Err(error) => {
                warn!(?error, "unable to read container details");
                Value::Null
            }
        };

        Ok(container_status_from_inspect(&details))
    }
}

fn not_found_or(error: docker_api::Error, container_id: &str) -> RuntimeError {
    match error {
        docker_api::Error::Fault { code, .. } if code.as_u16() == 404 => {
            RuntimeError::NotFound(container_id.to_owned())
        }
        error => RuntimeError::Docker(error),
    }
}

/// `name:tag` split, defaulting to `latest` so a pull never fetches every tag.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(i) => {
            let split_at = last_segment_start + i;
            (&image[..split_at], &image[split_at + 1..])
        }
        None => (image, "latest"),
    }
}

/// Reads the status and the port bindings out of a container inspect response.
pub fn container_status_from_inspect(details: &Value) -> ContainerStatus {
    let status = details
        .pointer("/State/Status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let mut ports = PortMap::new();
    if let Some(port_map) = details
        .pointer("/NetworkSettings/Ports")
        .and_then(Value::as_object)
    {
        for (container_port, bindings) in port_map {
            let bindings = bindings
                .as_array()
                .map(|bindings| {
                    bindings
                        .iter()
                        .map(|binding| PortBinding {
                            host_ip: string_field(binding, "HostIp"),
                            host_port: string_field(binding, "HostPort"),
                        })
                        .collect()
                })
                .unwrap_or_default();
            ports.insert(container_port.clone(), bindings);
        }
    }

    ContainerStatus { status, ports }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
