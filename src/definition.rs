use anyhow::Result;
use serde::Deserialize;
use std::{collections::HashMap, path::Path};

use crate::task::{State, Task, TaskEvent};

pub const TASK_KIND: &str = "Task";

/// The resource definition used in apply -f <FILE>
#[derive(Debug, Deserialize)]
pub struct Definition {
    #[serde(rename = "apiVersion")]
    api_version: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    spec: Spec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    image: String,
    #[serde(default)]
    ports: Vec<Port>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    resources: Resources,
    #[serde(default)]
    restart_policy: String,
    health_check: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Port {
    #[serde(rename = "containerPort")]
    container_port: u16,
    #[serde(default = "default_protocol")]
    protocol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Resources {
    cpu: f64,
    /// Bytes.
    memory: i64,
    disk: i64,
}

fn default_kind() -> String {
    TASK_KIND.to_owned()
}

fn default_protocol() -> String {
    "TCP".to_owned()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DefinitionError {
    #[error("field {0} is required")]
    MissingField(String),
    #[error("unsupported kind {0}")]
    UnsupportedKind(String),
}

impl Definition {
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn metadata_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("name"))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub async fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_contents = tokio::fs::read_to_string(file_path.as_ref()).await?;
        let definition: Definition = serde_yaml::from_str(&file_contents)?;

        definition.validate()?;

        Ok(definition)
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.kind != TASK_KIND {
            return Err(DefinitionError::UnsupportedKind(self.kind.clone()));
        }

        if self.metadata_name().is_empty() {
            return Err(DefinitionError::MissingField("metadata.name".to_owned()));
        }

        if self.spec.image.is_empty() {
            return Err(DefinitionError::MissingField("spec.image".to_owned()));
        }

        Ok(())
    }

    /// Event asking the manager to schedule the task described by this definition.
    pub fn into_event(self) -> TaskEvent {
        TaskEvent::new(State::Scheduled, Task::from(self))
    }
}

impl From<Definition> for Task {
    fn from(input: Definition) -> Self {
        let name = input.metadata_name().to_owned();
        let spec = input.spec;

        Self {
            name,
            state: State::Scheduled,
            image: spec.image,
            cpu: spec.resources.cpu,
            memory: spec.resources.memory,
            disk: spec.resources.disk,
            env: spec.env,
            exposed_ports: spec
                .ports
                .iter()
                .map(|port| format!("{}/{}", port.container_port, port.protocol.to_lowercase()))
                .collect(),
            restart_policy: spec.restart_policy,
            health_check: spec.health_check,
            ..Default::default()
        }
    }
}
