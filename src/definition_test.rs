use anyhow::Result;
use std::io::Write;

#[cfg(test)]
mod definition_from_file_tests {
    use tempfile::NamedTempFile;

    use crate::{
        definition::{Definition, DefinitionError},
        task::{State, Task},
    };

    use super::*;

    #[tokio::test]
    async fn reads_task_definition() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
apiVersion: v1
kind: Task
metadata:
  name: hello
spec:
  image: strm/helloworld-http
  ports:
    - containerPort: 80
      protocol: TCP
  env:
    - "GREETING=hi"
  resources:
    cpu: 0.5
    memory: 67108864
  restartPolicy: always
  healthCheck: /health
"#
        )?;

        let definition = Definition::from_file(file.path()).await?;
        assert_eq!("v1", definition.api_version());
        assert_eq!("hello", definition.metadata_name());

        let event = definition.into_event();
        assert_eq!(State::Scheduled, event.state);

        let task = event.task;
        assert_eq!("hello", task.name);
        assert_eq!(State::Scheduled, task.state);
        assert_eq!("strm/helloworld-http", task.image);
        assert_eq!(0.5, task.cpu);
        assert_eq!(67108864, task.memory);
        assert_eq!(vec!["GREETING=hi".to_owned()], task.env);
        assert!(task.exposed_ports.contains("80/tcp"));
        assert_eq!("always", task.restart_policy);
        assert_eq!(Some("/health".to_owned()), task.health_check);
        assert_eq!(0, task.restart_count);

        Ok(())
    }

    #[tokio::test]
    async fn optional_fields_have_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
apiVersion: v1
metadata:
  name: hello
spec:
  image: nginx
  ports:
    - containerPort: 8080
"#
        )?;

        let task = Task::from(Definition::from_file(file.path()).await?);

        assert!(task.exposed_ports.contains("8080/tcp"));
        assert!(task.env.is_empty());
        assert!(task.health_check.is_none());
        assert_eq!(0.0, task.cpu);

        Ok(())
    }

    #[tokio::test]
    async fn metadata_name_is_required() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
apiVersion: v1
kind: Task
spec:
  image: nginx
"#
        )?;

        let result = Definition::from_file(file.path()).await.unwrap_err();

        assert_eq!(
            Some(&DefinitionError::MissingField("metadata.name".to_owned())),
            result.downcast_ref::<DefinitionError>()
        );

        Ok(())
    }

    #[tokio::test]
    async fn image_is_required() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
apiVersion: v1
kind: Task
metadata:
  name: hello
spec:
  image: ""
"#
        )?;

        let result = Definition::from_file(file.path()).await.unwrap_err();

        assert_eq!(
            Some(&DefinitionError::MissingField("spec.image".to_owned())),
            result.downcast_ref::<DefinitionError>()
        );

        Ok(())
    }

    #[tokio::test]
    async fn only_task_kind_is_supported() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            &mut file,
            r#"
apiVersion: v1
kind: Deployment
metadata:
  name: hello
spec:
  image: nginx
"#
        )?;

        let result = Definition::from_file(file.path()).await.unwrap_err();

        assert_eq!(
            Some(&DefinitionError::UnsupportedKind("Deployment".to_owned())),
            result.downcast_ref::<DefinitionError>()
        );

        Ok(())
    }
}
