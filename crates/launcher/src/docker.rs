use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateResponse, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;

use async_trait::async_trait;
use botpack_models::BotpackError;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{info, instrument};

use crate::logs::{LogChunk, LogStream};

#[derive(Clone, Debug)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    /// Exec vector; never passed through a shell.
    pub cmd: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub stop_timeout_secs: u64,
}

impl Default for CreateSpec {
    fn default() -> Self {
        Self {
            image: "bot:test".to_string(),
            name: "bot-test".to_string(),
            env: vec![],
            cmd: vec![],
            labels: vec![],
            stop_timeout_secs: 10,
        }
    }
}

/// Launch settings recorded in an image's config at build time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageContract {
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ImageContract {
    /// Parses `NAME=value` entries as the engine reports them.
    pub fn from_engine(cmd: Option<Vec<String>>, env: Option<Vec<String>>) -> Self {
        let env = env
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Self {
            cmd: cmd.unwrap_or_default(),
            env,
        }
    }
}

#[async_trait]
pub trait DockerLike: Send + Sync + 'static {
    /// The image's baked command and environment; `None` when the image is
    /// unknown to the engine.
    async fn inspect_image(&self, image: &str) -> anyhow::Result<Option<ImageContract>>;
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String>; // returns container_id
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()>;
    /// Blocks until the container stops and returns its exit code.
    async fn wait(&self, container_id: &str) -> anyhow::Result<i64>;
    /// Follows stdout/stderr, yielding chunks as the engine receives them.
    fn logs(&self, container_id: &str) -> BoxStream<'static, anyhow::Result<LogChunk>>;
}

pub struct BollardDocker {
    docker: Docker,
}

impl BollardDocker {
    pub fn connect(host: Option<&str>) -> Result<Self, BotpackError> {
        let host = host
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .or_else(|| std::env::var("DOCKER_HOST").ok());

        let docker = match host {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                    BotpackError::DockerError {
                        message: format!("Failed to connect to Docker at {host}: {e}"),
                    }
                })?
            }
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(&host, 120, bollard::API_DEFAULT_VERSION).map_err(
                    |e| BotpackError::DockerError {
                        message: format!("Failed to connect to Docker at {host}: {e}"),
                    },
                )?
            }
            _ => Docker::connect_with_socket_defaults().map_err(|e| BotpackError::DockerError {
                message: e.to_string(),
            })?,
        };

        Ok(Self { docker })
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl DockerLike for BollardDocker {
    async fn inspect_image(&self, image: &str) -> anyhow::Result<Option<ImageContract>> {
        match self.docker.inspect_image(image).await {
            Ok(inspect) => {
                let config = inspect.config.unwrap_or_default();
                Ok(Some(ImageContract::from_engine(config.cmd, config.env)))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, spec), fields(image = %spec.image, name = %spec.name))]
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let env = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let host_config = HostConfig {
            // Never restarted; the exit code is reported as-is.
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            cmd: Some(spec.cmd.clone()),
            labels: Some(spec.labels.iter().cloned().collect::<HashMap<_, _>>()),
            stop_timeout: Some(spec.stop_timeout_secs as i64),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response: ContainerCreateResponse = self
            .docker
            .create_container(Some(options), container_config)
            .await?;

        info!("Created container: {} with ID: {}", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container: {}", container_id);
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout_secs: u64) -> anyhow::Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        self.docker
            .stop_container(container_id, Some(options))
            .await?;
        info!("Stopped container: {}", container_id);
        Ok(())
    }

    async fn remove(&self, container_id: &str, force: bool) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => {
                info!("Removed container: {}", container_id);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&self, container_id: &str) -> anyhow::Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => anyhow::bail!("wait stream for {container_id} ended without a status"),
        }
    }

    fn logs(&self, container_id: &str) -> BoxStream<'static, anyhow::Result<LogChunk>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        self.docker
            .logs(container_id, Some(options))
            .map(|item| match item {
                Ok(LogOutput::StdErr { message }) => Ok(LogChunk {
                    stream: LogStream::Stderr,
                    bytes: message.to_vec(),
                }),
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::Console { message })
                | Ok(LogOutput::StdIn { message }) => Ok(LogChunk {
                    stream: LogStream::Stdout,
                    bytes: message.to_vec(),
                }),
                Err(e) => Err(e.into()),
            })
            .boxed()
    }
}
