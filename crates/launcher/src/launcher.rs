use crate::docker::{CreateSpec, DockerLike, ImageContract};
use crate::logs::LogSink;
use botpack_models::{
    missing_variables, BotpackError, ContainerState, EntrypointCommand, EnvironmentSet,
    DEFAULT_TIMEZONE,
};
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const LABEL_IMAGE: &str = "io.botpack.image";

/// What to start. Unset fields fall back to the command and environment
/// baked into the image.
#[derive(Debug, Clone)]
pub struct LaunchTarget {
    pub image: String,
    pub entrypoint: Option<EntrypointCommand>,
    pub env_defaults: Option<EnvironmentSet>,
}

impl LaunchTarget {
    /// Runs `image` exactly as it was built.
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            entrypoint: None,
            env_defaults: None,
        }
    }
}

/// Environment defaults declared by the image. Images without a timezone
/// still default to UTC.
fn image_defaults(contract: &ImageContract) -> EnvironmentSet {
    let mut defaults = EnvironmentSet::with_timezone(DEFAULT_TIMEZONE);
    for (name, value) in &contract.env {
        defaults.set_default(name.as_str(), value.as_str());
    }
    defaults
}

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub name_prefix: String,
    pub required_env: Vec<String>,
    pub stop_timeout_secs: u64,
    /// Remove the container once it has exited.
    pub remove_on_exit: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            name_prefix: "bot".to_string(),
            required_env: Vec::new(),
            stop_timeout_secs: 10,
            remove_on_exit: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

pub struct Launcher {
    docker: Arc<dyn DockerLike>,
    settings: LaunchSettings,
}

impl Launcher {
    pub fn new(docker: Arc<dyn DockerLike>, settings: LaunchSettings) -> Self {
        Self { docker, settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Build-time defaults overlaid with caller overrides. Fails when a
    /// required variable ends up absent.
    pub fn resolve_environment(
        &self,
        defaults: &EnvironmentSet,
        overrides: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, BotpackError> {
        let resolved = defaults.resolve(overrides);
        let missing = missing_variables(&self.settings.required_env, &resolved);
        if !missing.is_empty() {
            return Err(BotpackError::MissingEnvironment { names: missing });
        }
        Ok(resolved)
    }

    #[instrument(skip(self, target, overrides), fields(image = %target.image))]
    pub async fn launch(
        &self,
        target: &LaunchTarget,
        overrides: &BTreeMap<String, String>,
    ) -> Result<LaunchHandle, BotpackError> {
        let contract = self
            .docker
            .inspect_image(&target.image)
            .await
            .map_err(docker_error)?
            .ok_or_else(|| BotpackError::ImageNotFound {
                image: target.image.clone(),
            })?;

        let defaults = match &target.env_defaults {
            Some(defaults) => defaults.clone(),
            None => image_defaults(&contract),
        };
        let env = self.resolve_environment(&defaults, overrides)?;

        let entrypoint = target
            .entrypoint
            .clone()
            .or_else(|| EntrypointCommand::from_vec(&contract.cmd))
            .ok_or_else(|| BotpackError::LaunchFailed {
                reason: format!("image {} declares no command", target.image),
            })?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", self.settings.name_prefix, &id[..12]);
        let spec = CreateSpec {
            image: target.image.clone(),
            name: name.clone(),
            env: env.into_iter().collect(),
            cmd: entrypoint.to_vec(),
            labels: vec![(LABEL_IMAGE.to_string(), target.image.clone())],
            stop_timeout_secs: self.settings.stop_timeout_secs,
        };

        let container_id = self
            .docker
            .create(spec)
            .await
            .map_err(|e| BotpackError::LaunchFailed {
                reason: e.to_string(),
            })?;

        if let Err(e) = self.docker.start(&container_id).await {
            error!("Container {} failed to start: {}", container_id, e);
            if let Err(remove_err) = self.docker.remove(&container_id, true).await {
                warn!("Failed to remove container {}: {}", container_id, remove_err);
            }
            return Err(BotpackError::LaunchFailed {
                reason: e.to_string(),
            });
        }

        info!(container_id = %container_id, name = %name, "Bot container running");
        Ok(LaunchHandle {
            container_id,
            name,
            image: target.image.clone(),
            state: ContainerState::Running,
        })
    }

    /// Forwards every log chunk to `sink` as soon as it arrives. Returns the
    /// number of bytes forwarded once the stream ends.
    pub async fn stream_logs<S: LogSink>(
        &self,
        handle: &LaunchHandle,
        sink: &mut S,
    ) -> Result<u64, BotpackError> {
        let mut stream = self.docker.logs(&handle.container_id);
        let mut forwarded = 0u64;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    sink.write_chunk(&chunk)?;
                    forwarded += chunk.bytes.len() as u64;
                }
                Err(e) => {
                    warn!("Log stream for {} ended with error: {}", handle.name, e);
                    break;
                }
            }
        }
        Ok(forwarded)
    }

    pub async fn wait(&self, handle: &mut LaunchHandle) -> Result<ContainerState, BotpackError> {
        let code = self
            .docker
            .wait(&handle.container_id)
            .await
            .map_err(docker_error)?;
        handle.state = ContainerState::Exited(code);
        Ok(handle.state)
    }

    /// Launch, forward logs, and wait for exit. When `shutdown` resolves
    /// first, the container is stopped with the configured grace period and
    /// its exit is still awaited.
    #[instrument(skip_all, fields(image = %target.image))]
    pub async fn run<S, F>(
        &self,
        target: &LaunchTarget,
        overrides: &BTreeMap<String, String>,
        sink: &mut S,
        shutdown: F,
    ) -> Result<ContainerState, BotpackError>
    where
        S: LogSink,
        F: Future<Output = ()>,
    {
        let mut handle = self.launch(target, overrides).await?;
        let container_id = handle.container_id.clone();

        let outcome = {
            let work = async {
                tokio::join!(
                    self.stream_logs(&handle, sink),
                    self.docker.wait(&container_id)
                )
            };
            tokio::pin!(work);
            tokio::pin!(shutdown);

            tokio::select! {
                result = &mut work => result,
                _ = &mut shutdown => {
                    info!("Stopping container {}", handle.name);
                    if let Err(e) = self
                        .docker
                        .stop(&container_id, self.settings.stop_timeout_secs)
                        .await
                    {
                        warn!("Failed to stop container {}: {}", container_id, e);
                    }
                    work.await
                }
            }
        };

        let (logs, exit) = outcome;
        if let Err(e) = logs {
            warn!("Log forwarding for {} failed: {}", handle.name, e);
        }

        let exit = exit.map_err(docker_error);
        if let Ok(code) = exit {
            handle.state = ContainerState::Exited(code);
            if code == 0 {
                info!(container_id = %container_id, "Bot exited cleanly");
            } else {
                warn!(container_id = %container_id, exit_code = code, "Bot exited with failure");
            }
        }

        if self.settings.remove_on_exit {
            if let Err(e) = self.docker.remove(&container_id, true).await {
                warn!("Failed to remove container {}: {}", container_id, e);
            }
        }

        exit?;
        Ok(handle.state)
    }
}

fn docker_error(e: anyhow::Error) -> BotpackError {
    BotpackError::DockerError {
        message: e.to_string(),
    }
}
