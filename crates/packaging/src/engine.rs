use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

pub const DOCKERFILE_NAME: &str = "Dockerfile.botpack";

/// The image build backend. Publishing is atomic on the engine side: a tag
/// only moves when `build` returns `Ok`.
#[async_trait]
pub trait BuildEngine: Send + Sync + 'static {
    async fn build(&self, context: &Path, dockerfile: &Path, tags: &[String]) -> anyhow::Result<()>;
    /// Image id for `tag`, or `None` when the engine does not have it.
    async fn inspect_id(&self, tag: &str) -> anyhow::Result<Option<String>>;
    async fn remove(&self, tag: &str) -> anyhow::Result<()>;
}

/// Drives `docker build` through the Docker CLI.
pub struct DockerCliEngine {
    binary: PathBuf,
    host: Option<String>,
}

impl DockerCliEngine {
    pub fn new(binary: impl Into<PathBuf>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host: host.filter(|h| !h.is_empty()),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("--host").arg(host);
        }
        cmd
    }
}

impl Default for DockerCliEngine {
    fn default() -> Self {
        Self::new("docker", None)
    }
}

#[async_trait]
impl BuildEngine for DockerCliEngine {
    #[instrument(skip(self))]
    async fn build(&self, context: &Path, dockerfile: &Path, tags: &[String]) -> anyhow::Result<()> {
        let mut cmd = self.command();
        cmd.arg("build");
        for tag in tags {
            cmd.arg("-t").arg(tag);
        }
        cmd.arg("-f").arg(dockerfile).arg(context);

        info!("Building Docker image: {}", tags.join(", "));
        debug!("Build context: {:?}", context);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Docker build failed - stdout: {}", stdout);
            error!("Docker build failed - stderr: {}", stderr);
            anyhow::bail!("docker build exited with {}: {}", output.status, stderr.trim());
        }

        info!("Built Docker image: {}", tags.join(", "));
        Ok(())
    }

    async fn inspect_id(&self, tag: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .command()
            .args(["image", "inspect", "--format", "{{.Id}}"])
            .arg(tag)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(id).filter(|id| !id.is_empty()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such image") || stderr.contains("No such object") {
            Ok(None)
        } else {
            anyhow::bail!("docker image inspect {tag} failed: {}", stderr.trim())
        }
    }

    async fn remove(&self, tag: &str) -> anyhow::Result<()> {
        let output = self
            .command()
            .args(["image", "rm"])
            .arg(tag)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "docker image rm {tag} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!("Removed image: {}", tag);
        Ok(())
    }
}
