use botpack_models::{BotpackError, BuildStage, ContainerState};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

pub struct TracingService;

impl TracingService {
    /// Installs the global subscriber. Output goes to stderr so the bot's own
    /// stdout stays untouched; `RUST_LOG` overrides the default filter.
    pub fn init(json: bool) -> anyhow::Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr);

        let result = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
    }

    pub fn log_stage_started(stage: BuildStage, tag: &str) {
        info!(stage = %stage, tag = %tag, "Build stage started");
    }

    pub fn log_layer_reused(tag: &str, digest: &str) {
        info!(tag = %tag, digest = %digest, "Dependency layer reused");
    }

    pub fn log_build_completed(image: &str, dependency_reused: bool, duration_ms: u64) {
        info!(
            image = %image,
            dependency_reused = dependency_reused,
            duration_ms = duration_ms,
            "Image built"
        );
    }

    pub fn log_build_failed(error: &BotpackError) {
        error!(exit_code = error.exit_code(), error = %error, "Build failed");
    }

    pub fn log_container_exited(image: &str, state: ContainerState) {
        match state.exit_code() {
            Some(0) => info!(image = %image, exit_code = 0, "Bot exited"),
            Some(code) => warn!(image = %image, exit_code = code, "Bot exited with failure"),
            None => info!(image = %image, "Bot still running"),
        }
    }

    pub fn log_launch_refused(image: &str, error: &BotpackError) {
        error!(image = %image, error = %error, "Launch refused");
    }
}
