use botpack_launcher::{
    BollardDocker, CallerEnvironment, LaunchSettings, LaunchTarget, Launcher, StdioSink,
};
use botpack_metrics::{BuildMetrics, TracingService};
use botpack_models::{BotpackError, BuildStage, Config, ContainerState};
use botpack_packaging::{BuildReport, BuildRequest, DockerCliEngine, LayerCache, Pipeline};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "botpack")]
#[command(about = "Build and run containerized Python bots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file [default: botpack.toml when present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependency layer and the application image
    Build {
        /// Print build metrics in the Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
    /// Start the bot and forward its output until it exits
    Run {
        /// Image to run (defaults to <image.name>:latest)
        #[arg(long)]
        image: Option<String>,
        /// Build before running
        #[arg(long, conflicts_with = "image")]
        build: bool,
        /// Environment override, KEY=VALUE or KEY to copy from this shell
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,
        /// Read environment overrides from a dotenv file
        #[arg(long)]
        env_file: Option<PathBuf>,
        /// Keep the container after it exits
        #[arg(long)]
        keep: bool,
    },
    /// Show the tags and Dockerfiles a build would use
    Plan,
    /// Inspect or prune the dependency layer ledger
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List recorded dependency layers
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove dependency layers unused for a number of days
    Prune {
        #[arg(long, default_value = "30")]
        max_age_days: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = TracingService::init(cli.json_logs) {
        eprintln!("botpack: {e}");
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("botpack: {e:#}");
            ExitCode::from(failure_code(&e))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    match cli.command {
        Commands::Build {
            metrics: print_metrics,
        } => {
            let metrics = BuildMetrics::new()?;
            let report = build(&config, &metrics).await?;
            println!("{}", report.image.tag);
            if print_metrics {
                print!("{}", metrics.render()?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            image,
            build: build_first,
            env,
            env_file,
            keep,
        } => {
            let metrics = BuildMetrics::new()?;
            let target = if build_first {
                let report = build(&config, &metrics).await?;
                LaunchTarget {
                    image: report.image.tag.clone(),
                    entrypoint: Some(report.image.entrypoint.clone()),
                    env_defaults: Some(report.image.env_defaults.clone()),
                }
            } else {
                configured_target(&config, image)
            };
            let overrides = caller_environment(&config, &env, env_file.as_deref())?;
            let state = run(&config, &target, &overrides, keep, &metrics).await?;
            Ok(ExitCode::from(container_exit_code(state)))
        }
        Commands::Plan => {
            plan(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache { command } => {
            match command {
                CacheCommands::List { json } => list_cache(&config, json)?,
                CacheCommands::Prune { max_age_days } => {
                    let mut pipeline = pipeline(&config)?;
                    for tag in pipeline.prune(max_age_days).await? {
                        println!("removed {tag}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn pipeline(config: &Config) -> Result<Pipeline, BotpackError> {
    let host = Some(config.docker.host.clone());
    let engine = Arc::new(DockerCliEngine::new(&config.docker.binary, host));
    let cache = LayerCache::open(config.cache_dir())?;
    Ok(Pipeline::new(engine, cache))
}

async fn build(config: &Config, metrics: &BuildMetrics) -> Result<BuildReport, BotpackError> {
    let request = BuildRequest::from_config(config);
    let plan = Pipeline::plan(&request).inspect_err(TracingService::log_build_failed)?;
    TracingService::log_stage_started(BuildStage::Dependencies, &plan.dependencies.tag);

    let mut pipeline = pipeline(config)?;
    match pipeline.build(&request).await {
        Ok(report) => {
            if report.dependency_reused {
                let deps = report.dependencies();
                TracingService::log_layer_reused(&deps.tag, &deps.digest);
            }
            TracingService::log_build_completed(
                &report.image.tag,
                report.dependency_reused,
                report.duration_ms,
            );
            metrics.record_build(report.dependency_reused, report.duration_ms);
            Ok(report)
        }
        Err(e) => {
            TracingService::log_build_failed(&e);
            metrics.record_build_failure();
            Err(e)
        }
    }
}

/// An existing image runs with the command and environment it was built
/// with; only caller overrides are layered on top.
fn configured_target(config: &Config, image: Option<String>) -> LaunchTarget {
    LaunchTarget::image(image.unwrap_or_else(|| format!("{}:latest", config.image.name)))
}

fn caller_environment(
    config: &Config,
    entries: &[String],
    env_file: Option<&Path>,
) -> Result<BTreeMap<String, String>, BotpackError> {
    let host = |name: &str| std::env::var(name).ok();
    let mut caller = CallerEnvironment::new().pass_through(&config.runtime.pass_through, host);
    if let Some(path) = env_file {
        caller = caller.env_file(path)?;
    }
    Ok(caller.entries(entries, host)?.into_overrides())
}

async fn run(
    config: &Config,
    target: &LaunchTarget,
    overrides: &BTreeMap<String, String>,
    keep: bool,
    metrics: &BuildMetrics,
) -> Result<ContainerState, BotpackError> {
    let docker = BollardDocker::connect(Some(config.docker.host.as_str()))?;
    let settings = LaunchSettings {
        name_prefix: config.image.name.clone(),
        required_env: config.runtime.required_env.clone(),
        stop_timeout_secs: config.runtime.stop_timeout_secs,
        remove_on_exit: !keep,
    };
    let launcher = Launcher::new(Arc::new(docker), settings);

    metrics.record_launch();
    let state = launcher
        .run(target, overrides, &mut StdioSink, shutdown_signal())
        .await
        .inspect_err(|e| TracingService::log_launch_refused(&target.image, e))?;

    if let Some(code) = state.exit_code() {
        metrics.record_exit(code);
    }
    TracingService::log_container_exited(&target.image, state);
    Ok(state)
}

/// Resolves on Ctrl-C or SIGTERM. The SIGTERM handler is installed before
/// the future is returned.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };

    async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            match terminate {
                Some(mut stream) => {
                    if stream.recv().await.is_none() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}

fn plan(config: &Config) -> Result<(), BotpackError> {
    let plan = Pipeline::plan(&BuildRequest::from_config(config))?;
    let deps = &plan.dependencies;
    let app = &plan.application;

    println!("dependency layer: {}", deps.tag);
    println!("manifest sha256:  {}", deps.manifest_sha256);
    for requirement in deps.manifest().requirements() {
        println!("  {}{}", requirement.name, requirement.constraint);
    }
    println!();
    println!("# {} ({})", deps.tag, BuildStage::Dependencies);
    print!("{}", deps.dockerfile());
    println!();
    println!(
        "application image: {} (alias {}), {} files",
        app.tag,
        app.alias_tag,
        app.snapshot().files().len()
    );
    println!("# {} ({})", app.tag, BuildStage::Application);
    print!("{}", app.dockerfile());
    Ok(())
}

fn list_cache(config: &Config, json: bool) -> anyhow::Result<()> {
    let cache = LayerCache::open(config.cache_dir())?;
    if json {
        let records: Vec<_> = cache.entries().map(|(_, record)| record).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if cache.is_empty() {
        println!("no dependency layers recorded");
        return Ok(());
    }
    for (_, record) in cache.entries() {
        println!(
            "{}\t{}\tlast used {}",
            record.tag,
            record.base_image,
            record.last_used.to_rfc3339()
        );
    }
    Ok(())
}

/// Container exit status as a process exit code; codes outside 1..=255 keep
/// their low byte, and a non-zero code never collapses to success.
fn container_exit_code(state: ContainerState) -> u8 {
    match state.exit_code() {
        Some(0) => 0,
        Some(code) => match (code & 0xff) as u8 {
            0 => 1,
            low => low,
        },
        None => 1,
    }
}

fn failure_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<BotpackError>()
        .map(|e| e.exit_code() as u8)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_repeated_env_flags() {
        let cli = Cli::try_parse_from([
            "botpack",
            "run",
            "-e",
            "TZ=Europe/Berlin",
            "--env",
            "TELEGRAM_BOT_TOKEN",
            "--keep",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { env, keep, image, .. } => {
                assert_eq!(env, vec!["TZ=Europe/Berlin", "TELEGRAM_BOT_TOKEN"]);
                assert!(keep);
                assert!(image.is_none());
            }
            _ => panic!("expected run"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn explicit_config_path_is_kept() {
        let cli = Cli::try_parse_from(["botpack", "plan", "--config", "deploy/prod.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("deploy/prod.toml")));
    }

    #[test]
    fn run_build_conflicts_with_image() {
        assert!(Cli::try_parse_from(["botpack", "run", "--build", "--image", "bot:1"]).is_err());
    }

    #[test]
    fn prune_defaults_to_thirty_days() {
        let cli = Cli::try_parse_from(["botpack", "cache", "prune"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                command: CacheCommands::Prune { max_age_days: 30 }
            }
        ));
    }

    #[test]
    fn exit_codes_follow_the_container() {
        assert_eq!(container_exit_code(ContainerState::Exited(0)), 0);
        assert_eq!(container_exit_code(ContainerState::Exited(2)), 2);
        assert_eq!(container_exit_code(ContainerState::Exited(143)), 143);
        assert_eq!(container_exit_code(ContainerState::Exited(256)), 1);
        assert_eq!(container_exit_code(ContainerState::Running), 1);
    }

    #[test]
    fn errors_map_to_their_exit_codes() {
        let build = anyhow::Error::from(BotpackError::EntrypointMissing {
            script: "bot.py".to_string(),
        });
        assert_eq!(failure_code(&build), 2);

        let launch = anyhow::Error::from(BotpackError::MissingEnvironment {
            names: vec!["TELEGRAM_BOT_TOKEN".to_string()],
        });
        assert_eq!(failure_code(&launch), 125);

        assert_eq!(failure_code(&anyhow::anyhow!("socket closed")), 1);
    }

    #[test]
    fn configured_target_uses_latest_alias() {
        let mut config = Config::default();
        config.image.name = "tweet-bot".to_string();
        config.runtime.timezone = "Asia/Tokyo".to_string();
        config.app.entrypoint = "main.py".to_string();

        let target = configured_target(&config, None);
        assert_eq!(target.image, "tweet-bot:latest");
        // Current config never replaces what the image was built with.
        assert!(target.entrypoint.is_none());
        assert!(target.env_defaults.is_none());

        let named = configured_target(&config, Some("tweet-bot:0123456789abcdef".to_string()));
        assert_eq!(named.image, "tweet-bot:0123456789abcdef");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_resolves_shutdown() {
        let shutdown = shutdown_signal();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown)
            .await
            .expect("SIGTERM did not trigger shutdown");
    }
}
