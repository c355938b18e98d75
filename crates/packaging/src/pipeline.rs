use crate::cache::LayerCache;
use crate::engine::BuildEngine;
use crate::snapshot::{IgnoreRules, SourceSnapshot};
use crate::stages::{
    ApplicationPlan, ApplicationSpec, ApplicationStage, DependencyArtifactSet, DependencyPlan,
    DependencySpec, DependencyStage, RunnableImage,
};
use botpack_models::{BotpackError, Config, EntrypointCommand, EnvironmentSet, Manifest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Everything one build needs, fixed at build initiation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub dependencies: DependencySpec,
    pub application: ApplicationSpec,
    pub manifest_path: PathBuf,
    pub source_dir: PathBuf,
    pub ignore: IgnoreRules,
}

impl BuildRequest {
    pub fn from_config(config: &Config) -> Self {
        let options = config.build.options;
        Self {
            dependencies: DependencySpec {
                image_name: config.image.name.clone(),
                base_image: config.image.base.clone(),
                options,
                system_packages: config.build.system_packages.clone(),
                workdir: config.app.workdir.clone(),
            },
            application: ApplicationSpec {
                image_name: config.image.name.clone(),
                workdir: config.app.workdir.clone(),
                entry_script: config.app.entrypoint.clone(),
                entrypoint: EntrypointCommand::python_script(
                    &config.app.interpreter,
                    &config.app.entrypoint,
                    options.unbuffered_io,
                ),
                env_defaults: EnvironmentSet::with_timezone(&config.runtime.timezone),
            },
            manifest_path: config.manifest_path(),
            source_dir: config.source_dir(),
            ignore: IgnoreRules::new(&config.build.ignore),
        }
    }
}

/// Both stage plans, computed without touching the engine.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub dependencies: DependencyPlan,
    pub application: ApplicationPlan,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub image: RunnableImage,
    pub dependency_reused: bool,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn dependencies(&self) -> &DependencyArtifactSet {
        &self.image.dependency
    }
}

pub struct Pipeline {
    engine: Arc<dyn BuildEngine>,
    dependency_stage: DependencyStage,
    application_stage: ApplicationStage,
    cache: LayerCache,
}

impl Pipeline {
    pub fn new(engine: Arc<dyn BuildEngine>, cache: LayerCache) -> Self {
        Self {
            dependency_stage: DependencyStage::new(engine.clone()),
            application_stage: ApplicationStage::new(engine.clone()),
            engine,
            cache,
        }
    }

    pub fn plan(request: &BuildRequest) -> Result<BuildPlan, BotpackError> {
        let manifest = Manifest::load(&request.manifest_path)?;
        let dependencies = DependencyStage::plan(&request.dependencies, manifest);
        let snapshot = SourceSnapshot::capture(&request.source_dir, &request.ignore)?;
        let application = ApplicationStage::plan(
            &dependencies.expected_artifacts(),
            snapshot,
            &request.application,
        )?;
        Ok(BuildPlan {
            dependencies,
            application,
        })
    }

    /// Runs stage 1 then stage 2. Any failure aborts before later steps run;
    /// the ledger is saved only after a successful build.
    #[instrument(skip(self, request))]
    pub async fn build(&mut self, request: &BuildRequest) -> Result<BuildReport, BotpackError> {
        let started = Instant::now();

        // Inputs are validated before either stage touches the engine.
        let manifest = Manifest::load(&request.manifest_path)?;
        let snapshot = SourceSnapshot::capture(&request.source_dir, &request.ignore)?;
        let dep_plan = DependencyStage::plan(&request.dependencies, manifest);
        ApplicationStage::plan(&dep_plan.expected_artifacts(), snapshot.clone(), &request.application)?;

        let deps = self.dependency_stage.build(&dep_plan, &mut self.cache).await?;
        let app_plan = ApplicationStage::plan(&deps, snapshot, &request.application)?;
        let image = self.application_stage.build(&app_plan, &deps).await?;
        self.cache.save()?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            image = %image.tag,
            dependency_layer = %deps.tag,
            dependency_reused = deps.reused,
            duration_ms,
            "Build completed"
        );

        Ok(BuildReport {
            dependency_reused: deps.reused,
            image,
            duration_ms,
        })
    }

    /// Removes dependency layers unused for `max_age_days` from the engine
    /// and the ledger. Returns the removed tags.
    #[instrument(skip(self))]
    pub async fn prune(&mut self, max_age_days: u64) -> Result<Vec<String>, BotpackError> {
        let mut removed = Vec::new();
        for digest in self.cache.stale(max_age_days, chrono::Utc::now()) {
            let Some(record) = self.cache.get(&digest).cloned() else {
                continue;
            };
            match self.engine.inspect_id(&record.tag).await {
                Ok(Some(_)) => {
                    self.engine
                        .remove(&record.tag)
                        .await
                        .map_err(|e| BotpackError::DockerError {
                            message: e.to_string(),
                        })?;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not inspect {}: {}; keeping ledger entry", record.tag, e);
                    continue;
                }
            }
            self.cache.forget(&digest);
            removed.push(record.tag);
        }
        self.cache.save()?;
        info!("Pruned {} dependency layers", removed.len());
        Ok(removed)
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LayerCache {
        &mut self.cache
    }
}
