//! The two build stages and the boundary between them.
//!
//! Stage 1 maps a manifest to a [`DependencyArtifactSet`]; stage 2 maps
//! that set plus a [`SourceSnapshot`] to a [`RunnableImage`]. The stage-1
//! digest is computed from stage-1 inputs only, so source edits can never
//! change which dependency layer is used.

use crate::cache::{LayerCache, LayerRecord};
use crate::dockerfile;
use crate::engine::{BuildEngine, DOCKERFILE_NAME};
use crate::snapshot::SourceSnapshot;
use botpack_models::{
    BaseImage, BotpackError, BuildOptions, BuildStage, EntrypointCommand, EnvironmentSet, Manifest,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const SHORT_DIGEST: usize = 16;

/// Inputs of the dependency stage.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub image_name: String,
    pub base_image: BaseImage,
    pub options: BuildOptions,
    pub system_packages: Vec<String>,
    pub workdir: String,
}

#[derive(Debug, Clone)]
pub struct DependencyPlan {
    pub base_image: BaseImage,
    pub options: BuildOptions,
    pub system_packages: Vec<String>,
    pub workdir: String,
    pub manifest_file: String,
    pub manifest_sha256: String,
    pub digest: String,
    pub tag: String,
    manifest: Manifest,
}

impl DependencyPlan {
    pub fn dockerfile(&self) -> String {
        dockerfile::dependency_dockerfile(self)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The artifact set this plan yields, before anything is built.
    pub fn expected_artifacts(&self) -> DependencyArtifactSet {
        DependencyArtifactSet {
            tag: self.tag.clone(),
            digest: self.digest.clone(),
            manifest_sha256: self.manifest_sha256.clone(),
            image_id: None,
            reused: false,
        }
    }
}

/// Installed dependencies, addressed by the digest of their inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyArtifactSet {
    pub tag: String,
    pub digest: String,
    pub manifest_sha256: String,
    pub image_id: Option<String>,
    /// True when an existing layer was used and no install ran.
    pub reused: bool,
}

pub struct DependencyStage {
    engine: Arc<dyn BuildEngine>,
}

impl DependencyStage {
    pub fn new(engine: Arc<dyn BuildEngine>) -> Self {
        Self { engine }
    }

    pub fn plan(spec: &DependencySpec, manifest: Manifest) -> DependencyPlan {
        let manifest_sha256 = manifest.sha256();

        let mut hasher = Sha256::new();
        hasher.update(format!("base={}\n", spec.base_image));
        hasher.update(format!("options={}\n", spec.options.fingerprint()));
        hasher.update(format!("system={}\n", spec.system_packages.join(",")));
        hasher.update(format!("workdir={}\n", spec.workdir));
        hasher.update(format!("manifest={}\n", manifest.file_name()));
        hasher.update(manifest.bytes());
        let digest = format!("{:x}", hasher.finalize());

        let tag = format!("{}-deps:{}", spec.image_name, &digest[..SHORT_DIGEST]);

        DependencyPlan {
            base_image: spec.base_image.clone(),
            options: spec.options,
            system_packages: spec.system_packages.clone(),
            workdir: spec.workdir.clone(),
            manifest_file: manifest.file_name().to_string(),
            manifest_sha256,
            digest,
            tag,
            manifest,
        }
    }

    #[instrument(skip(self, plan, cache), fields(tag = %plan.tag))]
    pub async fn build(
        &self,
        plan: &DependencyPlan,
        cache: &mut LayerCache,
    ) -> Result<DependencyArtifactSet, BotpackError> {
        let existing = self.engine.inspect_id(&plan.tag).await.map_err(docker_error)?;

        if let Some(image_id) = existing {
            if cache.get(&plan.digest).is_some() {
                cache.touch(&plan.digest);
            } else {
                cache.record(&plan.digest, layer_record(plan, Some(image_id.clone())));
            }
            info!("Reusing dependency layer {}", plan.tag);
            return Ok(DependencyArtifactSet {
                tag: plan.tag.clone(),
                digest: plan.digest.clone(),
                manifest_sha256: plan.manifest_sha256.clone(),
                image_id: Some(image_id),
                reused: true,
            });
        }

        if cache.forget(&plan.digest).is_some() {
            warn!(
                "Dependency layer {} was recorded but is gone from the engine; rebuilding",
                plan.tag
            );
        }

        let context = tempfile::tempdir()?;
        // Only the manifest enters this context.
        std::fs::write(context.path().join(&plan.manifest_file), plan.manifest.bytes())?;
        let dockerfile_path = context.path().join(DOCKERFILE_NAME);
        std::fs::write(&dockerfile_path, plan.dockerfile())?;

        self.engine
            .build(context.path(), &dockerfile_path, std::slice::from_ref(&plan.tag))
            .await
            .map_err(|e| BotpackError::BuildFailed {
                stage: BuildStage::Dependencies,
                message: e.to_string(),
            })?;

        let image_id = self.engine.inspect_id(&plan.tag).await.map_err(docker_error)?;
        cache.record(&plan.digest, layer_record(plan, image_id.clone()));

        Ok(DependencyArtifactSet {
            tag: plan.tag.clone(),
            digest: plan.digest.clone(),
            manifest_sha256: plan.manifest_sha256.clone(),
            image_id,
            reused: false,
        })
    }
}

fn layer_record(plan: &DependencyPlan, image_id: Option<String>) -> LayerRecord {
    let now = Utc::now();
    LayerRecord {
        tag: plan.tag.clone(),
        manifest_sha256: plan.manifest_sha256.clone(),
        base_image: plan.base_image.to_string(),
        image_id,
        built_at: now,
        last_used: now,
    }
}

fn docker_error(e: anyhow::Error) -> BotpackError {
    BotpackError::DockerError {
        message: e.to_string(),
    }
}

/// Inputs of the application stage besides the dependency set and snapshot.
#[derive(Debug, Clone)]
pub struct ApplicationSpec {
    pub image_name: String,
    pub workdir: String,
    /// Script that must exist in the snapshot.
    pub entry_script: String,
    pub entrypoint: EntrypointCommand,
    pub env_defaults: EnvironmentSet,
}

#[derive(Debug, Clone)]
pub struct ApplicationPlan {
    pub dependency_tag: String,
    pub source_sha256: String,
    pub workdir: String,
    pub entrypoint: EntrypointCommand,
    pub env_defaults: EnvironmentSet,
    pub digest: String,
    pub tag: String,
    pub alias_tag: String,
    snapshot: SourceSnapshot,
}

impl ApplicationPlan {
    pub fn dockerfile(&self) -> String {
        dockerfile::application_dockerfile(self)
    }

    pub fn snapshot(&self) -> &SourceSnapshot {
        &self.snapshot
    }
}

/// The final image: dependency layer plus application layer and launch contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableImage {
    pub tag: String,
    pub alias_tag: String,
    pub image_id: Option<String>,
    pub dependency: DependencyArtifactSet,
    pub entrypoint: EntrypointCommand,
    pub env_defaults: EnvironmentSet,
}

pub struct ApplicationStage {
    engine: Arc<dyn BuildEngine>,
}

impl ApplicationStage {
    pub fn new(engine: Arc<dyn BuildEngine>) -> Self {
        Self { engine }
    }

    pub fn plan(
        deps: &DependencyArtifactSet,
        snapshot: SourceSnapshot,
        spec: &ApplicationSpec,
    ) -> Result<ApplicationPlan, BotpackError> {
        if !snapshot.contains(&spec.entry_script) {
            return Err(BotpackError::EntrypointMissing {
                script: spec.entry_script.clone(),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(format!("deps={}\n", deps.digest));
        hasher.update(format!("source={}\n", snapshot.sha256()));
        hasher.update(format!("workdir={}\n", spec.workdir));
        hasher.update(format!("cmd={}\n", spec.entrypoint.exec_form()));
        for (name, value) in spec.env_defaults.defaults() {
            hasher.update(format!("env={name}={value}\n"));
        }
        let digest = format!("{:x}", hasher.finalize());

        Ok(ApplicationPlan {
            dependency_tag: deps.tag.clone(),
            source_sha256: snapshot.sha256().to_string(),
            workdir: spec.workdir.clone(),
            entrypoint: spec.entrypoint.clone(),
            env_defaults: spec.env_defaults.clone(),
            tag: format!("{}:{}", spec.image_name, &digest[..SHORT_DIGEST]),
            alias_tag: format!("{}:latest", spec.image_name),
            digest,
            snapshot,
        })
    }

    #[instrument(skip(self, plan, deps), fields(tag = %plan.tag))]
    pub async fn build(
        &self,
        plan: &ApplicationPlan,
        deps: &DependencyArtifactSet,
    ) -> Result<RunnableImage, BotpackError> {
        let context = tempfile::tempdir()?;
        plan.snapshot.copy_to(context.path())?;
        write_context_files(context.path(), plan)?;

        let tags = [plan.tag.clone(), plan.alias_tag.clone()];
        self.engine
            .build(context.path(), &context.path().join(DOCKERFILE_NAME), &tags)
            .await
            .map_err(|e| BotpackError::BuildFailed {
                stage: BuildStage::Application,
                message: e.to_string(),
            })?;

        let image_id = self.engine.inspect_id(&plan.tag).await.map_err(docker_error)?;
        info!("Application image ready: {}", plan.tag);

        Ok(RunnableImage {
            tag: plan.tag.clone(),
            alias_tag: plan.alias_tag.clone(),
            image_id,
            dependency: deps.clone(),
            entrypoint: plan.entrypoint.clone(),
            env_defaults: plan.env_defaults.clone(),
        })
    }
}

fn write_context_files(context: &Path, plan: &ApplicationPlan) -> Result<(), BotpackError> {
    std::fs::write(context.join(DOCKERFILE_NAME), plan.dockerfile())?;
    std::fs::write(
        context.join(".dockerignore"),
        format!("{DOCKERFILE_NAME}\n.dockerignore\n"),
    )?;
    Ok(())
}
