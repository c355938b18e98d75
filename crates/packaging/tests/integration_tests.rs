use botpack_models::{BotpackError, BuildStage};
use botpack_packaging::{BuildRequest, LayerCache, LayerRecord, Pipeline, DOCKERFILE_NAME};
use botpack_testsupport::{BotProject, FakeEngine};
use chrono::{Duration, Utc};
use std::sync::Arc;

fn pipeline(engine: &FakeEngine, project: &BotProject) -> Pipeline {
    let cache = LayerCache::open(project.config().cache_dir()).unwrap();
    Pipeline::new(Arc::new(engine.clone()), cache)
}

#[tokio::test]
async fn source_edit_reuses_dependency_layer() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);
    let request = BuildRequest::from_config(&project.config());

    let first = pipeline.build(&request).await.unwrap();
    assert!(!first.dependency_reused);

    project.write("bot.py", "print('edited', flush=True)\n");
    let second = pipeline.build(&request).await.unwrap();

    assert!(second.dependency_reused);
    assert_eq!(first.dependencies().tag, second.dependencies().tag);
    assert_ne!(first.image.tag, second.image.tag);
    assert_eq!(engine.builds_tagged("tweet-bot-deps:").len(), 1);
    assert_eq!(engine.builds_tagged("tweet-bot:").len(), 2);
}

#[tokio::test]
async fn manifest_change_rebuilds_dependency_layer() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);
    let request = BuildRequest::from_config(&project.config());

    let first = pipeline.build(&request).await.unwrap();
    project.write(
        "requirements.txt",
        "python-telegram-bot==20.7\ntweepy==4.14.0\nrequests==2.31.1\n",
    );
    let second = pipeline.build(&request).await.unwrap();

    assert!(!second.dependency_reused);
    assert_ne!(first.dependencies().digest, second.dependencies().digest);
    assert_eq!(engine.builds_tagged("tweet-bot-deps:").len(), 2);
    assert_eq!(pipeline.cache().len(), 2);
}

#[tokio::test]
async fn dependency_context_holds_only_the_manifest() {
    let project = BotProject::new();
    project.write("handlers/commands.py", "def start():\n    pass\n");
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap();

    let deps = &engine.builds_tagged("tweet-bot-deps:")[0];
    assert_eq!(
        deps.context_files,
        vec![DOCKERFILE_NAME.to_string(), "requirements.txt".to_string()]
    );

    let app = &engine.builds_tagged("tweet-bot:")[0];
    assert!(app.context_files.contains(&"bot.py".to_string()));
    assert!(app
        .context_files
        .contains(&"handlers/commands.py".to_string()));
    assert!(!app.context_files.iter().any(|f| f.starts_with(".botpack")));
}

#[tokio::test]
async fn generated_build_files_replace_user_copies() {
    let project = BotProject::new();
    project.write(".dockerignore", "*.py\n");
    project.write(DOCKERFILE_NAME, "FROM scratch\n");
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap();

    let app = &engine.builds_tagged("tweet-bot:")[0];
    assert!(app.dockerfile.contains("COPY . ./"));
    assert_eq!(
        app.dockerignore.as_deref(),
        Some(format!("{DOCKERFILE_NAME}\n.dockerignore\n").as_str())
    );
    assert!(app.context_files.contains(&"bot.py".to_string()));
}

#[tokio::test]
async fn dockerfiles_carry_flags_and_launch_contract() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    let report = pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap();

    let deps = &engine.builds_tagged("tweet-bot-deps:")[0].dockerfile;
    assert!(deps.starts_with("FROM python:3.11-slim\n"));
    let flags = deps.find("ENV PYTHONDONTWRITEBYTECODE=1").unwrap();
    let install = deps
        .find("RUN pip install --no-cache-dir -r requirements.txt")
        .unwrap();
    assert!(flags < install);
    assert!(deps.contains("ENV PYTHONUNBUFFERED=1"));
    assert!(deps.contains("ENV PIP_NO_CACHE_DIR=1"));
    assert!(!deps.contains("apt-get"));

    let app = &engine.builds_tagged("tweet-bot:")[0].dockerfile;
    assert!(app.starts_with(&format!("FROM {}\n", report.dependencies().tag)));
    assert!(app.contains("ENV TZ=UTC"));
    assert!(app.contains(r#"CMD ["python","-u","bot.py"]"#));

    let tags = &engine.builds_tagged("tweet-bot:")[0].tags;
    assert_eq!(tags[1], "tweet-bot:latest");
    assert!(engine.image_id("tweet-bot:latest").is_some());
}

#[tokio::test]
async fn system_packages_are_installed_before_dependencies() {
    let project = BotProject::new();
    let mut config = project.config();
    config.build.system_packages = vec!["gcc".to_string(), "libffi-dev".to_string()];
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    pipeline
        .build(&BuildRequest::from_config(&config))
        .await
        .unwrap();

    let deps = &engine.builds_tagged("tweet-bot-deps:")[0].dockerfile;
    let apt = deps
        .find("apt-get install -y --no-install-recommends gcc libffi-dev")
        .unwrap();
    assert!(apt < deps.find("RUN pip install").unwrap());
}

#[tokio::test]
async fn dependency_failure_aborts_the_build() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    engine.fail_when_dockerfile_contains("pip install");
    let mut pipeline = pipeline(&engine, &project);

    let err = pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BotpackError::BuildFailed {
            stage: BuildStage::Dependencies,
            ..
        }
    ));
    assert!(engine.builds().is_empty());
    assert!(engine.image_id("tweet-bot:latest").is_none());
    assert!(pipeline.cache().is_empty());
    assert!(!project.path(".botpack/layers.json").exists());
}

#[tokio::test]
async fn application_failure_keeps_previous_latest() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);
    let request = BuildRequest::from_config(&project.config());

    let first = pipeline.build(&request).await.unwrap();
    let previous = engine.image_id("tweet-bot:latest");

    engine.fail_when_dockerfile_contains("COPY . ./");
    project.write("bot.py", "raise SystemExit(1)\n");
    let err = pipeline.build(&request).await.unwrap_err();

    assert!(matches!(
        err,
        BotpackError::BuildFailed {
            stage: BuildStage::Application,
            ..
        }
    ));
    assert_eq!(engine.image_id("tweet-bot:latest"), previous);
    assert_eq!(engine.image_id(&first.image.tag), previous);
}

#[tokio::test]
async fn missing_entry_script_fails_before_any_build() {
    let project = BotProject::new();
    project.remove("bot.py");
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    let err = pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap_err();

    assert!(matches!(err, BotpackError::EntrypointMissing { ref script } if script == "bot.py"));
    assert!(engine.builds().is_empty());
}

#[tokio::test]
async fn missing_manifest_fails_before_any_build() {
    let project = BotProject::new();
    project.remove("requirements.txt");
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    let err = pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap_err();

    assert!(matches!(err, BotpackError::ManifestMissing { .. }));
    assert!(err.is_build_failure());
    assert!(engine.builds().is_empty());
}

#[tokio::test]
async fn layer_missing_from_engine_is_rebuilt() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);
    let request = BuildRequest::from_config(&project.config());

    let first = pipeline.build(&request).await.unwrap();
    engine.forget_image(&first.dependencies().tag);
    let second = pipeline.build(&request).await.unwrap();

    assert!(!second.dependency_reused);
    assert_eq!(first.dependencies().tag, second.dependencies().tag);
    assert_eq!(engine.builds_tagged("tweet-bot-deps:").len(), 2);
}

#[tokio::test]
async fn ledger_survives_reopen() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let request = BuildRequest::from_config(&project.config());

    let report = pipeline(&engine, &project).build(&request).await.unwrap();

    let reopened = LayerCache::open(project.config().cache_dir()).unwrap();
    let record = reopened.get(&report.dependencies().digest).unwrap();
    assert_eq!(record.tag, report.dependencies().tag);
    assert_eq!(record.base_image, "python:3.11-slim");
}

#[tokio::test]
async fn prune_removes_stale_layers() {
    let project = BotProject::new();
    let engine = FakeEngine::new();
    let mut pipeline = pipeline(&engine, &project);

    let report = pipeline
        .build(&BuildRequest::from_config(&project.config()))
        .await
        .unwrap();
    let deps = report.dependencies().clone();

    let long_ago = Utc::now() - Duration::days(90);
    pipeline.cache_mut().record(
        &deps.digest,
        LayerRecord {
            tag: deps.tag.clone(),
            manifest_sha256: deps.manifest_sha256.clone(),
            base_image: "python:3.11-slim".to_string(),
            image_id: deps.image_id.clone(),
            built_at: long_ago,
            last_used: long_ago,
        },
    );

    assert!(pipeline.prune(365).await.unwrap().is_empty());
    let removed = pipeline.prune(30).await.unwrap();

    assert_eq!(removed, vec![deps.tag.clone()]);
    assert_eq!(engine.removed(), vec![deps.tag.clone()]);
    assert!(pipeline.cache().is_empty());
}

#[test]
fn plan_does_not_need_an_engine() {
    let project = BotProject::new();
    let plan = Pipeline::plan(&BuildRequest::from_config(&project.config())).unwrap();

    assert!(plan.dependencies.tag.starts_with("tweet-bot-deps:"));
    assert_eq!(plan.dependencies.tag.len(), "tweet-bot-deps:".len() + 16);
    assert_eq!(plan.application.dependency_tag, plan.dependencies.tag);
    assert_eq!(plan.dependencies.manifest().requirements().len(), 3);
    assert!(plan.application.snapshot().contains("bot.py"));
}
