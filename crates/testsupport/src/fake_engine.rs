use async_trait::async_trait;
use botpack_packaging::BuildEngine;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One `build` call as the engine saw it.
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub tags: Vec<String>,
    pub dockerfile: String,
    /// Files in the build context, relative and sorted.
    pub context_files: Vec<String>,
    /// Contents of the context's `.dockerignore`, if any.
    pub dockerignore: Option<String>,
}

#[derive(Default)]
struct State {
    images: HashMap<String, String>,
    builds: Vec<RecordedBuild>,
    removed: Vec<String>,
    fail_on: Option<String>,
    next_id: u64,
}

/// Build engine that records builds instead of running Docker.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake engine state poisoned")
    }

    /// Fail any build whose Dockerfile contains `needle`.
    pub fn fail_when_dockerfile_contains(&self, needle: &str) {
        self.state().fail_on = Some(needle.to_string());
    }

    pub fn forget_image(&self, tag: &str) {
        self.state().images.remove(tag);
    }

    pub fn builds(&self) -> Vec<RecordedBuild> {
        self.state().builds.clone()
    }

    pub fn builds_tagged(&self, prefix: &str) -> Vec<RecordedBuild> {
        self.builds()
            .into_iter()
            .filter(|b| b.tags.iter().any(|t| t.starts_with(prefix)))
            .collect()
    }

    pub fn image_id(&self, tag: &str) -> Option<String> {
        self.state().images.get(tag).cloned()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }
}

fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl BuildEngine for FakeEngine {
    async fn build(&self, context: &Path, dockerfile: &Path, tags: &[String]) -> anyhow::Result<()> {
        let contents = std::fs::read_to_string(dockerfile)?;
        let context_files = list_files(context)?;
        let dockerignore = std::fs::read_to_string(context.join(".dockerignore")).ok();

        let mut state = self.state();
        if let Some(needle) = &state.fail_on {
            if contents.contains(needle.as_str()) {
                anyhow::bail!("simulated build failure: step matching '{needle}' exited with 1");
            }
        }

        state.next_id += 1;
        let id = format!("sha256:{:064x}", state.next_id);
        for tag in tags {
            state.images.insert(tag.clone(), id.clone());
        }
        state.builds.push(RecordedBuild {
            tags: tags.to_vec(),
            dockerfile: contents,
            context_files,
            dockerignore,
        });
        Ok(())
    }

    async fn inspect_id(&self, tag: &str) -> anyhow::Result<Option<String>> {
        Ok(self.state().images.get(tag).cloned())
    }

    async fn remove(&self, tag: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.images.remove(tag).is_none() {
            anyhow::bail!("No such image: {tag}");
        }
        state.removed.push(tag.to_string());
        Ok(())
    }
}
