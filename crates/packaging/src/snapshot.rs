use crate::engine::DOCKERFILE_NAME;
use botpack_models::BotpackError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Patterns never copied into the application layer.
pub const DEFAULT_IGNORES: &[&str] = &[".git", "__pycache__", "*.pyc", ".env", ".botpack"];

/// Root-level names the application build context writes itself.
pub const RESERVED_CONTEXT_FILES: &[&str] = &[DOCKERFILE_NAME, ".dockerignore"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub size: u64,
}

/// Content-addressed view of the application source tree.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    root: PathBuf,
    files: Vec<SnapshotFile>,
    sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    pub fn new(extra: &[String]) -> Self {
        let patterns = DEFAULT_IGNORES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().map(|p| p.trim_end_matches('/').to_string()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// `*.ext` matches file names, patterns with `/` match path prefixes,
    /// anything else matches a single path component.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix('*') {
                relative
                    .rsplit('/')
                    .next()
                    .is_some_and(|name| name.ends_with(suffix))
            } else if pattern.contains('/') {
                let pattern = pattern.trim_start_matches('/');
                relative == pattern || relative.starts_with(&format!("{pattern}/"))
            } else {
                relative.split('/').any(|component| component == pattern)
            }
        })
    }
}

impl SourceSnapshot {
    #[instrument(skip(rules))]
    pub fn capture(root: &Path, rules: &IgnoreRules) -> Result<Self, BotpackError> {
        if !root.is_dir() {
            return Err(BotpackError::SourceMissing {
                path: root.display().to_string(),
            });
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !rules.is_ignored(&relative_path(root, entry.path()))
            });

        for entry in walker {
            let entry = entry.map_err(|e| BotpackError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_path(root, entry.path());
            if RESERVED_CONTEXT_FILES.contains(&relative.as_str()) {
                warn!(
                    "{} in the source tree is replaced by the generated build file and not copied",
                    relative
                );
                continue;
            }
            entries.push(relative);
        }
        entries.sort();

        let mut hasher = Sha256::new();
        let mut files = Vec::with_capacity(entries.len());
        for path in entries {
            let contents = std::fs::read(root.join(&path))?;
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(&contents);
            files.push(SnapshotFile {
                path,
                size: contents.len() as u64,
            });
        }
        let sha256 = format!("{:x}", hasher.finalize());

        info!(
            "Captured source snapshot with {} files, SHA256: {}",
            files.len(),
            sha256
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
            sha256,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[SnapshotFile] {
        &self.files
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn contains(&self, relative: &str) -> bool {
        let relative = relative.trim_start_matches("./");
        self.files.iter().any(|f| f.path == relative)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Copies the snapshot's files into `target`, preserving layout.
    #[instrument(skip(self))]
    pub fn copy_to(&self, target: &Path) -> Result<(), BotpackError> {
        for file in &self.files {
            let dest = target.join(&file.path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(self.root.join(&file.path), &dest)?;
        }
        debug!("Copied {} files to {}", self.files.len(), target.display());
        Ok(())
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
