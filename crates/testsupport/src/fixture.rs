use botpack_models::Config;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const REQUIREMENTS: &str = "python-telegram-bot==20.7\ntweepy==4.14.0\nrequests==2.31.0\n";
pub const BOT_SCRIPT: &str = "import time\nprint('bot started', flush=True)\nwhile True:\n    time.sleep(60)\n";

/// A bot source tree in a temporary directory.
pub struct BotProject {
    dir: TempDir,
}

impl BotProject {
    /// `requirements.txt` plus `bot.py`.
    pub fn new() -> Self {
        let project = Self::empty();
        project.write("requirements.txt", REQUIREMENTS);
        project.write("bot.py", BOT_SCRIPT);
        project
    }

    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create project dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, contents).expect("write project file");
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.path(relative)).expect("remove project file");
    }

    /// Default config pointed at this project, with the layer ledger kept
    /// inside the project's `.botpack` directory.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.image.name = "tweet-bot".to_string();
        config.app.source_dir = self.root().to_string_lossy().into_owned();
        config.data.dir = self.path(".botpack").to_string_lossy().into_owned();
        config
    }
}

impl Default for BotProject {
    fn default() -> Self {
        Self::new()
    }
}
