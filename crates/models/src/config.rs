use crate::{BaseImage, BotpackError, BuildOptions, DEFAULT_TIMEZONE};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "botpack.toml";
pub const ENV_PREFIX: &str = "BOTPACK_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub image: ImageConfig,
    pub build: BuildConfig,
    pub app: AppConfig,
    pub runtime: RuntimeConfig,
    pub data: DataConfig,
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Repository name of the produced images.
    pub name: String,
    pub base: BaseImage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub options: BuildOptions,
    /// OS packages installed before the dependency step. Empty means none
    /// are provisioned and libraries needing them fail the build.
    pub system_packages: Vec<String>,
    /// Extra ignore patterns applied to the source snapshot.
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub source_dir: String,
    /// Manifest path, relative to `source_dir`.
    pub manifest: String,
    /// Script run by the interpreter, relative to `source_dir`.
    pub entrypoint: String,
    pub interpreter: String,
    pub workdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub timezone: String,
    /// Variables the bot cannot start without; launch is refused when absent.
    pub required_env: Vec<String>,
    /// Variables copied from the launching shell when set there.
    pub pass_through: Vec<String>,
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    /// Empty uses `DOCKER_HOST` or the local socket.
    pub host: String,
    pub binary: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: ImageConfig {
                name: "bot".to_string(),
                base: BaseImage::default(),
            },
            build: BuildConfig {
                options: BuildOptions::default(),
                system_packages: Vec::new(),
                ignore: Vec::new(),
            },
            app: AppConfig {
                source_dir: ".".to_string(),
                manifest: "requirements.txt".to_string(),
                entrypoint: "bot.py".to_string(),
                interpreter: "python".to_string(),
                workdir: "/app".to_string(),
            },
            runtime: RuntimeConfig {
                timezone: DEFAULT_TIMEZONE.to_string(),
                required_env: Vec::new(),
                pass_through: Vec::new(),
                stop_timeout_secs: 10,
            },
            data: DataConfig {
                dir: ".botpack".to_string(),
            },
            docker: DockerConfig {
                host: String::new(),
                binary: "docker".to_string(),
            },
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if present), then `BOTPACK_*` variables
    /// (`BOTPACK_RUNTIME__TIMEZONE=Europe/Oslo`).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads an explicitly named file, which must exist.
    pub fn load(path: &Path) -> Result<Self, BotpackError> {
        if !path.is_file() {
            return Err(BotpackError::ConfigError {
                reason: format!("config file {} not found", path.display()),
            });
        }
        Self::extract(path)
    }

    /// Loads `botpack.toml` from the working directory when present;
    /// defaults and environment otherwise.
    pub fn load_default() -> Result<Self, BotpackError> {
        Self::extract(Path::new(DEFAULT_CONFIG_FILE))
    }

    fn extract(path: &Path) -> Result<Self, BotpackError> {
        let config: Config =
            Self::figment(path)
                .extract()
                .map_err(|e| BotpackError::ConfigError {
                    reason: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BotpackError> {
        crate::validate_image_name(&self.image.name)?;
        if self.runtime.timezone.trim().is_empty() {
            return Err(BotpackError::ConfigError {
                reason: "runtime.timezone must not be empty".to_string(),
            });
        }
        if self.app.entrypoint.trim().is_empty() {
            return Err(BotpackError::ConfigError {
                reason: "app.entrypoint must not be empty".to_string(),
            });
        }
        if !self.app.workdir.starts_with('/') {
            return Err(BotpackError::ConfigError {
                reason: format!("app.workdir must be absolute, got '{}'", self.app.workdir),
            });
        }
        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.source_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.source_dir().join(&self.app.manifest)
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.image.base.to_string(), "python:3.11-slim");
        assert_eq!(config.runtime.timezone, "UTC");
        assert_eq!(config.manifest_path(), PathBuf::from("./requirements.txt"));
    }

    #[test]
    fn file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "botpack.toml",
                r#"
                [image]
                name = "tweet-bot"
                base = "python:3.12.4-slim"

                [runtime]
                required_env = ["TELEGRAM_BOT_TOKEN"]

                [build.options]
                no_package_cache = false
                "#,
            )?;
            jail.set_env("BOTPACK_RUNTIME__TIMEZONE", "Europe/Oslo");

            let config = Config::load(Path::new("botpack.toml")).unwrap();
            assert_eq!(config.image.name, "tweet-bot");
            assert_eq!(config.image.base.to_string(), "python:3.12.4-slim");
            assert_eq!(config.runtime.timezone, "Europe/Oslo");
            assert_eq!(config.runtime.required_env, vec!["TELEGRAM_BOT_TOKEN"]);
            assert!(!config.build.options.no_package_cache);
            assert!(config.build.options.unbuffered_io);
            Ok(())
        });
    }

    #[test]
    fn floating_base_image_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("botpack.toml", "[image]\nbase = \"python:latest\"\n")?;
            let err = Config::load(Path::new("botpack.toml")).unwrap_err();
            assert!(matches!(err, BotpackError::ConfigError { .. }));
            assert!(err.to_string().contains("latest"));
            Ok(())
        });
    }

    #[test]
    fn absent_default_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load_default().unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn default_file_is_picked_up() {
        Jail::expect_with(|jail| {
            jail.create_file("botpack.toml", "[image]\nname = \"tweet-bot\"\n")?;
            let config = Config::load_default().unwrap();
            assert_eq!(config.image.name, "tweet-bot");
            Ok(())
        });
    }

    #[test]
    fn named_file_must_exist() {
        Jail::expect_with(|_jail| {
            let err = Config::load(Path::new("prod.toml")).unwrap_err();
            assert!(matches!(err, BotpackError::ConfigError { .. }));
            assert!(err.to_string().contains("prod.toml"));
            assert_eq!(err.exit_code(), 78);
            Ok(())
        });
    }
}
