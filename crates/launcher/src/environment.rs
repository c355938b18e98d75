use botpack_models::{parse_env_entry, parse_env_file, BotpackError};
use std::collections::BTreeMap;
use std::path::Path;

/// Caller-supplied overrides, layered lowest to highest:
/// pass-through from the launching shell, env file, explicit entries.
#[derive(Debug, Clone, Default)]
pub struct CallerEnvironment {
    vars: BTreeMap<String, String>,
}

impl CallerEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `names` from `lookup` when set there; unset names stay absent.
    pub fn pass_through<F>(mut self, names: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in names {
            if let Some(value) = lookup(name) {
                self.vars.insert(name.clone(), value);
            }
        }
        self
    }

    pub fn env_file(mut self, path: &Path) -> Result<Self, BotpackError> {
        let contents = std::fs::read_to_string(path)?;
        self.vars.extend(parse_env_file(&contents)?);
        Ok(self)
    }

    /// `KEY=VALUE` sets a value; a bare `KEY` copies it from `lookup`, as
    /// `docker run -e KEY` does.
    pub fn entries<F>(mut self, entries: &[String], lookup: F) -> Result<Self, BotpackError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for entry in entries {
            if entry.contains('=') {
                let (name, value) = parse_env_entry(entry)?;
                self.vars.insert(name, value);
            } else {
                let (name, _) = parse_env_entry(&format!("{entry}="))?;
                if let Some(value) = lookup(&name) {
                    self.vars.insert(name, value);
                }
            }
        }
        Ok(self)
    }

    pub fn into_overrides(self) -> BTreeMap<String, String> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Option<String> {
        match name {
            "TELEGRAM_BOT_TOKEN" => Some("from-shell".to_string()),
            "TZ" => Some("Asia/Tokyo".to_string()),
            _ => None,
        }
    }

    #[test]
    fn later_layers_win() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "TELEGRAM_BOT_TOKEN=from-file\nHEALTH_PORT=9090\n").unwrap();

        let overrides = CallerEnvironment::new()
            .pass_through(&["TELEGRAM_BOT_TOKEN".to_string(), "MISSING".to_string()], host)
            .env_file(&env_file)
            .unwrap()
            .entries(&["HEALTH_PORT=8081".to_string(), "TZ".to_string()], host)
            .unwrap()
            .into_overrides();

        assert_eq!(overrides["TELEGRAM_BOT_TOKEN"], "from-file");
        assert_eq!(overrides["HEALTH_PORT"], "8081");
        assert_eq!(overrides["TZ"], "Asia/Tokyo");
        assert!(!overrides.contains_key("MISSING"));
    }

    #[test]
    fn bare_entry_without_host_value_is_absent() {
        let overrides = CallerEnvironment::new()
            .entries(&["TWITTER_API_KEY".to_string()], |_| None)
            .unwrap()
            .into_overrides();
        assert!(overrides.is_empty());
    }

    #[test]
    fn invalid_entry_is_rejected() {
        let err = CallerEnvironment::new()
            .entries(&["=value".to_string()], host)
            .unwrap_err();
        assert!(matches!(err, BotpackError::InvalidEnvironment { .. }));
    }
}
