use crate::BotpackError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIMEZONE_VAR: &str = "TZ";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// The single command started in every container, as an exec vector.
///
/// Never rendered through a shell, so signals sent to the container reach
/// the bot process directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EntrypointCommand {
    /// Rebuilds a command from an exec vector; `None` when it is empty.
    pub fn from_vec(cmd: &[String]) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// `python [-u] <script>`: the interpreter runs the bot script with no extra arguments.
    pub fn python_script(interpreter: &str, script: &str, unbuffered: bool) -> Self {
        let mut args = Vec::new();
        if unbuffered {
            args.push("-u".to_string());
        }
        args.push(script.to_string());
        Self {
            program: interpreter.to_string(),
            args,
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// JSON exec form, e.g. `["python", "-u", "bot.py"]`.
    pub fn exec_form(&self) -> String {
        serde_json::to_string(&self.to_vec()).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Build-time environment defaults for the launched process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentSet {
    defaults: BTreeMap<String, String>,
}

impl EnvironmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults carried by every image: the timezone identifier.
    pub fn with_timezone(timezone: &str) -> Self {
        let mut set = Self::new();
        set.set_default(TIMEZONE_VAR, timezone);
        set
    }

    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defaults.insert(name.into(), value.into());
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    /// Union of defaults and caller overrides; overrides win. Names with
    /// neither a default nor an override are simply absent.
    pub fn resolve(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut resolved = self.defaults.clone();
        for (name, value) in overrides {
            resolved.insert(name.clone(), value.clone());
        }
        resolved
    }
}

/// Names from `required` that are absent from a resolved environment.
pub fn missing_variables(required: &[String], resolved: &BTreeMap<String, String>) -> Vec<String> {
    required
        .iter()
        .filter(|name| !resolved.contains_key(name.as_str()))
        .cloned()
        .collect()
}

pub fn parse_env_entry(entry: &str) -> Result<(String, String), BotpackError> {
    let (name, value) = entry
        .split_once('=')
        .ok_or_else(|| BotpackError::InvalidEnvironment {
            entry: entry.to_string(),
        })?;
    let name = name.trim();
    if !is_valid_name(name) {
        return Err(BotpackError::InvalidEnvironment {
            entry: entry.to_string(),
        });
    }
    Ok((name.to_string(), value.to_string()))
}

/// Parses dotenv-style contents: `KEY=VALUE` lines, `#` comments, optional
/// `export ` prefix and matching surrounding quotes.
pub fn parse_env_file(contents: &str) -> Result<BTreeMap<String, String>, BotpackError> {
    let mut vars = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (name, value) = parse_env_entry(line)?;
        vars.insert(name, unquote(value.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Externally observable states of a launched bot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Exited(i64),
}

impl ContainerState {
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            ContainerState::Running => None,
            ContainerState::Exited(code) => Some(*code),
        }
    }

    pub fn is_clean_exit(&self) -> bool {
        matches!(self, ContainerState::Exited(0))
    }
}
