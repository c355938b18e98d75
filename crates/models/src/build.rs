use serde::{Deserialize, Serialize};

/// Process-wide flags applied once, before any dependency step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildOptions {
    /// Do not write compiled bytecode caches into the image.
    pub no_compiled_cache: bool,
    /// Unbuffered stdout/stderr for every process run during or after the build.
    pub unbuffered_io: bool,
    /// Do not keep a local package download cache inside the image.
    pub no_package_cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            no_compiled_cache: true,
            unbuffered_io: true,
            no_package_cache: true,
        }
    }
}

impl BuildOptions {
    /// Environment flags baked into the dependency stage, in render order.
    pub fn env(&self) -> Vec<(&'static str, &'static str)> {
        let mut env = Vec::new();
        if self.no_compiled_cache {
            env.push(("PYTHONDONTWRITEBYTECODE", "1"));
        }
        if self.unbuffered_io {
            env.push(("PYTHONUNBUFFERED", "1"));
        }
        if self.no_package_cache {
            env.push(("PIP_NO_CACHE_DIR", "1"));
        }
        env
    }

    /// Stable textual form that feeds the dependency layer digest.
    pub fn fingerprint(&self) -> String {
        format!(
            "no_compiled_cache={};unbuffered_io={};no_package_cache={}",
            self.no_compiled_cache, self.unbuffered_io, self.no_package_cache
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_flag() {
        let options = BuildOptions::default();
        assert_eq!(
            options.env(),
            vec![
                ("PYTHONDONTWRITEBYTECODE", "1"),
                ("PYTHONUNBUFFERED", "1"),
                ("PIP_NO_CACHE_DIR", "1"),
            ]
        );
    }

    #[test]
    fn disabled_flags_are_not_rendered() {
        let options = BuildOptions {
            no_compiled_cache: false,
            unbuffered_io: true,
            no_package_cache: false,
        };
        assert_eq!(options.env(), vec![("PYTHONUNBUFFERED", "1")]);
        assert_ne!(options.fingerprint(), BuildOptions::default().fingerprint());
    }
}
