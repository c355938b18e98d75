use crate::BotpackError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One dependency line from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    /// Everything after the name (`>=20.0`, `[socks]==2.31`, `; python_version < "3.12"`).
    pub constraint: String,
}

/// The dependency manifest, kept byte-for-byte.
///
/// The installer consumes the raw bytes verbatim; the parsed requirements
/// exist for diagnostics and `plan` output only and never feed the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    file_name: String,
    bytes: Vec<u8>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, BotpackError> {
        if !path.is_file() {
            return Err(BotpackError::ManifestMissing {
                path: path.display().to_string(),
            });
        }
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "requirements.txt".to_string());
        Ok(Self { file_name, bytes })
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sha256(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }

    pub fn requirements(&self) -> Vec<Requirement> {
        String::from_utf8_lossy(&self.bytes)
            .lines()
            .filter_map(parse_requirement)
            .collect()
    }
}

fn strip_comment(line: &str) -> &str {
    let line = match line.find(" #") {
        Some(idx) => &line[..idx],
        None => line,
    };
    if line.trim_start().starts_with('#') {
        ""
    } else {
        line.trim()
    }
}

fn parse_requirement(line: &str) -> Option<Requirement> {
    let line = strip_comment(line);
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| "<>=!~;[ @".contains(c))
        .unwrap_or(line.len());
    let name = line[..end].trim();
    if name.is_empty() {
        return None;
    }
    Some(Requirement {
        name: name.to_string(),
        constraint: line[end..].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# bot dependencies
python-telegram-bot[job-queue]==20.7
tweepy>=4.14  # twitter client
pandas
APScheduler ~= 3.10
--index-url https://pypi.org/simple

requests ; python_version < \"3.12\"
";

    #[test]
    fn parses_names_and_constraints() {
        let manifest = Manifest::from_bytes("requirements.txt", SAMPLE);
        let reqs = manifest.requirements();
        let names: Vec<&str> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["python-telegram-bot", "tweepy", "pandas", "APScheduler", "requests"]
        );
        assert_eq!(reqs[0].constraint, "[job-queue]==20.7");
        assert_eq!(reqs[1].constraint, ">=4.14");
        assert_eq!(reqs[2].constraint, "");
        assert_eq!(reqs[3].constraint, "~= 3.10");
    }

    #[test]
    fn digest_tracks_every_byte() {
        let a = Manifest::from_bytes("requirements.txt", "tweepy==4.14\n");
        let b = Manifest::from_bytes("requirements.txt", "tweepy==4.14\n");
        let c = Manifest::from_bytes("requirements.txt", "tweepy==4.14 \n");
        assert_eq!(a.sha256(), b.sha256());
        assert_ne!(a.sha256(), c.sha256());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("requirements.txt")).unwrap_err();
        assert!(matches!(err, BotpackError::ManifestMissing { .. }));
    }
}
