use crate::BotpackError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a base image reference is pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pin {
    Tag(String),
    Digest(String),
}

/// A base runtime image pinned to an exact version.
///
/// Floating references are rejected: a reference must carry either an
/// explicit tag other than `latest` or a `sha256` digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseImage {
    repository: String,
    pin: Pin,
}

impl BaseImage {
    pub fn parse(reference: &str) -> Result<Self, BotpackError> {
        let reference = reference.trim();
        let invalid = |reason: &str| BotpackError::InvalidBaseImage {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("reference contains whitespace"));
        }

        if let Some((repository, digest)) = reference.split_once('@') {
            let hex = digest
                .strip_prefix("sha256:")
                .ok_or_else(|| invalid("only sha256 digests are supported"))?;
            if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("digest must be 64 hex characters"));
            }
            // A tag before the digest is informational only.
            let repository = strip_tag(repository).0;
            if repository.is_empty() {
                return Err(invalid("repository is empty"));
            }
            return Ok(Self {
                repository: repository.to_string(),
                pin: Pin::Digest(digest.to_ascii_lowercase()),
            });
        }

        let (repository, tag) = strip_tag(reference);
        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }
        match tag {
            None => Err(invalid("no tag given; pin an exact version")),
            Some("") => Err(invalid("tag is empty")),
            Some("latest") => Err(invalid("floating tag 'latest' is not allowed")),
            Some(tag) => Ok(Self {
                repository: repository.to_string(),
                pin: Pin::Tag(tag.to_string()),
            }),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }
}

impl Default for BaseImage {
    fn default() -> Self {
        Self {
            repository: "python".to_string(),
            pin: Pin::Tag("3.11-slim".to_string()),
        }
    }
}

/// Splits `repo:tag` while leaving registry ports (`host:5000/repo`) alone.
fn strip_tag(reference: &str) -> (&str, Option<&str>) {
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(idx) => {
            let split = name_start + idx;
            (&reference[..split], Some(&reference[split + 1..]))
        }
        None => (reference, None),
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pin {
            Pin::Tag(tag) => write!(f, "{}:{}", self.repository, tag),
            Pin::Digest(digest) => write!(f, "{}@{}", self.repository, digest),
        }
    }
}

impl TryFrom<String> for BaseImage {
    type Error = BotpackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BaseImage::parse(&value)
    }
}

impl From<BaseImage> for String {
    fn from(image: BaseImage) -> Self {
        image.to_string()
    }
}

/// Validates a repository name used for images this tool produces.
pub fn validate_image_name(name: &str) -> Result<(), BotpackError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c))
        && !name.starts_with(['.', '-', '_', '/'])
        && !name.ends_with('/');
    if valid {
        Ok(())
    } else {
        Err(BotpackError::ConfigError {
            reason: format!("invalid image name '{name}'"),
        })
    }
}
