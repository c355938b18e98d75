use botpack_models::BotpackError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, instrument};

const CACHE_FILE: &str = "layers.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub tag: String,
    pub manifest_sha256: String,
    pub base_image: String,
    pub image_id: Option<String>,
    pub built_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Ledger of dependency layers this tool has built, keyed by layer digest.
pub struct LayerCache {
    cache_dir: PathBuf,
    layers: BTreeMap<String, LayerRecord>,
}

fn cache_error(e: impl std::fmt::Display) -> BotpackError {
    BotpackError::CacheError {
        reason: e.to_string(),
    }
}

impl LayerCache {
    pub fn open(cache_dir: PathBuf) -> Result<Self, BotpackError> {
        fs::create_dir_all(&cache_dir).map_err(cache_error)?;

        let mut cache = Self {
            cache_dir,
            layers: BTreeMap::new(),
        };
        cache.load()?;
        Ok(cache)
    }

    /// A cache that is never persisted; used by `plan` and tests.
    pub fn in_memory() -> Self {
        Self {
            cache_dir: PathBuf::new(),
            layers: BTreeMap::new(),
        }
    }

    pub fn get(&self, digest: &str) -> Option<&LayerRecord> {
        self.layers.get(digest)
    }

    #[instrument(skip(self, record))]
    pub fn record(&mut self, digest: &str, record: LayerRecord) {
        info!("Recorded dependency layer {} as {}", digest, record.tag);
        self.layers.insert(digest.to_string(), record);
    }

    pub fn touch(&mut self, digest: &str) {
        if let Some(record) = self.layers.get_mut(digest) {
            record.last_used = Utc::now();
        }
    }

    pub fn forget(&mut self, digest: &str) -> Option<LayerRecord> {
        self.layers.remove(digest)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LayerRecord)> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Digests of layers not used within `max_age_days`. An age beyond the
    /// representable time range marks nothing as stale.
    pub fn stale(&self, max_age_days: u64, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = i64::try_from(max_age_days)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|age| now.checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Vec::new();
        };
        self.layers
            .iter()
            .filter(|(_, record)| record.last_used < cutoff)
            .map(|(digest, _)| digest.clone())
            .collect()
    }

    fn cache_file(&self) -> Option<PathBuf> {
        if self.cache_dir.as_os_str().is_empty() {
            None
        } else {
            Some(self.cache_dir.join(CACHE_FILE))
        }
    }

    fn load(&mut self) -> Result<(), BotpackError> {
        let Some(path) = self.cache_file() else {
            return Ok(());
        };
        if path.exists() {
            let data = fs::read_to_string(&path).map_err(cache_error)?;
            self.layers = serde_json::from_str(&data).map_err(cache_error)?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), BotpackError> {
        let Some(path) = self.cache_file() else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.layers).map_err(cache_error)?;
        // Readers see either the previous ledger or the new one.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(cache_error)?;
        fs::rename(&tmp, &path).map_err(cache_error)?;
        Ok(())
    }
}
