//! Migration-spec cache.
//!
//! One JSON file per `(library, from, to)` under the session directory's
//! `cache/`. Every entry carries a schema version and a timestamp; writes
//! go through a temp file and rename so readers never observe a torn
//! entry. TTL is long (months) and invalidation is manual — delete the
//! file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KnowledgeError;
use crate::types::MigrationSpec;

pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    schema_version: u32,
    cached_at: DateTime<Utc>,
    spec: MigrationSpec,
}

/// File-backed cache of acquired migration specs.
#[derive(Debug, Clone)]
pub struct SpecCache {
    dir: PathBuf,
    ttl_days: u32,
}

impl SpecCache {
    pub fn new(dir: &Path, ttl_days: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ttl_days,
        }
    }

    /// Cache file for one version pair.
    pub fn path_for(&self, library: &str, from_version: &str, to_version: &str) -> PathBuf {
        let name = format!(
            "{}_{}_{}.spec",
            sanitize(library),
            sanitize(from_version),
            sanitize(to_version)
        );
        self.dir.join(name)
    }

    /// Look up a cached spec. Expired entries are a miss; entries with an
    /// unknown schema version are refused with an error.
    pub fn get(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<Option<MigrationSpec>, KnowledgeError> {
        let path = self.path_for(library, from_version, to_version);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let entry: CacheEntry = serde_json::from_str(&text)?;
        if entry.schema_version != CACHE_SCHEMA_VERSION {
            return Err(KnowledgeError::CacheSchema {
                found: entry.schema_version,
                expected: CACHE_SCHEMA_VERSION,
            });
        }
        let age = Utc::now().signed_duration_since(entry.cached_at);
        if age.num_days() > i64::from(self.ttl_days) {
            debug!(path = %path.display(), days = age.num_days(), "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry.spec))
    }

    /// Persist a spec with a durable rename.
    pub fn put(&self, spec: &MigrationSpec) -> Result<(), KnowledgeError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&spec.library, &spec.source_range, &spec.target_version);
        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            cached_at: Utc::now(),
            spec: spec.clone(),
        };
        let tmp = path.with_extension("spec.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '-' } else { c })
        .collect()
}
