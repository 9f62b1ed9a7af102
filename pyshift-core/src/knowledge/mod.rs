//! Knowledge acquisition: building a [`MigrationSpec`] for a version
//! pair that has no pre-coded tier-1 transformer.
//!
//! Flow: cache lookup → parallel source fetch → per-source extraction →
//! merge with dedup and confidence reconciliation → cache write. A run
//! that finds zero sources returns an empty spec with a diagnostic so the
//! engine can degrade to tier-3.

pub mod cache;
pub mod sources;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{KnowledgeError, Result};
use crate::oracle::ExtractionOracle;
use crate::types::{BreakingChange, Confidence, Diagnostic, MigrationSpec};

use cache::SpecCache;
use sources::SourceFetcher;

/// Acquires and caches migration specs.
#[derive(Debug)]
pub struct KnowledgeService {
    fetcher: Arc<dyn SourceFetcher>,
    extractor: Arc<dyn ExtractionOracle>,
    cache: SpecCache,
}

/// What [`KnowledgeService::acquire`] produced, with any non-fatal
/// findings along the way.
#[derive(Debug)]
pub struct Acquisition {
    pub spec: MigrationSpec,
    pub diagnostics: Vec<Diagnostic>,
    pub from_cache: bool,
}

impl KnowledgeService {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        extractor: Arc<dyn ExtractionOracle>,
        cache: SpecCache,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            cache,
        }
    }

    /// Produce the spec for `(library, from, to)`, consulting the cache
    /// first. The second call with the same inputs returns a structurally
    /// equal spec without touching the network.
    pub async fn acquire(
        &self,
        library: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<Acquisition> {
        let mut diagnostics = Vec::new();

        match self.cache.get(library, from_version, to_version) {
            Ok(Some(spec)) => {
                debug!(library, from_version, to_version, "spec cache hit");
                return Ok(Acquisition {
                    spec,
                    diagnostics,
                    from_cache: true,
                });
            }
            Ok(None) => {}
            Err(e @ KnowledgeError::CacheSchema { .. }) => {
                // Refuse to read, but an old cache file is not fatal.
                diagnostics.push(Diagnostic::warning(format!(
                    "ignoring stale spec cache entry: {e}"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let documents = self
            .fetcher
            .fetch(library, from_version, to_version)
            .await?;

        if documents.is_empty() {
            diagnostics.push(Diagnostic::warning(format!(
                "no changelog sources found for {library} {from_version} -> {to_version}; \
                 only oracle-led rewrites are available"
            )));
            return Ok(Acquisition {
                spec: MigrationSpec::empty(library, from_version, to_version),
                diagnostics,
                from_cache: false,
            });
        }

        // Each document is extracted independently, in parallel.
        let mut join_set = JoinSet::new();
        for document in documents {
            let extractor = Arc::clone(&self.extractor);
            let library = library.to_string();
            let from_version = from_version.to_string();
            let to_version = to_version.to_string();
            join_set.spawn(async move {
                let url = document.url.clone();
                let result = extractor
                    .extract(&library, &from_version, &to_version, &document)
                    .await;
                (url, result)
            });
        }

        let mut per_source = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((url, result)) = joined else { continue };
            match result {
                Ok(changes) => per_source.push((url, changes)),
                Err(e) => {
                    warn!(%url, error = %e, "extraction failed for source");
                    diagnostics.push(Diagnostic::warning(format!(
                        "extraction failed for {url}: {e}"
                    )));
                }
            }
        }
        // Join order is nondeterministic; restore a stable order before
        // merging so the resulting spec is reproducible.
        per_source.sort_by(|a, b| a.0.cmp(&b.0));

        let changes = merge_changes(per_source);
        info!(
            library,
            from_version,
            to_version,
            changes = changes.len(),
            "acquired migration spec"
        );

        let spec = MigrationSpec {
            library: library.to_string(),
            source_range: from_version.to_string(),
            target_version: to_version.to_string(),
            changes,
        };

        if !spec.changes.is_empty() {
            if let Err(e) = self.cache.put(&spec) {
                diagnostics.push(Diagnostic::warning(format!("spec cache write failed: {e}")));
            }
        }

        Ok(Acquisition {
            spec,
            diagnostics,
            from_cache: false,
        })
    }
}

/// Merge per-source breaking-change lists.
///
/// Dedup key is `(kind, symbol, replacement)`. On merge the confidence is
/// the minimum across sources, then entries seen in more than one source
/// are promoted to high.
pub fn merge_changes(per_source: Vec<(String, Vec<BreakingChange>)>) -> Vec<BreakingChange> {
    #[derive(Debug)]
    struct Merged {
        change: BreakingChange,
        sources: std::collections::HashSet<String>,
    }

    let mut merged: Vec<Merged> = Vec::new();
    let mut index: HashMap<(crate::types::ChangeKind, String, String), usize> = HashMap::new();

    for (url, changes) in per_source {
        for change in changes {
            let key = (
                change.kind,
                change.matcher.symbol.clone(),
                change.replacement.clone(),
            );
            match index.get(&key) {
                Some(&i) => {
                    let entry = &mut merged[i];
                    entry.change.confidence = entry.change.confidence.min(change.confidence);
                    entry.sources.insert(url.clone());
                }
                None => {
                    index.insert(key, merged.len());
                    let mut sources = std::collections::HashSet::new();
                    sources.insert(url.clone());
                    merged.push(Merged { change, sources });
                }
            }
        }
    }

    merged
        .into_iter()
        .map(|mut m| {
            if m.sources.len() > 1 {
                m.change.confidence = Confidence::High;
            }
            m.change
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracle::SourceDocument;
    use crate::types::{ChangeKind, MatchSpec};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn change(symbol: &str, replacement: &str, confidence: Confidence) -> BreakingChange {
        BreakingChange {
            id: format!("{symbol}-to-{replacement}"),
            kind: ChangeKind::MethodRename,
            matcher: MatchSpec {
                symbol: symbol.to_string(),
                receiver: None,
                argument: None,
            },
            replacement: replacement.to_string(),
            confidence,
            requires_imports: vec![],
            removes_imports: vec![],
            explanation: String::new(),
            provenance: None,
        }
    }

    #[test]
    fn merge_dedups_and_promotes_multi_source() {
        let merged = merge_changes(vec![
            (
                "https://a".to_string(),
                vec![
                    change("dict", "model_dump", Confidence::Medium),
                    change("json", "model_dump_json", Confidence::High),
                ],
            ),
            (
                "https://b".to_string(),
                vec![change("dict", "model_dump", Confidence::Low)],
            ),
        ]);

        assert_eq!(merged.len(), 2);
        let dict = merged.iter().find(|c| c.matcher.symbol == "dict").unwrap();
        // Seen in two sources: promoted past the min-merge.
        assert_eq!(dict.confidence, Confidence::High);
        let json = merged.iter().find(|c| c.matcher.symbol == "json").unwrap();
        assert_eq!(json.confidence, Confidence::High);
    }

    #[test]
    fn single_source_keeps_min_confidence() {
        let merged = merge_changes(vec![(
            "https://a".to_string(),
            vec![
                change("dict", "model_dump", Confidence::Medium),
                change("dict", "model_dump", Confidence::Low),
            ],
        )]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, Confidence::Low, "same source twice is not promotion");
    }

    // ── Acquisition flow with fakes ────────────────────────────────

    #[derive(Debug)]
    struct FakeFetcher {
        documents: Vec<SourceDocument>,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _package: &str,
            _from: &str,
            _to: &str,
        ) -> std::result::Result<Vec<SourceDocument>, KnowledgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.clone())
        }
    }

    #[derive(Debug)]
    struct FakeExtractor;

    #[async_trait::async_trait]
    impl ExtractionOracle for FakeExtractor {
        async fn extract(
            &self,
            _library: &str,
            _from: &str,
            _to: &str,
            _document: &SourceDocument,
        ) -> std::result::Result<Vec<BreakingChange>, OracleError> {
            Ok(vec![change("dict", "model_dump", Confidence::Medium)])
        }
    }

    fn doc(url: &str) -> SourceDocument {
        SourceDocument {
            url: url.to_string(),
            content_type: "text/markdown".to_string(),
            content: "## Breaking\n- dict renamed".to_string(),
        }
    }

    #[tokio::test]
    async fn second_acquire_hits_cache_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher {
            documents: vec![doc("https://a"), doc("https://b")],
            calls: AtomicU32::new(0),
        });
        let service = KnowledgeService::new(
            Arc::clone(&fetcher) as Arc<dyn SourceFetcher>,
            Arc::new(FakeExtractor),
            SpecCache::new(tmp.path(), 180),
        );

        let first = service.acquire("somelib", "1.0", "2.0").await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.spec.changes.len(), 1);
        // Present in both documents: high.
        assert_eq!(first.spec.changes[0].confidence, Confidence::High);

        let second = service.acquire("somelib", "1.0", "2.0").await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.spec, first.spec);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1, "no second fetch");
    }

    #[tokio::test]
    async fn zero_sources_degrades_with_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let service = KnowledgeService::new(
            Arc::new(FakeFetcher {
                documents: vec![],
                calls: AtomicU32::new(0),
            }),
            Arc::new(FakeExtractor),
            SpecCache::new(tmp.path(), 180),
        );

        let acquisition = service.acquire("obscure", "1.0", "2.0").await.unwrap();
        assert!(acquisition.spec.changes.is_empty());
        assert_eq!(acquisition.diagnostics.len(), 1);
        assert!(acquisition.diagnostics[0].message.contains("no changelog sources"));
    }
}
