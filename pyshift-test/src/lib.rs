// Integration test utilities and fixture management for pyshift.

use std::path::Path;
use std::sync::Arc;

use pyshift_core::config::PyshiftConfig;
use pyshift_core::engine::{MigrationEngine, UpgradeRequest};
use pyshift_core::error::{KnowledgeError, OracleError};
use pyshift_core::knowledge::cache::SpecCache;
use pyshift_core::knowledge::sources::SourceFetcher;
use pyshift_core::knowledge::KnowledgeService;
use pyshift_core::oracle::{ExtractionOracle, SourceDocument};
use pyshift_core::types::{AnalyseOptions, BreakingChange, MigrationSession};

/// A throwaway Python project under a tempdir.
#[derive(Debug)]
pub struct TestProject {
    pub dir: tempfile::TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the project root.
    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
        self
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path().join(rel)).unwrap()
    }

    /// A plain engine: tier-1 only capabilities, no oracles wired.
    pub fn engine(&self) -> MigrationEngine {
        MigrationEngine::new(self.path(), PyshiftConfig::default())
    }

    /// An engine whose knowledge service is backed by canned documents
    /// and a canned extraction result, so tier-2 runs without a network.
    pub fn engine_with_spec(&self, changes: Vec<BreakingChange>) -> MigrationEngine {
        let fetcher = Arc::new(CannedFetcher {
            documents: vec![SourceDocument {
                url: "https://example.invalid/changelog".to_string(),
                content_type: "text/markdown".to_string(),
                content: "# Changes".to_string(),
            }],
        });
        let extractor = Arc::new(CannedExtractor { changes });
        let cache = SpecCache::new(&self.path().join(".pyshift/cache"), 180);
        self.engine()
            .with_knowledge(KnowledgeService::new(fetcher, extractor, cache))
    }

    /// Run analyse with default options.
    pub async fn analyse(
        &self,
        engine: &MigrationEngine,
        library: &str,
        from: &str,
        to: &str,
    ) -> MigrationSession {
        self.analyse_with(engine, library, from, to, &AnalyseOptions::default())
            .await
    }

    pub async fn analyse_with(
        &self,
        engine: &MigrationEngine,
        library: &str,
        from: &str,
        to: &str,
        options: &AnalyseOptions,
    ) -> MigrationSession {
        engine
            .analyse(
                &UpgradeRequest {
                    library: library.to_string(),
                    from_version: from.to_string(),
                    to_version: to.to_string(),
                },
                options,
            )
            .await
            .expect("analyse")
    }
}

/// Fetcher returning a fixed document list.
#[derive(Debug)]
pub struct CannedFetcher {
    pub documents: Vec<SourceDocument>,
}

#[async_trait::async_trait]
impl SourceFetcher for CannedFetcher {
    async fn fetch(
        &self,
        _package: &str,
        _from: &str,
        _to: &str,
    ) -> Result<Vec<SourceDocument>, KnowledgeError> {
        Ok(self.documents.clone())
    }
}

/// Extraction oracle returning a fixed breaking-change list.
#[derive(Debug)]
pub struct CannedExtractor {
    pub changes: Vec<BreakingChange>,
}

#[async_trait::async_trait]
impl ExtractionOracle for CannedExtractor {
    async fn extract(
        &self,
        _library: &str,
        _from: &str,
        _to: &str,
        _document: &SourceDocument,
    ) -> Result<Vec<BreakingChange>, OracleError> {
        Ok(self.changes.clone())
    }
}
