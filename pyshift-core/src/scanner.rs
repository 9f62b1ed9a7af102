//! Project scanner: deterministic enumeration and parsing of candidate
//! Python files.
//!
//! The scanner is pure I/O plus CST parsing; it knows nothing about
//! library semantics. Files are walked in sorted order so sessions are
//! reproducible, symlinks pointing outside the root are skipped, and
//! oversized or unparseable files are reported rather than fatal.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use pyshift_cst::cst::Cst;

use crate::error::{Result, ScanError};

/// Exclusions applied to every scan, on top of any user-provided globs.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.pyshift/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/.tox/**",
    "**/.eggs/**",
    "**/site-packages/**",
    "**/build/**",
    "**/dist/**",
    "**/node_modules/**",
];

/// A successfully parsed project file.
#[derive(Debug)]
pub struct ScannedFile {
    /// Path relative to the project root.
    pub path: PathBuf,
    pub absolute: PathBuf,
    pub source: String,
    pub cst: Cst,
}

/// Everything a scan produced, including the non-fatal failures.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    /// Files that failed to parse, with the parse error.
    pub failed: Vec<(PathBuf, String)>,
    /// Files skipped with the reason (size threshold, bad symlink).
    pub skipped: Vec<(PathBuf, String)>,
}

/// Walks a project directory and parses every candidate source file.
#[derive(Debug)]
pub struct ProjectScanner {
    root: PathBuf,
    excludes: Vec<glob::Pattern>,
    max_file_bytes: u64,
}

impl ProjectScanner {
    pub fn new(root: &Path, extra_excludes: &[String], max_file_bytes: u64) -> Result<Self> {
        if !root.is_dir() {
            return Err(ScanError::RootNotFound(root.display().to_string()).into());
        }
        let mut excludes = Vec::new();
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .map(|s| (*s).to_string())
            .chain(extra_excludes.iter().cloned())
        {
            let compiled = glob::Pattern::new(&pattern).map_err(|e| ScanError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            excludes.push(compiled);
        }
        Ok(Self {
            root: root.to_path_buf(),
            excludes,
            max_file_bytes,
        })
    }

    /// Enumerate and parse all Python files under the root.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut candidates = Vec::new();
        self.walk(&self.root, &mut candidates, &mut outcome)?;
        candidates.sort();

        // Parsing is file-local, so it parallelises freely.
        let parsed: Vec<(PathBuf, std::result::Result<(String, Cst), String>)> = candidates
            .par_iter()
            .map(|relative| {
                let absolute = self.root.join(relative);
                let result = std::fs::read_to_string(&absolute)
                    .map_err(|e| e.to_string())
                    .and_then(|source| {
                        Cst::parse(&source, &relative.display().to_string())
                            .map(|cst| (source, cst))
                            .map_err(|e| e.to_string())
                    });
                (relative.clone(), result)
            })
            .collect();

        for (relative, result) in parsed {
            match result {
                Ok((source, cst)) => outcome.files.push(ScannedFile {
                    absolute: self.root.join(&relative),
                    path: relative,
                    source,
                    cst,
                }),
                Err(message) => {
                    debug!(path = %relative.display(), %message, "file failed to parse");
                    outcome.failed.push((relative, message));
                }
            }
        }

        outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(outcome)
    }

    fn walk(
        &self,
        dir: &Path,
        candidates: &mut Vec<PathBuf>,
        outcome: &mut ScanOutcome,
    ) -> Result<()> {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(iter) => iter.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory");
                return Ok(());
            }
        };
        entries.sort();

        for entry in entries {
            let Ok(relative) = entry.strip_prefix(&self.root) else {
                continue;
            };
            if self.excluded(relative) {
                continue;
            }

            let meta = match std::fs::symlink_metadata(&entry) {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            if meta.file_type().is_symlink() {
                if !self.symlink_stays_inside(&entry) {
                    outcome
                        .skipped
                        .push((relative.to_path_buf(), "symlink outside project root".into()));
                    continue;
                }
                // In-root symlinks are followed like regular entries.
                let Ok(target_meta) = std::fs::metadata(&entry) else {
                    continue;
                };
                if target_meta.is_dir() {
                    self.walk(&entry, candidates, outcome)?;
                    continue;
                }
            }

            if meta.is_dir() {
                self.walk(&entry, candidates, outcome)?;
                continue;
            }

            if entry.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            if meta.len() > self.max_file_bytes {
                outcome.skipped.push((
                    relative.to_path_buf(),
                    format!("{} bytes exceeds limit of {}", meta.len(), self.max_file_bytes),
                ));
                continue;
            }
            candidates.push(relative.to_path_buf());
        }
        Ok(())
    }

    fn excluded(&self, relative: &Path) -> bool {
        self.excludes.iter().any(|p| p.matches_path(relative))
    }

    fn symlink_stays_inside(&self, link: &Path) -> bool {
        let Ok(resolved) = std::fs::canonicalize(link) else {
            return false;
        };
        let Ok(root) = std::fs::canonicalize(&self.root) else {
            return false;
        };
        resolved.starts_with(root)
    }
}
