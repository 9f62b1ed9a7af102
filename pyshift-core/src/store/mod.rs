//! Patch store: persists a session between the analyse and apply phases
//! and performs the actual disk writes.
//!
//! Layout under `<project-root>/.pyshift/`:
//!   - `session.json` — the current session, schema-versioned
//!   - `patches/<sha>.patch` — per-file unified diff with a JSON header
//!   - `cache/` — migration-spec cache (owned by the knowledge service)
//!   - `backups/<timestamp>/` — originals saved by `apply --backup`
//!
//! Apply is atomic per file (temp file + rename) and idempotent: a file
//! already holding the post-patch bytes is a no-op, not an error.

pub mod diff;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::types::{ApplyOptions, ApplyReport, MigrationSession, Patch, PatchState, SessionStatus};

pub const SESSION_SCHEMA_VERSION: u32 = 1;
pub const PATCH_HEADER: &str = "# pyshift-patch v1 ";

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    schema_version: u32,
    session: MigrationSession,
}

#[derive(Debug, Serialize, Deserialize)]
struct PatchHeader {
    path: PathBuf,
    sha: String,
    state: PatchState,
    tier: crate::types::Tier,
    change_count: usize,
}

/// File-backed store rooted at `<project-root>/.pyshift/`.
#[derive(Debug, Clone)]
pub struct PatchStore {
    project_root: PathBuf,
}

impl PatchStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(".pyshift")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir().join("cache")
    }

    fn session_path(&self) -> PathBuf {
        self.state_dir().join("session.json")
    }

    fn patches_dir(&self) -> PathBuf {
        self.state_dir().join("patches")
    }

    /// Content identity for a patch file.
    pub fn patch_sha(path: &Path, patched_source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.display().to_string().as_bytes());
        hasher.update(patched_source.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    /// Persist a session and its rendered patches with durable renames.
    pub fn save_session(&self, session: &MigrationSession) -> Result<()> {
        let dir = self.state_dir();
        std::fs::create_dir_all(&dir).map_err(StoreError::Io)?;

        // Replace any previous patch set wholesale.
        let patches_dir = self.patches_dir();
        if patches_dir.exists() {
            std::fs::remove_dir_all(&patches_dir).map_err(StoreError::Io)?;
        }
        std::fs::create_dir_all(&patches_dir).map_err(StoreError::Io)?;

        for patch in &session.patches {
            let header = PatchHeader {
                path: patch.path.clone(),
                sha: patch.sha.clone(),
                state: patch.state,
                tier: patch.tier,
                change_count: patch.changes.len(),
            };
            let mut contents = String::new();
            contents.push_str(PATCH_HEADER);
            contents.push_str(&serde_json::to_string(&header).map_err(StoreError::Serialization)?);
            contents.push('\n');
            contents.push_str(&patch.diff);
            std::fs::write(patches_dir.join(format!("{}.patch", patch.sha)), contents)
                .map_err(StoreError::Io)?;
        }

        let file = SessionFile {
            schema_version: SESSION_SCHEMA_VERSION,
            session: session.clone(),
        };
        let tmp = self.session_path().with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file).map_err(StoreError::Serialization)?)
            .map_err(StoreError::Io)?;
        std::fs::rename(&tmp, self.session_path()).map_err(StoreError::Io)?;

        debug!(patches = session.patches.len(), "session persisted");
        Ok(())
    }

    /// Load the pending session, refusing unknown schema versions.
    pub fn load_session(&self) -> Result<MigrationSession> {
        let path = self.session_path();
        if !path.exists() {
            return Err(
                StoreError::NoSession(self.project_root.display().to_string()).into(),
            );
        }
        let text = std::fs::read_to_string(&path).map_err(StoreError::Io)?;

        // Check the version header before trusting the full shape.
        #[derive(Deserialize)]
        struct VersionProbe {
            schema_version: u32,
        }
        let probe: VersionProbe =
            serde_json::from_str(&text).map_err(StoreError::Serialization)?;
        if probe.schema_version != SESSION_SCHEMA_VERSION {
            return Err(StoreError::Schema {
                found: probe.schema_version,
                expected: SESSION_SCHEMA_VERSION,
            }
            .into());
        }

        let file: SessionFile =
            serde_json::from_str(&text).map_err(StoreError::Serialization)?;
        Ok(file.session)
    }

    /// Whether a pending session exists.
    pub fn has_session(&self) -> bool {
        self.session_path().exists()
    }

    /// Summary for `status`.
    pub fn status(&self) -> Result<SessionStatus> {
        let session = self.load_session()?;
        Ok(SessionStatus {
            library: session.library.clone(),
            to_version: session.to_version.clone(),
            created_at: session.created_at,
            pending_patches: session.ready_patches().count(),
            rejected_patches: session
                .patches
                .iter()
                .filter(|p| p.state == PatchState::Rejected)
                .count(),
            risk: session.risk.clone(),
        })
    }

    /// Discard the pending session and its patches.
    pub fn clear_session(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(StoreError::Io)?;
        }
        let patches = self.patches_dir();
        if patches.exists() {
            std::fs::remove_dir_all(&patches).map_err(StoreError::Io)?;
        }
        Ok(())
    }

    /// Concatenated unified diff of every ready patch.
    pub fn render_diff(session: &MigrationSession) -> String {
        let mut out = String::new();
        for patch in session.ready_patches() {
            out.push_str(&patch.diff);
        }
        out
    }

    /// Apply ready patches to disk and update the stored session.
    ///
    /// Per-file atomicity: the new content lands in a temp file that is
    /// renamed over the original, so a failed apply never leaves a
    /// half-written file.
    pub fn apply(
        &self,
        session: &mut MigrationSession,
        options: &ApplyOptions,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        let backup_dir = if options.backup {
            let dir = self
                .state_dir()
                .join("backups")
                .join(chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string());
            std::fs::create_dir_all(&dir).map_err(StoreError::Io)?;
            Some(dir)
        } else {
            None
        };

        for patch in &mut session.patches {
            if patch.state != PatchState::Ready {
                continue;
            }
            if let Some(only) = &options.file {
                let matches_file =
                    patch.path == *only || patch.path.file_name() == only.file_name();
                if !matches_file {
                    continue;
                }
            }

            match apply_one(&self.project_root, patch, backup_dir.as_deref()) {
                Ok(AppliedOutcome::Written) => {
                    patch.state = PatchState::Applied;
                    report.applied.push(patch.path.clone());
                }
                Ok(AppliedOutcome::AlreadyApplied) => {
                    patch.state = PatchState::Applied;
                    report.skipped.push(patch.path.clone());
                }
                Err(message) => {
                    warn!(path = %patch.path.display(), %message, "apply failed");
                    patch.state = PatchState::Failed;
                    report.failed.push((patch.path.clone(), message));
                }
            }
        }
        report.backup_dir = backup_dir;

        let all_done = session
            .patches
            .iter()
            .all(|p| !matches!(p.state, PatchState::Ready));
        if all_done && report.failed.is_empty() {
            info!(applied = report.applied.len(), "migration applied, clearing session");
            self.clear_session()?;
        } else {
            self.save_session(session)?;
        }
        Ok(report)
    }

    /// Copy a backup tree back over the project.
    pub fn restore(&self, backup_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut restored = Vec::new();
        restore_walk(backup_dir, backup_dir, &self.project_root, &mut restored)?;
        Ok(restored)
    }
}

enum AppliedOutcome {
    Written,
    AlreadyApplied,
}

fn apply_one(
    project_root: &Path,
    patch: &Patch,
    backup_dir: Option<&Path>,
) -> std::result::Result<AppliedOutcome, String> {
    let absolute = project_root.join(&patch.path);
    let current = std::fs::read_to_string(&absolute).map_err(|e| e.to_string())?;

    if current == patch.patched_source {
        return Ok(AppliedOutcome::AlreadyApplied);
    }
    if current != patch.original_source {
        return Err("file changed since analyse; re-run analyse".to_string());
    }

    if let Some(backup_root) = backup_dir {
        let backup_path = backup_root.join(&patch.path);
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::copy(&absolute, &backup_path).map_err(|e| e.to_string())?;
    }

    let tmp = absolute.with_extension("py.pyshift-tmp");
    std::fs::write(&tmp, &patch.patched_source).map_err(|e| e.to_string())?;
    std::fs::rename(&tmp, &absolute).map_err(|e| e.to_string())?;
    Ok(AppliedOutcome::Written)
}

fn restore_walk(
    root: &Path,
    dir: &Path,
    project_root: &Path,
    restored: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(StoreError::Io)? {
        let entry = entry.map_err(StoreError::Io)?;
        let path = entry.path();
        if path.is_dir() {
            restore_walk(root, &path, project_root, restored)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("py") {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let target = project_root.join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
            }
            std::fs::copy(&path, &target).map_err(StoreError::Io)?;
            restored.push(relative);
        }
    }
    Ok(())
}
