//! Core data model: breaking changes, migration specs, patches, and
//! sessions. Everything here is serde-serialisable because sessions and
//! specs are persisted between the analyse and apply phases.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use pyshift_cst::Confidence;

/// What category of source change a breaking change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    SymbolRename,
    AttributeRename,
    MethodRename,
    FunctionSignature,
    DecoratorShape,
    ClassConfigRestructure,
    ImportMove,
    ArgumentRename,
    ArgumentRemoved,
    BehaviorChange,
}

impl ChangeKind {
    /// Kinds that tier-2 can execute as pure template rewrites without
    /// consulting the rewrite oracle.
    pub fn is_mechanical(&self) -> bool {
        matches!(
            self,
            Self::SymbolRename
                | Self::AttributeRename
                | Self::MethodRename
                | Self::ArgumentRename
                | Self::ArgumentRemoved
                | Self::ImportMove
        )
    }
}

/// Lexical/syntactic match side of a breaking change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchSpec {
    /// The symbol being matched: a method or attribute name, a qualified
    /// function (`pydantic.Field`), or a module path for import moves.
    pub symbol: String,
    /// Receiver constraint for method matches (qualified base class).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Keyword argument name for argument-level kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

/// Where a breaking change was learned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub url: String,
    pub excerpt: String,
}

/// A single API change between two versions of one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    pub id: String,
    pub kind: ChangeKind,
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    /// Target-version shape; `$expr` interpolates the matched expression
    /// for non-mechanical kinds.
    pub replacement: String,
    pub confidence: Confidence,
    /// Imports the rewrite needs, as (module, names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_imports: Vec<ImportNeed>,
    /// Imported names the rewrite may leave unused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removes_imports: Vec<String>,
    /// Free-text explanation for humans; never machine-consumed.
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportNeed {
    pub module: String,
    pub names: Vec<String>,
}

/// A machine-consumable migration for one library version pair.
/// Immutable after construction; cached by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSpec {
    pub library: String,
    pub source_range: String,
    pub target_version: String,
    pub changes: Vec<BreakingChange>,
}

impl MigrationSpec {
    pub fn empty(library: &str, source_range: &str, target_version: &str) -> Self {
        Self {
            library: library.to_string(),
            source_range: source_range.to_string(),
            target_version: target_version.to_string(),
            changes: Vec::new(),
        }
    }
}

/// Rewrite strategy category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Deterministic pre-coded rules.
    Tier1,
    /// Specification-guided template or oracle-completed rewrite.
    Tier2,
    /// Oracle-only rewrite.
    Tier3,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tier1 => write!(f, "tier-1"),
            Self::Tier2 => write!(f, "tier-2"),
            Self::Tier3 => write!(f, "tier-3"),
        }
    }
}

/// Upper bound on the tiers a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TierPolicy {
    Tier1Only,
    #[default]
    UpToTier2,
    All,
}

impl TierPolicy {
    pub fn permits(&self, tier: Tier) -> bool {
        match self {
            Self::Tier1Only => tier == Tier::Tier1,
            Self::UpToTier2 => tier <= Tier::Tier2,
            Self::All => true,
        }
    }
}

impl std::str::FromStr for TierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1-only" => Ok(Self::Tier1Only),
            "up-to-tier2" => Ok(Self::UpToTier2),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown tier policy '{other}' (expected tier1-only, up-to-tier2, or all)"
            )),
        }
    }
}

/// One applied change, recorded in a patch for provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Identity of the rule or breaking change that produced the edit.
    pub rule: String,
    pub kind: ChangeKind,
    pub tier: Tier,
    pub confidence: Confidence,
    pub description: String,
    /// One-based line in the original file.
    pub line: usize,
}

/// Lifecycle of a patch between analyse and apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchState {
    /// Produced but not yet parse-checked.
    Proposed,
    /// Parse-checked and eligible for apply.
    Ready,
    /// Failed validation; excluded from apply.
    Rejected,
    /// Written to disk.
    Applied,
    /// Apply attempted and failed; the original file is intact.
    Failed,
}

/// All edits for one file in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Content hash identifying this patch on disk.
    pub sha: String,
    pub state: PatchState,
    /// Highest tier that contributed an edit.
    pub tier: Tier,
    pub original_source: String,
    pub patched_source: String,
    /// Unified diff of original → patched.
    pub diff: String,
    pub changes: Vec<ChangeRecord>,
}

/// Severity of a session diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A localized, non-fatal finding surfaced in the session report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            path: None,
            rule: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: None,
            rule: None,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: None,
            rule: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

/// Advisory risk classification for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// 0–100, higher is riskier.
    pub score: u8,
    pub level: RiskLevel,
    /// Human-readable contributing factors.
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// One `analyse` invocation, persisted until `apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSession {
    pub library: String,
    pub from_version: String,
    pub to_version: String,
    pub created_at: DateTime<Utc>,
    pub tier_policy: TierPolicy,
    pub confidence_floor: Confidence,
    pub patches: Vec<Patch>,
    pub diagnostics: Vec<Diagnostic>,
    pub risk: RiskReport,
}

impl MigrationSession {
    /// Patches eligible for apply.
    pub fn ready_patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter().filter(|p| p.state == PatchState::Ready)
    }

    pub fn change_count(&self) -> usize {
        self.patches.iter().map(|p| p.changes.len()).sum()
    }
}

/// Options recognised by `analyse`.
#[derive(Debug, Clone, Default)]
pub struct AnalyseOptions {
    pub tier_policy: TierPolicy,
    /// Rules below this confidence are skipped. Default: medium
    /// (low-confidence rules are disabled by default).
    pub confidence_floor: Confidence,
    pub exclude: Vec<String>,
    /// Do not persist the session.
    pub dry_run: bool,
}

/// Options recognised by `apply`.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Write `.bak` backups before overwriting.
    pub backup: bool,
    /// Apply only the named file's patch.
    pub file: Option<PathBuf>,
}

/// Outcome of an `apply` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
}

/// One declared dependency, annotated with migration support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub package: String,
    pub pinned_version: Option<String>,
    pub latest_version: Option<String>,
    /// A tier-1 transformer exists for this package.
    pub tier1: bool,
}

/// A library with a pre-coded tier-1 transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedLibrary {
    pub name: String,
    pub from_series: String,
    pub to_series: String,
    pub rule_count: usize,
}

/// Summary of any pending session for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub library: String,
    pub to_version: String,
    pub created_at: DateTime<Utc>,
    pub pending_patches: usize,
    pub rejected_patches: usize,
    pub risk: RiskReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_policy() {
        assert!(TierPolicy::Tier1Only.permits(Tier::Tier1));
        assert!(!TierPolicy::Tier1Only.permits(Tier::Tier2));
        assert!(TierPolicy::UpToTier2.permits(Tier::Tier2));
        assert!(!TierPolicy::UpToTier2.permits(Tier::Tier3));
        assert!(TierPolicy::All.permits(Tier::Tier3));
    }

    #[test]
    fn tier_policy_from_str() {
        assert_eq!(
            "tier1-only".parse::<TierPolicy>().unwrap(),
            TierPolicy::Tier1Only
        );
        assert!("tier9".parse::<TierPolicy>().is_err());
    }

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn mechanical_kinds() {
        assert!(ChangeKind::MethodRename.is_mechanical());
        assert!(ChangeKind::ImportMove.is_mechanical());
        assert!(!ChangeKind::ClassConfigRestructure.is_mechanical());
        assert!(!ChangeKind::BehaviorChange.is_mechanical());
    }

    #[test]
    fn breaking_change_serde_round_trip() {
        let change = BreakingChange {
            id: "pydantic-dict-rename".to_string(),
            kind: ChangeKind::MethodRename,
            matcher: MatchSpec {
                symbol: "dict".to_string(),
                receiver: Some("pydantic.BaseModel".to_string()),
                argument: None,
            },
            replacement: "model_dump".to_string(),
            confidence: Confidence::High,
            requires_imports: vec![],
            removes_imports: vec![],
            explanation: "BaseModel.dict() was renamed in v2".to_string(),
            provenance: Some(Provenance {
                url: "https://docs.pydantic.dev/2.0/migration/".to_string(),
                excerpt: "dict() is deprecated, use model_dump()".to_string(),
            }),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"method-rename\""));
        let back: BreakingChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }

    #[test]
    fn session_ready_patches_filters_state() {
        let patch = |state| Patch {
            path: PathBuf::from("m.py"),
            sha: "abc".to_string(),
            state,
            tier: Tier::Tier1,
            original_source: String::new(),
            patched_source: String::new(),
            diff: String::new(),
            changes: Vec::new(),
        };
        let session = MigrationSession {
            library: "pydantic".to_string(),
            from_version: "1.10".to_string(),
            to_version: "2.5".to_string(),
            created_at: Utc::now(),
            tier_policy: TierPolicy::default(),
            confidence_floor: Confidence::Medium,
            patches: vec![patch(PatchState::Ready), patch(PatchState::Rejected)],
            diagnostics: Vec::new(),
            risk: RiskReport {
                score: 10,
                level: RiskLevel::Low,
                factors: Vec::new(),
            },
        };
        assert_eq!(session.ready_patches().count(), 1);
    }
}
