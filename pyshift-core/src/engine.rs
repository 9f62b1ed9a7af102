//! Migration engine: orchestrates one library upgrade over a project.
//!
//! `analyse` runs the tiers in order — pre-coded transformers first,
//! spec-guided rewrites second, oracle-only rewrites last — accumulating
//! per-file patches that are parse-validated, risk-scored, and persisted
//! to the patch store. `apply` replays a stored session onto disk.
//!
//! Failure isolation: a file that fails stays a diagnostic, a rule that
//! fails stays a diagnostic, and a missing oracle degrades the tier; the
//! session always completes and reports.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tokio::task::JoinSet;
use tracing::{info, instrument};

use pyshift_cst::cst::Cst;
use pyshift_cst::edit::{EditOp, EditSet};
use pyshift_cst::helpers::{argument_removal_range, keyword_argument};
use pyshift_cst::imports::{collect_imports, ensure_import};
use pyshift_cst::usage::{UsageIndex, UsageRole};

use crate::adapters::{DependencyLister, VersionResolver};
use crate::config::PyshiftConfig;
use crate::error::{EngineError, Result};
use crate::knowledge::KnowledgeService;
use crate::oracle::{AccessGate, AllowAllGate, RewriteOracle, RewriteRequest};
use crate::risk;
use crate::scanner::ProjectScanner;
use crate::store::{diff::unified_diff, PatchStore};
use crate::transform::{apply_transformer, TransformerRegistry};
use crate::types::{
    AnalyseOptions, ApplyOptions, ApplyReport, BreakingChange, ChangeKind, ChangeRecord,
    Confidence, DependencyReport, Diagnostic, MigrationSession, MigrationSpec, Patch, PatchState,
    SessionStatus, SupportedLibrary, Tier, TierPolicy,
};

/// Cooperative cancellation flag, checked between rule applications and
/// before every oracle call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One requested library upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub library: String,
    pub from_version: String,
    pub to_version: String,
}

/// The tiered migration engine.
pub struct MigrationEngine {
    project_root: PathBuf,
    config: PyshiftConfig,
    registry: TransformerRegistry,
    knowledge: Option<KnowledgeService>,
    rewrite_oracle: Option<Arc<dyn RewriteOracle>>,
    gate: Arc<dyn AccessGate>,
    cancel: CancellationToken,
}

impl MigrationEngine {
    pub fn new(project_root: &Path, config: PyshiftConfig) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            registry: TransformerRegistry::new(),
            knowledge: None,
            rewrite_oracle: None,
            gate: Arc::new(AllowAllGate),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_knowledge(mut self, knowledge: KnowledgeService) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    #[must_use]
    pub fn with_rewrite_oracle(mut self, oracle: Arc<dyn RewriteOracle>) -> Self {
        self.rewrite_oracle = Some(oracle);
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> PatchStore {
        PatchStore::new(&self.project_root)
    }

    /// Libraries with pre-coded tier-1 transformers.
    pub fn libraries(&self) -> Vec<SupportedLibrary> {
        self.registry.supported()
    }

    /// Declared dependencies annotated with latest versions and tier-1
    /// availability.
    pub async fn scan(
        &self,
        lister: &dyn DependencyLister,
        resolver: &dyn VersionResolver,
    ) -> Result<Vec<DependencyReport>> {
        let deps = lister.list(&self.project_root)?;
        let mut reports = Vec::with_capacity(deps.len());
        for (package, pinned_version) in deps {
            let latest_version = resolver.latest(&package).await;
            reports.push(DependencyReport {
                tier1: self.registry.get(&package).is_some(),
                package,
                pinned_version,
                latest_version,
            });
        }
        Ok(reports)
    }

    /// Summary of the pending session, if any.
    pub fn status(&self) -> Result<SessionStatus> {
        self.store().status()
    }

    /// Unified diff of every ready patch in a session.
    pub fn diff(session: &MigrationSession) -> String {
        PatchStore::render_diff(session)
    }

    /// Apply the pending session to disk.
    pub fn apply(&self, options: &ApplyOptions) -> Result<ApplyReport> {
        let store = self.store();
        let mut session = store.load_session()?;
        store.apply(&mut session, options)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        Ok(())
    }

    /// Analyse one upgrade and produce a session of pending patches.
    pub async fn analyse(
        &self,
        request: &UpgradeRequest,
        options: &AnalyseOptions,
    ) -> Result<MigrationSession> {
        self.analyse_with_progress(request, options, &crate::progress::NoopReporter)
            .await
    }

    /// Analyse with user-visible progress reporting.
    #[instrument(skip(self, options, progress), fields(library = %request.library))]
    pub async fn analyse_with_progress(
        &self,
        request: &UpgradeRequest,
        options: &AnalyseOptions,
        progress: &dyn crate::progress::ProgressReporter,
    ) -> Result<MigrationSession> {
        validate_version(&request.from_version)?;
        validate_version(&request.to_version)?;
        self.check_cancel()?;

        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let mut excludes = self.config.analysis.exclude.clone();
        excludes.extend(options.exclude.iter().cloned());
        let scanner = ProjectScanner::new(
            &self.project_root,
            &excludes,
            self.config.engine.max_file_bytes,
        )?;
        progress.start("Scanning", None);
        let scanned = scanner.scan()?;
        progress.message(&format!(
            "{} file(s) parsed, {} skipped",
            scanned.files.len(),
            scanned.failed.len() + scanned.skipped.len()
        ));
        progress.finish();
        info!(
            files = scanned.files.len(),
            failed = scanned.failed.len(),
            "project scanned"
        );

        for (path, message) in &scanned.failed {
            diagnostics.push(
                Diagnostic::error(format!("unparseable source skipped: {message}"))
                    .with_path(path.clone()),
            );
        }
        for (path, reason) in &scanned.skipped {
            diagnostics.push(Diagnostic::warning(format!("skipped: {reason}")).with_path(path.clone()));
        }

        let mut works: Vec<FileWork> = scanned
            .files
            .iter()
            .map(|f| FileWork {
                path: f.path.clone(),
                original: f.source.clone(),
                current: f.source.clone(),
                changes: Vec::new(),
            })
            .collect();

        // ── Tier 1 ────────────────────────────────────────────────
        self.check_cancel()?;
        let transformer = self.registry.get(&request.library);
        if let Some(transformer) = transformer {
            progress.start("Rewriting", Some(works.len() as u64));
            let floor = options.confidence_floor;
            let cancel = self.cancel.clone();
            let results: Vec<(usize, std::result::Result<_, String>)> = works
                .par_iter()
                .enumerate()
                .map(|(index, work)| {
                    if cancel.is_cancelled() {
                        return (index, Err("cancelled".to_string()));
                    }
                    let filename = work.path.display().to_string();
                    let result =
                        apply_transformer(transformer, &work.current, &filename, floor)
                            .map_err(|e| e.to_string());
                    (index, result)
                })
                .collect();

            for (index, result) in results {
                progress.advance(1);
                match result {
                    Ok(outcome) => {
                        for mut diagnostic in outcome.diagnostics {
                            diagnostic.path.get_or_insert_with(|| works[index].path.clone());
                            diagnostics.push(diagnostic);
                        }
                        works[index].current = outcome.source;
                        works[index].changes.extend(outcome.changes);
                    }
                    Err(message) => {
                        diagnostics.push(
                            Diagnostic::error(format!("tier-1 pass failed: {message}"))
                                .with_path(works[index].path.clone()),
                        );
                    }
                }
            }
            progress.finish();
        } else if options.tier_policy == TierPolicy::Tier1Only {
            diagnostics.push(Diagnostic::warning(format!(
                "tier downgrade: no tier-1 transformer for {} and the tier policy \
                 forbids spec-guided or oracle rewrites",
                request.library
            )));
        }
        self.check_cancel()?;

        // ── Tier 2 ────────────────────────────────────────────────
        if options.tier_policy.permits(Tier::Tier2) {
            if let Some(knowledge) = &self.knowledge {
                progress.start("Consulting changelog knowledge", None);
                let acquired = knowledge
                    .acquire(&request.library, &request.from_version, &request.to_version)
                    .await;
                progress.finish();
                match acquired {
                    Ok(acquisition) => {
                        diagnostics.extend(acquisition.diagnostics);
                        if !acquisition.spec.changes.is_empty() {
                            self.run_tier2(
                                request,
                                &acquisition.spec,
                                options,
                                &mut works,
                                &mut diagnostics,
                            )
                            .await?;
                        }
                    }
                    // A failed acquisition degrades to tier 3, it does
                    // not abort the session.
                    Err(e) => diagnostics.push(Diagnostic::warning(format!(
                        "knowledge acquisition failed, degrading to oracle-only rewrites: {e}"
                    ))),
                }
            }
        }
        self.check_cancel()?;

        // ── Tier 3 ────────────────────────────────────────────────
        if options.tier_policy.permits(Tier::Tier3) {
            self.run_tier3(request, &mut works, &mut diagnostics).await?;
        }
        self.check_cancel()?;

        // ── Validation & assembly ─────────────────────────────────
        let mut patches = Vec::new();
        for work in works {
            if work.current == work.original {
                continue;
            }
            let filename = work.path.display().to_string();
            let state = match Cst::parse(&work.current, &filename) {
                Ok(_) => PatchState::Ready,
                Err(e) => {
                    diagnostics.push(
                        Diagnostic::error(format!("post-patch parse failed: {e}"))
                            .with_path(work.path.clone()),
                    );
                    PatchState::Rejected
                }
            };
            let tier = work
                .changes
                .iter()
                .map(|c| c.tier)
                .max()
                .unwrap_or(Tier::Tier1);
            patches.push(Patch {
                sha: PatchStore::patch_sha(&work.path, &work.current),
                diff: unified_diff(&work.original, &work.current, &filename),
                path: work.path,
                state,
                tier,
                original_source: work.original,
                patched_source: work.current,
                changes: work.changes,
            });
        }

        let session = MigrationSession {
            library: request.library.clone(),
            from_version: request.from_version.clone(),
            to_version: request.to_version.clone(),
            created_at: chrono::Utc::now(),
            tier_policy: options.tier_policy,
            confidence_floor: options.confidence_floor,
            risk: risk::score(&patches, &diagnostics),
            patches,
            diagnostics,
        };

        info!(
            patches = session.patches.len(),
            changes = session.change_count(),
            risk = session.risk.score,
            "analysis complete"
        );

        if !options.dry_run {
            self.store().save_session(&session)?;
        }
        Ok(session)
    }

    /// Spec-guided rewrites. Files are independent, so they run
    /// concurrently, bounded by the oracle concurrency limit.
    async fn run_tier2(
        &self,
        request: &UpgradeRequest,
        spec: &MigrationSpec,
        options: &AnalyseOptions,
        works: &mut [FileWork],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        let mut ordered = spec.changes.clone();
        ordered.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        let ordered = Arc::new(ordered);

        let oracle = if self.gate.allows_rewrite() {
            self.rewrite_oracle.clone()
        } else {
            diagnostics.push(Diagnostic::info(format!(
                "oracle completion disabled: {}",
                self.gate.denial_reason()
            )));
            None
        };

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.oracle.max_concurrent.max(1) as usize,
        ));
        let mut join_set = JoinSet::new();

        for (index, work) in works.iter().enumerate() {
            self.check_cancel()?;
            let task = Tier2Task {
                source: work.current.clone(),
                filename: work.path.display().to_string(),
                library: request.library.clone(),
                from_version: request.from_version.clone(),
                to_version: request.to_version.clone(),
                changes: Arc::clone(&ordered),
                oracle: oracle.clone(),
                floor: options.confidence_floor,
                cancel: self.cancel.clone(),
            };
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, task.run().await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let Ok((index, outcome)) = joined else { continue };
            for mut diagnostic in outcome.diagnostics {
                diagnostic.path.get_or_insert_with(|| works[index].path.clone());
                diagnostics.push(diagnostic);
            }
            works[index].current = outcome.source;
            works[index].changes.extend(outcome.changes);
        }
        Ok(())
    }

    /// Oracle-only rewrites for files the earlier tiers left untouched.
    async fn run_tier3(
        &self,
        request: &UpgradeRequest,
        works: &mut [FileWork],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        let Some(oracle) = self.rewrite_oracle.clone() else {
            return Ok(());
        };
        if !self.gate.allows_rewrite() {
            diagnostics.push(Diagnostic::info(format!(
                "tier-3 skipped: {}",
                self.gate.denial_reason()
            )));
            return Ok(());
        }

        for work in works.iter_mut() {
            self.check_cancel()?;
            if !work.changes.is_empty() || work.current != work.original {
                continue;
            }
            let filename = work.path.display().to_string();
            let Ok(cst) = Cst::parse(&work.current, &filename) else {
                continue;
            };
            let usage = UsageIndex::build(&cst, &request.library);
            if !usage.is_active() || usage.usages.is_empty() {
                continue;
            }

            let rewrite_request = RewriteRequest {
                library: &request.library,
                from_version: &request.from_version,
                to_version: &request.to_version,
                breaking_change: None,
                slice: &work.current,
            };
            match oracle.rewrite(&rewrite_request).await {
                Ok(candidate) => {
                    let mut candidate = normalize_rewrite(&candidate);
                    if work.current.ends_with('\n') && !candidate.ends_with('\n') {
                        candidate.push('\n');
                    }
                    if candidate == work.current {
                        continue;
                    }
                    // Only syntactic validity is guaranteed at tier 3.
                    if Cst::parse(&candidate, &filename).is_err() {
                        diagnostics.push(
                            Diagnostic::warning(
                                "oracle rewrite rejected: output does not parse",
                            )
                            .with_path(work.path.clone()),
                        );
                        continue;
                    }
                    work.current = candidate;
                    work.changes.push(ChangeRecord {
                        rule: "tier3-file-rewrite".to_string(),
                        kind: ChangeKind::BehaviorChange,
                        tier: Tier::Tier3,
                        confidence: Confidence::Low,
                        description: "oracle-led rewrite of remaining library uses".to_string(),
                        line: 1,
                    });
                }
                Err(e) => {
                    diagnostics.push(
                        Diagnostic::warning(format!("tier-3 oracle call failed: {e}"))
                            .with_path(work.path.clone()),
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FileWork {
    path: PathBuf,
    original: String,
    current: String,
    changes: Vec<ChangeRecord>,
}

#[derive(Debug)]
struct Tier2Outcome {
    source: String,
    changes: Vec<ChangeRecord>,
    diagnostics: Vec<Diagnostic>,
}

struct Tier2Task {
    source: String,
    filename: String,
    library: String,
    from_version: String,
    to_version: String,
    changes: Arc<Vec<BreakingChange>>,
    oracle: Option<Arc<dyn RewriteOracle>>,
    floor: Confidence,
    cancel: CancellationToken,
}

impl Tier2Task {
    async fn run(self) -> Tier2Outcome {
        let mut outcome = Tier2Outcome {
            source: self.source.clone(),
            changes: Vec::new(),
            diagnostics: Vec::new(),
        };

        for change in self.changes.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            if change.confidence < self.floor {
                outcome.diagnostics.push(
                    Diagnostic::info(format!(
                        "spec change '{}' skipped: confidence below floor",
                        change.id
                    ))
                    .with_rule(change.id.clone()),
                );
                continue;
            }

            if change.kind == ChangeKind::BehaviorChange {
                if outcome.source.contains(&change.matcher.symbol) {
                    outcome.diagnostics.push(
                        Diagnostic::warning(format!(
                            "behavior change in {}: {}",
                            change.matcher.symbol,
                            if change.explanation.is_empty() {
                                "review manually"
                            } else {
                                &change.explanation
                            }
                        ))
                        .with_rule(change.id.clone()),
                    );
                }
                continue;
            }

            if change.kind.is_mechanical() {
                match apply_mechanical_change(&outcome.source, &self.filename, &self.library, change)
                {
                    Ok(Some((source, records))) => {
                        outcome.source = source;
                        outcome.changes.extend(records);
                    }
                    Ok(None) => {}
                    Err(message) => outcome.diagnostics.push(
                        Diagnostic::warning(format!(
                            "spec change '{}' failed, skipped: {message}",
                            change.id
                        ))
                        .with_rule(change.id.clone()),
                    ),
                }
                continue;
            }

            // Non-mechanical kinds need the rewrite oracle for completion.
            let Some(oracle) = &self.oracle else {
                outcome.diagnostics.push(
                    Diagnostic::info(format!(
                        "spec change '{}' needs the rewrite oracle; tier degraded",
                        change.id
                    ))
                    .with_rule(change.id.clone()),
                );
                continue;
            };
            match self
                .apply_oracle_change(oracle.as_ref(), &outcome.source, change)
                .await
            {
                Ok(Some((source, records))) => {
                    outcome.source = source;
                    outcome.changes.extend(records);
                }
                Ok(None) => {}
                Err(message) => outcome.diagnostics.push(
                    Diagnostic::warning(format!(
                        "oracle completion for '{}' failed, skipped: {message}",
                        change.id
                    ))
                    .with_rule(change.id.clone()),
                ),
            }
        }
        outcome
    }

    /// Replace each statement matching the change with an oracle rewrite
    /// of just that slice, accepting only output that parses.
    async fn apply_oracle_change(
        &self,
        oracle: &dyn RewriteOracle,
        source: &str,
        change: &BreakingChange,
    ) -> std::result::Result<Option<(String, Vec<ChangeRecord>)>, String> {
        let cst = Cst::parse(source, &self.filename).map_err(|e| e.to_string())?;
        let usage = UsageIndex::build(&cst, &self.library);
        if !usage.is_active() {
            return Ok(None);
        }
        let qualified = qualified_symbol(&self.library, &change.matcher.symbol);
        let statements: Vec<_> = {
            let mut seen = std::collections::BTreeSet::new();
            usage
                .usages
                .iter()
                .filter(|u| u.qualified == qualified || u.qualified.ends_with(&change.matcher.symbol))
                .filter_map(|u| cst.statement_of(u.node))
                .filter(|s| seen.insert(*s))
                .collect()
        };
        if statements.is_empty() {
            return Ok(None);
        }

        let mut edits = EditSet::new();
        let mut records = Vec::new();
        for statement in statements {
            if self.cancel.is_cancelled() {
                break;
            }
            let slice = cst.text(statement);
            let request = RewriteRequest {
                library: &self.library,
                from_version: &self.from_version,
                to_version: &self.to_version,
                breaking_change: Some(change),
                slice,
            };
            let candidate = oracle.rewrite(&request).await.map_err(|e| e.to_string())?;
            let candidate = normalize_rewrite(&candidate);
            if candidate == slice {
                continue;
            }
            if Cst::parse(&candidate, &self.filename).is_err() {
                return Err("oracle output does not parse".to_string());
            }
            edits.push(
                change.id.clone(),
                EditOp::ReplaceNode {
                    node: statement,
                    text: candidate,
                },
            );
            records.push(ChangeRecord {
                rule: change.id.clone(),
                kind: change.kind,
                tier: Tier::Tier2,
                confidence: change.confidence,
                description: describe(change),
                line: cst.range(statement).map_or(0, |r| r.start_row + 1),
            });
        }
        if edits.is_empty() {
            return Ok(None);
        }
        let commit = edits.commit(&cst).map_err(|e| e.to_string())?;
        apply_import_needs(&commit.source, &self.filename, change)
            .map(|source| Some((source, records)))
    }
}

/// Execute a mechanical spec change as a pure template rewrite.
fn apply_mechanical_change(
    source: &str,
    filename: &str,
    library: &str,
    change: &BreakingChange,
) -> std::result::Result<Option<(String, Vec<ChangeRecord>)>, String> {
    let cst = Cst::parse(source, filename).map_err(|e| e.to_string())?;
    let usage = UsageIndex::build(&cst, library);
    if !usage.is_active() {
        return Ok(None);
    }

    let mut edits = EditSet::new();
    let mut records = Vec::new();
    let mut record = |cst: &Cst, node, description: String| {
        records.push(ChangeRecord {
            rule: change.id.clone(),
            kind: change.kind,
            tier: Tier::Tier2,
            confidence: change.confidence,
            description,
            line: cst.range(node).map_or(0, |r| r.start_row + 1),
        });
    };

    match change.kind {
        ChangeKind::MethodRename | ChangeKind::AttributeRename => {
            for node in cst.nodes_of_kind("attribute") {
                let Some(attr) = cst.child_by_field(node, "attribute") else {
                    continue;
                };
                if cst.text(attr) != change.matcher.symbol {
                    continue;
                }
                let called = cst
                    .parent(node)
                    .is_some_and(|p| cst.kind(p) == "call" && cst.child_by_field(p, "function") == Some(node));
                if (change.kind == ChangeKind::MethodRename) != called {
                    continue;
                }
                edits.push(
                    change.id.clone(),
                    EditOp::ReplaceNode {
                        node: attr,
                        text: change.replacement.clone(),
                    },
                );
                record(
                    &cst,
                    node,
                    format!(".{} renamed to .{}", change.matcher.symbol, change.replacement),
                );
            }
        }
        ChangeKind::SymbolRename => {
            let qualified = qualified_symbol(library, &change.matcher.symbol);
            for u in &usage.usages {
                if u.qualified != qualified || u.role == UsageRole::AssignmentTarget {
                    continue;
                }
                if cst.kind(u.node) != "identifier" {
                    continue;
                }
                edits.push(
                    change.id.clone(),
                    EditOp::ReplaceNode {
                        node: u.node,
                        text: change.replacement.clone(),
                    },
                );
                record(
                    &cst,
                    u.node,
                    format!("{} renamed to {}", change.matcher.symbol, change.replacement),
                );
            }
            // Rename the import binding too.
            for import in collect_imports(&cst) {
                if import.module == library
                    && import.name.as_deref() == Some(change.matcher.symbol.as_str())
                    && import.alias.is_none()
                {
                    edits.push(
                        change.id.clone(),
                        EditOp::ReplaceNode {
                            node: import.item,
                            text: change.replacement.clone(),
                        },
                    );
                }
            }
        }
        ChangeKind::ArgumentRename | ChangeKind::ArgumentRemoved => {
            let Some(argument) = &change.matcher.argument else {
                return Err("argument-level change without an argument name".to_string());
            };
            let qualified = qualified_symbol(library, &change.matcher.symbol);
            for u in &usage.usages {
                if u.role != UsageRole::Call || u.qualified != qualified {
                    continue;
                }
                let Some(call) = cst.parent(u.node).filter(|p| cst.kind(*p) == "call") else {
                    continue;
                };
                let Some(kwarg) = keyword_argument(&cst, call, argument) else {
                    continue;
                };
                if change.kind == ChangeKind::ArgumentRename {
                    let Some(name_node) = cst.child_by_field(kwarg, "name") else {
                        continue;
                    };
                    edits.push(
                        change.id.clone(),
                        EditOp::ReplaceNode {
                            node: name_node,
                            text: change.replacement.clone(),
                        },
                    );
                    record(
                        &cst,
                        call,
                        format!("{argument}= renamed to {}=", change.replacement),
                    );
                } else if let Some(range) = argument_removal_range(&cst, call, kwarg) {
                    edits.push(
                        change.id.clone(),
                        EditOp::ReplaceRange {
                            range,
                            text: String::new(),
                        },
                    );
                    record(&cst, call, format!("{argument}= removed"));
                }
            }
        }
        ChangeKind::ImportMove => {
            for import in collect_imports(&cst) {
                if import.module != change.matcher.symbol {
                    continue;
                }
                let Some(module_node) = cst.child_by_field(import.statement, "module_name") else {
                    continue;
                };
                edits.push(
                    change.id.clone(),
                    EditOp::ReplaceNode {
                        node: module_node,
                        text: change.replacement.clone(),
                    },
                );
                record(
                    &cst,
                    import.statement,
                    format!(
                        "import moved from {} to {}",
                        change.matcher.symbol, change.replacement
                    ),
                );
            }
        }
        _ => return Ok(None),
    }

    if edits.is_empty() {
        return Ok(None);
    }
    let commit = edits.commit(&cst).map_err(|e| e.to_string())?;
    // Commits can dedup overlapping edits; keep the records honest.
    records.truncate(commit.applied.len());
    apply_import_needs(&commit.source, filename, change).map(|source| Some((source, records)))
}

/// Add any imports the change requires to the rewritten source.
fn apply_import_needs(
    source: &str,
    filename: &str,
    change: &BreakingChange,
) -> std::result::Result<String, String> {
    if change.requires_imports.is_empty() {
        return Ok(source.to_string());
    }
    let cst = Cst::parse(source, filename).map_err(|e| e.to_string())?;
    let mut edits = EditSet::new();
    for need in &change.requires_imports {
        let names: Vec<&str> = need.names.iter().map(String::as_str).collect();
        ensure_import(&cst, &mut edits, &need.module, &names);
    }
    if edits.is_empty() {
        return Ok(source.to_string());
    }
    let commit = edits.commit(&cst).map_err(|e| e.to_string())?;
    Ok(commit.source)
}

fn qualified_symbol(library: &str, symbol: &str) -> String {
    if symbol.contains('.') {
        symbol.to_string()
    } else {
        format!("{library}.{symbol}")
    }
}

fn describe(change: &BreakingChange) -> String {
    if change.explanation.is_empty() {
        format!("{:?} for {}", change.kind, change.matcher.symbol)
    } else {
        change.explanation.clone()
    }
}

/// Oracle slices come back with incidental trailing whitespace.
fn normalize_rewrite(candidate: &str) -> String {
    candidate.trim_end().to_string()
}

fn validate_version(version: &str) -> Result<()> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '*'));
    if !valid {
        return Err(EngineError::BadVersion(version.to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::knowledge::cache::SpecCache;
    use crate::knowledge::sources::SourceFetcher;
    use crate::oracle::{DenyAllGate, ExtractionOracle, SourceDocument};
    use crate::types::MatchSpec;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn engine(root: &Path) -> MigrationEngine {
        MigrationEngine::new(root, PyshiftConfig::default())
    }

    fn request(library: &str) -> UpgradeRequest {
        UpgradeRequest {
            library: library.to_string(),
            from_version: "1.10".to_string(),
            to_version: "2.5".to_string(),
        }
    }

    #[tokio::test]
    async fn tier1_session_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "models.py",
            "from pydantic import BaseModel\n\nclass User(BaseModel):\n    name: str\n\nu = User()\nd = u.dict()\nj = u.json()\n",
        );
        write(tmp.path(), "unrelated.py", "import json\n\nx = json.dumps({})\n");

        let session = engine(tmp.path())
            .analyse(&request("pydantic"), &AnalyseOptions::default())
            .await
            .unwrap();

        assert_eq!(session.patches.len(), 1, "only the pydantic file changes");
        let patch = &session.patches[0];
        assert_eq!(patch.state, PatchState::Ready);
        assert_eq!(patch.tier, Tier::Tier1);
        assert_eq!(patch.changes.len(), 2);
        assert!(patch.patched_source.contains("u.model_dump()"));
        assert!(patch.patched_source.contains("u.model_dump_json()"));
        assert!(patch.diff.contains("+d = u.model_dump()"));
        assert!(session.risk.score < 25, "two high-confidence edits are low risk");

        // Session persisted for apply.
        assert!(PatchStore::new(tmp.path()).has_session());
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "m.py",
            "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n\nu = U()\nd = u.dict()\n",
        );
        let options = AnalyseOptions {
            dry_run: true,
            ..Default::default()
        };
        let session = engine(tmp.path())
            .analyse(&request("pydantic"), &options)
            .await
            .unwrap();
        assert_eq!(session.patches.len(), 1);
        assert!(!PatchStore::new(tmp.path()).has_session());
    }

    #[tokio::test]
    async fn session_level_idempotence() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "m.py",
            "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n\nu = U()\nd = u.dict()\n",
        );
        let eng = engine(tmp.path());
        let first = eng
            .analyse(&request("pydantic"), &AnalyseOptions::default())
            .await
            .unwrap();
        assert_eq!(first.patches.len(), 1);

        eng.apply(&ApplyOptions::default()).unwrap();

        let second = eng
            .analyse(&request("pydantic"), &AnalyseOptions::default())
            .await
            .unwrap();
        assert!(second.patches.is_empty(), "re-analyse after apply is empty");
    }

    #[tokio::test]
    async fn cancellation_discards_everything() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "m.py", "x = 1\n");
        let token = CancellationToken::new();
        token.cancel();
        let eng = engine(tmp.path()).with_cancellation(token);
        let err = eng
            .analyse(&request("pydantic"), &AnalyseOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(!PatchStore::new(tmp.path()).has_session());
    }

    #[tokio::test]
    async fn bad_version_is_an_input_error() {
        let tmp = tempfile::tempdir().unwrap();
        let eng = engine(tmp.path());
        let bad = UpgradeRequest {
            library: "pydantic".to_string(),
            from_version: "not a version!".to_string(),
            to_version: "2.0".to_string(),
        };
        assert!(eng
            .analyse(&bad, &AnalyseOptions::default())
            .await
            .is_err());
    }

    // ── Tier fallback (S8 shape) ───────────────────────────────────

    #[derive(Debug)]
    struct OneDocFetcher;

    #[async_trait::async_trait]
    impl SourceFetcher for OneDocFetcher {
        async fn fetch(
            &self,
            _package: &str,
            _from: &str,
            _to: &str,
        ) -> std::result::Result<Vec<SourceDocument>, crate::error::KnowledgeError> {
            Ok(vec![SourceDocument {
                url: "https://example/changelog".to_string(),
                content_type: "text/markdown".to_string(),
                content: "run() was renamed to start()".to_string(),
            }])
        }
    }

    #[derive(Debug)]
    struct RenameExtractor;

    #[async_trait::async_trait]
    impl ExtractionOracle for RenameExtractor {
        async fn extract(
            &self,
            _library: &str,
            _from: &str,
            _to: &str,
            _document: &SourceDocument,
        ) -> std::result::Result<Vec<BreakingChange>, OracleError> {
            Ok(vec![BreakingChange {
                id: "somelib-run-rename".to_string(),
                kind: ChangeKind::MethodRename,
                matcher: MatchSpec {
                    symbol: "run".to_string(),
                    receiver: None,
                    argument: None,
                },
                replacement: "start".to_string(),
                confidence: Confidence::Medium,
                requires_imports: vec![],
                removes_imports: vec![],
                explanation: "run() renamed to start()".to_string(),
                provenance: None,
            }])
        }
    }

    fn knowledge_service(cache_dir: &Path) -> KnowledgeService {
        KnowledgeService::new(
            Arc::new(OneDocFetcher),
            Arc::new(RenameExtractor),
            SpecCache::new(cache_dir, 180),
        )
    }

    const SOMELIB_SOURCE: &str =
        "from somelib import Client\n\nclient = Client()\nclient.run()\n";

    #[tokio::test]
    async fn tier2_fallback_applies_spec_change() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path())
            .with_knowledge(knowledge_service(&tmp.path().join(".pyshift/cache")));

        let session = eng
            .analyse(&request("somelib"), &AnalyseOptions::default())
            .await
            .unwrap();

        assert_eq!(session.patches.len(), 1);
        let patch = &session.patches[0];
        assert!(patch.patched_source.contains("client.start()"));
        assert_eq!(patch.tier, Tier::Tier2);
        assert_eq!(patch.changes.len(), 1);
        assert_eq!(patch.changes[0].confidence, Confidence::Medium);
        assert!(session.risk.score > 0);
    }

    #[tokio::test]
    async fn tier1_only_policy_downgrades_with_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path())
            .with_knowledge(knowledge_service(&tmp.path().join(".pyshift/cache")));

        let options = AnalyseOptions {
            tier_policy: TierPolicy::Tier1Only,
            ..Default::default()
        };
        let session = eng.analyse(&request("somelib"), &options).await.unwrap();

        assert!(session.patches.is_empty(), "no edits under tier1-only");
        assert!(session
            .diagnostics
            .iter()
            .any(|d| d.message.contains("tier downgrade")));
    }

    #[tokio::test]
    async fn confidence_floor_blocks_spec_changes() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path())
            .with_knowledge(knowledge_service(&tmp.path().join(".pyshift/cache")));

        let options = AnalyseOptions {
            confidence_floor: Confidence::High,
            ..Default::default()
        };
        let session = eng.analyse(&request("somelib"), &options).await.unwrap();
        assert!(session.patches.is_empty());
        assert!(session
            .diagnostics
            .iter()
            .any(|d| d.message.contains("below floor")));
    }

    // ── Tier 3 ─────────────────────────────────────────────────────

    #[derive(Debug)]
    struct WholeFileOracle;

    #[async_trait::async_trait]
    impl RewriteOracle for WholeFileOracle {
        async fn rewrite(
            &self,
            request: &RewriteRequest<'_>,
        ) -> std::result::Result<String, OracleError> {
            Ok(request.slice.replace("client.run()", "client.start()"))
        }
    }

    #[derive(Debug)]
    struct GarbageOracle;

    #[async_trait::async_trait]
    impl RewriteOracle for GarbageOracle {
        async fn rewrite(
            &self,
            _request: &RewriteRequest<'_>,
        ) -> std::result::Result<String, OracleError> {
            Ok("def broken(:".to_string())
        }
    }

    #[tokio::test]
    async fn tier3_rewrites_when_policy_allows() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path()).with_rewrite_oracle(Arc::new(WholeFileOracle));

        let options = AnalyseOptions {
            tier_policy: TierPolicy::All,
            ..Default::default()
        };
        let session = eng.analyse(&request("somelib"), &options).await.unwrap();
        assert_eq!(session.patches.len(), 1);
        assert_eq!(session.patches[0].tier, Tier::Tier3);
        assert!(session.patches[0].patched_source.contains("client.start()"));
    }

    #[tokio::test]
    async fn tier3_rejects_unparseable_oracle_output() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path()).with_rewrite_oracle(Arc::new(GarbageOracle));

        let options = AnalyseOptions {
            tier_policy: TierPolicy::All,
            ..Default::default()
        };
        let session = eng.analyse(&request("somelib"), &options).await.unwrap();
        assert!(session.patches.is_empty());
        assert!(session
            .diagnostics
            .iter()
            .any(|d| d.message.contains("does not parse")));
    }

    #[tokio::test]
    async fn denied_gate_degrades_tier3() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);
        let eng = engine(tmp.path())
            .with_rewrite_oracle(Arc::new(WholeFileOracle))
            .with_gate(Arc::new(DenyAllGate("quota exhausted".to_string())));

        let options = AnalyseOptions {
            tier_policy: TierPolicy::All,
            ..Default::default()
        };
        let session = eng.analyse(&request("somelib"), &options).await.unwrap();
        assert!(session.patches.is_empty());
        assert!(session
            .diagnostics
            .iter()
            .any(|d| d.message.contains("quota exhausted")));
    }

    #[tokio::test]
    async fn tier_monotonicity() {
        // Patches produced under tier1-only ⊆ up-to-tier2 ⊆ all.
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "models.py",
            "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n\nu = U()\nd = u.dict()\n",
        );
        write(tmp.path(), "svc.py", SOMELIB_SOURCE);

        let mut counts = Vec::new();
        for policy in [TierPolicy::Tier1Only, TierPolicy::UpToTier2, TierPolicy::All] {
            let eng = engine(tmp.path())
                .with_knowledge(knowledge_service(&tmp.path().join(".pyshift/cache")))
                .with_rewrite_oracle(Arc::new(WholeFileOracle));
            let options = AnalyseOptions {
                tier_policy: policy,
                dry_run: true,
                ..Default::default()
            };
            let session = eng.analyse(&request("pydantic"), &options).await.unwrap();
            counts.push(session.change_count());
        }
        assert!(counts[0] <= counts[1] && counts[1] <= counts[2], "{counts:?}");
    }

    #[tokio::test]
    async fn scan_reports_tier1_availability() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "requirements.txt", "pydantic==1.10\nleftpad==1.0\n");

        #[derive(Debug)]
        struct NoResolver;
        #[async_trait::async_trait]
        impl VersionResolver for NoResolver {
            async fn latest(&self, _package: &str) -> Option<String> {
                Some("9.9".to_string())
            }
        }

        let eng = engine(tmp.path());
        let reports = eng
            .scan(&crate::adapters::ManifestLister, &NoResolver)
            .await
            .unwrap();
        let pydantic = reports.iter().find(|r| r.package == "pydantic").unwrap();
        assert!(pydantic.tier1);
        assert_eq!(pydantic.latest_version.as_deref(), Some("9.9"));
        let leftpad = reports.iter().find(|r| r.package == "leftpad").unwrap();
        assert!(!leftpad.tier1);
    }
}
