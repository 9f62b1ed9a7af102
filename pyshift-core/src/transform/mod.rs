//! Tier-1 transformer library.
//!
//! One named transformer per supported library, each a composition of
//! small deterministic rewrite rules. A rule declares its confidence and
//! change kind, matches structurally against the usage index, and queues
//! edits; the driver commits after every rule, re-parses, and rolls back
//! a rule whose output does not parse. Re-parsing between rules means a
//! later rule matches against the already-updated tree, so two rules
//! touching the same statement compose instead of conflicting.

pub mod fastapi;
pub mod pydantic;
pub mod requests;
pub mod sqlalchemy;

use tracing::{debug, warn};

use pyshift_cst::cst::Cst;
use pyshift_cst::edit::EditSet;
use pyshift_cst::usage::UsageIndex;
use pyshift_cst::CstError;

use crate::error::Result;
use crate::types::{
    ChangeKind, ChangeRecord, Confidence, Diagnostic, Severity, SupportedLibrary, Tier,
};

/// Read-only context a rule matches against.
pub struct RuleCtx<'a> {
    pub cst: &'a Cst,
    pub usage: &'a UsageIndex,
}

/// One change a rule made, for the patch provenance trail.
#[derive(Debug, Clone)]
pub struct RuleChange {
    pub description: String,
    /// One-based line the change starts on.
    pub line: usize,
}

/// Everything a single rule application produced.
#[derive(Debug, Default)]
pub struct RuleOutput {
    pub changes: Vec<RuleChange>,
    /// Advisory findings (behavior changes the rule refuses to edit).
    pub diagnostics: Vec<Diagnostic>,
}

impl RuleOutput {
    pub fn change(&mut self, cst: &Cst, node: pyshift_cst::NodeId, description: impl Into<String>) {
        let line = cst.range(node).map_or(0, |r| r.start_row + 1);
        self.changes.push(RuleChange {
            description: description.into(),
            line,
        });
    }
}

/// A deterministic rewrite rule.
pub struct Rule {
    pub name: &'static str,
    pub kind: ChangeKind,
    pub confidence: Confidence,
    pub run: fn(&RuleCtx<'_>, &mut EditSet) -> RuleOutput,
}

/// A named tier-1 transformer for one library migration.
pub trait LibraryTransformer: Send + Sync {
    fn library(&self) -> &'static str;
    fn from_series(&self) -> &'static str;
    fn to_series(&self) -> &'static str;
    fn rules(&self) -> &'static [Rule];

    /// Libraries whose now-unreferenced imports should be pruned after
    /// this transformer ran.
    fn import_prune_targets(&self) -> Vec<&'static str> {
        vec![self.library()]
    }

    /// Libraries whose presence in a file activates this transformer.
    /// FastAPI rewrites fire on files importing only starlette.
    fn activation_libraries(&self) -> Vec<&'static str> {
        vec![self.library()]
    }
}

/// All pre-coded transformers.
pub struct TransformerRegistry {
    transformers: Vec<Box<dyn LibraryTransformer>>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            transformers: vec![
                Box::new(pydantic::PydanticTransformer),
                Box::new(sqlalchemy::SqlalchemyTransformer),
                Box::new(fastapi::FastapiTransformer),
                Box::new(requests::RequestsTransformer),
            ],
        }
    }

    pub fn get(&self, library: &str) -> Option<&dyn LibraryTransformer> {
        self.transformers
            .iter()
            .find(|t| t.library() == library)
            .map(Box::as_ref)
    }

    pub fn supported(&self) -> Vec<SupportedLibrary> {
        self.transformers
            .iter()
            .map(|t| SupportedLibrary {
                name: t.library().to_string(),
                from_series: t.from_series().to_string(),
                to_series: t.to_series().to_string(),
                rule_count: t.rules().len(),
            })
            .collect()
    }

    /// Order libraries for a multi-library session. Known constraints
    /// come from a static table (`pydantic` state feeds the `fastapi`
    /// transformer); everything else is alphabetical.
    pub fn session_order(&self, libraries: &mut Vec<String>) {
        const BEFORE: &[(&str, &str)] = &[("pydantic", "fastapi")];
        libraries.sort();
        for (earlier, later) in BEFORE {
            let Some(earlier_pos) = libraries.iter().position(|l| l == earlier) else {
                continue;
            };
            let Some(later_pos) = libraries.iter().position(|l| l == later) else {
                continue;
            };
            if earlier_pos > later_pos {
                libraries.swap(earlier_pos, later_pos);
            }
        }
    }
}

/// Result of running one transformer over one file.
#[derive(Debug)]
pub struct FileTransformOutcome {
    /// Final source after all surviving rules.
    pub source: String,
    pub changes: Vec<ChangeRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileTransformOutcome {
    pub fn is_unchanged(&self, original: &str) -> bool {
        self.source == original
    }
}

/// Apply a transformer's rules to one file.
///
/// Rules run in declared order within descending confidence. Each rule
/// matches against a fresh parse of the current text; a rule below the
/// confidence floor is skipped with a policy diagnostic, and a rule whose
/// commit fails the parse check is rolled back with a logic diagnostic.
pub fn apply_transformer(
    transformer: &dyn LibraryTransformer,
    source: &str,
    filename: &str,
    confidence_floor: Confidence,
) -> Result<FileTransformOutcome> {
    let library = transformer.library();
    let mut current = source.to_string();
    let mut changes = Vec::new();
    let mut diagnostics = Vec::new();

    let mut rules: Vec<&Rule> = transformer.rules().iter().collect();
    // Stable: declared order breaks ties inside one confidence level.
    rules.sort_by(|a, b| b.confidence.cmp(&a.confidence));

    for rule in rules {
        if rule.confidence < confidence_floor {
            diagnostics.push(
                Diagnostic::info(format!(
                    "rule skipped: confidence {:?} below floor {:?}",
                    rule.confidence, confidence_floor
                ))
                .with_rule(rule.name),
            );
            continue;
        }

        let cst = Cst::parse(&current, filename)?;
        let usage = UsageIndex::build(&cst, library);
        let active = usage.is_active()
            || transformer.activation_libraries().iter().any(|lib| {
                pyshift_cst::imports::collect_imports(&cst)
                    .iter()
                    .any(|r| r.binds_library(lib))
            });
        if !active {
            break;
        }

        let ctx = RuleCtx {
            cst: &cst,
            usage: &usage,
        };
        let mut edits = EditSet::new();
        let output = (rule.run)(&ctx, &mut edits);

        for mut diagnostic in output.diagnostics {
            diagnostic.rule.get_or_insert_with(|| rule.name.to_string());
            diagnostics.push(diagnostic);
        }

        if edits.is_empty() {
            continue;
        }

        match edits.commit(&cst) {
            Ok(commit) => {
                if commit.applied.is_empty() {
                    continue;
                }
                debug!(rule = rule.name, edits = commit.applied.len(), "rule applied");
                current = commit.source;
                changes.extend(output.changes.into_iter().map(|c| ChangeRecord {
                    rule: rule.name.to_string(),
                    kind: rule.kind,
                    tier: Tier::Tier1,
                    confidence: rule.confidence,
                    description: c.description,
                    line: c.line,
                }));
            }
            Err(CstError::InvalidEdit { rule: edit_rule, message }) => {
                // A rule producing an unparseable tree is a bug in the
                // rule; roll back and keep going with the other rules.
                warn!(rule = %edit_rule, %message, "rule output failed parse check, rolled back");
                diagnostics.push(
                    Diagnostic {
                        severity: Severity::Error,
                        path: None,
                        rule: Some(rule.name.to_string()),
                        message: format!("rule output failed parse check, rolled back: {message}"),
                    },
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Import bookkeeping: drop library imports that no longer have any
    // reference after the rewrites.
    if current != source {
        for target in transformer.import_prune_targets() {
            let pruned =
                pyshift_cst::imports::remove_unused_library_imports(&current, filename, target)?;
            if !pruned.removed.is_empty() {
                debug!(library = target, removed = ?pruned.removed, "pruned unused imports");
            }
            current = pruned.source;
        }
    }

    Ok(FileTransformOutcome {
        source: current,
        changes,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_its_libraries() {
        let registry = TransformerRegistry::new();
        assert!(registry.get("pydantic").is_some());
        assert!(registry.get("sqlalchemy").is_some());
        assert!(registry.get("fastapi").is_some());
        assert!(registry.get("requests").is_some());
        assert!(registry.get("leftpad").is_none());

        let supported = registry.supported();
        assert_eq!(supported.len(), 4);
        assert!(supported.iter().all(|s| s.rule_count > 0));
    }

    #[test]
    fn session_order_puts_pydantic_before_fastapi() {
        let registry = TransformerRegistry::new();
        let mut libraries = vec!["fastapi".to_string(), "pydantic".to_string()];
        registry.session_order(&mut libraries);
        assert_eq!(libraries, vec!["pydantic".to_string(), "fastapi".to_string()]);

        let mut unknown = vec!["zlib".to_string(), "attrs".to_string()];
        registry.session_order(&mut unknown);
        assert_eq!(unknown, vec!["attrs".to_string(), "zlib".to_string()]);
    }

    #[test]
    fn confidence_floor_skips_rules_with_policy_diagnostic() {
        let registry = TransformerRegistry::new();
        let transformer = registry.get("pydantic").unwrap();
        let source = "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n\nu = U()\nd = u.dict()\n";
        let outcome =
            apply_transformer(transformer, source, "m.py", Confidence::High).unwrap();
        // High-confidence rules still ran.
        assert!(outcome.source.contains("model_dump"));
        // At least one sub-high rule was skipped with a policy note.
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.message.contains("below floor")));
    }

    #[test]
    fn inactive_file_is_untouched() {
        let registry = TransformerRegistry::new();
        let transformer = registry.get("pydantic").unwrap();
        let source = "import json\n\nd = json.dumps({})\n";
        let outcome =
            apply_transformer(transformer, source, "m.py", Confidence::Medium).unwrap();
        assert!(outcome.is_unchanged(source));
        assert!(outcome.changes.is_empty());
    }
}
