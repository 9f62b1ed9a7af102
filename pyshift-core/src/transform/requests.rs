//! Requests 2.x housekeeping.
//!
//! urllib3 stopped being vendored under `requests.packages`, and the
//! `requests.compat` URL helpers are plain `urllib.parse` re-exports.
//! The missing-timeout check is advisory only: injecting `timeout=` would
//! change runtime behavior, so it surfaces as a diagnostic instead.

use pyshift_cst::edit::{EditOp, EditSet};
use pyshift_cst::helpers::{dotted_text, keyword_argument};
use pyshift_cst::imports::{collect_imports, ensure_module_import, ImportKind};

use crate::types::{ChangeKind, Confidence, Diagnostic};

use super::{LibraryTransformer, Rule, RuleCtx, RuleOutput};

pub struct RequestsTransformer;

impl LibraryTransformer for RequestsTransformer {
    fn library(&self) -> &'static str {
        "requests"
    }

    fn from_series(&self) -> &'static str {
        "2.x"
    }

    fn to_series(&self) -> &'static str {
        "2.x"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 4] = [
    Rule {
        name: "requests-urllib3-import-move",
        kind: ChangeKind::ImportMove,
        confidence: Confidence::High,
        run: urllib3_import_move,
    },
    Rule {
        name: "requests-compat-import-move",
        kind: ChangeKind::ImportMove,
        confidence: Confidence::High,
        run: compat_import_move,
    },
    Rule {
        name: "requests-urllib3-attribute",
        kind: ChangeKind::AttributeRename,
        confidence: Confidence::High,
        run: urllib3_attribute_rewrite,
    },
    Rule {
        name: "requests-missing-timeout-advisory",
        kind: ChangeKind::BehaviorChange,
        confidence: Confidence::Medium,
        run: missing_timeout_advisory,
    },
];

const VENDORED_PREFIX: &str = "requests.packages.urllib3";

/// URL helpers that `requests.compat` re-exports from `urllib.parse`.
const COMPAT_URL_HELPERS: &[&str] = &[
    "urljoin", "urlparse", "urlsplit", "urlunparse", "urlencode", "quote", "unquote",
];

const HTTP_VERBS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options", "request"];

fn urllib3_import_move(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut rewritten = std::collections::HashSet::new();

    for record in collect_imports(ctx.cst) {
        if !record.module.starts_with(VENDORED_PREFIX) {
            continue;
        }
        if !matches!(record.kind, ImportKind::From | ImportKind::FromAs) {
            continue;
        }
        if !rewritten.insert(record.statement) {
            continue;
        }
        let Some(module_node) = ctx.cst.child_by_field(record.statement, "module_name") else {
            continue;
        };
        let new_module = record.module.replacen(VENDORED_PREFIX, "urllib3", 1);
        edits.push(
            "requests-urllib3-import-move",
            EditOp::ReplaceNode {
                node: module_node,
                text: new_module.clone(),
            },
        );
        output.change(
            ctx.cst,
            record.statement,
            format!("import moved from {} to {new_module}", record.module),
        );
    }
    output
}

fn compat_import_move(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let records = collect_imports(ctx.cst);
    let mut handled = std::collections::HashSet::new();

    for record in &records {
        if record.module != "requests.compat" || !handled.insert(record.statement) {
            continue;
        }
        let statement_records: Vec<_> = records
            .iter()
            .filter(|r| r.statement == record.statement)
            .collect();
        let (movable, staying): (Vec<&&_>, Vec<&&_>) = statement_records.iter().partition(|r| {
            r.name
                .as_deref()
                .is_some_and(|n| COMPAT_URL_HELPERS.contains(&n))
        });
        if movable.is_empty() {
            continue;
        }

        let moved: Vec<String> = movable
            .iter()
            .map(|r| ctx.cst.text(r.item).to_string())
            .collect();
        if staying.is_empty() {
            edits.push(
                "requests-compat-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!("from urllib.parse import {}", moved.join(", ")),
                },
            );
        } else {
            let kept: Vec<String> = staying
                .iter()
                .map(|r| ctx.cst.text(r.item).to_string())
                .collect();
            edits.push(
                "requests-compat-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!("from requests.compat import {}", kept.join(", ")),
                },
            );
            edits.push(
                "requests-compat-import-move",
                EditOp::InsertAfter {
                    stmt: record.statement,
                    text: format!("from urllib.parse import {}", moved.join(", ")),
                },
            );
        }
        output.change(
            ctx.cst,
            record.statement,
            "URL helpers now imported from urllib.parse",
        );
    }
    output
}

fn urllib3_attribute_rewrite(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut rewrote = false;

    for node in ctx.cst.nodes_of_kind("attribute") {
        // Only the outermost chain: skip attributes nested in a larger one.
        if ctx
            .cst
            .parent(node)
            .is_some_and(|p| ctx.cst.kind(p) == "attribute")
        {
            continue;
        }
        let Some(chain) = dotted_text(ctx.cst, node) else {
            continue;
        };
        if !chain.starts_with(VENDORED_PREFIX) {
            continue;
        }
        let replacement = chain.replacen(VENDORED_PREFIX, "urllib3", 1);
        edits.push(
            "requests-urllib3-attribute",
            EditOp::ReplaceNode {
                node,
                text: replacement,
            },
        );
        rewrote = true;
        output.change(
            ctx.cst,
            node,
            "vendored urllib3 access rewritten to the top-level package",
        );
    }

    if rewrote {
        ensure_module_import(ctx.cst, edits, "urllib3");
    }
    output
}

fn missing_timeout_advisory(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let _ = edits; // advisory only
    let mut output = RuleOutput::default();

    for usage in &ctx.usage.usages {
        if usage.role != pyshift_cst::usage::UsageRole::Call {
            continue;
        }
        let Some(verb) = usage.qualified.strip_prefix("requests.") else {
            continue;
        };
        if !HTTP_VERBS.contains(&verb) {
            continue;
        }
        let Some(call) = ctx
            .cst
            .parent(usage.node)
            .filter(|p| ctx.cst.kind(*p) == "call")
        else {
            continue;
        };
        if keyword_argument(ctx.cst, call, "timeout").is_some() {
            continue;
        }
        let line = ctx.cst.range(call).map_or(0, |r| r.start_row + 1);
        output.diagnostics.push(Diagnostic::warning(format!(
            "line {line}: requests.{verb}() without timeout= blocks forever on a stalled server"
        )));
    }
    output
}
