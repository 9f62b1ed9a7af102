//! FastAPI: re-home imports that moved from `starlette` to the
//! `fastapi` namespace.
//!
//! `starlette.status` and `starlette.middleware` are deliberately
//! excluded: FastAPI documents importing status codes and middleware
//! straight from starlette, so rewriting them would churn working code.

use pyshift_cst::edit::{EditOp, EditSet};
use pyshift_cst::imports::{collect_imports, ImportKind};

use crate::types::{ChangeKind, Confidence};

use super::{LibraryTransformer, Rule, RuleCtx, RuleOutput};

pub struct FastapiTransformer;

impl LibraryTransformer for FastapiTransformer {
    fn library(&self) -> &'static str {
        "fastapi"
    }

    fn from_series(&self) -> &'static str {
        "0.9x"
    }

    fn to_series(&self) -> &'static str {
        "0.11x"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }

    fn import_prune_targets(&self) -> Vec<&'static str> {
        // The rewrites touch starlette imports, not fastapi's own.
        vec!["starlette"]
    }

    fn activation_libraries(&self) -> Vec<&'static str> {
        vec!["fastapi", "starlette"]
    }
}

static RULES: [Rule; 1] = [Rule {
    name: "fastapi-starlette-import-move",
    kind: ChangeKind::ImportMove,
    confidence: Confidence::High,
    run: starlette_import_move,
}];

/// Module paths FastAPI re-exports under its own namespace.
const MODULE_MOVES: &[(&str, &str)] = &[
    ("starlette.responses", "fastapi.responses"),
    ("starlette.requests", "fastapi.requests"),
    ("starlette.testclient", "fastapi.testclient"),
    ("starlette.websockets", "fastapi.websockets"),
    ("starlette.background", "fastapi.background"),
    ("starlette.templating", "fastapi.templating"),
    ("starlette.staticfiles", "fastapi.staticfiles"),
];

/// Documented exclusions: keep importing these from starlette.
const EXCLUDED: &[&str] = &["starlette.status", "starlette.middleware"];

fn starlette_import_move(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut rewritten = std::collections::HashSet::new();

    for record in collect_imports(ctx.cst) {
        if !matches!(
            record.kind,
            ImportKind::From | ImportKind::FromAs | ImportKind::Wildcard
        ) {
            continue;
        }
        if EXCLUDED
            .iter()
            .any(|e| record.module == *e || record.module.starts_with(&format!("{e}.")))
        {
            continue;
        }
        let Some((_, target)) = MODULE_MOVES.iter().find(|(old, _)| record.module == *old) else {
            continue;
        };
        // One edit per statement even with several imported names.
        if !rewritten.insert(record.statement) {
            continue;
        }
        let Some(module_node) = ctx.cst.child_by_field(record.statement, "module_name") else {
            continue;
        };
        edits.push(
            "fastapi-starlette-import-move",
            EditOp::ReplaceNode {
                node: module_node,
                text: (*target).to_string(),
            },
        );
        output.change(
            ctx.cst,
            record.statement,
            format!("import moved from {} to {target}", record.module),
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::apply_transformer;

    fn run(source: &str) -> crate::transform::FileTransformOutcome {
        apply_transformer(&FastapiTransformer, source, "m.py", Confidence::Medium).unwrap()
    }

    #[test]
    fn responses_move_status_stays() {
        let source = "from fastapi import FastAPI\nfrom starlette.responses import JSONResponse\nfrom starlette.status import HTTP_200_OK\n\napp = FastAPI()\nr = JSONResponse({})\ncode = HTTP_200_OK\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("from fastapi.responses import JSONResponse"));
        assert!(
            outcome
                .source
                .contains("from starlette.status import HTTP_200_OK"),
            "starlette.status is a documented exclusion"
        );
        assert_eq!(outcome.changes.len(), 1);
    }

    #[test]
    fn aliases_and_name_lists_survive_the_move() {
        let source = "from fastapi import FastAPI\nfrom starlette.responses import JSONResponse as JR, PlainTextResponse\n\napp = FastAPI()\nr = JR({})\np = PlainTextResponse(\"\")\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("from fastapi.responses import JSONResponse as JR, PlainTextResponse"));
    }

    #[test]
    fn middleware_is_excluded() {
        let source = "from fastapi import FastAPI\nfrom starlette.middleware.cors import CORSMiddleware\n\napp = FastAPI()\napp.add_middleware(CORSMiddleware)\n";
        let outcome = run(source);
        assert_eq!(outcome.source, source);
    }

    #[test]
    fn fires_on_files_importing_only_starlette() {
        let source = "from starlette.responses import RedirectResponse\n\nr = RedirectResponse(\"/\")\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("from fastapi.responses import RedirectResponse"));
    }

    #[test]
    fn move_is_idempotent() {
        let source = "from fastapi import FastAPI\nfrom starlette.testclient import TestClient\n\napp = FastAPI()\nclient = TestClient(app)\n";
        let first = run(source);
        assert!(first.source.contains("from fastapi.testclient import TestClient"));
        let second = run(&first.source);
        assert!(second.changes.is_empty());
    }
}
