//! SQLAlchemy 1.4 → 2.0.
//!
//! The load-bearing rule is the query-chain rewrite: `session.query(...)`
//! pipelines become `session.execute(select(...))` pipelines, including
//! chained `.filter()` calls, `filter_by` keyword expansion, and the
//! `count()` / `get()` special forms. The other rules cover textual SQL
//! wrapping, the retired `future=` flag, and the declarative import move.

use pyshift_cst::cst::Cst;
use pyshift_cst::edit::{EditOp, EditSet};
use pyshift_cst::helpers::{argument_removal_range, call_function, keyword_argument, positional_arguments};
use pyshift_cst::imports::{collect_imports, ensure_import, ImportKind};
use pyshift_cst::NodeId;

use crate::types::{ChangeKind, Confidence, Diagnostic};

use super::{LibraryTransformer, Rule, RuleCtx, RuleOutput};

pub struct SqlalchemyTransformer;

impl LibraryTransformer for SqlalchemyTransformer {
    fn library(&self) -> &'static str {
        "sqlalchemy"
    }

    fn from_series(&self) -> &'static str {
        "1.4"
    }

    fn to_series(&self) -> &'static str {
        "2.0"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 5] = [
    Rule {
        name: "sqlalchemy-query-chain",
        kind: ChangeKind::FunctionSignature,
        confidence: Confidence::High,
        run: query_chain_rewrite,
    },
    Rule {
        name: "sqlalchemy-create-engine-future",
        kind: ChangeKind::ArgumentRemoved,
        confidence: Confidence::High,
        run: create_engine_future_removal,
    },
    Rule {
        name: "sqlalchemy-declarative-import-move",
        kind: ChangeKind::ImportMove,
        confidence: Confidence::High,
        run: declarative_import_move,
    },
    Rule {
        name: "sqlalchemy-execute-text-wrap",
        kind: ChangeKind::FunctionSignature,
        confidence: Confidence::Medium,
        run: execute_text_wrap,
    },
    Rule {
        name: "sqlalchemy-backref-advisory",
        kind: ChangeKind::BehaviorChange,
        confidence: Confidence::Medium,
        run: backref_advisory,
    },
];

/// Chain members between `query()` and the terminal call.
#[derive(Debug)]
enum ChainStep {
    Where(String),
    FilterBy(String),
    OrderBy(String),
    Limit(String),
    Offset(String),
}

#[derive(Debug)]
struct QueryChain {
    receiver: String,
    entities: String,
    steps: Vec<ChainStep>,
    terminal: String,
    terminal_args: String,
}

/// Argument text of a call without the surrounding parentheses.
fn args_text(cst: &Cst, call: NodeId) -> String {
    let Some(args) = cst.child_by_field(call, "arguments") else {
        return String::new();
    };
    let text = cst.text(args);
    text.strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text)
        .trim()
        .to_string()
}

const TERMINALS: &[&str] = &["first", "all", "one", "one_or_none", "scalar", "count", "get"];

/// Decompose a `recv.query(E)....terminal()` pipeline, outermost call in.
/// Returns `None` if any chain member is not one the rewrite understands.
fn decompose_chain(cst: &Cst, outer_call: NodeId) -> Option<QueryChain> {
    let func = call_function(cst, outer_call)?;
    if cst.kind(func) != "attribute" {
        return None;
    }
    let terminal = cst.text(cst.child_by_field(func, "attribute")?).to_string();
    if !TERMINALS.contains(&terminal.as_str()) {
        return None;
    }
    let terminal_args = args_text(cst, outer_call);

    let mut steps = Vec::new();
    let mut current = cst.child_by_field(func, "value")?;
    loop {
        if cst.kind(current) != "call" {
            return None;
        }
        let func = call_function(cst, current)?;
        if cst.kind(func) != "attribute" {
            return None;
        }
        let name = cst.text(cst.child_by_field(func, "attribute")?);
        let args = args_text(cst, current);

        match name {
            "query" => {
                if args.is_empty() || args.contains(',') {
                    // Multi-entity queries do not map onto .scalars().
                    return None;
                }
                let receiver = cst.text(cst.child_by_field(func, "value")?).to_string();
                steps.reverse(); // collected outer-to-inner
                return Some(QueryChain {
                    receiver,
                    entities: args,
                    steps,
                    terminal,
                    terminal_args,
                });
            }
            "filter" | "where" => steps.push(ChainStep::Where(args)),
            "filter_by" => steps.push(ChainStep::FilterBy(args)),
            "order_by" => steps.push(ChainStep::OrderBy(args)),
            "limit" => steps.push(ChainStep::Limit(args)),
            "offset" => steps.push(ChainStep::Offset(args)),
            _ => return None,
        }
        current = cst.child_by_field(func, "value")?;
    }
}

/// Render the 2.0 replacement for a decomposed chain.
fn render_chain(chain: &QueryChain) -> String {
    let entity = &chain.entities;

    // `.get(pk)` has a dedicated 2.0 form.
    if chain.terminal == "get" {
        return format!(
            "{}.get({entity}, {})",
            chain.receiver, chain.terminal_args
        );
    }

    let mut select = if chain.terminal == "count" {
        format!("select(func.count()).select_from({entity})")
    } else {
        format!("select({entity})")
    };

    for step in &chain.steps {
        match step {
            ChainStep::Where(clause) => {
                select.push_str(&format!(".where({clause})"));
            }
            ChainStep::FilterBy(kwargs) => {
                // name="x", age=3  ->  .where(E.name == "x", E.age == 3)
                let clauses: Vec<String> = kwargs
                    .split(',')
                    .filter_map(|pair| {
                        let (key, value) = pair.split_once('=')?;
                        Some(format!("{entity}.{} == {}", key.trim(), value.trim()))
                    })
                    .collect();
                select.push_str(&format!(".where({})", clauses.join(", ")));
            }
            ChainStep::OrderBy(args) => select.push_str(&format!(".order_by({args})")),
            ChainStep::Limit(args) => select.push_str(&format!(".limit({args})")),
            ChainStep::Offset(args) => select.push_str(&format!(".offset({args})")),
        }
    }

    match chain.terminal.as_str() {
        "count" | "scalar" => format!("{}.execute({select}).scalar()", chain.receiver),
        terminal => format!(
            "{}.execute({select}).scalars().{terminal}()",
            chain.receiver
        ),
    }
}

fn query_chain_rewrite(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut needs_select = false;
    let mut needs_func = false;

    for call in ctx.cst.nodes_of_kind("call") {
        // Only outermost chain calls: skip if the parent attribute chains on.
        let chained_on = ctx
            .cst
            .parent(call)
            .is_some_and(|p| ctx.cst.kind(p) == "attribute");
        if chained_on {
            continue;
        }
        let Some(chain) = decompose_chain(ctx.cst, call) else {
            continue;
        };
        let replacement = render_chain(&chain);
        needs_select |= chain.terminal != "get";
        needs_func |= chain.terminal == "count";

        output.change(
            ctx.cst,
            call,
            format!(
                ".query(...).{}() rewritten to the 2.0 execute(select(...)) form",
                chain.terminal
            ),
        );
        edits.push(
            "sqlalchemy-query-chain",
            EditOp::ReplaceNode {
                node: call,
                text: replacement,
            },
        );
    }

    let mut helper_imports = Vec::new();
    if needs_select {
        helper_imports.push("select");
    }
    if needs_func {
        helper_imports.push("func");
    }
    if !helper_imports.is_empty() {
        ensure_import(ctx.cst, edits, "sqlalchemy", &helper_imports);
    }
    output
}

fn create_engine_future_removal(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();

    for usage in &ctx.usage.usages {
        if usage.qualified != "sqlalchemy.create_engine"
            || usage.role != pyshift_cst::usage::UsageRole::Call
        {
            continue;
        }
        let Some(call) = ctx
            .cst
            .parent(usage.node)
            .filter(|p| ctx.cst.kind(*p) == "call")
        else {
            continue;
        };
        let Some(kwarg) = keyword_argument(ctx.cst, call, "future") else {
            continue;
        };
        let Some(range) = argument_removal_range(ctx.cst, call, kwarg) else {
            continue;
        };
        edits.push(
            "sqlalchemy-create-engine-future",
            EditOp::ReplaceRange {
                range,
                text: String::new(),
            },
        );
        output.change(
            ctx.cst,
            call,
            "future=True removed from create_engine (2.0 behavior is the default)",
        );
    }
    output
}

fn declarative_import_move(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let records = collect_imports(ctx.cst);

    for record in &records {
        if record.module != "sqlalchemy.ext.declarative"
            || record.name.as_deref() != Some("declarative_base")
            || !matches!(record.kind, ImportKind::From | ImportKind::FromAs)
        {
            continue;
        }
        let siblings: Vec<&pyshift_cst::imports::ImportRecord> = records
            .iter()
            .filter(|r| r.statement == record.statement && r.item != record.item)
            .collect();
        let moved_item = ctx.cst.text(record.item).to_string();

        if siblings.is_empty() {
            edits.push(
                "sqlalchemy-declarative-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!("from sqlalchemy.orm import {moved_item}"),
                },
            );
        } else {
            let kept: Vec<String> = siblings
                .iter()
                .map(|r| ctx.cst.text(r.item).to_string())
                .collect();
            edits.push(
                "sqlalchemy-declarative-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!(
                        "from sqlalchemy.ext.declarative import {}",
                        kept.join(", ")
                    ),
                },
            );
            edits.push(
                "sqlalchemy-declarative-import-move",
                EditOp::InsertAfter {
                    stmt: record.statement,
                    text: format!("from sqlalchemy.orm import {moved_item}"),
                },
            );
        }
        output.change(
            ctx.cst,
            record.statement,
            "declarative_base now lives in sqlalchemy.orm",
        );
        output.diagnostics.push(Diagnostic::info(
            "consider the 2.0 class style: class Base(DeclarativeBase): ...",
        ));
    }
    output
}

fn execute_text_wrap(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut wrapped = false;

    for call in ctx.cst.nodes_of_kind("call") {
        let Some(func) = call_function(ctx.cst, call) else {
            continue;
        };
        if ctx.cst.kind(func) != "attribute" {
            continue;
        }
        let Some(attr) = ctx.cst.child_by_field(func, "attribute") else {
            continue;
        };
        if ctx.cst.text(attr) != "execute" {
            continue;
        }
        let positional = positional_arguments(ctx.cst, call);
        let Some(&first) = positional.first() else {
            continue;
        };
        if ctx.cst.kind(first) != "string" {
            continue;
        }
        edits.push(
            "sqlalchemy-execute-text-wrap",
            EditOp::WrapExpression {
                node: first,
                template: "text($expr)".to_string(),
            },
        );
        wrapped = true;
        output.change(
            ctx.cst,
            call,
            "textual SQL wrapped in text() (raw strings are rejected in 2.0)",
        );
    }

    if wrapped {
        ensure_import(ctx.cst, edits, "sqlalchemy", &["text"]);
    }
    output
}

fn backref_advisory(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let _ = edits; // advisory only
    let mut output = RuleOutput::default();

    for record in collect_imports(ctx.cst) {
        if record.module == "sqlalchemy.orm" && record.name.as_deref() == Some("backref") {
            let line = record.range.start_row + 1;
            output.diagnostics.push(Diagnostic::warning(format!(
                "line {line}: backref is legacy in 2.0; prefer back_populates on both sides"
            )));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::apply_transformer;

    fn run(source: &str) -> crate::transform::FileTransformOutcome {
        apply_transformer(&SqlalchemyTransformer, source, "m.py", Confidence::Medium).unwrap()
    }

    #[test]
    fn query_filter_first_becomes_execute_select() {
        let source = "from sqlalchemy.orm import Session\n\ndef lookup(session, U):\n    return session.query(U).filter(U.id == 1).first()\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("session.execute(select(U).where(U.id == 1)).scalars().first()"));
        assert!(outcome.source.contains("from sqlalchemy import select"));
    }

    #[test]
    fn chained_filters_become_chained_wheres() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U):\n    return session.query(U).filter(U.a == 1).filter(U.b == 2).all()\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("select(U).where(U.a == 1).where(U.b == 2)"));
        assert!(outcome.source.contains(".scalars().all()"));
    }

    #[test]
    fn count_uses_func_count() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U):\n    return session.query(U).count()\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("session.execute(select(func.count()).select_from(U)).scalar()"));
        assert!(outcome.source.contains("from sqlalchemy import select, func"));
    }

    #[test]
    fn get_uses_session_get() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U):\n    return session.query(U).get(7)\n";
        let outcome = run(source);
        assert!(outcome.source.contains("session.get(U, 7)"));
    }

    #[test]
    fn filter_by_expands_keywords() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U):\n    return session.query(U).filter_by(name=\"x\").one()\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("select(U).where(U.name == \"x\")"));
    }

    #[test]
    fn multi_entity_query_is_left_alone() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U, V):\n    return session.query(U, V).all()\n";
        let outcome = run(source);
        assert!(outcome.source.contains("session.query(U, V).all()"));
    }

    #[test]
    fn execute_string_gets_text_wrapper() {
        let source = "import sqlalchemy\n\ndef f(conn):\n    return conn.execute(\"SELECT 1\")\n";
        let outcome = run(source);
        assert!(outcome.source.contains("conn.execute(text(\"SELECT 1\"))"));
        assert!(outcome.source.contains("from sqlalchemy import text"));
    }

    #[test]
    fn execute_with_text_already_is_untouched() {
        let source = "from sqlalchemy import text\n\ndef f(conn):\n    return conn.execute(text(\"SELECT 1\"))\n";
        let first = run(source);
        assert_eq!(first.source, source);
        assert!(first.changes.is_empty());
    }

    #[test]
    fn future_flag_removed_cleanly() {
        let source = "from sqlalchemy import create_engine\n\nengine = create_engine(\"sqlite:///x\", future=True)\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("engine = create_engine(\"sqlite:///x\")\n"));
    }

    #[test]
    fn declarative_base_import_moves() {
        let source = "from sqlalchemy.ext.declarative import declarative_base\n\nBase = declarative_base()\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("from sqlalchemy.orm import declarative_base"));
        assert!(!outcome.source.contains("ext.declarative"));
    }

    #[test]
    fn query_chain_is_idempotent() {
        let source = "from sqlalchemy.orm import Session\n\ndef f(session, U):\n    return session.query(U).filter(U.id == 1).first()\n";
        let first = run(source);
        let second = run(&first.source);
        assert!(second.changes.is_empty());
        assert_eq!(second.source, first.source);
    }
}
