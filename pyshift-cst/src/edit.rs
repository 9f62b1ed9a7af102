//! Queued structural edits.
//!
//! Edits are pure descriptions against node identities; nothing touches
//! the source until [`EditSet::commit`], which resolves every edit to a
//! byte splice, drops later edits that overlap earlier ones, applies the
//! survivors back-to-front, and parse-checks the result.

use tracing::debug;

use crate::cst::Cst;
use crate::{CstError, NodeId, Result, TextRange};

/// A single structural mutation, described but not yet executed.
#[derive(Debug, Clone)]
pub enum EditOp {
    /// Replace a node's span with new text.
    ReplaceNode { node: NodeId, text: String },
    /// Replace the child occupying a grammar field of a node.
    ReplaceAttribute {
        node: NodeId,
        field: &'static str,
        text: String,
    },
    /// Replace an arbitrary byte range with new text.
    ReplaceRange { range: TextRange, text: String },
    /// Wrap a node's text in a template; `$expr` interpolates the
    /// original text (`f($expr)` turns `"SQL"` into `f("SQL")`).
    WrapExpression { node: NodeId, template: String },
    /// Insert a statement on its own line before the anchor statement,
    /// copying the anchor's indentation.
    InsertBefore { stmt: NodeId, text: String },
    /// Insert a statement on its own line after the anchor statement.
    InsertAfter { stmt: NodeId, text: String },
    /// Delete a node's span.
    DeleteNode { node: NodeId },
    /// Delete the whole line(s) occupied by a statement.
    DeleteStatement { stmt: NodeId },
}

/// An edit plus the identity of the rule that produced it.
#[derive(Debug, Clone)]
pub struct Edit {
    pub op: EditOp,
    pub rule: String,
}

/// An edit that survived overlap resolution, in original-source coordinates.
#[derive(Debug, Clone)]
pub struct AppliedEdit {
    pub rule: String,
    pub range: TextRange,
    pub replacement: String,
}

/// An edit dropped during commit, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedEdit {
    pub rule: String,
    pub reason: String,
}

/// Outcome of [`EditSet::commit`].
#[derive(Debug)]
pub struct CommitResult {
    /// The new source text.
    pub source: String,
    pub applied: Vec<AppliedEdit>,
    pub skipped: Vec<SkippedEdit>,
}

/// An ordered queue of pending edits against one tree.
#[derive(Debug, Default)]
pub struct EditSet {
    edits: Vec<Edit>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an edit. Order of queueing decides conflict priority.
    pub fn push(&mut self, rule: impl Into<String>, op: EditOp) {
        self.edits.push(Edit {
            op,
            rule: rule.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Resolve, splice, and parse-check.
    ///
    /// Edits whose target node is unknown are skipped individually; a
    /// result that fails to parse fails the whole commit with
    /// [`CstError::InvalidEdit`]. Formatting outside the edited spans is
    /// untouched.
    pub fn commit(&self, cst: &Cst) -> Result<CommitResult> {
        let source = cst.render();
        let mut splices = Vec::new();
        let mut skipped = Vec::new();

        for (order, edit) in self.edits.iter().enumerate() {
            match resolve(edit, cst, source) {
                Ok(splice) => splices.push((order, splice)),
                Err(reason) => {
                    debug!(rule = %edit.rule, %reason, "skipping unresolvable edit");
                    skipped.push(SkippedEdit {
                        rule: edit.rule.clone(),
                        reason,
                    });
                }
            }
        }

        // Earlier-queued edits win; later overlapping edits are dropped.
        let mut accepted: Vec<Splice> = Vec::with_capacity(splices.len());
        for (_, splice) in splices {
            let conflict = accepted
                .iter()
                .any(|a| ranges_conflict(&a.range, &splice.range));
            if conflict {
                skipped.push(SkippedEdit {
                    rule: splice.rule.clone(),
                    reason: "overlaps an earlier edit".to_string(),
                });
            } else {
                accepted.push(splice);
            }
        }
        // Apply back-to-front so earlier offsets stay valid. Secondary
        // key puts a zero-width insert before a replacement at the same
        // offset, so the reverse pass applies the replacement first and
        // the inserted text lands ahead of it; the stable sort keeps
        // queue order for same-point insertions.
        accepted.sort_by_key(|s| (s.range.start_byte, s.range.end_byte));

        let mut new_source = source.to_string();
        for splice in accepted.iter().rev() {
            new_source.replace_range(
                splice.range.start_byte..splice.range.end_byte,
                &splice.replacement,
            );
        }

        if let Err(e) = Cst::parse(&new_source, cst.filename()) {
            let rules: Vec<&str> = accepted.iter().map(|s| s.rule.as_str()).collect();
            return Err(CstError::InvalidEdit {
                rule: rules.join(","),
                message: e.to_string(),
            });
        }

        Ok(CommitResult {
            source: new_source,
            applied: accepted
                .into_iter()
                .map(|s| AppliedEdit {
                    rule: s.rule,
                    range: s.range,
                    replacement: s.replacement,
                })
                .collect(),
            skipped,
        })
    }
}

#[derive(Debug)]
struct Splice {
    range: TextRange,
    replacement: String,
    rule: String,
}

/// Zero-width splices at the same offset are insertions and may coexist;
/// anything else sharing bytes conflicts.
fn ranges_conflict(a: &TextRange, b: &TextRange) -> bool {
    if a.start_byte == a.end_byte && b.start_byte == b.end_byte {
        return false;
    }
    a.overlaps(b)
        || (a.start_byte == a.end_byte && b.start_byte < a.start_byte && a.start_byte < b.end_byte)
        || (b.start_byte == b.end_byte && a.start_byte < b.start_byte && b.start_byte < a.end_byte)
}

fn resolve(edit: &Edit, cst: &Cst, source: &str) -> std::result::Result<Splice, String> {
    let splice = match &edit.op {
        EditOp::ReplaceNode { node, text } => Splice {
            range: cst
                .range(*node)
                .ok_or_else(|| format!("unknown node {node:?}"))?,
            replacement: text.clone(),
            rule: edit.rule.clone(),
        },
        EditOp::ReplaceAttribute { node, field, text } => {
            let child = cst
                .child_by_field(*node, field)
                .ok_or_else(|| format!("node {node:?} has no field '{field}'"))?;
            Splice {
                range: cst
                    .range(child)
                    .ok_or_else(|| format!("unknown node {child:?}"))?,
                replacement: text.clone(),
                rule: edit.rule.clone(),
            }
        }
        EditOp::ReplaceRange { range, text } => Splice {
            range: *range,
            replacement: text.clone(),
            rule: edit.rule.clone(),
        },
        EditOp::WrapExpression { node, template } => {
            let range = cst
                .range(*node)
                .ok_or_else(|| format!("unknown node {node:?}"))?;
            let original = &source[range.start_byte..range.end_byte];
            Splice {
                range,
                replacement: template.replace("$expr", original),
                rule: edit.rule.clone(),
            }
        }
        EditOp::InsertBefore { stmt, text } => {
            let range = cst
                .range(*stmt)
                .ok_or_else(|| format!("unknown node {stmt:?}"))?;
            let line_start = line_start(source, range.start_byte);
            let indent = &source[line_start..range.start_byte];
            Splice {
                range: point(line_start, range.start_row),
                replacement: format!("{indent}{text}\n"),
                rule: edit.rule.clone(),
            }
        }
        EditOp::InsertAfter { stmt, text } => {
            let range = cst
                .range(*stmt)
                .ok_or_else(|| format!("unknown node {stmt:?}"))?;
            let line_start = line_start(source, range.start_byte);
            let indent = source[line_start..range.start_byte].to_string();
            let after = line_end(source, range.end_byte);
            Splice {
                range: point(after, range.end_row + 1),
                replacement: format!("{indent}{text}\n"),
                rule: edit.rule.clone(),
            }
        }
        EditOp::DeleteNode { node } => Splice {
            range: cst
                .range(*node)
                .ok_or_else(|| format!("unknown node {node:?}"))?,
            replacement: String::new(),
            rule: edit.rule.clone(),
        },
        EditOp::DeleteStatement { stmt } => {
            let range = cst
                .range(*stmt)
                .ok_or_else(|| format!("unknown node {stmt:?}"))?;
            let start = line_start(source, range.start_byte);
            let end = line_end(source, range.end_byte);
            Splice {
                range: TextRange {
                    start_byte: start,
                    end_byte: end,
                    start_row: range.start_row,
                    start_col: 0,
                    end_row: range.end_row + 1,
                    end_col: 0,
                },
                replacement: String::new(),
                rule: edit.rule.clone(),
            }
        }
    };
    Ok(splice)
}

/// Byte offset of the start of the line containing `byte`.
pub fn line_start(source: &str, byte: usize) -> usize {
    source[..byte].rfind('\n').map_or(0, |i| i + 1)
}

/// Byte offset just past the newline ending the line containing `byte`.
pub fn line_end(source: &str, byte: usize) -> usize {
    source[byte..]
        .find('\n')
        .map_or(source.len(), |i| byte + i + 1)
}

fn point(byte: usize, row: usize) -> TextRange {
    TextRange {
        start_byte: byte,
        end_byte: byte,
        start_row: row,
        start_col: 0,
        end_row: row,
        end_col: 0,
    }
}
