//! Unified diff rendering for patch display and persistence.

/// Render a unified diff between two texts, with three lines of context.
pub fn unified_diff(original: &str, modified: &str, path: &str) -> String {
    if original == modified {
        return String::new();
    }
    let old_lines: Vec<&str> = original.lines().collect();
    let new_lines: Vec<&str> = modified.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);

    let mut out = String::new();
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));

    for hunk in hunks(&ops, 3) {
        let old_start = hunk.first().map_or(0, |op| op.old_index);
        let new_start = hunk.first().map_or(0, |op| op.new_index);
        let old_count = hunk.iter().filter(|op| op.tag != Tag::Insert).count();
        let new_count = hunk.iter().filter(|op| op.tag != Tag::Delete).count();
        out.push_str(&format!(
            "@@ -{},{old_count} +{},{new_count} @@\n",
            old_start + 1,
            new_start + 1
        ));
        for op in hunk {
            let (sigil, line) = match op.tag {
                Tag::Equal => (' ', old_lines[op.old_index]),
                Tag::Delete => ('-', old_lines[op.old_index]),
                Tag::Insert => ('+', new_lines[op.new_index]),
            };
            out.push(sigil);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    tag: Tag,
    old_index: usize,
    new_index: usize,
}

/// Line-level edit script via longest-common-subsequence.
fn diff_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    // DP table is fine at source-file scale; bail to whole-file
    // replacement for pathological inputs.
    if old.len() * new.len() > 25_000_000 {
        let mut ops = Vec::new();
        for i in 0..old.len() {
            ops.push(Op {
                tag: Tag::Delete,
                old_index: i,
                new_index: 0,
            });
        }
        for j in 0..new.len() {
            ops.push(Op {
                tag: Tag::Insert,
                old_index: old.len(),
                new_index: j,
            });
        }
        return ops;
    }

    let rows = old.len() + 1;
    let cols = new.len() + 1;
    let mut lcs = vec![0u32; rows * cols];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i * cols + j] = if old[i] == new[j] {
                lcs[(i + 1) * cols + j + 1] + 1
            } else {
                lcs[(i + 1) * cols + j].max(lcs[i * cols + j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            ops.push(Op {
                tag: Tag::Equal,
                old_index: i,
                new_index: j,
            });
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * cols + j] >= lcs[i * cols + j + 1] {
            ops.push(Op {
                tag: Tag::Delete,
                old_index: i,
                new_index: j,
            });
            i += 1;
        } else {
            ops.push(Op {
                tag: Tag::Insert,
                old_index: i,
                new_index: j,
            });
            j += 1;
        }
    }
    while i < old.len() {
        ops.push(Op {
            tag: Tag::Delete,
            old_index: i,
            new_index: j,
        });
        i += 1;
    }
    while j < new.len() {
        ops.push(Op {
            tag: Tag::Insert,
            old_index: i,
            new_index: j,
        });
        j += 1;
    }
    ops
}

/// Group an edit script into context-trimmed hunks.
fn hunks(ops: &[Op], context: usize) -> Vec<Vec<Op>> {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.tag != Tag::Equal)
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut start = changed[0].saturating_sub(context);
    let mut end = (changed[0] + context + 1).min(ops.len());

    for &index in &changed[1..] {
        let window_start = index.saturating_sub(context);
        if window_start <= end {
            end = (index + context + 1).min(ops.len());
        } else {
            result.push(ops[start..end].to_vec());
            start = window_start;
            end = (index + context + 1).min(ops.len());
        }
    }
    result.push(ops[start..end].to_vec());
    result
}
