//! Lossless Python concrete syntax tree for source-to-source migration.
//!
//! The entry point is [`cst::Cst`], an arena tree built over tree-sitter
//! that keeps the original source untouched: rendering an unedited tree
//! returns the input byte-for-byte. Structural changes are queued on an
//! [`edit::EditSet`] and applied in one [`edit::EditSet::commit`], which
//! splices only the edited spans and parse-checks the result.

pub mod cst;
pub mod edit;
pub mod helpers;
pub mod imports;
pub mod usage;

use serde::{Deserialize, Serialize};

/// Error type for the CST layer.
#[derive(thiserror::Error, Debug)]
pub enum CstError {
    /// Source is not valid Python.
    #[error("Parse error in {filename}:{line}:{col}: {message}")]
    Parse {
        /// Name of the file that failed to parse.
        filename: String,
        /// One-based line of the first syntax error.
        line: usize,
        /// Zero-based column of the first syntax error.
        col: usize,
        /// Description of the failure.
        message: String,
    },

    /// An edit referenced a node that no longer exists in the tree.
    #[error("Unknown node id {0:?}")]
    UnknownNode(NodeId),

    /// A committed edit set produced output that does not parse.
    #[error("Edit by rule '{rule}' produced invalid Python: {message}")]
    InvalidEdit {
        /// Identity of the rule whose replacement text broke the parse.
        rule: String,
        /// Parse failure description.
        message: String,
    },

    /// Internal tree-sitter failure (language load, parser state).
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),
}

/// Convenience alias for `Result<T, CstError>`.
pub type Result<T> = std::result::Result<T, CstError>;

/// How certain the engine is that a match or rewrite is correct.
///
/// Ordering is by certainty: `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

/// Identity of a node inside one [`cst::Cst`] arena.
///
/// Valid only for the tree it came from; committing edits produces a new
/// tree with fresh identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Byte and line/column span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    /// Byte offset of the span start.
    pub start_byte: usize,
    /// Byte offset of the span end (exclusive).
    pub end_byte: usize,
    /// Zero-based starting row.
    pub start_row: usize,
    /// Zero-based starting column.
    pub start_col: usize,
    /// Zero-based ending row.
    pub end_row: usize,
    /// Zero-based ending column.
    pub end_col: usize,
}

impl TextRange {
    /// Whether two ranges share at least one byte.
    pub fn overlaps(&self, other: &TextRange) -> bool {
        self.start_byte < other.end_byte && other.start_byte < self.end_byte
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains(&self, other: &TextRange) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }
}

impl From<tree_sitter::Range> for TextRange {
    fn from(r: tree_sitter::Range) -> Self {
        Self {
            start_byte: r.start_byte,
            end_byte: r.end_byte,
            start_row: r.start_point.row,
            start_col: r.start_point.column,
            end_row: r.end_point.row,
            end_col: r.end_point.column,
        }
    }
}
