//! Arena-backed concrete syntax tree.
//!
//! The tree-sitter tree is flattened into a vector of nodes at parse time;
//! a [`NodeId`] is an index into that vector. The original source is kept
//! verbatim, so an unedited tree renders back to its exact input.

use crate::{CstError, NodeId, Result, TextRange};

/// One node of the arena tree.
#[derive(Debug, Clone)]
pub struct CstNode {
    /// Grammar kind, e.g. `"call"`, `"import_from_statement"`.
    pub kind: &'static str,
    /// Source span covered by this node.
    pub range: TextRange,
    /// Parent node, `None` for the module root.
    pub parent: Option<NodeId>,
    /// Children in source order (named and anonymous).
    pub children: Vec<NodeId>,
    /// Field name relative to the parent, if the grammar assigns one.
    pub field: Option<&'static str>,
    /// Whether this is a named grammar node (vs punctuation).
    pub named: bool,
}

/// A parsed Python source file.
///
/// Owns the source text and the node arena. Node ids are stable for the
/// lifetime of this value and become invalid once an edit commit produces
/// a successor tree.
pub struct Cst {
    filename: String,
    source: String,
    nodes: Vec<CstNode>,
}

impl std::fmt::Debug for Cst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cst")
            .field("filename", &self.filename)
            .field("bytes", &self.source.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Cst {
    /// Parse Python source into an arena tree.
    ///
    /// Fails with [`CstError::Parse`] if the source contains any syntax
    /// error; there is no error recovery.
    pub fn parse(source: &str, filename: &str) -> Result<Self> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| CstError::TreeSitter(e.to_string()))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| CstError::TreeSitter(format!("parser returned no tree for {filename}")))?;

        if tree.root_node().has_error() {
            let (line, col, message) = first_error(tree.root_node(), source);
            return Err(CstError::Parse {
                filename: filename.to_string(),
                line,
                col,
                message,
            });
        }

        let mut nodes = Vec::new();
        flatten(tree.root_node(), None, None, &mut nodes);

        Ok(Self {
            filename: filename.to_string(),
            source: source.to_string(),
            nodes,
        })
    }

    /// File name this tree was parsed from.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Render the tree. Without edits this is the original source,
    /// byte-for-byte.
    pub fn render(&self) -> &str {
        &self.source
    }

    /// The module root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> Option<&CstNode> {
        self.nodes.get(id.0 as usize)
    }

    /// Grammar kind of a node, or `""` for an unknown id.
    pub fn kind(&self, id: NodeId) -> &'static str {
        self.get(id).map_or("", |n| n.kind)
    }

    /// Source text covered by a node.
    pub fn text(&self, id: NodeId) -> &str {
        self.get(id)
            .map_or("", |n| &self.source[n.range.start_byte..n.range.end_byte])
    }

    /// Source span of a node.
    pub fn range(&self, id: NodeId) -> Option<TextRange> {
        self.get(id).map(|n| n.range)
    }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// All children of a node, in source order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Named children only (skips punctuation and keywords).
    pub fn named_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.get(*c).is_some_and(|n| n.named))
    }

    /// First child occupying a grammar field.
    pub fn child_by_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.get(*c).is_some_and(|n| n.field == Some(field)))
    }

    /// First child of a given kind.
    pub fn child_of_kind(&self, id: NodeId, kind: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.kind(*c) == kind)
    }

    /// Pre-order traversal of the whole tree.
    pub fn preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// All nodes of one grammar kind, in source order.
    pub fn nodes_of_kind(&self, kind: &str) -> Vec<NodeId> {
        self.preorder()
            .filter(|id| self.kind(*id) == kind)
            .collect()
    }

    /// Nearest enclosing statement, including `id` itself.
    pub fn statement_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if is_statement_kind(self.kind(node)) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Whether `ancestor` lies on the parent chain of `id` (or equals it).
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty (never true for a parsed tree).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Whether a grammar kind is a statement for edit-scoping purposes.
pub fn is_statement_kind(kind: &str) -> bool {
    kind.ends_with("_statement")
        || matches!(
            kind,
            "function_definition" | "class_definition" | "decorated_definition"
        )
}

fn flatten(
    node: tree_sitter::Node<'_>,
    parent: Option<NodeId>,
    field: Option<&'static str>,
    nodes: &mut Vec<CstNode>,
) -> NodeId {
    let id = NodeId(nodes.len() as u32);
    nodes.push(CstNode {
        kind: node.kind(),
        range: node.range().into(),
        parent,
        children: Vec::new(),
        field,
        named: node.is_named(),
    });

    let mut cursor = node.walk();
    let mut children = Vec::with_capacity(node.child_count());
    if cursor.goto_first_child() {
        loop {
            let child_field = cursor.field_name();
            let child_id = flatten(cursor.node(), Some(id), child_field, nodes);
            children.push(child_id);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    nodes[id.0 as usize].children = children;
    id
}

/// Locate the first ERROR or MISSING node for diagnostics.
fn first_error(root: tree_sitter::Node<'_>, source: &str) -> (usize, usize, String) {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let point = node.start_position();
            let excerpt: String = source[node.byte_range()].chars().take(40).collect();
            let message = if node.is_missing() {
                format!("missing {}", node.kind())
            } else if excerpt.is_empty() {
                "syntax error".to_string()
            } else {
                format!("syntax error near '{excerpt}'")
            };
            return (point.row + 1, point.column, message);
        }
        for child in node.children(&mut cursor).collect::<Vec<_>>() {
            stack.push(child);
        }
    }
    (1, 0, "syntax error".to_string())
}
