//! Per-file usage index for one target library.
//!
//! Resolution follows Python's import binding rules without type
//! inference: local names are resolved through the file's imports and
//! aliases, attribute chains extend the resolved symbol, and two
//! low-confidence paths are flagged rather than guessed at — wildcard
//! imports, and names rebound by assignment after the import.

use std::collections::{HashMap, HashSet};

use crate::cst::Cst;
use crate::helpers::{base_classes, call_function, dotted_text};
use crate::imports::{collect_imports, ImportKind, ImportRecord};
use crate::{Confidence, NodeId};

/// Syntactic role of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageRole {
    /// Direct call of the resolved symbol.
    Call,
    /// Used as a decorator.
    Decorator,
    /// Attribute access that is not itself called.
    AttributeChain,
    /// Appears in a class definition's base list.
    BaseClass,
    /// Default value of a parameter.
    DefaultValue,
    /// Type annotation position.
    Annotation,
    /// Left-hand side of an assignment.
    AssignmentTarget,
    /// Any other expression position.
    Reference,
}

/// One resolved reference to a library symbol.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// The whole referencing expression (identifier or attribute chain).
    pub node: NodeId,
    /// The local name at the root of the reference.
    pub local: String,
    /// Fully qualified symbol after import/alias resolution.
    pub qualified: String,
    pub role: UsageRole,
    pub confidence: Confidence,
}

/// Everything the transformers need to know about one file's use of one
/// library.
#[derive(Debug)]
pub struct UsageIndex {
    pub library: String,
    /// All imports in the file (library-bound and otherwise).
    pub imports: Vec<ImportRecord>,
    /// References to the target library.
    pub usages: Vec<UsageRecord>,
    /// The file has `from <library...> import *`.
    pub wildcard: bool,
    /// local name -> (qualified symbol, rebind position if any)
    bindings: HashMap<String, Binding>,
    /// class name defined in this file -> base expressions as written
    class_bases: HashMap<String, Vec<String>>,
    /// variable -> class name it was constructed from
    instance_of: HashMap<String, String>,
}

#[derive(Debug)]
struct Binding {
    qualified: String,
    rebound_at: Option<usize>,
}

impl UsageIndex {
    /// Build the index for one parsed file.
    pub fn build(cst: &Cst, library: &str) -> Self {
        let imports = collect_imports(cst);
        let mut bindings = HashMap::new();
        let mut wildcard = false;

        for record in &imports {
            if !record.binds_library(library) {
                continue;
            }
            if record.kind == ImportKind::Wildcard {
                wildcard = true;
                continue;
            }
            bindings.insert(
                record.local.clone(),
                Binding {
                    qualified: record.qualified(),
                    rebound_at: None,
                },
            );
        }

        // Rebinding: a plain assignment to an imported name shadows the
        // import. Policy: keep matching later uses, at low confidence.
        for assign in cst.nodes_of_kind("assignment") {
            let Some(left) = cst.child_by_field(assign, "left") else {
                continue;
            };
            if cst.kind(left) != "identifier" {
                continue;
            }
            let name = cst.text(left);
            if let Some(binding) = bindings.get_mut(name) {
                let pos = cst.range(assign).map_or(0, |r| r.start_byte);
                if binding.rebound_at.map_or(true, |prev| pos < prev) {
                    binding.rebound_at = Some(pos);
                }
            }
        }

        let class_bases = collect_class_bases(cst);
        let instance_of = collect_instances(cst);

        let mut index = Self {
            library: library.to_string(),
            imports,
            usages: Vec::new(),
            wildcard,
            bindings,
            class_bases,
            instance_of,
        };
        index.collect_usages(cst);
        index
    }

    /// Whether the file references the library at all.
    pub fn is_active(&self) -> bool {
        self.wildcard || !self.bindings.is_empty() || self.imports.iter().any(|r| r.binds_library(&self.library))
    }

    /// Qualified symbol a local name resolves to, if library-bound.
    pub fn resolve_local(&self, local: &str) -> Option<&str> {
        self.bindings.get(local).map(|b| b.qualified.as_str())
    }

    /// Local name bound to a qualified symbol (reverse lookup), if the
    /// symbol is imported.
    pub fn local_for(&self, qualified: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, b)| b.qualified == qualified)
            .map(|(local, _)| local.as_str())
    }

    /// Class names defined in this file that derive from the given
    /// qualified base (resolved through imports, e.g.
    /// `pydantic.BaseModel`).
    pub fn classes_derived_from(&self, qualified_base: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        for (class, bases) in &self.class_bases {
            for base in bases {
                let root = base.split('.').next().unwrap_or(base);
                let resolved = match self.bindings.get(root) {
                    Some(binding) => {
                        let rest = &base[root.len()..];
                        format!("{}{rest}", binding.qualified)
                    }
                    None if self.wildcard => base.clone(),
                    None => continue,
                };
                if resolved == qualified_base
                    || (self.wildcard && base.split('.').next_back() == qualified_base.split('.').next_back())
                {
                    result.insert(class.clone());
                }
            }
        }
        result
    }

    /// Variables assigned from a constructor call of one of `classes`.
    pub fn instances_of(&self, classes: &HashSet<String>) -> HashSet<String> {
        self.instance_of
            .iter()
            .filter(|(_, class)| classes.contains(*class))
            .map(|(var, _)| var.clone())
            .collect()
    }

    /// Whether a local name was rebound by assignment after import.
    pub fn rebound(&self, local: &str) -> bool {
        self.bindings
            .get(local)
            .is_some_and(|b| b.rebound_at.is_some())
    }

    fn collect_usages(&mut self, cst: &Cst) {
        let import_statements: HashSet<NodeId> =
            self.imports.iter().map(|r| r.statement).collect();

        for node in cst.preorder() {
            if cst.kind(node) != "identifier" {
                continue;
            }
            if import_statements
                .iter()
                .any(|stmt| cst.is_within(node, *stmt))
            {
                continue;
            }
            // Attribute names and keyword names are not free references.
            if let Some(parent) = cst.parent(node) {
                let field = cst.get(node).and_then(|n| n.field);
                if cst.kind(parent) == "attribute" && field == Some("attribute") {
                    continue;
                }
                if cst.kind(parent) == "keyword_argument" && field == Some("name") {
                    continue;
                }
                if matches!(
                    cst.kind(parent),
                    "function_definition" | "class_definition" | "parameters"
                ) && field == Some("name")
                {
                    continue;
                }
            }

            let name = cst.text(node).to_string();
            let (qualified_root, mut confidence) = match self.bindings.get(&name) {
                Some(binding) => {
                    let position = cst.range(node).map_or(0, |r| r.start_byte);
                    let confidence = match binding.rebound_at {
                        Some(rebound) if position > rebound => Confidence::Low,
                        _ => Confidence::High,
                    };
                    (binding.qualified.clone(), confidence)
                }
                None if self.wildcard => {
                    // Rule 4: under a wildcard import any free identifier
                    // is a possible library reference.
                    (format!("{}.{name}", self.library), Confidence::Low)
                }
                None => continue,
            };

            // Extend through the attribute chain this identifier roots.
            let (top, suffix) = attribute_chain(cst, node);
            let qualified = if suffix.is_empty() {
                qualified_root
            } else {
                format!("{qualified_root}.{suffix}")
            };

            let role = role_of(cst, top);
            if role == UsageRole::AssignmentTarget {
                confidence = Confidence::Low;
            }

            self.usages.push(UsageRecord {
                node: top,
                local: name,
                qualified,
                role,
                confidence,
            });
        }
    }
}

/// Climb the attribute chain rooted at `id`, returning the outermost
/// attribute node and the dotted suffix after the root identifier.
fn attribute_chain(cst: &Cst, id: NodeId) -> (NodeId, String) {
    let mut top = id;
    let mut parts = Vec::new();
    while let Some(parent) = cst.parent(top) {
        if cst.kind(parent) != "attribute" {
            break;
        }
        let in_value = cst.get(top).and_then(|n| n.field) == Some("value");
        if !in_value {
            break;
        }
        if let Some(attr) = cst.child_by_field(parent, "attribute") {
            parts.push(cst.text(attr).to_string());
        }
        top = parent;
    }
    (top, parts.join("."))
}

fn role_of(cst: &Cst, node: NodeId) -> UsageRole {
    let Some(parent) = cst.parent(node) else {
        return UsageRole::Reference;
    };
    let field = cst.get(node).and_then(|n| n.field);

    match cst.kind(parent) {
        "call" if field == Some("function") => {
            // A call inside a decorator is a decorator usage.
            if within_decorator(cst, parent) {
                UsageRole::Decorator
            } else {
                UsageRole::Call
            }
        }
        "decorator" => UsageRole::Decorator,
        "argument_list" => {
            let grandparent = cst.parent(parent);
            if grandparent.is_some_and(|g| cst.kind(g) == "class_definition") {
                UsageRole::BaseClass
            } else {
                UsageRole::Reference
            }
        }
        "default_parameter" if field == Some("value") => UsageRole::DefaultValue,
        "typed_parameter" | "typed_default_parameter" if field == Some("type") => {
            UsageRole::Annotation
        }
        "type" => UsageRole::Annotation,
        "assignment" if field == Some("left") => UsageRole::AssignmentTarget,
        "attribute" => UsageRole::AttributeChain,
        _ => {
            if within_decorator(cst, node) {
                UsageRole::Decorator
            } else {
                UsageRole::Reference
            }
        }
    }
}

fn within_decorator(cst: &Cst, node: NodeId) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if cst.kind(n) == "decorator" {
            return true;
        }
        current = cst.parent(n);
    }
    false
}

fn collect_class_bases(cst: &Cst) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    for class_def in cst.nodes_of_kind("class_definition") {
        let Some(name) = cst.child_by_field(class_def, "name") else {
            continue;
        };
        let bases: Vec<String> = base_classes(cst, class_def)
            .into_iter()
            .filter_map(|b| dotted_text(cst, b))
            .collect();
        map.insert(cst.text(name).to_string(), bases);
    }
    map
}

/// Track `var = ClassName(...)` so matchers can recognise method calls
/// on instances without type inference.
fn collect_instances(cst: &Cst) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for assign in cst.nodes_of_kind("assignment") {
        let Some(left) = cst.child_by_field(assign, "left") else {
            continue;
        };
        let Some(right) = cst.child_by_field(assign, "right") else {
            continue;
        };
        if cst.kind(left) != "identifier" || cst.kind(right) != "call" {
            continue;
        }
        let Some(func) = call_function(cst, right) else {
            continue;
        };
        if cst.kind(func) == "identifier" {
            map.insert(cst.text(left).to_string(), cst.text(func).to_string());
        }
    }
    map
}
