//! Import records and import bookkeeping.
//!
//! Extraction follows the binding rules of Python imports: `import x`
//! binds the first path component, `import x as y` binds the alias,
//! `from x import a as b` binds `b` to symbol `x.a`. Bookkeeping keeps
//! rewritten files hygienic: helper imports are added once, and imports
//! bound to the migrated library are dropped when no reference remains.

use crate::cst::Cst;
use crate::edit::{EditOp, EditSet};
use crate::{NodeId, Result, TextRange};

/// Syntactic flavour of one imported binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import x`
    Module,
    /// `import x as y`
    ModuleAs,
    /// `from x import a`
    From,
    /// `from x import a as b`
    FromAs,
    /// `from x import *`
    Wildcard,
    /// `from . import a` / `from .mod import a`
    Relative,
}

/// One imported binding. Unique per (file, item position).
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub kind: ImportKind,
    /// Full module path as written (keeps leading dots for relative).
    pub module: String,
    /// Imported symbol for from-imports.
    pub name: Option<String>,
    /// Alias, if one was given.
    pub alias: Option<String>,
    /// The local name this import binds (`*` for wildcard).
    pub local: String,
    /// The whole import statement.
    pub statement: NodeId,
    /// The specific name or aliased item inside the statement.
    pub item: NodeId,
    pub range: TextRange,
}

impl ImportRecord {
    /// Whether this import binds names from `library` (the library itself
    /// or any of its submodules).
    pub fn binds_library(&self, library: &str) -> bool {
        self.module == library || self.module.starts_with(&format!("{library}."))
    }

    /// Fully qualified symbol this record binds the local name to.
    pub fn qualified(&self) -> String {
        match self.kind {
            ImportKind::Module | ImportKind::ModuleAs => self.module.clone(),
            _ => match &self.name {
                Some(name) => format!("{}.{name}", self.module),
                None => self.module.clone(),
            },
        }
    }
}

/// Extract every import binding in the file, in source order.
pub fn collect_imports(cst: &Cst) -> Vec<ImportRecord> {
    let mut records = Vec::new();

    for stmt in cst.preorder() {
        match cst.kind(stmt) {
            "import_statement" => {
                for item in cst.named_children(stmt).collect::<Vec<_>>() {
                    match cst.kind(item) {
                        "dotted_name" => {
                            let module = cst.text(item).to_string();
                            // `import os.path` binds "os".
                            let local = module.split('.').next().unwrap_or(&module).to_string();
                            records.push(ImportRecord {
                                kind: ImportKind::Module,
                                module,
                                name: None,
                                alias: None,
                                local,
                                statement: stmt,
                                item,
                                range: cst.range(item).unwrap_or_default_range(),
                            });
                        }
                        "aliased_import" => {
                            let module = cst
                                .child_by_field(item, "name")
                                .map(|n| cst.text(n).to_string())
                                .unwrap_or_default();
                            let alias = cst
                                .child_by_field(item, "alias")
                                .map(|n| cst.text(n).to_string());
                            let local = alias.clone().unwrap_or_else(|| module.clone());
                            records.push(ImportRecord {
                                kind: ImportKind::ModuleAs,
                                module,
                                name: None,
                                alias,
                                local,
                                statement: stmt,
                                item,
                                range: cst.range(item).unwrap_or_default_range(),
                            });
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" | "future_import_statement" => {
                let module_node = cst.child_by_field(stmt, "module_name");
                let module = module_node.map(|n| cst.text(n).to_string()).unwrap_or_default();
                let relative = module.starts_with('.');

                for item in cst.named_children(stmt).collect::<Vec<_>>() {
                    if Some(item) == module_node {
                        continue;
                    }
                    match cst.kind(item) {
                        "dotted_name" => {
                            let name = cst.text(item).to_string();
                            records.push(ImportRecord {
                                kind: if relative {
                                    ImportKind::Relative
                                } else {
                                    ImportKind::From
                                },
                                module: module.clone(),
                                name: Some(name.clone()),
                                alias: None,
                                local: name,
                                statement: stmt,
                                item,
                                range: cst.range(item).unwrap_or_default_range(),
                            });
                        }
                        "aliased_import" => {
                            let name = cst
                                .child_by_field(item, "name")
                                .map(|n| cst.text(n).to_string())
                                .unwrap_or_default();
                            let alias = cst
                                .child_by_field(item, "alias")
                                .map(|n| cst.text(n).to_string());
                            let local = alias.clone().unwrap_or_else(|| name.clone());
                            records.push(ImportRecord {
                                kind: if relative {
                                    ImportKind::Relative
                                } else {
                                    ImportKind::FromAs
                                },
                                module: module.clone(),
                                name: Some(name),
                                alias,
                                local,
                                statement: stmt,
                                item,
                                range: cst.range(item).unwrap_or_default_range(),
                            });
                        }
                        "wildcard_import" => {
                            records.push(ImportRecord {
                                kind: ImportKind::Wildcard,
                                module: module.clone(),
                                name: None,
                                alias: None,
                                local: "*".to_string(),
                                statement: stmt,
                                item,
                                range: cst.range(item).unwrap_or_default_range(),
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    records
}

/// Queue an edit ensuring `from module import names...` exists.
///
/// An existing from-import of the same module whose symbol set already
/// covers `names` (directly or through an alias) satisfies the request;
/// otherwise the missing names are appended to that statement. With no
/// existing statement, a new import is inserted after the last top-level
/// import (or at the top of the file).
pub fn ensure_import(cst: &Cst, edits: &mut EditSet, module: &str, names: &[&str]) {
    let records = collect_imports(cst);
    let existing: Vec<&ImportRecord> = records
        .iter()
        .filter(|r| {
            r.module == module && matches!(r.kind, ImportKind::From | ImportKind::FromAs)
        })
        .collect();

    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|wanted| !existing.iter().any(|r| r.name.as_deref() == Some(*wanted)))
        .collect();
    if missing.is_empty() {
        return;
    }

    if let Some(first) = existing.first() {
        // Extend the existing statement, preserving each item as written.
        let statement = first.statement;
        let mut items: Vec<String> = existing
            .iter()
            .filter(|r| r.statement == statement)
            .map(|r| cst.text(r.item).to_string())
            .collect();
        items.extend(missing.iter().map(|s| (*s).to_string()));
        edits.push(
            "ensure-import",
            EditOp::ReplaceNode {
                node: statement,
                text: format!("from {module} import {}", items.join(", ")),
            },
        );
        return;
    }

    let text = format!("from {module} import {}", missing.join(", "));
    match insertion_anchor(cst) {
        ImportAnchor::AfterStatement(stmt) => {
            edits.push("ensure-import", EditOp::InsertAfter { stmt, text });
        }
        ImportAnchor::TopOfFile => {
            edits.push(
                "ensure-import",
                EditOp::ReplaceRange {
                    range: TextRange {
                        start_byte: 0,
                        end_byte: 0,
                        start_row: 0,
                        start_col: 0,
                        end_row: 0,
                        end_col: 0,
                    },
                    text: format!("{text}\n"),
                },
            );
        }
    }
}

/// Queue an edit ensuring a plain `import module` exists.
pub fn ensure_module_import(cst: &Cst, edits: &mut EditSet, module: &str) {
    let records = collect_imports(cst);
    let satisfied = records.iter().any(|r| {
        matches!(r.kind, ImportKind::Module | ImportKind::ModuleAs) && r.module == module
    });
    if satisfied {
        return;
    }
    let text = format!("import {module}");
    match insertion_anchor(cst) {
        ImportAnchor::AfterStatement(stmt) => {
            edits.push("ensure-import", EditOp::InsertAfter { stmt, text });
        }
        ImportAnchor::TopOfFile => {
            edits.push(
                "ensure-import",
                EditOp::ReplaceRange {
                    range: TextRange {
                        start_byte: 0,
                        end_byte: 0,
                        start_row: 0,
                        start_col: 0,
                        end_row: 0,
                        end_col: 0,
                    },
                    text: format!("{text}\n"),
                },
            );
        }
    }
}

enum ImportAnchor {
    AfterStatement(NodeId),
    TopOfFile,
}

/// Last top-level import, else the module docstring, else the file top.
fn insertion_anchor(cst: &Cst) -> ImportAnchor {
    let root = cst.root();
    let mut last_import = None;
    for child in cst.children(root) {
        if matches!(
            cst.kind(*child),
            "import_statement" | "import_from_statement" | "future_import_statement"
        ) {
            last_import = Some(*child);
        }
    }
    if let Some(stmt) = last_import {
        return ImportAnchor::AfterStatement(stmt);
    }

    if let Some(first) = cst.children(root).first().copied() {
        if cst.kind(first) == "expression_statement"
            && cst
                .named_children(first)
                .next()
                .is_some_and(|n| cst.kind(n) == "string")
        {
            return ImportAnchor::AfterStatement(first);
        }
    }
    ImportAnchor::TopOfFile
}

/// Names removed by [`remove_unused_library_imports`].
#[derive(Debug)]
pub struct PrunedImports {
    pub source: String,
    pub removed: Vec<String>,
}

/// Drop imports bound to `library` whose local names have no remaining
/// reference. Only library-bound imports are considered so a user's
/// unrelated unused imports are left alone.
pub fn remove_unused_library_imports(
    source: &str,
    filename: &str,
    library: &str,
) -> Result<PrunedImports> {
    let cst = Cst::parse(source, filename)?;
    let records = collect_imports(&cst);

    // Identifier references outside import statements.
    let import_statements: Vec<NodeId> = records.iter().map(|r| r.statement).collect();
    let mut referenced: std::collections::HashSet<&str> = std::collections::HashSet::new();
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
        referenced.insert(cst.text(node));
    }

    let mut edits = EditSet::new();
    let mut removed = Vec::new();

    // Group records per statement so a statement losing all of its names
    // is deleted outright.
    let mut by_statement: std::collections::BTreeMap<NodeId, Vec<&ImportRecord>> =
        std::collections::BTreeMap::new();
    for record in &records {
        by_statement.entry(record.statement).or_default().push(record);
    }

    for (statement, items) in by_statement {
        let library_bound = items.iter().any(|r| r.binds_library(library));
        if !library_bound {
            continue;
        }
        let (unused, used): (Vec<&&ImportRecord>, Vec<&&ImportRecord>) = items
            .iter()
            .partition(|r| r.kind != ImportKind::Wildcard && !referenced.contains(r.local.as_str()));
        if unused.is_empty() {
            continue;
        }

        if used.is_empty() {
            edits.push("import-prune", EditOp::DeleteStatement { stmt: statement });
        } else {
            // Rebuild the statement with the surviving items.
            let module = &items[0].module;
            let kept: Vec<String> = used.iter().map(|r| cst.text(r.item).to_string()).collect();
            let text = match items[0].kind {
                ImportKind::Module | ImportKind::ModuleAs => {
                    format!("import {}", kept.join(", "))
                }
                _ => format!("from {module} import {}", kept.join(", ")),
            };
            edits.push(
                "import-prune",
                EditOp::ReplaceNode {
                    node: statement,
                    text,
                },
            );
        }
        removed.extend(unused.iter().map(|r| r.local.clone()));
    }

    if edits.is_empty() {
        return Ok(PrunedImports {
            source: source.to_string(),
            removed,
        });
    }

    let result = edits.commit(&cst)?;
    Ok(PrunedImports {
        source: result.source,
        removed,
    })
}

trait RangeOrDefault {
    fn unwrap_or_default_range(self) -> TextRange;
}

impl RangeOrDefault for Option<TextRange> {
    fn unwrap_or_default_range(self) -> TextRange {
        self.unwrap_or(TextRange {
            start_byte: 0,
            end_byte: 0,
            start_row: 0,
            start_col: 0,
            end_row: 0,
            end_col: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Cst {
        Cst::parse(source, "t.py").unwrap()
    }

    #[test]
    fn collects_all_import_kinds() {
        let source = "import os\nimport numpy as np\nfrom pydantic import BaseModel, validator as v\nfrom .util import helper\nfrom x import *\n";
        let cst = parse(source);
        let records = collect_imports(&cst);

        let kinds: Vec<ImportKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImportKind::Module,
                ImportKind::ModuleAs,
                ImportKind::From,
                ImportKind::FromAs,
                ImportKind::Relative,
                ImportKind::Wildcard,
            ]
        );

        let np = &records[1];
        assert_eq!(np.local, "np");
        assert_eq!(np.qualified(), "numpy");

        let v = &records[3];
        assert_eq!(v.local, "v");
        assert_eq!(v.qualified(), "pydantic.validator");
    }

    #[test]
    fn binds_library_matches_submodules() {
        let cst = parse("from sqlalchemy.orm import Session\n");
        let records = collect_imports(&cst);
        assert!(records[0].binds_library("sqlalchemy"));
        assert!(!records[0].binds_library("sql"));
    }

    #[test]
    fn ensure_import_extends_existing_statement() {
        let source = "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n";
        let cst = parse(source);
        let mut edits = EditSet::new();
        ensure_import(&cst, &mut edits, "pydantic", &["ConfigDict"]);
        let result = edits.commit(&cst).unwrap();
        assert!(result
            .source
            .starts_with("from pydantic import BaseModel, ConfigDict\n"));
    }

    #[test]
    fn ensure_import_is_noop_when_present() {
        let source = "from sqlalchemy import select, text\n";
        let cst = parse(source);
        let mut edits = EditSet::new();
        ensure_import(&cst, &mut edits, "sqlalchemy", &["select"]);
        assert!(edits.is_empty());
    }

    #[test]
    fn ensure_import_inserts_after_last_import() {
        let source = "import os\nfrom sqlalchemy.orm import Session\n\nrows = None\n";
        let cst = parse(source);
        let mut edits = EditSet::new();
        ensure_import(&cst, &mut edits, "sqlalchemy", &["select", "func"]);
        let result = edits.commit(&cst).unwrap();
        assert_eq!(
            result.source,
            "import os\nfrom sqlalchemy.orm import Session\nfrom sqlalchemy import select, func\n\nrows = None\n"
        );
    }

    #[test]
    fn ensure_import_lands_below_docstring() {
        let source = "\"\"\"Module doc.\"\"\"\n\nx = 1\n";
        let cst = parse(source);
        let mut edits = EditSet::new();
        ensure_import(&cst, &mut edits, "pydantic", &["ConfigDict"]);
        let result = edits.commit(&cst).unwrap();
        assert_eq!(
            result.source,
            "\"\"\"Module doc.\"\"\"\nfrom pydantic import ConfigDict\n\nx = 1\n"
        );
    }

    #[test]
    fn prune_drops_only_unreferenced_library_names() {
        let source = "from pydantic import BaseModel, validator\n\nclass U(BaseModel):\n    pass\n";
        let pruned = remove_unused_library_imports(source, "t.py", "pydantic").unwrap();
        assert_eq!(
            pruned.source,
            "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n"
        );
        assert_eq!(pruned.removed, vec!["validator".to_string()]);
    }

    #[test]
    fn prune_leaves_other_libraries_alone() {
        let source = "import os\nfrom pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n";
        let pruned = remove_unused_library_imports(source, "t.py", "pydantic").unwrap();
        assert_eq!(pruned.source, source, "unused os import is not ours to touch");
    }

    #[test]
    fn prune_deletes_fully_unused_statement() {
        let source = "from pydantic import validator\n\nx = 1\n";
        let pruned = remove_unused_library_imports(source, "t.py", "pydantic").unwrap();
        assert_eq!(pruned.source, "\nx = 1\n");
    }
}
