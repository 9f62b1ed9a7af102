//! Pydantic v1 → v2.
//!
//! Covers the method renames, validator decorator reshapes, inner
//! `Config` restructure, and `Field` argument renames from the v2
//! migration guide. Matchers are gated on the usage index: instance
//! methods only fire on variables constructed from classes deriving
//! `pydantic.BaseModel` in the same file, classmethods only on those
//! class names.

use std::collections::HashSet;

use pyshift_cst::cst::Cst;
use pyshift_cst::edit::{EditOp, EditSet};
use pyshift_cst::helpers::{
    argument_removal_range, call_arguments, call_function, decorators_of, keyword_argument,
};
use pyshift_cst::imports::{collect_imports, ensure_import, ImportKind};
use pyshift_cst::NodeId;

use crate::types::{ChangeKind, Confidence, Diagnostic};

use super::{LibraryTransformer, Rule, RuleCtx, RuleOutput};

pub struct PydanticTransformer;

impl LibraryTransformer for PydanticTransformer {
    fn library(&self) -> &'static str {
        "pydantic"
    }

    fn from_series(&self) -> &'static str {
        "1"
    }

    fn to_series(&self) -> &'static str {
        "2"
    }

    fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

static RULES: [Rule; 9] = [
    Rule {
        name: "pydantic-instance-method-rename",
        kind: ChangeKind::MethodRename,
        confidence: Confidence::High,
        run: instance_method_renames,
    },
    Rule {
        name: "pydantic-classmethod-rename",
        kind: ChangeKind::MethodRename,
        confidence: Confidence::High,
        run: classmethod_renames,
    },
    Rule {
        name: "pydantic-validator-decorator",
        kind: ChangeKind::DecoratorShape,
        confidence: Confidence::High,
        run: validator_decorator,
    },
    Rule {
        name: "pydantic-root-validator-decorator",
        kind: ChangeKind::DecoratorShape,
        confidence: Confidence::High,
        run: root_validator_decorator,
    },
    Rule {
        name: "pydantic-config-class",
        kind: ChangeKind::ClassConfigRestructure,
        confidence: Confidence::High,
        run: config_class_restructure,
    },
    Rule {
        name: "pydantic-field-regex",
        kind: ChangeKind::ArgumentRename,
        confidence: Confidence::High,
        run: field_regex_rename,
    },
    Rule {
        name: "pydantic-loose-dict-rename",
        kind: ChangeKind::MethodRename,
        confidence: Confidence::Medium,
        run: loose_dict_rename,
    },
    Rule {
        name: "pydantic-settings-import-move",
        kind: ChangeKind::ImportMove,
        confidence: Confidence::Medium,
        run: base_settings_import_move,
    },
    Rule {
        name: "pydantic-parse-file-advisory",
        kind: ChangeKind::BehaviorChange,
        confidence: Confidence::Medium,
        run: parse_file_advisory,
    },
];

const INSTANCE_RENAMES: &[(&str, &str)] = &[
    ("dict", "model_dump"),
    ("json", "model_dump_json"),
    ("copy", "model_copy"),
];

const CLASS_RENAMES: &[(&str, &str)] = &[
    ("parse_obj", "model_validate"),
    ("parse_raw", "model_validate_json"),
    ("from_orm", "model_validate"),
    ("construct", "model_construct"),
    ("schema", "model_json_schema"),
    ("schema_json", "model_json_schema"),
    ("update_forward_refs", "model_rebuild"),
    ("validate", "model_validate"),
];

/// `Config` keys renamed in v2; `allow_mutation` flips polarity.
const CONFIG_KEY_RENAMES: &[(&str, &str)] = &[
    ("orm_mode", "from_attributes"),
    ("anystr_strip_whitespace", "str_strip_whitespace"),
    ("min_anystr_length", "str_min_length"),
    ("max_anystr_length", "str_max_length"),
    ("validate_all", "validate_default"),
    ("allow_population_by_field_name", "populate_by_name"),
    ("schema_extra", "json_schema_extra"),
];

fn model_classes(ctx: &RuleCtx<'_>) -> HashSet<String> {
    ctx.usage.classes_derived_from("pydantic.BaseModel")
}

/// Method-call matcher: `<receiver>.<name>(...)` where the receiver
/// identifier is in `receivers`, returning the attribute-name node.
fn method_call_target(
    cst: &Cst,
    call: NodeId,
    receivers: &HashSet<String>,
    method: &str,
) -> Option<NodeId> {
    let func = call_function(cst, call)?;
    if cst.kind(func) != "attribute" {
        return None;
    }
    let value = cst.child_by_field(func, "value")?;
    let attr = cst.child_by_field(func, "attribute")?;
    if cst.kind(value) != "identifier" || cst.text(attr) != method {
        return None;
    }
    receivers.contains(cst.text(value)).then_some(attr)
}

fn instance_method_renames(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let instances = ctx.usage.instances_of(&model_classes(ctx));
    if instances.is_empty() {
        return output;
    }

    for call in ctx.cst.nodes_of_kind("call") {
        for (old, new) in INSTANCE_RENAMES {
            if let Some(attr) = method_call_target(ctx.cst, call, &instances, old) {
                edits.push(
                    "pydantic-instance-method-rename",
                    EditOp::ReplaceNode {
                        node: attr,
                        text: (*new).to_string(),
                    },
                );
                output.change(ctx.cst, call, format!(".{old}() renamed to .{new}()"));
            }
        }
    }
    output
}

fn classmethod_renames(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let classes = model_classes(ctx);
    if classes.is_empty() {
        return output;
    }
    // update_forward_refs is also called on instances.
    let mut receivers = classes;
    receivers.extend(ctx.usage.instances_of(&receivers.clone()));

    for call in ctx.cst.nodes_of_kind("call") {
        for (old, new) in CLASS_RENAMES {
            if let Some(attr) = method_call_target(ctx.cst, call, &receivers, old) {
                edits.push(
                    "pydantic-classmethod-rename",
                    EditOp::ReplaceNode {
                        node: attr,
                        text: (*new).to_string(),
                    },
                );
                output.change(ctx.cst, call, format!(".{old}() renamed to .{new}()"));
            }
        }
    }
    output
}

/// Medium-confidence fallback: any zero-argument `.dict()` call while
/// pydantic is in scope, for receivers the index could not type.
fn loose_dict_rename(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let known: HashSet<String> = ctx.usage.instances_of(&model_classes(ctx));

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
        if ctx.cst.text(attr) != "dict" || !call_arguments(ctx.cst, call).is_empty() {
            continue;
        }
        let receiver_known = ctx
            .cst
            .child_by_field(func, "value")
            .is_some_and(|v| known.contains(ctx.cst.text(v)));
        if receiver_known {
            continue; // already handled at high confidence
        }
        edits.push(
            "pydantic-loose-dict-rename",
            EditOp::ReplaceNode {
                node: attr,
                text: "model_dump".to_string(),
            },
        );
        output.change(ctx.cst, call, ".dict() renamed to .model_dump() (untyped receiver)");
    }
    output
}

/// The name node to rename inside a decorator reference, handling both
/// `@validator(...)` and `@pydantic.validator(...)`.
fn decorator_name_node(cst: &Cst, node: NodeId) -> NodeId {
    if cst.kind(node) == "attribute" {
        cst.child_by_field(node, "attribute").unwrap_or(node)
    } else {
        node
    }
}

/// Function definition a decorator is attached to.
fn decorated_function(cst: &Cst, decorator_member: NodeId) -> Option<NodeId> {
    let mut current = Some(decorator_member);
    while let Some(node) = current {
        if cst.kind(node) == "decorator" {
            let wrapper = cst.parent(node)?;
            return cst.child_of_kind(wrapper, "function_definition");
        }
        current = cst.parent(node);
    }
    None
}

fn has_classmethod_decorator(cst: &Cst, function_def: NodeId) -> bool {
    decorators_of(cst, function_def)
        .iter()
        .any(|d| cst.text(*d).trim_start_matches('@').trim() == "classmethod")
}

fn validator_decorator(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut needs_import = false;

    for usage in &ctx.usage.usages {
        if usage.qualified != "pydantic.validator"
            || usage.role != pyshift_cst::usage::UsageRole::Decorator
        {
            continue;
        }
        let name_node = decorator_name_node(ctx.cst, usage.node);
        edits.push(
            "pydantic-validator-decorator",
            EditOp::ReplaceNode {
                node: name_node,
                text: "field_validator".to_string(),
            },
        );
        if ctx.cst.kind(usage.node) == "identifier" {
            needs_import = true;
        }

        // Keyword reshapes on the decorator call, if it is a call.
        if let Some(call) = ctx
            .cst
            .parent(usage.node)
            .filter(|p| ctx.cst.kind(*p) == "call")
        {
            if let Some(pre) = keyword_argument(ctx.cst, call, "pre") {
                let value = ctx
                    .cst
                    .child_by_field(pre, "value")
                    .map(|v| ctx.cst.text(v).to_string());
                match value.as_deref() {
                    Some("True") => edits.push(
                        "pydantic-validator-decorator",
                        EditOp::ReplaceNode {
                            node: pre,
                            text: "mode=\"before\"".to_string(),
                        },
                    ),
                    _ => {
                        if let Some(range) = argument_removal_range(ctx.cst, call, pre) {
                            edits.push(
                                "pydantic-validator-decorator",
                                EditOp::ReplaceRange {
                                    range,
                                    text: String::new(),
                                },
                            );
                        }
                    }
                }
            }
            if let Some(reuse) = keyword_argument(ctx.cst, call, "allow_reuse") {
                // allow_reuse is gone in v2.
                if let Some(range) = argument_removal_range(ctx.cst, call, reuse) {
                    edits.push(
                        "pydantic-validator-decorator",
                        EditOp::ReplaceRange {
                            range,
                            text: String::new(),
                        },
                    );
                }
            }
            if keyword_argument(ctx.cst, call, "each_item").is_some() {
                output.diagnostics.push(Diagnostic::warning(
                    "each_item=True has no direct v2 equivalent; validate the item type instead",
                ));
            }
        }

        // v2 field validators are classmethods.
        if let Some(function_def) = decorated_function(ctx.cst, usage.node) {
            if !has_classmethod_decorator(ctx.cst, function_def) {
                edits.push(
                    "pydantic-validator-decorator",
                    EditOp::InsertBefore {
                        stmt: function_def,
                        text: "@classmethod".to_string(),
                    },
                );
            }
        }

        output.change(
            ctx.cst,
            usage.node,
            "@validator rewritten to @field_validator with @classmethod",
        );
    }

    if needs_import {
        ensure_import(ctx.cst, edits, "pydantic", &["field_validator"]);
    }
    output
}

fn root_validator_decorator(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let mut needs_import = false;

    for usage in &ctx.usage.usages {
        if usage.qualified != "pydantic.root_validator"
            || usage.role != pyshift_cst::usage::UsageRole::Decorator
        {
            continue;
        }

        let mut decorator = usage.node;
        while ctx.cst.kind(decorator) != "decorator" {
            match ctx.cst.parent(decorator) {
                Some(parent) => decorator = parent,
                None => break,
            }
        }
        if ctx.cst.kind(decorator) != "decorator" {
            continue;
        }

        let pre_mode = ctx
            .cst
            .parent(usage.node)
            .filter(|p| ctx.cst.kind(*p) == "call")
            .and_then(|call| keyword_argument(ctx.cst, call, "pre"))
            .and_then(|kw| ctx.cst.child_by_field(kw, "value"))
            .is_some_and(|v| ctx.cst.text(v) == "True");
        let mode = if pre_mode { "before" } else { "after" };

        let prefix = if ctx.cst.kind(usage.node) == "attribute" {
            needs_import = false;
            "pydantic."
        } else {
            needs_import = true;
            ""
        };
        edits.push(
            "pydantic-root-validator-decorator",
            EditOp::ReplaceNode {
                node: decorator,
                text: format!("@{prefix}model_validator(mode=\"{mode}\")"),
            },
        );

        if pre_mode {
            if let Some(function_def) = decorated_function(ctx.cst, usage.node) {
                if !has_classmethod_decorator(ctx.cst, function_def) {
                    edits.push(
                        "pydantic-root-validator-decorator",
                        EditOp::InsertBefore {
                            stmt: function_def,
                            text: "@classmethod".to_string(),
                        },
                    );
                }
            }
        } else {
            output.diagnostics.push(Diagnostic::warning(
                "mode=\"after\" validators receive the model instance in v2; review the body",
            ));
        }

        output.change(
            ctx.cst,
            decorator,
            format!("@root_validator rewritten to @model_validator(mode=\"{mode}\")"),
        );
    }

    if needs_import {
        ensure_import(ctx.cst, edits, "pydantic", &["model_validator"]);
    }
    output
}

fn config_class_restructure(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let classes = model_classes(ctx);
    if classes.is_empty() {
        return output;
    }
    let mut touched = false;

    for class_def in ctx.cst.nodes_of_kind("class_definition") {
        let Some(name) = ctx.cst.child_by_field(class_def, "name") else {
            continue;
        };
        if !classes.contains(ctx.cst.text(name)) {
            continue;
        }
        let Some(body) = ctx.cst.child_by_field(class_def, "body") else {
            continue;
        };
        for member in ctx.cst.named_children(body).collect::<Vec<_>>() {
            if ctx.cst.kind(member) != "class_definition" {
                continue;
            }
            let inner_name = ctx
                .cst
                .child_by_field(member, "name")
                .map(|n| ctx.cst.text(n));
            if inner_name != Some("Config") {
                continue;
            }

            let items = config_items(ctx.cst, member);
            edits.push(
                "pydantic-config-class",
                EditOp::ReplaceNode {
                    node: member,
                    text: format!("model_config = ConfigDict({})", items.join(", ")),
                },
            );
            touched = true;
            output.change(
                ctx.cst,
                member,
                "inner Config class replaced by model_config = ConfigDict(...)",
            );
        }
    }

    if touched {
        ensure_import(ctx.cst, edits, "pydantic", &["ConfigDict"]);
    }
    output
}

/// Translate `class Config` body assignments into ConfigDict arguments.
fn config_items(cst: &Cst, config_class: NodeId) -> Vec<String> {
    let mut items = Vec::new();
    let Some(body) = cst.child_by_field(config_class, "body") else {
        return items;
    };
    for stmt in cst.named_children(body).collect::<Vec<_>>() {
        if cst.kind(stmt) != "expression_statement" {
            continue;
        }
        let Some(assign) = cst
            .named_children(stmt)
            .find(|n| cst.kind(*n) == "assignment")
        else {
            continue;
        };
        let (Some(left), Some(right)) = (
            cst.child_by_field(assign, "left"),
            cst.child_by_field(assign, "right"),
        ) else {
            continue;
        };
        let key = cst.text(left);
        let value = cst.text(right);

        if key == "allow_mutation" {
            // Polarity flip: allow_mutation=False means frozen=True.
            match value {
                "False" => items.push("frozen=True".to_string()),
                "True" => {}
                other => items.push(format!("frozen=not {other}")),
            }
            continue;
        }
        let new_key = CONFIG_KEY_RENAMES
            .iter()
            .find(|(old, _)| *old == key)
            .map_or(key, |(_, new)| *new);
        items.push(format!("{new_key}={value}"));
    }
    items
}

fn field_regex_rename(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();

    for usage in &ctx.usage.usages {
        if usage.role != pyshift_cst::usage::UsageRole::Call {
            continue;
        }
        if usage.qualified != "pydantic.Field" && usage.qualified != "pydantic.constr" {
            continue;
        }
        let Some(call) = ctx
            .cst
            .parent(usage.node)
            .filter(|p| ctx.cst.kind(*p) == "call")
        else {
            continue;
        };
        let Some(kwarg) = keyword_argument(ctx.cst, call, "regex") else {
            continue;
        };
        let Some(kwarg_name) = ctx.cst.child_by_field(kwarg, "name") else {
            continue;
        };
        edits.push(
            "pydantic-field-regex",
            EditOp::ReplaceNode {
                node: kwarg_name,
                text: "pattern".to_string(),
            },
        );
        output.change(ctx.cst, call, "regex= renamed to pattern=");
    }
    output
}

fn base_settings_import_move(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let mut output = RuleOutput::default();
    let records = collect_imports(ctx.cst);

    for record in &records {
        if record.module != "pydantic"
            || record.name.as_deref() != Some("BaseSettings")
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
                "pydantic-settings-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!("from pydantic_settings import {moved_item}"),
                },
            );
        } else {
            let kept: Vec<String> = siblings
                .iter()
                .map(|r| ctx.cst.text(r.item).to_string())
                .collect();
            edits.push(
                "pydantic-settings-import-move",
                EditOp::ReplaceNode {
                    node: record.statement,
                    text: format!("from pydantic import {}", kept.join(", ")),
                },
            );
            edits.push(
                "pydantic-settings-import-move",
                EditOp::InsertAfter {
                    stmt: record.statement,
                    text: format!("from pydantic_settings import {moved_item}"),
                },
            );
        }
        output.change(
            ctx.cst,
            record.statement,
            "BaseSettings moved to the pydantic-settings package",
        );
        output.diagnostics.push(Diagnostic::info(
            "add pydantic-settings to the project dependencies",
        ));
    }
    output
}

fn parse_file_advisory(ctx: &RuleCtx<'_>, edits: &mut EditSet) -> RuleOutput {
    let _ = edits; // advisory only
    let mut output = RuleOutput::default();
    let classes = model_classes(ctx);

    for call in ctx.cst.nodes_of_kind("call") {
        if method_call_target(ctx.cst, call, &classes, "parse_file").is_some() {
            let line = ctx.cst.range(call).map_or(0, |r| r.start_row + 1);
            output.diagnostics.push(Diagnostic::warning(format!(
                "line {line}: parse_file() was removed in v2; read the file and call model_validate_json()"
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
        apply_transformer(&PydanticTransformer, source, "m.py", Confidence::Medium).unwrap()
    }

    #[test]
    fn renames_instance_methods_on_tracked_models() {
        let source = "from x import irrelevant\nfrom pydantic import BaseModel\n\nclass Model(BaseModel):\n    name: str\n\nu = Model()\nd = u.dict()\nj = u.json()\n";
        let outcome = run(source);
        assert!(outcome.source.contains("d = u.model_dump()"));
        assert!(outcome.source.contains("j = u.model_dump_json()"));
        // Unrelated import untouched.
        assert!(outcome.source.contains("from x import irrelevant"));
        assert_eq!(
            outcome
                .changes
                .iter()
                .filter(|c| c.rule == "pydantic-instance-method-rename")
                .count(),
            2
        );
    }

    #[test]
    fn renames_classmethods() {
        let source = "from pydantic import BaseModel\n\nclass User(BaseModel):\n    pass\n\nu = User.parse_obj(data)\nraw = User.parse_raw(blob)\nUser.update_forward_refs()\n";
        let outcome = run(source);
        assert!(outcome.source.contains("User.model_validate(data)"));
        assert!(outcome.source.contains("User.model_validate_json(blob)"));
        assert!(outcome.source.contains("User.model_rebuild()"));
    }

    #[test]
    fn does_not_touch_response_json() {
        let source = "import requests\nfrom pydantic import BaseModel\n\nclass M(BaseModel):\n    pass\n\nresp = requests.get(url)\ndata = resp.json()\n";
        let outcome = run(source);
        assert!(
            outcome.source.contains("resp.json()"),
            "json() on a non-model receiver must survive: {}",
            outcome.source
        );
    }

    #[test]
    fn validator_becomes_field_validator_with_classmethod() {
        let source = "from pydantic import BaseModel, validator\n\nclass U(BaseModel):\n    age: int\n\n    @validator(\"age\", pre=True)\n    def check(cls, v):\n        return v\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("@field_validator(\"age\", mode=\"before\")"));
        assert!(outcome.source.contains("    @classmethod\n    def check"));
        assert!(outcome.source.contains("from pydantic import BaseModel, field_validator"));
        // The old validator import is pruned.
        assert!(!outcome.source.contains("import BaseModel, validator"));
    }

    #[test]
    fn second_run_is_empty() {
        let source = "from pydantic import BaseModel, validator\n\nclass U(BaseModel):\n    age: int\n\n    @validator(\"age\", pre=True)\n    def check(cls, v):\n        return v\n\nu = U()\nd = u.dict()\n";
        let first = run(source);
        let second = run(&first.source);
        assert!(second.changes.is_empty(), "rules must be idempotent");
        assert_eq!(second.source, first.source);
    }

    #[test]
    fn root_validator_modes() {
        let source = "from pydantic import BaseModel, root_validator\n\nclass U(BaseModel):\n    @root_validator(pre=True)\n    def pre_check(cls, values):\n        return values\n";
        let outcome = run(source);
        assert!(outcome.source.contains("@model_validator(mode=\"before\")"));
        assert!(outcome.source.contains("@classmethod"));
    }

    #[test]
    fn config_class_becomes_config_dict() {
        let source = "from pydantic import BaseModel\n\nclass U(BaseModel):\n    class Config:\n        orm_mode = True\n        allow_mutation = False\n";
        let outcome = run(source);
        assert!(outcome
            .source
            .contains("model_config = ConfigDict(from_attributes=True, frozen=True)"));
        assert!(!outcome.source.contains("class Config"));
        assert!(outcome.source.contains("ConfigDict"));
        assert!(outcome.source.contains("from pydantic import BaseModel, ConfigDict"));
    }

    #[test]
    fn field_regex_to_pattern() {
        let source = "from pydantic import BaseModel, Field\n\nclass U(BaseModel):\n    code: str = Field(regex=r\"^[a-z]+$\")\n";
        let outcome = run(source);
        assert!(outcome.source.contains("Field(pattern=r\"^[a-z]+$\")"));
    }

    #[test]
    fn base_settings_moves_package() {
        let source = "from pydantic import BaseModel, BaseSettings\n\nclass M(BaseModel):\n    pass\n\nclass S(BaseSettings):\n    debug: bool = False\n";
        let outcome = run(source);
        assert!(outcome.source.contains("from pydantic import BaseModel\n"));
        assert!(outcome
            .source
            .contains("from pydantic_settings import BaseSettings"));
    }

    #[test]
    fn parse_file_gets_advisory_only() {
        let source = "from pydantic import BaseModel\n\nclass U(BaseModel):\n    pass\n\nu = U.parse_file(\"u.json\")\n";
        let outcome = run(source);
        assert!(outcome.source.contains("parse_file"), "no edit for removed API");
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.message.contains("model_validate_json")));
    }
}
