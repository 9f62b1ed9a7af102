//! Shared node inspection helpers used by the usage index and by
//! transformer matchers.

use crate::cst::Cst;
use crate::{NodeId, TextRange};

/// The `function` child of a call expression.
pub fn call_function(cst: &Cst, call: NodeId) -> Option<NodeId> {
    cst.child_by_field(call, "function")
}

/// Named argument nodes of a call, in source order.
pub fn call_arguments(cst: &Cst, call: NodeId) -> Vec<NodeId> {
    let Some(args) = cst.child_by_field(call, "arguments") else {
        return Vec::new();
    };
    cst.named_children(args).collect()
}

/// Find a keyword argument of a call by name.
pub fn keyword_argument(cst: &Cst, call: NodeId, name: &str) -> Option<NodeId> {
    call_arguments(cst, call).into_iter().find(|arg| {
        cst.kind(*arg) == "keyword_argument"
            && cst
                .child_by_field(*arg, "name")
                .is_some_and(|n| cst.text(n) == name)
    })
}

/// Positional (non-keyword) arguments of a call.
pub fn positional_arguments(cst: &Cst, call: NodeId) -> Vec<NodeId> {
    call_arguments(cst, call)
        .into_iter()
        .filter(|arg| cst.kind(*arg) != "keyword_argument")
        .collect()
}

/// Dotted text of an attribute chain or plain identifier, e.g.
/// `requests.packages.urllib3` -> that string. Returns `None` for
/// receivers that are not pure name/attribute chains (calls, subscripts).
pub fn dotted_text(cst: &Cst, node: NodeId) -> Option<String> {
    match cst.kind(node) {
        "identifier" => Some(cst.text(node).to_string()),
        "attribute" => {
            let value = cst.child_by_field(node, "value")?;
            let attr = cst.child_by_field(node, "attribute")?;
            Some(format!("{}.{}", dotted_text(cst, value)?, cst.text(attr)))
        }
        "dotted_name" => Some(cst.text(node).to_string()),
        _ => None,
    }
}

/// The span to cut when removing one argument from a call, including the
/// separating comma and surrounding whitespace, so the remaining list
/// stays well-formed.
pub fn argument_removal_range(cst: &Cst, call: NodeId, arg: NodeId) -> Option<TextRange> {
    let args = call_arguments(cst, call);
    let index = args.iter().position(|a| *a == arg)?;
    let arg_range = cst.range(arg)?;
    let source = cst.render();

    if index > 0 {
        // Cut from the end of the previous argument up to the end of
        // this one: ", future=True".
        let prev_end = cst.range(args[index - 1])?.end_byte;
        Some(TextRange {
            start_byte: prev_end,
            end_byte: arg_range.end_byte,
            ..arg_range
        })
    } else if args.len() > 1 {
        // First of several: cut up to the start of the next argument.
        let next_start = cst.range(args[1])?.start_byte;
        Some(TextRange {
            start_byte: arg_range.start_byte,
            end_byte: next_start,
            ..arg_range
        })
    } else {
        // Only argument: cut it plus any trailing comma/whitespace
        // inside the parentheses.
        let mut end = arg_range.end_byte;
        let bytes = source.as_bytes();
        while end < bytes.len() && (bytes[end] == b',' || bytes[end] == b' ') {
            end += 1;
        }
        Some(TextRange {
            start_byte: arg_range.start_byte,
            end_byte: end,
            ..arg_range
        })
    }
}

/// Base classes of a class definition (`superclasses` argument list).
pub fn base_classes(cst: &Cst, class_def: NodeId) -> Vec<NodeId> {
    let Some(supers) = cst.child_by_field(class_def, "superclasses") else {
        return Vec::new();
    };
    cst.named_children(supers)
        .filter(|n| cst.kind(*n) != "keyword_argument")
        .collect()
}

/// The decorator list attached to a decorated definition, if `def_node`
/// is wrapped in one.
pub fn decorators_of(cst: &Cst, def_node: NodeId) -> Vec<NodeId> {
    let Some(parent) = cst.parent(def_node) else {
        return Vec::new();
    };
    if cst.kind(parent) != "decorated_definition" {
        return Vec::new();
    }
    cst.children(parent)
        .iter()
        .copied()
        .filter(|c| cst.kind(*c) == "decorator")
        .collect()
}
