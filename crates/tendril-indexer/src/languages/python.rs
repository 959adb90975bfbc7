//! Python signal extractor using tree-sitter
//!
//! Recognises Qt (`Signal`, `pyqtSignal`) and blinker (`signal`) style
//! declarations, `.emit(...)` calls and `.connect(...)` subscriptions.

use std::collections::BTreeMap;

use anyhow::Result;
use tendril_core::{
    ConnectionSite, EmissionSite, HandlerKind, SignalDefinition, SignalSource,
};
use tree_sitter::Node;

use crate::extractor::{ParsedFile, SignalExtractor, SyntaxKind};

const SIGNAL_CONSTRUCTORS: &[&str] = &["Signal", "pyqtSignal", "signal"];

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonSignalExtractor;

impl PythonSignalExtractor {
    pub fn new() -> Self {
        PythonSignalExtractor
    }
}

fn line_of(node: &Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// Depth-first, source-order walk. `visit` sees each named node together
/// with the name of the innermost enclosing class.
fn walk<'f>(
    file: &'f ParsedFile,
    node: Node<'f>,
    class: Option<&str>,
    visit: &mut dyn FnMut(Node<'f>, Option<&str>) -> Result<()>,
) -> Result<()> {
    visit(node, class)?;

    let class_name = if SyntaxKind::of(&node) == SyntaxKind::ClassDefinition {
        node.child_by_field_name("name")
            .map(|n| file.text(n))
            .transpose()?
            .map(str::to_string)
    } else {
        None
    };
    let scope = class_name.as_deref().or(class);

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(file, child, scope, visit)?;
    }
    Ok(())
}

/// Positional and keyword arguments of a call, comments dropped.
fn split_arguments<'f>(call: Node<'f>) -> (Vec<Node<'f>>, Vec<Node<'f>>) {
    let mut positional = Vec::new();
    let mut keyword = Vec::new();
    if let Some(args) = call.child_by_field_name("arguments") {
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            match SyntaxKind::of(&arg) {
                SyntaxKind::KeywordArgument => keyword.push(arg),
                _ if arg.kind() == "comment" => {}
                _ => positional.push(arg),
            }
        }
    }
    (positional, keyword)
}

fn keyword_value<'f>(
    file: &'f ParsedFile,
    keywords: &[Node<'f>],
    name: &str,
) -> Result<Option<Node<'f>>> {
    for kw in keywords {
        let Some(key) = kw.child_by_field_name("name") else {
            continue;
        };
        if file.text(key)? == name {
            return Ok(kw.child_by_field_name("value"));
        }
    }
    Ok(None)
}

/// Last segment of a callee: `Signal` for both `Signal` and `QtCore.Signal`.
fn callee_name<'f>(file: &'f ParsedFile, function: Node<'f>) -> Result<Option<&'f str>> {
    match SyntaxKind::of(&function) {
        SyntaxKind::Identifier => Ok(Some(file.text(function)?)),
        SyntaxKind::Attribute => function
            .child_by_field_name("attribute")
            .map(|a| file.text(a))
            .transpose(),
        SyntaxKind::Call
        | SyntaxKind::Lambda
        | SyntaxKind::Assignment
        | SyntaxKind::ClassDefinition
        | SyntaxKind::KeywordArgument
        | SyntaxKind::Other => Ok(None),
    }
}

/// Resolve the receiver of `.emit`/`.connect` into (signal name, qualifier).
fn signal_reference<'f>(
    file: &'f ParsedFile,
    receiver: Node<'f>,
) -> Result<Option<(String, Option<String>)>> {
    match SyntaxKind::of(&receiver) {
        SyntaxKind::Identifier => Ok(Some((file.text(receiver)?.to_string(), None))),
        SyntaxKind::Attribute => {
            let (Some(object), Some(attribute)) = (
                receiver.child_by_field_name("object"),
                receiver.child_by_field_name("attribute"),
            ) else {
                return Ok(None);
            };
            Ok(Some((
                file.text(attribute)?.to_string(),
                Some(file.text(object)?.to_string()),
            )))
        }
        SyntaxKind::Call
        | SyntaxKind::Lambda
        | SyntaxKind::Assignment
        | SyntaxKind::ClassDefinition
        | SyntaxKind::KeywordArgument
        | SyntaxKind::Other => Ok(None),
    }
}

/// For `<receiver>.<method>(...)` calls, the receiver node.
fn method_receiver<'f>(file: &'f ParsedFile, call: Node<'f>, method: &str) -> Result<Option<Node<'f>>> {
    let Some(function) = call.child_by_field_name("function") else {
        return Ok(None);
    };
    if SyntaxKind::of(&function) != SyntaxKind::Attribute {
        return Ok(None);
    }
    if callee_name(file, function)? != Some(method) {
        return Ok(None);
    }
    Ok(function.child_by_field_name("object"))
}

fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'').to_string()
}

fn string_list(file: &ParsedFile, node: Node<'_>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for item in node.named_children(&mut cursor) {
        if item.kind() == "string" {
            names.push(unquote(file.text(item)?));
        }
    }
    Ok(names)
}

fn definition_from_assignment(
    file: &ParsedFile,
    node: Node<'_>,
    class: Option<&str>,
    bus_module: bool,
) -> Result<Option<SignalDefinition>> {
    let (Some(left), Some(right)) = (
        node.child_by_field_name("left"),
        node.child_by_field_name("right"),
    ) else {
        return Ok(None);
    };

    let name = match SyntaxKind::of(&left) {
        SyntaxKind::Identifier => file.text(left)?,
        SyntaxKind::Attribute => match left.child_by_field_name("attribute") {
            Some(attribute) => file.text(attribute)?,
            None => return Ok(None),
        },
        SyntaxKind::Call
        | SyntaxKind::Lambda
        | SyntaxKind::Assignment
        | SyntaxKind::ClassDefinition
        | SyntaxKind::KeywordArgument
        | SyntaxKind::Other => return Ok(None),
    };

    if SyntaxKind::of(&right) != SyntaxKind::Call {
        return Ok(None);
    }
    let Some(function) = right.child_by_field_name("function") else {
        return Ok(None);
    };
    match callee_name(file, function)? {
        Some(callee) if SIGNAL_CONSTRUCTORS.contains(&callee) => {}
        _ => return Ok(None),
    }

    let (positional, keywords) = split_arguments(right);
    let mut types = Vec::new();
    for arg in positional {
        if arg.kind() == "string" {
            continue;
        }
        types.push(file.text(arg)?.to_string());
    }

    let mut params = match keyword_value(file, &keywords, "arguments")? {
        Some(list) => string_list(file, list)?,
        None => Vec::new(),
    };
    // Positional types beyond the named arguments get synthetic names.
    for i in params.len()..types.len() {
        params.push(format!("arg{i}"));
    }
    let param_types = if types.is_empty() {
        None
    } else {
        Some(
            params
                .iter()
                .cloned()
                .zip(types)
                .collect::<BTreeMap<String, String>>(),
        )
    };

    let on_bus = bus_module || class.is_some_and(|c| c.to_lowercase().contains("bus"));

    Ok(Some(SignalDefinition {
        name: name.to_string(),
        params,
        param_types,
        file_path: file.path().to_path_buf(),
        line: line_of(&node),
        source: if on_bus {
            SignalSource::GlobalBus
        } else {
            SignalSource::Local
        },
    }))
}

fn emission_from_call(file: &ParsedFile, call: Node<'_>) -> Result<Option<EmissionSite>> {
    let Some(receiver) = method_receiver(file, call, "emit")? else {
        return Ok(None);
    };
    let Some((signal, emitter)) = signal_reference(file, receiver)? else {
        return Ok(None);
    };

    let (positional, keywords) = split_arguments(call);
    let args = positional
        .into_iter()
        .chain(keywords)
        .map(|a| file.text(a).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(EmissionSite {
        signal,
        file_path: file.path().to_path_buf(),
        line: line_of(&call),
        context: file.line_text(&call).to_string(),
        emitter,
        args: if args.is_empty() { None } else { Some(args) },
    }))
}

fn connection_from_call(file: &ParsedFile, call: Node<'_>) -> Result<Option<ConnectionSite>> {
    let Some(receiver) = method_receiver(file, call, "connect")? else {
        return Ok(None);
    };
    // Only `<obj>.<signal>.connect(...)`; a bare `name.connect(...)` is far
    // more often a database or socket call than a signal.
    if SyntaxKind::of(&receiver) != SyntaxKind::Attribute {
        return Ok(None);
    }
    let Some((signal, target)) = signal_reference(file, receiver)? else {
        return Ok(None);
    };

    let (positional, keywords) = split_arguments(call);
    let Some(&first) = positional.first() else {
        return Ok(None);
    };

    let (handler_kind, handler) = match SyntaxKind::of(&first) {
        SyntaxKind::Identifier | SyntaxKind::Attribute => {
            (HandlerKind::Direct, file.text(first)?.to_string())
        }
        SyntaxKind::Lambda => (HandlerKind::Lambda, "lambda".to_string()),
        SyntaxKind::Call => {
            let (inner, _) = split_arguments(first);
            let wrapped = match inner.first() {
                Some(&callable)
                    if matches!(
                        SyntaxKind::of(&callable),
                        SyntaxKind::Identifier | SyntaxKind::Attribute
                    ) =>
                {
                    file.text(callable)?
                }
                _ => match first.child_by_field_name("function") {
                    Some(function) => file.text(function)?,
                    None => return Ok(None),
                },
            };
            (HandlerKind::Wrapped, wrapped.to_string())
        }
        SyntaxKind::Assignment
        | SyntaxKind::ClassDefinition
        | SyntaxKind::KeywordArgument
        | SyntaxKind::Other => return Ok(None),
    };

    let flag_node = match positional.get(1) {
        Some(&node) => Some(node),
        None => keyword_value(file, &keywords, "type")?,
    };
    let flags = match flag_node {
        Some(node) => {
            let parts: Vec<String> = file
                .text(node)?
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if parts.is_empty() { None } else { Some(parts) }
        }
        None => None,
    };

    Ok(Some(ConnectionSite {
        signal,
        file_path: file.path().to_path_buf(),
        line: line_of(&call),
        context: file.line_text(&call).to_string(),
        target,
        handler,
        is_lambda: handler_kind == HandlerKind::Lambda,
        handler_kind,
        flags,
    }))
}

fn is_bus_module(file: &ParsedFile) -> bool {
    file.path()
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy().to_lowercase().contains("bus"))
}

impl SignalExtractor for PythonSignalExtractor {
    fn extract_signals(&self, file: &ParsedFile) -> Result<Vec<SignalDefinition>> {
        let bus_module = is_bus_module(file);
        let mut definitions = Vec::new();
        walk(file, file.tree.root_node(), None, &mut |node, class| {
            match SyntaxKind::of(&node) {
                SyntaxKind::Assignment => {
                    if let Some(def) = definition_from_assignment(file, node, class, bus_module)? {
                        definitions.push(def);
                    }
                }
                SyntaxKind::Call
                | SyntaxKind::Attribute
                | SyntaxKind::Identifier
                | SyntaxKind::Lambda
                | SyntaxKind::ClassDefinition
                | SyntaxKind::KeywordArgument
                | SyntaxKind::Other => {}
            }
            Ok(())
        })?;
        Ok(definitions)
    }

    fn extract_emissions(&self, file: &ParsedFile) -> Result<Vec<EmissionSite>> {
        let mut emissions = Vec::new();
        walk(file, file.tree.root_node(), None, &mut |node, _| {
            if SyntaxKind::of(&node) == SyntaxKind::Call {
                if let Some(site) = emission_from_call(file, node)? {
                    emissions.push(site);
                }
            }
            Ok(())
        })?;
        Ok(emissions)
    }

    fn extract_connections(&self, file: &ParsedFile) -> Result<Vec<ConnectionSite>> {
        let mut connections = Vec::new();
        walk(file, file.tree.root_node(), None, &mut |node, _| {
            if SyntaxKind::of(&node) == SyntaxKind::Call {
                if let Some(site) = connection_from_call(file, node)? {
                    connections.push(site);
                }
            }
            Ok(())
        })?;
        Ok(connections)
    }
}
