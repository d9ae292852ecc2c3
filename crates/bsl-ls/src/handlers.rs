//
// handlers.rs
//
// Copyright (C) 2024-2026 Posit Software, PBC. All rights reserved.
// Modifications copyright (C) 2026 Jonathan Marc Bearak
//

use std::collections::HashMap;

use indexmap::IndexMap;
use tower_lsp::lsp_types::*;

use crate::references::Reference;
use crate::symbols::{self, SourceSymbol, SymbolTree};
use crate::workspace::Workspace;

// ============================================================================
// Conversions
// ============================================================================

fn lsp_symbol_kind(kind: symbols::SymbolKind) -> SymbolKind {
    match kind {
        symbols::SymbolKind::Module => SymbolKind::MODULE,
        symbols::SymbolKind::Region => SymbolKind::NAMESPACE,
        symbols::SymbolKind::Method => SymbolKind::METHOD,
        symbols::SymbolKind::Variable => SymbolKind::VARIABLE,
        symbols::SymbolKind::Annotation => SymbolKind::PROPERTY,
    }
}

fn is_renameable(symbol: &SourceSymbol) -> bool {
    symbol.is_method() || symbol.is_variable()
}

fn call_hierarchy_item(symbol: &SourceSymbol) -> CallHierarchyItem {
    CallHierarchyItem {
        name: symbol.name.clone(),
        kind: lsp_symbol_kind(symbol.kind),
        tags: None,
        detail: Some(symbol.mdo_ref.clone()),
        uri: symbol.uri.clone(),
        range: symbol.range,
        selection_range: symbol.selection_range,
        data: None,
    }
}

/// Grouping key for a symbol within one response
fn symbol_key(symbol: &SourceSymbol) -> (Url, u32, u32) {
    let start = symbol.selection_range.start;
    (symbol.uri.clone(), start.line, start.character)
}

/// BSL identifier: a letter or underscore, then letters, digits or
/// underscores
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

// ============================================================================
// Navigation
// ============================================================================

pub fn goto_definition(workspace: &Workspace, uri: &Url, position: Position) -> Option<GotoDefinitionResponse> {
    let reference = workspace.find_reference(uri, position)?;
    Some(GotoDefinitionResponse::Scalar(Location::new(
        reference.to.uri.clone(),
        reference.to.selection_range,
    )))
}

pub fn references(
    workspace: &Workspace,
    uri: &Url,
    position: Position,
    include_declaration: bool,
) -> Option<Vec<Location>> {
    let target = workspace.find_reference(uri, position)?.to;

    let mut locations = Vec::new();
    if include_declaration && is_renameable(&target) {
        locations.push(Location::new(target.uri.clone(), target.selection_range));
    }
    for reference in workspace.get_references_to(&target) {
        let location = reference.location();
        if !locations.contains(&location) {
            locations.push(location);
        }
    }
    Some(locations)
}

// ============================================================================
// Rename
// ============================================================================

pub fn prepare_rename(workspace: &Workspace, uri: &Url, position: Position) -> Option<PrepareRenameResponse> {
    let reference = workspace.find_reference(uri, position)?;
    if !is_renameable(&reference.to) {
        return None;
    }
    Some(PrepareRenameResponse::Range(reference.selection_range))
}

pub fn rename(workspace: &Workspace, uri: &Url, position: Position, new_name: &str) -> Option<WorkspaceEdit> {
    if !is_identifier(new_name) {
        log::warn!("Refusing rename to '{}': not an identifier", new_name);
        return None;
    }
    let target = workspace.find_reference(uri, position)?.to;
    if !is_renameable(&target) {
        return None;
    }

    let usages = workspace.get_references_to(&target);
    let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    let occurrences = std::iter::once(Location::new(target.uri.clone(), target.selection_range))
        .chain(usages.iter().map(Reference::location));
    for location in occurrences {
        let edits = changes.entry(location.uri).or_default();
        if !edits.iter().any(|edit| edit.range == location.range) {
            edits.push(TextEdit::new(location.range, new_name.to_string()));
        }
    }
    log::trace!("Rename of {} touches {} documents", target.name, changes.len());

    Some(WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    })
}

// ============================================================================
// Call Hierarchy
// ============================================================================

pub fn prepare_call_hierarchy(
    workspace: &Workspace,
    uri: &Url,
    position: Position,
) -> Option<Vec<CallHierarchyItem>> {
    let reference = workspace.find_reference(uri, position)?;
    if !reference.to.is_method() {
        return None;
    }
    Some(vec![call_hierarchy_item(&reference.to)])
}

/// The method an item was prepared from, resolved against current content
fn item_method(workspace: &Workspace, item: &CallHierarchyItem) -> Option<SourceSymbol> {
    let reference = workspace.find_reference(&item.uri, item.selection_range.start)?;
    reference.to.is_method().then_some(reference.to)
}

pub fn incoming_calls(workspace: &Workspace, item: &CallHierarchyItem) -> Option<Vec<CallHierarchyIncomingCall>> {
    let method = item_method(workspace, item)?;

    let mut callers: IndexMap<(Url, u32, u32), (SourceSymbol, Vec<Range>)> = IndexMap::new();
    for reference in workspace.get_references_to(&method) {
        callers
            .entry(symbol_key(&reference.from))
            .or_insert_with(|| (reference.from.clone(), Vec::new()))
            .1
            .push(reference.selection_range);
    }

    Some(
        callers
            .into_values()
            .map(|(from, from_ranges)| CallHierarchyIncomingCall {
                from: call_hierarchy_item(&from),
                from_ranges,
            })
            .collect(),
    )
}

pub fn outgoing_calls(workspace: &Workspace, item: &CallHierarchyItem) -> Option<Vec<CallHierarchyOutgoingCall>> {
    let method = item_method(workspace, item)?;

    let mut callees: IndexMap<(Url, u32, u32), (SourceSymbol, Vec<Range>)> = IndexMap::new();
    for reference in workspace.get_references_from_symbol(&method) {
        if !reference.to.is_method() {
            continue;
        }
        callees
            .entry(symbol_key(&reference.to))
            .or_insert_with(|| (reference.to.clone(), Vec::new()))
            .1
            .push(reference.selection_range);
    }

    Some(
        callees
            .into_values()
            .map(|(to, from_ranges)| CallHierarchyOutgoingCall {
                to: call_hierarchy_item(&to),
                from_ranges,
            })
            .collect(),
    )
}

// ============================================================================
// Document Symbols
// ============================================================================

pub fn document_symbol(workspace: &Workspace, uri: &Url) -> Option<DocumentSymbolResponse> {
    let record = workspace.get_document(uri)?;
    let tree = record.symbol_tree()?;
    Some(DocumentSymbolResponse::Nested(collect_symbols(&tree, &tree.module().children)))
}

#[allow(deprecated)]
fn collect_symbols(tree: &SymbolTree, ids: &[symbols::SymbolId]) -> Vec<DocumentSymbol> {
    ids.iter()
        .filter_map(|id| tree.get(*id))
        .filter(|symbol| symbol.kind != symbols::SymbolKind::Annotation)
        .map(|symbol| {
            let children = collect_symbols(tree, &symbol.children);
            DocumentSymbol {
                name: symbol.name.clone(),
                detail: symbol.export.then(|| String::from("Экспорт")),
                kind: lsp_symbol_kind(symbol.kind),
                tags: None,
                deprecated: None,
                range: symbol.range,
                selection_range: symbol.selection_range,
                children: (!children.is_empty()).then_some(children),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    const LIBRARY: &str = "Процедура Calc() Экспорт\n\tПомощник();\nКонецПроцедуры\n\nПроцедура Помощник()\nКонецПроцедуры\n";
    const CALLER: &str = "Процедура Первый()\n\tОбщий.Calc();\n\tОбщий.Calc();\nКонецПроцедуры\nПроцедура Второй()\n\tОбщий.Calc();\nКонецПроцедуры\n";

    fn uri(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    fn fixture() -> (Workspace, Url, Url) {
        let workspace = Workspace::new(None, ServerConfig::default());
        let library = uri("/src/CommonModules/Общий/Ext/Module.bsl");
        let caller = uri("/src/CommonModules/Клиент/Ext/Module.bsl");
        workspace.populate(vec![
            (library.clone(), LIBRARY.to_string()),
            (caller.clone(), CALLER.to_string()),
        ]);
        (workspace, library, caller)
    }

    fn span(line: u32, start: u32, end: u32) -> Range {
        Range::new(Position::new(line, start), Position::new(line, end))
    }

    #[test]
    fn test_definition_from_usage() {
        let (workspace, library, caller) = fixture();
        let Some(GotoDefinitionResponse::Scalar(location)) = goto_definition(&workspace, &caller, Position::new(5, 9))
        else {
            panic!("expected a single location");
        };
        assert_eq!(location, Location::new(library, span(0, 10, 14)));
    }

    #[test]
    fn test_references_with_and_without_declaration() {
        let (workspace, library, caller) = fixture();
        let with = references(&workspace, &library, Position::new(0, 11), true).unwrap();
        assert_eq!(with.len(), 4);
        assert_eq!(with[0], Location::new(library.clone(), span(0, 10, 14)));
        assert!(with.contains(&Location::new(caller.clone(), span(2, 7, 11))));

        let without = references(&workspace, &library, Position::new(0, 11), false).unwrap();
        assert_eq!(without.len(), 3);
        assert!(without.iter().all(|l| l.uri == caller));
    }

    #[test]
    fn test_prepare_rename_only_for_methods_and_variables() {
        let (workspace, _, caller) = fixture();
        assert_eq!(
            prepare_rename(&workspace, &caller, Position::new(1, 8)),
            Some(PrepareRenameResponse::Range(span(1, 7, 11)))
        );
        // Module name
        assert!(prepare_rename(&workspace, &caller, Position::new(1, 3)).is_none());
        // Keyword
        assert!(prepare_rename(&workspace, &caller, Position::new(3, 2)).is_none());
    }

    #[test]
    fn test_rename_groups_edits_by_document() {
        let (workspace, library, caller) = fixture();
        let edit = rename(&workspace, &caller, Position::new(1, 8), "Расчет").unwrap();
        let changes = edit.changes.unwrap();
        assert_eq!(changes[&library], vec![TextEdit::new(span(0, 10, 14), "Расчет".into())]);
        assert_eq!(changes[&caller].len(), 3);
        assert!(changes[&caller].iter().all(|e| e.new_text == "Расчет"));
    }

    #[test]
    fn test_rename_local_variable() {
        let workspace = Workspace::new(None, ServerConfig::default());
        let file = uri("/src/CommonModules/Общий/Ext/Module.bsl");
        workspace.add_document(&file, "Процедура П()\n\tА = 1;\n\tБ = А;\nКонецПроцедуры\n");

        let edit = rename(&workspace, &file, Position::new(2, 5), "Сумма").unwrap();
        let mut ranges: Vec<Range> = edit.changes.unwrap()[&file].iter().map(|e| e.range).collect();
        ranges.sort_by_key(|r| (r.start.line, r.start.character));
        assert_eq!(ranges, vec![span(1, 1, 2), span(2, 5, 6)]);
    }

    #[test]
    fn test_rename_rejects_invalid_names() {
        let (workspace, _, caller) = fixture();
        assert!(rename(&workspace, &caller, Position::new(1, 8), "").is_none());
        assert!(rename(&workspace, &caller, Position::new(1, 8), "1abc").is_none());
        assert!(rename(&workspace, &caller, Position::new(1, 8), "a b").is_none());
    }

    #[test]
    fn test_incoming_calls_grouped_by_caller() {
        let (workspace, library, _) = fixture();
        let items = prepare_call_hierarchy(&workspace, &library, Position::new(0, 11)).unwrap();
        assert_eq!(items[0].name, "Calc");

        let calls = incoming_calls(&workspace, &items[0]).unwrap();
        let summary: Vec<(&str, usize)> = calls.iter().map(|c| (c.from.name.as_str(), c.from_ranges.len())).collect();
        assert_eq!(summary.len(), 2);
        assert!(summary.contains(&("Первый", 2)));
        assert!(summary.contains(&("Второй", 1)));
    }

    #[test]
    fn test_outgoing_calls_list_method_targets() {
        let (workspace, library, _) = fixture();
        let items = prepare_call_hierarchy(&workspace, &library, Position::new(0, 11)).unwrap();
        let calls = outgoing_calls(&workspace, &items[0]).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to.name, "Помощник");
        assert_eq!(calls[0].from_ranges, vec![span(1, 1, 9)]);
    }

    #[test]
    fn test_document_symbols_are_nested() {
        let workspace = Workspace::new(None, ServerConfig::default());
        let file = uri("/src/CommonModules/Общий/Ext/Module.bsl");
        workspace.add_document(
            &file,
            "#Область Публичные\nПроцедура А() Экспорт\n\tПерем Б;\nКонецПроцедуры\n#КонецОбласти\n",
        );
        let Some(DocumentSymbolResponse::Nested(symbols)) = document_symbol(&workspace, &file) else {
            panic!("expected nested symbols");
        };
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].kind, SymbolKind::NAMESPACE);
        let methods = symbols[0].children.as_ref().unwrap();
        assert_eq!(methods[0].name, "А");
        assert_eq!(methods[0].detail.as_deref(), Some("Экспорт"));
        assert_eq!(methods[0].children.as_ref().unwrap()[0].name, "Б");
    }

    #[test]
    fn test_unknown_document_yields_none() {
        let (workspace, _, _) = fixture();
        let missing = uri("/src/Missing.bsl");
        assert!(goto_definition(&workspace, &missing, Position::new(0, 0)).is_none());
        assert!(document_symbol(&workspace, &missing).is_none());
    }
}
