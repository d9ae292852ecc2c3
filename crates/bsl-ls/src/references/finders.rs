//
// references/finders.rs
//
// Reference finders used by the resolver chain
//

use std::sync::Arc;

use tower_lsp::lsp_types::{Position, Range, Url};

use super::{AnnotationRegistry, OccurrenceType, Reference, ReferenceFinder, ReferenceIndex};
use crate::document::DocumentRecord;
use crate::document_store::DocumentStore;
use crate::metadata::is_onescript;
use crate::parser::NodeKind;
use crate::symbols::{SourceSymbol, SymbolId, SymbolKind, SymbolTree, MODULE_SYMBOL};
use crate::utf16::range_contains;

/// Nearest ancestor of `id` that is not a region
fn owner_of(tree: &SymbolTree, id: SymbolId) -> SymbolId {
    let mut current = tree.get(id).and_then(|s| s.parent);
    while let Some(parent_id) = current {
        match tree.get(parent_id) {
            Some(parent) if parent.kind == SymbolKind::Region => current = parent.parent,
            Some(_) => return parent_id,
            None => break,
        }
    }
    MODULE_SYMBOL
}

/// Symbol of `record` enclosing `position`
fn enclosing(record: &DocumentRecord, position: Position) -> Option<SourceSymbol> {
    let tree = record.symbol_tree()?;
    let symbol = tree.enclosing_symbol(position);
    tree.source_symbol(symbol.id, record.uri(), record.module_info())
}

/// Module symbol of a whole document, named `name`
fn module_symbol(record: &DocumentRecord, name: &str) -> Option<SourceSymbol> {
    let tree = record.symbol_tree()?;
    let mut symbol = tree.source_symbol(MODULE_SYMBOL, record.uri(), record.module_info())?;
    symbol.name = name.to_string();
    // Modules are reachable from anywhere
    symbol.exported = true;
    Some(symbol)
}

// ============================================================================
// Declarations
// ============================================================================

/// A position on a method or variable name where it is declared
pub struct DeclarationFinder {
    store: Arc<DocumentStore>,
}

impl DeclarationFinder {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

impl ReferenceFinder for DeclarationFinder {
    fn name(&self) -> &'static str {
        "declaration"
    }

    fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        let record = self.store.get(uri)?;
        let tree = record.symbol_tree()?;
        let symbol = tree.symbol_at(position)?;
        if !matches!(symbol.kind, SymbolKind::Method | SymbolKind::Variable) {
            return None;
        }
        let to = tree.source_symbol(symbol.id, uri, record.module_info())?;
        let from = tree.source_symbol(owner_of(&tree, symbol.id), uri, record.module_info())?;
        Some(Reference {
            from,
            to,
            uri: uri.clone(),
            selection_range: symbol.selection_range,
            occurrence_type: OccurrenceType::Definition,
            is_write: false,
        })
    }
}

// ============================================================================
// Indexed usages
// ============================================================================

pub struct IndexFinder {
    index: Arc<ReferenceIndex>,
}

impl IndexFinder {
    pub fn new(index: Arc<ReferenceIndex>) -> Self {
        Self { index }
    }
}

impl ReferenceFinder for IndexFinder {
    fn name(&self) -> &'static str {
        "index"
    }

    fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        self.index.get_reference(uri, position)
    }
}

// ============================================================================
// Annotations
// ============================================================================

/// `&Name` in a OneScript module, resolved to the class declaring it
pub struct AnnotationFinder {
    store: Arc<DocumentStore>,
    registry: Arc<AnnotationRegistry>,
}

impl AnnotationFinder {
    pub fn new(store: Arc<DocumentStore>, registry: Arc<AnnotationRegistry>) -> Self {
        Self { store, registry }
    }
}

impl ReferenceFinder for AnnotationFinder {
    fn name(&self) -> &'static str {
        "annotation"
    }

    fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        if !is_onescript(uri) {
            return None;
        }
        let record = self.store.get(uri)?;
        let tree = record.parse_tree()?;
        let (name, name_range) = tree
            .root
            .path_to(position)
            .into_iter()
            .rev()
            .find_map(|node| match &node.kind {
                NodeKind::Annotation { name, name_range } => Some((name.clone(), *name_range)),
                _ => None,
            })?;
        if !range_contains(&name_range, position) {
            return None;
        }

        let to = self.registry.get(&name)?;
        let from = enclosing(&record, position)?;
        Some(Reference {
            from,
            to,
            uri: uri.clone(),
            selection_range: name_range,
            occurrence_type: OccurrenceType::Usage,
            is_write: false,
        })
    }
}

// ============================================================================
// Module and class names
// ============================================================================

/// Qualifiers naming a project module (`ОбщийМодуль`, `Справочники.Товары`)
/// and class names after `Новый`
pub struct ModuleReferenceFinder {
    store: Arc<DocumentStore>,
}

impl ModuleReferenceFinder {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    fn reference_to(
        &self,
        record: &DocumentRecord,
        position: Position,
        target: &DocumentRecord,
        name: &str,
        selection_range: Range,
    ) -> Option<Reference> {
        Some(Reference {
            from: enclosing(record, position)?,
            to: module_symbol(target, name)?,
            uri: record.uri().clone(),
            selection_range,
            occurrence_type: OccurrenceType::Usage,
            is_write: false,
        })
    }
}

impl ReferenceFinder for ModuleReferenceFinder {
    fn name(&self) -> &'static str {
        "module"
    }

    fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        let record = self.store.get(uri)?;
        let tree = record.parse_tree()?;
        let metadata = self.store.metadata();

        for node in tree.root.path_to(position).into_iter().rev() {
            match &node.kind {
                NodeKind::NewExpression {
                    type_name: Some(type_name),
                    type_range: Some(type_range),
                } if range_contains(type_range, position) => {
                    let class_uri = metadata.class_module(type_name)?;
                    let target = self.store.get(&class_uri)?;
                    return self.reference_to(&record, position, &target, type_name, *type_range);
                }
                NodeKind::ComplexIdentifier | NodeKind::LValue { .. } => {
                    let (base, accessors) = node.children.split_first()?;
                    let NodeKind::Identifier { name } = &base.kind else {
                        return None;
                    };
                    let mut segments = vec![name.as_str()];
                    let mut ranges = vec![base.range];
                    for accessor in accessors {
                        let NodeKind::AccessProperty { name } = &accessor.kind else {
                            break;
                        };
                        segments.push(name);
                        ranges.push(accessor.range);
                    }
                    let hit = ranges.iter().position(|r| range_contains(r, position))?;
                    let (consumed, object) = metadata.resolve_qualifier(&segments)?;
                    if hit >= consumed {
                        return None;
                    }
                    let target = object
                        .kinds
                        .iter()
                        .find_map(|kind| self.store.get_by_mdo_ref(&object.mdo_ref, *kind))?;
                    let selection_range = Range::new(ranges[0].start, ranges[consumed - 1].end);
                    return self.reference_to(&record, position, &target, &object.mdo_ref, selection_range);
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ConfigurationLayout, ModuleKind};
    use crate::references::{ReferenceIndexFiller, ReferenceResolver};

    const COMMON: &str = "Процедура Расчет() Экспорт\nКонецПроцедуры\n";
    const CALLER: &str = "Процедура Вызов()\n\tОбщий.Расчет();\n\tТовар = Справочники.Товары.Создать();\nКонецПроцедуры\n";
    const MANAGER: &str = "Функция Создать() Экспорт\n\tВозврат 1;\nКонецФункции\n";
    const CLASS: &str = "&Аннотация(\"Желудь\")\nПроцедура ПриСозданииОбъекта()\nКонецПроцедуры\n";
    const SCRIPT: &str = "&Желудь\nПроцедура Настроить()\n\tВалидатор = Новый Желудь();\nКонецПроцедуры\n";

    struct Fixture {
        resolver: ReferenceResolver,
        caller: Url,
        common: Url,
        manager: Url,
        class: Url,
        script: Url,
    }

    fn uri(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(DocumentStore::new(Arc::new(ConfigurationLayout::new())));
        let index = Arc::new(ReferenceIndex::new(Arc::clone(&store)));
        let annotations = Arc::new(AnnotationRegistry::new());
        let filler = ReferenceIndexFiller::new(
            Arc::clone(&index),
            Arc::clone(store.metadata()),
            vec![ModuleKind::CommonModule, ModuleKind::ManagerModule, ModuleKind::Unknown],
        );

        let common = uri("/src/CommonModules/Общий/Ext/Module.bsl");
        let caller = uri("/src/CommonModules/Клиент/Ext/Module.bsl");
        let manager = uri("/src/Catalogs/Товары/Ext/ManagerModule.bsl");
        let class = uri("/src/oscript/Классы/Желудь.os");
        let script = uri("/src/oscript/main.os");
        for (file, content) in [
            (&common, COMMON),
            (&caller, CALLER),
            (&manager, MANAGER),
            (&class, CLASS),
            (&script, SCRIPT),
        ] {
            store.add(file, content, 1);
        }
        for record in store.documents() {
            filler.fill(&record);
            annotations.refresh(&record);
        }

        Fixture {
            resolver: ReferenceResolver::standard(store, index, annotations),
            caller,
            common,
            manager,
            class,
            script,
        }
    }

    #[test]
    fn test_declaration_wins() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.common, Position::new(0, 12)).unwrap();
        assert_eq!(found.occurrence_type, OccurrenceType::Definition);
        assert_eq!(found.to.name, "Расчет");
        assert_eq!(found.from.kind, SymbolKind::Module);
    }

    #[test]
    fn test_indexed_call_site() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.caller, Position::new(1, 9)).unwrap();
        assert_eq!(found.occurrence_type, OccurrenceType::Usage);
        assert_eq!(found.to.uri, fx.common);
        assert_eq!(found.from.name, "Вызов");
        assert_eq!(found.selection_range, Range::new(Position::new(1, 7), Position::new(1, 13)));
    }

    #[test]
    fn test_common_module_qualifier() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.caller, Position::new(1, 2)).unwrap();
        assert_eq!(found.to.kind, SymbolKind::Module);
        assert_eq!(found.to.uri, fx.common);
        assert_eq!(found.selection_range, Range::new(Position::new(1, 1), Position::new(1, 6)));
    }

    #[test]
    fn test_manager_qualifier_covers_both_segments() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.caller, Position::new(2, 22)).unwrap();
        assert_eq!(found.to.uri, fx.manager);
        assert_eq!(found.to.name, "Catalog.Товары");
        assert_eq!(found.selection_range, Range::new(Position::new(2, 9), Position::new(2, 27)));
    }

    #[test]
    fn test_manager_method_call() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.caller, Position::new(2, 30)).unwrap();
        assert_eq!(found.to.name, "Создать");
        assert_eq!(found.to.module_kind, ModuleKind::ManagerModule);
    }

    #[test]
    fn test_new_class_resolves_to_class_module() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.script, Position::new(2, 21)).unwrap();
        assert_eq!(found.to.uri, fx.class);
        assert_eq!(found.to.name, "Желудь");
    }

    #[test]
    fn test_annotation_usage_resolves_to_declaring_class() {
        let fx = fixture();
        let found = fx.resolver.find_reference(&fx.script, Position::new(0, 3)).unwrap();
        assert_eq!(found.to.kind, SymbolKind::Annotation);
        assert_eq!(found.to.uri, fx.class);
        assert_eq!(found.selection_range, Range::new(Position::new(0, 1), Position::new(0, 7)));
    }

    #[test]
    fn test_unknown_position_is_none() {
        let fx = fixture();
        assert!(fx.resolver.find_reference(&fx.caller, Position::new(3, 2)).is_none());
        assert!(fx
            .resolver
            .find_reference(&uri("/src/missing.bsl"), Position::new(0, 0))
            .is_none());
    }
}
