//
// symbols/mod.rs
//
// Symbol tree: module, regions, methods and variables of one document
//

mod builder;

use std::collections::HashMap;

use tower_lsp::lsp_types::{Position, Range, Url};

use crate::metadata::{ModuleInfo, ModuleKind};
use crate::utf16::range_contains;

pub use builder::build_symbol_tree;

/// Index into a `SymbolTree` arena. The module symbol is always 0.
pub type SymbolId = usize;

pub const MODULE_SYMBOL: SymbolId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Module,
    /// Namespace only; never an enclosing symbol
    Region,
    Method,
    Variable,
    Annotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Module,
    Local,
    Parameter,
    /// Created by the first assignment to an undeclared name, or a loop
    /// variable that was not declared
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationInfo {
    pub name: String,
    /// `(name, value)` pairs; positional parameters have no name
    pub params: Vec<(Option<String>, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub is_function: bool,
    pub is_async: bool,
    pub params: Vec<String>,
    pub annotations: Vec<AnnotationInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolDetail {
    None,
    Method(MethodInfo),
    Variable(VariableKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: SymbolId,
    pub parent: Option<SymbolId>,
    pub children: Vec<SymbolId>,
    pub kind: SymbolKind,
    pub name: String,
    pub range: Range,
    /// The identifying token
    pub selection_range: Range,
    pub export: bool,
    pub detail: SymbolDetail,
}

impl Symbol {
    pub fn method_info(&self) -> Option<&MethodInfo> {
        match &self.detail {
            SymbolDetail::Method(info) => Some(info),
            _ => None,
        }
    }

    pub fn variable_kind(&self) -> Option<VariableKind> {
        match self.detail {
            SymbolDetail::Variable(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Ownership tree of one document's declarations
///
/// Every non-root symbol has exactly one parent. `children_flat` yields
/// symbols in pre-order, which is stable for unchanged content.
#[derive(Debug, Clone)]
pub struct SymbolTree {
    symbols: Vec<Symbol>,
    /// Lowercased method name -> first declaration
    methods_by_name: HashMap<String, SymbolId>,
    /// (lowercased scope, lowercased name) -> first declaration
    variables_by_scope: HashMap<(String, String), SymbolId>,
}

impl SymbolTree {
    pub(crate) fn from_symbols(symbols: Vec<Symbol>) -> Self {
        let mut tree = Self {
            symbols,
            methods_by_name: HashMap::new(),
            variables_by_scope: HashMap::new(),
        };

        let mut methods = HashMap::new();
        let mut variables = HashMap::new();
        for symbol in tree.children_flat() {
            if symbol.name.is_empty() {
                continue;
            }
            match symbol.kind {
                SymbolKind::Method => {
                    methods.entry(symbol.name.to_lowercase()).or_insert(symbol.id);
                }
                SymbolKind::Variable => {
                    let scope = tree.scope_of(symbol.id).to_lowercase();
                    variables
                        .entry((scope, symbol.name.to_lowercase()))
                        .or_insert(symbol.id);
                }
                _ => {}
            }
        }
        tree.methods_by_name = methods;
        tree.variables_by_scope = variables;
        tree
    }

    pub fn module(&self) -> &Symbol {
        &self.symbols[MODULE_SYMBOL]
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.len() <= 1
    }

    /// All symbols except the module, parents before children, siblings in
    /// source order
    pub fn children_flat(&self) -> Vec<&Symbol> {
        let mut out = Vec::with_capacity(self.symbols.len());
        let mut stack: Vec<SymbolId> = self.module().children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(symbol) = self.symbols.get(id) else {
                continue;
            };
            out.push(symbol);
            stack.extend(symbol.children.iter().rev().copied());
        }
        out
    }

    pub fn methods(&self) -> Vec<&Symbol> {
        self.children_flat()
            .into_iter()
            .filter(|s| s.kind == SymbolKind::Method)
            .collect()
    }

    /// Case-insensitive method lookup
    pub fn method_by_name(&self, name: &str) -> Option<&Symbol> {
        self.methods_by_name
            .get(&name.to_lowercase())
            .and_then(|id| self.symbols.get(*id))
    }

    /// Case-insensitive variable lookup in one scope
    ///
    /// # Arguments
    /// * `name` - Variable name
    /// * `scope` - Owning method name, or "" for module scope
    pub fn variable_by_name(&self, name: &str, scope: &str) -> Option<&Symbol> {
        self.variables_by_scope
            .get(&(scope.to_lowercase(), name.to_lowercase()))
            .and_then(|id| self.symbols.get(*id))
    }

    /// Symbol whose identifying token contains `position`
    pub fn symbol_at(&self, position: Position) -> Option<&Symbol> {
        self.children_flat()
            .into_iter()
            .find(|s| s.kind != SymbolKind::Region && range_contains(&s.selection_range, position))
    }

    /// First symbol in pre-order, regions excluded, whose range contains
    /// `position`; the module when none does
    pub fn enclosing_symbol(&self, position: Position) -> &Symbol {
        self.children_flat()
            .into_iter()
            .find(|s| s.kind != SymbolKind::Region && range_contains(&s.range, position))
            .unwrap_or_else(|| self.module())
    }

    /// Method enclosing `position`, if any
    pub fn method_at(&self, position: Position) -> Option<&Symbol> {
        self.methods()
            .into_iter()
            .find(|s| range_contains(&s.range, position))
    }

    /// Name of the method owning `id`, or "" for module scope
    pub fn scope_of(&self, id: SymbolId) -> &str {
        let mut current = self.symbols.get(id).and_then(|s| s.parent);
        while let Some(parent_id) = current {
            let Some(parent) = self.symbols.get(parent_id) else {
                break;
            };
            if parent.kind == SymbolKind::Method {
                return &parent.name;
            }
            current = parent.parent;
        }
        ""
    }

    /// Snapshot of a symbol detached from this tree
    pub fn source_symbol(&self, id: SymbolId, uri: &Url, info: &ModuleInfo) -> Option<SourceSymbol> {
        let symbol = self.symbols.get(id)?;
        Some(SourceSymbol {
            uri: uri.clone(),
            mdo_ref: info.mdo_ref.clone(),
            module_kind: info.kind,
            kind: symbol.kind,
            name: symbol.name.clone(),
            range: symbol.range,
            selection_range: symbol.selection_range,
            exported: symbol.export,
            scope: self.scope_of(id).to_string(),
        })
    }
}

/// A symbol together with the document that owns it
///
/// Stays valid after the document is rebuilt; equality is by value, so a
/// snapshot taken before a rebuild equals one taken after when the
/// declaration did not move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSymbol {
    pub uri: Url,
    pub mdo_ref: String,
    pub module_kind: ModuleKind,
    pub kind: SymbolKind,
    pub name: String,
    pub range: Range,
    pub selection_range: Range,
    pub exported: bool,
    /// Owning method name, "" for module scope
    pub scope: String,
}

impl SourceSymbol {
    pub fn is_method(&self) -> bool {
        self.kind == SymbolKind::Method
    }

    pub fn is_variable(&self) -> bool {
        self.kind == SymbolKind::Variable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    const SOURCE: &str = "Перем Счетчик Экспорт;\n\
                          \n\
                          #Область Публичные\n\
                          Функция Сумма(А, Б) Экспорт\n\
                          \tРезультат = А + Б;\n\
                          \tВозврат Результат;\n\
                          КонецФункции\n\
                          #КонецОбласти\n\
                          \n\
                          Процедура Увеличить()\n\
                          \tСчетчик = Счетчик + 1;\n\
                          КонецПроцедуры\n";

    fn tree() -> SymbolTree {
        build_symbol_tree(&parse_module(SOURCE))
    }

    #[test]
    fn test_children_flat_is_pre_order() {
        let tree = tree();
        let names: Vec<_> = tree.children_flat().iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec!["Счетчик", "Публичные", "Сумма", "А", "Б", "Результат", "Увеличить"]
        );
    }

    #[test]
    fn test_method_lookup_ignores_case() {
        let tree = tree();
        let method = tree.method_by_name("сУММА").unwrap();
        assert_eq!(method.name, "Сумма");
        assert!(method.export);
        assert!(method.method_info().unwrap().is_function);
        assert_eq!(tree.methods().len(), 2);
    }

    #[test]
    fn test_variable_scopes() {
        let tree = tree();
        let local = tree.variable_by_name("результат", "Сумма").unwrap();
        assert_eq!(local.variable_kind(), Some(VariableKind::Implicit));
        assert_eq!(tree.scope_of(local.id), "Сумма");

        let module_var = tree.variable_by_name("Счетчик", "").unwrap();
        assert_eq!(module_var.variable_kind(), Some(VariableKind::Module));
        // Assigning a module variable inside a method does not shadow it
        assert!(tree.variable_by_name("Счетчик", "Увеличить").is_none());
    }

    #[test]
    fn test_enclosing_symbol_skips_regions() {
        let tree = tree();
        let inside_sum = Position::new(4, 3);
        assert_eq!(tree.enclosing_symbol(inside_sum).name, "Сумма");
        let blank_line = Position::new(8, 0);
        assert_eq!(tree.enclosing_symbol(blank_line).kind, SymbolKind::Module);
    }

    #[test]
    fn test_symbol_at_uses_selection_range() {
        let tree = tree();
        let on_name = tree.symbol_at(Position::new(3, 10)).unwrap();
        assert_eq!(on_name.name, "Сумма");
        assert!(tree.symbol_at(Position::new(4, 20)).is_none());
    }

    #[test]
    fn test_source_symbol_snapshot() {
        let tree = tree();
        let uri = Url::parse("file:///project/CommonModules/Math/Ext/Module.bsl").unwrap();
        let info = ModuleInfo {
            mdo_ref: "CommonModule.Math".into(),
            kind: ModuleKind::CommonModule,
        };
        let id = tree.variable_by_name("Результат", "Сумма").unwrap().id;
        let snapshot = tree.source_symbol(id, &uri, &info).unwrap();
        assert_eq!(snapshot.scope, "Сумма");
        assert!(snapshot.is_variable());
        assert_eq!(snapshot, tree.source_symbol(id, &uri, &info).unwrap());
    }
}
