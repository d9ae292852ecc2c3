//
// symbols/builder.rs
//
// Walks a parse tree into a SymbolTree
//

use std::collections::HashSet;

use tower_lsp::lsp_types::Range;

use super::{
    AnnotationInfo, MethodInfo, Symbol, SymbolDetail, SymbolId, SymbolKind, SymbolTree,
    VariableKind, MODULE_SYMBOL,
};
use crate::parser::{Node, NodeKind, ParseTree};

/// Build the symbol tree of a parsed module
pub fn build_symbol_tree(tree: &ParseTree) -> SymbolTree {
    let mut module_vars = HashSet::new();
    collect_module_vars(&tree.root.children, &mut module_vars);

    let mut builder = Builder {
        symbols: Vec::new(),
        module_vars,
        module_implicit: HashSet::new(),
    };
    let start = tree.root.range.start;
    builder.symbols.push(Symbol {
        id: MODULE_SYMBOL,
        parent: None,
        children: Vec::new(),
        kind: SymbolKind::Module,
        name: String::new(),
        range: tree.root.range,
        selection_range: Range::new(start, start),
        export: false,
        detail: SymbolDetail::None,
    });
    builder.visit_items(&tree.root.children, MODULE_SYMBOL);

    SymbolTree::from_symbols(builder.symbols)
}

/// Names declared with module-level `Перем`, regions included
fn collect_module_vars(items: &[Node], names: &mut HashSet<String>) {
    for item in items {
        match &item.kind {
            NodeKind::ModuleVarDeclaration => {
                for var in &item.children {
                    if let NodeKind::VarName { name, .. } = &var.kind {
                        names.insert(name.to_lowercase());
                    }
                }
            }
            NodeKind::Region { .. } => collect_module_vars(&item.children, names),
            _ => {}
        }
    }
}

fn annotation_info(node: &Node) -> Option<AnnotationInfo> {
    let NodeKind::Annotation { name, .. } = &node.kind else {
        return None;
    };
    let params = node
        .children
        .iter()
        .filter_map(|child| match &child.kind {
            NodeKind::AnnotationParam { name, value } => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect();
    Some(AnnotationInfo {
        name: name.clone(),
        params,
    })
}

struct Builder {
    symbols: Vec<Symbol>,
    module_vars: HashSet<String>,
    /// Names made implicit module variables by module-body assignments
    module_implicit: HashSet<String>,
}

impl Builder {
    #[allow(clippy::too_many_arguments)]
    fn add(
        &mut self,
        parent: SymbolId,
        kind: SymbolKind,
        name: &str,
        range: Range,
        selection_range: Range,
        export: bool,
        detail: SymbolDetail,
    ) -> SymbolId {
        let id = self.symbols.len();
        self.symbols.push(Symbol {
            id,
            parent: Some(parent),
            children: Vec::new(),
            kind,
            name: name.to_string(),
            range,
            selection_range,
            export,
            detail,
        });
        if let Some(parent_symbol) = self.symbols.get_mut(parent) {
            parent_symbol.children.push(id);
        }
        id
    }

    fn add_variable(&mut self, parent: SymbolId, name: &str, range: Range, export: bool, kind: VariableKind) -> SymbolId {
        self.add(
            parent,
            SymbolKind::Variable,
            name,
            range,
            range,
            export,
            SymbolDetail::Variable(kind),
        )
    }

    fn visit_items(&mut self, items: &[Node], parent: SymbolId) {
        for item in items {
            match &item.kind {
                NodeKind::Region { name, name_range } => {
                    let id = self.add(
                        parent,
                        SymbolKind::Region,
                        name,
                        item.range,
                        *name_range,
                        false,
                        SymbolDetail::None,
                    );
                    self.visit_items(&item.children, id);
                }
                NodeKind::ModuleVarDeclaration => {
                    for var in &item.children {
                        if let NodeKind::VarName { name, export } = &var.kind {
                            self.add_variable(parent, name, var.range, *export, VariableKind::Module);
                        }
                    }
                }
                NodeKind::Sub(_) => self.visit_sub(item, parent),
                NodeKind::Annotation { .. } | NodeKind::Preprocessor { .. } | NodeKind::Error { .. } => {}
                _ => {
                    let mut declared = std::mem::take(&mut self.module_implicit);
                    self.collect_implicit(item, parent, &mut declared);
                    self.module_implicit = declared;
                }
            }
        }
    }

    fn visit_sub(&mut self, node: &Node, parent: SymbolId) {
        let NodeKind::Sub(decl) = &node.kind else {
            return;
        };

        let params: Vec<&Node> = node
            .children
            .iter()
            .filter(|c| matches!(c.kind, NodeKind::Param { .. }))
            .collect();
        let info = MethodInfo {
            is_function: decl.is_function,
            is_async: decl.is_async,
            params: params.iter().filter_map(|p| p.name().map(str::to_string)).collect(),
            annotations: node.children.iter().filter_map(annotation_info).collect(),
        };
        let method = self.add(
            parent,
            SymbolKind::Method,
            &decl.name,
            node.range,
            decl.name_range,
            decl.export,
            SymbolDetail::Method(info),
        );

        let mut declared = HashSet::new();
        for param in params {
            if let Some(name) = param.name() {
                if declared.insert(name.to_lowercase()) {
                    self.add_variable(method, name, param.range, false, VariableKind::Parameter);
                }
            }
        }
        for child in &node.children {
            match child.kind {
                NodeKind::Param { .. } | NodeKind::Annotation { .. } => {}
                _ => self.collect_implicit(child, method, &mut declared),
            }
        }
    }

    /// Declare local and implicit variables found in a statement, in source
    /// order
    fn collect_implicit(&mut self, node: &Node, scope: SymbolId, declared: &mut HashSet<String>) {
        match &node.kind {
            NodeKind::SubVarDeclaration => {
                for var in &node.children {
                    if let NodeKind::VarName { name, .. } = &var.kind {
                        if declared.insert(name.to_lowercase()) {
                            self.add_variable(scope, name, var.range, false, VariableKind::Local);
                        }
                    }
                }
                return;
            }
            NodeKind::Assignment => {
                if let Some(target) = node.children.first() {
                    if let NodeKind::LValue { name: Some(name) } = &target.kind {
                        let range = target.name_range();
                        self.declare_implicit(scope, name, range, declared);
                    }
                }
            }
            NodeKind::LoopVariable { name } => {
                self.declare_implicit(scope, name, node.range, declared);
            }
            _ => {}
        }
        for child in &node.children {
            self.collect_implicit(child, scope, declared);
        }
    }

    fn declare_implicit(&mut self, scope: SymbolId, name: &str, range: Range, declared: &mut HashSet<String>) {
        let key = name.to_lowercase();
        if self.module_vars.contains(&key) || declared.contains(&key) {
            return;
        }
        declared.insert(key);
        self.add_variable(scope, name, range, false, VariableKind::Implicit);
    }
}
