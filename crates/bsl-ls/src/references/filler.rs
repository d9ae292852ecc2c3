//
// references/filler.rs
//
// Walks a rebuilt document and records its outbound usages
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tower_lsp::lsp_types::Range;

use super::index::Revision;
use super::{ReferenceIndex, SymbolKey, Usage};
use crate::document::DocumentRecord;
use crate::metadata::{ModuleInfo, ModuleKind, ProjectMetadata};
use crate::parser::{Node, NodeKind, ParseTree};
use crate::symbols::{Symbol, SymbolTree};

/// Refreshes a document's contribution to the reference index
pub struct ReferenceIndexFiller {
    index: Arc<ReferenceIndex>,
    metadata: Arc<dyn ProjectMetadata>,
    /// Module kinds a qualified call may target and still be indexed
    indexed_kinds: RwLock<Vec<ModuleKind>>,
    /// Bumped whenever a new module becomes resolvable
    epoch: AtomicU64,
}

impl ReferenceIndexFiller {
    pub fn new(index: Arc<ReferenceIndex>, metadata: Arc<dyn ProjectMetadata>, indexed_kinds: Vec<ModuleKind>) -> Self {
        Self {
            index,
            metadata,
            indexed_kinds: RwLock::new(indexed_kinds),
            epoch: AtomicU64::new(0),
        }
    }

    /// Mark usages collected so far as possibly incomplete: qualifiers
    /// may now resolve to a module that was unknown before
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_indexed_kinds(&self, kinds: Vec<ModuleKind>) {
        if let Ok(mut current) = self.indexed_kinds.write() {
            *current = kinds;
        }
    }

    /// Replace the index entries of `record` with usages from its current
    /// content; a document without content contributes nothing
    ///
    /// # Returns
    /// Number of usages recorded
    pub fn fill(&self, record: &DocumentRecord) -> usize {
        // Read before the trees so a batch never claims a newer epoch than
        // the metadata it saw
        let epoch = self.epoch.load(Ordering::Acquire);
        let (generation, trees) = record.artifacts();
        let revision = Revision { generation, epoch };
        let Some((tree, symbols)) = trees else {
            self.index.replace_references(record, revision, Vec::new());
            return 0;
        };
        let kinds = self
            .indexed_kinds
            .read()
            .map(|kinds| kinds.clone())
            .unwrap_or_default();
        let usages = collect_usages(&tree, &symbols, record.module_info(), self.metadata.as_ref(), &kinds);
        let count = usages.len();
        if self.index.replace_references(record, revision, usages) {
            count
        } else {
            0
        }
    }
}

/// Every method call and variable usage in a module, in source order
///
/// Unqualified calls count only when the module declares the method.
/// Qualified calls count when the qualifier resolves to a project module of
/// one of `indexed_kinds`.
pub fn collect_usages(
    tree: &ParseTree,
    symbols: &SymbolTree,
    info: &ModuleInfo,
    metadata: &dyn ProjectMetadata,
    indexed_kinds: &[ModuleKind],
) -> Vec<Usage> {
    let mut collector = UsageCollector {
        symbols,
        info,
        metadata,
        indexed_kinds,
        usages: Vec::new(),
    };
    let module_scope = Scope {
        method: "",
        has_errors: false,
    };
    for item in &tree.root.children {
        collector.visit(item, module_scope);
    }
    collector.usages
}

#[derive(Clone, Copy)]
struct Scope<'t> {
    /// Enclosing method name, "" in the module body
    method: &'t str,
    /// Variables of a method with parse errors resolve in module scope
    has_errors: bool,
}

struct UsageCollector<'a> {
    symbols: &'a SymbolTree,
    info: &'a ModuleInfo,
    metadata: &'a dyn ProjectMetadata,
    indexed_kinds: &'a [ModuleKind],
    usages: Vec<Usage>,
}

impl<'a> UsageCollector<'a> {
    fn visit<'t>(&mut self, node: &'t Node, scope: Scope<'t>) {
        match &node.kind {
            NodeKind::Sub(decl) => {
                let inner = Scope {
                    method: &decl.name,
                    has_errors: node.contains_errors(),
                };
                for child in &node.children {
                    if !matches!(child.kind, NodeKind::Param { .. } | NodeKind::Annotation { .. }) {
                        self.visit(child, inner);
                    }
                }
                return;
            }
            NodeKind::Annotation { .. } | NodeKind::Preprocessor { .. } => return,
            NodeKind::GlobalMethodCall { name, name_range } => self.record_local_call(name, *name_range),
            NodeKind::ComplexIdentifier => self.record_qualified_call(&node.children, scope),
            NodeKind::LValue { name } => {
                self.record_qualified_call(&node.children, scope);
                if let (Some(name), Some((base, accessors))) = (name, node.children.split_first()) {
                    self.record_variable(name, base.range, true, scope);
                    for accessor in accessors {
                        self.visit(accessor, scope);
                    }
                    return;
                }
            }
            NodeKind::Identifier { name } => self.record_variable(name, node.range, false, scope),
            NodeKind::LoopVariable { name } => self.record_variable(name, node.range, true, scope),
            _ => {}
        }
        for child in &node.children {
            self.visit(child, scope);
        }
    }

    fn lookup_variable(&self, name: &str, scope: Scope<'_>) -> Option<&'a Symbol> {
        if !scope.method.is_empty() && !scope.has_errors {
            if let Some(symbol) = self.symbols.variable_by_name(name, scope.method) {
                return Some(symbol);
            }
        }
        self.symbols.variable_by_name(name, "")
    }

    fn record_variable(&mut self, name: &str, range: Range, is_write: bool, scope: Scope<'_>) {
        let Some(symbol) = self.lookup_variable(name, scope) else {
            return;
        };
        if symbol.selection_range == range {
            return;
        }
        let owner = self.symbols.scope_of(symbol.id);
        self.usages.push(Usage {
            key: SymbolKey::variable(&self.info.mdo_ref, self.info.kind, owner, &symbol.name),
            range,
            is_write,
        });
    }

    fn record_local_call(&mut self, name: &str, range: Range) {
        let Some(method) = self.symbols.method_by_name(name) else {
            return;
        };
        self.usages.push(Usage {
            key: SymbolKey::method(&self.info.mdo_ref, self.info.kind, &method.name),
            range,
            is_write: false,
        });
    }

    /// `Qualifier.Segments.Method(...)` where the qualifier names a module
    fn record_qualified_call(&mut self, children: &[Node], scope: Scope<'_>) {
        let Some((base, accessors)) = children.split_first() else {
            return;
        };
        let NodeKind::Identifier { name } = &base.kind else {
            return;
        };
        if self.lookup_variable(name, scope).is_some() {
            return;
        }

        let mut segments = vec![name.as_str()];
        for accessor in accessors {
            match &accessor.kind {
                NodeKind::AccessProperty { name } => segments.push(name),
                NodeKind::AccessCall { name, name_range } => {
                    let Some((consumed, object)) = self.metadata.resolve_qualifier(&segments) else {
                        return;
                    };
                    if consumed != segments.len() {
                        return;
                    }
                    let Some(kind) = object.kinds.iter().find(|k| self.indexed_kinds.contains(k)) else {
                        log::trace!("Not indexing call of {} in {}: module kind not indexed", name, object.mdo_ref);
                        return;
                    };
                    self.usages.push(Usage {
                        key: SymbolKey::method(&object.mdo_ref, *kind, name),
                        range: *name_range,
                        is_write: false,
                    });
                    return;
                }
                _ => return,
            }
        }
    }
}
