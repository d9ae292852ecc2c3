//
// references/mod.rs
//
// Cross-file reference index, its filler and the resolver chain
//

pub mod annotations;
pub mod filler;
pub mod finders;
pub mod index;
pub mod resolver;

use tower_lsp::lsp_types::{Location, Range, Url};

use crate::metadata::ModuleKind;
use crate::symbols::{SourceSymbol, SymbolKind};

pub use annotations::AnnotationRegistry;
pub use filler::ReferenceIndexFiller;
pub use index::{ReferenceIndex, ReferenceIndexMetrics, Revision};
pub use resolver::{ReferenceFinder, ReferenceResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceType {
    /// The symbol's own declaration
    Definition,
    Usage,
}

/// A resolved occurrence of `to` inside `from`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Symbol the occurrence sits in
    pub from: SourceSymbol,
    /// Symbol the occurrence names
    pub to: SourceSymbol,
    pub uri: Url,
    pub selection_range: Range,
    pub occurrence_type: OccurrenceType,
    pub is_write: bool,
}

impl Reference {
    pub fn location(&self) -> Location {
        Location::new(self.uri.clone(), self.selection_range)
    }

    pub fn is_cross_document(&self) -> bool {
        self.from.uri != self.to.uri
    }

    /// Cross-document references only reach exported symbols
    pub fn is_accessible(&self) -> bool {
        !self.is_cross_document() || self.to.exported
    }
}

/// Identity of an indexed symbol
///
/// Object reference and names are lowercased so lookups ignore case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    Method {
        mdo_ref: String,
        module_kind: ModuleKind,
        name: String,
    },
    Variable {
        mdo_ref: String,
        module_kind: ModuleKind,
        /// Owning method, "" for module scope
        scope: String,
        name: String,
    },
}

impl SymbolKey {
    pub fn method(mdo_ref: &str, module_kind: ModuleKind, name: &str) -> Self {
        SymbolKey::Method {
            mdo_ref: mdo_ref.to_lowercase(),
            module_kind,
            name: name.to_lowercase(),
        }
    }

    pub fn variable(mdo_ref: &str, module_kind: ModuleKind, scope: &str, name: &str) -> Self {
        SymbolKey::Variable {
            mdo_ref: mdo_ref.to_lowercase(),
            module_kind,
            scope: scope.to_lowercase(),
            name: name.to_lowercase(),
        }
    }

    /// Key of a method or variable; other symbol kinds are not indexed
    pub fn for_symbol(symbol: &SourceSymbol) -> Option<Self> {
        match symbol.kind {
            SymbolKind::Method => Some(Self::method(&symbol.mdo_ref, symbol.module_kind, &symbol.name)),
            SymbolKind::Variable => Some(Self::variable(
                &symbol.mdo_ref,
                symbol.module_kind,
                &symbol.scope,
                &symbol.name,
            )),
            _ => None,
        }
    }

    pub fn mdo_ref(&self) -> &str {
        match self {
            SymbolKey::Method { mdo_ref, .. } | SymbolKey::Variable { mdo_ref, .. } => mdo_ref,
        }
    }

    pub fn module_kind(&self) -> ModuleKind {
        match self {
            SymbolKey::Method { module_kind, .. } | SymbolKey::Variable { module_kind, .. } => *module_kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SymbolKey::Method { name, .. } | SymbolKey::Variable { name, .. } => name,
        }
    }
}

/// One outbound occurrence recorded for a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub key: SymbolKey,
    pub range: Range,
    pub is_write: bool,
}
