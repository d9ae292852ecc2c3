//
// references/resolver.rs
//
// Ordered chain of reference finders
//

use std::sync::Arc;

use tower_lsp::lsp_types::{Position, Url};

use super::finders::{AnnotationFinder, DeclarationFinder, IndexFinder, ModuleReferenceFinder};
use super::{AnnotationRegistry, Reference, ReferenceIndex};
use crate::document_store::DocumentStore;

/// One strategy for turning a position into a reference
pub trait ReferenceFinder: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference>;
}

/// Tries finders in order; the first hit wins
pub struct ReferenceResolver {
    finders: Vec<Box<dyn ReferenceFinder>>,
}

impl ReferenceResolver {
    pub fn new(finders: Vec<Box<dyn ReferenceFinder>>) -> Self {
        Self { finders }
    }

    /// Declarations, then indexed usages, then annotations, then module
    /// and class names
    pub fn standard(
        store: Arc<DocumentStore>,
        index: Arc<ReferenceIndex>,
        annotations: Arc<AnnotationRegistry>,
    ) -> Self {
        Self::new(vec![
            Box::new(DeclarationFinder::new(Arc::clone(&store))),
            Box::new(IndexFinder::new(index)),
            Box::new(AnnotationFinder::new(Arc::clone(&store), annotations)),
            Box::new(ModuleReferenceFinder::new(store)),
        ])
    }

    pub fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        self.finders.iter().find_map(|finder| {
            let found = finder.find_reference(uri, position);
            if found.is_some() {
                log::trace!("{} resolved {}:{}:{}", finder.name(), uri, position.line, position.character);
            }
            found
        })
    }

    pub fn finder_names(&self) -> Vec<&'static str> {
        self.finders.iter().map(|f| f.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ModuleKind;
    use crate::references::OccurrenceType;
    use crate::symbols::{SourceSymbol, SymbolKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower_lsp::lsp_types::Range;

    struct Fixed {
        name: &'static str,
        answer: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl ReferenceFinder for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let target = self.answer?;
            let range = Range::new(position, position);
            let symbol = SourceSymbol {
                uri: uri.clone(),
                mdo_ref: "CommonModule.Общий".into(),
                module_kind: ModuleKind::CommonModule,
                kind: SymbolKind::Method,
                name: target.into(),
                range,
                selection_range: range,
                exported: true,
                scope: String::new(),
            };
            Some(Reference {
                from: symbol.clone(),
                to: symbol,
                uri: uri.clone(),
                selection_range: range,
                occurrence_type: OccurrenceType::Usage,
                is_write: false,
            })
        }
    }

    fn finder(name: &'static str, answer: Option<&'static str>, calls: &Arc<AtomicUsize>) -> Box<dyn ReferenceFinder> {
        Box::new(Fixed {
            name,
            answer,
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_first_hit_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ReferenceResolver::new(vec![
            finder("пусто", None, &calls),
            finder("первый", Some("А"), &calls),
            finder("второй", Some("Б"), &calls),
        ]);
        let uri = Url::parse("file:///a.bsl").unwrap();
        let found = resolver.find_reference(&uri, Position::new(0, 0)).unwrap();
        assert_eq!(found.to.name, "А");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_hit_returns_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ReferenceResolver::new(vec![finder("пусто", None, &calls)]);
        let uri = Url::parse("file:///a.bsl").unwrap();
        assert!(resolver.find_reference(&uri, Position::new(3, 1)).is_none());
        assert_eq!(resolver.finder_names(), vec!["пусто"]);
    }
}
