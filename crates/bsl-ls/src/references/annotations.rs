//
// references/annotations.rs
//
// OneScript annotations declared by class constructors
//

use dashmap::DashMap;
use indexmap::IndexMap;
use tower_lsp::lsp_types::Url;

use crate::document::DocumentRecord;
use crate::metadata::is_onescript;
use crate::symbols::{SourceSymbol, SymbolKind};

const CONSTRUCTOR_NAMES: &[&str] = &["ПриСозданииОбъекта", "OnObjectCreate"];
const ANNOTATION_MARKERS: &[&str] = &["аннотация", "annotation"];

/// Annotation names declared by OneScript classes
///
/// A class declares annotation `Имя` by marking its constructor with
/// `&Аннотация("Имя")`. Lookups ignore case. When several classes declare
/// the same name the earliest registered one answers lookups.
#[derive(Debug, Default)]
pub struct AnnotationRegistry {
    /// Lowercased annotation name -> declaring class -> its constructor
    by_name: DashMap<String, IndexMap<Url, SourceSymbol>>,
    by_uri: DashMap<Url, Vec<String>>,
}

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the annotations declared by `record`, dropping its previous
    /// registrations first
    pub fn refresh(&self, record: &DocumentRecord) {
        let uri = record.uri();
        self.remove(uri);
        if !is_onescript(uri) {
            return;
        }
        let Some(tree) = record.symbol_tree() else {
            return;
        };
        let Some(constructor) = CONSTRUCTOR_NAMES.iter().find_map(|name| tree.method_by_name(name)) else {
            return;
        };
        let Some(info) = constructor.method_info() else {
            return;
        };

        let mut registered = Vec::new();
        for annotation in &info.annotations {
            if !ANNOTATION_MARKERS.contains(&annotation.name.to_lowercase().as_str()) {
                continue;
            }
            let Some(name) = annotation.params.iter().find_map(|(_, value)| value.clone()) else {
                continue;
            };
            let Some(mut symbol) = tree.source_symbol(constructor.id, uri, record.module_info()) else {
                continue;
            };
            symbol.kind = SymbolKind::Annotation;
            symbol.name = name.clone();
            symbol.exported = true;

            let key = name.to_lowercase();
            let mut declarers = self.by_name.entry(key.clone()).or_default();
            if let Some((first, _)) = declarers.first() {
                if first != uri {
                    log::warn!("Annotation {} declared by {} and {}", name, first, uri);
                }
            }
            declarers.insert(uri.clone(), symbol);
            registered.push(key);
        }

        if !registered.is_empty() {
            log::trace!("Registered annotations {:?} from {}", registered, uri);
            self.by_uri.insert(uri.clone(), registered);
        }
    }

    /// Drop the annotations declared by `uri`
    pub fn remove(&self, uri: &Url) {
        if let Some((_, names)) = self.by_uri.remove(uri) {
            for name in names {
                if let Some(mut declarers) = self.by_name.get_mut(&name) {
                    declarers.shift_remove(uri);
                }
                self.by_name.remove_if(&name, |_, declarers| declarers.is_empty());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SourceSymbol> {
        self.by_name
            .get(&name.to_lowercase())
            .and_then(|declarers| declarers.values().next().cloned())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn clear(&self) {
        self.by_name.clear();
        self.by_uri.clear();
    }
}
