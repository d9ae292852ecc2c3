//
// references/index.rs
//
// Project-wide index of symbol usages
//

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use tower_lsp::lsp_types::{Position, Range, Url};

use super::{OccurrenceType, Reference, SymbolKey, Usage};
use crate::document::DocumentRecord;
use crate::document_store::DocumentStore;
use crate::metadata::ModuleKind;
use crate::symbols::SourceSymbol;
use crate::utf16::range_contains;

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceIndexMetrics {
    /// Distinct target keys with at least one occurrence
    pub keys: usize,
    pub occurrences: usize,
    /// Documents with at least one recorded occurrence
    pub documents: usize,
    /// `clear_references` calls, including those made by `replace_references`
    pub clears: u64,
    /// Per-document writer locks currently allocated
    pub locks: usize,
}

/// Which state of a document a batch of usages was collected from
///
/// `generation` is the document's content generation; `epoch` counts the
/// modules that became resolvable before collection started. A batch older
/// than the one already recorded for its document is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revision {
    pub generation: u64,
    pub epoch: u64,
}

// ============================================================================
// Storage
// ============================================================================

/// Range ordered by start, then end
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct RangeKey {
    start_line: u32,
    start_character: u32,
    end_line: u32,
    end_character: u32,
}

impl From<Range> for RangeKey {
    fn from(range: Range) -> Self {
        Self {
            start_line: range.start.line,
            start_character: range.start.character,
            end_line: range.end.line,
            end_character: range.end.character,
        }
    }
}

impl From<RangeKey> for Range {
    fn from(key: RangeKey) -> Self {
        Range::new(
            Position::new(key.start_line, key.start_character),
            Position::new(key.end_line, key.end_character),
        )
    }
}

/// The four views of recorded usages. Entries of one URI are always changed
/// together under the write lock.
#[derive(Default)]
struct IndexMaps {
    /// Target key -> document -> occurrence ranges
    references_to: HashMap<SymbolKey, IndexMap<Url, Vec<Range>>>,
    /// Document -> target keys it mentions; also drives removal
    references_from: HashMap<Url, HashSet<SymbolKey>>,
    /// Document -> occurrence range -> target key
    locations: HashMap<Url, BTreeMap<RangeKey, SymbolKey>>,
    /// Same as `locations`, write occurrences only
    writes: HashMap<Url, BTreeMap<RangeKey, SymbolKey>>,
    /// Revision of the last batch recorded per document
    revisions: HashMap<Url, Revision>,
}

impl IndexMaps {
    fn insert(&mut self, uri: &Url, usage: Usage) {
        let range_key = RangeKey::from(usage.range);
        let previous = self
            .locations
            .entry(uri.clone())
            .or_default()
            .insert(range_key, usage.key.clone());
        if let Some(previous) = previous {
            self.forget_occurrence(&previous, uri, usage.range);
        }

        self.references_to
            .entry(usage.key.clone())
            .or_default()
            .entry(uri.clone())
            .or_default()
            .push(usage.range);

        if usage.is_write {
            self.writes
                .entry(uri.clone())
                .or_default()
                .insert(range_key, usage.key.clone());
        } else if let Some(writes) = self.writes.get_mut(uri) {
            writes.remove(&range_key);
        }

        self.references_from
            .entry(uri.clone())
            .or_default()
            .insert(usage.key);
    }

    fn forget_occurrence(&mut self, key: &SymbolKey, uri: &Url, range: Range) {
        let Some(by_uri) = self.references_to.get_mut(key) else {
            return;
        };
        if let Some(ranges) = by_uri.get_mut(uri) {
            ranges.retain(|r| *r != range);
            if ranges.is_empty() {
                by_uri.shift_remove(uri);
            }
        }
        if by_uri.is_empty() {
            self.references_to.remove(key);
        }
    }

    fn clear(&mut self, uri: &Url) {
        if let Some(keys) = self.references_from.remove(uri) {
            for key in keys {
                if let Some(by_uri) = self.references_to.get_mut(&key) {
                    by_uri.shift_remove(uri);
                    if by_uri.is_empty() {
                        self.references_to.remove(&key);
                    }
                }
            }
        }
        self.locations.remove(uri);
        self.writes.remove(uri);
    }

    fn forget(&mut self, uri: &Url) {
        self.clear(uri);
        self.revisions.remove(uri);
    }

    fn is_write(&self, uri: &Url, range: Range) -> bool {
        self.writes
            .get(uri)
            .is_some_and(|writes| writes.contains_key(&RangeKey::from(range)))
    }
}

// ============================================================================
// Reference Index
// ============================================================================

/// Usages of methods and variables across all documents of a workspace
///
/// Only target keys and ranges are stored. Every query resolves them again
/// against the current documents, so answers reflect the latest symbol trees
/// and occurrences whose document or target has gone are left out.
///
/// Writers of one URI are serialized by a per-URI lock; the maps themselves
/// sit behind one read-write lock so readers never see half of an update.
pub struct ReferenceIndex {
    store: Arc<DocumentStore>,
    maps: RwLock<IndexMaps>,
    uri_locks: DashMap<Url, Arc<Mutex<()>>>,
    clears: AtomicU64,
}

impl ReferenceIndex {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            maps: RwLock::new(IndexMaps::default()),
            uri_locks: DashMap::new(),
            clears: AtomicU64::new(0),
        }
    }

    fn uri_lock(&self, uri: &Url) -> Arc<Mutex<()>> {
        Arc::clone(self.uri_locks.entry(uri.clone()).or_default().value())
    }

    /// Drop the writer lock of a document that left the store, unless
    /// another writer still holds it
    fn release_uri_lock(&self, uri: &Url) {
        if !self.store.contains(uri) {
            self.uri_locks.remove_if(uri, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Record a call of `method_name` in the module `(mdo_ref, module_kind)`
    pub fn add_method_call(&self, uri: &Url, mdo_ref: &str, module_kind: ModuleKind, method_name: &str, range: Range) {
        self.add_usage(
            uri,
            Usage {
                key: SymbolKey::method(mdo_ref, module_kind, method_name),
                range,
                is_write: false,
            },
        );
    }

    /// Record a read or write of a variable declared in `scope`
    #[allow(clippy::too_many_arguments)]
    pub fn add_variable_usage(
        &self,
        uri: &Url,
        mdo_ref: &str,
        module_kind: ModuleKind,
        scope: &str,
        variable_name: &str,
        range: Range,
        is_write: bool,
    ) {
        self.add_usage(
            uri,
            Usage {
                key: SymbolKey::variable(mdo_ref, module_kind, scope, variable_name),
                range,
                is_write,
            },
        );
    }

    pub fn add_usage(&self, uri: &Url, usage: Usage) {
        let lock = self.uri_lock(uri);
        let _uri_guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Ok(mut maps) = self.maps.write() else {
            log::warn!("Reference index lock poisoned, dropping usage in {}", uri);
            return;
        };
        maps.insert(uri, usage);
    }

    /// Drop everything `record` contributed, then record `usages` collected
    /// from it at `revision`
    ///
    /// Skipped when `record` is no longer the store's document for its URI,
    /// when the document has moved past `revision.generation`, or when a
    /// batch of a later revision is already recorded.
    ///
    /// # Returns
    /// `true` if the usages were recorded
    pub fn replace_references(&self, record: &DocumentRecord, revision: Revision, usages: Vec<Usage>) -> bool {
        let uri = record.uri();
        let written = {
            let lock = self.uri_lock(uri);
            let _uri_guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.write_batch(record, revision, usages)
        };
        if !written {
            self.release_uri_lock(uri);
        }
        written
    }

    fn write_batch(&self, record: &DocumentRecord, revision: Revision, usages: Vec<Usage>) -> bool {
        let uri = record.uri();
        let current = self
            .store
            .get(uri)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(&current), record));
        if !current || record.generation() != revision.generation {
            log::trace!("Dropping usages of {} collected at generation {}", uri, revision.generation);
            return false;
        }

        let Ok(mut maps) = self.maps.write() else {
            log::warn!("Reference index lock poisoned, not indexing {}", uri);
            return false;
        };
        if maps.revisions.get(uri).is_some_and(|recorded| *recorded > revision) {
            log::trace!("Dropping usages of {} collected before epoch {}", uri, revision.epoch);
            return false;
        }
        self.clears.fetch_add(1, Ordering::Relaxed);
        maps.clear(uri);
        let count = usages.len();
        for usage in usages {
            maps.insert(uri, usage);
        }
        maps.revisions.insert(uri.clone(), revision);
        log::trace!("Indexed {} usages in {}", count, uri);
        true
    }

    /// Remove every trace of `uri` from the index
    pub fn clear_references(&self, uri: &Url) {
        {
            let lock = self.uri_lock(uri);
            let _uri_guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let Ok(mut maps) = self.maps.write() else {
                return;
            };
            self.clears.fetch_add(1, Ordering::Relaxed);
            maps.forget(uri);
            log::trace!("Cleared references of {}", uri);
        }
        self.release_uri_lock(uri);
    }

    /// Every accessible usage of `symbol`
    ///
    /// # Returns
    /// Usages grouped by document in recording order; empty for symbols
    /// that are neither methods nor variables or that no longer exist
    pub fn get_references_to(&self, symbol: &SourceSymbol) -> Vec<Reference> {
        let Some(key) = SymbolKey::for_symbol(symbol) else {
            return Vec::new();
        };

        let occurrences: Vec<(Url, Range, bool)> = {
            let Ok(guard) = self.maps.read() else {
                return Vec::new();
            };
            let maps: &IndexMaps = &guard;
            let Some(by_uri) = maps.references_to.get(&key) else {
                return Vec::new();
            };
            by_uri
                .iter()
                .flat_map(|(uri, ranges)| {
                    ranges
                        .iter()
                        .map(move |range| (uri.clone(), *range, maps.is_write(uri, *range)))
                })
                .collect()
        };

        let Some(target) = self.resolve_key(&key) else {
            return Vec::new();
        };
        occurrences
            .into_iter()
            .filter_map(|(uri, range, is_write)| self.build_reference(&uri, range, target.clone(), is_write))
            .collect()
    }

    /// Recorded usage whose range contains `position`
    pub fn get_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        let (range, key, is_write) = {
            let maps = self.maps.read().ok()?;
            let locations = maps.locations.get(uri)?;
            let (range_key, key) = locations
                .iter()
                .find(|(range_key, _)| range_contains(&Range::from(**range_key), position))?;
            let range = Range::from(*range_key);
            (range, key.clone(), maps.is_write(uri, range))
        };
        let target = self.resolve_key(&key)?;
        self.build_reference(uri, range, target, is_write)
    }

    /// Outbound usages of a document, in position order
    pub fn get_references_from(&self, uri: &Url) -> Vec<Reference> {
        let recorded: Vec<(Range, SymbolKey, bool)> = {
            let Ok(maps) = self.maps.read() else {
                return Vec::new();
            };
            let Some(locations) = maps.locations.get(uri) else {
                return Vec::new();
            };
            locations
                .iter()
                .map(|(range_key, key)| {
                    let range = Range::from(*range_key);
                    (range, key.clone(), maps.is_write(uri, range))
                })
                .collect()
        };

        let mut targets: HashMap<SymbolKey, Option<SourceSymbol>> = HashMap::new();
        recorded
            .into_iter()
            .filter_map(|(range, key, is_write)| {
                let target = targets
                    .entry(key)
                    .or_insert_with_key(|key| self.resolve_key(key))
                    .clone()?;
                self.build_reference(uri, range, target, is_write)
            })
            .collect()
    }

    /// Outbound usages made from inside `symbol`
    pub fn get_references_from_symbol(&self, symbol: &SourceSymbol) -> Vec<Reference> {
        self.get_references_from(&symbol.uri)
            .into_iter()
            .filter(|reference| reference.from == *symbol)
            .collect()
    }

    /// Ranges recorded for `uri`, in position order
    pub fn recorded_ranges(&self, uri: &Url) -> Vec<Range> {
        let Ok(maps) = self.maps.read() else {
            return Vec::new();
        };
        maps.locations
            .get(uri)
            .map(|locations| locations.keys().map(|k| Range::from(*k)).collect())
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> ReferenceIndexMetrics {
        let clears = self.clears.load(Ordering::Relaxed);
        let locks = self.uri_locks.len();
        let Ok(maps) = self.maps.read() else {
            return ReferenceIndexMetrics {
                clears,
                locks,
                ..Default::default()
            };
        };
        ReferenceIndexMetrics {
            keys: maps.references_to.len(),
            occurrences: maps.locations.values().map(BTreeMap::len).sum(),
            documents: maps.locations.values().filter(|l| !l.is_empty()).count(),
            clears,
            locks,
        }
    }

    /// Current declaration of the symbol a key names
    fn resolve_key(&self, key: &SymbolKey) -> Option<SourceSymbol> {
        let record = self.store.get_by_mdo_ref(key.mdo_ref(), key.module_kind())?;
        let tree = record.symbol_tree()?;
        let symbol = match key {
            SymbolKey::Method { name, .. } => tree.method_by_name(name)?,
            SymbolKey::Variable { scope, name, .. } => tree.variable_by_name(name, scope)?,
        };
        tree.source_symbol(symbol.id, record.uri(), record.module_info())
    }

    /// Usage reference with `from` taken from the document's current tree,
    /// or `None` if the document is gone or the target is not accessible
    fn build_reference(&self, uri: &Url, range: Range, target: SourceSymbol, is_write: bool) -> Option<Reference> {
        let record = self.store.get(uri)?;
        let tree = record.symbol_tree()?;
        let enclosing = tree.enclosing_symbol(range.start);
        let from = tree.source_symbol(enclosing.id, uri, record.module_info())?;
        let reference = Reference {
            from,
            to: target,
            uri: uri.clone(),
            selection_range: range,
            occurrence_type: OccurrenceType::Usage,
            is_write,
        };
        reference.is_accessible().then_some(reference)
    }
}
