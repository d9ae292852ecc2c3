//
// document_store.rs
//
// Store owning every document record of a workspace
//

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use rayon::prelude::*;
use tower_lsp::lsp_types::Url;

use crate::document::DocumentRecord;
use crate::metadata::{ModuleKind, ProjectMetadata};

// ============================================================================
// Metrics
// ============================================================================

/// Snapshot of DocumentStore counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentStoreMetrics {
    /// Records created by `add` or `populate`
    pub documents_added: u64,
    pub documents_removed: u64,
    /// Records created by `populate`
    pub documents_populated: u64,
    /// `get` calls that found a record
    pub lookup_hits: u64,
    pub lookup_misses: u64,
}

#[derive(Default)]
struct Counters {
    documents_added: AtomicU64,
    documents_removed: AtomicU64,
    documents_populated: AtomicU64,
    lookup_hits: AtomicU64,
    lookup_misses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DocumentStoreMetrics {
        DocumentStoreMetrics {
            documents_added: self.documents_added.load(Ordering::Relaxed),
            documents_removed: self.documents_removed.load(Ordering::Relaxed),
            documents_populated: self.documents_populated.load(Ordering::Relaxed),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Document Store
// ============================================================================

/// Called with the URI of every removed document
pub type RemovalListener = Box<dyn Fn(&Url) + Send + Sync>;

/// Thread-safe owner of all document records
///
/// Steady-state operations (`add`, `remove`) hold the bulk lock for reading
/// and then only touch their own record, so they never wait on each other.
/// `populate` holds it for writing while it creates records in parallel.
pub struct DocumentStore {
    metadata: Arc<dyn ProjectMetadata>,
    documents: DashMap<Url, Arc<DocumentRecord>>,
    /// Lowercased mdo_ref -> module kind -> URI
    by_mdo_ref: DashMap<String, HashMap<ModuleKind, Url>>,
    bulk_lock: RwLock<()>,
    listeners: RwLock<Vec<RemovalListener>>,
    counters: Counters,
}

impl DocumentStore {
    pub fn new(metadata: Arc<dyn ProjectMetadata>) -> Self {
        Self {
            metadata,
            documents: DashMap::new(),
            by_mdo_ref: DashMap::new(),
            bulk_lock: RwLock::new(()),
            listeners: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn metadata(&self) -> &Arc<dyn ProjectMetadata> {
        &self.metadata
    }

    /// Register a callback run after a document is removed
    pub fn add_removal_listener(&self, listener: RemovalListener) {
        let Ok(mut listeners) = self.listeners.write() else {
            return;
        };
        listeners.push(listener);
    }

    fn record_for(&self, uri: &Url) -> (Arc<DocumentRecord>, bool) {
        if let Some(existing) = self.documents.get(uri) {
            return (Arc::clone(existing.value()), false);
        }

        let mut created = false;
        let record = self
            .documents
            .entry(uri.clone())
            .or_insert_with(|| {
                created = true;
                let info = self.metadata.module_info(uri);
                Arc::new(DocumentRecord::new(uri.clone(), info))
            })
            .clone();

        if created {
            self.metadata.register(uri);
            self.by_mdo_ref
                .entry(record.mdo_ref().to_lowercase())
                .or_default()
                .insert(record.module_kind(), uri.clone());
            Counters::bump(&self.counters.documents_added);
        }
        (record, created)
    }

    /// Create the record for `uri` or rebuild the existing one in place
    ///
    /// # Arguments
    /// * `uri` - Document URI
    /// * `content` - Full text
    /// * `version` - Editor version, 0 for content read from disk
    pub fn add(&self, uri: &Url, content: &str, version: i32) -> Arc<DocumentRecord> {
        let _bulk = self.bulk_lock.read().unwrap_or_else(PoisonError::into_inner);
        let (record, created) = self.record_for(uri);
        record.rebuild(content, version);
        log::trace!(
            "{} document {} at version {}",
            if created { "Added" } else { "Rebuilt" },
            uri,
            version
        );
        record
    }

    /// Create records for many files at once
    ///
    /// Files that already have a record are skipped so open documents keep
    /// their editor content.
    ///
    /// # Returns
    /// The records created
    pub fn populate(&self, files: Vec<(Url, String)>) -> Vec<Arc<DocumentRecord>> {
        let _bulk = self.bulk_lock.write().unwrap_or_else(PoisonError::into_inner);
        let created: Vec<Arc<DocumentRecord>> = files
            .into_par_iter()
            .filter_map(|(uri, content)| {
                let (record, created) = self.record_for(&uri);
                if !created {
                    return None;
                }
                record.rebuild(&content, 0);
                Counters::bump(&self.counters.documents_populated);
                Some(record)
            })
            .collect();
        log::info!("Populated {} documents", created.len());
        created
    }

    /// Delete a record and notify removal listeners
    pub fn remove(&self, uri: &Url) -> Option<Arc<DocumentRecord>> {
        let removed = {
            let _bulk = self.bulk_lock.read().unwrap_or_else(PoisonError::into_inner);
            let (_, record) = self.documents.remove(uri)?;
            let key = record.mdo_ref().to_lowercase();
            if let Some(mut modules) = self.by_mdo_ref.get_mut(&key) {
                if modules.get(&record.module_kind()) == Some(uri) {
                    modules.remove(&record.module_kind());
                }
            }
            self.by_mdo_ref.remove_if(&key, |_, modules| modules.is_empty());
            self.metadata.unregister(uri);
            record.close();
            record
        };

        Counters::bump(&self.counters.documents_removed);
        self.notify_removed(uri);
        log::trace!("Removed document {}", uri);
        Some(removed)
    }

    fn notify_removed(&self, uri: &Url) {
        let Ok(listeners) = self.listeners.read() else {
            return;
        };
        for listener in listeners.iter() {
            listener(uri);
        }
    }

    /// Drop the content of a document, keeping its record
    ///
    /// # Returns
    /// `false` if the document is unknown
    pub fn close(&self, uri: &Url) -> bool {
        match self.documents.get(uri) {
            Some(record) => {
                record.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<DocumentRecord>> {
        match self.documents.get(uri) {
            Some(record) => {
                Counters::bump(&self.counters.lookup_hits);
                Some(Arc::clone(record.value()))
            }
            None => {
                Counters::bump(&self.counters.lookup_misses);
                None
            }
        }
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    /// Module of a project object with the given kind (case-insensitive)
    pub fn get_by_mdo_ref(&self, mdo_ref: &str, kind: ModuleKind) -> Option<Arc<DocumentRecord>> {
        let uri = self
            .by_mdo_ref
            .get(&mdo_ref.to_lowercase())
            .and_then(|modules| modules.get(&kind).cloned())?;
        self.documents.get(&uri).map(|r| Arc::clone(r.value()))
    }

    /// All modules of a project object
    pub fn modules_of(&self, mdo_ref: &str) -> Vec<Arc<DocumentRecord>> {
        let uris: Vec<Url> = self
            .by_mdo_ref
            .get(&mdo_ref.to_lowercase())
            .map(|modules| modules.values().cloned().collect())
            .unwrap_or_default();
        uris.iter()
            .filter_map(|uri| self.documents.get(uri).map(|r| Arc::clone(r.value())))
            .collect()
    }

    pub fn uris(&self) -> Vec<Url> {
        self.documents.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn documents(&self) -> Vec<Arc<DocumentRecord>> {
        self.documents.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Remove every document, notifying listeners for each
    pub fn clear(&self) {
        for uri in self.uris() {
            self.remove(&uri);
        }
    }

    pub fn metrics(&self) -> DocumentStoreMetrics {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentState;
    use crate::metadata::ConfigurationLayout;
    use std::sync::Mutex;

    fn store() -> DocumentStore {
        DocumentStore::new(Arc::new(ConfigurationLayout::new()))
    }

    fn uri(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn test_add_creates_then_rebuilds_in_place() {
        let store = store();
        let file = uri("/src/CommonModules/Общий/Ext/Module.bsl");
        let first = store.add(&file, "А = 1;", 1);
        let second = store.add(&file, "Б = 2;", 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.content().as_deref(), Some("Б = 2;"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.metrics().documents_added, 1);
    }

    #[test]
    fn test_lookup_by_mdo_ref_ignores_case() {
        let store = store();
        let object = uri("/src/Catalogs/Товары/Ext/ObjectModule.bsl");
        let manager = uri("/src/Catalogs/Товары/Ext/ManagerModule.bsl");
        store.add(&object, "", 1);
        store.add(&manager, "", 1);

        let found = store.get_by_mdo_ref("catalog.товары", ModuleKind::ManagerModule).unwrap();
        assert_eq!(found.uri(), &manager);
        assert_eq!(store.modules_of("Catalog.Товары").len(), 2);
        assert!(store.get_by_mdo_ref("Catalog.Товары", ModuleKind::FormModule).is_none());
    }

    #[test]
    fn test_remove_notifies_listeners_and_drops_lookups() {
        let store = store();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        store.add_removal_listener(Box::new(move |uri| sink.lock().unwrap().push(uri.clone())));

        let file = uri("/src/CommonModules/Общий/Module.bsl");
        store.add(&file, "А = 1;", 1);
        let record = store.remove(&file).unwrap();

        assert_eq!(record.state(), DocumentState::WithoutContent);
        assert!(store.get(&file).is_none());
        assert!(store.get_by_mdo_ref("CommonModule.Общий", ModuleKind::CommonModule).is_none());
        assert!(store.metadata().resolve_qualifier(&["Общий"]).is_none());
        assert_eq!(removed.lock().unwrap().as_slice(), &[file]);
        assert!(store.remove(&uri("/src/missing.bsl")).is_none());
    }

    #[test]
    fn test_populate_skips_existing_documents() {
        let store = store();
        let open = uri("/src/CommonModules/Открытый/Module.bsl");
        store.add(&open, "Редактор = 1;", 5);

        let files: Vec<(Url, String)> = (0..50)
            .map(|i| (uri(&format!("/src/CommonModules/М{i}/Module.bsl")), format!("А{i} = 1;")))
            .chain(std::iter::once((open.clone(), "Диск = 1;".to_string())))
            .collect();
        let created = store.populate(files);

        assert_eq!(created.len(), 50);
        assert_eq!(store.len(), 51);
        assert_eq!(store.get(&open).unwrap().content().as_deref(), Some("Редактор = 1;"));
        assert_eq!(store.metrics().documents_populated, 50);
    }

    #[test]
    fn test_close_keeps_record() {
        let store = store();
        let file = uri("/src/CommonModules/Общий/Module.bsl");
        store.add(&file, "А = 1;", 1);
        assert!(store.close(&file));
        assert_eq!(store.get(&file).unwrap().state(), DocumentState::WithoutContent);
        assert!(!store.close(&uri("/src/other.bsl")));
    }

    #[test]
    fn test_concurrent_adds_on_distinct_documents() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let file = uri(&format!("/src/CommonModules/Т{t}_{i}/Module.bsl"));
                        store.add(&file, "А = 1;", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
        assert_eq!(store.metrics().documents_added, 200);
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = store();
        store.add(&uri("/src/a.bsl"), "", 1);
        store.add(&uri("/src/b.bsl"), "", 1);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.metrics().documents_removed, 2);
    }
}
