//
// workspace.rs
//
// One project root: documents, reference index and per-document edit queues
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;
use rayon::prelude::*;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};
use walkdir::WalkDir;

use crate::change_sync::{ChangeSynchronizer, RebuildTarget};
use crate::config::ServerConfig;
use crate::content_provider::{read_source_file, ContentSource, DiskContentSource};
use crate::document::DocumentRecord;
use crate::document_store::DocumentStore;
use crate::metadata::{ConfigurationLayout, ProjectMetadata};
use crate::references::{AnnotationRegistry, Reference, ReferenceIndex, ReferenceIndexFiller, ReferenceResolver};
use crate::symbols::SourceSymbol;

/// Refresh everything derived from a document's content outside the
/// document itself
fn index_record(filler: &ReferenceIndexFiller, annotations: &AnnotationRegistry, record: &DocumentRecord) {
    let usages = filler.fill(record);
    annotations.refresh(record);
    log::trace!("Indexed {} ({} usages)", record.uri(), usages);
}

/// Writes coalesced edits into one open document
struct DocumentRebuilder {
    record: Arc<DocumentRecord>,
    store: Arc<DocumentStore>,
    filler: Arc<ReferenceIndexFiller>,
    annotations: Arc<AnnotationRegistry>,
    /// Set once the editor session ends; held for the whole rebuild
    retired: Mutex<bool>,
}

impl DocumentRebuilder {
    fn new(record: Arc<DocumentRecord>, workspace: &Workspace) -> Self {
        Self {
            record,
            store: Arc::clone(&workspace.store),
            filler: Arc::clone(&workspace.filler),
            annotations: Arc::clone(&workspace.annotations),
            retired: Mutex::new(false),
        }
    }

    /// Refuse every later rebuild, waiting for one in flight to finish
    fn retire(&self) {
        *self.retired.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

impl RebuildTarget for DocumentRebuilder {
    fn current_content(&self) -> Option<String> {
        self.record.content().map(|content| content.to_string())
    }

    fn rebuild(&self, content: String, version: i32) -> Result<()> {
        let uri = self.record.uri();
        let retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        if *retired {
            bail!("{} is no longer open", uri);
        }
        let current = self
            .store
            .get(uri)
            .ok_or_else(|| anyhow!("{} is no longer in the document store", uri))?;
        if !Arc::ptr_eq(&current, &self.record) {
            bail!("{} was replaced while edits were pending", uri);
        }
        if self.record.rebuild(&content, version) {
            index_record(&self.filler, &self.annotations, &self.record);
        }
        Ok(())
    }
}

/// Edit queue of an open document and the target it writes into
struct OpenDocument {
    sync: Arc<ChangeSynchronizer>,
    rebuilder: Arc<DocumentRebuilder>,
}

impl OpenDocument {
    /// Discard queued edits and refuse a rebuild that is still running
    fn stop_now(&self) {
        self.sync.shutdown_now();
        self.rebuilder.retire();
    }
}

/// Documents and reference data of one workspace root
///
/// Owns the document store, the reference index and its filler, the
/// annotation registry, the resolver chain and one change synchronizer per
/// open document. Nothing here is global: the language server holds
/// workspaces through a `WorkspaceManager`.
pub struct Workspace {
    root: Option<PathBuf>,
    config: RwLock<ServerConfig>,
    store: Arc<DocumentStore>,
    index: Arc<ReferenceIndex>,
    filler: Arc<ReferenceIndexFiller>,
    annotations: Arc<AnnotationRegistry>,
    resolver: ReferenceResolver,
    content_source: Arc<dyn ContentSource>,
    open: DashMap<Url, OpenDocument>,
}

impl Workspace {
    /// Workspace over a configuration export on disk
    pub fn new(root: Option<PathBuf>, config: ServerConfig) -> Self {
        let content_source = Arc::new(DiskContentSource::new(config.max_file_size_bytes));
        Self::with_parts(root, config, Arc::new(ConfigurationLayout::new()), content_source)
    }

    pub fn with_parts(
        root: Option<PathBuf>,
        config: ServerConfig,
        metadata: Arc<dyn ProjectMetadata>,
        content_source: Arc<dyn ContentSource>,
    ) -> Self {
        let store = Arc::new(DocumentStore::new(metadata));
        let index = Arc::new(ReferenceIndex::new(Arc::clone(&store)));
        let annotations = Arc::new(AnnotationRegistry::new());
        let filler = Arc::new(ReferenceIndexFiller::new(
            Arc::clone(&index),
            Arc::clone(store.metadata()),
            config.indexed_module_kinds.clone(),
        ));

        // The index holds the store, so the store's listener must not hold
        // the index
        let weak_index = Arc::downgrade(&index);
        let listener_annotations = Arc::clone(&annotations);
        store.add_removal_listener(Box::new(move |uri| {
            if let Some(index) = weak_index.upgrade() {
                index.clear_references(uri);
            }
            listener_annotations.remove(uri);
        }));

        let resolver = ReferenceResolver::standard(Arc::clone(&store), Arc::clone(&index), Arc::clone(&annotations));
        Self {
            root,
            config: RwLock::new(config),
            store,
            index,
            filler,
            annotations,
            resolver,
            content_source,
            open: DashMap::new(),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> ServerConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn set_config(&self, config: ServerConfig) {
        self.filler.set_indexed_kinds(config.indexed_module_kinds.clone());
        if let Ok(mut current) = self.config.write() {
            *current = config;
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<ReferenceIndex> {
        &self.index
    }

    pub fn annotations(&self) -> &Arc<AnnotationRegistry> {
        &self.annotations
    }

    fn index_document(&self, record: &DocumentRecord) {
        index_record(&self.filler, &self.annotations, record);
    }

    /// Index a document that was just added; a module that other documents
    /// can now call into re-indexes everything
    fn index_added(&self, record: &DocumentRecord, created: bool) {
        if created && self.store.metadata().is_qualifier_target(record.uri()) {
            log::trace!("{} is a new call target, re-indexing the workspace", record.uri());
            self.reindex_all();
        } else {
            self.index_document(record);
        }
    }

    /// Re-index every document, open ones from their editor content
    fn reindex_all(&self) -> usize {
        self.filler.advance_epoch();
        let records = self.store.documents();
        records.par_iter().for_each(|record| self.index_document(record));
        records.len()
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Open a document in the editor and start its edit queue
    ///
    /// Must be called from within a tokio runtime.
    pub fn open_document(&self, uri: &Url, content: &str, version: i32) -> Arc<DocumentRecord> {
        if let Some((_, previous)) = self.open.remove(uri) {
            log::warn!("{} opened twice; discarding edits of the previous session", uri);
            previous.stop_now();
        }

        let created = !self.store.contains(uri);
        let record = self.store.add(uri, content, version);
        self.index_added(&record, created);

        let rebuilder = Arc::new(DocumentRebuilder::new(Arc::clone(&record), self));
        let target: Arc<dyn RebuildTarget> = rebuilder.clone();
        self.open.insert(
            uri.clone(),
            OpenDocument {
                sync: Arc::new(ChangeSynchronizer::new(uri.clone(), target, version)),
                rebuilder,
            },
        );
        log::info!("Opened {} at version {}", uri, version);
        record
    }

    /// Queue an edit of an open document; never blocks
    pub fn submit(&self, uri: &Url, version: i32, changes: Vec<TextDocumentContentChangeEvent>) {
        match self.open.get(uri) {
            Some(open) => open.sync.submit(version, changes),
            None => log::warn!("Dropping edit for {} at version {}: document is not open", uri, version),
        }
    }

    /// Resolve once every edit submitted so far for `uri` is applied
    pub async fn await_latest(&self, uri: &Url) {
        let sync = self.open.get(uri).map(|entry| Arc::clone(&entry.sync));
        if let Some(sync) = sync {
            sync.await_latest().await;
        }
    }

    pub fn is_open(&self, uri: &Url) -> bool {
        self.open.contains_key(uri)
    }

    pub fn open_documents(&self) -> Vec<Url> {
        self.open.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop accepting edits for `uri`, drain what is queued (bounded by
    /// `close_timeout_ms`), and drop its content
    ///
    /// With `reload_closed_from_disk` the saved file is read back so the
    /// index reflects what is on disk.
    pub async fn close_document(&self, uri: &Url) {
        let config = self.config();
        if let Some((_, open)) = self.open.remove(uri) {
            open.sync.shutdown();
            let timeout = Duration::from_millis(config.close_timeout_ms);
            if !open.sync.await_termination(timeout).await {
                log::warn!("Pending edits of {} did not drain within {:?}; discarding", uri, timeout);
            }
            open.stop_now();
        }

        if self.store.close(uri) {
            self.index.clear_references(uri);
            self.annotations.remove(uri);
        }
        log::info!("Closed {}", uri);

        if config.reload_closed_from_disk {
            self.refresh_from_disk(uri).await;
        }
    }

    /// Re-read a document that is not open from its saved file; removes
    /// the document when the file is gone
    ///
    /// # Returns
    /// `true` if the document was re-read
    pub async fn refresh_from_disk(&self, uri: &Url) -> bool {
        if self.is_open(uri) {
            log::trace!("Not reloading {}: open documents are authoritative", uri);
            return false;
        }
        match self.content_source.read(uri).await {
            Ok(Some(text)) => {
                self.add_document(uri, &text);
                true
            }
            Ok(None) => {
                self.remove_document(uri);
                false
            }
            Err(err) => {
                log::warn!("Failed to read {}: {err:#}", uri);
                false
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Add or rebuild a document from saved content
    ///
    /// Open documents are owned by their edit queue and left untouched.
    pub fn add_document(&self, uri: &Url, content: &str) -> Arc<DocumentRecord> {
        if self.is_open(uri) {
            if let Some(record) = self.store.get(uri) {
                log::trace!("Ignoring saved content of open document {}", uri);
                return record;
            }
        }
        let created = !self.store.contains(uri);
        let record = self.store.add(uri, content, 0);
        self.index_added(&record, created);
        record
    }

    /// Forget a document entirely, including its index contribution
    pub fn remove_document(&self, uri: &Url) -> bool {
        if let Some((_, open)) = self.open.remove(uri) {
            open.stop_now();
        }
        self.store.remove(uri).is_some()
    }

    pub fn get_document(&self, uri: &Url) -> Option<Arc<DocumentRecord>> {
        self.store.get(uri)
    }

    /// Load many documents at once and index them
    ///
    /// Documents that are already known keep their content. Every document
    /// is re-indexed afterwards, open ones from their editor content, so
    /// qualified calls into modules that arrived with this batch resolve.
    ///
    /// # Returns
    /// Number of documents created
    pub fn populate(&self, files: Vec<(Url, String)>) -> usize {
        let started = Instant::now();
        let created = self.store.populate(files).len();
        let indexed = self.reindex_all();

        log::info!(
            "Populated {} documents ({} indexed) in {:?}",
            created,
            indexed,
            started.elapsed()
        );
        created
    }

    /// Read every source file under the workspace root and populate
    pub fn populate_from_root(&self) -> Result<usize> {
        let Some(root) = self.root.as_deref() else {
            return Ok(0);
        };
        if !root.is_dir() {
            bail!("workspace root {} is not a directory", root.display());
        }
        let config = self.config();
        log::info!("Scanning workspace folder: {}", root.display());

        let paths: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| config.accepts_extension(path))
            .collect();

        let files: Vec<(Url, String)> = paths
            .into_par_iter()
            .filter_map(|path| {
                let uri = Url::from_file_path(&path).ok()?;
                match read_source_file(&path, config.max_file_size_bytes) {
                    Ok(text) => text.map(|text| (uri, text)),
                    Err(err) => {
                        log::warn!("Skipping {}: {err:#}", path.display());
                        None
                    }
                }
            })
            .collect();

        Ok(self.populate(files))
    }

    /// Stop every edit queue, discarding unapplied edits
    pub fn shutdown(&self) {
        let count = self.open.len();
        for entry in self.open.iter() {
            entry.value().stop_now();
        }
        self.open.clear();
        if count > 0 {
            log::info!("Stopped {} edit queues", count);
        }
    }

    /// Drop every document and all reference data
    pub fn clear(&self) {
        self.shutdown();
        self.store.clear();
        self.annotations.clear();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn find_reference(&self, uri: &Url, position: Position) -> Option<Reference> {
        self.resolver.find_reference(uri, position)
    }

    pub fn get_references_to(&self, symbol: &SourceSymbol) -> Vec<Reference> {
        self.index.get_references_to(symbol)
    }

    pub fn get_references_from(&self, uri: &Url) -> Vec<Reference> {
        self.index.get_references_from(uri)
    }

    pub fn get_references_from_symbol(&self, symbol: &SourceSymbol) -> Vec<Reference> {
        self.index.get_references_from_symbol(symbol)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.shutdown();
    }
}
