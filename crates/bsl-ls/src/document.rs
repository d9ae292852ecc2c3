//
// document.rs
//
// Document record: content, version and lazily derived artifacts
//

use std::sync::{Arc, Mutex, RwLock};

use tower_lsp::lsp_types::Url;

use crate::metadata::{ModuleInfo, ModuleKind};
use crate::parser::{parse_module, ParseTree};
use crate::symbols::{build_symbol_tree, SymbolTree};

/// Lifecycle state of a document record
///
/// `WithoutContent --open/populate--> WithContent --close--> WithoutContent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    WithContent,
    WithoutContent,
}

struct ContentState {
    content: Option<Arc<str>>,
    version: i32,
    /// Bumped on every rebuild and close; derived artifacts are keyed by it
    generation: u64,
}

/// Compute-once cell for one derived artifact
///
/// The slot mutex is held while computing, so concurrent first readers wait
/// for the single computation instead of repeating it.
struct MemoCell<T> {
    slot: Mutex<Option<(u64, Arc<T>)>>,
}

impl<T> MemoCell<T> {
    fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    fn get_or_compute(&self, generation: u64, compute: impl FnOnce() -> T) -> Arc<T> {
        let Ok(mut slot) = self.slot.lock() else {
            return Arc::new(compute());
        };
        if let Some((cached_generation, value)) = slot.as_ref() {
            if *cached_generation == generation {
                return Arc::clone(value);
            }
        }

        let value = Arc::new(compute());
        // A reader holding an older snapshot must not evict a newer artifact
        let newer_cached = slot.as_ref().is_some_and(|(cached, _)| *cached > generation);
        if !newer_cached {
            *slot = Some((generation, Arc::clone(&value)));
        }
        value
    }

    fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    fn is_cached(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// One known source file
///
/// Identity (`uri`, module info) is fixed at creation. Content and version
/// change through `rebuild` and `close`; the parse tree and symbol tree are
/// computed on first use after each change.
pub struct DocumentRecord {
    uri: Url,
    info: ModuleInfo,
    state: RwLock<ContentState>,
    parse_tree: MemoCell<ParseTree>,
    symbol_tree: MemoCell<SymbolTree>,
}

impl std::fmt::Debug for DocumentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRecord")
            .field("uri", &self.uri.as_str())
            .field("mdo_ref", &self.info.mdo_ref)
            .field("state", &self.state())
            .field("version", &self.version())
            .finish()
    }
}

impl DocumentRecord {
    /// Create a record without content
    pub fn new(uri: Url, info: ModuleInfo) -> Self {
        Self {
            uri,
            info,
            state: RwLock::new(ContentState {
                content: None,
                version: 0,
                generation: 0,
            }),
            parse_tree: MemoCell::new(),
            symbol_tree: MemoCell::new(),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn module_info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn module_kind(&self) -> ModuleKind {
        self.info.kind
    }

    pub fn mdo_ref(&self) -> &str {
        &self.info.mdo_ref
    }

    pub fn state(&self) -> DocumentState {
        match self.state.read() {
            Ok(state) if state.content.is_some() => DocumentState::WithContent,
            _ => DocumentState::WithoutContent,
        }
    }

    pub fn version(&self) -> i32 {
        self.state.read().map(|s| s.version).unwrap_or(0)
    }

    pub fn content(&self) -> Option<Arc<str>> {
        self.state.read().ok().and_then(|s| s.content.clone())
    }

    pub fn generation(&self) -> u64 {
        self.state.read().map(|s| s.generation).unwrap_or(0)
    }

    /// Replace the content and drop derived artifacts
    ///
    /// Skipped when `version` is non-zero, equals the current version, and
    /// content is present.
    ///
    /// # Returns
    /// `true` if the content was replaced
    pub fn rebuild(&self, content: &str, version: i32) -> bool {
        let Ok(mut state) = self.state.write() else {
            log::warn!("Document lock poisoned, skipping rebuild of {}", self.uri);
            return false;
        };
        if version != 0 && state.version == version && state.content.is_some() {
            log::trace!("Skipping rebuild of {} at unchanged version {}", self.uri, version);
            return false;
        }

        state.content = Some(Arc::from(content));
        state.version = version;
        state.generation += 1;
        // Lock order is state, then memo slot; readers release state first
        self.parse_tree.invalidate();
        self.symbol_tree.invalidate();
        true
    }

    /// Drop content and derived artifacts (`WithoutContent`)
    pub fn close(&self) {
        let Ok(mut state) = self.state.write() else {
            return;
        };
        state.content = None;
        state.generation += 1;
        self.parse_tree.invalidate();
        self.symbol_tree.invalidate();
    }

    fn snapshot(&self) -> Option<(Arc<str>, u64)> {
        let state = self.state.read().ok()?;
        let content = state.content.clone()?;
        Some((content, state.generation))
    }

    /// Parse tree of the current content; `None` without content
    pub fn parse_tree(&self) -> Option<Arc<ParseTree>> {
        let (content, generation) = self.snapshot()?;
        Some(self.parse_tree.get_or_compute(generation, || parse_module(&content)))
    }

    /// Symbol tree of the current content; `None` without content
    pub fn symbol_tree(&self) -> Option<Arc<SymbolTree>> {
        let (content, generation) = self.snapshot()?;
        let tree = self.parse_tree.get_or_compute(generation, || parse_module(&content));
        Some(self.symbol_tree.get_or_compute(generation, || build_symbol_tree(&tree)))
    }

    /// Generation together with both trees of that same generation
    ///
    /// The trees are `None` when the document has no content at that
    /// generation.
    pub fn artifacts(&self) -> (u64, Option<(Arc<ParseTree>, Arc<SymbolTree>)>) {
        let (content, generation) = match self.state.read() {
            Ok(state) => (state.content.clone(), state.generation),
            Err(_) => return (0, None),
        };
        let Some(content) = content else {
            return (generation, None);
        };
        let tree = self.parse_tree.get_or_compute(generation, || parse_module(&content));
        let symbols = self.symbol_tree.get_or_compute(generation, || build_symbol_tree(&tree));
        (generation, Some((tree, symbols)))
    }

    /// Whether derived artifacts are currently cached
    pub fn has_cached_artifacts(&self) -> bool {
        self.parse_tree.is_cached() || self.symbol_tree.is_cached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DocumentRecord {
        let uri = Url::parse("file:///project/CommonModules/Тест/Ext/Module.bsl").unwrap();
        DocumentRecord::new(
            uri,
            ModuleInfo {
                mdo_ref: "CommonModule.Тест".into(),
                kind: ModuleKind::CommonModule,
            },
        )
    }

    #[test]
    fn test_new_record_has_no_content() {
        let doc = record();
        assert_eq!(doc.state(), DocumentState::WithoutContent);
        assert!(doc.parse_tree().is_none());
        assert!(doc.symbol_tree().is_none());
    }

    #[test]
    fn test_artifacts_are_computed_once() {
        let doc = record();
        assert!(doc.rebuild("Процедура А()\nКонецПроцедуры", 1));
        let first = doc.symbol_tree().unwrap();
        let second = doc.symbol_tree().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(doc.has_cached_artifacts());
    }

    #[test]
    fn test_rebuild_invalidates_artifacts() {
        let doc = record();
        doc.rebuild("Процедура А()\nКонецПроцедуры", 1);
        let before = doc.symbol_tree().unwrap();
        assert!(doc.rebuild("Процедура Б()\nКонецПроцедуры", 2));
        assert!(!doc.has_cached_artifacts());

        let after = doc.symbol_tree().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.method_by_name("Б").is_some());
        assert!(after.method_by_name("А").is_none());
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn test_rebuild_skips_unchanged_version() {
        let doc = record();
        assert!(doc.rebuild("А = 1;", 3));
        assert!(!doc.rebuild("Б = 2;", 3));
        assert_eq!(doc.content().as_deref(), Some("А = 1;"));

        // Version zero always rebuilds (populate from disk)
        assert!(doc.rebuild("В = 3;", 0));
        assert!(doc.rebuild("Г = 4;", 0));
        assert_eq!(doc.content().as_deref(), Some("Г = 4;"));
    }

    #[test]
    fn test_close_clears_content_and_artifacts() {
        let doc = record();
        doc.rebuild("Процедура А()\nКонецПроцедуры", 1);
        doc.symbol_tree();
        doc.close();
        assert_eq!(doc.state(), DocumentState::WithoutContent);
        assert!(!doc.has_cached_artifacts());
        assert!(doc.symbol_tree().is_none());

        // Reopening at the same version is not skipped once content is gone
        assert!(doc.rebuild("Процедура А()\nКонецПроцедуры", 1));
        assert_eq!(doc.state(), DocumentState::WithContent);
    }

    #[test]
    fn test_artifacts_carry_their_generation() {
        let doc = record();
        assert_eq!(doc.artifacts().0, 0);
        assert!(doc.artifacts().1.is_none());

        doc.rebuild("Процедура А()\nКонецПроцедуры", 1);
        let (generation, trees) = doc.artifacts();
        let (_, symbols) = trees.unwrap();
        assert_eq!(generation, doc.generation());
        assert!(Arc::ptr_eq(&symbols, &doc.symbol_tree().unwrap()));

        doc.close();
        let (closed, trees) = doc.artifacts();
        assert_eq!(closed, generation + 1);
        assert!(trees.is_none());
    }

    #[test]
    fn test_concurrent_first_readers_share_one_tree() {
        let doc = Arc::new(record());
        let body: String = (0..200)
            .map(|i| format!("Процедура П{i}()\n\tА = {i};\nКонецПроцедуры\n"))
            .collect();
        doc.rebuild(&body, 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let doc = Arc::clone(&doc);
                std::thread::spawn(move || doc.symbol_tree().unwrap())
            })
            .collect();
        let trees: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for tree in &trees[1..] {
            assert!(Arc::ptr_eq(&trees[0], tree));
        }
        assert_eq!(trees[0].methods().len(), 200);
    }
}
