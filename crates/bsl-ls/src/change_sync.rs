//
// change_sync.rs
//
// Per-document edit queue applying changes in version order
//

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};

use crate::text_edit::apply_content_changes;

/// What a synchronizer writes coalesced content into
pub trait RebuildTarget: Send + Sync + 'static {
    /// Content the next delta applies to, if the document has any
    fn current_content(&self) -> Option<String>;

    /// Replace the document content and refresh everything derived from it
    fn rebuild(&self, content: String, version: i32) -> Result<()>;
}

struct EditTask {
    version: i32,
    /// Submission order, breaks ties between equal versions
    seq: u64,
    changes: Vec<TextDocumentContentChangeEvent>,
}

impl PartialEq for EditTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for EditTask {}

impl PartialOrd for EditTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for EditTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.version, self.seq).cmp(&(other.version, other.seq))
    }
}

#[derive(Default)]
struct Queue {
    /// Min-heap by version
    tasks: BinaryHeap<Reverse<EditTask>>,
    next_seq: u64,
    /// Set by `shutdown`: drain what is queued, then stop
    stopping: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    applied: i32,
    closed: bool,
}

struct Shared {
    uri: Url,
    queue: Mutex<Queue>,
    wake: Notify,
    highest_submitted: AtomicI32,
    progress: watch::Sender<Progress>,
    target: Arc<dyn RebuildTarget>,
}

impl Shared {
    fn applied(&self) -> i32 {
        self.progress.borrow().applied
    }

    fn mark_closed(&self) {
        self.progress.send_modify(|p| p.closed = true);
    }
}

/// Serializes the edits of one document
///
/// `submit` never blocks. A single worker task takes queued edits lowest
/// version first, folds every edit that is queued at that moment into one
/// buffer, and then rebuilds the document once. A burst of edits submitted
/// before the worker runs therefore costs a single rebuild.
pub struct ChangeSynchronizer {
    shared: Arc<Shared>,
    cancellation_token: CancellationToken,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeSynchronizer {
    /// Create a synchronizer and start its worker on the current tokio
    /// runtime
    ///
    /// # Arguments
    /// * `uri` - Document the edits belong to (for logging)
    /// * `target` - Receives coalesced content
    /// * `initial_version` - Version the document content is already at
    pub fn new(uri: Url, target: Arc<dyn RebuildTarget>, initial_version: i32) -> Self {
        let (progress, _) = watch::channel(Progress {
            applied: initial_version,
            closed: false,
        });
        let shared = Arc::new(Shared {
            uri,
            queue: Mutex::new(Queue::default()),
            wake: Notify::new(),
            highest_submitted: AtomicI32::new(initial_version),
            progress,
            target,
        });
        let synchronizer = Self {
            shared,
            cancellation_token: CancellationToken::new(),
            worker_handle: Mutex::new(None),
        };
        synchronizer.start_worker();
        synchronizer
    }

    fn start_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let token = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            log::trace!("Change synchronizer started for {}", shared.uri);
            loop {
                let (batch, stopping) = {
                    let Ok(mut queue) = shared.queue.lock() else {
                        break;
                    };
                    let mut batch = Vec::with_capacity(queue.tasks.len());
                    while let Some(Reverse(task)) = queue.tasks.pop() {
                        batch.push(task);
                    }
                    (batch, queue.stopping)
                };

                if batch.is_empty() {
                    if stopping {
                        break;
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = shared.wake.notified() => continue,
                    }
                }

                Self::apply_batch(&shared, batch).await;
            }
            shared.mark_closed();
            log::trace!("Change synchronizer stopped for {}", shared.uri);
        });

        if let Ok(mut slot) = self.worker_handle.lock() {
            *slot = Some(handle);
        }
    }

    /// Fold a batch (ascending versions) into one buffer and flush it
    async fn apply_batch(shared: &Arc<Shared>, batch: Vec<EditTask>) {
        let mut last_version = shared.applied();
        let mut pending: Option<String> = None;

        for task in batch {
            if task.version <= last_version {
                log::warn!(
                    "Dropping stale edit for {} at version {} (already at {})",
                    shared.uri,
                    task.version,
                    last_version
                );
                continue;
            }
            last_version = task.version;

            let base = match pending.take() {
                Some(content) => content,
                None => match shared.target.current_content() {
                    Some(content) => content,
                    None => {
                        log::warn!("Edit for {} at version {} has no content to apply to", shared.uri, task.version);
                        continue;
                    }
                },
            };
            match apply_content_changes(&base, &task.changes) {
                Ok(updated) => pending = Some(updated),
                Err(err) => {
                    log::warn!(
                        "Failed to apply edit for {} at version {}: {err:#}",
                        shared.uri,
                        task.version
                    );
                    pending = Some(base);
                }
            }
        }

        if last_version <= shared.applied() {
            return;
        }

        if let Some(content) = pending {
            let target = Arc::clone(&shared.target);
            let version = last_version;
            match tokio::task::spawn_blocking(move || target.rebuild(content, version)).await {
                Ok(Ok(())) => log::trace!("Rebuilt {} at version {}", shared.uri, version),
                Ok(Err(err)) => log::error!("Rebuild of {} at version {} failed: {err:#}", shared.uri, version),
                Err(err) => log::error!("Rebuild of {} at version {} panicked: {err}", shared.uri, version),
            }
        }

        shared
            .progress
            .send_modify(|p| p.applied = p.applied.max(last_version));
    }

    /// Queue an edit; returns immediately
    pub fn submit(&self, version: i32, changes: Vec<TextDocumentContentChangeEvent>) {
        {
            let Ok(mut queue) = self.shared.queue.lock() else {
                return;
            };
            if queue.stopping || self.shared.progress.borrow().closed {
                log::warn!(
                    "Ignoring edit for {} at version {}: synchronizer is shut down",
                    self.shared.uri,
                    version
                );
                return;
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.tasks.push(Reverse(EditTask { version, seq, changes }));
            self.shared.highest_submitted.fetch_max(version, Ordering::AcqRel);
        }
        log::trace!("Submitted edit for {} at version {}", self.shared.uri, version);
        self.shared.wake.notify_one();
    }

    /// Resolve once every edit submitted before this call is applied, or
    /// the synchronizer has stopped
    pub async fn await_latest(&self) {
        let target = self.shared.highest_submitted.load(Ordering::Acquire);
        let mut progress = self.shared.progress.subscribe();
        let _ = progress
            .wait_for(|p| p.applied >= target || p.closed)
            .await;
    }

    pub fn highest_submitted(&self) -> i32 {
        self.shared.highest_submitted.load(Ordering::Acquire)
    }

    pub fn highest_applied(&self) -> i32 {
        self.shared.applied()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.progress.borrow().closed
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().map(|q| q.tasks.len()).unwrap_or(0)
    }

    /// Stop accepting edits; the worker applies what is queued, then exits
    pub fn shutdown(&self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.stopping = true;
        }
        self.shared.wake.notify_one();
    }

    /// Wait for the worker to exit after `shutdown`
    ///
    /// # Returns
    /// `false` if the timeout elapsed first
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let mut progress = self.shared.progress.subscribe();
        let closed = progress.wait_for(|p| p.closed);
        let done = tokio::time::timeout(timeout, closed).await.is_ok();
        done
    }

    /// Discard queued edits and stop the worker immediately
    ///
    /// Only for documents that are being torn down: unapplied edits are lost.
    pub fn shutdown_now(&self) {
        let discarded = match self.shared.queue.lock() {
            Ok(mut queue) => {
                queue.stopping = true;
                let discarded = queue.tasks.len();
                queue.tasks.clear();
                discarded
            }
            Err(_) => 0,
        };
        if discarded > 0 {
            log::warn!("Discarded {} unapplied edits for {}", discarded, self.shared.uri);
        }

        self.cancellation_token.cancel();
        if let Ok(mut slot) = self.worker_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.shared.mark_closed();
    }
}

impl Drop for ChangeSynchronizer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        if let Ok(mut slot) = self.worker_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.shared.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tower_lsp::lsp_types::{Position, Range};

    #[derive(Default)]
    struct MemoryTarget {
        content: Mutex<String>,
        version: Mutex<i32>,
        rebuilds: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl MemoryTarget {
        fn with_content(content: &str) -> Arc<Self> {
            let target = Self::default();
            *target.content.lock().unwrap() = content.to_string();
            Arc::new(target)
        }

        fn content(&self) -> String {
            self.content.lock().unwrap().clone()
        }

        fn rebuilds(&self) -> usize {
            self.rebuilds.load(Ordering::SeqCst)
        }
    }

    impl RebuildTarget for MemoryTarget {
        fn current_content(&self) -> Option<String> {
            Some(self.content())
        }

        fn rebuild(&self, content: String, version: i32) -> Result<()> {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("rebuild rejected");
            }
            *self.content.lock().unwrap() = content;
            *self.version.lock().unwrap() = version;
            Ok(())
        }
    }

    fn insert(line: u32, character: u32, text: &str) -> Vec<TextDocumentContentChangeEvent> {
        let at = Position::new(line, character);
        vec![TextDocumentContentChangeEvent {
            range: Some(Range::new(at, at)),
            range_length: None,
            text: text.to_string(),
        }]
    }

    fn uri() -> Url {
        Url::parse("file:///project/CommonModules/Тест/Ext/Module.bsl").unwrap()
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_rebuild() {
        let target = MemoryTarget::with_content("");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        for (i, ch) in ["а", "б", "в", "г", "д"].iter().enumerate() {
            sync.submit(i as i32 + 2, insert(0, i as u32, ch));
        }
        sync.await_latest().await;

        assert_eq!(target.content(), "абвгд");
        assert_eq!(target.rebuilds(), 1);
        assert_eq!(*target.version.lock().unwrap(), 6);
        assert_eq!(sync.highest_applied(), 6);
    }

    #[tokio::test]
    async fn test_out_of_order_submissions_apply_by_version() {
        let target = MemoryTarget::with_content("");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        sync.submit(3, insert(0, 1, "Б"));
        sync.submit(2, insert(0, 0, "А"));
        sync.await_latest().await;

        assert_eq!(target.content(), "АБ");
    }

    #[tokio::test]
    async fn test_stale_version_is_dropped() {
        let target = MemoryTarget::with_content("");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        sync.submit(3, insert(0, 0, "новое"));
        sync.await_latest().await;
        sync.submit(2, insert(0, 0, "старое"));
        sync.await_latest().await;
        tokio::task::yield_now().await;

        assert_eq!(target.content(), "новое");
        assert_eq!(sync.highest_applied(), 3);
    }

    #[tokio::test]
    async fn test_await_latest_without_edits_resolves() {
        let target = MemoryTarget::with_content("А");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 7);
        tokio::time::timeout(Duration::from_secs(1), sync.await_latest())
            .await
            .expect("nothing pending");
        assert_eq!(target.rebuilds(), 0);
    }

    #[tokio::test]
    async fn test_malformed_delta_still_advances_version() {
        let target = MemoryTarget::with_content("одна строка");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        sync.submit(2, insert(40, 0, "x"));
        sync.await_latest().await;

        assert_eq!(sync.highest_applied(), 2);
        assert_eq!(target.content(), "одна строка");
    }

    #[tokio::test]
    async fn test_rebuild_failure_does_not_block_next_edit() {
        let target = MemoryTarget::with_content("");
        target.fail_next.store(true, Ordering::SeqCst);
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        sync.submit(2, insert(0, 0, "А"));
        sync.await_latest().await;
        assert_eq!(target.content(), "");
        assert_eq!(sync.highest_applied(), 2);

        sync.submit(3, vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "Б".to_string(),
        }]);
        sync.await_latest().await;
        assert_eq!(target.content(), "Б");
        assert_eq!(target.rebuilds(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let target = MemoryTarget::with_content("");
        let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);

        sync.submit(2, insert(0, 0, "А"));
        sync.shutdown();
        assert!(sync.await_termination(Duration::from_secs(5)).await);
        assert_eq!(target.content(), "А");
        assert!(sync.is_closed());

        sync.submit(3, insert(0, 0, "Б"));
        assert_eq!(sync.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_now_discards_and_releases_waiters() {
        let target = MemoryTarget::with_content("");
        let sync = Arc::new(ChangeSynchronizer::new(uri(), target.clone(), 1));

        sync.submit(2, insert(0, 0, "А"));
        let waiter = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.await_latest().await })
        };
        sync.shutdown_now();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
        assert_eq!(target.content(), "");
        assert_eq!(target.rebuilds(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_queued_edits_apply_in_version_order(
            order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let letters: Vec<char> = "абвгдежзиклм".chars().collect();

            let (content, rebuilds) = runtime.block_on(async {
                let target = MemoryTarget::with_content("");
                let sync = ChangeSynchronizer::new(uri(), target.clone(), 1);
                for &i in &order {
                    sync.submit(i as i32 + 2, insert(0, i as u32, &letters[i].to_string()));
                }
                sync.await_latest().await;
                (target.content(), target.rebuilds())
            });

            prop_assert_eq!(content, letters.iter().collect::<String>());
            prop_assert_eq!(rebuilds, 1);
        }
    }
}
