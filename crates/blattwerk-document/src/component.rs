// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The per-member incremental decode state machine.
//
// A component decodes one member file from its byte source, chunk by chunk,
// starting before all bytes have arrived. Include chunks resolve through the
// router (the owning document normally answers) and recursively start the
// included member's decode; the component settles `Ok` only once every
// include is itself settled. All lifecycle transitions are published on a
// watch channel and as flags-changed notices through the router.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{
    ComponentFlags, ComponentKind, DecodePhase, Location, PageInfo, RecoveryPolicy,
};
use blattwerk_fabric::{Node, NodeKind, Notice, Router};
use blattwerk_stream::{ByteSource, ChunkId, ChunkReader, RawChunk};

use crate::artifacts::Artifacts;

struct Inner {
    flags: ComponentFlags,
    kind: Option<ComponentKind>,
    artifacts: Artifacts,
    includes: Vec<Arc<Component>>,
    /// Human-readable text of the last failure, for job reporting.
    failure: Option<String>,
    task: Option<JoinHandle<()>>,
}

/// One decodable member file of a document.
pub struct Component {
    location: Location,
    router: Arc<Router>,
    handle: Handle,
    source: Arc<ByteSource>,
    state: Mutex<Inner>,
    flags_tx: watch::Sender<ComponentFlags>,
    me: Weak<Component>,
}

impl Component {
    pub fn new(
        router: Arc<Router>,
        handle: Handle,
        location: Location,
        source: Arc<ByteSource>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            location,
            router,
            handle,
            source,
            state: Mutex::new(Inner {
                flags: ComponentFlags::default(),
                kind: None,
                artifacts: Artifacts::default(),
                includes: Vec::new(),
                failure: None,
                task: None,
            }),
            flags_tx: watch::channel(ComponentFlags::default()).0,
            me: me.clone(),
        })
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Start the decode task. Idempotent: while decoding or once terminal
    /// this is a no-op returning a receiver for the same flags.
    pub fn start_decode(self: &Arc<Self>, policy: RecoveryPolicy) -> watch::Receiver<ComponentFlags> {
        let rx = self.flags_tx.subscribe();
        {
            let mut inner = self.state.lock();
            if !inner.flags.begin() {
                trace!(location = %self.location, "start_decode is a no-op");
                return rx;
            }
        }
        self.publish_flags();
        info!(location = %self.location, "decode started");

        let me = Arc::clone(self);
        let task = self.handle.spawn(async move {
            let outcome = me.run_decode(policy).await;
            me.finish(outcome);
        });
        self.state.lock().task = Some(task);
        rx
    }

    /// Cancel data access.
    ///
    /// With `blocked_only`, only reads suspended right now are aborted —
    /// the decode may continue if data later arrives. Without it, every
    /// future access on this component and, recursively, its includes fails
    /// immediately.
    pub fn stop(&self, blocked_only: bool) {
        debug!(location = %self.location, blocked_only, "stop requested");
        let mut seen = HashSet::new();
        self.stop_walk(blocked_only, &mut seen);
    }

    fn stop_walk(&self, blocked_only: bool, seen: &mut HashSet<usize>) {
        if !seen.insert(Arc::as_ptr(&self.source) as *const () as usize) {
            return;
        }
        self.source.stop(blocked_only);
        for include in self.includes() {
            include.stop_walk(blocked_only, seen);
        }
    }

    /// Await the terminal flag, recursing into includes.
    pub async fn wait_for_finish(&self) -> ComponentFlags {
        let mut rx = self.flags_tx.subscribe();
        let snapshot = match rx.wait_for(|f| f.phase.is_terminal()).await {
            Ok(flags) => *flags,
            Err(_) => self.flags(),
        };
        for include in self.includes() {
            Box::pin(include.wait_for_finish()).await;
        }
        snapshot
    }

    /// Clear terminal state and decoded artifacts for a fresh attempt.
    pub fn reset(&self) {
        {
            let mut inner = self.state.lock();
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            inner.artifacts.clear();
            inner.includes.clear();
            inner.failure = None;
            inner.flags.reset();
        }
        self.publish_flags();
        debug!(location = %self.location, "component reset");
    }

    // -- Accessors ------------------------------------------------------------

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kind(&self) -> Option<ComponentKind> {
        self.state.lock().kind
    }

    pub fn flags(&self) -> ComponentFlags {
        self.state.lock().flags
    }

    /// Subscribe to flag transitions without starting a decode.
    pub fn watch_flags(&self) -> watch::Receiver<ComponentFlags> {
        self.flags_tx.subscribe()
    }

    pub fn page_info(&self) -> Option<PageInfo> {
        self.state.lock().artifacts.info
    }

    /// Merged annotation bytes, if any arrived.
    pub fn annotations(&self) -> Option<Vec<u8>> {
        let inner = self.state.lock();
        (!inner.artifacts.annotations.is_empty()).then(|| inner.artifacts.annotations.clone())
    }

    pub fn hidden_text(&self) -> Option<Vec<u8>> {
        self.state.lock().artifacts.text.clone()
    }

    pub fn metadata(&self) -> Option<Vec<u8>> {
        self.state.lock().artifacts.meta.clone()
    }

    /// Navigation directory bytes, once a NAVM chunk was decoded.
    pub fn navigation(&self) -> Option<Vec<u8>> {
        self.state.lock().artifacts.navigation.clone()
    }

    pub fn thumbnail_count(&self) -> usize {
        self.state.lock().artifacts.thumbnails.len()
    }

    pub fn includes(&self) -> Vec<Arc<Component>> {
        self.state.lock().includes.clone()
    }

    /// Text of the last failure, for job reporting.
    pub fn failure_text(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// The raw byte stream backing this member (save path reads it back).
    pub fn source(&self) -> &Arc<ByteSource> {
        &self.source
    }

    /// Decoded artifact bytes held, for cache accounting.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().artifacts.memory_usage()
    }

    // -- Decode task ----------------------------------------------------------

    async fn run_decode(self: &Arc<Self>, policy: RecoveryPolicy) -> Result<()> {
        let mut reader = ChunkReader::open(Arc::clone(&self.source)).await?;
        let kind = reader.kind().component_kind().ok_or_else(|| {
            BlattwerkError::malformed("FORM", "member file carries a whole-document form")
        })?;
        self.state.lock().kind = Some(kind);
        let extent = reader.form_extent();

        loop {
            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // A garbled header leaves the walk unsynchronized; lenient
                // policies keep what was decoded, strict ones abort.
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err @ BlattwerkError::MissingData { .. }) => return Err(err),
                Err(err) => {
                    if matches!(policy, RecoveryPolicy::SkipChunks | RecoveryPolicy::KeepAll) {
                        warn!(location = %self.location, error = %err, "walk ended early");
                        break;
                    }
                    return Err(err);
                }
            };

            match self.decode_chunk(&chunk, policy) {
                Ok(()) => self.after_chunk(&chunk, reader.percent_done()),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => match policy {
                    RecoveryPolicy::Abort | RecoveryPolicy::SkipPages => return Err(err),
                    RecoveryPolicy::SkipChunks | RecoveryPolicy::KeepAll => {
                        warn!(location = %self.location, chunk = %chunk.id, error = %err, "chunk skipped");
                        self.notify(&Notice::Status {
                            text: format!("skipped damaged {} chunk in {}", chunk.id, self.location),
                        });
                    }
                },
            }
        }

        // A lenient policy may have ended the walk early, so ask the source
        // rather than assuming the walk consumed everything.
        let own_data = self.source.has_range(0, extent);
        self.update_flags(|f| {
            f.data_present |= own_data;
            f.includes_ready = true;
        });

        // The component settles only after every include has.
        let includes = self.includes();
        let mut includes_ok = true;
        for include in &includes {
            let flags = include.wait_for_finish().await;
            match flags.phase {
                DecodePhase::Ok => {}
                DecodePhase::Stopped => return Err(BlattwerkError::Stopped),
                _ => {
                    if policy == RecoveryPolicy::Abort {
                        return Err(BlattwerkError::malformed(
                            "INCL",
                            format!("included member {} failed to decode", include.location()),
                        ));
                    }
                    includes_ok = false;
                    warn!(include = %include.location(), "include failed, kept best-effort");
                }
            }
        }

        if own_data && includes_ok && includes.iter().all(|i| i.flags().all_data_present) {
            self.update_flags(|f| f.all_data_present = true);
        }
        Ok(())
    }

    fn decode_chunk(self: &Arc<Self>, chunk: &RawChunk, policy: RecoveryPolicy) -> Result<()> {
        if chunk.id == ChunkId::INCL {
            let id = String::from_utf8_lossy(&chunk.data)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string();
            if id.is_empty() {
                return Err(BlattwerkError::malformed(ChunkId::INCL, "empty include id"));
            }
            return self.materialize_include(&id, policy);
        }
        if chunk.id == ChunkId::FORM {
            // Nested member forms are walked through the directory, not here.
            return Ok(());
        }

        let recognized = self.state.lock().artifacts.absorb(chunk)?;
        if !recognized {
            trace!(location = %self.location, chunk = %chunk.id, "unrecognized chunk kept opaque");
        }
        Ok(())
    }

    /// Resolve an include id to a shared component and start its decode.
    fn materialize_include(self: &Arc<Self>, id: &str, policy: RecoveryPolicy) -> Result<()> {
        let node: Arc<dyn Node> = Arc::clone(self) as Arc<dyn Node>;
        let answer = self
            .router
            .component_for_id(&node, id)
            .and_then(|n| n.as_any().downcast::<Component>().ok())
            .ok_or_else(|| BlattwerkError::Unresolved(id.to_string()))?;

        if answer.location() == self.location() {
            return Err(BlattwerkError::malformed(ChunkId::INCL, "member includes itself"));
        }

        {
            let mut inner = self.state.lock();
            if inner
                .includes
                .iter()
                .any(|i| i.location() == answer.location())
            {
                return Ok(());
            }
            inner.includes.push(Arc::clone(&answer));
        }

        // Shared includes fan their notices out through us as well.
        let include_node: Arc<dyn Node> = Arc::clone(&answer) as Arc<dyn Node>;
        self.router.add_route(&include_node, &node);

        debug!(location = %self.location, include = %answer.location(), "include materialized");
        answer.start_decode(policy);
        Ok(())
    }

    fn after_chunk(self: &Arc<Self>, chunk: &RawChunk, percent: u8) {
        self.notify(&Notice::ChunkDecoded {
            location: self.location.clone(),
            chunk: chunk.id,
        });
        if chunk.id == ChunkId::INFO {
            self.notify(&Notice::LayoutChanged);
        }
        if Artifacts::repaints(chunk.id) {
            self.notify(&Notice::DisplayChanged);
        }
        self.notify(&Notice::Progress {
            percent,
            status: format!("decoding {}", self.location),
        });
    }

    fn finish(self: &Arc<Self>, outcome: Result<()>) {
        let terminal = match &outcome {
            Ok(()) => DecodePhase::Ok,
            Err(err) if err.is_cancellation() => DecodePhase::Stopped,
            Err(_) => DecodePhase::Failed,
        };
        if let Err(err) = &outcome {
            self.state.lock().failure = Some(err.to_string());
        }
        self.update_flags(|f| {
            f.settle(terminal);
        });

        match outcome {
            Ok(()) => info!(location = %self.location, "decode ok"),
            Err(err) if err.is_cancellation() => {
                info!(location = %self.location, "decode stopped");
                self.notify(&Notice::Status {
                    text: format!("decoding of {} was stopped", self.location),
                });
            }
            Err(err) => {
                warn!(location = %self.location, error = %err, "decode failed");
                self.notify(&Notice::Error {
                    text: format!("could not decode {}: {err}", self.location),
                });
            }
        }
    }

    // -- Flag publication -----------------------------------------------------

    fn update_flags(&self, mutate: impl FnOnce(&mut ComponentFlags)) {
        let changed = {
            let mut inner = self.state.lock();
            let old = inner.flags;
            mutate(&mut inner.flags);
            old != inner.flags
        };
        if changed {
            self.publish_flags();
        }
    }

    /// Mirror the current flags onto the watch channel and the router.
    /// Never called with the state lock held — handlers may call back in.
    fn publish_flags(&self) {
        let snapshot = self.flags();
        self.flags_tx.send_replace(snapshot);
        self.notify(&Notice::FlagsChanged {
            location: self.location.clone(),
            flags: snapshot,
        });
    }

    fn notify(&self, notice: &Notice) {
        if let Some(me) = self.me.upgrade() {
            let node: Arc<dyn Node> = me;
            self.router.notify(&node, notice);
        }
    }

    #[cfg(test)]
    pub(crate) fn stuff_annotations_for_tests(&self, bytes: Vec<u8>) {
        self.state.lock().artifacts.annotations = bytes;
    }
}

impl Node for Component {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Component
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        // A dropped component must unwind any still-blocked read instead of
        // leaving a task suspended forever.
        if let Some(task) = self.state.lock().task.take() {
            task.abort();
        }
        self.source.stop(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blattwerk_fabric::NodeId;
    use blattwerk_stream::{ContainerBuilder, FormKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info_payload() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&100u16.to_be_bytes());
        data.extend_from_slice(&150u16.to_be_bytes());
        data.extend_from_slice(&[26, 0]);
        data.extend_from_slice(&300u16.to_le_bytes());
        data.extend_from_slice(&[22, 1]);
        data
    }

    fn page_bytes(extra: impl FnOnce(ContainerBuilder) -> ContainerBuilder) -> Vec<u8> {
        extra(
            ContainerBuilder::new(FormKind::Page).chunk(ChunkId::INFO, &info_payload()),
        )
        .chunk(ChunkId::SJBZ, b"mask-data")
        .build_root()
    }

    fn component_for(router: &Arc<Router>, name: &str, source: Arc<ByteSource>) -> Arc<Component> {
        Component::new(
            Arc::clone(router),
            Handle::current(),
            Location::new(name),
            source,
        )
    }

    /// Listener recording notice kinds.
    struct NoticeLog {
        seen: Mutex<Vec<&'static str>>,
    }

    impl Node for NoticeLog {
        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn on_notice(&self, _from: NodeId, notice: &Notice) -> bool {
            self.seen.lock().push(notice.kind_name());
            true
        }
    }

    /// Answers component-for-id with a prepared include.
    struct IncludeOwner {
        include: Arc<Component>,
        asked: AtomicUsize,
    }

    impl Node for IncludeOwner {
        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn component_for_id(&self, id: &str) -> Option<Arc<dyn Node>> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            (id == "dict0020").then(|| Arc::clone(&self.include) as Arc<dyn Node>)
        }
    }

    #[tokio::test]
    async fn decodes_a_complete_page() {
        let router = Router::new();
        let component = component_for(
            &router,
            "p1.djvu",
            ByteSource::from_bytes(page_bytes(|b| b)),
        );

        component.start_decode(RecoveryPolicy::Abort);
        let flags = component.wait_for_finish().await;

        assert_eq!(flags.phase, DecodePhase::Ok);
        assert!(flags.data_present);
        assert!(flags.all_data_present);
        assert_eq!(component.kind(), Some(ComponentKind::Page));
        let info = component.page_info().expect("info decoded");
        assert_eq!((info.width, info.height), (100, 150));
    }

    #[tokio::test]
    async fn start_decode_is_idempotent() {
        let router = Router::new();
        let source = ByteSource::new();
        let component = component_for(&router, "p1.djvu", Arc::clone(&source));

        component.start_decode(RecoveryPolicy::Abort);
        component.start_decode(RecoveryPolicy::Abort);
        assert_eq!(component.flags().phase, DecodePhase::Decoding);

        source.append(&page_bytes(|b| b));
        source.close();
        let flags = component.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Ok);

        // A third call after the terminal flag changes nothing.
        component.start_decode(RecoveryPolicy::Abort);
        assert_eq!(component.flags().phase, DecodePhase::Ok);
    }

    #[tokio::test]
    async fn notices_flow_to_routed_listeners() {
        let router = Router::new();
        let component = component_for(
            &router,
            "p1.djvu",
            ByteSource::from_bytes(page_bytes(|b| b)),
        );
        let log = Arc::new(NoticeLog {
            seen: Mutex::new(Vec::new()),
        });
        let component_node: Arc<dyn Node> = Arc::clone(&component) as Arc<dyn Node>;
        let log_node: Arc<dyn Node> = Arc::clone(&log) as Arc<dyn Node>;
        router.add_route(&component_node, &log_node);

        component.start_decode(RecoveryPolicy::Abort);
        component.wait_for_finish().await;

        let seen = log.seen.lock();
        assert!(seen.contains(&"chunk-decoded"));
        assert!(seen.contains(&"flags-changed"));
        assert!(seen.contains(&"layout-changed"));
        assert!(seen.contains(&"display-changed"));
    }

    #[tokio::test]
    async fn malformed_chunk_respects_the_recovery_policy() {
        let bad_info = ContainerBuilder::new(FormKind::Page)
            .chunk(ChunkId::INFO, &[1, 2]) // far too short
            .chunk(ChunkId::SJBZ, b"mask-data")
            .build_root();

        let router = Router::new();
        let strict = component_for(&router, "strict.djvu", ByteSource::from_bytes(bad_info.clone()));
        strict.start_decode(RecoveryPolicy::Abort);
        let flags = strict.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Failed);
        assert!(strict.failure_text().expect("failure recorded").contains("INFO"));

        let lenient = component_for(&router, "lenient.djvu", ByteSource::from_bytes(bad_info));
        lenient.start_decode(RecoveryPolicy::SkipChunks);
        let flags = lenient.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Ok);
        assert!(lenient.page_info().is_none());
    }

    #[tokio::test]
    async fn stop_mid_decode_settles_stopped_not_failed() {
        let router = Router::new();
        let source = ByteSource::new();
        let component = component_for(&router, "p1.djvu", Arc::clone(&source));

        let full = page_bytes(|b| b);
        source.append(&full[..10]);
        component.start_decode(RecoveryPolicy::Abort);
        tokio::task::yield_now().await;

        component.stop(false);
        let flags = component.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Stopped);
    }

    #[tokio::test]
    async fn unresolvable_include_fails_the_decode() {
        let router = Router::new();
        let bytes = page_bytes(|b| b.chunk(ChunkId::INCL, b"nowhere.djbz"));
        let component = component_for(&router, "p1.djvu", ByteSource::from_bytes(bytes));

        component.start_decode(RecoveryPolicy::Abort);
        let flags = component.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Failed);
        assert!(component.failure_text().expect("failure").contains("nowhere.djbz"));
    }

    #[tokio::test]
    async fn include_gates_all_data_present() {
        let router = Router::new();

        let dict_source = ByteSource::new();
        let include = component_for(&router, "dict0020.djbz", Arc::clone(&dict_source));
        let owner = Arc::new(IncludeOwner {
            include,
            asked: AtomicUsize::new(0),
        });

        let page_source = ByteSource::new();
        let page = component_for(&router, "p1.djvu", Arc::clone(&page_source));
        let page_node: Arc<dyn Node> = Arc::clone(&page) as Arc<dyn Node>;
        let owner_node: Arc<dyn Node> = Arc::clone(&owner) as Arc<dyn Node>;
        router.add_route(&page_node, &owner_node);

        page_source.append(&page_bytes(|b| b.chunk(ChunkId::INCL, b"dict0020")));
        page_source.close();
        let mut rx = page.start_decode(RecoveryPolicy::Abort);

        // The page's own bytes are complete, but the dictionary's are not.
        rx.wait_for(|f| f.data_present).await.expect("data present");
        assert!(!page.flags().phase.is_terminal());
        assert!(!page.flags().all_data_present);
        assert_eq!(owner.asked.load(Ordering::SeqCst), 1);

        // Supplying the dictionary lets everything settle.
        dict_source.append(
            &ContainerBuilder::new(FormKind::Include)
                .chunk(ChunkId::DJBZ, b"shared-shapes")
                .build_member(),
        );
        dict_source.close();

        let flags = page.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Ok);
        assert!(flags.all_data_present);
        assert_eq!(page.includes().len(), 1);
    }

    #[tokio::test]
    async fn reset_allows_a_fresh_attempt() {
        let router = Router::new();
        let source = ByteSource::new();
        let component = component_for(&router, "p1.djvu", Arc::clone(&source));

        source.append(b"gar");
        source.close();
        component.start_decode(RecoveryPolicy::Abort);
        let flags = component.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Failed);

        component.reset();
        assert_eq!(component.flags().phase, DecodePhase::NotStarted);
        assert!(component.page_info().is_none());
    }
}
