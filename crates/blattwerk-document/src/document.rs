// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The whole-document structural-discovery state machine.
//
// A document is created synchronously in a not-yet-discovered state; a
// background task classifies the layout, decodes the directory, and settles
// initialization. Pages can be requested the whole time: locations resolve
// as precisely as discovery allows, inventing provisional ones when it has
// not progressed far enough, and member components are created through the
// cache and wired into the routing fabric.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{
    ComponentFlags, DecodePhase, DirEntry, DirEntryKind, DocumentFlags, DocumentKind, InitOutcome,
    Location, PageInfo, RecoveryPolicy,
};
use blattwerk_fabric::{Node, NodeId, NodeKind, Notice, Router};
use blattwerk_stream::{ByteSource, ChunkId, ChunkReader, FormKind};

use crate::cache::ComponentCache;
use crate::component::Component;
use crate::directory::{DocDirectory, parse_dir0, parse_dirm};

/// Key for member lookup: by directory id or by page number.
#[derive(Debug, Clone, Copy)]
pub enum ComponentKey<'a> {
    Id(&'a str),
    Page(u32),
}

struct DocState {
    flags: DocumentFlags,
    kind: Option<DocumentKind>,
    directory: Option<DocDirectory>,
    source: Option<Arc<ByteSource>>,
    navigation: Option<Vec<u8>>,
    components: HashMap<Location, Weak<Component>>,
    pages_announced: HashSet<u32>,
    failure: Option<String>,
    stopped: bool,
    task: Option<JoinHandle<()>>,
}

/// A whole multi-page document.
pub struct Document {
    router: Arc<Router>,
    handle: Handle,
    location: Location,
    cache: Arc<ComponentCache>,
    recovery: RecoveryPolicy,
    state: Mutex<DocState>,
    flags_tx: watch::Sender<DocumentFlags>,
    me: Weak<Document>,
}

impl Document {
    /// Create the document and spawn its discovery task.
    ///
    /// `parents` (typically the host's byte servers and listener) are wired
    /// before the task starts, so no notification can be missed; they also
    /// answer the byte requests discovery makes, in the given preference
    /// order.
    pub fn new(
        router: Arc<Router>,
        handle: Handle,
        location: Location,
        parents: &[Arc<dyn Node>],
        cache: Arc<ComponentCache>,
        recovery: RecoveryPolicy,
    ) -> Arc<Self> {
        let doc = Arc::new_cyclic(|me| Self {
            router: Arc::clone(&router),
            handle: handle.clone(),
            location: location.clone(),
            cache,
            recovery,
            state: Mutex::new(DocState {
                flags: DocumentFlags::default(),
                kind: None,
                directory: None,
                source: None,
                navigation: None,
                components: HashMap::new(),
                pages_announced: HashSet::new(),
                failure: None,
                stopped: false,
                task: None,
            }),
            flags_tx: watch::channel(DocumentFlags::default()).0,
            me: me.clone(),
        });

        let node = doc.as_node();
        for parent in parents {
            router.add_route(&node, parent);
        }
        router.register_alias(location.as_str(), &node);

        let me = Arc::clone(&doc);
        let task = handle.spawn(async move {
            let outcome = me.discover().await;
            me.finish_init(outcome);
        });
        doc.state.lock().task = Some(task);
        doc
    }

    fn as_node(&self) -> Arc<dyn Node> {
        self.me.upgrade().expect("document is alive") as Arc<dyn Node>
    }

    // -- Accessors ------------------------------------------------------------

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn flags(&self) -> DocumentFlags {
        self.state.lock().flags
    }

    pub fn watch_flags(&self) -> watch::Receiver<DocumentFlags> {
        self.flags_tx.subscribe()
    }

    pub fn kind(&self) -> Option<DocumentKind> {
        self.state.lock().kind
    }

    /// Page count, authoritative only once navigation is known.
    pub fn page_count(&self) -> Option<usize> {
        let state = self.state.lock();
        state.directory.as_ref().map(DocDirectory::page_count)
    }

    /// Navigation directory bytes (NAVM) of the root form, if present.
    pub fn navigation(&self) -> Option<Vec<u8>> {
        self.state.lock().navigation.clone()
    }

    /// Snapshot of the decoded directory (save paths re-serialize it).
    pub fn directory(&self) -> Option<DocDirectory> {
        self.state.lock().directory.clone()
    }

    pub fn failure_text(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Whether a stop (rather than corruption) ended initialization.
    pub fn was_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Resolve a page number to a member location. Empty until discovery has
    /// progressed far enough for this document's layout.
    pub fn page_to_location(&self, page: u32) -> Option<Location> {
        let state = self.state.lock();
        state
            .directory
            .as_ref()
            .and_then(|dir| dir.page_entry(page))
            .map(|entry| self.member_location(&entry.load_name))
    }

    fn member_location(&self, name: &str) -> Location {
        self.location.sibling(name)
    }

    // -- Page / component lookup ----------------------------------------------

    /// Resolve page `n`, create or reuse its component, and start decoding.
    /// Returns immediately; the handle may be partially decoded.
    pub fn get_page(self: &Arc<Self>, page: u32, listener: Option<&Arc<dyn Node>>) -> Result<Page> {
        let component = self
            .get_component(ComponentKey::Page(page), false)?
            .ok_or(BlattwerkError::PageOutOfRange(page))?;
        if let Some(listener) = listener {
            let node: Arc<dyn Node> = Arc::clone(&component) as Arc<dyn Node>;
            self.router.add_route(&node, listener);
        }
        component.start_decode(self.recovery);
        Ok(Page { number: page, component })
    }

    /// Like [`Self::get_page`] but awaiting the terminal decode flag.
    pub async fn get_page_wait(
        self: &Arc<Self>,
        page: u32,
        listener: Option<&Arc<dyn Node>>,
    ) -> Result<Page> {
        let handle = self.get_page(page, listener)?;
        handle.component.wait_for_finish().await;
        Ok(handle)
    }

    /// Same resolution path as [`Self::get_page`], returning the raw
    /// component. With `dont_create` the call only probes for an existing
    /// one, with no side effects.
    pub fn get_component(
        self: &Arc<Self>,
        key: ComponentKey<'_>,
        dont_create: bool,
    ) -> Result<Option<Arc<Component>>> {
        let (location, entry) = self.resolve_key(&key)?;

        if let Some(existing) = self.lookup_component(&location) {
            return Ok(Some(existing));
        }
        if dont_create {
            return Ok(None);
        }

        let source = self.member_source(&location, entry.as_ref())?;
        let fresh = Component::new(
            Arc::clone(&self.router),
            self.handle.clone(),
            location.clone(),
            source,
        );

        // Two concurrent requests must share one component; whoever loses
        // the installation race adopts the winner's.
        let (component, won) = {
            let mut state = self.state.lock();
            match state.components.get(&location).and_then(Weak::upgrade) {
                Some(existing) => (existing, false),
                None => {
                    state.components.retain(|_, weak| weak.strong_count() > 0);
                    state
                        .components
                        .insert(location.clone(), Arc::downgrade(&fresh));
                    (fresh, true)
                }
            }
        };
        if won {
            // Member notices flow through the document to whatever listens
            // to it.
            let component_node: Arc<dyn Node> = Arc::clone(&component) as Arc<dyn Node>;
            self.router.add_route(&component_node, &self.as_node());
            self.cache.put(location, Arc::clone(&component));
        }
        Ok(Some(component))
    }

    /// Map a key to a location, inventing a provisional one when discovery
    /// has not caught up; the provisional member is superseded (not rebound)
    /// once the real directory lands.
    fn resolve_key(&self, key: &ComponentKey<'_>) -> Result<(Location, Option<DirEntry>)> {
        let state = self.state.lock();
        match key {
            ComponentKey::Page(n) => {
                if let Some(dir) = &state.directory {
                    return match dir.page_entry(*n) {
                        Some(entry) => {
                            Ok((self.member_location(&entry.load_name), Some(entry.clone())))
                        }
                        None => Err(BlattwerkError::PageOutOfRange(*n)),
                    };
                }
                debug!(page = n, "directory unknown, inventing a provisional location");
                Ok((self.location.provisional_page(*n), None))
            }
            ComponentKey::Id(id) => {
                if let Some(dir) = &state.directory {
                    return match dir.entry_for_name(id) {
                        Some(entry) => {
                            Ok((self.member_location(&entry.load_name), Some(entry.clone())))
                        }
                        None => Err(BlattwerkError::Unresolved((*id).to_string())),
                    };
                }
                Ok((self.member_location(id), None))
            }
        }
    }

    fn lookup_component(&self, location: &Location) -> Option<Arc<Component>> {
        if let Some(cached) = self.cache.get(location) {
            return Some(cached);
        }
        // Evicted from the cache but still alive elsewhere (for example,
        // mid-decode): reuse and re-install it.
        let survivor = self.state.lock().components.get(location)?.upgrade()?;
        self.cache.put(location.clone(), Arc::clone(&survivor));
        Some(survivor)
    }

    /// Byte stream for a member: bundled members are windows of the root
    /// stream, everything else is requested through the fabric.
    fn member_source(
        &self,
        location: &Location,
        entry: Option<&DirEntry>,
    ) -> Result<Arc<ByteSource>> {
        if let Some(entry) = entry {
            if let Some(offset) = entry.offset {
                let state = self.state.lock();
                let root = state
                    .source
                    .as_ref()
                    .ok_or_else(|| BlattwerkError::Unresolved(location.to_string()))?;
                return Ok(root.slice(offset as usize, entry.size as usize));
            }
        }
        self.router
            .bytes_for(&self.as_node(), location)
            .ok_or_else(|| BlattwerkError::Unresolved(location.to_string()))
    }

    // -- Discovery task -------------------------------------------------------

    async fn discover(self: &Arc<Self>) -> Result<()> {
        let source = self
            .router
            .bytes_for(&self.as_node(), &self.location)
            .ok_or_else(|| BlattwerkError::Unresolved(self.location.to_string()))?;
        self.state.lock().source = Some(Arc::clone(&source));

        let mut reader = ChunkReader::open(Arc::clone(&source)).await?;
        match reader.kind() {
            FormKind::Page => {
                self.set_kind(DocumentKind::SinglePage);
                let entry = DirEntry {
                    load_name: self.location.file_name().to_string(),
                    save_name: None,
                    title: None,
                    offset: Some(0),
                    size: reader.form_extent() as u32,
                    kind: DirEntryKind::Page,
                    page_number: None,
                };
                self.install_directory(DocDirectory::from_entries(true, vec![entry])?, false);
                Ok(())
            }
            FormKind::Document => {
                // Walk the whole root form: the directory chunk settles page
                // resolution long before the walk (and init) completes.
                let mut found = false;
                while let Some(chunk) = reader.next_chunk().await? {
                    match chunk.id {
                        ChunkId::DIRM => {
                            let dir = parse_dirm(&chunk.data)?;
                            self.set_kind(if dir.bundled {
                                DocumentKind::Bundled
                            } else {
                                DocumentKind::Indirect
                            });
                            self.install_directory(dir, false);
                            found = true;
                        }
                        ChunkId::DIR0 => {
                            let dir = parse_dir0(&chunk.data)?;
                            self.set_kind(if dir.bundled {
                                DocumentKind::OldBundled
                            } else {
                                DocumentKind::OldIndexed
                            });
                            self.install_directory(dir, true);
                            found = true;
                        }
                        ChunkId::NAVM => {
                            self.state.lock().navigation = Some(chunk.data);
                        }
                        _ => {}
                    }
                }
                if !found {
                    return Err(BlattwerkError::BadDirectory(
                        "document form carries no directory chunk".into(),
                    ));
                }
                Ok(())
            }
            kind @ (FormKind::Include | FormKind::Thumbnails) => Err(
                BlattwerkError::UnknownDocument(format!("root form is a {kind:?} member file")),
            ),
        }
    }

    fn set_kind(&self, kind: DocumentKind) {
        {
            let mut state = self.state.lock();
            state.kind = Some(kind);
        }
        self.update_doc_flags(|f| f.kind_known = true);
        self.notify(&Notice::Status {
            text: format!("document layout: {kind}"),
        });
        info!(location = %self.location, %kind, "document layout classified");
    }

    fn install_directory(&self, dir: DocDirectory, old_layout: bool) {
        let pages = dir.page_count();
        self.state.lock().directory = Some(dir);
        self.update_doc_flags(|f| {
            if old_layout {
                f.old_nav_known = true;
            } else {
                f.directory_known = true;
            }
        });
        self.notify(&Notice::Status {
            text: format!("directory decoded: {pages} page(s)"),
        });
    }

    fn finish_init(&self, outcome: Result<()>) {
        match &outcome {
            Ok(()) => info!(location = %self.location, "document init ok"),
            Err(err) => {
                let mut state = self.state.lock();
                state.failure = Some(err.to_string());
                if err.is_cancellation() {
                    state.stopped = true;
                }
            }
        }
        self.update_doc_flags(|f| {
            f.init = if outcome.is_ok() {
                InitOutcome::Ok
            } else {
                InitOutcome::Failed
            };
        });
        if let Err(err) = outcome {
            if err.is_cancellation() {
                self.notify(&Notice::Status {
                    text: format!("loading of {} was stopped", self.location),
                });
            } else {
                warn!(location = %self.location, error = %err, "document init failed");
                self.notify(&Notice::Error {
                    text: format!("could not open {}: {err}", self.location),
                });
            }
        }
    }

    /// Await settled initialization.
    pub async fn wait_for_complete_init(&self) -> InitOutcome {
        let mut rx = self.flags_tx.subscribe();
        match rx.wait_for(|f| f.init.is_settled()).await {
            Ok(flags) => flags.init,
            Err(_) => self.flags().init,
        }
    }

    /// Halt discovery and every member decode this document spawned.
    pub fn stop(&self) {
        let (task, source, components) = {
            let mut state = self.state.lock();
            state.stopped = true;
            (
                state.task.take(),
                state.source.clone(),
                state
                    .components
                    .values()
                    .filter_map(Weak::upgrade)
                    .collect::<Vec<_>>(),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(source) = source {
            source.stop(false);
        }
        for component in components {
            component.stop(false);
        }
        self.update_doc_flags(|f| {
            if !f.init.is_settled() {
                f.init = InitOutcome::Failed;
            }
        });
        debug!(location = %self.location, "document stopped");
    }

    // -- Flag publication -----------------------------------------------------

    fn update_doc_flags(&self, mutate: impl FnOnce(&mut DocumentFlags)) {
        let changed = {
            let mut state = self.state.lock();
            let old = state.flags;
            mutate(&mut state.flags);
            old != state.flags
        };
        if changed {
            let snapshot = self.flags();
            self.flags_tx.send_replace(snapshot);
            self.notify(&Notice::DocumentFlagsChanged { flags: snapshot });
        }
    }

    fn notify(&self, notice: &Notice) {
        if let Some(me) = self.me.upgrade() {
            let node: Arc<dyn Node> = me;
            self.router.notify(&node, notice);
        }
    }

    /// Re-announce a settled member as a page or thumbnail event.
    fn announce_member(&self, member: &Location) {
        enum Ready {
            Page(u32),
            Thumbnails(usize),
        }

        let ready = {
            let mut state = self.state.lock();
            let entry_facts = state.directory.as_ref().and_then(|dir| {
                dir.entry_for_name(member.file_name())
                    .map(|entry| (entry.kind, entry.page_number))
            });
            let Some((kind, page_number)) = entry_facts else {
                return;
            };
            match kind {
                DirEntryKind::Page => match page_number {
                    Some(n) if state.pages_announced.insert(n) => Some(Ready::Page(n)),
                    _ => None,
                },
                DirEntryKind::Thumbnails => {
                    let count = state
                        .components
                        .get(member)
                        .and_then(Weak::upgrade)
                        .map(|c| c.thumbnail_count())
                        .unwrap_or(0);
                    Some(Ready::Thumbnails(count))
                }
                _ => None,
            }
        };

        match ready {
            Some(Ready::Page(page)) => {
                self.notify(&Notice::PageReady { page });
            }
            Some(Ready::Thumbnails(count)) => {
                for page in 0..count as u32 {
                    self.notify(&Notice::ThumbnailReady { page });
                }
            }
            None => {}
        }
    }
}

impl Node for Document {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Document
    }

    fn location_for_id(&self, id: &str) -> Option<Location> {
        let state = self.state.lock();
        let dir = state.directory.as_ref()?;
        dir.entry_for_name(id)
            .map(|entry| self.member_location(&entry.load_name))
    }

    fn component_for_id(&self, id: &str) -> Option<Arc<dyn Node>> {
        let doc = self.me.upgrade()?;
        match doc.get_component(ComponentKey::Id(id), false) {
            Ok(Some(component)) => Some(component as Arc<dyn Node>),
            Ok(None) => None,
            Err(err) => {
                debug!(id, error = %err, "member lookup failed");
                None
            }
        }
    }

    fn bytes_for(&self, location: &Location) -> Option<Arc<ByteSource>> {
        // Bundled members are windows of the root stream.
        let state = self.state.lock();
        let dir = state.directory.as_ref()?;
        let entry = dir.entry_for_name(location.file_name())?;
        let offset = entry.offset?;
        state
            .source
            .as_ref()
            .map(|root| root.slice(offset as usize, entry.size as usize))
    }

    fn on_notice(&self, _from: NodeId, notice: &Notice) -> bool {
        if let Notice::FlagsChanged { location, flags } = notice {
            if flags.phase == DecodePhase::Ok && flags.all_data_present {
                self.announce_member(location);
            }
        }
        false
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(source) = state.source.take() {
            source.stop(false);
        }
    }
}

/// A page handle: a numbered view over the member component decoding it.
pub struct Page {
    number: u32,
    component: Arc<Component>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("number", &self.number).finish()
    }
}

impl Page {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    pub fn flags(&self) -> ComponentFlags {
        self.component.flags()
    }

    pub fn info(&self) -> Option<PageInfo> {
        self.component.page_info()
    }

    pub async fn wait_for_finish(&self) -> ComponentFlags {
        self.component.wait_for_finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::serialize_dirm;
    use blattwerk_stream::ContainerBuilder;

    fn info_payload() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&100u16.to_be_bytes());
        data.extend_from_slice(&150u16.to_be_bytes());
        data.extend_from_slice(&[26, 0]);
        data.extend_from_slice(&300u16.to_le_bytes());
        data.extend_from_slice(&[22, 1]);
        data
    }

    fn dict_member() -> Vec<u8> {
        ContainerBuilder::new(FormKind::Include)
            .chunk(ChunkId::DJBZ, b"shared-shapes")
            .build_member()
    }

    fn page_member(include: Option<&[u8]>) -> Vec<u8> {
        let mut builder =
            ContainerBuilder::new(FormKind::Page).chunk(ChunkId::INFO, &info_payload());
        if let Some(id) = include {
            builder = builder.chunk(ChunkId::INCL, id);
        }
        builder.chunk(ChunkId::SJBZ, b"mask-data").build_member()
    }

    fn entry(name: &str, kind: DirEntryKind, offset: Option<u32>, size: u32) -> DirEntry {
        DirEntry {
            load_name: name.to_string(),
            save_name: None,
            title: None,
            offset,
            size,
            kind,
            page_number: None,
        }
    }

    /// Root + one shared dictionary + two pages (page 1 references the
    /// dictionary), as a current bundled file. Also returns the member
    /// offsets (dict, p1, p2).
    fn build_bundled_with_offsets() -> (Vec<u8>, Vec<usize>) {
        let dict = dict_member();
        let p1 = page_member(Some(b"dict0020.djbz"));
        let p2 = page_member(None);
        let sizes = [dict.len() as u32, p1.len() as u32, p2.len() as u32];

        let build = |offsets: [u32; 3]| {
            let dir = DocDirectory::from_entries(
                true,
                vec![
                    entry("dict0020.djbz", DirEntryKind::Include, Some(offsets[0]), sizes[0]),
                    entry("p0001.djvu", DirEntryKind::Page, Some(offsets[1]), sizes[1]),
                    entry("p0002.djvu", DirEntryKind::Page, Some(offsets[2]), sizes[2]),
                ],
            )
            .expect("directory");
            ContainerBuilder::new(FormKind::Document)
                .chunk(ChunkId::DIRM, &serialize_dirm(&dir).expect("dirm"))
                .member(dict.clone())
                .member(p1.clone())
                .member(p2.clone())
                .build_root_with_offsets()
        };

        // First pass with placeholder offsets to learn the layout; the DIRM
        // payload size does not depend on the offset values.
        let (_, offsets) = build([0, 0, 0]);
        let (root, check) = build([offsets[0] as u32, offsets[1] as u32, offsets[2] as u32]);
        assert_eq!(offsets, check);
        (root, offsets)
    }

    fn build_bundled() -> Vec<u8> {
        build_bundled_with_offsets().0
    }

    /// Host-side test node: serves byte streams by location and records
    /// notices.
    struct TestHost {
        streams: Mutex<HashMap<Location, Arc<ByteSource>>>,
        notices: Mutex<Vec<&'static str>>,
        pages_ready: Mutex<Vec<u32>>,
    }

    impl TestHost {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(HashMap::new()),
                notices: Mutex::new(Vec::new()),
                pages_ready: Mutex::new(Vec::new()),
            })
        }

        fn serve(&self, location: &str, bytes: Vec<u8>) {
            self.streams
                .lock()
                .insert(Location::new(location), ByteSource::from_bytes(bytes));
        }

        fn serve_source(&self, location: &str, source: Arc<ByteSource>) {
            self.streams.lock().insert(Location::new(location), source);
        }

        fn as_node(self: &Arc<Self>) -> Arc<dyn Node> {
            Arc::clone(self) as Arc<dyn Node>
        }
    }

    impl Node for TestHost {
        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn kind(&self) -> NodeKind {
            NodeKind::ByteServer
        }

        fn bytes_for(&self, location: &Location) -> Option<Arc<ByteSource>> {
            self.streams.lock().get(location).cloned()
        }

        fn on_notice(&self, _from: NodeId, notice: &Notice) -> bool {
            self.notices.lock().push(notice.kind_name());
            if let Notice::PageReady { page } = notice {
                self.pages_ready.lock().push(*page);
            }
            true
        }
    }

    fn open(
        host: &Arc<TestHost>,
        location: &str,
    ) -> (Arc<Router>, Arc<ComponentCache>, Arc<Document>) {
        let router = Router::new();
        let cache = ComponentCache::new(usize::MAX);
        let doc = Document::new(
            Arc::clone(&router),
            Handle::current(),
            Location::new(location),
            &[host.as_node()],
            Arc::clone(&cache),
            RecoveryPolicy::Abort,
        );
        (router, cache, doc)
    }

    #[tokio::test]
    async fn discovers_a_bundled_document() {
        let host = TestHost::new();
        host.serve("/d/book.djvu", build_bundled());
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");

        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Ok);
        assert_eq!(doc.kind(), Some(DocumentKind::Bundled));
        assert_eq!(doc.page_count(), Some(2));
        assert_eq!(
            doc.page_to_location(0).expect("page 0").as_str(),
            "/d/p0001.djvu"
        );
        assert!(doc.page_to_location(2).is_none());
    }

    #[tokio::test]
    async fn decodes_a_page_and_its_shared_dictionary() {
        let host = TestHost::new();
        host.serve("/d/book.djvu", build_bundled());
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");
        doc.wait_for_complete_init().await;

        let page = doc.get_page_wait(0, None).await.expect("page 0");
        assert_eq!(page.flags().phase, DecodePhase::Ok);
        assert!(page.flags().all_data_present);
        assert_eq!(page.info().expect("info").width, 100);
        assert_eq!(page.component().includes().len(), 1);
        assert!(host.pages_ready.lock().contains(&0));
    }

    #[tokio::test]
    async fn page_resolves_once_the_directory_lands_even_before_init() {
        let host = TestHost::new();
        let (root, offsets) = build_bundled_with_offsets();
        let first_member = offsets[0];
        let source = ByteSource::new();
        host.serve_source("/d/book.djvu", Arc::clone(&source));
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");

        // Feed the header and directory, but hold back the members: the
        // directory flag settles while init stays pending.
        let mut rx = doc.watch_flags();
        source.append(&root[..first_member]);
        rx.wait_for(|f| f.directory_known).await.expect("directory");
        assert_eq!(doc.flags().init, InitOutcome::Pending);

        // Page 0 is already requestable and starts decoding.
        let page = doc.get_page(0, None).expect("page 0");
        assert_eq!(page.component().location().as_str(), "/d/p0001.djvu");
        assert!(!page.flags().phase.is_terminal());

        // The rest of the stream settles everything.
        source.append(&root[first_member..]);
        source.close();
        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Ok);
        // Page 0 needs the dictionary too, so its terminal flag proves the
        // include chain ran.
        let flags = page.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Ok);
    }

    #[tokio::test]
    async fn provisional_pages_are_superseded_by_discovery() {
        let host = TestHost::new();
        let root_source = ByteSource::new();
        host.serve_source("/d/book.djvu", Arc::clone(&root_source));
        // The host can already serve the invented page location.
        host.serve("/d/page0000.djvu", {
            let mut bytes = page_member(None);
            bytes.splice(0..0, blattwerk_stream::chunks::MAGIC);
            bytes
        });
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");

        // Nothing discovered yet: page 0 decodes speculatively from the
        // provisional location.
        let speculative = doc.get_page(0, None).expect("provisional page");
        assert_eq!(
            speculative.component().location().as_str(),
            "/d/page0000.djvu"
        );
        let flags = speculative.wait_for_finish().await;
        assert_eq!(flags.phase, DecodePhase::Ok);

        // Discovery lands; the same request now yields the real member.
        root_source.append(&build_bundled());
        root_source.close();
        doc.wait_for_complete_init().await;
        let real = doc.get_page(0, None).expect("real page");
        assert_eq!(real.component().location().as_str(), "/d/p0001.djvu");
    }

    #[tokio::test]
    async fn out_of_range_pages_fail_once_navigation_is_known() {
        let host = TestHost::new();
        host.serve("/d/book.djvu", build_bundled());
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");
        doc.wait_for_complete_init().await;

        let err = doc.get_page(9, None).expect_err("page 9");
        assert!(matches!(err, BlattwerkError::PageOutOfRange(9)));
    }

    #[tokio::test]
    async fn dont_create_probes_without_side_effects() {
        let host = TestHost::new();
        host.serve("/d/book.djvu", build_bundled());
        let (_router, cache, doc) = open(&host, "/d/book.djvu");
        doc.wait_for_complete_init().await;

        let probe = doc
            .get_component(ComponentKey::Id("p0002.djvu"), true)
            .expect("probe");
        assert!(probe.is_none());
        assert_eq!(cache.len(), 0);

        doc.get_component(ComponentKey::Id("p0002.djvu"), false)
            .expect("create")
            .expect("component");
        assert_eq!(cache.len(), 1);
        let again = doc
            .get_component(ComponentKey::Id("p0002.djvu"), true)
            .expect("probe again");
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn old_indexed_documents_resolve_members_as_siblings() {
        // DIR0 with two name rows.
        let mut dir0 = vec![0x00, 0, 2];
        dir0.extend_from_slice(b"a.djvu\0b.djvu\0");
        let root = ContainerBuilder::new(FormKind::Document)
            .chunk(ChunkId::DIR0, &dir0)
            .build_root();

        let host = TestHost::new();
        host.serve("/old/index.djvu", root);
        host.serve("/old/a.djvu", {
            let mut bytes = page_member(None);
            bytes.splice(0..0, blattwerk_stream::chunks::MAGIC);
            bytes
        });
        let (_router, _cache, doc) = open(&host, "/old/index.djvu");

        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Ok);
        assert_eq!(doc.kind(), Some(DocumentKind::OldIndexed));
        assert!(doc.flags().old_nav_known);
        assert!(!doc.flags().directory_known);

        let page = doc.get_page_wait(0, None).await.expect("page 0");
        assert_eq!(page.component().location().as_str(), "/old/a.djvu");
        assert_eq!(page.flags().phase, DecodePhase::Ok);
    }

    #[tokio::test]
    async fn single_page_files_resolve_page_zero_immediately() {
        let host = TestHost::new();
        host.serve("/d/lone.djvu", {
            let mut bytes = page_member(None);
            bytes.splice(0..0, blattwerk_stream::chunks::MAGIC);
            bytes
        });
        let (_router, _cache, doc) = open(&host, "/d/lone.djvu");

        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Ok);
        assert_eq!(doc.kind(), Some(DocumentKind::SinglePage));
        assert_eq!(doc.page_count(), Some(1));

        let page = doc.get_page_wait(0, None).await.expect("page 0");
        assert_eq!(page.flags().phase, DecodePhase::Ok);
        assert_eq!(
            page.component().location().as_str(),
            "/d/lone.djvu"
        );
    }

    #[tokio::test]
    async fn stop_mid_discovery_reads_as_stopped() {
        let host = TestHost::new();
        let source = ByteSource::new();
        host.serve_source("/d/book.djvu", Arc::clone(&source));
        let (_router, _cache, doc) = open(&host, "/d/book.djvu");

        source.append(&build_bundled()[..10]);
        tokio::task::yield_now().await;
        source.stop(false);

        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Failed);
        assert!(doc.was_stopped());
    }

    #[tokio::test]
    async fn missing_directory_fails_init_with_a_notice() {
        let root = ContainerBuilder::new(FormKind::Document)
            .chunk(ChunkId::NAVM, b"nav-bytes")
            .build_root();
        let host = TestHost::new();
        host.serve("/d/bad.djvu", root);
        let (_router, _cache, doc) = open(&host, "/d/bad.djvu");

        assert_eq!(doc.wait_for_complete_init().await, InitOutcome::Failed);
        assert!(!doc.was_stopped());
        assert!(doc.failure_text().expect("failure").contains("directory"));
        assert!(doc.navigation().is_some());
        assert!(host.notices.lock().contains(&"error"));
    }
}
