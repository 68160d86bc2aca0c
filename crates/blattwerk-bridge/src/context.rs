// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The host context: one per session.
//
// Owns the decode runtime, the routing fabric, the component cache, the
// message queue, and the stream table for externally-fed documents. Its
// listener node sits on every document's route and translates fabric
// notices into host messages; byte requests it cannot satisfy locally are
// turned into new-stream-needed announcements the host answers with
// `stream_write`/`stream_close`.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{Location, StreamId};
use blattwerk_document::{ComponentCache, Document};
use blattwerk_fabric::{Node, NodeId, NodeKind, Notice, Router};
use blattwerk_stream::ByteSource;

use crate::files::FileServer;
use crate::jobs::{DocumentJob, SaveJob};
use crate::messages::{Message, MessageQueue};

struct StreamTable {
    next: u32,
    by_id: HashMap<u32, Arc<ByteSource>>,
    by_location: HashMap<Location, u32>,
}

/// Listener node wired onto every document the context opens.
struct ContextNode {
    queue: Arc<MessageQueue>,
    streams: Mutex<StreamTable>,
    /// Documents whose doc-info-ready has been announced.
    announced: Mutex<HashSet<NodeId>>,
}

impl ContextNode {
    /// Stream backing `location`, allocating (and announcing) a fresh one
    /// the first time.
    fn stream_for(&self, location: &Location) -> (StreamId, Arc<ByteSource>) {
        let (id, source, fresh) = {
            let mut table = self.streams.lock();
            if let Some(&id) = table.by_location.get(location) {
                (StreamId(id), Arc::clone(&table.by_id[&id]), false)
            } else {
                let id = table.next;
                table.next += 1;
                let source = ByteSource::new();
                table.by_id.insert(id, Arc::clone(&source));
                table.by_location.insert(location.clone(), id);
                (StreamId(id), source, true)
            }
        };
        if fresh {
            debug!(stream = %id, %location, "stream allocated");
            self.queue.push(Message::NewStreamNeeded {
                stream: id,
                name: location.file_name().to_string(),
                location: location.clone(),
            });
        }
        (id, source)
    }

    fn stream(&self, id: StreamId) -> Option<Arc<ByteSource>> {
        self.streams.lock().by_id.get(&id.0).cloned()
    }
}

impl Node for ContextNode {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Listener
    }

    fn bytes_for(&self, location: &Location) -> Option<Arc<ByteSource>> {
        // Wired behind the file server, so anything reaching here really
        // does need the host to stream it.
        Some(self.stream_for(location).1)
    }

    fn on_notice(&self, from: NodeId, notice: &Notice) -> bool {
        match notice {
            Notice::Error { text } => self.queue.push(Message::Error { text: text.clone() }),
            Notice::Status { text } => self.queue.push(Message::Info { text: text.clone() }),
            Notice::ChunkDecoded { chunk, .. } => self.queue.push(Message::ChunkDecoded {
                chunk: chunk.to_string(),
            }),
            Notice::DocumentFlagsChanged { flags } => {
                if flags.navigation_known() && self.announced.lock().insert(from) {
                    self.queue.push(Message::DocInfoReady);
                }
            }
            Notice::PageReady { page } => {
                self.queue.push(Message::PageInfoReady { page: *page });
            }
            Notice::ThumbnailReady { page } => {
                self.queue.push(Message::ThumbnailReady { page: *page });
            }
            Notice::LayoutChanged => self.queue.push(Message::RelayoutNeeded),
            Notice::DisplayChanged => self.queue.push(Message::RedisplayNeeded),
            Notice::Progress { percent, .. } => self.queue.push(Message::JobProgress {
                percent: *percent,
                status: blattwerk_core::types::JobStatus::Started,
            }),
            Notice::FlagsChanged { .. } => {}
        }
        true
    }
}

/// Host-facing session object.
pub struct Context {
    runtime: Runtime,
    router: Arc<Router>,
    cache: Arc<ComponentCache>,
    queue: Arc<MessageQueue>,
    listener: Arc<ContextNode>,
    file_server: Arc<FileServer>,
    config: EngineConfig,
}

impl Context {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("blattwerk-decode");
        if config.worker_threads > 0 {
            // One worker is the supported single-threaded-host mode.
            builder.worker_threads(config.worker_threads);
        }
        let runtime = builder.build()?;

        let queue = MessageQueue::new();
        let listener = Arc::new(ContextNode {
            queue: Arc::clone(&queue),
            streams: Mutex::new(StreamTable {
                next: 0,
                by_id: HashMap::new(),
                by_location: HashMap::new(),
            }),
            announced: Mutex::new(HashSet::new()),
        });
        let file_server = FileServer::new(runtime.handle().clone());

        info!(workers = config.worker_threads, "context created");
        Ok(Arc::new(Self {
            runtime,
            router: Router::new(),
            cache: ComponentCache::new(config.cache_max_bytes),
            queue,
            listener,
            file_server,
            config,
        }))
    }

    /// Runtime handle, for hosts that want to drive async calls themselves.
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// The routing fabric, for hosts wiring custom nodes.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    // -- Opening documents ----------------------------------------------------

    /// Open a document whose bytes the engine can fetch itself (local
    /// files); anything unreadable locally falls back to host streams.
    pub fn open_location(&self, location: impl Into<Location>) -> DocumentJob {
        let location = location.into();
        info!(%location, "opening document");
        let parents: [Arc<dyn Node>; 2] = [
            Arc::clone(&self.file_server) as Arc<dyn Node>,
            Arc::clone(&self.listener) as Arc<dyn Node>,
        ];
        let document = Document::new(
            Arc::clone(&self.router),
            self.runtime.handle().clone(),
            location,
            &parents,
            Arc::clone(&self.cache),
            self.config.recovery,
        );
        DocumentJob::new(document, Arc::clone(&self.queue), self.runtime.handle().clone())
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> DocumentJob {
        self.open_location(Location::new(path.as_ref().to_string_lossy().as_ref()))
    }

    /// Open a document fed entirely through host streams. The root stream
    /// is announced immediately; member files needed later allocate fresh
    /// ids.
    pub fn open_streamed(&self, name: &str) -> (DocumentJob, StreamId) {
        let location = Location::new(name);
        let (stream, _) = self.listener.stream_for(&location);
        info!(%location, %stream, "opening streamed document");
        let parents: [Arc<dyn Node>; 1] = [Arc::clone(&self.listener) as Arc<dyn Node>];
        let document = Document::new(
            Arc::clone(&self.router),
            self.runtime.handle().clone(),
            location,
            &parents,
            Arc::clone(&self.cache),
            self.config.recovery,
        );
        let job = DocumentJob::new(document, Arc::clone(&self.queue), self.runtime.handle().clone());
        (job, stream)
    }

    // -- Stream feeds ---------------------------------------------------------

    pub fn stream_write(&self, stream: StreamId, bytes: &[u8]) -> Result<()> {
        let source = self
            .listener
            .stream(stream)
            .ok_or_else(|| BlattwerkError::Unresolved(format!("stream {stream}")))?;
        source.append(bytes);
        Ok(())
    }

    /// Close a stream. With `stop`, in-flight decodes reading it settle
    /// `Stopped` instead of waiting for data that will never come.
    pub fn stream_close(&self, stream: StreamId, stop: bool) -> Result<()> {
        let source = self
            .listener
            .stream(stream)
            .ok_or_else(|| BlattwerkError::Unresolved(format!("stream {stream}")))?;
        if stop {
            source.stop(false);
        } else {
            source.close();
        }
        Ok(())
    }

    // -- Messages -------------------------------------------------------------

    pub fn message_peek(&self) -> Option<Message> {
        self.queue.peek()
    }

    pub fn message_pop(&self) -> Option<Message> {
        self.queue.pop()
    }

    /// Block until a message is available (leaving it queued) or the
    /// timeout elapses. Host-thread-only.
    pub fn message_wait(&self, timeout: Option<Duration>) -> Option<Message> {
        self.queue.wait(timeout)
    }

    pub fn set_message_callback(&self, callback: Option<Arc<dyn Fn(&Message) + Send + Sync>>) {
        self.queue.set_callback(callback);
    }

    // -- Derived jobs ---------------------------------------------------------

    /// Re-serialize an opened document as a bundled file at `path`.
    pub fn save_document(&self, job: &DocumentJob, path: impl Into<PathBuf>) -> SaveJob {
        SaveJob::spawn(
            Arc::clone(job.document()),
            path.into(),
            Arc::clone(&self.queue),
            self.runtime.handle().clone(),
        )
    }

    // -- Cache ----------------------------------------------------------------

    pub fn cache_set_max_bytes(&self, max_bytes: usize) {
        self.cache.set_max_bytes(max_bytes);
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
    }
}
