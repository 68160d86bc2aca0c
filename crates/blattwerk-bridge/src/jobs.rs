// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job handles layered on the decode state machines.
//
// Every long-running operation a host starts — opening a document, saving
// one — is represented by a job with the five-state status enum. Status is
// derived from the underlying state machine's flags; no job is ever polled
// except through this enum or a blocking wait.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::human_errors::humanize_error;
use blattwerk_core::types::{DirEntry, DocumentKind, InitOutcome, JobId, JobStatus};
use blattwerk_document::directory::serialize_dirm;
use blattwerk_document::{ComponentKey, DocDirectory, Document};
use blattwerk_stream::{ChunkId, ContainerBuilder, FormKind, MAGIC};

use crate::messages::{Message, MessageQueue};

/// Handle on an opened document: the underlying [`Document`] plus a derived
/// job status.
pub struct DocumentJob {
    id: JobId,
    created_at: DateTime<Utc>,
    document: Arc<Document>,
    status_rx: watch::Receiver<JobStatus>,
    handle: Handle,
}

impl DocumentJob {
    pub(crate) fn new(document: Arc<Document>, queue: Arc<MessageQueue>, handle: Handle) -> Self {
        let (status_tx, status_rx) = watch::channel(JobStatus::NotStarted);

        let doc = Arc::clone(&document);
        handle.spawn(async move {
            status_tx.send_replace(JobStatus::Started);
            let status = match doc.wait_for_complete_init().await {
                InitOutcome::Ok => JobStatus::Ok,
                InitOutcome::Failed if doc.was_stopped() => JobStatus::Stopped,
                _ => JobStatus::Failed,
            };
            queue.push(Message::JobProgress {
                percent: 100,
                status,
            });
            status_tx.send_replace(status);
        });

        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            document,
            status_rx,
            handle,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Current job status.
    pub fn status(&self) -> JobStatus {
        *self.status_rx.borrow()
    }

    /// Await the terminal status from async code.
    pub async fn wait_async(&self) -> JobStatus {
        let mut rx = self.status_rx.clone();
        match rx.wait_for(|s| s.is_done()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Block the calling thread until the job settles. Host-thread-only.
    pub fn wait(&self) -> JobStatus {
        self.handle.clone().block_on(self.wait_async())
    }

    /// Cooperatively cancel the open: discovery and every member decode.
    pub fn stop(&self) {
        self.document.stop();
    }
}

/// Handle on a background save.
pub struct SaveJob {
    id: JobId,
    created_at: DateTime<Utc>,
    status_rx: watch::Receiver<JobStatus>,
    handle: Handle,
}

impl SaveJob {
    pub(crate) fn spawn(
        document: Arc<Document>,
        path: PathBuf,
        queue: Arc<MessageQueue>,
        handle: Handle,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(JobStatus::NotStarted);

        let task_queue = Arc::clone(&queue);
        handle.spawn(async move {
            status_tx.send_replace(JobStatus::Started);
            task_queue.push(Message::JobProgress {
                percent: 0,
                status: JobStatus::Started,
            });

            let outcome = save_document(&document, &path, &task_queue).await;
            let status = match &outcome {
                Ok(()) => JobStatus::Ok,
                Err(err) if err.is_cancellation() => JobStatus::Stopped,
                Err(_) => JobStatus::Failed,
            };
            if let Err(err) = &outcome {
                let human = humanize_error(err);
                warn!(path = %path.display(), error = %err, "save failed");
                task_queue.push(Message::Error {
                    text: human.message,
                });
                task_queue.push(Message::Info {
                    text: human.suggestion,
                });
            } else {
                info!(path = %path.display(), "document saved");
            }
            task_queue.push(Message::JobProgress {
                percent: 100,
                status,
            });
            status_tx.send_replace(status);
        });

        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            status_rx,
            handle,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        *self.status_rx.borrow()
    }

    pub async fn wait_async(&self) -> JobStatus {
        let mut rx = self.status_rx.clone();
        match rx.wait_for(|s| s.is_done()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Block the calling thread until the save settles. Host-thread-only.
    pub fn wait(&self) -> JobStatus {
        self.handle.clone().block_on(self.wait_async())
    }
}

/// Re-serialize the document at `path` as a bundled container.
async fn save_document(
    document: &Arc<Document>,
    path: &std::path::Path,
    queue: &Arc<MessageQueue>,
) -> Result<()> {
    if document.wait_for_complete_init().await != InitOutcome::Ok {
        if document.was_stopped() {
            return Err(BlattwerkError::Stopped);
        }
        return Err(BlattwerkError::UnknownDocument(
            "document never finished initializing".into(),
        ));
    }

    // A lone page file is copied through as-is.
    if document.kind() == Some(DocumentKind::SinglePage) {
        let root = document
            .get_component(ComponentKey::Page(0), false)?
            .ok_or(BlattwerkError::PageOutOfRange(0))?;
        let mut bytes = root.source().read_all().await?;
        if !bytes.starts_with(&MAGIC) {
            bytes.splice(0..0, MAGIC);
        }
        tokio::fs::write(path, bytes).await?;
        return Ok(());
    }

    let directory = document.directory().ok_or_else(|| {
        BlattwerkError::UnknownDocument("document has no directory to save".into())
    })?;

    // Collect every member's raw form bytes.
    let total = directory.entries.len();
    let mut members = Vec::with_capacity(total);
    for (index, entry) in directory.entries.iter().enumerate() {
        let component = document
            .get_component(ComponentKey::Id(&entry.load_name), false)?
            .ok_or_else(|| BlattwerkError::Unresolved(entry.load_name.clone()))?;
        let mut bytes = component.source().read_all().await?;
        // Standalone member files carry the root magic; embedded forms must
        // not.
        if bytes.starts_with(&MAGIC) {
            bytes.drain(..MAGIC.len());
        }
        members.push(bytes);
        queue.push(Message::JobProgress {
            percent: ((index + 1) * 90 / total) as u8,
            status: JobStatus::Started,
        });
    }

    let bytes = bundle(&directory.entries, &members)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Assemble a bundled root from directory entries and raw member forms.
/// Offsets are discovered with a first pass whose directory payload has the
/// same size as the final one.
fn bundle(entries: &[DirEntry], members: &[Vec<u8>]) -> Result<Vec<u8>> {
    let build = |offsets: &[usize]| -> Result<(Vec<u8>, Vec<usize>)> {
        let rebased: Vec<DirEntry> = entries
            .iter()
            .zip(members)
            .zip(offsets)
            .map(|((entry, bytes), &offset)| DirEntry {
                load_name: entry.load_name.clone(),
                save_name: entry.save_name.clone(),
                title: entry.title.clone(),
                offset: Some(offset as u32),
                size: bytes.len() as u32,
                kind: entry.kind,
                page_number: None,
            })
            .collect();
        let directory = DocDirectory::from_entries(true, rebased)?;

        let mut builder = ContainerBuilder::new(FormKind::Document)
            .chunk(ChunkId::DIRM, &serialize_dirm(&directory)?);
        for member in members {
            builder = builder.member(member.clone());
        }
        Ok(builder.build_root_with_offsets())
    };

    let (_, offsets) = build(&vec![0usize; members.len()])?;
    let (bytes, check) = build(&offsets)?;
    debug_assert_eq!(offsets, check);
    Ok(bytes)
}
