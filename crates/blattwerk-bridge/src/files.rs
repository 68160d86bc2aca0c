// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local-file byte server.
//
// Answers byte requests for locations that name readable local files, so
// documents open from disk without any host stream plumbing. Wired closer
// to the document than the context listener, it pre-empts stream allocation
// for everything the filesystem can satisfy.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use blattwerk_core::types::Location;
use blattwerk_fabric::{Node, NodeKind};
use blattwerk_stream::ByteSource;

/// Serves local files as byte sources.
pub struct FileServer {
    handle: Handle,
}

impl FileServer {
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self { handle })
    }

    /// Map a location to a filesystem path: a `file:` prefix is stripped,
    /// anything else is tried as a plain path.
    fn path_for(location: &Location) -> PathBuf {
        let raw = location.as_str();
        let raw = raw.strip_prefix("file://").unwrap_or(raw);
        let raw = raw.strip_prefix("file:").unwrap_or(raw);
        Path::new(raw).to_path_buf()
    }
}

impl Node for FileServer {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ByteServer
    }

    fn bytes_for(&self, location: &Location) -> Option<Arc<ByteSource>> {
        let path = Self::path_for(location);
        if !path.is_file() {
            return None;
        }

        let source = ByteSource::new();
        let feeder = Arc::clone(&source);
        debug!(%location, path = %path.display(), "serving local file");
        self.handle.spawn(async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    feeder.append(&bytes);
                    feeder.close();
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file read failed");
                    // Readers observe missing data rather than hanging.
                    feeder.close();
                }
            }
        });
        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn serves_existing_files_and_declines_missing_ones() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"file-bytes").expect("write");

        let server = FileServer::new(Handle::current());
        let location = Location::new(file.path().to_string_lossy().as_ref());

        let source = server.bytes_for(&location).expect("served");
        assert_eq!(source.read_all().await.expect("read"), b"file-bytes");

        assert!(server.bytes_for(&Location::new("/no/such/file.djvu")).is_none());
    }

    #[test]
    fn file_scheme_prefixes_are_stripped() {
        assert_eq!(
            FileServer::path_for(&Location::new("file:///tmp/a.djvu")),
            PathBuf::from("/tmp/a.djvu")
        );
        assert_eq!(
            FileServer::path_for(&Location::new("/tmp/b.djvu")),
            PathBuf::from("/tmp/b.djvu")
        );
    }
}
