// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Notification vocabulary carried by the routing fabric.
//
// Notices fan out to every reachable node; requests (id→location,
// id→component, bytes-for) are methods on the Node trait instead, because
// they return answers and stop at the first one.

use blattwerk_core::types::{ComponentFlags, DocumentFlags, Location};
use blattwerk_stream::ChunkId;

/// A broadcast notification.
#[derive(Debug, Clone)]
pub enum Notice {
    /// Something went wrong; `text` is already human-readable.
    Error { text: String },
    /// Informational status line.
    Status { text: String },
    /// One chunk of a member file finished decoding.
    ChunkDecoded { location: Location, chunk: ChunkId },
    /// A member file's lifecycle flags changed.
    FlagsChanged { location: Location, flags: ComponentFlags },
    /// The whole document's discovery flags changed.
    DocumentFlagsChanged { flags: DocumentFlags },
    /// A page reached terminal-ok with all of its data (includes included).
    PageReady { page: u32 },
    /// A thumbnail bundle covering `page` finished decoding.
    ThumbnailReady { page: u32 },
    /// Page geometry changed; hosts should re-run layout.
    LayoutChanged,
    /// Page pixels changed; hosts should repaint.
    DisplayChanged,
    /// Decode progress heartbeat.
    Progress { percent: u8, status: String },
}

impl Notice {
    /// Whether senders care that at least one receiver handled this notice
    /// (unhandled errors/status lines fall back to the sender's own logging).
    pub fn expects_handling(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Status { .. })
    }

    /// Stable name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
            Self::ChunkDecoded { .. } => "chunk-decoded",
            Self::FlagsChanged { .. } => "flags-changed",
            Self::DocumentFlagsChanged { .. } => "document-flags-changed",
            Self::PageReady { .. } => "page-ready",
            Self::ThumbnailReady { .. } => "thumbnail-ready",
            Self::LayoutChanged => "layout-changed",
            Self::DisplayChanged => "display-changed",
            Self::Progress { .. } => "progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_and_status_expect_handling() {
        assert!(Notice::Error { text: "x".into() }.expects_handling());
        assert!(Notice::Status { text: "x".into() }.expects_handling());
        assert!(!Notice::LayoutChanged.expects_handling());
        assert!(!Notice::PageReady { page: 0 }.expects_handling());
    }
}
