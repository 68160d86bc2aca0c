// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Blattwerk.

use thiserror::Error;

/// Top-level error type for all Blattwerk operations.
#[derive(Debug, Error)]
pub enum BlattwerkError {
    // -- Malformed structure --
    #[error("malformed {chunk} chunk: {detail}")]
    MalformedChunk { chunk: String, detail: String },

    #[error("document directory invalid: {0}")]
    BadDirectory(String),

    #[error("unrecognized document layout: {0}")]
    UnknownDocument(String),

    // -- Missing data --
    #[error("needed bytes [{offset}, +{len}) never arrived")]
    MissingData { offset: u64, len: u64 },

    // -- Cancellation --
    #[error("operation stopped")]
    Stopped,

    // -- Resolution --
    #[error("no reachable node could resolve id \"{0}\"")]
    Unresolved(String),

    #[error("page {0} is out of range")]
    PageOutOfRange(u32),

    // -- Passthrough --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BlattwerkError {
    /// Whether this error represents user-initiated cancellation rather than
    /// corruption or loss — callers surface the two very differently.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn malformed(chunk: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        Self::MalformedChunk {
            chunk: chunk.to_string(),
            detail: detail.into(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BlattwerkError>;
