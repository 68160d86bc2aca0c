// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blattwerk Stream — append-only byte sources that decode tasks suspend on,
// plus the structural chunked-container walker and its inverse builder.

pub mod build;
pub mod chunks;
pub mod source;

pub use build::ContainerBuilder;
pub use chunks::{ChunkId, ChunkReader, FormKind, MAGIC, RawChunk};
pub use source::ByteSource;
