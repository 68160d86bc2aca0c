// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Inverse of the chunk walker: composes forms back into container bytes.
// Used by the save path to re-serialize bundled documents and by tests to
// fabricate synthetic ones.

use crate::chunks::{ChunkId, FormKind, MAGIC};

enum Part {
    Chunk(ChunkId, Vec<u8>),
    /// A pre-built nested member form (bytes start with its FORM header).
    Member(Vec<u8>),
}

/// Assembles one form from typed chunks and nested member forms.
///
/// Every part is placed on an even byte offset, matching what the walker
/// expects; a member form therefore keeps its internal alignment when
/// embedded at the offset this builder reports for it.
pub struct ContainerBuilder {
    kind: FormKind,
    parts: Vec<Part>,
}

impl ContainerBuilder {
    pub fn new(kind: FormKind) -> Self {
        Self {
            kind,
            parts: Vec::new(),
        }
    }

    pub fn chunk(mut self, id: ChunkId, data: &[u8]) -> Self {
        self.parts.push(Part::Chunk(id, data.to_vec()));
        self
    }

    /// Embed a member form previously produced by [`Self::build_member`].
    pub fn member(mut self, form_bytes: Vec<u8>) -> Self {
        self.parts.push(Part::Member(form_bytes));
        self
    }

    /// Serialize as a root file (leading magic included). The second return
    /// is the offset of each embedded member, in insertion order — directory
    /// construction needs these.
    pub fn build_root_with_offsets(self) -> (Vec<u8>, Vec<usize>) {
        self.build(true)
    }

    pub fn build_root(self) -> Vec<u8> {
        self.build(true).0
    }

    /// Serialize as a nested member form (no magic).
    pub fn build_member(self) -> Vec<u8> {
        self.build(false).0
    }

    fn build(self, with_magic: bool) -> (Vec<u8>, Vec<usize>) {
        let mut buf = Vec::new();
        if with_magic {
            buf.extend_from_slice(&MAGIC);
        }
        let header_at = buf.len();
        buf.extend_from_slice(&ChunkId::FORM.0);
        buf.extend_from_slice(&[0u8; 4]); // length, patched below
        buf.extend_from_slice(&self.kind.id().0);

        let mut member_offsets = Vec::new();
        for part in self.parts {
            if buf.len() % 2 == 1 {
                buf.push(0);
            }
            match part {
                Part::Chunk(id, data) => {
                    buf.extend_from_slice(&id.0);
                    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                    buf.extend_from_slice(&data);
                }
                Part::Member(bytes) => {
                    member_offsets.push(buf.len());
                    buf.extend_from_slice(&bytes);
                }
            }
        }

        let content_len = (buf.len() - header_at - 8) as u32;
        buf[header_at + 4..header_at + 8].copy_from_slice(&content_len.to_be_bytes());
        (buf, member_offsets)
    }
}
