// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structural walker for the chunked document container.
//
// A container is an optional 4-byte magic, then one FORM: a 4-byte id, a
// 32-bit big-endian content length, a 4-byte secondary id naming the form
// kind, then a run of typed chunks (id + length + payload), each starting on
// an even byte. Codec payloads are opaque to the walker; it only establishes
// structure. Reading suspends on the underlying byte source, so a form can
// be walked while its bytes are still arriving.

use std::sync::Arc;

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::ComponentKind;

use crate::source::ByteSource;

/// Leading magic of a root container file.
pub const MAGIC: [u8; 4] = *b"AT&T";

/// Four-character chunk identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub [u8; 4]);

impl ChunkId {
    pub const FORM: Self = Self(*b"FORM");

    // Form secondary ids.
    pub const DJVM: Self = Self(*b"DJVM");
    pub const DJVU: Self = Self(*b"DJVU");
    pub const DJVI: Self = Self(*b"DJVI");
    pub const THUM: Self = Self(*b"THUM");

    // Structural chunks.
    pub const DIRM: Self = Self(*b"DIRM");
    pub const DIR0: Self = Self(*b"DIR0");
    pub const NAVM: Self = Self(*b"NAVM");
    pub const INFO: Self = Self(*b"INFO");
    pub const INCL: Self = Self(*b"INCL");

    // Codec payload chunks (opaque here).
    pub const SJBZ: Self = Self(*b"Sjbz");
    pub const DJBZ: Self = Self(*b"Djbz");
    pub const BG44: Self = Self(*b"BG44");
    pub const FG44: Self = Self(*b"FG44");
    pub const FGBZ: Self = Self(*b"FGbz");
    pub const ANTA: Self = Self(*b"ANTa");
    pub const ANTZ: Self = Self(*b"ANTz");
    pub const TXTA: Self = Self(*b"TXTa");
    pub const TXTZ: Self = Self(*b"TXTz");
    pub const META: Self = Self(*b"META");
    pub const TH44: Self = Self(*b"TH44");
    pub const CIDA: Self = Self(*b"CIDa");
}

impl std::fmt::Display for ChunkId {
    /// Prints the four characters when printable, hex otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

/// What a form contains, per its secondary id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    /// Multi-page container (DJVM).
    Document,
    /// A single page (DJVU).
    Page,
    /// A shared include (DJVI).
    Include,
    /// A thumbnail bundle (THUM).
    Thumbnails,
}

impl FormKind {
    pub fn from_id(id: ChunkId) -> Option<Self> {
        match id {
            ChunkId::DJVM => Some(Self::Document),
            ChunkId::DJVU => Some(Self::Page),
            ChunkId::DJVI => Some(Self::Include),
            ChunkId::THUM => Some(Self::Thumbnails),
            _ => None,
        }
    }

    pub fn id(self) -> ChunkId {
        match self {
            Self::Document => ChunkId::DJVM,
            Self::Page => ChunkId::DJVU,
            Self::Include => ChunkId::DJVI,
            Self::Thumbnails => ChunkId::THUM,
        }
    }

    /// The member-file kind this form decodes into; `None` for the
    /// whole-document form.
    pub fn component_kind(self) -> Option<ComponentKind> {
        match self {
            Self::Document => None,
            Self::Page => Some(ComponentKind::Page),
            Self::Include => Some(ComponentKind::Include),
            Self::Thumbnails => Some(ComponentKind::Thumbnails),
        }
    }
}

/// One typed chunk pulled off the stream.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub id: ChunkId,
    /// Offset of the chunk header within the source window. Directory
    /// offsets point at nested member forms through this.
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Sequential walker over one form's chunks.
pub struct ChunkReader {
    src: Arc<ByteSource>,
    kind: FormKind,
    /// Next unread position within the source window.
    pos: usize,
    /// End of the form's content.
    end: usize,
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("kind", &self.kind)
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish()
    }
}

impl ChunkReader {
    /// Read the container header, suspending until enough bytes exist.
    ///
    /// Accepts the root magic as optional so the same walker opens both
    /// whole files and member windows.
    pub async fn open(src: Arc<ByteSource>) -> Result<Self> {
        let head = src.read_at(0, 4).await?;
        let start = if head[..] == MAGIC { 4 } else { 0 };

        let header = src.read_at(start, 12).await?;
        let id = ChunkId(header[0..4].try_into().expect("4 bytes"));
        if id != ChunkId::FORM {
            return Err(BlattwerkError::malformed(
                "FORM",
                format!("expected a FORM header, found {id}"),
            ));
        }

        let content_len = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes")) as usize;
        if content_len < 4 {
            return Err(BlattwerkError::malformed("FORM", "content shorter than its kind id"));
        }

        let secondary = ChunkId(header[8..12].try_into().expect("4 bytes"));
        let kind = FormKind::from_id(secondary).ok_or_else(|| {
            BlattwerkError::malformed("FORM", format!("unknown form kind {secondary}"))
        })?;

        Ok(Self {
            src,
            kind,
            pos: start + 12,
            end: start + 8 + content_len,
        })
    }

    pub fn kind(&self) -> FormKind {
        self.kind
    }

    /// Total bytes from the start of the source window through the end of
    /// the form — what "all bytes present" means for this form.
    pub fn form_extent(&self) -> usize {
        self.end
    }

    /// Fraction of the form already walked, in percent.
    pub fn percent_done(&self) -> u8 {
        if self.end == 0 {
            return 100;
        }
        ((self.pos * 100) / self.end).min(100) as u8
    }

    /// Pull the next chunk, suspending for its bytes. `None` at form end.
    pub async fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        // Chunks start on even bytes; skip the pad byte if the previous
        // payload had odd length.
        if self.pos % 2 == 1 {
            self.pos += 1;
        }
        if self.pos >= self.end {
            return Ok(None);
        }
        if self.end - self.pos < 8 {
            return Err(BlattwerkError::malformed("FORM", "trailing bytes after last chunk"));
        }

        let header = self.src.read_at(self.pos, 8).await?;
        let id = ChunkId(header[0..4].try_into().expect("4 bytes"));
        let len = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes")) as usize;
        if self.pos + 8 + len > self.end {
            return Err(BlattwerkError::malformed(
                id,
                format!("chunk of {len} bytes overruns its form"),
            ));
        }

        let data = self.src.read_at(self.pos + 8, len).await?;
        let chunk = RawChunk {
            id,
            offset: self.pos,
            data,
        };
        self.pos += 8 + len;
        Ok(Some(chunk))
    }
}
