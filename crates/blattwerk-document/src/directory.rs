// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document directory parsing and serialization.
//
// DIRM is the current-layout directory: a version byte whose high bit marks
// the bundled variant, per-member offsets (bundled only), sizes, kind flags,
// and NUL-terminated names. Historical writers compress the tail; that
// belongs to the external codec layer, so this walker speaks the plain
// rendition behind the same parse/serialize seam and rejects versions it
// does not know. DIR0 is the legacy table: offset rows for old bundled
// files, bare name rows for old indexed ones.

use std::collections::HashMap;

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{DirEntry, DirEntryKind};

/// Directory format version this walker speaks.
pub const DIRM_VERSION: u8 = 1;

const FLAG_KIND_MASK: u8 = 0x03;
const FLAG_HAS_TITLE: u8 = 0x40;
const FLAG_HAS_SAVE_NAME: u8 = 0x80;

/// Decoded document directory with name and page lookups.
#[derive(Debug, Clone)]
pub struct DocDirectory {
    /// Whether member bytes live inside the root file.
    pub bundled: bool,
    pub entries: Vec<DirEntry>,
    by_name: HashMap<String, usize>,
    pages: Vec<usize>,
}

impl DocDirectory {
    /// Build lookups from raw entries, assigning page numbers in order.
    pub fn from_entries(bundled: bool, mut entries: Vec<DirEntry>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut pages = Vec::new();
        for (idx, entry) in entries.iter_mut().enumerate() {
            if entry.is_page() {
                entry.page_number = Some(pages.len() as u32);
                pages.push(idx);
            }
            if by_name.insert(entry.load_name.clone(), idx).is_some() {
                return Err(BlattwerkError::BadDirectory(format!(
                    "duplicate member name \"{}\"",
                    entry.load_name
                )));
            }
            if let Some(save) = &entry.save_name {
                by_name.entry(save.clone()).or_insert(idx);
            }
        }
        Ok(Self {
            bundled,
            entries,
            by_name,
            pages,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_entry(&self, page: u32) -> Option<&DirEntry> {
        self.pages
            .get(page as usize)
            .map(|&idx| &self.entries[idx])
    }

    pub fn entry_for_name(&self, name: &str) -> Option<&DirEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Entries flagged as thumbnail bundles, in order.
    pub fn thumbnail_entries(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == DirEntryKind::Thumbnails)
    }
}

fn kind_to_bits(kind: DirEntryKind) -> u8 {
    match kind {
        DirEntryKind::Include => 0,
        DirEntryKind::Page => 1,
        DirEntryKind::Thumbnails => 2,
        DirEntryKind::SharedAnnotation => 3,
    }
}

fn kind_from_bits(bits: u8) -> DirEntryKind {
    match bits & FLAG_KIND_MASK {
        0 => DirEntryKind::Include,
        1 => DirEntryKind::Page,
        2 => DirEntryKind::Thumbnails,
        _ => DirEntryKind::SharedAnnotation,
    }
}

/// Cursor over a directory payload with truncation-checked reads.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    chunk: &'static str,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(BlattwerkError::BadDirectory(format!(
                "{} truncated at byte {}",
                self.chunk, self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(BlattwerkError::BadDirectory(format!(
                "{} name missing its terminator",
                self.chunk
            )));
        }
        let name = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1; // the NUL
        if name.is_empty() {
            return Err(BlattwerkError::BadDirectory(format!("{} empty member name", self.chunk)));
        }
        Ok(name)
    }
}

/// Parse a DIRM payload (current layouts).
pub fn parse_dirm(data: &[u8]) -> Result<DocDirectory> {
    let mut cur = Cursor {
        data,
        pos: 0,
        chunk: "DIRM",
    };

    let version_byte = cur.u8()?;
    let bundled = version_byte & 0x80 != 0;
    let version = version_byte & 0x7f;
    if version != DIRM_VERSION {
        return Err(BlattwerkError::BadDirectory(format!(
            "DIRM version {version} not understood"
        )));
    }

    let count = cur.u16()? as usize;
    let mut offsets = Vec::with_capacity(count);
    if bundled {
        for _ in 0..count {
            offsets.push(cur.u32()?);
        }
    }
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count {
        sizes.push(cur.u24()?);
    }
    let mut flags = Vec::with_capacity(count);
    for _ in 0..count {
        flags.push(cur.u8()?);
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let load_name = cur.name()?;
        let save_name = (flags[i] & FLAG_HAS_SAVE_NAME != 0)
            .then(|| cur.name())
            .transpose()?;
        let title = (flags[i] & FLAG_HAS_TITLE != 0).then(|| cur.name()).transpose()?;
        entries.push(DirEntry {
            load_name,
            save_name,
            title,
            offset: bundled.then(|| offsets[i]),
            size: sizes[i],
            kind: kind_from_bits(flags[i]),
            page_number: None,
        });
    }

    DocDirectory::from_entries(bundled, entries)
}

/// Serialize a directory back to a DIRM payload (save path).
pub fn serialize_dirm(dir: &DocDirectory) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(DIRM_VERSION | if dir.bundled { 0x80 } else { 0 });
    out.extend_from_slice(&(dir.entries.len() as u16).to_be_bytes());

    if dir.bundled {
        for entry in &dir.entries {
            let offset = entry.offset.ok_or_else(|| {
                BlattwerkError::BadDirectory(format!(
                    "bundled entry \"{}\" has no offset",
                    entry.load_name
                ))
            })?;
            out.extend_from_slice(&offset.to_be_bytes());
        }
    }
    for entry in &dir.entries {
        out.extend_from_slice(&entry.size.to_be_bytes()[1..]);
    }
    for entry in &dir.entries {
        let mut flag = kind_to_bits(entry.kind);
        if entry.save_name.is_some() {
            flag |= FLAG_HAS_SAVE_NAME;
        }
        if entry.title.is_some() {
            flag |= FLAG_HAS_TITLE;
        }
        out.push(flag);
    }
    for entry in &dir.entries {
        out.extend_from_slice(entry.load_name.as_bytes());
        out.push(0);
        if let Some(save) = &entry.save_name {
            out.extend_from_slice(save.as_bytes());
            out.push(0);
        }
        if let Some(title) = &entry.title {
            out.extend_from_slice(title.as_bytes());
            out.push(0);
        }
    }
    Ok(out)
}

/// Parse a DIR0 payload (legacy layouts). Offset rows mean old bundled;
/// bare name rows mean old indexed. Every row is a page.
pub fn parse_dir0(data: &[u8]) -> Result<DocDirectory> {
    let mut cur = Cursor {
        data,
        pos: 0,
        chunk: "DIR0",
    };

    let flags = cur.u8()?;
    let bundled = flags & 0x80 != 0;
    let count = cur.u16()? as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (offset, size) = if bundled {
            (Some(cur.u32()?), cur.u24()?)
        } else {
            (None, 0)
        };
        let load_name = cur.name()?;
        entries.push(DirEntry {
            load_name,
            save_name: None,
            title: None,
            offset,
            size,
            kind: DirEntryKind::Page,
            page_number: None,
        });
    }

    DocDirectory::from_entries(bundled, entries)
}
