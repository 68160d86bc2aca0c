// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decoded sub-object slots of one member file.
//
// Only structural payloads are parsed here (the INFO geometry header).
// Codec payloads — wavelet layers, bitonal masks, shape dictionaries,
// compressed annotation/text runs — are stored as the opaque byte runs the
// external codec layer consumes.

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{PageInfo, PageRotation};
use blattwerk_stream::{ChunkId, RawChunk};

/// Decoded artifacts of one member file, filled slot by slot as chunks
/// stream in.
#[derive(Debug, Default)]
pub struct Artifacts {
    /// Parsed page geometry/version header (INFO).
    pub info: Option<PageInfo>,
    /// Progressive background refinements (BG44), in arrival order.
    pub background: Vec<Vec<u8>>,
    /// Progressive foreground refinements (FG44), in arrival order.
    pub foreground: Vec<Vec<u8>>,
    /// Bitonal foreground mask (Sjbz).
    pub mask: Option<Vec<u8>>,
    /// Shared shape dictionary (Djbz).
    pub shape_dict: Option<Vec<u8>>,
    /// Foreground palette (FGbz).
    pub fg_palette: Option<Vec<u8>>,
    /// Merged annotation bytes (every ANTa/ANTz run, concatenated).
    pub annotations: Vec<u8>,
    /// Hidden text (TXTa/TXTz).
    pub text: Option<Vec<u8>>,
    /// Metadata bytes (META).
    pub meta: Option<Vec<u8>>,
    /// Navigation directory bytes (NAVM), exposed via its own accessor on
    /// the component.
    pub navigation: Option<Vec<u8>>,
    /// Thumbnail images (TH44), one per covered page.
    pub thumbnails: Vec<Vec<u8>>,
}

impl Artifacts {
    /// Absorb one chunk into its slot. Returns whether the chunk was
    /// recognized; unknown chunks are the caller's to skip.
    pub fn absorb(&mut self, chunk: &RawChunk) -> Result<bool> {
        match chunk.id {
            ChunkId::INFO => {
                self.info = Some(parse_page_info(&chunk.data)?);
            }
            ChunkId::BG44 => self.background.push(chunk.data.clone()),
            ChunkId::FG44 => self.foreground.push(chunk.data.clone()),
            ChunkId::SJBZ => self.mask = Some(chunk.data.clone()),
            ChunkId::DJBZ => self.shape_dict = Some(chunk.data.clone()),
            ChunkId::FGBZ => self.fg_palette = Some(chunk.data.clone()),
            ChunkId::ANTA | ChunkId::ANTZ => {
                self.annotations.extend_from_slice(&chunk.data);
            }
            ChunkId::TXTA | ChunkId::TXTZ => self.text = Some(chunk.data.clone()),
            ChunkId::META => self.meta = Some(chunk.data.clone()),
            ChunkId::NAVM => self.navigation = Some(chunk.data.clone()),
            ChunkId::TH44 => self.thumbnails.push(chunk.data.clone()),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Whether this chunk changes what a viewer would paint.
    pub fn repaints(id: ChunkId) -> bool {
        matches!(
            id,
            ChunkId::BG44 | ChunkId::FG44 | ChunkId::SJBZ | ChunkId::FGBZ | ChunkId::TH44
        )
    }

    /// Bytes held across all slots, for cache accounting.
    pub fn memory_usage(&self) -> usize {
        let vecs = |v: &Vec<Vec<u8>>| v.iter().map(Vec::len).sum::<usize>();
        let opt = |o: &Option<Vec<u8>>| o.as_ref().map_or(0, Vec::len);
        vecs(&self.background)
            + vecs(&self.foreground)
            + vecs(&self.thumbnails)
            + opt(&self.mask)
            + opt(&self.shape_dict)
            + opt(&self.fg_palette)
            + opt(&self.text)
            + opt(&self.meta)
            + opt(&self.navigation)
            + self.annotations.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Parse the INFO chunk payload: width and height big-endian, version
/// minor/major, dpi little-endian, gamma, rotation in the low flag bits.
pub fn parse_page_info(data: &[u8]) -> Result<PageInfo> {
    if data.len() < 10 {
        return Err(BlattwerkError::malformed(
            ChunkId::INFO,
            format!("payload of {} bytes, need 10", data.len()),
        ));
    }
    let width = u16::from_be_bytes([data[0], data[1]]);
    let height = u16::from_be_bytes([data[2], data[3]]);
    if width == 0 || height == 0 {
        return Err(BlattwerkError::malformed(ChunkId::INFO, "zero page dimension"));
    }
    let version_minor = data[4];
    let version_major = data[5];
    let dpi = u16::from_le_bytes([data[6], data[7]]);
    let gamma = data[8];
    // Unknown rotation bits are tolerated as upright, matching how viewers
    // treat files written by sloppy encoders.
    let rotation = PageRotation::from_wire(data[9] & 0x07).unwrap_or_default();

    Ok(PageInfo {
        width,
        height,
        version_major,
        version_minor,
        dpi,
        gamma,
        rotation,
    })
}
