// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Blattwerk decode engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a decode/save job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one host-fed byte stream.
///
/// Stream 0 is always the root document stream; member files needed later
/// are announced with freshly allocated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// URL-like identifier of a document or one of its member files.
///
/// Locations are opaque to the engine apart from the final path segment,
/// which is used to derive sibling locations for member files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location(String);

impl Location {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment (the file name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Location of a sibling file next to this one.
    pub fn sibling(&self, name: &str) -> Location {
        match self.0.rfind('/') {
            Some(idx) => Location(format!("{}/{}", &self.0[..idx], name)),
            None => Location(name.to_string()),
        }
    }

    /// Invented location for page `n` of a document whose directory is not
    /// yet known. Superseded once real discovery lands.
    pub fn provisional_page(&self, n: u32) -> Location {
        self.sibling(&format!("page{n:04}.djvu"))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Location {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Resolved layout of a whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A bare single-page file (FORM:DJVU at the root).
    SinglePage,
    /// Legacy bundled layout with a DIR0 offset table.
    OldBundled,
    /// Legacy indexed layout: a DIR0 name table referencing sibling files.
    OldIndexed,
    /// Current bundled layout: FORM:DJVM with an embedded DIRM directory.
    Bundled,
    /// Current indirect layout: FORM:DJVM whose DIRM references sibling files.
    Indirect,
}

impl DocumentKind {
    /// Whether member bytes live inside the root file itself.
    pub fn is_bundled(self) -> bool {
        matches!(
            self,
            Self::SinglePage | Self::OldBundled | Self::Bundled
        )
    }

    /// Whether page resolution requires the decoded directory.
    pub fn needs_directory(self) -> bool {
        !matches!(self, Self::SinglePage)
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SinglePage => "single-page",
            Self::OldBundled => "old bundled",
            Self::OldIndexed => "old indexed",
            Self::Bundled => "bundled",
            Self::Indirect => "indirect",
        };
        write!(f, "{name}")
    }
}

/// Kind of one decodable member file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    /// A page (FORM:DJVU).
    Page,
    /// A shared include — shape dictionary, annotations (FORM:DJVI).
    Include,
    /// A thumbnail bundle (FORM:THUM).
    Thumbnails,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Page => "page",
            Self::Include => "include",
            Self::Thumbnails => "thumbnails",
        };
        write!(f, "{name}")
    }
}

/// Main decode lifecycle of a component.
///
/// Terminal phases are sticky: once `Ok`, `Failed`, or `Stopped` is reached,
/// the only way out is an explicit [`ComponentFlags::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodePhase {
    #[default]
    NotStarted,
    Decoding,
    Ok,
    Failed,
    Stopped,
}

impl DecodePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Stopped)
    }
}

/// Lifecycle facts of a component, published on every transition.
///
/// The decode phase and the data-arrival booleans advance independently: a
/// component may hold all of its bytes long before decoding finishes, and a
/// failed decode does not un-arrive the bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFlags {
    pub phase: DecodePhase,
    /// This component's own bytes are fully buffered.
    pub data_present: bool,
    /// This component's bytes and, recursively, those of every include.
    pub all_data_present: bool,
    /// Every include named by this component has been materialized.
    pub includes_ready: bool,
    pub modified: bool,
    pub needs_recompression: bool,
}

impl ComponentFlags {
    /// Move `NotStarted → Decoding`. Returns false if already past it.
    pub fn begin(&mut self) -> bool {
        if self.phase == DecodePhase::NotStarted {
            self.phase = DecodePhase::Decoding;
            true
        } else {
            false
        }
    }

    /// Settle into a terminal phase. A no-op once terminal — decode attempts
    /// never overwrite each other's outcome.
    pub fn settle(&mut self, terminal: DecodePhase) -> bool {
        debug_assert!(terminal.is_terminal());
        if self.phase.is_terminal() {
            false
        } else {
            self.phase = terminal;
            true
        }
    }

    /// Clear terminal state for a fresh decode attempt.
    pub fn reset(&mut self) {
        *self = Self {
            data_present: self.data_present,
            all_data_present: self.all_data_present,
            ..Self::default()
        };
    }
}

/// Outcome of whole-document initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitOutcome {
    #[default]
    Pending,
    Ok,
    Failed,
}

impl InitOutcome {
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Discovery progress of a whole document. Each flag is sticky.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFlags {
    /// The layout has been classified.
    pub kind_known: bool,
    /// The DIRM directory has been decoded (current layouts).
    pub directory_known: bool,
    /// The DIR0 table has been walked (legacy layouts).
    pub old_nav_known: bool,
    pub init: InitOutcome,
}

impl DocumentFlags {
    /// Whether the page↔location table is authoritative.
    pub fn navigation_known(&self) -> bool {
        self.directory_known || self.old_nav_known
    }
}

/// What to do when a chunk fails to parse mid-decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryPolicy {
    /// Abort the whole decode on the first malformed chunk.
    #[default]
    Abort,
    /// Fail only the include member the malformed chunk belongs to.
    SkipPages,
    /// Skip the malformed chunk and keep walking.
    SkipChunks,
    /// Keep everything decoded so far and keep going, best effort.
    KeepAll,
}

/// Lifecycle states of an asynchronous job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    NotStarted,
    Started,
    Ok,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Stopped)
    }
}

/// Role of one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirEntryKind {
    Page,
    Include,
    Thumbnails,
    SharedAnnotation,
}

/// One member file recorded in the document directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Identifier used to load the member (and to resolve INCL references).
    pub load_name: String,
    /// Name to use when saving the member separately, if different.
    pub save_name: Option<String>,
    /// Human-readable title, if any.
    pub title: Option<String>,
    /// Byte offset of the member inside the root file (bundled layouts).
    pub offset: Option<u32>,
    /// Byte size of the member.
    pub size: u32,
    pub kind: DirEntryKind,
    /// Zero-based page number, for page entries.
    pub page_number: Option<u32>,
}

impl DirEntry {
    pub fn is_page(&self) -> bool {
        self.kind == DirEntryKind::Page
    }

    /// Name the member is addressed by (save name wins over load name).
    pub fn save_name(&self) -> &str {
        self.save_name.as_deref().unwrap_or(&self.load_name)
    }
}

/// Page orientation stored in the INFO chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRotation {
    #[default]
    Up,
    Ccw,
    Down,
    Cw,
}

impl PageRotation {
    /// Wire encoding (lower three bits of the INFO flags byte).
    pub fn from_wire(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Up),
            6 => Some(Self::Ccw),
            2 => Some(Self::Down),
            5 => Some(Self::Cw),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Up => 1,
            Self::Ccw => 6,
            Self::Down => 2,
            Self::Cw => 5,
        }
    }
}

/// Parsed geometry/version header of a page (INFO chunk payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub width: u16,
    pub height: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub dpi: u16,
    pub gamma: u8,
    pub rotation: PageRotation,
}
