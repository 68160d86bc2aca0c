// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blattwerk Bridge — the host-facing boundary: a context owning the decode
// runtime and message queue, job handles with a five-state status, stream
// feeds for externally-sourced documents, and a local-file byte server.

pub mod context;
pub mod files;
pub mod jobs;
pub mod messages;

pub use context::Context;
pub use files::FileServer;
pub use jobs::{DocumentJob, SaveJob};
pub use messages::{Message, MessageQueue};
