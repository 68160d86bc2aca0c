// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use serde::{Deserialize, Serialize};

/// Persistent engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Byte ceiling for the decoded-component cache.
    pub cache_max_bytes: usize,
    /// Default recovery policy for malformed chunks.
    pub recovery: crate::RecoveryPolicy,
    /// Worker threads for the decode runtime. `1` serves single-threaded
    /// hosts; `0` lets the runtime pick a per-CPU default.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: 32 * 1024 * 1024,
            recovery: crate::RecoveryPolicy::KeepAll,
            worker_threads: 0,
        }
    }
}
