// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blattwerk Fabric — the publish/subscribe routing layer that lets mutually
// unaware decode components exchange requests and notifications without
// holding references to each other.

pub mod messages;
pub mod node;
pub mod router;

pub use messages::Notice;
pub use node::{Node, NodeId, NodeKind, node_id};
pub use router::Router;
