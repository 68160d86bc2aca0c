// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The Node capability: anything that can send or receive routed messages.
//
// The router never owns a node. It stores weak references, so a node is
// considered alive exactly while a strong handle to it exists somewhere; a
// dropped node fails upgrade and is skipped and pruned.

use std::any::Any;
use std::sync::Arc;

use blattwerk_core::types::Location;
use blattwerk_stream::ByteSource;

use crate::messages::Notice;

/// Identity of a live node: its address. Only ever compared against ids of
/// nodes whose liveness was just established by a successful upgrade, so
/// address reuse cannot be confused with survival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Identity of a node behind a strong handle.
pub fn node_id(node: &Arc<dyn Node>) -> NodeId {
    NodeId(Arc::as_ptr(node) as *const () as usize)
}

/// Capability tag receivers use to identify a sender's concrete kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Component,
    Listener,
    ByteServer,
    Other,
}

/// A message-capable endpoint in the routing fabric.
///
/// Request handlers default to "no answer" and the notification handler to
/// "not handled", so a concrete node only implements the one or two message
/// kinds it cares about.
pub trait Node: Send + Sync + 'static {
    /// Concrete-type recovery for answers that travel as `Arc<dyn Node>`
    /// (implementations return `self`).
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn kind(&self) -> NodeKind {
        NodeKind::Other
    }

    /// Translate a member-file identifier to a location.
    fn location_for_id(&self, id: &str) -> Option<Location> {
        let _ = id;
        None
    }

    /// Produce (or create) the component decoding the identified member.
    fn component_for_id(&self, id: &str) -> Option<Arc<dyn Node>> {
        let _ = id;
        None
    }

    /// Supply the byte stream backing a location.
    fn bytes_for(&self, location: &Location) -> Option<Arc<ByteSource>> {
        let _ = location;
        None
    }

    /// Receive a notification. The return value matters only for the
    /// handled-or-not notices (error, status); it is OR-ed across receivers.
    fn on_notice(&self, from: NodeId, notice: &Notice) -> bool {
        let _ = (from, notice);
        false
    }
}
