// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The router: a per-session directed routing graph over nodes, with
// hop-distance-ordered request dispatch and fan-out notification dispatch.
//
// One lock guards every table. Delivery lists are computed under the lock
// and handlers invoked after it is released, so a handler may add or remove
// routes (or dispatch again) without deadlocking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use blattwerk_core::types::Location;
use blattwerk_stream::ByteSource;

use crate::messages::Notice;
use crate::node::{Node, NodeId, node_id};

struct Edge {
    id: NodeId,
    node: Weak<dyn Node>,
}

#[derive(Default)]
struct Tables {
    /// Adjacency: source id → fan-out list.
    routes: HashMap<NodeId, Vec<Edge>>,
    /// Name → node, filtered through liveness on every lookup.
    aliases: HashMap<String, Edge>,
}

impl Tables {
    /// Drop edges whose target is gone. Called from every mutating entry
    /// point so dead nodes never linger past one table update.
    fn prune(&mut self) {
        for edges in self.routes.values_mut() {
            edges.retain(|e| e.node.strong_count() > 0);
        }
        self.routes.retain(|_, edges| !edges.is_empty());
        self.aliases.retain(|_, e| e.node.strong_count() > 0);
    }
}

/// Per-session routing fabric. Created once per context and passed by
/// reference to every constructor that registers routes.
pub struct Router {
    tables: Mutex<Tables>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(Tables::default()),
        })
    }

    // -- Route maintenance ----------------------------------------------------

    /// Permit `src`'s messages to reach `dst`.
    pub fn add_route(&self, src: &Arc<dyn Node>, dst: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        tables.prune();
        let edges = tables.routes.entry(node_id(src)).or_default();
        let dst_id = node_id(dst);
        if edges.iter().any(|e| e.id == dst_id) {
            return;
        }
        edges.push(Edge {
            id: dst_id,
            node: Arc::downgrade(dst),
        });
        trace!(src = ?node_id(src), dst = ?dst_id, "route added");
    }

    /// Remove the `src → dst` edge, if present.
    pub fn del_route(&self, src: &Arc<dyn Node>, dst: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        tables.prune();
        let dst_id = node_id(dst);
        if let Some(edges) = tables.routes.get_mut(&node_id(src)) {
            edges.retain(|e| e.id != dst_id);
        }
    }

    /// Make `dst` inherit `src`'s connectivity, both inbound and outbound —
    /// used when an object is logically cloned.
    pub fn copy_routes(&self, dst: &Arc<dyn Node>, src: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        tables.prune();
        let src_id = node_id(src);
        let dst_id = node_id(dst);

        // Outbound: dst → b for every src → b.
        let outbound: Vec<(NodeId, Weak<dyn Node>)> = tables
            .routes
            .get(&src_id)
            .map(|edges| edges.iter().map(|e| (e.id, e.node.clone())).collect())
            .unwrap_or_default();

        // Inbound: a → dst for every a → src.
        let inbound: Vec<NodeId> = tables
            .routes
            .iter()
            .filter(|(_, edges)| edges.iter().any(|e| e.id == src_id))
            .map(|(a, _)| *a)
            .collect();

        for (id, node) in outbound {
            let edges = tables.routes.entry(dst_id).or_default();
            if !edges.iter().any(|e| e.id == id) {
                edges.push(Edge { id, node });
            }
        }
        for a in inbound {
            let edges = tables.routes.entry(a).or_default();
            if !edges.iter().any(|e| e.id == dst_id) {
                edges.push(Edge {
                    id: dst_id,
                    node: Arc::downgrade(dst),
                });
            }
        }
    }

    /// Eagerly remove every route and alias touching `node`. Liveness alone
    /// already keeps a dropped node unreachable; explicit teardown lets a
    /// still-alive node leave the fabric early.
    pub fn remove_node(&self, node: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        let id = node_id(node);
        tables.routes.remove(&id);
        for edges in tables.routes.values_mut() {
            edges.retain(|e| e.id != id);
        }
        tables.aliases.retain(|_, e| e.id != id);
        tables.prune();
    }

    /// Number of live outbound routes from `node` (diagnostics).
    pub fn fan_out(&self, node: &Arc<dyn Node>) -> usize {
        let tables = self.tables.lock();
        tables
            .routes
            .get(&node_id(node))
            .map(|edges| edges.iter().filter(|e| e.node.strong_count() > 0).count())
            .unwrap_or(0)
    }

    // -- Closure --------------------------------------------------------------

    /// Live nodes reachable from `src`, breadth-first.
    ///
    /// With `sorted`, the result is ordered by increasing hop distance (ties
    /// unordered); otherwise the order is unspecified. Dead nodes are
    /// silently dropped. `src` itself appears (at distance 0) only if a
    /// route points from it to itself.
    pub fn closure(&self, src: &Arc<dyn Node>, sorted: bool) -> Vec<Arc<dyn Node>> {
        let _ = sorted; // BFS already yields nondecreasing distances
        let mut tables = self.tables.lock();
        tables.prune();

        let start = node_id(src);
        let mut visited: HashSet<NodeId> = HashSet::from([start]);
        let mut queue: VecDeque<NodeId> = VecDeque::from([start]);
        let mut result: Vec<Arc<dyn Node>> = Vec::new();

        while let Some(at) = queue.pop_front() {
            let Some(edges) = tables.routes.get(&at) else {
                continue;
            };
            for edge in edges {
                if edge.id == start {
                    // A self-route puts the source in its own closure.
                    if at == start && !result.iter().any(|n| node_id(n) == start) {
                        result.insert(0, Arc::clone(src));
                    }
                    continue;
                }
                if !visited.insert(edge.id) {
                    continue;
                }
                let Some(node) = edge.node.upgrade() else {
                    continue;
                };
                result.push(node);
                queue.push_back(edge.id);
            }
        }
        result
    }

    // -- Request dispatch (first non-empty answer wins) -----------------------

    /// Translate a member identifier to a location.
    pub fn location_for_id(&self, src: &Arc<dyn Node>, id: &str) -> Option<Location> {
        for node in self.closure(src, true) {
            if let Some(location) = node.location_for_id(id) {
                trace!(id, %location, "id resolved");
                return Some(location);
            }
        }
        debug!(id, "no reachable node resolved the id");
        None
    }

    /// Obtain the component decoding the identified member.
    pub fn component_for_id(&self, src: &Arc<dyn Node>, id: &str) -> Option<Arc<dyn Node>> {
        for node in self.closure(src, true) {
            if let Some(component) = node.component_for_id(id) {
                return Some(component);
            }
        }
        None
    }

    /// Obtain the byte stream backing a location.
    pub fn bytes_for(&self, src: &Arc<dyn Node>, location: &Location) -> Option<Arc<ByteSource>> {
        for node in self.closure(src, true) {
            if let Some(source) = node.bytes_for(location) {
                trace!(%location, "byte source supplied");
                return Some(source);
            }
        }
        debug!(%location, "no reachable node supplied bytes");
        None
    }

    // -- Notification dispatch (fan-out) --------------------------------------

    /// Deliver a notice to every node reachable from `src`. Returns whether
    /// any receiver reported handling it.
    pub fn notify(&self, src: &Arc<dyn Node>, notice: &Notice) -> bool {
        let from = node_id(src);
        let mut handled = false;
        for node in self.closure(src, false) {
            handled |= node.on_notice(from, notice);
        }
        if !handled && notice.expects_handling() {
            debug!(kind = notice.kind_name(), "notice went unhandled");
        }
        handled
    }

    // -- Aliases --------------------------------------------------------------

    /// Register a string alias for `node`, replacing any previous holder.
    pub fn register_alias(&self, alias: impl Into<String>, node: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        tables.prune();
        tables.aliases.insert(
            alias.into(),
            Edge {
                id: node_id(node),
                node: Arc::downgrade(node),
            },
        );
    }

    /// Look a node up by exact alias, filtered through liveness.
    pub fn node_for_alias(&self, alias: &str) -> Option<Arc<dyn Node>> {
        let tables = self.tables.lock();
        tables.aliases.get(alias).and_then(|e| e.node.upgrade())
    }

    /// All live nodes whose alias starts with `prefix`.
    pub fn nodes_for_prefix(&self, prefix: &str) -> Vec<Arc<dyn Node>> {
        let tables = self.tables.lock();
        let mut seen = HashSet::new();
        tables
            .aliases
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(_, e)| e.node.upgrade())
            .filter(|n| seen.insert(node_id(n)))
            .collect()
    }

    /// Drop every alias naming `node`.
    pub fn drop_aliases(&self, node: &Arc<dyn Node>) {
        let mut tables = self.tables.lock();
        let id = node_id(node);
        tables.aliases.retain(|_, e| e.id != id);
    }
}
