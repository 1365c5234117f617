//! The server tree.
//!
//! Servers form a spanning tree rooted at the local server. Each node knows
//! its parent and children; only direct children of the root own a link
//! socket. Every message toward a remote server is routed down the unique
//! direct child whose subtree contains it.

use crate::network::sendq::WireSender;
use crate::state::ServerId;

/// One node of the server tree.
#[derive(Debug)]
pub struct TreeServer {
    /// Three-character server ID.
    pub sid: String,
    /// Server name, unique case-insensitively.
    pub name: String,
    pub description: String,
    pub version: String,
    /// `None` only for the local root.
    pub parent: Option<ServerId>,
    pub children: Vec<ServerId>,
    /// True from BURST until ENDBURST; defers X-line side effects.
    pub bursting: bool,
    /// Trusted-services flag from the ulines config.
    pub uline: bool,
    /// The link socket; present only on direct children of the root.
    pub link: Option<WireSender>,
    /// Keepalive: a PING is outstanding and unanswered.
    pub awaiting_pong: bool,
}

impl TreeServer {
    pub fn new(sid: &str, name: &str, description: &str) -> Self {
        Self {
            sid: sid.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: String::new(),
            parent: None,
            children: Vec::new(),
            bursting: false,
            uline: false,
            link: None,
            awaiting_pong: false,
        }
    }

    pub fn with_parent(mut self, parent: ServerId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Walk `parent` pointers from `id` to the direct child of `root` whose
/// subtree contains it. `None` for the root itself or a detached node.
pub fn route_toward(
    servers: &slab::Slab<TreeServer>,
    root: ServerId,
    id: ServerId,
) -> Option<ServerId> {
    let mut current = id;
    let mut hops = 0usize;
    loop {
        let node = servers.get(current)?;
        match node.parent {
            Some(p) if p == root => return Some(current),
            Some(p) => current = p,
            None => return None,
        }
        hops += 1;
        if hops > servers.len() {
            // Cycle: the tree invariant is broken; treat as unroutable.
            return None;
        }
    }
}

/// Every server in the subtree rooted at `id`, including `id` itself.
pub fn subtree_of(servers: &slab::Slab<TreeServer>, id: ServerId) -> Vec<ServerId> {
    let mut result = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if let Some(node) = servers.get(current) {
            result.push(current);
            stack.extend(node.children.iter().copied());
        }
    }
    result
}
