//! The in-memory data model.
//!
//! All mutable server state lives in one [`Network`] value owned by a
//! single lock; command handlers and the link layer mutate it from within
//! one critical section per inbound line, which yields the ordering
//! guarantees the protocol needs without any locking inside the model.
//!
//! Arenas hold the three entity kinds; all cross-references are arena
//! handles, so there are no ownership cycles and back-references stay valid
//! across map rehashes.

pub mod channel;
pub mod server;
pub mod uid;
pub mod user;
pub mod wildcard;
pub mod xline;

use std::collections::HashMap;
use std::sync::Arc;

use slab::Slab;
use tracing::warn;

use alder_proto::{CaseMapping, Message, Numeric};

use crate::config::Config;
use crate::hooks::Hooks;
use crate::modes::ModeRegistry;
use crate::network::sendq::SendOutcome;

pub use channel::{Channel, ListEntry, Membership, Topic};
pub use server::TreeServer;
pub use uid::UidAllocator;
pub use user::{LocalClient, User, UserModes};
pub use xline::{XLine, XLineKind, XLineStore};

pub type UserId = usize;
pub type ChannelId = usize;
pub type ServerId = usize;

/// The whole network as this server sees it.
pub struct Network {
    pub config: Arc<Config>,
    pub casemap: CaseMapping,

    pub users: Slab<User>,
    pub channels: Slab<Channel>,
    pub servers: Slab<TreeServer>,

    by_nick: HashMap<String, UserId>,
    by_uid: HashMap<String, UserId>,
    by_channel: HashMap<String, ChannelId>,
    by_sid: HashMap<String, ServerId>,
    by_server_name: HashMap<String, ServerId>,

    pub local_server: ServerId,
    pub uid_alloc: UidAllocator,
    pub xlines: XLineStore,

    pub modes: Arc<ModeRegistry>,
    pub hooks: Arc<Hooks>,

    /// Wall clock, sampled once per dispatch.
    pub now: i64,
    pub start_ts: i64,

    /// High-water marks for the LUSERS 265/266 replies.
    pub max_local_seen: usize,
    pub max_global_seen: usize,

    /// Connections that must be torn down once the current operation
    /// commits (sendq overflow, kill side effects).
    pub pending_drops: Vec<(UserId, String)>,
    /// Direct peers that must be SQUIT once the current operation commits.
    pub pending_squits: Vec<(ServerId, String)>,
    /// Link-block names CONNECT has asked the gateway to dial.
    pub pending_connects: Vec<String>,

    /// Where the config file came from, for REHASH.
    pub config_path: Option<String>,

    /// Set by DIE or a fatal reactor error; the accept loops watch it.
    pub stopping: Option<String>,
}

impl Network {
    pub fn new(config: Arc<Config>) -> Self {
        let casemap = config.case_mapping();
        let mut servers = Slab::new();
        let mut root = TreeServer::new(
            &config.server.sid,
            &config.server.name,
            &config.server.description,
        );
        root.version = crate::version_string();
        let local_server = servers.insert(root);

        let mut by_sid = HashMap::new();
        let mut by_server_name = HashMap::new();
        by_sid.insert(config.server.sid.clone(), local_server);
        by_server_name.insert(casemap.fold(&config.server.name), local_server);

        let now = wall_clock();
        Self {
            casemap,
            users: Slab::new(),
            channels: Slab::new(),
            servers,
            by_nick: HashMap::new(),
            by_uid: HashMap::new(),
            by_channel: HashMap::new(),
            by_sid,
            by_server_name,
            local_server,
            uid_alloc: UidAllocator::new(&config.server.sid),
            xlines: XLineStore::new(),
            modes: Arc::new(ModeRegistry::build(config.as_ref())),
            hooks: Arc::new(Hooks::new()),
            now,
            start_ts: now,
            max_local_seen: 0,
            max_global_seen: 0,
            pending_drops: Vec::new(),
            pending_squits: Vec::new(),
            pending_connects: Vec::new(),
            config_path: None,
            stopping: None,
            config,
        }
    }

    /// Sample the wall clock for this dispatch round. Jumps in either
    /// direction beyond two seconds are logged; they have no correctness
    /// consequence.
    pub fn sample_clock(&mut self) {
        let sampled = wall_clock();
        let delta = sampled - self.now;
        if delta < -2 || delta > 2 {
            warn!(delta, "wall clock jumped");
        }
        if sampled > self.now {
            self.now = sampled;
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn server_name(&self) -> &str {
        &self.config.server.name
    }

    pub fn server_sid(&self) -> &str {
        &self.config.server.sid
    }

    pub fn find_nick(&self, nick: &str) -> Option<UserId> {
        self.by_nick.get(&self.casemap.fold(nick)).copied()
    }

    pub fn find_uid(&self, uid: &str) -> Option<UserId> {
        self.by_uid.get(uid).copied()
    }

    /// Resolve a wire source or target token: UID first, then nick.
    pub fn find_user_token(&self, token: &str) -> Option<UserId> {
        self.find_uid(token).or_else(|| self.find_nick(token))
    }

    pub fn find_channel(&self, name: &str) -> Option<ChannelId> {
        self.by_channel.get(&self.casemap.fold(name)).copied()
    }

    pub fn find_sid(&self, sid: &str) -> Option<ServerId> {
        self.by_sid.get(sid).copied()
    }

    pub fn find_server_name(&self, name: &str) -> Option<ServerId> {
        self.by_server_name.get(&self.casemap.fold(name)).copied()
    }

    /// Resolve a wire server token: SID first, then name.
    pub fn find_server_token(&self, token: &str) -> Option<ServerId> {
        self.find_sid(token).or_else(|| self.find_server_name(token))
    }

    pub fn is_uline(&self, server: ServerId) -> bool {
        self.servers.get(server).map(|s| s.uline).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a user pinned to a fresh local connection.
    pub fn create_local_user(
        &mut self,
        sender: crate::network::sendq::WireSender,
        class: crate::config::ClassBlock,
        ip: String,
        host: String,
    ) -> UserId {
        let uid = self.uid_alloc.next();
        let user = User::new_local(
            uid.clone(),
            self.local_server,
            sender,
            class,
            ip,
            host,
            self.now,
        );
        let id = self.users.insert(user);
        self.by_uid.insert(uid, id);
        id
    }

    /// Insert a remote user announced by a peer. The caller has already
    /// resolved any nick collision.
    #[allow(clippy::too_many_arguments)]
    pub fn introduce_remote_user(
        &mut self,
        server: ServerId,
        uid: String,
        nick: String,
        nick_ts: i64,
        ident: String,
        host: String,
        dhost: String,
        ip: String,
        signon_ts: i64,
        gecos: String,
    ) -> Result<UserId, &'static str> {
        if self.by_uid.contains_key(&uid) {
            return Err("duplicate UID");
        }
        let folded = self.casemap.fold(&nick);
        if self.by_nick.contains_key(&folded) {
            return Err("nickname already bound");
        }
        let user = User {
            uid: uid.clone(),
            nick,
            nick_ts,
            ident,
            host,
            dhost,
            ip,
            gecos,
            signon_ts,
            server,
            modes: UserModes::default(),
            oper_type: None,
            away: None,
            channels: Default::default(),
            invites: Default::default(),
            registered: true,
            local: None,
        };
        let id = self.users.insert(user);
        self.by_uid.insert(uid, id);
        self.by_nick.insert(folded, id);
        self.note_user_counts();
        Ok(id)
    }

    /// Bind (or rebind) a user's nickname. The caller has already checked
    /// for conflicts; this only maintains the maps and timestamps.
    pub fn set_nick(&mut self, id: UserId, nick: &str, ts: i64) {
        let old_folded = {
            let user = &self.users[id];
            if user.nick.is_empty() {
                None
            } else {
                Some(self.casemap.fold(&user.nick))
            }
        };
        if let Some(old) = old_folded {
            self.by_nick.remove(&old);
        }
        self.by_nick.insert(self.casemap.fold(nick), id);
        let user = &mut self.users[id];
        user.nick = nick.to_string();
        user.nick_ts = ts;
    }

    /// Remove a user from every structure. Message fanout is the caller's
    /// job; by the time this runs the user must already have been announced
    /// as gone.
    pub fn remove_user(&mut self, id: UserId) {
        let Some(user) = self.users.try_remove(id) else {
            return;
        };
        if !user.nick.is_empty() {
            let folded = self.casemap.fold(&user.nick);
            if self.by_nick.get(&folded) == Some(&id) {
                self.by_nick.remove(&folded);
            }
        }
        self.by_uid.remove(&user.uid);
        for chan_id in user.channels {
            let emptied = match self.channels.get_mut(chan_id) {
                Some(chan) => {
                    chan.members.remove(&id);
                    chan.members.is_empty()
                }
                None => false,
            };
            if emptied {
                self.destroy_channel(chan_id);
            }
        }
    }

    /// Local users who share at least one channel with `id`, deduplicated,
    /// excluding `id` itself. The QUIT fanout set.
    pub fn common_local_watchers(&self, id: UserId) -> Vec<UserId> {
        let Some(user) = self.users.get(id) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for &chan_id in &user.channels {
            if let Some(chan) = self.channels.get(chan_id) {
                for &member in chan.members.keys() {
                    if member != id
                        && self.users[member].is_local()
                        && seen.insert(member)
                    {
                        out.push(member);
                    }
                }
            }
        }
        out
    }

    fn note_user_counts(&mut self) {
        let local = self.local_user_count();
        let global = self.users.iter().filter(|(_, u)| u.registered).count();
        self.max_local_seen = self.max_local_seen.max(local);
        self.max_global_seen = self.max_global_seen.max(global);
    }

    pub fn local_user_count(&self) -> usize {
        self.users
            .iter()
            .filter(|(_, u)| u.is_local() && u.registered)
            .count()
    }

    pub fn global_user_count(&self) -> usize {
        self.users.iter().filter(|(_, u)| u.registered).count()
    }

    pub fn invisible_count(&self) -> usize {
        self.users
            .iter()
            .filter(|(_, u)| u.registered && u.modes.invisible)
            .count()
    }

    pub fn oper_count(&self) -> usize {
        self.users
            .iter()
            .filter(|(_, u)| u.registered && u.modes.oper)
            .count()
    }

    pub fn unregistered_count(&self) -> usize {
        self.users
            .iter()
            .filter(|(_, u)| u.is_local() && !u.registered)
            .count()
    }

    /// Called when a local user completes registration, to move the
    /// high-water marks.
    pub fn note_registration(&mut self) {
        self.note_user_counts();
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Find a channel or create it with the given timestamp.
    pub fn get_or_create_channel(&mut self, name: &str, ts: i64) -> (ChannelId, bool) {
        let folded = self.casemap.fold(name);
        if let Some(&id) = self.by_channel.get(&folded) {
            return (id, false);
        }
        let id = self.channels.insert(Channel::new(name.to_string(), ts));
        self.by_channel.insert(folded, id);
        (id, true)
    }

    /// Record a membership on both sides of the relation.
    pub fn add_member(&mut self, chan_id: ChannelId, user_id: UserId, membership: Membership) {
        self.channels[chan_id].members.insert(user_id, membership);
        self.users[user_id].channels.insert(chan_id);
    }

    /// Remove a membership; destroys the channel when the last member
    /// leaves. Returns true when the channel went away.
    pub fn remove_member(&mut self, chan_id: ChannelId, user_id: UserId) -> bool {
        self.channels[chan_id].members.remove(&user_id);
        self.users[user_id].channels.remove(&chan_id);
        self.users[user_id].invites.remove(&chan_id);
        if self.channels[chan_id].members.is_empty() {
            self.destroy_channel(chan_id);
            true
        } else {
            false
        }
    }

    fn destroy_channel(&mut self, chan_id: ChannelId) {
        if let Some(chan) = self.channels.try_remove(chan_id) {
            let folded = self.casemap.fold(&chan.name);
            if self.by_channel.get(&folded) == Some(&chan_id) {
                self.by_channel.remove(&folded);
            }
            for (_, user) in self.users.iter_mut() {
                user.invites.remove(&chan_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Servers
    // ------------------------------------------------------------------

    /// Attach a new server under `parent`. Enforces global SID and name
    /// uniqueness.
    pub fn add_server(
        &mut self,
        parent: ServerId,
        sid: &str,
        name: &str,
        description: &str,
    ) -> Result<ServerId, crate::error::LinkError> {
        if self.by_sid.contains_key(sid) {
            return Err(crate::error::LinkError::DuplicateSid(sid.to_string()));
        }
        let folded = self.casemap.fold(name);
        if self.by_server_name.contains_key(&folded) {
            return Err(crate::error::LinkError::DuplicateName(name.to_string()));
        }
        let mut node = TreeServer::new(sid, name, description).with_parent(parent);
        node.uline = self
            .config
            .ulines
            .iter()
            .any(|u| self.casemap.eq(u, name));
        let id = self.servers.insert(node);
        self.servers[parent].children.push(id);
        self.by_sid.insert(sid.to_string(), id);
        self.by_server_name.insert(folded, id);
        Ok(id)
    }

    /// Detach and free a whole subtree. Users homed there must already be
    /// gone; this only tears down tree nodes and their maps.
    pub fn remove_server_subtree(&mut self, top: ServerId) -> Vec<ServerId> {
        let ids = server::subtree_of(&self.servers, top);
        if let Some(parent) = self.servers.get(top).and_then(|s| s.parent) {
            if let Some(parent_node) = self.servers.get_mut(parent) {
                parent_node.children.retain(|&c| c != top);
            }
        }
        for &id in &ids {
            if let Some(node) = self.servers.try_remove(id) {
                if self.by_sid.get(&node.sid) == Some(&id) {
                    self.by_sid.remove(&node.sid);
                }
                let folded = self.casemap.fold(&node.name);
                if self.by_server_name.get(&folded) == Some(&id) {
                    self.by_server_name.remove(&folded);
                }
            }
        }
        ids
    }

    /// Users whose home server lies in the given set.
    pub fn users_on_servers(&self, servers: &[ServerId]) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|(_, u)| servers.contains(&u.server))
            .map(|(id, _)| id)
            .collect()
    }

    /// The direct child of the root that leads to `id`.
    pub fn route_of(&self, id: ServerId) -> Option<ServerId> {
        server::route_toward(&self.servers, self.local_server, id)
    }

    /// Direct children of the root that own a live link socket.
    pub fn direct_peers(&self) -> Vec<ServerId> {
        self.servers[self.local_server]
            .children
            .iter()
            .copied()
            .filter(|&c| self.servers.get(c).map(|s| s.link.is_some()).unwrap_or(false))
            .collect()
    }

    // ------------------------------------------------------------------
    // Outbound messaging
    // ------------------------------------------------------------------

    /// Queue a line toward one local user. Overflow schedules a drop.
    pub fn send_to_user(&mut self, id: UserId, line: &str) {
        let Some(user) = self.users.get(id) else {
            return;
        };
        let Some(local) = &user.local else { return };
        if local.sender.send_line(line) == SendOutcome::SendqExceeded {
            self.pending_drops.push((id, "SendQ exceeded".to_string()));
        }
    }

    pub fn send_message(&mut self, id: UserId, message: &Message) {
        self.send_to_user(id, &message.to_string());
    }

    pub fn send_numeric(&mut self, id: UserId, numeric: Numeric, params: &[&str]) {
        let Some(user) = self.users.get(id) else {
            return;
        };
        let reply = numeric.reply(&self.config.server.name, user.reply_nick(), params);
        self.send_to_user(id, &reply.to_string());
    }

    /// Queue a line to every local member of a channel.
    pub fn fanout_channel_local(&mut self, chan_id: ChannelId, line: &str, skip: Option<UserId>) {
        let members: Vec<UserId> = match self.channels.get(chan_id) {
            Some(chan) => chan.members.keys().copied().collect(),
            None => return,
        };
        for member in members {
            if Some(member) != skip {
                self.send_to_user(member, line);
            }
        }
    }

    /// Queue a line to every local user sharing a channel with `id`,
    /// optionally including the user themself.
    pub fn fanout_common_local(&mut self, id: UserId, line: &str, include_self: bool) {
        let watchers = self.common_local_watchers(id);
        for watcher in watchers {
            self.send_to_user(watcher, line);
        }
        if include_self {
            self.send_to_user(id, line);
        }
    }

    /// Queue a line on one direct peer link. Overflow schedules a SQUIT.
    pub fn send_to_peer(&mut self, peer: ServerId, line: &str) {
        let Some(node) = self.servers.get(peer) else {
            return;
        };
        let Some(link) = &node.link else { return };
        if link.send_line(line) == SendOutcome::SendqExceeded {
            self.pending_squits
                .push((peer, "SendQ exceeded".to_string()));
        }
    }

    /// Broadcast to every direct peer, optionally excluding the one a
    /// message arrived on.
    pub fn broadcast_to_peers(&mut self, line: &str, except: Option<ServerId>) {
        for peer in self.direct_peers() {
            if Some(peer) != except {
                self.send_to_peer(peer, line);
            }
        }
    }

    /// Unicast toward whichever direct peer routes to `target`.
    pub fn send_toward(&mut self, target: ServerId, line: &str) {
        if let Some(peer) = self.route_of(target) {
            self.send_to_peer(peer, line);
        }
    }

    /// Server notice to local opers subscribed to a snomask letter.
    pub fn snomask(&mut self, letter: char, text: &str) {
        let server = self.config.server.name.clone();
        let targets: Vec<UserId> = self
            .users
            .iter()
            .filter(|(_, u)| u.is_local() && u.modes.oper && u.modes.snomasks.contains(&letter))
            .map(|(id, _)| id)
            .collect();
        for id in targets {
            let nick = self.users[id].nick.clone();
            let line = format!(":{server} NOTICE {nick} :*** {text}");
            self.send_to_user(id, &line);
        }
    }

    // ------------------------------------------------------------------
    // Invariant audit (test support)
    // ------------------------------------------------------------------

    /// Verify the cross-map invariants; panics on violation. Test support,
    /// called after every committed operation under test.
    pub fn assert_invariants(&self) {
        for (id, user) in self.users.iter() {
            if !user.nick.is_empty() && user.registered {
                assert_eq!(self.by_nick.get(&self.casemap.fold(&user.nick)), Some(&id));
            }
            assert_eq!(self.by_uid.get(&user.uid), Some(&id));
            for &chan in &user.channels {
                assert!(self.channels[chan].members.contains_key(&id));
            }
        }
        for (id, chan) in self.channels.iter() {
            assert!(!chan.members.is_empty(), "empty channel survived");
            for &member in chan.members.keys() {
                assert!(self.users[member].channels.contains(&id));
            }
        }
        for (id, node) in self.servers.iter() {
            if id != self.local_server {
                assert!(self.route_of(id).is_some(), "unroutable server");
                assert!(node.parent.is_some());
            }
        }
    }
}

/// Current wall clock in epoch seconds.
pub fn wall_clock() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
