//! Users: identity, modes, and the local-connection attachment.

use std::collections::{BTreeSet, HashSet};

use crate::config::ClassBlock;
use crate::network::sendq::WireSender;
use crate::state::ChannelId;
use crate::state::ServerId;

/// Registration requirements, tracked as bits so re-sends can be refused.
pub mod reg {
    pub const NICK: u8 = 1 << 0;
    pub const USER: u8 = 1 << 1;
    /// Set once CAP negotiation is finished or was never started.
    pub const CAP: u8 = 1 << 2;

    pub const ALL: u8 = NICK | USER | CAP;
}

/// Boolean user modes plus the snomask subscription set.
#[derive(Debug, Default, Clone)]
pub struct UserModes {
    pub invisible: bool,
    pub wallops: bool,
    pub oper: bool,
    /// Server-notice categories this oper listens to.
    pub snomasks: BTreeSet<char>,
}

impl UserModes {
    /// Wire form like `+iw`; bare `+` when no modes are set.
    pub fn as_mode_string(&self) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.oper {
            s.push('o');
        }
        if !self.snomasks.is_empty() {
            s.push('s');
        }
        if self.wallops {
            s.push('w');
        }
        s
    }

    /// Apply a wire mode string (used for remote introductions).
    pub fn apply_string(&mut self, modes: &str) {
        let mut adding = true;
        for c in modes.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'i' => self.invisible = adding,
                'w' => self.wallops = adding,
                'o' => self.oper = adding,
                's' if !adding => self.snomasks.clear(),
                _ => {}
            }
        }
    }
}

/// State that exists only for users connected to this server.
#[derive(Debug)]
pub struct LocalClient {
    pub sender: WireSender,
    pub class: ClassBlock,
    /// Which registration requirements have been satisfied.
    pub reg_flags: u8,
    /// Held while a `CAP LS`/`CAP REQ` exchange is open; `CAP END` releases.
    pub cap_latch: bool,
    pub caps: HashSet<String>,
    pub password: Option<String>,
    /// Epoch seconds of the last inbound line.
    pub last_activity: i64,
    /// Set when a keepalive PING has gone out and no PONG came back yet.
    pub awaiting_pong: bool,
    /// Epoch seconds the user last started being idle (for WHOIS idle).
    pub idle_since: i64,
}

impl LocalClient {
    pub fn new(sender: WireSender, class: ClassBlock, now: i64) -> Self {
        Self {
            sender,
            class,
            reg_flags: 0,
            cap_latch: false,
            caps: HashSet::new(),
            password: None,
            last_activity: now,
            awaiting_pong: false,
            idle_since: now,
        }
    }

    pub fn has_reg(&self, flag: u8) -> bool {
        self.reg_flags & flag != 0
    }

    /// All requirements present and no CAP latch held.
    pub fn ready_to_register(&self) -> bool {
        self.reg_flags & (reg::NICK | reg::USER) == (reg::NICK | reg::USER) && !self.cap_latch
    }
}

/// One user, local or remote.
#[derive(Debug)]
pub struct User {
    pub uid: String,
    /// Empty until the first NICK; server-wide unique once registered.
    pub nick: String,
    /// Epoch seconds of the last nick change; the collision arbitrator.
    pub nick_ts: i64,
    pub ident: String,
    pub host: String,
    /// Displayed host, which cloaking hooks may rewrite.
    pub dhost: String,
    pub ip: String,
    pub gecos: String,
    pub signon_ts: i64,
    /// Home server, as a tree-node handle.
    pub server: ServerId,
    pub modes: UserModes,
    /// Oper type name once opered.
    pub oper_type: Option<String>,
    pub away: Option<String>,
    pub channels: HashSet<ChannelId>,
    /// Channels this user has a standing invite to.
    pub invites: HashSet<ChannelId>,
    /// Fully registered (welcomed locally, or introduced by a peer).
    pub registered: bool,
    pub local: Option<LocalClient>,
}

impl User {
    /// A blank local user pinned to a fresh connection.
    pub fn new_local(
        uid: String,
        server: ServerId,
        sender: WireSender,
        class: ClassBlock,
        ip: String,
        host: String,
        now: i64,
    ) -> Self {
        Self {
            uid,
            nick: String::new(),
            nick_ts: now,
            ident: String::new(),
            dhost: host.clone(),
            host,
            ip,
            gecos: String::new(),
            signon_ts: now,
            server,
            modes: UserModes::default(),
            oper_type: None,
            away: None,
            channels: HashSet::new(),
            invites: HashSet::new(),
            registered: false,
            local: Some(LocalClient::new(sender, class, now)),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    /// The `nick!ident@dhost` form used as a message source.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.dhost)
    }

    /// The `ident@host` form the collision rules compare.
    pub fn id_and_host(&self) -> String {
        format!("{}@{}", self.ident, self.host)
    }

    /// Nick to address replies to before registration completes.
    pub fn reply_nick(&self) -> &str {
        if self.nick.is_empty() {
            "*"
        } else {
            &self.nick
        }
    }

    pub fn has_oper_perm(&self, perms: &str, perm: &str) -> bool {
        self.modes.oper && perms.split_whitespace().any(|p| p == perm || p == "*")
    }
}
