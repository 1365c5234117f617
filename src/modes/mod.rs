//! The mode system.
//!
//! A central registry maps `(kind, letter)` to a descriptor: parameter
//! arity per direction, list-mode and prefix-mode flags, and a handler
//! function that validates and optionally canonicalizes the parameter.
//! Per-mode state lives on the channel or user itself; handlers are free
//! functions, so the registry is plain data shared behind an `Arc`.

mod builtin;

use std::collections::HashMap;

use alder_proto::ModeDelta;

use crate::config::Config;
use crate::error::CommandError;
use crate::state::{ChannelId, Membership, Network, ServerId, UserId};

/// Which namespace a mode letter lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    User,
    Channel,
}

/// Who is changing the mode.
///
/// Server-sourced changes (bursts, timestamp resolution, services) bypass
/// membership permission checks and are announced under the server name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSource {
    User(UserId),
    Server(ServerId),
}

/// One requested toggle, as seen by a mode handler.
#[derive(Debug)]
pub struct ModeRequest {
    pub source: ModeSource,
    pub channel: Option<ChannelId>,
    pub target_user: Option<UserId>,
    pub adding: bool,
    pub letter: char,
    pub param: Option<String>,
}

/// Handler decision.
#[derive(Debug)]
pub enum ModeVerdict {
    /// Apply; `Some` replaces the parameter with a canonical form.
    Allow(Option<String>),
    /// Refuse; `Some` carries the numeric to send for local sources.
    Deny(Option<CommandError>),
}

type ModeHandlerFn = fn(&mut Network, &ModeRequest) -> ModeVerdict;

/// Descriptor for one registered mode letter.
pub struct ModeDef {
    pub letter: char,
    pub kind: ModeKind,
    pub param_on_add: bool,
    pub param_on_remove: bool,
    pub list_mode: bool,
    /// `(prefix char, rank)` for membership-status modes.
    pub prefix: Option<(char, u32)>,
    pub handler: ModeHandlerFn,
}

/// The mode registry, built once at startup from config.
pub struct ModeRegistry {
    defs: HashMap<(ModeKind, char), ModeDef>,
}

impl ModeRegistry {
    pub fn build(config: &Config) -> Self {
        let mut registry = Self {
            defs: HashMap::new(),
        };
        builtin::register_all(&mut registry, config);
        registry
    }

    pub fn register(&mut self, def: ModeDef) {
        self.defs.insert((def.kind, def.letter), def);
    }

    pub fn get(&self, kind: ModeKind, letter: char) -> Option<&ModeDef> {
        self.defs.get(&(kind, letter))
    }

    pub fn takes_param(&self, kind: ModeKind, letter: char, adding: bool) -> bool {
        self.get(kind, letter)
            .map(|d| if adding { d.param_on_add } else { d.param_on_remove })
            .unwrap_or(false)
    }

    /// The `PREFIX=(qaohv)~&@%+` ISUPPORT token, highest rank first.
    pub fn prefix_token(&self) -> String {
        let mut prefixed: Vec<&ModeDef> = self
            .defs
            .values()
            .filter(|d| d.kind == ModeKind::Channel && d.prefix.is_some())
            .collect();
        prefixed.sort_by(|a, b| b.prefix.unwrap().1.cmp(&a.prefix.unwrap().1));
        let letters: String = prefixed.iter().map(|d| d.letter).collect();
        let prefixes: String = prefixed.iter().map(|d| d.prefix.unwrap().0).collect();
        format!("({letters}){prefixes}")
    }

    /// The `CHANMODES=` ISUPPORT token: list, always-param, param-on-set,
    /// flag classes, alphabetical within each class.
    pub fn chanmodes_token(&self) -> String {
        let mut lists = Vec::new();
        let mut always = Vec::new();
        let mut on_set = Vec::new();
        let mut flags = Vec::new();
        for def in self.defs.values() {
            if def.kind != ModeKind::Channel || def.prefix.is_some() {
                continue;
            }
            if def.list_mode {
                lists.push(def.letter);
            } else if def.param_on_add && def.param_on_remove {
                always.push(def.letter);
            } else if def.param_on_add {
                on_set.push(def.letter);
            } else {
                flags.push(def.letter);
            }
        }
        for v in [&mut lists, &mut always, &mut on_set, &mut flags] {
            v.sort_unstable();
        }
        let join = |v: &[char]| v.iter().collect::<String>();
        format!(
            "{},{},{},{}",
            join(&lists),
            join(&always),
            join(&on_set),
            join(&flags)
        )
    }
}

/// Result of pushing a delta stream through the registry.
#[derive(Debug, Default)]
pub struct AppliedModes {
    /// Deltas that took effect, with canonical parameters.
    pub applied: Vec<ModeDelta>,
    /// Per-delta refusals to report back to a local source.
    pub errors: Vec<CommandError>,
    /// List-mode queries (`MODE #c +b` with no mask) to answer.
    pub list_queries: Vec<char>,
}

/// Apply channel-mode deltas from `source`.
///
/// Permission gating (is the source an op) happens in the command layer;
/// this engine enforces per-letter semantics only, so server-sourced and
/// timestamp-driven changes reuse it unchanged.
pub fn apply_channel_deltas(
    net: &mut Network,
    source: ModeSource,
    chan_id: ChannelId,
    deltas: Vec<ModeDelta>,
) -> AppliedModes {
    let registry = net.modes.clone();
    let mut out = AppliedModes::default();

    for delta in deltas {
        let Some(def) = registry.get(ModeKind::Channel, delta.letter) else {
            out.errors.push(CommandError::UnknownMode(delta.letter));
            continue;
        };

        // A list mode with no parameter is a query, not a change.
        if def.list_mode && delta.param.is_none() {
            if delta.adding {
                out.list_queries.push(delta.letter);
            }
            continue;
        }

        let wants_param = if delta.adding {
            def.param_on_add
        } else {
            def.param_on_remove
        };
        if wants_param && delta.param.is_none() {
            // Parameter missing entirely; skip the toggle.
            continue;
        }

        let target_user = if def.prefix.is_some() {
            match delta.param.as_deref().and_then(|p| net.find_user_token(p)) {
                Some(uid) => Some(uid),
                None => {
                    out.errors.push(CommandError::NoSuchNick(
                        delta.param.clone().unwrap_or_default(),
                    ));
                    continue;
                }
            }
        } else {
            None
        };

        let request = ModeRequest {
            source,
            channel: Some(chan_id),
            target_user,
            adding: delta.adding,
            letter: delta.letter,
            param: delta.param.clone(),
        };
        match (def.handler)(net, &request) {
            ModeVerdict::Allow(canonical) => {
                let param = canonical.or(delta.param);
                let committed = if def.list_mode {
                    match apply_list_effect(net, def.letter, chan_id, delta.adding, &param) {
                        Ok(changed) => changed,
                        Err(err) => {
                            out.errors.push(err);
                            false
                        }
                    }
                } else {
                    apply_channel_effect(net, def, chan_id, target_user, delta.adding, &param)
                };
                if committed {
                    out.applied.push(ModeDelta {
                        adding: delta.adding,
                        letter: delta.letter,
                        param,
                    });
                }
            }
            ModeVerdict::Deny(err) => {
                if let Some(err) = err {
                    out.errors.push(err);
                }
            }
        }
    }
    out
}

/// Commit a list-mode change: dedup on add (silent no-op), the per-channel
/// cap (reported as list-full), and removal by case-insensitive match.
fn apply_list_effect(
    net: &mut Network,
    letter: char,
    chan_id: ChannelId,
    adding: bool,
    param: &Option<String>,
) -> Result<bool, CommandError> {
    let mask = param.clone().unwrap_or_default();
    let cm = net.casemap;
    let name = net.channels[chan_id].name.clone();
    let limit = net.config.list_limit_for(&name);
    let now = net.now;
    let list = net.channels[chan_id].lists.entry(letter).or_default();
    if adding {
        if list.iter().any(|e| cm.eq(&e.mask, &mask)) {
            return Ok(false);
        }
        if list.len() >= limit {
            return Err(CommandError::BanListFull(name));
        }
        list.push(crate::state::ListEntry {
            mask,
            setter: String::new(),
            set_ts: now,
        });
        Ok(true)
    } else {
        let before = list.len();
        list.retain(|e| !cm.eq(&e.mask, &mask));
        Ok(list.len() != before)
    }
}

/// Commit one validated toggle to channel state. False when the toggle was
/// a no-op (already set, already absent, duplicate list entry).
fn apply_channel_effect(
    net: &mut Network,
    def: &ModeDef,
    chan_id: ChannelId,
    target_user: Option<UserId>,
    adding: bool,
    param: &Option<String>,
) -> bool {
    if let Some((_, _rank)) = def.prefix {
        let Some(uid) = target_user else { return false };
        let Some(bit) = Membership::bit_for_letter(def.letter) else {
            return false;
        };
        let Some(chan) = net.channels.get_mut(chan_id) else {
            return false;
        };
        let Some(membership) = chan.members.get_mut(&uid) else {
            return false;
        };
        if membership.has(bit) == adding {
            return false;
        }
        if adding {
            membership.grant(bit);
        } else {
            membership.revoke(bit);
        }
        return true;
    }

    let chan = &mut net.channels[chan_id];
    let takes_value = def.param_on_add;
    if takes_value {
        if adding {
            let value = param.clone().unwrap_or_default();
            if chan.mode_params.get(&def.letter) == Some(&value) {
                return false;
            }
            chan.mode_params.insert(def.letter, value);
        } else {
            if chan.mode_params.remove(&def.letter).is_none() {
                return false;
            }
        }
        return true;
    }

    if adding {
        chan.modes.insert(def.letter)
    } else {
        chan.modes.remove(&def.letter)
    }
}

/// Apply user-mode deltas to `target`.
///
/// Whether `source` may touch `target` at all (self-only for clients,
/// anything for servers) is the command layer's check.
pub fn apply_user_deltas(
    net: &mut Network,
    source: ModeSource,
    target: UserId,
    deltas: Vec<ModeDelta>,
) -> AppliedModes {
    let registry = net.modes.clone();
    let mut out = AppliedModes::default();

    for delta in deltas {
        let Some(def) = registry.get(ModeKind::User, delta.letter) else {
            out.errors.push(CommandError::UnknownMode(delta.letter));
            continue;
        };
        let request = ModeRequest {
            source,
            channel: None,
            target_user: Some(target),
            adding: delta.adding,
            letter: delta.letter,
            param: delta.param.clone(),
        };
        match (def.handler)(net, &request) {
            ModeVerdict::Allow(canonical) => {
                let param = canonical.or(delta.param);
                if apply_user_effect(net, target, delta.adding, delta.letter, &param) {
                    out.applied.push(ModeDelta {
                        adding: delta.adding,
                        letter: delta.letter,
                        param,
                    });
                }
            }
            ModeVerdict::Deny(err) => {
                if let Some(err) = err {
                    out.errors.push(err);
                }
            }
        }
    }
    out
}

fn apply_user_effect(
    net: &mut Network,
    target: UserId,
    adding: bool,
    letter: char,
    param: &Option<String>,
) -> bool {
    let Some(user) = net.users.get_mut(target) else {
        return false;
    };
    let modes = &mut user.modes;
    match letter {
        'i' => {
            if modes.invisible == adding {
                return false;
            }
            modes.invisible = adding;
        }
        'w' => {
            if modes.wallops == adding {
                return false;
            }
            modes.wallops = adding;
        }
        'o' => {
            if modes.oper == adding {
                return false;
            }
            modes.oper = adding;
            if !adding {
                user.oper_type = None;
                modes.snomasks.clear();
            }
        }
        's' => {
            if adding {
                let before = modes.snomasks.len();
                for c in param.as_deref().unwrap_or_default().chars() {
                    modes.snomasks.insert(c);
                }
                if modes.snomasks.len() == before {
                    return false;
                }
            } else {
                if modes.snomasks.is_empty() {
                    return false;
                }
                modes.snomasks.clear();
            }
        }
        _ => return false,
    }
    true
}

/// Stamp the setter onto list entries just added by `source`.
///
/// The generic engine stores entries with an empty setter; the command and
/// link layers know the display form of the source and fix it up here.
pub fn attribute_list_entries(
    net: &mut Network,
    chan_id: ChannelId,
    applied: &[ModeDelta],
    setter: &str,
) {
    let registry = net.modes.clone();
    let Some(chan) = net.channels.get_mut(chan_id) else {
        return;
    };
    for delta in applied {
        let is_list = registry
            .get(ModeKind::Channel, delta.letter)
            .map(|d| d.list_mode)
            .unwrap_or(false);
        if !(is_list && delta.adding) {
            continue;
        }
        if let (Some(mask), Some(list)) = (&delta.param, chan.lists.get_mut(&delta.letter)) {
            if let Some(entry) = list.iter_mut().find(|e| &e.mask == mask) {
                entry.setter = setter.to_string();
            }
        }
    }
}

/// Expand a ban-ish mask to canonical `nick!user@host` form with `*` for
/// missing parts. Extban-shaped masks (`X:...`) pass through verbatim.
pub fn canonicalize_mask(mask: &str) -> String {
    let bytes = mask.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return mask.to_string();
    }
    let (nick_user, host) = match mask.split_once('@') {
        Some((nu, h)) => (nu, h),
        None => (mask, ""),
    };
    let (nick, user) = match nick_user.split_once('!') {
        Some((n, u)) => (n, u),
        None if host.is_empty() => (nick_user, ""),
        None => ("", nick_user),
    };
    let fill = |s: &str| if s.is_empty() { "*".to_string() } else { s.to_string() };
    format!("{}!{}@{}", fill(nick), fill(user), fill(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_config;
    use crate::state::Membership;

    fn setup() -> (Network, UserId, ChannelId) {
        let mut net = Network::new(test_config());
        let (tx, _rx) = crate::network::sendq::WireSender::new(65536);
        let alice = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(alice, "alice", 100);
        net.users[alice].registered = true;
        let (chan, _) = net.get_or_create_channel("#room", 100);
        net.add_member(chan, alice, Membership::from_bits(Membership::OP));
        (net, alice, chan)
    }

    fn deltas(net: &Network, modes: &str, params: &[&str]) -> Vec<ModeDelta> {
        let registry = net.modes.clone();
        alder_proto::modes::parse_mode_string(modes, params, |letter, adding| {
            registry.takes_param(ModeKind::Channel, letter, adding)
        })
    }

    #[test]
    fn test_simple_flags_toggle() {
        let (mut net, alice, chan) = setup();
        let d = deltas(&net, "+nt", &[]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(result.applied.len(), 2);
        assert!(net.channels[chan].has_mode('n'));
        assert!(net.channels[chan].has_mode('t'));

        // Re-applying is a no-op.
        let d = deltas(&net, "+n", &[]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_reverse_restores_state() {
        let (mut net, alice, chan) = setup();
        let before_modes = net.channels[chan].modes.clone();
        let d = deltas(&net, "+mk", &["sekret"]);
        apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        let d = deltas(&net, "-mk", &["sekret"]);
        apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(net.channels[chan].modes, before_modes);
        assert!(net.channels[chan].key().is_none());
    }

    #[test]
    fn test_limit_canonicalized() {
        let (mut net, alice, chan) = setup();
        let d = deltas(&net, "+l", &["0042"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(result.applied[0].param.as_deref(), Some("42"));
        assert_eq!(net.channels[chan].limit(), Some(42));

        let d = deltas(&net, "+l", &["bogus"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_op_grant_and_unknown_nick() {
        let (mut net, alice, chan) = setup();
        let d = deltas(&net, "+o", &["nobody"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert!(result.applied.is_empty());
        assert!(matches!(result.errors[0], CommandError::NoSuchNick(_)));

        let d = deltas(&net, "-o+v", &["alice", "alice"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(result.applied.len(), 2);
        let m = net.channels[chan].members[&alice];
        assert!(!m.has(Membership::OP));
        assert!(m.has(Membership::VOICE));
    }

    #[test]
    fn test_ban_canonicalization_and_dedup() {
        let (mut net, alice, chan) = setup();
        let d = deltas(&net, "+b", &["troll"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(result.applied[0].param.as_deref(), Some("troll!*@*"));

        let d = deltas(&net, "+b", &["TROLL!*@*"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert!(result.applied.is_empty(), "case-insensitive duplicate");
        assert_eq!(net.channels[chan].list('b').len(), 1);
    }

    #[test]
    fn test_ban_list_cap() {
        let (mut net, alice, chan) = setup();
        for i in 0..64 {
            let mask = format!("user{i}!*@*");
            let d = deltas(&net, "+b", &[&mask]);
            let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
            assert_eq!(result.applied.len(), 1, "ban {i} accepted");
        }
        let d = deltas(&net, "+b", &["straw!*@*"]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert!(result.applied.is_empty());
        assert!(matches!(result.errors[0], CommandError::BanListFull(_)));
        assert_eq!(net.channels[chan].list('b').len(), 64);
    }

    #[test]
    fn test_list_query_collected() {
        let (mut net, alice, chan) = setup();
        let d = deltas(&net, "+b", &[]);
        let result = apply_channel_deltas(&mut net, ModeSource::User(alice), chan, d);
        assert_eq!(result.list_queries, vec!['b']);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_isupport_tokens() {
        let net = Network::new(test_config());
        assert_eq!(net.modes.prefix_token(), "(qaov)~&@+");
        assert_eq!(net.modes.chanmodes_token(), "beI,k,l,imnpst");
    }

    #[test]
    fn test_user_modes_and_oper_guard() {
        let (mut net, alice, _chan) = setup();
        let registry = net.modes.clone();
        let d = alder_proto::modes::parse_mode_string("+iw", &[], |l, a| {
            registry.takes_param(ModeKind::User, l, a)
        });
        let result = apply_user_deltas(&mut net, ModeSource::User(alice), alice, d);
        assert_eq!(result.applied.len(), 2);
        assert!(net.users[alice].modes.invisible);

        // +o by MODE is refused; -o works once opered.
        let d = alder_proto::modes::parse_mode_string("+o", &[], |l, a| {
            registry.takes_param(ModeKind::User, l, a)
        });
        let result = apply_user_deltas(&mut net, ModeSource::User(alice), alice, d);
        assert!(result.applied.is_empty());

        net.users[alice].modes.oper = true;
        net.users[alice].oper_type = Some("admin".into());
        let d = alder_proto::modes::parse_mode_string("-o", &[], |l, a| {
            registry.takes_param(ModeKind::User, l, a)
        });
        let result = apply_user_deltas(&mut net, ModeSource::User(alice), alice, d);
        assert_eq!(result.applied.len(), 1);
        assert!(!net.users[alice].modes.oper);
        assert!(net.users[alice].oper_type.is_none());
    }

    #[test]
    fn test_canonicalize_mask_forms() {
        assert_eq!(canonicalize_mask("nick"), "nick!*@*");
        assert_eq!(canonicalize_mask("user@host"), "*!user@host");
        assert_eq!(canonicalize_mask("nick!user"), "nick!user@*");
        assert_eq!(canonicalize_mask("a!b@c"), "a!b@c");
        assert_eq!(canonicalize_mask("O:nick!*@*"), "O:nick!*@*");
    }
}
