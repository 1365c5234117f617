//! Inbound server-to-server command handling.
//!
//! Everything here runs after authentication and the fake-direction
//! check. Broadcast verbs are re-propagated to every other direct peer;
//! targeted verbs ride the route toward their destination. Channel and
//! nick state merges follow the timestamp rules, so any two servers fed
//! the same lines converge on identical state.

use tracing::{debug, warn};

use alder_proto::casemap::is_valid_uid;
use alder_proto::modes::parse_mode_string;
use alder_proto::{Message, ModeDelta, ModeStacker, Numeric};

use crate::commands::helpers;
use crate::error::LinkError;
use crate::hooks::{self, HookEvent, HookPoint};
use crate::link::{collide, wire};
use crate::modes::{apply_channel_deltas, apply_user_deltas, ModeKind, ModeSource};
use crate::state::{ChannelId, Membership, Network, ServerId, UserId};

/// Maximum tolerated clock difference before a link is refused outright.
const MAX_CLOCK_SKEW: i64 = 600;
/// Skew beyond this is worth an operator warning.
const WARN_CLOCK_SKEW: i64 = 30;

pub fn dispatch(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    match msg.command.as_str() {
        "PING" => handle_ping(net, peer, msg),
        "PONG" => handle_pong(net, origin, msg),
        "BURST" => handle_burst(net, peer, origin, msg),
        "ENDBURST" => handle_endburst(net, peer, origin),
        "SERVER" => handle_server(net, peer, origin, msg),
        "SQUIT" => handle_squit(net, peer, origin, msg),
        "UID" => handle_uid(net, peer, origin, msg),
        "NICK" => handle_nick(net, peer, msg),
        "QUIT" => handle_quit(net, peer, msg),
        "FJOIN" => handle_fjoin(net, peer, origin, msg),
        "FMODE" => handle_fmode(net, peer, origin, msg),
        "FTOPIC" => handle_ftopic(net, peer, msg),
        "JOIN" => handle_join(net, peer, msg),
        "PART" => handle_part(net, peer, msg),
        "KICK" => handle_kick(net, peer, msg),
        "KILL" => handle_kill(net, peer, msg),
        "MODE" => handle_mode(net, peer, origin, msg),
        "OPERTYPE" => handle_opertype(net, peer, msg),
        "AWAY" => handle_away(net, peer, msg),
        "ADDLINE" => handle_addline(net, peer, origin, msg),
        "DELLINE" => handle_delline(net, peer, origin, msg),
        "SVSNICK" => handle_svsnick(net, peer, origin, msg),
        "SVSJOIN" => handle_svsjoin(net, peer, origin, msg),
        "SVSPART" => handle_svspart(net, peer, origin, msg),
        "PRIVMSG" | "NOTICE" => handle_message(net, peer, msg),
        "WALLOPS" => handle_wallops(net, peer, msg),
        "PUSH" => handle_push(net, peer, msg),
        "IDLE" => handle_idle(net, peer, msg),
        "METADATA" | "ENCAP" => handle_opaque(net, peer, msg),
        "VERSION" | "TIME" | "ADMIN" | "MOTD" | "STATS" | "REHASH" => {
            handle_remote_query(net, peer, msg)
        }
        "ERROR" => Err(LinkError::Remote(
            msg.arg(0).unwrap_or("no reason").to_string(),
        )),
        other => {
            debug!(other, "ignoring unknown peer verb");
            Ok(())
        }
    }
}

fn forward(net: &mut Network, except: ServerId, msg: &Message) {
    net.broadcast_to_peers(&msg.to_string(), Some(except));
}

// ---------------------------------------------------------------------
// Keepalive and burst brackets
// ---------------------------------------------------------------------

fn handle_ping(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let source = msg.arg(0).unwrap_or_default().to_string();
    let target = msg.arg(1).unwrap_or_else(|| net.server_sid()).to_string();
    if net.casemap.eq(&target, &net.server_sid().to_string()) {
        let line = format!(":{} PONG {} {}", net.server_sid(), net.server_sid(), source);
        net.send_to_peer(peer, &line);
    } else if let Some(server) = net.find_server_token(&target) {
        net.send_toward(server, &msg.to_string());
    }
    Ok(())
}

fn handle_pong(net: &mut Network, origin: ServerId, _msg: &Message) -> Result<(), LinkError> {
    if let Some(node) = net.servers.get_mut(origin) {
        node.awaiting_pong = false;
    }
    Ok(())
}

fn handle_burst(
    net: &mut Network,
    _peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if let Some(their_epoch) = msg.arg(0).and_then(|t| t.parse::<i64>().ok()) {
        let skew = (their_epoch - net.now).abs();
        if skew > MAX_CLOCK_SKEW {
            return Err(LinkError::ClockSkew(skew));
        }
        if skew > WARN_CLOCK_SKEW {
            let name = net.servers[origin].name.clone();
            warn!(server = %name, skew, "clock skew on link");
            net.snomask(
                'l',
                &format!("Link {} has {}s clock skew, proceeding anyway", name, skew),
            );
        }
    }
    if let Some(node) = net.servers.get_mut(origin) {
        node.bursting = true;
    }
    Ok(())
}

fn handle_endburst(net: &mut Network, _peer: ServerId, origin: ServerId) -> Result<(), LinkError> {
    if let Some(node) = net.servers.get_mut(origin) {
        node.bursting = false;
        let name = node.name.clone();
        net.snomask('l', &format!("Received end of netburst from {}", name));
    }
    hooks::notify(net, HookPoint::SyncNetwork, &HookEvent::default());
    // Deferred X-line side effects apply now.
    crate::commands::oper::enforce_xlines(net);
    Ok(())
}

// ---------------------------------------------------------------------
// Tree membership
// ---------------------------------------------------------------------

fn handle_server(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Err(LinkError::Malformed("SERVER"));
    }
    let name = msg.params[0].clone();
    let sid = msg.params[3].clone();
    let desc = msg.params.last().cloned().unwrap_or_default();

    net.add_server(origin, &sid, &name, &desc)?;
    forward(net, peer, msg);
    Ok(())
}

fn handle_squit(
    net: &mut Network,
    peer: ServerId,
    _origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    let name = msg.params.first().cloned().unwrap_or_default();
    let reason = msg.arg(1).unwrap_or("no reason").to_string();
    let Some(target) = net.find_server_name(&name) else {
        return Ok(());
    };
    if target == net.local_server {
        // Nobody SQUITs the local server remotely.
        return Ok(());
    }
    match net.route_of(target) {
        Some(route) if route == peer => {
            // The split is inside the sender's subtree: enact it locally
            // and tell everyone else.
            let subtree = crate::state::server::subtree_of(&net.servers, target);
            let victims = net.users_on_servers(&subtree);
            let parent_name = net.servers[target]
                .parent
                .and_then(|p| net.servers.get(p))
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let target_name = net.servers[target].name.clone();
            let split_reason = format!("{} {}", parent_name, target_name);
            let lost_users = victims.len();
            for user in victims {
                helpers::quit_user(net, user, &split_reason, false, None);
            }
            let lost_servers = net.remove_server_subtree(target).len();
            net.snomask(
                'l',
                &format!(
                    "Netsplit complete, lost {} users on {} servers ({})",
                    lost_users, lost_servers, target_name
                ),
            );
            forward(net, peer, msg);
        }
        Some(route) => {
            // A request for a subtree we route elsewhere: pass it along.
            net.send_to_peer(route, &msg.to_string());
        }
        None => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------

fn handle_uid(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 10 {
        return Err(LinkError::Malformed("UID"));
    }
    let uid = msg.params[0].clone();
    let nick_ts: i64 = msg.params[1].parse().map_err(|_| LinkError::Malformed("UID"))?;
    let nick = msg.params[2].clone();
    let host = msg.params[3].clone();
    let dhost = msg.params[4].clone();
    let ident = msg.params[5].clone();
    let ip = msg.params[6].clone();
    let signon_ts: i64 = msg.params[7].parse().unwrap_or(nick_ts);
    let modes = msg.params[8].clone();
    let gecos = msg.params.last().cloned().unwrap_or_default();

    if !is_valid_uid(&uid) || !uid.starts_with(&net.servers[origin].sid) {
        return Err(LinkError::Malformed("UID"));
    }
    if net.find_uid(&uid).is_some() {
        return Err(LinkError::Malformed("UID"));
    }

    if let Some(existing) = net.find_nick(&nick) {
        let userhost = format!("{}@{}", ident, host);
        let accepted = collide::resolve(net, existing, &uid, nick_ts, &userhost, peer);
        if !accepted {
            // The introduction lost; nothing to add or forward.
            return Ok(());
        }
    }

    let id = net
        .introduce_remote_user(
            origin, uid, nick, nick_ts, ident, host, dhost, ip, signon_ts, gecos,
        )
        .map_err(|_| LinkError::Malformed("UID"))?;
    net.users[id].modes.apply_string(&modes);
    forward(net, peer, msg);
    Ok(())
}

fn handle_nick(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let Some(new_nick) = msg.arg(0).map(str::to_string) else {
        return Ok(());
    };
    let ts = msg
        .arg(1)
        .and_then(|t| t.parse().ok())
        .unwrap_or(net.now);

    if let Some(existing) = net.find_nick(&new_nick) {
        if existing != user {
            let userhost = net.users[user].id_and_host();
            let uid = net.users[user].uid.clone();
            let accepted = collide::resolve(net, existing, &uid, ts, &userhost, peer);
            if !accepted {
                helpers::quit_user(net, user, "Nickname collision", false, None);
                return Ok(());
            }
        }
    }

    let line = format!(":{} NICK :{}", net.users[user].hostmask(), new_nick);
    net.fanout_common_local(user, &line, false);
    net.set_nick(user, &new_nick, ts);
    forward(net, peer, msg);
    Ok(())
}

fn handle_quit(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let reason = msg.arg(0).unwrap_or("Client exited").to_string();
    helpers::quit_user(net, user, &reason, true, Some(peer));
    Ok(())
}

fn handle_kill(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(target) = msg.arg(0).and_then(|t| net.find_user_token(t)) else {
        return Ok(());
    };
    let reason = msg.arg(1).unwrap_or("Killed").to_string();
    // Propagate first so the removal cannot re-announce.
    forward(net, peer, msg);
    helpers::quit_user(net, target, &format!("Killed ({})", reason), false, None);
    Ok(())
}

fn handle_opertype(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let oper_type = msg.arg(0).unwrap_or("oper").to_string();
    net.users[user].modes.oper = true;
    net.users[user].oper_type = Some(oper_type);
    forward(net, peer, msg);
    Ok(())
}

fn handle_away(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    net.users[user].away = msg.arg(0).filter(|t| !t.is_empty()).map(str::to_string);
    forward(net, peer, msg);
    Ok(())
}

// ---------------------------------------------------------------------
// Channels: the timestamp rules
// ---------------------------------------------------------------------

fn handle_fjoin(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Err(LinkError::Malformed("FJOIN"));
    }
    let name = msg.params[0].clone();
    let their_ts: i64 = msg.params[1]
        .parse()
        .map_err(|_| LinkError::Malformed("FJOIN"))?;
    let mode_str = msg.params[2].clone();
    let mode_args: Vec<&str> = msg.params[3..msg.params.len() - 1]
        .iter()
        .map(String::as_str)
        .collect();
    let member_blob = msg.params.last().cloned().unwrap_or_default();

    let members: Vec<(Membership, UserId)> = member_blob
        .split_whitespace()
        .filter_map(|token| {
            let (prefixes, uid) = token.rsplit_once(',')?;
            let user = net.find_uid(uid)?;
            Some((Membership::from_prefixes(prefixes), user))
        })
        .collect();

    let existing = net.find_channel(&name);
    let (chan_id, apply_their_modes, keep_their_prefixes) = match existing {
        None => {
            let (chan_id, _) = net.get_or_create_channel(&name, their_ts);
            (chan_id, true, true)
        }
        Some(chan_id) => {
            let our_ts = net.channels[chan_id].ts;
            if our_ts < their_ts {
                // We win: their member statuses are void.
                (chan_id, false, false)
            } else if our_ts > their_ts {
                // We lose: drop to their timestamp, strip every local
                // status bit and tell the network what was removed.
                net.channels[chan_id].ts = their_ts;
                let stripped = net.channels[chan_id].strip_all_status();
                announce_stripped(net, chan_id, &stripped);
                (chan_id, true, true)
            } else {
                (chan_id, true, true)
            }
        }
    };

    if apply_their_modes && mode_str != "+" && !mode_str.is_empty() {
        let registry = net.modes.clone();
        let deltas = parse_mode_string(&mode_str, &mode_args, |letter, adding| {
            registry.takes_param(ModeKind::Channel, letter, adding)
        });
        apply_channel_deltas(net, ModeSource::Server(origin), chan_id, deltas);
    }

    for (membership, user) in members {
        let membership = if keep_their_prefixes {
            membership
        } else {
            Membership::none()
        };
        if let Some(current) = net.channels[chan_id].members.get_mut(&user) {
            current.union(membership);
        } else {
            net.add_member(chan_id, user, membership);
            let line = format!(
                ":{} JOIN :{}",
                net.users[user].hostmask(),
                net.channels[chan_id].name
            );
            net.fanout_channel_local(chan_id, &line, Some(user));
        }
    }

    forward(net, peer, msg);
    Ok(())
}

/// Broadcast the FMODE that confirms a timestamp-loss status wipe, and
/// echo the same removals to local members.
fn announce_stripped(net: &mut Network, chan_id: ChannelId, stripped: &[(UserId, Vec<char>)]) {
    if stripped.is_empty() {
        return;
    }
    let mut stacker = ModeStacker::new(net.config.max_modes_per_line);
    for (user, letters) in stripped {
        let nick = net.users[*user].nick.clone();
        for letter in letters {
            stacker.push(ModeDelta::new(false, *letter, Some(nick.clone())));
        }
    }
    let name = net.channels[chan_id].name.clone();
    let ts = net.channels[chan_id].ts;
    let sid = net.server_sid().to_string();
    let server_name = net.config.server.name.clone();
    for packed in stacker.flush(sid.len() + name.len() + 32) {
        let echo = format!(":{} MODE {} {}", server_name, name, packed);
        net.fanout_channel_local(chan_id, &echo, None);
        let fmode = wire::fmode(&sid, &name, ts, &packed);
        net.broadcast_to_peers(&fmode, None);
    }
}

fn handle_fmode(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 3 {
        return Err(LinkError::Malformed("FMODE"));
    }
    let target = msg.params[0].clone();
    let their_ts: i64 = msg.params[1]
        .parse()
        .map_err(|_| LinkError::Malformed("FMODE"))?;
    let mode_str = msg.params[2].clone();
    let mode_args: Vec<&str> = msg.params[3..].iter().map(String::as_str).collect();
    let registry = net.modes.clone();

    // User-mode form: valid only against the current nick timestamp.
    if !target.starts_with('#') {
        let Some(user) = net.find_user_token(&target) else {
            return Ok(());
        };
        if net.users[user].nick_ts != their_ts {
            return Ok(());
        }
        let deltas = parse_mode_string(&mode_str, &mode_args, |letter, adding| {
            registry.takes_param(ModeKind::User, letter, adding)
        });
        apply_user_deltas(net, ModeSource::Server(origin), user, deltas);
        forward(net, peer, msg);
        return Ok(());
    }

    let Some(chan_id) = net.find_channel(&target) else {
        return Ok(());
    };
    let our_ts = net.channels[chan_id].ts;
    let deltas = parse_mode_string(&mode_str, &mode_args, |letter, adding| {
        registry.takes_param(ModeKind::Channel, letter, adding)
    });

    if their_ts < our_ts && !net.is_uline(origin) {
        // A stale claim from a non-services peer: reinforce our current
        // state back at the sender only and apply nothing.
        reinforce(net, peer, chan_id, &deltas);
        return Ok(());
    }
    if their_ts != our_ts || net.is_uline(origin) {
        // Newer than ours, or a services server: apply and propagate.
        let result = apply_channel_deltas(net, ModeSource::Server(origin), chan_id, deltas);
        announce_applied(net, origin, chan_id, &result.applied, Some(peer));
        return Ok(());
    }

    // Equal timestamps merge per-mode: for a parametric conflict the
    // greater value wins everywhere; kept-ours halves bounce back so the
    // sender converges too.
    let (take, keep_ours) = split_param_conflicts(net, chan_id, deltas);
    if !keep_ours.is_empty() {
        reinforce(net, peer, chan_id, &keep_ours);
    }
    let result = apply_channel_deltas(net, ModeSource::Server(origin), chan_id, take);
    announce_applied(net, origin, chan_id, &result.applied, Some(peer));
    Ok(())
}

/// Partition an equal-timestamp delta stream into changes we take and
/// parametric changes where our value wins (key and limit compare by
/// string and number respectively; the greater survives).
fn split_param_conflicts(
    net: &Network,
    chan_id: ChannelId,
    deltas: Vec<ModeDelta>,
) -> (Vec<ModeDelta>, Vec<ModeDelta>) {
    let mut take = Vec::new();
    let mut keep_ours = Vec::new();
    for delta in deltas {
        let ours = net.channels[chan_id].mode_params.get(&delta.letter).cloned();
        let conflict = delta.adding && delta.param.is_some() && ours.is_some();
        if !conflict {
            take.push(delta);
            continue;
        }
        let ours = ours.unwrap_or_default();
        let theirs = delta.param.clone().unwrap_or_default();
        let ours_wins = match delta.letter {
            'l' => {
                let our_n: u64 = ours.parse().unwrap_or(0);
                let their_n: u64 = theirs.parse().unwrap_or(0);
                our_n >= their_n
            }
            _ => ours >= theirs,
        };
        if ours_wins {
            keep_ours.push(delta);
        } else {
            take.push(delta);
        }
    }
    (take, keep_ours)
}

/// Echo applied remote modes to local members and forward the FMODE on.
fn announce_applied(
    net: &mut Network,
    origin: ServerId,
    chan_id: ChannelId,
    applied: &[ModeDelta],
    except: Option<ServerId>,
) {
    if applied.is_empty() {
        return;
    }
    let source_display = net.servers[origin].name.clone();
    let origin_token = net.servers[origin].sid.clone();
    helpers::announce_channel_modes(
        net,
        &source_display,
        &origin_token,
        chan_id,
        applied,
        except,
    );
}

/// Answer a losing FMODE with the current state of everything it tried
/// to change, sent to the offending side only.
fn reinforce(net: &mut Network, peer: ServerId, chan_id: ChannelId, deltas: &[ModeDelta]) {
    let registry = net.modes.clone();
    let mut stacker = ModeStacker::new(net.config.max_modes_per_line);

    for delta in deltas {
        let Some(def) = registry.get(ModeKind::Channel, delta.letter) else {
            continue;
        };
        if def.prefix.is_some() {
            let Some(user) = delta.param.as_deref().and_then(|p| net.find_user_token(p)) else {
                continue;
            };
            let bit = Membership::bit_for_letter(delta.letter).unwrap_or(0);
            let has = net.channels[chan_id]
                .members
                .get(&user)
                .map(|m| m.has(bit))
                .unwrap_or(false);
            if has != delta.adding {
                let nick = net.users[user].nick.clone();
                stacker.push(ModeDelta::new(has, delta.letter, Some(nick)));
            }
        } else if def.list_mode {
            let Some(mask) = &delta.param else { continue };
            let present = net.channels[chan_id]
                .list(delta.letter)
                .iter()
                .any(|e| net.casemap.eq(&e.mask, mask));
            if present != delta.adding {
                stacker.push(ModeDelta::new(present, delta.letter, Some(mask.clone())));
            }
        } else if def.param_on_add {
            let ours = net.channels[chan_id].mode_params.get(&delta.letter).cloned();
            match (&ours, delta.adding) {
                (Some(value), _) => {
                    stacker.push(ModeDelta::new(true, delta.letter, Some(value.clone())))
                }
                (None, true) => stacker.push(ModeDelta::new(false, delta.letter, None::<String>)),
                (None, false) => {}
            }
        } else {
            let set = net.channels[chan_id].has_mode(delta.letter);
            if set != delta.adding {
                stacker.push(ModeDelta::new(set, delta.letter, None::<String>));
            }
        }
    }

    if stacker.is_empty() {
        return;
    }
    let name = net.channels[chan_id].name.clone();
    let ts = net.channels[chan_id].ts;
    let sid = net.server_sid().to_string();
    for packed in stacker.flush(sid.len() + name.len() + 32) {
        let line = wire::fmode(&sid, &name, ts, &packed);
        net.send_to_peer(peer, &line);
    }
}

fn handle_ftopic(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Err(LinkError::Malformed("FTOPIC"));
    }
    let name = msg.params[0].clone();
    let their_ts: i64 = msg.params[1]
        .parse()
        .map_err(|_| LinkError::Malformed("FTOPIC"))?;
    let setter = msg.params[2].clone();
    let text = msg.params.last().cloned().unwrap_or_default();

    let Some(chan_id) = net.find_channel(&name) else {
        return Ok(());
    };
    let accept = match &net.channels[chan_id].topic {
        None => true,
        Some(current) => their_ts >= current.set_ts,
    };
    if !accept {
        return Ok(());
    }

    net.channels[chan_id].topic = if text.is_empty() {
        None
    } else {
        Some(crate::state::Topic {
            text: text.clone(),
            setter: setter.clone(),
            set_ts: their_ts,
        })
    };
    let display = net.channels[chan_id].name.clone();
    let line = format!(":{} TOPIC {} :{}", setter, display, text);
    net.fanout_channel_local(chan_id, &line, None);
    forward(net, peer, msg);
    Ok(())
}

fn handle_join(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    // Plain JOIN between servers is an in-channel announcement only.
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let Some(name) = msg.arg(0).map(str::to_string) else {
        return Ok(());
    };
    let now = net.now;
    let (chan_id, _) = net.get_or_create_channel(&name, now);
    if !net.channels[chan_id].members.contains_key(&user) {
        net.add_member(chan_id, user, Membership::none());
        let line = format!(
            ":{} JOIN :{}",
            net.users[user].hostmask(),
            net.channels[chan_id].name
        );
        net.fanout_channel_local(chan_id, &line, Some(user));
    }
    forward(net, peer, msg);
    Ok(())
}

fn handle_part(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(user) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let Some(chan_id) = msg.arg(0).and_then(|n| net.find_channel(n)) else {
        return Ok(());
    };
    if !net.channels[chan_id].members.contains_key(&user) {
        return Ok(());
    }
    let reason = msg.arg(1).unwrap_or_default();
    let line = if reason.is_empty() {
        format!(
            ":{} PART {}",
            net.users[user].hostmask(),
            net.channels[chan_id].name
        )
    } else {
        format!(
            ":{} PART {} :{}",
            net.users[user].hostmask(),
            net.channels[chan_id].name,
            reason
        )
    };
    net.fanout_channel_local(chan_id, &line, None);
    net.remove_member(chan_id, user);
    forward(net, peer, msg);
    Ok(())
}

fn handle_kick(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(chan_id) = msg.arg(0).and_then(|n| net.find_channel(n)) else {
        return Ok(());
    };
    let Some(target) = msg.arg(1).and_then(|t| net.find_user_token(t)) else {
        return Ok(());
    };
    if !net.channels[chan_id].members.contains_key(&target) {
        return Ok(());
    }
    let reason = msg.arg(2).unwrap_or("Kicked").to_string();
    let source_display = msg
        .prefix
        .as_deref()
        .and_then(|p| net.find_user_token(p))
        .map(|u| net.users[u].hostmask())
        .or_else(|| {
            msg.prefix
                .as_deref()
                .and_then(|p| net.find_server_token(p))
                .map(|s| net.servers[s].name.clone())
        })
        .unwrap_or_else(|| net.config.server.name.clone());

    let line = format!(
        ":{} KICK {} {} :{}",
        source_display,
        net.channels[chan_id].name,
        net.users[target].nick,
        reason
    );
    net.fanout_channel_local(chan_id, &line, None);
    net.remove_member(chan_id, target);
    forward(net, peer, msg);
    Ok(())
}

fn handle_mode(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    // Untimestamped MODE from a server or oper; applied as-is.
    if msg.params.len() < 2 {
        return Ok(());
    }
    let target = msg.params[0].clone();
    let registry = net.modes.clone();
    let mode_args: Vec<&str> = msg.params[2..].iter().map(String::as_str).collect();

    if let Some(chan_id) = net.find_channel(&target) {
        let deltas = parse_mode_string(&msg.params[1], &mode_args, |letter, adding| {
            registry.takes_param(ModeKind::Channel, letter, adding)
        });
        let result = apply_channel_deltas(net, ModeSource::Server(origin), chan_id, deltas);
        announce_applied(net, origin, chan_id, &result.applied, Some(peer));
    } else if let Some(user) = net.find_user_token(&target) {
        let deltas = parse_mode_string(&msg.params[1], &mode_args, |letter, adding| {
            registry.takes_param(ModeKind::User, letter, adding)
        });
        apply_user_deltas(net, ModeSource::Server(origin), user, deltas);
        forward(net, peer, msg);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// X-lines and services verbs
// ---------------------------------------------------------------------

fn handle_addline(
    net: &mut Network,
    peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 6 {
        return Err(LinkError::Malformed("ADDLINE"));
    }
    let Some(kind) = msg.params[0]
        .chars()
        .next()
        .and_then(crate::state::XLineKind::from_letter)
    else {
        return Ok(());
    };
    let line = crate::state::XLine {
        kind,
        mask: msg.params[1].clone(),
        setter: msg.params[2].clone(),
        set_ts: msg.params[3].parse().unwrap_or(net.now),
        duration: msg.params[4].parse().unwrap_or(0),
        reason: msg.params.last().cloned().unwrap_or_default(),
    };
    net.xlines.add(line);
    forward(net, peer, msg);

    // Side effects wait until the sender finishes bursting.
    if !net.servers[origin].bursting {
        crate::commands::oper::enforce_xlines(net);
    }
    Ok(())
}

fn handle_delline(
    net: &mut Network,
    peer: ServerId,
    _origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 2 {
        return Ok(());
    }
    if let Some(kind) = msg.params[0]
        .chars()
        .next()
        .and_then(crate::state::XLineKind::from_letter)
    {
        net.xlines.remove(kind, &msg.params[1]);
        forward(net, peer, msg);
    }
    Ok(())
}

fn handle_svsnick(
    net: &mut Network,
    _peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if !net.is_uline(origin) {
        return Ok(());
    }
    if msg.params.len() < 3 {
        return Ok(());
    }
    let Some(target) = net.find_user_token(&msg.params[0]) else {
        return Ok(());
    };
    let new_nick = msg.params[1].clone();
    let ts: i64 = msg.params[2].parse().unwrap_or(net.now);

    if net.users[target].is_local() {
        if net.find_nick(&new_nick).is_none() {
            let line = format!(":{} NICK :{}", net.users[target].hostmask(), new_nick);
            net.fanout_common_local(target, &line, true);
            let uid = net.users[target].uid.clone();
            net.broadcast_to_peers(&format!(":{} NICK {} {}", uid, new_nick, ts), None);
            net.set_nick(target, &new_nick, ts);
        }
    } else {
        let home = net.users[target].server;
        net.send_toward(home, &msg.to_string());
    }
    Ok(())
}

fn handle_svsjoin(
    net: &mut Network,
    _peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if !net.is_uline(origin) || msg.params.len() < 2 {
        return Ok(());
    }
    let Some(target) = net.find_user_token(&msg.params[0]) else {
        return Ok(());
    };
    if net.users[target].is_local() {
        let join = Message::new("JOIN", vec![msg.params[1].clone()]);
        let registry = crate::commands::CommandRegistry::new();
        let _ = crate::commands::dispatch(&registry, net, target, &join);
    } else {
        let home = net.users[target].server;
        net.send_toward(home, &msg.to_string());
    }
    Ok(())
}

fn handle_svspart(
    net: &mut Network,
    _peer: ServerId,
    origin: ServerId,
    msg: &Message,
) -> Result<(), LinkError> {
    if !net.is_uline(origin) || msg.params.len() < 2 {
        return Ok(());
    }
    let Some(target) = net.find_user_token(&msg.params[0]) else {
        return Ok(());
    };
    if net.users[target].is_local() {
        let part = Message::new("PART", vec![msg.params[1].clone()]);
        let registry = crate::commands::CommandRegistry::new();
        let _ = crate::commands::dispatch(&registry, net, target, &part);
    } else {
        let home = net.users[target].server;
        net.send_toward(home, &msg.to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Messaging and queries
// ---------------------------------------------------------------------

fn handle_message(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    if msg.params.len() < 2 {
        return Ok(());
    }
    let target = msg.params[0].clone();
    let text = msg.params[1].clone();
    let verb = msg.command.clone();
    let source_display = msg
        .prefix
        .as_deref()
        .and_then(|p| net.find_user_token(p))
        .map(|u| net.users[u].hostmask())
        .or_else(|| {
            msg.prefix
                .as_deref()
                .and_then(|p| net.find_server_token(p))
                .map(|s| net.servers[s].name.clone())
        })
        .unwrap_or_default();

    if let Some(chan_id) = net.find_channel(&target) {
        let sender = msg.prefix.as_deref().and_then(|p| net.find_user_token(p));
        let name = net.channels[chan_id].name.clone();
        let line = format!(":{} {} {} :{}", source_display, verb, name, text);
        net.fanout_channel_local(chan_id, &line, sender);
        forward(net, peer, msg);
    } else if let Some(user) = net.find_user_token(&target) {
        if net.users[user].is_local() {
            let nick = net.users[user].nick.clone();
            let line = format!(":{} {} {} :{}", source_display, verb, nick, text);
            net.send_to_user(user, &line);
        } else {
            let home = net.users[user].server;
            net.send_toward(home, &msg.to_string());
        }
    }
    Ok(())
}

fn handle_wallops(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let text = msg.arg(0).unwrap_or_default().to_string();
    let source_display = msg
        .prefix
        .as_deref()
        .and_then(|p| net.find_user_token(p))
        .map(|u| net.users[u].hostmask())
        .unwrap_or_else(|| net.config.server.name.clone());
    let targets: Vec<UserId> = net
        .users
        .iter()
        .filter(|(_, u)| u.is_local() && u.modes.wallops)
        .map(|(id, _)| id)
        .collect();
    for target in targets {
        let line = format!(":{} WALLOPS :{}", source_display, text);
        net.send_to_user(target, &line);
    }
    forward(net, peer, msg);
    Ok(())
}

fn handle_push(net: &mut Network, _peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    if msg.params.len() < 2 {
        return Ok(());
    }
    let Some(target) = net.find_user_token(&msg.params[0]) else {
        return Ok(());
    };
    if net.users[target].is_local() {
        let line = msg.params[1].clone();
        net.send_to_user(target, &line);
    } else {
        let home = net.users[target].server;
        net.send_toward(home, &msg.to_string());
    }
    Ok(())
}

fn handle_idle(net: &mut Network, _peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(source) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    let Some(target) = msg.arg(0).and_then(|t| net.find_user_token(t)) else {
        return Ok(());
    };

    if msg.params.len() >= 3 {
        // Response: the target's server reported signon and idle seconds;
        // complete the WHOIS for our local requester.
        if !net.users[target].is_local() {
            let home = net.users[target].server;
            net.send_toward(home, &msg.to_string());
            return Ok(());
        }
        let signon = msg.params[1].clone();
        let idle = msg.params[2].clone();
        let server = net.config.server.name.clone();
        let nick = net.users[target].nick.clone();
        let source_nick = net.users[source].nick.clone();
        let r1 = Numeric::RPL_WHOISIDLE.reply(
            &server,
            &nick,
            &[&source_nick, &idle, &signon, "seconds idle, signon time"],
        );
        let r2 =
            Numeric::RPL_ENDOFWHOIS.reply(&server, &nick, &[&source_nick, "End of /WHOIS list."]);
        net.send_to_user(target, &r1.to_string());
        net.send_to_user(target, &r2.to_string());
        return Ok(());
    }

    if net.users[target].is_local() {
        let (signon, idle) = {
            let u = &net.users[target];
            let idle_since = u.local.as_ref().map(|l| l.idle_since).unwrap_or(net.now);
            (u.signon_ts, (net.now - idle_since).max(0))
        };
        let target_uid = net.users[target].uid.clone();
        let source_uid = net.users[source].uid.clone();
        let source_home = net.users[source].server;
        let line = format!(":{} IDLE {} {} {}", target_uid, source_uid, signon, idle);
        net.send_toward(source_home, &line);
    } else {
        let home = net.users[target].server;
        net.send_toward(home, &msg.to_string());
    }
    Ok(())
}

fn handle_opaque(net: &mut Network, peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    // METADATA is broadcast but carries no core state; ENCAP is routed by
    // its target mask. Extensions subscribe through hooks.
    if msg.command == "ENCAP" {
        let target = msg.arg(0).unwrap_or("*");
        if target != "*" && !net.casemap.eq(target, &net.server_sid().to_string()) {
            if let Some(server) = net.find_server_token(target) {
                net.send_toward(server, &msg.to_string());
            }
            return Ok(());
        }
    }
    forward(net, peer, msg);
    Ok(())
}

/// VERSION/TIME/ADMIN/MOTD/STATS aimed at this server from a remote user;
/// answers travel back as PUSH numerics.
fn handle_remote_query(net: &mut Network, _peer: ServerId, msg: &Message) -> Result<(), LinkError> {
    let Some(source) = msg.prefix.as_deref().and_then(|p| net.find_user_token(p)) else {
        return Ok(());
    };
    // Routed further if not for us.
    if let Some(target) = msg.params.last() {
        if let Some(server) = net.find_server_token(target) {
            if server != net.local_server {
                net.send_toward(server, &msg.to_string());
                return Ok(());
            }
        }
    }

    let server_name = net.config.server.name.clone();
    match msg.command.as_str() {
        "VERSION" => {
            push_numeric(
                net,
                source,
                Numeric::RPL_VERSION,
                &[&crate::version_string(), &server_name],
            );
        }
        "TIME" => {
            let time = chrono::DateTime::from_timestamp(net.now, 0)
                .map(|t| t.format("%a %b %d %Y %H:%M:%S UTC").to_string())
                .unwrap_or_default();
            push_numeric(net, source, Numeric::RPL_TIME, &[&server_name, &time]);
        }
        "ADMIN" => {
            let admin = net.config.admin.clone();
            push_numeric(
                net,
                source,
                Numeric::RPL_ADMINME,
                &[&server_name, "Administrative info"],
            );
            push_numeric(net, source, Numeric::RPL_ADMINLOC1, &[&admin.name]);
            push_numeric(net, source, Numeric::RPL_ADMINLOC2, &[&admin.location]);
            push_numeric(net, source, Numeric::RPL_ADMINEMAIL, &[&admin.email]);
        }
        "MOTD" => {
            push_numeric(
                net,
                source,
                Numeric::ERR_NOMOTD,
                &["Message of the day file is missing."],
            );
        }
        "STATS" => {
            let letter = msg.arg(0).unwrap_or("*").to_string();
            push_numeric(
                net,
                source,
                Numeric::RPL_ENDOFSTATS,
                &[&letter, "End of /STATS report"],
            );
        }
        // Remote REHASH asks this server to reload its config.
        "REHASH" => {
            net.snomask('l', "Remote REHASH request received");
        }
        _ => {}
    }
    Ok(())
}

/// Send a numeric to a remote user, wrapped in PUSH toward their server.
fn push_numeric(net: &mut Network, target: UserId, numeric: Numeric, params: &[&str]) {
    let server_name = net.config.server.name.clone();
    let nick = net.users[target].nick.clone();
    let reply = numeric.reply(&server_name, &nick, params);
    let uid = net.users[target].uid.clone();
    let home = net.users[target].server;
    let sid = net.server_sid().to_string();
    let line = format!(":{} PUSH {} :{}", sid, uid, reply);
    net.send_toward(home, &line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::sendq::{WireReceiver, WireSender};
    use crate::state::tests::test_config;

    fn peer(net: &mut Network, sid: &str, name: &str) -> (ServerId, WireReceiver) {
        let (tx, rx) = WireSender::new(262_144);
        let id = net.add_server(net.local_server, sid, name, "peer").unwrap();
        net.servers[id].link = Some(tx);
        (id, rx)
    }

    fn feed(net: &mut Network, from: ServerId, line: &str) {
        crate::link::dispatch_peer_line(net, from, line).unwrap();
    }

    fn drain(rx: &mut WireReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    fn intro_user(net: &mut Network, from: ServerId, sid: &str, suffix: char, nick: &str, ts: i64) {
        feed(
            net,
            from,
            &format!(
                ":{} UID {}AAAAAA{} {} {} host dhost id 0.0.0.0 {} + :R",
                sid, sid, suffix, ts, nick, ts
            ),
        );
    }

    #[test]
    fn test_uid_introduction_and_forwarding() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        let (_b, mut brx) = peer(&mut net, "3BB", "b.example.net");

        intro_user(&mut net, a, "2AA", 'A', "carol", 900);
        let carol = net.find_nick("carol").unwrap();
        assert_eq!(net.users[carol].uid, "2AAAAAAAA");
        assert!(!net.users[carol].is_local());
        // Introduction is forwarded to the other peer, once.
        let lines = drain(&mut brx);
        assert_eq!(lines.iter().filter(|l| l.contains(" UID ")).count(), 1);
        net.assert_invariants();
    }

    #[test]
    fn test_uid_collision_remote_wins_lower_ts() {
        let mut net = Network::new(test_config());
        let (tx, mut local_rx) = WireSender::new(262_144);
        let bob = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(bob, "bob", 1000);
        net.users[bob].ident = "b".into();
        net.users[bob].registered = true;

        let (a, mut arx) = peer(&mut net, "2AA", "a.example.net");
        drain(&mut arx);
        // Same b@localhost identity reconnecting with an older signon.
        feed(
            &mut net,
            a,
            ":2AA UID 2AAAAAAAA 900 bob localhost localhost b 0.0.0.0 900 + :Bob",
        );

        // The local bob dies with a collision quit; the remote claims the
        // nick; no KILL goes back toward the introducer.
        let remote = net.find_nick("bob").unwrap();
        assert_eq!(net.users[remote].uid, "2AAAAAAAA");
        let local_lines = drain(&mut local_rx);
        assert!(
            local_lines.iter().any(|l| l.contains("Nickname collision")),
            "{local_lines:?}"
        );
        let peer_lines = drain(&mut arx);
        assert!(!peer_lines.iter().any(|l| l.contains("KILL")), "{peer_lines:?}");
        net.assert_invariants();
    }

    #[test]
    fn test_uid_collision_local_wins_keeps_local() {
        let mut net = Network::new(test_config());
        let (tx, _rx) = WireSender::new(262_144);
        let bob = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(bob, "bob", 900);
        net.users[bob].ident = "b".into();
        net.users[bob].registered = true;

        let (a, mut arx) = peer(&mut net, "2AA", "a.example.net");
        drain(&mut arx);
        // Same identity, newer claim: the older local signon survives.
        feed(
            &mut net,
            a,
            ":2AA UID 2AAAAAAAA 1000 bob localhost localhost b 0.0.0.0 1000 + :Bob",
        );

        assert_eq!(net.find_nick("bob"), Some(bob));
        assert!(net.find_uid("2AAAAAAAA").is_none());
        // The loser is killed back along the arrival route.
        let lines = drain(&mut arx);
        assert!(
            lines
                .iter()
                .any(|l| l.contains("KILL 2AAAAAAAA") && l.contains("Nickname collision")),
            "{lines:?}"
        );
    }

    #[test]
    fn test_fjoin_create_and_merge_equal_ts() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "u1", 900);
        intro_user(&mut net, a, "2AA", 'B', "u2", 901);

        feed(&mut net, a, ":2AA FJOIN #c 1000 +nt :@,2AAAAAAAA +,2AAAAAAAB");
        let chan = net.find_channel("#c").unwrap();
        assert_eq!(net.channels[chan].ts, 1000);
        assert!(net.channels[chan].has_mode('n'));
        let u1 = net.find_uid("2AAAAAAAA").unwrap();
        let u2 = net.find_uid("2AAAAAAAB").unwrap();
        assert!(net.channels[chan].members[&u1].has(Membership::OP));
        assert!(net.channels[chan].members[&u2].has(Membership::VOICE));
        net.assert_invariants();
    }

    #[test]
    fn test_fjoin_we_win_strips_incoming_prefixes() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "old", 900);
        feed(&mut net, a, ":2AA FJOIN #c 500 +nt :@,2AAAAAAAA");

        intro_user(&mut net, a, "2AA", 'B', "late", 901);
        feed(&mut net, a, ":2AA FJOIN #c 800 + :@,2AAAAAAAB");

        let chan = net.find_channel("#c").unwrap();
        assert_eq!(net.channels[chan].ts, 500, "our older timestamp survives");
        let late = net.find_uid("2AAAAAAAB").unwrap();
        assert_eq!(net.channels[chan].members[&late].rank(), 0);
    }

    #[test]
    fn test_fjoin_we_lose_strips_and_confirms() {
        let mut net = Network::new(test_config());
        let (tx, _rx) = WireSender::new(262_144);
        let alice = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(alice, "alice", 100);
        net.users[alice].ident = "a".into();
        net.users[alice].registered = true;
        let (chan, _) = net.get_or_create_channel("#c", 2000);
        net.add_member(chan, alice, Membership::from_bits(Membership::OP));

        let (a, mut arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'C', "rc", 900);
        drain(&mut arx);
        feed(&mut net, a, ":2AA FJOIN #c 1000 +nt :@,2AAAAAAAC");

        assert_eq!(net.channels[chan].ts, 1000);
        assert_eq!(net.channels[chan].members[&alice].rank(), 0, "alice deopped");
        let rc = net.find_uid("2AAAAAAAC").unwrap();
        assert!(net.channels[chan].members[&rc].has(Membership::OP));

        let lines = drain(&mut arx);
        assert!(
            lines
                .iter()
                .any(|l| l.contains("FMODE #c 1000 -o alice")),
            "deop confirmation sent to peers: {lines:?}"
        );
        net.assert_invariants();
    }

    #[test]
    fn test_fmode_stale_ts_reinforced_not_applied() {
        let mut net = Network::new(test_config());
        let (a, mut arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "u1", 900);
        feed(&mut net, a, ":2AA FJOIN #c 1000 +nt :@,2AAAAAAAA");
        drain(&mut arx);

        // An out-of-date claim is bounced back, not applied.
        feed(&mut net, a, ":2AA FMODE #c 500 +m");
        let chan = net.find_channel("#c").unwrap();
        assert!(!net.channels[chan].has_mode('m'));
        let lines = drain(&mut arx);
        assert!(
            lines.iter().any(|l| l.contains("FMODE #c 1000 -m")),
            "reinforcement bounced: {lines:?}"
        );
    }

    #[test]
    fn test_fmode_equal_ts_applies() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "u1", 900);
        feed(&mut net, a, ":2AA FJOIN #c 1000 + :@,2AAAAAAAA");

        feed(&mut net, a, ":2AA FMODE #c 1000 +mk sekret");
        let chan = net.find_channel("#c").unwrap();
        assert!(net.channels[chan].has_mode('m'));
        assert_eq!(net.channels[chan].key(), Some("sekret"));
    }

    #[test]
    fn test_ftopic_rules() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "u1", 900);
        feed(&mut net, a, ":2AA FJOIN #c 1000 + :,2AAAAAAAA");

        feed(&mut net, a, ":2AA FTOPIC #c 5000 setter :first topic");
        let chan = net.find_channel("#c").unwrap();
        assert_eq!(net.channels[chan].topic.as_ref().unwrap().text, "first topic");

        // An older topic claim loses.
        feed(&mut net, a, ":2AA FTOPIC #c 4000 other :stale");
        assert_eq!(net.channels[chan].topic.as_ref().unwrap().text, "first topic");

        // A newer one wins.
        feed(&mut net, a, ":2AA FTOPIC #c 6000 other :fresh");
        assert_eq!(net.channels[chan].topic.as_ref().unwrap().text, "fresh");
    }

    #[test]
    fn test_squit_accounting() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        feed(&mut net, a, ":2AA SERVER t.example.net * 0 4TT :grandchild");
        for (sid, suffix, nick) in [("2AA", 'A', "s1"), ("2AA", 'B', "s2"), ("4TT", 'C', "t1")] {
            intro_user(&mut net, a, sid, suffix, nick, 900);
        }
        assert_eq!(net.global_user_count(), 3);

        feed(&mut net, a, ":2AA SQUIT t.example.net :link failure");
        assert_eq!(net.global_user_count(), 2, "grandchild users gone");
        assert!(net.find_sid("4TT").is_none());
        assert!(net.find_sid("2AA").is_some());
        net.assert_invariants();
    }

    #[test]
    fn test_remote_nick_change_with_ts() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        intro_user(&mut net, a, "2AA", 'A', "carol", 900);
        feed(&mut net, a, ":2AAAAAAAA NICK karol 950");
        let user = net.find_nick("karol").unwrap();
        assert_eq!(net.users[user].nick_ts, 950);
        assert!(net.find_nick("carol").is_none());
    }

    #[test]
    fn test_addline_enforced_after_burst_only() {
        let mut net = Network::new(test_config());
        let (a, _arx) = peer(&mut net, "2AA", "a.example.net");
        let burst = format!("BURST {}", net.now);
        feed(&mut net, a, &burst);
        // While bursting, side effects are deferred.
        feed(
            &mut net,
            a,
            ":2AA ADDLINE Q badnick* oper 100 0 :reserved",
        );
        assert_eq!(net.xlines.len(), 1);
        feed(&mut net, a, "ENDBURST");
        assert!(!net.servers[a].bursting);
    }
}
