//! Operations shared between command handlers and the link layer.

use crate::hooks::{self, HookEvent, HookPoint, HookVerdict};
use crate::link::wire;
use crate::state::{ChannelId, Membership, Network, ServerId, UserId};

/// Tear a user down: QUIT fanout to everyone sharing a channel, optional
/// peer announcement, hook notification, then removal from the model.
///
/// `except_peer` suppresses the announcement toward the link a remote quit
/// arrived on. Netsplit teardown passes `announce_peers: false`; peers
/// infer the loss from SQUIT.
pub fn quit_user(
    net: &mut Network,
    id: UserId,
    reason: &str,
    announce_peers: bool,
    except_peer: Option<ServerId>,
) {
    let Some(user) = net.users.get(id) else { return };
    let registered = user.registered;
    let is_local = user.is_local();
    let hostmask = user.hostmask();
    let uid = user.uid.clone();

    if registered {
        let line = format!(":{} QUIT :{}", hostmask, reason);
        net.fanout_common_local(id, &line, false);
        if announce_peers {
            let peer_line = format!(":{} QUIT :{}", uid, reason);
            net.broadcast_to_peers(&peer_line, except_peer);
        }
    }
    if is_local {
        let line = format!(
            "ERROR :Closing link: ({}) [{}]",
            net.users[id].hostmask(),
            reason
        );
        net.send_to_user(id, &line);
    }

    hooks::notify(
        net,
        HookPoint::UserQuit,
        &HookEvent {
            user: Some(id),
            text: Some(reason),
            ..Default::default()
        },
    );
    net.remove_user(id);
}

/// Drain the drop/squit queues an operation may have filled (sendq
/// overflow, kill side effects). Runs until stable since dropping one
/// connection can overflow another.
pub fn flush_pending(net: &mut Network) {
    for _ in 0..8 {
        let drops = std::mem::take(&mut net.pending_drops);
        let squits = std::mem::take(&mut net.pending_squits);
        if drops.is_empty() && squits.is_empty() {
            return;
        }
        for (id, reason) in drops {
            quit_user(net, id, &reason, true, None);
        }
        for (peer, reason) in squits {
            crate::link::squit_peer(net, peer, &reason);
        }
    }
}

/// The membership rank a user holds on a channel; 0 when absent.
pub fn rank_on(net: &Network, chan: ChannelId, user: UserId) -> u32 {
    net.channels
        .get(chan)
        .and_then(|c| c.members.get(&user))
        .map(|m| m.rank())
        .unwrap_or(0)
}

/// Channel-operator check with the oper-override escape hatch. A granted
/// override emits the override snomask so it is never silent.
pub fn require_op(net: &mut Network, chan: ChannelId, user: UserId) -> bool {
    if rank_on(net, chan, user) >= Membership::RANK_OP {
        return true;
    }
    let verdict = hooks::predicate(
        net,
        HookPoint::OperOverride,
        &HookEvent {
            user: Some(user),
            channel: Some(chan),
            ..Default::default()
        },
    );
    if verdict == HookVerdict::Allow
        || net.users[user].modes.oper && oper_has_perm(net, user, "override")
    {
        let nick = net.users[user].nick.clone();
        let name = net.channels[chan].name.clone();
        net.snomask('G', &format!("{} used oper override on {}", nick, name));
        return true;
    }
    false
}

/// Whether an opered user's type grants a permission token.
pub fn oper_has_perm(net: &Network, user: UserId, perm: &str) -> bool {
    let Some(u) = net.users.get(user) else {
        return false;
    };
    let Some(oper_type) = &u.oper_type else {
        return false;
    };
    match net.config.oper_type_perms(oper_type) {
        Some(perms) => u.has_oper_perm(perms, perm),
        None => false,
    }
}

/// Kill a user network-wide: KILL toward peers, then local teardown with
/// QUIT fanout.
pub fn kill_user(net: &mut Network, target: UserId, source_display: &str, reason: &str) {
    let uid = net.users[target].uid.clone();
    let kill_line = wire::kill(net.server_sid(), &uid, reason);
    net.broadcast_to_peers(&kill_line, None);
    quit_user(
        net,
        target,
        &format!("Killed ({} ({}))", source_display, reason),
        false,
        None,
    );
}

/// Announce committed channel-mode changes: a packed MODE echo to local
/// members and the timestamped FMODE form to peers (minus `except_peer`
/// when relaying something that arrived from there).
pub fn announce_channel_modes(
    net: &mut Network,
    source_display: &str,
    origin_token: &str,
    chan: ChannelId,
    applied: &[alder_proto::ModeDelta],
    except_peer: Option<ServerId>,
) {
    if applied.is_empty() {
        return;
    }
    let Some(channel) = net.channels.get(chan) else {
        return;
    };
    let name = channel.name.clone();
    let ts = channel.ts;

    let mut stacker = alder_proto::ModeStacker::new(net.config.max_modes_per_line);
    for delta in applied.iter().cloned() {
        stacker.push(delta);
    }
    let overhead = source_display.len() + name.len() + 24;
    for packed in stacker.flush(overhead) {
        let echo = format!(":{} MODE {} {}", source_display, name, packed);
        net.fanout_channel_local(chan, &echo, None);
        let fmode = wire::fmode(origin_token, &name, ts, &packed);
        net.broadcast_to_peers(&fmode, except_peer);
    }
}

/// Whether a local user may occupy one more channel.
pub fn under_channel_limit(net: &Network, user: UserId) -> bool {
    let u = &net.users[user];
    match &u.local {
        Some(local) => u.channels.len() < local.class.max_chans,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{client, drain};
    use crate::state::tests::test_config;

    #[test]
    fn test_quit_fans_out_once_per_watcher() {
        let mut net = Network::new(test_config());
        let (alice, _arx) = client(&mut net);
        let (bob, mut brx) = client(&mut net);
        for (id, nick) in [(alice, "alice"), (bob, "bob")] {
            net.set_nick(id, nick, 1);
            net.users[id].ident = "u".into();
            net.users[id].registered = true;
        }
        // Two shared channels; bob must still get exactly one QUIT.
        for name in ["#a", "#b"] {
            let (chan, _) = net.get_or_create_channel(name, 1);
            net.add_member(chan, alice, Membership::none());
            net.add_member(chan, bob, Membership::none());
        }
        drain(&mut brx);
        quit_user(&mut net, alice, "bye", true, None);
        let lines = drain(&mut brx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("QUIT :bye"));
        assert!(net.find_nick("alice").is_none());
        net.assert_invariants();
    }

    #[test]
    fn test_rank_and_op_requirement() {
        let mut net = Network::new(test_config());
        let (alice, _arx) = client(&mut net);
        net.set_nick(alice, "alice", 1);
        net.users[alice].registered = true;
        let (chan, _) = net.get_or_create_channel("#c", 1);
        net.add_member(chan, alice, Membership::from_bits(Membership::VOICE));
        assert_eq!(rank_on(&net, chan, alice), 10_000);
        assert!(!require_op(&mut net, chan, alice));
        net.channels[chan]
            .members
            .get_mut(&alice)
            .unwrap()
            .grant(Membership::OP);
        assert!(require_op(&mut net, chan, alice));
    }
}
