//! The MODE command, for channels and for the user's own modes.

use alder_proto::modes::parse_mode_string;
use alder_proto::{Message, Numeric};

use crate::commands::{helpers, CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::modes::{apply_channel_deltas, apply_user_deltas, ModeKind, ModeSource};
use crate::state::{ChannelId, Network, UserId};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef::simple("MODE", 1, cmd_mode));
}

fn cmd_mode(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let target = msg.params[0].clone();
    if target.starts_with('#') {
        channel_mode(net, user, msg, &target)
    } else {
        user_mode(net, user, msg, &target)
    }
}

fn channel_mode(net: &mut Network, user: UserId, msg: &Message, target: &str) -> CmdResult {
    let chan_id = net
        .find_channel(target)
        .ok_or_else(|| CommandError::NoSuchChannel(target.to_string()))?;

    let Some(modes) = msg.arg(1) else {
        send_channel_mode_summary(net, user, chan_id);
        return Ok(CmdOutcome::Success);
    };
    let modes = modes.to_string();
    let params: Vec<&str> = msg.params[2..].iter().map(String::as_str).collect();

    let registry = net.modes.clone();
    let deltas = parse_mode_string(&modes, &params, |letter, adding| {
        registry.takes_param(ModeKind::Channel, letter, adding)
    });
    if deltas.is_empty() {
        return Ok(CmdOutcome::Invalid);
    }

    // A bare list-mode letter is a query and needs no privileges.
    let all_queries = deltas
        .iter()
        .all(|d| d.param.is_none() && registry.get(ModeKind::Channel, d.letter).map(|m| m.list_mode).unwrap_or(false));
    if !all_queries && !helpers::require_op(net, chan_id, user) {
        return Err(CommandError::ChanOpPrivsNeeded(target.to_string()));
    }

    let result = apply_channel_deltas(net, ModeSource::User(user), chan_id, deltas);

    for letter in &result.list_queries {
        send_list(net, user, chan_id, *letter);
    }
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    for err in &result.errors {
        let reply = err.to_reply(&server, &nick);
        net.send_to_user(user, &reply.to_string());
    }
    if result.applied.is_empty() {
        return Ok(CmdOutcome::Success);
    }

    let setter = net.users[user].hostmask();
    crate::modes::attribute_list_entries(net, chan_id, &result.applied, &setter);

    let uid = net.users[user].uid.clone();
    helpers::announce_channel_modes(net, &setter, &uid, chan_id, &result.applied, None);
    Ok(CmdOutcome::Success)
}

fn user_mode(net: &mut Network, user: UserId, msg: &Message, target: &str) -> CmdResult {
    let target_id = net
        .find_nick(target)
        .ok_or_else(|| CommandError::NoSuchNick(target.to_string()))?;
    if target_id != user {
        return Err(CommandError::UsersDontMatch);
    }

    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let Some(modes) = msg.arg(1) else {
        let current = net.users[user].modes.as_mode_string();
        let reply = Numeric::RPL_UMODEIS.reply(&server, &nick, &[&current]);
        net.send_to_user(user, &reply.to_string());
        return Ok(CmdOutcome::Success);
    };
    let modes = modes.to_string();
    let params: Vec<&str> = msg.params[2..].iter().map(String::as_str).collect();

    let registry = net.modes.clone();
    let deltas = parse_mode_string(&modes, &params, |letter, adding| {
        registry.takes_param(ModeKind::User, letter, adding)
    });

    let result = apply_user_deltas(net, ModeSource::User(user), user, deltas);
    for err in &result.errors {
        let reply = err.to_reply(&server, &nick);
        net.send_to_user(user, &reply.to_string());
    }
    if result.applied.is_empty() {
        return Ok(CmdOutcome::Success);
    }

    let mut stacker = alder_proto::ModeStacker::new(net.config.max_modes_per_line);
    for delta in result.applied.clone() {
        stacker.push(delta);
    }
    let uid = net.users[user].uid.clone();
    let nick_ts = net.users[user].nick_ts;
    for packed in stacker.flush(nick.len() * 2 + 16) {
        let echo = format!(":{} MODE {} :{}", net.users[user].hostmask(), nick, packed);
        net.send_to_user(user, &echo);
        let fmode = crate::link::wire::fmode(&uid, &uid, nick_ts, &packed);
        net.broadcast_to_peers(&fmode, None);
    }
    Ok(CmdOutcome::Success)
}

/// 324 (modes, key value hidden from outsiders) and 329 (creation TS).
fn send_channel_mode_summary(net: &mut Network, user: UserId, chan_id: ChannelId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let chan = &net.channels[chan_id];
    let name = chan.name.clone();
    let is_member = chan.members.contains_key(&user);
    let summary = chan.mode_summary(is_member);
    let ts = chan.ts.to_string();

    let r1 = Numeric::RPL_CHANNELMODEIS.reply(&server, &nick, &[&name, &summary]);
    let r2 = Numeric::RPL_CREATIONTIME.reply(&server, &nick, &[&name, &ts]);
    net.send_to_user(user, &r1.to_string());
    net.send_to_user(user, &r2.to_string());
}

/// 367/368-style listing; the ban numerics serve all list letters here.
fn send_list(net: &mut Network, user: UserId, chan_id: ChannelId, letter: char) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let name = net.channels[chan_id].name.clone();
    let entries: Vec<crate::state::ListEntry> =
        net.channels[chan_id].list(letter).to_vec();
    for entry in entries {
        let reply = Numeric::RPL_BANLIST.reply(
            &server,
            &nick,
            &[
                &name,
                &entry.mask,
                &entry.setter,
                &entry.set_ts.to_string(),
            ],
        );
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_ENDOFBANLIST.reply(&server, &nick, &[&name, "End of channel ban list"]);
    net.send_to_user(user, &end.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{client, drain};
    use crate::commands::{dispatch, CommandRegistry};
    use crate::state::tests::test_config;

    fn line(s: &str) -> Message {
        s.parse().unwrap()
    }

    fn registered(net: &mut Network, nick: &str) -> (UserId, crate::network::sendq::WireReceiver) {
        let registry = CommandRegistry::new();
        let (id, mut rx) = client(net);
        dispatch(&registry, net, id, &line(&format!("NICK {nick}")));
        dispatch(&registry, net, id, &line(&format!("USER {nick} 0 * :{nick}")));
        drain(&mut rx);
        (id, rx)
    }

    #[test]
    fn test_mode_summary_and_echo() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        dispatch(&registry, &mut net, alice, &line("JOIN #c"));
        drain(&mut arx);

        dispatch(&registry, &mut net, alice, &line("MODE #c +nt-s"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains("MODE #c +nt")), "{lines:?}");

        dispatch(&registry, &mut net, alice, &line("MODE #c"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains(" 324 alice #c +nt")));
        assert!(lines.iter().any(|l| l.contains(" 329 alice #c ")));
    }

    #[test]
    fn test_mode_requires_op() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, _arx) = registered(&mut net, "alice");
        dispatch(&registry, &mut net, alice, &line("JOIN #c"));
        let (bob, mut brx) = registered(&mut net, "bob");
        dispatch(&registry, &mut net, bob, &line("JOIN #c"));
        drain(&mut brx);

        dispatch(&registry, &mut net, bob, &line("MODE #c +m"));
        assert!(drain(&mut brx).iter().any(|l| l.contains(" 482 ")));
    }

    #[test]
    fn test_ban_query_needs_no_op() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, _arx) = registered(&mut net, "alice");
        dispatch(&registry, &mut net, alice, &line("JOIN #c"));
        dispatch(&registry, &mut net, alice, &line("MODE #c +b x!*@*"));
        let (bob, mut brx) = registered(&mut net, "bob");
        dispatch(&registry, &mut net, bob, &line("JOIN #c"));
        drain(&mut brx);

        dispatch(&registry, &mut net, bob, &line("MODE #c +b"));
        let lines = drain(&mut brx);
        assert!(lines.iter().any(|l| l.contains(" 367 bob #c x!*@* ")), "{lines:?}");
        assert!(lines.iter().any(|l| l.contains(" 368 ")));
    }

    #[test]
    fn test_umode_self_only() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        let (_bob, _brx) = registered(&mut net, "bob");

        dispatch(&registry, &mut net, alice, &line("MODE bob +i"));
        assert!(drain(&mut arx).iter().any(|l| l.contains(" 502 ")));

        dispatch(&registry, &mut net, alice, &line("MODE alice +iw"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains("MODE alice :+iw")), "{lines:?}");

        dispatch(&registry, &mut net, alice, &line("MODE alice"));
        assert!(drain(&mut arx).iter().any(|l| l.contains(" 221 alice +iw")));
    }
}
