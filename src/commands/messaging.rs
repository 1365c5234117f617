//! PRIVMSG, NOTICE, AWAY and WALLOPS.

use alder_proto::{Message, Numeric};

use crate::commands::{helpers, CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::hooks::{self, HookEvent, HookPoint, HookVerdict};
use crate::state::{Membership, Network, UserId};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef {
        name: "PRIVMSG",
        min_params: 2,
        requires_registration: true,
        oper_only: false,
        loop_targets: true,
        loop_keys: false,
        broadcast: false,
        handler: cmd_privmsg,
    });
    registry.add(CommandDef {
        name: "NOTICE",
        min_params: 2,
        requires_registration: true,
        oper_only: false,
        loop_targets: true,
        loop_keys: false,
        broadcast: false,
        handler: cmd_notice,
    });
    registry.add(CommandDef {
        name: "AWAY",
        min_params: 0,
        requires_registration: true,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: true,
        handler: cmd_away,
    });
    registry.add(CommandDef {
        name: "WALLOPS",
        min_params: 1,
        requires_registration: true,
        oper_only: true,
        loop_targets: false,
        loop_keys: false,
        broadcast: true,
        handler: cmd_wallops,
    });
}

fn cmd_privmsg(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    deliver(net, user, msg, "PRIVMSG", true)
}

fn cmd_notice(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    // Notices never generate error replies.
    match deliver(net, user, msg, "NOTICE", false) {
        Ok(outcome) => Ok(outcome),
        Err(_) => Ok(CmdOutcome::Failure),
    }
}

fn deliver(
    net: &mut Network,
    user: UserId,
    msg: &Message,
    verb: &str,
    noisy: bool,
) -> CmdResult {
    let target = msg.params[0].clone();
    let text = msg.params[1].clone();
    if text.is_empty() {
        return if noisy {
            Err(CommandError::NoTextToSend)
        } else {
            Ok(CmdOutcome::Failure)
        };
    }

    let event = HookEvent {
        user: Some(user),
        text: Some(&text),
        ..Default::default()
    };
    if hooks::predicate(net, HookPoint::PreMessage, &event) == HookVerdict::Deny {
        return Ok(CmdOutcome::Failure);
    }

    // Speaking resets the WHOIS idle clock.
    let now = net.now;
    if let Some(local) = net.users[user].local.as_mut() {
        local.idle_since = now;
    }

    if target.starts_with('#') {
        let chan_id = net
            .find_channel(&target)
            .ok_or_else(|| CommandError::NoSuchChannel(target.clone()))?;
        let name = net.channels[chan_id].name.clone();
        let is_member = net.channels[chan_id].members.contains_key(&user);

        if net.channels[chan_id].has_mode('n') && !is_member {
            return Err(CommandError::CannotSendToChan(name));
        }
        if net.channels[chan_id].has_mode('m')
            && helpers::rank_on(net, chan_id, user) < Membership::RANK_VOICE
        {
            return Err(CommandError::CannotSendToChan(name));
        }
        if is_member && helpers::rank_on(net, chan_id, user) == 0 && channel_banned(net, chan_id, user)
        {
            return Err(CommandError::CannotSendToChan(name));
        }

        let line = format!(":{} {} {} :{}", net.users[user].hostmask(), verb, name, text);
        net.fanout_channel_local(chan_id, &line, Some(user));
        let uid = net.users[user].uid.clone();
        let peer_line = format!(":{} {} {} :{}", uid, verb, name, text);
        net.broadcast_to_peers(&peer_line, None);
        return Ok(CmdOutcome::Success);
    }

    let dest = net
        .find_nick(&target)
        .ok_or_else(|| CommandError::NoSuchNick(target.clone()))?;
    if noisy {
        if let Some(away) = net.users[dest].away.clone() {
            let server = net.config.server.name.clone();
            let nick = net.users[user].nick.clone();
            let dest_nick = net.users[dest].nick.clone();
            let reply = Numeric::RPL_AWAY.reply(&server, &nick, &[&dest_nick, &away]);
            net.send_to_user(user, &reply.to_string());
        }
    }
    if net.users[dest].is_local() {
        let line = format!(
            ":{} {} {} :{}",
            net.users[user].hostmask(),
            verb,
            net.users[dest].nick,
            text
        );
        net.send_to_user(dest, &line);
    } else {
        let uid = net.users[user].uid.clone();
        let dest_uid = net.users[dest].uid.clone();
        let dest_server = net.users[dest].server;
        let line = format!(":{} {} {} :{}", uid, verb, dest_uid, text);
        net.send_toward(dest_server, &line);
    }
    Ok(CmdOutcome::Success)
}

/// A banned-but-present member may not speak (ban minus except).
fn channel_banned(net: &Network, chan_id: crate::state::ChannelId, user: UserId) -> bool {
    use crate::state::wildcard::match_mask_cm;
    let u = &net.users[user];
    let forms = [
        format!("{}!{}@{}", u.nick, u.ident, u.dhost),
        format!("{}!{}@{}", u.nick, u.ident, u.host),
    ];
    let chan = &net.channels[chan_id];
    let cm = net.casemap;
    let hit = |mask: &str| forms.iter().any(|f| match_mask_cm(cm, mask, f));
    chan.list('b').iter().any(|e| hit(&e.mask)) && !chan.list('e').iter().any(|e| hit(&e.mask))
}

fn cmd_away(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    match msg.arg(0).filter(|t| !t.is_empty()) {
        Some(text) => {
            let text: String = text.chars().take(net.config.limits.away).collect();
            net.users[user].away = Some(text);
            let reply =
                Numeric::RPL_NOWAWAY.reply(&server, &nick, &["You have been marked as being away"]);
            net.send_to_user(user, &reply.to_string());
        }
        None => {
            net.users[user].away = None;
            let reply = Numeric::RPL_UNAWAY.reply(
                &server,
                &nick,
                &["You are no longer marked as being away"],
            );
            net.send_to_user(user, &reply.to_string());
        }
    }
    Ok(CmdOutcome::Success)
}

fn cmd_wallops(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let text = msg.params[0].clone();
    let source = net.users[user].hostmask();
    let targets: Vec<UserId> = net
        .users
        .iter()
        .filter(|(_, u)| u.is_local() && u.modes.wallops)
        .map(|(id, _)| id)
        .collect();
    for target in targets {
        let line = format!(":{} WALLOPS :{}", source, text);
        net.send_to_user(target, &line);
    }
    Ok(CmdOutcome::Success)
}
