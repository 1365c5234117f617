//! Channel membership commands: JOIN, PART, TOPIC, NAMES, LIST, INVITE,
//! KICK.

use alder_proto::casemap::is_valid_channel;
use alder_proto::{Message, Numeric};

use crate::commands::{helpers, CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::hooks::{self, HookEvent, HookPoint, HookVerdict};
use crate::link::wire;
use crate::state::wildcard::match_mask_cm;
use crate::state::{ChannelId, Membership, Network, UserId};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef {
        name: "JOIN",
        min_params: 1,
        requires_registration: true,
        oper_only: false,
        loop_targets: true,
        loop_keys: true,
        broadcast: false,
        handler: cmd_join,
    });
    registry.add(CommandDef {
        name: "PART",
        min_params: 1,
        requires_registration: true,
        oper_only: false,
        loop_targets: true,
        loop_keys: false,
        broadcast: true,
        handler: cmd_part,
    });
    registry.add(CommandDef::simple("TOPIC", 1, cmd_topic));
    registry.add(CommandDef::simple("NAMES", 1, cmd_names));
    registry.add(CommandDef::simple("LIST", 0, cmd_list));
    registry.add(CommandDef::simple("INVITE", 2, cmd_invite));
    registry.add(CommandDef {
        name: "KICK",
        min_params: 2,
        requires_registration: true,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_kick,
    });
}

/// Join checks in protocol order; any may be overridden by an oper with
/// the override permission, which is never silent.
fn join_checks(
    net: &mut Network,
    user: UserId,
    chan_id: ChannelId,
    key: Option<&str>,
) -> Result<(), CommandError> {
    let name = net.channels[chan_id].name.clone();

    let mut denial = None;
    if let Some(wanted) = net.channels[chan_id].key() {
        if key != Some(wanted) {
            denial = Some(CommandError::BadChannelKey(name.clone()));
        }
    }
    if denial.is_none()
        && net.channels[chan_id].has_mode('i')
        && !net.users[user].invites.contains(&chan_id)
    {
        denial = Some(CommandError::InviteOnlyChan(name.clone()));
    }
    if denial.is_none() {
        if let Some(limit) = net.channels[chan_id].limit() {
            if net.channels[chan_id].members.len() >= limit {
                denial = Some(CommandError::ChannelIsFull(name.clone()));
            }
        }
    }
    if denial.is_none() && is_banned(net, chan_id, user) {
        denial = Some(CommandError::BannedFromChan(name.clone()));
    }
    if denial.is_none() {
        let verdict = hooks::predicate(
            net,
            HookPoint::CheckBan,
            &HookEvent {
                user: Some(user),
                channel: Some(chan_id),
                ..Default::default()
            },
        );
        if verdict == HookVerdict::Deny {
            denial = Some(CommandError::BannedFromChan(name.clone()));
        }
    }

    let Some(denial) = denial else { return Ok(()) };

    if net.users[user].modes.oper && helpers::oper_has_perm(net, user, "override") {
        let nick = net.users[user].nick.clone();
        net.snomask('G', &format!("{} used oper override to join {}", nick, name));
        return Ok(());
    }
    Err(denial)
}

/// Ban check: the +b list minus the +e list, matched against every form of
/// the user's mask.
fn is_banned(net: &Network, chan_id: ChannelId, user: UserId) -> bool {
    let u = &net.users[user];
    let forms = [
        format!("{}!{}@{}", u.nick, u.ident, u.dhost),
        format!("{}!{}@{}", u.nick, u.ident, u.host),
        format!("{}!{}@{}", u.nick, u.ident, u.ip),
    ];
    let chan = &net.channels[chan_id];
    let cm = net.casemap;
    let hit = |mask: &str| forms.iter().any(|f| match_mask_cm(cm, mask, f));
    chan.list('b').iter().any(|e| hit(&e.mask)) && !chan.list('e').iter().any(|e| hit(&e.mask))
}

fn cmd_join(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let key = msg.arg(1).filter(|k| !k.is_empty()).map(str::to_string);

    if !is_valid_channel(&name, net.config.limits.channel) {
        return Err(CommandError::BadChanMask(name));
    }
    if let Some(chan_id) = net.find_channel(&name) {
        if net.channels[chan_id].members.contains_key(&user) {
            return Ok(CmdOutcome::Success);
        }
    }
    if !helpers::under_channel_limit(net, user) {
        return Err(CommandError::TooManyChannels(name));
    }

    let event = HookEvent {
        user: Some(user),
        text: Some(&name),
        ..Default::default()
    };
    if hooks::predicate(net, HookPoint::PreJoin, &event) == HookVerdict::Deny {
        return Ok(CmdOutcome::Failure);
    }

    let now = net.now;
    let (chan_id, created) = net.get_or_create_channel(&name, now);
    let membership = if created {
        Membership::from_bits(Membership::OP)
    } else {
        join_checks(net, user, chan_id, key.as_deref())?;
        Membership::none()
    };

    net.users[user].invites.remove(&chan_id);
    net.add_member(chan_id, user, membership);

    let join_line = format!(
        ":{} JOIN :{}",
        net.users[user].hostmask(),
        net.channels[chan_id].name
    );
    net.fanout_channel_local(chan_id, &join_line, None);

    let sid = net.server_sid().to_string();
    let fjoin = wire::fjoin_single(
        &sid,
        &net.channels[chan_id],
        &membership.all_prefixes(),
        &net.users[user].uid,
    );
    net.broadcast_to_peers(&fjoin, None);

    if net.channels[chan_id].topic.is_some() {
        send_topic(net, user, chan_id);
    }
    send_names(net, user, chan_id);

    hooks::notify(
        net,
        HookPoint::UserJoin,
        &HookEvent {
            user: Some(user),
            channel: Some(chan_id),
            ..Default::default()
        },
    );
    Ok(CmdOutcome::Success)
}

fn cmd_part(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let chan_id = net
        .find_channel(&name)
        .ok_or_else(|| CommandError::NoSuchChannel(name.clone()))?;
    if !net.channels[chan_id].members.contains_key(&user) {
        return Err(CommandError::NotOnChannel(name));
    }

    let reason = msg.arg(1).unwrap_or_default();
    let line = match reason.is_empty() {
        true => format!(
            ":{} PART {}",
            net.users[user].hostmask(),
            net.channels[chan_id].name
        ),
        false => format!(
            ":{} PART {} :{}",
            net.users[user].hostmask(),
            net.channels[chan_id].name,
            reason
        ),
    };
    net.fanout_channel_local(chan_id, &line, None);
    net.remove_member(chan_id, user);

    hooks::notify(
        net,
        HookPoint::UserPart,
        &HookEvent {
            user: Some(user),
            text: Some(reason),
            ..Default::default()
        },
    );
    Ok(CmdOutcome::Success)
}

fn cmd_topic(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let chan_id = net
        .find_channel(&name)
        .ok_or_else(|| CommandError::NoSuchChannel(name.clone()))?;

    let Some(new_text) = msg.arg(1) else {
        if net.channels[chan_id].topic.is_some() {
            send_topic(net, user, chan_id);
        } else {
            let server = net.config.server.name.clone();
            let nick = net.users[user].nick.clone();
            let chan_name = net.channels[chan_id].name.clone();
            let reply =
                Numeric::RPL_NOTOPIC.reply(&server, &nick, &[&chan_name, "No topic is set."]);
            net.send_to_user(user, &reply.to_string());
        }
        return Ok(CmdOutcome::Success);
    };

    if !net.channels[chan_id].members.contains_key(&user) {
        return Err(CommandError::NotOnChannel(name));
    }
    if net.channels[chan_id].has_mode('t') && !helpers::require_op(net, chan_id, user) {
        return Err(CommandError::ChanOpPrivsNeeded(name));
    }

    let text: String = new_text.chars().take(net.config.limits.topic).collect();
    let setter = net.users[user].hostmask();
    let now = net.now;
    net.channels[chan_id].topic = if text.is_empty() {
        None
    } else {
        Some(crate::state::Topic {
            text: text.clone(),
            setter: setter.clone(),
            set_ts: now,
        })
    };

    let chan_name = net.channels[chan_id].name.clone();
    let line = format!(":{} TOPIC {} :{}", setter, chan_name, text);
    net.fanout_channel_local(chan_id, &line, None);

    let uid = net.users[user].uid.clone();
    let ftopic = wire::ftopic(&uid, &chan_name, now, &setter, &text);
    net.broadcast_to_peers(&ftopic, None);
    Ok(CmdOutcome::Success)
}

fn cmd_names(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    match net.find_channel(&msg.params[0]) {
        Some(chan_id) => send_names(net, user, chan_id),
        None => {
            let server = net.config.server.name.clone();
            let nick = net.users[user].nick.clone();
            let reply = Numeric::RPL_ENDOFNAMES.reply(
                &server,
                &nick,
                &[&msg.params[0], "End of /NAMES list."],
            );
            net.send_to_user(user, &reply.to_string());
        }
    }
    Ok(CmdOutcome::Success)
}

fn cmd_list(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let filter = msg.arg(0).map(str::to_string);

    let start = Numeric::RPL_LISTSTART.reply(&server, &nick, &["Channel", "Users Name"]);
    net.send_to_user(user, &start.to_string());

    let visible: Vec<(String, usize, String)> = net
        .channels
        .iter()
        .filter(|(_, c)| {
            let hidden = c.has_mode('s') || c.has_mode('p');
            let member = c.members.contains_key(&user);
            (!hidden || member)
                && filter
                    .as_deref()
                    .map(|f| match_mask_cm(net.casemap, f, &c.name))
                    .unwrap_or(true)
        })
        .map(|(_, c)| {
            (
                c.name.clone(),
                c.members.len(),
                c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
            )
        })
        .collect();

    for (name, count, topic) in visible {
        let reply =
            Numeric::RPL_LIST.reply(&server, &nick, &[&name, &count.to_string(), &topic]);
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_LISTEND.reply(&server, &nick, &["End of channel list."]);
    net.send_to_user(user, &end.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_invite(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let target_nick = msg.params[0].clone();
    let chan_name = msg.params[1].clone();

    let target = net
        .find_nick(&target_nick)
        .ok_or_else(|| CommandError::NoSuchNick(target_nick.clone()))?;
    let chan_id = net
        .find_channel(&chan_name)
        .ok_or_else(|| CommandError::NoSuchChannel(chan_name.clone()))?;
    if !net.channels[chan_id].members.contains_key(&user) {
        return Err(CommandError::NotOnChannel(chan_name));
    }
    if net.channels[chan_id].members.contains_key(&target) {
        return Err(CommandError::UserOnChannel(target_nick, chan_name));
    }
    if net.channels[chan_id].has_mode('i') && !helpers::require_op(net, chan_id, user) {
        return Err(CommandError::ChanOpPrivsNeeded(chan_name));
    }

    net.users[target].invites.insert(chan_id);

    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let chan_display = net.channels[chan_id].name.clone();
    let reply = Numeric::RPL_INVITING.reply(&server, &nick, &[&target_nick, &chan_display]);
    net.send_to_user(user, &reply.to_string());

    if net.users[target].is_local() {
        let line = format!(
            ":{} INVITE {} :{}",
            net.users[user].hostmask(),
            target_nick,
            chan_display
        );
        net.send_to_user(target, &line);
    } else {
        let uid = net.users[user].uid.clone();
        let target_uid = net.users[target].uid.clone();
        let target_server = net.users[target].server;
        let line = format!(":{} INVITE {} :{}", uid, target_uid, chan_display);
        net.send_toward(target_server, &line);
    }
    Ok(CmdOutcome::Success)
}

fn cmd_kick(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let chan_name = msg.params[0].clone();
    let target_nick = msg.params[1].clone();

    let chan_id = net
        .find_channel(&chan_name)
        .ok_or_else(|| CommandError::NoSuchChannel(chan_name.clone()))?;
    if !net.channels[chan_id].members.contains_key(&user) {
        return Err(CommandError::NotOnChannel(chan_name));
    }
    let target = net
        .find_nick(&target_nick)
        .filter(|t| net.channels[chan_id].members.contains_key(t))
        .ok_or_else(|| CommandError::UserNotInChannel(target_nick.clone(), chan_name.clone()))?;

    if !helpers::require_op(net, chan_id, user) {
        return Err(CommandError::ChanOpPrivsNeeded(chan_name));
    }
    // Rank parity: nobody kicks upward.
    if helpers::rank_on(net, chan_id, target) > helpers::rank_on(net, chan_id, user)
        && !helpers::oper_has_perm(net, user, "override")
    {
        return Err(CommandError::ChanOpPrivsNeeded(chan_name));
    }

    let reason: String = msg
        .arg(2)
        .filter(|r| !r.is_empty())
        .unwrap_or(&target_nick)
        .chars()
        .take(net.config.limits.kick)
        .collect();

    let chan_display = net.channels[chan_id].name.clone();
    let line = format!(
        ":{} KICK {} {} :{}",
        net.users[user].hostmask(),
        chan_display,
        net.users[target].nick,
        reason
    );
    net.fanout_channel_local(chan_id, &line, None);

    let uid = net.users[user].uid.clone();
    let target_uid = net.users[target].uid.clone();
    let peer_line = format!(":{} KICK {} {} :{}", uid, chan_display, target_uid, reason);
    net.broadcast_to_peers(&peer_line, None);

    net.remove_member(chan_id, target);
    Ok(CmdOutcome::Success)
}

/// 332/333 for a channel known to have a topic.
pub fn send_topic(net: &mut Network, user: UserId, chan_id: ChannelId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let chan = &net.channels[chan_id];
    let name = chan.name.clone();
    let Some(topic) = chan.topic.clone() else {
        return;
    };
    let r1 = Numeric::RPL_TOPIC.reply(&server, &nick, &[&name, &topic.text]);
    let r2 = Numeric::RPL_TOPICWHOTIME.reply(
        &server,
        &nick,
        &[&name, &topic.setter, &topic.set_ts.to_string()],
    );
    net.send_to_user(user, &r1.to_string());
    net.send_to_user(user, &r2.to_string());
}

/// 353/366 for one channel.
pub fn send_names(net: &mut Network, user: UserId, chan_id: ChannelId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let multi_prefix = net.users[user]
        .local
        .as_ref()
        .map(|l| l.caps.contains("multi-prefix"))
        .unwrap_or(false);

    let chan = &net.channels[chan_id];
    let name = chan.name.clone();
    let viewer_is_member = chan.members.contains_key(&user);
    let mut entries: Vec<(String, String)> = chan
        .members
        .iter()
        .filter(|(&m, _)| {
            // Invisible users are hidden from outsiders.
            viewer_is_member || !net.users[m].modes.invisible
        })
        .map(|(&m, membership)| {
            let prefixes = if multi_prefix {
                membership.all_prefixes()
            } else {
                membership.prefix().map(String::from).unwrap_or_default()
            };
            (prefixes, net.users[m].nick.clone())
        })
        .collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1));

    let mut line = String::new();
    let mut lines = Vec::new();
    for (prefixes, member_nick) in entries {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&prefixes);
        line.push_str(&member_nick);
        if line.len() > 400 {
            lines.push(std::mem::take(&mut line));
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    for chunk in lines {
        let reply = Numeric::RPL_NAMREPLY.reply(&server, &nick, &["=", &name, &chunk]);
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_ENDOFNAMES.reply(&server, &nick, &[&name, "End of /NAMES list."]);
    net.send_to_user(user, &end.to_string());
}
