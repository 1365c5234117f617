//! Operator commands: OPER, KILL, DIE, REHASH, CONNECT, SQUIT and the
//! X-line management commands.

use sha2::{Digest, Sha256};

use alder_proto::{Message, Numeric};

use crate::commands::{helpers, CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::link::wire;
use crate::state::wildcard::match_mask;
use crate::state::{Network, UserId, XLine, XLineKind};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef {
        name: "OPER",
        min_params: 2,
        requires_registration: true,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_oper,
    });
    for (name, handler) in [
        ("KILL", cmd_kill as super::CommandFn),
        ("DIE", cmd_die),
        ("REHASH", cmd_rehash),
        ("CONNECT", cmd_connect),
        ("SQUIT", cmd_squit),
    ] {
        registry.add(CommandDef {
            name,
            min_params: if name == "KILL" { 2 } else if name == "CONNECT" || name == "SQUIT" { 1 } else { 0 },
            requires_registration: true,
            oper_only: true,
            loop_targets: false,
            loop_keys: false,
            broadcast: false,
            handler,
        });
    }
    for name in ["GLINE", "KLINE", "ZLINE", "QLINE", "ELINE"] {
        registry.add(CommandDef {
            name,
            min_params: 1,
            requires_registration: true,
            oper_only: true,
            loop_targets: false,
            loop_keys: false,
            broadcast: false,
            handler: cmd_xline,
        });
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

fn cmd_oper(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let password = msg.params[1].clone();

    let (ident_host, ident_ip, nick) = {
        let u = &net.users[user];
        (
            format!("{}@{}", u.ident, u.host),
            format!("{}@{}", u.ident, u.ip),
            u.nick.clone(),
        )
    };

    let block = net.config.opers.iter().find(|o| {
        o.name == name
            && (match_mask(&o.host, &ident_host) || match_mask(&o.host, &ident_ip))
            && o.hash == sha256_hex(&password)
    });
    let Some(block) = block.cloned() else {
        net.snomask('o', &format!("Failed OPER attempt by {} ({})", nick, ident_host));
        return Err(CommandError::NoOperHost);
    };

    net.users[user].modes.oper = true;
    net.users[user].oper_type = Some(block.oper_type.clone());

    let server = net.config.server.name.clone();
    let reply = Numeric::RPL_YOUAREOPER.reply(&server, &nick, &["You are now an IRC operator"]);
    net.send_to_user(user, &reply.to_string());
    let echo = format!(":{} MODE {} :+o", net.users[user].hostmask(), nick);
    net.send_to_user(user, &echo);

    let uid = net.users[user].uid.clone();
    net.broadcast_to_peers(&wire::opertype(&uid, &block.oper_type), None);
    net.snomask(
        'o',
        &format!("{} ({}) is now an IRC operator of type {}", nick, ident_host, block.oper_type),
    );
    Ok(CmdOutcome::Success)
}

fn cmd_kill(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "kill") {
        return Err(CommandError::NoPrivileges);
    }
    let target_token = msg.params[0].clone();
    let reason = msg.params[1].clone();

    if net.find_server_name(&target_token).is_some() {
        return Err(CommandError::CantKillServer);
    }
    let target = net
        .find_user_token(&target_token)
        .ok_or_else(|| CommandError::NoSuchNick(target_token.clone()))?;

    let source = net.users[user].nick.clone();
    let target_nick = net.users[target].nick.clone();
    net.snomask(
        'k',
        &format!("{} issued KILL on {} ({})", source, target_nick, reason),
    );
    helpers::kill_user(net, target, &source, &reason);
    if target == user {
        return Ok(CmdOutcome::UserDeleted);
    }
    Ok(CmdOutcome::Success)
}

fn cmd_die(net: &mut Network, user: UserId, _msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "die") {
        return Err(CommandError::NoPrivileges);
    }
    let nick = net.users[user].nick.clone();
    net.snomask('l', &format!("DIE command from {}", nick));
    net.stopping = Some(format!("Server shutting down (DIE by {})", nick));
    Ok(CmdOutcome::Success)
}

fn cmd_rehash(net: &mut Network, user: UserId, _msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "rehash") {
        return Err(CommandError::NoPrivileges);
    }
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let reply = Numeric::RPL_REHASHING.reply(&server, &nick, &["Rehashing"]);
    net.send_to_user(user, &reply.to_string());
    net.snomask('l', &format!("{} is rehashing the config file", nick));

    let Some(path) = net.config_path.clone() else {
        return Ok(CmdOutcome::Success);
    };
    match crate::config::Config::load(&path) {
        Ok(config) => {
            let config = std::sync::Arc::new(config);
            net.modes = std::sync::Arc::new(crate::modes::ModeRegistry::build(config.as_ref()));
            net.config = config;
        }
        Err(err) => {
            let line = format!(":{} NOTICE {} :*** Rehash failed: {}", server, nick, err);
            net.send_to_user(user, &line);
        }
    }
    Ok(CmdOutcome::Success)
}

fn cmd_connect(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "connect") {
        return Err(CommandError::NoPrivileges);
    }
    let target = msg.params[0].clone();
    let known = net
        .config
        .links
        .iter()
        .any(|l| match_mask(&target, &l.name) || l.name == target);
    if !known {
        return Err(CommandError::NoSuchServer(target));
    }
    let nick = net.users[user].nick.clone();
    net.snomask('l', &format!("{} asked me to connect to {}", nick, target));
    net.pending_connects.push(target);
    Ok(CmdOutcome::Success)
}

fn cmd_squit(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "squit") {
        return Err(CommandError::NoPrivileges);
    }
    let target = msg.params[0].clone();
    let reason = msg
        .arg(1)
        .filter(|r| !r.is_empty())
        .unwrap_or("SQUIT by operator")
        .to_string();
    let server_id = net
        .find_server_name(&target)
        .ok_or_else(|| CommandError::NoSuchServer(target.clone()))?;
    if server_id == net.local_server {
        return Err(CommandError::NoSuchServer(target));
    }
    crate::link::squit_server(net, server_id, &reason);
    Ok(CmdOutcome::Success)
}

/// Shared handler for GLINE/KLINE/ZLINE/QLINE/ELINE. `<mask>` adds,
/// `-<mask>` removes; an optional duration then reason follow.
fn cmd_xline(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if !helpers::oper_has_perm(net, user, "xline") {
        return Err(CommandError::NoPrivileges);
    }
    let kind = XLineKind::from_letter(msg.command.chars().next().unwrap_or('G'))
        .unwrap_or(XLineKind::GLine);
    let mask = msg.params[0].clone();
    let nick = net.users[user].nick.clone();

    if let Some(removed) = mask.strip_prefix('-') {
        let existed = net.xlines.remove(kind, removed);
        if existed {
            net.snomask(
                'x',
                &format!("{} removed {}-line on {}", nick, kind.letter(), removed),
            );
            if kind.global() {
                let sid = net.server_sid().to_string();
                let line = wire::delline(&sid, kind.letter(), removed);
                net.broadcast_to_peers(&line, None);
            }
        }
        return Ok(CmdOutcome::Success);
    }

    let duration = msg
        .arg(1)
        .map(parse_duration)
        .unwrap_or(0);
    let reason = msg
        .arg(2)
        .filter(|r| !r.is_empty())
        .unwrap_or("No reason given")
        .to_string();

    let line = XLine {
        kind,
        mask: mask.clone(),
        reason: reason.clone(),
        setter: nick.clone(),
        set_ts: net.now,
        duration,
    };
    if kind.global() {
        let sid = net.server_sid().to_string();
        net.broadcast_to_peers(&wire::addline(&sid, &line), None);
    }
    net.xlines.add(line);
    let lifetime = if duration == 0 {
        "permanent".to_string()
    } else {
        format!("{} seconds", duration)
    };
    net.snomask(
        'x',
        &format!(
            "{} added {} {}-line on {} ({})",
            nick,
            lifetime,
            kind.letter(),
            mask,
            reason
        ),
    );
    enforce_xlines(net);
    Ok(CmdOutcome::Success)
}

/// Disconnect local users a freshly added line now matches.
pub fn enforce_xlines(net: &mut Network) {
    let now = net.now;
    let cm = net.casemap;
    let victims: Vec<(UserId, String)> = net
        .users
        .iter()
        .filter(|(_, u)| u.is_local() && u.registered)
        .filter_map(|(id, u)| {
            if let Some(line) = net.xlines.check_user(cm, &u.id_and_host(), &u.ip, now) {
                return Some((id, format!("{}-Lined: {}", line.kind.letter(), line.reason)));
            }
            if !u.modes.oper {
                if let Some(line) = net.xlines.check_nick(cm, &u.nick, now) {
                    return Some((id, format!("Q-Lined: {}", line.reason)));
                }
            }
            None
        })
        .collect();
    for (id, reason) in victims {
        helpers::quit_user(net, id, &reason, true, None);
    }
}

/// `30`, `2h`, `1d12h` and friends, in seconds. Unparsable input is
/// permanent.
pub fn parse_duration(text: &str) -> u64 {
    if let Ok(seconds) = text.parse::<u64>() {
        return seconds;
    }
    let mut total = 0u64;
    let mut value = 0u64;
    for c in text.chars() {
        match c {
            '0'..='9' => value = value * 10 + (c as u64 - '0' as u64),
            'd' => {
                total += value * 86_400;
                value = 0;
            }
            'h' => {
                total += value * 3_600;
                value = 0;
            }
            'm' => {
                total += value * 60;
                value = 0;
            }
            's' => {
                total += value;
                value = 0;
            }
            _ => return 0,
        }
    }
    total + value
}
