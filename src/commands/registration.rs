//! Connection registration: NICK, USER, PASS, CAP, PING, PONG, QUIT.

use alder_proto::casemap::is_valid_nick;
use alder_proto::{Message, Numeric};

use crate::commands::{helpers, queries, CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::hooks::{self, HookEvent, HookPoint, HookVerdict};
use crate::link::wire;
use crate::state::user::reg;
use crate::state::{Network, UserId};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef {
        name: "NICK",
        min_params: 0,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_nick,
    });
    registry.add(CommandDef {
        name: "USER",
        min_params: 4,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_user,
    });
    registry.add(CommandDef {
        name: "PASS",
        min_params: 1,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_pass,
    });
    registry.add(CommandDef {
        name: "CAP",
        min_params: 1,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_cap,
    });
    registry.add(CommandDef {
        name: "PING",
        min_params: 1,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_ping,
    });
    registry.add(CommandDef {
        name: "PONG",
        min_params: 0,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_pong,
    });
    registry.add(CommandDef {
        name: "QUIT",
        min_params: 0,
        requires_registration: false,
        oper_only: false,
        loop_targets: false,
        loop_keys: false,
        broadcast: false,
        handler: cmd_quit,
    });
}

fn cmd_nick(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let Some(wanted) = msg.arg(0).filter(|n| !n.is_empty()) else {
        return Err(CommandError::NoNicknameGiven);
    };
    let wanted = wanted.to_string();

    if !is_valid_nick(&wanted, net.config.limits.nick) {
        return Err(CommandError::ErroneousNickname(wanted));
    }
    if !net.users[user].modes.oper {
        if let Some(qline) = net.xlines.check_nick(net.casemap, &wanted, net.now) {
            let reason = qline.reason.clone();
            let nick = net.users[user].reply_nick().to_string();
            let server = net.config.server.name.clone();
            net.send_to_user(
                user,
                &Numeric::ERR_ERRONEUSNICKNAME
                    .reply(&server, &nick, &[&wanted, &reason])
                    .to_string(),
            );
            return Ok(CmdOutcome::Failure);
        }
    }

    match net.find_nick(&wanted) {
        Some(existing) if existing == user => {
            // Same user: a no-op unless only the case changes.
            if net.users[user].nick == wanted {
                return Ok(CmdOutcome::Success);
            }
        }
        Some(_) => return Err(CommandError::NicknameInUse(wanted)),
        None => {}
    }

    let event = HookEvent {
        user: Some(user),
        text: Some(&wanted),
        ..Default::default()
    };
    if hooks::predicate(net, HookPoint::PreNickChange, &event) == HookVerdict::Deny {
        return Ok(CmdOutcome::Failure);
    }

    if net.users[user].registered {
        let now = net.now;
        let line = format!(":{} NICK :{}", net.users[user].hostmask(), wanted);
        net.fanout_common_local(user, &line, true);
        let uid = net.users[user].uid.clone();
        net.broadcast_to_peers(&format!(":{} NICK {} {}", uid, wanted, now), None);
        net.set_nick(user, &wanted, now);
        hooks::notify(
            net,
            HookPoint::NickChange,
            &HookEvent {
                user: Some(user),
                text: Some(&wanted),
                ..Default::default()
            },
        );
        return Ok(CmdOutcome::Success);
    }

    let now = net.now;
    net.set_nick(user, &wanted, now);
    if let Some(local) = net.users[user].local.as_mut() {
        local.reg_flags |= reg::NICK;
    }
    try_complete_registration(net, user);
    Ok(CmdOutcome::Success)
}

fn cmd_user(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if net.users[user].registered {
        return Err(CommandError::AlreadyRegistered);
    }
    let ident_max = net.config.limits.ident;
    let gecos_max = net.config.limits.gecos;
    {
        let u = &mut net.users[user];
        if let Some(local) = u.local.as_mut() {
            if local.has_reg(reg::USER) {
                return Err(CommandError::AlreadyRegistered);
            }
            local.reg_flags |= reg::USER;
        }
        u.ident = msg.params[0].chars().take(ident_max).collect();
        u.gecos = msg.params[3].chars().take(gecos_max).collect();
    }
    try_complete_registration(net, user);
    Ok(CmdOutcome::Success)
}

fn cmd_pass(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if net.users[user].registered {
        return Err(CommandError::AlreadyRegistered);
    }
    if let Some(local) = net.users[user].local.as_mut() {
        local.password = Some(msg.params[0].clone());
    }
    Ok(CmdOutcome::Success)
}

/// The capabilities this server is willing to negotiate.
const SUPPORTED_CAPS: &[&str] = &["multi-prefix"];

fn cmd_cap(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let sub = msg.params[0].to_ascii_uppercase();
    let server = net.config.server.name.clone();
    let nick = net.users[user].reply_nick().to_string();
    match sub.as_str() {
        "LS" => {
            if !net.users[user].registered {
                if let Some(local) = net.users[user].local.as_mut() {
                    local.cap_latch = true;
                }
            }
            let line = format!(":{} CAP {} LS :{}", server, nick, SUPPORTED_CAPS.join(" "));
            net.send_to_user(user, &line);
        }
        "LIST" => {
            let caps = net.users[user]
                .local
                .as_ref()
                .map(|l| l.caps.iter().cloned().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let line = format!(":{} CAP {} LIST :{}", server, nick, caps);
            net.send_to_user(user, &line);
        }
        "REQ" => {
            let requested = msg.arg(1).unwrap_or_default().to_string();
            let wanted: Vec<&str> = requested.split_whitespace().collect();
            let acceptable = wanted
                .iter()
                .all(|c| SUPPORTED_CAPS.contains(&c.trim_start_matches('-')));
            if !net.users[user].registered {
                if let Some(local) = net.users[user].local.as_mut() {
                    local.cap_latch = true;
                }
            }
            let verb = if acceptable { "ACK" } else { "NAK" };
            if acceptable {
                if let Some(local) = net.users[user].local.as_mut() {
                    for cap in &wanted {
                        if let Some(removed) = cap.strip_prefix('-') {
                            local.caps.remove(removed);
                        } else {
                            local.caps.insert(cap.to_string());
                        }
                    }
                }
            }
            let line = format!(":{} CAP {} {} :{}", server, nick, verb, requested);
            net.send_to_user(user, &line);
        }
        "END" => {
            if let Some(local) = net.users[user].local.as_mut() {
                local.cap_latch = false;
                local.reg_flags |= reg::CAP;
            }
            try_complete_registration(net, user);
        }
        _ => {
            let line = format!(":{} 410 {} {} :Invalid CAP subcommand", server, nick, sub);
            net.send_to_user(user, &line);
            return Ok(CmdOutcome::Invalid);
        }
    }
    Ok(CmdOutcome::Success)
}

fn cmd_ping(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let line = format!(":{} PONG {} :{}", server, server, msg.params[0]);
    net.send_to_user(user, &line);
    Ok(CmdOutcome::Success)
}

fn cmd_pong(_net: &mut Network, _user: UserId, _msg: &Message) -> CmdResult {
    // Activity bookkeeping happened in dispatch.
    Ok(CmdOutcome::Success)
}

fn cmd_quit(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let reason = match msg.arg(0) {
        Some(text) if !text.is_empty() => {
            let quit_max = net.config.limits.quit;
            let text: String = text.chars().take(quit_max).collect();
            format!("Quit: {}", text)
        }
        _ => "Client exited".to_string(),
    };
    helpers::quit_user(net, user, &reason, true, None);
    Ok(CmdOutcome::UserDeleted)
}

/// Finish registration once all required bits are present and no CAP latch
/// is held: ban checks, the welcome burst, and peer introduction.
pub fn try_complete_registration(net: &mut Network, user: UserId) {
    let ready = match &net.users[user].local {
        Some(local) => local.ready_to_register() && !net.users[user].registered,
        None => false,
    };
    if !ready {
        return;
    }

    let event = HookEvent {
        user: Some(user),
        ..Default::default()
    };
    if hooks::predicate(net, HookPoint::UserRegister, &event) == HookVerdict::Deny {
        // A pre-registration collaborator (DNS, ident) is still holding
        // this connection; it re-fires the attempt when it finishes.
        return;
    }

    let (user_at_host, ip) = {
        let u = &net.users[user];
        (u.id_and_host(), u.ip.clone())
    };
    if let Some(xline) = net
        .xlines
        .check_user(net.casemap, &user_at_host, &ip, net.now)
    {
        let reason = format!("{}-Lined: {}", xline.kind.letter(), xline.reason);
        helpers::quit_user(net, user, &reason, false, None);
        helpers::flush_pending(net);
        return;
    }

    net.users[user].registered = true;
    net.users[user].signon_ts = net.now;
    net.note_registration();
    send_welcome(net, user);

    let uid_line = wire::uid_intro(&net.server_sid().to_string(), &net.users[user]);
    net.broadcast_to_peers(&uid_line, None);

    hooks::notify(
        net,
        HookPoint::UserConnect,
        &HookEvent {
            user: Some(user),
            ..Default::default()
        },
    );
}

/// 001–005, the LUSERS block, and the MOTD.
fn send_welcome(net: &mut Network, user: UserId) {
    let server = net.config.server.name.clone();
    let network = net.config.server.network.clone();
    let nick = net.users[user].nick.clone();
    let hostmask = net.users[user].hostmask();
    let version = crate::version_string();
    let created = chrono::DateTime::from_timestamp(net.start_ts, 0)
        .map(|t| t.format("%a %b %d %Y at %H:%M:%S UTC").to_string())
        .unwrap_or_default();

    let replies = [
        Numeric::RPL_WELCOME.reply(
            &server,
            &nick,
            &[&format!("Welcome to the {} IRC Network {}", network, hostmask)],
        ),
        Numeric::RPL_YOURHOST.reply(
            &server,
            &nick,
            &[&format!(
                "Your host is {}, running version {}",
                server, version
            )],
        ),
        Numeric::RPL_CREATED.reply(
            &server,
            &nick,
            &[&format!("This server was created {}", created)],
        ),
        Numeric::RPL_MYINFO.reply(
            &server,
            &nick,
            &[&server, &version, "iosw", "beIiklmnopqstv"],
        ),
    ];
    for reply in replies {
        net.send_to_user(user, &reply.to_string());
    }
    send_isupport(net, user);
    queries::send_lusers(net, user);
    queries::send_motd(net, user);
}

fn send_isupport(net: &mut Network, user: UserId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let limits = net.config.limits.clone();
    let tokens = [
        "CHANTYPES=#".to_string(),
        format!("CHANMODES={}", net.modes.chanmodes_token()),
        format!("PREFIX={}", net.modes.prefix_token()),
        format!("NICKLEN={}", limits.nick),
        format!("CHANNELLEN={}", limits.channel),
        format!("TOPICLEN={}", limits.topic),
        format!("KICKLEN={}", limits.kick),
        format!("AWAYLEN={}", limits.away),
        format!("MAXTARGETS={}", net.config.max_targets),
        format!("MODES={}", net.config.max_modes_per_line),
        format!("CASEMAPPING={}", net.casemap.name()),
        format!("NETWORK={}", net.config.server.network),
    ];
    let mut params: Vec<&str> = tokens.iter().map(String::as_str).collect();
    params.push("are supported by this server");
    let reply = Numeric::RPL_ISUPPORT.reply(&server, &nick, &params);
    net.send_to_user(user, &reply.to_string());
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

    #[test]
    fn test_registration_happy_path() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);

        dispatch(&registry, &mut net, user, &line("NICK alice"));
        assert!(drain(&mut rx).is_empty(), "no welcome before USER");
        dispatch(&registry, &mut net, user, &line("USER a 0 * :Alice"));

        let lines = drain(&mut rx);
        let codes: Vec<&str> = lines
            .iter()
            .filter_map(|l| l.split(' ').nth(1))
            .collect();
        for expected in [
            "001", "002", "003", "004", "005", "251", "252", "253", "254", "255", "265", "266",
        ] {
            assert!(codes.contains(&expected), "missing {expected}: {codes:?}");
        }
        // No MOTD file configured: 422 instead of 375/372/376.
        assert!(codes.contains(&"422"));
        assert!(net.users[user].registered);
        assert_eq!(net.find_nick("ALICE"), Some(user));
        net.assert_invariants();
    }

    #[test]
    fn test_cap_latch_defers_registration() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);

        dispatch(&registry, &mut net, user, &line("CAP LS 302"));
        dispatch(&registry, &mut net, user, &line("NICK alice"));
        dispatch(&registry, &mut net, user, &line("USER a 0 * :Alice"));
        assert!(!net.users[user].registered, "latched by CAP");

        dispatch(&registry, &mut net, user, &line("CAP REQ :multi-prefix"));
        dispatch(&registry, &mut net, user, &line("CAP END"));
        assert!(net.users[user].registered);
        let lines = drain(&mut rx);
        assert!(lines.iter().any(|l| l.contains("ACK")));
        assert!(lines.iter().any(|l| l.contains(" 001 ")));
    }

    #[test]
    fn test_reregister_rejected() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);
        dispatch(&registry, &mut net, user, &line("NICK alice"));
        dispatch(&registry, &mut net, user, &line("USER a 0 * :Alice"));
        drain(&mut rx);
        dispatch(&registry, &mut net, user, &line("USER b 0 * :Again"));
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 462 "), "{lines:?}");
    }

    #[test]
    fn test_nick_collision_433() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, _arx) = client(&mut net);
        dispatch(&registry, &mut net, alice, &line("NICK alice"));
        dispatch(&registry, &mut net, alice, &line("USER a 0 * :A"));

        let (bob, mut brx) = client(&mut net);
        dispatch(&registry, &mut net, bob, &line("NICK ALICE"));
        let lines = drain(&mut brx);
        assert!(lines[0].contains(" 433 * ALICE "), "{lines:?}");
    }

    #[test]
    fn test_nick_change_announced() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = client(&mut net);
        dispatch(&registry, &mut net, alice, &line("NICK alice"));
        dispatch(&registry, &mut net, alice, &line("USER a 0 * :A"));
        drain(&mut arx);

        dispatch(&registry, &mut net, alice, &line("NICK alicia"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains("NICK :alicia")), "{lines:?}");
        assert_eq!(net.find_nick("alicia"), Some(alice));
        assert_eq!(net.find_nick("alice"), None);
    }

    #[test]
    fn test_qline_blocks_nick() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        net.xlines.add(crate::state::XLine {
            kind: crate::state::XLineKind::QLine,
            mask: "*Serv".into(),
            reason: "Reserved for services".into(),
            setter: "config".into(),
            set_ts: 0,
            duration: 0,
        });
        let (user, mut rx) = client(&mut net);
        dispatch(&registry, &mut net, user, &line("NICK NickServ"));
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 432 "), "{lines:?}");
    }
}
