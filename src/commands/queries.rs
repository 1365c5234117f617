//! Informational queries: WHO, WHOIS, ISON, USERHOST, MOTD, LUSERS,
//! VERSION, TIME, ADMIN, INFO, STATS.

use alder_proto::{Message, Numeric};

use crate::commands::{CmdOutcome, CmdResult, CommandDef, CommandRegistry};
use crate::error::CommandError;
use crate::state::wildcard::match_mask_cm;
use crate::state::{Network, UserId};

pub fn register(registry: &mut CommandRegistry) {
    registry.add(CommandDef::simple("WHO", 1, cmd_who));
    registry.add(CommandDef::simple("WHOIS", 1, cmd_whois));
    registry.add(CommandDef::simple("ISON", 1, cmd_ison));
    registry.add(CommandDef::simple("USERHOST", 1, cmd_userhost));
    registry.add(CommandDef::simple("MOTD", 0, cmd_motd));
    registry.add(CommandDef::simple("LUSERS", 0, cmd_lusers));
    registry.add(CommandDef::simple("VERSION", 0, cmd_version));
    registry.add(CommandDef::simple("TIME", 0, cmd_time));
    registry.add(CommandDef::simple("ADMIN", 0, cmd_admin));
    registry.add(CommandDef::simple("INFO", 0, cmd_info));
    registry.add(CommandDef::simple("STATS", 1, cmd_stats));
}

/// Route a `<verb> <server>` query toward a remote server; true when the
/// query was sent away rather than answered here.
fn route_remote_query(net: &mut Network, user: UserId, verb: &str, target: &str) -> Result<bool, CommandError> {
    if target.is_empty() || net.casemap.eq(target, &net.config.server.name.clone()) {
        return Ok(false);
    }
    let server = net
        .find_server_name(target)
        .ok_or_else(|| CommandError::NoSuchServer(target.to_string()))?;
    if server == net.local_server {
        return Ok(false);
    }
    let uid = net.users[user].uid.clone();
    let sid = net.servers[server].sid.clone();
    net.send_toward(server, &format!(":{} {} {}", uid, verb, sid));
    Ok(true)
}

fn cmd_who(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let mask = msg.params[0].clone();
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();

    let targets: Vec<UserId> = if let Some(chan_id) = net.find_channel(&mask) {
        let viewer_is_member = net.channels[chan_id].members.contains_key(&user);
        net.channels[chan_id]
            .members
            .keys()
            .copied()
            .filter(|&m| viewer_is_member || !net.users[m].modes.invisible)
            .collect()
    } else {
        net.users
            .iter()
            .filter(|(id, u)| {
                u.registered
                    && !u.modes.invisible
                    && *id != user
                    && (match_mask_cm(net.casemap, &mask, &u.nick)
                        || match_mask_cm(net.casemap, &mask, &u.dhost))
            })
            .map(|(id, _)| id)
            .collect()
    };

    let chan_field = if net.find_channel(&mask).is_some() {
        mask.clone()
    } else {
        "*".to_string()
    };
    for target in targets {
        let u = &net.users[target];
        let here = if u.away.is_some() { "G" } else { "H" };
        let star = if u.modes.oper { "*" } else { "" };
        let status = format!("{}{}", here, star);
        let server_name = net.servers[u.server].name.clone();
        let reply = Numeric::RPL_WHOREPLY.reply(
            &server,
            &nick,
            &[
                &chan_field,
                &u.ident,
                &u.dhost,
                &server_name,
                &u.nick,
                &status,
                &format!("0 {}", u.gecos),
            ],
        );
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_ENDOFWHO.reply(&server, &nick, &[&mask, "End of /WHO list."]);
    net.send_to_user(user, &end.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_whois(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let target_nick = msg.params[0].clone();
    let target = net
        .find_nick(&target_nick)
        .ok_or_else(|| CommandError::NoSuchNick(target_nick.clone()))?;

    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let t = &net.users[target];
    let t_nick = t.nick.clone();
    let t_ident = t.ident.clone();
    let t_dhost = t.dhost.clone();
    let t_gecos = t.gecos.clone();
    let t_server = net.servers[t.server].name.clone();
    let t_server_desc = net.servers[t.server].description.clone();
    let t_away = t.away.clone();
    let t_oper = t.modes.oper;
    let t_is_local = t.is_local();
    let t_uid = t.uid.clone();
    let t_home = t.server;

    let reply = Numeric::RPL_WHOISUSER.reply(
        &server,
        &nick,
        &[&t_nick, &t_ident, &t_dhost, "*", &t_gecos],
    );
    net.send_to_user(user, &reply.to_string());

    // Shared channels plus public ones, with status prefixes.
    let mut channel_tokens = Vec::new();
    let target_chans: Vec<_> = net.users[target].channels.iter().copied().collect();
    for chan_id in target_chans {
        let chan = &net.channels[chan_id];
        let shared = chan.members.contains_key(&user);
        if (chan.has_mode('s') || chan.has_mode('p')) && !shared {
            continue;
        }
        let prefix = chan.members[&target].prefix().map(String::from).unwrap_or_default();
        channel_tokens.push(format!("{}{}", prefix, chan.name));
    }
    if !channel_tokens.is_empty() {
        channel_tokens.sort();
        let reply = Numeric::RPL_WHOISCHANNELS.reply(
            &server,
            &nick,
            &[&t_nick, &channel_tokens.join(" ")],
        );
        net.send_to_user(user, &reply.to_string());
    }

    let reply = Numeric::RPL_WHOISSERVER.reply(&server, &nick, &[&t_nick, &t_server, &t_server_desc]);
    net.send_to_user(user, &reply.to_string());

    if let Some(away) = t_away {
        let reply = Numeric::RPL_AWAY.reply(&server, &nick, &[&t_nick, &away]);
        net.send_to_user(user, &reply.to_string());
    }
    if t_oper {
        let reply = Numeric::RPL_WHOISOPERATOR.reply(
            &server,
            &nick,
            &[&t_nick, "is an IRC operator"],
        );
        net.send_to_user(user, &reply.to_string());
    }

    if t_is_local {
        let (idle, signon) = {
            let t = &net.users[target];
            let idle_since = t.local.as_ref().map(|l| l.idle_since).unwrap_or(net.now);
            ((net.now - idle_since).max(0), t.signon_ts)
        };
        let reply = Numeric::RPL_WHOISIDLE.reply(
            &server,
            &nick,
            &[
                &t_nick,
                &idle.to_string(),
                &signon.to_string(),
                "seconds idle, signon time",
            ],
        );
        net.send_to_user(user, &reply.to_string());
        let end = Numeric::RPL_ENDOFWHOIS.reply(&server, &nick, &[&t_nick, "End of /WHOIS list."]);
        net.send_to_user(user, &end.to_string());
    } else {
        // Idle time lives on the target's server; 317/318 follow when the
        // answer comes back.
        let uid = net.users[user].uid.clone();
        net.send_toward(t_home, &format!(":{} IDLE {}", uid, t_uid));
    }
    Ok(CmdOutcome::Success)
}

fn cmd_ison(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let online: Vec<String> = msg
        .params
        .iter()
        .flat_map(|p| p.split_whitespace())
        .filter_map(|n| net.find_nick(n).map(|id| net.users[id].nick.clone()))
        .collect();
    let reply = Numeric::RPL_ISON.reply(&server, &nick, &[&online.join(" ")]);
    net.send_to_user(user, &reply.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_userhost(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let entries: Vec<String> = msg
        .params
        .iter()
        .flat_map(|p| p.split_whitespace())
        .take(5)
        .filter_map(|n| {
            net.find_nick(n).map(|id| {
                let u = &net.users[id];
                let oper = if u.modes.oper { "*" } else { "" };
                format!("{}{}=+{}@{}", u.nick, oper, u.ident, u.dhost)
            })
        })
        .collect();
    let reply = Numeric::RPL_USERHOST.reply(&server, &nick, &[&entries.join(" ")]);
    net.send_to_user(user, &reply.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_motd(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if route_remote_query(net, user, "MOTD", msg.arg(0).unwrap_or_default())? {
        return Ok(CmdOutcome::Success);
    }
    send_motd(net, user);
    Ok(CmdOutcome::Success)
}

fn cmd_lusers(net: &mut Network, user: UserId, _msg: &Message) -> CmdResult {
    send_lusers(net, user);
    Ok(CmdOutcome::Success)
}

fn cmd_version(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if route_remote_query(net, user, "VERSION", msg.arg(0).unwrap_or_default())? {
        return Ok(CmdOutcome::Success);
    }
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let reply = Numeric::RPL_VERSION.reply(
        &server,
        &nick,
        &[&crate::version_string(), &server],
    );
    net.send_to_user(user, &reply.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_time(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if route_remote_query(net, user, "TIME", msg.arg(0).unwrap_or_default())? {
        return Ok(CmdOutcome::Success);
    }
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let time = chrono::DateTime::from_timestamp(net.now, 0)
        .map(|t| t.format("%a %b %d %Y %H:%M:%S UTC").to_string())
        .unwrap_or_default();
    let reply = Numeric::RPL_TIME.reply(&server, &nick, &[&server, &time]);
    net.send_to_user(user, &reply.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_admin(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    if route_remote_query(net, user, "ADMIN", msg.arg(0).unwrap_or_default())? {
        return Ok(CmdOutcome::Success);
    }
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let admin = net.config.admin.clone();
    let replies = [
        Numeric::RPL_ADMINME.reply(&server, &nick, &[&server, "Administrative info"]),
        Numeric::RPL_ADMINLOC1.reply(&server, &nick, &[&admin.name]),
        Numeric::RPL_ADMINLOC2.reply(&server, &nick, &[&admin.location]),
        Numeric::RPL_ADMINEMAIL.reply(&server, &nick, &[&admin.email]),
    ];
    for reply in replies {
        net.send_to_user(user, &reply.to_string());
    }
    Ok(CmdOutcome::Success)
}

fn cmd_info(net: &mut Network, user: UserId, _msg: &Message) -> CmdResult {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let lines = [
        format!("{} -- spanning-tree IRC daemon", crate::version_string()),
        "Timestamped channel state with deterministic merge on link".to_string(),
    ];
    for text in lines {
        let reply = Numeric::RPL_INFO.reply(&server, &nick, &[&text]);
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_ENDOFINFO.reply(&server, &nick, &["End of /INFO list"]);
    net.send_to_user(user, &end.to_string());
    Ok(CmdOutcome::Success)
}

fn cmd_stats(net: &mut Network, user: UserId, msg: &Message) -> CmdResult {
    let target = msg.arg(1).unwrap_or_default().to_string();
    if !target.is_empty() && !net.casemap.eq(&target, &net.config.server.name.clone()) {
        let server_id = net
            .find_server_name(&target)
            .ok_or(CommandError::NoSuchServer(target))?;
        if server_id != net.local_server {
            let uid = net.users[user].uid.clone();
            let letter = msg.params[0].clone();
            let sid = net.servers[server_id].sid.clone();
            net.send_toward(server_id, &format!(":{} STATS {} {}", uid, letter, sid));
            return Ok(CmdOutcome::Success);
        }
    }
    let letter = msg.params[0].chars().next().unwrap_or('*');
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    if letter == 'u' {
        let uptime = (net.now - net.start_ts).max(0);
        let (days, rem) = (uptime / 86_400, uptime % 86_400);
        let text = format!(
            "Server up {} days, {:02}:{:02}:{:02}",
            days,
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60
        );
        let reply = Numeric::RPL_STATSUPTIME.reply(&server, &nick, &[&text]);
        net.send_to_user(user, &reply.to_string());
    }
    let end = Numeric::RPL_ENDOFSTATS.reply(
        &server,
        &nick,
        &[&letter.to_string(), "End of /STATS report"],
    );
    net.send_to_user(user, &end.to_string());
    Ok(CmdOutcome::Success)
}

/// The LUSERS block, also part of the welcome burst.
pub fn send_lusers(net: &mut Network, user: UserId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let global = net.global_user_count();
    let invisible = net.invisible_count();
    let visible = global.saturating_sub(invisible);
    let opers = net.oper_count();
    let unknown = net.unregistered_count();
    let channels = net.channels.len();
    let local = net.local_user_count();
    let servers = net.servers.len();
    let direct = net.direct_peers().len() + 1;

    let replies = [
        Numeric::RPL_LUSERCLIENT.reply(
            &server,
            &nick,
            &[&format!(
                "There are {} users and {} invisible on {} servers",
                visible, invisible, servers
            )],
        ),
        Numeric::RPL_LUSEROP.reply(&server, &nick, &[&opers.to_string(), "operator(s) online"]),
        Numeric::RPL_LUSERUNKNOWN.reply(
            &server,
            &nick,
            &[&unknown.to_string(), "unknown connections"],
        ),
        Numeric::RPL_LUSERCHANNELS.reply(
            &server,
            &nick,
            &[&channels.to_string(), "channels formed"],
        ),
        Numeric::RPL_LUSERME.reply(
            &server,
            &nick,
            &[&format!(
                "I have {} clients and {} servers",
                local,
                direct - 1
            )],
        ),
        Numeric::RPL_LOCALUSERS.reply(
            &server,
            &nick,
            &[
                &local.to_string(),
                &net.max_local_seen.to_string(),
                &format!(
                    "Current local users: {}, max: {}",
                    local, net.max_local_seen
                ),
            ],
        ),
        Numeric::RPL_GLOBALUSERS.reply(
            &server,
            &nick,
            &[
                &global.to_string(),
                &net.max_global_seen.to_string(),
                &format!(
                    "Current global users: {}, max: {}",
                    global, net.max_global_seen
                ),
            ],
        ),
    ];
    for reply in replies {
        net.send_to_user(user, &reply.to_string());
    }
}

/// 375/372/376, or 422 when no MOTD file is available.
pub fn send_motd(net: &mut Network, user: UserId) {
    let server = net.config.server.name.clone();
    let nick = net.users[user].nick.clone();
    let text = net
        .config
        .server
        .motd_file
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok());

    match text {
        Some(body) => {
            let start = Numeric::RPL_MOTDSTART.reply(
                &server,
                &nick,
                &[&format!("{} message of the day", server)],
            );
            net.send_to_user(user, &start.to_string());
            for motd_line in body.lines() {
                let reply =
                    Numeric::RPL_MOTD.reply(&server, &nick, &[&format!("- {}", motd_line)]);
                net.send_to_user(user, &reply.to_string());
            }
            let end = Numeric::RPL_ENDOFMOTD.reply(&server, &nick, &["End of message of the day."]);
            net.send_to_user(user, &end.to_string());
        }
        None => {
            let reply = Numeric::ERR_NOMOTD.reply(&server, &nick, &["Message of the day file is missing."]);
            net.send_to_user(user, &reply.to_string());
        }
    }
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
    fn test_whois_shows_channels_and_server() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        let (bob, _brx) = registered(&mut net, "bob");
        dispatch(&registry, &mut net, bob, &line("JOIN #pub"));

        dispatch(&registry, &mut net, alice, &line("WHOIS bob"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains(" 311 alice bob ")), "{lines:?}");
        assert!(lines.iter().any(|l| l.contains(" 319 alice bob :@#pub")));
        assert!(lines.iter().any(|l| l.contains(" 312 alice bob hub.example.net")));
        assert!(lines.iter().any(|l| l.contains(" 317 ")));
        assert!(lines.iter().any(|l| l.contains(" 318 ")));
    }

    #[test]
    fn test_whois_hides_secret_channels() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        let (bob, _brx) = registered(&mut net, "bob");
        dispatch(&registry, &mut net, bob, &line("JOIN #hidden"));
        dispatch(&registry, &mut net, bob, &line("MODE #hidden +s"));

        dispatch(&registry, &mut net, alice, &line("WHOIS bob"));
        let lines = drain(&mut arx);
        assert!(!lines.iter().any(|l| l.contains("#hidden")), "{lines:?}");
    }

    #[test]
    fn test_who_channel_membership() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        let (bob, _brx) = registered(&mut net, "bob");
        dispatch(&registry, &mut net, alice, &line("JOIN #w"));
        dispatch(&registry, &mut net, bob, &line("JOIN #w"));
        drain(&mut arx);

        dispatch(&registry, &mut net, alice, &line("WHO #w"));
        let lines = drain(&mut arx);
        let who_lines: Vec<_> = lines.iter().filter(|l| l.contains(" 352 ")).collect();
        assert_eq!(who_lines.len(), 2);
        assert!(lines.last().unwrap().contains(" 315 "));
    }

    #[test]
    fn test_ison_and_userhost() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        let (_bob, _brx) = registered(&mut net, "bob");

        dispatch(&registry, &mut net, alice, &line("ISON bob ghost alice"));
        let lines = drain(&mut arx);
        assert!(lines[0].contains(" 303 alice :bob alice"), "{lines:?}");

        dispatch(&registry, &mut net, alice, &line("USERHOST bob"));
        let lines = drain(&mut arx);
        assert!(lines[0].contains(" 302 alice :bob=+bob@"), "{lines:?}");
    }

    #[test]
    fn test_stats_uptime() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (alice, mut arx) = registered(&mut net, "alice");
        dispatch(&registry, &mut net, alice, &line("STATS u"));
        let lines = drain(&mut arx);
        assert!(lines.iter().any(|l| l.contains(" 242 ")));
        assert!(lines.iter().any(|l| l.contains(" 219 alice u ")));
    }
}
