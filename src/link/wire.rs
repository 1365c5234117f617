//! Server-to-server line constructors.
//!
//! Every S2S line carries a `:<SID|UID>` origin prefix. Keeping the
//! formatting in one place means the burst generator, the command layer
//! and the timestamp-resolution paths cannot drift apart.

use crate::state::{Channel, Network, TreeServer, User};

/// `:<sid> UID <uid> <nickTS> <nick> <host> <dhost> <ident> <ip> <signonTS> +<modes> :<gecos>`
pub fn uid_intro(origin_sid: &str, user: &User) -> String {
    format!(
        ":{} UID {} {} {} {} {} {} {} {} {} :{}",
        origin_sid,
        user.uid,
        user.nick_ts,
        user.nick,
        user.host,
        user.dhost,
        user.ident,
        user.ip,
        user.signon_ts,
        user.modes.as_mode_string(),
        user.gecos
    )
}

/// `:<sid> SERVER <name> * 0 <sid> :<description>` — transitive introduction.
pub fn server_intro(via_sid: &str, server: &TreeServer) -> String {
    format!(
        ":{} SERVER {} * 0 {} :{}",
        via_sid, server.name, server.sid, server.description
    )
}

/// The FJOIN for one channel's full membership.
pub fn fjoin(origin_sid: &str, chan: &Channel, member_tokens: &[String]) -> String {
    format!(
        ":{} FJOIN {} {} {} :{}",
        origin_sid,
        chan.name,
        chan.ts,
        chan.mode_summary(true),
        member_tokens.join(" ")
    )
}

/// An FJOIN carrying a single member; used for live local joins.
pub fn fjoin_single(origin_sid: &str, chan: &Channel, prefixes: &str, uid: &str) -> String {
    format!(
        ":{} FJOIN {} {} + :{},{}",
        origin_sid, chan.name, chan.ts, prefixes, uid
    )
}

/// `:<origin> FMODE <target> <TS> <modeline>`
pub fn fmode(origin: &str, target: &str, ts: i64, modeline: &str) -> String {
    format!(":{} FMODE {} {} {}", origin, target, ts, modeline)
}

/// `:<origin> FTOPIC <chan> <topicTS> <setter> :<text>`
pub fn ftopic(origin: &str, chan: &str, ts: i64, setter: &str, text: &str) -> String {
    format!(":{} FTOPIC {} {} {} :{}", origin, chan, ts, setter, text)
}

/// `:<origin> KILL <uid> :<reason>`
pub fn kill(origin: &str, uid: &str, reason: &str) -> String {
    format!(":{} KILL {} :{}", origin, uid, reason)
}

/// `:<origin> SQUIT <server-name> :<reason>`
pub fn squit(origin: &str, name: &str, reason: &str) -> String {
    format!(":{} SQUIT {} :{}", origin, name, reason)
}

/// `:<sid> ADDLINE <kind> <mask> <setter> <setTS> <duration> :<reason>`
pub fn addline(origin_sid: &str, line: &crate::state::XLine) -> String {
    format!(
        ":{} ADDLINE {} {} {} {} {} :{}",
        origin_sid,
        line.kind.letter(),
        line.mask,
        line.setter,
        line.set_ts,
        line.duration,
        line.reason
    )
}

/// `:<sid> DELLINE <kind> <mask>`
pub fn delline(origin_sid: &str, kind: char, mask: &str) -> String {
    format!(":{} DELLINE {} {}", origin_sid, kind, mask)
}

/// `:<uid> OPERTYPE <type>`
pub fn opertype(uid: &str, oper_type: &str) -> String {
    format!(":{} OPERTYPE {}", uid, oper_type)
}

/// Build the member token list for a channel, `<prefixes>,<uid>` each.
pub fn member_tokens(net: &Network, chan: &Channel) -> Vec<String> {
    let mut members: Vec<_> = chan.members.iter().collect();
    members.sort_by(|a, b| net.users[*a.0].uid.cmp(&net.users[*b.0].uid));
    members
        .into_iter()
        .map(|(&uid, membership)| {
            format!("{},{}", membership.all_prefixes(), net.users[uid].uid)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Membership, Network};

    #[test]
    fn test_fjoin_line_shape() {
        let mut net = Network::new(crate::state::tests::test_config());
        let (tx, _rx) = crate::network::sendq::WireSender::new(65536);
        let alice = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(alice, "alice", 100);
        let (chan_id, _) = net.get_or_create_channel("#c", 1000);
        net.add_member(chan_id, alice, Membership::from_bits(Membership::OP));
        net.channels[chan_id].modes.insert('n');
        net.channels[chan_id].modes.insert('t');

        let chan = &net.channels[chan_id];
        let tokens = member_tokens(&net, chan);
        let line = fjoin("1AB", chan, &tokens);
        assert_eq!(line, ":1AB FJOIN #c 1000 +nt :@,1ABAAAAAA");
    }

    #[test]
    fn test_uid_line_shape() {
        let mut net = Network::new(crate::state::tests::test_config());
        let (tx, _rx) = crate::network::sendq::WireSender::new(65536);
        let alice = net.create_local_user(
            tx,
            Default::default(),
            "10.0.0.5".into(),
            "host.example".into(),
        );
        net.set_nick(alice, "alice", 900);
        net.users[alice].ident = "al".into();
        net.users[alice].gecos = "Alice A".into();
        net.users[alice].signon_ts = 890;

        let line = uid_intro("1AB", &net.users[alice]);
        assert_eq!(
            line,
            ":1AB UID 1ABAAAAAA 900 alice host.example host.example al 10.0.0.5 890 + :Alice A"
        );
    }
}
