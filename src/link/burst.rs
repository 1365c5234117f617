//! Netburst generation.
//!
//! After a link authenticates, each side sends its complete picture of
//! the network: the server tree, every user, every channel with modes and
//! memberships, topics, list modes, and the global ban records, bracketed
//! by BURST/ENDBURST so the receiver can defer side effects.

use alder_proto::{ModeDelta, ModeStacker};

use crate::link::wire;
use crate::state::{Network, ServerId};

/// Queue the whole burst toward a freshly attached peer.
pub fn send_burst(net: &mut Network, peer: ServerId) {
    let now = net.now;
    net.send_to_peer(peer, &format!("BURST {}", now));

    // Transitive server introductions, parents before children so the
    // receiver can always resolve the uplink.
    let mut stack = vec![net.local_server];
    while let Some(current) = stack.pop() {
        let children: Vec<ServerId> = net.servers[current].children.clone();
        for child in children {
            if child == peer {
                continue;
            }
            let line = {
                let parent_sid = net.servers[current].sid.clone();
                wire::server_intro(&parent_sid, &net.servers[child])
            };
            net.send_to_peer(peer, &line);
            stack.push(child);
        }
    }

    // Users, each introduced by their home server.
    let users: Vec<usize> = net
        .users
        .iter()
        .filter(|(_, u)| u.registered)
        .map(|(id, _)| id)
        .collect();
    for id in users {
        let line = {
            let user = &net.users[id];
            let origin = net.servers[user.server].sid.clone();
            wire::uid_intro(&origin, user)
        };
        net.send_to_peer(peer, &line);

        let (uid, oper_type, away) = {
            let user = &net.users[id];
            (user.uid.clone(), user.oper_type.clone(), user.away.clone())
        };
        if let Some(oper_type) = oper_type {
            net.send_to_peer(peer, &wire::opertype(&uid, &oper_type));
        }
        if let Some(away) = away {
            net.send_to_peer(peer, &format!(":{} AWAY :{}", uid, away));
        }
    }

    // Channels: membership, topic, then list modes.
    let sid = net.server_sid().to_string();
    let channels: Vec<usize> = net.channels.iter().map(|(id, _)| id).collect();
    for chan_id in channels {
        let (fjoin, ftopic, list_deltas, name, ts) = {
            let chan = &net.channels[chan_id];
            let tokens = wire::member_tokens(net, chan);
            let fjoin = wire::fjoin(&sid, chan, &tokens);
            let ftopic = chan.topic.as_ref().map(|t| {
                wire::ftopic(&sid, &chan.name, t.set_ts, &t.setter, &t.text)
            });
            let mut deltas = Vec::new();
            for (&letter, entries) in &chan.lists {
                for entry in entries {
                    deltas.push(ModeDelta::new(true, letter, Some(entry.mask.clone())));
                }
            }
            (fjoin, ftopic, deltas, chan.name.clone(), chan.ts)
        };
        net.send_to_peer(peer, &fjoin);
        if let Some(ftopic) = ftopic {
            net.send_to_peer(peer, &ftopic);
        }
        if !list_deltas.is_empty() {
            let mut stacker = ModeStacker::new(net.config.max_modes_per_line);
            for delta in list_deltas {
                stacker.push(delta);
            }
            for packed in stacker.flush(sid.len() + name.len() + 32) {
                let line = wire::fmode(&sid, &name, ts, &packed);
                net.send_to_peer(peer, &line);
            }
        }
    }

    // Global ban records.
    let lines: Vec<String> = net
        .xlines
        .iter()
        .filter(|l| l.kind.global())
        .map(|l| wire::addline(&sid, l))
        .collect();
    for line in lines {
        net.send_to_peer(peer, &line);
    }

    net.send_to_peer(peer, "ENDBURST");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::sendq::WireSender;
    use crate::state::tests::test_config;
    use crate::state::Membership;

    #[test]
    fn test_burst_shape_and_order() {
        let mut net = Network::new(test_config());
        let (tx, _rx) = WireSender::new(262_144);
        let alice = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        net.set_nick(alice, "alice", 100);
        net.users[alice].ident = "al".into();
        net.users[alice].registered = true;
        let (chan, _) = net.get_or_create_channel("#c", 500);
        net.add_member(chan, alice, Membership::from_bits(Membership::OP));
        net.channels[chan].topic = Some(crate::state::Topic {
            text: "greetings".into(),
            setter: "alice!al@localhost".into(),
            set_ts: 600,
        });
        net.channels[chan]
            .lists
            .entry('b')
            .or_default()
            .push(crate::state::ListEntry {
                mask: "troll!*@*".into(),
                setter: "alice".into(),
                set_ts: 700,
            });
        net.xlines.add(crate::state::XLine {
            kind: crate::state::XLineKind::GLine,
            mask: "*@bad.example".into(),
            reason: "banned".into(),
            setter: "alice".into(),
            set_ts: 800,
            duration: 0,
        });

        let (peer_tx, mut peer_rx) = WireSender::new(262_144);
        let peer = net
            .add_server(net.local_server, "2LF", "leaf.example.net", "leaf")
            .unwrap();
        net.servers[peer].link = Some(peer_tx);

        send_burst(&mut net, peer);
        let mut lines = Vec::new();
        while let Ok(line) = peer_rx.try_recv() {
            lines.push(line);
        }

        assert!(lines[0].starts_with("BURST "));
        assert_eq!(lines.last().unwrap(), "ENDBURST");
        let uid_pos = lines.iter().position(|l| l.contains(" UID ")).unwrap();
        let fjoin_pos = lines.iter().position(|l| l.contains(" FJOIN ")).unwrap();
        assert!(uid_pos < fjoin_pos, "users precede channels");
        assert!(lines.iter().any(|l| l.contains(" FTOPIC #c 600 ")));
        assert!(lines
            .iter()
            .any(|l| l.contains(" FMODE #c 500 +b troll!*@*")));
        assert!(lines.iter().any(|l| l.contains(" ADDLINE G *@bad.example ")));
        // The peer itself is not introduced back to itself.
        assert!(!lines.iter().any(|l| l.contains("SERVER leaf.example.net")));
    }
}
