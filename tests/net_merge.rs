//! Two-server convergence tests.
//!
//! Two in-memory networks are linked through captured send queues: every
//! line one side queues for its peer is fed into the other side's link
//! dispatcher, exactly as the socket tasks would. After a full exchange
//! the timestamp rules must leave both sides with identical state.

use std::sync::Arc;

use alderd::commands::{dispatch, CommandRegistry};
use alderd::link::{self, burst};
use alderd::network::sendq::{WireReceiver, WireSender};
use alderd::state::{Membership, Network, ServerId, UserId};

/// A fixed fake epoch so both sides agree on "now" and the wall clock
/// can never overtake it mid-test.
const EPOCH: i64 = 9_000_000_000;

fn build_net(name: &str, sid: &str) -> Network {
    let text = format!(
        r#"
        [server]
        name = "{name}"
        sid = "{sid}"
        description = "test node"
        network = "MergeNet"
        "#
    );
    let config = Arc::new(toml::from_str(&text).unwrap());
    let mut net = Network::new(config);
    net.now = EPOCH;
    net
}

struct Pair {
    a: Network,
    b: Network,
    /// B as seen in A's tree, and the queue A writes toward B.
    b_in_a: ServerId,
    a_out: WireReceiver,
    /// A as seen in B's tree, and the queue B writes toward A.
    a_in_b: ServerId,
    b_out: WireReceiver,
}

impl Pair {
    fn new() -> Self {
        let mut a = build_net("a.example.net", "1AA");
        let mut b = build_net("b.example.net", "2BB");

        let (a_tx, a_out) = WireSender::new(1 << 20);
        let b_in_a = a
            .add_server(a.local_server, "2BB", "b.example.net", "test node")
            .unwrap();
        a.servers[b_in_a].link = Some(a_tx);

        let (b_tx, b_out) = WireSender::new(1 << 20);
        let a_in_b = b
            .add_server(b.local_server, "1AA", "a.example.net", "test node")
            .unwrap();
        b.servers[a_in_b].link = Some(b_tx);

        Self {
            a,
            b,
            b_in_a,
            a_out,
            a_in_b,
            b_out,
        }
    }

    /// Exchange bursts in both directions, then pump until quiescent.
    fn sync(&mut self) {
        burst::send_burst(&mut self.a, self.b_in_a);
        burst::send_burst(&mut self.b, self.a_in_b);
        self.pump();
    }

    /// Shuttle queued lines between the two sides until both queues run
    /// dry. Clocks are pinned back to the fake epoch after every step.
    fn pump(&mut self) {
        loop {
            let mut moved = false;
            while let Ok(line) = self.a_out.try_recv() {
                link::dispatch_peer_line(&mut self.b, self.a_in_b, &line).unwrap();
                self.b.now = EPOCH;
                moved = true;
            }
            while let Ok(line) = self.b_out.try_recv() {
                link::dispatch_peer_line(&mut self.a, self.b_in_a, &line).unwrap();
                self.a.now = EPOCH;
                moved = true;
            }
            if !moved {
                break;
            }
        }
        self.a.assert_invariants();
        self.b.assert_invariants();
    }
}

fn add_local_user(net: &mut Network, nick: &str, ts: i64) -> UserId {
    let (tx, _rx) = WireSender::new(1 << 20);
    let id = net.create_local_user(
        tx,
        Default::default(),
        "127.0.0.1".into(),
        "localhost".into(),
    );
    net.set_nick(id, nick, ts);
    net.users[id].ident = nick.chars().take(8).collect();
    net.users[id].signon_ts = ts;
    net.users[id].registered = true;
    id
}

fn join(net: &mut Network, user: UserId, chan: &str, ts: i64, bits: u8) {
    let (chan_id, _) = net.get_or_create_channel(chan, ts);
    net.add_member(chan_id, user, Membership::from_bits(bits));
}

/// A stable textual serialization of the shared network state; two
/// converged servers must render byte-identically.
fn snapshot(net: &Network) -> String {
    let mut out = String::new();

    let mut users: Vec<_> = net
        .users
        .iter()
        .filter(|(_, u)| u.registered)
        .map(|(_, u)| {
            format!(
                "user {} nick={} ts={} ident={} modes={}",
                u.uid,
                u.nick,
                u.nick_ts,
                u.ident,
                u.modes.as_mode_string()
            )
        })
        .collect();
    users.sort();
    for line in users {
        out.push_str(&line);
        out.push('\n');
    }

    let mut channels: Vec<_> = net
        .channels
        .iter()
        .map(|(_, c)| {
            let mut members: Vec<_> = c
                .members
                .iter()
                .map(|(&m, membership)| {
                    format!("{}{}", membership.all_prefixes(), net.users[m].uid)
                })
                .collect();
            members.sort();
            let mut lists: Vec<_> = c
                .lists
                .iter()
                .flat_map(|(&letter, entries)| {
                    entries.iter().map(move |e| format!("{}:{}", letter, e.mask))
                })
                .collect();
            lists.sort();
            format!(
                "chan {} ts={} modes={} topic={:?} members=[{}] lists=[{}]",
                c.name,
                c.ts,
                c.mode_summary(true),
                c.topic.as_ref().map(|t| (&t.text, t.set_ts)),
                members.join(","),
                lists.join(",")
            )
        })
        .collect();
    channels.sort();
    for line in channels {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[test]
fn burst_merge_older_side_wins() {
    let mut pair = Pair::new();

    // A's #x is older; its member keeps op.
    let alice = add_local_user(&mut pair.a, "alice", 500);
    join(&mut pair.a, alice, "#x", 1000, Membership::OP);
    let old_b = add_local_user(&mut pair.b, "brian", 600);
    join(&mut pair.b, old_b, "#x", 2000, Membership::OP);

    pair.sync();

    for net in [&pair.a, &pair.b] {
        let chan = net.find_channel("#x").unwrap();
        assert_eq!(net.channels[chan].ts, 1000, "both settle on the older TS");
        assert_eq!(net.channels[chan].members.len(), 2, "memberships union");

        let alice_id = net.find_nick("alice").unwrap();
        let brian_id = net.find_nick("brian").unwrap();
        assert!(
            net.channels[chan].members[&alice_id].has(Membership::OP),
            "winning side keeps status"
        );
        assert_eq!(
            net.channels[chan].members[&brian_id].rank(),
            0,
            "losing side is stripped everywhere"
        );
    }
    assert_eq!(snapshot(&pair.a), snapshot(&pair.b));
}

#[test]
fn burst_merge_equal_ts_unions_prefixes() {
    let mut pair = Pair::new();

    let alice = add_local_user(&mut pair.a, "alice", 500);
    join(&mut pair.a, alice, "#x", 1500, Membership::OP);
    let brian = add_local_user(&mut pair.b, "brian", 600);
    join(&mut pair.b, brian, "#x", 1500, Membership::VOICE);

    pair.sync();

    for net in [&pair.a, &pair.b] {
        let chan = net.find_channel("#x").unwrap();
        assert_eq!(net.channels[chan].ts, 1500);
        let alice_id = net.find_nick("alice").unwrap();
        let brian_id = net.find_nick("brian").unwrap();
        assert!(net.channels[chan].members[&alice_id].has(Membership::OP));
        assert!(net.channels[chan].members[&brian_id].has(Membership::VOICE));
    }
    assert_eq!(snapshot(&pair.a), snapshot(&pair.b));
}

#[test]
fn burst_carries_topic_modes_and_lists() {
    let mut pair = Pair::new();

    let alice = add_local_user(&mut pair.a, "alice", 500);
    join(&mut pair.a, alice, "#x", 1000, Membership::OP);
    {
        let chan = pair.a.find_channel("#x").unwrap();
        pair.a.channels[chan].modes.insert('n');
        pair.a.channels[chan].modes.insert('t');
        pair.a.channels[chan]
            .mode_params
            .insert('k', "sekret".into());
        pair.a.channels[chan].topic = Some(alderd::state::Topic {
            text: "converge".into(),
            setter: "alice!alice@localhost".into(),
            set_ts: 800,
        });
        pair.a.channels[chan]
            .lists
            .entry('b')
            .or_default()
            .push(alderd::state::ListEntry {
                mask: "troll!*@*".into(),
                setter: "alice".into(),
                set_ts: 900,
            });
    }

    pair.sync();

    let chan = pair.b.find_channel("#x").unwrap();
    assert!(pair.b.channels[chan].has_mode('n'));
    assert_eq!(pair.b.channels[chan].key(), Some("sekret"));
    assert_eq!(
        pair.b.channels[chan].topic.as_ref().map(|t| t.text.as_str()),
        Some("converge")
    );
    assert_eq!(pair.b.channels[chan].list('b').len(), 1);
    assert_eq!(snapshot(&pair.a), snapshot(&pair.b));
}

#[test]
fn collision_lower_ts_wins_on_introduction() {
    let mut pair = Pair::new();

    // Both sides own a "bob"; B's is older.
    let a_bob = add_local_user(&mut pair.a, "bob", 1000);
    let _b_bob = add_local_user(&mut pair.b, "bob", 900);
    let a_bob_uid = pair.a.users[a_bob].uid.clone();

    pair.sync();

    // Same ident@host on both sides, so the older signon is treated as
    // the reconnect survivor: A's newer bob dies on both sides.
    for (name, net) in [("a", &pair.a), ("b", &pair.b)] {
        let survivor = net.find_nick("bob").expect("one bob survives");
        assert_eq!(
            net.users[survivor].nick_ts, 900,
            "older bob survives on {name}"
        );
        assert_ne!(net.users[survivor].uid, a_bob_uid);
    }
}

#[test]
fn collision_equal_ts_kills_both() {
    let mut pair = Pair::new();
    add_local_user(&mut pair.a, "dup", 1000);
    add_local_user(&mut pair.b, "dup", 1000);

    pair.sync();

    assert!(pair.a.find_nick("dup").is_none(), "tie kills both");
    assert!(pair.b.find_nick("dup").is_none(), "tie kills both");
}

#[test]
fn netsplit_removes_exactly_the_lost_subtree() {
    let mut pair = Pair::new();

    // B brings a grandchild T with users; A learns of the whole subtree.
    for i in 0..17 {
        add_local_user(&mut pair.b, &format!("bu{i}"), 500 + i);
    }
    pair.b
        .add_server(pair.b.local_server, "3TT", "t.example.net", "grandchild")
        .unwrap();
    pair.sync();
    // Three users homed on the grandchild, introduced through B.
    for i in 0..3 {
        let t = pair.b.find_sid("3TT").unwrap();
        let uid = format!("3TTAAAAA{}", (b'A' + i) as char);
        pair.b
            .introduce_remote_user(
                t,
                uid,
                format!("tu{i}"),
                700,
                "t".into(),
                "host".into(),
                "host".into(),
                "0.0.0.0".into(),
                700,
                "T user".into(),
            )
            .unwrap();
    }
    // Tell A about them the way B would.
    for i in 0..3 {
        let uid = format!("3TTAAAAA{}", (b'A' + i) as char);
        link::dispatch_peer_line(
            &mut pair.a,
            pair.b_in_a,
            &format!(":3TT UID {uid} 700 tu{i} host host t 0.0.0.0 700 + :T user"),
        )
        .unwrap();
    }
    assert_eq!(pair.a.global_user_count(), 20);

    // The B link dies: A loses B, T, and every user homed on them.
    link::squit_peer(&mut pair.a, pair.b_in_a, "link failure");
    assert_eq!(pair.a.global_user_count(), 0);
    assert!(pair.a.find_sid("2BB").is_none());
    assert!(pair.a.find_sid("3TT").is_none());
    assert_eq!(pair.a.servers.len(), 1, "only the root remains");
    pair.a.assert_invariants();
}

#[test]
fn identical_command_streams_produce_identical_state() {
    let registry = CommandRegistry::new();
    let script = [
        "NICK alice", "USER alice 0 * :Alice",
        "JOIN #room", "MODE #room +nt", "MODE #room +k hunter2",
        "TOPIC #room :deterministic", "MODE #room +b lurker!*@*",
    ];

    let run = || {
        let mut net = build_net("c.example.net", "9CC");
        let (tx, _rx) = WireSender::new(1 << 20);
        let user = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        for line in script {
            let msg = line.parse().unwrap();
            dispatch(&registry, &mut net, user, &msg);
            net.now = EPOCH;
        }
        net.assert_invariants();
        snapshot(&net)
    };

    assert_eq!(run(), run());
}
