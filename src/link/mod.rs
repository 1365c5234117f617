//! The server-to-server layer.
//!
//! A peer socket authenticates through [`Handshake`], is attached to the
//! tree as a direct child of the local server, receives a netburst, and
//! thereafter feeds lines into [`dispatch_peer_line`], which enforces the
//! fake-direction rule and applies the timestamp protocol.

pub mod burst;
pub mod collide;
pub mod commands;
pub mod handshake;
pub mod wire;

pub use handshake::{Handshake, LinkState};

use tracing::{debug, info};

use alder_proto::Message;

use crate::commands::helpers;
use crate::error::LinkError;
use crate::network::sendq::WireSender;
use crate::state::{Network, ServerId};

/// Attach an authenticated peer under the root and start the netburst.
pub fn attach_peer(
    net: &mut Network,
    hs: &Handshake,
    sender: WireSender,
) -> Result<ServerId, LinkError> {
    let name = hs
        .remote_name
        .clone()
        .ok_or(LinkError::Malformed("SERVER"))?;
    let sid = hs.remote_sid.clone().ok_or(LinkError::Malformed("SERVER"))?;

    let peer = net.add_server(net.local_server, &sid, &name, &hs.remote_desc)?;
    net.servers[peer].link = Some(sender);

    info!(server = %name, sid = %sid, "server link established");
    net.snomask('l', &format!("Link with {} [{}] established", name, sid));

    burst::send_burst(net, peer);
    Ok(peer)
}

/// Tear down a direct peer: its whole subtree leaves the network.
pub fn squit_peer(net: &mut Network, peer: ServerId, reason: &str) {
    let Some(node) = net.servers.get(peer) else {
        return;
    };
    let peer_name = node.name.clone();
    let local_name = net.config.server.name.clone();

    let subtree = crate::state::server::subtree_of(&net.servers, peer);
    let victims = net.users_on_servers(&subtree);
    let split_reason = format!("{} {}", local_name, peer_name);

    for user in &victims {
        helpers::quit_user(net, *user, &split_reason, false, None);
    }
    let servers_lost = net.remove_server_subtree(peer).len();

    let sid = net.server_sid().to_string();
    let line = wire::squit(&sid, &peer_name, reason);
    net.broadcast_to_peers(&line, None);

    info!(
        server = %peer_name,
        users = victims.len(),
        servers = servers_lost,
        reason,
        "netsplit"
    );
    net.snomask(
        'l',
        &format!(
            "Netsplit complete, lost {} users on {} servers ({})",
            victims.len(),
            servers_lost,
            peer_name
        ),
    );
}

/// SQUIT a server anywhere in the tree: local teardown for direct peers,
/// a routed request otherwise.
pub fn squit_server(net: &mut Network, server: ServerId, reason: &str) {
    match net.route_of(server) {
        Some(route) if route == server => squit_peer(net, server, reason),
        Some(route) => {
            let name = net.servers[server].name.clone();
            let sid = net.server_sid().to_string();
            let line = wire::squit(&sid, &name, reason);
            net.send_to_peer(route, &line);
        }
        None => {}
    }
}

/// Handle one post-authentication line from a direct peer.
///
/// Returns an error only for violations that must drop the link; bad
/// routing (fake direction) is a silent drop per protocol.
pub fn dispatch_peer_line(net: &mut Network, peer: ServerId, line: &str) -> Result<(), LinkError> {
    net.sample_clock();
    let Ok(msg) = line.parse::<Message>() else {
        // Unparsable noise from an authenticated peer; ignore the line.
        debug!(peer, line, "dropping unparsable peer line");
        return Ok(());
    };

    // Resolve the origin and enforce fake-direction: the line must arrive
    // on the link that routes toward its origin.
    let origin = match &msg.prefix {
        Some(token) => match resolve_origin(net, token) {
            Some(origin) => origin,
            None => {
                debug!(peer, token = %token, "dropping line from unknown origin");
                return Ok(());
            }
        },
        None => peer,
    };
    // A peer may never speak for this server, and a message must arrive
    // on the link that routes toward its origin.
    if origin == net.local_server || net.route_of(origin) != Some(peer) {
        debug!(peer, origin, "dropping fake-direction line");
        return Ok(());
    }

    commands::dispatch(net, peer, origin, &msg)?;
    helpers::flush_pending(net);
    Ok(())
}

/// Map a prefix token to the server it speaks for: a SID, a UID (its home
/// server), or a server name.
fn resolve_origin(net: &Network, token: &str) -> Option<ServerId> {
    if let Some(user) = net.find_uid(token) {
        return Some(net.users[user].server);
    }
    if let Some(server) = net.find_server_token(token) {
        return Some(server);
    }
    net.find_nick(token).map(|u| net.users[u].server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::sendq::WireSender;
    use crate::state::tests::test_config;

    #[test]
    fn test_fake_direction_dropped() {
        let mut net = Network::new(test_config());
        let (tx_a, _rx_a) = WireSender::new(262_144);
        let (tx_b, mut rx_b) = WireSender::new(262_144);
        let a = net
            .add_server(net.local_server, "2AA", "a.example.net", "a")
            .unwrap();
        let b = net
            .add_server(net.local_server, "3BB", "b.example.net", "b")
            .unwrap();
        net.servers[a].link = Some(tx_a);
        net.servers[b].link = Some(tx_b);

        // A user homed on A...
        dispatch_peer_line(
            &mut net,
            a,
            ":2AA UID 2AAAAAAAA 900 eve host dhost e 1.2.3.4 900 + :Eve",
        )
        .unwrap();
        assert!(net.find_nick("eve").is_some());

        // ...whose traffic must arrive via A. Via B it is discarded.
        while rx_b.try_recv().is_ok() {}
        dispatch_peer_line(&mut net, b, ":2AAAAAAAA NICK mallory 950").unwrap();
        assert!(net.find_nick("mallory").is_none());
        assert!(net.find_nick("eve").is_some());
    }

    #[test]
    fn test_squit_peer_removes_subtree_users() {
        let mut net = Network::new(test_config());
        let (tx_a, _rx_a) = WireSender::new(262_144);
        let a = net
            .add_server(net.local_server, "2AA", "a.example.net", "a")
            .unwrap();
        net.servers[a].link = Some(tx_a);
        dispatch_peer_line(
            &mut net,
            a,
            ":2AA SERVER t.example.net * 0 4TT :grandchild",
        )
        .unwrap();
        for (i, (sid, nick)) in [("2AA", "u1"), ("2AA", "u2"), ("4TT", "u3")]
            .iter()
            .enumerate()
        {
            dispatch_peer_line(
                &mut net,
                a,
                &format!(
                    ":{} UID {}AAAAAA{} 900 {} host dhost i 0.0.0.0 900 + :U",
                    sid,
                    sid,
                    (b'A' + i as u8) as char,
                    nick
                ),
            )
            .unwrap();
        }
        assert_eq!(net.global_user_count(), 3);

        squit_peer(&mut net, a, "link failure");
        assert_eq!(net.global_user_count(), 0);
        assert!(net.find_sid("2AA").is_none());
        assert!(net.find_sid("4TT").is_none());
        net.assert_invariants();
    }
}
