//! Listeners and background tasks.
//!
//! The gateway binds every configured port, spawns accept loops for
//! client and server listeners, runs the periodic work (keepalive pings,
//! registration timeouts, X-line expiry, autoconnect), and watches for
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::commands::{helpers, CommandRegistry};
use crate::config::{Config, PortKind};
use crate::error::exit;
use crate::network::{connection, Shared};
use crate::state::UserId;

/// Interval for the server-to-server keepalive cycle.
const LINK_PING_SECS: u64 = 60;
/// Interval for client timeout sweeps and X-line expiry.
const SWEEP_SECS: u64 = 10;

pub struct Gateway {
    shared: Shared,
    registry: Arc<CommandRegistry>,
    config: Arc<Config>,
    listeners: Vec<(TcpListener, PortKind)>,
}

impl Gateway {
    /// Bind every configured port. Failing to bind all of them is fatal.
    pub async fn bind(shared: Shared, config: Arc<Config>) -> Result<Self, i32> {
        let mut listeners = Vec::new();
        for port in &config.ports {
            let addr = format!("{}:{}", port.ip, port.port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    info!(%addr, kind = ?port.kind, "listening");
                    listeners.push((listener, port.kind));
                }
                Err(err) => {
                    error!(%addr, %err, "failed to bind");
                }
            }
        }
        if listeners.is_empty() {
            error!("no ports could be bound");
            return Err(exit::NO_PORTS);
        }
        Ok(Self {
            shared,
            registry: Arc::new(CommandRegistry::new()),
            config,
            listeners,
        })
    }

    /// Run until DIE or a fatal signal; the return value is the process
    /// exit code.
    pub async fn run(self) -> i32 {
        let Self {
            shared,
            registry,
            config,
            listeners,
        } = self;

        for (listener, kind) in listeners {
            let shared = shared.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            let shared = shared.clone();
                            let registry = registry.clone();
                            match kind {
                                PortKind::Clients => {
                                    tokio::spawn(connection::client_task(
                                        shared, registry, stream, addr,
                                    ));
                                }
                                PortKind::Servers => {
                                    tokio::spawn(connection::inbound_link_task(
                                        shared, stream, addr,
                                    ));
                                }
                            }
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
            });
        }

        // Autoconnect outbound links.
        for block in config.links.iter().filter(|l| l.autoconnect) {
            tokio::spawn(connection::outbound_link_task(
                shared.clone(),
                block.clone(),
            ));
        }

        tokio::spawn(link_ping_cycle(shared.clone()));
        tokio::spawn(client_sweep(shared.clone()));
        tokio::spawn(connect_queue(shared.clone()));

        // Wait for DIE or a termination signal.
        let reason = loop {
            if let Some(reason) = shared.lock().await.stopping.clone() {
                break reason;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = tokio::signal::ctrl_c() => {
                    let mut net = shared.lock().await;
                    net.stopping = Some("Server terminating (signal)".to_string());
                }
            }
        };

        // Drain: every connection gets an ERROR line before exit.
        let mut net = shared.lock().await;
        info!(reason, "shutting down");
        let users: Vec<UserId> = net
            .users
            .iter()
            .filter(|(_, u)| u.is_local())
            .map(|(id, _)| id)
            .collect();
        for user in users {
            let line = format!("ERROR :Closing link: ({})", reason);
            net.send_to_user(user, &line);
        }
        for peer in net.direct_peers() {
            let line = format!("ERROR :{}", reason);
            net.send_to_peer(peer, &line);
        }
        // Give the writer tasks a moment to flush.
        drop(net);
        tokio::time::sleep(Duration::from_millis(200)).await;
        exit::DIE
    }
}

/// PING every direct peer on a fixed cycle; a peer that missed the
/// previous cycle is split.
async fn link_ping_cycle(shared: Shared) {
    let mut ticker = interval(Duration::from_secs(LINK_PING_SECS));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut net = shared.lock().await;
        net.sample_clock();
        let sid = net.server_sid().to_string();
        for peer in net.direct_peers() {
            if net.servers[peer].awaiting_pong {
                crate::link::squit_peer(&mut net, peer, "Ping timeout");
                continue;
            }
            let peer_sid = net.servers[peer].sid.clone();
            net.send_to_peer(peer, &format!(":{} PING {} {}", sid, sid, peer_sid));
            net.servers[peer].awaiting_pong = true;
        }
        helpers::flush_pending(&mut net);
    }
}

/// Registration timeouts, client keepalive and X-line expiry.
async fn client_sweep(shared: Shared) {
    let mut ticker = interval(Duration::from_secs(SWEEP_SECS));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut net = shared.lock().await;
        net.sample_clock();
        let now = net.now;

        let mut to_drop: Vec<(UserId, &'static str)> = Vec::new();
        let mut to_ping: Vec<UserId> = Vec::new();
        for (id, user) in net.users.iter() {
            let Some(local) = &user.local else { continue };
            let class = &local.class;
            if !user.registered {
                if now - user.signon_ts > class.timeout as i64 {
                    to_drop.push((id, "Connection timeout"));
                }
                continue;
            }
            let idle = now - local.last_activity;
            if local.awaiting_pong && idle > (class.ping_freq + class.timeout) as i64 {
                to_drop.push((id, "Ping timeout"));
            } else if !local.awaiting_pong && idle > class.ping_freq as i64 {
                to_ping.push(id);
            }
        }
        for (id, reason) in to_drop {
            helpers::quit_user(&mut net, id, reason, true, None);
        }
        let server = net.config.server.name.clone();
        for id in to_ping {
            net.send_to_user(id, &format!("PING :{}", server));
            if let Some(local) = net.users[id].local.as_mut() {
                local.awaiting_pong = true;
            }
        }

        let expired = net.xlines.expire(now);
        if expired > 0 {
            net.snomask('x', &format!("{} expired ban(s) removed", expired));
        }
        helpers::flush_pending(&mut net);
    }
}

/// Drain CONNECT requests queued by operators.
async fn connect_queue(shared: Shared) {
    let mut ticker = interval(Duration::from_secs(2));
    loop {
        ticker.tick().await;
        let (requests, config) = {
            let mut net = shared.lock().await;
            (std::mem::take(&mut net.pending_connects), net.config.clone())
        };
        for name in requests {
            if let Some(block) = config
                .links
                .iter()
                .find(|l| l.name == name || crate::state::wildcard::match_mask(&name, &l.name))
            {
                tokio::spawn(connection::outbound_link_task(
                    shared.clone(),
                    block.clone(),
                ));
            }
        }
    }
}
