//! Per-connection tasks.
//!
//! Every accepted socket is split into a framed reader and a writer task
//! draining the connection's send queue. Client sockets dispatch through
//! the command registry; server sockets run the link handshake first and
//! then feed the S2S dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use alder_proto::{LineCodec, Message};

use crate::commands::{self, helpers, CmdOutcome, CommandRegistry};
use crate::config::LinkBlock;
use crate::link::{self, Handshake};
use crate::network::sendq::{WireReceiver, WireSender};
use crate::network::Shared;
use crate::state::UserId;

/// Drive the writer side: drain the send queue into the socket.
async fn writer_task(mut rx: WireReceiver, write_half: OwnedWriteHalf) {
    let mut framed = FramedWrite::new(write_half, LineCodec::new());
    while let Some(line) = rx.recv().await {
        if let Err(err) = framed.send(line).await {
            debug!(%err, "write failed, closing writer");
            break;
        }
    }
    let _ = framed.flush().await;
}

/// Serve one client socket for its whole life.
pub async fn client_task(shared: Shared, registry: Arc<CommandRegistry>, stream: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();

    let user = {
        let mut net = shared.lock().await;
        net.sample_clock();

        // Z-lines apply before any bytes are exchanged.
        let ip = addr.ip().to_string();
        if let Some(line) = net
            .xlines
            .check_user(net.casemap, &format!("unknown@{}", ip), &ip, net.now)
            .cloned()
        {
            let mut framed = FramedWrite::new(write_half, LineCodec::new());
            let _ = framed
                .send(format!(
                    "ERROR :Closing link: [{}] ({}-Lined: {})",
                    ip,
                    line.kind.letter(),
                    line.reason
                ))
                .await;
            return;
        }

        let class = net.config.class_for_host(&ip);
        let (tx, rx) = WireSender::new(class.sendq);
        tokio::spawn(writer_task(rx, write_half));
        net.create_local_user(tx, class, ip.clone(), ip)
    };
    info!(%addr, "client connected");

    read_loop(shared.clone(), registry, read_half, user).await;

    // Reader gone: if the user still exists the peer hung up without QUIT.
    let mut net = shared.lock().await;
    if net.users.get(user).is_some() {
        helpers::quit_user(&mut net, user, "Connection closed", true, None);
        helpers::flush_pending(&mut net);
    }
    info!(%addr, "client disconnected");
}

async fn read_loop(
    shared: Shared,
    registry: Arc<CommandRegistry>,
    read_half: OwnedReadHalf,
    user: UserId,
) {
    let mut framed = FramedRead::new(read_half, LineCodec::new());
    while let Some(result) = framed.next().await {
        let line = match result {
            Ok(line) => line,
            Err(err) => {
                debug!(%err, "read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(msg) = line.parse::<Message>() else {
            continue;
        };

        let mut net = shared.lock().await;
        let outcome = commands::dispatch(&registry, &mut net, user, &msg);
        helpers::flush_pending(&mut net);
        if outcome == CmdOutcome::UserDeleted || net.users.get(user).is_none() {
            break;
        }
        if net.stopping.is_some() {
            break;
        }
    }
}

/// Serve one inbound server-link socket.
pub async fn inbound_link_task(shared: Shared, stream: TcpStream, addr: SocketAddr) {
    info!(%addr, "inbound server connection");
    link_task(shared, stream, Handshake::inbound(), None).await;
}

/// Dial and serve one outbound server link.
pub async fn outbound_link_task(shared: Shared, block: LinkBlock) {
    let target = format!("{}:{}", block.ip, block.port);
    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(link = %block.name, %target, %err, "outbound connect failed");
            let failover = block.failover.clone();
            if let Some(next) = failover {
                let config = shared.lock().await.config.clone();
                if let Some(next_block) = config.links.iter().find(|l| l.name == next) {
                    Box::pin(outbound_link_task(shared, next_block.clone())).await;
                }
            }
            return;
        }
    };
    info!(link = %block.name, %target, "outbound server connection");
    link_task(shared, stream, Handshake::outbound(block.clone()), Some(block)).await;
}

/// Common link lifecycle: handshake, attach, burst, then dispatch until
/// the socket dies or a protocol violation drops the link.
async fn link_task(
    shared: Shared,
    stream: TcpStream,
    mut handshake: Handshake,
    dialled: Option<LinkBlock>,
) {
    let (read_half, write_half) = stream.into_split();
    let sendq = {
        let net = shared.lock().await;
        net.config.classes.first().map(|c| c.sendq).unwrap_or(1 << 20)
    };
    let (tx, rx) = WireSender::new(sendq.max(1 << 20));
    tokio::spawn(writer_task(rx, write_half));

    // The outbound side introduces itself immediately.
    if let Some(block) = &dialled {
        let net = shared.lock().await;
        for line in Handshake::our_introduction(&net, &block.sendpass) {
            let _ = tx.send_line(line);
        }
    }

    let mut framed = FramedRead::new(read_half, LineCodec::new());
    let mut peer = None;

    while let Some(result) = framed.next().await {
        let line = match result {
            Ok(line) => line,
            Err(err) => {
                debug!(%err, "link read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut net = shared.lock().await;
        match peer {
            None => {
                let msg = match line.parse::<Message>() {
                    Ok(msg) => msg,
                    Err(_) => continue,
                };
                match handshake.step(&net, &msg) {
                    Ok(false) => {}
                    Ok(true) => {
                        // Inbound side replies with its own credentials
                        // before bursting.
                        if !handshake.outbound {
                            let sendpass = handshake
                                .block
                                .as_ref()
                                .map(|b| b.sendpass.clone())
                                .unwrap_or_default();
                            for intro in Handshake::our_introduction(&net, &sendpass) {
                                let _ = tx.send_line(intro);
                            }
                        }
                        match link::attach_peer(&mut net, &handshake, tx.clone()) {
                            Ok(id) => peer = Some(id),
                            Err(err) => {
                                let _ = tx.send_line(format!("ERROR :{}", err));
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send_line(format!("ERROR :{}", err));
                        return;
                    }
                }
            }
            Some(id) => {
                if net.servers.get(id).map(|s| s.link.is_none()).unwrap_or(true) {
                    // The link was torn down underneath us (SQUIT).
                    return;
                }
                if let Err(err) = link::dispatch_peer_line(&mut net, id, &line) {
                    let _ = tx.send_line(format!("ERROR :{}", err));
                    link::squit_peer(&mut net, id, &err.to_string());
                    return;
                }
                if net.stopping.is_some() {
                    return;
                }
            }
        }
    }

    // Socket closed underneath a live link: that is a netsplit.
    if let Some(id) = peer {
        let mut net = shared.lock().await;
        if net.servers.get(id).is_some() {
            link::squit_peer(&mut net, id, "Connection closed");
        }
    }
}
