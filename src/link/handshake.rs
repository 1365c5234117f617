//! Link handshake: CAPAB exchange and SERVER authentication.
//!
//! Both sides send `CAPAB START`, their module list, a key=value
//! capability line and `CAPAB END`, then a `SERVER` line carrying the
//! password. Any capability mismatch that would corrupt shared state
//! (differing identifier limits, case mapping, halfop support, protocol
//! revision) refuses the link before any state is exchanged.

use std::collections::HashMap;

use alder_proto::casemap::is_valid_sid;
use alder_proto::Message;

use crate::config::LinkBlock;
use crate::error::LinkError;
use crate::state::Network;

/// Wire-compatibility revision; bumped when the S2S grammar changes.
pub const PROTOCOL_REVISION: &str = "1202";

/// Handshake progress for one peer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Inbound socket, nothing received yet.
    WaitAuth1,
    /// Outbound socket, our credentials sent, awaiting theirs.
    WaitAuth2,
    /// Authenticated; burst exchange and normal traffic.
    Connected,
}

/// Accumulated handshake data for a peer socket.
#[derive(Debug)]
pub struct Handshake {
    pub state: LinkState,
    pub outbound: bool,
    /// Link block matched at SERVER time (outbound: chosen at dial time).
    pub block: Option<LinkBlock>,
    pub remote_name: Option<String>,
    pub remote_sid: Option<String>,
    pub remote_desc: String,
    capab: HashMap<String, String>,
    capab_modules: Vec<String>,
    capab_done: bool,
}

impl Handshake {
    pub fn inbound() -> Self {
        Self {
            state: LinkState::WaitAuth1,
            outbound: false,
            block: None,
            remote_name: None,
            remote_sid: None,
            remote_desc: String::new(),
            capab: HashMap::new(),
            capab_modules: Vec::new(),
            capab_done: false,
        }
    }

    pub fn outbound(block: LinkBlock) -> Self {
        Self {
            state: LinkState::WaitAuth2,
            outbound: true,
            block: Some(block),
            remote_name: None,
            remote_sid: None,
            remote_desc: String::new(),
            capab: HashMap::new(),
            capab_modules: Vec::new(),
            capab_done: false,
        }
    }

    /// The CAPAB batch plus our SERVER line, sent at dial time (outbound)
    /// or in reply to a valid inbound SERVER.
    pub fn our_introduction(net: &Network, sendpass: &str) -> Vec<String> {
        let mut lines = capab_lines(net);
        lines.push(format!(
            "SERVER {} {} 0 {} :{}",
            net.config.server.name, sendpass, net.config.server.sid, net.config.server.description
        ));
        lines
    }

    /// Feed one pre-auth line. `Ok(true)` means authentication finished
    /// and the caller should attach the peer and start the burst.
    pub fn step(&mut self, net: &Network, msg: &Message) -> Result<bool, LinkError> {
        match msg.command.as_str() {
            "CAPAB" => {
                self.absorb_capab(msg);
                Ok(false)
            }
            "SERVER" => {
                if self.capab_done {
                    self.check_capab(net)?;
                }
                self.authenticate(net, msg)?;
                self.state = LinkState::Connected;
                Ok(true)
            }
            "ERROR" => Err(LinkError::Remote(
                msg.arg(0).unwrap_or("no reason").to_string(),
            )),
            other => Err(LinkError::UnexpectedCommand(other.to_string())),
        }
    }

    fn absorb_capab(&mut self, msg: &Message) {
        match msg.arg(0) {
            Some("START") => {
                self.capab.clear();
                self.capab_modules.clear();
            }
            Some("MODULES") => {
                if let Some(list) = msg.arg(1) {
                    self.capab_modules
                        .extend(list.split(',').map(str::to_string));
                }
            }
            Some("CAPABILITIES") => {
                if let Some(kv) = msg.arg(1) {
                    for pair in kv.split_whitespace() {
                        if let Some((key, value)) = pair.split_once('=') {
                            self.capab.insert(key.to_string(), value.to_string());
                        }
                    }
                }
            }
            Some("END") => self.capab_done = true,
            _ => {}
        }
    }

    /// Compare their advertised constants with ours; any difference that
    /// affects the shared namespace refuses the link.
    fn check_capab(&self, net: &Network) -> Result<(), LinkError> {
        if !self.capab_modules.is_empty() {
            let mut theirs = self.capab_modules.clone();
            theirs.sort();
            if theirs != vec!["core".to_string()] {
                return Err(LinkError::CapabMismatch(format!(
                    "module lists differ (theirs: {})",
                    theirs.join(",")
                )));
            }
        }
        let ours = capability_map(net);
        for (key, ours_value) in &ours {
            if let Some(theirs) = self.capab.get(key) {
                if theirs != ours_value {
                    return Err(LinkError::CapabMismatch(format!(
                        "{} differs (ours={}, theirs={})",
                        key, ours_value, theirs
                    )));
                }
            }
        }
        Ok(())
    }

    fn authenticate(&mut self, net: &Network, msg: &Message) -> Result<(), LinkError> {
        if msg.params.len() < 4 {
            return Err(LinkError::Malformed("SERVER"));
        }
        let name = msg.params[0].clone();
        let password = msg.params[1].clone();
        let sid = msg.params[3].clone();
        let desc = msg.params.last().cloned().unwrap_or_default();

        if !is_valid_sid(&sid) {
            return Err(LinkError::Malformed("SERVER"));
        }
        let block = match &self.block {
            // Outbound: the dialled block must be the server that answered.
            Some(block) => {
                if !net.casemap.eq(&block.name, &name) {
                    return Err(LinkError::UnknownServer(name));
                }
                block.clone()
            }
            None => net
                .config
                .links
                .iter()
                .find(|l| net.casemap.eq(&l.name, &name))
                .cloned()
                .ok_or_else(|| LinkError::UnknownServer(name.clone()))?,
        };
        if block.recvpass != password {
            return Err(LinkError::BadPassword(name));
        }
        if net.find_sid(&sid).is_some() {
            return Err(LinkError::DuplicateSid(sid));
        }
        if net.find_server_name(&name).is_some() {
            return Err(LinkError::DuplicateName(name));
        }

        self.block = Some(block);
        self.remote_name = Some(name);
        self.remote_sid = Some(sid);
        self.remote_desc = desc;
        Ok(())
    }
}

/// The capability constants we advertise and enforce.
fn capability_map(net: &Network) -> HashMap<String, String> {
    let limits = &net.config.limits;
    HashMap::from([
        ("PROTOCOL".to_string(), PROTOCOL_REVISION.to_string()),
        ("CASEMAPPING".to_string(), net.casemap.name().to_string()),
        ("NICKMAX".to_string(), limits.nick.to_string()),
        ("IDENTMAX".to_string(), limits.ident.to_string()),
        ("CHANMAX".to_string(), limits.channel.to_string()),
        ("MAXTOPIC".to_string(), limits.topic.to_string()),
        ("MAXKICK".to_string(), limits.kick.to_string()),
        ("MAXQUIT".to_string(), limits.quit.to_string()),
        ("MAXGECOS".to_string(), limits.gecos.to_string()),
        ("MAXAWAY".to_string(), limits.away.to_string()),
        (
            "HALFOP".to_string(),
            if net.config.enable_halfop { "1" } else { "0" }.to_string(),
        ),
    ])
}

/// The full CAPAB batch for our side.
pub fn capab_lines(net: &Network) -> Vec<String> {
    let mut caps: Vec<String> = capability_map(net)
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    caps.sort();
    vec![
        "CAPAB START".to_string(),
        "CAPAB MODULES :core".to_string(),
        format!("CAPAB CAPABILITIES :{}", caps.join(" ")),
        "CAPAB END".to_string(),
    ]
}
