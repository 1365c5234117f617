//! Configuration type definitions.

use serde::Deserialize;

use super::defaults;

/// Server identity block.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// This server's name, e.g. `hub.example.net`.
    pub name: String,
    /// Three-character server ID: a digit then two digits or capitals.
    pub sid: String,
    /// Free-form description shown in LINKS/WHOIS.
    pub description: String,
    /// Network name advertised in 001/005.
    pub network: String,
    /// Path to the MOTD file; 422 is sent when absent or unreadable.
    #[serde(default)]
    pub motd_file: Option<String>,
    /// PID file path.
    #[serde(default = "defaults::pid_file")]
    pub pid_file: String,
}

/// Administrative contact, sent for ADMIN.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub email: String,
}

/// What a listening port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Clients,
    Servers,
}

/// One listening socket.
#[derive(Debug, Clone, Deserialize)]
pub struct PortBlock {
    pub ip: String,
    pub port: u16,
    #[serde(rename = "type", default = "defaults::port_kind")]
    pub kind: PortKind,
    /// TLS is terminated by an external transport layer; the flag only
    /// selects which listeners that layer wraps.
    #[serde(default)]
    pub tls: bool,
}

/// A server we may link with.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name; must match its SERVER introduction.
    pub name: String,
    /// Address to connect to for outbound links.
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    /// Password we send in our SERVER line.
    pub sendpass: String,
    /// Password we require on theirs.
    pub recvpass: String,
    #[serde(default)]
    pub autoconnect: bool,
    /// Link block to try when this one fails to connect.
    #[serde(default)]
    pub failover: Option<String>,
    /// Transport hint for the external transport layer (`plain`, `tls`).
    #[serde(default = "defaults::transport")]
    pub transport: String,
}

/// An operator credential block.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    pub name: String,
    /// Hex-encoded sha256 of the oper password.
    pub hash: String,
    /// `user@host` mask the oper must connect from.
    pub host: String,
    #[serde(rename = "type")]
    pub oper_type: String,
}

/// A named bundle of oper permissions.
#[derive(Debug, Clone, Deserialize)]
pub struct OperTypeBlock {
    pub name: String,
    /// Space-separated permission tokens, e.g. `kill squit connect override`.
    #[serde(default)]
    pub perms: String,
}

/// A connect class: resource limits applied by host mask.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassBlock {
    #[serde(default = "defaults::class_name")]
    pub name: String,
    /// Host mask selecting this class; first match wins.
    #[serde(default = "defaults::any_host")]
    pub host: String,
    /// Outbound queue cap in bytes.
    #[serde(default = "defaults::sendq")]
    pub sendq: usize,
    /// Inbound buffer cap in bytes.
    #[serde(default = "defaults::recvq")]
    pub recvq: usize,
    /// Seconds between keepalive pings.
    #[serde(default = "defaults::ping_freq")]
    pub ping_freq: u64,
    /// Seconds of silence (and registration grace) before dropping.
    #[serde(default = "defaults::timeout")]
    pub timeout: u64,
    /// Channels one user of this class may occupy.
    #[serde(default = "defaults::max_chans")]
    pub max_chans: usize,
}

impl Default for ClassBlock {
    fn default() -> Self {
        Self {
            name: defaults::class_name(),
            host: defaults::any_host(),
            sendq: defaults::sendq(),
            recvq: defaults::recvq(),
            ping_freq: defaults::ping_freq(),
            timeout: defaults::timeout(),
            max_chans: defaults::max_chans(),
        }
    }
}

/// Maximum lengths for wire identifiers, exchanged during CAPAB.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "defaults::nick_len")]
    pub nick: usize,
    #[serde(default = "defaults::ident_len")]
    pub ident: usize,
    #[serde(default = "defaults::channel_len")]
    pub channel: usize,
    #[serde(default = "defaults::topic_len")]
    pub topic: usize,
    #[serde(default = "defaults::kick_len")]
    pub kick: usize,
    #[serde(default = "defaults::quit_len")]
    pub quit: usize,
    #[serde(default = "defaults::gecos_len")]
    pub gecos: usize,
    #[serde(default = "defaults::away_len")]
    pub away: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            nick: defaults::nick_len(),
            ident: defaults::ident_len(),
            channel: defaults::channel_len(),
            topic: defaults::topic_len(),
            kick: defaults::kick_len(),
            quit: defaults::quit_len(),
            gecos: defaults::gecos_len(),
            away: defaults::away_len(),
        }
    }
}

/// One entry of the channel-pattern → list-size table.
#[derive(Debug, Clone, Deserialize)]
pub struct BanLimit {
    pub pattern: String,
    pub limit: usize,
}
