//! Serde default values for the config schema.

use super::types::{BanLimit, PortKind};

pub const DEFAULT_LIST_LIMIT: usize = 64;

pub fn pid_file() -> String {
    "alderd.pid".to_string()
}

pub fn port_kind() -> PortKind {
    PortKind::Clients
}

pub fn transport() -> String {
    "plain".to_string()
}

pub fn class_name() -> String {
    "default".to_string()
}

pub fn any_host() -> String {
    "*".to_string()
}

pub fn sendq() -> usize {
    262_144
}

pub fn recvq() -> usize {
    8_192
}

pub fn ping_freq() -> u64 {
    120
}

pub fn timeout() -> u64 {
    60
}

pub fn max_chans() -> usize {
    20
}

pub fn max_targets() -> usize {
    20
}

pub fn max_modes_per_line() -> usize {
    20
}

pub fn ban_limits() -> Vec<BanLimit> {
    vec![BanLimit {
        pattern: "*".to_string(),
        limit: DEFAULT_LIST_LIMIT,
    }]
}

pub fn case_mapping() -> String {
    "rfc1459".to_string()
}

pub fn nick_len() -> usize {
    31
}

pub fn ident_len() -> usize {
    11
}

pub fn channel_len() -> usize {
    64
}

pub fn topic_len() -> usize {
    307
}

pub fn kick_len() -> usize {
    255
}

pub fn quit_len() -> usize {
    255
}

pub fn gecos_len() -> usize {
    128
}

pub fn away_len() -> usize {
    200
}
