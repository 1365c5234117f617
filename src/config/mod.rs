//! Configuration loading and validation.
//!
//! The daemon consumes a TOML file; this module owns the schema, defaults,
//! and the startup validation pass. Parsing failures and semantic errors
//! both map to the config-error exit code.

mod defaults;
mod types;

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use alder_proto::casemap::{is_valid_sid, CaseMapping};

pub use types::{
    AdminConfig, BanLimit, ClassBlock, LimitsConfig, LinkBlock, OperBlock, OperTypeBlock,
    PortBlock, PortKind, ServerConfig,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config contains a die tag: {0}")]
    Die(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(rename = "port", default)]
    pub ports: Vec<PortBlock>,
    #[serde(rename = "link", default)]
    pub links: Vec<LinkBlock>,
    #[serde(rename = "oper", default)]
    pub opers: Vec<OperBlock>,
    #[serde(rename = "oper_type", default)]
    pub oper_types: Vec<OperTypeBlock>,
    #[serde(rename = "class", default)]
    pub classes: Vec<ClassBlock>,
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Server names treated as trusted services; their mode changes bypass
    /// timestamp checks.
    #[serde(default)]
    pub ulines: Vec<String>,

    /// Commands refused with 421 regardless of handler availability.
    #[serde(default)]
    pub disabled_commands: Vec<String>,

    /// Maximum comma-separated targets one command may address.
    #[serde(default = "defaults::max_targets")]
    pub max_targets: usize,

    /// Maximum mode changes coalesced into one outbound MODE/FMODE line.
    #[serde(default = "defaults::max_modes_per_line")]
    pub max_modes_per_line: usize,

    /// Per-channel list-mode caps, first matching pattern wins.
    #[serde(rename = "ban_limit", default = "defaults::ban_limits")]
    pub ban_limits: Vec<BanLimit>,

    #[serde(default = "defaults::case_mapping")]
    pub case_mapping: String,

    #[serde(default)]
    pub enable_halfop: bool,

    /// Presence refuses to boot; used to fence off known-bad config files.
    #[serde(default)]
    pub die: Option<String>,
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// The parsed case mapping; validated to exist.
    pub fn case_mapping(&self) -> CaseMapping {
        CaseMapping::from_name(&self.case_mapping).unwrap_or_default()
    }

    /// Resolve the connect class for a client host, falling back to the
    /// built-in default class.
    pub fn class_for_host(&self, host: &str) -> ClassBlock {
        self.classes
            .iter()
            .find(|c| crate::state::wildcard::match_mask(&c.host, host))
            .cloned()
            .unwrap_or_default()
    }

    /// Look up the list-mode cap for a channel name.
    pub fn list_limit_for(&self, channel: &str) -> usize {
        self.ban_limits
            .iter()
            .find(|b| crate::state::wildcard::match_mask(&b.pattern, channel))
            .map(|b| b.limit)
            .unwrap_or(defaults::DEFAULT_LIST_LIMIT)
    }

    /// Find the permissions string for an oper type name.
    pub fn oper_type_perms(&self, name: &str) -> Option<&str> {
        self.oper_types
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.perms.as_str())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(reason) = &self.die {
            return Err(ConfigError::Die(reason.clone()));
        }
        if self.server.name.is_empty() || !self.server.name.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "server name {:?} must contain a dot",
                self.server.name
            )));
        }
        if !is_valid_sid(&self.server.sid) {
            return Err(ConfigError::Invalid(format!(
                "server sid {:?} must be a digit followed by two digits or uppercase letters",
                self.server.sid
            )));
        }
        if CaseMapping::from_name(&self.case_mapping).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown case_mapping {:?}",
                self.case_mapping
            )));
        }
        for link in &self.links {
            if link.name.is_empty() || link.sendpass.is_empty() || link.recvpass.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "link block {:?} needs name, sendpass and recvpass",
                    link.name
                )));
            }
        }
        for oper in &self.opers {
            if self.oper_type_perms(&oper.oper_type).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "oper {:?} references unknown oper_type {:?}",
                    oper.name, oper.oper_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        name = "hub.example.net"
        sid = "1AB"
        description = "example hub"
        network = "ExampleNet"

        [[port]]
        ip = "0.0.0.0"
        port = 6667
    "#;

    #[test]
    fn test_minimal_config_parses() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.sid, "1AB");
        assert_eq!(config.ports.len(), 1);
        assert_eq!(config.ports[0].kind, PortKind::Clients);
        assert_eq!(config.case_mapping(), CaseMapping::Rfc1459);
        assert_eq!(config.max_targets, 20);
    }

    #[test]
    fn test_bad_sid_rejected() {
        let text = MINIMAL.replace("1AB", "AB1");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_die_tag_rejected() {
        let text = format!("die = \"do not run this config\"\n{MINIMAL}");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Die(_))));
    }

    #[test]
    fn test_oper_requires_known_type() {
        let text = format!(
            r#"{MINIMAL}
            [[oper]]
            name = "root"
            hash = "00"
            host = "*@*"
            oper_type = "netadmin"
            "#
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_list_limit_pattern() {
        let text = format!(
            r##"{MINIMAL}
            [[ban_limit]]
            pattern = "#big*"
            limit = 128
            "##
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert_eq!(config.list_limit_for("#bigroom"), 128);
        assert_eq!(config.list_limit_for("#other"), 64);
    }
}
