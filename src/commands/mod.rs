//! Client command dispatch.
//!
//! A registry maps verb names to handlers plus gating metadata. Dispatch
//! enforces registration and parameter requirements, runs the pre/post
//! command hooks, expands comma-separated target lists, and routes
//! successful state-changing commands to peers under the user's UID.

mod channels;
pub mod helpers;
mod messaging;
mod modes_cmd;
pub(crate) mod oper;
mod queries;
pub mod registration;

use std::collections::HashMap;

use alder_proto::Message;

use crate::error::CommandError;
use crate::hooks::{self, HookEvent, HookPoint, HookVerdict};
use crate::state::{Network, UserId};

/// Terminal result of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdOutcome {
    Success,
    Failure,
    /// Parameters were syntactically unusable; treated as failure without
    /// further routing.
    Invalid,
    /// The handler destroyed the invoking user (QUIT, fatal kill).
    UserDeleted,
}

pub type CmdResult = Result<CmdOutcome, CommandError>;

pub type CommandFn = fn(&mut Network, UserId, &Message) -> CmdResult;

/// Metadata and handler for one verb.
pub struct CommandDef {
    pub name: &'static str,
    pub min_params: usize,
    pub requires_registration: bool,
    pub oper_only: bool,
    /// Re-invoke per comma-separated element of parameter 0.
    pub loop_targets: bool,
    /// JOIN-style second list (keys) aligned with the targets.
    pub loop_keys: bool,
    /// Broadcast the original line to all peers on success.
    pub broadcast: bool,
    pub handler: CommandFn,
}

impl CommandDef {
    /// A plain registered-users-only command with no list expansion.
    pub const fn simple(name: &'static str, min_params: usize, handler: CommandFn) -> Self {
        Self {
            name,
            min_params,
            requires_registration: true,
            oper_only: false,
            loop_targets: false,
            loop_keys: false,
            broadcast: false,
            handler,
        }
    }
}

/// The verb table.
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandDef>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registration::register(&mut registry);
        channels::register(&mut registry);
        messaging::register(&mut registry);
        modes_cmd::register(&mut registry);
        queries::register(&mut registry);
        oper::register(&mut registry);
        registry
    }

    pub fn add(&mut self, def: CommandDef) {
        self.commands.insert(def.name, def);
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.commands.get(name)
    }
}

/// Dispatch one parsed line from a local connection.
pub fn dispatch(
    registry: &CommandRegistry,
    net: &mut Network,
    user: UserId,
    msg: &Message,
) -> CmdOutcome {
    net.sample_clock();
    if net.users.get(user).is_none() {
        return CmdOutcome::UserDeleted;
    }
    if let Some(local) = net.users[user].local.as_mut() {
        local.last_activity = net.now;
        local.awaiting_pong = false;
    }

    let name = msg.command.clone();
    let disabled = net
        .config
        .disabled_commands
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&name));
    let Some(def) = (if disabled { None } else { registry.get(&name) }) else {
        reply_err(net, user, &CommandError::UnknownCommand(name));
        return CmdOutcome::Failure;
    };

    if def.requires_registration && !net.users[user].registered {
        reply_err(net, user, &CommandError::NotRegistered);
        return CmdOutcome::Failure;
    }
    if msg.params.len() < def.min_params {
        reply_err(net, user, &CommandError::NeedMoreParams(name));
        return CmdOutcome::Failure;
    }
    if def.oper_only && !net.users[user].modes.oper {
        reply_err(net, user, &CommandError::NoPrivileges);
        return CmdOutcome::Failure;
    }

    let event = HookEvent {
        user: Some(user),
        command: Some(&name),
        ..Default::default()
    };
    if hooks::predicate(net, HookPoint::PreCommand, &event) == HookVerdict::Deny {
        return CmdOutcome::Failure;
    }

    let outcome = invoke(def, net, user, msg);

    if outcome == CmdOutcome::Success {
        let event = HookEvent {
            user: Some(user),
            command: Some(&name),
            ..Default::default()
        };
        hooks::notify(net, HookPoint::PostCommand, &event);
    }
    outcome
}

/// Re-emit a successful command to every peer under the user's UID.
fn route_to_peers(net: &mut Network, user: UserId, msg: &Message) {
    let Some(u) = net.users.get(user) else { return };
    if !u.registered {
        return;
    }
    let routed = Message {
        prefix: Some(u.uid.clone()),
        command: msg.command.clone(),
        params: msg.params.clone(),
    };
    net.broadcast_to_peers(&routed.to_string(), None);
}

/// Run the handler, expanding comma lists when the verb asks for it.
fn invoke(def: &CommandDef, net: &mut Network, user: UserId, msg: &Message) -> CmdOutcome {
    if !def.loop_targets || msg.params.is_empty() || !msg.params[0].contains(',') {
        let result = (def.handler)(net, user, msg);
        let outcome = settle(net, user, result);
        if outcome == CmdOutcome::Success && def.broadcast {
            route_to_peers(net, user, msg);
        }
        return outcome;
    }

    let targets: Vec<String> = msg.params[0]
        .split(',')
        .filter(|t| !t.is_empty())
        .take(net.config.max_targets)
        .map(str::to_string)
        .collect();
    let keys: Vec<&str> = if def.loop_keys {
        msg.params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let mut overall = CmdOutcome::Success;
    for (i, target) in targets.iter().enumerate() {
        let mut params = msg.params.clone();
        params[0] = target.clone();
        if def.loop_keys {
            if let Some(slot) = params.get_mut(1) {
                *slot = keys.get(i).copied().unwrap_or_default().to_string();
            }
        }
        let sub = Message {
            prefix: msg.prefix.clone(),
            command: msg.command.clone(),
            params,
        };
        let result = (def.handler)(net, user, &sub);
        match settle(net, user, result) {
            CmdOutcome::UserDeleted => return CmdOutcome::UserDeleted,
            CmdOutcome::Invalid => return CmdOutcome::Invalid,
            CmdOutcome::Failure => overall = CmdOutcome::Failure,
            CmdOutcome::Success => {
                if def.broadcast {
                    route_to_peers(net, user, &sub);
                }
            }
        }
    }
    overall
}

/// Convert handler errors into their numeric replies.
fn settle(net: &mut Network, user: UserId, result: CmdResult) -> CmdOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            reply_err(net, user, &err);
            CmdOutcome::Failure
        }
    }
}

fn reply_err(net: &mut Network, user: UserId, err: &CommandError) {
    let Some(u) = net.users.get(user) else { return };
    let reply = err.to_reply(&net.config.server.name.clone(), u.reply_nick());
    net.send_to_user(user, &reply.to_string());
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::tests::test_config;
    use crate::network::sendq::{WireReceiver, WireSender};

    pub(crate) fn client(net: &mut Network) -> (UserId, WireReceiver) {
        let (tx, rx) = WireSender::new(262_144);
        let id = net.create_local_user(
            tx,
            Default::default(),
            "127.0.0.1".into(),
            "localhost".into(),
        );
        (id, rx)
    }

    pub(crate) fn drain(rx: &mut WireReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_unknown_command_421() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);
        let msg: Message = "BOGUSVERB x".parse().unwrap();
        let outcome = dispatch(&registry, &mut net, user, &msg);
        assert_eq!(outcome, CmdOutcome::Failure);
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 421 "), "{lines:?}");
    }

    #[test]
    fn test_unregistered_gate_451() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);
        let msg: Message = "JOIN #c".parse().unwrap();
        dispatch(&registry, &mut net, user, &msg);
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 451 "), "{lines:?}");
    }

    #[test]
    fn test_min_params_461() {
        let registry = CommandRegistry::new();
        let mut net = Network::new(test_config());
        let (user, mut rx) = client(&mut net);
        net.users[user].registered = true;
        net.set_nick(user, "alice", 1);
        let msg: Message = "JOIN".parse().unwrap();
        dispatch(&registry, &mut net, user, &msg);
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 461 alice JOIN "), "{lines:?}");
    }

    #[test]
    fn test_disabled_command_421() {
        let text = r#"
            disabled_commands = ["LIST"]

            [server]
            name = "hub.example.net"
            sid = "1AB"
            description = "d"
            network = "n"
        "#;
        let config = std::sync::Arc::new(toml::from_str(text).unwrap());
        let registry = CommandRegistry::new();
        let mut net = Network::new(config);
        let (user, mut rx) = client(&mut net);
        net.users[user].registered = true;
        net.set_nick(user, "alice", 1);
        let msg: Message = "LIST".parse().unwrap();
        dispatch(&registry, &mut net, user, &msg);
        let lines = drain(&mut rx);
        assert!(lines[0].contains(" 421 "), "{lines:?}");
    }
}
