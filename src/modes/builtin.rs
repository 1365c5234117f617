//! Built-in mode letters.
//!
//! Channel: `i m n p s t` flags, `k` key, `l` limit, `b e I` lists, and
//! the status modes `q a o v` (plus `h` when halfop is enabled).
//! User: `i w` flags, `o` oper (grantable only through OPER), `s` snomasks.

use crate::config::Config;
use crate::error::CommandError;
use crate::state::Network;

use super::{canonicalize_mask, ModeDef, ModeKind, ModeRequest, ModeVerdict};

pub fn register_all(registry: &mut super::ModeRegistry, config: &Config) {
    for letter in ['i', 'm', 'n', 'p', 's', 't'] {
        registry.register(flag(ModeKind::Channel, letter));
    }

    registry.register(ModeDef {
        letter: 'k',
        kind: ModeKind::Channel,
        param_on_add: true,
        param_on_remove: true,
        list_mode: false,
        prefix: None,
        handler: key_handler,
    });
    registry.register(ModeDef {
        letter: 'l',
        kind: ModeKind::Channel,
        param_on_add: true,
        param_on_remove: false,
        list_mode: false,
        prefix: None,
        handler: limit_handler,
    });

    for letter in ['b', 'e', 'I'] {
        registry.register(ModeDef {
            letter,
            kind: ModeKind::Channel,
            param_on_add: true,
            param_on_remove: true,
            list_mode: true,
            prefix: None,
            handler: list_mask_handler,
        });
    }

    let mut status = vec![('q', '~', 50_000u32), ('a', '&', 40_000), ('o', '@', 30_000)];
    if config.enable_halfop {
        status.push(('h', '%', 20_000));
    }
    status.push(('v', '+', 10_000));
    for (letter, prefix, rank) in status {
        registry.register(ModeDef {
            letter,
            kind: ModeKind::Channel,
            param_on_add: true,
            param_on_remove: true,
            list_mode: false,
            prefix: Some((prefix, rank)),
            handler: status_handler,
        });
    }

    for letter in ['i', 'w'] {
        registry.register(flag(ModeKind::User, letter));
    }
    registry.register(ModeDef {
        letter: 'o',
        kind: ModeKind::User,
        param_on_add: false,
        param_on_remove: false,
        list_mode: false,
        prefix: None,
        handler: oper_flag_handler,
    });
    registry.register(ModeDef {
        letter: 's',
        kind: ModeKind::User,
        param_on_add: true,
        param_on_remove: false,
        list_mode: false,
        prefix: None,
        handler: snomask_handler,
    });
}

fn flag(kind: ModeKind, letter: char) -> ModeDef {
    ModeDef {
        letter,
        kind,
        param_on_add: false,
        param_on_remove: false,
        list_mode: false,
        prefix: None,
        handler: allow_handler,
    }
}

fn allow_handler(_net: &mut Network, _req: &ModeRequest) -> ModeVerdict {
    ModeVerdict::Allow(None)
}

/// Keys may not contain separators the wire grammar would eat.
fn key_handler(_net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    if !req.adding {
        return ModeVerdict::Allow(None);
    }
    let key: String = req
        .param
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|&c| c != ' ' && c != ':' && c != ',')
        .take(32)
        .collect();
    if key.is_empty() {
        return ModeVerdict::Deny(None);
    }
    ModeVerdict::Allow(Some(key))
}

/// Limits are positive integers, canonicalized to their decimal form.
fn limit_handler(_net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    if !req.adding {
        return ModeVerdict::Allow(None);
    }
    match req.param.as_deref().unwrap_or_default().parse::<u32>() {
        Ok(n) if n > 0 => ModeVerdict::Allow(Some(n.to_string())),
        _ => ModeVerdict::Deny(None),
    }
}

fn list_mask_handler(_net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    let mask = req.param.as_deref().unwrap_or_default();
    if mask.is_empty() {
        return ModeVerdict::Deny(None);
    }
    ModeVerdict::Allow(Some(canonicalize_mask(mask)))
}

/// Status changes need the target on the channel.
fn status_handler(net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    let (Some(chan_id), Some(target)) = (req.channel, req.target_user) else {
        return ModeVerdict::Deny(None);
    };
    let chan = &net.channels[chan_id];
    if !chan.members.contains_key(&target) {
        let nick = net.users[target].nick.clone();
        return ModeVerdict::Deny(Some(CommandError::UserNotInChannel(
            nick,
            chan.name.clone(),
        )));
    }
    // Canonical parameter is the target's current nick.
    ModeVerdict::Allow(Some(net.users[target].nick.clone()))
}

/// `+o` is granted by OPER, never by MODE; `-o` de-opers.
fn oper_flag_handler(_net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    if req.adding {
        ModeVerdict::Deny(None)
    } else {
        ModeVerdict::Allow(None)
    }
}

/// `+s` merges snomask letters; `-s` clears the subscription.
fn snomask_handler(net: &mut Network, req: &ModeRequest) -> ModeVerdict {
    if !req.adding {
        return ModeVerdict::Allow(None);
    }
    let Some(target) = req.target_user else {
        return ModeVerdict::Deny(None);
    };
    if !net.users[target].modes.oper {
        return ModeVerdict::Deny(None);
    }
    let letters: String = req
        .param
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return ModeVerdict::Deny(None);
    }
    ModeVerdict::Allow(Some(letters))
}
