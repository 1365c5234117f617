//! Nickname collision arbitration.
//!
//! When a remote introduction claims a nick that is already bound, both
//! sides of the network must reach the same verdict from the same inputs:
//! the two nick timestamps and whether the two identities share a
//! `user@host`. The loser (or both, on a tie) is killed.

use crate::commands::helpers;
use crate::link::wire;
use crate::state::{Network, ServerId, UserId};

/// Who dies. "Remote" is the user being introduced, "local" the one
/// already bound here (which may itself be remote to us; the rules only
/// care about introduction order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    KillLocal,
    KillRemote,
    KillBoth,
}

/// The arbitration table. Symmetric: swapping the two sides and flipping
/// the verdict yields the same outcome everywhere.
pub fn decide(new_ts: i64, old_ts: i64, same_userhost: bool) -> Collision {
    use std::cmp::Ordering::*;
    match (same_userhost, new_ts.cmp(&old_ts)) {
        (_, Equal) => Collision::KillBoth,
        (true, Less) => Collision::KillLocal,
        (true, Greater) => Collision::KillRemote,
        (false, Greater) => Collision::KillLocal,
        (false, Less) => Collision::KillRemote,
    }
}

/// Resolve a collision between an existing binding and an incoming claim.
///
/// Returns true when the incoming user may proceed (the existing binding
/// is gone). `arrival` is the direct peer the claim came from; a
/// kill-remote goes back down that link only, while the existing user's
/// removal is local-only (every other server applies the same table to
/// the same broadcast introduction).
pub fn resolve(
    net: &mut Network,
    existing: UserId,
    new_uid: &str,
    new_ts: i64,
    new_userhost: &str,
    arrival: ServerId,
) -> bool {
    let old_ts = net.users[existing].nick_ts;
    let same = {
        let existing_uh = net.users[existing].id_and_host();
        net.casemap.eq(&existing_uh, new_userhost)
    };
    let verdict = decide(new_ts, old_ts, same);

    let nick = net.users[existing].nick.clone();
    net.snomask(
        'k',
        &format!("Nick collision on {} ({:?})", nick, verdict),
    );

    if matches!(verdict, Collision::KillRemote | Collision::KillBoth) {
        let sid = net.server_sid().to_string();
        let line = wire::kill(&sid, new_uid, "Nickname collision");
        net.send_to_peer(arrival, &line);
    }
    if matches!(verdict, Collision::KillLocal | Collision::KillBoth) {
        helpers::quit_user(net, existing, "Nickname collision", false, None);
    }
    matches!(verdict, Collision::KillLocal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_same_userhost() {
        // Same identity: the older signon is the reconnect survivor.
        assert_eq!(decide(900, 1000, true), Collision::KillLocal);
        assert_eq!(decide(1000, 900, true), Collision::KillRemote);
        assert_eq!(decide(1000, 1000, true), Collision::KillBoth);
    }

    #[test]
    fn test_table_different_userhost() {
        // Different identity: the older claim keeps the nick.
        assert_eq!(decide(1000, 900, false), Collision::KillLocal);
        assert_eq!(decide(900, 1000, false), Collision::KillRemote);
        assert_eq!(decide(500, 500, false), Collision::KillBoth);
    }

    #[test]
    fn test_symmetry() {
        // Evaluating either side of the same collision kills the same
        // user(s).
        for same in [true, false] {
            for (a, b) in [(900i64, 1000i64), (1000, 900), (700, 700)] {
                let here = decide(a, b, same);
                let there = decide(b, a, same);
                let flipped = match there {
                    Collision::KillLocal => Collision::KillRemote,
                    Collision::KillRemote => Collision::KillLocal,
                    Collision::KillBoth => Collision::KillBoth,
                };
                assert_eq!(here, flipped, "asymmetric for ts {a}/{b} same={same}");
            }
        }
    }
}
