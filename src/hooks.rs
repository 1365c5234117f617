//! Hook dispatch.
//!
//! Behavior extensions (cloaking, filters, overrides, services glue)
//! subscribe to a fixed set of event kinds at a priority. Predicate hooks
//! return a tri-valued verdict: explicit-allow short-circuits the rest of
//! the chain, pass defers, deny stops the operation. Notification hooks
//! all run to completion. Subscribers must tolerate re-entry: a hook may
//! trigger operations that fire further hooks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::state::{ChannelId, Network, UserId};

/// The event kinds the core fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before dispatching any command; deny swallows it.
    PreCommand,
    /// After a command succeeds.
    PostCommand,
    /// A local user finished registering and has been welcomed.
    UserConnect,
    /// All registration requirements met, about to welcome; deny defers
    /// (pre-registration collaborators re-fire the attempt).
    UserRegister,
    /// A user is gone (local or remote).
    UserQuit,
    /// Before a local join is permitted; deny rejects with the usual numeric.
    PreJoin,
    /// A join has been committed.
    UserJoin,
    /// A part has been committed.
    UserPart,
    /// Before a PRIVMSG/NOTICE is delivered; deny drops it.
    PreMessage,
    /// Before a local nick change; deny rejects.
    PreNickChange,
    /// A nick change has been committed.
    NickChange,
    /// Extra ban checks during join and message delivery.
    CheckBan,
    /// An oper attempted something their membership rank would forbid;
    /// allow grants the override.
    OperOverride,
    /// A peer link has finished bursting.
    SyncNetwork,
}

/// Tri-valued predicate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Permit and skip remaining subscribers.
    Allow,
    /// No opinion.
    Pass,
    /// Refuse and stop.
    Deny,
}

/// Event payload; fields are filled as applicable per hook point.
#[derive(Debug, Default, Clone, Copy)]
pub struct HookEvent<'a> {
    pub user: Option<UserId>,
    pub channel: Option<ChannelId>,
    pub command: Option<&'a str>,
    pub text: Option<&'a str>,
}

/// A behavior extension.
pub trait HookSubscriber: Send + Sync {
    fn on_event(
        &self,
        net: &mut Network,
        point: HookPoint,
        event: &HookEvent<'_>,
    ) -> HookVerdict;
}

type SubscriberList = Vec<(i32, Arc<dyn HookSubscriber>)>;

/// The hook registry.
#[derive(Default)]
pub struct Hooks {
    subscribers: RwLock<HashMap<HookPoint, SubscriberList>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a hook point. Lower priority runs earlier.
    pub fn subscribe(&self, point: HookPoint, priority: i32, sub: Arc<dyn HookSubscriber>) {
        let mut map = self.subscribers.write().expect("hook registry poisoned");
        let list = map.entry(point).or_default();
        list.push((priority, sub));
        list.sort_by_key(|(p, _)| *p);
    }

    fn snapshot(&self, point: HookPoint) -> SubscriberList {
        self.subscribers
            .read()
            .expect("hook registry poisoned")
            .get(&point)
            .cloned()
            .unwrap_or_default()
    }

    /// Run a predicate chain.
    pub fn run_predicate(
        &self,
        net: &mut Network,
        point: HookPoint,
        event: &HookEvent<'_>,
    ) -> HookVerdict {
        for (_, sub) in self.snapshot(point) {
            match sub.on_event(net, point, event) {
                HookVerdict::Allow => return HookVerdict::Allow,
                HookVerdict::Deny => return HookVerdict::Deny,
                HookVerdict::Pass => {}
            }
        }
        HookVerdict::Pass
    }

    /// Run a notification chain; verdicts are ignored.
    pub fn run_notify(&self, net: &mut Network, point: HookPoint, event: &HookEvent<'_>) {
        for (_, sub) in self.snapshot(point) {
            let _ = sub.on_event(net, point, event);
        }
    }
}

/// Convenience for firing a predicate through the registry an operation is
/// already borrowing from.
pub fn predicate(net: &mut Network, point: HookPoint, event: &HookEvent<'_>) -> HookVerdict {
    let hooks = net.hooks.clone();
    hooks.run_predicate(net, point, event)
}

/// Convenience for firing a notification.
pub fn notify(net: &mut Network, point: HookPoint, event: &HookEvent<'_>) {
    let hooks = net.hooks.clone();
    hooks.run_notify(net, point, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(HookVerdict, Arc<AtomicUsize>);

    impl HookSubscriber for Fixed {
        fn on_event(
            &self,
            _net: &mut Network,
            _point: HookPoint,
            _event: &HookEvent<'_>,
        ) -> HookVerdict {
            self.1.fetch_add(1, Ordering::Relaxed);
            self.0
        }
    }

    #[test]
    fn test_predicate_deny_stops_chain() {
        let mut net = Network::new(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks = net.hooks.clone();
        hooks.subscribe(
            HookPoint::PreJoin,
            10,
            Arc::new(Fixed(HookVerdict::Deny, calls.clone())),
        );
        hooks.subscribe(
            HookPoint::PreJoin,
            20,
            Arc::new(Fixed(HookVerdict::Pass, calls.clone())),
        );
        let verdict = predicate(&mut net, HookPoint::PreJoin, &HookEvent::default());
        assert_eq!(verdict, HookVerdict::Deny);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_predicate_allow_short_circuits() {
        let mut net = Network::new(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks = net.hooks.clone();
        hooks.subscribe(
            HookPoint::CheckBan,
            5,
            Arc::new(Fixed(HookVerdict::Allow, calls.clone())),
        );
        hooks.subscribe(
            HookPoint::CheckBan,
            6,
            Arc::new(Fixed(HookVerdict::Deny, calls.clone())),
        );
        let verdict = predicate(&mut net, HookPoint::CheckBan, &HookEvent::default());
        assert_eq!(verdict, HookVerdict::Allow);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_notify_runs_all() {
        let mut net = Network::new(test_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let hooks = net.hooks.clone();
        for priority in [3, 1, 2] {
            hooks.subscribe(
                HookPoint::UserQuit,
                priority,
                Arc::new(Fixed(HookVerdict::Deny, calls.clone())),
            );
        }
        notify(&mut net, HookPoint::UserQuit, &HookEvent::default());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
