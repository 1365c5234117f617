//! Network ban records.
//!
//! Five kinds share one store: G (global user@host), K (local user@host),
//! Z (IP address or CIDR), Q (nick mask), E (exemption). E-lines shadow
//! G/K/Z at match time; Q-lines are consulted whenever a nick is set.

use std::net::IpAddr;

use ipnet::IpNet;

use alder_proto::CaseMapping;

use crate::state::wildcard::match_mask_cm;

/// The ban-record kinds, by their traditional letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XLineKind {
    GLine,
    KLine,
    ZLine,
    QLine,
    ELine,
}

impl XLineKind {
    pub fn letter(self) -> char {
        match self {
            Self::GLine => 'G',
            Self::KLine => 'K',
            Self::ZLine => 'Z',
            Self::QLine => 'Q',
            Self::ELine => 'E',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'G' => Some(Self::GLine),
            'K' => Some(Self::KLine),
            'Z' => Some(Self::ZLine),
            'Q' => Some(Self::QLine),
            'E' => Some(Self::ELine),
            _ => None,
        }
    }

    /// Whether records of this kind propagate to peers.
    pub fn global(self) -> bool {
        !matches!(self, Self::KLine)
    }
}

/// One ban record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLine {
    pub kind: XLineKind,
    pub mask: String,
    pub reason: String,
    pub setter: String,
    pub set_ts: i64,
    /// Seconds of validity; 0 is permanent.
    pub duration: u64,
}

impl XLine {
    pub fn expired(&self, now: i64) -> bool {
        self.duration != 0 && now >= self.set_ts + self.duration as i64
    }
}

/// The central ban store.
#[derive(Debug, Default)]
pub struct XLineStore {
    lines: Vec<XLine>,
}

impl XLineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; duplicates (same kind and mask) are replaced so a
    /// re-add refreshes the reason and expiry.
    pub fn add(&mut self, line: XLine) {
        self.lines
            .retain(|l| !(l.kind == line.kind && l.mask.eq_ignore_ascii_case(&line.mask)));
        self.lines.push(line);
    }

    /// Remove by kind and mask. True if something was removed.
    pub fn remove(&mut self, kind: XLineKind, mask: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|l| !(l.kind == kind && l.mask.eq_ignore_ascii_case(mask)));
        self.lines.len() != before
    }

    /// Drop expired records, returning how many went away.
    pub fn expire(&mut self, now: i64) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| !l.expired(now));
        before - self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &XLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn first_match<'a>(
        &'a self,
        kind: XLineKind,
        now: i64,
        pred: impl Fn(&XLine) -> bool,
    ) -> Option<&'a XLine> {
        self.lines
            .iter()
            .find(|l| l.kind == kind && !l.expired(now) && pred(l))
    }

    /// Whether an E-line exempts this `user@host`.
    fn exempted(&self, cm: CaseMapping, user_at_host: &str, now: i64) -> bool {
        self.first_match(XLineKind::ELine, now, |l| {
            match_mask_cm(cm, &l.mask, user_at_host)
        })
        .is_some()
    }

    /// The ban that denies a connecting or existing user, if any.
    ///
    /// Checks Z against the IP, then G and K against `ident@host`, with
    /// E-line shadowing applied to all three.
    pub fn check_user<'a>(
        &'a self,
        cm: CaseMapping,
        user_at_host: &str,
        ip: &str,
        now: i64,
    ) -> Option<&'a XLine> {
        if self.exempted(cm, user_at_host, now) {
            return None;
        }
        if let Some(z) = self.first_match(XLineKind::ZLine, now, |l| ip_matches(&l.mask, ip)) {
            return Some(z);
        }
        for kind in [XLineKind::GLine, XLineKind::KLine] {
            if let Some(l) = self.first_match(kind, now, |l| {
                match_mask_cm(cm, &l.mask, user_at_host)
            }) {
                return Some(l);
            }
        }
        None
    }

    /// The Q-line forbidding this nick, if any.
    pub fn check_nick<'a>(&'a self, cm: CaseMapping, nick: &str, now: i64) -> Option<&'a XLine> {
        self.first_match(XLineKind::QLine, now, |l| match_mask_cm(cm, &l.mask, nick))
    }
}

/// Z-line masks are an IP, a CIDR block, or a wildcard pattern.
fn ip_matches(mask: &str, ip: &str) -> bool {
    if let (Ok(net), Ok(addr)) = (mask.parse::<IpNet>(), ip.parse::<IpAddr>()) {
        return net.contains(&addr);
    }
    if let (Ok(mask_ip), Ok(addr)) = (mask.parse::<IpAddr>(), ip.parse::<IpAddr>()) {
        return mask_ip == addr;
    }
    match_mask_cm(CaseMapping::Ascii, mask, ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gline(mask: &str) -> XLine {
        XLine {
            kind: XLineKind::GLine,
            mask: mask.to_string(),
            reason: "no".to_string(),
            setter: "oper".to_string(),
            set_ts: 1000,
            duration: 0,
        }
    }

    #[test]
    fn test_gline_matches_user() {
        let mut store = XLineStore::new();
        store.add(gline("*@*.bad.example"));
        let cm = CaseMapping::Rfc1459;
        assert!(store
            .check_user(cm, "ident@host.bad.example", "10.0.0.1", 2000)
            .is_some());
        assert!(store
            .check_user(cm, "ident@good.example", "10.0.0.1", 2000)
            .is_none());
    }

    #[test]
    fn test_eline_shadows_gline() {
        let mut store = XLineStore::new();
        store.add(gline("*@*.bad.example"));
        store.add(XLine {
            kind: XLineKind::ELine,
            mask: "ident@*.bad.example".to_string(),
            ..gline("unused")
        });
        let cm = CaseMapping::Rfc1459;
        assert!(store
            .check_user(cm, "ident@host.bad.example", "10.0.0.1", 2000)
            .is_none());
        assert!(store
            .check_user(cm, "other@host.bad.example", "10.0.0.1", 2000)
            .is_some());
    }

    #[test]
    fn test_zline_cidr_and_exact() {
        let mut store = XLineStore::new();
        store.add(XLine {
            kind: XLineKind::ZLine,
            mask: "10.1.0.0/16".to_string(),
            ..gline("unused")
        });
        let cm = CaseMapping::Rfc1459;
        assert!(store.check_user(cm, "a@b", "10.1.2.3", 2000).is_some());
        assert!(store.check_user(cm, "a@b", "10.2.2.3", 2000).is_none());
    }

    #[test]
    fn test_qline_checks_nick() {
        let mut store = XLineStore::new();
        store.add(XLine {
            kind: XLineKind::QLine,
            mask: "*Serv".to_string(),
            ..gline("unused")
        });
        let cm = CaseMapping::Rfc1459;
        assert!(store.check_nick(cm, "NickServ", 2000).is_some());
        assert!(store.check_nick(cm, "alice", 2000).is_none());
    }

    #[test]
    fn test_expiry() {
        let mut store = XLineStore::new();
        store.add(XLine {
            duration: 60,
            ..gline("*@temp.example")
        });
        let cm = CaseMapping::Rfc1459;
        assert!(store.check_user(cm, "a@temp.example", "1.1.1.1", 1030).is_some());
        assert!(store.check_user(cm, "a@temp.example", "1.1.1.1", 1060).is_none());
        assert_eq!(store.expire(1060), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_re_add_replaces() {
        let mut store = XLineStore::new();
        store.add(gline("*@x"));
        store.add(XLine {
            reason: "updated".to_string(),
            ..gline("*@X")
        });
        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().next().unwrap().reason, "updated");
    }
}
