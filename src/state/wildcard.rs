//! Wildcard mask matching.
//!
//! Masks use `*` (any run) and `?` (any single byte). Matching is
//! case-insensitive under a case mapping; ban masks fold with the network
//! mapping, config host patterns with plain ASCII.

use alder_proto::CaseMapping;

/// Match `subject` against `mask` under the given case mapping.
pub fn match_mask_cm(cm: CaseMapping, mask: &str, subject: &str) -> bool {
    let mask = mask.as_bytes();
    let subject = subject.as_bytes();

    // Iterative glob with single-star backtracking.
    let (mut m, mut s) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while s < subject.len() {
        if m < mask.len()
            && (mask[m] == b'?' || cm.fold_byte(mask[m]) == cm.fold_byte(subject[s]))
        {
            m += 1;
            s += 1;
        } else if m < mask.len() && mask[m] == b'*' {
            star = Some((m, s));
            m += 1;
        } else if let Some((sm, ss)) = star {
            m = sm + 1;
            s = ss + 1;
            star = Some((sm, ss + 1));
        } else {
            return false;
        }
    }
    while m < mask.len() && mask[m] == b'*' {
        m += 1;
    }
    m == mask.len()
}

/// ASCII case-insensitive match; used for config patterns.
pub fn match_mask(mask: &str, subject: &str) -> bool {
    match_mask_cm(CaseMapping::Ascii, mask, subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_case() {
        assert!(match_mask("abc", "ABC"));
        assert!(!match_mask("abc", "abd"));
    }

    #[test]
    fn test_question_mark() {
        assert!(match_mask("a?c", "abc"));
        assert!(!match_mask("a?c", "ac"));
    }

    #[test]
    fn test_star() {
        assert!(match_mask("*", "anything"));
        assert!(match_mask("*!*@*.example.com", "nick!user@irc.example.com"));
        assert!(!match_mask("*!*@*.example.com", "nick!user@example.org"));
        assert!(match_mask("a*b*c", "aXXbYYc"));
        assert!(!match_mask("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_empty() {
        assert!(match_mask("", ""));
        assert!(match_mask("*", ""));
        assert!(!match_mask("?", ""));
    }

    #[test]
    fn test_rfc1459_fold_in_bans() {
        assert!(match_mask_cm(
            CaseMapping::Rfc1459,
            "nick[1]!*@*",
            "NICK{1}!user@host"
        ));
    }
}
