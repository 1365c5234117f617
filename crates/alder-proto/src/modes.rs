//! Mode-string handling.
//!
//! A mode change arrives as a letter string (`+ov-b`) followed by
//! whitespace-separated parameters consumed left to right by the letters
//! that take one. Which letters take a parameter depends on the daemon's
//! mode registry, so the parser is driven by a caller-supplied arity
//! predicate rather than a baked-in table.
//!
//! The [`ModeStacker`] does the reverse: it accumulates deltas and emits
//! packed `+ab-c x y` strings with correct sign transitions, honoring a
//! per-line mode cap and the 512-byte line budget.

use crate::MAX_LINE_LEN;

/// One mode toggle, with its consumed parameter if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDelta {
    pub adding: bool,
    pub letter: char,
    pub param: Option<String>,
}

impl ModeDelta {
    pub fn new(adding: bool, letter: char, param: Option<impl Into<String>>) -> Self {
        Self {
            adding,
            letter,
            param: param.map(Into::into),
        }
    }
}

/// Parse a mode string plus parameter tail into a delta stream.
///
/// `takes_param(letter, adding)` reports whether the letter consumes a
/// parameter in that direction. A letter that wants a parameter but finds
/// none is emitted with `param: None`; the daemon decides whether that is a
/// list query or an error. Unknown letters are the daemon's problem too:
/// everything is passed through.
pub fn parse_mode_string<F>(
    modes: &str,
    params: &[&str],
    mut takes_param: F,
) -> Vec<ModeDelta>
where
    F: FnMut(char, bool) -> bool,
{
    let mut deltas = Vec::new();
    let mut adding = true;
    let mut args = params.iter();

    for c in modes.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            _ => {
                let param = if takes_param(c, adding) {
                    args.next().map(|s| s.to_string())
                } else {
                    None
                };
                deltas.push(ModeDelta {
                    adding,
                    letter: c,
                    param,
                });
            }
        }
    }
    deltas
}

/// Accumulates mode deltas and emits packed lines.
///
/// Used for the client-facing `MODE` echo and for `FMODE` propagation; the
/// caller supplies whatever fixed prefix (`MODE #chan` / `FMODE #chan <ts>`)
/// the packed string will follow, as a byte budget.
#[derive(Debug)]
pub struct ModeStacker {
    max_per_line: usize,
    deltas: Vec<ModeDelta>,
}

impl ModeStacker {
    pub fn new(max_per_line: usize) -> Self {
        Self {
            max_per_line,
            deltas: Vec::new(),
        }
    }

    pub fn push(&mut self, delta: ModeDelta) {
        self.deltas.push(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Drain into packed strings, each at most `max_per_line` modes and
    /// fitting in a line once `overhead` bytes of command framing are added.
    pub fn flush(&mut self, overhead: usize) -> Vec<String> {
        let budget = MAX_LINE_LEN.saturating_sub(overhead + 2);
        let mut lines = Vec::new();
        let mut letters = String::new();
        let mut params: Vec<String> = Vec::new();
        let mut count = 0usize;
        let mut sign: Option<bool> = None;

        let assemble = |letters: &str, params: &[String]| -> String {
            let mut s = String::from(letters);
            for p in params {
                s.push(' ');
                s.push_str(p);
            }
            s
        };

        for delta in self.deltas.drain(..) {
            let sign_cost = if sign == Some(delta.adding) { 0 } else { 1 };
            let param_cost = delta.param.as_ref().map_or(0, |p| p.len() + 1);
            let line_len = letters.len()
                + params.iter().map(|p| p.len() + 1).sum::<usize>();

            if count >= self.max_per_line
                || (count > 0 && line_len + sign_cost + 1 + param_cost > budget)
            {
                lines.push(assemble(&letters, &params));
                letters.clear();
                params.clear();
                count = 0;
                sign = None;
            }

            if sign != Some(delta.adding) {
                letters.push(if delta.adding { '+' } else { '-' });
                sign = Some(delta.adding);
            }
            letters.push(delta.letter);
            if let Some(p) = delta.param {
                params.push(p);
            }
            count += 1;
        }

        if count > 0 {
            lines.push(assemble(&letters, &params));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan_takes_param(c: char, adding: bool) -> bool {
        match c {
            'b' | 'e' | 'I' | 'o' | 'h' | 'v' | 'q' | 'a' => true,
            'k' => true,
            'l' => adding,
            _ => false,
        }
    }

    #[test]
    fn test_parse_simple_toggles() {
        let d = parse_mode_string("+nt", &[], chan_takes_param);
        assert_eq!(d.len(), 2);
        assert!(d[0].adding && d[0].letter == 'n' && d[0].param.is_none());
        assert!(d[1].adding && d[1].letter == 't');
    }

    #[test]
    fn test_parse_params_consumed_in_order() {
        let d = parse_mode_string("+ov-b", &["alice", "bob", "*!*@x"], chan_takes_param);
        assert_eq!(d[0].param.as_deref(), Some("alice"));
        assert_eq!(d[1].param.as_deref(), Some("bob"));
        assert!(!d[2].adding);
        assert_eq!(d[2].param.as_deref(), Some("*!*@x"));
    }

    #[test]
    fn test_parse_minus_l_takes_no_param() {
        let d = parse_mode_string("-l+k", &["sekret"], chan_takes_param);
        assert_eq!(d[0].param, None);
        assert_eq!(d[1].param.as_deref(), Some("sekret"));
    }

    #[test]
    fn test_parse_missing_param_is_none() {
        let d = parse_mode_string("+b", &[], chan_takes_param);
        assert_eq!(d[0].param, None);
    }

    #[test]
    fn test_stacker_sign_transitions() {
        let mut st = ModeStacker::new(20);
        st.push(ModeDelta::new(true, 'n', None::<String>));
        st.push(ModeDelta::new(true, 'o', Some("alice")));
        st.push(ModeDelta::new(false, 'v', Some("bob")));
        st.push(ModeDelta::new(false, 'm', None::<String>));
        st.push(ModeDelta::new(true, 't', None::<String>));
        let lines = st.flush(10);
        assert_eq!(lines, vec!["+no-vm+t alice bob"]);
    }

    #[test]
    fn test_stacker_splits_on_mode_cap() {
        let mut st = ModeStacker::new(3);
        for i in 0..5 {
            st.push(ModeDelta::new(true, 'b', Some(format!("mask{i}!*@*"))));
        }
        let lines = st.flush(10);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "+bbb mask0!*@* mask1!*@* mask2!*@*");
        assert_eq!(lines[1], "+bb mask3!*@* mask4!*@*");
    }

    #[test]
    fn test_stacker_splits_on_byte_budget() {
        let mut st = ModeStacker::new(100);
        let long = "x".repeat(200);
        st.push(ModeDelta::new(true, 'b', Some(long.clone())));
        st.push(ModeDelta::new(true, 'b', Some(long.clone())));
        st.push(ModeDelta::new(true, 'b', Some(long)));
        let lines = st.flush(20);
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert!(line.len() + 20 + 2 <= MAX_LINE_LEN);
        }
    }

    #[test]
    fn test_stacker_empty_flush() {
        let mut st = ModeStacker::new(20);
        assert!(st.flush(0).is_empty());
    }
}
