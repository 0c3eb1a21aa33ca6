//! Fractional ranks ordering cards inside a stage.
//!
//! A rank is a base-62 string (`0-9A-Za-z`, which is also ASCII order) read as
//! the digits of a fraction in `[0, 1)`. Inserting between two neighbours
//! bisects the interval and grows the key only when the neighbours are
//! adjacent, so no other card ever has to be rewritten. Keys never end in `'0'`,
//! which guarantees a strictly smaller key always exists.

use std::fmt;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();

/// Middle of the alphabet, handed out when a stage is empty.
const INITIAL_RANK: &str = "V";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(String);

impl Rank {
    pub fn initial() -> Self {
        Self(INITIAL_RANK.to_string())
    }

    /// Accepts only keys this module could have produced. Stored ranks that
    /// fail to parse are treated as absent neighbours.
    pub fn parse(raw: &str) -> Option<Self> {
        to_digits(raw).map(|_| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// A rank strictly between `before` and `after`; either side may be open.
    ///
    /// When `before >= after` (two cards already tied) the result sorts after
    /// `before`; callers break the remaining tie on creation order.
    pub fn between(before: Option<&Rank>, after: Option<&Rank>) -> Rank {
        Self(rank_between(
            before.map(Rank::as_str),
            after.map(Rank::as_str),
        ))
    }

    /// First rank below every card, given the current last one.
    pub fn after(&self) -> Rank {
        Self::between(Some(self), None)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn rank_between(before: Option<&str>, after: Option<&str>) -> String {
    let lower = before.and_then(to_digits);
    let upper = after.and_then(to_digits);
    let digits = match (lower, upper) {
        (None, None) => return INITIAL_RANK.to_string(),
        (Some(a), None) => midpoint(&a, None),
        (None, Some(b)) => midpoint(&[], Some(&b)),
        (Some(a), Some(b)) if a < b => midpoint(&a, Some(&b)),
        (Some(a), Some(_)) => midpoint(&a, None),
    };
    from_digits(&digits)
}

fn digit_value(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

fn to_digits(raw: &str) -> Option<Vec<usize>> {
    if raw.is_empty() || raw.ends_with('0') {
        return None;
    }
    raw.bytes().map(digit_value).collect()
}

fn from_digits(digits: &[usize]) -> String {
    digits.iter().map(|&d| DIGITS[d] as char).collect()
}

/// Bisects `(a, b)`, `b = None` standing for 1.0.
///
/// Requires `a < b` and that `b` has no trailing zero digit.
fn midpoint(a: &[usize], b: Option<&[usize]>) -> Vec<usize> {
    if let Some(b) = b {
        let mut shared = 0;
        while shared < b.len() && a.get(shared).copied().unwrap_or(0) == b[shared] {
            shared += 1;
        }
        if shared > 0 {
            let mut out = b[..shared].to_vec();
            let rest = a.get(shared..).unwrap_or(&[]);
            out.extend(midpoint(rest, Some(&b[shared..])));
            return out;
        }
    }

    let low = a.first().copied().unwrap_or(0);
    let high = b.and_then(|b| b.first().copied()).unwrap_or(BASE);
    if high - low > 1 {
        return vec![(low + high) / 2];
    }
    match b {
        Some(b) if b.len() > 1 => vec![b[0]],
        _ => {
            let mut out = vec![low];
            out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}
