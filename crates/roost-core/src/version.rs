//! Firmware version ordering
//!
//! Versions are dot-separated non-negative integers (`6.6.51`). Strings
//! that do not parse are ordered strictly below every parseable version,
//! so an unreadable or missing version is always considered stale rather
//! than crashing the orchestrator. Shorter versions compare as if padded
//! with trailing zeros: `6.6` equals `6.6.0`.

use std::cmp::Ordering;
use std::fmt;

/// A parsed firmware version with a total order.
#[derive(Debug, Clone)]
pub enum FwVersion {
    /// Sentinel for strings that do not parse as dot-separated integers.
    /// Sorts below every numbered version.
    Unversioned,
    /// Dot-separated integer components, most significant first.
    Numbered(Vec<u64>),
}

impl FwVersion {
    /// Parse a version string.
    ///
    /// A leading `v`/`V` prefix is stripped (release tags are commonly
    /// `v1.2.3`). Anything that is not dot-separated integers after that
    /// becomes [`FwVersion::Unversioned`] - never an error.
    pub fn parse(raw: &str) -> Self {
        let mut s = raw.trim();
        if s.starts_with('v') || s.starts_with('V') {
            s = &s[1..];
        }
        if s.is_empty() {
            return Self::Unversioned;
        }
        let mut parts = Vec::new();
        for piece in s.split('.') {
            match piece.parse::<u64>() {
                Ok(n) => parts.push(n),
                Err(_) => return Self::Unversioned,
            }
        }
        Self::Numbered(parts)
    }

    /// True if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &FwVersion) -> bool {
        self > other
    }
}

impl Ord for FwVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FwVersion::Unversioned, FwVersion::Unversioned) => Ordering::Equal,
            (FwVersion::Unversioned, FwVersion::Numbered(_)) => Ordering::Less,
            (FwVersion::Numbered(_), FwVersion::Unversioned) => Ordering::Greater,
            (FwVersion::Numbered(a), FwVersion::Numbered(b)) => {
                // Lexicographic over integers, missing positions read as 0.
                let len = a.len().max(b.len());
                for i in 0..len {
                    let x = a.get(i).copied().unwrap_or(0);
                    let y = b.get(i).copied().unwrap_or(0);
                    match x.cmp(&y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                Ordering::Equal
            }
        }
    }
}

impl PartialOrd for FwVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FwVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FwVersion {}

impl fmt::Display for FwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FwVersion::Unversioned => write!(f, "unversioned"),
            FwVersion::Numbered(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", joined.join("."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> FwVersion {
        FwVersion::parse(s)
    }

    #[test]
    fn test_strictly_greater() {
        assert!(v("6.6.51") > v("6.6.31"));
        assert!(v("6.7") > v("6.6.99"));
        assert!(v("10.0.0") > v("9.9.9"));
    }

    #[test]
    fn test_trailing_zero_padding() {
        assert_eq!(v("6.6"), v("6.6.0"));
        assert_eq!(v("1"), v("1.0.0.0"));
        assert!(v("6.6.0.1") > v("6.6"));
    }

    #[test]
    fn test_unparseable_below_everything() {
        assert!(v("bad") < v("0.0.1"));
        assert!(v("") < v("0"));
        assert!(v("6.6.x") < v("0.0.1"));
        assert_eq!(v("bad"), v("also-bad"));
    }

    #[test]
    fn test_v_prefix_stripped() {
        assert_eq!(v("v6.6.51"), v("6.6.51"));
        assert_eq!(v("V1.2"), v("1.2.0"));
    }

    #[test]
    fn test_total_order_trichotomy() {
        let samples = ["6.6.51", "6.6.31", "6.6", "6.6.0", "bad", "0.0.1", "v6.6.51"];
        for a in &samples {
            for b in &samples {
                let (va, vb) = (v(a), v(b));
                let gt = va > vb;
                let lt = va < vb;
                let eq = va == vb;
                assert_eq!(
                    1,
                    [gt, lt, eq].iter().filter(|&&x| x).count(),
                    "exactly one relation must hold for {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_transitivity() {
        let (a, b, c) = (v("6.6.20"), v("6.6.31"), v("6.6.51"));
        assert!(a < b && b < c && a < c);
    }

    #[test]
    fn test_is_newer_than() {
        assert!(v("6.6.51").is_newer_than(&v("6.6.31")));
        assert!(!v("6.6.31").is_newer_than(&v("6.6.51")));
        assert!(!v("6.6.0").is_newer_than(&v("6.6")));
    }
}
