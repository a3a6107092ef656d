//! Debian package version parsing and ordering.
//!
//! A version is `[epoch:]upstream[-revision]`. Ordering follows the
//! Debian policy comparison: epoch numerically, then upstream and
//! revision with `verrevcmp` (alternating non-digit and digit runs,
//! `~` sorting before everything including end-of-string, letters
//! before non-letters). A missing revision sorts lowest.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed Debian-style version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebVersion {
    /// Epoch, 0 when absent.
    pub epoch: u32,
    /// Upstream version component.
    pub upstream: String,
    /// Debian revision, empty when absent.
    pub revision: String,
}

impl DebVersion {
    /// Parse a version string.
    ///
    /// The epoch is everything before the first `:` (must be numeric);
    /// the revision is everything after the *last* `-`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidVersion("empty version".to_string()));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => {
                let epoch = e.parse::<u32>().map_err(|_| {
                    crate::Error::InvalidVersion(format!("non-numeric epoch in {s:?}"))
                })?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((up, rev)) => (up.to_string(), rev.to_string()),
            None => (rest.to_string(), String::new()),
        };

        if upstream.is_empty() {
            return Err(crate::Error::InvalidVersion(format!(
                "empty upstream component in {s:?}"
            )));
        }

        let valid = |c: char| c.is_ascii_alphanumeric() || ".+-:~".contains(c);
        if !upstream.chars().all(valid) || !revision.chars().all(valid) {
            return Err(crate::Error::InvalidVersion(format!(
                "illegal character in {s:?}"
            )));
        }

        Ok(Self {
            epoch,
            upstream,
            revision,
        })
    }
}

impl fmt::Display for DebVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

/// Character weight for non-digit comparison. `~` sorts before
/// everything, including the end of the string (weight 0).
fn order(c: u8) -> i32 {
    match c {
        b'~' => -1,
        c if c.is_ascii_alphabetic() => c as i32,
        c => c as i32 + 256,
    }
}

/// Compare two version components the way dpkg does.
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit run, including `~` against end-of-string.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = if i < a.len() && !a[i].is_ascii_digit() {
                order(a[i])
            } else {
                0
            };
            let bc = if j < b.len() && !b[j].is_ascii_digit() {
                order(b[j])
            } else {
                0
            };
            if ac != bc {
                return ac.cmp(&bc);
            }
            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        // Digit run: skip leading zeros, then longer run wins,
        // then lexicographic.
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }
        let ds = i;
        let es = j;
        while i < a.len() && a[i].is_ascii_digit() {
            i += 1;
        }
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        let da = &a[ds..i];
        let db = &b[es..j];
        match da.len().cmp(&db.len()) {
            Ordering::Equal => match da.cmp(db) {
                Ordering::Equal => {}
                other => return other,
            },
            other => return other,
        }
    }

    Ordering::Equal
}

impl Ord for DebVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| verrevcmp(&self.revision, &other.revision))
    }
}

impl PartialOrd for DebVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
