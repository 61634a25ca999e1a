//! Port interval sets.
//!
//! Expressions look like `"8000,9000-9010"`: comma-separated single ports or
//! inclusive hyphenated ranges. A [`Ranges`] is always kept sorted with
//! overlapping and adjacent intervals merged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Inclusive port interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    pub fn new(begin: u64, end: u64) -> CoreResult<Self> {
        if begin > end {
            return Err(CoreError::InvalidPortRange(format!("{begin}-{end}")));
        }
        Ok(Self { begin, end })
    }

    pub fn single(port: u64) -> Self {
        Self {
            begin: port,
            end: port,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.begin + 1
    }

    pub fn contains(&self, port: u64) -> bool {
        self.begin <= port && port <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.begin == self.end {
            write!(f, "{}", self.begin)
        } else {
            write!(f, "{}-{}", self.begin, self.end)
        }
    }
}

/// Sorted, merged set of port intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ranges(Vec<Range>);

impl Ranges {
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        let mut out = Self(ranges.into_iter().collect());
        out.squash();
        out
    }

    /// Parse a port expression. An empty or blank expression is the empty set.
    pub fn parse(expr: &str) -> CoreResult<Self> {
        let mut ranges = Vec::new();
        for part in expr.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((begin, end)) => Range::new(parse_port(begin)?, parse_port(end)?)?,
                None => Range::single(parse_port(part)?),
            };
            ranges.push(range);
        }
        Ok(Self::new(ranges))
    }

    pub fn ranges(&self) -> &[Range] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of ports in the set.
    pub fn size(&self) -> u64 {
        self.0.iter().map(Range::size).sum()
    }

    pub fn contains_port(&self, port: u64) -> bool {
        self.0.iter().any(|r| r.contains(port))
    }

    pub fn min(&self) -> Option<u64> {
        self.0.first().map(|r| r.begin)
    }

    pub fn is_subset_of(&self, other: &Ranges) -> bool {
        self.0
            .iter()
            .all(|r| other.0.iter().any(|o| o.begin <= r.begin && r.end <= o.end))
    }

    pub fn union(&self, other: &Ranges) -> Ranges {
        Ranges::new(self.0.iter().chain(other.0.iter()).copied())
    }

    /// Set difference `self - other`.
    pub fn subtract(&self, other: &Ranges) -> Ranges {
        let mut out = Vec::new();
        for r in &self.0 {
            let mut pieces = vec![*r];
            for o in &other.0 {
                pieces = pieces
                    .into_iter()
                    .flat_map(|p| split_out(p, *o))
                    .collect();
            }
            out.extend(pieces);
        }
        Ranges::new(out)
    }

    pub fn remove_port(&self, port: u64) -> Ranges {
        self.subtract(&Ranges(vec![Range::single(port)]))
    }

    /// Drop every port strictly below `floor`.
    pub fn remove_below(&self, floor: u64) -> Ranges {
        if floor == 0 {
            return self.clone();
        }
        self.subtract(&Ranges(vec![Range { begin: 0, end: floor - 1 }]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.0.iter()
    }

    fn squash(&mut self) {
        self.0.sort();
        let mut merged: Vec<Range> = Vec::with_capacity(self.0.len());
        for r in self.0.drain(..) {
            match merged.last_mut() {
                Some(last) if r.begin <= last.end.saturating_add(1) => {
                    last.end = last.end.max(r.end);
                }
                _ => merged.push(r),
            }
        }
        self.0 = merged;
    }
}

// ── Internal helpers ───────────────────────────────────────────────

fn parse_port(s: &str) -> CoreResult<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| CoreError::InvalidPortRange(s.to_string()))
}

/// Pieces of `r` left after removing `cut`.
fn split_out(r: Range, cut: Range) -> Vec<Range> {
    if cut.end < r.begin || cut.begin > r.end {
        return vec![r];
    }
    let mut out = Vec::with_capacity(2);
    if cut.begin > r.begin {
        out.push(Range {
            begin: r.begin,
            end: cut.begin - 1,
        });
    }
    if cut.end < r.end {
        out.push(Range {
            begin: cut.end + 1,
            end: r.end,
        });
    }
    out
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for Ranges {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Ranges::parse(s)
    }
}

impl TryFrom<String> for Ranges {
    type Error = CoreError;

    fn try_from(s: String) -> CoreResult<Self> {
        Ranges::parse(&s)
    }
}

impl From<Ranges> for String {
    fn from(r: Ranges) -> Self {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_singles_and_ranges() {
        let r = Ranges::parse("8000, 9000-9010").unwrap();
        assert_eq!(r.ranges().len(), 2);
        assert_eq!(r.size(), 12);
        assert_eq!(r.to_string(), "8000,9000-9010");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Ranges::parse("abc").is_err());
        assert!(Ranges::parse("10-5").is_err());
        assert!(Ranges::parse("1-x").is_err());
        assert!(Ranges::parse("").unwrap().is_empty());
    }

    #[test]
    fn squash_merges_adjacent() {
        let r = Ranges::parse("5-7,1-3,4").unwrap();
        assert_eq!(r.ranges(), &[Range { begin: 1, end: 7 }]);
    }

    #[test]
    fn subset() {
        let avail = Ranges::parse("47100-47110").unwrap();
        assert!(Ranges::parse("47101,47105-47106").unwrap().is_subset_of(&avail));
        assert!(!Ranges::parse("47109-47111").unwrap().is_subset_of(&avail));
        assert!(Ranges::default().is_subset_of(&avail));
    }

    #[test]
    fn subtract_splits() {
        let avail = Ranges::parse("100-110").unwrap();
        let left = avail.subtract(&Ranges::parse("103,105-107").unwrap());
        assert_eq!(left.to_string(), "100-102,104,108-110");
        assert_eq!(left.size(), 7);
    }

    #[test]
    fn remove_below_floor() {
        let avail = Ranges::parse("8000-9005,31000").unwrap();
        let dynamic = avail.remove_below(9000);
        assert_eq!(dynamic.min(), Some(9000));
        assert_eq!(dynamic.size(), 7);
        assert_eq!(avail.remove_below(30000).min(), Some(31000));
    }

    #[test]
    fn serde_as_expression() {
        let r = Ranges::parse("1-2,5").unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"1-2,5\"");
        let back: Ranges = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
