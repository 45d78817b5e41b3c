//! Perl-compatible version handling.
//!
//! This module implements the version model of the CPAN ecosystem:
//!
//! - Dotted-decimal literals: `v5.38.0`, `1.2.3`
//! - Numeric literals: `1.2`, `0.001_01` (underscores ignored)
//! - Numeric/dotted equivalence: `1.2` compares equal to `v1.200`
//!
//! Ranges are comma-separated AND clauses over `== != >= > <= <`; a bare
//! literal means "at least". `VersionRange::merge` intersects two ranges
//! and normalizes the result, failing with [`Error::IllegalRange`] when
//! the intersection accepts no version. Range equality compares the
//! normalized clause set, which makes merging observably commutative and
//! idempotent.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// A parsed version literal.
#[derive(Clone)]
pub struct Version {
    /// Numeric components, most significant first.
    parts: SmallVec<[u64; 4]>,
    /// Original string representation.
    original: Arc<str>,
}

impl Version {
    /// The zero version, accepted by any lower bound.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            parts: SmallVec::from_slice(&[0]),
            original: Arc::from("0"),
        }
    }

    /// Parse a version literal.
    ///
    /// Accepts dotted-decimal forms (`v5.38.0`, `1.2.3`) and numeric
    /// forms (`1.2`, `0.001_01`). Numeric fractions are split into
    /// groups of three digits, so `1.2` equals `v1.200` and `5.008001`
    /// equals `v5.8.1`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidVersion {
                literal: input.to_string(),
            });
        }

        let (body, has_v) = match trimmed.strip_prefix('v') {
            Some(rest) => (rest, true),
            None => (trimmed, false),
        };
        let cleaned: String = body.chars().filter(|&c| c != '_').collect();
        if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(Error::InvalidVersion {
                literal: input.to_string(),
            });
        }

        let dotted = has_v || cleaned.matches('.').count() >= 2;
        let parts = if dotted {
            Self::parse_dotted(&cleaned)
        } else {
            Self::parse_numeric(&cleaned)
        }
        .ok_or_else(|| Error::InvalidVersion {
            literal: input.to_string(),
        })?;

        Ok(Self {
            parts,
            original: Arc::from(trimmed),
        })
    }

    fn parse_dotted(s: &str) -> Option<SmallVec<[u64; 4]>> {
        let mut parts = SmallVec::new();
        for piece in s.split('.') {
            if piece.is_empty() {
                return None;
            }
            parts.push(piece.parse().ok()?);
        }
        Some(parts)
    }

    /// Numeric form: the fraction is right-padded to a multiple of three
    /// digits and split into groups, matching Perl's `1.2` == `v1.200`.
    fn parse_numeric(s: &str) -> Option<SmallVec<[u64; 4]>> {
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() {
            return None;
        }

        let mut parts = SmallVec::new();
        parts.push(int_part.parse().ok()?);

        let mut frac = frac_part.to_string();
        while !frac.len().is_multiple_of(3) {
            frac.push('0');
        }
        for chunk in frac.as_bytes().chunks(3) {
            let piece = std::str::from_utf8(chunk).ok()?;
            parts.push(piece.parse().ok()?);
        }
        Some(parts)
    }

    /// Get the original string representation.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Check whether this version is accepted by a range.
    #[must_use]
    pub fn satisfies(&self, range: &VersionRange) -> bool {
        range.accepts(self)
    }

    /// Components with trailing zeros removed, for comparison and hashing.
    fn significant(&self) -> &[u64] {
        let mut len = self.parts.len();
        while len > 0 && self.parts[len - 1] == 0 {
            len -= 1;
        }
        &self.parts[..len]
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Version").field(&self.original).finish()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Comparison operator of a single range clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>=` (the meaning of a bare literal)
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `<`
    Lt,
}

impl Op {
    /// Operator spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Lt => "<",
        }
    }
}

/// A single `op version` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// The comparison operator.
    pub op: Op,
    /// The version literal compared against.
    pub version: Version,
}

impl Clause {
    fn accepts(&self, v: &Version) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Ne => v != &self.version,
            Op::Ge => v >= &self.version,
            Op::Gt => v > &self.version,
            Op::Le => v <= &self.version,
            Op::Lt => v < &self.version,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// A version range: comma-separated AND clauses.
///
/// The empty string and `0` accept every version.
#[derive(Clone)]
pub struct VersionRange {
    clauses: Vec<Clause>,
    original: Arc<str>,
}

impl VersionRange {
    /// A range that accepts any version.
    #[must_use]
    pub fn any() -> Self {
        Self {
            clauses: Vec::new(),
            original: Arc::from("0"),
        }
    }

    /// An exact-version range.
    #[must_use]
    pub fn exact(version: &Version) -> Self {
        Self {
            clauses: vec![Clause {
                op: Op::Eq,
                version: version.clone(),
            }],
            original: Arc::from(format!("== {version}")),
        }
    }

    /// Parse a range string like `>= 1.2, < 2.0`, `== 1.0`, or `1.0`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "0" {
            return Ok(Self::any());
        }

        let mut clauses = Vec::new();
        for piece in trimmed.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                return Err(Error::InvalidRange {
                    range: input.to_string(),
                });
            }
            let (op, rest) = if let Some(r) = piece.strip_prefix("==") {
                (Op::Eq, r)
            } else if let Some(r) = piece.strip_prefix("!=") {
                (Op::Ne, r)
            } else if let Some(r) = piece.strip_prefix(">=") {
                (Op::Ge, r)
            } else if let Some(r) = piece.strip_prefix("<=") {
                (Op::Le, r)
            } else if let Some(r) = piece.strip_prefix('>') {
                (Op::Gt, r)
            } else if let Some(r) = piece.strip_prefix('<') {
                (Op::Lt, r)
            } else {
                (Op::Ge, piece)
            };
            let version = Version::parse(rest).map_err(|_| Error::InvalidRange {
                range: input.to_string(),
            })?;
            clauses.push(Clause { op, version });
        }

        Ok(Self {
            clauses,
            original: Arc::from(trimmed),
        })
    }

    /// Get the original string representation.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Does this range accept every version?
    #[must_use]
    pub fn accepts_any(&self) -> bool {
        self.clauses
            .iter()
            .all(|c| c.op == Op::Ge && c.version == Version::zero())
    }

    /// Evaluate the range against a version: every clause must hold.
    #[must_use]
    pub fn accepts(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.accepts(version))
    }

    /// Intersect two ranges.
    ///
    /// The result is normalized (tightest bounds, redundant clauses
    /// dropped). Fails with [`Error::IllegalRange`] when the
    /// intersection accepts no version.
    pub fn merge(&self, other: &Self) -> Result<Self> {
        let mut combined: Vec<Clause> = self.clauses.clone();
        for clause in &other.clauses {
            if !combined.contains(clause) {
                combined.push(clause.clone());
            }
        }
        let clauses = reduce(&combined).ok_or_else(|| Error::IllegalRange {
            left: self.to_string(),
            right: other.to_string(),
        })?;
        let original = if clauses.is_empty() {
            Arc::from("0")
        } else {
            Arc::from(
                clauses
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };
        Ok(Self { clauses, original })
    }

    /// The normalized clause set, falling back to the raw clauses for a
    /// self-contradictory range.
    fn canonical(&self) -> Vec<Clause> {
        reduce(&self.clauses).unwrap_or_else(|| {
            let mut raw = self.clauses.clone();
            raw.sort_by(|a, b| a.op.cmp(&b.op).then_with(|| a.version.cmp(&b.version)));
            raw
        })
    }
}

/// Normalize a clause set to canonical form, or `None` if it accepts no
/// version.
fn reduce(clauses: &[Clause]) -> Option<Vec<Clause>> {
    // Collect the distinct == pin, the tightest bounds, and != holes.
    let mut eq: Option<&Version> = None;
    let mut lower: Option<(&Version, bool)> = None; // (version, strict)
    let mut upper: Option<(&Version, bool)> = None;
    let mut nes: Vec<&Version> = Vec::new();

    for clause in clauses {
        let v = &clause.version;
        match clause.op {
            Op::Eq => match eq {
                Some(pinned) if pinned != v => return None,
                _ => eq = Some(v),
            },
            Op::Ne => {
                if !nes.contains(&v) {
                    nes.push(v);
                }
            }
            Op::Ge | Op::Gt => {
                let strict = clause.op == Op::Gt;
                lower = Some(match lower {
                    Some((cur, cur_strict)) => match v.cmp(cur) {
                        Ordering::Greater => (v, strict),
                        Ordering::Equal => (cur, cur_strict || strict),
                        Ordering::Less => (cur, cur_strict),
                    },
                    None => (v, strict),
                });
            }
            Op::Le | Op::Lt => {
                let strict = clause.op == Op::Lt;
                upper = Some(match upper {
                    Some((cur, cur_strict)) => match v.cmp(cur) {
                        Ordering::Less => (v, strict),
                        Ordering::Equal => (cur, cur_strict || strict),
                        Ordering::Greater => (cur, cur_strict),
                    },
                    None => (v, strict),
                });
            }
        }
    }

    // Bounds must leave a non-empty window.
    if let (Some((lo, lo_strict)), Some((hi, hi_strict))) = (lower, upper) {
        match lo.cmp(hi) {
            Ordering::Greater => return None,
            Ordering::Equal if lo_strict || hi_strict => return None,
            _ => {}
        }
    }

    // Drop a trivial `>= 0` lower bound.
    if let Some((lo, false)) = lower
        && *lo == Version::zero()
    {
        lower = None;
    }

    let in_window = |v: &Version| {
        lower.is_none_or(|(lo, strict)| if strict { v > lo } else { v >= lo })
            && upper.is_none_or(|(hi, strict)| if strict { v < hi } else { v <= hi })
    };

    if let Some(pin) = eq {
        if !in_window(pin) || nes.iter().any(|ne| *ne == pin) {
            return None;
        }
        return Some(vec![Clause {
            op: Op::Eq,
            version: pin.clone(),
        }]);
    }

    // A window collapsed to one point becomes an exact pin.
    if let (Some((lo, false)), Some((hi, false))) = (lower, upper)
        && lo == hi
    {
        if nes.iter().any(|ne| *ne == lo) {
            return None;
        }
        return Some(vec![Clause {
            op: Op::Eq,
            version: lo.clone(),
        }]);
    }

    let mut result = Vec::new();
    if let Some((lo, strict)) = lower {
        result.push(Clause {
            op: if strict { Op::Gt } else { Op::Ge },
            version: lo.clone(),
        });
    }
    nes.retain(|ne| in_window(*ne));

    nes.sort();
    for ne in nes {
        result.push(Clause {
            op: Op::Ne,
            version: ne.clone(),
        });
    }
    if let Some((hi, strict)) = upper {
        result.push(Clause {
            op: if strict { Op::Lt } else { Op::Le },
            version: hi.clone(),
        });
    }
    Some(result)
}

impl fmt::Debug for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionRange").field(&self.original).finish()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for VersionRange {}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test_case("1.2.3", "1.2.3", Ordering::Equal)]
    #[test_case("1.2", "v1.200", Ordering::Equal ; "numeric equals dotted")]
    #[test_case("5.008001", "v5.8.1", Ordering::Equal ; "perl style fraction")]
    #[test_case("1.2", "1.2.0", Ordering::Equal ; "trailing zero ignored")]
    #[test_case("1.20", "1.2.3", Ordering::Greater ; "numeric fraction dominates")]
    #[test_case("2.0", "1.99", Ordering::Greater)]
    #[test_case("0.9", "1.0", Ordering::Less)]
    fn version_ordering(a: &str, b: &str, expected: Ordering) {
        assert_eq!(v(a).cmp(&v(b)), expected);
    }

    #[test]
    fn underscore_ignored() {
        assert_eq!(v("0.001_01"), v("0.00101"));
    }

    #[test]
    fn invalid_literals() {
        for bad in ["", "abc", "1.2.x", "v", "..", "1..2"] {
            assert!(Version::parse(bad).is_err(), "parsed {bad:?}");
        }
    }

    #[test_case(">= 1.2, < 2.0", "1.5", true)]
    #[test_case(">= 1.2, < 2.0", "2.0", false)]
    #[test_case(">= 1.2, < 2.0", "1.2", true)]
    #[test_case("== 1.0", "1.0", true)]
    #[test_case("== 1.0", "1.0.1", false)]
    #[test_case("!= 1.0", "1.0", false)]
    #[test_case("!= 1.0", "1.1", true)]
    #[test_case("1.0", "0.9", false ; "bare literal means at least")]
    #[test_case("1.0", "1.5", true)]
    #[test_case("", "0.001", true ; "empty range accepts anything")]
    #[test_case("0", "9999", true)]
    fn range_accepts(range: &str, version: &str, expected: bool) {
        assert_eq!(r(range).accepts(&v(version)), expected);
    }

    #[test]
    fn merge_intersects_bounds() {
        let merged = r(">= 1.0").merge(&r("< 2.0")).unwrap();
        assert!(merged.accepts(&v("1.5")));
        assert!(!merged.accepts(&v("2.0")));
        assert!(!merged.accepts(&v("0.9")));
    }

    #[test]
    fn merge_empty_intersection_is_illegal() {
        assert!(matches!(
            r(">= 2.0").merge(&r("< 1.0")),
            Err(Error::IllegalRange { .. })
        ));
        assert!(matches!(
            r("== 1.0").merge(&r("== 2.0")),
            Err(Error::IllegalRange { .. })
        ));
        assert!(matches!(
            r("== 1.0").merge(&r("!= 1.0")),
            Err(Error::IllegalRange { .. })
        ));
        assert!(matches!(
            r("> 1.0").merge(&r("< 1.0")),
            Err(Error::IllegalRange { .. })
        ));
    }

    #[test]
    fn merge_pin_checked_against_bounds() {
        assert!(r("== 1.5").merge(&r(">= 1.0, < 2.0")).is_ok());
        assert!(r("== 2.5").merge(&r(">= 1.0, < 2.0")).is_err());
    }

    #[test]
    fn collapsed_window_becomes_pin() {
        let merged = r(">= 1.0").merge(&r("<= 1.0")).unwrap();
        assert_eq!(merged, r("== 1.0"));
    }

    #[test]
    fn merge_with_any_is_identity() {
        let a = r(">= 1.2, < 2.0");
        assert_eq!(a.merge(&VersionRange::any()).unwrap(), a);
    }

    #[test]
    fn equality_is_normalized() {
        assert_eq!(r(">= 1.0, >= 0.5"), r(">= 1.0"));
        assert_ne!(r(">= 1.0"), r("> 1.0"));
    }

    prop_compose! {
        fn arb_version()(parts in proptest::collection::vec(0u64..50, 1..4)) -> Version {
            let s = parts.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
            let s = if parts.len() >= 2 { format!("v{s}") } else { s };
            Version::parse(&s).unwrap()
        }
    }

    prop_compose! {
        fn arb_clause()(op in 0u8..6, version in arb_version()) -> Clause {
            let op = [Op::Eq, Op::Ne, Op::Ge, Op::Gt, Op::Le, Op::Lt][op as usize];
            Clause { op, version }
        }
    }

    prop_compose! {
        fn arb_range()(clauses in proptest::collection::vec(arb_clause(), 1..4)) -> VersionRange {
            let s = clauses
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            VersionRange::parse(&s).unwrap()
        }
    }

    proptest! {
        /// Where defined, merging is commutative.
        #[test]
        fn prop_merge_commutative(a in arb_range(), b in arb_range()) {
            let ab = a.merge(&b);
            let ba = b.merge(&a);
            match (ab, ba) {
                (Ok(x), Ok(y)) => prop_assert_eq!(x, y),
                (Err(_), Err(_)) => {}
                (x, y) => prop_assert!(false, "asymmetric merge: {:?} vs {:?}", x, y),
            }
        }

        /// Merging a range with itself changes nothing.
        #[test]
        fn prop_merge_idempotent(a in arb_range()) {
            if let Ok(merged) = a.merge(&a) {
                prop_assert_eq!(merged, a);
            }
        }

        /// A merged range accepts exactly the versions both inputs accept.
        #[test]
        fn prop_merge_is_intersection(a in arb_range(), b in arb_range(), probe in arb_version()) {
            if let Ok(merged) = a.merge(&b) {
                prop_assert_eq!(merged.accepts(&probe), a.accepts(&probe) && b.accepts(&probe));
            }
        }

        /// Version ordering is total and consistent with equality.
        #[test]
        fn prop_ordering_consistent(a in arb_version(), b in arb_version()) {
            match a.cmp(&b) {
                Ordering::Equal => prop_assert_eq!(&a, &b),
                Ordering::Less => prop_assert!(b > a),
                Ordering::Greater => prop_assert!(a > b),
            }
        }
    }
}
