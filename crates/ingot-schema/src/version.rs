//! Upstream version algebra.
//!
//! A version is a dotted sequence whose segments are maximal runs of digits
//! or letters. Numeric segments compare numerically, alphabetic segments
//! compare lexically and sort before any numeric segment, and missing
//! trailing segments count as zero. A version is a *prerelease* iff any
//! segment is alphabetic.
//!
//! ```
//! use ingot_schema::{Requirement, Version};
//!
//! let req: Requirement = "~> 1.2".parse().unwrap();
//! assert!(req.matches(&Version::new("1.9")));
//! assert!(!req.matches(&Version::new("2.0")));
//! assert!(Version::new("2.0.0.rc1").is_prerelease());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An upstream version string.
///
/// Equality is textual; ordering follows segment precedence and falls back
/// to the raw text so that `Ord` stays consistent with `Eq` (`1.0` and
/// `1.0.0` have equal precedence but are distinct versions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    /// Digits with leading zeros stripped; the empty string is zero.
    Numeric(&'a str),
    Alpha(&'a str),
}

impl Segment<'_> {
    const ZERO: Segment<'static> = Segment::Numeric("");

    fn precedence(self, other: Self) -> Ordering {
        match (self, other) {
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            (Segment::Alpha(_), Segment::Numeric(_)) => Ordering::Less,
            (Segment::Numeric(_), Segment::Alpha(_)) => Ordering::Greater,
        }
    }

    fn is_alpha(self) -> bool {
        matches!(self, Segment::Alpha(_))
    }
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Numeric("") => f.write_str("0"),
            Segment::Numeric(digits) | Segment::Alpha(digits) => f.write_str(digits),
        }
    }
}

fn segments(s: &str) -> Vec<Segment<'_>> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        if bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            out.push(Segment::Numeric(s[start..i].trim_start_matches('0')));
        } else if bytes[i].is_ascii_alphabetic() {
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            out.push(Segment::Alpha(&s[start..i]));
        } else {
            i += 1;
        }
    }

    out
}

/// Increment a decimal digit string without going through a fixed-width integer.
fn increment_decimal(digits: &str) -> String {
    let mut out: Vec<u8> = if digits.is_empty() {
        b"0".to_vec()
    } else {
        digits.as_bytes().to_vec()
    };

    for byte in out.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            return String::from_utf8(out).unwrap_or_default();
        }
    }

    out.insert(0, b'1');
    String::from_utf8(out).unwrap_or_default()
}

impl Version {
    /// Create a new version from the given string (stored as-is).
    pub fn new(v: &str) -> Self {
        Self(v.to_string())
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True iff any component contains an alphabetic character.
    pub fn is_prerelease(&self) -> bool {
        self.0.chars().any(|c| c.is_ascii_alphabetic())
    }

    /// The dot-separated components, as written.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Compare by segment precedence only.
    pub fn precedence(&self, other: &Self) -> Ordering {
        let lhs = segments(&self.0);
        let rhs = segments(&other.0);
        let len = lhs.len().max(rhs.len());

        for i in 0..len {
            let a = lhs.get(i).copied().unwrap_or(Segment::ZERO);
            let b = rhs.get(i).copied().unwrap_or(Segment::ZERO);
            match a.precedence(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        Ordering::Equal
    }

    /// The version with every segment from the first alphabetic one onward removed.
    pub fn release(&self) -> Self {
        if !self.is_prerelease() {
            return self.clone();
        }
        let kept: Vec<String> = segments(&self.0)
            .into_iter()
            .take_while(|s| !s.is_alpha())
            .map(|s| s.to_string())
            .collect();
        Self(kept.join("."))
    }

    /// Upper bound used by the pessimistic operator.
    ///
    /// Strips prerelease segments, drops the last segment when more than one
    /// remains and increments the new last one: `1.2.3` bumps to `1.3`,
    /// `1.0` and `1` both bump to `2`.
    pub fn bump(&self) -> Self {
        let mut segs = segments(&self.0);
        while segs.iter().any(|s| s.is_alpha()) {
            segs.pop();
        }
        if segs.len() > 1 {
            segs.pop();
        }

        let mut parts: Vec<String> = segs.iter().map(ToString::to_string).collect();
        match segs.last() {
            Some(Segment::Numeric(digits)) => {
                let last = parts.len() - 1;
                parts[last] = increment_decimal(digits);
            }
            _ => parts = vec!["1".to_string()],
        }

        Self(parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence(other).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Comparison operator of a single requirement clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `~>`: at least the given version, below its [`Version::bump`].
    Pessimistic,
}

impl Operator {
    // Longest tokens first so that `>=` is not read as `>`.
    const TOKENS: [(&'static str, Operator); 7] = [
        ("~>", Operator::Pessimistic),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("!=", Operator::Ne),
        ("=", Operator::Eq),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    /// The operator token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

/// One `<op> <version>` clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// Comparison operator.
    pub op: Operator,
    /// Right-hand side version.
    pub version: Version,
}

impl Constraint {
    /// Whether `v` satisfies this clause.
    pub fn matches(&self, v: &Version) -> bool {
        let ord = v.precedence(&self.version);
        match self.op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Lt => ord == Ordering::Less,
            Operator::Ge => ord != Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
            Operator::Pessimistic => {
                ord != Ordering::Less
                    && v.release().precedence(&self.version.bump()) == Ordering::Less
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// Errors produced while parsing a [`Requirement`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid requirement '{input}': {reason}")]
pub struct RequirementError {
    /// The rejected input.
    pub input: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// A version constraint: comma-separated clauses, all of which must hold.
///
/// An empty requirement matches every version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    constraints: Vec<Constraint>,
}

impl Requirement {
    /// A requirement that matches every version.
    pub fn any() -> Self {
        Self::default()
    }

    /// Build a requirement from explicit clauses.
    pub fn from_constraints(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    /// The individual clauses.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Whether `v` satisfies every clause.
    pub fn matches(&self, v: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(v))
    }

    /// True iff any clause names a prerelease version, which is what opts a
    /// dependency into the prerelease channel.
    pub fn is_prerelease(&self) -> bool {
        self.constraints.iter().any(|c| c.version.is_prerelease())
    }
}

fn parse_clause(input: &str, clause: &str) -> Result<Constraint, RequirementError> {
    let clause = clause.trim();
    let (op, rest) = Operator::TOKENS
        .iter()
        .find_map(|(token, op)| clause.strip_prefix(token).map(|rest| (*op, rest)))
        .unwrap_or((Operator::Eq, clause));
    let rest = rest.trim();

    let err = |reason| RequirementError {
        input: input.to_string(),
        reason,
    };

    if rest.is_empty() {
        return Err(err("missing version after operator"));
    }
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(err("version must start with a digit"));
    }
    if !rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(err("version contains invalid characters"));
    }

    Ok(Constraint {
        op,
        version: Version::new(rest),
    })
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::any());
        }
        let constraints = s
            .split(',')
            .map(|clause| parse_clause(s, clause))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { constraints })
    }
}

impl TryFrom<String> for Requirement {
    type Error = RequirementError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Requirement> for String {
    fn from(req: Requirement) -> Self {
        req.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return f.write_str(">= 0");
        }
        let parts: Vec<String> = self.constraints.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(", "))
    }
}
