//! Host/plugin version negotiation.
//!
//! A plugin records its own release version and a constraint on the host
//! version it is willing to run against. The host pushes its version once,
//! before issuing functional calls; an incompatible push is rejected and
//! leaves the gate untouched.

use parking_lot::Mutex;
use std::cmp::Ordering;

use semver::{Prerelease, Version};
use tracing::debug;

use crate::error::{LaniakeaError, Result};

/// Plugin-side version check, shared by both plugin shapes.
#[derive(Debug, Default)]
pub struct VersionGate {
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    plugin_version: Option<String>,
    constraint: Option<(String, Constraint)>,
    negotiated: Option<String>,
}

impl VersionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gate with the plugin version and host constraint already set.
    pub fn with_versions(plugin_version: impl Into<String>, constraint: &str) -> Result<Self> {
        let gate = Self::new();
        gate.set_plugin_version(plugin_version);
        gate.set_version_constraint(constraint)?;
        Ok(gate)
    }

    /// Record the plugin's own release version. Last write wins.
    pub fn set_plugin_version(&self, version: impl Into<String>) {
        self.state.lock().plugin_version = Some(version.into());
    }

    /// Parse and store the range of host versions this plugin accepts.
    ///
    /// On a parse failure the previously stored constraint is kept.
    pub fn set_version_constraint(&self, expr: &str) -> Result<()> {
        let req = parse_constraint(expr)?;
        self.state.lock().constraint = Some((expr.trim().to_string(), req));
        Ok(())
    }

    /// The stored constraint expression, if any.
    pub fn version_constraint(&self) -> Option<String> {
        self.state
            .lock()
            .constraint
            .as_ref()
            .map(|(expr, _)| expr.clone())
    }

    /// The plugin's own version.
    pub fn get_version(&self) -> Result<String> {
        self.state
            .lock()
            .plugin_version
            .clone()
            .ok_or(LaniakeaError::VersionNotSet)
    }

    /// Validate the host version against the stored constraint and, if it
    /// passes, record it as the negotiated version.
    ///
    /// With no constraint stored, any well-formed version is accepted.
    pub fn push_version(&self, host_version: &str) -> Result<()> {
        let parsed = parse_version(host_version)?;
        let mut state = self.state.lock();
        if let Some((expr, req)) = &state.constraint {
            if !req.matches(&parsed) {
                return Err(LaniakeaError::VersionMismatch {
                    version: host_version.to_string(),
                    constraint: expr.clone(),
                });
            }
        }
        debug!(host_version, "host version accepted");
        state.negotiated = Some(host_version.to_string());
        Ok(())
    }

    /// The last successfully pushed host version, or an empty string.
    pub fn negotiated_version(&self) -> String {
        self.state.lock().negotiated.clone().unwrap_or_default()
    }
}

/// Parse a version, tolerating a leading `v` and missing minor or patch
/// segments (`"0.2"` is `0.2.0`).
pub fn parse_version(raw: &str) -> Result<Version> {
    parse_segments(raw)
        .map(|(version, _)| version)
        .map_err(|reason| LaniakeaError::InvalidVersionSyntax {
            version: raw.to_string(),
            reason,
        })
}

/// Parse a constraint expression such as `">= 0.2.0, < 2.0.0"`.
pub fn parse_constraint(expr: &str) -> Result<Constraint> {
    Constraint::parse(expr)
}

/// Returns the version and how many numeric segments were written.
fn parse_segments(raw: &str) -> std::result::Result<(Version, usize), String> {
    let trimmed = raw.trim();
    let text = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let split = text.find(['-', '+']).unwrap_or(text.len());
    let (core, suffix) = text.split_at(split);

    let segments = core
        .split('.')
        .map(|part| part.parse::<u64>().map_err(|_| format!("bad segment '{part}'")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if segments.is_empty() || segments.len() > 3 {
        return Err(format!("expected 1 to 3 segments, got {}", segments.len()));
    }

    let get = |i: usize| segments.get(i).copied().unwrap_or(0);
    let normalized = format!("{}.{}.{}{suffix}", get(0), get(1), get(2));
    let version = Version::parse(&normalized).map_err(|e| e.to_string())?;
    Ok((version, segments.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Pessimistic,
}

// Longest operators first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 7] = [
    (">=", Op::GreaterEq),
    ("<=", Op::LessEq),
    ("!=", Op::NotEqual),
    ("~>", Op::Pessimistic),
    (">", Op::Greater),
    ("<", Op::Less),
    ("=", Op::Equal),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Op,
    version: Version,
    segments: usize,
}

/// A host version range: comma-separated clauses that must all hold.
///
/// Operators are `=` (also implied when none is given), `!=`, `>`, `<`,
/// `>=`, `<=` and the pessimistic `~>`: `~> 1.2` allows `>= 1.2, < 2.0`
/// and `~> 1.2.3` allows `>= 1.2.3, < 1.3.0`. A pre-release version only
/// satisfies a range that names a pre-release of the same release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    clauses: Vec<Clause>,
}

impl Constraint {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| LaniakeaError::InvalidConstraintSyntax {
            expr: expr.to_string(),
            reason,
        };
        let clauses = expr
            .split(',')
            .map(|raw| {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Err(invalid("empty clause".into()));
                }
                let (op, rest) = OPERATORS
                    .iter()
                    .find_map(|(token, op)| raw.strip_prefix(token).map(|rest| (*op, rest)))
                    .unwrap_or((Op::Equal, raw));
                let (version, segments) = parse_segments(rest).map_err(invalid)?;
                Ok(Clause {
                    op,
                    version,
                    segments,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }
}

impl Clause {
    fn matches(&self, v: &Version) -> bool {
        let c = &self.version;
        let ord = precedence(v).cmp(&precedence(c));
        match self.op {
            Op::Equal => ord == Ordering::Equal,
            Op::NotEqual => ord != Ordering::Equal,
            _ if !prerelease_compatible(v, c) => false,
            Op::Greater => ord == Ordering::Greater,
            Op::Less => ord == Ordering::Less,
            Op::GreaterEq => ord != Ordering::Less,
            Op::LessEq => ord != Ordering::Greater,
            Op::Pessimistic => {
                if ord == Ordering::Less || (!c.pre.is_empty() && v.pre.is_empty()) {
                    return false;
                }
                let fixed = self.segments.saturating_sub(1);
                let (vs, cs) = ([v.major, v.minor, v.patch], [c.major, c.minor, c.patch]);
                vs[..fixed] == cs[..fixed]
            }
        }
    }
}

// Build metadata does not take part in ordering.
fn precedence(v: &Version) -> (u64, u64, u64, &Prerelease) {
    (v.major, v.minor, v.patch, &v.pre)
}

fn prerelease_compatible(v: &Version, c: &Version) -> bool {
    match (v.pre.is_empty(), c.pre.is_empty()) {
        (false, false) => (v.major, v.minor, v.patch) == (c.major, c.minor, c.patch),
        (false, true) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_version_before_set_fails() {
        let gate = VersionGate::new();
        assert!(matches!(gate.get_version(), Err(LaniakeaError::VersionNotSet)));
    }

    #[test]
    fn get_version_returns_last_set() {
        let gate = VersionGate::new();
        gate.set_plugin_version("0.1.0");
        gate.set_plugin_version("0.3.1");
        assert_eq!(gate.get_version().unwrap(), "0.3.1");
    }

    #[test]
    fn push_then_mismatch_keeps_negotiated() {
        let gate = VersionGate::with_versions("1.0.0", ">=0.2.0").unwrap();
        gate.push_version("0.2.0").unwrap();
        assert_eq!(gate.negotiated_version(), "0.2.0");

        let err = gate.push_version("0.1.9").unwrap_err();
        assert!(matches!(err, LaniakeaError::VersionMismatch { .. }));
        assert_eq!(gate.negotiated_version(), "0.2.0");
    }

    #[test]
    fn invalid_host_version_rejected() {
        let gate = VersionGate::with_versions("1.0.0", ">=0.2.0").unwrap();
        let err = gate.push_version("not-a-version").unwrap_err();
        assert!(matches!(err, LaniakeaError::InvalidVersionSyntax { .. }));
        assert_eq!(gate.negotiated_version(), "");
    }

    #[test]
    fn invalid_constraint_keeps_previous() {
        let gate = VersionGate::new();
        gate.set_version_constraint(">= 0.2.0").unwrap();
        let err = gate.set_version_constraint(">>> nonsense").unwrap_err();
        assert!(matches!(err, LaniakeaError::InvalidConstraintSyntax { .. }));
        assert_eq!(gate.version_constraint().as_deref(), Some(">= 0.2.0"));
        assert!(gate.push_version("0.1.0").is_err());
    }

    #[test]
    fn no_constraint_accepts_any_valid_version() {
        let gate = VersionGate::new();
        gate.push_version("0.0.1").unwrap();
        assert_eq!(gate.negotiated_version(), "0.0.1");
    }

    #[test]
    fn partial_versions_are_padded() {
        assert_eq!(parse_version("0.2").unwrap(), Version::new(0, 2, 0));
        assert_eq!(parse_version("v3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(parse_version("1.02.3").unwrap(), Version::new(1, 2, 3));
        assert!(parse_version("1.2.3.4").is_err());
        assert!(parse_version("1..2").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn constraint_operators() {
        let cases = [
            ("1.0.0", "1.0.0", true),
            ("1.0.0", "1.5.0", false),
            ("= 1.0", "1.0.0", true),
            ("!= 0.3.0", "0.3.0", false),
            ("!= 0.3.0", "0.3.1", true),
            (">= 0.2.0, != 0.3.0", "0.3.0", false),
            ("> 0.2", "0.2.1", true),
            ("<= 1.0.0", "1.0.0", true),
            ("< 1", "0.9.9", true),
            ("~> 1.2", "1.9.0", true),
            ("~> 1.2", "2.0.0", false),
            ("~> 1.2", "1.1.9", false),
            ("~> 1.2.3", "1.2.9", true),
            ("~> 1.2.3", "1.3.0", false),
            (">= 1.0.0", "1.5.0-beta", false),
            (">= 1.5.0-alpha", "1.5.0-beta", true),
            (">= 1.5.0-alpha", "1.6.0-beta", false),
            ("1.0.0", "1.0.0+build7", true),
        ];
        for (expr, version, expected) in cases {
            let constraint = parse_constraint(expr).unwrap();
            assert_eq!(
                constraint.matches(&parse_version(version).unwrap()),
                expected,
                "{version} against {expr}"
            );
        }
    }

    #[test]
    fn malformed_constraints_rejected() {
        for expr in ["", ">= 0.2.0,", "~~> 1", "^1.2", ">>> 1", ">= one"] {
            assert!(
                matches!(
                    parse_constraint(expr),
                    Err(LaniakeaError::InvalidConstraintSyntax { .. })
                ),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn leading_v_is_tolerated() {
        let gate = VersionGate::with_versions("1.0.0", ">=0.2.0, <2.0.0").unwrap();
        gate.push_version("v1.4.2").unwrap();
        assert_eq!(gate.negotiated_version(), "v1.4.2");
        assert!(gate.push_version("2.0.0").is_err());
    }
}
