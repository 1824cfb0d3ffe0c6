use crate::error::{Error, Result};
use crate::version::Version;
use std::fmt;

/// A single `<op> <version>` constraint, e.g. `>= 1.2.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl Relation {
    fn accepts(self, lhs: Version, rhs: Version) -> bool {
        match self {
            Relation::Less => lhs < rhs,
            Relation::LessEqual => lhs <= rhs,
            Relation::Equal => lhs == rhs,
            Relation::NotEqual => lhs != rhs,
            Relation::GreaterEqual => lhs >= rhs,
            Relation::Greater => lhs > rhs,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Relation::Less => "<<",
            Relation::LessEqual => "<=",
            Relation::Equal => "==",
            Relation::NotEqual => "!=",
            Relation::GreaterEqual => ">=",
            Relation::Greater => ">>",
        }
    }
}

/// A parsed plugin-dependency expression: `name(op version, op version, ...)`.
///
/// An empty constraint list accepts any version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Designator {
    pub plugin: String,
    pub constraints: Vec<(Relation, Version)>,
}

impl fmt::Display for Designator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plugin)?;
        if !self.constraints.is_empty() {
            write!(f, "(")?;
            for (idx, (rel, ver)) in self.constraints.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}{}", rel.as_str(), ver)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl Designator {
    /// Parses `root ::= <name> | <name> "(" <op> <version> ("," <op> <version>)* ")"`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut chars = input.trim().char_indices().peekable();
        let mut name_end = input.len();
        for (idx, c) in input.char_indices() {
            if c == '(' {
                name_end = idx;
                break;
            }
        }
        let plugin = input[..name_end].trim().to_string();
        if plugin.is_empty() {
            return Err(Error::Syntax(format!("empty plugin name in designator '{input}'")));
        }
        // advance the peekable past the plugin name so we can read the constraint list.
        while let Some(&(idx, _)) = chars.peek() {
            if idx >= name_end {
                break;
            }
            chars.next();
        }

        let rest = input[name_end..].trim();
        if rest.is_empty() {
            return Ok(Designator { plugin, constraints: Vec::new() });
        }
        if !rest.starts_with('(') || !rest.ends_with(')') {
            return Err(Error::Syntax(format!(
                "malformed designator constraint list in '{input}'"
            )));
        }
        let body = &rest[1..rest.len() - 1];
        let mut constraints = Vec::new();
        for part in body.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Syntax(format!("empty constraint in designator '{input}'")));
            }
            constraints.push(parse_constraint(part)?);
        }
        Ok(Designator { plugin, constraints })
    }

    /// `version_good(v)` — the conjunction of all constraints.
    pub fn version_good(&self, version: Version) -> bool {
        self.constraints
            .iter()
            .all(|(rel, required)| rel.accepts(version, *required))
    }
}

fn parse_constraint(part: &str) -> Result<(Relation, Version)> {
    const OPS: &[(&str, Relation)] = &[
        ("<<", Relation::Less),
        ("<=", Relation::LessEqual),
        ("==", Relation::Equal),
        ("!=", Relation::NotEqual),
        (">=", Relation::GreaterEqual),
        (">>", Relation::Greater),
    ];
    let (op, rest) = OPS
        .iter()
        .find_map(|(op, rel)| part.strip_prefix(op).map(|rest| (*rel, rest)))
        .ok_or_else(|| Error::Syntax(format!("unknown relation operator in '{part}'")))?;
    let version = parse_version(rest.trim())?;
    Ok((op, version))
}

fn parse_version(s: &str) -> Result<Version> {
    let mut parts = s.split('.');
    let major: u8 = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("missing major version in '{s}'")))?
        .parse()
        .map_err(|_| Error::Syntax(format!("bad major version in '{s}'")))?;
    let minor: u8 = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("missing minor version in '{s}'")))?
        .parse()
        .map_err(|_| Error::Syntax(format!("bad minor version in '{s}'")))?;
    let patch: u16 = parts
        .next()
        .ok_or_else(|| Error::Syntax(format!("missing patch version in '{s}'")))?
        .parse()
        .map_err(|_| Error::Syntax(format!("bad patch version in '{s}'")))?;
    if parts.next().is_some() {
        return Err(Error::Syntax(format!("trailing characters in version '{s}'")));
    }
    Ok(Version::new(major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let d = Designator::parse("logger").unwrap();
        assert_eq!(d.plugin, "logger");
        assert!(d.constraints.is_empty());
        assert!(d.version_good(Version::new(9, 9, 9)));
    }

    #[test]
    fn parses_single_constraint() {
        let d = Designator::parse("routing(>= 2.0.0)").unwrap();
        assert!(d.version_good(Version::new(2, 0, 0)));
        assert!(d.version_good(Version::new(3, 0, 0)));
        assert!(!d.version_good(Version::new(1, 9, 9)));
    }

    #[test]
    fn all_constraints_must_match() {
        let d = Designator::parse("routing(>= 1.0.0, << 2.0.0)").unwrap();
        assert!(d.version_good(Version::new(1, 5, 0)));
        assert!(!d.version_good(Version::new(2, 0, 0)));
        assert!(!d.version_good(Version::new(0, 9, 0)));
    }

    #[test]
    fn relations_consistent_with_lexicographic_compare() {
        let cases: &[(&str, Relation)] = &[
            ("<<", Relation::Less),
            ("<=", Relation::LessEqual),
            ("==", Relation::Equal),
            ("!=", Relation::NotEqual),
            (">=", Relation::GreaterEqual),
            (">>", Relation::Greater),
        ];
        let a = Version::new(1, 2, 3);
        let b = Version::new(1, 2, 4);
        for (op, rel) in cases {
            let expected = match rel {
                Relation::Less => a < b,
                Relation::LessEqual => a <= b,
                Relation::Equal => a == b,
                Relation::NotEqual => a != b,
                Relation::GreaterEqual => a >= b,
                Relation::Greater => a > b,
            };
            assert_eq!(rel.accepts(a, b), expected, "operator {op}");
        }
    }
}
