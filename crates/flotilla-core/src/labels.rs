//! Label selectors.
//!
//! Grammar, comma separated:
//!
//! ```text
//! key=value   key==value   key!=value
//! key in (v1,v2)   key notin (v1,v2)
//! key          (key exists)
//! !key         (key does not exist)
//! ```
//!
//! An empty expression selects everything.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::selector::{Matcher, SelectorError, Set, split_requirements};

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex")
});

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex")
});

static SET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("static regex")
});

/// Comparison applied by a single requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Equals(String),
    NotEquals(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

/// One `key <op> values` clause. All clauses of a selector must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
}

impl Requirement {
    pub fn matches(&self, set: &Set) -> bool {
        let value = set.get(&self.key);
        match &self.op {
            Operator::Equals(v) => value == Some(v),
            Operator::NotEquals(v) => value != Some(v),
            Operator::In(vs) => value.is_some_and(|x| vs.contains(x)),
            Operator::NotIn(vs) => value.is_none_or(|x| !vs.contains(x)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A parsed label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// The selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_requirements(input)?
            .into_iter()
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

impl Matcher for LabelSelector {
    fn matches(&self, set: &Set) -> bool {
        self.requirements.iter().all(|r| r.matches(set))
    }

    fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match &r.op {
                Operator::Equals(v) => format!("{}={}", r.key, v),
                Operator::NotEquals(v) => format!("{}!={}", r.key, v),
                Operator::In(vs) => format!("{} in ({})", r.key, join(vs)),
                Operator::NotIn(vs) => format!("{} notin ({})", r.key, join(vs)),
                Operator::Exists => r.key.clone(),
                Operator::DoesNotExist => format!("!{}", r.key),
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn parse_requirement(term: &str) -> Result<Requirement, SelectorError> {
    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement {
            key: key.to_string(),
            op: Operator::DoesNotExist,
        });
    }

    if let Some(caps) = SET_RE.captures(term) {
        let key = &caps[1];
        validate_key(key)?;
        let (op_name, values) = (&caps[2], &caps[3]);
        let values = parse_value_set(key, values)?;
        if values.is_empty() {
            return Err(SelectorError::EmptyValueSet {
                op: if op_name == "in" { "in" } else { "notin" },
                requirement: term.to_string(),
            });
        }
        let op = if op_name == "in" {
            Operator::In(values)
        } else {
            Operator::NotIn(values)
        };
        return Ok(Requirement {
            key: key.to_string(),
            op,
        });
    }

    // Order matters: "!=" and "==" both contain "=".
    for (token, not) in [("!=", true), ("==", false), ("=", false)] {
        if let Some((key, value)) = term.split_once(token) {
            let (key, value) = (key.trim(), value.trim());
            validate_key(key)?;
            validate_value(key, value)?;
            let op = if not {
                Operator::NotEquals(value.to_string())
            } else {
                Operator::Equals(value.to_string())
            };
            return Ok(Requirement {
                key: key.to_string(),
                op,
            });
        }
    }

    if term.contains(char::is_whitespace) || term.contains(['(', ')']) {
        return Err(SelectorError::Malformed(term.to_string()));
    }
    validate_key(term)?;
    Ok(Requirement {
        key: term.to_string(),
        op: Operator::Exists,
    })
}

fn parse_value_set(key: &str, raw: &str) -> Result<BTreeSet<String>, SelectorError> {
    let mut values = BTreeSet::new();
    if raw.trim().is_empty() {
        return Ok(values);
    }
    for value in raw.split(',') {
        let value = value.trim();
        validate_value(key, value)?;
        values.insert(value.to_string());
    }
    Ok(values)
}

/// Validate a label key: an optional DNS-subdomain prefix and `/`, then a name.
pub fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !PREFIX_RE.is_match(prefix) {
                return Err(invalid("prefix must be a DNS subdomain"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 63 characters"));
    }
    if !NAME_RE.is_match(name) {
        return Err(invalid("name must be alphanumeric with '-', '_' or '.' inside"));
    }
    Ok(())
}

/// Validate a label value. Empty values are allowed.
pub fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !NAME_RE.is_match(value) {
        return Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> Set {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::parse("  ").unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&set(&[])));
        assert!(sel.matches(&set(&[("a", "b")])));
    }

    #[test]
    fn equality_and_inequality() {
        let sel = LabelSelector::parse("env=prod,tier!=db").unwrap();
        assert!(sel.matches(&set(&[("env", "prod"), ("tier", "web")])));
        assert!(sel.matches(&set(&[("env", "prod")])));
        assert!(!sel.matches(&set(&[("env", "prod"), ("tier", "db")])));
        assert!(!sel.matches(&set(&[("env", "qa")])));
    }

    #[test]
    fn double_equals_is_equality() {
        let sel = LabelSelector::parse("env==prod").unwrap();
        assert_eq!(
            sel.requirements()[0].op,
            Operator::Equals("prod".to_string())
        );
    }

    #[test]
    fn set_based_requirements() {
        let sel = LabelSelector::parse("env in (prod, qa),zone notin (z1)").unwrap();
        assert!(sel.matches(&set(&[("env", "qa")])));
        assert!(sel.matches(&set(&[("env", "prod"), ("zone", "z2")])));
        assert!(!sel.matches(&set(&[("env", "prod"), ("zone", "z1")])));
        assert!(!sel.matches(&set(&[("zone", "z2")])));
    }

    #[test]
    fn existence_requirements() {
        let sel = LabelSelector::parse("canary,!legacy").unwrap();
        assert!(sel.matches(&set(&[("canary", "")])));
        assert!(!sel.matches(&set(&[("canary", "1"), ("legacy", "1")])));
        assert!(!sel.matches(&set(&[])));
    }

    #[test]
    fn prefixed_keys_are_accepted() {
        let sel = LabelSelector::parse("flotilla.io/team=infra").unwrap();
        assert!(sel.matches(&set(&[("flotilla.io/team", "infra")])));
    }

    #[test]
    fn malformed_selectors_are_rejected() {
        for bad in [
            "env=prod,",
            "env in ()",
            "env in (a",
            "-bad=1",
            "good=-bad",
            "two words",
            "Bad.Prefix/x=1",
        ] {
            assert!(LabelSelector::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn display_renders_parsed_form() {
        let sel: LabelSelector = "env in (qa,prod),!legacy,tier!=db".parse().unwrap();
        assert_eq!(sel.to_string(), "env in (prod,qa),!legacy,tier!=db");
    }
}
