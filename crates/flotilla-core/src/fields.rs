//! Field selectors: `field=value`, `field==value`, `field!=value`, comma separated.
//!
//! Fields absent from the evaluated set compare as the empty string.

use std::fmt;
use std::str::FromStr;

use crate::selector::{Matcher, SelectorError, Set, split_requirements};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    pub field: String,
    pub op: FieldOp,
    pub value: String,
}

impl FieldRequirement {
    fn matches(&self, set: &Set) -> bool {
        let actual = set.get(&self.field).map(String::as_str).unwrap_or("");
        match self.op {
            FieldOp::Equals => actual == self.value,
            FieldOp::NotEquals => actual != self.value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::everything());
        }

        let mut requirements = Vec::new();
        for term in split_requirements(input)? {
            requirements.push(parse_term(term)?);
        }
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[FieldRequirement] {
        &self.requirements
    }
}

fn parse_term(term: &str) -> Result<FieldRequirement, SelectorError> {
    let (field, op, value) = if let Some((f, v)) = term.split_once("!=") {
        (f, FieldOp::NotEquals, v)
    } else if let Some((f, v)) = term.split_once("==") {
        (f, FieldOp::Equals, v)
    } else if let Some((f, v)) = term.split_once('=') {
        (f, FieldOp::Equals, v)
    } else {
        return Err(SelectorError::Malformed(term.to_string()));
    };

    let field = field.trim();
    if field.is_empty() || field.contains(char::is_whitespace) {
        return Err(SelectorError::InvalidKey {
            key: field.to_string(),
            reason: "field name must be a single non-empty word",
        });
    }
    Ok(FieldRequirement {
        field: field.to_string(),
        op,
        value: value.trim().to_string(),
    })
}

impl Matcher for FieldSelector {
    fn matches(&self, set: &Set) -> bool {
        self.requirements.iter().all(|r| r.matches(set))
    }

    fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl FromStr for FieldSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r.op {
                FieldOp::Equals => format!("{}={}", r.field, r.value),
                FieldOp::NotEquals => format!("{}!={}", r.field, r.value),
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}
