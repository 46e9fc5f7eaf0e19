//! Common selector plumbing shared by label and field selectors.

use std::collections::BTreeMap;

use thiserror::Error;

/// A flat `key → value` set that selectors are evaluated against.
pub type Set = BTreeMap<String, String>;

/// Errors produced while parsing a selector expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty requirement in selector: {0:?}")]
    EmptyRequirement(String),

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("malformed requirement: {0:?}")]
    Malformed(String),

    #[error("operator {op} needs at least one value: {requirement:?}")]
    EmptyValueSet { op: &'static str, requirement: String },
}

/// Something that decides whether a [`Set`] is selected.
///
/// Label and field selectors are independent implementations so the
/// registry filter can evaluate either without knowing its syntax.
pub trait Matcher {
    fn matches(&self, set: &Set) -> bool;

    /// True when the matcher selects every set.
    fn is_empty(&self) -> bool;
}

/// Split a selector expression on top-level commas.
///
/// Commas inside parentheses (set-based `in`/`notin` values) are kept.
pub(crate) fn split_requirements(input: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::Malformed(input.to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::Malformed(input.to_string()));
    }
    parts.push(input[start..].trim());

    if let Some(empty) = parts.iter().find(|p| p.is_empty()) {
        return Err(SelectorError::EmptyRequirement(empty.to_string()));
    }
    Ok(parts)
}
