//! Workflow identity validation.
//!
//! A workflow name becomes a directory under `.conductor/runs/`, so it is
//! checked before any path is built from it. Validation fails closed: a name
//! is accepted only if every rule passes, and nothing is normalized.

use crate::errors::WorkflowNameError;

/// Longest accepted workflow name, in characters.
pub const MAX_WORKFLOW_NAME_LEN: usize = 64;

/// Names that collide with device files on some platforms or with
/// conductor's own directory layout.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9", "logs",
    "runs",
];

/// Validate a workflow name, returning it unchanged on success.
///
/// Accepted names are 1..=64 characters of ASCII letters, digits, `-`, `_`
/// and `.`, start with a letter or digit, contain no `..`, and are not a
/// reserved device or layout name (compared case-insensitively, ignoring any
/// extension).
pub fn validate(name: &str) -> Result<&str, WorkflowNameError> {
    if name.is_empty() {
        return Err(WorkflowNameError::Empty);
    }

    let len = name.chars().count();
    if len > MAX_WORKFLOW_NAME_LEN {
        return Err(WorkflowNameError::TooLong {
            len,
            max: MAX_WORKFLOW_NAME_LEN,
        });
    }

    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(WorkflowNameError::PathTraversal);
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(WorkflowNameError::InvalidCharacter(bad));
    }

    // Leading '.', '-' or '_' would produce hidden files or flag-like arguments.
    if let Some(first) = name.chars().next()
        && !first.is_ascii_alphanumeric()
    {
        return Err(WorkflowNameError::InvalidCharacter(first));
    }

    let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return Err(WorkflowNameError::Reserved(name.to_string()));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["nightly", "release-2024.10", "feature_x", "A1", "x"] {
            assert_eq!(validate(name), Ok(name), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate(""), Err(WorkflowNameError::Empty));
    }

    #[test]
    fn rejects_traversal() {
        assert_eq!(validate("../etc"), Err(WorkflowNameError::PathTraversal));
        assert_eq!(validate("a/b"), Err(WorkflowNameError::PathTraversal));
        assert_eq!(validate("a\\b"), Err(WorkflowNameError::PathTraversal));
        assert_eq!(validate("a..b"), Err(WorkflowNameError::PathTraversal));
    }

    #[test]
    fn rejects_too_long() {
        let name = "a".repeat(MAX_WORKFLOW_NAME_LEN + 1);
        assert_eq!(
            validate(&name),
            Err(WorkflowNameError::TooLong {
                len: MAX_WORKFLOW_NAME_LEN + 1,
                max: MAX_WORKFLOW_NAME_LEN
            })
        );
        assert!(validate(&"a".repeat(MAX_WORKFLOW_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert_eq!(
            validate("my workflow"),
            Err(WorkflowNameError::InvalidCharacter(' '))
        );
        assert_eq!(
            validate("wf$"),
            Err(WorkflowNameError::InvalidCharacter('$'))
        );
        assert_eq!(
            validate("naïve"),
            Err(WorkflowNameError::InvalidCharacter('ï'))
        );
        assert_eq!(
            validate("wf\0"),
            Err(WorkflowNameError::InvalidCharacter('\0'))
        );
    }

    #[test]
    fn rejects_leading_punctuation() {
        assert_eq!(
            validate(".hidden"),
            Err(WorkflowNameError::InvalidCharacter('.'))
        );
        assert_eq!(
            validate("-rf"),
            Err(WorkflowNameError::InvalidCharacter('-'))
        );
    }

    #[test]
    fn rejects_reserved_names_case_insensitively() {
        assert!(matches!(validate("CON"), Err(WorkflowNameError::Reserved(_))));
        assert!(matches!(validate("nul.txt"), Err(WorkflowNameError::Reserved(_))));
        assert!(matches!(validate("runs"), Err(WorkflowNameError::Reserved(_))));
        assert!(validate("console").is_ok());
    }
}
