//! Parsing of `--change` directives applied to a committed image config.
//!
//! A directive is a keyword followed by a JSON array of strings, for example
//! `CMD ["/bin/sh", "-c", "echo hi"]`. Only `CMD` and `ENTRYPOINT` are
//! accepted; repeating a keyword keeps the last value and records a warning.
//! A JSON `null` value leaves the field inherited.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CMD_DIRECTIVE: &str = "CMD";
pub const ENTRYPOINT_DIRECTIVE: &str = "ENTRYPOINT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeError {
    #[error("received an empty value in change flag")]
    InvalidInput,
    #[error("unknown change directive {0:?}")]
    UnsupportedDirective(String),
    #[error("malformed json in change flag value {0:?}")]
    MalformedValue(String),
}

/// Config overrides requested for a commit.
///
/// `None` means "inherit from the base image"; `Some(vec![])` is an explicit
/// empty override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Non-fatal diagnostics produced while parsing.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.cmd.is_none() && self.entrypoint.is_none()
    }
}

/// Parse user-supplied change directives in order.
pub fn parse_changes<S: AsRef<str>>(directives: &[S]) -> Result<ChangeSet, ChangeError> {
    let mut changes = ChangeSet::default();
    for raw in directives {
        let raw = raw.as_ref();
        let Some(keyword) = raw.split_whitespace().next() else {
            return Err(ChangeError::InvalidInput);
        };
        // Everything after the keyword itself, leading whitespace included.
        let keyword_end = raw.find(keyword).unwrap_or(0) + keyword.len();
        let value = &raw[keyword_end..];

        let slot = match keyword {
            CMD_DIRECTIVE => &mut changes.cmd,
            ENTRYPOINT_DIRECTIVE => &mut changes.entrypoint,
            other => return Err(ChangeError::UnsupportedDirective(other.to_owned())),
        };
        // `null` decodes to no override and clears an earlier one.
        let parsed: Option<Vec<String>> = serde_json::from_str(value)
            .map_err(|_| ChangeError::MalformedValue(raw.to_owned()))?;
        if slot.is_some() {
            let msg = format!(
                "multiple change flags supplied for the {keyword} directive, overriding with last supplied"
            );
            warn!("{msg}");
            changes.warnings.push(msg);
        }
        *slot = parsed;
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_override_parsed() {
        let c = parse_changes(&[r#"CMD ["a","b"]"#]).unwrap();
        assert_eq!(c.cmd, Some(vec!["a".to_owned(), "b".to_owned()]));
        assert_eq!(c.entrypoint, None);
        assert!(c.warnings.is_empty());
    }

    #[test]
    fn entrypoint_override_parsed() {
        let c = parse_changes(&[r#"ENTRYPOINT ["/bin/sh", "-c"]"#]).unwrap();
        assert_eq!(
            c.entrypoint,
            Some(vec!["/bin/sh".to_owned(), "-c".to_owned()])
        );
        assert!(c.cmd.is_none());
    }

    #[test]
    fn both_kinds_together() {
        let c = parse_changes(&[r#"ENTRYPOINT ["x"]"#, r#"CMD ["y"]"#]).unwrap();
        assert_eq!(c.entrypoint, Some(vec!["x".to_owned()]));
        assert_eq!(c.cmd, Some(vec!["y".to_owned()]));
    }

    #[test]
    fn later_directive_wins_with_warning() {
        let c = parse_changes(&[r#"CMD ["a"]"#, r#"CMD ["b"]"#]).unwrap();
        assert_eq!(c.cmd, Some(vec!["b".to_owned()]));
        assert_eq!(c.warnings.len(), 1);
        assert!(c.warnings[0].contains("CMD"));
    }

    #[test]
    fn unknown_directive_rejected() {
        let err = parse_changes(&["FOO bar"]).unwrap_err();
        assert_eq!(err, ChangeError::UnsupportedDirective("FOO".to_owned()));
    }

    #[test]
    fn empty_directive_rejected() {
        assert_eq!(parse_changes(&[""]).unwrap_err(), ChangeError::InvalidInput);
        assert_eq!(
            parse_changes(&["   "]).unwrap_err(),
            ChangeError::InvalidInput
        );
    }

    #[test]
    fn malformed_json_rejected() {
        let err = parse_changes(&["CMD not-json"]).unwrap_err();
        assert!(matches!(err, ChangeError::MalformedValue(_)));
        let err = parse_changes(&[r#"CMD {"a": 1}"#]).unwrap_err();
        assert!(matches!(err, ChangeError::MalformedValue(_)));
    }

    #[test]
    fn keyword_is_case_sensitive() {
        assert!(matches!(
            parse_changes(&[r#"cmd ["a"]"#]).unwrap_err(),
            ChangeError::UnsupportedDirective(_)
        ));
    }

    #[test]
    fn empty_array_is_explicit_override() {
        let c = parse_changes(&["CMD []"]).unwrap();
        assert_eq!(c.cmd, Some(Vec::new()));
        assert!(!c.is_empty());
    }

    #[test]
    fn null_value_inherits() {
        let c = parse_changes(&["CMD null"]).unwrap();
        assert!(c.cmd.is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn null_value_clears_earlier_override() {
        let c = parse_changes(&[r#"ENTRYPOINT ["/a"]"#, "ENTRYPOINT null"]).unwrap();
        assert!(c.entrypoint.is_none());
        assert_eq!(c.warnings.len(), 1);
    }

    #[test]
    fn no_directives_is_empty_set() {
        let c = parse_changes::<&str>(&[]).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn error_stops_at_first_bad_directive() {
        let err = parse_changes(&[r#"CMD ["ok"]"#, "LABEL a=b", ""]).unwrap_err();
        assert_eq!(err, ChangeError::UnsupportedDirective("LABEL".to_owned()));
    }
}
