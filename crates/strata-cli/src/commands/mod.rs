pub mod commit;
pub mod snapshot;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use strata_core::CoreError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// Message prefixes of errors caused by the command line rather than the store.
const INPUT_ERROR_PREFIXES: &[&str] = &[
    "no such ",
    "multiple IDs found",
    "invalid reference:",
    "invalid label format",
    "received an empty value",
    "unknown change directive",
    "malformed json",
    "unsupported:",
    "configuration error:",
];

const STORE_ERROR_PREFIXES: &[&str] = &["store error:", "store lock:", "failed to "];

/// Ending of a wrapped missing-object error, e.g.
/// `failed to get snapshot info: snapshot x: not found`.
const NOT_FOUND_SUFFIX: &str = ": not found";

pub fn exit_code_for(msg: &str) -> u8 {
    let input = INPUT_ERROR_PREFIXES.iter().any(|p| msg.starts_with(p));
    if input || msg.ends_with(NOT_FOUND_SUFFIX) {
        EXIT_INPUT_ERROR
    } else if STORE_ERROR_PREFIXES.iter().any(|p| msg.starts_with(p)) {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Render a core error for `main`, keeping its message prefix intact.
pub fn fail(e: &CoreError) -> String {
    if e.is_canceled() {
        return format!("interrupted: {e}");
    }
    match e {
        CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Oci(_) => {
            format!("store error: {e}")
        }
        _ => e.to_string(),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn colorize_kind(kind: &str) -> String {
    use console::Style;
    match kind {
        "active" => Style::new().green().apply_to(kind).to_string(),
        "committed" => Style::new().blue().apply_to(kind).to_string(),
        "view" => Style::new().dim().apply_to(kind).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::{ContextError, StoreError};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains('\n'));
    }

    #[test]
    fn input_errors_map_to_input_code() {
        for msg in [
            "no such container abc",
            "multiple IDs found with provided prefix: ab",
            "invalid label format \"x\" (expected LABEL=VALUE)",
            "unknown change directive \"FOO\"",
        ] {
            assert_eq!(exit_code_for(msg), EXIT_INPUT_ERROR, "{msg}");
        }
    }

    #[test]
    fn wrapped_not_found_maps_to_input_code() {
        assert_eq!(
            exit_code_for("failed to get snapshot info: snapshot x: not found"),
            EXIT_INPUT_ERROR
        );
    }

    #[test]
    fn exit_code_agrees_with_error_kind() {
        let errors = [
            CoreError::NotFound("container x".to_owned()),
            CoreError::AmbiguousReference("ab".to_owned()),
            CoreError::InvalidLabel("x".to_owned()),
            CoreError::Upstream {
                step: "get snapshot info".to_owned(),
                source: StoreError::NotFound("snapshot x".to_owned()),
            },
            CoreError::Upstream {
                step: "update snapshot".to_owned(),
                source: StoreError::FailedPrecondition("busy".to_owned()),
            },
            CoreError::Io(std::io::Error::other("disk full")),
        ];
        for e in &errors {
            let input = exit_code_for(&fail(e)) == EXIT_INPUT_ERROR;
            assert_eq!(input, e.is_input_error(), "{e}");
        }
    }

    #[test]
    fn store_errors_map_to_store_code() {
        assert_eq!(
            exit_code_for("failed to update snapshot: failed precondition: busy"),
            EXIT_STORE_ERROR
        );
        assert_eq!(exit_code_for("store lock: busy"), EXIT_STORE_ERROR);
        assert_eq!(exit_code_for("interrupted: context canceled"), EXIT_FAILURE);
    }

    #[test]
    fn fail_marks_canceled_and_io_errors() {
        let canceled = CoreError::Upstream {
            step: "stat snapshot".to_owned(),
            source: StoreError::Context(ContextError::Canceled),
        };
        assert!(fail(&canceled).starts_with("interrupted: "));

        let io = CoreError::Io(std::io::Error::other("disk full"));
        assert_eq!(exit_code_for(&fail(&io)), EXIT_STORE_ERROR);

        let nf = CoreError::NotFound("container x".to_owned());
        assert_eq!(fail(&nf), "no such container x");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_INPUT_ERROR);
        assert_ne!(EXIT_INPUT_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn colorize_kind_keeps_text() {
        assert!(colorize_kind("active").contains("active"));
        assert_eq!(colorize_kind("other"), "other");
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        pb.finish_and_clear();
    }
}
