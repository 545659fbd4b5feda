use crate::builder::AttemptRecord;
use crate::context::ContextError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{tool} not available — {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error(
        "build of {reference} failed after {} attempt(s):\n{}",
        attempts.len(),
        format_attempts(attempts)
    )]
    BuildFailed {
        reference: String,
        attempts: Vec<AttemptRecord>,
        /// Single-platform image loaded locally for inspection, if the
        /// diagnostic build succeeded
        diagnostic_image: Option<String>,
    },

    #[error("build reported success but {reference} is not present: {detail}")]
    VerificationFailed { reference: String, detail: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

fn format_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| format!("  - {a}"))
        .collect::<Vec<_>>()
        .join("\n")
}
