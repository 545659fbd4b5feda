/// Stderr fragments that indicate a registry or network hiccup rather than
/// a problem with the image or the invocation.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "no such host",
    "temporary failure in name resolution",
    "network is unreachable",
    "503 service unavailable",
    "502 bad gateway",
    "429 too many requests",
    "toomanyrequests",
    "unexpected eof",
];

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program} not found — is it installed and on PATH?")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} command failed: {args:?}\n{stderr}")]
    CommandFailed {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} output was not valid UTF-8")]
    InvalidUtf8 {
        program: String,
        source: std::string::FromUtf8Error,
    },

    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),
}

impl ToolError {
    /// Registry or network connectivity failure. These are worth re-running
    /// the pipeline for; nothing in devimg retries them on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }

    /// The required binary is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
