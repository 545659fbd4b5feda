use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid platform {value:?}: {reason}")]
    InvalidPlatform { value: String, reason: &'static str },

    #[error("invalid mode {0:?} — expected `ci` or `local`")]
    InvalidMode(String),

    #[error(
        "unknown variant '{name}'; configured variants: {}",
        format_variants(available)
    )]
    UnknownVariant {
        name: String,
        available: Vec<String>,
    },

    #[error(
        "[validate].nested_timeout_secs = {configured} is shorter than the nested check's own bounds ({required}s)"
    )]
    NestedTimeoutTooShort { configured: u64, required: u64 },

    // ── Resolver cache ──
    #[error("failed to read resolver cache at {path}")]
    CacheRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write resolver cache at {path}")]
    CacheWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("resolver cache at {path} is malformed")]
    CacheFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn format_variants(variants: &[String]) -> String {
    if variants.is_empty() {
        "(none)".to_owned()
    } else {
        variants.join(", ")
    }
}
