use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::env::{BuildConfig, EnvSignals, ResolverInputs};

/// Cache file name inside the runner temp dir or `.devimg/`.
const CACHE_FILE: &str = "devimg-env.json";

/// Memoized resolver output for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverCache {
    pub run_id: String,
    pub inputs: ResolverInputs,
    pub config: BuildConfig,
}

impl ResolverCache {
    /// Read the cache. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> crate::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::CacheRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| crate::Error::CacheFormat {
                path: path.to_path_buf(),
                source: e,
            })
    }

    pub fn store(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::Error::CacheWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| crate::Error::CacheFormat {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| crate::Error::CacheWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn remove(path: &Path) -> crate::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::Error::CacheWrite {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// `$RUNNER_TEMP/devimg-env.json` on CI runners, `.devimg/devimg-env.json` otherwise.
///
/// The runner temp dir is wiped between jobs, which bounds the cache to
/// one pipeline run.
pub fn default_cache_path(signals: &EnvSignals, project_dir: &Path) -> PathBuf {
    match &signals.runner_temp {
        Some(dir) => dir.join(CACHE_FILE),
        None => project_dir.join(".devimg").join(CACHE_FILE),
    }
}
