//! Execution-context detection and `BuildConfig` resolution.
//!
//! Ambient signals are captured once into [`EnvSignals`] and handed to a
//! [`Resolver`]; nothing downstream reads the process environment. The
//! resolver never fails: every field has a safe default, and an unusable
//! cache only costs a re-detection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::ResolverCache;
use crate::config::DevimgConfig;
use crate::platform::{Platform, join_platforms};
use crate::tags::sanitize_tag;

/// Commit id used when no commit identifier is available.
pub const LOCAL_SESSION_ID: &str = "local";

/// Repository used when neither config nor environment names one.
pub const DEFAULT_REPOSITORY: &str = "devimg/devenv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Hosted CI: multi-arch, pushed to the registry
    Ci,
    /// Local or emulated run: host arch only, loaded into the local store
    Local,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ci => f.write_str("ci"),
            Self::Local => f.write_str("local"),
        }
    }
}

impl FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ci" => Ok(Self::Ci),
            "local" => Ok(Self::Local),
            other => Err(crate::Error::InvalidMode(other.to_owned())),
        }
    }
}

/// Ambient inputs, read once at process start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSignals {
    /// `DEVIMG_MODE`
    pub mode: Option<String>,
    /// `ACT` — running under a local CI-runner emulator
    pub local_emulation: bool,
    /// `GITHUB_ACTIONS` or `CI`
    pub hosted_ci: bool,
    /// `DEVIMG_REGISTRY`
    pub registry: Option<String>,
    /// `DEVIMG_REPOSITORY`, else `GITHUB_REPOSITORY`
    pub repository: Option<String>,
    /// `DEVIMG_COMMIT`, else `GITHUB_SHA`
    pub commit: Option<String>,
    /// `DEVIMG_PLATFORMS`, comma separated
    pub platforms: Option<String>,
    /// `GITHUB_RUN_ID`
    pub run_id: Option<String>,
    /// `RUNNER_TEMP`
    pub runner_temp: Option<PathBuf>,
    /// Architecture reported by the host probe, before normalization
    pub host_arch: String,
}

impl EnvSignals {
    /// Capture signals from the process environment.
    pub fn from_env() -> Self {
        // arch-lint: allow(no-silent-result-drop) reason="an unset or non-UTF-8 variable is an absent signal"
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Capture signals through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let truthy = |key: &str| {
            non_empty(key)
                .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        };

        Self {
            mode: non_empty("DEVIMG_MODE"),
            local_emulation: truthy("ACT"),
            hosted_ci: truthy("GITHUB_ACTIONS") || truthy("CI"),
            registry: non_empty("DEVIMG_REGISTRY"),
            repository: non_empty("DEVIMG_REPOSITORY").or_else(|| non_empty("GITHUB_REPOSITORY")),
            commit: non_empty("DEVIMG_COMMIT").or_else(|| non_empty("GITHUB_SHA")),
            platforms: non_empty("DEVIMG_PLATFORMS"),
            run_id: non_empty("GITHUB_RUN_ID"),
            runner_temp: non_empty("RUNNER_TEMP").map(PathBuf::from),
            host_arch: std::env::consts::ARCH.to_owned(),
        }
    }

    /// Replace the compile-target architecture with a probed one.
    pub fn with_host_arch(mut self, arch: &str) -> Self {
        self.host_arch = arch.to_owned();
        self
    }

    /// Identifier of the current pipeline run, used to key the cache.
    pub fn run_id(&self) -> &str {
        match &self.run_id {
            Some(id) => id.as_str(),
            None => LOCAL_SESSION_ID,
        }
    }
}

/// Explicit caller-supplied settings; each one beats every ambient signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub platforms: Vec<Platform>,
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub commit: Option<String>,
}

/// Canonical build parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub mode: Mode,
    /// Never empty
    pub platforms: Vec<Platform>,
    /// Normalized platform of the build host
    pub host: Platform,
    pub registry: String,
    pub repository: String,
    pub commit_or_session_id: String,
    /// `registry/repository:ci-{commit_or_session_id}`
    pub image_reference: String,
}

impl BuildConfig {
    pub fn new(
        mode: Mode,
        platforms: Vec<Platform>,
        host: Platform,
        registry: &str,
        repository: &str,
        commit_or_session_id: &str,
    ) -> Self {
        let platforms = if platforms.is_empty() {
            vec![host.clone()]
        } else {
            platforms
        };
        let image_reference = staging_reference(registry, repository, commit_or_session_id);
        Self {
            mode,
            platforms,
            host,
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            commit_or_session_id: commit_or_session_id.to_owned(),
            image_reference,
        }
    }

    /// Same run, different repository (used for image variants).
    pub fn with_repository(&self, repository: &str) -> Self {
        Self::new(
            self.mode,
            self.platforms.clone(),
            self.host.clone(),
            &self.registry,
            repository,
            &self.commit_or_session_id,
        )
    }

    /// Fully qualified reference for a final published tag.
    pub fn destination(&self, tag: &str) -> String {
        format!("{}:{tag}", self.repository_path())
    }

    fn repository_path(&self) -> String {
        repository_path(&self.registry, &self.repository)
    }

    pub fn is_multi_platform(&self) -> bool {
        self.platforms.len() > 1
    }
}

impl fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode:       {}", self.mode)?;
        writeln!(f, "platforms:  {}", join_platforms(&self.platforms))?;
        writeln!(f, "host:       {}", self.host)?;
        writeln!(f, "registry:   {}", self.registry)?;
        writeln!(f, "repository: {}", self.repository)?;
        writeln!(f, "commit:     {}", self.commit_or_session_id)?;
        write!(f, "image:      {}", self.image_reference)
    }
}

fn repository_path(registry: &str, repository: &str) -> String {
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() {
        repository.to_owned()
    } else {
        format!("{registry}/{repository}")
    }
}

/// Staging reference that isolates in-flight builds from published tags.
pub fn staging_reference(registry: &str, repository: &str, commit_or_session_id: &str) -> String {
    format!(
        "{}:ci-{commit_or_session_id}",
        repository_path(registry, repository)
    )
}

/// Everything detection depends on. A cached config is reused only when
/// the inputs it was derived from are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverInputs {
    pub signals: EnvSignals,
    pub overrides: Overrides,
    pub registry: String,
    pub repository: Option<String>,
    pub ci_platforms: Vec<Platform>,
}

/// Produces a [`BuildConfig`] from config, signals and overrides.
pub struct Resolver {
    inputs: ResolverInputs,
    cache_path: Option<PathBuf>,
}

impl Resolver {
    pub fn new(config: &DevimgConfig, signals: EnvSignals, overrides: Overrides) -> Self {
        Self {
            inputs: ResolverInputs {
                signals,
                overrides,
                registry: config.image.registry.clone(),
                repository: config.image.repository.clone(),
                ci_platforms: config.build.ci_platforms.clone(),
            },
            cache_path: None,
        }
    }

    /// Memoize resolution in the given cache file.
    pub fn with_cache(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    /// Resolve, reusing a cached result from the same run when possible.
    pub fn resolve(&self) -> BuildConfig {
        let run_id = self.inputs.signals.run_id();

        if let Some(path) = &self.cache_path {
            match ResolverCache::load(path) {
                Ok(Some(entry)) if entry.run_id == run_id && entry.inputs == self.inputs => {
                    tracing::debug!(path = %path.display(), "using cached build config");
                    return entry.config;
                }
                Ok(Some(_)) => {
                    tracing::debug!(path = %path.display(), "cached build config is stale");
                }
                Ok(None) => {}
                // arch-lint: allow(no-error-swallowing) reason="a corrupt cache only costs a re-detection"
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable resolver cache");
                }
            }
        }

        let config = self.detect();

        if let Some(path) = &self.cache_path {
            let entry = ResolverCache {
                run_id: run_id.to_owned(),
                inputs: self.inputs.clone(),
                config: config.clone(),
            };
            // arch-lint: allow(no-error-swallowing) reason="resolution succeeded; the cache is an optimization"
            if let Err(e) = entry.store(path) {
                tracing::warn!(error = %e, "could not persist resolver cache");
            }
        }

        config
    }

    /// Remove the cache file so the next [`resolve`](Self::resolve) re-detects.
    pub fn invalidate(&self) -> crate::Result<()> {
        match &self.cache_path {
            Some(path) => ResolverCache::remove(path),
            None => Ok(()),
        }
    }

    /// Detection without the cache.
    pub fn detect(&self) -> BuildConfig {
        let ResolverInputs {
            signals,
            overrides,
            registry,
            repository,
            ci_platforms,
        } = &self.inputs;

        let mode = detect_mode(signals, overrides.mode);
        let host = Platform::linux(&signals.host_arch);

        let platforms = if !overrides.platforms.is_empty() {
            overrides.platforms.clone()
        } else if let Some(env_platforms) = signals.platforms.as_deref().and_then(parse_platform_list)
        {
            env_platforms
        } else {
            match mode {
                Mode::Ci if !ci_platforms.is_empty() => ci_platforms.clone(),
                Mode::Ci => Platform::ci_defaults(),
                Mode::Local => vec![host.clone()],
            }
        };

        let registry = match overrides.registry.as_ref().or(signals.registry.as_ref()) {
            Some(explicit) => explicit.clone(),
            None => registry.clone(),
        };

        let repository = match overrides
            .repository
            .as_ref()
            .or(signals.repository.as_ref())
            .or(repository.as_ref())
        {
            Some(repository) => repository.to_ascii_lowercase(),
            None => DEFAULT_REPOSITORY.to_owned(),
        };

        let commit = match overrides
            .commit
            .as_deref()
            .or(signals.commit.as_deref())
            .map(sanitize_commit)
        {
            Some(id) if !id.is_empty() => id,
            _ => LOCAL_SESSION_ID.to_owned(),
        };

        let config = BuildConfig::new(mode, platforms, host, &registry, &repository, &commit);
        tracing::info!(
            mode = %config.mode,
            platforms = %join_platforms(&config.platforms),
            image = %config.image_reference,
            "resolved build config"
        );
        config
    }
}

/// Override → local emulation → hosted CI → Local.
fn detect_mode(signals: &EnvSignals, explicit: Option<Mode>) -> Mode {
    if let Some(mode) = explicit {
        return mode;
    }

    if let Some(raw) = &signals.mode {
        match raw.parse() {
            Ok(mode) => return mode,
            // arch-lint: allow(no-error-swallowing) reason="a bad DEVIMG_MODE falls through to CI detection"
            Err(e) => tracing::warn!(error = %e, "ignoring DEVIMG_MODE"),
        }
    }

    if signals.local_emulation {
        Mode::Local
    } else if signals.hosted_ci {
        Mode::Ci
    } else {
        Mode::Local
    }
}

/// Parse a comma-separated platform list; `None` if nothing valid remains.
fn parse_platform_list(raw: &str) -> Option<Vec<Platform>> {
    let mut platforms = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<Platform>() {
            Ok(p) if !platforms.contains(&p) => platforms.push(p),
            Ok(_) => {}
            // arch-lint: allow(no-error-swallowing) reason="invalid entries are dropped, the rest still apply"
            Err(e) => tracing::warn!(error = %e, "ignoring platform from DEVIMG_PLATFORMS"),
        }
    }
    (!platforms.is_empty()).then_some(platforms)
}

/// Commit ids become part of a tag: `ci-` + id must fit in 128 characters.
fn sanitize_commit(raw: &str) -> String {
    let mut id = sanitize_tag(raw.trim());
    id.truncate(125);
    id
}
