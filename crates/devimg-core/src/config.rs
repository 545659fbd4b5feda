use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Platform;

/// Default config file name, looked up in the project directory.
pub const CONFIG_FILE: &str = "devimg.toml";

/// Pulls of the smoke image attempted by the nested-daemon check.
pub const NESTED_PULL_ATTEMPTS: u32 = 3;

/// Pause between smoke image pulls.
pub const NESTED_PULL_RETRY_SECS: u32 = 2;

/// Container start and teardown on top of the script's own bounds.
pub const NESTED_STARTUP_GRACE_SECS: u64 = 30;

/// devimg.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevimgConfig {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub validate: ValidateConfig,
    /// Independently built and validated images. Empty means one implicit
    /// variant described by `[image]` and `[validate]`.
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Registry host (defaults to ghcr.io)
    #[serde(default = "default_registry")]
    pub registry: String,
    /// Repository path; falls back to $GITHUB_REPOSITORY, then devimg/devenv
    pub repository: Option<String>,
    /// Build context directory, relative to the project directory
    #[serde(default = "default_context")]
    pub context: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Platforms built in CI mode
    #[serde(default = "Platform::ci_defaults")]
    pub ci_platforms: Vec<Platform>,
    /// `--build-arg` overrides
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// `--cache-from` sources
    #[serde(default)]
    pub cache_from: Vec<String>,
    /// `--cache-to` destinations
    #[serde(default)]
    pub cache_to: Vec<String>,
    /// Files/directories copied into every staged build context.
    /// When empty, the context directory is used in place.
    #[serde(default)]
    pub shared: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Path inside the image that must be writable
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Treat the nested-daemon smoke test as fatal
    #[serde(default)]
    pub strict: bool,
    /// Whether the image advertises nested containerization
    #[serde(default)]
    pub nested_daemon: bool,
    /// Image pulled and run by the nested-daemon smoke test
    #[serde(default = "default_smoke_image")]
    pub smoke_image: String,
    /// Poll budget for the nested daemon to come up
    #[serde(default = "default_daemon_wait_secs")]
    pub daemon_wait_secs: u32,
    /// Bound on each pull/run inside the nested smoke test
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u32,
    /// Bound on the whole nested-daemon container invocation. Defaults to
    /// the script's own worst case plus a startup grace period.
    #[serde(default)]
    pub nested_timeout_secs: Option<u64>,
    /// Host engine socket mounted into the nested-daemon container, for
    /// images that talk to the host daemon instead of starting their own
    #[serde(default)]
    pub daemon_socket: Option<String>,
    /// Toolchain components expected in the image
    #[serde(default)]
    pub tools: Vec<ToolCheck>,
}

/// A toolchain presence/version probe, run through `sh -c` in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCheck {
    pub name: String,
    pub command: String,
}

/// An image variant with its own context, repository and check suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    pub context: Option<PathBuf>,
    pub repository: Option<String>,
    pub nested_daemon: Option<bool>,
    /// Replaces `[validate].tools` when present
    pub tools: Option<Vec<ToolCheck>>,
}

/// A variant with every field resolved against the top-level sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    pub context: PathBuf,
    /// `None` means "use the resolved default repository"
    pub repository: Option<String>,
    pub nested_daemon: bool,
    pub tools: Vec<ToolCheck>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            repository: None,
            context: default_context(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            ci_platforms: Platform::ci_defaults(),
            build_args: BTreeMap::new(),
            cache_from: Vec::new(),
            cache_to: Vec::new(),
            shared: Vec::new(),
        }
    }
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            strict: false,
            nested_daemon: false,
            smoke_image: default_smoke_image(),
            daemon_wait_secs: default_daemon_wait_secs(),
            pull_timeout_secs: default_pull_timeout_secs(),
            nested_timeout_secs: None,
            daemon_socket: None,
            tools: Vec::new(),
        }
    }
}

impl ValidateConfig {
    /// Longest the nested-daemon script can take when every in-container
    /// bound is hit: the daemon poll, each pull attempt with its retry
    /// pause, then the smoke run.
    pub fn nested_script_budget_secs(&self) -> u64 {
        let wait = u64::from(self.daemon_wait_secs);
        let pull = u64::from(self.pull_timeout_secs);
        let attempts = u64::from(NESTED_PULL_ATTEMPTS);
        wait + attempts * (pull + u64::from(NESTED_PULL_RETRY_SECS)) + pull
    }

    /// Outer bound on the nested-daemon container.
    pub fn nested_timeout(&self) -> Duration {
        let secs = match self.nested_timeout_secs {
            Some(secs) => secs,
            None => self.nested_script_budget_secs() + NESTED_STARTUP_GRACE_SECS,
        };
        Duration::from_secs(secs)
    }

    /// An outer bound shorter than the script's own would abandon the
    /// container while the script is still inside its limits.
    fn check(&self) -> crate::Result<()> {
        let required = self.nested_script_budget_secs();
        match self.nested_timeout_secs {
            Some(configured) if configured < required => Err(crate::Error::NestedTimeoutTooShort {
                configured,
                required,
            }),
            _ => Ok(()),
        }
    }
}

impl DevimgConfig {
    /// Load from devimg.toml in the given directory, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        Self::load_file(&project_dir.join(CONFIG_FILE))
    }

    /// Load from an explicit path, or return defaults if it does not exist.
    pub fn load_file(config_path: &Path) -> crate::Result<Self> {
        if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;
            let config: Self = toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.to_path_buf(),
                source: e,
            })?;
            config.validate.check()?;
            Ok(config)
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// All variants, resolved. Always returns at least one.
    pub fn variants(&self) -> Vec<Variant> {
        if self.variants.is_empty() {
            return vec![Variant {
                name: "default".to_owned(),
                context: self.image.context.clone(),
                repository: None,
                nested_daemon: self.validate.nested_daemon,
                tools: self.validate.tools.clone(),
            }];
        }

        self.variants
            .iter()
            .map(|v| Variant {
                name: v.name.clone(),
                context: match &v.context {
                    Some(context) => context.clone(),
                    None => self.image.context.clone(),
                },
                repository: v.repository.clone(),
                nested_daemon: match v.nested_daemon {
                    Some(nested) => nested,
                    None => self.validate.nested_daemon,
                },
                tools: match &v.tools {
                    Some(tools) => tools.clone(),
                    None => self.validate.tools.clone(),
                },
            })
            .collect()
    }

    /// Select variants by name; `None` selects all of them.
    pub fn select_variants(&self, name: Option<&str>) -> crate::Result<Vec<Variant>> {
        let all = self.variants();
        let Some(name) = name else {
            return Ok(all);
        };

        let available: Vec<String> = all.iter().map(|v| v.name.clone()).collect();
        let selected: Vec<Variant> = all.into_iter().filter(|v| v.name == name).collect();
        if selected.is_empty() {
            return Err(crate::Error::UnknownVariant {
                name: name.to_owned(),
                available,
            });
        }
        Ok(selected)
    }
}

fn default_registry() -> String {
    "ghcr.io".to_owned()
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_workspace() -> String {
    "/workspaces".to_owned()
}

fn default_smoke_image() -> String {
    "hello-world:latest".to_owned()
}

fn default_daemon_wait_secs() -> u32 {
    30
}

fn default_pull_timeout_secs() -> u32 {
    120
}

