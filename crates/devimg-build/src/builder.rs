use crate::backend::BuildBackend;
use crate::context::BuildContext;
use crate::error::BuildError;
use devimg_core::{BuildConfig, BuildSettings, Mode, Platform, join_platforms};
use devimg_engine::{BuildRequest, DockerClient, OutputMode, ToolError, ToolExecutor};
use std::collections::BTreeMap;
use std::fmt;

/// Suffix appended to the staging reference for the diagnostic build.
const DIAGNOSTIC_SUFFIX: &str = "-diag";

/// Build parameters that do not depend on mode or backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub build_args: BTreeMap<String, String>,
    pub cache_from: Vec<String>,
    pub cache_to: Vec<String>,
}

impl From<&BuildSettings> for BuildOptions {
    fn from(settings: &BuildSettings) -> Self {
        Self {
            build_args: settings.build_args.clone(),
            cache_from: settings.cache_from.clone(),
            cache_to: settings.cache_to.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPurpose {
    /// The build the run asked for
    Primary,
    /// Same build through the other backend
    Fallback,
    /// Host-only, load-only rebuild after a failed CI build, for inspection
    Diagnostic,
}

impl fmt::Display for AttemptPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
            Self::Diagnostic => f.write_str("diagnostic"),
        }
    }
}

/// One step of the build plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAttempt {
    pub purpose: AttemptPurpose,
    pub backend: BuildBackend,
    pub tag: String,
    pub platforms: Vec<Platform>,
    pub output: OutputMode,
}

impl fmt::Display for BuildAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = match self.output {
            OutputMode::Push => "push",
            OutputMode::Load => "load",
        };
        write!(
            f,
            "{} via {} [{}] {output} {}",
            self.purpose,
            self.backend,
            join_platforms(&self.platforms),
            self.tag
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        detail: String,
        /// Looks like a registry/network hiccup rather than a broken recipe
        transient: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: BuildAttempt,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => write!(f, "{}: ok", self.attempt),
            AttemptOutcome::Failed {
                detail,
                transient: false,
            } => write!(f, "{}: {detail}", self.attempt),
            AttemptOutcome::Failed {
                detail,
                transient: true,
            } => write!(
                f,
                "{}: {detail} (network error, re-run the pipeline)",
                self.attempt
            ),
        }
    }
}

/// A verified image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub reference: String,
    pub platforms: Vec<Platform>,
    /// Present in the local image store (single platform)
    pub locally_loaded: bool,
}

/// Runs an ordered plan of build attempts against one backend choice.
pub struct ImageBuilder<'a, E: ToolExecutor> {
    client: &'a DockerClient<E>,
    backend: BuildBackend,
    options: BuildOptions,
}

impl<'a, E: ToolExecutor> ImageBuilder<'a, E> {
    pub fn new(client: &'a DockerClient<E>, backend: BuildBackend, options: BuildOptions) -> Self {
        Self {
            client,
            backend,
            options,
        }
    }

    pub fn backend(&self) -> BuildBackend {
        self.backend
    }

    /// Ordered attempts for a context under a config.
    ///
    /// Ci: every platform pushed, then a host-only diagnostic load.
    /// Local: one platform loaded, then a Direct retry when the devcontainer
    /// CLI was preferred and a Dockerfile is available.
    pub fn plan(&self, context: &BuildContext, config: &BuildConfig) -> Vec<BuildAttempt> {
        let reference = &config.image_reference;
        let has_dockerfile = context.dockerfile().is_some();

        match config.mode {
            Mode::Ci => {
                let diagnostic_backend = if has_dockerfile {
                    BuildBackend::Direct
                } else {
                    self.backend
                };
                vec![
                    BuildAttempt {
                        purpose: AttemptPurpose::Primary,
                        backend: self.backend,
                        tag: reference.clone(),
                        platforms: config.platforms.clone(),
                        output: OutputMode::Push,
                    },
                    BuildAttempt {
                        purpose: AttemptPurpose::Diagnostic,
                        backend: diagnostic_backend,
                        tag: format!("{reference}{DIAGNOSTIC_SUFFIX}"),
                        platforms: vec![config.host.clone()],
                        output: OutputMode::Load,
                    },
                ]
            }
            Mode::Local => {
                let platform = local_platform(config);
                let mut attempts = vec![BuildAttempt {
                    purpose: AttemptPurpose::Primary,
                    backend: self.backend,
                    tag: reference.clone(),
                    platforms: vec![platform.clone()],
                    output: OutputMode::Load,
                }];
                if self.backend == BuildBackend::HighLevel && has_dockerfile {
                    attempts.push(BuildAttempt {
                        purpose: AttemptPurpose::Fallback,
                        backend: BuildBackend::Direct,
                        tag: reference.clone(),
                        platforms: vec![platform],
                        output: OutputMode::Load,
                    });
                }
                attempts
            }
        }
    }

    /// Build and verify `config.image_reference` from `context`.
    pub async fn build(
        &self,
        context: &BuildContext,
        config: &BuildConfig,
    ) -> Result<BuiltImage, BuildError> {
        let plan = self.plan(context, config);
        let mut records = Vec::with_capacity(plan.len());
        let mut diagnostic_image = None;

        for attempt in plan {
            tracing::info!(%attempt, "building");
            match self.run_attempt(context, &attempt).await {
                Ok(()) if attempt.purpose == AttemptPurpose::Diagnostic => {
                    tracing::info!(image = %attempt.tag, "diagnostic image loaded for inspection");
                    diagnostic_image = Some(attempt.tag.clone());
                    records.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::Succeeded,
                    });
                }
                Ok(()) => return self.verify(&attempt).await,
                Err(e) => {
                    tracing::warn!(%attempt, error = %e, "build attempt failed");
                    records.push(AttemptRecord {
                        outcome: AttemptOutcome::Failed {
                            detail: e.to_string(),
                            transient: e.is_transient(),
                        },
                        attempt,
                    });
                }
            }
        }

        Err(BuildError::BuildFailed {
            reference: config.image_reference.clone(),
            attempts: records,
            diagnostic_image,
        })
    }

    async fn run_attempt(
        &self,
        context: &BuildContext,
        attempt: &BuildAttempt,
    ) -> Result<(), ToolError> {
        let (dir, dockerfile) = match attempt.backend {
            BuildBackend::HighLevel => (context.dir(), None),
            BuildBackend::Direct => (context.direct_context(), context.dockerfile()),
        };
        let request = BuildRequest {
            context: dir.to_path_buf(),
            dockerfile: dockerfile.map(|p| p.to_path_buf()),
            tag: attempt.tag.clone(),
            platforms: attempt.platforms.clone(),
            output: attempt.output,
            build_args: self.options.build_args.clone(),
            cache_from: self.options.cache_from.clone(),
            cache_to: self.options.cache_to.clone(),
        };

        match attempt.backend {
            BuildBackend::HighLevel => self.client.devcontainer_build(&request).await,
            BuildBackend::Direct => self.client.buildx_build(&request).await,
        }
    }

    async fn verify(&self, attempt: &BuildAttempt) -> Result<BuiltImage, BuildError> {
        let reference = &attempt.tag;
        let present = match attempt.output {
            OutputMode::Load => self.client.image_exists(reference).await,
            OutputMode::Push => self.client.remote_exists(reference).await,
        };

        match present {
            Ok(true) => {
                tracing::info!(reference, "image verified");
                Ok(BuiltImage {
                    reference: reference.clone(),
                    platforms: attempt.platforms.clone(),
                    locally_loaded: attempt.output == OutputMode::Load,
                })
            }
            Ok(false) => Err(BuildError::VerificationFailed {
                reference: reference.clone(),
                detail: match attempt.output {
                    OutputMode::Load => "not in the local image store".to_owned(),
                    OutputMode::Push => "manifest not found in the registry".to_owned(),
                },
            }),
            Err(e) => Err(BuildError::VerificationFailed {
                reference: reference.clone(),
                detail: e.to_string(),
            }),
        }
    }
}

/// Local builds load into the image store, which holds one platform.
fn local_platform(config: &BuildConfig) -> Platform {
    match config.platforms.as_slice() {
        [single] => single.clone(),
        _ => {
            tracing::warn!(
                requested = %join_platforms(&config.platforms),
                host = %config.host,
                "local builds load a single platform; building for the host"
            );
            config.host.clone()
        }
    }
}
