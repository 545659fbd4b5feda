mod build;
mod doctor;
mod env;
mod local;
mod promote;
mod run;
mod tags;

use crate::GlobalArgs;
use devimg_core::tags::DEFAULT_BRANCH;
use devimg_core::{
    BuildConfig, CiEvent, DevimgConfig, EnvSignals, Overrides, Resolver, default_cache_path,
    dedupe_tags,
};
use devimg_engine::{DockerClient, ToolExecutor};
use devimg_pipeline::PipelineError;
use std::path::{Path, PathBuf};

pub use build::build;
pub use doctor::doctor;
pub use env::env;
pub use local::local;
pub use promote::promote;
pub use run::run;
pub use tags::tags;
pub use test::test;

/// Config, project directory and resolved build parameters for one invocation.
pub(crate) struct Session {
    pub project_dir: PathBuf,
    pub config: DevimgConfig,
    pub build: BuildConfig,
}

impl Session {
    /// The local platform comes from the docker daemon, not from this binary.
    pub async fn open<E: ToolExecutor>(
        global: &GlobalArgs,
        client: &DockerClient<E>,
        refresh: bool,
    ) -> anyhow::Result<Self> {
        let project_dir = project_dir(&global.config);
        let config = DevimgConfig::load_file(&global.config)?;

        let signals = EnvSignals::from_env().with_host_arch(&client.host_arch().await);
        let cache_path = default_cache_path(&signals, &project_dir);
        let resolver = Resolver::new(&config, signals, overrides(global)).with_cache(cache_path);
        if refresh {
            resolver.invalidate()?;
        }
        let build = resolver.resolve();

        Ok(Self {
            project_dir,
            config,
            build,
        })
    }
}

fn project_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn overrides(global: &GlobalArgs) -> Overrides {
    Overrides {
        mode: global.mode,
        platforms: global.platforms.clone(),
        registry: global.registry.clone(),
        repository: global.repository.clone(),
        commit: global.commit.clone(),
    }
}

/// Explicit tags, plus the CI event's tags when asked for, first occurrence kept.
pub(crate) fn destination_tags(explicit: &[String], from_event: bool) -> Vec<String> {
    let mut tags = explicit.to_vec();
    if from_event {
        match CiEvent::from_env() {
            Some(event) => tags.extend(event.tags(&default_branch())),
            None => tracing::warn!("no CI event in the environment; no tags derived"),
        }
    }
    dedupe_tags(&tags)
}

pub(crate) fn default_branch() -> String {
    match std::env::var("DEVIMG_DEFAULT_BRANCH") {
        Ok(branch) if !branch.is_empty() => branch,
        _ => DEFAULT_BRANCH.to_owned(),
    }
}

/// Exit status for a failed command: pipeline failures carry their own.
pub(crate) fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<PipelineError>()
        .map_or(1, PipelineError::exit_code)
}

/// Print the per-check / per-tag detail a failure carries.
pub(crate) fn print_failure_detail(error: &PipelineError) {
    match error {
        PipelineError::ValidationFailed { results } => {
            for result in results {
                println!("{result}");
            }
        }
        PipelineError::PromotionPartialFailure { report } => println!("{report}"),
        PipelineError::Build { .. } => {}
    }
}
