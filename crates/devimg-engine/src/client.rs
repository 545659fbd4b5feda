use crate::error::ToolError;
use crate::executor::{RealExecutor, ToolExecutor};
use devimg_core::{Platform, join_platforms};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DOCKER: &str = "docker";
pub const DEVCONTAINER: &str = "devcontainer";
pub const ACT: &str = "act";

/// Bound on `docker info` against an unresponsive daemon.
const DAEMON_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Container engine and build tool operations, parameterized over the executor for testability.
pub struct DockerClient<E: ToolExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ToolExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Tool discovery ──

    pub fn has_devcontainer_cli(&self) -> bool {
        self.executor.has_program(DEVCONTAINER)
    }

    pub async fn docker_version(&self) -> Result<String, ToolError> {
        self.executor
            .exec(DOCKER, &args(["version", "--format", "{{.Client.Version}}"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    pub async fn buildx_version(&self) -> Result<String, ToolError> {
        self.executor
            .exec(DOCKER, &args(["buildx", "version"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    pub async fn devcontainer_version(&self) -> Result<String, ToolError> {
        self.executor
            .exec(DEVCONTAINER, &args(["--version"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    pub async fn act_version(&self) -> Result<String, ToolError> {
        self.executor
            .exec(ACT, &args(["--version"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    /// Architecture of the machine the docker daemon runs on, which may
    /// differ from this binary's (emulation, a remote or VM-hosted daemon).
    pub async fn daemon_arch(&self) -> Result<String, ToolError> {
        let probe_args = args(["info", "--format", "{{.Architecture}}"]);
        let probe = self.executor.exec(DOCKER, &probe_args);
        match tokio::time::timeout(DAEMON_PROBE_TIMEOUT, probe).await {
            Ok(result) => result.map(|v| v.trim().to_owned()),
            Err(_) => Err(ToolError::Timeout {
                program: DOCKER.to_owned(),
                secs: DAEMON_PROBE_TIMEOUT.as_secs(),
            }),
        }
    }

    /// Daemon architecture, or the compile target's when the daemon cannot say.
    pub async fn host_arch(&self) -> String {
        match self.daemon_arch().await {
            Ok(arch) if !arch.is_empty() => arch,
            Ok(_) => std::env::consts::ARCH.to_owned(),
            Err(e) => {
                tracing::debug!(error = %e, "daemon architecture unavailable, using {}", std::env::consts::ARCH);
                std::env::consts::ARCH.to_owned()
            }
        }
    }

    /// Probe every external tool devimg can drive.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        report.docker = match self.docker_version().await {
            Ok(v) => CheckResult::ok(&format!("docker {v}")),
            Err(e) => CheckResult::fail(&e.to_string()),
        };
        report.buildx = match self.buildx_version().await {
            Ok(v) => CheckResult::ok(&v),
            Err(e) => CheckResult::fail(&e.to_string()),
        };

        // Optional: buildx covers every build, act only matters for `devimg local`
        report.devcontainer = if self.has_devcontainer_cli() {
            match self.devcontainer_version().await {
                Ok(v) => CheckResult::ok(&format!("devcontainer {v}")),
                Err(e) => CheckResult::fail(&e.to_string()),
            }
        } else {
            CheckResult::fail("not installed (npm install -g @devcontainers/cli)")
        };
        report.act = if self.executor.has_program(ACT) {
            match self.act_version().await {
                Ok(v) => CheckResult::ok(&v),
                Err(e) => CheckResult::fail(&e.to_string()),
            }
        } else {
            CheckResult::fail("not installed (https://nektosact.com)")
        };

        report
    }

    // ── Image store ──

    /// Whether `reference` is present in the local image store.
    ///
    /// A failing `docker image inspect` means "not found"; only a missing
    /// docker binary is an error.
    pub async fn image_exists(&self, reference: &str) -> Result<bool, ToolError> {
        match self
            .executor
            .exec(
                DOCKER,
                &args(["image", "inspect", "--format", "{{.Id}}", reference]),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(ToolError::CommandFailed { stderr, .. }) => {
                tracing::debug!(reference, stderr = %stderr.trim(), "image not in local store");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Digest of the (possibly multi-arch) manifest `reference` points to in its registry.
    pub async fn manifest_digest(&self, reference: &str) -> Result<String, ToolError> {
        self.executor
            .exec(
                DOCKER,
                &args([
                    "buildx",
                    "imagetools",
                    "inspect",
                    reference,
                    "--format",
                    "{{.Manifest.Digest}}",
                ]),
            )
            .await
            .map(|d| d.trim().to_owned())
    }

    /// Whether `reference` resolves in its registry.
    pub async fn remote_exists(&self, reference: &str) -> Result<bool, ToolError> {
        match self.manifest_digest(reference).await {
            Ok(digest) => Ok(!digest.is_empty()),
            Err(ToolError::CommandFailed { stderr, .. }) => {
                tracing::debug!(reference, stderr = %stderr.trim(), "image not in registry");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<(), ToolError> {
        self.executor
            .exec(DOCKER, &args(["tag", source, target]))
            .await
            .map(|_| ())
    }

    pub async fn push(&self, reference: &str) -> Result<(), ToolError> {
        self.executor
            .exec_streaming(DOCKER, &args(["push", reference]))
            .await
    }

    pub async fn pull(&self, reference: &str) -> Result<(), ToolError> {
        self.executor
            .exec_streaming(DOCKER, &args(["pull", reference]))
            .await
    }

    /// Copy the whole manifest list behind `source` to `target`, without
    /// rebuilding or re-pushing per-architecture layers.
    pub async fn copy_manifest(&self, source: &str, target: &str) -> Result<(), ToolError> {
        self.executor
            .exec(
                DOCKER,
                &args(["buildx", "imagetools", "create", "--tag", target, source]),
            )
            .await
            .map(|_| ())
    }

    // ── Containers ──

    /// Run a shell script in a fresh, auto-removed container and capture stdout.
    ///
    /// When `spec.timeout` is set, the docker client is killed after that
    /// long. Killing the client leaves the container running, so a named
    /// container is force-removed as well.
    pub async fn run(&self, spec: &RunSpec) -> Result<String, ToolError> {
        let cmd = run_args(spec);
        let Some(limit) = spec.timeout else {
            return self.executor.exec(DOCKER, &cmd).await;
        };

        match tokio::time::timeout(limit, self.executor.exec(DOCKER, &cmd)).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(name) = &spec.name {
                    self.remove_container(name).await;
                }
                Err(ToolError::Timeout {
                    program: DOCKER.to_owned(),
                    secs: limit.as_secs(),
                })
            }
        }
    }

    /// `docker rm -f`; the timeout is the error reported to the caller.
    async fn remove_container(&self, name: &str) {
        tracing::warn!(container = name, "removing timed-out container");
        // arch-lint: allow(no-error-swallowing) reason="the timeout is already the failure being reported"
        if let Err(e) = self.executor.exec(DOCKER, &args(["rm", "-f", name])).await {
            tracing::warn!(container = name, error = %e, "could not remove container");
        }
    }

    // ── Builds ──

    pub async fn buildx_build(&self, request: &BuildRequest) -> Result<(), ToolError> {
        let cmd = buildx_args(request)?;
        self.executor.exec_streaming(DOCKER, &cmd).await
    }

    pub async fn devcontainer_build(&self, request: &BuildRequest) -> Result<(), ToolError> {
        let cmd = devcontainer_args(request)?;
        self.executor.exec_streaming(DEVCONTAINER, &cmd).await
    }

    // ── Local workflow runs ──

    /// Run the CI workflow locally through `act`.
    pub async fn act(&self, workflow: Option<&Path>, job: Option<&str>) -> Result<(), ToolError> {
        let mut cmd = vec!["push".to_owned()];
        if let Some(workflow) = workflow {
            cmd.push("--workflows".to_owned());
            cmd.push(path_str(workflow)?.to_owned());
        }
        if let Some(job) = job {
            cmd.push("--job".to_owned());
            cmd.push(job.to_owned());
        }
        cmd.push("--env".to_owned());
        cmd.push("ACT=true".to_owned());
        self.executor.exec_streaming(ACT, &cmd).await
    }
}

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub docker: CheckResult,
    pub buildx: CheckResult,
    pub devcontainer: CheckResult,
    pub act: CheckResult,
    pub config_file: CheckResult,
}

impl DoctorReport {
    /// docker and buildx are required; the rest is informational.
    pub fn all_passed(&self) -> bool {
        self.docker.passed && self.buildx.passed
    }
}

impl std::fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = [
            ("docker", &self.docker),
            ("buildx", &self.buildx),
            ("devcontainer", &self.devcontainer),
            ("act", &self.act),
            ("devimg.toml", &self.config_file),
        ];
        for (i, (name, check)) in rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  [{}] {name:<13} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

// ── Request types ──

/// Where a finished build ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Pushed to the registry (required for multi-platform images)
    Push,
    /// Loaded into the local image store (single platform only)
    Load,
}

/// Tool-independent description of one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build context directory
    pub context: PathBuf,
    /// Dockerfile, when the context has one
    pub dockerfile: Option<PathBuf>,
    pub tag: String,
    pub platforms: Vec<Platform>,
    pub output: OutputMode,
    pub build_args: BTreeMap<String, String>,
    pub cache_from: Vec<String>,
    pub cache_to: Vec<String>,
}

/// A shell script to run inside a throwaway container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub script: String,
    /// `--name`, needed to clean up after a timeout
    pub name: Option<String>,
    pub privileged: bool,
    /// `host:container` bind mounts
    pub volumes: Vec<String>,
    pub timeout: Option<Duration>,
}

impl RunSpec {
    pub fn new(image: &str, script: impl Into<String>) -> Self {
        Self {
            image: image.to_owned(),
            script: script.into(),
            name: None,
            privileged: false,
            volumes: Vec::new(),
            timeout: None,
        }
    }
}

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A container name unique within this host for the life of the process.
pub fn container_name(prefix: &str) -> String {
    let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{seq}", std::process::id())
}

// ── Argument builders ──

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut cmd = vec!["run".to_owned(), "--rm".to_owned()];
    if let Some(name) = &spec.name {
        cmd.push("--name".to_owned());
        cmd.push(name.clone());
    }
    if spec.privileged {
        cmd.push("--privileged".to_owned());
    }
    for volume in &spec.volumes {
        cmd.push("--volume".to_owned());
        cmd.push(volume.clone());
    }
    cmd.extend([
        "--entrypoint".to_owned(),
        "/bin/sh".to_owned(),
        spec.image.clone(),
        "-c".to_owned(),
        spec.script.clone(),
    ]);
    cmd
}

/// `docker buildx build` arguments for a request.
pub fn buildx_args(request: &BuildRequest) -> Result<Vec<String>, ToolError> {
    let mut cmd = vec!["buildx".to_owned(), "build".to_owned()];

    if let Some(dockerfile) = &request.dockerfile {
        cmd.push("--file".to_owned());
        cmd.push(path_str(dockerfile)?.to_owned());
    }

    cmd.push("--platform".to_owned());
    cmd.push(join_platforms(&request.platforms));
    cmd.push("--tag".to_owned());
    cmd.push(request.tag.clone());

    cmd.push(
        match request.output {
            OutputMode::Push => "--push",
            OutputMode::Load => "--load",
        }
        .to_owned(),
    );

    for (key, value) in &request.build_args {
        cmd.push("--build-arg".to_owned());
        cmd.push(format!("{key}={value}"));
    }
    for source in &request.cache_from {
        cmd.push("--cache-from".to_owned());
        cmd.push(source.clone());
    }
    for dest in &request.cache_to {
        cmd.push("--cache-to".to_owned());
        cmd.push(dest.clone());
    }

    cmd.push(path_str(&request.context)?.to_owned());
    Ok(cmd)
}

/// `devcontainer build` arguments for a request.
///
/// The devcontainer CLI reads build args from `devcontainer.json`, so
/// `build_args` and `cache_to` have no flag here.
pub fn devcontainer_args(request: &BuildRequest) -> Result<Vec<String>, ToolError> {
    let mut cmd = vec![
        "build".to_owned(),
        "--workspace-folder".to_owned(),
        path_str(&request.context)?.to_owned(),
        "--image-name".to_owned(),
        request.tag.clone(),
        "--platform".to_owned(),
        join_platforms(&request.platforms),
    ];

    if request.output == OutputMode::Push {
        cmd.push("--push".to_owned());
    }
    for source in &request.cache_from {
        cmd.push("--cache-from".to_owned());
        cmd.push(source.clone());
    }
    if !request.build_args.is_empty() {
        tracing::debug!(
            count = request.build_args.len(),
            "devcontainer CLI takes build args from devcontainer.json; skipping overrides"
        );
    }

    Ok(cmd)
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

fn path_str(path: &Path) -> Result<&str, ToolError> {
    path.to_str()
        .ok_or_else(|| ToolError::InvalidPath(path.to_path_buf()))
}
