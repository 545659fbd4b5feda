//! Functional checks run against a built image.
//!
//! Checks are grouped to amortize container startup: every toolchain probe
//! and the workspace check share one `docker run`, and the in-container
//! script reports each check through marker lines on stdout:
//!
//! ```text
//! ::check::rustc
//! rustc 1.84.0 (9fc6b4312 2025-01-07)
//! ::status::rustc::0
//! ```
//!
//! The nested-daemon smoke test needs `--privileged` and runs alone.

use devimg_core::{NESTED_PULL_ATTEMPTS, NESTED_PULL_RETRY_SECS, ToolCheck, ValidateConfig, Variant};
use devimg_engine::{DockerClient, RunSpec, ToolExecutor, container_name};
use std::collections::HashMap;
use std::fmt;

pub const WORKSPACE_CHECK: &str = "workspace-writable";
pub const NESTED_DAEMON_CHECK: &str = "nested-daemon";

const CHECK_MARKER: &str = "::check::";
const STATUS_MARKER: &str = "::status::";

/// Engine socket path inside the nested-daemon container.
const CONTAINER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Failing fails the validation
    Fatal,
    /// Failing is logged only
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Captured output or error
    pub detail: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub variant: String,
    pub image_reference: String,
    pub checks: Vec<CheckResult>,
}

impl ValidationResult {
    /// AND of every fatal check.
    pub fn passed(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.severity == Severity::Fatal)
            .all(|c| c.passed)
    }

    pub fn fatal_failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.severity == Severity::Fatal && !c.passed)
    }

    pub fn advisory_failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.severity == Severity::Advisory && !c.passed)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.variant, self.image_reference)?;
        for check in &self.checks {
            let status = match (check.passed, check.severity) {
                (true, _) => "ok",
                (false, Severity::Fatal) => "FAILED",
                (false, Severity::Advisory) => "warn",
            };
            write!(f, "  {status:<6} {}", check.name)?;
            if let Some(line) = check.detail.lines().find(|l| !l.trim().is_empty()) {
                write!(f, "  {}", line.trim())?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "  => {}",
            if self.passed() { "passed" } else { "failed" }
        )
    }
}

/// Runs the check suite for one image.
pub struct Validator<'a, E: ToolExecutor> {
    client: &'a DockerClient<E>,
    settings: ValidateConfig,
    strict: bool,
}

impl<'a, E: ToolExecutor> Validator<'a, E> {
    pub fn new(client: &'a DockerClient<E>, settings: &ValidateConfig) -> Self {
        Self {
            client,
            strict: settings.strict,
            settings: settings.clone(),
        }
    }

    /// Make the nested-daemon check fatal. `false` keeps the configured value.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict |= strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Run every check for `variant` against `image`. Never fails: tool
    /// errors become failed checks carrying the error text.
    pub async fn validate(&self, variant: &Variant, image: &str) -> ValidationResult {
        tracing::info!(variant = %variant.name, image, "validating");

        let mut checks = self.toolchain_group(&variant.tools, image).await;
        if variant.nested_daemon {
            checks.push(self.nested_daemon(image).await);
        }

        for check in checks.iter().filter(|c| !c.passed) {
            match check.severity {
                Severity::Fatal => {
                    tracing::error!(check = %check.name, detail = %check.detail.trim(), "check failed")
                }
                Severity::Advisory => {
                    tracing::warn!(check = %check.name, detail = %check.detail.trim(), "advisory check failed")
                }
            }
        }

        ValidationResult {
            variant: variant.name.clone(),
            image_reference: image.to_owned(),
            checks,
        }
    }

    async fn toolchain_group(&self, tools: &[ToolCheck], image: &str) -> Vec<CheckResult> {
        let script = toolchain_script(tools, &self.settings.workspace);
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        names.push(WORKSPACE_CHECK);

        match self.client.run(&RunSpec::new(image, script)).await {
            Ok(stdout) => {
                let statuses = parse_markers(&stdout);
                names
                    .into_iter()
                    .map(|name| match statuses.get(name) {
                        Some(status) => fatal(name, status.code == Some(0), status.describe()),
                        None => fatal(name, false, "no status reported".to_owned()),
                    })
                    .collect()
            }
            Err(e) => {
                let detail = format!("container failed to run: {e}");
                names
                    .into_iter()
                    .map(|name| fatal(name, false, detail.clone()))
                    .collect()
            }
        }
    }

    async fn nested_daemon(&self, image: &str) -> CheckResult {
        let severity = if self.strict {
            Severity::Fatal
        } else {
            Severity::Advisory
        };
        let spec = RunSpec {
            name: Some(container_name("devimg-nested")),
            privileged: true,
            volumes: nested_daemon_volumes(&self.settings),
            timeout: Some(self.settings.nested_timeout()),
            ..RunSpec::new(image, nested_daemon_script(&self.settings))
        };

        let (passed, detail) = match self.client.run(&spec).await {
            Ok(stdout) => (true, stdout),
            Err(e) => (false, e.to_string()),
        };

        CheckResult {
            name: NESTED_DAEMON_CHECK.to_owned(),
            passed,
            detail,
            severity,
        }
    }
}

fn fatal(name: &str, passed: bool, detail: String) -> CheckResult {
    CheckResult {
        name: name.to_owned(),
        passed,
        detail,
        severity: Severity::Fatal,
    }
}

// ── Scripts ──

/// One script probing every tool, then the workspace path. Always exits 0;
/// results travel through the markers.
pub fn toolchain_script(tools: &[ToolCheck], workspace: &str) -> String {
    let mut script = String::new();
    for tool in tools {
        push_check(&mut script, &tool.name, &format!("( {} ) 2>&1", tool.command));
    }

    let probe = format!("{}/.devimg-write-test", workspace.trim_end_matches('/'));
    let probe = shell_quote(&probe);
    push_check(
        &mut script,
        WORKSPACE_CHECK,
        &format!("touch {probe} 2>&1 && rm -f {probe} 2>&1"),
    );

    script.push_str("exit 0\n");
    script
}

fn push_check(script: &mut String, name: &str, command: &str) {
    script.push_str(&format!("echo {}\n", shell_quote(&format!("{CHECK_MARKER}{name}"))));
    script.push_str(command);
    script.push('\n');
    script.push_str(&format!(
        "echo {}\"$?\"\n",
        shell_quote(&format!("{STATUS_MARKER}{name}::"))
    ));
}

/// Engine client present, daemon reachable (started if needed), smoke image
/// pulled with bounded retries, then run.
pub fn nested_daemon_script(settings: &ValidateConfig) -> String {
    let image = shell_quote(&settings.smoke_image);
    let wait = settings.daemon_wait_secs;
    let limit = settings.pull_timeout_secs;
    format!(
        r#"command -v docker >/dev/null 2>&1 || {{ echo "docker client not found" >&2; exit 1; }}
if ! docker info >/dev/null 2>&1; then
  command -v dockerd >/dev/null 2>&1 || {{ echo "no reachable daemon and dockerd not installed" >&2; exit 1; }}
  dockerd >/tmp/devimg-dockerd.log 2>&1 &
  i=0
  until docker info >/dev/null 2>&1; do
    i=$((i + 1))
    if [ "$i" -ge {wait} ]; then
      echo "nested daemon not reachable after {wait}s" >&2
      tail -n 20 /tmp/devimg-dockerd.log >&2
      exit 1
    fi
    sleep 1
  done
fi
n=0
until timeout {limit} docker pull {image}; do
  n=$((n + 1))
  if [ "$n" -ge {NESTED_PULL_ATTEMPTS} ]; then
    echo "pull of {image} failed after {NESTED_PULL_ATTEMPTS} attempts" >&2
    exit 1
  fi
  sleep {NESTED_PULL_RETRY_SECS}
done
timeout {limit} docker run --rm {image} || {{ echo "smoke container failed" >&2; exit 1; }}
"#
    )
}

/// A configured host socket replaces the in-container daemon.
pub fn nested_daemon_volumes(settings: &ValidateConfig) -> Vec<String> {
    match &settings.daemon_socket {
        Some(socket) => vec![format!("{socket}:{CONTAINER_SOCKET}")],
        None => Vec::new(),
    }
}

/// Single-quote for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ── Marker parsing ──

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckStatus {
    /// `None` when the status marker carried no parseable code
    pub code: Option<i32>,
    pub output: String,
}

impl CheckStatus {
    fn describe(&self) -> String {
        let output = self.output.trim();
        match self.code {
            Some(0) => output.to_owned(),
            Some(code) if output.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {output}"),
            None if output.is_empty() => "unreadable status".to_owned(),
            None => format!("unreadable status: {output}"),
        }
    }
}

/// Collect `::check::` / `::status::` sections from script output.
///
/// A check opened without a matching status line is absent from the map.
pub fn parse_markers(stdout: &str) -> HashMap<String, CheckStatus> {
    let mut statuses = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in stdout.lines() {
        if let Some(name) = line.strip_prefix(CHECK_MARKER) {
            current = Some((name.trim().to_owned(), String::new()));
        } else if let Some(rest) = line.strip_prefix(STATUS_MARKER) {
            let Some((name, code)) = rest.rsplit_once("::") else {
                continue;
            };
            let output = match current.take() {
                Some((open, output)) if open == name => output,
                other => {
                    current = other;
                    continue;
                }
            };
            statuses.insert(
                name.to_owned(),
                CheckStatus {
                    code: parse_code(code),
                    output,
                },
            );
        } else if let Some((_, output)) = current.as_mut() {
            output.push_str(line);
            output.push('\n');
        }
    }

    statuses
}

fn parse_code(raw: &str) -> Option<i32> {
    // arch-lint: allow(no-silent-result-drop) reason="a garbled status is reported as a failed check"
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_collect_output_and_code() {
        let out = "::check::rustc\nrustc 1.84.0\n::status::rustc::0\n\
                   ::check::node\nsh: node: not found\n::status::node::127\n";
        let statuses = parse_markers(out);

        assert_eq!(statuses["rustc"].code, Some(0));
        assert_eq!(statuses["rustc"].output, "rustc 1.84.0\n");
        assert_eq!(statuses["node"].code, Some(127));
        assert_eq!(
            statuses["node"].describe(),
            "exit code 127: sh: node: not found"
        );
    }

    #[test]
    fn unterminated_check_is_missing() {
        let statuses = parse_markers("::check::rustc\nKilled\n");
        assert!(statuses.is_empty());
    }

    #[test]
    fn mismatched_status_is_ignored() {
        let statuses = parse_markers("::check::a\n::status::b::0\n::status::a::1\n");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses["a"].code, Some(1));
    }

    #[test]
    fn toolchain_script_ends_with_workspace_check() {
        let tools = vec![ToolCheck {
            name: "rustc".to_owned(),
            command: "rustc --version".to_owned(),
        }];
        let script = toolchain_script(&tools, "/workspaces/");

        assert!(script.contains("echo '::check::rustc'\n( rustc --version ) 2>&1\n"));
        assert!(script.contains("touch '/workspaces/.devimg-write-test'"));
        assert!(script.find("::check::rustc") < script.find("::check::workspace-writable"));
        assert!(script.ends_with("exit 0\n"));
    }

    #[test]
    fn nested_script_is_bounded() {
        let settings = ValidateConfig::default();
        let script = nested_daemon_script(&settings);
        assert!(script.contains("-ge 30"));
        assert!(script.contains("timeout 120 docker pull 'hello-world:latest'"));
        assert!(script.contains("-ge 3"));
    }

    #[test]
    fn socket_mount_only_when_configured() {
        let mut settings = ValidateConfig::default();
        assert!(nested_daemon_volumes(&settings).is_empty());

        settings.daemon_socket = Some("/run/user/1000/docker.sock".to_owned());
        assert_eq!(
            nested_daemon_volumes(&settings),
            vec!["/run/user/1000/docker.sock:/var/run/docker.sock"]
        );
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
