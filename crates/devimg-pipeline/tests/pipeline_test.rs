use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use devimg_core::{BuildConfig, DevimgConfig, Mode, Platform, ToolCheck, ValidateConfig, Variant};
use devimg_engine::{DockerClient, ToolError, ToolExecutor};
use devimg_pipeline::{
    Mechanism, Pipeline, PipelineError, PipelineReport, PromotionOutcome, Promoter, Severity,
    Validator,
};
use mockall::mock;
use tempfile::TempDir;

mock! {
    Executor {}

    impl ToolExecutor for Executor {
        async fn exec(&self, program: &str, args: &[String]) -> Result<String, ToolError>;
        async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ToolError>;
        fn has_program(&self, program: &str) -> bool;
    }
}

fn failed(stderr: &str) -> ToolError {
    ToolError::CommandFailed {
        program: "docker".to_owned(),
        args: vec![],
        code: Some(1),
        stderr: stderr.to_owned(),
    }
}

fn has(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn tool(name: &str) -> ToolCheck {
    ToolCheck {
        name: name.to_owned(),
        command: format!("{name} --version"),
    }
}

fn variant(name: &str, tools: &[&str], nested_daemon: bool) -> Variant {
    Variant {
        name: name.to_owned(),
        context: PathBuf::from("."),
        repository: None,
        nested_daemon,
        tools: tools.iter().map(|t| tool(t)).collect(),
    }
}

/// Marker output for a toolchain group where every check exits 0.
fn all_passing(names: &[&str]) -> String {
    names
        .iter()
        .chain(std::iter::once(&"workspace-writable"))
        .map(|n| format!("::check::{n}\n{n} 1.0\n::status::{n}::0\n"))
        .collect()
}

fn build_config(mode: Mode) -> BuildConfig {
    let platforms = match mode {
        Mode::Ci => Platform::ci_defaults(),
        Mode::Local => vec![Platform::linux("amd64")],
    };
    BuildConfig::new(
        mode,
        platforms,
        Platform::linux("amd64"),
        "ghcr.io",
        "acme/dev",
        "abc123",
    )
}

// ── Validator Tests ──

#[tokio::test]
async fn advisory_failure_does_not_fail_validation() {
    let tools = ["rustc", "cargo", "node", "python3"];
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args| has(args, "run") && !has(args, "--privileged"))
        .times(1)
        .returning(move |_, _| Ok(all_passing(&tools)));
    mock.expect_exec()
        .withf(|_, args| has(args, "run") && has(args, "--privileged"))
        .times(1)
        .returning(|_, _| Err(failed("nested daemon not reachable after 30s")));
    let client = DockerClient::with_executor(mock);

    let validator = Validator::new(&client, &ValidateConfig::default());
    let result = validator
        .validate(&variant("default", &tools, true), "ghcr.io/acme/dev:ci-local")
        .await;

    assert_eq!(result.checks.len(), 6);
    assert_eq!(
        result
            .checks
            .iter()
            .filter(|c| c.severity == Severity::Fatal && c.passed)
            .count(),
        5
    );
    let nested = result.checks.last().unwrap();
    assert_eq!(nested.name, "nested-daemon");
    assert_eq!(nested.severity, Severity::Advisory);
    assert!(!nested.passed);
    assert!(nested.detail.contains("not reachable"));
    assert!(result.passed());
    assert_eq!(result.advisory_failures().count(), 1);
}

#[tokio::test]
async fn strict_makes_nested_daemon_fatal() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, args| {
        if has(args, "--privileged") {
            Err(ToolError::Timeout {
                program: "docker".to_owned(),
                secs: 300,
            })
        } else {
            Ok(all_passing(&[]))
        }
    });
    let client = DockerClient::with_executor(mock);

    let validator = Validator::new(&client, &ValidateConfig::default()).strict(true);
    let result = validator.validate(&variant("dind", &[], true), "img:1").await;

    assert!(validator.is_strict());
    assert!(!result.passed());
    assert_eq!(result.fatal_failures().count(), 1);
}

#[tokio::test]
async fn nested_check_runs_named_with_configured_socket() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args| has(args, "run") && !has(args, "--privileged"))
        .times(1)
        .returning(|_, _| Ok(all_passing(&[])));
    mock.expect_exec()
        .withf(|_, args| {
            let name = args.iter().position(|a| a == "--name").map(|i| &args[i + 1]);
            has(args, "--privileged")
                && name.is_some_and(|n| n.starts_with("devimg-nested-"))
                && has(args, "/var/run/docker.sock:/var/run/docker.sock")
        })
        .times(1)
        .returning(|_, _| Ok("Hello from Docker!\n".to_owned()));
    let client = DockerClient::with_executor(mock);

    let settings = ValidateConfig {
        daemon_socket: Some("/var/run/docker.sock".to_owned()),
        ..ValidateConfig::default()
    };
    let result = Validator::new(&client, &settings)
        .validate(&variant("dind", &[], true), "img:1")
        .await;

    assert!(result.passed());
    assert_eq!(result.advisory_failures().count(), 0);
}

#[tokio::test]
async fn configured_strict_survives_unset_flag() {
    let client = DockerClient::with_executor(MockExecutor::new());
    let settings = ValidateConfig {
        strict: true,
        ..ValidateConfig::default()
    };
    assert!(Validator::new(&client, &settings).strict(false).is_strict());
}

#[tokio::test]
async fn failing_tool_fails_validation() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, _| {
        Ok("::check::rustc\nsh: rustc: not found\n::status::rustc::127\n\
            ::check::workspace-writable\n::status::workspace-writable::0\n"
            .to_owned())
    });
    let client = DockerClient::with_executor(mock);

    let validator = Validator::new(&client, &ValidateConfig::default());
    let result = validator.validate(&variant("default", &["rustc"], false), "img:1").await;

    assert!(!result.passed());
    let rustc = &result.checks[0];
    assert!(!rustc.passed);
    assert!(rustc.detail.contains("127"));
    assert!(rustc.detail.contains("not found"));
}

#[tokio::test]
async fn check_without_status_fails() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _| Ok("::check::rustc\nrustc 1.84.0\n::status::rustc::0\n".to_owned()));
    let client = DockerClient::with_executor(mock);

    let validator = Validator::new(&client, &ValidateConfig::default());
    let result = validator.validate(&variant("default", &["rustc"], false), "img:1").await;

    assert!(result.checks[0].passed);
    assert_eq!(result.checks[1].name, "workspace-writable");
    assert!(!result.checks[1].passed);
    assert!(!result.passed());
}

#[tokio::test]
async fn container_error_fails_whole_group() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .returning(|_, _| Err(failed("Unable to find image 'img:1' locally")));
    let client = DockerClient::with_executor(mock);

    let validator = Validator::new(&client, &ValidateConfig::default());
    let result = validator
        .validate(&variant("default", &["rustc", "cargo"], false), "img:1")
        .await;

    assert_eq!(result.checks.len(), 3);
    assert!(result.checks.iter().all(|c| !c.passed));
    assert!(result.checks.iter().all(|c| c.detail.contains("Unable to find image")));
}

// ── Promoter Tests ──

#[tokio::test]
async fn ci_partial_promotion() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, args| {
        if has(args, "create") {
            if has(args, "ghcr.io/acme/dev:latest") {
                Err(failed("dial tcp: lookup ghcr.io: no such host"))
            } else {
                Ok(String::new())
            }
        } else if has(args, "inspect") {
            Ok("sha256:aaaa\n".to_owned())
        } else {
            panic!("unexpected docker {args:?}")
        }
    });
    let client = DockerClient::with_executor(mock);

    let cfg = build_config(Mode::Ci);
    let tags = vec!["v1.0.0".to_owned(), "latest".to_owned()];
    let report = Promoter::new(&client)
        .promote(&cfg, &cfg.image_reference, &tags)
        .await;

    assert_eq!(report.records.len(), 2);
    let v1 = &report.records[0];
    assert_eq!(v1.tag, "v1.0.0");
    assert_eq!(v1.destination, "ghcr.io/acme/dev:v1.0.0");
    assert_eq!(v1.mechanism, Mechanism::ManifestCopy);
    assert_eq!(v1.outcome, PromotionOutcome::Ok);
    assert_eq!(v1.detail, "sha256:aaaa");

    let latest = &report.records[1];
    assert_eq!(latest.outcome, PromotionOutcome::Failed);
    assert!(latest.detail.contains("re-run the pipeline"));
    assert!(!report.is_complete());

    let err = PipelineError::PromotionPartialFailure {
        report: PipelineReport {
            promotions: vec![report],
            ..PipelineReport::default()
        },
    };
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("1 tag(s) failed"));
}

#[tokio::test]
async fn digest_mismatch_is_failure() {
    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, args| {
        if has(args, "inspect") && has(args, "ghcr.io/acme/dev:latest") {
            Ok("sha256:bbbb\n".to_owned())
        } else if has(args, "inspect") {
            Ok("sha256:aaaa\n".to_owned())
        } else {
            Ok(String::new())
        }
    });
    let client = DockerClient::with_executor(mock);

    let cfg = build_config(Mode::Ci);
    let report = Promoter::new(&client)
        .promote(&cfg, &cfg.image_reference, &["latest".to_owned()])
        .await;

    assert_eq!(report.records[0].outcome, PromotionOutcome::Failed);
    assert!(report.records[0].detail.contains("digest mismatch"));
}

#[tokio::test]
async fn local_retag_skips_duplicates() {
    let tagged = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&tagged);

    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(move |_, args| {
        if args[0] == "tag" {
            seen.lock().unwrap().push(args[2].clone());
        }
        Ok(String::new())
    });
    let client = DockerClient::with_executor(mock);

    let cfg = build_config(Mode::Local);
    let tags = vec!["dev".to_owned(), "latest".to_owned(), "dev".to_owned()];
    let report = Promoter::new(&client)
        .promote(&cfg, &cfg.image_reference, &tags)
        .await;

    assert!(report.is_complete());
    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.mechanism == Mechanism::LocalRetag));
    assert_eq!(
        *tagged.lock().unwrap(),
        vec!["ghcr.io/acme/dev:dev", "ghcr.io/acme/dev:latest"]
    );
}

#[tokio::test]
async fn local_retag_missing_source_fails_every_tag() {
    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|_, args| args[0] == "image")
        .times(2)
        .returning(|_, _| Err(failed("Error: No such image")));
    let client = DockerClient::with_executor(mock);

    let cfg = build_config(Mode::Local);
    let tags = vec!["dev".to_owned(), "latest".to_owned()];
    let report = Promoter::new(&client)
        .promote(&cfg, &cfg.image_reference, &tags)
        .await;

    assert_eq!(report.failed().count(), 2);
    assert!(report.records[0].detail.contains("not in the local image store"));
}

#[tokio::test]
async fn empty_tag_set_is_trivial_success() {
    // No expectations: any docker call would panic
    let client = DockerClient::with_executor(MockExecutor::new());

    let cfg = build_config(Mode::Ci);
    let report = Promoter::new(&client)
        .promote(&cfg, &cfg.image_reference, &[])
        .await;

    assert!(report.records.is_empty());
    assert!(report.is_complete());
}

// ── Pipeline Tests ──

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("Dockerfile"), "FROM debian:bookworm\n").unwrap();
    tmp
}

fn devimg_config(tools: &[&str]) -> DevimgConfig {
    let mut config = DevimgConfig::default();
    config.validate.tools = tools.iter().map(|t| tool(t)).collect();
    config
}

#[tokio::test]
async fn local_run_builds_validates_and_promotes() {
    let project = project();
    let config = devimg_config(&["rustc"]);

    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming()
        .withf(|_, args| has(args, "--load"))
        .times(1)
        .returning(|_, _| Ok(()));
    mock.expect_exec().returning(|_, args| match args[0].as_str() {
        "buildx" => Ok("github.com/docker/buildx v0.19.3".to_owned()),
        "image" => Ok("sha256:abc".to_owned()),
        "run" => Ok(all_passing(&["rustc"])),
        "tag" => Ok(String::new()),
        other => panic!("unexpected docker {other}"),
    });
    let client = DockerClient::with_executor(mock);

    let pipeline = Pipeline::new(&client, &config, project.path());
    let report = pipeline
        .run(
            &build_config(Mode::Local),
            &config.variants(),
            &["latest".to_owned()],
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.images[0].reference, "ghcr.io/acme/dev:ci-abc123");
    assert!(report.validations[0].passed());
    assert_eq!(report.promotions[0].records[0].destination, "ghcr.io/acme/dev:latest");
    let summary = report.to_string();
    assert!(summary.contains("workspace-writable"));
    assert!(summary.contains("ghcr.io/acme/dev:latest"));
}

#[tokio::test]
async fn failed_validation_stops_before_promotion() {
    let project = project();
    let config = devimg_config(&["rustc"]);

    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming().returning(|_, _| Ok(()));
    mock.expect_exec().returning(|_, args| match args[0].as_str() {
        "buildx" | "image" => Ok(String::new()),
        "run" => Ok("::check::rustc\n::status::rustc::127\n".to_owned()),
        other => panic!("promotion must not run: docker {other}"),
    });
    let client = DockerClient::with_executor(mock);

    let pipeline = Pipeline::new(&client, &config, project.path());
    let err = pipeline
        .run(&build_config(Mode::Local), &config.variants(), &["latest".to_owned()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ValidationFailed { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("default"));
}

#[tokio::test]
async fn partial_promotion_keeps_check_summary() {
    let project = project();
    let config = devimg_config(&["rustc"]);

    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming().returning(|_, _| Ok(()));
    mock.expect_exec().returning(|_, args| match args[0].as_str() {
        "buildx" if has(args, "create") && has(args, "ghcr.io/acme/dev:latest") => {
            Err(failed("unexpected EOF"))
        }
        "buildx" if has(args, "inspect") => Ok("sha256:aaaa\n".to_owned()),
        "buildx" => Ok(String::new()),
        "run" => Ok(all_passing(&["rustc"])),
        other => panic!("unexpected docker {other}"),
    });
    let client = DockerClient::with_executor(mock);

    let pipeline = Pipeline::new(&client, &config, project.path());
    let tags = vec!["v1.0.0".to_owned(), "latest".to_owned()];
    let err = pipeline
        .run(&build_config(Mode::Ci), &config.variants(), &tags, false)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 3);
    let PipelineError::PromotionPartialFailure { report } = err else {
        panic!("expected partial promotion, got {err:?}");
    };
    assert_eq!(report.images[0].reference, "ghcr.io/acme/dev:ci-abc123");
    let summary = report.to_string();
    assert!(summary.contains("rustc"), "got: {summary}");
    assert!(summary.contains("workspace-writable"), "got: {summary}");
    assert!(summary.contains("ghcr.io/acme/dev:v1.0.0"), "got: {summary}");
    assert!(summary.contains("FAILED"), "got: {summary}");
}

#[tokio::test]
async fn missing_context_is_build_error() {
    let project = TempDir::new().unwrap();
    let config = DevimgConfig::default();
    let client = DockerClient::with_executor(MockExecutor::new());

    let pipeline = Pipeline::new(&client, &config, project.path());
    let err = pipeline
        .run(&build_config(Mode::Local), &config.variants(), &[], false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Build { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn variants_validate_concurrently_in_input_order() {
    let config = DevimgConfig::default();

    let mut mock = MockExecutor::new();
    mock.expect_exec().returning(|_, args| {
        if has(args, "ghcr.io/acme/dev-dind:ci-abc123") {
            Ok("::check::docker\n::status::docker::0\n\
                ::check::workspace-writable\n::status::workspace-writable::0\n"
                .to_owned())
        } else {
            Ok(all_passing(&["rustc"]))
        }
    });
    let client = DockerClient::with_executor(mock);

    let pipeline = Pipeline::new(&client, &config, std::path::Path::new("."));
    let base = build_config(Mode::Ci);
    let mut dind = variant("dind", &["docker"], false);
    dind.repository = Some("Acme/Dev-Dind".to_owned());
    let targets = pipeline.targets(&base, &[variant("base", &["rustc"], false), dind]);
    assert_eq!(targets[1].image(), "ghcr.io/acme/dev-dind:ci-abc123");

    let pairs: Vec<(Variant, String)> = targets
        .iter()
        .map(|t| (t.variant.clone(), t.image().to_owned()))
        .collect();
    let results = pipeline.validate(&pairs, false).await;

    assert_eq!(results[0].variant, "base");
    assert_eq!(results[0].checks[0].name, "rustc");
    assert_eq!(results[1].variant, "dind");
    assert_eq!(results[1].checks[0].name, "docker");
    assert!(results.iter().all(|r| r.passed()));
}
