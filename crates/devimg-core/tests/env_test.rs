use devimg_core::cache::ResolverCache;
use devimg_core::{
    BuildConfig, DevimgConfig, EnvSignals, Mode, Overrides, Platform, Resolver, default_cache_path,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn signals_from(vars: &[(&str, &str)], arch: &str) -> EnvSignals {
    let mut s = EnvSignals::from_lookup(|k| {
        vars.iter()
            .find(|(key, _)| *key == k)
            .map(|(_, v)| (*v).to_owned())
    });
    s.host_arch = arch.to_owned();
    s
}

fn resolve(vars: &[(&str, &str)], arch: &str) -> BuildConfig {
    Resolver::new(
        &DevimgConfig::default(),
        signals_from(vars, arch),
        Overrides::default(),
    )
    .resolve()
}

fn assert_well_formed(config: &BuildConfig) {
    assert!(!config.platforms.is_empty());
    let (repo, tag) = config.image_reference.rsplit_once(':').unwrap();
    assert!(repo.ends_with(&config.repository), "got: {repo}");
    assert_eq!(tag, format!("ci-{}", config.commit_or_session_id));
}

// ── Mode detection ──

#[test]
fn bare_run_is_local_single_arch() {
    let config = resolve(&[], "x86_64");

    assert_eq!(config.mode, Mode::Local);
    assert_eq!(config.platforms, vec![Platform::linux("amd64")]);
    assert_eq!(config.commit_or_session_id, "local");
    assert_eq!(config.image_reference, "ghcr.io/devimg/devenv:ci-local");
    assert_well_formed(&config);
}

#[test]
fn hosted_ci_is_multi_arch() {
    let config = resolve(
        &[
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_SHA", "0123456789abcdef"),
            ("GITHUB_REPOSITORY", "Acme/DevEnv"),
        ],
        "x86_64",
    );

    assert_eq!(config.mode, Mode::Ci);
    assert_eq!(
        config.platforms,
        vec![Platform::linux("amd64"), Platform::linux("arm64")]
    );
    assert_eq!(config.repository, "acme/devenv");
    assert_eq!(
        config.image_reference,
        "ghcr.io/acme/devenv:ci-0123456789abcdef"
    );
    assert_well_formed(&config);
}

#[test]
fn act_run_is_local_even_with_ci_flags() {
    let config = resolve(&[("ACT", "true"), ("CI", "true")], "x86_64");
    assert_eq!(config.mode, Mode::Local);
    assert_eq!(config.platforms.len(), 1);
}

#[test]
fn local_aarch64_host_normalizes_to_arm64() {
    let config = resolve(&[], "aarch64");
    assert_eq!(config.platforms.len(), 1);
    assert_eq!(config.platforms[0].to_string(), "linux/arm64");
    assert_eq!(config.host.to_string(), "linux/arm64");
}

#[test]
fn probed_daemon_arch_replaces_compile_target() {
    let signals = EnvSignals::from_lookup(|_| None).with_host_arch("x86_64");
    let config = Resolver::new(&DevimgConfig::default(), signals, Overrides::default()).resolve();

    assert_eq!(config.mode, Mode::Local);
    assert_eq!(config.platforms, vec![Platform::linux("amd64")]);
    assert_eq!(config.host, Platform::linux("amd64"));
}

#[test]
fn every_mode_yields_platforms_and_reference() {
    for mode in [Mode::Ci, Mode::Local] {
        for arch in ["x86_64", "aarch64", "armv7l", "riscv64"] {
            let config = Resolver::new(
                &DevimgConfig::default(),
                signals_from(&[], arch),
                Overrides {
                    mode: Some(mode),
                    ..Default::default()
                },
            )
            .resolve();
            assert_eq!(config.mode, mode);
            assert_well_formed(&config);
        }
    }
}

// ── Precedence ──

#[test]
fn overrides_beat_environment_and_config() {
    let mut file_config = DevimgConfig::default();
    file_config.image.repository = Some("file/repo".to_owned());

    let config = Resolver::new(
        &file_config,
        signals_from(
            &[
                ("DEVIMG_REGISTRY", "env.example.com"),
                ("GITHUB_REPOSITORY", "env/repo"),
                ("GITHUB_SHA", "envsha"),
            ],
            "x86_64",
        ),
        Overrides {
            mode: Some(Mode::Ci),
            platforms: vec![Platform::linux("arm64")],
            registry: Some("cli.example.com".to_owned()),
            repository: Some("cli/repo".to_owned()),
            commit: Some("clisha".to_owned()),
        },
    )
    .resolve();

    assert_eq!(config.platforms, vec![Platform::linux("arm64")]);
    assert_eq!(config.image_reference, "cli.example.com/cli/repo:ci-clisha");
}

#[test]
fn environment_beats_config_file() {
    let mut file_config = DevimgConfig::default();
    file_config.image.repository = Some("file/repo".to_owned());

    let config = Resolver::new(
        &file_config,
        signals_from(&[("DEVIMG_PLATFORMS", "linux/arm64,linux/amd64")], "x86_64"),
        Overrides::default(),
    )
    .resolve();
    assert_eq!(config.repository, "file/repo");
    assert_eq!(
        config.platforms,
        vec![Platform::linux("arm64"), Platform::linux("amd64")]
    );
}

#[test]
fn config_ci_platforms_apply_in_ci_mode() {
    let mut file_config = DevimgConfig::default();
    file_config.build.ci_platforms = vec![Platform::linux("amd64")];

    let config = Resolver::new(
        &file_config,
        signals_from(&[("GITHUB_ACTIONS", "true")], "x86_64"),
        Overrides::default(),
    )
    .resolve();
    assert_eq!(config.platforms, vec![Platform::linux("amd64")]);
}

#[test]
fn variant_repository_recomputes_reference() {
    let config = resolve(&[("GITHUB_SHA", "abc")], "x86_64");
    let dind = config.with_repository("acme/dind");
    assert_eq!(dind.image_reference, "ghcr.io/acme/dind:ci-abc");
    assert_eq!(dind.platforms, config.platforms);
    assert_eq!(dind.destination("latest"), "ghcr.io/acme/dind:latest");
}

// ── Cache ──

#[test]
fn resolve_twice_with_cache_is_identical() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("env.json");
    let vars = [("GITHUB_ACTIONS", "true"), ("GITHUB_RUN_ID", "99")];

    let resolver = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&vars, "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone());

    let first = resolver.resolve();
    assert!(cache.exists());
    let second = resolver.resolve();
    assert_eq!(first, second);
}

#[test]
fn cached_config_is_reused_for_same_inputs() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("env.json");
    let resolver = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&[("GITHUB_RUN_ID", "7")], "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone());
    resolver.resolve();

    // Tamper with the cached config; a cache hit returns the tampered value
    let mut entry = ResolverCache::load(&cache).unwrap().unwrap();
    entry.config.commit_or_session_id = "from-cache".to_owned();
    entry.store(&cache).unwrap();

    assert_eq!(resolver.resolve().commit_or_session_id, "from-cache");
}

#[test]
fn cache_from_another_run_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("env.json");

    let first = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&[("GITHUB_RUN_ID", "1"), ("GITHUB_SHA", "one")], "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone())
    .resolve();

    let second = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&[("GITHUB_RUN_ID", "2"), ("GITHUB_SHA", "two")], "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone())
    .resolve();

    assert_ne!(first, second);
    assert_eq!(second.commit_or_session_id, "two");
}

#[test]
fn corrupt_cache_degrades_to_detection() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("env.json");
    std::fs::write(&cache, "{ not json").unwrap();

    let config = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&[], "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone())
    .resolve();

    assert_eq!(config.mode, Mode::Local);
    // Rewritten with a valid entry
    assert!(ResolverCache::load(&cache).unwrap().is_some());
}

#[test]
fn invalidate_removes_cache_file() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("nested/env.json");
    let resolver = Resolver::new(
        &DevimgConfig::default(),
        signals_from(&[], "x86_64"),
        Overrides::default(),
    )
    .with_cache(cache.clone());

    resolver.resolve();
    assert!(cache.exists());
    resolver.invalidate().unwrap();
    assert!(!cache.exists());
    // Removing twice is fine
    resolver.invalidate().unwrap();
}

#[test]
fn default_cache_path_prefers_runner_temp() {
    let ci = signals_from(&[("RUNNER_TEMP", "/runner/tmp")], "x86_64");
    assert_eq!(
        default_cache_path(&ci, Path::new("/repo")),
        PathBuf::from("/runner/tmp/devimg-env.json")
    );

    let local = signals_from(&[], "x86_64");
    assert_eq!(
        default_cache_path(&local, Path::new("/repo")),
        PathBuf::from("/repo/.devimg/devimg-env.json")
    );
}
