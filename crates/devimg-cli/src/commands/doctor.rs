use crate::GlobalArgs;
use devimg_core::DevimgConfig;
use devimg_engine::{CheckResult, DockerClient};

pub async fn doctor(global: &GlobalArgs) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let mut report = client.doctor().await;

    report.config_file = if global.config.exists() {
        match DevimgConfig::load_file(&global.config) {
            Ok(config) => CheckResult::ok(&format!("{} variant(s)", config.variants().len())),
            Err(e) => CheckResult::fail(&format!("{e}: {}", error_source(&e))),
        }
    } else {
        CheckResult::ok("not found, using defaults")
    };

    println!();
    println!("{report}");

    if !report.all_passed() || !report.config_file.passed {
        anyhow::bail!("some checks failed — see above for details");
    }

    Ok(())
}

fn error_source(e: &devimg_core::Error) -> String {
    std::error::Error::source(e).map_or_else(String::new, ToString::to_string)
}
