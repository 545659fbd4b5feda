use devimg_core::{CiEvent, dedupe_tags};

pub fn tags() -> anyhow::Result<()> {
    let Some(event) = CiEvent::from_env() else {
        eprintln!("No CI event detected (GITHUB_REF / GITHUB_EVENT_NAME unset)");
        return Ok(());
    };
    tracing::debug!(?event, "CI event");

    for tag in dedupe_tags(&event.tags(&super::default_branch())) {
        println!("{tag}");
    }
    Ok(())
}
