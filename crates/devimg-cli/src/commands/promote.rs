use super::Session;
use crate::GlobalArgs;
use devimg_engine::DockerClient;
use devimg_pipeline::{Pipeline, PipelineError, PipelineReport, Target};

pub async fn promote(
    global: &GlobalArgs,
    variant: Option<&str>,
    tags: &[String],
    from_event: bool,
) -> anyhow::Result<()> {
    let tags = super::destination_tags(tags, from_event);
    if tags.is_empty() {
        println!("No tags to promote");
        return Ok(());
    }

    let client = DockerClient::new();
    let session = Session::open(global, &client, false).await?;
    let variants = session.config.select_variants(variant)?;

    let pipeline = Pipeline::new(&client, &session.config, &session.project_dir);

    let sources: Vec<(Target, String)> = pipeline
        .targets(&session.build, &variants)
        .into_iter()
        .map(|t| {
            let source = t.image().to_owned();
            (t, source)
        })
        .collect();

    let report = PipelineReport {
        promotions: pipeline.promote(&sources, &tags).await,
        ..PipelineReport::default()
    };
    println!("{report}");

    if !report.promotions.iter().all(|r| r.is_complete()) {
        return Err(PipelineError::PromotionPartialFailure { report }.into());
    }
    println!("Promoted {} tag(s)", tags.len());
    Ok(())
}
