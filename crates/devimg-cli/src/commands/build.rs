use super::Session;
use crate::GlobalArgs;
use devimg_core::join_platforms;
use devimg_engine::DockerClient;
use devimg_pipeline::Pipeline;

pub async fn build(global: &GlobalArgs, variant: Option<&str>) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let session = Session::open(global, &client, false).await?;
    let variants = session.config.select_variants(variant)?;

    let pipeline = Pipeline::new(&client, &session.config, &session.project_dir);

    println!(
        "Building {} variant(s) in {} mode for {}",
        variants.len(),
        session.build.mode,
        join_platforms(&session.build.platforms)
    );

    for target in pipeline.targets(&session.build, &variants) {
        let image = pipeline.build(&target).await?;
        println!(
            "Built: {} [{}]{}",
            image.reference,
            join_platforms(&image.platforms),
            if image.locally_loaded { " (local)" } else { "" }
        );
    }
    Ok(())
}
