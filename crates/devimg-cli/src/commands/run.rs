use super::Session;
use crate::GlobalArgs;
use devimg_engine::DockerClient;
use devimg_pipeline::Pipeline;

pub async fn run(
    global: &GlobalArgs,
    variant: Option<&str>,
    tags: &[String],
    from_event: bool,
    strict: bool,
) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let session = Session::open(global, &client, false).await?;
    let variants = session.config.select_variants(variant)?;
    let tags = super::destination_tags(tags, from_event);

    println!("{}", session.build);
    println!();

    let pipeline = Pipeline::new(&client, &session.config, &session.project_dir);

    match pipeline.run(&session.build, &variants, &tags, strict).await {
        Ok(report) => {
            println!("{report}");
            println!("Pipeline succeeded");
            Ok(())
        }
        Err(e) => {
            super::print_failure_detail(&e);
            Err(e.into())
        }
    }
}
