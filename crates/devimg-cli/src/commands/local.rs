use devimg_engine::DockerClient;
use std::path::Path;

pub async fn local(workflow: Option<&Path>, job: Option<&str>) -> anyhow::Result<()> {
    let client = DockerClient::new();

    match client.act_version().await {
        Ok(version) => println!("Running workflow with {version} (ACT=true)"),
        Err(e) if e.is_not_found() => {
            anyhow::bail!("act is not installed — see https://nektosact.com")
        }
        Err(e) => return Err(e.into()),
    }

    client.act(workflow, job).await?;
    println!("Local workflow run finished");
    Ok(())
}
