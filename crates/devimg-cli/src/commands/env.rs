use super::Session;
use crate::GlobalArgs;
use devimg_engine::DockerClient;

pub async fn env(global: &GlobalArgs, json: bool, refresh: bool) -> anyhow::Result<()> {
    let client = DockerClient::new();
    let session = Session::open(global, &client, refresh).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session.build)?);
    } else {
        println!("{}", session.build);
    }
    Ok(())
}
