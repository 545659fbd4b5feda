use crate::context::BuildContext;
use crate::error::BuildError;
use devimg_engine::{DockerClient, ToolExecutor};

/// Which tool produces the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildBackend {
    /// `devcontainer build` — understands devcontainer.json metadata and features
    HighLevel,
    /// `docker buildx build` against a Dockerfile
    Direct,
}

impl std::fmt::Display for BuildBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighLevel => f.write_str("devcontainer"),
            Self::Direct => f.write_str("buildx"),
        }
    }
}

/// Pick the preferred backend for a context. Called once, before building.
///
/// The devcontainer CLI wins when it is installed and the context carries
/// a devcontainer.json; otherwise buildx is required.
pub async fn select_backend<E: ToolExecutor>(
    client: &DockerClient<E>,
    context: &BuildContext,
) -> Result<BuildBackend, BuildError> {
    if context.is_devcontainer() && client.has_devcontainer_cli() {
        tracing::info!("using devcontainer CLI");
        return Ok(BuildBackend::HighLevel);
    }

    if context.dockerfile().is_none() {
        return Err(BuildError::ToolMissing {
            tool: "devcontainer".to_owned(),
            hint: "the context has no Dockerfile, so only the devcontainer CLI can build it — \
                   install: npm install -g @devcontainers/cli"
                .to_owned(),
        });
    }

    match client.buildx_version().await {
        Ok(version) => {
            tracing::info!(%version, "using docker buildx");
            Ok(BuildBackend::Direct)
        }
        Err(e) => {
            tracing::debug!(error = %e, "docker buildx unavailable");
            Err(BuildError::ToolMissing {
                tool: "docker buildx".to_owned(),
                hint: "install Docker with the buildx plugin: https://docs.docker.com/build/".to_owned(),
            })
        }
    }
}
