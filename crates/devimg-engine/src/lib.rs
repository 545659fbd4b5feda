pub mod client;
pub mod error;
pub mod executor;

pub use client::{
    BuildRequest, CheckResult, DockerClient, DoctorReport, OutputMode, RunSpec, buildx_args,
    container_name, devcontainer_args,
};
pub use error::ToolError;
pub use executor::{RealExecutor, ToolExecutor};
