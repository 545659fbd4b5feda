use crate::pipeline::PipelineReport;
use crate::promote::PromotionReport;
use crate::validate::ValidationResult;
use devimg_build::BuildError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("build of variant '{variant}' failed")]
    Build {
        variant: String,
        source: BuildError,
    },

    #[error("validation failed for {}", failed_variants(results))]
    ValidationFailed { results: Vec<ValidationResult> },

    /// Carries everything the run produced, so the summary still lists
    /// every check next to the tag outcomes.
    #[error("promotion incomplete: {} tag(s) failed", failed_tags(&report.promotions))]
    PromotionPartialFailure { report: PipelineReport },
}

impl PipelineError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Build { .. } => 1,
            Self::ValidationFailed { .. } => 2,
            Self::PromotionPartialFailure { .. } => 3,
        }
    }
}

fn failed_variants(results: &[ValidationResult]) -> String {
    results
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.variant.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn failed_tags(reports: &[PromotionReport]) -> usize {
    reports.iter().map(|r| r.failed().count()).sum()
}
