use crate::error::PipelineError;
use crate::promote::{PromotionReport, Promoter};
use crate::validate::{ValidationResult, Validator};
use devimg_build::{BuildContext, BuildError, BuildOptions, BuiltImage, ImageBuilder, select_backend};
use devimg_core::{BuildConfig, DevimgConfig, Variant};
use devimg_engine::{DockerClient, ToolExecutor};
use futures::future::join_all;
use std::fmt;
use std::path::{Path, PathBuf};

/// A variant bound to the run's build parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub variant: Variant,
    pub config: BuildConfig,
}

impl Target {
    /// Variants with their own repository get their own staging reference.
    pub fn new(build: &BuildConfig, variant: &Variant) -> Self {
        let config = match &variant.repository {
            Some(repository) => build.with_repository(&repository.to_ascii_lowercase()),
            None => build.clone(),
        };
        Self {
            variant: variant.clone(),
            config,
        }
    }

    pub fn image(&self) -> &str {
        &self.config.image_reference
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub images: Vec<BuiltImage>,
    pub validations: Vec<ValidationResult>,
    pub promotions: Vec<PromotionReport>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `devimg promote` reports tags only
        if !self.images.is_empty() {
            writeln!(f, "Images:")?;
            for image in &self.images {
                writeln!(f, "  {}", image.reference)?;
            }
        }
        if !self.validations.is_empty() {
            writeln!(f, "Checks:")?;
            for result in &self.validations {
                writeln!(f, "{result}")?;
            }
        }
        write!(f, "Tags:")?;
        for report in &self.promotions {
            write!(f, "\n{report}")?;
        }
        Ok(())
    }
}

/// Resolver → Builder → Validator → Promoter over every selected variant.
pub struct Pipeline<'a, E: ToolExecutor> {
    client: &'a DockerClient<E>,
    config: &'a DevimgConfig,
    project_dir: PathBuf,
}

impl<'a, E: ToolExecutor> Pipeline<'a, E> {
    pub fn new(client: &'a DockerClient<E>, config: &'a DevimgConfig, project_dir: &Path) -> Self {
        Self {
            client,
            config,
            project_dir: project_dir.to_path_buf(),
        }
    }

    pub fn targets(&self, build: &BuildConfig, variants: &[Variant]) -> Vec<Target> {
        variants.iter().map(|v| Target::new(build, v)).collect()
    }

    /// Build one target. A staged context lives until this returns.
    pub async fn build(&self, target: &Target) -> Result<BuiltImage, PipelineError> {
        let variant = &target.variant.name;
        let wrap = |source: BuildError| PipelineError::Build {
            variant: variant.clone(),
            source,
        };

        let context_dir = self.project_dir.join(&target.variant.context);
        let context = BuildContext::open(&context_dir).map_err(|e| wrap(e.into()))?;
        let staged = context
            .stage(&self.project_dir, &self.config.build.shared)
            .map_err(|e| wrap(e.into()))?;

        let backend = select_backend(self.client, staged.context())
            .await
            .map_err(wrap)?;
        tracing::info!(%variant, %backend, reference = target.image(), "build started");

        let builder = ImageBuilder::new(self.client, backend, BuildOptions::from(&self.config.build));
        builder
            .build(staged.context(), &target.config)
            .await
            .map_err(wrap)
    }

    /// Validate every `(variant, image)` pair concurrently.
    ///
    /// Results come back in input order. Each branch owns its containers.
    pub async fn validate(&self, images: &[(Variant, String)], strict: bool) -> Vec<ValidationResult> {
        let validator = Validator::new(self.client, &self.config.validate).strict(strict);
        join_all(
            images
                .iter()
                .map(|(variant, image)| validator.validate(variant, image)),
        )
        .await
    }

    /// Promote each target's image under `tags`, one target after another.
    pub async fn promote(&self, images: &[(Target, String)], tags: &[String]) -> Vec<PromotionReport> {
        let promoter = Promoter::new(self.client);
        let mut reports = Vec::with_capacity(images.len());
        for (target, source) in images {
            reports.push(promoter.promote(&target.config, source, tags).await);
        }
        reports
    }

    /// Full run. Stops before promotion when any fatal check fails.
    pub async fn run(
        &self,
        build: &BuildConfig,
        variants: &[Variant],
        tags: &[String],
        strict: bool,
    ) -> Result<PipelineReport, PipelineError> {
        let targets = self.targets(build, variants);

        let mut images = Vec::with_capacity(targets.len());
        for target in &targets {
            images.push(self.build(target).await?);
        }

        let pairs: Vec<(Variant, String)> = targets
            .iter()
            .zip(&images)
            .map(|(t, image)| (t.variant.clone(), image.reference.clone()))
            .collect();
        let validations = self.validate(&pairs, strict).await;
        if validations.iter().any(|r| !r.passed()) {
            return Err(PipelineError::ValidationFailed {
                results: validations,
            });
        }

        let sources: Vec<(Target, String)> = targets
            .into_iter()
            .zip(&images)
            .map(|(t, image)| (t, image.reference.clone()))
            .collect();
        let promotions = self.promote(&sources, tags).await;
        let complete = promotions.iter().all(PromotionReport::is_complete);
        let report = PipelineReport {
            images,
            validations,
            promotions,
        };
        if !complete {
            return Err(PipelineError::PromotionPartialFailure { report });
        }
        Ok(report)
    }
}
