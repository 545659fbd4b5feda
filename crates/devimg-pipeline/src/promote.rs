use devimg_core::{BuildConfig, Mode, dedupe_tags};
use devimg_engine::{DockerClient, ToolError, ToolExecutor};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// `docker tag` in the local image store
    LocalRetag,
    /// `docker buildx imagetools create`, keeping the manifest list intact
    ManifestCopy,
}

impl Mechanism {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Local => Self::LocalRetag,
            Mode::Ci => Self::ManifestCopy,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalRetag => f.write_str("retag"),
            Self::ManifestCopy => f.write_str("manifest-copy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRecord {
    pub source_reference: String,
    pub tag: String,
    /// Fully qualified reference the tag was published as
    pub destination: String,
    pub mechanism: Mechanism,
    pub outcome: PromotionOutcome,
    pub detail: String,
}

/// One record per distinct tag, in TagSet order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionReport {
    pub records: Vec<PromotionRecord>,
}

impl PromotionReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &PromotionRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == PromotionOutcome::Ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PromotionRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == PromotionOutcome::Failed)
    }

    /// True when no tag failed, including when there were no tags.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

impl fmt::Display for PromotionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return write!(f, "  (no tags)");
        }
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let status = match record.outcome {
                PromotionOutcome::Ok => "ok",
                PromotionOutcome::Failed => "FAILED",
            };
            write!(
                f,
                "  {status:<6} {} ({})",
                record.destination, record.mechanism
            )?;
            if record.outcome == PromotionOutcome::Failed {
                if let Some(first) = record.detail.lines().next() {
                    write!(f, "  {}", first.trim())?;
                }
            }
        }
        Ok(())
    }
}

/// Publishes a validated staging image under its final tags.
///
/// Per-tag failures are recorded and the remaining tags still run. Nothing
/// is rolled back.
pub struct Promoter<'a, E: ToolExecutor> {
    client: &'a DockerClient<E>,
}

impl<'a, E: ToolExecutor> Promoter<'a, E> {
    pub fn new(client: &'a DockerClient<E>) -> Self {
        Self { client }
    }

    pub async fn promote(
        &self,
        config: &BuildConfig,
        source: &str,
        tags: &[String],
    ) -> PromotionReport {
        let mechanism = Mechanism::for_mode(config.mode);
        let mut records = Vec::new();

        for tag in dedupe_tags(tags) {
            let destination = config.destination(&tag);
            tracing::info!(source, %destination, %mechanism, "promoting");

            let result = match mechanism {
                Mechanism::LocalRetag => self.retag(source, &destination).await,
                Mechanism::ManifestCopy => self.copy(source, &destination).await,
            };
            let (outcome, detail) = match result {
                Ok(detail) => (PromotionOutcome::Ok, detail),
                Err(detail) => {
                    tracing::warn!(%destination, %detail, "promotion failed");
                    (PromotionOutcome::Failed, detail)
                }
            };

            records.push(PromotionRecord {
                source_reference: source.to_owned(),
                tag,
                destination,
                mechanism,
                outcome,
                detail,
            });
        }

        PromotionReport { records }
    }

    async fn retag(&self, source: &str, destination: &str) -> Result<String, String> {
        match self.client.image_exists(source).await {
            Ok(true) => {}
            Ok(false) => return Err(format!("{source} is not in the local image store")),
            Err(e) => return Err(describe(&e)),
        }
        self.client
            .tag(source, destination)
            .await
            .map(|()| String::new())
            .map_err(|e| describe(&e))
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<String, String> {
        self.client
            .copy_manifest(source, destination)
            .await
            .map_err(|e| describe(&e))?;

        let source_digest = self
            .client
            .manifest_digest(source)
            .await
            .map_err(|e| describe(&e))?;
        let destination_digest = self
            .client
            .manifest_digest(destination)
            .await
            .map_err(|e| describe(&e))?;

        if source_digest == destination_digest {
            Ok(destination_digest)
        } else {
            Err(format!(
                "digest mismatch: {destination} is {destination_digest}, {source} is {source_digest}"
            ))
        }
    }
}

fn describe(e: &ToolError) -> String {
    if e.is_transient() {
        format!("{e} (network error, re-run the pipeline)")
    } else {
        e.to_string()
    }
}
