use std::path::{Path, PathBuf};

/// Paths never copied into a staged context.
const STAGE_EXCLUDES: &[&str] = &[".git", ".devimg", "target"];

/// What the context directory builds from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// A plain `Dockerfile` at the context root
    Dockerfile(PathBuf),
    /// `.devcontainer/devcontainer.json`, optionally next to a Dockerfile
    Devcontainer {
        config: PathBuf,
        dockerfile: Option<PathBuf>,
    },
}

/// A directory holding a build recipe. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    dir: PathBuf,
    recipe: Recipe,
}

impl BuildContext {
    /// Inspect `dir` and detect its recipe.
    ///
    /// `.devcontainer/devcontainer.json` wins over a root `Dockerfile`.
    pub fn open(dir: &Path) -> Result<Self, ContextError> {
        if !dir.is_dir() {
            return Err(ContextError::NotFound(dir.to_path_buf()));
        }

        let devcontainer_dir = dir.join(".devcontainer");
        let devcontainer_json = devcontainer_dir.join("devcontainer.json");
        let recipe = if devcontainer_json.is_file() {
            let dockerfile = [devcontainer_dir.join("Dockerfile"), dir.join("Dockerfile")]
                .into_iter()
                .find(|p| p.is_file());
            Recipe::Devcontainer {
                config: devcontainer_json,
                dockerfile,
            }
        } else if dir.join("Dockerfile").is_file() {
            Recipe::Dockerfile(dir.join("Dockerfile"))
        } else {
            return Err(ContextError::NoRecipe(dir.to_path_buf()));
        };

        tracing::debug!(dir = %dir.display(), ?recipe, "build context opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            recipe,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Whether the devcontainer CLI can build this context.
    pub fn is_devcontainer(&self) -> bool {
        matches!(self.recipe, Recipe::Devcontainer { .. })
    }

    /// Dockerfile for a direct build, if the context has one.
    pub fn dockerfile(&self) -> Option<&Path> {
        match &self.recipe {
            Recipe::Dockerfile(path) => Some(path),
            Recipe::Devcontainer { dockerfile, .. } => dockerfile.as_deref(),
        }
    }

    /// Context directory for a direct build: the Dockerfile's directory for
    /// devcontainer recipes (matching devcontainer.json's default
    /// `build.context`), the context root otherwise.
    pub fn direct_context(&self) -> &Path {
        match &self.recipe {
            Recipe::Devcontainer {
                dockerfile: Some(dockerfile),
                ..
            } => match dockerfile.parent() {
                Some(parent) => parent,
                None => &self.dir,
            },
            _ => &self.dir,
        }
    }

    /// Merge this context with shared files into a transient directory.
    ///
    /// `shared` paths are resolved against `project_dir` and copied to the
    /// staged root under their file names. With no shared paths the context
    /// is used in place and nothing is copied.
    pub fn stage(&self, project_dir: &Path, shared: &[PathBuf]) -> Result<StagedContext, ContextError> {
        if shared.is_empty() {
            return Ok(StagedContext {
                context: self.clone(),
                temp_dir: None,
            });
        }

        let tmp = tempfile::Builder::new()
            .prefix("devimg-context-")
            .tempdir()
            .map_err(|e| ContextError::Stage {
                path: std::env::temp_dir(),
                source: e,
            })?;

        copy_tree(&self.dir, tmp.path())?;

        for relative in shared {
            let src = project_dir.join(relative);
            if !src.exists() {
                return Err(ContextError::SharedMissing(src));
            }
            let name = src
                .file_name()
                .ok_or_else(|| ContextError::SharedMissing(src.clone()))?;
            let dst = tmp.path().join(name);
            if src.is_dir() {
                copy_tree(&src, &dst)?;
            } else {
                copy_file(&src, &dst)?;
            }
        }

        tracing::debug!(
            from = %self.dir.display(),
            to = %tmp.path().display(),
            shared = shared.len(),
            "build context staged"
        );

        let context = Self::open(tmp.path())?;
        Ok(StagedContext {
            context,
            temp_dir: Some(tmp),
        })
    }
}

/// A build context that may live in a temporary directory.
///
/// The directory is removed when this value is dropped, including when the
/// pipeline future holding it is cancelled.
#[derive(Debug)]
pub struct StagedContext {
    context: BuildContext,
    temp_dir: Option<tempfile::TempDir>,
}

impl StagedContext {
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn is_transient(&self) -> bool {
        self.temp_dir.is_some()
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), ContextError> {
    std::fs::create_dir_all(dst).map_err(|e| ContextError::Stage {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let entries = std::fs::read_dir(src).map_err(|e| ContextError::Stage {
        path: src.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ContextError::Stage {
            path: src.to_path_buf(),
            source: e,
        })?;
        let name = entry.file_name();
        if STAGE_EXCLUDES.iter().any(|ex| name == *ex) {
            continue;
        }

        let path = entry.path();
        let target = dst.join(&name);
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            copy_file(&path, &target)?;
        }
    }

    Ok(())
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), ContextError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ContextError::Stage {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::copy(src, dst).map_err(|e| ContextError::Stage {
        path: src.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("build context {0} does not exist or is not a directory")]
    NotFound(PathBuf),
    #[error("no Dockerfile or .devcontainer/devcontainer.json in {0}")]
    NoRecipe(PathBuf),
    #[error("shared path {0} does not exist")]
    SharedMissing(PathBuf),
    #[error("failed to stage build context at {path}")]
    Stage {
        path: PathBuf,
        source: std::io::Error,
    },
}
