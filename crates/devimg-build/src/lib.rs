//! Image construction for devimg.
//!
//! # Build flow
//!
//! ```text
//! devimg build
//!   1. Context   ── BuildContext::open() → Dockerfile or devcontainer.json
//!   2. Stage     ── copy context + [build].shared into a TempDir (optional)
//!   3. Backend   ── select_backend(): devcontainer CLI, else docker buildx
//!   4. Plan      ── ImageBuilder::plan() → ordered Vec<BuildAttempt>
//!   5. Attempts  ── run until one succeeds; record every outcome
//!   6. Verify    ── image inspect (load) / imagetools inspect (push)
//! ```
//!
//! # Attempt plans
//!
//! - **Ci**: all platforms, pushed. On failure a host-only diagnostic build
//!   is loaded locally for inspection and the build still fails.
//! - **Local**: one platform, loaded. A devcontainer CLI failure is retried
//!   with buildx when the context has a Dockerfile.

pub mod backend;
pub mod builder;
pub mod context;
pub mod error;

pub use backend::{BuildBackend, select_backend};
pub use builder::{
    AttemptOutcome, AttemptPurpose, AttemptRecord, BuildAttempt, BuildOptions, BuiltImage,
    ImageBuilder,
};
pub use context::{BuildContext, ContextError, Recipe, StagedContext};
pub use error::BuildError;
