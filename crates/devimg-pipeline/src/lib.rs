//! Validation, promotion and end-to-end orchestration for devimg.
//!
//! # Pipeline
//!
//! ```text
//! devimg run
//!   1. Resolve   ── Resolver::resolve() → BuildConfig (devimg-core)
//!   2. Build     ── per variant, sequential (devimg-build)
//!   3. Validate  ── per variant, concurrent; join_all before aggregating
//!   4. Promote   ── per variant, per tag; failures recorded, never rolled back
//! ```
//!
//! # Exit codes
//!
//! | Failure                   | Code |
//! |---------------------------|------|
//! | build / tooling           | 1    |
//! | a fatal check failed      | 2    |
//! | some tags not promoted    | 3    |

pub mod error;
pub mod pipeline;
pub mod promote;
pub mod validate;

pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineReport, Target};
pub use promote::{Mechanism, PromotionOutcome, PromotionRecord, PromotionReport, Promoter};
pub use validate::{CheckResult, Severity, ValidationResult, Validator};
