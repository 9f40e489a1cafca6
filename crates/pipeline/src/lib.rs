//! `colorforge-pipeline` — the generation pipeline.
//!
//! Drives one job through the step sequence: moderate → generate text →
//! generate image → process image → upload assets → finalize. Steps share a
//! [`StepContext`] threaded through the run (no ad hoc re-fetching) and
//! checkpoint durable progress in `job_steps`, so a redelivered job resumes
//! instead of redoing paid work.

pub mod context;
pub mod error;
pub mod generate_image;
pub mod generate_text;
pub mod moderate;
pub mod process_image;
pub mod publish;
pub mod runner;
pub mod upload_assets;

pub use context::{PipelineConfig, Services, StepContext};
pub use error::{JobOutcome, StepError};
pub use moderate::ModerationOutcome;
pub use runner::run_generate_job;
