pub mod aggregate;
pub mod cluster;
pub mod correction;
pub mod fingerprint;
pub mod frames;
pub mod ocr;
pub mod preprocess;
pub mod runner;
pub mod scheduler;
pub mod types;

pub use aggregate::*;
pub use cluster::*;
pub use fingerprint::*;
pub use frames::*;
pub use runner::*;
pub use scheduler::*;
pub use types::*;

use std::path::PathBuf;

use thiserror::Error;

/// Fatal pipeline failures. Per-frame and per-cluster problems are recovered
/// locally inside their stages and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Frame directory does not exist: {0}")]
    InputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Result file could not be written: {0}")]
    OutputWrite(String),
}
