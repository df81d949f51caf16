use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a [`Config`](crate::config::Config)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a single `track_monocular` call.
///
/// Tracking collapse is not one of them: it is recorded as a scene-loss mark.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("frame is {found:?} but the session was started with {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("frame of size {0:?} is too small to track")]
    EmptyFrame((u32, u32)),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors of the tracking record store
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a [`FrameSource`](crate::slam::frame::FrameSource)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("No frames found in {0}")]
    NoFrames(PathBuf),
}

/// Why a frame pair produced no relative pose.
///
/// The engine recovers from this locally by integrating identity and marking
/// the frame as a scene loss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DegenerateMotion {
    #[error("only {found} correspondences, {required} required")]
    TooFewCorrespondences { found: usize, required: usize },

    #[error("no essential matrix reached consensus")]
    NoConsensus,

    #[error("only {found} correspondences survived the cheirality check")]
    TooFewInliers { found: usize },

    #[error("recovered pose is not finite")]
    NonFinite,
}

/// Errors that end a batch run without a result
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Engine processing error: {0}")]
    Engine(#[from] EngineError),

    #[error("failed to spawn the batch worker: {0}")]
    Spawn(std::io::Error),

    #[error("batch worker panicked")]
    Panicked,
}
