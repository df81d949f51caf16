//! Monocular visual odometry with a sparse ground-plane map.
//!
//! Frames are fed in order to a [`System`]; each one yields a camera pose, and
//! features that drop out of tracking are triangulated into a [`VoxelMap`].
//! Batch runs go through [`worker::spawn_batch`] and end up as a [`TrackRecord`].

pub mod algorithms;
pub mod config;
pub mod error;
pub mod record;
pub mod slam;
pub mod worker;

pub use config::{Config, FlowConfig};
pub use error::{BatchError, ConfigError, DegenerateMotion, EngineError, RecordError, SourceError};
pub use record::{TrackRecord, RECORD_VERSION};
pub use slam::{
    frame::{FrameSource, ImageSequence, InMemoryFrames},
    interactive::InteractiveTracker,
    pose::Pose,
    results::{Snapshot, Stats},
    system::{FrameReport, System},
    voxel_map::{MapPoint, VoxelMap},
};
