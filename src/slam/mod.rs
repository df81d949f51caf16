//! Monocular tracking pipeline: feature tracks, relative motion, pose
//! integration, triangulation and the voxel map, tied together by [`system::System`]

pub mod adaptive;
pub mod feature;
pub mod frame;
pub mod interactive;
pub mod pose;
pub mod results;
pub mod system;
pub mod tracker;
pub mod triangulator;
pub mod voxel_map;
