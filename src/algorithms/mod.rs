//! Collection of general or specific algorithms which may be useful
//! to any kind of odometry or pose tracking implementations

pub mod camera;
pub mod corners;
pub mod essential;
pub mod optical_flow;
pub mod pyramid;
pub mod triangulation;
