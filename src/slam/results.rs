use serde::{Deserialize, Serialize};

use crate::slam::system::System;

/// Diagnostics of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub frames_processed: u32,
    pub active: usize,
    pub in_map: usize,
    /// Age of the oldest live track that has no 3D position yet
    pub max_age_pending: u32,
    /// Map points per track ever lost, in percent
    pub success_rate_pct: f64,
    /// Success rate over the rolling triangulation window, if it has samples
    pub recent_success_rate: Option<f64>,
    pub last_ratio: f32,
    pub cfg_quality: f64,
    pub cfg_min_dist: f64,
}

/// Immutable view of the engine's output, cheap enough to send over a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `(x, z, yaw)` for every processed frame
    pub path: Vec<[f32; 3]>,
    /// `(x, z, age)` for every map point
    pub point_cloud: Vec<[f32; 3]>,
    pub scene_loss_marks: Vec<u32>,
    /// Inclusive frame range covered by `path`, `None` before the first frame
    pub analyzed_range: Option<(u32, u32)>,
    pub stats: Stats,
}

impl System {
    /// Path, point cloud and diagnostics as of the last processed frame.
    pub fn snapshot(&self) -> Snapshot {
        let path = self
            .poses
            .poses()
            .iter()
            .map(|pose| {
                let t = pose.translation();
                [t.x as f32, t.z as f32, pose.yaw() as f32]
            })
            .collect();

        let point_cloud = self
            .map
            .points()
            .iter()
            .map(|p| [p.position.x, p.position.z, p.age as f32])
            .collect();

        Snapshot {
            path,
            point_cloud,
            scene_loss_marks: self.scene_loss_marks.clone(),
            analyzed_range: self
                .frames_processed
                .checked_sub(1)
                .map(|last| (0, last)),
            stats: self.stats(),
        }
    }

    pub fn stats(&self) -> Stats {
        let last_frame = self.frames_processed.saturating_sub(1);
        let max_age_pending = self
            .tracks
            .iter()
            .filter(|t| t.resolved_3d.is_none())
            .map(|t| last_frame.saturating_sub(t.first_pose_index))
            .max()
            .unwrap_or(0);

        let in_map = self.map.len();
        let success_rate_pct = if self.lost_tracks > 0 {
            in_map as f64 / self.lost_tracks as f64 * 100.0
        } else {
            0.0
        };

        Stats {
            frames_processed: self.frames_processed,
            active: self.tracks.len(),
            in_map,
            max_age_pending,
            success_rate_pct,
            recent_success_rate: self.triangulator.stats().recent_success_rate(100, 1),
            last_ratio: self.last_point.map_or(0.0, |p| p.quality_ratio),
            cfg_quality: self.config.quality_level,
            cfg_min_dist: self.config.min_parallax_dist,
        }
    }

    /// `(pitch, roll, yaw)` of the latest pose, in radians
    pub fn horizon_angles(&self) -> (f64, f64, f64) {
        self.poses.current().horizon_angles()
    }

    /// Length of the last relative translation; unit scale while moving, zero when lost or static
    pub fn forward_velocity(&self) -> f64 {
        self.last_relative.translation().norm()
    }
}
