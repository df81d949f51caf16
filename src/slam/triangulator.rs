use std::collections::VecDeque;

use log::trace;

use crate::{
    algorithms::{
        camera::PinholeCamera,
        triangulation::{projection_matrix, triangulate_point},
    },
    config::Config,
    slam::{
        feature::FeatureTrack,
        pose::{Pose, PoseIntegrator},
        voxel_map::MapPoint,
    },
};

/// Why a track did not become a map point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Too young to have useful parallax; not counted as an attempt
    NotEligible { age: u32 },
    ShortBaseline { baseline: f64 },
    /// No finite intersection of the two rays
    Degenerate,
    DepthOutOfRange { depth: f64 },
    LowParallax { ratio: f64 },
}

impl Rejection {
    /// Whether the rejection is a real failure that feeds the success statistics
    pub fn is_sample(&self) -> bool {
        !matches!(self, Rejection::NotEligible { .. })
    }
}

/// Rolling window of triangulation outcomes
#[derive(Debug, Clone)]
pub struct RunStats {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl RunStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Success rate over the most recent `window` samples, `None` under `min_samples`
    pub fn recent_success_rate(&self, window: usize, min_samples: usize) -> Option<f64> {
        let skip = self.outcomes.len().saturating_sub(window);
        let recent = self.outcomes.len() - skip;
        if recent == 0 || recent < min_samples {
            return None;
        }
        let successes = self.outcomes.iter().skip(skip).filter(|&&ok| ok).count();
        Some(successes as f64 / recent as f64)
    }
}

/// Gated two-view triangulation of tracks
#[derive(Debug, Clone)]
pub struct Triangulator {
    stats: RunStats,
}

impl Triangulator {
    pub fn new(config: &Config) -> Self {
        Self {
            stats: RunStats::new(config.stats_capacity),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Triangulates a track from its first and its last observation.
    ///
    /// `frame_index` is the frame being processed; the track's age is counted up
    /// to it, even when the track was last observed earlier.
    ///
    /// The gates run in order: age, baseline between the two camera centres,
    /// finite intersection, depth in the last camera within `[z_min, z_max]`,
    /// and baseline over depth above `parallax_ratio_target`. Every outcome
    /// except [`Rejection::NotEligible`] is recorded in [`RunStats`].
    pub fn attempt(
        &mut self,
        track: &FeatureTrack,
        frame_index: u32,
        poses: &PoseIntegrator,
        camera: &PinholeCamera,
        config: &Config,
    ) -> Result<MapPoint, Rejection> {
        let result = Self::triangulate(track, frame_index, poses, camera, config);
        match &result {
            Ok(point) => {
                trace!(
                    "track {} triangulated at {:?} with ratio {:.3}",
                    track.id,
                    point.position,
                    point.quality_ratio
                );
                self.stats.record(true);
            }
            Err(rejection) if rejection.is_sample() => {
                trace!("track {} rejected: {rejection:?}", track.id);
                self.stats.record(false);
            }
            Err(_) => {}
        }
        result
    }

    fn triangulate(
        track: &FeatureTrack,
        frame_index: u32,
        poses: &PoseIntegrator,
        camera: &PinholeCamera,
        config: &Config,
    ) -> Result<MapPoint, Rejection> {
        let age = frame_index.saturating_sub(track.first_pose_index);
        if age < config.min_triangulation_age {
            return Err(Rejection::NotEligible { age });
        }

        let (first_pose, current_pose): (&Pose, &Pose) = match (
            poses.pose_at(track.first_pose_index),
            poses.pose_at(track.last_pose_index),
        ) {
            (Some(first), Some(current)) => (first, current),
            _ => return Err(Rejection::Degenerate),
        };

        let baseline = (current_pose.translation() - first_pose.translation()).norm();
        if baseline <= config.min_parallax_dist {
            return Err(Rejection::ShortBaseline { baseline });
        }

        let camera_matrix1 =
            projection_matrix(&camera.intrinsic, first_pose.matrix()).ok_or(Rejection::Degenerate)?;
        let camera_matrix2 =
            projection_matrix(&camera.intrinsic, current_pose.matrix()).ok_or(Rejection::Degenerate)?;
        let position = triangulate_point(
            &camera_matrix1,
            &camera_matrix2,
            &track.first_pixel.cast::<f64>(),
            &track.pixel.cast::<f64>(),
        )
        .ok_or(Rejection::Degenerate)?;

        let depth = current_pose
            .world_to_camera(&position)
            .ok_or(Rejection::Degenerate)?
            .z;
        if !(config.z_min..=config.z_max).contains(&depth) {
            return Err(Rejection::DepthOutOfRange { depth });
        }

        let ratio = baseline / depth;
        if ratio <= config.parallax_ratio_target {
            return Err(Rejection::LowParallax { ratio });
        }

        Ok(MapPoint {
            position: position.cast::<f32>(),
            age,
            quality_ratio: ratio as f32,
        })
    }
}
