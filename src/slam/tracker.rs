use log::{debug, trace};
use nalgebra::{Matrix3, Vector2, Vector3};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    algorithms::{
        camera::{disambiguate_camera_pose, PinholeCamera},
        essential::{estimate_essential, Correspondence},
    },
    config::Config,
    error::DegenerateMotion,
    slam::pose::Pose,
};

/// Fewest correspondences that can support a pose
const MIN_POSE_INLIERS: usize = 8;

/// Relative motion between the previous and the current frame
#[derive(Debug, Clone)]
pub struct MotionEstimate {
    /// Pose of the current camera expressed in the previous camera's frame
    pub relative: Pose,
    pub rotation: Matrix3<f64>,
    /// Unit length; monocular translation has no metric scale
    pub translation: Vector3<f64>,
    /// One entry per correspondence, in input order
    pub inlier_mask: Vec<bool>,
}

impl MotionEstimate {
    fn stationary(count: usize) -> Self {
        Self {
            relative: Pose::identity(),
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            inlier_mask: vec![true; count],
        }
    }

    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&ok| ok).count()
    }
}

/// Robust epipolar motion from optical flow correspondences
pub struct MotionEstimator {
    rng: StdRng,
    min_features: usize,
    ransac_threshold_px: f64,
    min_flow_px: f64,
}

impl MotionEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.ransac_seed),
            min_features: config.min_features,
            ransac_threshold_px: config.ransac_threshold_px,
            min_flow_px: config.min_flow_px,
        }
    }

    /// Estimates `[R | t]` taking the current camera into the previous one.
    ///
    /// Perform Random Sampling Consensus technique to find the Essential Matrix,
    /// then decompose it and keep the configuration that puts the most points in
    /// front of both cameras. The inlier mask is the intersection of the
    /// consensus inliers and the cheirality check.
    pub fn estimate(
        &mut self,
        prev: &[Vector2<f32>],
        curr: &[Vector2<f32>],
        camera: &PinholeCamera,
    ) -> Result<MotionEstimate, DegenerateMotion> {
        let count = prev.len().min(curr.len());
        if count < self.min_features {
            return Err(DegenerateMotion::TooFewCorrespondences {
                found: count,
                required: self.min_features,
            });
        }

        // an essential matrix of a zero baseline pair is meaningless
        let median_flow = median_flow(&prev[..count], &curr[..count]);
        if median_flow < self.min_flow_px {
            trace!("median flow {median_flow:.3}px, treating the camera as static");
            return Ok(MotionEstimate::stationary(count));
        }

        let data: Vec<Correspondence> = prev
            .iter()
            .zip(curr)
            .map(|(&p, &c)| Correspondence {
                curr: camera.normalize(c),
                prev: camera.normalize(p),
            })
            .collect();

        // the residual lives in normalized coordinates
        let threshold = self.ransac_threshold_px / camera.focal();
        let fit =
            estimate_essential(&data, threshold, &mut self.rng).ok_or(DegenerateMotion::NoConsensus)?;
        let (r_set, t_set) = fit
            .essential
            .extract_pose_configurations()
            .ok_or(DegenerateMotion::NoConsensus)?;

        let x1_set: Vec<_> = fit.inliers.iter().map(|&i| data[i].curr).collect();
        let x2_set: Vec<_> = fit.inliers.iter().map(|&i| data[i].prev).collect();
        let pose = disambiguate_camera_pose(&r_set, &t_set, &x1_set, &x2_set);

        let mut inlier_mask = vec![false; count];
        for (&i, &in_front) in fit.inliers.iter().zip(&pose.in_front) {
            inlier_mask[i] = in_front;
        }
        let inliers = inlier_mask.iter().filter(|&&ok| ok).count();
        debug!(
            "essential matrix: {} consensus inliers, {} in front of both cameras",
            fit.inliers.len(),
            inliers
        );
        if inliers < MIN_POSE_INLIERS {
            return Err(DegenerateMotion::TooFewInliers { found: inliers });
        }

        let relative = Pose::from_parts(&pose.rotation, &pose.translation);
        if !relative.is_finite() {
            return Err(DegenerateMotion::NonFinite);
        }

        Ok(MotionEstimate {
            relative,
            rotation: pose.rotation,
            translation: pose.translation,
            inlier_mask,
        })
    }
}

fn median_flow(prev: &[Vector2<f32>], curr: &[Vector2<f32>]) -> f64 {
    let mut magnitudes: Vec<f32> = prev.iter().zip(curr).map(|(p, c)| (c - p).norm()).collect();
    if magnitudes.is_empty() {
        return 0.0;
    }
    let middle = magnitudes.len() / 2;
    let (_, median, _) = magnitudes.select_nth_unstable_by(middle, |a, b| a.total_cmp(b));
    *median as f64
}
