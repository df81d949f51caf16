use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for one tracking session.
///
/// Everything here is fixed for the lifetime of an engine except
/// `quality_level` and `min_parallax_dist`, which the adaptive controller
/// retunes every frame. Missing fields in a JSON file fall back to the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Assumed horizontal field of view, used to build `K` from the frame size
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f64,
    /// Upper bound on simultaneously tracked features
    #[serde(default = "default_max_active_pts")]
    pub max_active_pts: usize,
    /// Exclusion radius in pixels around every active track
    #[serde(default = "default_min_distance")]
    pub min_distance: u32,
    /// Fewest correspondences a motion estimate is attempted with
    #[serde(default = "default_min_features")]
    pub min_features: usize,
    /// Below this many active tracks optical flow is not run at all
    #[serde(default = "default_min_track_points")]
    pub min_track_points: usize,
    #[serde(default = "default_z_min")]
    pub z_min: f64,
    #[serde(default = "default_z_max")]
    pub z_max: f64,
    /// Edge length of a ground-plane cell in the voxel map
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f64,
    /// Corner response threshold relative to the strongest corner (adaptive)
    #[serde(default = "default_quality_level")]
    pub quality_level: f64,
    /// Minimum camera baseline before a track is triangulated (adaptive)
    #[serde(default = "default_min_parallax_dist")]
    pub min_parallax_dist: f64,
    /// Minimum baseline / depth ratio of an accepted point
    #[serde(default = "default_parallax_ratio_target")]
    pub parallax_ratio_target: f64,
    /// Frames a track must have lived before it is triangulated
    #[serde(default = "default_min_triangulation_age")]
    pub min_triangulation_age: u32,
    /// When set, live tracks of this age are triangulated once without waiting to be dropped
    #[serde(default)]
    pub live_triangulation_age: Option<u32>,
    /// Sampson distance threshold for the essential matrix consensus, in pixels
    #[serde(default = "default_ransac_threshold_px")]
    pub ransac_threshold_px: f64,
    /// Median flow under which the camera is considered static
    #[serde(default = "default_min_flow_px")]
    pub min_flow_px: f64,
    /// Seed of the consensus sampler, so runs are reproducible
    #[serde(default)]
    pub ransac_seed: u64,
    #[serde(default)]
    pub flow: FlowConfig,
    /// Frames between two progress messages of a batch run
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u32,
    /// Capacity of the rolling triangulation outcome window
    #[serde(default = "default_stats_capacity")]
    pub stats_capacity: usize,
}

/// Pyramidal Lucas-Kanade parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_pyramid_levels")]
    pub pyramid_levels: u32,
    /// Half size of the square integration window
    #[serde(default = "default_window_radius")]
    pub window_radius: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Update norm at which the per-level iteration stops
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

fn default_fov_deg() -> f64 {
    111.0
}

fn default_max_active_pts() -> usize {
    300
}

fn default_min_distance() -> u32 {
    20
}

fn default_min_features() -> usize {
    50
}

fn default_min_track_points() -> usize {
    10
}

fn default_z_min() -> f64 {
    1.0
}

fn default_z_max() -> f64 {
    80.0
}

fn default_voxel_size() -> f64 {
    1.0
}

fn default_quality_level() -> f64 {
    0.01
}

fn default_min_parallax_dist() -> f64 {
    0.05
}

fn default_parallax_ratio_target() -> f64 {
    0.02
}

fn default_min_triangulation_age() -> u32 {
    5
}

fn default_ransac_threshold_px() -> f64 {
    1.0
}

fn default_min_flow_px() -> f64 {
    0.3
}

fn default_progress_interval() -> u32 {
    100
}

fn default_stats_capacity() -> usize {
    500
}

fn default_pyramid_levels() -> u32 {
    3
}

fn default_window_radius() -> u32 {
    10
}

fn default_max_iterations() -> u32 {
    30
}

fn default_epsilon() -> f32 {
    0.01
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: default_pyramid_levels(),
            window_radius: default_window_radius(),
            max_iterations: default_max_iterations(),
            epsilon: default_epsilon(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fov_deg: default_fov_deg(),
            max_active_pts: default_max_active_pts(),
            min_distance: default_min_distance(),
            min_features: default_min_features(),
            min_track_points: default_min_track_points(),
            z_min: default_z_min(),
            z_max: default_z_max(),
            voxel_size: default_voxel_size(),
            quality_level: default_quality_level(),
            min_parallax_dist: default_min_parallax_dist(),
            parallax_ratio_target: default_parallax_ratio_target(),
            min_triangulation_age: default_min_triangulation_age(),
            live_triangulation_age: None,
            ransac_threshold_px: default_ransac_threshold_px(),
            min_flow_px: default_min_flow_px(),
            ransac_seed: 0,
            flow: FlowConfig::default(),
            progress_interval: default_progress_interval(),
            stats_capacity: default_stats_capacity(),
        }
    }
}

impl Config {
    /// Reads a (possibly partial) JSON config and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(field: &'static str, ok: bool, requirement: &'static str, value: f64) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    field,
                    requirement,
                    value,
                })
            }
        }

        check(
            "fov_deg",
            self.fov_deg > 0.0 && self.fov_deg < 180.0,
            "in (0, 180)",
            self.fov_deg,
        )?;
        check(
            "max_active_pts",
            self.max_active_pts > 0,
            "positive",
            self.max_active_pts as f64,
        )?;
        check(
            "min_features",
            self.min_features >= 8,
            "at least 8",
            self.min_features as f64,
        )?;
        check("z_min", self.z_min > 0.0, "positive", self.z_min)?;
        check("z_max", self.z_max > self.z_min, "greater than z_min", self.z_max)?;
        check("voxel_size", self.voxel_size > 0.0, "positive", self.voxel_size)?;
        check(
            "quality_level",
            self.quality_level > 0.0 && self.quality_level < 1.0,
            "in (0, 1)",
            self.quality_level,
        )?;
        check(
            "min_parallax_dist",
            self.min_parallax_dist >= 0.0,
            "non-negative",
            self.min_parallax_dist,
        )?;
        check(
            "ransac_threshold_px",
            self.ransac_threshold_px > 0.0,
            "positive",
            self.ransac_threshold_px,
        )?;
        check(
            "flow.pyramid_levels",
            self.flow.pyramid_levels >= 1,
            "at least 1",
            self.flow.pyramid_levels as f64,
        )?;
        check(
            "flow.window_radius",
            self.flow.window_radius >= 1,
            "at least 1",
            self.flow.window_radius as f64,
        )?;
        check(
            "progress_interval",
            self.progress_interval > 0,
            "positive",
            self.progress_interval as f64,
        )?;
        check(
            "stats_capacity",
            self.stats_capacity > 0,
            "positive",
            self.stats_capacity as f64,
        )
    }
}
