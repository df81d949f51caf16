use log::debug;

use crate::{config::Config, slam::triangulator::RunStats};

pub const QUALITY_LEVEL_RANGE: (f64, f64) = (0.001, 0.05);
pub const MIN_PARALLAX_DIST_RANGE: (f64, f64) = (0.01, 0.5);

/// Below this fraction of `max_active_pts` the detector is loosened
const LOW_FILL: f64 = 0.7;
/// Above this fraction the detector is tightened
const HIGH_FILL: f64 = 0.9;

const RATE_WINDOW: usize = 100;
const RATE_MIN_SAMPLES: usize = 50;
const LOW_SUCCESS_RATE: f64 = 0.05;
const HIGH_SUCCESS_RATE: f64 = 0.20;

/// Two independent proportional loops retuning the detector and the triangulation baseline
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveController;

impl AdaptiveController {
    /// Adjusts `quality_level` from the track fill ratio and `min_parallax_dist`
    /// from the recent triangulation success rate, clamping both.
    pub fn update(&self, config: &mut Config, active_tracks: usize, stats: &RunStats) {
        let fill = active_tracks as f64 / config.max_active_pts.max(1) as f64;
        let quality_level = if fill < LOW_FILL {
            config.quality_level * 0.95
        } else if fill > HIGH_FILL {
            config.quality_level * 1.05
        } else {
            config.quality_level
        };
        config.quality_level = quality_level.clamp(QUALITY_LEVEL_RANGE.0, QUALITY_LEVEL_RANGE.1);

        if let Some(rate) = stats.recent_success_rate(RATE_WINDOW, RATE_MIN_SAMPLES) {
            let min_parallax_dist = if rate < LOW_SUCCESS_RATE {
                config.min_parallax_dist * 0.9
            } else if rate > HIGH_SUCCESS_RATE {
                config.min_parallax_dist * 1.1
            } else {
                config.min_parallax_dist
            };
            config.min_parallax_dist =
                min_parallax_dist.clamp(MIN_PARALLAX_DIST_RANGE.0, MIN_PARALLAX_DIST_RANGE.1);
        }

        debug!(
            "adaptive: fill {fill:.2}, quality_level {:.4}, min_parallax_dist {:.3}",
            config.quality_level, config.min_parallax_dist
        );
    }
}
