use log::trace;
use nalgebra::Vector2;

use crate::{
    algorithms::pyramid::{Pyramid, PyramidLevel},
    config::FlowConfig,
};

/// Smallest eigenvalue of the window-averaged gradient matrix that is still trackable
const MIN_EIGEN: f32 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Found,
    /// The feature left the frame
    OutOfBounds,
    /// The window around the feature has no usable gradient
    Untextured,
}

#[derive(Debug, Clone, Copy)]
pub struct FlowResult {
    pub position: Vector2<f32>,
    pub status: FlowStatus,
}

impl FlowResult {
    pub fn found(&self) -> bool {
        self.status == FlowStatus::Found
    }
}

/// Pyramidal Lucas-Kanade tracker.
///
/// Follows Bouguet's formulation: the gradient matrix is built once per level
/// from the previous frame, and the flow estimate from a coarse level seeds
/// the next finer one (doubled).
pub struct LucasKanade<'a> {
    config: &'a FlowConfig,
}

impl<'a> LucasKanade<'a> {
    pub fn new(config: &'a FlowConfig) -> Self {
        Self { config }
    }

    pub fn track(&self, prev: &Pyramid, curr: &Pyramid, points: &[Vector2<f32>]) -> Vec<FlowResult> {
        points
            .iter()
            .map(|&point| match self.track_point(prev, curr, point) {
                Ok(position) => FlowResult {
                    position,
                    status: FlowStatus::Found,
                },
                Err(status) => FlowResult {
                    position: point,
                    status,
                },
            })
            .collect()
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        point: Vector2<f32>,
    ) -> Result<Vector2<f32>, FlowStatus> {
        let levels = prev.levels().len().min(curr.levels().len());
        let mut flow = Vector2::zeros();

        for level in (0..levels).rev() {
            let prev_level = &prev.levels()[level];
            let curr_level = &curr.levels()[level];
            flow = self.track_level(prev_level, curr_level, point * prev_level.scale, flow)?;
            if level > 0 {
                flow *= 2.0;
            }
        }

        let position = point + flow;
        if !curr.base().contains(position.x, position.y) {
            return Err(FlowStatus::OutOfBounds);
        }
        Ok(position)
    }

    /// Refines `flow` (in level coordinates) for the window centred on `template`.
    fn track_level(
        &self,
        prev_level: &PyramidLevel,
        curr_level: &PyramidLevel,
        template: Vector2<f32>,
        mut flow: Vector2<f32>,
    ) -> Result<Vector2<f32>, FlowStatus> {
        let radius = self.config.window_radius as i32;

        // template intensities and gradients are fixed for the whole level
        let mut window = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        let (mut gxx, mut gxy, mut gyy) = (0f32, 0f32, 0f32);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let offset = Vector2::new(dx as f32, dy as f32);
                let pos = template + offset;
                let intensity = prev_level.intensity(pos.x, pos.y);
                let (gx, gy) = prev_level.gradient(pos.x, pos.y);
                gxx += gx * gx;
                gxy += gx * gy;
                gyy += gy * gy;
                window.push((offset, intensity, gx, gy));
            }
        }

        let area = window.len() as f32;
        let half_trace = (gxx + gyy) / (2.0 * area);
        let min_eigen = half_trace
            - (((gxx - gyy) / (2.0 * area)).powi(2) + (gxy / area).powi(2)).sqrt();
        let determinant = gxx * gyy - gxy * gxy;
        if min_eigen < MIN_EIGEN || determinant.abs() <= f32::EPSILON {
            return Err(FlowStatus::Untextured);
        }
        let inv_det = 1.0 / determinant;

        let epsilon_sq = self.config.epsilon * self.config.epsilon;
        for iteration in 0..self.config.max_iterations {
            let target = template + flow;
            if !curr_level.contains(target.x, target.y) {
                return Err(FlowStatus::OutOfBounds);
            }

            // b = sum (I_prev - I_curr(x + d)) * grad
            let (mut bx, mut by) = (0f32, 0f32);
            for &(offset, intensity, gx, gy) in &window {
                let pos = target + offset;
                let error = intensity - curr_level.intensity(pos.x, pos.y);
                bx += error * gx;
                by += error * gy;
            }

            let delta = Vector2::new(
                inv_det * (gyy * bx - gxy * by),
                inv_det * (gxx * by - gxy * bx),
            );
            flow += delta;

            if delta.norm_squared() < epsilon_sq {
                trace!(
                    "octave {} converged after {} iterations",
                    prev_level.octave,
                    iteration + 1
                );
                break;
            }
        }

        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{GrayImage, Luma};

    fn blob(width: u32, height: u32, cx: f32, cy: f32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
            Luma([(20.0 + 200.0 * (-d2 / (2.0 * 9.0)).exp()) as u8])
        })
    }

    fn config() -> FlowConfig {
        FlowConfig {
            pyramid_levels: 2,
            window_radius: 5,
            ..FlowConfig::default()
        }
    }

    #[test]
    fn follows_subpixel_shift() {
        let config = config();
        let prev = Pyramid::build(&blob(64, 64, 32.0, 32.0), 2);
        let curr = Pyramid::build(&blob(64, 64, 34.5, 30.5), 2);

        let result = LucasKanade::new(&config).track(&prev, &curr, &[Vector2::new(32.0, 32.0)]);
        assert!(result[0].found());
        assert_relative_eq!(result[0].position.x, 34.5, epsilon = 0.15);
        assert_relative_eq!(result[0].position.y, 30.5, epsilon = 0.15);
    }

    #[test]
    fn flat_window_is_untextured() {
        let config = config();
        let flat = Pyramid::build(&GrayImage::from_pixel(64, 64, Luma([90])), 2);
        let result = LucasKanade::new(&config).track(&flat, &flat, &[Vector2::new(20.0, 20.0)]);
        assert_eq!(result[0].status, FlowStatus::Untextured);
        assert_eq!(result[0].position, Vector2::new(20.0, 20.0));
    }
}
