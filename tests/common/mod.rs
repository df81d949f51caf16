#![allow(dead_code)]

use image::{GrayImage, Luma};
use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use vomap::{algorithms::camera::PinholeCamera, Config, FlowConfig};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;
pub const FOV_DEG: f64 = 60.0;

const BACKGROUND: f32 = 20.0;
const AMPLITUDE: f32 = 200.0;
const SIGMA: f32 = 1.3;

/// Textured scene of bright blobs spread in front of a camera sliding along +x
pub struct BlobScene {
    pub camera: PinholeCamera,
    pub points: Vec<Vector3<f64>>,
}

impl BlobScene {
    /// `span` is how far the camera will travel along x
    pub fn new(seed: u64, count: usize, span: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let points = (0..count)
            .map(|_| {
                let z = rng.gen_range(3.0..7.0);
                let x = rng.gen_range(-0.6 * z..span + 0.6 * z);
                let y = rng.gen_range(-0.43 * z..0.43 * z);
                Vector3::new(x, y, z)
            })
            .collect();
        Self {
            camera: PinholeCamera::from_fov(WIDTH, HEIGHT, FOV_DEG),
            points,
        }
    }

    /// Frame seen by an unrotated camera at `position`
    pub fn render(&self, position: &Vector3<f64>) -> GrayImage {
        let mut canvas = vec![BACKGROUND; (WIDTH * HEIGHT) as usize];
        let reach = (SIGMA * 4.0).ceil() as i64;

        for point in &self.points {
            let Some(pixel) = self.camera.project(&(point - position)) else {
                continue;
            };
            let (cx, cy) = (pixel.x as f32, pixel.y as f32);
            let (u0, v0) = (cx.round() as i64, cy.round() as i64);
            for v in (v0 - reach)..=(v0 + reach) {
                for u in (u0 - reach)..=(u0 + reach) {
                    if u < 0 || v < 0 || u >= WIDTH as i64 || v >= HEIGHT as i64 {
                        continue;
                    }
                    let d2 = (u as f32 - cx).powi(2) + (v as f32 - cy).powi(2);
                    canvas[(v as u32 * WIDTH + u as u32) as usize] +=
                        AMPLITUDE * (-d2 / (2.0 * SIGMA * SIGMA)).exp();
                }
            }
        }

        GrayImage::from_fn(WIDTH, HEIGHT, |u, v| {
            Luma([canvas[(v * WIDTH + u) as usize].clamp(0.0, 255.0) as u8])
        })
    }

    /// `count` frames, the camera moving `step` along +x between consecutive ones
    pub fn sideways_sequence(&self, count: usize, step: f64) -> Vec<GrayImage> {
        (0..count)
            .map(|k| self.render(&Vector3::new(k as f64 * step, 0.0, 0.0)))
            .collect()
    }
}

/// Settings sized for the small synthetic frames
pub fn synthetic_config() -> Config {
    Config {
        fov_deg: FOV_DEG,
        min_distance: 8,
        flow: FlowConfig {
            window_radius: 6,
            ..FlowConfig::default()
        },
        ..Config::default()
    }
}

pub fn black_frames(count: usize) -> Vec<GrayImage> {
    vec![GrayImage::from_pixel(WIDTH, HEIGHT, Luma([0])); count]
}
