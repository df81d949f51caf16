use image::{GrayImage, Luma};
use imageproc::{
    drawing::draw_filled_circle_mut,
    gradients::{horizontal_sobel, vertical_sobel},
};

/// Pixels this close to the border never become corners
const BORDER_MARGIN: u32 = 3;
/// Responses at or below this are treated as a textureless frame
const MIN_RESPONSE: f32 = 1e-6;

/// Mask value of a pixel where detection is allowed
pub const MASK_OPEN: Luma<u8> = Luma([255]);
pub const MASK_BLOCKED: Luma<u8> = Luma([0]);

#[derive(Debug, Clone, Copy)]
pub struct GoodFeatures {
    pub max_corners: usize,
    /// Fraction of the strongest response a corner must reach
    pub quality_level: f64,
    pub min_distance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
    pub response: f32,
}

/// Blocks a disk of `radius` around `(x, y)` in a detection mask.
pub fn block_disk(mask: &mut GrayImage, x: f32, y: f32, radius: u32) {
    draw_filled_circle_mut(
        mask,
        (x.round() as i32, y.round() as i32),
        radius as i32,
        MASK_BLOCKED,
    );
}

impl GoodFeatures {
    /// Shi-Tomasi corners, strongest first.
    ///
    /// Only pixels left open in `mask` are considered, and every accepted corner
    /// blocks a disk of `min_distance` in the same mask, so the caller gets the
    /// final exclusion state back.
    pub fn detect(&self, image: &GrayImage, mask: &mut GrayImage) -> Vec<Corner> {
        if self.max_corners == 0 {
            return Vec::new();
        }

        let response = min_eigen_response(image);
        let (width, height) = image.dimensions();
        let max_response = response.iter().copied().fold(0f32, f32::max);
        if max_response <= MIN_RESPONSE {
            return Vec::new();
        }
        let threshold = (self.quality_level as f32 * max_response).max(MIN_RESPONSE);

        let at = |x: u32, y: u32| response[(y * width + x) as usize];
        let mut candidates = Vec::new();
        for y in BORDER_MARGIN..height.saturating_sub(BORDER_MARGIN) {
            for x in BORDER_MARGIN..width.saturating_sub(BORDER_MARGIN) {
                let value = at(x, y);
                if value < threshold || mask.get_pixel(x, y)[0] == 0 {
                    continue;
                }
                // 3x3 non-maximum suppression
                let is_peak = (y - 1..=y + 1)
                    .flat_map(|ny| (x - 1..=x + 1).map(move |nx| (nx, ny)))
                    .all(|(nx, ny)| at(nx, ny) <= value);
                if is_peak {
                    candidates.push(Corner {
                        x: x as f32,
                        y: y as f32,
                        response: value,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let mut accepted = Vec::new();
        for corner in candidates {
            if mask.get_pixel(corner.x as u32, corner.y as u32)[0] == 0 {
                continue;
            }
            block_disk(mask, corner.x, corner.y, self.min_distance);
            accepted.push(corner);
            if accepted.len() == self.max_corners {
                break;
            }
        }

        accepted
    }
}

/// Minimum eigenvalue of the 3x3 structure tensor at every pixel
fn min_eigen_response(image: &GrayImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);

    let mut ixx = vec![0f32; (width * height) as usize];
    let mut ixy = ixx.clone();
    let mut iyy = ixx.clone();
    for (i, (x, y)) in gx.pixels().zip(gy.pixels()).enumerate() {
        let (x, y) = (x[0] as f32 / 8.0, y[0] as f32 / 8.0);
        ixx[i] = x * x;
        ixy[i] = x * y;
        iyy[i] = y * y;
    }

    let mut response = vec![0f32; (width * height) as usize];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let (mut a, mut b, mut c) = (0f32, 0f32, 0f32);
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let i = (ny * width + nx) as usize;
                    a += ixx[i];
                    b += ixy[i];
                    c += iyy[i];
                }
            }
            response[(y * width + x) as usize] =
                (a + c) / 2.0 - (((a - c) / 2.0).powi(2) + b * b).sqrt();
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares(centres: &[(u32, u32)]) -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| {
            let inside = centres
                .iter()
                .any(|&(cx, cy)| x.abs_diff(cx) <= 4 && y.abs_diff(cy) <= 4);
            Luma([if inside { 220 } else { 30 }])
        })
    }

    fn detector(max_corners: usize, min_distance: u32) -> GoodFeatures {
        GoodFeatures {
            max_corners,
            quality_level: 0.01,
            min_distance,
        }
    }

    #[test]
    fn black_frame_has_no_corners() {
        let image = GrayImage::new(64, 64);
        let mut mask = GrayImage::from_pixel(64, 64, MASK_OPEN);
        assert!(detector(100, 5).detect(&image, &mut mask).is_empty());
    }

    #[test]
    fn accepted_corners_respect_min_distance() {
        let image = squares(&[(24, 24), (70, 24), (24, 70), (70, 70)]);
        let mut mask = GrayImage::from_pixel(96, 96, MASK_OPEN);
        let corners = detector(100, 6).detect(&image, &mut mask);

        // four corners per square
        assert!(corners.len() >= 12, "found {}", corners.len());
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                assert!(d > 6.0, "{a:?} and {b:?} are {d} apart");
            }
        }
        assert!(corners.windows(2).all(|w| w[0].response >= w[1].response));
    }

    #[test]
    fn blocked_mask_suppresses_detection() {
        let image = squares(&[(24, 24), (70, 70)]);
        let mut mask = GrayImage::from_pixel(96, 96, MASK_OPEN);
        block_disk(&mut mask, 24.0, 24.0, 12);
        let corners = detector(100, 3).detect(&image, &mut mask);
        assert!(!corners.is_empty());
        assert!(corners
            .iter()
            .all(|c| (c.x - 24.0).abs() > 8.0 || (c.y - 24.0).abs() > 8.0));
    }

    #[test]
    fn caps_at_max_corners() {
        let image = squares(&[(24, 24), (70, 24), (24, 70), (70, 70)]);
        let mut mask = GrayImage::from_pixel(96, 96, MASK_OPEN);
        assert_eq!(detector(3, 2).detect(&image, &mut mask).len(), 3);
    }
}
