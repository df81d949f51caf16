use image::{
    imageops::{resize, FilterType},
    GrayImage, ImageBuffer, Luma,
};
use imageproc::{
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
};
use log::trace;

/// Sobel kernels sum to 8 on a unit ramp
const SOBEL_NORMALIZATION: f32 = 1.0 / 8.0;
const BLUR_SIGMA: f32 = 1.0;
/// Coarser levels than this are not worth tracking on
const MIN_LEVEL_SIZE: u32 = 16;

pub type GradientImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// One octave of an image pyramid with its smoothed intensities and gradients
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub octave: usize,
    /// Factor taking full resolution coordinates into this level
    pub scale: f32,
    pub image: GrayImage,
    pub grad_x: GradientImage,
    pub grad_y: GradientImage,
}

impl PyramidLevel {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width() - 1) as f32 && y <= (self.height() - 1) as f32
    }

    pub fn intensity(&self, x: f32, y: f32) -> f32 {
        bilinear_sample(&self.image, x, y, |p| p.0[0] as f32)
    }

    pub fn gradient(&self, x: f32, y: f32) -> (f32, f32) {
        (
            bilinear_sample(&self.grad_x, x, y, |p| p.0[0]),
            bilinear_sample(&self.grad_y, x, y, |p| p.0[0]),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    /// Builds up to `octaves` levels, stopping early once a level gets too small.
    pub fn build(base: &GrayImage, octaves: usize) -> Self {
        let octaves = octaves.max(1);
        let mut levels: Vec<PyramidLevel> = Vec::with_capacity(octaves);
        let mut current = gaussian_blur_f32(base, BLUR_SIGMA);

        for octave in 0..octaves {
            trace!(
                "pyramid octave {octave}: {}x{}",
                current.width(),
                current.height()
            );
            let grad_x = to_gradient(&horizontal_sobel(&current));
            let grad_y = to_gradient(&vertical_sobel(&current));

            let (width, height) = (current.width() / 2, current.height() / 2);
            let next = (octave + 1 < octaves && width >= MIN_LEVEL_SIZE && height >= MIN_LEVEL_SIZE)
                .then(|| {
                    resize(
                        &gaussian_blur_f32(&current, BLUR_SIGMA),
                        width,
                        height,
                        FilterType::Triangle,
                    )
                });

            levels.push(PyramidLevel {
                octave,
                scale: 1.0 / 2f32.powi(octave as i32),
                image: current,
                grad_x,
                grad_y,
            });

            match next {
                Some(next) => current = next,
                None => break,
            }
        }

        Self { levels }
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn base(&self) -> &PyramidLevel {
        &self.levels[0]
    }
}

fn to_gradient(sobel: &ImageBuffer<Luma<i16>, Vec<i16>>) -> GradientImage {
    let (width, height) = sobel.dimensions();
    GradientImage::from_fn(width, height, |x, y| {
        Luma([sobel.get_pixel(x, y).0[0] as f32 * SOBEL_NORMALIZATION])
    })
}

/// Samples `image` at a sub-pixel position, clamping to the border.
pub fn bilinear_sample<P, F>(image: &ImageBuffer<P, Vec<P::Subpixel>>, x: f32, y: f32, value: F) -> f32
where
    P: image::Pixel,
    F: Fn(&P) -> f32,
{
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let ax = x - x0 as f32;
    let ay = y - y0 as f32;

    let top = value(image.get_pixel(x0, y0)) * (1.0 - ax) + value(image.get_pixel(x1, y0)) * ax;
    let bottom = value(image.get_pixel(x0, y1)) * (1.0 - ax) + value(image.get_pixel(x1, y1)) * ax;
    top * (1.0 - ay) + bottom * ay
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn halves_every_octave() {
        let base = GrayImage::from_pixel(128, 96, Luma([100]));
        let pyramid = Pyramid::build(&base, 3);
        let sizes: Vec<_> = pyramid
            .levels()
            .iter()
            .map(|l| l.image.dimensions())
            .collect();
        assert_eq!(sizes, vec![(128, 96), (64, 48), (32, 24)]);
        assert_eq!(pyramid.levels()[1].scale, 0.5);
    }

    #[test]
    fn stops_before_tiny_levels() {
        let base = GrayImage::from_pixel(40, 40, Luma([0]));
        let pyramid = Pyramid::build(&base, 5);
        // 40 -> 20 -> (10 is below the minimum)
        assert_eq!(pyramid.levels().len(), 2);
    }

    #[test]
    fn horizontal_ramp_has_unit_gradient() {
        let base = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 4) as u8]));
        let pyramid = Pyramid::build(&base, 1);
        let (gx, gy) = pyramid.base().gradient(16.0, 16.0);
        assert_relative_eq!(gx, 4.0, epsilon = 0.5);
        assert_relative_eq!(gy, 0.0, epsilon = 0.5);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let image = GrayImage::from_fn(2, 2, |x, _| Luma([if x == 0 { 0 } else { 100 }]));
        assert_relative_eq!(bilinear_sample(&image, 0.25, 0.5, |p| p.0[0] as f32), 25.0);
        assert_relative_eq!(bilinear_sample(&image, 5.0, 5.0, |p| p.0[0] as f32), 100.0);
    }
}
