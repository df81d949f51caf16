use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};

use crate::algorithms::triangulation::triangulate_linear;

pub const NUM_CONFIGURATIONS: usize = 4;

/// Points further away than this many baselines are treated as being at infinity
pub const CHEIRALITY_MAX_DEPTH: f64 = 50.0;

type T = f64;

/// Camera Intrinsic `3x3` Matrix known as `K`
pub fn get_camera_intrinsic(focal: T, width: T, height: T) -> Matrix3<T> {
    Matrix3::new(
        focal,
        0.0,
        width / 2.0,
        0.0,
        focal,
        height / 2.0,
        0.0,
        0.0,
        1.0,
    )
}

/// Pinhole camera without distortion, principal point at the image centre
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    pub intrinsic: Matrix3<f64>,
}

impl PinholeCamera {
    /// `f = (w / 2) / tan(fov / 2)` with a horizontal field of view in degrees
    pub fn from_fov(width: u32, height: u32, fov_deg: f64) -> Self {
        let focal = (width as f64 / 2.0) / (fov_deg.to_radians() / 2.0).tan();
        Self {
            width,
            height,
            intrinsic: get_camera_intrinsic(focal, width as f64, height as f64),
        }
    }

    pub fn focal(&self) -> f64 {
        self.intrinsic.m11
    }

    /// Pixel to normalized image coordinates, i.e. `K^-1 x`
    pub fn normalize(&self, pixel: Vector2<f32>) -> Vector2<f64> {
        Vector2::new(
            (pixel.x as f64 - self.intrinsic.m13) / self.intrinsic.m11,
            (pixel.y as f64 - self.intrinsic.m23) / self.intrinsic.m22,
        )
    }

    /// Projects a point given in camera coordinates; `None` behind the camera
    pub fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        if point.z <= 0.0 {
            return None;
        }
        let x = self.intrinsic * point;
        Some(Vector2::new(x.x / x.z, x.y / x.z))
    }
}

/// Winning pose configuration with the per-correspondence cheirality outcome
#[derive(Debug, Clone)]
pub struct CorrectPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub in_front: Vec<bool>,
}

/// Determines which Camera Pose is correct by evaluating the [Cheirality Condition](http://users.cecs.anu.edu.au/~hartley/Papers/cheiral/revision/cheiral.pdf),
/// which is defined as when the transformed point lies in front of the camera.
///
/// Every configuration maps points of the first camera into the second one, `X' = R X + t`.
/// The correspondences are triangulated in normalized coordinates with `[I | 0]` and `[R | t]`,
/// and a point counts when `X_3 > 0`, `(R X + t)_3 > 0` and it is closer than
/// [`CHEIRALITY_MAX_DEPTH`].
pub fn disambiguate_camera_pose(
    r_set: &[Matrix3<f64>; NUM_CONFIGURATIONS],
    t_set: &[Vector3<f64>; NUM_CONFIGURATIONS],
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
) -> CorrectPose {
    let camera_matrix1 = Matrix3x4::identity();

    // compute the score for the set of points belonging to each configuration,
    // and then return the group with the most points in front of the camera views.
    let mut best: Option<(usize, Vec<bool>)> = None;
    for i in 0..NUM_CONFIGURATIONS {
        let (r, t) = (r_set[i], t_set[i]);
        let camera_matrix2 = Matrix3x4::from_fn(|row, col| if col < 3 { r[(row, col)] } else { t[row] });

        let in_front: Vec<bool> = triangulate_linear(&camera_matrix1, &camera_matrix2, x1_set, x2_set)
            .into_iter()
            .map(|x| {
                x.map_or(false, |x| {
                    let x_prime_z = (r * x + t).z;
                    x.z > 0.0 && x_prime_z > 0.0 && x.z < CHEIRALITY_MAX_DEPTH
                })
            })
            .collect();

        let score = in_front.iter().filter(|&&ok| ok).count();
        let best_score = best
            .as_ref()
            .map_or(0, |(_, mask)| mask.iter().filter(|&&ok| ok).count());
        if best.is_none() || score > best_score {
            best = Some((i, in_front));
        }
    }

    let (index, in_front) = best.unwrap_or_default();
    CorrectPose {
        rotation: r_set[index],
        translation: t_set[index],
        in_front,
    }
}

/// Decomposes a rotation as `R = R_y(yaw) R_x(pitch) R_z(roll)`, in radians.
///
/// Yaw is the heading about the camera's vertical axis, which is what the
/// ground path reports.
pub fn yaw_pitch_roll(rotation: &Matrix3<f64>) -> (f64, f64, f64) {
    let yaw = rotation.m13.atan2(rotation.m33);
    let pitch = (-rotation.m23).clamp(-1.0, 1.0).asin();
    let roll = rotation.m21.atan2(rotation.m22);
    (yaw, pitch, roll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    #[test]
    fn focal_length_from_field_of_view() {
        let camera = PinholeCamera::from_fov(640, 480, 90.0);
        assert_relative_eq!(camera.focal(), 320.0, epsilon = 1e-9);
        assert_relative_eq!(camera.intrinsic.m13, 320.0);
        assert_relative_eq!(camera.intrinsic.m23, 240.0);
    }

    #[test]
    fn normalize_inverts_projection() {
        let camera = PinholeCamera::from_fov(320, 240, 60.0);
        let point = Vector3::new(0.4, -0.3, 2.0);
        let pixel = camera.project(&point).unwrap();
        let normalized = camera.normalize(pixel.cast::<f32>());
        assert_relative_eq!(normalized.x, 0.2, epsilon = 1e-4);
        assert_relative_eq!(normalized.y, -0.15, epsilon = 1e-4);
        assert!(camera.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn decomposes_pure_yaw() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.3);
        let (yaw, pitch, roll) = yaw_pitch_roll(rotation.matrix());
        assert_relative_eq!(yaw, 0.3, epsilon = 1e-12);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-12);
        assert_relative_eq!(roll, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn decomposes_combined_rotation() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -0.4)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), 0.2)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), 0.1);
        let (yaw, pitch, roll) = yaw_pitch_roll(rotation.matrix());
        assert_relative_eq!(yaw, -0.4, epsilon = 1e-12);
        assert_relative_eq!(pitch, 0.2, epsilon = 1e-12);
        assert_relative_eq!(roll, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn cheirality_prefers_points_in_front() {
        let r = Matrix3::identity();
        let t = Vector3::new(-1.0, 0.0, 0.0);
        let points = [
            Vector3::new(0.2, 0.1, 5.0),
            Vector3::new(-0.5, 0.3, 8.0),
            Vector3::new(1.0, -0.2, 12.0),
        ];
        let x1: Vec<_> = points.iter().map(|p| Vector2::new(p.x / p.z, p.y / p.z)).collect();
        let x2: Vec<_> = points
            .iter()
            .map(|p| r * p + t)
            .map(|p| Vector2::new(p.x / p.z, p.y / p.z))
            .collect();

        // rotated half a turn about the baseline, the other solution of the same essential matrix
        let twisted = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI).into_inner();
        let r_set = [twisted, r, twisted, r];
        let t_set = [t, -t, -t, t];

        let pose = disambiguate_camera_pose(&r_set, &t_set, &x1, &x2);
        assert_eq!(pose.translation, t);
        assert_eq!(pose.rotation, r);
        assert!(pose.in_front.iter().all(|&ok| ok));
    }
}
