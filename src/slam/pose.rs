use nalgebra::{Matrix3, Matrix4, Vector3};

use crate::algorithms::camera::yaw_pitch_roll;

/// Rigid camera-to-world transform as a homogeneous `4x4` matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose(Matrix4<f64>);

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// `[R | t]` lifted into homogeneous form
    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_slice_mut::<3, 3>(0, 0).copy_from(rotation);
        matrix.fixed_slice_mut::<3, 1>(0, 3).copy_from(translation);
        Self(matrix)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.0.fixed_slice::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.0.m14, self.0.m24, self.0.m34)
    }

    /// `self ∘ relative`
    pub fn compose(&self, relative: &Pose) -> Pose {
        Pose(self.0 * relative.0)
    }

    pub fn inverse(&self) -> Option<Pose> {
        self.0.try_inverse().map(Pose)
    }

    /// Maps a world point into this camera's frame
    pub fn world_to_camera(&self, point: &Vector3<f64>) -> Option<Vector3<f64>> {
        let inverse = self.inverse()?;
        Some(inverse.rotation() * point + inverse.translation())
    }

    /// Heading on the ground plane, `atan2(R_02, R_22)`
    pub fn yaw(&self) -> f64 {
        self.0.m13.atan2(self.0.m33)
    }

    /// `(pitch, roll, yaw)` of the camera orientation
    pub fn horizon_angles(&self) -> (f64, f64, f64) {
        let (yaw, pitch, roll) = yaw_pitch_roll(&self.rotation());
        (pitch, roll, yaw)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Accumulates relative motions into the absolute trajectory.
///
/// One pose is appended for every processed frame, so the history can be
/// indexed by frame number.
#[derive(Debug, Clone, Default)]
pub struct PoseIntegrator {
    current: Pose,
    history: Vec<Pose>,
}

impl PoseIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `current = current ∘ relative`, then records a copy of `current`.
    pub fn integrate(&mut self, relative: &Pose) -> &Pose {
        self.current = self.current.compose(relative);
        self.history.push(self.current);
        &self.current
    }

    pub fn current(&self) -> &Pose {
        &self.current
    }

    pub fn poses(&self) -> &[Pose] {
        &self.history
    }

    pub fn pose_at(&self, frame_index: u32) -> Option<&Pose> {
        self.history.get(frame_index as usize)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
