use nalgebra::{Matrix3, Matrix3x4, Matrix4, RowVector4, Vector2, Vector3};

/// Homogeneous scales below this put the point at infinity
const MIN_HOMOGENEOUS_SCALE: f64 = 1e-12;

/// `P = K [R | t]` for a camera given by its camera-to-world pose
pub fn projection_matrix(
    camera_intrinsic: &Matrix3<f64>,
    camera_to_world: &Matrix4<f64>,
) -> Option<Matrix3x4<f64>> {
    let world_to_camera = camera_to_world.try_inverse()?;
    Some(camera_intrinsic * Matrix3x4::from_fn(|r, c| world_to_camera[(r, c)]))
}

/// Linear (DLT) triangulation of one correspondence.
///
/// Each view contributes the rows `y * P_3 - P_2` and `x * P_3 - P_1`; the point
/// is the right singular vector of the smallest singular value. Returns `None`
/// when the solution sits at infinity.
pub fn triangulate_point(
    camera_matrix1: &Matrix3x4<f64>,
    camera_matrix2: &Matrix3x4<f64>,
    x1: &Vector2<f64>,
    x2: &Vector2<f64>,
) -> Option<Vector3<f64>> {
    let matrix_a = Matrix4::from_rows(&[
        RowVector4::new(
            x1.y * camera_matrix1.m31 - camera_matrix1.m21,
            x1.y * camera_matrix1.m32 - camera_matrix1.m22,
            x1.y * camera_matrix1.m33 - camera_matrix1.m23,
            x1.y * camera_matrix1.m34 - camera_matrix1.m24,
        ),
        RowVector4::new(
            x1.x * camera_matrix1.m31 - camera_matrix1.m11,
            x1.x * camera_matrix1.m32 - camera_matrix1.m12,
            x1.x * camera_matrix1.m33 - camera_matrix1.m13,
            x1.x * camera_matrix1.m34 - camera_matrix1.m14,
        ),
        RowVector4::new(
            x2.y * camera_matrix2.m31 - camera_matrix2.m21,
            x2.y * camera_matrix2.m32 - camera_matrix2.m22,
            x2.y * camera_matrix2.m33 - camera_matrix2.m23,
            x2.y * camera_matrix2.m34 - camera_matrix2.m24,
        ),
        RowVector4::new(
            x2.x * camera_matrix2.m31 - camera_matrix2.m11,
            x2.x * camera_matrix2.m32 - camera_matrix2.m12,
            x2.x * camera_matrix2.m33 - camera_matrix2.m13,
            x2.x * camera_matrix2.m34 - camera_matrix2.m14,
        ),
    ]);

    // the singular values are not guaranteed to be sorted
    let svd = matrix_a.svd(false, true);
    let matrix_v_t = svd.v_t?;
    let nullspace = matrix_v_t.row(svd.singular_values.imin());

    // convert from homogenous coordinates back into euclidean
    let w = nullspace[3];
    if w.abs() < MIN_HOMOGENEOUS_SCALE {
        return None;
    }
    let point = Vector3::new(nullspace[0] / w, nullspace[1] / w, nullspace[2] / w);
    point.iter().all(|v| v.is_finite()).then_some(point)
}

/// Triangulates every pair of `x1_set` and `x2_set`, which must have the same length.
pub fn triangulate_linear(
    camera_matrix1: &Matrix3x4<f64>,
    camera_matrix2: &Matrix3x4<f64>,
    x1_set: &[Vector2<f64>],
    x2_set: &[Vector2<f64>],
) -> Vec<Option<Vector3<f64>>> {
    x1_set
        .iter()
        .zip(x2_set)
        .map(|(x1, x2)| triangulate_point(camera_matrix1, camera_matrix2, x1, x2))
        .collect()
}
