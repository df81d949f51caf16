use arrsac::Arrsac;
use log::trace;
use nalgebra::{Matrix3, RowVector3, SMatrix, SVector, Vector2, Vector3};
use rand::RngCore;
use sample_consensus::{Consensus, Estimator, Model};

/// Rounds of least-squares refitting after the consensus search
const MAX_REFIT_ITERATIONS: usize = 10;
/// Relaxed inlier threshold used to gather refit candidates, relative to the consensus one
const REFIT_THRESHOLD_SCALE: f64 = 2.0;

/// A feature seen in two consecutive frames, in normalized image coordinates.
///
/// The epipolar constraint is `prev^T E curr = 0`, so the essential matrix maps
/// the current camera into the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub curr: Vector2<f64>,
    pub prev: Vector2<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Projects an arbitrary `3x3` matrix onto the essential manifold, `U diag(1, 1, 0) V^T`.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
        if !matrix.iter().all(|v| v.is_finite()) {
            return None;
        }
        let svd = matrix.svd(true, true);
        let (matrix_u, matrix_v_t) = (svd.u?, svd.v_t?);

        // the smallest singular value is the one dropped, wherever it sits
        let mut diagonal = Vector3::repeat(1.0);
        diagonal[svd.singular_values.imin()] = 0.0;
        let essential = matrix_u * Matrix3::from_diagonal(&diagonal) * matrix_v_t;

        essential
            .iter()
            .all(|v| v.is_finite())
            .then_some(Self(essential))
    }

    /// Convert from Essential Matrix to Rt (Rotation and Translation)
    /// Reference: https://ia601408.us.archive.org/view_archive.php?archive=/7/items/DIKU-3DCV2/DIKU-3DCV2.zip&file=DIKU-3DCV2%2FHandouts%2FLecture16.pdf
    ///
    /// Returns the four `(R, t)` candidates in the order
    /// `(R1, t)`, `(R1, -t)`, `(R2, t)`, `(R2, -t)`.
    pub fn extract_pose_configurations(&self) -> Option<([Matrix3<f64>; 4], [Vector3<f64>; 4])> {
        let matrix_w = Matrix3::from_rows(&[
            RowVector3::new(0.0, -1.0, 0.0),
            RowVector3::new(1.0, 0.0, 0.0),
            RowVector3::new(0.0, 0.0, 1.0),
        ]);

        let svd = self.0.svd(true, true);
        let mut matrix_u = svd.u?;
        let mut matrix_v_t = svd.v_t?;

        // move the null singular vector last so that t = u_3
        let null = svd.singular_values.imin();
        if null != 2 {
            matrix_u.swap_columns(null, 2);
            matrix_v_t.swap_rows(null, 2);
        }

        // keep both factors proper rotations; E is only defined up to sign
        if matrix_u.determinant() < 0.0 {
            matrix_u = -matrix_u;
        }
        if matrix_v_t.determinant() < 0.0 {
            matrix_v_t = -matrix_v_t;
        }

        // R = U W V_T and R = U W_T V_T
        let rotation1 = matrix_u * matrix_w * matrix_v_t;
        let rotation2 = matrix_u * matrix_w.transpose() * matrix_v_t;

        // t = u_3 where: U[u_1, u_2, u_3]
        let camera_t = matrix_u.column(2).clone_owned();

        Some((
            [rotation1, rotation1, rotation2, rotation2],
            [camera_t, -camera_t, camera_t, -camera_t],
        ))
    }

    /// First-order geometric error of a correspondence (square root of the Sampson distance)
    pub fn sampson_distance(&self, data: &Correspondence) -> f64 {
        let x1 = data.curr.push(1.0);
        let x2 = data.prev.push(1.0);
        let e_x1 = self.0 * x1;
        let e_t_x2 = self.0.transpose() * x2;
        let numerator = x2.dot(&e_x1);
        let denominator = e_x1.x * e_x1.x + e_x1.y * e_x1.y + e_t_x2.x * e_t_x2.x + e_t_x2.y * e_t_x2.y;

        if denominator <= f64::EPSILON {
            return f64::INFINITY;
        }
        numerator.abs() / denominator.sqrt()
    }
}

// Implementations for `sample_consensus`

impl Model<Correspondence> for EssentialMatrix {
    fn residual(&self, data: &Correspondence) -> f64 {
        self.sampson_distance(data)
    }
}

/// Normalized 8-point algorithm, usable with any number of correspondences `>= 8`
#[derive(Debug, Default, Clone, Copy)]
pub struct EightPoint;

impl Estimator<Correspondence> for EightPoint {
    const MIN_SAMPLES: usize = 8;
    type Model = EssentialMatrix;
    type ModelIter = Option<EssentialMatrix>;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = Correspondence> + Clone,
    {
        const COLUMNS: usize = 9;

        // Hartley normalization of both point sets
        let transform1 = normalizing_transform(data.clone().map(|c| c.curr))?;
        let transform2 = normalizing_transform(data.clone().map(|c| c.prev))?;

        // Setup homogeneous linear equation as prev' * E * curr = 0 and accumulate A^T A,
        // whose null vector is the one of A
        let mut normal = SMatrix::<f64, COLUMNS, COLUMNS>::zeros();
        let mut count = 0usize;
        for Correspondence { curr, prev } in data {
            let x1 = transform1 * curr.push(1.0);
            let x2 = transform2 * prev.push(1.0);
            let row = SVector::<f64, COLUMNS>::from_column_slice(&[
                x2.x * x1.x,
                x2.x * x1.y,
                x2.x,
                x2.y * x1.x,
                x2.y * x1.y,
                x2.y,
                x1.x,
                x1.y,
                1.0,
            ]);
            normal += row * row.transpose();
            count += 1;
        }
        if count < Self::MIN_SAMPLES {
            return None;
        }

        // Solve for the nullspace of the constraint matrix
        let svd = normal.svd(false, true);
        let matrix_v_t = svd.v_t?;
        let normalized = Matrix3::from_row_iterator(
            matrix_v_t
                .row(svd.singular_values.imin())
                .iter()
                .copied(),
        );

        // undo the normalization, E = T2^T E' T1
        EssentialMatrix::from_matrix(transform2.transpose() * normalized * transform1)
    }
}

/// Similarity moving the centroid to the origin with a mean distance of `sqrt(2)`
fn normalizing_transform(points: impl Iterator<Item = Vector2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let count = points.clone().count();
    if count == 0 {
        return None;
    }
    let centroid = points.clone().sum::<Vector2<f64>>() / count as f64;
    let mean_distance = points.map(|p| (p - centroid).norm()).sum::<f64>() / count as f64;
    if mean_distance <= f64::EPSILON {
        return None;
    }

    let scale = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    ))
}

/// Result of the robust essential matrix search
#[derive(Debug, Clone)]
pub struct EssentialFit {
    pub essential: EssentialMatrix,
    /// Indices into the correspondences within the residual threshold
    pub inliers: Vec<usize>,
}

/// Robust essential matrix estimation.
///
/// This is an ARRSAC (Adaptive Real-Time Random Sample Consensus) package,
/// which could perform as well or better than RANSAC.
/// https://people.inf.ethz.ch/pomarc/pubs/RaguramECCV08.pdf
///
/// The consensus model is then refit by least squares on its own support,
/// repeatedly, keeping whichever model explains the most correspondences.
pub fn estimate_essential<R: RngCore>(
    data: &[Correspondence],
    threshold: f64,
    rng: R,
) -> Option<EssentialFit> {
    if data.len() < EightPoint::MIN_SAMPLES {
        return None;
    }

    let (model, inliers) =
        Arrsac::new(threshold, rng).model_inliers(&EightPoint, data.iter().copied())?;
    trace!(
        "consensus kept {} of {} correspondences",
        inliers.len(),
        data.len()
    );

    Some(refine(model, data, threshold))
}

/// Local optimization: refits on the support of the best model so far, from the
/// strict and from a relaxed inlier set, for as long as the support keeps growing.
fn refine(model: EssentialMatrix, data: &[Correspondence], threshold: f64) -> EssentialFit {
    let inliers = support(&model, data, threshold);
    let mut best = EssentialFit {
        essential: model,
        inliers,
    };

    for iteration in 0..MAX_REFIT_ITERATIONS {
        let strict = &best.inliers;
        let relaxed = support(&best.essential, data, threshold * REFIT_THRESHOLD_SCALE);
        let candidate = [strict, &relaxed]
            .into_iter()
            .filter_map(|subset| EightPoint.estimate(subset.iter().map(|&i| data[i])))
            .map(|essential| EssentialFit {
                inliers: support(&essential, data, threshold),
                essential,
            })
            .max_by_key(|fit| fit.inliers.len());

        match candidate {
            Some(candidate) if candidate.inliers.len() > best.inliers.len() => {
                trace!(
                    "refit {} grew support to {}",
                    iteration + 1,
                    candidate.inliers.len()
                );
                best = candidate;
            }
            _ => break,
        }
    }

    best
}

/// Indices of the correspondences within `threshold` of `essential`
fn support(essential: &EssentialMatrix, data: &[Correspondence], threshold: f64) -> Vec<usize> {
    (0..data.len())
        .filter(|&i| essential.residual(&data[i]) < threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn skew(t: &Vector3<f64>) -> Matrix3<f64> {
        Matrix3::new(0.0, -t.z, t.y, t.z, 0.0, -t.x, -t.y, t.x, 0.0)
    }

    /// Points in front of the current camera, seen again from `X_prev = R X + t`
    fn scene(rotation: &Matrix3<f64>, translation: &Vector3<f64>, count: usize, seed: u64) -> Vec<Correspondence> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let x = Vector3::new(
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(4.0..12.0),
                );
                let x_prev = rotation * x + translation;
                Correspondence {
                    curr: Vector2::new(x.x / x.z, x.y / x.z),
                    prev: Vector2::new(x_prev.x / x_prev.z, x_prev.y / x_prev.z),
                }
            })
            .collect()
    }

    fn assert_same_up_to_scale(a: &Matrix3<f64>, b: &Matrix3<f64>) {
        let (a, b) = (a / a.norm(), b / b.norm());
        let sign = if (a - b).norm() < (a + b).norm() { 1.0 } else { -1.0 };
        assert_relative_eq!(a, b * sign, epsilon = 1e-6);
    }

    #[test]
    fn eight_point_recovers_exact_model() {
        let rotation = *Rotation3::from_euler_angles(0.02, -0.05, 0.01).matrix();
        let translation = Vector3::new(0.8, 0.1, 0.2);
        let data = scene(&rotation, &translation, 30, 1);

        let essential = EightPoint.estimate(data.iter().copied()).expect("model");
        assert_same_up_to_scale(&essential.0, &(skew(&translation) * rotation));
        for c in &data {
            assert!(essential.residual(c) < 1e-9);
        }
    }

    #[test]
    fn too_few_points_give_no_model() {
        let data = scene(&Matrix3::identity(), &Vector3::x(), 7, 2);
        assert!(EightPoint.estimate(data.iter().copied()).is_none());
        assert!(estimate_essential(&data, 1e-3, StdRng::seed_from_u64(0)).is_none());
    }

    #[test]
    fn consensus_rejects_outliers() {
        let rotation = *Rotation3::from_euler_angles(0.0, 0.03, 0.0).matrix();
        let translation = Vector3::new(1.0, 0.0, 0.1);
        let mut data = scene(&rotation, &translation, 120, 3);

        let mut rng = StdRng::seed_from_u64(4);
        let noise = Normal::new(0.0, 5e-4).unwrap();
        for c in data.iter_mut() {
            c.prev += Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng));
        }
        // every fifth correspondence is garbage
        for c in data.iter_mut().step_by(5) {
            c.prev += Vector2::new(rng.gen_range(0.05..0.2), rng.gen_range(-0.2..-0.05));
        }

        let fit = estimate_essential(&data, 3e-3, StdRng::seed_from_u64(5)).expect("fit");
        assert!(fit.inliers.iter().all(|i| i % 5 != 0));
        assert!(fit.inliers.len() >= 85, "kept {}", fit.inliers.len());

        // the refined model explains as much as the true motion does
        let truth = EssentialMatrix::from_matrix(skew(&translation) * rotation).unwrap();
        let truth_support = support(&truth, &data, 3e-3).len();
        assert!(
            fit.inliers.len() + 2 >= truth_support,
            "kept {} of {truth_support}",
            fit.inliers.len()
        );
    }

    #[test]
    fn refit_grows_support_of_a_rough_model() {
        let rotation = *Rotation3::from_euler_angles(0.01, -0.02, 0.0).matrix();
        let translation = Vector3::new(0.9, 0.2, 0.3);
        let mut data = scene(&rotation, &translation, 100, 6);
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 5e-4).unwrap();
        for c in data.iter_mut() {
            c.prev += Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng));
        }

        // a slightly wrong rotation only explains part of the scene
        let tilted = Rotation3::from_euler_angles(0.004, 0.0, 0.0).matrix() * rotation;
        let rough = EssentialMatrix::from_matrix(skew(&translation) * tilted).unwrap();
        let rough_support = support(&rough, &data, 3e-3).len();

        let fit = refine(rough, &data, 3e-3);
        assert!(fit.inliers.len() >= rough_support);
        assert!(fit.inliers.len() >= 95, "kept {}", fit.inliers.len());
    }

    #[test]
    fn pose_configurations_contain_true_motion() {
        let rotation = *Rotation3::from_euler_angles(0.01, 0.1, -0.02).matrix();
        let translation = Vector3::new(-0.6, 0.0, 0.8).normalize();
        let essential = EssentialMatrix::from_matrix(skew(&translation) * rotation).unwrap();

        let (r_set, t_set) = essential.extract_pose_configurations().unwrap();
        let found = r_set.iter().zip(&t_set).any(|(r, t)| {
            (r - rotation).norm() < 1e-9 && (t - translation).norm() < 1e-9
        });
        assert!(found);
        for r in &r_set {
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        }
    }
}
