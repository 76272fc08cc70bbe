//! Numerical helpers shared by the linear solvers.

use beamcal_core::{Mat3, Vec2, Vec3};

/// Hartley normalization for 2D points.
///
/// Centers points at the origin and scales so that the mean distance from
/// the origin is `√2`. Returns the normalized points and `T` such that
/// `p_norm = T · [p, 1]`, or `None` when the input is empty or all points
/// coincide.
pub fn normalize_points_2d(points: &[Vec2]) -> Option<(Vec<Vec2>, Mat3)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let c = points.iter().fold(Vec2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.iter().map(|p| (p - c).norm()).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Mat3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0);
    let normalized = points.iter().map(|p| (p - c) * s).collect();
    Some((normalized, t))
}

/// Nearest rotation matrix (polar decomposition through SVD).
pub fn project_to_so3(m: &Mat3) -> Option<Mat3> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        return Some(u_flipped * v_t);
    }
    Some(r)
}

/// Principal frame of a 3D point set: centroid, axes sorted by decreasing
/// variance (as a right-handed rotation with the axes as columns) and the
/// variances themselves.
pub fn principal_frame(points: &[Vec3]) -> Option<(Vec3, Mat3, Vec3)> {
    let c = beamcal_core::centroid(points)?;
    let mut cov = Mat3::zeros();
    for p in points {
        let d = p - c;
        cov += d * d.transpose();
    }
    cov /= points.len() as f64;
    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let e1: Vec3 = eig.eigenvectors.column(order[0]).into_owned();
    let e2: Vec3 = eig.eigenvectors.column(order[1]).into_owned();
    let e3 = e1.cross(&e2);
    let axes = Mat3::from_columns(&[e1, e2, e3]);
    let variances = Vec3::new(
        eig.eigenvalues[order[0]],
        eig.eigenvalues[order[1]],
        eig.eigenvalues[order[2]],
    );
    Some((c, axes, variances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hartley_normalization_centres_and_scales() {
        let pts = vec![Vec2::new(100.0, 200.0), Vec2::new(150.0, 250.0), Vec2::new(120.0, 220.0)];
        let (norm, t) = normalize_points_2d(&pts).unwrap();
        let mean = norm.iter().fold(Vec2::zeros(), |a, p| a + p) / 3.0;
        assert_relative_eq!(mean, Vec2::zeros(), epsilon = 1e-12);
        let d = norm.iter().map(|p| p.norm()).sum::<f64>() / 3.0;
        assert_relative_eq!(d, std::f64::consts::SQRT_2, epsilon = 1e-12);
        let h = t * Vec3::new(pts[1].x, pts[1].y, 1.0);
        assert_relative_eq!(Vec2::new(h.x, h.y), norm[1], epsilon = 1e-12);
        assert!(normalize_points_2d(&[Vec2::new(1.0, 1.0); 3]).is_none());
    }

    #[test]
    fn principal_frame_finds_plane_normal() {
        let pts: Vec<Vec3> = (0..10)
            .map(|i| Vec3::new((i % 4) as f64, 0.5, (i / 4) as f64 * 0.7))
            .collect();
        let (_, axes, var) = principal_frame(&pts).unwrap();
        assert!(var.z.abs() < 1e-12);
        assert_relative_eq!(axes.column(2).y.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(axes.determinant(), 1.0, epsilon = 1e-9);
    }
}
