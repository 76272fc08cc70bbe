use crate::math::normalize_points_2d;
use beamcal_core::{Mat3, Vec2, Vec3};
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("correspondence count mismatch: {0} plane points vs {1} image points")]
    LengthMismatch(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
}

/// Estimate `H` such that `x' ~ H x` with the Hartley-normalized DLT.
pub fn dlt_homography(plane: &[Vec2], image: &[Vec2]) -> Result<Mat3, HomographyError> {
    let n = plane.len();
    if image.len() != n {
        return Err(HomographyError::LengthMismatch(n, image.len()));
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (pn, tp) = normalize_points_2d(plane).ok_or(HomographyError::Degenerate)?;
    let (qn, tq) = normalize_points_2d(image).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (p, q)) in pn.iter().zip(&qn).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // Four correspondences give an 8×9 system; pad so the SVD yields a full V.
    if a.nrows() < 9 {
        a = a.resize_vertically(9, 0.0);
    }
    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
    let h = v_t.row(v_t.nrows() - 1);
    let hn = Mat3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    let tq_inv = tq.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut hm = tq_inv * hn * tp;
    let scale = hm[(2, 2)];
    if scale.abs() > f64::EPSILON {
        hm /= scale;
    }
    Ok(hm)
}

/// Apply a homography to a 2D point.
pub fn apply_homography(h: &Mat3, p: &Vec2) -> Vec2 {
    let q = h * Vec3::new(p.x, p.y, 1.0);
    Vec2::new(q.x / q.z, q.y / q.z)
}
