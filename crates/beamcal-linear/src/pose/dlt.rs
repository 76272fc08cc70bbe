//! Direct Linear Transform for camera pose from non-coplanar points.
//!
//! Works in normalized camera coordinates (computer-vision frame: +Z
//! forward, +Y down), so the 3×4 matrix is `s · [R | t]`. The rotation block
//! is rescaled by its average row norm, sign-fixed by its determinant and
//! projected onto SO(3).

use super::CvPose;
use crate::math::project_to_so3;
use anyhow::{bail, ensure, Result};
use beamcal_core::{Mat4, Vec2, Vec3};
use nalgebra::{DMatrix, Matrix3x4};

pub fn dlt(world: &[Vec3], normalized: &[Vec2]) -> Result<CvPose> {
    let n = world.len();
    ensure!(
        normalized.len() == n,
        "correspondence count mismatch: {} world vs {} image",
        n,
        normalized.len()
    );
    ensure!(n >= 6, "DLT needs at least 6 point correspondences, got {}", n);

    let c = beamcal_core::centroid(world).unwrap_or_else(Vec3::zeros);
    let mean_dist = world.iter().map(|p| (p - c).norm()).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        bail!("degenerate 3d point configuration for normalization");
    }
    let scale = 3f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t_world = Mat4::new(
        scale, 0.0,   0.0,   -scale * c.x,
        0.0,   scale, 0.0,   -scale * c.y,
        0.0,   0.0,   scale, -scale * c.z,
        0.0,   0.0,   0.0,   1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, q)) in world.iter().zip(normalized).enumerate() {
        let p = (pw - c) * scale;
        let (x, y, z) = (p.x, p.y, p.z);
        let (u, v) = (q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let Some(v_t) = svd.v_t else {
        bail!("svd failed in pose DLT");
    };
    let h: Vec<f64> = v_t.row(v_t.nrows() - 1).iter().copied().collect();
    let p_norm = Matrix3x4::from_row_slice(&h);
    let p = p_norm * t_world;

    let mut m = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if m.determinant() < 0.0 {
        s = -s;
    }
    if s.abs() <= f64::EPSILON {
        bail!("degenerate DLT solution");
    }
    m /= s;
    let Some(rotation) = project_to_so3(&m) else {
        bail!("svd failed projecting DLT rotation");
    };
    let translation: Vec3 = p.column(3).into_owned() / s;
    Ok(CvPose {
        rotation,
        translation,
    })
}
