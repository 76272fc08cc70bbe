//! RANSAC wrappers around the DLT and planar pose solvers.
//!
//! Residuals are pixel reprojection errors through the camera's clip-space
//! projection.

use super::planar::{planar_pose, PlaneFrame};
use super::{dlt::dlt, CvPose};
use beamcal_core::{ransac, CameraIntrinsics, Estimator, RansacOptions, RansacResult, Vec2, Vec3};

#[derive(Debug, Clone)]
pub(crate) struct PoseDatum {
    pub world: Vec3,
    pub normalized: Vec2,
    pub pixel: Vec2,
    pub intrinsics: CameraIntrinsics,
    pub frame: Option<PlaneFrame>,
}

fn split(data: &[PoseDatum], idx: &[usize]) -> (Vec<Vec3>, Vec<Vec2>) {
    idx.iter()
        .map(|&i| (data[i].world, data[i].normalized))
        .unzip()
}

pub(crate) fn reprojection_error(pose: &CvPose, datum: &PoseDatum) -> f64 {
    let view = pose.to_view();
    let pv = view.transform_point(&datum.world);
    if pv.z >= 0.0 {
        return f64::INFINITY;
    }
    (datum.intrinsics.view_to_image(&pv) - datum.pixel).norm()
}

pub(crate) struct GeneralPoseEstimator;

impl Estimator for GeneralPoseEstimator {
    type Datum = PoseDatum;
    type Model = CvPose;

    const MIN_SAMPLES: usize = 6;

    fn fit(data: &[PoseDatum], idx: &[usize]) -> Option<CvPose> {
        let (w, n) = split(data, idx);
        dlt(&w, &n).ok()
    }

    fn residual(model: &CvPose, datum: &PoseDatum) -> f64 {
        reprojection_error(model, datum)
    }

    fn refit(data: &[PoseDatum], inliers: &[usize]) -> Option<CvPose> {
        Self::fit(data, inliers)
    }
}

pub(crate) struct PlanarPoseEstimator;

impl Estimator for PlanarPoseEstimator {
    type Datum = PoseDatum;
    type Model = CvPose;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[PoseDatum], idx: &[usize]) -> Option<CvPose> {
        let frame = data.first()?.frame.as_ref()?;
        let (w, n) = split(data, idx);
        planar_pose(&w, &n, frame).ok()
    }

    fn residual(model: &CvPose, datum: &PoseDatum) -> f64 {
        reprojection_error(model, datum)
    }

    fn is_degenerate(data: &[PoseDatum], idx: &[usize]) -> bool {
        // Three collinear plane points leave the homography undetermined.
        let Some(frame) = data.first().and_then(|d| d.frame.as_ref()) else {
            return true;
        };
        let q: Vec<Vec2> = idx.iter().map(|&i| frame.to_plane(&data[i].world)).collect();
        for a in 0..q.len() {
            for b in (a + 1)..q.len() {
                for c in (b + 1)..q.len() {
                    let ab = q[b] - q[a];
                    let ac = q[c] - q[a];
                    let area = (ab.x * ac.y - ab.y * ac.x).abs();
                    if area <= 1e-12 * ab.norm_squared().max(ac.norm_squared()).max(1e-12) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn refit(data: &[PoseDatum], inliers: &[usize]) -> Option<CvPose> {
        Self::fit(data, inliers)
    }
}

pub(crate) fn run(data: &[PoseDatum], planar: bool, opts: &RansacOptions) -> RansacResult<CvPose> {
    if planar {
        ransac::<PlanarPoseEstimator>(data, opts)
    } else {
        ransac::<GeneralPoseEstimator>(data, opts)
    }
}
