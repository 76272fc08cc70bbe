//! Deterministic synthetic scenes for tests, demos and benchmarks.
//!
//! All randomness goes through a seeded `StdRng`, so a scene is fully defined
//! by its parameters.

use crate::models::{CameraIntrinsics, CameraModel, LaserProjectorModel, RigidTransform};
use crate::observation::{LineImageObservation, ObjectImageObservation, PointImageObservation};
use crate::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{FRAC_PI_2, TAU};

/// 640×480 pinhole camera, `f = 800 px`, centred principal point.
pub fn default_intrinsics() -> CameraIntrinsics {
    #[rustfmt::skip]
    let projection = crate::Mat4::new(
        2.5, 0.0,           0.0,            0.0,
        0.0, 800.0 / 240.0, 0.0,            0.0,
        0.0, 0.0,           -100.1 / 99.9,  -20.0 / 99.9,
        0.0, 0.0,           -1.0,           0.0,
    );
    CameraIntrinsics {
        width: 640,
        height: 480,
        projection,
    }
}

/// Cameras evenly spaced on a horizontal circle, all looking at `target`.
pub fn camera_ring(
    count: usize,
    radius: f64,
    height: f64,
    target: &Vec3,
    intrinsics: &CameraIntrinsics,
) -> Vec<CameraModel<f64>> {
    (0..count)
        .map(|i| {
            let a = TAU * i as f64 / count as f64;
            let eye = Vec3::new(radius * a.cos(), height, radius * a.sin());
            CameraModel::new(
                RigidTransform::look_at(&eye, target, &Vec3::y()),
                intrinsics.clone(),
            )
        })
        .collect()
}

/// Uniform points in an axis-aligned box.
pub fn points_in_box(rng: &mut StdRng, count: usize, center: &Vec3, half_extent: &Vec3) -> Vec<Vec3> {
    (0..count)
        .map(|_| {
            center
                + Vec3::new(
                    rng.random_range(-1.0..=1.0) * half_extent.x,
                    rng.random_range(-1.0..=1.0) * half_extent.y,
                    rng.random_range(-1.0..=1.0) * half_extent.z,
                )
        })
        .collect()
}

/// `n × n` steering grid spanning `[-extent, extent]²`.
pub fn command_grid(n: usize, extent: f64) -> Vec<Vec2> {
    if n < 2 {
        return vec![Vec2::zeros()];
    }
    let step = 2.0 * extent / (n - 1) as f64;
    let mut out = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            out.push(Vec2::new(-extent + step * i as f64, -extent + step * j as f64));
        }
    }
    out
}

/// Corners of a square marker of side `size` in its local `z = 0` plane,
/// counter-clockwise from `(-s/2, -s/2)`.
pub fn square_marker_points(size: f64) -> Vec<Vec3> {
    let h = 0.5 * size;
    vec![
        Vec3::new(-h, -h, 0.0),
        Vec3::new(h, -h, 0.0),
        Vec3::new(h, h, 0.0),
        Vec3::new(-h, h, 0.0),
    ]
}

/// Uniform jitter of a pixel in `[-amplitude, amplitude]²`.
pub fn jitter(rng: &mut StdRng, pixel: &Vec2, amplitude: f64) -> Vec2 {
    if amplitude <= 0.0 {
        return *pixel;
    }
    pixel
        + Vec2::new(
            rng.random_range(-amplitude..=amplitude),
            rng.random_range(-amplitude..=amplitude),
        )
}

fn in_image(intrinsics: &CameraIntrinsics, uv: &Vec2) -> bool {
    uv.x >= 0.0 && uv.y >= 0.0 && uv.x < intrinsics.width as f64 && uv.y < intrinsics.height as f64
}

/// Points seen by a ring of cameras.
#[derive(Debug, Clone)]
pub struct PointScene {
    pub cameras: Vec<CameraModel<f64>>,
    pub points: Vec<Vec3>,
}

impl PointScene {
    pub fn new(num_cameras: usize, num_points: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cameras = camera_ring(num_cameras, 6.0, 1.5, &Vec3::zeros(), &default_intrinsics());
        let points = points_in_box(&mut rng, num_points, &Vec3::zeros(), &Vec3::new(1.2, 1.0, 1.2));
        Self { cameras, points }
    }

    /// Exact projections of every point into every camera that sees it.
    pub fn observations(&self) -> Vec<PointImageObservation> {
        let mut out = Vec::new();
        for (v, cam) in self.cameras.iter().enumerate() {
            for (p, point) in self.points.iter().enumerate() {
                if !cam.is_in_front(point) {
                    continue;
                }
                let uv = cam.world_to_image(point);
                if in_image(&cam.intrinsics, &uv) {
                    out.push(PointImageObservation::new(v, p, uv));
                }
            }
        }
        out
    }
}

/// Square markers scattered in front of a ring of cameras.
#[derive(Debug, Clone)]
pub struct MarkerScene {
    pub cameras: Vec<CameraModel<f64>>,
    pub markers: Vec<RigidTransform<f64>>,
    pub local_points: Vec<Vec3>,
}

impl MarkerScene {
    /// Markers face the ring centre's upward axis with a random tilt so every
    /// marker is seen by several cameras.
    pub fn new(num_cameras: usize, num_markers: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cameras = camera_ring(num_cameras, 5.0, 2.5, &Vec3::zeros(), &default_intrinsics());
        let markers = (0..num_markers)
            .map(|_| {
                let t = Vec3::new(
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(-0.2..=0.2),
                    rng.random_range(-1.0..=1.0),
                );
                // Marker normal (+Z local) points up, with a small tilt.
                let r = Vec3::new(
                    -FRAC_PI_2 + rng.random_range(-0.2..=0.2),
                    rng.random_range(-0.2..=0.2),
                    rng.random_range(-3.0..=3.0),
                );
                RigidTransform::new(t, r)
            })
            .collect();
        Self {
            cameras,
            markers,
            local_points: square_marker_points(0.3),
        }
    }

    pub fn world_points(&self, marker: usize) -> Vec<Vec3> {
        self.local_points
            .iter()
            .map(|p| self.markers[marker].transform_point(p))
            .collect()
    }

    /// Observations for every (camera, marker) pair where all corners are visible.
    pub fn observations(&self) -> Vec<ObjectImageObservation> {
        let mut out = Vec::new();
        for (v, cam) in self.cameras.iter().enumerate() {
            for m in 0..self.markers.len() {
                let world = self.world_points(m);
                if !world.iter().all(|p| cam.is_in_front(p)) {
                    continue;
                }
                let pixels: Vec<Vec2> = world.iter().map(|p| cam.world_to_image(p)).collect();
                if pixels.iter().all(|uv| in_image(&cam.intrinsics, uv)) {
                    out.push(ObjectImageObservation::new(v, m, pixels));
                }
            }
        }
        out
    }
}

/// Upward-firing laser projectors inside a ring of cameras.
#[derive(Debug, Clone)]
pub struct LaserScene {
    pub cameras: Vec<CameraModel<f64>>,
    pub lasers: Vec<LaserProjectorModel<f64>>,
    pub commands: Vec<Vec2>,
}

impl LaserScene {
    pub fn new(num_cameras: usize, num_lasers: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let cameras = camera_ring(num_cameras, 6.0, 2.0, &Vec3::new(0.0, 0.5, 0.0), &default_intrinsics());
        let lasers = (0..num_lasers)
            .map(|i| {
                let a = TAU * (i as f64 + 0.25) / num_lasers.max(1) as f64;
                let t = Vec3::new(1.2 * a.cos(), rng.random_range(-0.1..=0.1), 1.2 * a.sin());
                let r = Vec3::new(
                    -FRAC_PI_2 + rng.random_range(-0.15..=0.15),
                    rng.random_range(-0.15..=0.15),
                    rng.random_range(-0.5..=0.5),
                );
                let fov = Vec2::new(
                    rng.random_range(35.0..=45.0),
                    rng.random_range(35.0..=45.0),
                );
                LaserProjectorModel::with_fov(RigidTransform::new(t, r), fov)
            })
            .collect();
        Self {
            cameras,
            lasers,
            commands: command_grid(3, 0.8),
        }
    }

    /// Ideal image line of one beam, `None` when the camera cannot see it.
    pub fn beam_line(&self, camera: usize, laser: usize, command: &Vec2) -> Option<crate::Line2D<f64>> {
        let cam = &self.cameras[camera];
        let ray = self.lasers[laser].cast_ray(command);
        let far = ray.point_at(1.0);
        if !cam.is_in_front(&ray.origin) || !cam.is_in_front(&far) {
            return None;
        }
        if !in_image(&cam.intrinsics, &cam.world_to_image(&far)) {
            return None;
        }
        let line = cam.world_ray_to_image_line(&ray);
        let (w, h) = (cam.intrinsics.width as f64, cam.intrinsics.height as f64);
        line.image_edge_intersections(w, h).map(|_| line)
    }

    /// Exact line observations for every visible (camera, laser, command).
    pub fn observations(&self) -> Vec<LineImageObservation> {
        let mut out = Vec::new();
        for c in 0..self.cameras.len() {
            for l in 0..self.lasers.len() {
                for cmd in &self.commands {
                    if let Some(line) = self.beam_line(c, l, cmd) {
                        out.push(LineImageObservation::new(c, l, *cmd, line));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_intrinsics_match_pinhole_constructor() {
        let k = CameraIntrinsics::from_pinhole(800.0, 800.0, 320.0, 240.0, 640, 480, 0.1, 100.0)
            .unwrap();
        assert_relative_eq!(k.projection, default_intrinsics().projection, epsilon = 1e-12);
    }

    #[test]
    fn scenes_are_reproducible_and_observed() {
        let a = LaserScene::new(4, 3, 11);
        let b = LaserScene::new(4, 3, 11);
        assert_eq!(a.lasers, b.lasers);
        let obs = a.observations();
        for l in 0..3 {
            let cams: std::collections::BTreeSet<_> = obs
                .iter()
                .filter(|o| o.laser_index == l)
                .map(|o| o.camera_index)
                .collect();
            assert!(cams.len() >= 2, "laser {l} seen by {cams:?}");
        }

        let points = PointScene::new(5, 20, 3);
        assert!(points.observations().len() >= 5 * 20 / 2);

        let markers = MarkerScene::new(6, 4, 5);
        assert!(!markers.observations().is_empty());
    }

    #[test]
    fn command_grid_spans_extent() {
        let g = command_grid(3, 0.8);
        assert_eq!(g.len(), 9);
        assert_relative_eq!(g[0], Vec2::new(-0.8, -0.8));
        assert_relative_eq!(g[8], Vec2::new(0.8, 0.8));
    }
}
