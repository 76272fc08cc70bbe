use beamcal_core::synthetic::{MarkerScene, PointScene};
use beamcal_core::{CameraModel, RigidTransform, Vec3};
use beamcal_optim::{
    bundle_objects, bundle_points, BundleFixOptions, BundleOptions, GaugeConfig, PoseRef,
    RotationGauge,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn perturb_vec(rng: &mut StdRng, v: &Vec3, amplitude: f64) -> Vec3 {
    v + Vec3::new(
        rng.random_range(-amplitude..=amplitude),
        rng.random_range(-amplitude..=amplitude),
        rng.random_range(-amplitude..=amplitude),
    )
}

fn perturb_pose(rng: &mut StdRng, pose: &RigidTransform<f64>) -> RigidTransform<f64> {
    RigidTransform::new(
        perturb_vec(rng, &pose.translation, 0.05),
        perturb_vec(rng, &pose.rotation, 0.01),
    )
}

/// Center, scale and all three rotation angles of camera 0 pinned to truth.
fn full_gauge(points: &[Vec3], camera: &CameraModel<f64>) -> GaugeConfig {
    let center = points.iter().sum::<Vec3>() / points.len() as f64;
    let radius = points.iter().map(|p| p.norm()).fold(0.0, f64::max);
    GaugeConfig {
        center: Some([center.x, center.y, center.z]),
        scale: Some(radius),
        fixed_rotations: (0..3)
            .map(|axis| RotationGauge {
                pose: PoseRef::Camera(0),
                axis,
                angle: camera.view.rotation[axis],
            })
            .collect(),
        ..Default::default()
    }
}

#[test]
fn points_and_cameras_recover_ground_truth() {
    let scene = PointScene::new(5, 20, 3);
    let observations = scene.observations();
    let mut rng = StdRng::seed_from_u64(42);

    let points_init: Vec<Vec3> = scene.points.iter().map(|p| perturb_vec(&mut rng, p, 0.05)).collect();
    let cameras_init: Vec<CameraModel<f64>> = scene
        .cameras
        .iter()
        .map(|c| CameraModel::new(perturb_pose(&mut rng, &c.view), c.intrinsics.clone()))
        .collect();

    let opts = BundleOptions {
        gauge: full_gauge(&scene.points, &scene.cameras[0]),
        ..Default::default()
    };
    let sol = bundle_points(&cameras_init, &points_init, &observations, &opts).unwrap();

    sol.report.check().unwrap();
    assert!(sol.report.overall_rms() < 1e-6, "{}", sol.report.summary());
    for (est, gt) in sol.unknowns.iter().zip(&scene.points) {
        assert!((est - gt).norm() < 1e-5, "point {est} vs {gt}");
    }
    for (est, gt) in sol.cameras.iter().zip(&scene.cameras) {
        assert!(est.view.max_abs_diff(&gt.view) < 1e-5);
    }
}

#[test]
fn fixed_cameras_need_no_gauge() {
    let scene = PointScene::new(4, 12, 8);
    let observations = scene.observations();
    let mut rng = StdRng::seed_from_u64(1);
    let points_init: Vec<Vec3> = scene.points.iter().map(|p| perturb_vec(&mut rng, p, 0.1)).collect();

    let opts = BundleOptions {
        fix: BundleFixOptions {
            fix_all_cameras: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let sol = bundle_points(&scene.cameras, &points_init, &observations, &opts).unwrap();
    assert!(sol.report.converged);
    for (est, gt) in sol.unknowns.iter().zip(&scene.points) {
        assert!((est - gt).norm() < 1e-6);
    }
    for (est, gt) in sol.cameras.iter().zip(&scene.cameras) {
        assert!(est.view.max_abs_diff(&gt.view) < 1e-12);
    }
}

#[test]
fn markers_refine_with_one_fixed_marker() {
    let scene = MarkerScene::new(6, 4, 5);
    let observations = scene.observations();
    let mut rng = StdRng::seed_from_u64(9);

    let fixed = observations[0].object_index;
    let markers_init: Vec<RigidTransform<f64>> = scene
        .markers
        .iter()
        .enumerate()
        .map(|(j, m)| if j == fixed { m.clone() } else { perturb_pose(&mut rng, m) })
        .collect();
    let cameras_init: Vec<CameraModel<f64>> = scene
        .cameras
        .iter()
        .map(|c| CameraModel::new(perturb_pose(&mut rng, &c.view), c.intrinsics.clone()))
        .collect();
    let local = vec![scene.local_points.clone(); scene.markers.len()];

    let opts = BundleOptions {
        fix: BundleFixOptions {
            fixed_positions: vec![fixed],
            fixed_rotations: vec![fixed],
            ..Default::default()
        },
        ..Default::default()
    };
    let sol = bundle_objects(&cameras_init, &local, &markers_init, &observations, &opts).unwrap();
    assert!(sol.report.overall_rms() < 1e-6, "{}", sol.report.summary());
    assert!(sol.unknowns[fixed].max_abs_diff(&scene.markers[fixed]) < 1e-12);
    let seen: std::collections::BTreeSet<usize> =
        observations.iter().map(|o| o.object_index).collect();
    for j in seen {
        assert!(sol.unknowns[j].max_abs_diff(&scene.markers[j]) < 1e-5, "marker {j}");
    }
}
