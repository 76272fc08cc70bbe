use beamcal_core::synthetic::LaserScene;
use beamcal_core::{LaserProjectorModel, RigidTransform, Vec2, Vec3};
use beamcal_optim::{bundle_lasers, prune_outliers, BundleFixOptions, BundleOptions};

fn perturbed(laser: &LaserProjectorModel<f64>) -> LaserProjectorModel<f64> {
    let body = &laser.rigid_body;
    LaserProjectorModel::new(
        RigidTransform::new(
            body.translation + Vec3::new(0.04, -0.03, 0.05),
            body.rotation + Vec3::new(0.02, -0.015, 0.01),
        ),
        laser.fov + Vec2::new(1.0, -1.0),
        laser.fov2,
    )
}

fn fixed_camera_opts() -> BundleOptions {
    BundleOptions {
        fix: BundleFixOptions {
            fix_all_cameras: true,
            fix_fov2: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn lasers_recover_ground_truth_from_exact_lines() {
    let scene = LaserScene::new(4, 2, 7);
    let observations = scene.observations();
    let init: Vec<_> = scene.lasers.iter().map(perturbed).collect();

    let sol = bundle_lasers(&scene.cameras, &init, &observations, &fixed_camera_opts()).unwrap();
    sol.report.check().unwrap();
    for (i, (est, gt)) in sol.unknowns.iter().zip(&scene.lasers).enumerate() {
        assert!(est.rigid_body.max_abs_diff(&gt.rigid_body) < 1e-5, "laser {i}");
        assert!((est.fov - gt.fov).norm() < 1e-4, "laser {i} fov {}", est.fov);
    }
    assert!(sol.report.residuals.iter().all(|r| *r < 1e-6));
}

#[test]
fn mismatched_command_stands_out_and_can_be_excluded() {
    let scene = LaserScene::new(4, 2, 7);
    let mut observations = scene.observations();
    // Pair one observed line with the opposite steering command.
    let bad = observations
        .iter()
        .position(|o| o.command.norm() > 1.0)
        .unwrap();
    observations[bad].command = -observations[bad].command;
    let init: Vec<_> = scene.lasers.iter().map(perturbed).collect();

    let sol = bundle_lasers(&scene.cameras, &init, &observations, &fixed_camera_opts()).unwrap();
    let bad_residual = sol.get_residual(bad).unwrap();
    let worst_good = (0..observations.len())
        .filter(|&i| i != bad)
        .map(|i| sol.get_residual(i).unwrap())
        .fold(0.0, f64::max);
    assert!(bad_residual > worst_good, "{bad_residual} vs {worst_good}");

    let threshold = 0.5 * (bad_residual + worst_good);
    let outliers = prune_outliers(&sol.report.residuals, threshold);
    assert_eq!(outliers, vec![bad]);

    let opts = BundleOptions {
        excluded: outliers,
        ..fixed_camera_opts()
    };
    let resolved = bundle_lasers(&scene.cameras, &init, &observations, &opts).unwrap();
    for i in (0..observations.len()).filter(|&i| i != bad) {
        assert!(resolved.get_residual(i).unwrap() < 1e-6, "observation {i}");
    }
    assert!(resolved.get_residual(bad).unwrap() > 1e-3);
}

#[test]
fn out_of_range_command_is_rejected() {
    let scene = LaserScene::new(3, 1, 2);
    let mut observations = scene.observations();
    observations[0].command.x = 1.5;
    let err = bundle_lasers(&scene.cameras, &scene.lasers, &observations, &fixed_camera_opts())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<beamcal_core::CalibError>(),
        Some(beamcal_core::CalibError::InvalidInput(_))
    ));
}
