use beamcal_core::synthetic::MarkerScene;
use beamcal_core::{CalibError, ObjectImageObservation, Vec2};
use beamcal_optim::{bootstrap_poses, BootstrapInput, BootstrapOptions};
use std::collections::BTreeMap;

fn input_with_fixed(scene: &MarkerScene, fixed: usize) -> BootstrapInput {
    BootstrapInput {
        intrinsics: scene.cameras.iter().map(|c| c.intrinsics.clone()).collect(),
        observations: scene.observations(),
        local_points: vec![scene.local_points.clone(); scene.markers.len()],
        fixed: BTreeMap::from([(fixed, scene.markers[fixed].clone())]),
        view_guesses: BTreeMap::new(),
    }
}

#[test]
fn connected_captures_initialise_every_marker() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let scene = MarkerScene::new(6, 4, 5);
    let fixed = scene.observations()[0].object_index;
    let input = input_with_fixed(&scene, fixed);

    let result = bootstrap_poses(&input, &BootstrapOptions::default())?;
    assert_eq!(result.order[0], result.genesis);

    for obs in &input.observations {
        let est = result.objects[obs.object_index]
            .as_ref()
            .expect("observed marker is initialised");
        assert!(
            est.max_abs_diff(&scene.markers[obs.object_index]) < 1e-5,
            "marker {}",
            obs.object_index
        );
        let view = result.views[obs.view_index]
            .as_ref()
            .expect("observing capture is solved");
        assert!(view.max_abs_diff(&scene.cameras[obs.view_index].view) < 1e-5);
    }
    for (c, rms) in result.rms.iter().enumerate() {
        if result.views[c].is_some() {
            assert!(*rms < 1e-6, "capture {c} rms {rms}");
        }
    }
    Ok(())
}

#[test]
fn isolated_marker_reports_disconnected() {
    let scene = MarkerScene::new(6, 4, 5);
    let fixed = scene.observations()[0].object_index;
    let mut input = input_with_fixed(&scene, fixed);

    // An extra capture that sees only an extra marker nobody else sees.
    let capture = input.intrinsics.len();
    let object = input.local_points.len();
    input.intrinsics.push(scene.cameras[0].intrinsics.clone());
    input.local_points.push(scene.local_points.clone());
    input.observations.push(ObjectImageObservation::new(
        capture,
        object,
        vec![
            Vec2::new(300.0, 200.0),
            Vec2::new(340.0, 200.0),
            Vec2::new(340.0, 240.0),
            Vec2::new(300.0, 240.0),
        ],
    ));

    let err = bootstrap_poses(&input, &BootstrapOptions::default()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<CalibError>(),
        Some(&CalibError::Disconnected {
            objects: vec![object],
            captures: vec![capture],
        })
    );
}
