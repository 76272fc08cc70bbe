//! End-to-end laser-rig calibration on rendered beam images.

use beamcal_core::synthetic::LaserScene;
use beamcal_core::{CalibError, Vec3};
use beamcal_linear::render::{render_beam_pair, BeamRenderSettings};
use beamcal_optim::{SolveStatus, SolverConfig};
use beamcal_pipeline::laser_rig::{
    run_calibration, step_extract_lines, BeamCapture, BeamShot, Exclusion, LaserRigInput,
    LaserRigProblem, STAGES,
};
use beamcal_pipeline::{CalibrationSession, MemoryImageSource, RigCamera};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Renders every (camera, laser) pair with at least four visible beams.
fn rendered_rig(scene: &LaserScene) -> (LaserRigInput, MemoryImageSource) {
    let render = BeamRenderSettings::default();
    let mut images = MemoryImageSource::new();
    let mut captures = Vec::new();
    for (c, cam) in scene.cameras.iter().enumerate() {
        for (l, laser) in scene.lasers.iter().enumerate() {
            let commands: Vec<_> = scene
                .commands
                .iter()
                .filter(|cmd| scene.beam_line(c, l, cmd).is_some())
                .collect();
            if commands.len() < 4 {
                continue;
            }
            let origin = cam.world_to_image(&laser.position());
            let off = format!("c{c}_l{l}_off.png");
            let mut shots = Vec::new();
            for (k, cmd) in commands.into_iter().enumerate() {
                let far = cam.world_to_image(&laser.cast_ray(cmd).point_at(3.0));
                let (on_img, off_img) = render_beam_pair(
                    cam.intrinsics.width,
                    cam.intrinsics.height,
                    &origin,
                    &far,
                    &render,
                );
                let on = format!("c{c}_l{l}_s{k}.png");
                images.insert(on.as_str(), on_img);
                images.insert(off.as_str(), off_img);
                shots.push(BeamShot {
                    command: *cmd,
                    on: on.into(),
                });
            }
            captures.push(BeamCapture {
                camera_index: c,
                laser_index: l,
                off: off.into(),
                shots,
            });
        }
    }

    let cameras = scene
        .cameras
        .iter()
        .map(|cam| RigCamera {
            intrinsics: cam.intrinsics.clone(),
            view_guess: Some(cam.view.clone()),
        })
        .collect();
    let lasers = scene
        .lasers
        .iter()
        .map(|laser| {
            let mut rough = laser.clone();
            rough.rigid_body.translation += Vec3::new(0.08, -0.05, 0.06);
            rough
        })
        .collect();
    let input = LaserRigInput {
        cameras,
        markers: Vec::new(),
        marker_observations: Vec::new(),
        lasers,
        captures,
    };
    (input, images)
}

#[test]
fn rendered_rig_calibrates_end_to_end() -> anyhow::Result<()> {
    init_logging();
    let scene = LaserScene::new(4, 2, 7);
    let (input, images) = rendered_rig(&scene);
    for l in 0..scene.lasers.len() {
        let cameras = input.captures.iter().filter(|c| c.laser_index == l).count();
        assert!(cameras >= 2, "laser {l} rendered for {cameras} cameras");
    }

    let mut session = CalibrationSession::<LaserRigProblem>::with_input(input)?;
    let mut finished = Vec::new();
    let mut observer = |stage: &str, fraction: f64| {
        if fraction == 1.0 {
            finished.push(stage.to_string());
        }
    };
    run_calibration(&mut session, &images, &mut observer)?;
    assert_eq!(finished, STAGES);
    assert!(session.log.iter().all(|e| e.success));
    assert!(session
        .state
        .exclusions
        .iter()
        .all(|e| matches!(e, Exclusion::Capture { .. })));

    let output = session.require_output()?;
    for (est, truth) in output.lasers.iter().zip(&scene.lasers) {
        let err = (est.position() - truth.position()).norm();
        assert!(err < 0.1, "laser position off by {err:.4}");
    }
    let stats = output.residual_stats();
    assert!(stats.count > 0);
    assert!(stats.mean < 2.0, "residual mean {:.3}px", stats.mean);

    let export = session.export()?;
    assert!(export.converged);
    assert_eq!(export.lasers.len(), scene.lasers.len());
    let json = serde_json::to_string(&export)?;
    assert!(json.contains("\"residuals\""));

    let restored = CalibrationSession::<LaserRigProblem>::from_json(&session.to_json()?)?;
    assert_eq!(restored.output(), session.output());
    Ok(())
}

#[test]
fn missing_frame_stops_at_line_extraction() {
    init_logging();
    let scene = LaserScene::new(4, 2, 7);
    let (mut input, images) = rendered_rig(&scene);
    input.captures[0].shots[0].on = "missing.png".into();

    let mut session = CalibrationSession::<LaserRigProblem>::with_input(input).unwrap();
    let mut reported = Vec::new();
    let mut observer = |stage: &str, _: f64| reported.push(stage.to_string());
    let err = run_calibration(&mut session, &images, &mut observer).unwrap_err();
    assert!(format!("{err:#}").contains("missing.png"));

    assert!(reported.iter().all(|s| s == "extract_lines"));
    assert_eq!(session.log.len(), 1);
    assert_eq!(session.log[0].operation, "extract_lines");
    assert!(!session.log[0].success);
    assert!(!session.has_output());
}

#[test]
fn captures_with_too_few_beams_are_excluded() {
    init_logging();
    let scene = LaserScene::new(4, 2, 7);
    let (mut input, images) = rendered_rig(&scene);
    input.captures[0].shots.truncate(2);

    let mut session = CalibrationSession::<LaserRigProblem>::with_input(input).unwrap();
    step_extract_lines(&mut session, &images, &mut |_: &str, _: f64| {}).unwrap();
    assert!(session.state.exclusions.iter().any(|e| matches!(
        e,
        Exclusion::Capture {
            capture: 0,
            required: 4,
            ..
        }
    )));
    let kept = session.state.captures.as_ref().unwrap();
    assert!(kept.iter().all(|c| c.capture != 0));
}

#[test]
fn unconverged_origin_solve_fails_the_stage_and_keeps_the_capture() {
    init_logging();
    let scene = LaserScene::new(4, 2, 7);
    let (input, images) = rendered_rig(&scene);

    let mut session = CalibrationSession::<LaserRigProblem>::with_input(input).unwrap();
    session
        .update_config(|config| {
            config.common_point.solver = SolverConfig {
                max_iterations: 1,
                function_tolerance: 0.0,
                parameter_tolerance: 0.0,
                ..Default::default()
            };
        })
        .unwrap();
    let err =
        step_extract_lines(&mut session, &images, &mut |_: &str, _: f64| {}).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CalibError>(),
        Some(CalibError::NotConverged { .. })
    ));
    assert!(format!("{err:#}").contains("laser origin of capture"));

    assert_eq!(session.log.len(), 1);
    assert!(!session.log[0].success);
    let captures = session.state.captures.as_ref().unwrap();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].report.status, SolveStatus::NotConverged);
    assert_eq!(session.state.origin_observations.as_ref().unwrap().len(), 1);
    assert!(!session.has_output());
}
