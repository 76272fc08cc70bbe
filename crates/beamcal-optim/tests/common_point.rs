use beamcal_core::synthetic::LaserScene;
use beamcal_linear::render::{render_beam_pair, BeamRenderSettings};
use beamcal_linear::{extract_beam, LineFinderSettings};
use beamcal_optim::{solve_common_point, CommonPointOptions, LineSet};

#[test]
fn rendered_beams_converge_on_the_projected_laser_origin() -> anyhow::Result<()> {
    let scene = LaserScene::new(4, 2, 7);
    let observations = scene.observations();
    let first = &observations[0];
    let (camera, laser) = (first.camera_index, first.laser_index);
    let cam = &scene.cameras[camera];
    let origin_px = cam.world_to_image(&scene.lasers[laser].position());

    let render = BeamRenderSettings::default();
    let settings = LineFinderSettings::default();
    let mut sets = Vec::new();
    for obs in observations
        .iter()
        .filter(|o| o.camera_index == camera && o.laser_index == laser)
    {
        let ray = scene.lasers[laser].cast_ray(&obs.command);
        let far = cam.world_to_image(&ray.point_at(3.0));
        let (on, off) = render_beam_pair(
            cam.intrinsics.width,
            cam.intrinsics.height,
            &origin_px,
            &far,
            &render,
        );
        let beam = extract_beam(&on, &off, &settings)?;
        sets.push(LineSet::from(&beam));
    }
    assert!(sets.len() >= 3, "only {} beams visible", sets.len());

    let sol = solve_common_point(&sets, &CommonPointOptions::default())?;
    assert!(
        (sol.point - origin_px).norm() < 1.5,
        "point {} vs {}",
        sol.point,
        origin_px
    );
    assert!(sol.valid.iter().filter(|v| **v).count() >= 2);
    Ok(())
}
