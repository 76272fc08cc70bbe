//! Cameras and markers shared by the rig pipelines, and camera registration
//! against the markers.

use anyhow::{Context, Result};
use beamcal_core::{
    ensure_input, CameraIntrinsics, CameraModel, ObjectImageObservation, RigidTransform, Vec3,
};
use beamcal_optim::{bootstrap_poses, BootstrapInput, BootstrapOptions};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigCamera {
    pub intrinsics: CameraIntrinsics,
    /// Rough world → view pose. Required for cameras that see no marker.
    #[serde(default)]
    pub view_guess: Option<RigidTransform<f64>>,
}

/// A fiducial marker with known local geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigMarker {
    pub local_points: Vec<Vec3>,
    /// Known object → world pose. Markers with a pose anchor the world frame.
    #[serde(default)]
    pub pose: Option<RigidTransform<f64>>,
}

/// Camera poses after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRegistration {
    pub cameras: Vec<CameraModel<f64>>,
    /// Object → world pose of each marker, `None` when never observed.
    pub markers: Vec<Option<RigidTransform<f64>>>,
    /// Marker reprojection RMS per camera, `0` for cameras placed from their
    /// guess.
    pub rms: Vec<f64>,
    /// First camera registered from the anchored markers.
    pub genesis: Option<usize>,
}

/// Range and shape checks shared by every rig input.
pub fn validate_rig(
    cameras: &[RigCamera],
    markers: &[RigMarker],
    observations: &[ObjectImageObservation],
) -> Result<()> {
    ensure_input!(!cameras.is_empty(), "rig has no cameras");
    for (c, cam) in cameras.iter().enumerate() {
        cam.intrinsics
            .validate()
            .with_context(|| format!("camera {c}"))?;
    }
    for (m, marker) in markers.iter().enumerate() {
        ensure_input!(!marker.local_points.is_empty(), "marker {} has no local points", m);
    }
    for (i, obs) in observations.iter().enumerate() {
        ensure_input!(
            obs.view_index < cameras.len(),
            "marker observation {} refers to camera {} of {}",
            i,
            obs.view_index,
            cameras.len()
        );
        ensure_input!(
            obs.object_index < markers.len(),
            "marker observation {} refers to marker {} of {}",
            i,
            obs.object_index,
            markers.len()
        );
        ensure_input!(
            obs.pixels.len() == markers[obs.object_index].local_points.len(),
            "marker observation {} has {} pixels, marker {} has {} points",
            i,
            obs.pixels.len(),
            obs.object_index,
            markers[obs.object_index].local_points.len()
        );
    }
    Ok(())
}

/// Place every camera, from the markers it sees or from its guess.
///
/// Without marker observations every camera needs a guess. Cameras the
/// marker bootstrap leaves unplaced (they see no marker) fall back to their
/// guess as well.
pub fn register_cameras(
    cameras: &[RigCamera],
    markers: &[RigMarker],
    observations: &[ObjectImageObservation],
    opts: &BootstrapOptions,
) -> Result<CameraRegistration> {
    let anchored: Vec<Option<RigidTransform<f64>>> =
        markers.iter().map(|m| m.pose.clone()).collect();

    if observations.is_empty() {
        let mut placed = Vec::with_capacity(cameras.len());
        for (c, cam) in cameras.iter().enumerate() {
            let Some(view) = cam.view_guess.clone() else {
                return Err(beamcal_core::CalibError::invalid(format!(
                    "camera {c} has no view guess and there are no marker observations"
                ))
                .into());
            };
            placed.push(CameraModel::new(view, cam.intrinsics.clone()));
        }
        return Ok(CameraRegistration {
            rms: vec![0.0; placed.len()],
            cameras: placed,
            markers: anchored,
            genesis: None,
        });
    }

    let input = BootstrapInput {
        intrinsics: cameras.iter().map(|c| c.intrinsics.clone()).collect(),
        observations: observations.to_vec(),
        local_points: markers.iter().map(|m| m.local_points.clone()).collect(),
        fixed: markers
            .iter()
            .enumerate()
            .filter_map(|(m, marker)| marker.pose.clone().map(|p| (m, p)))
            .collect::<BTreeMap<_, _>>(),
        view_guesses: cameras
            .iter()
            .enumerate()
            .filter_map(|(c, cam)| cam.view_guess.clone().map(|v| (c, v)))
            .collect(),
    };
    let boot = bootstrap_poses(&input, opts).context("marker bootstrap")?;
    debug!("bootstrap order {:?}", boot.order);

    let mut placed = Vec::with_capacity(cameras.len());
    for (c, cam) in cameras.iter().enumerate() {
        let view = match (&boot.views[c], &cam.view_guess) {
            (Some(view), _) => view.clone(),
            (None, Some(guess)) => guess.clone(),
            (None, None) => {
                return Err(beamcal_core::CalibError::invalid(format!(
                    "camera {c} sees no marker and has no view guess"
                ))
                .into())
            }
        };
        placed.push(CameraModel::new(view, cam.intrinsics.clone()));
    }
    Ok(CameraRegistration {
        cameras: placed,
        markers: boot.objects,
        rms: boot.rms,
        genesis: Some(boot.genesis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::synthetic::MarkerScene;
    use beamcal_core::CalibError;

    fn rig_from(scene: &MarkerScene, anchored: &[usize]) -> (Vec<RigCamera>, Vec<RigMarker>) {
        let cameras = scene
            .cameras
            .iter()
            .map(|c| RigCamera {
                intrinsics: c.intrinsics.clone(),
                view_guess: None,
            })
            .collect();
        let markers = scene
            .markers
            .iter()
            .enumerate()
            .map(|(m, pose)| RigMarker {
                local_points: scene.local_points.clone(),
                pose: anchored.contains(&m).then(|| pose.clone()),
            })
            .collect();
        (cameras, markers)
    }

    #[test]
    fn cameras_are_registered_from_anchored_markers() {
        let scene = MarkerScene::new(6, 4, 5);
        let anchor = scene.observations()[0].object_index;
        let (mut cameras, markers) = rig_from(&scene, &[anchor]);
        // Cameras that see no marker keep their guess.
        for (cam, truth) in cameras.iter_mut().zip(&scene.cameras) {
            cam.view_guess = Some(truth.view.clone());
        }
        let reg = register_cameras(
            &cameras,
            &markers,
            &scene.observations(),
            &BootstrapOptions::default(),
        )
        .unwrap();
        assert!(reg.genesis.is_some());
        for (est, truth) in reg.cameras.iter().zip(&scene.cameras) {
            assert!(est.view.max_abs_diff(&truth.view) < 1e-5);
        }
    }

    #[test]
    fn guesses_stand_in_for_missing_markers() {
        let scene = MarkerScene::new(3, 2, 4);
        let (mut cameras, markers) = rig_from(&scene, &[0]);
        let err = register_cameras(&cameras, &markers, &[], &BootstrapOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CalibError>(),
            Some(CalibError::InvalidInput(_))
        ));

        for (cam, truth) in cameras.iter_mut().zip(&scene.cameras) {
            cam.view_guess = Some(truth.view.clone());
        }
        let reg = register_cameras(&cameras, &markers, &[], &BootstrapOptions::default()).unwrap();
        assert_eq!(reg.genesis, None);
        assert_eq!(reg.cameras[2].view, scene.cameras[2].view);
        assert_eq!(reg.markers[0], Some(scene.markers[0].clone()));
        assert_eq!(reg.markers[1], None);
    }

    #[test]
    fn observation_shape_is_checked() {
        let scene = MarkerScene::new(6, 4, 5);
        let (cameras, markers) = rig_from(&scene, &[0]);
        let mut obs = scene.observations();
        obs[0].pixels.pop();
        assert!(validate_rig(&cameras, &markers, &obs).is_err());
        obs[0] = scene.observations()[0].clone();
        obs[0].object_index = 7;
        assert!(validate_rig(&cameras, &markers, &obs).is_err());
    }
}
