//! Incremental registration bootstrap.
//!
//! Produces initial camera and object poses for bundle adjustment from 2D
//! observations alone, starting from a few objects with known world poses:
//!
//! 1. genesis: the capture that sees every fixed object and the most objects
//!    overall (lowest index on ties) gets its camera pose from the fixed
//!    objects;
//! 2. every object seen by a solved capture is placed by a single-view pose
//!    solve (objects with at least `min_object_points` local points), or by
//!    triangulation once two solved captures see it (smaller objects);
//! 3. the unsolved capture seeing the most placed objects is solved next,
//!    and so on until no capture can make progress;
//! 4. a final pass re-solves every capture from all of its objects.
//!
//! Objects or captures that are never reached make the bootstrap fail with
//! [`CalibError::Disconnected`].

use crate::problems::view_pose::{estimate_view_pose, refine_view_pose, ViewPoseOptions};
use anyhow::{Context, Result};
use beamcal_core::{
    ensure_input, CalibError, CameraIntrinsics, CameraModel, ObjectImageObservation,
    RigidTransform, Vec2, Vec3,
};
use beamcal_linear::triangulate_pixels;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub view_pose: ViewPoseOptions,
    /// Objects with fewer local points are triangulated instead of solved
    /// from a single view.
    pub min_object_points: usize,
    /// Re-solve every capture from all of its objects at the end.
    pub final_pass: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            view_pose: ViewPoseOptions::default(),
            min_object_points: 4,
            final_pass: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapInput {
    /// Intrinsics of each capture.
    pub intrinsics: Vec<CameraIntrinsics>,
    pub observations: Vec<ObjectImageObservation>,
    /// Local points of each object.
    pub local_points: Vec<Vec<Vec3>>,
    /// Objects whose object → world pose is known.
    pub fixed: BTreeMap<usize, RigidTransform<f64>>,
    /// Rough world → view poses per capture.
    pub view_guesses: BTreeMap<usize, RigidTransform<f64>>,
}

#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// World → view pose of each capture; `None` for captures without
    /// observations.
    pub views: Vec<Option<RigidTransform<f64>>>,
    /// Object → world pose of each object; `None` for objects that are
    /// neither fixed nor observed.
    pub objects: Vec<Option<RigidTransform<f64>>>,
    pub genesis: usize,
    /// Captures in the order they were solved.
    pub order: Vec<usize>,
    /// Reprojection RMS of each capture at the returned poses, in pixels.
    pub rms: Vec<f64>,
}

impl BootstrapInput {
    fn validate(&self) -> Result<()> {
        ensure_input!(!self.intrinsics.is_empty(), "bootstrap needs at least one capture");
        ensure_input!(!self.observations.is_empty(), "bootstrap needs observations");
        for (j, local) in self.local_points.iter().enumerate() {
            ensure_input!(!local.is_empty(), "object {} has no local points", j);
        }
        for (i, obs) in self.observations.iter().enumerate() {
            ensure_input!(
                obs.view_index < self.intrinsics.len(),
                "observation {} refers to capture {} of {}",
                i,
                obs.view_index,
                self.intrinsics.len()
            );
            ensure_input!(
                obs.object_index < self.local_points.len(),
                "observation {} refers to object {} of {}",
                i,
                obs.object_index,
                self.local_points.len()
            );
            ensure_input!(
                obs.pixels.len() == self.local_points[obs.object_index].len(),
                "observation {} has {} pixels for object {} with {} local points",
                i,
                obs.pixels.len(),
                obs.object_index,
                self.local_points[obs.object_index].len()
            );
        }
        for &j in self.fixed.keys() {
            ensure_input!(
                j < self.local_points.len(),
                "fixed object {} of {}",
                j,
                self.local_points.len()
            );
        }
        for &c in self.view_guesses.keys() {
            ensure_input!(
                c < self.intrinsics.len(),
                "view guess for capture {} of {}",
                c,
                self.intrinsics.len()
            );
        }
        Ok(())
    }

    fn observations_of(&self, capture: usize) -> impl Iterator<Item = &ObjectImageObservation> {
        self.observations
            .iter()
            .filter(move |o| o.view_index == capture)
    }

    fn objects_seen_by(&self, capture: usize) -> BTreeSet<usize> {
        self.observations_of(capture).map(|o| o.object_index).collect()
    }

    fn world_points(&self, object: usize, pose: &RigidTransform<f64>) -> Vec<Vec3> {
        self.local_points[object]
            .iter()
            .map(|p| pose.transform_point(p))
            .collect()
    }

    /// World points and pixels of `capture`'s observations of placed objects.
    fn correspondences(
        &self,
        capture: usize,
        objects: &BTreeMap<usize, RigidTransform<f64>>,
    ) -> (Vec<Vec3>, Vec<Vec2>) {
        let mut world = Vec::new();
        let mut pixels = Vec::new();
        for obs in self.observations_of(capture) {
            if let Some(pose) = objects.get(&obs.object_index) {
                world.extend(self.world_points(obs.object_index, pose));
                pixels.extend(obs.pixels.iter().copied());
            }
        }
        (world, pixels)
    }
}

struct Walk<'a> {
    input: &'a BootstrapInput,
    opts: &'a BootstrapOptions,
    views: BTreeMap<usize, RigidTransform<f64>>,
    objects: BTreeMap<usize, RigidTransform<f64>>,
    order: Vec<usize>,
}

impl Walk<'_> {
    fn solve_capture(&mut self, capture: usize) -> Result<()> {
        let (world, pixels) = self.input.correspondences(capture, &self.objects);
        let est = estimate_view_pose(
            &world,
            &pixels,
            &self.input.intrinsics[capture],
            self.input.view_guesses.get(&capture),
            &self.opts.view_pose,
        )
        .with_context(|| format!("solving the pose of capture {capture}"))?;
        debug!(
            "capture {capture}: pose from {} points, rms {:.3}px",
            world.len(),
            est.rms
        );
        self.views.insert(capture, est.view);
        self.order.push(capture);
        Ok(())
    }

    /// Place objects with enough local points from a single solved view.
    fn place_from_single_views(&mut self) -> Result<()> {
        for &capture in &self.order {
            let view = &self.views[&capture];
            for obs in self.input.observations_of(capture) {
                let j = obs.object_index;
                let local = &self.input.local_points[j];
                if self.objects.contains_key(&j) || local.len() < self.opts.min_object_points {
                    continue;
                }
                // Treat the object frame as the world: the solved pose maps
                // object → view.
                let est = estimate_view_pose(
                    local,
                    &obs.pixels,
                    &self.input.intrinsics[capture],
                    None,
                    &self.opts.view_pose,
                )
                .with_context(|| format!("placing object {j} from capture {capture}"))?;
                let pose = view.inverse().compose(&est.view);
                debug!("object {j}: placed from capture {capture}, rms {:.3}px", est.rms);
                self.objects.insert(j, pose);
            }
        }
        Ok(())
    }

    /// Triangulate small objects seen by two or more solved captures.
    fn place_by_triangulation(&mut self) -> Result<()> {
        let mut seen: BTreeMap<usize, Vec<&ObjectImageObservation>> = BTreeMap::new();
        for obs in &self.input.observations {
            let j = obs.object_index;
            if self.views.contains_key(&obs.view_index)
                && !self.objects.contains_key(&j)
                && self.input.local_points[j].len() < self.opts.min_object_points
            {
                seen.entry(j).or_default().push(obs);
            }
        }
        for (j, obs) in seen {
            if obs.len() < 2 {
                continue;
            }
            let cams: Vec<CameraModel<f64>> = obs
                .iter()
                .map(|o| {
                    CameraModel::new(
                        self.views[&o.view_index].clone(),
                        self.input.intrinsics[o.view_index].clone(),
                    )
                })
                .collect();
            let cam_refs: Vec<&CameraModel<f64>> = cams.iter().collect();
            let local = &self.input.local_points[j];
            let mut offset = Vec3::zeros();
            for (k, p) in local.iter().enumerate() {
                let pixels: Vec<Vec2> = obs.iter().map(|o| o.pixels[k]).collect();
                let world = triangulate_pixels(&cam_refs, &pixels)
                    .with_context(|| format!("triangulating object {j}"))?;
                offset += world - p;
            }
            let pose = RigidTransform::from_translation(offset / local.len() as f64);
            debug!("object {j}: triangulated from {} captures", obs.len());
            self.objects.insert(j, pose);
        }
        Ok(())
    }

    /// Unsolved capture with the most placed objects and enough points.
    fn next_capture(&self) -> Option<usize> {
        let min_points = |c: usize| {
            if self.input.view_guesses.contains_key(&c) {
                3
            } else {
                4
            }
        };
        let mut best: Option<(usize, usize)> = None;
        for c in 0..self.input.intrinsics.len() {
            if self.views.contains_key(&c) {
                continue;
            }
            let placed = self
                .input
                .objects_seen_by(c)
                .iter()
                .filter(|j| self.objects.contains_key(j))
                .count();
            let (world, _) = self.input.correspondences(c, &self.objects);
            if placed == 0 || world.len() < min_points(c) {
                continue;
            }
            if best.is_none_or(|(_, n)| placed > n) {
                best = Some((c, placed));
            }
        }
        best.map(|(c, _)| c)
    }
}

fn select_genesis(input: &BootstrapInput) -> Result<usize> {
    let mut best: Option<(usize, usize)> = None;
    for c in 0..input.intrinsics.len() {
        let seen = input.objects_seen_by(c);
        if seen.is_empty() || !input.fixed.keys().all(|j| seen.contains(j)) {
            continue;
        }
        if best.is_none_or(|(_, n)| seen.len() > n) {
            best = Some((c, seen.len()));
        }
    }
    best.map(|(c, _)| c).ok_or_else(|| {
        CalibError::invalid(format!(
            "no capture sees every fixed object {:?}",
            input.fixed.keys().collect::<Vec<_>>()
        ))
        .into()
    })
}

fn capture_rms(
    input: &BootstrapInput,
    views: &BTreeMap<usize, RigidTransform<f64>>,
    objects: &BTreeMap<usize, RigidTransform<f64>>,
) -> Vec<f64> {
    (0..input.intrinsics.len())
        .map(|c| {
            let Some(view) = views.get(&c) else {
                return 0.0;
            };
            let cam = CameraModel::new(view.clone(), input.intrinsics[c].clone());
            let (world, pixels) = input.correspondences(c, objects);
            let errors: Vec<f64> = world
                .iter()
                .zip(&pixels)
                .map(|(p, uv)| (cam.world_to_image(p) - uv).norm())
                .collect();
            beamcal_core::rms(&errors)
        })
        .collect()
}

/// Initial camera and object poses by incremental registration.
pub fn bootstrap_poses(input: &BootstrapInput, opts: &BootstrapOptions) -> Result<BootstrapResult> {
    input.validate()?;
    let genesis = select_genesis(input)?;
    debug!(
        "bootstrap genesis: capture {genesis} sees {} objects",
        input.objects_seen_by(genesis).len()
    );

    let mut walk = Walk {
        input,
        opts,
        views: BTreeMap::new(),
        objects: input.fixed.clone(),
        order: Vec::new(),
    };
    if input.fixed.is_empty() {
        let view = input
            .view_guesses
            .get(&genesis)
            .cloned()
            .unwrap_or_else(RigidTransform::identity);
        walk.views.insert(genesis, view);
        walk.order.push(genesis);
    } else {
        walk.solve_capture(genesis)?;
    }

    loop {
        walk.place_from_single_views()?;
        walk.place_by_triangulation()?;
        let Some(next) = walk.next_capture() else {
            break;
        };
        walk.solve_capture(next)?;
    }

    let observed_objects: BTreeSet<usize> =
        input.observations.iter().map(|o| o.object_index).collect();
    let observed_captures: BTreeSet<usize> =
        input.observations.iter().map(|o| o.view_index).collect();
    let missing_objects: Vec<usize> = observed_objects
        .iter()
        .copied()
        .filter(|j| !walk.objects.contains_key(j))
        .collect();
    let missing_captures: Vec<usize> = observed_captures
        .iter()
        .copied()
        .filter(|c| !walk.views.contains_key(c))
        .collect();
    if !missing_objects.is_empty() || !missing_captures.is_empty() {
        return Err(CalibError::Disconnected {
            objects: missing_objects,
            captures: missing_captures,
        }
        .into());
    }

    if opts.final_pass {
        for &c in &walk.order {
            let (world, pixels) = input.correspondences(c, &walk.objects);
            if world.len() < 3 {
                continue;
            }
            let refined = refine_view_pose(
                &world,
                &pixels,
                &input.intrinsics[c],
                &walk.views[&c],
                &opts.view_pose,
            )
            .with_context(|| format!("final pass on capture {c}"))?;
            walk.views.insert(c, refined.view);
        }
    }

    let rms = capture_rms(input, &walk.views, &walk.objects);
    Ok(BootstrapResult {
        views: (0..input.intrinsics.len())
            .map(|c| walk.views.get(&c).cloned())
            .collect(),
        objects: (0..input.local_points.len())
            .map(|j| walk.objects.get(&j).cloned())
            .collect(),
        genesis,
        order: walk.order,
        rms,
    })
}
