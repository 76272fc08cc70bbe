//! Shared bundle-adjustment core.
//!
//! A bundle problem has per-capture camera poses and a set of unknowns
//! (points, rigid objects or laser projectors) tied together by image
//! observations. [`BundleModel`] describes how one kind of unknown is stored
//! and how one observation turns into a residual; [`solve_bundle`] owns the
//! rest: block bookkeeping, fixing, gauge constraints, solving, extraction and
//! per-observation residuals.
//!
//! Unknown `i` is stored as one or more blocks named `{prefix}_{i}{suffix}`.
//! The first block starts with the unknown's world position, which is what
//! the gauge factors read. Camera `c` is the world → view block `camera_{c}`.

use crate::backend::SolverConfig;
use crate::ir::{FactorKind, FixedMask, ParamId, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::{pack_pose, unpack_pose, POSE_DIM};
use crate::report::{residual_rms, SolveReport};
use crate::solve::solve_ir;
use anyhow::{Context, Result};
use beamcal_core::{ensure_input, CameraIntrinsics, CameraModel, RigidTransform};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Translation indices of a pose or point block.
const POSITION_INDICES: [usize; 3] = [0, 1, 2];
/// Euler-angle indices of a pose block.
const ROTATION_INDICES: [usize; 3] = [3, 4, 5];

/// One kind of bundle unknown and its observation residual.
pub trait BundleModel {
    type Observation;
    type Unknown: Clone;

    /// Block name prefix, e.g. `"point"`.
    const PREFIX: &'static str;

    /// `(suffix, dim)` of each block of one unknown. The first block holds
    /// the position in its first three scalars.
    fn blocks(&self) -> &'static [(&'static str, usize)];

    fn pack(&self, unknown: &Self::Unknown) -> Vec<DVector<f64>>;

    fn unpack(&self, blocks: &[&DVector<f64>]) -> Result<Self::Unknown>;

    /// Fixed mask of every block of unknown `index`.
    fn fixed(&self, index: usize, fix: &BundleFixOptions) -> Vec<FixedMask>;

    fn camera_of(&self, obs: &Self::Observation) -> usize;

    fn unknown_of(&self, obs: &Self::Observation) -> usize;

    /// Reject malformed observations before any block is built.
    fn check(&self, _index: usize, _obs: &Self::Observation) -> Result<()> {
        Ok(())
    }

    /// Residual of one observation. Parameters are `[camera, unknown blocks..]`.
    fn factor(&self, obs: &Self::Observation, intrinsics: &CameraIntrinsics) -> FactorKind;
}

/// Which parameters stay at their initial values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleFixOptions {
    pub fix_all_positions: bool,
    pub fix_all_rotations: bool,
    /// Unknowns whose position is fixed.
    pub fixed_positions: Vec<usize>,
    /// Unknowns whose rotation is fixed. Ignored for point unknowns.
    pub fixed_rotations: Vec<usize>,
    /// Laser first-order field of view.
    pub fix_fov: bool,
    /// Laser second-order field-of-view correction.
    pub fix_fov2: bool,
    pub fix_all_cameras: bool,
    pub fixed_cameras: Vec<usize>,
    /// Fix every camera's rotation, leaving positions free.
    pub fix_camera_rotations: bool,
}

impl BundleFixOptions {
    pub fn position_fixed(&self, index: usize) -> bool {
        self.fix_all_positions || self.fixed_positions.contains(&index)
    }

    pub fn rotation_fixed(&self, index: usize) -> bool {
        self.fix_all_rotations || self.fixed_rotations.contains(&index)
    }

    /// Mask for a 6-dof unknown pose block.
    pub fn pose_mask(&self, index: usize) -> FixedMask {
        let mut mask = FixedMask::all_free();
        if self.position_fixed(index) {
            mask = mask.with(&FixedMask::fix_indices(&POSITION_INDICES));
        }
        if self.rotation_fixed(index) {
            mask = mask.with(&FixedMask::fix_indices(&ROTATION_INDICES));
        }
        mask
    }

    pub fn camera_mask(&self, camera: usize) -> FixedMask {
        if self.fix_all_cameras || self.fixed_cameras.contains(&camera) {
            FixedMask::all_fixed(POSE_DIM)
        } else if self.fix_camera_rotations {
            FixedMask::fix_indices(&ROTATION_INDICES)
        } else {
            FixedMask::all_free()
        }
    }
}

/// A pose a rotation gauge can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum PoseRef {
    Camera(usize),
    Unknown(usize),
}

/// Pin one Euler component of a pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationGauge {
    pub pose: PoseRef,
    /// 0, 1 or 2 for the x, y or z Euler angle.
    pub axis: usize,
    pub angle: f64,
}

/// Soft constraints that remove the similarity ambiguity of the scene.
///
/// They act on the positions of the unknowns that take part in the solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaugeConfig {
    /// Mean unknown position.
    pub center: Option<[f64; 3]>,
    /// Largest distance of an unknown from the origin.
    pub scale: Option<f64>,
    pub fixed_rotations: Vec<RotationGauge>,
    /// Keep every unknown on a plane normal to this axis.
    pub coplanar_axis: Option<usize>,
    /// Residual weight of every gauge term.
    pub weight: f64,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            center: None,
            scale: None,
            fixed_rotations: Vec::new(),
            coplanar_axis: None,
            weight: 1e3,
        }
    }
}

impl GaugeConfig {
    pub fn is_empty(&self) -> bool {
        self.center.is_none()
            && self.scale.is_none()
            && self.fixed_rotations.is_empty()
            && self.coplanar_axis.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    pub fix: BundleFixOptions,
    pub gauge: GaugeConfig,
    /// Loss on every observation residual.
    pub loss: RobustLoss,
    pub solver: SolverConfig,
    /// Observations left out of the solve. They still get a residual.
    pub excluded: Vec<usize>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            fix: BundleFixOptions::default(),
            gauge: GaugeConfig::default(),
            loss: RobustLoss::Huber { scale: 2.0 },
            solver: SolverConfig::default(),
            excluded: Vec::new(),
        }
    }
}

/// Refined cameras and unknowns.
///
/// Cameras and unknowns without any solved observation keep their initial
/// values.
#[derive(Debug, Clone)]
pub struct BundleSolution<U> {
    pub cameras: Vec<CameraModel<f64>>,
    pub unknowns: Vec<U>,
    pub report: SolveReport,
}

impl<U> BundleSolution<U> {
    /// RMS of observation `index`'s residual vector at the solution.
    pub fn get_residual(&self, index: usize) -> Option<f64> {
        self.report.residuals.get(index).copied()
    }
}

fn camera_name(c: usize) -> String {
    format!("camera_{c}")
}

fn unknown_names<M: BundleModel>(model: &M, i: usize) -> Vec<String> {
    model
        .blocks()
        .iter()
        .map(|(suffix, _)| format!("{}_{}{}", M::PREFIX, i, suffix))
        .collect()
}

fn validate_inputs<M: BundleModel>(
    model: &M,
    cameras: &[CameraModel<f64>],
    unknowns: &[M::Unknown],
    observations: &[M::Observation],
    opts: &BundleOptions,
) -> Result<()> {
    ensure_input!(!cameras.is_empty(), "bundle adjustment needs at least one camera");
    ensure_input!(!unknowns.is_empty(), "bundle adjustment needs at least one unknown");
    ensure_input!(!observations.is_empty(), "bundle adjustment needs observations");
    for (c, cam) in cameras.iter().enumerate() {
        cam.intrinsics
            .validate()
            .with_context(|| format!("camera {c}"))?;
    }
    for (i, obs) in observations.iter().enumerate() {
        let c = model.camera_of(obs);
        let u = model.unknown_of(obs);
        ensure_input!(
            c < cameras.len(),
            "observation {} refers to camera {} of {}",
            i,
            c,
            cameras.len()
        );
        ensure_input!(
            u < unknowns.len(),
            "observation {} refers to {} {} of {}",
            i,
            M::PREFIX,
            u,
            unknowns.len()
        );
        model.check(i, obs)?;
    }
    for &i in &opts.excluded {
        ensure_input!(
            i < observations.len(),
            "excluded observation {} of {}",
            i,
            observations.len()
        );
    }
    let fix = &opts.fix;
    for &c in &fix.fixed_cameras {
        ensure_input!(c < cameras.len(), "fixed camera {} of {}", c, cameras.len());
    }
    for &i in fix.fixed_positions.iter().chain(&fix.fixed_rotations) {
        ensure_input!(i < unknowns.len(), "fixed {} {} of {}", M::PREFIX, i, unknowns.len());
    }
    if let Some(radius) = opts.gauge.scale {
        ensure_input!(radius > 0.0, "gauge scale must be positive, got {}", radius);
    }
    if let Some(axis) = opts.gauge.coplanar_axis {
        ensure_input!(axis < 3, "coplanar axis {} out of range", axis);
    }
    for g in &opts.gauge.fixed_rotations {
        ensure_input!(g.axis < 3, "rotation gauge axis {} out of range", g.axis);
    }
    Ok(())
}

/// Blocks referenced by each camera and unknown in the IR.
struct BundleLayout {
    cameras: HashMap<usize, ParamId>,
    unknowns: HashMap<usize, Vec<ParamId>>,
}

fn build_bundle_ir<M: BundleModel>(
    model: &M,
    cameras: &[CameraModel<f64>],
    unknowns: &[M::Unknown],
    observations: &[M::Observation],
    opts: &BundleOptions,
) -> Result<(ProblemIR, HashMap<String, DVector<f64>>, BundleLayout)> {
    validate_inputs(model, cameras, unknowns, observations, opts)?;

    let excluded: BTreeSet<usize> = opts.excluded.iter().copied().collect();
    let selected: Vec<usize> = (0..observations.len())
        .filter(|i| !excluded.contains(i))
        .collect();
    ensure_input!(
        !selected.is_empty(),
        "every observation is excluded from bundle adjustment"
    );

    let used_cameras: BTreeSet<usize> = selected
        .iter()
        .map(|&i| model.camera_of(&observations[i]))
        .collect();
    let used_unknowns: BTreeSet<usize> = selected
        .iter()
        .map(|&i| model.unknown_of(&observations[i]))
        .collect();

    let mut ir = ProblemIR::new();
    let mut initial = HashMap::new();
    let mut layout = BundleLayout {
        cameras: HashMap::new(),
        unknowns: HashMap::new(),
    };

    for &c in &used_cameras {
        let name = camera_name(c);
        let id = ir.add_param_block(&name, POSE_DIM, opts.fix.camera_mask(c), None);
        initial.insert(name, pack_pose(&cameras[c].view));
        layout.cameras.insert(c, id);
    }
    for &u in &used_unknowns {
        let names = unknown_names(model, u);
        let values = model.pack(&unknowns[u]);
        let masks = model.fixed(u, &opts.fix);
        let mut ids = Vec::with_capacity(names.len());
        for (((name, value), mask), (_, dim)) in names
            .into_iter()
            .zip(values)
            .zip(masks)
            .zip(model.blocks())
        {
            ids.push(ir.add_param_block(&name, *dim, mask, None));
            initial.insert(name, value);
        }
        layout.unknowns.insert(u, ids);
    }

    for &i in &selected {
        let obs = &observations[i];
        let c = model.camera_of(obs);
        let mut params = vec![layout.cameras[&c]];
        params.extend(layout.unknowns[&model.unknown_of(obs)].iter().copied());
        ir.add_residual_block(
            ResidualBlock::new(params, model.factor(obs, &cameras[c].intrinsics), opts.loss)
                .for_observation(i),
        );
    }

    add_gauge_blocks(&mut ir, &layout, &opts.gauge)?;
    if opts.gauge.is_empty() {
        debug!("bundle ({}): no gauge factors, frame held by fixed blocks only", M::PREFIX);
    }
    debug!(
        "bundle ({}): {} cameras, {} {}s, {} of {} observations",
        M::PREFIX,
        used_cameras.len(),
        used_unknowns.len(),
        M::PREFIX,
        selected.len(),
        observations.len()
    );
    Ok((ir, initial, layout))
}

fn add_gauge_blocks(ir: &mut ProblemIR, layout: &BundleLayout, gauge: &GaugeConfig) -> Result<()> {
    let mut positions: Vec<(usize, ParamId)> = layout
        .unknowns
        .iter()
        .map(|(u, ids)| (*u, ids[0]))
        .collect();
    positions.sort_unstable_by_key(|(u, _)| *u);
    let positions: Vec<ParamId> = positions.into_iter().map(|(_, id)| id).collect();
    let w = gauge.weight;

    if let Some(target) = gauge.center {
        ir.add_residual_block(ResidualBlock::new(
            positions.clone(),
            FactorKind::SceneCenter { target, w },
            RobustLoss::None,
        ));
    }
    if let Some(radius) = gauge.scale {
        ir.add_residual_block(ResidualBlock::new(
            positions.clone(),
            FactorKind::SceneScale { radius, w },
            RobustLoss::None,
        ));
    }
    if let Some(axis) = gauge.coplanar_axis {
        ir.add_residual_block(ResidualBlock::new(
            positions,
            FactorKind::Coplanar { axis, w },
            RobustLoss::None,
        ));
    }
    for g in &gauge.fixed_rotations {
        let id = match g.pose {
            PoseRef::Camera(c) => layout.cameras.get(&c).copied(),
            PoseRef::Unknown(u) => layout.unknowns.get(&u).map(|ids| ids[0]),
        }
        .ok_or_else(|| {
            beamcal_core::CalibError::invalid(format!(
                "rotation gauge refers to {:?}, which takes no part in the solve",
                g.pose
            ))
        })?;
        ensure_input!(
            ir.params[id.0].dim == POSE_DIM,
            "rotation gauge on {:?}, which has no rotation",
            g.pose
        );
        ir.add_residual_block(ResidualBlock::new(
            vec![id],
            FactorKind::FixedRotationAxis {
                axis: g.axis,
                angle: g.angle,
                w,
            },
            RobustLoss::None,
        ));
    }
    Ok(())
}

/// Residual RMS of every observation, selected or not.
fn all_observation_residuals<M: BundleModel>(
    model: &M,
    cameras: &[CameraModel<f64>],
    values: &HashMap<String, DVector<f64>>,
    observations: &[M::Observation],
) -> Vec<f64> {
    observations
        .iter()
        .map(|obs| {
            let c = model.camera_of(obs);
            let u = model.unknown_of(obs);
            let camera = &values[&camera_name(c)];
            let names = unknown_names(model, u);
            let mut params = vec![camera];
            for name in &names {
                params.push(&values[name]);
            }
            let r = model.factor(obs, &cameras[c].intrinsics).evaluate(&params);
            residual_rms(&r)
        })
        .collect()
}

/// Jointly refine cameras and unknowns.
pub fn solve_bundle<M: BundleModel>(
    model: &M,
    cameras: &[CameraModel<f64>],
    unknowns: &[M::Unknown],
    observations: &[M::Observation],
    opts: &BundleOptions,
) -> Result<BundleSolution<M::Unknown>> {
    let (ir, initial, _layout) = build_bundle_ir(model, cameras, unknowns, observations, opts)?;
    let solution = solve_ir(&ir, &initial, &opts.solver, observations.len())?;

    // Blocks left out of the solve keep their initial values.
    let mut values = solution.params;
    for (c, cam) in cameras.iter().enumerate() {
        values
            .entry(camera_name(c))
            .or_insert_with(|| pack_pose(&cam.view));
    }
    for (u, unknown) in unknowns.iter().enumerate() {
        for (name, value) in unknown_names(model, u).into_iter().zip(model.pack(unknown)) {
            values.entry(name).or_insert(value);
        }
    }

    let refined_cameras = cameras
        .iter()
        .enumerate()
        .map(|(c, cam)| {
            let view: RigidTransform<f64> = unpack_pose(values[&camera_name(c)].as_view())?;
            Ok(CameraModel::new(view, cam.intrinsics.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    let refined_unknowns = (0..unknowns.len())
        .map(|u| {
            let names = unknown_names(model, u);
            let blocks: Vec<&DVector<f64>> = names.iter().map(|n| &values[n]).collect();
            model.unpack(&blocks)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = solution.report;
    report.residuals = all_observation_residuals(model, cameras, &values, observations);

    Ok(BundleSolution {
        cameras: refined_cameras,
        unknowns: refined_unknowns,
        report,
    })
}
