use crate::factors::{common_point, gauge, laser, reprojection};
use crate::params::{FOV_DIM, POINT_DIM, POSE_DIM};
use anyhow::{ensure, Result};
use beamcal_core::CameraIntrinsics;
use nalgebra::{DVector, DVectorView, RealField};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Identifier for a parameter block in the IR.
///
/// This is stable within a `ProblemIR` instance and is used by residual blocks
/// to reference their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Block sizes a problem may declare.
pub const SUPPORTED_BLOCK_DIMS: [usize; 5] = [1, 2, 3, 4, 6];

/// Bounds for a single parameter index.
///
/// Bounds are applied after each update in backends that support them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub idx: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Fixed parameter mask for a block.
///
/// A whole block is fixed by listing every index. Residual code never sees
/// the mask; the backend applies it once when compiling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    pub fn all_free() -> Self {
        Self::default()
    }

    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    pub fn fix_indices(indices: &[usize]) -> Self {
        Self {
            fixed_indices: indices.iter().copied().collect(),
        }
    }

    /// Union with another mask.
    pub fn with(mut self, other: &FixedMask) -> Self {
        self.fixed_indices.extend(other.iter());
        self
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_indices.contains(&idx)
    }

    /// Returns `true` if all indices `[0, dim)` are fixed.
    pub fn is_all_fixed(&self, dim: usize) -> bool {
        (0..dim).all(|i| self.is_fixed(i))
    }

    /// Fixed indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut v: Vec<usize> = self.fixed_indices.iter().copied().collect();
        v.sort_unstable();
        v.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }
}

/// Robust loss applied to a residual block.
///
/// Each residual block has its own loss; per-observation robustification is
/// achieved by using one residual block per observation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
    Arctan {
        scale: f64,
    },
}

/// Parameter layout a factor expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLayout {
    /// Exactly these block sizes, in order.
    Fixed(&'static [usize]),
    /// One or more blocks, each at least this large.
    Variable { min_dim: usize },
}

/// Backend-agnostic factor kinds.
///
/// Each factor kind implies its parameter layout and residual dimension, and
/// holds the measurement data of its pure residual function.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Reprojection of an unknown world point.
    ///
    /// Parameters: `[camera (6), point (3)]`.
    PointReprojection {
        intrinsics: CameraIntrinsics,
        uv: [f64; 2],
        w: f64,
    },
    /// Reprojection of every local point of a rigid object.
    ///
    /// Parameters: `[camera (6), object pose (6)]`.
    ObjectReprojection {
        intrinsics: CameraIntrinsics,
        local_points: Vec<[f64; 3]>,
        uvs: Vec<[f64; 2]>,
        w: f64,
    },
    /// Reprojection of a point with known world position.
    ///
    /// Parameters: `[camera (6)]`.
    KnownPointReprojection {
        intrinsics: CameraIntrinsics,
        pw: [f64; 3],
        uv: [f64; 2],
        w: f64,
    },
    /// Observed beam line against the projector model.
    ///
    /// Parameters: `[camera (6), laser pose (6), laser fov (4)]`.
    LaserLine {
        intrinsics: CameraIntrinsics,
        command: [f64; 2],
        line_point: [f64; 2],
        line_dir: [f64; 2],
        w: f64,
    },
    /// Beam pixels against a line through a shared point.
    ///
    /// Parameters: `[point (2), angle (1)]`.
    CommonPointLine {
        pixels: Vec<[f64; 2]>,
        weights: Vec<f64>,
    },
    /// Mean position of the blocks → `target`.
    SceneCenter { target: [f64; 3], w: f64 },
    /// `ln(max |position| / radius)`.
    SceneScale { radius: f64, w: f64 },
    /// One Euler component of a pose → `angle`.
    ///
    /// Parameters: `[pose (6)]`.
    FixedRotationAxis { axis: usize, angle: f64, w: f64 },
    /// Positions share one coordinate along `axis`.
    Coplanar { axis: usize, w: f64 },
}

impl FactorKind {
    /// Residual dimension for a block referencing `num_params` parameter blocks.
    pub fn residual_dim(&self, num_params: usize) -> usize {
        match self {
            FactorKind::PointReprojection { .. } => 2,
            FactorKind::ObjectReprojection { uvs, .. } => 2 * uvs.len(),
            FactorKind::KnownPointReprojection { .. } => 2,
            FactorKind::LaserLine { .. } => 2,
            FactorKind::CommonPointLine { pixels, .. } => pixels.len(),
            FactorKind::SceneCenter { .. } => 3,
            FactorKind::SceneScale { .. } => 1,
            FactorKind::FixedRotationAxis { .. } => 1,
            FactorKind::Coplanar { .. } => num_params,
        }
    }

    pub fn layout(&self) -> ParamLayout {
        const CAMERA_POINT: &[usize] = &[POSE_DIM, POINT_DIM];
        const CAMERA_OBJECT: &[usize] = &[POSE_DIM, POSE_DIM];
        const CAMERA: &[usize] = &[POSE_DIM];
        const CAMERA_LASER: &[usize] = &[POSE_DIM, POSE_DIM, FOV_DIM];
        const POINT_ANGLE: &[usize] = &[2, 1];
        match self {
            FactorKind::PointReprojection { .. } => ParamLayout::Fixed(CAMERA_POINT),
            FactorKind::ObjectReprojection { .. } => ParamLayout::Fixed(CAMERA_OBJECT),
            FactorKind::KnownPointReprojection { .. } => ParamLayout::Fixed(CAMERA),
            FactorKind::LaserLine { .. } => ParamLayout::Fixed(CAMERA_LASER),
            FactorKind::CommonPointLine { .. } => ParamLayout::Fixed(POINT_ANGLE),
            FactorKind::FixedRotationAxis { .. } => ParamLayout::Fixed(CAMERA),
            FactorKind::SceneCenter { .. }
            | FactorKind::SceneScale { .. }
            | FactorKind::Coplanar { .. } => ParamLayout::Variable { min_dim: 3 },
        }
    }

    /// Evaluate the residual for any solver scalar.
    ///
    /// `params` must follow [`FactorKind::layout`]; [`ProblemIR::validate`]
    /// checks that before a solve.
    pub fn residual<T: RealField>(&self, params: &[DVectorView<'_, T>]) -> DVector<T> {
        match self {
            FactorKind::PointReprojection { intrinsics, uv, w } => {
                let r = reprojection::point_reprojection_generic(
                    params[0].as_view(),
                    params[1].as_view(),
                    intrinsics,
                    *uv,
                    *w,
                );
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::ObjectReprojection {
                intrinsics,
                local_points,
                uvs,
                w,
            } => reprojection::object_reprojection_generic(
                params[0].as_view(),
                params[1].as_view(),
                intrinsics,
                local_points,
                uvs,
                *w,
            ),
            FactorKind::KnownPointReprojection {
                intrinsics,
                pw,
                uv,
                w,
            } => {
                let r = reprojection::known_point_reprojection_generic(
                    params[0].as_view(), intrinsics, *pw, *uv, *w,
                );
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::LaserLine {
                intrinsics,
                command,
                line_point,
                line_dir,
                w,
            } => {
                let r = laser::laser_line_residual_generic(
                    params[0].as_view(),
                    params[1].as_view(),
                    params[2].as_view(),
                    intrinsics,
                    *command,
                    *line_point,
                    *line_dir,
                    *w,
                );
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::CommonPointLine { pixels, weights } => {
                common_point::common_point_line_generic(
                    params[0].as_view(),
                    params[1].as_view(),
                    pixels,
                    weights,
                )
            }
            FactorKind::SceneCenter { target, w } => {
                let r = gauge::scene_center_generic(params, *target, *w);
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::SceneScale { radius, w } => {
                let r = gauge::scene_scale_generic(params, *radius, *w);
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::FixedRotationAxis { axis, angle, w } => {
                let r = gauge::fixed_rotation_axis_generic(params[0].as_view(), *axis, *angle, *w);
                DVector::from_row_slice(r.as_slice())
            }
            FactorKind::Coplanar { axis, w } => gauge::coplanar_generic(params, *axis, *w),
        }
    }

    /// `f64` evaluation on owned blocks.
    pub fn evaluate(&self, params: &[&DVector<f64>]) -> DVector<f64> {
        let views: Vec<DVectorView<'_, f64>> = params.iter().map(|p| p.as_view()).collect();
        self.residual(&views)
    }

    fn validate_data(&self) -> Result<()> {
        match self {
            FactorKind::ObjectReprojection {
                local_points, uvs, ..
            } => {
                ensure!(!uvs.is_empty(), "object reprojection needs at least one point");
                ensure!(
                    local_points.len() == uvs.len(),
                    "object reprojection has {} local points but {} pixels",
                    local_points.len(),
                    uvs.len()
                );
            }
            FactorKind::CommonPointLine { pixels, weights } => {
                ensure!(!pixels.is_empty(), "line factor needs at least one pixel");
                ensure!(
                    pixels.len() == weights.len(),
                    "line factor has {} pixels but {} weights",
                    pixels.len(),
                    weights.len()
                );
            }
            FactorKind::SceneScale { radius, .. } => {
                ensure!(*radius > 0.0, "scene scale radius must be positive");
            }
            FactorKind::FixedRotationAxis { axis, .. } | FactorKind::Coplanar { axis, .. } => {
                ensure!(*axis < 3, "axis index {} out of range", axis);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parameter block definition in the IR.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub fixed: FixedMask,
    pub bounds: Option<Vec<Bound>>,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter order.
/// `observation` ties the block to an input observation for per-observation
/// diagnostics; gauge blocks leave it empty.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
    pub observation: Option<usize>,
}

impl ResidualBlock {
    pub fn new(params: Vec<ParamId>, factor: FactorKind, loss: RobustLoss) -> Self {
        let residual_dim = factor.residual_dim(params.len());
        Self {
            params,
            loss,
            factor,
            residual_dim,
            observation: None,
        }
    }

    pub fn for_observation(mut self, observation: usize) -> Self {
        self.observation = Some(observation);
        self
    }
}

/// Backend-agnostic optimization problem representation.
///
/// Backends compile this IR into solver-specific problems.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        fixed: FixedMask,
        bounds: Option<Vec<Bound>>,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            fixed,
            bounds,
        });
        id
    }

    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    pub fn param_by_name(&self, name: &str) -> Option<ParamId> {
        self.params.iter().find(|p| p.name == name).map(|p| p.id)
    }

    /// Evaluate one residual block at the given parameter values.
    pub fn evaluate_block(
        &self,
        block: &ResidualBlock,
        values: &HashMap<String, DVector<f64>>,
    ) -> Result<DVector<f64>> {
        let params = block
            .params
            .iter()
            .map(|id| {
                let name = &self.params[id.0].name;
                values
                    .get(name)
                    .ok_or_else(|| anyhow::anyhow!("missing {} in parameter values", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(block.factor.evaluate(&params))
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                names.insert(param.name.as_str()),
                "duplicate param name {}",
                param.name
            );
            ensure!(
                SUPPORTED_BLOCK_DIMS.contains(&param.dim),
                "param {} has unsupported dim {}",
                param.name,
                param.dim
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    ensure!(
                        bound.idx < param.dim,
                        "param {} bound index {} out of range",
                        param.name,
                        bound.idx
                    );
                    ensure!(
                        bound.lower <= bound.upper,
                        "param {} bound lower {} > upper {}",
                        param.name,
                        bound.lower,
                        bound.upper
                    );
                }
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(residual.params.len()),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim(residual.params.len())
            );
            ensure!(residual.residual_dim > 0, "residual {} is empty", r_idx);
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }
            residual.factor.validate_data()?;

            let dims: Vec<usize> = residual
                .params
                .iter()
                .map(|id| self.params[id.0].dim)
                .collect();
            match residual.factor.layout() {
                ParamLayout::Fixed(expected) => ensure!(
                    dims == expected,
                    "residual {} ({:?}) expects blocks {:?}, got {:?}",
                    r_idx,
                    residual.factor,
                    expected,
                    dims
                ),
                ParamLayout::Variable { min_dim } => {
                    ensure!(
                        !dims.is_empty(),
                        "residual {} gauge factor references no blocks",
                        r_idx
                    );
                    ensure!(
                        dims.iter().all(|d| *d >= min_dim),
                        "residual {} gauge factor needs blocks of at least {} params, got {:?}",
                        r_idx,
                        min_dim,
                        dims
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_checks_layouts() {
        let mut ir = ProblemIR::new();
        let cam = ir.add_param_block("camera_0", 6, FixedMask::all_free(), None);
        let p = ir.add_param_block("point_0", 3, FixedMask::all_free(), None);
        let factor = FactorKind::PointReprojection {
            intrinsics: beamcal_core::synthetic::default_intrinsics(),
            uv: [1.0, 2.0],
            w: 1.0,
        };
        ir.add_residual_block(ResidualBlock::new(vec![cam, p], factor.clone(), RobustLoss::None));
        ir.validate().unwrap();

        ir.add_residual_block(ResidualBlock::new(vec![p, cam], factor, RobustLoss::None));
        assert!(ir.validate().is_err());
    }

    #[test]
    fn variable_arity_gauge_blocks() {
        let mut ir = ProblemIR::new();
        let ids: Vec<ParamId> = (0..4)
            .map(|i| ir.add_param_block(format!("point_{i}"), 3, FixedMask::all_free(), None))
            .collect();
        let block = ResidualBlock::new(ids.clone(), FactorKind::Coplanar { axis: 1, w: 1.0 }, RobustLoss::None);
        assert_eq!(block.residual_dim, 4);
        ir.add_residual_block(block);
        ir.validate().unwrap();

        let angle = ir.add_param_block("angle", 1, FixedMask::all_free(), None);
        ir.add_residual_block(ResidualBlock::new(
            vec![ids[0], angle],
            FactorKind::SceneCenter {
                target: [0.0; 3],
                w: 1.0,
            },
            RobustLoss::None,
        ));
        assert!(ir.validate().is_err());
    }

    #[test]
    fn rejects_bad_blocks() {
        let mut ir = ProblemIR::new();
        ir.add_param_block("a", 5, FixedMask::all_free(), None);
        assert!(ir.validate().is_err());

        let mut ir = ProblemIR::new();
        ir.add_param_block("a", 3, FixedMask::fix_indices(&[3]), None);
        assert!(ir.validate().is_err());

        let mut ir = ProblemIR::new();
        ir.add_param_block("a", 3, FixedMask::all_free(), None);
        ir.add_param_block("a", 3, FixedMask::all_free(), None);
        assert!(ir.validate().is_err());
    }

    #[test]
    fn fixed_mask_union() {
        let m = FixedMask::fix_indices(&[0, 1, 2]).with(&FixedMask::fix_indices(&[3, 4, 5]));
        assert!(m.is_all_fixed(6));
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    }
}
