//! Finite-difference checks for the analytic Jacobians.
//!
//! Every check works on borrowed snapshots of the state, perturbing copies
//! through `⊞` and comparing central differences against the analytic
//! blocks. Mismatches are reported per row/column block.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bearing::*;
use crate::camera::Camera;
use crate::config::Config;
use crate::dynamics::*;
use crate::error::Result;
use crate::math::*;
use crate::measurement::*;
use crate::my_types::*;
use crate::pinhole::PinholeModel;
use crate::platform::Platform;
use crate::state::*;

pub const EPSILON: f64 = 1e-6;

pub const VEHICLE_TOLERANCE: f64 = 1e-4;
pub const FEATURE_TOLERANCE: f64 = 1e-3;
pub const VECTOR_TOLERANCE: f64 = 1e-4;
pub const PIXEL_TOLERANCE: f64 = 1e-2;
pub const BEARING_TOLERANCE: f64 = 5e-2;

#[derive(Debug, Clone, PartialEq)]
pub struct BlockError {
    pub row_block: String,
    pub col_block: String,
    pub max_abs_error: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JacobianReport {
    pub name: String,
    pub max_abs_error: f64,
    pub failures: Vec<BlockError>,
}

impl JacobianReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for JacobianReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "{}: ok (max error {:.2e})", self.name, self.max_abs_error);
        }
        write!(f, "{}: FAILED", self.name)?;
        for failure in self.failures.iter() {
            write!(
                f,
                "\n  d{}/d{}: {:.3e} > {:.0e}",
                failure.row_block, failure.col_block, failure.max_abs_error, failure.tolerance
            )?;
        }
        Ok(())
    }
}

/// Named slice of rows or columns
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub start: usize,
    pub len: usize,
    pub is_feature: bool,
}

impl Block {
    fn new(name: impl Into<String>, start: usize, len: usize, is_feature: bool) -> Self {
        Self {
            name: name.into(),
            start,
            len,
            is_feature,
        }
    }
}

/// Blocks of the error state in layout order
pub fn error_state_blocks(state: &State) -> Vec<Block> {
    let mut blocks = vec![
        Block::new("POS", DX_POS, 3, false),
        Block::new("VEL", DX_VEL, 3, false),
        Block::new("ATT", DX_ATT, 3, false),
        Block::new("B_A", DX_B_A, 3, false),
        Block::new("B_G", DX_B_G, 3, false),
        Block::new("MU", DX_MU, 1, false),
    ];
    for (i, feature) in state.features().iter().enumerate() {
        let start = state.dx_offset(i);
        blocks.push(Block::new(format!("ZETA_{}", feature.id()), start, 2, true));
        blocks.push(Block::new(format!("RHO_{}", feature.id()), start + DX_RHO, 1, true));
    }
    blocks
}

pub fn input_blocks() -> Vec<Block> {
    vec![
        Block::new("ACC", U_ACC, 3, false),
        Block::new("GYRO", U_GYRO, 3, false),
    ]
}

fn perturbation(len: usize, k: usize, epsilon: f64) -> Vectord {
    let mut dx = Vectord::zeros(len);
    dx[k] = epsilon;
    dx
}

pub fn numerical_dfdx(
    state: &State,
    input: &Input,
    platform: &Platform,
    epsilon: f64,
) -> Result<Matrixd> {
    let n = state.dx_len();
    let mut jacobian = Matrixd::zeros(n, n);
    for k in 0..n {
        let dx = perturbation(n, k, epsilon);
        let plus = f(&state.boxplus(&dx)?, input, platform);
        let minus = f(&state.boxplus(&(-dx))?, input, platform);
        jacobian.set_column(k, &((plus - minus) / (2. * epsilon)));
    }
    Ok(jacobian)
}

pub fn numerical_dfdu(state: &State, input: &Input, platform: &Platform, epsilon: f64) -> Matrixd {
    let u = input.to_vector();
    let mut jacobian = Matrixd::zeros(state.dx_len(), U_LEN);
    for k in 0..U_LEN {
        let mut du = Vector6d::zeros();
        du[k] = epsilon;
        let plus = f(state, &Input::from_vector(&(u + du)), platform);
        let minus = f(state, &Input::from_vector(&(u - du)), platform);
        jacobian.set_column(k, &((plus - minus) / (2. * epsilon)));
    }
    jacobian
}

/// Central differences of `kind`, manifold outputs measured with their boxminus
pub fn numerical_h(
    kind: MeasurementKind,
    state: &State,
    input: &Input,
    platform: &Platform,
    epsilon: f64,
) -> Result<Matrixd> {
    let n = state.dx_len();
    let reference = predict(kind, state, Some(input), platform)?.value;
    let mut jacobian = Matrixd::zeros(kind.space().dim(), n);
    for k in 0..n {
        let dx = perturbation(n, k, epsilon);
        let plus = predict(kind, &state.boxplus(&dx)?, Some(input), platform)?.value;
        let minus = predict(kind, &state.boxplus(&(-dx))?, Some(input), platform)?.value;
        let diff = plus.innovation(&reference)? - minus.innovation(&reference)?;
        jacobian.set_column(k, &(diff / (2. * epsilon)));
    }
    Ok(jacobian)
}

fn compare<F>(
    name: String,
    analytical: &Matrixd,
    numerical: &Matrixd,
    rows: &[Block],
    cols: &[Block],
    tolerance: F,
) -> JacobianReport
where
    F: Fn(&Block) -> f64,
{
    let mut failures = vec![];
    let mut max_abs_error: f64 = 0.;
    for row in rows {
        for col in cols {
            let diff = analytical.view((row.start, col.start), (row.len, col.len))
                - numerical.view((row.start, col.start), (row.len, col.len));
            let error = diff.amax();
            max_abs_error = max_abs_error.max(error);
            let tol = tolerance(row);
            if !(error <= tol) {
                failures.push(BlockError {
                    row_block: row.name.clone(),
                    col_block: col.name.clone(),
                    max_abs_error: error,
                    tolerance: tol,
                });
            }
        }
    }
    JacobianReport {
        name,
        max_abs_error,
        failures,
    }
}

fn row_tolerance(row: &Block) -> f64 {
    if row.is_feature {
        FEATURE_TOLERANCE
    } else {
        VEHICLE_TOLERANCE
    }
}

pub fn measurement_tolerance(kind: &MeasurementKind) -> f64 {
    match kind {
        MeasurementKind::Bearing(_) => BEARING_TOLERANCE,
        MeasurementKind::Pixel(_) | MeasurementKind::PixelVel(_) => PIXEL_TOLERANCE,
        _ => VECTOR_TOLERANCE,
    }
}

pub fn check_dfdx(state: &State, input: &Input, platform: &Platform) -> Result<JacobianReport> {
    let analytical = dfdx(state, input, platform);
    let numerical = numerical_dfdx(state, input, platform, EPSILON)?;
    let blocks = error_state_blocks(state);
    Ok(compare("dfdx".into(), &analytical, &numerical, &blocks, &blocks, row_tolerance))
}

pub fn check_dfdu(state: &State, input: &Input, platform: &Platform) -> JacobianReport {
    let analytical = dfdu(state, platform);
    let numerical = numerical_dfdu(state, input, platform, EPSILON);
    compare(
        "dfdu".into(),
        &analytical,
        &numerical,
        &error_state_blocks(state),
        &input_blocks(),
        row_tolerance,
    )
}

pub fn check_measurement(
    kind: MeasurementKind,
    state: &State,
    input: &Input,
    platform: &Platform,
) -> Result<JacobianReport> {
    let analytical = predict(kind, state, Some(input), platform)?.jacobian;
    let numerical = numerical_h(kind, state, input, platform, EPSILON)?;
    let rows = [Block::new(kind.to_string(), 0, kind.space().dim(), false)];
    let tolerance = measurement_tolerance(&kind);
    Ok(compare(
        format!("h_{kind}"),
        &analytical,
        &numerical,
        &rows,
        &error_state_blocks(state),
        |_| tolerance,
    ))
}

/// Every measurement kind that applies to `state`
pub fn measurement_kinds(state: &State) -> Vec<MeasurementKind> {
    let mut kinds = vec![
        MeasurementKind::Acc,
        MeasurementKind::Alt,
        MeasurementKind::Att,
        MeasurementKind::Pos,
        MeasurementKind::Vel,
    ];
    for id in state.ids() {
        kinds.extend([
            MeasurementKind::Bearing(id),
            MeasurementKind::Pixel(id),
            MeasurementKind::PixelVel(id),
            MeasurementKind::Depth(id),
            MeasurementKind::InvDepth(id),
        ]);
    }
    kinds
}

pub fn check_all(state: &State, input: &Input, platform: &Platform) -> Result<Vec<JacobianReport>> {
    let mut reports = vec![check_dfdx(state, input, platform)?, check_dfdu(state, input, platform)];
    for kind in measurement_kinds(state) {
        reports.push(check_measurement(kind, state, input, platform)?);
    }
    Ok(reports)
}

fn random_vector<R: Rng>(rng: &mut R, scale: f64) -> Vector3d {
    Vector3d::new(
        rng.gen_range(-scale..scale),
        rng.gen_range(-scale..scale),
        rng.gen_range(-scale..scale),
    )
}

fn random_quaternion<R: Rng>(rng: &mut R) -> Quaterniond {
    quat_exp(&random_vector(rng, std::f64::consts::PI))
}

/// Random landmark bearing in front of the camera, with a random roll about
/// the bearing itself
pub fn random_bearing<R: Rng>(rng: &mut R) -> Quaterniond {
    let zeta = Vector3d::new(
        rng.gen_range(-0.4..0.4),
        rng.gen_range(-0.4..0.4),
        rng.gen_range(0.6..1.0),
    )
    .normalize();
    let roll = rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
    bearing_from_unit_vector(&zeta) * quat_exp(&Vector3d::new(0., 0., roll))
}

pub fn random_state<R: Rng>(rng: &mut R, num_features: usize) -> Result<State> {
    let vehicle = VehicleState {
        position: random_vector(rng, 100.),
        velocity: random_vector(rng, 10.),
        attitude: random_quaternion(rng),
        accel_bias: random_vector(rng, 0.5),
        gyro_bias: random_vector(rng, 0.1),
        mu: rng.gen_range(0.0..1.0),
    };
    let mut state = State::new(vehicle);
    for id in 0..num_features {
        let feature = FeatureState::new(id, random_bearing(rng), rng.gen_range(0.1..1.0));
        state.push_feature(feature)?;
    }
    Ok(state)
}

pub fn random_input<R: Rng>(rng: &mut R) -> Input {
    Input::new(random_vector(rng, 10.), random_vector(rng, 1.))
}

/// Camera intrinsics from `config`, random extrinsics
pub fn random_platform<R: Rng>(rng: &mut R, config: &Config) -> Platform {
    let model = PinholeModel::new(
        Vector2d::new(config.focal_length[0], config.focal_length[1]),
        Vector2d::new(config.image_center[0], config.image_center[1]),
    );
    let camera = Camera::new(
        Box::new(model),
        (config.image_width, config.image_height),
        random_quaternion(rng),
        random_vector(rng, 0.2),
    );
    Platform::new(config.gravity, config.use_drag_term(), camera)
}

/// Check every Jacobian on `trials` random states seeded from `config.seed`.
pub fn run(config: &Config, trials: usize, num_features: usize) -> Result<Vec<JacobianReport>> {
    config.validate()?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
    let mut reports = vec![];
    for _ in 0..trials {
        let platform = random_platform(&mut rng, config);
        let state = random_state(&mut rng, num_features)?;
        let input = random_input(&mut rng);
        reports.extend(check_all(&state, &input, &platform)?);
    }
    Ok(reports)
}
