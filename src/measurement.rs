//! Measurement models. Each returns the predicted measurement together with
//! its Jacobian w.r.t. the error state.
//!
//! Every kind declares the space its output lives in. Innovations for
//! attitude and bearing measurements go through the matching boxminus and
//! their Jacobians are expressed in that tangent space.

use std::fmt;

use crate::bearing::*;
use crate::dynamics::Input;
use crate::error::{EstimatorError, Result};
use crate::math::*;
use crate::my_types::*;
use crate::platform::Platform;
use crate::state::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    /// Specific force under the drag model
    Acc,
    /// Altitude, `-z` in NED
    Alt,
    Att,
    Pos,
    /// Body frame velocity
    Vel,
    Bearing(FeatureId),
    Pixel(FeatureId),
    PixelVel(FeatureId),
    Depth(FeatureId),
    InvDepth(FeatureId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementSpace {
    Vector(usize),
    Rotation,
    Bearing,
}

impl MeasurementSpace {
    /// Residual dimension
    pub fn dim(&self) -> usize {
        match self {
            MeasurementSpace::Vector(n) => *n,
            MeasurementSpace::Rotation => 3,
            MeasurementSpace::Bearing => 2,
        }
    }
}

impl MeasurementKind {
    pub fn space(&self) -> MeasurementSpace {
        match self {
            MeasurementKind::Acc | MeasurementKind::Pos | MeasurementKind::Vel => {
                MeasurementSpace::Vector(3)
            }
            MeasurementKind::Alt | MeasurementKind::Depth(_) | MeasurementKind::InvDepth(_) => {
                MeasurementSpace::Vector(1)
            }
            MeasurementKind::Pixel(_) | MeasurementKind::PixelVel(_) => MeasurementSpace::Vector(2),
            MeasurementKind::Att => MeasurementSpace::Rotation,
            MeasurementKind::Bearing(_) => MeasurementSpace::Bearing,
        }
    }

    pub fn feature_id(&self) -> Option<FeatureId> {
        match self {
            MeasurementKind::Bearing(id)
            | MeasurementKind::Pixel(id)
            | MeasurementKind::PixelVel(id)
            | MeasurementKind::Depth(id)
            | MeasurementKind::InvDepth(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::Acc => write!(f, "acc"),
            MeasurementKind::Alt => write!(f, "alt"),
            MeasurementKind::Att => write!(f, "att"),
            MeasurementKind::Pos => write!(f, "pos"),
            MeasurementKind::Vel => write!(f, "vel"),
            MeasurementKind::Bearing(id) => write!(f, "bearing[{id}]"),
            MeasurementKind::Pixel(id) => write!(f, "pixel[{id}]"),
            MeasurementKind::PixelVel(id) => write!(f, "pixel_vel[{id}]"),
            MeasurementKind::Depth(id) => write!(f, "depth[{id}]"),
            MeasurementKind::InvDepth(id) => write!(f, "inv_depth[{id}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementValue {
    Vector(Vectord),
    Rotation(Quaterniond),
    Bearing(Quaterniond),
}

impl MeasurementValue {
    pub fn space(&self) -> MeasurementSpace {
        match self {
            MeasurementValue::Vector(v) => MeasurementSpace::Vector(v.len()),
            MeasurementValue::Rotation(_) => MeasurementSpace::Rotation,
            MeasurementValue::Bearing(_) => MeasurementSpace::Bearing,
        }
    }

    /// `self ⊟ predicted`
    pub fn innovation(&self, predicted: &MeasurementValue) -> Result<Vectord> {
        match (self, predicted) {
            (MeasurementValue::Vector(z), MeasurementValue::Vector(zhat))
                if z.len() == zhat.len() =>
            {
                Ok(z - zhat)
            }
            (MeasurementValue::Rotation(q), MeasurementValue::Rotation(qhat)) => {
                Ok(Vectord::from_column_slice(quat_boxminus(q, qhat).as_slice()))
            }
            (MeasurementValue::Bearing(q), MeasurementValue::Bearing(qhat)) => {
                Ok(Vectord::from_column_slice(bearing_boxminus(q, qhat).as_slice()))
            }
            _ => Err(EstimatorError::dimension(
                "measurement space",
                predicted.space().dim(),
                self.space().dim(),
            )),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            MeasurementValue::Vector(v) => v.iter().all(|e| e.is_finite()),
            MeasurementValue::Rotation(q) | MeasurementValue::Bearing(q) => {
                q.coords.iter().all(|e| e.is_finite())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: MeasurementValue,
    /// `dim × (16 + 3N)`
    pub jacobian: Matrixd,
}

impl Prediction {
    fn vector(value: Vectord, jacobian: Matrixd) -> Self {
        Self {
            value: MeasurementValue::Vector(value),
            jacobian,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.jacobian.iter().all(|e| e.is_finite())
    }
}

/// Dispatch to the model for `kind`. `input` is the latest IMU sample, only
/// pixel velocity needs it.
pub fn predict(
    kind: MeasurementKind,
    state: &State,
    input: Option<&Input>,
    platform: &Platform,
) -> Result<Prediction> {
    let prediction = match kind {
        MeasurementKind::Acc => h_acc(state, platform),
        MeasurementKind::Alt => h_alt(state),
        MeasurementKind::Att => h_att(state),
        MeasurementKind::Pos => h_pos(state),
        MeasurementKind::Vel => h_vel(state),
        MeasurementKind::Bearing(id) => h_feat(state, id)?,
        MeasurementKind::Pixel(id) => h_pixel(state, id, platform)?,
        MeasurementKind::Depth(id) => h_depth(state, id)?,
        MeasurementKind::InvDepth(id) => h_inv_depth(state, id)?,
        MeasurementKind::PixelVel(id) => {
            let input = input.ok_or_else(|| EstimatorError::MissingInput(kind.to_string()))?;
            h_pixel_vel(state, id, input, platform)?
        }
    };
    if !prediction.is_finite() {
        return Err(EstimatorError::NonFiniteState(format!("prediction of {kind}")));
    }
    Ok(prediction)
}

/// Accelerometer under rotor drag: `b_a − μ P v − e3 e3ᵀ Rᵀ g`.
/// Uses the drag model whether or not propagation does.
pub fn h_acc(state: &State, platform: &Platform) -> Prediction {
    let vehicle = &state.vehicle;
    let v = vehicle.velocity;
    let horizontal = Matrix3d::from_diagonal(&Vector3d::new(1., 1., 0.));
    let e3e3t = Matrix3d::from_diagonal(&Vector3d::new(0., 0., 1.));
    let g_b = vehicle.attitude.inverse() * platform.gravity;

    let z = vehicle.accel_bias - vehicle.mu * horizontal * v - e3e3t * g_b;
    let mut h = Matrixd::zeros(3, state.dx_len());
    h.fixed_view_mut::<3, 3>(0, DX_VEL)
        .copy_from(&(-vehicle.mu * horizontal));
    h.fixed_view_mut::<3, 3>(0, DX_ATT)
        .copy_from(&(-e3e3t * skew(&g_b)));
    h.fixed_view_mut::<3, 3>(0, DX_B_A)
        .copy_from(&Matrix3d::identity());
    h.fixed_view_mut::<3, 1>(0, DX_MU)
        .copy_from(&(-horizontal * v));
    Prediction::vector(Vectord::from_column_slice(z.as_slice()), h)
}

pub fn h_pos(state: &State) -> Prediction {
    let mut h = Matrixd::zeros(3, state.dx_len());
    h.fixed_view_mut::<3, 3>(0, DX_POS)
        .copy_from(&Matrix3d::identity());
    let p = state.vehicle.position;
    Prediction::vector(Vectord::from_column_slice(p.as_slice()), h)
}

pub fn h_vel(state: &State) -> Prediction {
    let mut h = Matrixd::zeros(3, state.dx_len());
    h.fixed_view_mut::<3, 3>(0, DX_VEL)
        .copy_from(&Matrix3d::identity());
    let v = state.vehicle.velocity;
    Prediction::vector(Vectord::from_column_slice(v.as_slice()), h)
}

pub fn h_alt(state: &State) -> Prediction {
    let mut h = Matrixd::zeros(1, state.dx_len());
    h[(0, DX_POS + 2)] = -1.;
    Prediction::vector(Vectord::from_element(1, -state.vehicle.position[2]), h)
}

pub fn h_att(state: &State) -> Prediction {
    let mut h = Matrixd::zeros(3, state.dx_len());
    h.fixed_view_mut::<3, 3>(0, DX_ATT)
        .copy_from(&Matrix3d::identity());
    Prediction {
        value: MeasurementValue::Rotation(state.vehicle.attitude),
        jacobian: h,
    }
}

pub fn h_feat(state: &State, id: FeatureId) -> Result<Prediction> {
    let (_, start) = state.feature_offsets(id)?;
    let mut h = Matrixd::zeros(2, state.dx_len());
    h.fixed_view_mut::<2, 2>(0, start)
        .copy_from(&Matrix2d::identity());
    Ok(Prediction {
        value: MeasurementValue::Bearing(state.feature(id)?.bearing),
        jacobian: h,
    })
}

pub fn h_pixel(state: &State, id: FeatureId, platform: &Platform) -> Result<Prediction> {
    let (_, start) = state.feature_offsets(id)?;
    let feature = state.feature(id)?;
    let (pixel, derivative) = platform
        .camera
        .model
        .project_with_derivative(feature.zeta(), true);
    let (pixel, derivative) = match (pixel, derivative) {
        (Some(pixel), Some(derivative)) => (pixel, derivative),
        _ => return Err(EstimatorError::FeatureOutOfView(id)),
    };
    let mut h = Matrixd::zeros(2, state.dx_len());
    h.fixed_view_mut::<2, 2>(0, start)
        .copy_from(&(derivative * dzeta_ddelta(&feature.bearing)));
    Ok(Prediction::vector(Vectord::from_column_slice(pixel.as_slice()), h))
}

pub fn h_depth(state: &State, id: FeatureId) -> Result<Prediction> {
    let (_, start) = state.feature_offsets(id)?;
    let rho = state.feature(id)?.inv_depth;
    if rho == 0. || !rho.is_finite() {
        return Err(EstimatorError::NonFiniteState(format!("depth of feature {id}")));
    }
    let mut h = Matrixd::zeros(1, state.dx_len());
    h[(0, start + DX_RHO)] = -1. / (rho * rho);
    Ok(Prediction::vector(Vectord::from_element(1, 1. / rho), h))
}

pub fn h_inv_depth(state: &State, id: FeatureId) -> Result<Prediction> {
    let (_, start) = state.feature_offsets(id)?;
    let mut h = Matrixd::zeros(1, state.dx_len());
    h[(0, start + DX_RHO)] = 1.;
    Ok(Prediction::vector(
        Vectord::from_element(1, state.feature(id)?.inv_depth),
        h,
    ))
}

/// Optical flow of landmark `id`: the image-plane velocity its projection
/// has while the camera moves with the current velocity and `input` rate.
pub fn h_pixel_vel(
    state: &State,
    id: FeatureId,
    input: &Input,
    platform: &Platform,
) -> Result<Prediction> {
    let (_, start) = state.feature_offsets(id)?;
    let feature = state.feature(id)?;
    let vehicle = &state.vehicle;
    let camera = &platform.camera;

    let zeta = feature.zeta();
    let s = zeta[2];
    if s <= 0. {
        return Err(EstimatorError::FeatureOutOfView(id));
    }
    let rho = feature.inv_depth;
    let omega = input.gyro - vehicle.gyro_bias;
    let (v_c, omega_c) = camera.camera_twist(&vehicle.velocity, &omega);
    let rot_c_b = *camera.rot_c_b();
    let e3 = Vector3d::z();

    // pixel = F [I 0] ζ / s + c, so the flow is -F [I 0] y with y = J_n m
    let mut fp = Matrix23d::zeros();
    fp.fixed_view_mut::<2, 2>(0, 0)
        .copy_from(&camera.model.focal_matrix());
    let m = omega_c.cross(&zeta) + rho * v_c;
    let m_z = m[2];
    let s2 = s * s;
    let y = m / s - zeta * m_z / s2;
    let j = fp * (Matrix3d::identity() / s - zeta * e3.transpose() / s2);

    let omega_skew = skew(&omega_c);
    let dy_dzeta = omega_skew / s - m * e3.transpose() / s2 - Matrix3d::identity() * (m_z / s2)
        - zeta * (e3.transpose() * omega_skew) / s2
        + 2. * m_z * zeta * e3.transpose() / (s2 * s);

    let mut h = Matrixd::zeros(2, state.dx_len());
    h.fixed_view_mut::<2, 3>(0, DX_VEL)
        .copy_from(&(-rho * j * rot_c_b));
    h.fixed_view_mut::<2, 3>(0, DX_B_G).copy_from(
        &(-j * (skew(&zeta) * rot_c_b + rho * rot_c_b * skew(&camera.p_b_c))),
    );
    h.fixed_view_mut::<2, 2>(0, start)
        .copy_from(&(-fp * dy_dzeta * dzeta_ddelta(&feature.bearing)));
    h.fixed_view_mut::<2, 1>(0, start + DX_RHO)
        .copy_from(&(-j * v_c));

    let flow = -fp * y;
    Ok(Prediction::vector(Vectord::from_column_slice(flow.as_slice()), h))
}
