//! Continuous-time error-state dynamics and their analytic Jacobians.
//!
//! `f` returns the rate of the error state, the filter integrates it as
//! `x ⊞ f(x, u)·dt`. `dfdx` and `dfdu` are the derivatives of that rate
//! taken through `⊞`, the same way the finite-difference checks in
//! `validation` perturb the state.

use crate::bearing::*;
use crate::math::*;
use crate::my_types::*;
use crate::platform::Platform;
use crate::state::*;

pub const U_ACC: usize = 0;
pub const U_GYRO: usize = 3;
pub const U_LEN: usize = 6;

/// One IMU sample, body frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Input {
    pub accel: Vector3d,
    pub gyro: Vector3d,
}

impl Input {
    pub fn new(accel: Vector3d, gyro: Vector3d) -> Self {
        Self { accel, gyro }
    }

    pub fn to_vector(&self) -> Vector6d {
        let mut u = Vector6d::zeros();
        u.fixed_rows_mut::<3>(U_ACC).copy_from(&self.accel);
        u.fixed_rows_mut::<3>(U_GYRO).copy_from(&self.gyro);
        u
    }

    pub fn from_vector(u: &Vector6d) -> Self {
        Self {
            accel: u.fixed_rows::<3>(U_ACC).into_owned(),
            gyro: u.fixed_rows::<3>(U_GYRO).into_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Derivatives {
    pub xdot: Vectord,
    pub dfdx: Matrixd,
    pub dfdu: Matrixd,
}

/// Quantities shared by `f` and both Jacobians
struct Kinematics {
    rot: Matrix3d,
    /// Bias-corrected angular rate
    omega: Vector3d,
    /// Bias-corrected specific force
    accel: Vector3d,
    /// Gravity in the body frame
    g_b: Vector3d,
    v_c: Vector3d,
    omega_c: Vector3d,
}

impl Kinematics {
    fn new(state: &State, input: &Input, platform: &Platform) -> Self {
        let vehicle = &state.vehicle;
        let rot = rotation_matrix(&vehicle.attitude);
        let omega = input.gyro - vehicle.gyro_bias;
        let (v_c, omega_c) = platform.camera.camera_twist(&vehicle.velocity, &omega);
        Self {
            rot,
            omega,
            accel: input.accel - vehicle.accel_bias,
            g_b: rot.transpose() * platform.gravity,
            v_c,
            omega_c,
        }
    }
}

fn e3e3t() -> Matrix3d {
    Matrix3d::from_diagonal(&Vector3d::new(0., 0., 1.))
}

/// Projection onto the body horizontal plane, where rotor drag acts
fn horizontal() -> Matrix3d {
    Matrix3d::from_diagonal(&Vector3d::new(1., 1., 0.))
}

pub fn dynamics(state: &State, input: &Input, platform: &Platform) -> Derivatives {
    let k = Kinematics::new(state, input, platform);
    Derivatives {
        xdot: rate(state, &k, platform),
        dfdx: rate_jacobian(state, &k, platform),
        dfdu: input_jacobian(state, platform),
    }
}

/// Error-state rate `f(x, u)`, length `16 + 3N`
pub fn f(state: &State, input: &Input, platform: &Platform) -> Vectord {
    rate(state, &Kinematics::new(state, input, platform), platform)
}

/// `∂f/∂dx`, `(16 + 3N)²`
pub fn dfdx(state: &State, input: &Input, platform: &Platform) -> Matrixd {
    rate_jacobian(state, &Kinematics::new(state, input, platform), platform)
}

/// `∂f/∂u`, `(16 + 3N) × 6`
/// The rate is affine in `u`, so this does not depend on the sample itself.
pub fn dfdu(state: &State, platform: &Platform) -> Matrixd {
    input_jacobian(state, platform)
}

fn rate(state: &State, k: &Kinematics, platform: &Platform) -> Vectord {
    let vehicle = &state.vehicle;
    let v = vehicle.velocity;
    let mut xdot = Vectord::zeros(state.dx_len());

    xdot.fixed_rows_mut::<3>(DX_POS).copy_from(&(k.rot * v));
    let vdot = if platform.use_drag_term {
        e3e3t() * k.accel + k.g_b - vehicle.mu * horizontal() * v - k.omega.cross(&v)
    } else {
        k.accel + k.g_b - k.omega.cross(&v)
    };
    xdot.fixed_rows_mut::<3>(DX_VEL).copy_from(&vdot);
    xdot.fixed_rows_mut::<3>(DX_ATT).copy_from(&k.omega);

    for (i, feature) in state.features().iter().enumerate() {
        let start = state.dx_offset(i);
        let zeta = feature.zeta();
        let rho = feature.inv_depth;
        let t = t_zeta(&feature.bearing);
        let zeta_dot = -t.transpose() * (k.omega_c + rho * zeta.cross(&k.v_c));
        xdot.fixed_rows_mut::<2>(start).copy_from(&zeta_dot);
        xdot[start + DX_RHO] = rho * rho * zeta.dot(&k.v_c);
    }
    xdot
}

fn rate_jacobian(state: &State, k: &Kinematics, platform: &Platform) -> Matrixd {
    let n = state.dx_len();
    let vehicle = &state.vehicle;
    let v = vehicle.velocity;
    let mut a = Matrixd::zeros(n, n);

    a.fixed_view_mut::<3, 3>(DX_POS, DX_VEL).copy_from(&k.rot);
    a.fixed_view_mut::<3, 3>(DX_POS, DX_ATT)
        .copy_from(&(-k.rot * skew(&v)));

    if platform.use_drag_term {
        a.fixed_view_mut::<3, 3>(DX_VEL, DX_VEL)
            .copy_from(&(-vehicle.mu * horizontal() - skew(&k.omega)));
        a.fixed_view_mut::<3, 3>(DX_VEL, DX_B_A)
            .copy_from(&(-e3e3t()));
        a.fixed_view_mut::<3, 1>(DX_VEL, DX_MU)
            .copy_from(&(-horizontal() * v));
    } else {
        a.fixed_view_mut::<3, 3>(DX_VEL, DX_VEL)
            .copy_from(&(-skew(&k.omega)));
        a.fixed_view_mut::<3, 3>(DX_VEL, DX_B_A)
            .copy_from(&(-Matrix3d::identity()));
    }
    a.fixed_view_mut::<3, 3>(DX_VEL, DX_ATT)
        .copy_from(&skew(&k.g_b));
    a.fixed_view_mut::<3, 3>(DX_VEL, DX_B_G)
        .copy_from(&(-skew(&v)));

    a.fixed_view_mut::<3, 3>(DX_ATT, DX_B_G)
        .copy_from(&(-Matrix3d::identity()));

    let rot_c_b = *platform.camera.rot_c_b();
    let p_skew = skew(&platform.camera.p_b_c);
    for (i, feature) in state.features().iter().enumerate() {
        let start = state.dx_offset(i);
        let rho_idx = start + DX_RHO;
        let zeta = feature.zeta();
        let zeta_skew = skew(&zeta);
        let rho = feature.inv_depth;
        let t = t_zeta(&feature.bearing);
        let tt = t.transpose();
        let w = k.omega_c + rho * zeta.cross(&k.v_c);

        // bearing rows
        a.fixed_view_mut::<2, 3>(start, DX_VEL)
            .copy_from(&(-rho * tt * zeta_skew * rot_c_b));
        a.fixed_view_mut::<2, 3>(start, DX_B_G)
            .copy_from(&(tt * (rot_c_b - rho * zeta_skew * rot_c_b * p_skew)));
        a.fixed_view_mut::<2, 2>(start, start)
            .copy_from(&(-tt * (skew(&w) + rho * skew(&k.v_c) * zeta_skew) * t));
        a.fixed_view_mut::<2, 1>(start, rho_idx)
            .copy_from(&(-tt * zeta.cross(&k.v_c)));

        // inverse depth row
        let rho2 = rho * rho;
        a.fixed_view_mut::<1, 3>(rho_idx, DX_VEL)
            .copy_from(&(rho2 * zeta.transpose() * rot_c_b));
        a.fixed_view_mut::<1, 3>(rho_idx, DX_B_G)
            .copy_from(&(rho2 * zeta.transpose() * rot_c_b * p_skew));
        a.fixed_view_mut::<1, 2>(rho_idx, start)
            .copy_from(&(-rho2 * k.v_c.transpose() * zeta_skew * t));
        a[(rho_idx, rho_idx)] = 2. * rho * zeta.dot(&k.v_c);
    }
    a
}

fn input_jacobian(state: &State, platform: &Platform) -> Matrixd {
    let v = state.vehicle.velocity;
    let mut g = Matrixd::zeros(state.dx_len(), U_LEN);

    let dvel_dacc = if platform.use_drag_term {
        e3e3t()
    } else {
        Matrix3d::identity()
    };
    g.fixed_view_mut::<3, 3>(DX_VEL, U_ACC)
        .copy_from(&dvel_dacc);
    g.fixed_view_mut::<3, 3>(DX_VEL, U_GYRO)
        .copy_from(&skew(&v));
    g.fixed_view_mut::<3, 3>(DX_ATT, U_GYRO)
        .copy_from(&Matrix3d::identity());

    let rot_c_b = *platform.camera.rot_c_b();
    let p_skew = skew(&platform.camera.p_b_c);
    for (i, feature) in state.features().iter().enumerate() {
        let start = state.dx_offset(i);
        let zeta = feature.zeta();
        let rho = feature.inv_depth;
        let tt = t_zeta(&feature.bearing).transpose();
        g.fixed_view_mut::<2, 3>(start, U_GYRO)
            .copy_from(&(-tt * (rot_c_b - rho * skew(&zeta) * rot_c_b * p_skew)));
        g.fixed_view_mut::<1, 3>(start + DX_RHO, U_GYRO)
            .copy_from(&(-rho * rho * zeta.transpose() * rot_c_b * p_skew));
    }
    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::config::Config;

    fn hover_state(mu: f64) -> State {
        State::new(VehicleState {
            mu,
            ..Default::default()
        })
    }

    #[test]
    fn test_free_fall() {
        let platform = Platform::from_config(&Config::default()).unwrap();
        let state = hover_state(0.2);
        let input = Input::new(Vector3d::new(0., 0., -9.80665), Vector3d::zeros());
        let xdot = f(&state, &input, &platform);
        assert!(xdot.fixed_rows::<3>(DX_VEL).norm() < 1e-12);
        assert!(xdot.fixed_rows::<3>(DX_ATT).norm() < 1e-12);
        assert!(xdot.fixed_rows::<3>(DX_POS).norm() < 1e-12);
    }

    #[test]
    fn test_drag_slows_horizontal_velocity() {
        let platform = Platform::from_config(&Config::default()).unwrap();
        let mut state = hover_state(0.5);
        state.vehicle.velocity = Vector3d::new(2., -1., 0.);
        let input = Input::new(Vector3d::new(0., 0., -9.80665), Vector3d::zeros());
        let xdot = f(&state, &input, &platform);
        assert!((xdot.fixed_rows::<3>(DX_VEL) - Vector3d::new(-1., 0.5, 0.)).norm() < 1e-12);
    }

    #[test]
    fn test_input_round_trip() {
        let input = Input::new(Vector3d::new(1., 2., 3.), Vector3d::new(4., 5., 6.));
        let u = input.to_vector();
        assert_eq!(u[U_GYRO], 4.);
        assert_eq!(Input::from_vector(&u), input);
    }

    #[test]
    fn test_feature_rate_static_camera() {
        // pure rotation about the optical axis leaves a centered bearing fixed
        let camera = Camera::from_config(&Config::default()).unwrap();
        let platform = Platform::new(9.80665, true, camera);
        let mut state = hover_state(0.);
        state
            .push_feature(FeatureState::new(0, Quaterniond::identity(), 0.5))
            .unwrap();
        let input = Input::new(Vector3d::new(0., 0., -9.80665), Vector3d::new(0., 0., 0.3));
        let xdot = f(&state, &input, &platform);
        let start = state.dx_offset(0);
        assert!(xdot.fixed_rows::<3>(start).norm() < 1e-12);
    }

    #[test]
    fn test_dimensions() {
        let platform = Platform::from_config(&Config::default()).unwrap();
        let mut state = hover_state(0.1);
        for id in 0..3 {
            state
                .push_feature(FeatureState::new(id, Quaterniond::identity(), 0.5))
                .unwrap();
        }
        let input = Input::new(Vector3d::new(0.1, 0.2, -9.), Vector3d::new(0.01, 0.02, 0.03));
        let d = dynamics(&state, &input, &platform);
        assert_eq!(d.xdot.len(), 25);
        assert_eq!(d.dfdx.shape(), (25, 25));
        assert_eq!(d.dfdu.shape(), (25, 6));
    }
}
