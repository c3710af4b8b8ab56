use nalgebra as na;

use crate::my_types::*;

/// Quaternions further than this from unit norm get renormalized.
pub const NORM_TOLERANCE: f64 = 1e-9;

/// Below this angle exp/log switch to their first-order forms.
const SMALL_ANGLE: f64 = 1e-8;

/// slam book eq. 2.4
pub fn skew(v: &Vector3d) -> Matrix3d {
    let mut ss = Matrix3d::zeros();
    ss[(0, 1)] = -v[2];
    ss[(0, 2)] = v[1];
    ss[(1, 0)] = v[2];
    ss[(1, 2)] = -v[0];
    ss[(2, 0)] = -v[1];
    ss[(2, 1)] = v[0];
    ss
}

/// ref Quaternion kinematics for the error-state Kalman filter
/// eq. 115
///
/// Maps body vectors into the reference frame, same as `q * v`.
pub fn rotation_matrix(q: &Quaterniond) -> Matrix3d {
    let w = q.scalar();
    let v = q.imag();
    let (x, y, z) = (v[0], v[1], v[2]);
    Matrix3d::new(
        w*w + x*x - y*y - z*z, 2.*x*y - 2.*w*z, 2.*x*z + 2.*w*y,
        2.*x*y + 2.*w*z, w*w - x*x + y*y - z*z, 2.*y*z - 2.*w*x,
        2.*x*z - 2.*w*y, 2.*y*z + 2.*w*x, w*w - x*x - y*y + z*z,
    )
}

/// Exponential map from a rotation vector to a unit quaternion
pub fn quat_exp(delta: &Vector3d) -> Quaterniond {
    let theta = delta.norm();
    if theta < SMALL_ANGLE {
        let half = 0.5 * delta;
        return Quaterniond::from_quaternion(na::Quaternion::new(1., half[0], half[1], half[2]));
    }
    let scale = (0.5 * theta).sin() / theta;
    Quaterniond::from_quaternion(na::Quaternion::new(
        (0.5 * theta).cos(),
        scale * delta[0],
        scale * delta[1],
        scale * delta[2],
    ))
}

/// Logarithmic map, returns the shortest rotation vector.
///
/// Uses atan2 instead of acos(w) so tiny rotations keep full precision,
/// which the finite-difference checks depend on.
pub fn quat_log(q: &Quaterniond) -> Vector3d {
    let (w, v) = if q.scalar() < 0. {
        (-q.scalar(), -q.imag())
    } else {
        (q.scalar(), q.imag())
    };
    let n = v.norm();
    if n < SMALL_ANGLE {
        return 2. * v / w;
    }
    2. * n.atan2(w) * v / n
}

/// Right perturbation in the body frame, `q ⊗ exp(δ)`
pub fn quat_boxplus(q: &Quaterniond, delta: &Vector3d) -> Quaterniond {
    q * quat_exp(delta)
}

/// Rotation vector taking `q0` to `q1`, inverse of `quat_boxplus`
pub fn quat_boxminus(q1: &Quaterniond, q0: &Quaterniond) -> Vector3d {
    quat_log(&(q0.inverse() * q1))
}

/// Minimal rotation taking unit vector `a` onto unit vector `b`.
pub fn from_two_unit_vectors(a: &Vector3d, b: &Vector3d) -> Quaterniond {
    let d = a.dot(b);
    let c = a.cross(b);
    if c.norm() < 1e-12 {
        if d > 0. {
            return Quaterniond::identity();
        }
        // anti-parallel, any axis orthogonal to a works
        let mut axis = a.cross(&Vector3d::x());
        if axis.norm() < 1e-6 {
            axis = a.cross(&Vector3d::y());
        }
        let axis = axis.normalize();
        return Quaterniond::from_quaternion(na::Quaternion::new(0., axis[0], axis[1], axis[2]));
    }
    Quaterniond::from_quaternion(na::Quaternion::new(1. + d, c[0], c[1], c[2]))
}

/// Pack as `(w, x, y, z)`
pub fn quat_to_vector(q: &Quaterniond) -> Vector4d {
    let v = q.imag();
    Vector4d::new(q.scalar(), v[0], v[1], v[2])
}

/// Read a `(w, x, y, z)` block. `None` when the block cannot be normalized.
pub fn quat_from_vector(v: &Vector4d) -> Option<Quaterniond> {
    let n = v.norm();
    if !n.is_finite() || n < 1e-12 {
        return None;
    }
    Some(Quaterniond::new_unchecked(na::Quaternion::new(
        v[0] / n,
        v[1] / n,
        v[2] / n,
        v[3] / n,
    )))
}

/// Renormalize when accumulated rounding pushed `q` off the unit sphere.
/// Returns whether a correction was applied.
pub fn renormalize(q: &mut Quaterniond) -> bool {
    let n = q.quaternion().norm();
    if (n - 1.).abs() <= NORM_TOLERANCE {
        return false;
    }
    q.renormalize();
    true
}
