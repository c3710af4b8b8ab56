//! Unit bearing vectors (S²) stored as quaternions.
//!
//! A bearing quaternion `q` encodes the direction `ζ = q ⊗ e_z`. Rotations
//! about ζ itself do not change the bearing, so the tangent space is the
//! two dimensional plane spanned by `T(q) = [q ⊗ e_x, q ⊗ e_y]`.

use std::f64::consts::PI;

use crate::math::*;
use crate::my_types::*;

/// Unit bearing `q ⊗ e_z`
pub fn zeta(q: &Quaterniond) -> Vector3d {
    q * Vector3d::z()
}

/// Orthonormal basis of the plane orthogonal to the bearing
pub fn t_zeta(q: &Quaterniond) -> Matrix32d {
    let r = rotation_matrix(q);
    r.fixed_view::<3, 2>(0, 0).into_owned()
}

/// Derivative of the bearing vector w.r.t. its 2D error state
pub fn dzeta_ddelta(q: &Quaterniond) -> Matrix32d {
    -skew(&zeta(q)) * t_zeta(q)
}

pub fn bearing_boxplus(q: &Quaterniond, delta: &Vector2d) -> Quaterniond {
    quat_boxplus(q, &Vector3d::new(delta[0], delta[1], 0.))
}

/// Tangent vector taking the bearing of `q0` onto the bearing of `q1`,
/// expressed in the basis of `q0`.
pub fn bearing_boxminus(q1: &Quaterniond, q0: &Quaterniond) -> Vector2d {
    let zeta0 = zeta(q0);
    let zeta1 = zeta(q1);
    let c = zeta0.cross(&zeta1);
    let s = c.norm();
    let d = zeta0.dot(&zeta1);
    if s < 1e-14 {
        if d > 0. {
            return Vector2d::zeros();
        }
        return Vector2d::new(PI, 0.);
    }
    let theta = s.atan2(d);
    t_zeta(q0).transpose() * (theta * c / s)
}

/// Bearing quaternion pointing along a unit vector in the camera frame
pub fn bearing_from_unit_vector(zeta: &Vector3d) -> Quaterniond {
    from_two_unit_vectors(&Vector3d::z(), zeta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn random_bearing(rng: &mut Xoshiro256PlusPlus) -> Quaterniond {
        quat_exp(&Vector3d::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ))
    }

    #[test]
    fn test_t_zeta_is_orthogonal_to_bearing() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        for _ in 0..100 {
            let v = Vector3d::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
            .normalize();
            let q = bearing_from_unit_vector(&v);
            assert!((zeta(&q) - v).norm() < 1e-10);
            assert!((t_zeta(&q).transpose() * v).norm() < 1e-10);
            assert!((t_zeta(&q).transpose() * t_zeta(&q) - Matrix2d::identity()).norm() < 1e-10);
        }
    }

    #[test]
    fn test_dtdq() {
        // derivative of T(q)^T v through the bearing boxplus
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let epsilon = 1e-6;
        for _ in 0..100 {
            let q = random_bearing(&mut rng);
            let v = Vector3d::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let t = t_zeta(&q);
            let analytical = t.transpose() * skew(&v) * t;
            let mut numerical = Matrix2d::zeros();
            for i in 0..2 {
                let mut d = Vector2d::zeros();
                d[i] = epsilon;
                let plus = t_zeta(&bearing_boxplus(&q, &d)).transpose() * v;
                let minus = t_zeta(&bearing_boxplus(&q, &(-d))).transpose() * v;
                numerical.set_column(i, &((plus - minus) / (2. * epsilon)));
            }
            assert!((analytical - numerical).norm() < 1e-6);
        }
    }

    #[test]
    fn test_dzeta_ddelta() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let epsilon = 1e-6;
        for _ in 0..50 {
            let q = random_bearing(&mut rng);
            let mut numerical = Matrix32d::zeros();
            for i in 0..2 {
                let mut d = Vector2d::zeros();
                d[i] = epsilon;
                let diff = zeta(&bearing_boxplus(&q, &d)) - zeta(&bearing_boxplus(&q, &(-d)));
                numerical.set_column(i, &(diff / (2. * epsilon)));
            }
            assert!((dzeta_ddelta(&q) - numerical).norm() < 1e-8);
        }
    }

    #[test]
    fn test_dqzeta_dqzeta() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let epsilon = 1e-6;
        for j in 0..100 {
            let q = if j == 0 {
                Quaterniond::identity()
            } else {
                random_bearing(&mut rng)
            };
            let mut d_dqdq = Matrix2d::zeros();
            for i in 0..2 {
                let mut d = Vector2d::zeros();
                d[i] = epsilon;
                let dq = bearing_boxminus(&bearing_boxplus(&q, &d), &q);
                d_dqdq.set_column(i, &(dq / epsilon));
            }
            let a_dqdq = t_zeta(&q).transpose() * t_zeta(&q);
            assert!((a_dqdq - d_dqdq).norm() < 1e-6);
        }
    }

    #[test]
    fn test_manifold_operations() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        for _ in 0..100 {
            let x = random_bearing(&mut rng);
            let y = random_bearing(&mut rng);
            let dx = Vector2d::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)) / 2.;

            assert!(bearing_boxplus(&x, &Vector2d::zeros()).angle_to(&x) < 1e-12);
            let back = bearing_boxplus(&x, &bearing_boxminus(&y, &x));
            assert!((zeta(&back) - zeta(&y)).norm() < 1e-10);
            assert!((bearing_boxminus(&bearing_boxplus(&x, &dx), &x) - dx).norm() < 1e-10);
        }
    }

    #[test]
    fn test_opposite_bearings() {
        let q = Quaterniond::identity();
        let flipped = bearing_from_unit_vector(&(-Vector3d::z()));
        let d = bearing_boxminus(&flipped, &q);
        assert!((d.norm() - PI).abs() < 1e-12);
        assert!((zeta(&bearing_boxplus(&q, &d)) + Vector3d::z()).norm() < 1e-10);
    }
}
