//! Filter state: a fixed vehicle block followed by one slot per landmark.
//!
//! Flat layout of `x` (`17 + 5N`) and of the error state `dx` (`16 + 3N`):
//!
//! | block  | x          | dx         |
//! |--------|------------|------------|
//! | POS    | 0..3       | 0..3       |
//! | VEL    | 3..6       | 3..6       |
//! | ATT    | 6..10      | 6..9       |
//! | B_A    | 10..13     | 9..12      |
//! | B_G    | 13..16     | 12..15     |
//! | MU     | 16         | 15         |
//! | ZETA_i | 17+5i..+4  | 16+3i..+2  |
//! | RHO_i  | 17+5i+4    | 16+3i+2    |

use std::collections::HashMap;

use log::debug;

use crate::bearing::*;
use crate::error::{EstimatorError, Result};
use crate::math::*;
use crate::my_types::*;

pub const X_POS: usize = 0;
pub const X_VEL: usize = 3;
pub const X_ATT: usize = 6;
pub const X_B_A: usize = 10;
pub const X_B_G: usize = 13;
pub const X_MU: usize = 16;
pub const X_FEATURES: usize = 17;
pub const X_FEATURE_LEN: usize = 5;

pub const DX_POS: usize = 0;
pub const DX_VEL: usize = 3;
pub const DX_ATT: usize = 6;
pub const DX_B_A: usize = 9;
pub const DX_B_G: usize = 12;
pub const DX_MU: usize = 15;
pub const DX_FEATURES: usize = 16;
pub const DX_FEATURE_LEN: usize = 3;

/// Offset of RHO inside a feature's error block
pub const DX_RHO: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct VehicleState {
    /// Position in the reference (NED) frame
    pub position: Vector3d,
    /// Velocity in the body frame
    pub velocity: Vector3d,
    /// Takes body vectors into the reference frame
    pub attitude: Quaterniond,
    pub accel_bias: Vector3d,
    pub gyro_bias: Vector3d,
    /// Linear drag coefficient on the horizontal body velocity
    pub mu: f64,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            position: Vector3d::zeros(),
            velocity: Vector3d::zeros(),
            attitude: Quaterniond::identity(),
            accel_bias: Vector3d::zeros(),
            gyro_bias: Vector3d::zeros(),
            mu: 0.,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureState {
    id: FeatureId,
    /// Bearing quaternion, the camera-frame direction is `bearing * e_z`
    pub bearing: Quaterniond,
    pub inv_depth: f64,
}

impl FeatureState {
    pub fn new(id: FeatureId, bearing: Quaterniond, inv_depth: f64) -> Self {
        Self {
            id,
            bearing,
            inv_depth,
        }
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn zeta(&self) -> Vector3d {
        zeta(&self.bearing)
    }

    pub fn depth(&self) -> f64 {
        1. / self.inv_depth
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub vehicle: VehicleState,
    features: Vec<FeatureState>,
    /// id -> slot index, rebuilt after every structural change
    slots: HashMap<FeatureId, usize>,
}

impl State {
    pub fn new(vehicle: VehicleState) -> Self {
        Self {
            vehicle,
            features: vec![],
            slots: HashMap::new(),
        }
    }

    pub fn len_features(&self) -> usize {
        self.features.len()
    }

    pub fn features(&self) -> &[FeatureState] {
        &self.features
    }

    /// Mutable access to the landmark values; ids and slot order stay fixed.
    pub fn features_mut(&mut self) -> impl Iterator<Item = (&mut Quaterniond, &mut f64)> {
        self.features
            .iter_mut()
            .map(|f| (&mut f.bearing, &mut f.inv_depth))
    }

    pub fn ids(&self) -> Vec<FeatureId> {
        self.features.iter().map(|f| f.id).collect()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn index_of(&self, id: FeatureId) -> Result<usize> {
        self.slots
            .get(&id)
            .copied()
            .ok_or(EstimatorError::UnknownFeatureId(id))
    }

    pub fn feature(&self, id: FeatureId) -> Result<&FeatureState> {
        Ok(&self.features[self.index_of(id)?])
    }

    pub fn x_len(&self) -> usize {
        X_FEATURES + X_FEATURE_LEN * self.features.len()
    }

    pub fn dx_len(&self) -> usize {
        DX_FEATURES + DX_FEATURE_LEN * self.features.len()
    }

    /// Start of slot `index` in `x`
    pub fn x_offset(&self, index: usize) -> usize {
        X_FEATURES + X_FEATURE_LEN * index
    }

    /// Start of slot `index` in `dx`
    pub fn dx_offset(&self, index: usize) -> usize {
        DX_FEATURES + DX_FEATURE_LEN * index
    }

    /// `(x, dx)` offsets of the feature with `id`
    pub fn feature_offsets(&self, id: FeatureId) -> Result<(usize, usize)> {
        let index = self.index_of(id)?;
        Ok((self.x_offset(index), self.dx_offset(index)))
    }

    pub(crate) fn push_feature(&mut self, feature: FeatureState) -> Result<()> {
        if self.contains(feature.id) {
            return Err(EstimatorError::DuplicateFeatureId(feature.id));
        }
        self.features.push(feature);
        self.rebuild_slots();
        Ok(())
    }

    pub(crate) fn remove_feature_at(&mut self, index: usize) -> FeatureState {
        let removed = self.features.remove(index);
        self.rebuild_slots();
        removed
    }

    fn rebuild_slots(&mut self) {
        self.slots = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
    }

    pub fn boxplus(&self, dx: &Vectord) -> Result<State> {
        if dx.len() != self.dx_len() {
            return Err(EstimatorError::dimension("state boxplus", self.dx_len(), dx.len()));
        }
        let v = &self.vehicle;
        let vehicle = VehicleState {
            position: v.position + dx.fixed_rows::<3>(DX_POS),
            velocity: v.velocity + dx.fixed_rows::<3>(DX_VEL),
            attitude: quat_boxplus(&v.attitude, &dx.fixed_rows::<3>(DX_ATT).into_owned()),
            accel_bias: v.accel_bias + dx.fixed_rows::<3>(DX_B_A),
            gyro_bias: v.gyro_bias + dx.fixed_rows::<3>(DX_B_G),
            mu: v.mu + dx[DX_MU],
        };
        let features = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let start = self.dx_offset(i);
                FeatureState {
                    id: f.id,
                    bearing: bearing_boxplus(&f.bearing, &dx.fixed_rows::<2>(start).into_owned()),
                    inv_depth: f.inv_depth + dx[start + DX_RHO],
                }
            })
            .collect();
        Ok(State {
            vehicle,
            features,
            slots: self.slots.clone(),
        })
    }

    /// `self ⊟ x0`. Both states must track the same ids in the same order.
    pub fn boxminus(&self, x0: &State) -> Result<Vectord> {
        if self.len_features() != x0.len_features() {
            return Err(EstimatorError::dimension("state boxminus", x0.dx_len(), self.dx_len()));
        }
        let mut dx = Vectord::zeros(self.dx_len());
        let (v1, v0) = (&self.vehicle, &x0.vehicle);
        dx.fixed_rows_mut::<3>(DX_POS)
            .copy_from(&(v1.position - v0.position));
        dx.fixed_rows_mut::<3>(DX_VEL)
            .copy_from(&(v1.velocity - v0.velocity));
        dx.fixed_rows_mut::<3>(DX_ATT)
            .copy_from(&quat_boxminus(&v1.attitude, &v0.attitude));
        dx.fixed_rows_mut::<3>(DX_B_A)
            .copy_from(&(v1.accel_bias - v0.accel_bias));
        dx.fixed_rows_mut::<3>(DX_B_G)
            .copy_from(&(v1.gyro_bias - v0.gyro_bias));
        dx[DX_MU] = v1.mu - v0.mu;
        for (i, (f1, f0)) in self.features.iter().zip(&x0.features).enumerate() {
            if f1.id != f0.id {
                return Err(EstimatorError::UnknownFeatureId(f1.id));
            }
            let start = self.dx_offset(i);
            dx.fixed_rows_mut::<2>(start)
                .copy_from(&bearing_boxminus(&f1.bearing, &f0.bearing));
            dx[start + DX_RHO] = f1.inv_depth - f0.inv_depth;
        }
        Ok(dx)
    }

    /// Flat `x` vector, quaternions packed as `(w, x, y, z)`
    pub fn to_vector(&self) -> Vectord {
        let mut x = Vectord::zeros(self.x_len());
        let v = &self.vehicle;
        x.fixed_rows_mut::<3>(X_POS).copy_from(&v.position);
        x.fixed_rows_mut::<3>(X_VEL).copy_from(&v.velocity);
        x.fixed_rows_mut::<4>(X_ATT)
            .copy_from(&quat_to_vector(&v.attitude));
        x.fixed_rows_mut::<3>(X_B_A).copy_from(&v.accel_bias);
        x.fixed_rows_mut::<3>(X_B_G).copy_from(&v.gyro_bias);
        x[X_MU] = v.mu;
        for (i, f) in self.features.iter().enumerate() {
            let start = self.x_offset(i);
            x.fixed_rows_mut::<4>(start)
                .copy_from(&quat_to_vector(&f.bearing));
            x[start + 4] = f.inv_depth;
        }
        x
    }

    /// Inverse of `to_vector`. `ids` names the landmark slots in order.
    pub fn from_vector(x: &Vectord, ids: &[FeatureId]) -> Result<State> {
        let expected = X_FEATURES + X_FEATURE_LEN * ids.len();
        if x.len() != expected {
            return Err(EstimatorError::dimension("state vector", expected, x.len()));
        }
        let quat = |start: usize, block: &str| {
            quat_from_vector(&x.fixed_rows::<4>(start).into_owned())
                .ok_or_else(|| EstimatorError::NonFiniteState(format!("{block} quaternion")))
        };
        let vehicle = VehicleState {
            position: x.fixed_rows::<3>(X_POS).into_owned(),
            velocity: x.fixed_rows::<3>(X_VEL).into_owned(),
            attitude: quat(X_ATT, "ATT")?,
            accel_bias: x.fixed_rows::<3>(X_B_A).into_owned(),
            gyro_bias: x.fixed_rows::<3>(X_B_G).into_owned(),
            mu: x[X_MU],
        };
        let mut state = State::new(vehicle);
        for (i, id) in ids.iter().enumerate() {
            let start = X_FEATURES + X_FEATURE_LEN * i;
            let bearing = quat(start, "ZETA")?;
            state.push_feature(FeatureState::new(*id, bearing, x[start + 4]))?;
        }
        Ok(state)
    }

    pub fn is_finite(&self) -> bool {
        let v = &self.vehicle;
        v.position.iter().all(|e| e.is_finite())
            && v.velocity.iter().all(|e| e.is_finite())
            && v.attitude.coords.iter().all(|e| e.is_finite())
            && v.accel_bias.iter().all(|e| e.is_finite())
            && v.gyro_bias.iter().all(|e| e.is_finite())
            && v.mu.is_finite()
            && self.features.iter().all(|f| {
                f.bearing.coords.iter().all(|e| e.is_finite()) && f.inv_depth.is_finite()
            })
    }

    /// Pull every quaternion back onto the unit sphere, returns how many moved.
    pub fn renormalize(&mut self) -> usize {
        let mut corrected = renormalize(&mut self.vehicle.attitude) as usize;
        for f in self.features.iter_mut() {
            if renormalize(&mut f.bearing) {
                debug!("renormalized bearing of feature {}", f.id);
                corrected += 1;
            }
        }
        corrected
    }

    pub fn depths(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.depth()).collect()
    }

    pub fn bearings(&self) -> Vec<Vector3d> {
        self.features.iter().map(|f| f.zeta()).collect()
    }
}
