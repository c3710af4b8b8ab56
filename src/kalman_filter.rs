use log::{debug, info, warn};

use crate::bearing::*;
use crate::config::Config;
use crate::dynamics::*;
use crate::error::{EstimatorError, Result};
use crate::feature::*;
use crate::math::renormalize;
use crate::measurement::*;
use crate::my_types::*;
use crate::platform::Platform;
use crate::state::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    Applied,
    /// Rejected by the Mahalanobis gate, carries the squared distance
    Gated(f64),
}

/// Error-state EKF owning the state and its covariance.
///
/// `propagate`, `update` and the feature calls are the only ways to change
/// either. Each of them builds the new state and covariance first and only
/// commits both once every check passed.
#[derive(Debug)]
pub struct KalmanFilter {
    state: State,
    covariance: Matrixd,
    platform: Platform,
    features: FeatureManager,
    config: Config,
    qu: Matrixd,
    time: Option<f64>,
    last_input: Option<Input>,
}

impl KalmanFilter {
    pub fn new(initial: VehicleState, config: Config) -> Result<Self> {
        config.validate()?;
        let platform = Platform::from_config(&config)?;
        let covariance = Matrixd::from_diagonal(&config.p0_vehicle());
        let qu = config.qu();
        let mut state = State::new(initial);
        state.renormalize();
        Ok(Self {
            state,
            covariance,
            platform,
            features: FeatureManager::new(config.removal_policy()),
            qu: Matrixd::from_column_slice(U_LEN, U_LEN, qu.as_slice()),
            config,
            time: None,
            last_input: None,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn covariance(&self) -> &Matrixd {
        &self.covariance
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn feature_manager(&self) -> &FeatureManager {
        &self.features
    }

    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn last_input(&self) -> Option<&Input> {
        self.last_input.as_ref()
    }

    /// Propagate to `time` with the IMU sample taken at `time`. The first
    /// sample only sets the clock.
    pub fn propagate(&mut self, time: f64, input: Input) -> Result<()> {
        let Some(last_time) = self.time else {
            self.time = Some(time);
            self.last_input = Some(input);
            return Ok(());
        };
        let dt = time - last_time;
        if dt <= 0. {
            warn!("skipping propagation with non-positive dt {dt}");
            self.last_input = Some(input);
            return Ok(());
        }
        self.step(&input, dt)?;
        self.time = Some(time);
        self.last_input = Some(input);
        Ok(())
    }

    /// One Euler step of length `dt`
    pub fn step(&mut self, input: &Input, dt: f64) -> Result<()> {
        let derivatives = dynamics(&self.state, input, &self.platform);
        let mut state = self.state.boxplus(&(derivatives.xdot * dt))?;

        let a = &derivatives.dfdx;
        let g = &derivatives.dfdu;
        let p = &self.covariance;
        let p_dot = a * p + p * a.transpose() + g * &self.qu * g.transpose() + self.process_noise();
        let covariance = symmetrize(p + p_dot * dt);

        if !state.is_finite() || !is_finite(&covariance) {
            return Err(EstimatorError::NonFiniteState("propagation".into()));
        }
        let corrected = state.renormalize();
        if corrected > 0 {
            debug!("renormalized {corrected} quaternions after propagation");
        }
        self.state = state;
        self.covariance = covariance;
        self.enforce_depth_constraint();
        Ok(())
    }

    fn process_noise(&self) -> Matrixd {
        let mut diagonal = Vectord::zeros(self.state.dx_len());
        diagonal
            .rows_mut(0, DX_FEATURES)
            .copy_from(&self.config.qx_vehicle());
        let qx_feature = self.config.qx_feature();
        for i in 0..self.state.len_features() {
            diagonal
                .fixed_rows_mut::<3>(self.state.dx_offset(i))
                .copy_from(&qx_feature);
        }
        Matrixd::from_diagonal(&diagonal)
    }

    /// Partial update gains, one per error state
    fn gamma(&self) -> Vectord {
        let mut gamma = Vectord::from_element(self.state.dx_len(), self.config.gamma_feature);
        gamma
            .rows_mut(0, DX_FEATURES)
            .fill(self.config.gamma_vehicle);
        gamma
    }

    /// Kalman update with measurement `z` of `kind`. `noise` overrides the
    /// configured measurement covariance.
    pub fn update(
        &mut self,
        kind: MeasurementKind,
        z: &MeasurementValue,
        noise: Option<&Matrixd>,
    ) -> Result<UpdateOutcome> {
        if z.space() != kind.space() {
            return Err(EstimatorError::dimension(
                "measurement",
                kind.space().dim(),
                z.space().dim(),
            ));
        }
        let prediction = predict(kind, &self.state, self.last_input.as_ref(), &self.platform)?;
        if let MeasurementKind::Bearing(id) | MeasurementKind::Pixel(id) = kind {
            self.features.observe(id);
        }

        let dim = kind.space().dim();
        let r = match noise {
            Some(r) if r.shape() != (dim, dim) => {
                return Err(EstimatorError::dimension("measurement noise", dim, r.nrows()));
            }
            Some(r) => r.clone(),
            None => self.config.measurement_noise(&kind),
        };

        let residual = z.innovation(&prediction.value)?;
        let h = &prediction.jacobian;
        let p = &self.covariance;
        let s = h * p * h.transpose() + r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| EstimatorError::SingularInnovation(kind.to_string()))?;

        if let Some(gate) = self.config.mahalanobis_gate {
            let distance = (residual.transpose() * &s_inv * &residual)[(0, 0)];
            if distance > gate {
                debug!("gating {kind}, mahalanobis distance {distance:.2}");
                return Ok(UpdateOutcome::Gated(distance));
            }
        }

        let k = p * h.transpose() * s_inv;
        let gamma = self.gamma();
        let dx = gamma.component_mul(&(&k * residual));
        let khp = &k * h * p;
        let covariance = symmetrize(p - (&gamma * gamma.transpose()).component_mul(&khp));

        let mut state = self.state.boxplus(&dx)?;
        if !state.is_finite() || !is_finite(&covariance) {
            return Err(EstimatorError::NonFiniteState(format!("update with {kind}")));
        }
        let corrected = state.renormalize();
        if corrected > 0 {
            debug!("renormalized {corrected} quaternions after {kind} update");
        }
        self.state = state;
        self.covariance = covariance;
        self.enforce_depth_constraint();
        Ok(UpdateOutcome::Applied)
    }

    /// Append landmark `id` with bearing quaternion `bearing`. `depth` is the
    /// distance along the bearing, `None` uses twice the minimum depth.
    pub fn init_feature(
        &mut self,
        id: FeatureId,
        bearing: Quaterniond,
        depth: Option<f64>,
    ) -> Result<()> {
        self.features.check_new(id)?;
        if self.state.contains(id) {
            return Err(EstimatorError::DuplicateFeatureId(id));
        }
        if self.state.len_features() >= self.config.max_features {
            return Err(EstimatorError::CapacityExceeded(self.config.max_features));
        }
        let depth = depth.unwrap_or_else(|| self.config.default_depth());
        let rho = 1. / depth;
        // committed without going through enforce_depth_constraint
        if !(depth > 0. && depth.is_finite() && rho <= self.config.max_inv_depth) {
            return Err(EstimatorError::InvalidDepth(depth));
        }

        let mut bearing = bearing;
        renormalize(&mut bearing);
        let mut state = self.state.clone();
        state.push_feature(FeatureState::new(id, bearing, rho))?;
        let covariance = insert_feature_block(&self.covariance, &self.config.p0_feature());

        self.state = state;
        self.covariance = covariance;
        self.features.on_insert(id);
        debug!("initialized feature {id} at depth {depth:.2}");
        Ok(())
    }

    /// Initialize landmark `id` from its pixel coordinates.
    pub fn init_feature_from_pixel(
        &mut self,
        id: FeatureId,
        pixel: &Vector2d,
        depth: Option<f64>,
    ) -> Result<()> {
        let ray = self
            .platform
            .camera
            .model
            .back_project(*pixel)
            .ok_or(EstimatorError::FeatureOutOfView(id))?;
        let bearing = bearing_from_unit_vector(&ray.normalize());
        self.init_feature(id, bearing, depth)
    }

    /// Delete landmark `id` and its covariance rows and columns.
    pub fn remove_feature(&mut self, id: FeatureId) -> Result<()> {
        let index = self.state.index_of(id)?;
        let covariance = remove_feature_block(&self.covariance, self.state.dx_offset(index))?;
        let mut state = self.state.clone();
        state.remove_feature_at(index);

        self.state = state;
        self.covariance = covariance;
        self.features.on_remove(id);
        debug!("removed feature {id}");
        Ok(())
    }

    /// Remove every landmark not listed in `ids`, returns the removed ids.
    pub fn keep_only_features(&mut self, ids: &[FeatureId]) -> Result<Vec<FeatureId>> {
        let removed: Vec<FeatureId> = self
            .state
            .ids()
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect();
        for id in removed.iter() {
            self.remove_feature(*id)?;
        }
        Ok(removed)
    }

    /// Start a new camera frame for the removal bookkeeping.
    pub fn begin_frame(&mut self) -> usize {
        self.features.begin_frame()
    }

    /// Drop every landmark the removal policy rejects for the current frame.
    pub fn apply_removal_policy(&mut self) -> Result<Vec<(FeatureId, RemovalReason)>> {
        let camera = &self.platform.camera;
        let state = &self.state;
        let expired = self.features.expired(|id| {
            state
                .feature(id)
                .map_or(false, |feature| camera.in_view(&feature.zeta()))
        });
        for (id, reason) in expired.iter() {
            info!("removing feature {id}: {reason:?}");
            self.remove_feature(*id)?;
        }
        Ok(expired)
    }

    /// Reset negative or implausibly large inverse depths. Returns the number
    /// of landmarks touched.
    pub fn enforce_depth_constraint(&mut self) -> usize {
        let default_rho = 1. / self.config.default_depth();
        let max_rho = self.config.max_inv_depth;
        let p0_rho = self.config.p0_rho;
        let offsets: Vec<usize> = (0..self.state.len_features())
            .map(|i| self.state.dx_offset(i) + DX_RHO)
            .collect();
        let mut touched = 0;
        for ((_, rho), idx) in self.state.features_mut().zip(offsets) {
            if *rho < 0. {
                let err = default_rho - *rho;
                *rho = default_rho;
                self.covariance[(idx, idx)] += err * err;
                touched += 1;
            } else if *rho > max_rho {
                *rho = default_rho;
                self.covariance.row_mut(idx).fill(0.);
                self.covariance.column_mut(idx).fill(0.);
                self.covariance[(idx, idx)] = p0_rho;
                touched += 1;
            }
        }
        if touched > 0 {
            debug!("reset {touched} inverse depths");
        }
        touched
    }
}

fn symmetrize(p: Matrixd) -> Matrixd {
    (&p + p.transpose()) * 0.5
}

fn is_finite(m: &Matrixd) -> bool {
    m.iter().all(|e| e.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::*;
    use approx::assert_relative_eq;

    fn hover_filter() -> KalmanFilter {
        let initial = VehicleState {
            mu: 0.2,
            ..Default::default()
        };
        KalmanFilter::new(initial, Config::default()).unwrap()
    }

    fn free_fall_input() -> Input {
        Input::new(Vector3d::new(0., 0., -9.80665), Vector3d::zeros())
    }

    fn bearing(x: f64, y: f64) -> Quaterniond {
        bearing_from_unit_vector(&Vector3d::new(x, y, 1.).normalize())
    }

    #[test]
    fn test_free_fall_keeps_velocity_and_attitude() {
        let mut filter = hover_filter();
        filter.propagate(0., free_fall_input()).unwrap();
        assert_eq!(filter.state().vehicle.velocity, Vector3d::zeros());
        filter.propagate(0.01, free_fall_input()).unwrap();
        let vehicle = &filter.state().vehicle;
        assert!(vehicle.velocity.norm() < 1e-12);
        assert!(vehicle.attitude.angle() < 1e-12);
        assert_eq!(filter.covariance().shape(), (16, 16));
        assert_eq!(filter.time(), Some(0.01));
    }

    #[test]
    fn test_propagation_grows_uncertainty() {
        let mut filter = hover_filter();
        let trace = filter.covariance().trace();
        filter.propagate(0., free_fall_input()).unwrap();
        for i in 1..=10 {
            filter
                .propagate(i as f64 * 0.01, free_fall_input())
                .unwrap();
        }
        assert!(filter.covariance().trace() > trace);
        let p = filter.covariance();
        assert!((p - p.transpose()).norm() < 1e-12);
    }

    #[test]
    fn test_non_positive_dt_is_skipped() {
        let mut filter = hover_filter();
        filter.propagate(1., free_fall_input()).unwrap();
        let before = filter.covariance().clone();
        filter.propagate(0.5, free_fall_input()).unwrap();
        filter.propagate(1., free_fall_input()).unwrap();
        assert_eq!(filter.covariance(), &before);
        assert_eq!(filter.time(), Some(1.));
    }

    #[test]
    fn test_init_feature_inverse_depth() {
        let mut filter = hover_filter();
        filter
            .init_feature(7, from_two_unit_vectors(&Vector3d::z(), &Vector3d::z()), Some(10.))
            .unwrap();
        let feature = filter.state().feature(7).unwrap();
        assert_eq!(feature.inv_depth, 0.1);
        let prediction = h_inv_depth(filter.state(), 7).unwrap();
        assert_eq!(prediction.value, MeasurementValue::Vector(Vectord::from_element(1, 0.1)));
        assert_eq!(filter.covariance().shape(), (19, 19));
        assert_eq!(filter.covariance()[(18, 18)], filter.config().p0_rho);
        assert_eq!(filter.covariance()[(0, 18)], 0.);
    }

    #[test]
    fn test_init_feature_errors() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0., 0.), None).unwrap();
        assert_relative_eq!(filter.state().feature(1).unwrap().inv_depth, 0.5);
        assert_eq!(
            filter.init_feature(1, bearing(0.1, 0.), None),
            Err(EstimatorError::DuplicateFeatureId(1))
        );
        assert_eq!(
            filter.init_feature(2, bearing(0.1, 0.), Some(-1.)),
            Err(EstimatorError::InvalidDepth(-1.))
        );
        assert_eq!(filter.state().len_features(), 1);

        let mut config = Config::default();
        config.max_features = 1;
        let mut filter = KalmanFilter::new(VehicleState::default(), config).unwrap();
        filter.init_feature(1, bearing(0., 0.), None).unwrap();
        assert_eq!(
            filter.init_feature(2, bearing(0., 0.), None),
            Err(EstimatorError::CapacityExceeded(1))
        );
    }

    #[test]
    fn test_init_feature_rejects_tiny_depth() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0., 0.), Some(0.02)).unwrap();
        for depth in [1e-3, 1e-160, f64::MIN_POSITIVE / 4.] {
            assert_eq!(
                filter.init_feature(2, bearing(0.1, 0.), Some(depth)),
                Err(EstimatorError::InvalidDepth(depth))
            );
        }
        assert_eq!(filter.state().ids(), vec![1]);
        assert_eq!(filter.covariance().shape(), (19, 19));

        filter.propagate(0., free_fall_input()).unwrap();
        for i in 1..=3 {
            filter.propagate(i as f64 * 0.01, free_fall_input()).unwrap();
        }
        assert!(filter.state().is_finite());
    }

    #[test]
    fn test_non_finite_propagation_commits_nothing() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0.1, -0.1), Some(3.)).unwrap();
        filter.propagate(0., free_fall_input()).unwrap();
        filter.propagate(0.01, free_fall_input()).unwrap();
        let state = filter.state().clone();
        let covariance = filter.covariance().clone();

        let bad = Input::new(Vector3d::new(f64::NAN, 0., -9.8), Vector3d::zeros());
        assert!(matches!(
            filter.propagate(0.02, bad),
            Err(EstimatorError::NonFiniteState(_))
        ));
        assert_eq!(filter.state(), &state);
        assert_eq!(filter.covariance(), &covariance);
        assert_eq!(filter.time(), Some(0.01));
    }

    #[test]
    fn test_non_finite_update_commits_nothing() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0.1, -0.1), Some(3.)).unwrap();
        let state = filter.state().clone();
        let covariance = filter.covariance().clone();

        let z = MeasurementValue::Vector(Vectord::from_column_slice(&[f64::NAN, 0., 0.]));
        assert!(matches!(
            filter.update(MeasurementKind::Pos, &z, None),
            Err(EstimatorError::NonFiniteState(_))
        ));
        assert_eq!(filter.state(), &state);
        assert_eq!(filter.covariance(), &covariance);
    }

    #[test]
    fn test_init_feature_from_pixel() {
        let mut filter = hover_filter();
        filter
            .init_feature_from_pixel(4, &Vector2d::new(320., 240.), Some(5.))
            .unwrap();
        let feature = filter.state().feature(4).unwrap();
        assert!((feature.zeta() - Vector3d::z()).norm() < 1e-12);
        let prediction = h_pixel(filter.state(), 4, filter.platform()).unwrap();
        match prediction.value {
            MeasurementValue::Vector(uv) => {
                assert_relative_eq!(uv[0], 320., epsilon = 1e-9);
                assert_relative_eq!(uv[1], 240., epsilon = 1e-9);
            }
            _ => panic!("pixel is a vector measurement"),
        }
    }

    #[test]
    fn test_remove_unknown_feature() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0., 0.), Some(2.)).unwrap();
        assert_eq!(filter.remove_feature(5), Err(EstimatorError::UnknownFeatureId(5)));
        assert_eq!(filter.state().len_features(), 1);
        assert_eq!(filter.covariance().shape(), (19, 19));
    }

    #[test]
    fn test_init_then_remove_is_idempotent() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0.2, 0.), Some(3.)).unwrap();
        filter.propagate(0., free_fall_input()).unwrap();
        filter.propagate(0.01, free_fall_input()).unwrap();
        let state = filter.state().clone();
        let covariance = filter.covariance().clone();

        filter
            .init_feature(2, bearing(-0.1, 0.3), Some(4.))
            .unwrap();
        filter.remove_feature(2).unwrap();
        assert_eq!(filter.state(), &state);
        assert_eq!(filter.covariance(), &covariance);
    }

    #[test]
    fn test_remove_middle_preserves_covariance() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0.1, 0.1), Some(3.)).unwrap();
        filter
            .init_feature(2, bearing(-0.2, 0.1), Some(4.))
            .unwrap();
        filter
            .init_feature(3, bearing(0.0, -0.3), Some(5.))
            .unwrap();
        let input = Input::new(Vector3d::new(0.2, -0.1, -9.7), Vector3d::new(0.05, -0.02, 0.1));
        filter.propagate(0., input).unwrap();
        for i in 1..=5 {
            filter.propagate(i as f64 * 0.01, input).unwrap();
        }
        let before = filter.covariance().clone();
        filter.remove_feature(2).unwrap();
        let after = filter.covariance();
        assert_eq!(after.shape(), (22, 22));

        // indices of the surviving rows in the old matrix
        let kept: Vec<usize> = (0..19).chain(22..25).collect();
        for (i, old_i) in kept.iter().enumerate() {
            for (j, old_j) in kept.iter().enumerate() {
                assert_eq!(after[(i, j)], before[(*old_i, *old_j)]);
            }
        }
        assert_eq!(filter.state().feature_offsets(3).unwrap(), (22, 19));
    }

    #[test]
    fn test_keep_only_features() {
        let mut filter = hover_filter();
        for id in 0..4 {
            filter
                .init_feature(id, bearing(0.1 * id as f64, 0.), None)
                .unwrap();
        }
        let removed = filter.keep_only_features(&[1, 3, 9]).unwrap();
        assert_eq!(removed, vec![0, 2]);
        assert_eq!(filter.state().ids(), vec![1, 3]);
        assert_eq!(filter.covariance().shape(), (22, 22));
    }

    #[test]
    fn test_position_update() {
        let mut filter = hover_filter();
        let trace = filter.covariance().trace();
        let z = MeasurementValue::Vector(Vectord::from_column_slice(&[1., 0., 0.]));
        let outcome = filter.update(MeasurementKind::Pos, &z, None).unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert!(filter.covariance().trace() < trace);
        let p = filter.state().vehicle.position;
        // equal prior and measurement variance
        assert_relative_eq!(p[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(p[1], 0., epsilon = 1e-12);
    }

    #[test]
    fn test_attitude_update_uses_boxminus() {
        let mut filter = hover_filter();
        let delta = Vector3d::new(0., 0., 0.02);
        let z = MeasurementValue::Rotation(quat_exp(&delta));
        filter.update(MeasurementKind::Att, &z, None).unwrap();
        let estimate = quat_log(&filter.state().vehicle.attitude);
        // p0_att = 0.001, r_att = 0.001
        assert_relative_eq!(estimate[2], 0.01, epsilon = 1e-9);
        assert!(estimate.xy().norm() < 1e-12);
    }

    #[test]
    fn test_bearing_update() {
        let mut filter = hover_filter();
        filter.init_feature(3, bearing(0., 0.), Some(2.)).unwrap();
        let zeta_before = filter.state().feature(3).unwrap().zeta();
        let target = bearing(0.02, 0.);
        let z = MeasurementValue::Bearing(target);
        filter
            .update(MeasurementKind::Bearing(3), &z, None)
            .unwrap();
        let zeta_after = filter.state().feature(3).unwrap().zeta();
        let goal = zeta(&target);
        assert!((zeta_after - goal).norm() < (zeta_before - goal).norm());
    }

    #[test]
    fn test_update_errors() {
        let mut filter = hover_filter();
        let z = MeasurementValue::Vector(Vectord::from_element(1, 2.));
        assert_eq!(
            filter.update(MeasurementKind::Depth(1), &z, None),
            Err(EstimatorError::UnknownFeatureId(1))
        );
        let bad = MeasurementValue::Vector(Vectord::zeros(2));
        assert!(matches!(
            filter.update(MeasurementKind::Pos, &bad, None),
            Err(EstimatorError::DimensionMismatch { .. })
        ));
        let noise = Matrixd::identity(2, 2);
        let pos = MeasurementValue::Vector(Vectord::zeros(3));
        assert!(matches!(
            filter.update(MeasurementKind::Pos, &pos, Some(&noise)),
            Err(EstimatorError::DimensionMismatch { .. })
        ));

        filter.init_feature(1, bearing(0., 0.), None).unwrap();
        let flow = MeasurementValue::Vector(Vectord::zeros(2));
        assert!(matches!(
            filter.update(MeasurementKind::PixelVel(1), &flow, None),
            Err(EstimatorError::MissingInput(_))
        ));
    }

    #[test]
    fn test_mahalanobis_gate() {
        let mut config = Config::default();
        config.mahalanobis_gate = Some(9.);
        let mut filter = KalmanFilter::new(VehicleState::default(), config).unwrap();
        let before = filter.covariance().clone();
        let z = MeasurementValue::Vector(Vectord::from_column_slice(&[10., 0., 0.]));
        match filter.update(MeasurementKind::Pos, &z, None).unwrap() {
            UpdateOutcome::Gated(distance) => assert_relative_eq!(distance, 5000., epsilon = 1e-6),
            outcome => panic!("expected gating, got {outcome:?}"),
        }
        assert_eq!(filter.covariance(), &before);
    }

    #[test]
    fn test_partial_update() {
        let mut config = Config::default();
        config.gamma_vehicle = 0.5;
        let mut filter = KalmanFilter::new(VehicleState::default(), config).unwrap();
        let z = MeasurementValue::Vector(Vectord::from_column_slice(&[1., 0., 0.]));
        filter.update(MeasurementKind::Pos, &z, None).unwrap();
        assert_relative_eq!(filter.state().vehicle.position[0], 0.25, epsilon = 1e-12);
        // 0.01 - 0.25 * 0.005
        assert_relative_eq!(filter.covariance()[(0, 0)], 0.00875, epsilon = 1e-12);
    }

    #[test]
    fn test_depth_constraint() {
        let mut filter = hover_filter();
        filter.init_feature(1, bearing(0., 0.), Some(4.)).unwrap();
        filter.init_feature(2, bearing(0.1, 0.), Some(4.)).unwrap();
        for ((_, rho), value) in filter.state.features_mut().zip([-0.5, 500.]) {
            *rho = value;
        }
        let var = filter.covariance()[(18, 18)];
        assert_eq!(filter.enforce_depth_constraint(), 2);
        let depths = filter.state().depths();
        assert_relative_eq!(depths[0], 2.);
        assert_relative_eq!(depths[1], 2.);
        assert_relative_eq!(filter.covariance()[(18, 18)], var + 1., epsilon = 1e-12);
        assert_eq!(filter.covariance()[(21, 21)], filter.config().p0_rho);
        assert_eq!(filter.enforce_depth_constraint(), 0);
    }

    #[test]
    fn test_removal_policy() {
        let mut config = Config::default();
        config.max_missed_frames = Some(0);
        config.drop_out_of_view = true;
        let mut filter = KalmanFilter::new(VehicleState::default(), config).unwrap();
        filter.begin_frame();
        filter.init_feature(1, bearing(0., 0.), None).unwrap();
        filter.init_feature(2, bearing(0.1, 0.), None).unwrap();
        filter.init_feature(3, bearing(10., 0.), None).unwrap();
        assert_eq!(filter.apply_removal_policy().unwrap(), vec![(3, RemovalReason::OutOfView)]);

        filter.begin_frame();
        let z = MeasurementValue::Bearing(bearing(0., 0.));
        filter
            .update(MeasurementKind::Bearing(1), &z, None)
            .unwrap();
        assert_eq!(filter.apply_removal_policy().unwrap(), vec![(2, RemovalReason::Missed)]);
        assert_eq!(filter.state().ids(), vec![1]);
    }
}
