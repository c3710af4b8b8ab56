use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use crate::config::Config;
use crate::dataset::*;
use crate::dynamics::Input;
use crate::error::EstimatorError;
use crate::kalman_filter::*;
use crate::math::quat_from_vector;
use crate::measurement::*;
use crate::my_types::*;
use crate::state::VehicleState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub imu_samples: usize,
    pub updates: usize,
    pub gated: usize,
    pub skipped: usize,
    pub features_initialized: usize,
    pub features_removed: usize,
}

/// Replays the canonical stream through the filter.
#[derive(Debug)]
pub struct VIO {
    filter: KalmanFilter,
    /// The time of the last sensor data
    last_time: Option<f64>,
    /// Time of the camera frame landmark observations currently belong to
    frame_time: Option<f64>,
    stats: Stats,
}

impl VIO {
    pub fn new(initial: VehicleState, config: Config) -> Result<Self> {
        Ok(Self {
            filter: KalmanFilter::new(initial, config)?,
            last_time: None,
            frame_time: None,
            stats: Stats::default(),
        })
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Returns whether the sample was used.
    pub fn process_data(&mut self, data: &SensorData) -> Result<bool> {
        if let Some(last_time) = self.last_time {
            if data.time < last_time {
                warn!("discard unordered sample");
                return Ok(false);
            }
        }
        self.last_time = Some(data.time);

        if data.record.is_frame_data() {
            self.start_frame(data.time)?;
        }

        match data.record {
            Record::Imu { accel, gyro } => {
                let input = Input::new(Vector3d::from(accel), Vector3d::from(gyro));
                self.filter.propagate(data.time, input)?;
                self.stats.imu_samples += 1;
                Ok(true)
            }
            Record::InitialState {
                position,
                velocity,
                attitude,
                accel_bias,
                gyro_bias,
                mu,
            } => {
                if self.filter.time().is_some() {
                    warn!("ignoring initial state after propagation started");
                    return Ok(false);
                }
                let attitude = quat_from_vector(&Vector4d::from(attitude))
                    .ok_or_else(|| anyhow!("invalid initial attitude {attitude:?}"))?;
                let initial = VehicleState {
                    position: Vector3d::from(position),
                    velocity: Vector3d::from(velocity),
                    attitude,
                    accel_bias: Vector3d::from(accel_bias),
                    gyro_bias: Vector3d::from(gyro_bias),
                    mu,
                };
                self.filter = KalmanFilter::new(initial, self.filter.config().clone())?;
                info!("initialized vehicle state at t = {}", data.time);
                Ok(true)
            }
            Record::Bearing { id, quaternion, depth } if !self.filter.state().contains(id) => {
                let Some(bearing) = quat_from_vector(&Vector4d::from(quaternion)) else {
                    warn!("invalid bearing quaternion for feature {id}");
                    return Ok(false);
                };
                self.init_feature(id, |filter| filter.init_feature(id, bearing, depth))
            }
            Record::Pixel { id, uv, depth } if !self.filter.state().contains(id) => {
                let pixel = Vector2d::from(uv);
                self.init_feature(id, |filter| filter.init_feature_from_pixel(id, &pixel, depth))
            }
            ref record => {
                let Some((kind, z)) = measurement(record) else {
                    return Ok(false);
                };
                self.update(kind, &z)
            }
        }
    }

    /// Close the current camera frame when `time` opens a new one.
    fn start_frame(&mut self, time: f64) -> Result<()> {
        if self.frame_time == Some(time) {
            return Ok(());
        }
        if self.frame_time.is_some() {
            let removed = self.filter.apply_removal_policy()?;
            self.stats.features_removed += removed.len();
        }
        let frame_number = self.filter.begin_frame();
        debug!("frame {frame_number} at t = {time}");
        self.frame_time = Some(time);
        Ok(())
    }

    fn init_feature<F>(&mut self, id: FeatureId, init: F) -> Result<bool>
    where
        F: FnOnce(&mut KalmanFilter) -> std::result::Result<(), EstimatorError>,
    {
        match init(&mut self.filter) {
            Ok(()) => {
                self.stats.features_initialized += 1;
                Ok(true)
            }
            Err(
                err @ (EstimatorError::CapacityExceeded(_)
                | EstimatorError::DuplicateFeatureId(_)
                | EstimatorError::InvalidDepth(_)
                | EstimatorError::FeatureOutOfView(_)),
            ) => {
                debug!("not initializing feature {id}: {err}");
                self.stats.skipped += 1;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn update(&mut self, kind: MeasurementKind, z: &MeasurementValue) -> Result<bool> {
        match self.filter.update(kind, z, None) {
            Ok(UpdateOutcome::Applied) => {
                self.stats.updates += 1;
                Ok(true)
            }
            Ok(UpdateOutcome::Gated(_)) => {
                self.stats.gated += 1;
                Ok(false)
            }
            Err(
                err @ (EstimatorError::UnknownFeatureId(_)
                | EstimatorError::FeatureOutOfView(_)
                | EstimatorError::SingularInnovation(_)
                | EstimatorError::MissingInput(_)),
            ) => {
                warn!("skipping {kind} update: {err}");
                self.stats.skipped += 1;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Measurement carried by a record, `None` for records that are not
/// measurements or cannot be read as one.
pub fn measurement(record: &Record) -> Option<(MeasurementKind, MeasurementValue)> {
    fn vector(v: &[f64]) -> MeasurementValue {
        MeasurementValue::Vector(Vectord::from_column_slice(v))
    }
    let measurement = match record {
        Record::Imu { .. } | Record::InitialState { .. } => return None,
        Record::Position { position } => (MeasurementKind::Pos, vector(position)),
        Record::Velocity { velocity } => (MeasurementKind::Vel, vector(velocity)),
        Record::Altitude { altitude } => (MeasurementKind::Alt, vector(&[*altitude])),
        Record::Accelerometer { accel } => (MeasurementKind::Acc, vector(accel)),
        Record::Attitude { quaternion } => {
            let q = quat_from_vector(&Vector4d::from(*quaternion))?;
            (MeasurementKind::Att, MeasurementValue::Rotation(q))
        }
        Record::Bearing { id, quaternion, .. } => {
            let q = quat_from_vector(&Vector4d::from(*quaternion))?;
            (MeasurementKind::Bearing(*id), MeasurementValue::Bearing(q))
        }
        Record::Pixel { id, uv, .. } => (MeasurementKind::Pixel(*id), vector(uv)),
        Record::Depth { id, depth } => (MeasurementKind::Depth(*id), vector(&[*depth])),
        Record::InverseDepth { id, inv_depth } => {
            (MeasurementKind::InvDepth(*id), vector(&[*inv_depth]))
        }
        Record::PixelVelocity { id, velocity } => {
            (MeasurementKind::PixelVel(*id), vector(velocity))
        }
    };
    Some(measurement)
}
