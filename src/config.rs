use clap::Parser;

use crate::error::{EstimatorError, Result};
use crate::feature::RemovalPolicy;
use crate::measurement::MeasurementKind;
use crate::my_types::*;
use crate::state::DX_FEATURES;

#[derive(Debug, Clone, PartialEq)]
#[derive(clap::Parser)]
pub struct Config {
    #[clap(long, default_value = "0")]
    pub seed: u64,

    #[clap(long, default_value = "9.80665")]
    pub gravity: f64,

    /// Disable the rotor drag term and integrate all three accelerometer axes
    #[clap(long)]
    pub no_drag_term: bool,

    #[clap(long, default_value = "32")]
    pub max_features: usize,

    /// New landmarks without a depth start at twice this distance
    #[clap(long, default_value = "1.0")]
    pub min_depth: f64,

    #[clap(long, default_value = "100.0")]
    pub max_inv_depth: f64,

    // initial covariance (variances)
    #[clap(long, default_value = "0.01")]
    pub p0_pos: f64,
    #[clap(long, default_value = "0.01")]
    pub p0_vel: f64,
    #[clap(long, default_value = "0.001")]
    pub p0_att: f64,
    #[clap(long, default_value = "0.01")]
    pub p0_b_a: f64,
    #[clap(long, default_value = "0.001")]
    pub p0_b_g: f64,
    #[clap(long, default_value = "0.01")]
    pub p0_mu: f64,
    #[clap(long, default_value = "0.01")]
    pub p0_zeta: f64,
    #[clap(long, default_value = "0.1")]
    pub p0_rho: f64,

    // process noise
    #[clap(long, default_value = "0.0")]
    pub qx_pos: f64,
    #[clap(long, default_value = "0.0")]
    pub qx_vel: f64,
    #[clap(long, default_value = "0.0")]
    pub qx_att: f64,
    #[clap(long, default_value = "1e-6")]
    pub qx_b_a: f64,
    #[clap(long, default_value = "1e-7")]
    pub qx_b_g: f64,
    #[clap(long, default_value = "1e-6")]
    pub qx_mu: f64,
    #[clap(long, default_value = "1e-4")]
    pub qx_zeta: f64,
    #[clap(long, default_value = "1e-3")]
    pub qx_rho: f64,

    // IMU noise
    #[clap(long, default_value = "0.05")]
    pub qu_acc: f64,
    #[clap(long, default_value = "0.002")]
    pub qu_gyro: f64,

    /// Partial update gain for the vehicle states, 1.0 is a full update
    #[clap(long, default_value = "1.0")]
    pub gamma_vehicle: f64,
    #[clap(long, default_value = "1.0")]
    pub gamma_feature: f64,

    /// Reject measurements whose squared Mahalanobis distance exceeds this
    #[clap(long)]
    pub mahalanobis_gate: Option<f64>,

    // camera
    #[clap(long, value_delimiter = ',', default_values = &["250", "250"])]
    pub focal_length: Vec<f64>,
    #[clap(long, value_delimiter = ',', default_values = &["320", "240"])]
    pub image_center: Vec<f64>,
    #[clap(long, default_value = "640")]
    pub image_width: usize,
    #[clap(long, default_value = "480")]
    pub image_height: usize,
    /// Camera to body rotation (w, x, y, z)
    #[clap(long, value_delimiter = ',', default_values = &["1", "0", "0", "0"])]
    pub q_b_c: Vec<f64>,
    /// Camera position in the body frame
    #[clap(long, value_delimiter = ',', default_values = &["0", "0", "0"])]
    pub p_b_c: Vec<f64>,

    // feature removal
    #[clap(long)]
    pub max_feature_age: Option<usize>,
    #[clap(long)]
    pub max_missed_frames: Option<usize>,
    #[clap(long)]
    pub drop_out_of_view: bool,
    #[clap(long)]
    pub forbid_id_reuse: bool,

    // measurement noise (variances)
    #[clap(long, default_value = "0.01")]
    pub r_pos: f64,
    #[clap(long, default_value = "0.01")]
    pub r_vel: f64,
    #[clap(long, default_value = "0.01")]
    pub r_alt: f64,
    #[clap(long, default_value = "0.001")]
    pub r_att: f64,
    #[clap(long, default_value = "0.1")]
    pub r_acc: f64,
    #[clap(long, default_value = "0.001")]
    pub r_bearing: f64,
    #[clap(long, default_value = "1.0")]
    pub r_pixel: f64,
    #[clap(long, default_value = "10.0")]
    pub r_pixel_vel: f64,
    #[clap(long, default_value = "0.1")]
    pub r_depth: f64,
    #[clap(long, default_value = "0.01")]
    pub r_inv_depth: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["vi-ekf"])
    }
}

impl Config {
    pub fn use_drag_term(&self) -> bool {
        !self.no_drag_term
    }

    /// Depth given to landmarks initialized without one
    pub fn default_depth(&self) -> f64 {
        2. * self.min_depth
    }

    pub fn p0_vehicle(&self) -> Vectord {
        vehicle_diagonal([
            self.p0_pos,
            self.p0_vel,
            self.p0_att,
            self.p0_b_a,
            self.p0_b_g,
            self.p0_mu,
        ])
    }

    pub fn qx_vehicle(&self) -> Vectord {
        vehicle_diagonal([
            self.qx_pos,
            self.qx_vel,
            self.qx_att,
            self.qx_b_a,
            self.qx_b_g,
            self.qx_mu,
        ])
    }

    pub fn p0_feature(&self) -> Vector3d {
        Vector3d::new(self.p0_zeta, self.p0_zeta, self.p0_rho)
    }

    pub fn qx_feature(&self) -> Vector3d {
        Vector3d::new(self.qx_zeta, self.qx_zeta, self.qx_rho)
    }

    pub fn qu(&self) -> Matrix6d {
        let mut diagonal = Vector6d::zeros();
        diagonal.fixed_rows_mut::<3>(0).fill(self.qu_acc);
        diagonal.fixed_rows_mut::<3>(3).fill(self.qu_gyro);
        Matrix6d::from_diagonal(&diagonal)
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy {
            max_age: self.max_feature_age,
            max_missed: self.max_missed_frames,
            drop_out_of_view: self.drop_out_of_view,
            allow_id_reuse: !self.forbid_id_reuse,
        }
    }

    /// Diagonal measurement covariance sized for `kind`'s residual
    pub fn measurement_noise(&self, kind: &MeasurementKind) -> Matrixd {
        let variance = match kind {
            MeasurementKind::Acc => self.r_acc,
            MeasurementKind::Alt => self.r_alt,
            MeasurementKind::Att => self.r_att,
            MeasurementKind::Pos => self.r_pos,
            MeasurementKind::Vel => self.r_vel,
            MeasurementKind::Bearing(_) => self.r_bearing,
            MeasurementKind::Pixel(_) => self.r_pixel,
            MeasurementKind::PixelVel(_) => self.r_pixel_vel,
            MeasurementKind::Depth(_) => self.r_depth,
            MeasurementKind::InvDepth(_) => self.r_inv_depth,
        };
        let dim = kind.space().dim();
        Matrixd::identity(dim, dim) * variance
    }

    pub fn validate(&self) -> Result<()> {
        let check_len = |name: &str, v: &[f64], len: usize| {
            if v.len() != len {
                return Err(EstimatorError::Config(format!(
                    "{name} needs {len} values, got {}",
                    v.len()
                )));
            }
            Ok(())
        };
        check_len("focal_length", &self.focal_length, 2)?;
        check_len("image_center", &self.image_center, 2)?;
        check_len("q_b_c", &self.q_b_c, 4)?;
        check_len("p_b_c", &self.p_b_c, 3)?;
        if self.min_depth <= 0. {
            return Err(EstimatorError::Config("min_depth must be positive".into()));
        }
        if 1. / self.default_depth() > self.max_inv_depth {
            return Err(EstimatorError::Config(
                "default depth is closer than 1 / max_inv_depth".into(),
            ));
        }
        if self.gravity <= 0. {
            return Err(EstimatorError::Config("gravity must be positive".into()));
        }
        Ok(())
    }
}

fn vehicle_diagonal(blocks: [f64; 6]) -> Vectord {
    let sizes = [3, 3, 3, 3, 3, 1];
    let mut out = Vectord::zeros(DX_FEATURES);
    let mut start = 0;
    for (value, size) in blocks.iter().zip(sizes) {
        out.rows_mut(start, size).fill(*value);
        start += size;
    }
    out
}
