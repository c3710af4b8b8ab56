use std::fmt::Debug;

use crate::config::Config;
use crate::error::{EstimatorError, Result};
use crate::math::*;
use crate::my_types::*;
use crate::pinhole::PinholeModel;

#[derive(Debug)]
pub struct Camera {
    pub kind: CameraKind,
    pub model: Box<dyn CameraModel>,
    pub image_shape: ImageShape,
    /// Take a vector from the camera frame to the body frame
    pub q_b_c: Quaterniond,
    /// Camera origin in the body frame
    pub p_b_c: Vector3d,
    rot_c_b: Matrix3d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    Pinhole,
}

pub trait CameraModel: Debug + Send + Sync {
    fn back_project(&self, pixel: Vector2d) -> Option<Vector3d>;

    fn project_with_derivative(
        &self,
        ray: Vector3d,
        compute_derivative: bool,
    ) -> (Option<Vector2d>, Option<Matrix23d>);

    fn project(&self, ray: Vector3d) -> Option<Vector2d> {
        self.project_with_derivative(ray, false).0
    }

    /// Jacobian of pixel coordinates w.r.t. normalized image coordinates
    fn focal_matrix(&self) -> Matrix2d;
}

impl Camera {
    pub fn new(
        model: Box<dyn CameraModel>,
        image_shape: ImageShape,
        q_b_c: Quaterniond,
        p_b_c: Vector3d,
    ) -> Self {
        Self {
            kind: CameraKind::Pinhole,
            model,
            image_shape,
            q_b_c,
            p_b_c,
            rot_c_b: rotation_matrix(&q_b_c).transpose(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let model = PinholeModel::new(
            Vector2d::new(config.focal_length[0], config.focal_length[1]),
            Vector2d::new(config.image_center[0], config.image_center[1]),
        );
        let q_b_c = quat_from_vector(&Vector4d::from_column_slice(&config.q_b_c))
            .ok_or_else(|| EstimatorError::Config("q_b_c is not a valid quaternion".into()))?;
        Ok(Self::new(
            Box::new(model),
            (config.image_width, config.image_height),
            q_b_c,
            Vector3d::from_column_slice(&config.p_b_c),
        ))
    }

    /// Take a vector from the body frame to the camera frame
    pub fn rot_c_b(&self) -> &Matrix3d {
        &self.rot_c_b
    }

    /// Camera-frame linear and angular velocity for a body moving with `v`, `omega`.
    pub fn camera_twist(&self, v: &Vector3d, omega: &Vector3d) -> (Vector3d, Vector3d) {
        let v_c = self.rot_c_b * (v + omega.cross(&self.p_b_c));
        let omega_c = self.rot_c_b * omega;
        (v_c, omega_c)
    }

    pub fn pixel_in_image(&self, pixel: &Vector2d) -> bool {
        let (width, height) = self.image_shape;
        pixel[0] >= 0. && pixel[1] >= 0. && pixel[0] < width as f64 && pixel[1] < height as f64
    }

    /// Whether a camera-frame bearing projects inside the image
    pub fn in_view(&self, zeta: &Vector3d) -> bool {
        self.model
            .project(*zeta)
            .map_or(false, |pixel| self.pixel_in_image(&pixel))
    }
}
