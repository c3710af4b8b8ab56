use nalgebra::matrix;

use crate::camera::*;
use crate::my_types::*;

#[derive(Debug, Clone)]
pub struct PinholeModel {
    pub focal_length: Vector2d,
    pub center: Vector2d,
}

impl PinholeModel {
    pub fn new(focal_length: Vector2d, center: Vector2d) -> Self {
        PinholeModel {
            focal_length,
            center,
        }
    }
}

impl CameraModel for PinholeModel {
    fn back_project(&self, pixel: Vector2d) -> Option<Vector3d> {
        if self.focal_length[0] == 0. || self.focal_length[1] == 0. {
            return None;
        }
        let p = Vector2d::new(
            (pixel[0] - self.center[0]) / self.focal_length[0],
            (pixel[1] - self.center[1]) / self.focal_length[1],
        );
        Some(Vector3d::new(p[0], p[1], 1.))
    }

    fn project_with_derivative(
        &self,
        ray: Vector3d,
        compute_derivative: bool,
    ) -> (Option<Vector2d>, Option<Matrix23d>) {
        // ray is behind camera
        if ray[2] <= 0. {
            return (None, None);
        }
        let z_inv = 1. / ray[2];
        let normalized = Vector2d::new(z_inv * ray[0], z_inv * ray[1]);
        let pixel = self.focal_matrix() * normalized + self.center;
        // derivative of uv wrt xyz
        let pixel_derivative = if compute_derivative {
            // derivative of normalized uv wrt xyz
            let x_xbar_derivative = matrix!(
                z_inv,
                0.,
                -ray[0] * z_inv.powi(2);
                0.,
                z_inv,
                -ray[1] * z_inv.powi(2);
            );
            Some(self.focal_matrix() * x_xbar_derivative)
        } else {
            None
        };
        (Some(pixel), pixel_derivative)
    }

    fn focal_matrix(&self) -> Matrix2d {
        Matrix2d::from_diagonal(&self.focal_length)
    }
}
