use crate::camera::Camera;
use crate::config::Config;
use crate::error::Result;
use crate::my_types::*;

/// Everything the models need besides the state: gravity, drag switch, camera.
#[derive(Debug)]
pub struct Platform {
    /// Gravity in the reference (NED) frame
    pub gravity: Vector3d,
    pub use_drag_term: bool,
    pub camera: Camera,
}

impl Platform {
    pub fn new(gravity: f64, use_drag_term: bool, camera: Camera) -> Self {
        Self {
            gravity: Vector3d::new(0., 0., gravity),
            use_drag_term,
            camera,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.gravity,
            config.use_drag_term(),
            Camera::from_config(config)?,
        ))
    }
}
