use nalgebra as na;

pub type Vector2d = na::Vector2<f64>;
pub type Vector3d = na::Vector3<f64>;
pub type Vector4d = na::Vector4<f64>;
pub type Vector6d = na::Vector6<f64>;
pub type Vectord = na::DVector<f64>;

pub type Matrix2d = na::Matrix2<f64>;
pub type Matrix3d = na::Matrix3<f64>;
pub type Matrix6d = na::Matrix6<f64>;
pub type Matrix23d = na::Matrix2x3<f64>;
pub type Matrix32d = na::Matrix3x2<f64>;
pub type Matrixd = na::DMatrix<f64>;

pub type Quaterniond = na::UnitQuaternion<f64>;

/// Stable landmark identifier assigned by the tracker
pub type FeatureId = usize;

/// (width, height) in pixels
pub type ImageShape = (usize, usize);
