pub mod bearing;
pub mod camera;
pub mod config;
pub mod dataset;
pub mod dynamics;
pub mod error;
pub mod feature;
pub mod kalman_filter;
pub mod math;
pub mod measurement;
pub mod my_types;
pub mod pinhole;
pub mod platform;
pub mod state;
pub mod validation;
pub mod vio;
