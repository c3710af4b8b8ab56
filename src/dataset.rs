use anyhow::{bail, Context as AnyhowContext, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::my_types::*;

/// One line of the canonical measurement stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// Body frame specific force and angular rate
    Imu { accel: [f64; 3], gyro: [f64; 3] },
    /// Vehicle state to start from, only honoured before the first IMU sample
    InitialState {
        position: [f64; 3],
        velocity: [f64; 3],
        /// `(w, x, y, z)`
        attitude: [f64; 4],
        #[serde(default)]
        accel_bias: [f64; 3],
        #[serde(default)]
        gyro_bias: [f64; 3],
        #[serde(default)]
        mu: f64,
    },
    Position { position: [f64; 3] },
    Velocity { velocity: [f64; 3] },
    Altitude { altitude: f64 },
    Attitude { quaternion: [f64; 4] },
    /// Specific force under the drag model
    Accelerometer { accel: [f64; 3] },
    Bearing {
        id: FeatureId,
        /// `(w, x, y, z)`
        quaternion: [f64; 4],
        #[serde(default)]
        depth: Option<f64>,
    },
    Pixel {
        id: FeatureId,
        uv: [f64; 2],
        #[serde(default)]
        depth: Option<f64>,
    },
    Depth { id: FeatureId, depth: f64 },
    InverseDepth { id: FeatureId, inv_depth: f64 },
    PixelVelocity { id: FeatureId, velocity: [f64; 2] },
}

impl Record {
    /// Landmark observations that open a camera frame
    pub fn is_frame_data(&self) -> bool {
        matches!(self, Record::Bearing { .. } | Record::Pixel { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub time: f64,
    #[serde(flatten)]
    pub record: Record,
}

pub struct Dataset<R: BufRead> {
    reader: R,
    line: String,
    line_number: usize,
    /// Number of lines, for progress reporting
    pub length: u64,
}

impl Dataset<BufReader<File>> {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let length = BufReader::new(file).lines().count() as u64;
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut dataset = Dataset::from_reader(BufReader::new(file));
        dataset.length = length;
        Ok(dataset)
    }
}

impl<R: BufRead> Dataset<R> {
    pub fn from_reader(reader: R) -> Self {
        Dataset {
            reader,
            line: String::new(),
            line_number: 0,
            length: 0,
        }
    }

    /// Next valid record, `None` at the end of the stream. Malformed and
    /// unknown lines are logged and skipped.
    pub fn next(&mut self) -> Result<Option<SensorData>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Err(err) => bail!("Failed to read line {}: {}", self.line_number + 1, err),
                _ => {}
            }
            self.line_number += 1;

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SensorData>(line) {
                Ok(data) if data.time.is_finite() => return Ok(Some(data)),
                Ok(_) => {
                    warn!("Non-finite time on line {}", self.line_number);
                }
                Err(err) => {
                    warn!("Skipping line {}: {}", self.line_number, err);
                }
            }
        }
    }
}
