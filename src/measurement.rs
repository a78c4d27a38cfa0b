use crate::clock::Timestamp;
use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Decimal value with one fractional digit, stored as an integer count of tenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tenths(i32);

impl Tenths {
    pub const fn from_tenths(tenths: i32) -> Self {
        Self(tenths)
    }

    pub fn from_f32(value: f32) -> Self {
        Self((value * 10.0).round() as i32)
    }

    pub fn tenths(self) -> i32 {
        self.0
    }

    pub fn as_f32(self) -> f32 {
        self.0 as f32 / 10.0
    }

    fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_f64())
    }
}

impl Serialize for Tenths {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Tenths {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(Self((value * 10.0).round() as i32))
    }
}

/// One timestamped voltage/current sample. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    #[serde(rename = "Time")]
    pub timestamp: Timestamp,
    #[serde(rename = "Voltage")]
    pub voltage: Tenths,
    #[serde(rename = "Current")]
    pub current: Tenths,
}

impl MeasurementRecord {
    pub fn new(timestamp: Timestamp, voltage: Tenths, current: Tenths) -> Self {
        Self {
            timestamp,
            voltage,
            current,
        }
    }

    /// Wire form published on the data topic.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
