use crate::clock::{Clock, TimeSource};
use crate::measurement::{MeasurementRecord, Tenths};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;

/// Raw access to the two analog inputs.
pub trait AnalogChannels: Send {
    fn read_voltage(&mut self) -> f32;
    fn read_current(&mut self) -> f32;
}

/// Linear back-calculation from a raw reading to the measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub gain: f32,
    pub offset: f32,
}

impl Calibration {
    pub const IDENTITY: Self = Self {
        gain: 1.0,
        offset: 0.0,
    };

    pub fn new(gain: f32, offset: f32) -> Self {
        Self { gain, offset }
    }

    pub fn apply(&self, raw: f32) -> f32 {
        raw * self.gain + self.offset
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug)]
pub struct Sampler<A, C> {
    channels: A,
    time: TimeSource<C>,
    voltage_calibration: Calibration,
    current_calibration: Calibration,
}

impl<A: AnalogChannels, C: Clock> Sampler<A, C> {
    pub fn new(channels: A, time: TimeSource<C>) -> Self {
        Self {
            channels,
            time,
            voltage_calibration: Calibration::IDENTITY,
            current_calibration: Calibration::IDENTITY,
        }
    }

    pub fn with_calibration(mut self, voltage: Calibration, current: Calibration) -> Self {
        self.voltage_calibration = voltage;
        self.current_calibration = current;
        self
    }

    /// Stamps the sample, then reads voltage followed by current.
    pub fn sample(&mut self) -> MeasurementRecord {
        let timestamp = self.time.stamp();
        let voltage = self.voltage_calibration.apply(self.channels.read_voltage());
        let current = self.current_calibration.apply(self.channels.read_current());

        MeasurementRecord::new(timestamp, Tenths::from_f32(voltage), Tenths::from_f32(current))
    }
}

/// Plays back a fixed voltage script, then holds `idle_voltage`.
#[derive(Debug, Clone)]
pub struct ScriptedChannels {
    voltages: VecDeque<f32>,
    idle_voltage: f32,
    current: f32,
}

impl ScriptedChannels {
    pub fn new(voltages: impl IntoIterator<Item = f32>) -> Self {
        Self {
            voltages: voltages.into_iter().collect(),
            idle_voltage: 0.0,
            current: 0.0,
        }
    }

    pub fn with_idle_voltage(mut self, voltage: f32) -> Self {
        self.idle_voltage = voltage;
        self
    }

    pub fn with_current(mut self, current: f32) -> Self {
        self.current = current;
        self
    }

    pub fn remaining(&self) -> usize {
        self.voltages.len()
    }
}

impl AnalogChannels for ScriptedChannels {
    fn read_voltage(&mut self) -> f32 {
        self.voltages.pop_front().unwrap_or(self.idle_voltage)
    }

    fn read_current(&mut self) -> f32 {
        self.current
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    pub baseline_voltage: f32,
    pub baseline_current: f32,
    pub noise: f32,
    pub spike_probability: f64,
    pub spike_voltage: f32,
    /// Emulated analog conversion time per channel read.
    pub conversion_time: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            baseline_voltage: 120.0,
            baseline_current: 4.0,
            noise: 1.5,
            spike_probability: 0.0005,
            spike_voltage: 180.0,
            conversion_time: Duration::from_millis(5),
        }
    }
}

/// Noisy stand-in for the analog front end on hosts without an ADC.
#[derive(Debug)]
pub struct SimulatedChannels {
    profile: SimulationProfile,
    rng: StdRng,
}

impl SimulatedChannels {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(profile: SimulationProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self) -> f32 {
        if self.profile.noise <= 0.0 {
            return 0.0;
        }
        self.rng.random_range(-self.profile.noise..=self.profile.noise)
    }

    fn settle(&self) {
        if !self.profile.conversion_time.is_zero() {
            std::thread::sleep(self.profile.conversion_time);
        }
    }
}

impl AnalogChannels for SimulatedChannels {
    fn read_voltage(&mut self) -> f32 {
        self.settle();
        if self.rng.random_bool(self.profile.spike_probability.clamp(0.0, 1.0)) {
            return self.profile.spike_voltage + self.jitter();
        }
        self.profile.baseline_voltage + self.jitter()
    }

    fn read_current(&mut self) -> f32 {
        self.settle();
        let scale = self.profile.baseline_current / self.profile.baseline_voltage.max(1.0);
        self.profile.baseline_current + self.jitter() * scale
    }
}
