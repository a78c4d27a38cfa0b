use static_assertions::const_assert;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;

/// Number of samples captured in override mode after a threshold crossing.
pub const DEFAULT_OVERRIDE_RANGE: u16 = 35;

// The rolling window must still hold pre-event history when it is snapshotted.
const_assert!((DEFAULT_OVERRIDE_RANGE as usize) < DEFAULT_BUFFER_CAPACITY);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Normal,
    /// First override sample after a normal stretch; triggers a snapshot.
    Entered,
    /// Override sample whose crossing re-armed the countdown.
    Rearmed,
    /// Override sample counting down towards normal mode.
    Continuing,
}

impl CaptureMode {
    pub fn is_override(self) -> bool {
        !matches!(self, CaptureMode::Normal)
    }
}

/// Per-sample decision between normal and override capture.
///
/// A sample strictly above the threshold re-arms the countdown to the full
/// override range. While the countdown is positive every sample is an
/// override sample and consumes one count.
#[derive(Debug, Clone)]
pub struct ExcursionPolicy {
    threshold: f32,
    override_range: u16,
    countdown: u16,
}

impl ExcursionPolicy {
    pub fn new(threshold: f32, override_range: u16) -> Self {
        Self {
            threshold,
            override_range,
            countdown: 0,
        }
    }

    pub fn evaluate(&mut self, voltage: f32) -> CaptureMode {
        let was_active = self.countdown > 0;
        let crossed = voltage > self.threshold;

        if crossed {
            self.countdown = self.override_range;
        }
        if self.countdown == 0 {
            return CaptureMode::Normal;
        }
        self.countdown -= 1;

        match (was_active, crossed) {
            (false, _) => CaptureMode::Entered,
            (true, true) => CaptureMode::Rearmed,
            (true, false) => CaptureMode::Continuing,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn override_range(&self) -> u16 {
        self.override_range
    }

    /// Override samples left after the most recent decision.
    pub fn remaining(&self) -> u16 {
        self.countdown
    }

    pub fn in_override(&self) -> bool {
        self.countdown > 0
    }
}
