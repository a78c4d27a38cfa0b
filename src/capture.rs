use crate::buffer::{BufferError, RingBuffer};
use crate::clock::{Clock, Timestamp};
use crate::context::SharedContext;
use crate::excursion::{CaptureMode, ExcursionPolicy};
use crate::measurement::MeasurementRecord;
use crate::sampler::{AnalogChannels, Sampler};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, trace};

const CAPTURE_THREAD_NAME: &str = "vtc-capture";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Sample went into the rolling window only.
    Recorded,
    /// Override was entered; window records not yet handed over were copied
    /// for delivery.
    Snapshot { copied: usize },
    /// Override sample appended to the delivery buffer.
    Forwarded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub samples: u64,
    pub snapshots: u64,
    pub forwarded: u64,
    pub rearms: u64,
}

/// Producer side: samples, applies the excursion policy and hands excursion
/// data to the publisher through the shared delivery buffer.
pub struct CaptureTask<A, C> {
    sampler: Sampler<A, C>,
    policy: ExcursionPolicy,
    window: RingBuffer<MeasurementRecord>,
    ctx: Arc<SharedContext>,
    last_delivered: Option<Timestamp>,
    stats: CaptureStats,
}

impl<A: AnalogChannels, C: Clock> CaptureTask<A, C> {
    pub fn new(
        sampler: Sampler<A, C>,
        policy: ExcursionPolicy,
        window_capacity: usize,
        ctx: Arc<SharedContext>,
    ) -> Result<Self, BufferError> {
        Ok(Self {
            sampler,
            policy,
            window: RingBuffer::with_capacity(window_capacity)?,
            ctx,
            last_delivered: None,
            stats: CaptureStats::default(),
        })
    }

    /// Takes one sample and applies the capture rules to it.
    ///
    /// Blocks only while the publisher holds the delivery buffer.
    pub fn step(&mut self) -> CaptureEvent {
        let record = self.sampler.sample();
        let mode = self.policy.evaluate(record.voltage.as_f32());
        self.window.push(record);
        self.stats.samples += 1;

        match mode {
            CaptureMode::Normal => CaptureEvent::Recorded,
            CaptureMode::Entered => {
                let copied = match self.last_delivered {
                    None => self.window.copy_to(&mut self.ctx.delivery().blocking_lock()),
                    Some(last) => {
                        // Records up to `last` already went out with an earlier excursion.
                        let mut delivery = self.ctx.delivery().blocking_lock();
                        let mut copied = 0;
                        for r in self.window.iter().filter(|r| r.timestamp > last) {
                            delivery.push(*r);
                            copied += 1;
                        }
                        copied
                    }
                };
                self.last_delivered = Some(record.timestamp);
                self.stats.snapshots += 1;
                info!(
                    voltage = %record.voltage,
                    threshold = self.policy.threshold(),
                    copied,
                    time = %record.timestamp,
                    "excursion detected, window snapshotted"
                );
                CaptureEvent::Snapshot { copied }
            }
            CaptureMode::Rearmed | CaptureMode::Continuing => {
                self.ctx.delivery().blocking_lock().push(record);
                self.last_delivered = Some(record.timestamp);
                self.stats.forwarded += 1;
                if mode == CaptureMode::Rearmed {
                    self.stats.rearms += 1;
                    info!(voltage = %record.voltage, "excursion re-armed override window");
                }
                trace!(remaining = self.policy.remaining(), "override sample forwarded");
                CaptureEvent::Forwarded
            }
        }
    }

    pub fn run(mut self) -> ! {
        info!(
            threshold = self.policy.threshold(),
            override_range = self.policy.override_range(),
            window = self.window.capacity(),
            "capture task running"
        );
        loop {
            self.step();
        }
    }

    pub fn window(&self) -> &RingBuffer<MeasurementRecord> {
        &self.window
    }

    pub fn policy(&self) -> &ExcursionPolicy {
        &self.policy
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }
}

impl<A, C> CaptureTask<A, C>
where
    A: AnalogChannels + 'static,
    C: Clock + 'static,
{
    /// Moves the task onto its own OS thread; it never returns.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.into())
            .spawn(move || self.run())
    }
}
