use crate::buffer::{BufferError, RingBuffer};
use crate::measurement::MeasurementRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DeliveryBuffer = RingBuffer<MeasurementRecord>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub data: String,
    pub info: String,
    pub command: String,
}

impl Topics {
    pub fn new(root: &str, site: &str, equipment_id: &str, client_id: &str) -> Self {
        Self {
            data: format!("{root}/{site}/{equipment_id}/Data"),
            info: format!("{root}/{site}/{equipment_id}/Info"),
            command: format!("{root}/{site}/{client_id}"),
        }
    }
}

/// State shared between the capture and publisher tasks.
///
/// The delivery buffer is written only by the capture task (blocking lock)
/// and drained only by the publisher (`try_lock`). The ping flag is set by
/// the command handler and cleared by the publisher once the status report
/// has gone out.
#[derive(Debug)]
pub struct SharedContext {
    delivery: Mutex<DeliveryBuffer>,
    ping_requested: AtomicBool,
    topics: Topics,
}

impl SharedContext {
    pub fn new(delivery_capacity: usize, topics: Topics) -> Result<Arc<Self>, BufferError> {
        Ok(Arc::new(Self {
            delivery: Mutex::new(RingBuffer::with_capacity(delivery_capacity)?),
            ping_requested: AtomicBool::new(false),
            topics,
        }))
    }

    pub fn delivery(&self) -> &Mutex<DeliveryBuffer> {
        &self.delivery
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn request_ping(&self) {
        self.ping_requested.store(true, Ordering::Release);
    }

    pub fn ping_requested(&self) -> bool {
        self.ping_requested.load(Ordering::Acquire)
    }

    pub fn clear_ping_request(&self) {
        self.ping_requested.store(false, Ordering::Release);
    }
}
