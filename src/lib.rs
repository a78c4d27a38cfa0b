//! # VTC Bus
//!
//! Voltage excursion capture with buffered MQTT delivery.
//!
//! A capture task samples voltage and current as fast as the analog front end
//! allows and keeps a rolling window of the most recent records. When a sample
//! crosses the configured voltage threshold the window is snapshotted into a
//! delivery buffer and the following samples are forwarded as well, so the
//! broker receives context from before and after the event. A publisher task
//! keeps the broker connection alive, drains the delivery buffer and answers
//! remote commands.
//!
//! ## Quick Start
//!
//! ```rust
//! use vtcbus::{ExcursionPolicy, RingBuffer};
//!
//! let mut window = RingBuffer::with_capacity(4).unwrap();
//! for v in [1, 2, 3, 4, 5] {
//!     window.push(v);
//! }
//! assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
//!
//! let mut policy = ExcursionPolicy::new(10.0, 3);
//! assert!(policy.evaluate(15.0).is_override());
//! ```
//!
//! ## Architecture
//!
//! - [`buffer`] - Bounded drop-oldest ring buffer
//! - [`capture`] - Producer task: sampler, excursion policy, snapshots
//! - [`publisher`] - Consumer task: broker connection and delivery
//! - [`command`] - Remote command decoding and dispatch
//! - [`clock`] - Wall-clock timestamps with disambiguation counter
//! - [`config`] - Persistent device configuration and runtime settings
//! - [`device`] - Boot sequence

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod buffer;
pub mod capture;
pub mod clock;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod excursion;
pub mod link;
pub mod measurement;
pub mod ntp;
pub mod prompt;
pub mod publisher;
pub mod sampler;
pub mod status;

pub use buffer::{BufferError, RingBuffer};
pub use capture::{CaptureEvent, CaptureTask};
pub use clock::{Clock, ManualClock, SyncedClock, TimeSource, Timestamp};
pub use command::{Command, CommandHandler, CommandOutcome};
pub use config::{ConfigStore, DeviceConfig, FileConfigStore, MemoryConfigStore, Settings};
pub use context::{SharedContext, Topics};
pub use excursion::{CaptureMode, ExcursionPolicy};
pub use link::{BrokerLink, Inbound, LinkError, MqttLink};
pub use measurement::{MeasurementRecord, Tenths};
pub use publisher::{DeviceExit, LinkState, Publisher};
pub use status::StatusReport;
