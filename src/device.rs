use crate::buffer::BufferError;
use crate::capture::CaptureTask;
use crate::clock::{SyncedClock, TimeSource};
use crate::command::CommandHandler;
use crate::config::{default_client_id, ConfigError, ConfigStore, DeviceConfig, Settings};
use crate::context::{SharedContext, Topics};
use crate::excursion::ExcursionPolicy;
use crate::link::{LinkOptions, MqttLink};
use crate::ntp::{self, NTP_PORT};
use crate::publisher::{DeviceExit, Publisher};
use crate::sampler::{AnalogChannels, Sampler};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("failed to start capture task: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Reads the stored document and derives the runtime configuration.
pub fn load_device_config(store: &dyn ConfigStore) -> Result<DeviceConfig, ConfigError> {
    let document = store.load()?;
    Ok(DeviceConfig::from_document(&document, &default_client_id()))
}

pub fn log_device_config(config: &DeviceConfig) {
    info!(
        ip = %config.ip,
        dns = %config.dns,
        gateway = %config.gateway,
        subnet = %config.subnet,
        mqtt = %config.mqtt,
        ntp = %config.ntp,
        site = %config.site,
        equipment_id = %config.equipment_id,
        client_id = %config.client_id,
        voltage_threshold = config.voltage_threshold,
        "device configuration"
    );
}

/// Learns the wall-clock time from the configured NTP server, falling back
/// to the host clock.
pub async fn synchronize_clock(config: &DeviceConfig, settings: &Settings) -> SyncedClock {
    if config.ntp.is_unspecified() {
        warn!("no NTP server configured, using host clock");
        return SyncedClock::from_system(settings.utc_offset_hours);
    }

    let server = SocketAddr::from((config.ntp, NTP_PORT));
    match ntp::query_time(server, settings.ntp_timeout).await {
        Ok(unix_secs) => {
            info!(%server, unix_secs, "time synchronized");
            SyncedClock::from_unix(unix_secs, settings.utc_offset_hours)
        }
        Err(e) => {
            warn!(%server, error = %e, "time synchronization failed, using host clock");
            SyncedClock::from_system(settings.utc_offset_hours)
        }
    }
}

/// Boots the device and runs it until a restart is requested.
///
/// The capture task gets its own OS thread; the publisher runs on the
/// calling task.
pub async fn run_device<A>(
    store: Box<dyn ConfigStore>,
    channels: A,
    settings: &Settings,
) -> Result<DeviceExit, DeviceError>
where
    A: AnalogChannels + 'static,
{
    settings.validate()?;

    let config = load_device_config(store.as_ref())?;
    log_device_config(&config);

    let clock = synchronize_clock(&config, settings).await;

    let topics = Topics::new(&settings.root_topic, &config.site, &config.equipment_id, &config.client_id);
    let ctx = SharedContext::new(settings.delivery_capacity, topics)?;

    let sampler = Sampler::new(channels, TimeSource::new(clock));
    let policy = ExcursionPolicy::new(config.voltage_threshold, settings.override_range);
    let capture = CaptureTask::new(sampler, policy, settings.window_capacity, ctx.clone())?.spawn()?;
    info!(thread = ?capture.thread().name(), "capture task started");

    let mut options = LinkOptions::new(config.mqtt.to_string(), settings.mqtt_port, config.client_id.clone());
    options.credentials = settings.mqtt_credentials.clone();
    let link = MqttLink::new(options);

    let handler = CommandHandler::new(store, ctx.clone());
    let publisher = Publisher::new(link, handler, ctx, config, TimeSource::new(clock)).with_settings(settings);

    Ok(publisher.run().await)
}
