use crate::buffer::MAX_BUFFER_CAPACITY;
use crate::clock::{Clock, TimeSource};
use crate::command::CommandHandler;
use crate::config::{DeviceConfig, Settings};
use crate::context::SharedContext;
use crate::link::{BrokerLink, Inbound, LinkError};
use crate::measurement::MeasurementRecord;
use crate::status::StatusReport;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Batch = heapless::Vec<MeasurementRecord, MAX_BUFFER_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the publisher stopped. The only way out is a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceExit {
    Restart,
}

/// Fixed retry interval with optional random jitter. Retries never give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    /// No waiting at all; for tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub records_published: u64,
    pub records_dropped: u64,
    pub statuses_published: u64,
    pub contended_drains: u64,
    pub commands: u64,
}

/// Consumer side: owns the broker link, drains the delivery buffer and
/// dispatches inbound commands.
pub struct Publisher<L, C> {
    link: L,
    handler: CommandHandler,
    ctx: Arc<SharedContext>,
    config: DeviceConfig,
    time: TimeSource<C>,
    reconnect: ReconnectPolicy,
    poll_timeout: Duration,
    restart_delay: Duration,
    state: LinkState,
    stats: PublisherStats,
}

impl<L: BrokerLink, C: Clock> Publisher<L, C> {
    pub fn new(
        link: L,
        handler: CommandHandler,
        ctx: Arc<SharedContext>,
        config: DeviceConfig,
        time: TimeSource<C>,
    ) -> Self {
        let defaults = Settings::default();
        Self {
            link,
            handler,
            ctx,
            config,
            time,
            reconnect: ReconnectPolicy::new(defaults.reconnect_interval, defaults.reconnect_jitter),
            poll_timeout: defaults.poll_timeout,
            restart_delay: defaults.restart_delay,
            state: LinkState::Disconnected,
            stats: PublisherStats::default(),
        }
    }

    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.reconnect = ReconnectPolicy::new(settings.reconnect_interval, settings.reconnect_jitter);
        self.poll_timeout = settings.poll_timeout;
        self.restart_delay = settings.restart_delay;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Runs cycles until a command asks for a restart.
    pub async fn run(mut self) -> DeviceExit {
        info!(
            data = %self.ctx.topics().data,
            info = %self.ctx.topics().info,
            command = %self.ctx.topics().command,
            "publisher running"
        );
        loop {
            if let Some(exit) = self.cycle().await {
                return exit;
            }
        }
    }

    /// One iteration of the publisher state machine.
    pub async fn cycle(&mut self) -> Option<DeviceExit> {
        match self.state {
            LinkState::Disconnected | LinkState::Connecting => {
                self.establish().await;
                None
            }
            LinkState::Connected => self.serve().await,
        }
    }

    async fn establish(&mut self) {
        self.state = LinkState::Connecting;
        info!("attempting broker connection");

        let result = match self.link.connect().await {
            Ok(()) => self.link.subscribe(&self.ctx.topics().command),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.stats.connects += 1;
                self.ctx.request_ping();
                info!(topic = %self.ctx.topics().command, "connected and subscribed");
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                self.stats.connect_failures += 1;
                let delay = self.reconnect.next_delay();
                warn!(error = %e, retry_in = ?delay, "broker connection failed");
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn serve(&mut self) -> Option<DeviceExit> {
        if let Err(e) = self.drain_delivery() {
            self.lose_connection(&e);
            return None;
        }

        if self.ctx.ping_requested() {
            let published = self.publish_status();
            self.ctx.clear_ping_request();
            if let Err(e) = published {
                self.lose_connection(&e);
                return None;
            }
        }

        match self.link.service(self.poll_timeout).await {
            Ok(Some(inbound)) => self.dispatch(inbound).await,
            Ok(None) => None,
            Err(e) => {
                self.lose_connection(&e);
                None
            }
        }
    }

    /// Publishes everything in the delivery buffer, oldest first. The lock
    /// is only tried, and released before any record goes to the link.
    fn drain_delivery(&mut self) -> Result<(), LinkError> {
        let batch: Batch = match self.ctx.delivery().try_lock() {
            Ok(mut delivery) => delivery.drain().collect(),
            Err(_) => {
                self.stats.contended_drains += 1;
                debug!("delivery buffer busy, skipping drain");
                return Ok(());
            }
        };
        if batch.is_empty() {
            return Ok(());
        }
        debug!(records = batch.len(), "draining delivery buffer");

        let topic = self.ctx.topics().data.clone();
        for record in &batch {
            let payload = match record.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to encode record");
                    self.stats.records_dropped += 1;
                    continue;
                }
            };
            match self.link.publish(&topic, payload.as_bytes()) {
                Ok(()) => self.stats.records_published += 1,
                Err(e) if e.is_disconnect() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "record dropped");
                    self.stats.records_dropped += 1;
                }
            }
        }
        Ok(())
    }

    fn publish_status(&mut self) -> Result<(), LinkError> {
        let report = StatusReport::new(self.time.stamp(), &self.config);
        let payload = match report.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to encode status report");
                return Ok(());
            }
        };
        self.publish_info(&payload)?;
        self.stats.statuses_published += 1;
        debug!("status report published");
        Ok(())
    }

    fn publish_info(&mut self, message: &str) -> Result<(), LinkError> {
        let topic = self.ctx.topics().info.clone();
        match self.link.publish(&topic, message.as_bytes()) {
            Err(e) if !e.is_disconnect() => {
                warn!(error = %e, "info message dropped");
                Ok(())
            }
            other => other,
        }
    }

    async fn dispatch(&mut self, inbound: Inbound) -> Option<DeviceExit> {
        if inbound.topic != self.ctx.topics().command {
            debug!(topic = %inbound.topic, "ignoring message on foreign topic");
            return None;
        }
        self.stats.commands += 1;

        let outcome = self.handler.handle(&inbound.payload);
        if let Some(status) = outcome.status {
            if let Err(e) = self.publish_info(status) {
                warn!(error = %e, "could not report command status");
            }
        }

        if outcome.restart {
            info!(delay = ?self.restart_delay, "restarting device");
            self.link.flush(self.restart_delay).await;
            return Some(DeviceExit::Restart);
        }
        None
    }

    fn lose_connection(&mut self, e: &LinkError) {
        warn!(error = %e, "broker connection lost");
        self.state = LinkState::Disconnected;
    }
}
