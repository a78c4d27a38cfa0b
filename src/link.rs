use crate::config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, MAX_PACKET_SIZE};
use crate::buffer::MAX_BUFFER_CAPACITY;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

/// Room for a full delivery buffer plus status and subscribe requests.
const REQUEST_QUEUE_CAPACITY: usize = MAX_BUFFER_CAPACITY + 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("not connected to the broker")]
    Disconnected,
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

impl LinkError {
    /// True when the session is gone and the publisher must reconnect.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Connection(_) | LinkError::Disconnected)
    }
}

impl From<ConnectionError> for LinkError {
    fn from(e: ConnectionError) -> Self {
        LinkError::Connection(e.to_string())
    }
}

pub trait BrokerLink: Send {
    /// Opens a fresh session. Resolves once the broker acknowledged it.
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError>;

    /// Queues one message without waiting for it to be written.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;

    /// Drives the connection for at most `wait`, returning the first inbound
    /// message if one arrives.
    fn service(&mut self, wait: Duration) -> impl Future<Output = Result<Option<Inbound>, LinkError>> + Send;

    /// Gives queued messages `window` to go out before the process restarts.
    fn flush(&mut self, window: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl LinkOptions {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user.clone(), password.clone());
        }
        options
    }
}

/// MQTT 3.1.1 session over `rumqttc`. All traffic is QoS 0.
pub struct MqttLink {
    options: LinkOptions,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttLink {
    pub fn new(options: LinkOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    fn client(&self) -> Result<&AsyncClient, LinkError> {
        self.session.as_ref().map(|(client, _)| client).ok_or(LinkError::Disconnected)
    }

    fn drop_session(&mut self) {
        self.session = None;
    }
}

impl BrokerLink for MqttLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.drop_session();
        let (client, mut eventloop) = AsyncClient::new(self.options.mqtt_options(), REQUEST_QUEUE_CAPACITY);
        let deadline = Instant::now() + self.options.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, eventloop.poll()).await {
                Err(_) => {
                    return Err(LinkError::Connection(format!(
                        "no CONNACK within {:?}",
                        self.options.connect_timeout
                    )))
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    debug!(code = ?ack.code, "broker acknowledged session");
                    break;
                }
                Ok(Ok(event)) => trace!(?event, "waiting for CONNACK"),
            }
        }

        self.session = Some((client, eventloop));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| LinkError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| LinkError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn service(&mut self, wait: Duration) -> Result<Option<Inbound>, LinkError> {
        let Some((_, eventloop)) = self.session.as_mut() else {
            return Err(LinkError::Disconnected);
        };
        let deadline = Instant::now() + wait;

        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, eventloop.poll()).await {
                Err(_) => break Ok(None),
                Ok(Err(e)) => break Err(LinkError::from(e)),
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    break Ok(Some(Inbound {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    }))
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => break Err(LinkError::Disconnected),
                Ok(Ok(_)) => {}
            }
        };

        if matches!(&result, Err(e) if e.is_disconnect()) {
            self.drop_session();
        }
        result
    }

    async fn flush(&mut self, window: Duration) {
        let Some((_, eventloop)) = self.session.as_mut() else {
            return;
        };
        let deadline = Instant::now() + window;

        while let Ok(event) = timeout(deadline.saturating_duration_since(Instant::now()), eventloop.poll()).await {
            if event.is_err() {
                break;
            }
        }
    }
}
