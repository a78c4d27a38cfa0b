use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

pub const NTP_PACKET_SIZE: usize = 48;
pub const NTP_PORT: u16 = 123;
pub const DEFAULT_NTP_TIMEOUT: Duration = Duration::from_millis(1500);

/// Seconds between the NTP era 0 epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_EPOCH_DELTA: i64 = 2_208_988_800;
const NTP_ERA_SECONDS: i64 = 1 << 32;

pub const MODE_CLIENT: u8 = 3;
pub const MODE_SERVER: u8 = 4;
const LEAP_UNSYNCHRONIZED: u8 = 3;
const NTP_VERSION: u8 = 4;

#[derive(Debug, Error)]
pub enum NtpError {
    #[error("reply too short: {len} of {NTP_PACKET_SIZE} bytes")]
    ShortPacket { len: usize },
    #[error("unexpected reply mode {0}")]
    UnexpectedMode(u8),
    #[error("server is not synchronized")]
    Unsynchronized,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    fn encode(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..8].copy_from_slice(&self.fraction.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            seconds: read_u32(&bytes[..4]),
            fraction: read_u32(&bytes[4..8]),
        }
    }

    pub fn is_zero(self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    /// Unix seconds, assuming era 1 (after 2036) for small second counts.
    pub fn unix_seconds(self) -> i64 {
        let mut seconds = i64::from(self.seconds);
        if seconds < NTP_UNIX_EPOCH_DELTA {
            seconds += NTP_ERA_SECONDS;
        }
        seconds - NTP_UNIX_EPOCH_DELTA
    }
}

/// One SNTP message.
///
/// ## Wire layout (48 bytes, big-endian)
///
/// | Offset | Size | Field                                         |
/// |-------:|-----:|-----------------------------------------------|
/// |      0 |    1 | LI (2 bits), VN (3 bits), Mode (3 bits)       |
/// |      1 |    1 | Stratum                                       |
/// |      2 |    1 | Poll interval (log2 seconds, signed)          |
/// |      3 |    1 | Precision (log2 seconds, signed)              |
/// |      4 |    4 | Root delay (16.16 fixed point)                |
/// |      8 |    4 | Root dispersion (16.16 fixed point)           |
/// |     12 |    4 | Reference identifier                          |
/// |     16 |    8 | Reference timestamp                           |
/// |     24 |    8 | Originate timestamp                           |
/// |     32 |    8 | Receive timestamp                             |
/// |     40 |    8 | Transmit timestamp                            |
///
/// Timestamps are 32 bits of seconds since 1900-01-01 followed by 32 bits of
/// binary fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpPacket {
    pub leap_indicator: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub reference_id: [u8; 4],
    pub reference_timestamp: NtpTimestamp,
    pub originate_timestamp: NtpTimestamp,
    pub receive_timestamp: NtpTimestamp,
    pub transmit_timestamp: NtpTimestamp,
}

impl NtpPacket {
    /// Client request with clock unsynchronized, polling every 64 s.
    pub fn client_request() -> Self {
        Self {
            leap_indicator: LEAP_UNSYNCHRONIZED,
            version: NTP_VERSION,
            mode: MODE_CLIENT,
            stratum: 0,
            poll: 6,
            precision: -20,
            root_delay: 0,
            root_dispersion: 0,
            reference_id: *b"1N14",
            reference_timestamp: NtpTimestamp::default(),
            originate_timestamp: NtpTimestamp::default(),
            receive_timestamp: NtpTimestamp::default(),
            transmit_timestamp: NtpTimestamp::default(),
        }
    }

    pub fn encode(&self) -> [u8; NTP_PACKET_SIZE] {
        let mut buf = [0u8; NTP_PACKET_SIZE];
        buf[0] = (self.leap_indicator & 0b11) << 6 | (self.version & 0b111) << 3 | (self.mode & 0b111);
        buf[1] = self.stratum;
        buf[2] = self.poll as u8;
        buf[3] = self.precision as u8;
        buf[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        buf[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        buf[12..16].copy_from_slice(&self.reference_id);
        self.reference_timestamp.encode(&mut buf[16..24]);
        self.originate_timestamp.encode(&mut buf[24..32]);
        self.receive_timestamp.encode(&mut buf[32..40]);
        self.transmit_timestamp.encode(&mut buf[40..48]);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, NtpError> {
        if buf.len() < NTP_PACKET_SIZE {
            return Err(NtpError::ShortPacket { len: buf.len() });
        }

        let mut reference_id = [0u8; 4];
        reference_id.copy_from_slice(&buf[12..16]);

        Ok(Self {
            leap_indicator: buf[0] >> 6,
            version: (buf[0] >> 3) & 0b111,
            mode: buf[0] & 0b111,
            stratum: buf[1],
            poll: buf[2] as i8,
            precision: buf[3] as i8,
            root_delay: read_u32(&buf[4..8]),
            root_dispersion: read_u32(&buf[8..12]),
            reference_id,
            reference_timestamp: NtpTimestamp::decode(&buf[16..24]),
            originate_timestamp: NtpTimestamp::decode(&buf[24..32]),
            receive_timestamp: NtpTimestamp::decode(&buf[32..40]),
            transmit_timestamp: NtpTimestamp::decode(&buf[40..48]),
        })
    }

    /// Validates a server reply and returns its transmit time as Unix seconds.
    pub fn server_time(&self) -> Result<i64, NtpError> {
        if self.mode != MODE_SERVER {
            return Err(NtpError::UnexpectedMode(self.mode));
        }
        if self.transmit_timestamp.is_zero() {
            return Err(NtpError::Unsynchronized);
        }
        Ok(self.transmit_timestamp.unix_seconds())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Sends one request to `server` and waits at most `timeout` for the reply.
pub async fn query_time(server: SocketAddr, timeout: Duration) -> Result<i64, NtpError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.send_to(&NtpPacket::client_request().encode(), server).await?;

    let mut buf = [0u8; 64];
    let exchange = async {
        loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            if from.ip() != server.ip() {
                debug!(%from, "ignoring datagram from unexpected peer");
                continue;
            }
            return NtpPacket::decode(&buf[..len]);
        }
    };

    let reply = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| NtpError::Timeout(timeout))??;
    reply.server_time()
}
