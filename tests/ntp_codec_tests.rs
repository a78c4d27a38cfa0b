use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use vtcbus::ntp::*;

fn server_reply(transmit_seconds: u32) -> NtpPacket {
    let mut reply = NtpPacket::client_request();
    reply.leap_indicator = 0;
    reply.mode = MODE_SERVER;
    reply.stratum = 2;
    reply.transmit_timestamp = NtpTimestamp {
        seconds: transmit_seconds,
        fraction: 0x8000_0000,
    };
    reply
}

#[test]
fn test_client_request_wire_bytes() {
    let bytes = NtpPacket::client_request().encode();

    assert_eq!(bytes.len(), NTP_PACKET_SIZE);
    assert_eq!(bytes[0], 0b1110_0011); // LI 3, VN 4, client mode
    assert_eq!(bytes[1], 0);
    assert_eq!(bytes[2], 6);
    assert_eq!(bytes[3], 0xEC);
    assert_eq!(&bytes[12..16], b"1N14");
    assert!(bytes[16..].iter().all(|b| *b == 0));
}

#[test]
fn test_decode_server_reply() {
    let seconds = 3_918_283_200u32; // 2024-03-01 12:00:00 UTC
    let bytes = server_reply(seconds).encode();

    let packet = NtpPacket::decode(&bytes).unwrap();

    assert_eq!(packet.mode, MODE_SERVER);
    assert_eq!(packet.stratum, 2);
    assert_eq!(packet.transmit_timestamp.seconds, seconds);
    assert_eq!(packet.server_time().unwrap(), 1_709_294_400);
}

#[test]
fn test_decode_rejects_bad_replies() {
    assert!(matches!(
        NtpPacket::decode(&[0u8; 20]),
        Err(NtpError::ShortPacket { len: 20 })
    ));

    let echoed = NtpPacket::decode(&NtpPacket::client_request().encode()).unwrap();
    assert!(matches!(echoed.server_time(), Err(NtpError::UnexpectedMode(MODE_CLIENT))));

    let unsynchronized = server_reply(0);
    let mut unsynchronized = unsynchronized;
    unsynchronized.transmit_timestamp = NtpTimestamp::default();
    assert!(matches!(unsynchronized.server_time(), Err(NtpError::Unsynchronized)));
}

#[test]
fn test_era_rollover() {
    // A few seconds into NTP era 1 (February 2036)
    let early_era_one = NtpTimestamp { seconds: 5, fraction: 0 };
    assert_eq!(early_era_one.unix_seconds(), (1i64 << 32) + 5 - NTP_UNIX_EPOCH_DELTA);
}

#[tokio::test]
async fn test_query_time_against_local_server() {
    let server = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let server_addr: SocketAddr = server.local_addr().unwrap();

    let responder = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (len, peer) = server.recv_from(&mut buf).await.unwrap();
        let request = NtpPacket::decode(&buf[..len]).unwrap();
        assert_eq!(request.mode, MODE_CLIENT);
        server.send_to(&server_reply(3_918_283_200).encode(), peer).await.unwrap();
    });

    let unix = query_time(server_addr, Duration::from_secs(2)).await.unwrap();
    responder.await.unwrap();

    assert_eq!(unix, 1_709_294_400);
}

#[tokio::test]
async fn test_query_time_times_out() {
    // Bound but never answering
    let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = silent.local_addr().unwrap();

    let result = query_time(addr, Duration::from_millis(100)).await;

    assert!(matches!(result, Err(NtpError::Timeout(_))));
}
