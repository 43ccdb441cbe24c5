//! End-to-end scenarios over local UDP sockets: outbound writes debounced
//! onto the wire, inbound datagrams decoded and fanned out, and the
//! block-state store refreshed from received readings.

use coe_rs::coe::monitor::{monitor_event, ChannelFilter, ChannelState};
use coe_rs::coe::state::CacheKey;
use coe_rs::coe::udp::CoeUdpTransport;
use coe_rs::{
    decode_datagram, BlockData, CmiClient, CmiClientConfig, DataKind, ProtocolRevision,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// A fake CMI endpoint: a plain UDP socket on an ephemeral port.
async fn fake_cmi() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

fn client_config(cmi: SocketAddr, revision: ProtocolRevision) -> CmiClientConfig {
    let mut config = CmiClientConfig::new(cmi.ip(), revision);
    config.local_port = Some(0);
    config.target_port = Some(cmi.port());
    config.debounce = Duration::from_millis(20);
    config
}

#[tokio::test]
async fn test_outbound_write_reaches_the_wire() {
    let (cmi, cmi_addr) = fake_cmi().await;
    let client = CmiClient::connect_with_config(client_config(cmi_addr, ProtocolRevision::V1))
        .await
        .unwrap();

    // Output 6 lives in block 2, position 1
    client.write_output(1, 6, 21.5, 1).unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), cmi.recv_from(&mut buf))
        .await
        .expect("no datagram within the deadline")
        .unwrap();

    let readings = decode_datagram(&buf[..len], ProtocolRevision::V1).unwrap();
    assert_eq!(readings[0].node, 1);
    assert_eq!(readings[0].block, 2);
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [0.0, 21.5, 0.0, 0.0],
            units: [0, 1, 0, 0],
        }
    );

    client.shutdown();
}

#[tokio::test]
async fn test_outbound_burst_is_coalesced_on_the_wire() {
    let (cmi, cmi_addr) = fake_cmi().await;
    let client = CmiClient::connect_with_config(client_config(cmi_addr, ProtocolRevision::V1))
        .await
        .unwrap();

    // Outputs 1 and 2 share block 1; both writes land within one window
    client.write_output(1, 1, 10.0, 1).unwrap();
    client.write_output(1, 2, 20.0, 1).unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), cmi.recv_from(&mut buf))
        .await
        .expect("no datagram within the deadline")
        .unwrap();
    let readings = decode_datagram(&buf[..len], ProtocolRevision::V1).unwrap();
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [10.0, 20.0, 0.0, 0.0],
            units: [1, 1, 0, 0],
        }
    );

    // No second datagram follows
    let extra = timeout(Duration::from_millis(200), cmi.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "burst must produce exactly one datagram");

    client.shutdown();
}

#[tokio::test]
async fn test_inbound_datagram_fans_out_to_subscribers() {
    let target = SocketAddr::new(LOCALHOST, ProtocolRevision::V1.port());
    let transport = CoeUdpTransport::bind_with_port(target, ProtocolRevision::V1, 0)
        .await
        .unwrap();
    let mut readings = transport.subscribe();

    let (cmi, _) = fake_cmi().await;
    let datagram = [
        0x01, 0x03, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    ];
    let transport_addr = SocketAddr::new(LOCALHOST, transport.local_addr().unwrap().port());
    cmi.send_to(&datagram, transport_addr).await.unwrap();

    let inbound = timeout(Duration::from_secs(2), readings.recv())
        .await
        .expect("no reading within the deadline")
        .unwrap();
    assert_eq!(inbound.reading.node, 1);
    assert_eq!(inbound.reading.block, 3);
    assert_eq!(inbound.revision, ProtocolRevision::V1);

    // Channel extraction: output 9 is block 3, position 0
    let filter = ChannelFilter::new(1, DataKind::Analog, 9).unwrap();
    let value = filter.extract(&inbound.reading).unwrap();
    assert_eq!(value.state, ChannelState::Analog { value: 10.0, unit: 1 });

    // Monitor event carries resolved unit labels
    let event = monitor_event(&inbound);
    assert_eq!(event.channels.len(), 4);

    transport.shutdown();
}

#[tokio::test]
async fn test_inbound_reading_refreshes_block_state() {
    let (cmi, cmi_addr) = fake_cmi().await;
    let client = CmiClient::connect_with_config(client_config(cmi_addr, ProtocolRevision::V1))
        .await
        .unwrap();
    let mut subscription = client.subscribe();

    // The CMI reports block 1 of node 7 with values on every channel
    let datagram = [
        0x07, 0x01, 0x0A, 0x00, 0x14, 0x00, 0x1E, 0x00, 0x28, 0x00, 0x01, 0x01, 0x01, 0x01,
    ];
    let client_addr = SocketAddr::new(
        LOCALHOST,
        client.transport().local_addr().unwrap().port(),
    );
    cmi.send_to(&datagram, client_addr).await.unwrap();
    timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("no reading within the deadline")
        .unwrap();

    // Allow the recording task to drain its subscription
    tokio::time::sleep(Duration::from_millis(50)).await;

    let key = CacheKey::new(7, 1, DataKind::Analog);
    assert_eq!(
        client.scheduler().cached(&key),
        BlockData::Analog {
            values: [1.0, 2.0, 3.0, 4.0],
            units: [1, 1, 1, 1],
        }
    );

    // A single-channel write now merges against the observed state
    client.write_output(7, 2, 9.9, 1).unwrap();
    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), cmi.recv_from(&mut buf))
        .await
        .expect("no datagram within the deadline")
        .unwrap();
    let readings = decode_datagram(&buf[..len], ProtocolRevision::V1).unwrap();
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [1.0, 9.9, 3.0, 4.0],
            units: [1, 1, 1, 1],
        }
    );

    client.shutdown();
}

#[tokio::test]
async fn test_v2_client_emits_v2_framing() {
    let (cmi, cmi_addr) = fake_cmi().await;
    let client = CmiClient::connect_with_config(client_config(cmi_addr, ProtocolRevision::V2))
        .await
        .unwrap();

    client.write_output(2, 1, 123.45, 13).unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), cmi.recv_from(&mut buf))
        .await
        .expect("no datagram within the deadline")
        .unwrap();
    assert_eq!(&buf[..2], &[0x02, 0x00]);

    let readings = decode_datagram(&buf[..len], ProtocolRevision::V2).unwrap();
    assert_eq!(readings[0].node, 2);
    assert_eq!(readings[0].block, 1);
    let BlockData::Analog { values, units } = readings[0].data else {
        panic!("expected analog block");
    };
    assert_eq!(values[0], 123.45);
    assert_eq!(units[0], 13);

    client.shutdown();
}
