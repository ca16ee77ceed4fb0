//! Factory auto-detection: G2 probed first, G3 fallback, `NoTransport` when
//! neither answers. The stub here only speaks enough of the RPC protocol to
//! answer a discovery probe.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gridpanel_client::{create, ClientOptions, PanelCapability, PanelClient, PanelError, PanelGeneration};
use gridpanel_gen3::protocol::codec::{FrameKind, RpcCodec, RpcFrame, RpcMethod};
use gridpanel_gen3::protocol::wire::{put_bytes_field, put_string_field, put_varint_field};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Minimal G3 endpoint: answers `GetInstances` with one name/metric pair.
/// Anything that is not a valid frame (an HTTP probe, say) kills the
/// connection, which is exactly what real panels do on that port.
async fn spawn_rpc_stub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, RpcCodec);
                while let Some(Ok(frame)) = framed.next().await {
                    if frame.kind == FrameKind::Request
                        && frame.method == RpcMethod::GetInstances
                    {
                        let response = RpcFrame {
                            kind: FrameKind::Response,
                            method: RpcMethod::GetInstances,
                            payload: Bytes::from(instances_payload()),
                        };
                        if framed.send(response).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    addr
}

fn instance_entry(trait_id: u64, iid: u64) -> Vec<u8> {
    let mut meta = Vec::new();
    put_varint_field(&mut meta, 1, 1); // vendor
    put_varint_field(&mut meta, 2, 4); // product
    put_varint_field(&mut meta, 3, trait_id);
    let mut iid_msg = Vec::new();
    put_varint_field(&mut iid_msg, 1, iid);
    let mut inner = Vec::new();
    put_bytes_field(&mut inner, 1, &meta);
    put_bytes_field(&mut inner, 2, &iid_msg);
    let mut resource = Vec::new();
    put_string_field(&mut resource, 1, "panel-r1");
    let mut external = Vec::new();
    put_bytes_field(&mut external, 1, &resource);
    put_bytes_field(&mut external, 2, &inner);
    let mut trait_info = Vec::new();
    put_bytes_field(&mut trait_info, 2, &external);
    let mut entry = Vec::new();
    put_bytes_field(&mut entry, 1, &trait_info);
    let mut out = Vec::new();
    put_bytes_field(&mut out, 1, &entry);
    out
}

fn instances_payload() -> Vec<u8> {
    let mut payload = instance_entry(16, 7);
    payload.extend(instance_entry(26, 40));
    payload
}

fn fast_options(port: u16) -> ClientOptions {
    ClientOptions {
        port: Some(port),
        timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    }
}

#[tokio::test]
async fn auto_detect_falls_back_to_gen3() {
    // The stub speaks only the RPC protocol, so the G2 HTTP probe on the
    // same port dies and auto-detection moves on to G3.
    let addr = spawn_rpc_stub().await;
    let client = create("127.0.0.1", fast_options(addr.port())).await.unwrap();

    assert_eq!(client.generation(), PanelGeneration::Gen3);
    assert_eq!(client.capabilities(), PanelCapability::PUSH_STREAMING);
    assert!(client.as_gen3().is_some());
    assert!(client.as_gen2().is_none());
}

#[tokio::test]
async fn auto_detect_fails_with_no_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let err = create("127.0.0.1", fast_options(dead.port())).await.unwrap_err();
    assert!(matches!(err, PanelError::NoTransport(_)));
}

#[tokio::test]
async fn forced_generation_skips_probing() {
    // Nothing listens on this port; construction must still succeed.
    let options = ClientOptions {
        generation: Some(PanelGeneration::Gen3),
        port: Some(1),
        ..ClientOptions::default()
    };
    let client = create("127.0.0.1", options).await.unwrap();
    assert!(matches!(client, PanelClient::Gen3(_)));

    let options = ClientOptions {
        generation: Some(PanelGeneration::Gen2),
        port: Some(1),
        ..ClientOptions::default()
    };
    let client = create("127.0.0.1", options).await.unwrap();
    assert!(matches!(client, PanelClient::Gen2(_)));
    assert!(client.capabilities().contains(PanelCapability::RELAY_CONTROL));
    assert!(!client.capabilities().contains(PanelCapability::PUSH_STREAMING));
}
