//! Stub G3 panel: answers discovery and streams scripted notifications over
//! the real frame codec.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gridpanel_gen3::protocol::codec::{FrameKind, RpcCodec, RpcFrame, RpcMethod};
use gridpanel_gen3::protocol::messages::{
    MAIN_FEED_IID, PRODUCT_PANEL, TRAIT_CIRCUIT_NAMES, TRAIT_POWER_METRICS, VENDOR_ID,
};
use gridpanel_gen3::protocol::wire::{
    first_bytes, first_varint, put_bytes_field, put_string_field, put_varint_field,
};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .try_init();
    });
}

pub struct StubPanel {
    pub resource_id: String,
    pub name_iids: Vec<u64>,
    pub metric_iids: Vec<u64>,
    /// Notification payloads pushed once a subscriber appears.
    pub stream_items: Vec<Vec<u8>>,
}

pub async fn spawn(stub: StubPanel) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stub = Arc::new(stub);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let stub = Arc::clone(&stub);
            tokio::spawn(async move {
                serve(stream, &stub).await;
            });
        }
    });
    addr
}

async fn serve(stream: TcpStream, stub: &StubPanel) {
    let mut framed = Framed::new(stream, RpcCodec);
    while let Some(Ok(frame)) = framed.next().await {
        if frame.kind != FrameKind::Request {
            continue;
        }
        match frame.method {
            RpcMethod::GetInstances => {
                let payload = instances_payload(stub);
                if send_response(&mut framed, RpcMethod::GetInstances, payload)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            RpcMethod::GetRevision => {
                let iid = requested_iid(&frame.payload).unwrap_or(0);
                let payload = revision_payload(&format!("Load {iid}"));
                if send_response(&mut framed, RpcMethod::GetRevision, payload)
                    .await
                    .is_err()
                {
                    return;
                }
            }
            RpcMethod::Subscribe => {
                for item in &stub.stream_items {
                    let frame = RpcFrame {
                        kind: FrameKind::StreamItem,
                        method: RpcMethod::Subscribe,
                        payload: Bytes::from(item.clone()),
                    };
                    if framed.send(frame).await.is_err() {
                        return;
                    }
                }
                // Keep the stream open; the client tears it down.
            }
        }
    }
}

async fn send_response(
    framed: &mut Framed<TcpStream, RpcCodec>,
    method: RpcMethod,
    payload: Vec<u8>,
) -> Result<(), gridpanel_error::PanelError> {
    framed
        .send(RpcFrame {
            kind: FrameKind::Response,
            method,
            payload: Bytes::from(payload),
        })
        .await
}

/// Instance id a GetRevision request addresses (path 2.2.1).
fn requested_iid(payload: &[u8]) -> Option<u64> {
    let instance_meta = first_bytes(payload, 2).ok()??;
    let iid_msg = first_bytes(instance_meta, 2).ok()??;
    first_varint(iid_msg, 1).ok()?
}

fn instance_entry(trait_id: u64, iid: u64, resource_id: &str) -> Vec<u8> {
    let mut meta = Vec::new();
    put_varint_field(&mut meta, 1, VENDOR_ID);
    put_varint_field(&mut meta, 2, PRODUCT_PANEL);
    put_varint_field(&mut meta, 3, trait_id);

    let mut iid_msg = Vec::new();
    put_varint_field(&mut iid_msg, 1, iid);

    let mut inner = Vec::new();
    put_bytes_field(&mut inner, 1, &meta);
    put_bytes_field(&mut inner, 2, &iid_msg);

    let mut resource = Vec::new();
    put_string_field(&mut resource, 1, resource_id);

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

fn instances_payload(stub: &StubPanel) -> Vec<u8> {
    let mut payload = Vec::new();
    for iid in &stub.name_iids {
        payload.extend(instance_entry(TRAIT_CIRCUIT_NAMES, *iid, &stub.resource_id));
    }
    for iid in &stub.metric_iids {
        payload.extend(instance_entry(TRAIT_POWER_METRICS, *iid, &stub.resource_id));
    }
    payload
}

fn revision_payload(name: &str) -> Vec<u8> {
    let mut name_msg = Vec::new();
    put_string_field(&mut name_msg, 4, name);
    let mut body = Vec::new();
    put_bytes_field(&mut body, 1, &name_msg);
    let mut sr = Vec::new();
    put_bytes_field(&mut sr, 2, &body);
    let mut payload = Vec::new();
    put_bytes_field(&mut payload, 3, &sr);
    payload
}

fn stats(avg: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    put_varint_field(&mut buf, 3, avg);
    buf
}

fn wrap_notification(trait_id: u64, iid: u64, metric: &[u8]) -> Vec<u8> {
    let mut meta = Vec::new();
    put_varint_field(&mut meta, 3, trait_id);
    let mut iid_msg = Vec::new();
    put_varint_field(&mut iid_msg, 1, iid);
    let mut info = Vec::new();
    put_bytes_field(&mut info, 1, &meta);
    put_bytes_field(&mut info, 2, &iid_msg);
    let mut ext = Vec::new();
    put_bytes_field(&mut ext, 2, &info);
    let mut rti = Vec::new();
    put_bytes_field(&mut rti, 2, &ext);

    let mut metric_list = Vec::new();
    put_bytes_field(&mut metric_list, 3, metric);
    let mut notify = Vec::new();
    put_bytes_field(&mut notify, 3, &metric_list);

    let mut payload = Vec::new();
    put_bytes_field(&mut payload, 1, &rti);
    put_bytes_field(&mut payload, 2, &notify);
    payload
}

/// Single-phase circuit notification for a metric instance.
pub fn circuit_item(iid: u64, power_w: f64, voltage_v: f64) -> Vec<u8> {
    let mut single = Vec::new();
    put_bytes_field(&mut single, 2, &stats((voltage_v * 1000.0) as u64));
    put_bytes_field(&mut single, 3, &stats((power_w * 2000.0) as u64));
    let mut metric = Vec::new();
    put_bytes_field(&mut metric, 11, &single);
    wrap_notification(TRAIT_POWER_METRICS, iid, &metric)
}

/// Main-feed notification (single symmetric leg).
pub fn main_feed_item(power_w: f64, leg_voltage_v: f64, frequency_hz: f64) -> Vec<u8> {
    let mut voltage_inner = Vec::new();
    put_varint_field(&mut voltage_inner, 3, (leg_voltage_v * 1000.0) as u64);
    let mut voltage_stats = Vec::new();
    put_bytes_field(&mut voltage_stats, 2, &voltage_inner);

    let mut leg = Vec::new();
    put_bytes_field(&mut leg, 2, &voltage_stats);
    put_bytes_field(&mut leg, 3, &stats((power_w * 2000.0) as u64));
    put_bytes_field(&mut leg, 4, &stats((frequency_hz * 1000.0) as u64));

    let mut main = Vec::new();
    put_bytes_field(&mut main, 1, &leg);
    let mut metric = Vec::new();
    put_bytes_field(&mut metric, 14, &main);
    wrap_notification(TRAIT_POWER_METRICS, MAIN_FEED_IID, &metric)
}
