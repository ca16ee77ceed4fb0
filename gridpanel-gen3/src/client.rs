//! G3 transport client.
//!
//! `connect()` opens the RPC channel and discovers topology; a background
//! task then feeds the shared reflection from the subscribe stream and fans
//! notifications out to registered callbacks. `snapshot()` is a pure memory
//! read and is safe to call from inside a callback.

use crate::data::{CircuitInfo, PanelData};
use crate::protocol::codec::{FrameKind, RpcCodec, RpcFrame, RpcMethod};
use crate::protocol::messages::{
    build_revision_request, decode_dual_phase, decode_main_feed, decode_single_phase,
    parse_instances, parse_notification, parse_revision_name, InstanceLists, MAIN_FEED_IID,
    TRAIT_POWER_METRICS,
};
use crate::protocol::wire::first_bytes;
use arc_swap::ArcSwap;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gridpanel_error::{PanelError, PanelResult};
use gridpanel_models::{
    CircuitSnapshot, PanelCapability, PanelGeneration, PanelSnapshot,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RPC_PORT: u16 = 50065;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

type Channel = Framed<TcpStream, RpcCodec>;

#[derive(Debug, Clone)]
pub struct Gen3Config {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Gen3Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_RPC_PORT,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type Callback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct CallbackRegistry {
    entries: std::sync::Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    fn register(&self, cb: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, cb));
        id
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(entry_id, _)| *entry_id != id);
    }

    /// Invoke callbacks in registration order; a panicking callback must not
    /// abort the stream task.
    fn invoke_all(&self) {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (id, cb) in entries.iter() {
            if catch_unwind(AssertUnwindSafe(cb)).is_err() {
                warn!(callback_id = id, "registered callback panicked");
            }
        }
    }
}

/// Deregisters its callback when dropped; the callback itself is untouched.
pub struct UnregisterHandle {
    id: u64,
    registry: Weak<CallbackRegistry>,
}

impl Drop for UnregisterHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State the stream task borrows: the shared reflection, a weak handle to
/// the callback registry, and enough config to re-subscribe.
struct StreamShared {
    config: Gen3Config,
    data: Arc<ArcSwap<PanelData>>,
    callbacks: Weak<CallbackRegistry>,
    discarded: Arc<AtomicU64>,
}

pub struct Gen3Client {
    config: Gen3Config,
    data: Arc<ArcSwap<PanelData>>,
    callbacks: Arc<CallbackRegistry>,
    channel: Mutex<Option<Channel>>,
    stream_task: Mutex<Option<StreamTask>>,
    connected: AtomicBool,
    discarded: Arc<AtomicU64>,
}

impl std::fmt::Debug for Gen3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gen3Client")
            .field("config", &self.config)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Gen3Client {
    pub fn new(config: Gen3Config) -> Self {
        Self {
            config,
            data: Arc::new(ArcSwap::from_pointee(PanelData::default())),
            callbacks: Arc::new(CallbackRegistry::default()),
            channel: Mutex::new(None),
            stream_task: Mutex::new(None),
            connected: AtomicBool::new(false),
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capabilities(&self) -> PanelCapability {
        PanelCapability::GEN3
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Notifications whose metric instance had no topology entry.
    pub fn discarded_notifications(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Connect and run two-phase topology discovery.
    pub async fn connect(&self) -> PanelResult<()> {
        let mut channel = self.open_channel().await?;

        let payload = call(
            &mut channel,
            RpcMethod::GetInstances,
            Bytes::new(),
            self.config.timeout,
        )
        .await?;
        let instances = parse_instances(&payload)?;
        let mut data = pair_topology(&instances)?;

        // Names come from the naming trait of each paired instance, never
        // from the positional id: instance-id offsets differ across panel
        // models, so only the explicit name_iid is reliable.
        let lookups: Vec<(String, u64)> = data
            .circuits
            .values()
            .map(|info| (info.circuit_id.clone(), info.name_iid))
            .collect();
        for (circuit_id, name_iid) in lookups {
            let request = build_revision_request(&data.panel_resource_id, name_iid);
            match call(
                &mut channel,
                RpcMethod::GetRevision,
                request,
                self.config.timeout,
            )
            .await
            .and_then(|payload| parse_revision_name(&payload))
            {
                Ok(Some(name)) if !name.is_empty() => {
                    if let Some(info) = data.circuits.get_mut(&circuit_id) {
                        info.name = name;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(circuit_id = %circuit_id, name_iid, error = %e, "name lookup failed");
                }
            }
        }

        let circuit_count = data.circuits.len();
        self.data.store(Arc::new(data));
        *self.channel.lock().await = Some(channel);
        self.connected.store(true, Ordering::Release);
        info!(
            addr = %self.config.addr(),
            circuits = circuit_count,
            "connected to G3 panel"
        );
        Ok(())
    }

    /// Probe reachability without touching client state. Opens a throwaway
    /// channel, issues one `GetInstances`, and closes it.
    pub async fn test_connection(&self) -> bool {
        let probe = async {
            let mut channel = self.open_channel().await?;
            let payload =
                call(&mut channel, RpcMethod::GetInstances, Bytes::new(), PROBE_TIMEOUT).await?;
            let _ = channel.close().await;
            Ok::<bool, PanelError>(!payload.is_empty())
        };
        match probe.await {
            Ok(reachable) => reachable,
            Err(e) => {
                debug!(addr = %self.config.addr(), error = %e, "G3 probe failed");
                false
            }
        }
    }

    pub async fn ping(&self) -> bool {
        self.test_connection().await
    }

    /// Register a callback invoked after every applied stream update.
    /// Callbacks run synchronously on the stream task in registration order
    /// and must be short and non-suspending.
    pub fn register_callback(
        &self,
        cb: impl Fn() + Send + Sync + 'static,
    ) -> UnregisterHandle {
        let id = self.callbacks.register(Box::new(cb));
        UnregisterHandle {
            id,
            registry: Arc::downgrade(&self.callbacks),
        }
    }

    /// Start the background subscribe stream. A stream that is already
    /// running is left alone.
    pub async fn start_streaming(&self) -> PanelResult<()> {
        let mut task_guard = self.stream_task.lock().await;
        if task_guard.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(());
        }
        if !self.connected() {
            return Err(PanelError::Rpc("not connected".into()));
        }
        let mut channel = self
            .channel
            .lock()
            .await
            .take()
            .ok_or_else(|| PanelError::Rpc("channel is not open".into()))?;
        channel
            .send(RpcFrame::request(RpcMethod::Subscribe, Bytes::new()))
            .await?;

        let shared = StreamShared {
            config: self.config.clone(),
            data: Arc::clone(&self.data),
            callbacks: Arc::downgrade(&self.callbacks),
            discarded: Arc::clone(&self.discarded),
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream_loop(shared, channel, cancel.child_token()));
        *task_guard = Some(StreamTask { cancel, handle });
        Ok(())
    }

    /// Stop the stream and wait for the task with a bounded join timeout.
    /// Idempotent.
    pub async fn stop_streaming(&self) {
        let task = self.stream_task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            match timeout(STOP_JOIN_TIMEOUT, task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "stream task join failed"),
                Err(_) => warn!("stream task did not stop within the join timeout"),
            }
        }
    }

    /// Close the connection; implies `stop_streaming`.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.stop_streaming().await;
        let mut guard = self.channel.lock().await;
        if let Some(mut channel) = guard.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "channel close failed");
            }
        }
    }

    /// Zero-I/O projection of the current reflection.
    pub fn snapshot(&self) -> PanelSnapshot {
        let data = self.data.load();
        let mut circuits = HashMap::with_capacity(data.circuits.len());
        for (circuit_id, info) in &data.circuits {
            let metrics = data.metrics.get(circuit_id).copied().unwrap_or_default();
            circuits.insert(
                circuit_id.clone(),
                CircuitSnapshot {
                    circuit_id: circuit_id.clone(),
                    name: info.name.clone(),
                    power_w: metrics.power_w,
                    voltage_v: Some(metrics.voltage_v),
                    current_a: Some(metrics.current_a),
                    is_on: metrics.is_on,
                    is_dual_phase: info.is_dual_phase,
                    relay_state: None,
                    priority: None,
                    tabs: None,
                    energy_consumed_wh: None,
                    energy_produced_wh: None,
                    apparent_power_va: Some(metrics.apparent_power_va),
                    reactive_power_var: Some(metrics.reactive_power_var),
                    power_factor: Some(metrics.power_factor),
                },
            );
        }
        PanelSnapshot {
            generation: PanelGeneration::Gen3,
            serial_number: data.serial.clone(),
            firmware_version: None,
            main_power_w: data.main_feed.power_w,
            main_voltage_v: Some(data.main_feed.voltage_v),
            main_current_a: Some(data.main_feed.current_a),
            main_frequency_hz: Some(data.main_feed.frequency_hz),
            grid_power_w: None,
            battery_soe: None,
            battery_max_energy_kwh: None,
            dsm_state: None,
            main_relay_state: None,
            door_state: None,
            circuits,
        }
    }

    /// Raw reflection for advanced callers.
    pub fn data(&self) -> Arc<PanelData> {
        self.data.load_full()
    }

    async fn open_channel(&self) -> PanelResult<Channel> {
        let addr = self.config.addr();
        let stream = timeout(self.config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PanelError::RpcConnect(format!("connect to {addr} timed out")))?
            .map_err(|e| PanelError::RpcConnect(format!("connect to {addr} failed: {e}")))?;
        Ok(Framed::new(stream, RpcCodec))
    }
}

/// Pair sorted name/metric instance lists positionally into topology.
/// Unequal list lengths mean the panel reported an inconsistent trait set.
fn pair_topology(instances: &InstanceLists) -> PanelResult<PanelData> {
    if instances.name_iids.len() != instances.metric_iids.len() {
        return Err(PanelError::TopologyMismatch {
            names: instances.name_iids.len(),
            metrics: instances.metric_iids.len(),
        });
    }
    let mut data = PanelData {
        serial: instances.panel_resource_id.clone(),
        panel_resource_id: instances.panel_resource_id.clone(),
        ..PanelData::default()
    };
    for (idx, (name_iid, metric_iid)) in instances
        .name_iids
        .iter()
        .zip(&instances.metric_iids)
        .enumerate()
    {
        let circuit_id = (idx + 1).to_string();
        data.circuits.insert(
            circuit_id.clone(),
            CircuitInfo {
                circuit_id: circuit_id.clone(),
                name: format!("Circuit {circuit_id}"),
                name_iid: *name_iid,
                metric_iid: *metric_iid,
                is_dual_phase: false,
                breaker_position: (idx + 1) as u32,
            },
        );
        data.metric_iid_to_circuit.insert(*metric_iid, circuit_id);
    }
    Ok(data)
}

/// Send one request and await its response frame.
async fn call(
    channel: &mut Channel,
    method: RpcMethod,
    payload: impl Into<Bytes>,
    deadline: Duration,
) -> PanelResult<Bytes> {
    channel.send(RpcFrame::request(method, payload)).await?;
    let frame = timeout(deadline, channel.next())
        .await
        .map_err(|_| PanelError::Timeout(deadline))?
        .ok_or_else(|| PanelError::Rpc("channel closed".into()))??;
    match frame.kind {
        FrameKind::Response if frame.method == method => Ok(frame.payload),
        FrameKind::Error => Err(PanelError::Rpc(
            String::from_utf8_lossy(&frame.payload).into_owned(),
        )),
        kind => Err(PanelError::Rpc(format!(
            "unexpected {kind:?} frame while awaiting {method:?} response"
        ))),
    }
}

/// Decode one stream notification into the reflection. Returns whether
/// anything changed; unknown metric instances are counted and discarded.
fn apply_notification(shared: &StreamShared, payload: &[u8]) -> PanelResult<bool> {
    let Some(notification) = parse_notification(payload)? else {
        return Ok(false);
    };
    if notification.trait_id != TRAIT_POWER_METRICS {
        return Ok(false);
    }

    let current = shared.data.load_full();
    let mut next = (*current).clone();
    let mut updated = false;

    for raw in &notification.metrics {
        if notification.instance_id == MAIN_FEED_IID {
            next.main_feed = decode_main_feed(raw)?;
            updated = true;
            continue;
        }
        let Some(circuit_id) = next
            .metric_iid_to_circuit
            .get(&notification.instance_id)
            .cloned()
        else {
            shared.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                iid = notification.instance_id,
                "discarding notification for unknown metric instance"
            );
            continue;
        };
        // Dual-phase payloads (field 12) are checked before single-phase
        // (field 11); the more specific shape wins.
        if let Some(dual) = first_bytes(raw, 12)? {
            next.metrics.insert(circuit_id.clone(), decode_dual_phase(dual)?);
            if let Some(info) = next.circuits.get_mut(&circuit_id) {
                info.is_dual_phase = true;
            }
            updated = true;
        } else if let Some(single) = first_bytes(raw, 11)? {
            next.metrics.insert(circuit_id.clone(), decode_single_phase(single)?);
            if let Some(info) = next.circuits.get_mut(&circuit_id) {
                info.is_dual_phase = false;
            }
            updated = true;
        }
    }

    if updated {
        shared.data.store(Arc::new(next));
    }
    Ok(updated)
}

async fn stream_loop(shared: StreamShared, mut channel: Channel, cancel: CancellationToken) {
    loop {
        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                frame = channel.next() => match frame {
                    Some(Ok(frame)) if frame.kind == FrameKind::StreamItem => {
                        match apply_notification(&shared, &frame.payload) {
                            Ok(true) => {
                                if let Some(registry) = shared.callbacks.upgrade() {
                                    registry.invoke_all();
                                }
                            }
                            Ok(false) => {}
                            Err(e) => debug!(error = %e, "skipping malformed notification"),
                        }
                    }
                    Some(Ok(frame)) => {
                        debug!(kind = ?frame.kind, "ignoring non-stream frame");
                    }
                    Some(Err(e)) => break format!("stream decode failed: {e}"),
                    None => break "stream closed by peer".to_string(),
                }
            }
        };
        warn!(reason = %reason, "subscribe stream interrupted; reconnecting");

        let mut backoff = reconnect_backoff();
        channel = loop {
            if cancel.is_cancelled() {
                return;
            }
            match resubscribe(&shared).await {
                Ok(channel) => break channel,
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(RECONNECT_MAX_DELAY);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "resubscribe failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };
        info!("subscribe stream re-established");
    }
}

async fn resubscribe(shared: &StreamShared) -> PanelResult<Channel> {
    let addr = shared.config.addr();
    let stream = timeout(shared.config.timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| PanelError::RpcConnect(format!("connect to {addr} timed out")))?
        .map_err(|e| PanelError::RpcConnect(format!("connect to {addr} failed: {e}")))?;
    let mut channel = Framed::new(stream, RpcCodec);
    channel
        .send(RpcFrame::request(RpcMethod::Subscribe, Bytes::new()))
        .await?;
    Ok(channel)
}

fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: RECONNECT_MAX_DELAY,
        randomization_factor: 0.2,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}
