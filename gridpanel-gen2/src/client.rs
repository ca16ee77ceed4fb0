//! G2 transport client.
//!
//! Typed HTTP against the panel's JSON API, with bearer-token lifecycle, a
//! per-endpoint time-window cache, transient-error retry and virtual
//! unmapped-circuit synthesis. In simulation mode the wire calls are replaced
//! by the simulation engine while caching and synthesis behave identically.

use crate::cache::TimedCache;
use crate::retry::{with_retries, RetryPolicy};
use crate::unmapped::synthesize_unmapped;
use arc_swap::ArcSwapOption;
use gridpanel_error::{PanelError, PanelResult};
use gridpanel_models::gen2::{
    AuthIn, AuthOut, CircuitStateIn, CircuitsOut, PanelState, PriorityIn, RelayStateIn,
    StatusOut, StorageSoe,
};
use gridpanel_models::{
    CircuitPriority, CircuitSnapshot, PanelCapability, PanelGeneration, PanelSnapshot, RelayState,
};
use gridpanel_sim::{CircuitOverride, GlobalOverrides, SimulationEngine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_HTTP_PORT: u16 = 80;

const KEY_STATUS: &str = "status";
const KEY_PANEL_STATE: &str = "panel_state";
const KEY_CIRCUITS: &str = "circuits";
const KEY_STORAGE_SOE: &str = "storage_soe";
const KEY_STATUS_SIM: &str = "status_sim";
const KEY_STORAGE_SOE_SIM: &str = "storage_soe_sim";
const KEY_FULL_SIM_DATA: &str = "full_sim_data";

#[derive(Debug, Clone)]
pub struct Gen2Config {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub use_ssl: bool,
    /// Zero disables caching.
    pub cache_window: Duration,
    pub retry: RetryPolicy,
    pub simulation_mode: bool,
    pub simulation_config_path: Option<PathBuf>,
    /// Fixed simulated clock origin, RFC 3339 or `YYYY-MM-DDTHH:MM:SS`.
    pub simulation_start_time: Option<String>,
}

impl Gen2Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_HTTP_PORT,
            timeout: Duration::from_secs(30),
            use_ssl: false,
            cache_window: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            simulation_mode: false,
            simulation_config_path: None,
            simulation_start_time: None,
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

    pub fn with_use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_cache_window(mut self, window: Duration) -> Self {
        self.cache_window = window;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_simulation(mut self, config_path: impl AsRef<std::path::Path>) -> Self {
        self.simulation_mode = true;
        self.simulation_config_path = Some(config_path.as_ref().to_path_buf());
        self
    }

    pub fn with_simulation_start_time(mut self, start_time: impl Into<String>) -> Self {
        self.simulation_start_time = Some(start_time.into());
        self
    }
}

/// One cached payload; the key namespace is flat so write operations can
/// drop everything at once.
#[derive(Debug, Clone)]
enum CacheSlot {
    Status(StatusOut),
    Panel(PanelState),
    Circuits(CircuitsOut),
    Soe(StorageSoe),
    SimStatus(StatusOut),
    SimSoe(StorageSoe),
    SimData(Box<(PanelState, CircuitsOut)>),
}

#[derive(Debug)]
pub struct Gen2Client {
    config: Gen2Config,
    http: reqwest::Client,
    base_url: String,
    token: ArcSwapOption<String>,
    /// Registration used by `authenticate`, kept for forced re-auth.
    credentials: Mutex<Option<(String, String)>>,
    cache: Mutex<TimedCache<CacheSlot>>,
    sim: Option<SimulationEngine>,
}

impl Gen2Client {
    pub fn new(config: Gen2Config) -> PanelResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if config.use_ssl {
            // Panels serve self-signed certificates.
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| PanelError::Config(format!("HTTP client setup failed: {e}")))?;

        let scheme = if config.use_ssl { "https" } else { "http" };
        let base_url = format!("{scheme}://{}:{}", config.host, config.port);

        let sim = if config.simulation_mode {
            let path = config.simulation_config_path.as_ref().ok_or_else(|| {
                PanelError::Config(
                    "simulation_mode requires simulation_config_path".into(),
                )
            })?;
            Some(SimulationEngine::from_path(
                path,
                Some(config.host.clone()),
                config.simulation_start_time.as_deref(),
            )?)
        } else {
            None
        };

        Ok(Self {
            cache: Mutex::new(TimedCache::new(config.cache_window)),
            http,
            base_url,
            token: ArcSwapOption::from(None),
            credentials: Mutex::new(None),
            sim,
            config,
        })
    }

    pub fn capabilities(&self) -> PanelCapability {
        PanelCapability::GEN2
    }

    /// Simulation engine, when running in simulation mode.
    pub fn simulation(&self) -> Option<&SimulationEngine> {
        self.sim.as_ref()
    }

    /// Install an externally supplied bearer token. Cached panel data is not
    /// user-specific and stays valid across token changes.
    pub fn set_access_token(&self, token: impl Into<String>) {
        self.token.store(Some(Arc::new(token.into())));
    }

    /// Register this client with the panel and store the returned token.
    pub async fn authenticate(&self, name: &str, description: &str) -> PanelResult<AuthOut> {
        if self.sim.is_some() {
            let auth = AuthOut {
                access_token: format!("sim-token-{name}"),
                token_type: "Bearer".into(),
                iat_ms: 0,
            };
            self.set_access_token(auth.access_token.clone());
            return Ok(auth);
        }

        let body = AuthIn {
            name: name.to_string(),
            description: description.to_string(),
        };
        let auth: AuthOut = with_retries(&self.config.retry, || {
            self.post_json("/api/v1/auth/register", &body)
        })
        .await?;

        self.set_access_token(auth.access_token.clone());
        *self.credentials.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((name.to_string(), description.to_string()));
        info!(client_name = name, "registered with panel");
        Ok(auth)
    }

    pub async fn status(&self) -> PanelResult<StatusOut> {
        if let Some(engine) = &self.sim {
            if let Some(CacheSlot::SimStatus(cached)) = self.cache_get(KEY_STATUS_SIM) {
                return Ok(cached);
            }
            let value = engine.status();
            self.cache_put(KEY_STATUS_SIM, CacheSlot::SimStatus(value.clone()));
            return Ok(value);
        }

        if let Some(CacheSlot::Status(cached)) = self.cache_get(KEY_STATUS) {
            return Ok(cached);
        }
        let value: StatusOut = self.get_with_policies("/api/v1/status").await?;
        self.cache_put(KEY_STATUS, CacheSlot::Status(value.clone()));
        Ok(value)
    }

    pub async fn panel_state(&self) -> PanelResult<PanelState> {
        if let Some(engine) = &self.sim {
            return Ok(self.sim_bundle(engine).0);
        }

        if let Some(CacheSlot::Panel(cached)) = self.cache_get(KEY_PANEL_STATE) {
            return Ok(cached);
        }
        let value: PanelState = self.get_with_policies("/api/v1/panel").await?;
        self.cache_put(KEY_PANEL_STATE, CacheSlot::Panel(value.clone()));
        Ok(value)
    }

    /// Circuits with virtual entries for every unmapped position.
    ///
    /// The raw response is cached; synthesis is re-applied on every read so a
    /// cache hit paired with a cached panel state still yields a complete
    /// position-aligned view. Without a cached panel state the raw cached
    /// response is returned as-is.
    pub async fn circuits(&self) -> PanelResult<CircuitsOut> {
        if let Some(engine) = &self.sim {
            let (panel, mut circuits) = self.sim_bundle(engine);
            synthesize_unmapped(&mut circuits, &panel);
            return Ok(circuits);
        }

        if let Some(CacheSlot::Circuits(mut cached)) = self.cache_get(KEY_CIRCUITS) {
            if let Some(CacheSlot::Panel(panel)) = self.cache_get(KEY_PANEL_STATE) {
                synthesize_unmapped(&mut cached, &panel);
            }
            return Ok(cached);
        }

        let raw: CircuitsOut = self.get_with_policies("/api/v1/circuits").await?;
        let panel = self.panel_state().await?;
        self.cache_put(KEY_CIRCUITS, CacheSlot::Circuits(raw.clone()));
        let mut augmented = raw;
        synthesize_unmapped(&mut augmented, &panel);
        Ok(augmented)
    }

    pub async fn storage_soe(&self) -> PanelResult<StorageSoe> {
        if let Some(engine) = &self.sim {
            if let Some(CacheSlot::SimSoe(cached)) = self.cache_get(KEY_STORAGE_SOE_SIM) {
                return Ok(cached);
            }
            let value = engine.storage_soe();
            self.cache_put(KEY_STORAGE_SOE_SIM, CacheSlot::SimSoe(value.clone()));
            return Ok(value);
        }

        if let Some(CacheSlot::Soe(cached)) = self.cache_get(KEY_STORAGE_SOE) {
            return Ok(cached);
        }
        let value: StorageSoe = self.get_with_policies("/api/v1/storage/soe").await?;
        self.cache_put(KEY_STORAGE_SOE, CacheSlot::Soe(value.clone()));
        Ok(value)
    }

    /// Open or close a circuit relay. Every cache key is invalid once this
    /// returns, whether the write succeeded or not.
    pub async fn set_circuit_relay(
        &self,
        circuit_id: &str,
        relay: RelayState,
    ) -> PanelResult<()> {
        let result = if let Some(engine) = &self.sim {
            engine.set_relay(circuit_id, relay)
        } else {
            let body = CircuitStateIn {
                relay_state_in: Some(RelayStateIn { relay_state: relay }),
                priority_in: None,
            };
            self.post_circuit_state(circuit_id, &body).await
        };
        self.clear_cache();
        result
    }

    /// Set a circuit's load-shedding priority. Clears the cache like every
    /// write.
    pub async fn set_circuit_priority(
        &self,
        circuit_id: &str,
        priority: CircuitPriority,
    ) -> PanelResult<()> {
        let result = if let Some(engine) = &self.sim {
            engine.set_priority(circuit_id, priority)
        } else {
            let body = CircuitStateIn {
                relay_state_in: None,
                priority_in: Some(PriorityIn { priority }),
            };
            self.post_circuit_state(circuit_id, &body).await
        };
        self.clear_cache();
        result
    }

    /// Simulation-only: install per-circuit overrides.
    pub fn set_circuit_overrides(
        &self,
        overrides: HashMap<String, CircuitOverride>,
    ) -> PanelResult<()> {
        self.sim_engine()?.set_circuit_overrides(overrides);
        self.clear_cache();
        Ok(())
    }

    /// Simulation-only: drop all overrides. Idempotent.
    pub fn clear_circuit_overrides(&self) -> PanelResult<()> {
        self.sim_engine()?.clear_circuit_overrides();
        self.clear_cache();
        Ok(())
    }

    /// Simulation-only: engine-wide overrides such as a power multiplier.
    pub fn set_global_overrides(&self, overrides: GlobalOverrides) -> PanelResult<()> {
        self.sim_engine()?.set_global_overrides(overrides);
        self.clear_cache();
        Ok(())
    }

    /// Cheap reachability probe used by the factory.
    pub async fn ping(&self) -> bool {
        match self.status().await {
            Ok(_) => true,
            Err(e) => {
                debug!(host = %self.config.host, error = %e, "G2 ping failed");
                false
            }
        }
    }

    /// Issue the four read endpoints concurrently and project the result.
    pub async fn snapshot(&self) -> PanelResult<PanelSnapshot> {
        let (status, panel, circuits, soe) = tokio::try_join!(
            self.status(),
            self.panel_state(),
            self.circuits(),
            self.storage_soe()
        )?;

        let mut snapshot_circuits = HashMap::with_capacity(circuits.circuits.len());
        for (circuit_id, circuit) in circuits.circuits {
            snapshot_circuits.insert(
                circuit_id.clone(),
                CircuitSnapshot {
                    circuit_id,
                    name: circuit.name,
                    power_w: circuit.instant_power_w,
                    voltage_v: None,
                    current_a: None,
                    is_on: circuit.relay_state == RelayState::Closed,
                    is_dual_phase: circuit.tabs.len() == 2,
                    relay_state: Some(circuit.relay_state),
                    priority: Some(circuit.priority),
                    tabs: Some(circuit.tabs),
                    energy_consumed_wh: Some(circuit.consumed_energy_wh),
                    energy_produced_wh: Some(circuit.produced_energy_wh),
                    apparent_power_va: None,
                    reactive_power_var: None,
                    power_factor: None,
                },
            );
        }

        Ok(PanelSnapshot {
            generation: PanelGeneration::Gen2,
            serial_number: status.system.serial,
            firmware_version: Some(status.software.firmware_version),
            main_power_w: panel.instant_grid_power_w,
            main_voltage_v: None,
            main_current_a: None,
            main_frequency_hz: None,
            grid_power_w: Some(panel.instant_grid_power_w),
            battery_soe: Some(soe.soe.percentage / 100.0),
            battery_max_energy_kwh: soe.soe.max_energy_kwh,
            dsm_state: Some(panel.dsm_state),
            main_relay_state: Some(panel.main_relay_state),
            door_state: Some(status.system.door_state),
            circuits: snapshot_circuits,
        })
    }

    /// Release client resources. The HTTP pool closes on drop; this exists
    /// for parity with the streaming transport's teardown path.
    pub async fn close(&self) {
        self.clear_cache();
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn sim_engine(&self) -> PanelResult<&SimulationEngine> {
        self.sim
            .as_ref()
            .ok_or_else(|| PanelError::Validation("simulation mode is not enabled".into()))
    }

    /// Panel + circuits from one engine tick, bundled under a single cache
    /// key so both stay aligned.
    fn sim_bundle(&self, engine: &SimulationEngine) -> (PanelState, CircuitsOut) {
        if let Some(CacheSlot::SimData(bundle)) = self.cache_get(KEY_FULL_SIM_DATA) {
            return *bundle;
        }
        let bundle = engine.panel_data();
        self.cache_put(
            KEY_FULL_SIM_DATA,
            CacheSlot::SimData(Box::new(bundle.clone())),
        );
        bundle
    }

    fn cache_get(&self, key: &str) -> Option<CacheSlot> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(key)
    }

    fn cache_put(&self, key: &str, slot: CacheSlot) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, slot);
    }

    fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> PanelError {
        if e.is_timeout() {
            PanelError::Timeout(self.config.timeout)
        } else {
            PanelError::NetworkConnect(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> PanelResult<T> {
        let status = response.status().as_u16();
        if status == 200 {
            response
                .json::<T>()
                .await
                .map_err(|e| PanelError::Validation(format!("response schema mismatch: {e}")))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(PanelError::from_status(status, detail))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> PanelResult<T> {
        let mut request = self.http.get(self.url(path));
        if let Some(token) = self.token.load_full() {
            request = request.bearer_auth(token.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        self.decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> PanelResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(token) = self.token.load_full() {
            request = request.bearer_auth(token.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        self.decode(response).await
    }

    /// Retry-wrapped GET with the single forced re-authentication pass.
    async fn get_with_policies<T: DeserializeOwned>(&self, path: &str) -> PanelResult<T> {
        let result = with_retries(&self.config.retry, || self.get_json::<T>(path)).await;
        self.recover_auth(result, || self.get_json::<T>(path)).await
    }

    async fn post_circuit_state(
        &self,
        circuit_id: &str,
        body: &CircuitStateIn,
    ) -> PanelResult<()> {
        let path = format!("/api/v1/circuits/{circuit_id}");
        let result = with_retries(&self.config.retry, || {
            self.post_json::<_, serde_json::Value>(&path, body)
        })
        .await;
        self.recover_auth(result, || self.post_json::<_, serde_json::Value>(&path, body))
            .await
            .map(|_| ())
    }

    /// One forced re-authentication after an auth failure, then a single
    /// non-retried repeat of the operation. Only possible when the caller
    /// authenticated through this client (we have its registration).
    async fn recover_auth<T, F, Fut>(&self, result: PanelResult<T>, retry_once: F) -> PanelResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PanelResult<T>>,
    {
        match result {
            Err(e) if e.is_auth() => {
                let credentials = self
                    .credentials
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match credentials {
                    Some((name, description)) => {
                        warn!("authentication rejected; forcing one re-authentication");
                        self.authenticate(&name, &description).await?;
                        retry_once().await
                    }
                    None => Err(e),
                }
            }
            other => other,
        }
    }
}
