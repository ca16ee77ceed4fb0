//! Transport selection.
//!
//! Probe order is G2 first: G2 panels may not answer on the RPC port at all,
//! and the G2 probe is a single cheap HTTP round trip.

use crate::handle::PanelClient;
use gridpanel_error::{PanelError, PanelResult};
use gridpanel_gen2::{Gen2Client, Gen2Config, RetryPolicy};
use gridpanel_gen3::{Gen3Client, Gen3Config};
use gridpanel_models::PanelGeneration;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options accepted by [`create`]; the union of both transports' knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Force a generation instead of probing.
    pub generation: Option<PanelGeneration>,
    /// Defaults to 80 on G2 and 50065 on G3.
    pub port: Option<u16>,
    pub use_ssl: bool,
    /// Bearer token for G2 authenticated endpoints.
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub cache_window: Duration,
    pub retry: RetryPolicy,
    pub simulation_mode: bool,
    pub simulation_config_path: Option<PathBuf>,
    pub simulation_start_time: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            generation: None,
            port: None,
            use_ssl: false,
            access_token: None,
            timeout: Duration::from_secs(30),
            cache_window: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            simulation_mode: false,
            simulation_config_path: None,
            simulation_start_time: None,
        }
    }
}

/// Create a transport client for the panel at `host`.
///
/// With `generation` set the requested transport is constructed directly;
/// otherwise G2 is probed first, then G3, and [`PanelError::NoTransport`] is
/// returned when neither answers.
pub async fn create(host: &str, options: ClientOptions) -> PanelResult<PanelClient> {
    match options.generation {
        Some(PanelGeneration::Gen2) => Ok(PanelClient::Gen2(make_gen2(host, &options)?)),
        Some(PanelGeneration::Gen3) => Ok(PanelClient::Gen3(make_gen3(host, &options))),
        None => auto_detect(host, options).await,
    }
}

fn make_gen2(host: &str, options: &ClientOptions) -> PanelResult<Gen2Client> {
    let mut config = Gen2Config::new(host)
        .with_port(options.port.unwrap_or(gridpanel_gen2::DEFAULT_HTTP_PORT))
        .with_timeout(options.timeout)
        .with_use_ssl(options.use_ssl)
        .with_cache_window(options.cache_window)
        .with_retry(options.retry);
    if options.simulation_mode {
        if let Some(path) = &options.simulation_config_path {
            config = config.with_simulation(path);
        }
        config.simulation_mode = true;
    }
    if let Some(start_time) = &options.simulation_start_time {
        config = config.with_simulation_start_time(start_time);
    }

    let client = Gen2Client::new(config)?;
    if let Some(token) = &options.access_token {
        client.set_access_token(token);
    }
    Ok(client)
}

fn make_gen3(host: &str, options: &ClientOptions) -> Gen3Client {
    let config = Gen3Config::new(host)
        .with_port(options.port.unwrap_or(gridpanel_gen3::DEFAULT_RPC_PORT))
        .with_timeout(options.timeout);
    Gen3Client::new(config)
}

async fn auto_detect(host: &str, options: ClientOptions) -> PanelResult<PanelClient> {
    let gen2 = make_gen2(host, &options)?;
    if timeout(PROBE_TIMEOUT, gen2.ping()).await.unwrap_or(false) {
        info!(host, "auto-detected G2 panel");
        return Ok(PanelClient::Gen2(gen2));
    }
    debug!(host, "G2 probe failed, trying G3");

    let gen3 = make_gen3(host, &options);
    if timeout(PROBE_TIMEOUT, gen3.test_connection())
        .await
        .unwrap_or(false)
    {
        info!(host, "auto-detected G3 panel");
        return Ok(PanelClient::Gen3(gen3));
    }

    Err(PanelError::NoTransport(host.to_string()))
}
