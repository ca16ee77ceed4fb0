use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which hardware generation a client is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelGeneration {
    Gen2,
    Gen3,
}

/// Circuit relay position as reported/accepted by the G2 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    Open,
    Closed,
}

/// Load-shedding priority of a circuit (G2 only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPriority {
    MustHave,
    NiceToHave,
    #[default]
    NonEssential,
}

/// Cabinet door state from the G2 hardware status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoorState {
    Open,
    Closed,
    Unknown,
}

/// Per-circuit projection shared by both transports.
///
/// `power_w` is signed real power; negative values indicate production.
/// Optional fields are transport-specific and stay `None` where the transport
/// does not observe them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub circuit_id: String,
    pub name: String,
    pub power_w: f64,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub is_on: bool,
    /// True iff the circuit occupies two panel positions of opposite legs.
    pub is_dual_phase: bool,
    // G2 only
    pub relay_state: Option<RelayState>,
    pub priority: Option<CircuitPriority>,
    /// Ordered 1-based panel positions backing the circuit.
    pub tabs: Option<Vec<u32>>,
    pub energy_consumed_wh: Option<f64>,
    pub energy_produced_wh: Option<f64>,
    // G3 only
    pub apparent_power_va: Option<f64>,
    pub reactive_power_var: Option<f64>,
    pub power_factor: Option<f64>,
}

/// Caller-visible union of panel state across transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub generation: PanelGeneration,
    pub serial_number: String,
    /// `None` on G3; the streaming protocol does not expose firmware.
    pub firmware_version: Option<String>,
    /// Always present on both transports.
    pub main_power_w: f64,
    // G3 only
    pub main_voltage_v: Option<f64>,
    pub main_current_a: Option<f64>,
    pub main_frequency_hz: Option<f64>,
    // G2 only
    pub grid_power_w: Option<f64>,
    /// Battery state of energy as a 0..1 ratio.
    pub battery_soe: Option<f64>,
    pub battery_max_energy_kwh: Option<f64>,
    pub dsm_state: Option<String>,
    pub main_relay_state: Option<RelayState>,
    pub door_state: Option<DoorState>,
    /// Keyed by circuit identifier; ordering is insignificant.
    pub circuits: HashMap<String, CircuitSnapshot>,
}
