//! G2 wire model: the JSON shapes spoken by the panel's HTTP API.
//!
//! A thin adapter over the vendor surface: the transport and the simulation
//! engine both produce/consume these shapes, and the rest of the library only
//! reads the fields it projects into snapshots.

use crate::{CircuitPriority, DoorState, RelayState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIn {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOut {
    pub access_token: String,
    pub token_type: String,
    pub iat_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOut {
    pub software: SoftwareStatus,
    pub system: SystemStatus,
    pub network: NetworkStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareStatus {
    pub firmware_version: String,
    pub update_status: String,
    pub env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub manufacturer: String,
    pub serial: String,
    pub model: String,
    pub door_state: DoorState,
    pub proximity_proven: bool,
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub eth0_link: bool,
    pub wlan_link: bool,
    pub wwan_link: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyAccum {
    pub produced_energy_wh: f64,
    pub consumed_energy_wh: f64,
}

/// One physical breaker position in the panel-state branch list.
///
/// `priority` is optional on the wire; older firmware omits it and the
/// virtual-circuit synthesis then falls back to `NonEssential`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub relay_state: RelayState,
    #[serde(default)]
    pub priority: CircuitPriority,
    pub instant_power_w: f64,
    pub imported_active_energy_wh: f64,
    pub exported_active_energy_wh: f64,
    pub measure_start_ts_ms: u64,
    pub measure_duration_ms: u64,
    pub is_measure_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub instant_grid_power_w: f64,
    pub instant_panel_state_of_energy_percent: f64,
    pub serial_number: String,
    pub main_relay_state: RelayState,
    pub dsm_grid_state: String,
    pub dsm_state: String,
    pub main_meter_energy: EnergyAccum,
    pub feedthrough_power_w: f64,
    pub feedthrough_energy: EnergyAccum,
    pub grid_sample_start_ms: u64,
    pub grid_sample_end_ms: u64,
    pub current_run_config: u32,
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitsOut {
    pub circuits: HashMap<String, Circuit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circuit {
    pub id: String,
    pub name: String,
    pub relay_state: RelayState,
    pub instant_power_w: f64,
    pub instant_power_update_time_s: u64,
    pub produced_energy_wh: f64,
    pub consumed_energy_wh: f64,
    pub energy_accum_update_time_s: u64,
    /// Ordered 1-based panel positions.
    pub tabs: Vec<u32>,
    pub priority: CircuitPriority,
    pub is_user_controllable: bool,
    pub is_sheddable: bool,
    pub is_never_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateOfEnergy {
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_energy_kwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSoe {
    pub soe: StateOfEnergy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStateIn {
    pub relay_state: RelayState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityIn {
    pub priority: CircuitPriority,
}

/// Body of the circuit-state write endpoint; exactly one member is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStateIn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_state_in: Option<RelayStateIn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_in: Option<PriorityIn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_roundtrips_camel_case() {
        let json = r#"{
            "id": "c1", "name": "Kitchen", "relayState": "CLOSED",
            "instantPowerW": 150.0, "instantPowerUpdateTimeS": 10,
            "producedEnergyWh": 0.0, "consumedEnergyWh": 42.5,
            "energyAccumUpdateTimeS": 10, "tabs": [1, 3],
            "priority": "MUST_HAVE", "isUserControllable": true,
            "isSheddable": false, "isNeverBackup": false
        }"#;
        let circuit: Circuit = serde_json::from_str(json).unwrap();
        assert_eq!(circuit.relay_state, RelayState::Closed);
        assert_eq!(circuit.priority, CircuitPriority::MustHave);
        assert_eq!(circuit.tabs, vec![1, 3]);
    }

    #[test]
    fn branch_priority_defaults_when_absent() {
        let json = r#"{
            "id": "branch_2", "relayState": "CLOSED", "instantPowerW": -2500.0,
            "importedActiveEnergyWh": 100.0, "exportedActiveEnergyWh": 0.0,
            "measureStartTsMs": 0, "measureDurationMs": 5000, "isMeasureValid": true
        }"#;
        let branch: Branch = serde_json::from_str(json).unwrap();
        assert_eq!(branch.priority, CircuitPriority::NonEssential);
    }

    #[test]
    fn write_body_serializes_only_the_set_member() {
        let body = CircuitStateIn {
            relay_state_in: Some(RelayStateIn { relay_state: RelayState::Open }),
            priority_in: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("relayStateIn"));
        assert!(!json.contains("priorityIn"));
    }
}
