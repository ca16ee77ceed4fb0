//! In-memory reflection of G3 panel state.
//!
//! A single background task owns the write side; readers get a consistent
//! view through an atomically swapped immutable snapshot, so `snapshot()`
//! never blocks and never observes a torn field.

use std::collections::HashMap;

/// Static topology of one circuit, discovered at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitInfo {
    /// Stable 1-based positional slot, as text.
    pub circuit_id: String,
    pub name: String,
    /// Naming-trait instance id, used for `GetRevision` lookups.
    pub name_iid: u64,
    /// Metric-trait instance id, matched against stream notifications.
    pub metric_iid: u64,
    pub is_dual_phase: bool,
    /// Physical slot number when known, 0 otherwise.
    pub breaker_position: u32,
}

/// Latest streamed values for one circuit or the main feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitMetrics {
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub apparent_power_va: f64,
    pub reactive_power_var: f64,
    pub frequency_hz: f64,
    pub power_factor: f64,
    pub is_on: bool,
    // Per-leg values for dual-phase circuits.
    pub voltage_a_v: f64,
    pub voltage_b_v: f64,
    pub current_a_a: f64,
    pub current_b_a: f64,
}

impl Default for CircuitMetrics {
    fn default() -> Self {
        Self {
            power_w: 0.0,
            voltage_v: 0.0,
            current_a: 0.0,
            apparent_power_va: 0.0,
            reactive_power_var: 0.0,
            frequency_hz: 0.0,
            power_factor: 0.0,
            // A breaker with no telemetry yet reads as on; the first
            // notification corrects it from measured voltage.
            is_on: true,
            voltage_a_v: 0.0,
            voltage_b_v: 0.0,
            current_a_a: 0.0,
            current_b_a: 0.0,
        }
    }
}

/// Aggregated panel state fed by discovery and the subscribe stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelData {
    pub serial: String,
    pub firmware: String,
    pub panel_resource_id: String,
    pub circuits: HashMap<String, CircuitInfo>,
    pub metrics: HashMap<String, CircuitMetrics>,
    pub main_feed: CircuitMetrics,
    /// Reverse map for O(1) dispatch of stream notifications.
    pub metric_iid_to_circuit: HashMap<u64, String>,
}
