//! Declarative simulation configuration.
//!
//! Loaded from YAML; every structural problem is reported as a
//! [`PanelError::Config`] before the engine starts producing data.

use gridpanel_error::{PanelError, PanelResult};
use gridpanel_models::{validate_tab_pair, CircuitPriority};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Energy profile of a template: which direction power flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyMode {
    Consumer,
    Producer,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayBehavior {
    Controllable,
    NonControllable,
}

/// How a synchronized group's power is distributed across its positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSplit {
    Equal,
    PrimarySecondary,
    CustomRatio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub serial_number: String,
    pub total_tabs: u32,
    /// Main breaker size in amps.
    pub main_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclingPattern {
    /// Seconds spent in the on window.
    pub on_duration: u64,
    /// Seconds spent in the off window.
    pub off_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfDayProfile {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub peak_hours: Vec<u32>,
    #[serde(default = "TimeOfDayProfile::default_peak_multiplier")]
    pub peak_multiplier: f64,
    #[serde(default = "TimeOfDayProfile::default_off_peak_multiplier")]
    pub off_peak_multiplier: f64,
    /// Exact multiplier per hour of day; takes precedence over peak hours.
    #[serde(default)]
    pub hourly_multipliers: HashMap<u32, f64>,
}

impl TimeOfDayProfile {
    fn default_peak_multiplier() -> f64 {
        1.3
    }

    fn default_off_peak_multiplier() -> f64 {
        0.3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartBehavior {
    #[serde(default)]
    pub responds_to_grid: bool,
    /// Fraction of power shed under grid stress, 0..1.
    #[serde(default = "SmartBehavior::default_max_power_reduction")]
    pub max_power_reduction: f64,
}

impl SmartBehavior {
    fn default_max_power_reduction() -> f64 {
        0.5
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryBehavior {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub charge_hours: Vec<u32>,
    #[serde(default)]
    pub discharge_hours: Vec<u32>,
    #[serde(default)]
    pub idle_hours: Vec<u32>,
    /// Negative: charging draws from the grid side of the meter.
    #[serde(default = "BatteryBehavior::default_max_charge_power")]
    pub max_charge_power: f64,
    #[serde(default = "BatteryBehavior::default_max_discharge_power")]
    pub max_discharge_power: f64,
    /// Hour -> charge intensity, 0..1.
    #[serde(default)]
    pub solar_intensity_profile: HashMap<u32, f64>,
    /// Hour -> discharge demand factor, 0..1.
    #[serde(default)]
    pub demand_factor_profile: HashMap<u32, f64>,
    #[serde(default = "BatteryBehavior::default_idle_power_range")]
    pub idle_power_range: [f64; 2],
}

impl BatteryBehavior {
    fn default_max_charge_power() -> f64 {
        -3000.0
    }

    fn default_max_discharge_power() -> f64 {
        2500.0
    }

    fn default_idle_power_range() -> [f64; 2] {
        [-100.0, 100.0]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTemplate {
    pub mode: EnergyMode,
    /// Closed interval `[min, max]` in watts.
    pub power_range: [f64; 2],
    pub typical_power: f64,
    /// Relative variation applied per tick, 0..1.
    #[serde(default)]
    pub power_variation: f64,
    #[serde(default)]
    pub efficiency: Option<f64>,
    pub relay_behavior: RelayBehavior,
    pub priority: CircuitPriority,
    #[serde(default)]
    pub cycling_pattern: Option<CyclingPattern>,
    #[serde(default)]
    pub time_of_day_profile: Option<TimeOfDayProfile>,
    #[serde(default)]
    pub smart_behavior: Option<SmartBehavior>,
    #[serde(default)]
    pub battery_behavior: Option<BatteryBehavior>,
}

/// Per-circuit template overrides; unset fields keep the template value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateOverrides {
    #[serde(default)]
    pub typical_power: Option<f64>,
    #[serde(default)]
    pub power_variation: Option<f64>,
    #[serde(default)]
    pub power_range: Option<[f64; 2]>,
    #[serde(default)]
    pub priority: Option<CircuitPriority>,
    #[serde(default)]
    pub relay_behavior: Option<RelayBehavior>,
}

impl TemplateOverrides {
    pub fn apply(&self, template: &mut CircuitTemplate) {
        if let Some(v) = self.typical_power {
            template.typical_power = v;
        }
        if let Some(v) = self.power_variation {
            template.power_variation = v;
        }
        if let Some(v) = self.power_range {
            template.power_range = v;
        }
        if let Some(v) = self.priority {
            template.priority = v;
        }
        if let Some(v) = self.relay_behavior {
            template.relay_behavior = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitDef {
    pub id: String,
    pub name: String,
    pub template: String,
    /// 1-based panel positions occupied by the circuit.
    pub tabs: Vec<u32>,
    #[serde(default)]
    pub overrides: Option<TemplateOverrides>,
}

/// Positions that behave as one multi-leg load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabSynchronization {
    pub tabs: Vec<u32>,
    pub power_split: PowerSplit,
    /// Required for `custom_ratio`; one weight per position.
    #[serde(default)]
    pub ratios: Vec<f64>,
    /// Accumulate one shared energy pair for the whole group.
    #[serde(default)]
    pub energy_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    #[serde(default = "SimulationParams::default_update_interval")]
    pub update_interval: u64,
    #[serde(default = "SimulationParams::default_time_acceleration")]
    pub time_acceleration: f64,
    /// Extra uniform noise applied on top of per-template variation.
    #[serde(default = "SimulationParams::default_noise_factor")]
    pub noise_factor: f64,
    #[serde(default = "default_true")]
    pub enable_realistic_behaviors: bool,
}

impl SimulationParams {
    fn default_update_interval() -> u64 {
        5
    }

    fn default_time_acceleration() -> f64 {
        1.0
    }

    fn default_noise_factor() -> f64 {
        0.02
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            update_interval: Self::default_update_interval(),
            time_acceleration: Self::default_time_acceleration(),
            noise_factor: Self::default_noise_factor(),
            enable_realistic_behaviors: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub panel_config: PanelConfig,
    pub circuit_templates: HashMap<String, CircuitTemplate>,
    pub circuits: Vec<CircuitDef>,
    /// Positions intentionally left without a configured circuit.
    #[serde(default)]
    pub unmapped_tabs: Vec<u32>,
    /// Optional full templates for unmapped positions, keyed by position id.
    #[serde(default)]
    pub unmapped_tab_templates: HashMap<String, CircuitTemplate>,
    #[serde(default)]
    pub tab_synchronizations: Vec<TabSynchronization>,
    #[serde(default)]
    pub simulation_params: SimulationParams,
}

impl SimulationConfig {
    pub fn from_yaml_str(raw: &str) -> PanelResult<Self> {
        let config: SimulationConfig = serde_yaml::from_str(raw)
            .map_err(|e| PanelError::Config(format!("invalid simulation YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> PanelResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PanelError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> PanelResult<()> {
        let total = self.panel_config.total_tabs;
        if total == 0 {
            return Err(PanelError::Config("panel_config.total_tabs must be positive".into()));
        }
        if self.circuit_templates.is_empty() {
            return Err(PanelError::Config("at least one circuit template is required".into()));
        }
        if self.circuits.is_empty() {
            return Err(PanelError::Config("at least one circuit is required".into()));
        }

        for (name, template) in &self.circuit_templates {
            validate_template(name, template)?;
        }

        let mut seen_ids = HashSet::new();
        let mut mapped = HashSet::new();
        for circuit in &self.circuits {
            if !seen_ids.insert(circuit.id.as_str()) {
                return Err(PanelError::Config(format!("duplicate circuit id '{}'", circuit.id)));
            }
            if !self.circuit_templates.contains_key(&circuit.template) {
                return Err(PanelError::Config(format!(
                    "circuit '{}' references undefined template '{}'",
                    circuit.id, circuit.template
                )));
            }
            match circuit.tabs.as_slice() {
                [] => {
                    return Err(PanelError::Config(format!(
                        "circuit '{}' has no tabs",
                        circuit.id
                    )))
                }
                [tab] => {
                    if *tab < 1 || *tab > total {
                        return Err(PanelError::Config(format!(
                            "circuit '{}' tab {tab} is outside the panel (1..={total})",
                            circuit.id
                        )));
                    }
                }
                [a, b] => validate_tab_pair(*a, *b, total)?,
                tabs => {
                    return Err(PanelError::Config(format!(
                        "circuit '{}' occupies {} tabs; at most two are supported",
                        circuit.id,
                        tabs.len()
                    )))
                }
            }
            for tab in &circuit.tabs {
                if !mapped.insert(*tab) {
                    return Err(PanelError::Config(format!(
                        "tab {tab} is claimed by more than one circuit"
                    )));
                }
            }
        }

        for tab in &self.unmapped_tabs {
            if *tab < 1 || *tab > total {
                return Err(PanelError::Config(format!(
                    "unmapped_tabs entry {tab} is outside the panel (1..={total})"
                )));
            }
            if mapped.contains(tab) {
                return Err(PanelError::Config(format!(
                    "unmapped_tabs entry {tab} is already mapped to a circuit"
                )));
            }
        }

        for (key, template) in &self.unmapped_tab_templates {
            let tab: u32 = key.parse().map_err(|_| {
                PanelError::Config(format!("unmapped_tab_templates key '{key}' is not a position"))
            })?;
            if tab < 1 || tab > total {
                return Err(PanelError::Config(format!(
                    "unmapped_tab_templates key {tab} is outside the panel (1..={total})"
                )));
            }
            validate_template(key, template)?;
        }

        for (idx, sync) in self.tab_synchronizations.iter().enumerate() {
            if sync.tabs.len() < 2 {
                return Err(PanelError::Config(format!(
                    "tab_synchronizations[{idx}] needs at least two tabs"
                )));
            }
            for tab in &sync.tabs {
                if *tab < 1 || *tab > total {
                    return Err(PanelError::Config(format!(
                        "tab_synchronizations[{idx}] tab {tab} is outside the panel (1..={total})"
                    )));
                }
            }
            if let [a, b] = sync.tabs.as_slice() {
                validate_tab_pair(*a, *b, total)?;
            }
            if sync.power_split == PowerSplit::CustomRatio && sync.ratios.len() != sync.tabs.len() {
                return Err(PanelError::Config(format!(
                    "tab_synchronizations[{idx}] custom_ratio needs one ratio per tab"
                )));
            }
            if sync.energy_sync {
                let unbacked: Vec<u32> = sync
                    .tabs
                    .iter()
                    .copied()
                    .filter(|t| {
                        !mapped.contains(t) && !self.unmapped_tab_templates.contains_key(&t.to_string())
                    })
                    .collect();
                if !unbacked.is_empty() {
                    return Err(PanelError::Config(format!(
                        "tab_synchronizations[{idx}] requests energy_sync for tabs {unbacked:?} \
                         that no circuit or unmapped template backs"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Synchronization group covering `tab`, if any.
    pub fn sync_group_of(&self, tab: u32) -> Option<(usize, &TabSynchronization)> {
        self.tab_synchronizations
            .iter()
            .enumerate()
            .find(|(_, s)| s.tabs.contains(&tab))
    }
}

fn validate_template(name: &str, template: &CircuitTemplate) -> PanelResult<()> {
    let [min, max] = template.power_range;
    if min > max {
        return Err(PanelError::Config(format!(
            "template '{name}': power_range min {min} exceeds max {max}"
        )));
    }
    if !(0.0..=1.0).contains(&template.power_variation) {
        return Err(PanelError::Config(format!(
            "template '{name}': power_variation must be within 0..1"
        )));
    }
    if let Some(eff) = template.efficiency {
        if !(0.0..=1.0).contains(&eff) {
            return Err(PanelError::Config(format!(
                "template '{name}': efficiency must be within 0..1"
            )));
        }
    }
    match template.mode {
        EnergyMode::Producer if max > 0.0 => Err(PanelError::Config(format!(
            "template '{name}': producers must have a non-positive power_range"
        ))),
        EnergyMode::Consumer if min < 0.0 => Err(PanelError::Config(format!(
            "template '{name}': consumers must have a non-negative power_range"
        ))),
        _ => Ok(()),
    }
}
