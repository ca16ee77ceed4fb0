//! Simulation engine: serves the same read surface as the live G2 transport,
//! generated from the declarative configuration instead of the wire.
//!
//! One tick happens per requested read; panel state and circuits always come
//! from the same tick so panel totals equal circuit sums exactly.

use crate::behavior::BehaviorEngine;
use crate::clock::{hour_of_day, SimClock};
use crate::config::{PowerSplit, RelayBehavior, SimulationConfig};
use gridpanel_error::{PanelError, PanelResult};
use gridpanel_models::gen2::{
    Branch, Circuit, CircuitsOut, EnergyAccum, NetworkStatus, PanelState, SoftwareStatus,
    StateOfEnergy, StatusOut, StorageSoe, SystemStatus,
};
use gridpanel_models::{CircuitPriority, DoorState, RelayState};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

/// Runtime override for one circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CircuitOverride {
    pub power_override: Option<f64>,
    pub power_multiplier: Option<f64>,
    pub relay_state: Option<RelayState>,
    pub priority: Option<CircuitPriority>,
}

/// Engine-wide overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalOverrides {
    /// Scales every generated power value.
    pub power_multiplier: f64,
}

impl Default for GlobalOverrides {
    fn default() -> Self {
        Self { power_multiplier: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EnergyKey {
    Tab(u32),
    Group(usize),
}

#[derive(Debug, Clone, Copy, Default)]
struct EnergyPair {
    consumed_wh: f64,
    produced_wh: f64,
}

#[derive(Debug)]
struct EnergyCell {
    pair: EnergyPair,
    last_update_s: f64,
}

#[derive(Debug, Default)]
struct EngineState {
    rngs: HashMap<String, SmallRng>,
    energy: HashMap<EnergyKey, EnergyCell>,
    overrides: HashMap<String, CircuitOverride>,
    global: GlobalOverrides,
}

#[derive(Debug)]
pub struct SimulationEngine {
    config: SimulationConfig,
    clock: SimClock,
    behavior: BehaviorEngine,
    started: Instant,
    base_seed: u64,
    state: Mutex<EngineState>,
}

impl SimulationEngine {
    pub fn new(
        mut config: SimulationConfig,
        serial_override: Option<String>,
        start_time: Option<&str>,
    ) -> PanelResult<Self> {
        config.validate()?;
        if let Some(serial) = serial_override {
            config.panel_config.serial_number = serial;
        }

        let accel = config.simulation_params.time_acceleration;
        let clock = match start_time {
            Some(raw) => SimClock::from_start_time(raw, accel)?,
            None => SimClock::system(accel),
        };
        let behavior = BehaviorEngine::new(
            clock.now_s(),
            config.simulation_params.noise_factor,
            config.simulation_params.enable_realistic_behaviors,
        );
        tracing::info!(
            serial = %config.panel_config.serial_number,
            circuits = config.circuits.len(),
            total_tabs = config.panel_config.total_tabs,
            "simulation engine initialized"
        );

        Ok(Self {
            config,
            clock,
            behavior,
            started: Instant::now(),
            base_seed: rand::random(),
            state: Mutex::new(EngineState::default()),
        })
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        serial_override: Option<String>,
        start_time: Option<&str>,
    ) -> PanelResult<Self> {
        Self::new(SimulationConfig::from_path(path)?, serial_override, start_time)
    }

    pub fn from_yaml_str(
        raw: &str,
        serial_override: Option<String>,
        start_time: Option<&str>,
    ) -> PanelResult<Self> {
        Self::new(SimulationConfig::from_yaml_str(raw)?, serial_override, start_time)
    }

    pub fn serial_number(&self) -> &str {
        &self.config.panel_config.serial_number
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Jump the simulated clock forward, e.g. to observe energy accumulation.
    pub fn advance_time(&self, seconds: f64) {
        self.clock.advance(seconds);
    }

    pub fn set_circuit_overrides(&self, overrides: HashMap<String, CircuitOverride>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (id, ov) in overrides {
            let slot = state.overrides.entry(id).or_default();
            if ov.power_override.is_some() {
                slot.power_override = ov.power_override;
            }
            if ov.power_multiplier.is_some() {
                slot.power_multiplier = ov.power_multiplier;
            }
            if ov.relay_state.is_some() {
                slot.relay_state = ov.relay_state;
            }
            if ov.priority.is_some() {
                slot.priority = ov.priority;
            }
        }
    }

    pub fn clear_circuit_overrides(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.overrides.is_empty() {
            tracing::debug!(count = state.overrides.len(), "clearing circuit overrides");
        }
        state.overrides.clear();
        state.global = GlobalOverrides::default();
    }

    pub fn set_global_overrides(&self, global: GlobalOverrides) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.global = global;
    }

    /// Relay write in simulation mode; unknown circuits are a caller bug.
    pub fn set_relay(&self, circuit_id: &str, relay: RelayState) -> PanelResult<()> {
        self.require_circuit(circuit_id)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.overrides.entry(circuit_id.to_string()).or_default().relay_state = Some(relay);
        Ok(())
    }

    /// Priority write in simulation mode.
    pub fn set_priority(&self, circuit_id: &str, priority: CircuitPriority) -> PanelResult<()> {
        self.require_circuit(circuit_id)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.overrides.entry(circuit_id.to_string()).or_default().priority = Some(priority);
        Ok(())
    }

    fn require_circuit(&self, circuit_id: &str) -> PanelResult<()> {
        if self.config.circuits.iter().any(|c| c.id == circuit_id) {
            Ok(())
        } else {
            Err(PanelError::Validation(format!("unknown circuit '{circuit_id}'")))
        }
    }

    pub fn status(&self) -> StatusOut {
        StatusOut {
            software: SoftwareStatus {
                firmware_version: "sim/v1.4.2".to_string(),
                update_status: "idle".to_string(),
                env: "simulation".to_string(),
            },
            system: SystemStatus {
                manufacturer: "GridPanel".to_string(),
                serial: self.config.panel_config.serial_number.clone(),
                model: "SIM-200".to_string(),
                door_state: DoorState::Closed,
                proximity_proven: true,
                uptime: self.started.elapsed().as_millis() as u64,
            },
            network: NetworkStatus {
                eth0_link: true,
                wlan_link: true,
                wwan_link: false,
            },
        }
    }

    /// Battery-aware state of energy.
    pub fn storage_soe(&self) -> StorageSoe {
        let now = self.clock.now_s();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let percentage = self.storage_soe_locked_percentage(&mut state, now);
        StorageSoe {
            soe: StateOfEnergy {
                percentage,
                max_energy_kwh: None,
            },
        }
    }

    /// One consistent tick of panel state plus circuits.
    pub fn panel_data(&self) -> (PanelState, CircuitsOut) {
        let now = self.clock.now_s();
        let now_ms = (now * 1000.0) as u64;
        let total_tabs = self.config.panel_config.total_tabs;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Circuit powers for this tick.
        struct Tick {
            power: f64,
            relay: RelayState,
            priority: CircuitPriority,
            controllable: bool,
        }
        let mut ticks: HashMap<String, Tick> = HashMap::new();
        let mut mapped: HashSet<u32> = HashSet::new();

        for def in &self.config.circuits {
            let mut template = self.config.circuit_templates[&def.template].clone();
            if let Some(ov) = &def.overrides {
                ov.apply(&mut template);
            }
            let dynamic = state.overrides.get(&def.id).copied().unwrap_or_default();
            let relay = dynamic.relay_state.unwrap_or(RelayState::Closed);
            let priority = dynamic.priority.unwrap_or(template.priority);
            let global_multiplier = state.global.power_multiplier;

            let rng = rng_entry(&mut state.rngs, self.base_seed, &def.id);
            let mut power = self.behavior.circuit_power(&template, now, relay, rng);
            if let Some(p) = dynamic.power_override {
                power = p;
            } else if let Some(m) = dynamic.power_multiplier {
                power *= m;
            }
            if relay == RelayState::Open {
                power = 0.0;
            }
            power *= global_multiplier;

            mapped.extend(def.tabs.iter().copied());
            ticks.insert(
                def.id.clone(),
                Tick {
                    power,
                    relay,
                    priority,
                    controllable: template.relay_behavior == RelayBehavior::Controllable,
                },
            );
        }

        // Per-tab power: configured circuits split across their tabs,
        // unmapped tabs draw from their template or a baseline band.
        let mut tab_power: HashMap<u32, f64> = HashMap::new();
        let mut tab_relay: HashMap<u32, RelayState> = HashMap::new();
        let mut tab_priority: HashMap<u32, CircuitPriority> = HashMap::new();

        for def in &self.config.circuits {
            let tick = &ticks[&def.id];
            let shares = self.split_tab_power(tick.power, &def.tabs);
            for (tab, share) in def.tabs.iter().zip(shares) {
                tab_power.insert(*tab, share);
                tab_relay.insert(*tab, tick.relay);
                tab_priority.insert(*tab, tick.priority);
            }
        }

        let global_multiplier = state.global.power_multiplier;
        let mut synced_done: HashSet<usize> = HashSet::new();
        for tab in 1..=total_tabs {
            if mapped.contains(&tab) {
                continue;
            }
            // Synchronized unmapped groups share one draw.
            if let Some((idx, sync)) = self.config.sync_group_of(tab) {
                if sync.tabs.iter().all(|t| !mapped.contains(t)) {
                    if synced_done.contains(&idx) {
                        continue;
                    }
                    synced_done.insert(idx);
                    let anchor = sync.tabs[0];
                    let power = self.unmapped_power(&mut state, now, anchor) * global_multiplier;
                    let shares = split_power(power, sync.tabs.len(), sync.power_split, &sync.ratios);
                    for (t, share) in sync.tabs.iter().zip(shares) {
                        tab_power.insert(*t, share);
                    }
                    continue;
                }
            }
            let power = self.unmapped_power(&mut state, now, tab) * global_multiplier;
            tab_power.insert(tab, power);
        }

        // Energy accumulation, monotone per key.
        let tab_energy_key = |tab: u32| -> EnergyKey {
            match self.config.sync_group_of(tab) {
                Some((idx, sync)) if sync.energy_sync => EnergyKey::Group(idx),
                _ => EnergyKey::Tab(tab),
            }
        };
        let mut key_power: HashMap<EnergyKey, f64> = HashMap::new();
        for (tab, power) in &tab_power {
            *key_power.entry(tab_energy_key(*tab)).or_insert(0.0) += *power;
        }
        for (key, power) in &key_power {
            let cell = state.energy.entry(*key).or_insert(EnergyCell {
                pair: EnergyPair::default(),
                last_update_s: now,
            });
            let dt_h = ((now - cell.last_update_s) / 3600.0).max(0.0);
            cell.pair.consumed_wh += power.max(0.0) * dt_h;
            cell.pair.produced_wh += (-power).max(0.0) * dt_h;
            cell.last_update_s = now;
        }
        let energy_of = |state: &EngineState, tabs: &[u32]| -> EnergyPair {
            let mut keys: Vec<EnergyKey> = tabs.iter().map(|t| tab_energy_key(*t)).collect();
            keys.sort_unstable_by_key(|k| match k {
                EnergyKey::Tab(t) => (0u8, *t as usize),
                EnergyKey::Group(g) => (1u8, *g),
            });
            keys.dedup();
            let mut pair = EnergyPair::default();
            for key in keys {
                if let Some(cell) = state.energy.get(&key) {
                    pair.consumed_wh += cell.pair.consumed_wh;
                    pair.produced_wh += cell.pair.produced_wh;
                }
            }
            pair
        };

        // Circuits payload.
        let mut circuits = HashMap::new();
        let mut total_power = 0.0;
        let mut total_consumed = 0.0;
        let mut total_produced = 0.0;
        for def in &self.config.circuits {
            let tick = &ticks[&def.id];
            let pair = energy_of(&state, &def.tabs);
            total_power += tick.power;
            total_consumed += pair.consumed_wh;
            total_produced += pair.produced_wh;
            circuits.insert(
                def.id.clone(),
                Circuit {
                    id: def.id.clone(),
                    name: def.name.clone(),
                    relay_state: tick.relay,
                    instant_power_w: tick.power,
                    instant_power_update_time_s: now as u64,
                    produced_energy_wh: pair.produced_wh,
                    consumed_energy_wh: pair.consumed_wh,
                    energy_accum_update_time_s: now as u64,
                    tabs: def.tabs.clone(),
                    priority: tick.priority,
                    is_user_controllable: tick.controllable,
                    is_sheddable: false,
                    is_never_backup: false,
                },
            );
        }

        // Branch list covers every position.
        let mut branches = Vec::with_capacity(total_tabs as usize);
        for tab in 1..=total_tabs {
            let key = tab_energy_key(tab);
            let group_len = match self.config.sync_group_of(tab) {
                Some((_, sync)) if sync.energy_sync => sync.tabs.len() as f64,
                _ => 1.0,
            };
            let pair = state
                .energy
                .get(&key)
                .map(|c| c.pair)
                .unwrap_or_default();
            let unmapped_priority = self
                .config
                .unmapped_tab_templates
                .get(&tab.to_string())
                .map(|t| t.priority)
                .unwrap_or_default();
            branches.push(Branch {
                id: format!("branch_{tab}"),
                relay_state: tab_relay.get(&tab).copied().unwrap_or(RelayState::Closed),
                priority: tab_priority.get(&tab).copied().unwrap_or(unmapped_priority),
                instant_power_w: tab_power.get(&tab).copied().unwrap_or(0.0),
                imported_active_energy_wh: pair.consumed_wh / group_len,
                exported_active_energy_wh: pair.produced_wh / group_len,
                measure_start_ts_ms: now_ms,
                measure_duration_ms: 5000,
                is_measure_valid: true,
            });
        }

        let soe = self.storage_soe_locked_percentage(&mut state, now);
        let panel = PanelState {
            instant_grid_power_w: total_power,
            instant_panel_state_of_energy_percent: soe / 100.0,
            serial_number: self.config.panel_config.serial_number.clone(),
            main_relay_state: RelayState::Closed,
            dsm_grid_state: "LIVE".to_string(),
            dsm_state: "ON_GRID".to_string(),
            main_meter_energy: EnergyAccum {
                produced_energy_wh: total_produced,
                consumed_energy_wh: total_consumed,
            },
            feedthrough_power_w: 0.0,
            feedthrough_energy: EnergyAccum {
                produced_energy_wh: 0.0,
                consumed_energy_wh: 0.0,
            },
            grid_sample_start_ms: now_ms,
            grid_sample_end_ms: now_ms,
            current_run_config: 1,
            branches,
        };

        (panel, CircuitsOut { circuits })
    }

    fn split_tab_power(&self, power: f64, tabs: &[u32]) -> Vec<f64> {
        if tabs.len() < 2 {
            return vec![power; tabs.len()];
        }
        match self.config.sync_group_of(tabs[0]) {
            Some((_, sync)) if sync.tabs == tabs => {
                split_power(power, tabs.len(), sync.power_split, &sync.ratios)
            }
            _ => split_power(power, tabs.len(), PowerSplit::Equal, &[]),
        }
    }

    fn unmapped_power(&self, state: &mut EngineState, now: f64, tab: u32) -> f64 {
        let label = format!("unmapped_tab_{tab}");
        match self.config.unmapped_tab_templates.get(&tab.to_string()) {
            Some(template) => {
                let rng = rng_entry(&mut state.rngs, self.base_seed, &label);
                self.behavior.circuit_power(template, now, RelayState::Closed, rng)
            }
            None => {
                // Baseline leakage for unobserved positions.
                let rng = rng_entry(&mut state.rngs, self.base_seed, &label);
                rng.gen_range(10.0..=200.0)
            }
        }
    }

    fn storage_soe_locked_percentage(&self, state: &mut EngineState, now: f64) -> f64 {
        let hour = hour_of_day(now);
        let mut battery_power = 0.0;
        let mut battery_count = 0usize;
        for def in &self.config.circuits {
            let Some(template) = self.config.circuit_templates.get(&def.template) else {
                continue;
            };
            if !template.battery_behavior.as_ref().is_some_and(|b| b.enabled) {
                continue;
            }
            let mut template = template.clone();
            if let Some(ov) = &def.overrides {
                ov.apply(&mut template);
            }
            let rng = rng_entry(&mut state.rngs, self.base_seed, &def.id);
            battery_power += self
                .behavior
                .circuit_power(&template, now, RelayState::Closed, rng);
            battery_count += 1;
        }
        if battery_count == 0 {
            return 75.0;
        }
        let base = time_based_soe(hour);
        let avg = battery_power / battery_count as f64;
        if avg < -1000.0 {
            (base + 10.0).min(95.0)
        } else if avg > 1000.0 {
            (base - 15.0).max(15.0)
        } else {
            base
        }
    }
}

fn rng_entry<'a>(
    rngs: &'a mut HashMap<String, SmallRng>,
    base_seed: u64,
    label: &str,
) -> &'a mut SmallRng {
    let mut hasher = DefaultHasher::new();
    label.hash(&mut hasher);
    let seed = base_seed ^ hasher.finish();
    rngs.entry(label.to_string())
        .or_insert_with(|| SmallRng::seed_from_u64(seed))
}

fn split_power(power: f64, count: usize, split: PowerSplit, ratios: &[f64]) -> Vec<f64> {
    match split {
        PowerSplit::Equal => vec![power / count as f64; count],
        PowerSplit::PrimarySecondary => {
            let mut shares = vec![0.0; count];
            if count > 0 {
                shares[0] = power;
            }
            shares
        }
        PowerSplit::CustomRatio => {
            let sum: f64 = ratios.iter().sum();
            if sum <= 0.0 {
                return vec![power / count as f64; count];
            }
            ratios.iter().map(|r| power * r / sum).collect()
        }
    }
}

/// Typical state-of-energy curve over a day: overnight discharge, solar
/// charging through the afternoon, evening peak discharge.
fn time_based_soe(hour: u32) -> f64 {
    const PROFILE: [f64; 24] = [
        45.0, 40.0, 38.0, 35.0, 33.0, 30.0, 32.0, 35.0, 40.0, 45.0, 55.0, 65.0, 75.0, 80.0, 85.0,
        88.0, 90.0, 85.0, 80.0, 70.0, 60.0, 50.0, 48.0, 46.0,
    ];
    PROFILE.get(hour as usize).copied().unwrap_or(50.0)
}
