//! YAML-driven panel simulation.
//!
//! The engine serves the same read surface as the live G2 transport: status,
//! panel state (with a full branch list), circuits and storage state of
//! energy, all generated from a declarative configuration with
//! deterministic-plus-noise behavior over simulated time.

mod behavior;
mod clock;
mod config;
mod engine;

pub use clock::{hour_of_day, SimClock};
pub use config::{
    BatteryBehavior, CircuitDef, CircuitTemplate, CyclingPattern, EnergyMode, PanelConfig,
    PowerSplit, RelayBehavior, SimulationConfig, SimulationParams, SmartBehavior,
    TabSynchronization, TemplateOverrides, TimeOfDayProfile,
};
pub use engine::{CircuitOverride, GlobalOverrides, SimulationEngine};
