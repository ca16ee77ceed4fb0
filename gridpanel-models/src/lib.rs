//! Transport-agnostic data model for smart-panel clients.
//!
//! Both transports project their internal state into [`PanelSnapshot`] /
//! [`CircuitSnapshot`] and advertise what they can do through
//! [`PanelCapability`]. Fields a transport cannot observe are `None`, never a
//! substituted zero.

mod capability;
pub mod gen2;
mod phase;
mod snapshot;

pub use capability::PanelCapability;
pub use phase::{phase_distribution, tab_leg, tabs_opposite_leg, validate_tab_pair, Leg};
pub use snapshot::{
    CircuitPriority, CircuitSnapshot, DoorState, PanelGeneration, PanelSnapshot, RelayState,
};
