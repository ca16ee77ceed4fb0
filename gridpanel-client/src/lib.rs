//! Unified entry point for talking to smart electrical panels.
//!
//! Two hardware generations coexist: G2 exposes a token-authenticated HTTP
//! API, G3 a streaming binary RPC on its own port. [`create`] probes for the
//! right transport and returns a [`PanelClient`] whose capability set tells
//! the caller what the panel can do; `snapshot()` gives the same
//! transport-agnostic view over both.
//!
//! ```no_run
//! use gridpanel_client::{create, ClientOptions, PanelCapability};
//!
//! # async fn demo() -> gridpanel_error::PanelResult<()> {
//! let client = create("192.168.1.100", ClientOptions::default()).await?;
//! if client.capabilities().contains(PanelCapability::PUSH_STREAMING) {
//!     // G3: connect and stream
//! }
//! let snapshot = client.snapshot().await?;
//! println!("main power: {} W", snapshot.main_power_w);
//! # Ok(())
//! # }
//! ```

mod factory;
mod handle;

pub use factory::{create, ClientOptions};
pub use handle::PanelClient;

pub use gridpanel_error::{PanelError, PanelResult};
pub use gridpanel_gen2::{Gen2Client, Gen2Config, RetryPolicy};
pub use gridpanel_gen3::{Gen3Client, Gen3Config, UnregisterHandle};
pub use gridpanel_models::{
    CircuitPriority, CircuitSnapshot, DoorState, PanelCapability, PanelGeneration, PanelSnapshot,
    RelayState,
};
pub use gridpanel_sim::{CircuitOverride, GlobalOverrides, SimulationConfig, SimulationEngine};
