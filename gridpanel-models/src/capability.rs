use bitflags::bitflags;

bitflags! {
    /// Features a panel transport supports, advertised at runtime.
    ///
    /// Read the set once after construction to decide which surfaces to wire
    /// up; membership is stable for the life of the client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PanelCapability: u16 {
        /// Circuit relays can be opened/closed.
        const RELAY_CONTROL = 1 << 0;
        /// Circuit load priorities can be written.
        const PRIORITY_CONTROL = 1 << 1;
        /// Wh accumulation data is reported.
        const ENERGY_HISTORY = 1 << 2;
        /// Battery/storage state of energy is exposed.
        const BATTERY = 1 << 3;
        /// Solar / feedthrough production data is present.
        const SOLAR = 1 << 4;
        /// Demand-side management state is reported.
        const DSM_STATE = 1 << 5;
        /// Door state and detailed hardware info are reported.
        const HARDWARE_STATUS = 1 << 6;
        /// Updates are pushed via registered callbacks.
        const PUSH_STREAMING = 1 << 7;
    }
}

impl PanelCapability {
    /// Everything the request/response G2 transport offers.
    pub const GEN2: PanelCapability = PanelCapability::all()
        .difference(PanelCapability::PUSH_STREAMING);

    /// The streaming-only G3 transport.
    pub const GEN3: PanelCapability = PanelCapability::PUSH_STREAMING;
}
