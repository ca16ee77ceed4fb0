//! Factory-built simulation client end to end: capability gating and the
//! unified snapshot surface.

use gridpanel_client::{create, ClientOptions, PanelCapability, PanelGeneration, RelayState};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
panel_config:
  serial_number: "placeholder"
  total_tabs: 8
  main_size: 200
circuit_templates:
  hvac:
    mode: consumer
    power_range: [0.0, 5000.0]
    typical_power: 2800.0
    power_variation: 0.0
    relay_behavior: controllable
    priority: MUST_HAVE
  solar:
    mode: producer
    power_range: [-6000.0, 0.0]
    typical_power: -3200.0
    power_variation: 0.0
    relay_behavior: non_controllable
    priority: MUST_HAVE
    time_of_day_profile:
      enabled: true
      hourly_multipliers:
        12: 1.0
circuits:
  - id: "hvac_main"
    name: "Heat Pump"
    template: hvac
    tabs: [1, 2]
  - id: "solar_roof"
    name: "Rooftop Solar"
    template: solar
    tabs: [3, 4]
simulation_params:
  noise_factor: 0.0
  time_acceleration: 0.0
"#;

#[tokio::test]
async fn simulated_panel_behaves_like_gen2() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let options = ClientOptions {
        generation: Some(PanelGeneration::Gen2),
        simulation_mode: true,
        simulation_config_path: Some(file.path().to_path_buf()),
        simulation_start_time: Some("2025-06-15T12:00:00".to_string()),
        cache_window: Duration::from_secs(5),
        ..ClientOptions::default()
    };
    let client = create("sim-panel-007", options).await.unwrap();

    assert_eq!(client.generation(), PanelGeneration::Gen2);
    assert!(client.capabilities().contains(PanelCapability::RELAY_CONTROL));
    assert!(client.capabilities().contains(PanelCapability::BATTERY));
    assert!(!client.capabilities().contains(PanelCapability::PUSH_STREAMING));
    assert!(client.ping().await);

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.serial_number, "sim-panel-007");
    assert!((snapshot.main_power_w - (2800.0 - 3200.0)).abs() < 1e-9);

    // Solar produces at noon; the sign convention is negative for production.
    let solar = &snapshot.circuits["solar_roof"];
    assert!((solar.power_w - -3200.0).abs() < 1e-9);
    assert!(solar.is_dual_phase);

    // Positions 5..8 are unmapped and appear as virtual circuits.
    for tab in 5..=8u32 {
        let id = format!("unmapped_tab_{tab}");
        let circuit = snapshot.circuits.get(&id).expect("virtual circuit");
        assert_eq!(circuit.tabs.as_deref(), Some(&[tab][..]));
    }

    // Relay writes flow through the unified handle's G2 accessor.
    let gen2 = client.as_gen2().unwrap();
    gen2.set_circuit_relay("hvac_main", RelayState::Open).await.unwrap();
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.circuits["hvac_main"].power_w, 0.0);
    assert_eq!(
        snapshot.circuits["hvac_main"].relay_state,
        Some(RelayState::Open)
    );

    client.close().await;
}
