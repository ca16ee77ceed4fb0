//! Simulation-mode behavior of the G2 client: caching, write invalidation,
//! unmapped synthesis and the snapshot projection, all without a wire.

use gridpanel_gen2::{Gen2Client, Gen2Config};
use gridpanel_models::{CircuitPriority, PanelGeneration, RelayState};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
panel_config:
  serial_number: "will-be-overridden"
  total_tabs: 4
  main_size: 200
circuit_templates:
  kitchen:
    mode: consumer
    power_range: [0.0, 500.0]
    typical_power: 150.0
    power_variation: 0.0
    relay_behavior: controllable
    priority: MUST_HAVE
unmapped_tab_templates:
  "2":
    mode: producer
    power_range: [-4000.0, 0.0]
    typical_power: -2500.0
    power_variation: 0.0
    relay_behavior: non_controllable
    priority: NON_ESSENTIAL
    time_of_day_profile:
      enabled: true
      hourly_multipliers:
        12: 1.0
  "4":
    mode: consumer
    power_range: [0.0, 0.0]
    typical_power: 0.0
    power_variation: 0.0
    relay_behavior: non_controllable
    priority: NON_ESSENTIAL
circuits:
  - id: "A"
    name: "Kitchen"
    template: kitchen
    tabs: [1, 2]
simulation_params:
  noise_factor: 0.0
  time_acceleration: 0.0
"#;

// Variant where the circuit spans tabs 1 and 4, leaving 2 and 3 unmapped.
const CONFIG_UNMAPPED: &str = r#"
panel_config:
  serial_number: "will-be-overridden"
  total_tabs: 4
  main_size: 200
circuit_templates:
  kitchen:
    mode: consumer
    power_range: [0.0, 500.0]
    typical_power: 150.0
    power_variation: 0.0
    relay_behavior: controllable
    priority: MUST_HAVE
unmapped_tab_templates:
  "2":
    mode: producer
    power_range: [-4000.0, 0.0]
    typical_power: -2500.0
    power_variation: 0.0
    relay_behavior: non_controllable
    priority: NON_ESSENTIAL
    time_of_day_profile:
      enabled: true
      hourly_multipliers:
        12: 1.0
  "3":
    mode: consumer
    power_range: [0.0, 0.0]
    typical_power: 0.0
    power_variation: 0.0
    relay_behavior: non_controllable
    priority: NON_ESSENTIAL
circuits:
  - id: "A"
    name: "Kitchen"
    template: kitchen
    tabs: [1, 4]
simulation_params:
  noise_factor: 0.0
  time_acceleration: 0.0
"#;

fn write_config(raw: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(raw.as_bytes()).expect("write config");
    file
}

fn sim_client(raw: &str, cache_window: Duration) -> (Gen2Client, NamedTempFile) {
    let file = write_config(raw);
    let config = Gen2Config::new("sim-serial-001")
        .with_cache_window(cache_window)
        .with_simulation(file.path())
        .with_simulation_start_time("2025-06-15T12:00:00");
    (Gen2Client::new(config).expect("client"), file)
}

#[tokio::test]
async fn unmapped_positions_get_virtual_circuits() {
    let (client, _file) = sim_client(CONFIG_UNMAPPED, Duration::from_secs(5));
    let circuits = client.circuits().await.unwrap();

    assert!(circuits.circuits.contains_key("A"));
    assert!((circuits.circuits["A"].instant_power_w - 150.0).abs() < 1e-9);

    let solar = &circuits.circuits["unmapped_tab_2"];
    assert!((solar.instant_power_w - -2500.0).abs() < 1e-9);
    assert_eq!(solar.tabs, vec![2]);

    let idle = &circuits.circuits["unmapped_tab_3"];
    assert_eq!(idle.instant_power_w, 0.0);

    assert!(!circuits.circuits.contains_key("unmapped_tab_1"));
    assert!(!circuits.circuits.contains_key("unmapped_tab_4"));

    // Every position is covered exactly once.
    for tab in 1..=4u32 {
        let covering = circuits
            .circuits
            .values()
            .filter(|c| c.tabs.contains(&tab))
            .count();
        assert_eq!(covering, 1, "tab {tab}");
    }
}

#[tokio::test]
async fn cached_reads_are_identical_within_the_window() {
    let (client, _file) = sim_client(CONFIG, Duration::from_secs(30));
    let first = client.circuits().await.unwrap();
    client.simulation().unwrap().advance_time(3600.0);
    let second = client.circuits().await.unwrap();
    assert_eq!(first, second);

    let panel_first = client.panel_state().await.unwrap();
    let panel_second = client.panel_state().await.unwrap();
    assert_eq!(panel_first, panel_second);
}

#[tokio::test]
async fn zero_cache_window_reads_fresh_every_time() {
    let (client, _file) = sim_client(CONFIG, Duration::ZERO);
    let first = client.panel_state().await.unwrap();
    client.simulation().unwrap().advance_time(3600.0);
    let second = client.panel_state().await.unwrap();
    // An hour of consumption must be visible in the accumulated energy.
    assert!(
        second.main_meter_energy.consumed_energy_wh
            > first.main_meter_energy.consumed_energy_wh
    );
}

#[tokio::test]
async fn writes_invalidate_every_cache_key() {
    let (client, _file) = sim_client(CONFIG, Duration::from_secs(30));
    let before = client.circuits().await.unwrap();
    assert_eq!(before.circuits["A"].relay_state, RelayState::Closed);

    client.set_circuit_relay("A", RelayState::Open).await.unwrap();
    let after = client.circuits().await.unwrap();
    assert_eq!(after.circuits["A"].relay_state, RelayState::Open);
    assert_eq!(after.circuits["A"].instant_power_w, 0.0);

    client
        .set_circuit_priority("A", CircuitPriority::NiceToHave)
        .await
        .unwrap();
    let after = client.circuits().await.unwrap();
    assert_eq!(after.circuits["A"].priority, CircuitPriority::NiceToHave);
}

#[tokio::test]
async fn clear_overrides_is_idempotent_and_clears_cache() {
    let (client, _file) = sim_client(CONFIG, Duration::from_secs(30));
    client.set_circuit_relay("A", RelayState::Open).await.unwrap();
    assert_eq!(
        client.circuits().await.unwrap().circuits["A"].relay_state,
        RelayState::Open
    );

    client.clear_circuit_overrides().unwrap();
    client.clear_circuit_overrides().unwrap();
    assert_eq!(
        client.circuits().await.unwrap().circuits["A"].relay_state,
        RelayState::Closed
    );
}

#[tokio::test]
async fn snapshot_projects_gen2_fields_and_omits_gen3_fields() {
    let (client, _file) = sim_client(CONFIG, Duration::from_secs(5));
    let snapshot = client.snapshot().await.unwrap();

    assert_eq!(snapshot.generation, PanelGeneration::Gen2);
    assert_eq!(snapshot.serial_number, "sim-serial-001");
    assert!(snapshot.firmware_version.is_some());
    assert!(snapshot.grid_power_w.is_some());
    assert!(snapshot.battery_soe.is_some());
    let soe = snapshot.battery_soe.unwrap();
    assert!((0.0..=1.0).contains(&soe));
    assert!(snapshot.main_relay_state.is_some());
    assert!(snapshot.door_state.is_some());
    assert!(snapshot.dsm_state.is_some());

    assert_eq!(snapshot.main_voltage_v, None);
    assert_eq!(snapshot.main_current_a, None);
    assert_eq!(snapshot.main_frequency_hz, None);

    let circuit = &snapshot.circuits["A"];
    assert!(circuit.relay_state.is_some());
    assert!(circuit.tabs.is_some());
    assert!(circuit.is_dual_phase);
    assert_eq!(circuit.voltage_v, None);
    assert_eq!(circuit.apparent_power_va, None);

    // No circuit references a position outside the panel.
    for circuit in snapshot.circuits.values() {
        for tab in circuit.tabs.as_deref().unwrap_or(&[]) {
            assert!((1..=4).contains(tab));
        }
    }
}

#[tokio::test]
async fn authenticate_supersedes_an_external_token() {
    let (client, _file) = sim_client(CONFIG, Duration::from_secs(5));
    client.set_access_token("external-token");
    let auth = client.authenticate("test-app", "Test App").await.unwrap();
    assert!(auth.access_token.starts_with("sim-token-"));
}
