//! Virtual circuits for unmapped panel positions.
//!
//! The circuits endpoint only reports configured circuits; the panel-state
//! branch list covers every physical position. Positions no circuit claims
//! get a synthesized `unmapped_tab_{p}` entry carrying that branch's relay,
//! priority, power and energy, so every position is observable.

use gridpanel_models::gen2::{Circuit, CircuitsOut, PanelState};
use std::collections::HashSet;

pub const UNMAPPED_PREFIX: &str = "unmapped_tab_";

/// Merge virtual entries for unmapped positions into `circuits`, preserving
/// configured entries. Pure; applied on every read path so cached circuit
/// responses stay position-aligned with whichever panel state is current.
pub fn synthesize_unmapped(circuits: &mut CircuitsOut, panel: &PanelState) {
    // Only configured circuits count as mapped; stale virtual entries are
    // overwritten so re-application refreshes them in place.
    let mapped: HashSet<u32> = circuits
        .circuits
        .values()
        .filter(|c| !c.id.starts_with(UNMAPPED_PREFIX))
        .flat_map(|c| c.tabs.iter().copied())
        .collect();

    for (idx, branch) in panel.branches.iter().enumerate() {
        let tab = idx as u32 + 1;
        if mapped.contains(&tab) {
            continue;
        }
        let id = format!("{UNMAPPED_PREFIX}{tab}");
        circuits.circuits.insert(
            id.clone(),
            Circuit {
                id,
                name: format!("Unmapped Tab {tab}"),
                relay_state: branch.relay_state,
                instant_power_w: branch.instant_power_w,
                instant_power_update_time_s: branch.measure_start_ts_ms / 1000,
                produced_energy_wh: branch.exported_active_energy_wh,
                consumed_energy_wh: branch.imported_active_energy_wh,
                energy_accum_update_time_s: branch.measure_start_ts_ms / 1000,
                tabs: vec![tab],
                priority: branch.priority,
                is_user_controllable: false,
                is_sheddable: false,
                is_never_backup: false,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridpanel_models::gen2::{Branch, EnergyAccum};
    use gridpanel_models::{CircuitPriority, RelayState};
    use std::collections::HashMap;

    fn branch(tab: u32, power: f64) -> Branch {
        Branch {
            id: format!("branch_{tab}"),
            relay_state: RelayState::Closed,
            priority: CircuitPriority::NonEssential,
            instant_power_w: power,
            imported_active_energy_wh: 100.0 * tab as f64,
            exported_active_energy_wh: 0.0,
            measure_start_ts_ms: 1_700_000_000_000,
            measure_duration_ms: 5000,
            is_measure_valid: true,
        }
    }

    fn panel_with_branches(powers: &[f64]) -> PanelState {
        PanelState {
            instant_grid_power_w: powers.iter().sum(),
            instant_panel_state_of_energy_percent: 0.75,
            serial_number: "test".into(),
            main_relay_state: RelayState::Closed,
            dsm_grid_state: "LIVE".into(),
            dsm_state: "ON_GRID".into(),
            main_meter_energy: EnergyAccum {
                produced_energy_wh: 0.0,
                consumed_energy_wh: 0.0,
            },
            feedthrough_power_w: 0.0,
            feedthrough_energy: EnergyAccum {
                produced_energy_wh: 0.0,
                consumed_energy_wh: 0.0,
            },
            grid_sample_start_ms: 0,
            grid_sample_end_ms: 0,
            current_run_config: 1,
            branches: powers
                .iter()
                .enumerate()
                .map(|(i, p)| branch(i as u32 + 1, *p))
                .collect(),
        }
    }

    fn configured(id: &str, name: &str, tabs: Vec<u32>, power: f64) -> Circuit {
        Circuit {
            id: id.into(),
            name: name.into(),
            relay_state: RelayState::Closed,
            instant_power_w: power,
            instant_power_update_time_s: 0,
            produced_energy_wh: 0.0,
            consumed_energy_wh: 0.0,
            energy_accum_update_time_s: 0,
            tabs,
            priority: CircuitPriority::MustHave,
            is_user_controllable: true,
            is_sheddable: false,
            is_never_backup: false,
        }
    }

    #[test]
    fn synthesizes_only_the_uncovered_positions() {
        let mut circuits = CircuitsOut {
            circuits: HashMap::from([(
                "A".to_string(),
                configured("A", "Kitchen", vec![1, 3], 150.0),
            )]),
        };
        let panel = panel_with_branches(&[75.0, -2500.0, 75.0, 0.0]);

        synthesize_unmapped(&mut circuits, &panel);

        assert_eq!(circuits.circuits.len(), 3);
        assert_eq!(circuits.circuits["A"].instant_power_w, 150.0);
        assert_eq!(circuits.circuits["unmapped_tab_2"].instant_power_w, -2500.0);
        assert_eq!(circuits.circuits["unmapped_tab_4"].instant_power_w, 0.0);
        assert!(!circuits.circuits.contains_key("unmapped_tab_1"));
        assert!(!circuits.circuits.contains_key("unmapped_tab_3"));
    }

    #[test]
    fn every_position_is_covered_exactly_once() {
        let mut circuits = CircuitsOut {
            circuits: HashMap::from([(
                "A".to_string(),
                configured("A", "Dryer", vec![2, 5], 4200.0),
            )]),
        };
        let panel = panel_with_branches(&[10.0, 0.0, 30.0, 40.0, 0.0, 60.0]);
        synthesize_unmapped(&mut circuits, &panel);

        for tab in 1..=6u32 {
            let covering: Vec<_> = circuits
                .circuits
                .values()
                .filter(|c| c.tabs.contains(&tab))
                .collect();
            assert_eq!(covering.len(), 1, "tab {tab} covered {} times", covering.len());
        }
    }

    #[test]
    fn virtual_entry_copies_branch_state() {
        let mut circuits = CircuitsOut {
            circuits: HashMap::new(),
        };
        let mut panel = panel_with_branches(&[5.0]);
        panel.branches[0].relay_state = RelayState::Open;
        panel.branches[0].priority = CircuitPriority::MustHave;
        synthesize_unmapped(&mut circuits, &panel);

        let virtual_circuit = &circuits.circuits["unmapped_tab_1"];
        assert_eq!(virtual_circuit.name, "Unmapped Tab 1");
        assert_eq!(virtual_circuit.relay_state, RelayState::Open);
        assert_eq!(virtual_circuit.priority, CircuitPriority::MustHave);
        assert_eq!(virtual_circuit.tabs, vec![1]);
        assert_eq!(virtual_circuit.consumed_energy_wh, 100.0);
        assert!(!virtual_circuit.is_user_controllable);
    }

    #[test]
    fn single_tab_panel_with_no_circuits_yields_one_virtual_entry() {
        let mut circuits = CircuitsOut {
            circuits: HashMap::new(),
        };
        let panel = panel_with_branches(&[120.0]);
        synthesize_unmapped(&mut circuits, &panel);
        assert_eq!(circuits.circuits.len(), 1);
        assert!(circuits.circuits.contains_key("unmapped_tab_1"));
    }

    #[test]
    fn reapplying_against_fresh_panel_state_refreshes_virtual_entries() {
        let mut circuits = CircuitsOut {
            circuits: HashMap::new(),
        };
        synthesize_unmapped(&mut circuits, &panel_with_branches(&[100.0]));
        assert_eq!(circuits.circuits["unmapped_tab_1"].instant_power_w, 100.0);

        synthesize_unmapped(&mut circuits, &panel_with_branches(&[250.0]));
        assert_eq!(circuits.circuits["unmapped_tab_1"].instant_power_w, 250.0);
    }
}
