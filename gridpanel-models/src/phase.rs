//! Static rules for which panel positions form a valid multi-leg pair.
//!
//! Positions are 1-based and alternate legs: odd positions sit on L1, even
//! positions on L2. A 240 V load must occupy one position of each leg.

use gridpanel_error::{PanelError, PanelResult};

/// One of the two hot legs of a split-phase panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    L1,
    L2,
}

/// Leg of a 1-based panel position.
pub fn tab_leg(tab: u32) -> Leg {
    if tab % 2 == 1 {
        Leg::L1
    } else {
        Leg::L2
    }
}

/// Whether two positions sit on opposite legs.
pub fn tabs_opposite_leg(a: u32, b: u32) -> bool {
    tab_leg(a) != tab_leg(b)
}

/// Validate a two-position circuit: both positions in `[1, total_tabs]`,
/// distinct, and on opposite legs.
pub fn validate_tab_pair(a: u32, b: u32, total_tabs: u32) -> PanelResult<()> {
    for tab in [a, b] {
        if tab < 1 || tab > total_tabs {
            return Err(PanelError::Config(format!(
                "tab {tab} is outside the panel (1..={total_tabs})"
            )));
        }
    }
    if a == b {
        return Err(PanelError::Config(format!("tab {a} paired with itself")));
    }
    if !tabs_opposite_leg(a, b) {
        return Err(PanelError::Config(format!(
            "tabs {a} and {b} are on the same leg; a 240 V circuit needs one position per leg"
        )));
    }
    Ok(())
}

/// Count of (L1, L2) positions in a tab list.
pub fn phase_distribution(tabs: &[u32]) -> (usize, usize) {
    let l1 = tabs.iter().filter(|t| tab_leg(**t) == Leg::L1).count();
    (l1, tabs.len() - l1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legs_alternate_by_parity() {
        assert_eq!(tab_leg(1), Leg::L1);
        assert_eq!(tab_leg(2), Leg::L2);
        assert_eq!(tab_leg(15), Leg::L1);
        assert_eq!(tab_leg(40), Leg::L2);
    }

    #[test]
    fn opposite_leg_pairs_are_valid() {
        assert!(validate_tab_pair(1, 2, 8).is_ok());
        assert!(validate_tab_pair(30, 33, 40).is_ok());
    }

    #[test]
    fn same_leg_pairs_are_rejected() {
        assert!(validate_tab_pair(1, 3, 8).is_err());
        assert!(validate_tab_pair(2, 4, 8).is_err());
    }

    #[test]
    fn out_of_bounds_and_self_pairs_are_rejected() {
        assert!(validate_tab_pair(0, 1, 8).is_err());
        assert!(validate_tab_pair(7, 9, 8).is_err());
        assert!(validate_tab_pair(5, 5, 8).is_err());
    }

    #[test]
    fn distribution_counts_legs() {
        assert_eq!(phase_distribution(&[1, 2, 3, 4, 5]), (3, 2));
        assert_eq!(phase_distribution(&[]), (0, 0));
    }
}
