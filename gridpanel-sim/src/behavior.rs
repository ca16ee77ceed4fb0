//! Per-tick power pipeline for simulated circuits.
//!
//! Order of operations: base power from the template's typical value, time
//! multipliers, cycling window, bounded uniform variation, clamp to the
//! profile interval. Producers come out negative, consumers positive,
//! bidirectional circuits follow their battery schedule.

use crate::clock::hour_of_day;
use crate::config::{BatteryBehavior, CircuitTemplate, EnergyMode};
use gridpanel_models::RelayState;
use rand::rngs::SmallRng;
use rand::Rng;

#[derive(Debug)]
pub struct BehaviorEngine {
    start_time_s: f64,
    noise_factor: f64,
    realistic: bool,
}

impl BehaviorEngine {
    pub fn new(start_time_s: f64, noise_factor: f64, realistic: bool) -> Self {
        Self {
            start_time_s,
            noise_factor,
            realistic,
        }
    }

    /// Instantaneous power for one circuit at simulated time `now_s`.
    pub fn circuit_power(
        &self,
        template: &CircuitTemplate,
        now_s: f64,
        relay: RelayState,
        rng: &mut SmallRng,
    ) -> f64 {
        if relay == RelayState::Open {
            return 0.0;
        }

        let hour = hour_of_day(now_s);
        let mut power = template.typical_power;

        if let Some(profile) = template.time_of_day_profile.as_ref().filter(|p| p.enabled) {
            power *= if let Some(mult) = profile.hourly_multipliers.get(&hour) {
                *mult
            } else if profile.peak_hours.contains(&hour) {
                profile.peak_multiplier
            } else if hour >= 22 || hour <= 6 {
                profile.off_peak_multiplier
            } else {
                1.0
            };
        }

        if let Some(battery) = template
            .battery_behavior
            .as_ref()
            .filter(|b| b.enabled && self.realistic)
        {
            power = battery_power(battery, power, hour, rng);
        }

        if let Some(cycling) = &template.cycling_pattern {
            let cycle_len = (cycling.on_duration + cycling.off_duration).max(1) as f64;
            let position = (now_s - self.start_time_s).rem_euclid(cycle_len);
            if position >= cycling.on_duration as f64 {
                // Off window: bidirectional loads may still leak within their
                // idle band, everything else is fully off.
                return match (&template.mode, &template.battery_behavior) {
                    (EnergyMode::Bidirectional, Some(b)) => {
                        rng.gen_range(b.idle_power_range[0]..=b.idle_power_range[1])
                    }
                    _ => 0.0,
                };
            }
        }

        if let Some(smart) = template
            .smart_behavior
            .as_ref()
            .filter(|s| s.responds_to_grid && self.realistic)
        {
            // Grid stress window: evening peak.
            if (17..=21).contains(&hour) {
                power *= 1.0 - smart.max_power_reduction.clamp(0.0, 1.0);
            }
        }

        if let Some(eff) = template.efficiency {
            power *= eff.clamp(0.0, 1.0);
        }

        let total_variation = template.power_variation + self.noise_factor;
        if total_variation > 0.0 {
            power *= 1.0 + rng.gen_range(-total_variation..=total_variation);
        }

        let [min, max] = template.power_range;
        power.clamp(min, max)
    }
}

fn battery_power(battery: &BatteryBehavior, base: f64, hour: u32, rng: &mut SmallRng) -> f64 {
    if battery.charge_hours.contains(&hour) {
        let intensity = battery.solar_intensity_profile.get(&hour).copied().unwrap_or(0.1);
        battery.max_charge_power * intensity
    } else if battery.discharge_hours.contains(&hour) {
        let demand = battery.demand_factor_profile.get(&hour).copied().unwrap_or(0.3);
        battery.max_discharge_power * demand
    } else if battery.idle_hours.contains(&hour) {
        rng.gen_range(battery.idle_power_range[0]..=battery.idle_power_range[1])
    } else {
        // Transition hours: trickle.
        base * 0.1
    }
}
