//! State-of-charge estimation by coulomb counting, re-seeded from the open
//! circuit voltage curve while the pack is relaxed.

use std::time::Instant;

use crate::config::BmsConfig;
use crate::helper::interpolate;

/// Milliamp-seconds per percent and Ah of capacity.
const MAS_PER_PERCENT_AH: f32 = 3.6e4;

/// Minimum committed SOC step (%). Smaller deltas stay in the counter to
/// keep resolution.
const SOC_COMMIT_THRESHOLD: f32 = 0.1;

/// Integrates the pack current into a high-resolution charge counter and
/// commits it to the SOC value in steps.
#[derive(Debug)]
pub struct SocEstimator {
    coulomb_counter_mas: f32,
    last_update: Instant,
}

impl Default for SocEstimator {
    fn default() -> Self {
        Self {
            coulomb_counter_mas: 0.0,
            last_update: Instant::now(),
        }
    }
}

impl SocEstimator {
    /// Integrates `current` (A, charging positive) since the last call and
    /// updates `soc` (%) once the accumulated change exceeds the commit
    /// threshold. `soc` is clamped to [0, 100].
    pub fn update(&mut self, current: f32, nominal_capacity_ah: f32, soc: &mut f32) {
        self.update_at(Instant::now(), current, nominal_capacity_ah, soc);
    }

    pub fn update_at(
        &mut self,
        now: Instant,
        current: f32,
        nominal_capacity_ah: f32,
        soc: &mut f32,
    ) {
        let dt_ms = now.duration_since(self.last_update).as_millis() as f32;
        self.last_update = now;

        // A * ms = mAs
        self.coulomb_counter_mas += current * dt_ms;

        let soc_delta = self.coulomb_counter_mas / (nominal_capacity_ah * MAS_PER_PERCENT_AH);
        if soc_delta.abs() > SOC_COMMIT_THRESHOLD {
            *soc = (*soc + soc_delta).clamp(0.0, 100.0);
            self.coulomb_counter_mas = 0.0;
        }
    }

    /// Discards the accumulated charge, e.g. after the SOC was re-seeded.
    pub fn reset(&mut self) {
        self.coulomb_counter_mas = 0.0;
        self.last_update = Instant::now();
    }
}

/// Estimates the SOC (%) from the average cell voltage.
///
/// Uses the configured OCV curve if one is available, otherwise a linear
/// 2-point estimation between the discharge and charge voltage limits.
pub fn estimate_from_voltage(conf: &BmsConfig, cell_voltage_avg: f32) -> f32 {
    if let Some((ocv, soc_points)) = conf.ocv_curve() {
        interpolate(ocv, soc_points, cell_voltage_avg)
    } else {
        let points_v = [conf.cell_dis_voltage, conf.cell_chg_voltage];
        let points_soc = [0.0, 100.0];
        interpolate(&points_v, &points_soc, cell_voltage_avg)
    }
}
