//! BMS configuration and per-chemistry default limit tables.

use serde::{Deserialize, Serialize};

use crate::flags::ErrorFlags;

/// Fixed number of OCV vs. SOC points in the built-in curves.
pub const NUM_OCV_POINTS: usize = 21;

/// Open circuit voltage of LFP cells vs. SOC (V, descending).
pub static OCV_LFP: [f32; NUM_OCV_POINTS] = [
    3.392, 3.314, 3.309, 3.308, 3.304, 3.296, 3.283, 3.275, 3.271, 3.268, 3.265, 3.264, 3.262,
    3.252, 3.240, 3.226, 3.213, 3.190, 3.177, 3.132, 2.833,
];

/// Open circuit voltage of NMC/graphite cells vs. SOC (V, descending).
pub static OCV_NMC: [f32; NUM_OCV_POINTS] = [
    4.198, 4.135, 4.089, 4.056, 4.026, 3.993, 3.962, 3.924, 3.883, 3.858, 3.838, 3.819, 3.803,
    3.787, 3.764, 3.745, 3.726, 3.702, 3.684, 3.588, 2.800,
];

/// Open circuit voltage of LTO cells vs. SOC (V, descending).
pub static OCV_LTO: [f32; NUM_OCV_POINTS] = [
    2.700, 2.559, 2.492, 2.446, 2.409, 2.379, 2.353, 2.330, 2.310, 2.292, 2.276, 2.262, 2.249,
    2.237, 2.226, 2.215, 2.204, 2.190, 2.170, 2.128, 1.900,
];

/// State of charge points for the OCV curves (%, descending from 100 to 0).
pub static SOC_POINTS: [f32; NUM_OCV_POINTS] = [
    100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 70.0, 65.0, 60.0, 55.0, 50.0, 45.0, 40.0, 35.0, 30.0,
    25.0, 20.0, 15.0, 10.0, 5.0, 0.0,
];

/// Battery cell chemistries with built-in default limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    /// LiFePO4 Li-ion cells (3.3 V nominal)
    Lfp,
    /// NMC/Graphite Li-ion cells (3.7 V nominal)
    Nmc,
    /// NMC/Graphite High Voltage Li-ion cells (3.7 V nominal, 4.35 V max)
    NmcHv,
    /// Lithium Titanate cells (2.4 V nominal)
    Lto,
}

/// BMS configuration values, stored in RAM. The configuration is not
/// automatically pushed to the AFE after values are changed: call
/// `Bms::apply_config` to write it out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmsConfig {
    /// Effective resistance of the current measurement shunt(s) (mOhm)
    pub shunt_res_mohm: f32,
    /// Beta value of the used thermistor. Typical value for Semitec 103AT-5: 3435
    pub thermistor_beta: u16,
    /// Nominal capacity of the battery pack (Ah)
    pub nominal_capacity_ah: f32,

    // Current limits
    /// Discharge short circuit limit (A)
    pub dis_sc_limit: f32,
    /// Discharge short circuit delay (us)
    pub dis_sc_delay_us: u32,
    /// Discharge over-current limit (A)
    pub dis_oc_limit: f32,
    /// Discharge over-current delay (ms)
    pub dis_oc_delay_ms: u32,
    /// Charge over-current limit (A)
    pub chg_oc_limit: f32,
    /// Charge over-current delay (ms)
    pub chg_oc_delay_ms: u32,

    // Cell voltage limits
    /// Cell target charge voltage (V)
    pub cell_chg_voltage: f32,
    /// Cell discharge voltage limit (V)
    pub cell_dis_voltage: f32,
    /// Cell over-voltage limit (V)
    pub cell_ov_limit: f32,
    /// Cell over-voltage error reset threshold (V), must be below the limit
    pub cell_ov_reset: f32,
    /// Cell over-voltage delay (ms)
    pub cell_ov_delay_ms: u32,
    /// Cell under-voltage limit (V)
    pub cell_uv_limit: f32,
    /// Cell under-voltage error reset threshold (V), must be above the limit
    pub cell_uv_reset: f32,
    /// Cell under-voltage delay (ms)
    pub cell_uv_delay_ms: u32,

    // Temperature limits (°C)
    /// Discharge over-temperature (DOT) limit (°C)
    pub dis_ot_limit: f32,
    /// Discharge under-temperature (DUT) limit (°C)
    pub dis_ut_limit: f32,
    /// Charge over-temperature (COT) limit (°C)
    pub chg_ot_limit: f32,
    /// Charge under-temperature (CUT) limit (°C)
    pub chg_ut_limit: f32,
    /// Temperature limit hysteresis, shared by all four limits (°C)
    pub t_limit_hyst: f32,

    // Balancing settings
    /// Enable automatic balancing
    pub auto_balancing: bool,
    /// Balancing cell voltage target difference (V)
    pub bal_cell_voltage_diff: f32,
    /// Minimum cell voltage to start balancing (V)
    pub bal_cell_voltage_min: f32,
    /// Current threshold to be considered idle (A)
    pub bal_idle_current: f32,
    /// Minimum idle duration before balancing (s)
    pub bal_idle_delay: u16,

    /// Open circuit voltage points of the cell vs. SOC (V, descending),
    /// spaced the same as `soc_points`. `None` selects the simplified
    /// voltage-only SOC estimation.
    pub ocv_points: Option<Vec<f32>>,
    /// State of charge points for the OCV curve (%, descending)
    pub soc_points: Vec<f32>,

    /// Error flags which should trigger an alert action (if supported by the AFE)
    pub alert_mask: ErrorFlags,
    /// Bitfield enabling the built-in voltage regulators of the AFE
    pub vregs_enable: u8,
}

impl BmsConfig {
    /// Maximum continuous current supported by typical board hardware (A),
    /// used to cap the default 1C current limits.
    pub const BOARD_MAX_CURRENT: f32 = 50.0;

    /// Typical default values for the given cell chemistry and pack capacity.
    pub fn with_cell_type(cell_type: CellType, nominal_capacity_ah: f32) -> Self {
        // 1C should be safe for all batteries
        let oc_limit = nominal_capacity_ah.min(Self::BOARD_MAX_CURRENT);

        let mut conf = Self {
            shunt_res_mohm: 1.0,
            thermistor_beta: 3435,
            nominal_capacity_ah,

            dis_sc_limit: oc_limit * 2.0,
            dis_sc_delay_us: 200,
            dis_oc_limit: oc_limit,
            dis_oc_delay_ms: 320,
            chg_oc_limit: oc_limit,
            chg_oc_delay_ms: 320,

            cell_chg_voltage: 0.0,
            cell_dis_voltage: 0.0,
            cell_ov_limit: 0.0,
            cell_ov_reset: 0.0,
            cell_ov_delay_ms: 2000,
            cell_uv_limit: 0.0,
            cell_uv_reset: 0.0,
            cell_uv_delay_ms: 2000,

            dis_ot_limit: 45.0,
            dis_ut_limit: -20.0,
            chg_ot_limit: 45.0,
            chg_ut_limit: 0.0,
            t_limit_hyst: 5.0,

            auto_balancing: true,
            bal_cell_voltage_diff: 0.01,
            bal_cell_voltage_min: 0.0,
            bal_idle_current: 0.1,
            bal_idle_delay: 1800,

            ocv_points: None,
            soc_points: SOC_POINTS.to_vec(),

            alert_mask: ErrorFlags::NONE,
            vregs_enable: 0,
        };

        match cell_type {
            CellType::Lfp => {
                conf.cell_ov_limit = 3.80;
                conf.cell_chg_voltage = 3.55;
                conf.cell_ov_reset = 3.40;
                conf.bal_cell_voltage_min = 3.30;
                conf.cell_uv_reset = 3.10;
                conf.cell_dis_voltage = 2.80;
                // most cells survive even 2.0 V, but keep some margin for
                // further self-discharge
                conf.cell_uv_limit = 2.50;
                conf.ocv_points = Some(OCV_LFP.to_vec());
            }
            CellType::Nmc => {
                conf.cell_ov_limit = 4.25;
                conf.cell_chg_voltage = 4.20;
                conf.cell_ov_reset = 4.05;
                conf.bal_cell_voltage_min = 3.80;
                conf.cell_uv_reset = 3.50;
                conf.cell_dis_voltage = 3.20;
                conf.cell_uv_limit = 3.00;
                conf.ocv_points = Some(OCV_NMC.to_vec());
            }
            CellType::NmcHv => {
                conf.cell_ov_limit = 4.35;
                conf.cell_chg_voltage = 4.30;
                conf.cell_ov_reset = 4.15;
                conf.bal_cell_voltage_min = 3.80;
                conf.cell_uv_reset = 3.50;
                conf.cell_dis_voltage = 3.20;
                conf.cell_uv_limit = 3.00;
                // no dedicated curve available, simplified estimation is used
                conf.ocv_points = None;
            }
            CellType::Lto => {
                conf.cell_ov_limit = 2.85;
                conf.cell_chg_voltage = 2.80;
                conf.cell_ov_reset = 2.70;
                conf.bal_cell_voltage_min = 2.50;
                conf.cell_uv_reset = 2.10;
                conf.cell_dis_voltage = 2.00;
                conf.cell_uv_limit = 1.90;
                conf.ocv_points = Some(OCV_LTO.to_vec());
            }
        }

        conf
    }

    /// Returns the OCV curve if a usable one is configured (matching length,
    /// not all zero).
    pub fn ocv_curve(&self) -> Option<(&[f32], &[f32])> {
        let ocv = self.ocv_points.as_deref()?;
        if ocv.len() < 2 || ocv.len() != self.soc_points.len() {
            return None;
        }
        if ocv.iter().all(|v| *v == 0.0) {
            return None;
        }
        Some((ocv, &self.soc_points))
    }
}
