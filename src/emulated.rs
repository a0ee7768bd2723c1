//! Emulated AFE backend for tests and the `simulate` subcommand.
//!
//! Models the hardware behaviour relevant for the supervisory core: latched
//! voltage faults with reset thresholds, discrete protection threshold
//! steps, FET state feedback and per-section balancing registers.

use log::trace;

use crate::afe::{AfeData, AfeDriver, BalanceRequest, MAX_CELLS, MAX_THERMISTORS};
use crate::balancing::mask_has_adjacent_cells;
use crate::config::BmsConfig;
use crate::error::{Error, Result};
use crate::flags::{ConfigParts, DataParts, ErrorFlags, SwitchMask};
use crate::helper::bit_string;

const NUM_SECTIONS: usize = 3;

/// Available discharge overcurrent threshold settings (mV across the shunt).
static OCD_THRESHOLDS_MV: [f32; 16] = [
    8.0, 11.0, 14.0, 17.0, 19.0, 22.0, 25.0, 28.0, 31.0, 33.0, 36.0, 39.0, 42.0, 44.0, 47.0,
    50.0,
];

/// Available short circuit threshold settings (mV across the shunt).
static SCD_THRESHOLDS_MV: [f32; 8] = [44.0, 67.0, 89.0, 111.0, 133.0, 155.0, 178.0, 200.0];

/// Available discharge overcurrent delay settings (ms).
static OCD_DELAYS_MS: [u32; 8] = [8, 20, 40, 80, 160, 320, 640, 1280];

/// Available short circuit delay settings (us).
static SCD_DELAYS_US: [u32; 4] = [70, 100, 200, 400];

/// Largest table entry not above `value`, or the smallest entry if `value`
/// is below all of them.
fn quantize_down(table: &[f32], value: f32) -> f32 {
    let mut result = table[0];
    for &step in table {
        if step <= value {
            result = step;
        } else {
            break;
        }
    }
    result
}

fn quantize_down_u32(table: &[u32], value: u32) -> u32 {
    let mut result = table[0];
    for &step in table {
        if step <= value {
            result = step;
        } else {
            break;
        }
    }
    result
}

/// In-memory AFE model implementing the full driver contract.
#[derive(Debug)]
pub struct EmulatedAfe {
    // measurement inputs
    cell_voltages: [f32; MAX_CELLS],
    current: f32,
    cell_temps: [f32; MAX_THERMISTORS],
    num_thermistors: usize,
    ic_temp: f32,
    mosfet_temp: f32,

    // applied protection settings
    ov_limit: f32,
    ov_reset: f32,
    uv_limit: f32,
    uv_reset: f32,
    dis_oc_limit: f32,
    dis_sc_limit: f32,

    // runtime state
    latched: ErrorFlags,
    switches_requested: SwitchMask,
    switches_forced_off: SwitchMask,
    balancing_mask: u32,
    auto_balancing: bool,
    shut_down: bool,
    fail_next_reads: u32,
}

impl Default for EmulatedAfe {
    fn default() -> Self {
        Self {
            cell_voltages: [0.0; MAX_CELLS],
            current: 0.0,
            cell_temps: [20.0; MAX_THERMISTORS],
            num_thermistors: 1,
            ic_temp: 20.0,
            mosfet_temp: 20.0,
            ov_limit: f32::MAX,
            ov_reset: f32::MAX,
            uv_limit: 0.0,
            uv_reset: 0.0,
            dis_oc_limit: f32::MAX,
            dis_sc_limit: f32::MAX,
            latched: ErrorFlags::NONE,
            switches_requested: SwitchMask::NONE,
            switches_forced_off: SwitchMask::NONE,
            balancing_mask: 0,
            auto_balancing: false,
            shut_down: false,
            fail_next_reads: 0,
        }
    }
}

impl EmulatedAfe {
    /// Emulator with `num_cells` connected channels at `cell_voltage` each.
    pub fn with_cells(num_cells: usize, cell_voltage: f32) -> Self {
        let mut afe = Self::default();
        for v in afe.cell_voltages.iter_mut().take(num_cells.min(MAX_CELLS)) {
            *v = cell_voltage;
        }
        afe
    }

    pub fn set_cell_voltage(&mut self, cell: usize, voltage: f32) {
        if cell < MAX_CELLS {
            self.cell_voltages[cell] = voltage;
        }
    }

    pub fn set_all_cell_voltages(&mut self, voltage: f32) {
        for v in self.cell_voltages.iter_mut() {
            if *v > 0.0 {
                *v = voltage;
            }
        }
    }

    pub fn set_current(&mut self, current: f32) {
        self.current = current;
    }

    pub fn set_temperature(&mut self, sensor: usize, temp: f32) {
        if sensor < MAX_THERMISTORS {
            self.cell_temps[sensor] = temp;
            self.num_thermistors = self.num_thermistors.max(sensor + 1);
        }
    }

    pub fn set_ic_temperature(&mut self, temp: f32) {
        self.ic_temp = temp;
    }

    pub fn set_mosfet_temperature(&mut self, temp: f32) {
        self.mosfet_temp = temp;
    }

    /// Makes the next `count` calls to `read_data` fail with a
    /// communication error, leaving the output untouched.
    pub fn fail_next_reads(&mut self, count: u32) {
        self.fail_next_reads = count;
    }

    /// Forces the given switches off regardless of requests, emulating a
    /// driver stage fault. The chip reports this via the dis-off/chg-off
    /// flags.
    pub fn force_switches_off(&mut self, switches: SwitchMask) {
        self.switches_forced_off = switches;
    }

    /// Clears the latched current faults, like a fault reset via the status
    /// register.
    pub fn clear_latched_faults(&mut self) {
        self.latched.remove(ErrorFlags::SHORT_CIRCUIT | ErrorFlags::DIS_OVERCURRENT);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Requested state of a switch, regardless of forced faults.
    pub fn switch_requested(&self, switch: SwitchMask) -> bool {
        self.switches_requested.contains(switch)
    }

    pub fn balancing_mask(&self) -> u32 {
        self.balancing_mask
    }

    fn switch_state(&self, switch: SwitchMask) -> bool {
        self.switches_requested.contains(switch) && !self.switches_forced_off.contains(switch)
    }

    /// Evaluates the hardware protections against the current measurement
    /// inputs, latching and releasing fault bits like the chip would.
    fn update_latched_flags(&mut self) {
        let connected: Vec<f32> = self
            .cell_voltages
            .iter()
            .copied()
            .filter(|v| *v > crate::afe::CELL_CONNECTED_THRESHOLD)
            .collect();

        if let (Some(max), Some(min)) = (
            connected.iter().copied().reduce(f32::max),
            connected.iter().copied().reduce(f32::min),
        ) {
            if max > self.ov_limit {
                self.latched.insert(ErrorFlags::CELL_OVERVOLTAGE);
            } else if max < self.ov_reset {
                self.latched.remove(ErrorFlags::CELL_OVERVOLTAGE);
            }
            if min < self.uv_limit {
                self.latched.insert(ErrorFlags::CELL_UNDERVOLTAGE);
            } else if min > self.uv_reset {
                self.latched.remove(ErrorFlags::CELL_UNDERVOLTAGE);
            }
        }

        // discharge current is negative; these stay latched until cleared
        if -self.current > self.dis_sc_limit {
            self.latched.insert(ErrorFlags::SHORT_CIRCUIT);
        } else if -self.current > self.dis_oc_limit {
            self.latched.insert(ErrorFlags::DIS_OVERCURRENT);
        }

        self.latched.set(
            ErrorFlags::DIS_OFF,
            self.switches_requested.contains(SwitchMask::DIS) && !self.switch_state(SwitchMask::DIS),
        );
        self.latched.set(
            ErrorFlags::CHG_OFF,
            self.switches_requested.contains(SwitchMask::CHG) && !self.switch_state(SwitchMask::CHG),
        );
    }
}

impl AfeDriver for EmulatedAfe {
    fn configure(&mut self, conf: &mut BmsConfig, parts: ConfigParts) -> Result<ConfigParts> {
        let mut applied = ConfigParts::NONE;

        if parts.contains(ConfigParts::VOLTAGE_LIMITS) {
            // 1 mV register resolution
            conf.cell_ov_limit = (conf.cell_ov_limit * 1000.0).round() / 1000.0;
            conf.cell_uv_limit = (conf.cell_uv_limit * 1000.0).round() / 1000.0;
            self.ov_limit = conf.cell_ov_limit;
            self.ov_reset = conf.cell_ov_reset;
            self.uv_limit = conf.cell_uv_limit;
            self.uv_reset = conf.cell_uv_reset;
            applied.insert(ConfigParts::VOLTAGE_LIMITS);
        }

        if parts.contains(ConfigParts::CURRENT_LIMITS) {
            let shunt = conf.shunt_res_mohm;

            let oc_mv = quantize_down(&OCD_THRESHOLDS_MV, conf.dis_oc_limit * shunt);
            conf.dis_oc_limit = oc_mv / shunt;
            conf.dis_oc_delay_ms = quantize_down_u32(&OCD_DELAYS_MS, conf.dis_oc_delay_ms);
            self.dis_oc_limit = conf.dis_oc_limit;

            let sc_mv = quantize_down(&SCD_THRESHOLDS_MV, conf.dis_sc_limit * shunt);
            conf.dis_sc_limit = sc_mv / shunt;
            conf.dis_sc_delay_us = quantize_down_u32(&SCD_DELAYS_US, conf.dis_sc_delay_us);
            self.dis_sc_limit = conf.dis_sc_limit;

            applied.insert(ConfigParts::CURRENT_LIMITS);
        }

        if parts.contains(ConfigParts::BALANCING) {
            applied.insert(ConfigParts::BALANCING);
        }
        if parts.contains(ConfigParts::ALERTS) {
            applied.insert(ConfigParts::ALERTS);
        }
        // temperature limits are enforced in software, voltage regulators
        // do not exist in this model

        trace!("emulated AFE configured: {:?}", applied);
        Ok(applied)
    }

    fn read_data(&mut self, data: &mut AfeData, parts: DataParts) -> Result<()> {
        if self.fail_next_reads > 0 {
            self.fail_next_reads -= 1;
            return Err(Error::Comm("injected read failure"));
        }

        if parts.contains(DataParts::CELL_VOLTAGES) || parts.contains(DataParts::PACK_VOLTAGES) {
            data.cell_voltages = self.cell_voltages;
            data.refresh_cell_stats();
        }
        if parts.contains(DataParts::CURRENT) {
            data.current = self.current;
        }
        if parts.contains(DataParts::TEMPERATURES) {
            data.cell_temps = self.cell_temps;
            data.refresh_temp_stats(self.num_thermistors);
            data.ic_temp = self.ic_temp;
            data.mosfet_temp = self.mosfet_temp;
        }
        if parts.contains(DataParts::BALANCING) {
            data.balancing_status = self.balancing_mask;
        }
        if parts.contains(DataParts::ERROR_FLAGS) {
            self.update_latched_flags();
            data.error_flags = self.latched;
        }
        Ok(())
    }

    fn set_switches(&mut self, switches: SwitchMask, enable: bool) -> Result<()> {
        if switches.intersects(!(SwitchMask::CHG | SwitchMask::DIS | SwitchMask::PCHG | SwitchMask::PDSG)) {
            return Err(Error::InvalidParam("unknown switch"));
        }
        self.switches_requested.set(switches, enable);
        Ok(())
    }

    fn balance(&mut self, request: BalanceRequest) -> Result<()> {
        match request {
            BalanceRequest::Off => {
                self.balancing_mask = 0;
                self.auto_balancing = false;
            }
            BalanceRequest::Auto => {
                self.auto_balancing = true;
            }
            BalanceRequest::Cells(mask) => {
                if mask_has_adjacent_cells(mask, NUM_SECTIONS) {
                    return Err(Error::InvalidParam("adjacent cells in balancing mask"));
                }
                self.balancing_mask = mask;
                self.auto_balancing = false;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.switches_requested = SwitchMask::NONE;
        self.balancing_mask = 0;
        self.shut_down = true;
    }

    fn registers_dump(&mut self) -> Result<String> {
        self.update_latched_flags();
        let mut out = String::new();
        out.push_str(&format!(
            "SYS_STAT:  0b{}\n",
            bit_string((self.latched.0 & 0xFF) as u8)
        ));
        out.push_str(&format!(
            "SYS_CTRL2: 0b{}\n",
            bit_string(self.switches_requested.0)
        ));
        for section in 0..NUM_SECTIONS {
            out.push_str(&format!(
                "CELLBAL{}:  0b{}\n",
                section + 1,
                bit_string(((self.balancing_mask >> (section * 5)) & 0x1F) as u8)
            ));
        }
        Ok(out)
    }
}
